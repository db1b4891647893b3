use std::fmt;
use std::ops::BitOr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::mpsc;

use crate::connection::{Connection, ConnectionInner};
use crate::error::Result;
use crate::protocol::{BUS_DAEMON_IFACE, BUS_DAEMON_NAME, BUS_DAEMON_PATH, ERR_NAME_HAS_NO_OWNER};
use crate::watch::SignalWatchHandle;
use crate::MatchRule;

/// How many undelivered owner changes or name events a watch buffers.
const NAME_QUEUE: usize = 16;

const REQUEST_NAME_REPLY_PRIMARY_OWNER: u32 = 1;
const REQUEST_NAME_REPLY_IN_QUEUE: u32 = 2;
const REQUEST_NAME_REPLY_EXISTS: u32 = 3;
const REQUEST_NAME_REPLY_ALREADY_OWNER: u32 = 4;

const RELEASE_NAME_REPLY_RELEASED: u32 = 1;

/// Per-name tracking state shared by every watcher of that name.
///
/// Created when the first watcher arrives, destroyed when the last one
/// cancels.
pub(crate) struct NameInfo {
    /// Owner state and attached watchers, behind the per-name lock.
    /// Acquisition order is always the connection-level name map first,
    /// then this lock.
    state: Mutex<NameState>,
    /// The underlying `NameOwnerChanged` subscription for this name.
    watch_handle: SignalWatchHandle,
}

struct NameState {
    /// `None` until the first resolution; an empty string means the name
    /// currently has no owner.
    current_owner: Option<String>,
    watchers: Vec<NameWatcher>,
}

struct NameWatcher {
    id: u64,
    tx: mpsc::Sender<String>,
}

impl NameInfo {
    async fn create(conn: &Connection, name: &str) -> Result<Arc<NameInfo>> {
        let rule = MatchRule::signal()
            .with_sender(BUS_DAEMON_NAME)
            .with_path(BUS_DAEMON_PATH)
            .with_interface(BUS_DAEMON_IFACE)
            .with_member("NameOwnerChanged")
            .with_arg0(name);

        let mut watch = conn.watch_signal(rule).await?;

        let info = Arc::new(NameInfo {
            state: Mutex::new(NameState {
                current_owner: None,
                watchers: Vec::new(),
            }),
            watch_handle: watch.handle(),
        });

        let signal_info = info.clone();

        tokio::spawn(async move {
            while let Some(msg) = watch.recv().await {
                match msg.args::<(String, String, String)>() {
                    Ok((_, _, new_owner)) => signal_info.owner_changed(new_owner),
                    Err(e) => {
                        tracing::warn!("could not decode NameOwnerChanged message: {e}");
                    }
                }
            }
        });

        // Resolve the current owner in the background; a change signal may
        // beat the reply, in which case the reply is stale and ignored.
        let resolve_info = info.clone();
        let resolve_conn = conn.clone();
        let resolve_name = name.to_owned();

        tokio::spawn(async move {
            let owner = match resolve_conn.bus().get_name_owner(&resolve_name).await {
                Ok(owner) => owner,
                Err(e) if e.remote_name() == Some(ERR_NAME_HAS_NO_OWNER) => String::new(),
                Err(e) => {
                    tracing::warn!("unexpected error from GetNameOwner: {e}");
                    return;
                }
            };

            resolve_info.initial_owner(owner);
        });

        Ok(info)
    }

    /// Apply an owner change reported by `NameOwnerChanged`.
    fn owner_changed(&self, new_owner: String) {
        let mut state = self.state.lock().unwrap();
        state.notify(&new_owner);
        state.current_owner = Some(new_owner);
    }

    /// Apply the initial `GetNameOwner` resolution, unless a change signal
    /// resolved the owner first.
    fn initial_owner(&self, owner: String) {
        let mut state = self.state.lock().unwrap();

        if state.current_owner.is_some() {
            return;
        }

        state.notify(&owner);
        state.current_owner = Some(owner);
    }
}

impl NameState {
    fn notify(&mut self, owner: &str) {
        for watcher in &self.watchers {
            match watcher.tx.try_send(owner.to_owned()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(..)) => {
                    tracing::warn!("dropping owner change for watch with a full queue");
                }
                Err(mpsc::error::TrySendError::Closed(..)) => {}
            }
        }
    }
}

/// Attach a watcher to the name, creating tracking state on first use.
pub(crate) async fn watch_name(conn: &Connection, name: &str) -> Result<NameWatch> {
    let mut infos = conn.inner.name_infos.lock().await;

    let info = match infos.get(name) {
        Some(info) => info.clone(),
        None => {
            let info = NameInfo::create(conn, name).await?;
            infos.insert(name.to_owned(), info.clone());
            info
        }
    };

    let id = conn.next_watch_id();
    let (tx, rx) = mpsc::channel(NAME_QUEUE);

    {
        let mut state = info.state.lock().unwrap();

        // If the owner is already known, the new watcher hears it
        // immediately; a fresh channel always has room.
        if let Some(owner) = &state.current_owner {
            let _ = tx.try_send(owner.clone());
        }

        state.watchers.push(NameWatcher { id, tx });
    }

    Ok(NameWatch {
        rx,
        handle: NameWatchHandle {
            inner: Arc::new(NameWatchInner {
                id,
                name: name.to_owned(),
                connection: conn.downgrade(),
                cancelled: AtomicBool::new(false),
            }),
        },
    })
}

/// A subscription to the ownership of a well-known bus name.
///
/// Yields the owning unique name after each change; an empty string means
/// the name is unowned.
pub struct NameWatch {
    rx: mpsc::Receiver<String>,
    handle: NameWatchHandle,
}

impl NameWatch {
    /// Receive the next owner.
    ///
    /// Returns `None` once the watch has been cancelled or the connection
    /// has been torn down.
    pub async fn recv(&mut self) -> Option<String> {
        self.rx.recv().await
    }

    /// A cancellation handle detached from the receiving side.
    pub fn handle(&self) -> NameWatchHandle {
        self.handle.clone()
    }

    /// Cancel the watch. Cancelling more than once is not an error.
    pub async fn cancel(&mut self) -> Result<()> {
        self.handle.cancel().await
    }
}

/// A cancellation handle for a [`NameWatch`].
#[derive(Clone)]
pub struct NameWatchHandle {
    inner: Arc<NameWatchInner>,
}

struct NameWatchInner {
    id: u64,
    name: String,
    connection: Weak<ConnectionInner>,
    cancelled: AtomicBool,
}

impl NameWatchHandle {
    /// Cancel the watch.
    ///
    /// When the last watcher of a name cancels, the name's tracking state
    /// is destroyed and its underlying signal watch removed from the bus.
    pub async fn cancel(&self) -> Result<()> {
        if self.inner.cancelled.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let Some(conn) = self.inner.connection.upgrade() else {
            return Ok(());
        };

        let conn = Connection::from_inner(conn);

        let mut infos = conn.inner.name_infos.lock().await;

        let Some(info) = infos.get(&self.inner.name).cloned() else {
            return Ok(());
        };

        let last = {
            let mut state = info.state.lock().unwrap();
            state.watchers.retain(|watcher| watcher.id != self.inner.id);
            state.watchers.is_empty()
        };

        if last {
            infos.remove(&self.inner.name);
            drop(infos);
            info.watch_handle.cancel().await?;
        }

        Ok(())
    }
}

/// Flags for [`Connection::request_name`].
///
/// # Examples
///
/// ```
/// use wirebus::NameFlags;
///
/// let flags = NameFlags::ALLOW_REPLACEMENT | NameFlags::DO_NOT_QUEUE;
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(transparent)]
pub struct NameFlags(u32);

impl NameFlags {
    /// No flags.
    pub const EMPTY: Self = Self(0);
    /// Allow another connection to take the name over.
    pub const ALLOW_REPLACEMENT: Self = Self(1);
    /// Take the name over from its current owner if it allows replacement.
    pub const REPLACE_EXISTING: Self = Self(2);
    /// Fail rather than queue when the name is taken.
    pub const DO_NOT_QUEUE: Self = Self(4);

    pub(crate) fn bits(self) -> u32 {
        self.0
    }
}

impl BitOr for NameFlags {
    type Output = Self;

    #[inline]
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Progress of a name acquisition, delivered on the [`BusName`] channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameEvent {
    /// The name is owned by this connection.
    Acquired,
    /// The name was lost to another connection.
    Lost,
    /// Another connection owns the name; this one is queued behind it.
    InQueue,
    /// Another connection owns the name and this one did not queue.
    Exists,
    /// This connection already owned the name.
    AlreadyOwned,
    /// The daemon answered with an unrecognized reply code.
    Unknown(u32),
}

impl fmt::Display for NameEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NameEvent::Acquired => write!(f, "acquired"),
            NameEvent::Lost => write!(f, "lost"),
            NameEvent::InQueue => write!(f, "in queue"),
            NameEvent::Exists => write!(f, "exists"),
            NameEvent::AlreadyOwned => write!(f, "already owned"),
            NameEvent::Unknown(code) => write!(f, "unknown reply code {code}"),
        }
    }
}

/// A handle for a well-known bus name requested by this connection.
///
/// # Examples
///
/// ```no_run
/// use wirebus::{Connection, NameEvent, NameFlags};
///
/// # #[tokio::main] async fn main() -> wirebus::Result<()> {
/// let conn = Connection::session().await?;
///
/// let mut name = conn.request_name("com.example.Service", NameFlags::EMPTY);
///
/// match name.recv().await {
///     Some(NameEvent::Acquired) => println!("serving"),
///     other => println!("not ours: {other:?}"),
/// }
///
/// name.release().await?;
/// # Ok(()) }
/// ```
pub struct BusName {
    name: String,
    rx: mpsc::Receiver<NameEvent>,
    inner: Arc<BusNameInner>,
}

struct BusNameInner {
    name: String,
    connection: Weak<ConnectionInner>,
    state: Mutex<BusNameState>,
}

#[derive(Default)]
struct BusNameState {
    cancelled: bool,
    needs_release: bool,
    acquired_watch: Option<SignalWatchHandle>,
    lost_watch: Option<SignalWatchHandle>,
}

impl BusName {
    /// The requested name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Receive the next acquisition event.
    ///
    /// The channel closes after [`release`] completes, or when the name
    /// could not be acquired at all.
    ///
    /// [`release`]: Self::release
    pub async fn recv(&mut self) -> Option<NameEvent> {
        self.rx.recv().await
    }

    /// Test if the name still has to be released on the bus.
    pub fn needs_release(&self) -> bool {
        self.inner.state.lock().unwrap().needs_release
    }

    /// Release the name.
    ///
    /// Releasing is idempotent; the daemon is only told to release when
    /// ownership was actually acquired or queued.
    pub async fn release(&self) -> Result<()> {
        let Some(conn) = self.inner.connection.upgrade() else {
            return Ok(());
        };

        self.inner.release(&Connection::from_inner(conn)).await
    }
}

impl BusNameInner {
    async fn release(&self, conn: &Connection) -> Result<()> {
        let (acquired, lost, needs_release) = {
            let mut state = self.state.lock().unwrap();

            if state.cancelled {
                return Ok(());
            }

            state.cancelled = true;

            (
                state.acquired_watch.take(),
                state.lost_watch.take(),
                std::mem::take(&mut state.needs_release),
            )
        };

        if let Some(watch) = acquired {
            watch.cancel().await?;
        }

        if let Some(watch) = lost {
            watch.cancel().await?;
        }

        if needs_release {
            let result = conn.bus().release_name(&self.name).await?;

            if result != RELEASE_NAME_REPLY_RELEASED {
                tracing::warn!(
                    "unexpected result when releasing name {}: {result}",
                    self.name
                );
            }
        }

        Ok(())
    }

    /// Store a watch handle unless the name was released while it was
    /// being set up, in which case the watch is cancelled on the spot.
    fn store_watch(
        &self,
        slot: fn(&mut BusNameState) -> &mut Option<SignalWatchHandle>,
        handle: SignalWatchHandle,
    ) -> Option<SignalWatchHandle> {
        let mut state = self.state.lock().unwrap();

        if state.cancelled {
            return Some(handle);
        }

        *slot(&mut state) = Some(handle);
        None
    }

    fn mark_needs_release(&self) {
        self.state.lock().unwrap().needs_release = true;
    }
}

/// Request ownership of a well-known name; the remainder of the lifecycle
/// is driven asynchronously.
pub(crate) fn request_name(conn: &Connection, name: &str, flags: NameFlags) -> BusName {
    let (tx, rx) = mpsc::channel(NAME_QUEUE);

    let inner = Arc::new(BusNameInner {
        name: name.to_owned(),
        connection: conn.downgrade(),
        state: Mutex::new(BusNameState::default()),
    });

    tokio::spawn(drive_acquisition(conn.clone(), inner.clone(), flags, tx));

    BusName {
        name: name.to_owned(),
        rx,
        inner,
    }
}

async fn drive_acquisition(
    conn: Connection,
    inner: Arc<BusNameInner>,
    flags: NameFlags,
    tx: mpsc::Sender<NameEvent>,
) {
    if inner.state.lock().unwrap().cancelled {
        return;
    }

    let rule = |member: &str| {
        MatchRule::signal()
            .with_sender(BUS_DAEMON_NAME)
            .with_path(BUS_DAEMON_PATH)
            .with_interface(BUS_DAEMON_IFACE)
            .with_member(member)
            .with_arg0(inner.name.as_str())
    };

    let mut lost_watch = match conn.watch_signal(rule("NameLost")).await {
        Ok(watch) => watch,
        Err(e) => {
            tracing::warn!("could not set up NameLost signal watch: {e}");
            let _ = inner.release(&conn).await;
            return;
        }
    };

    if let Some(handle) = inner.store_watch(|state| &mut state.lost_watch, lost_watch.handle()) {
        let _ = handle.cancel().await;
        return;
    }

    {
        let conn = conn.clone();
        let inner = inner.clone();
        let tx = tx.clone();

        tokio::spawn(async move {
            if lost_watch.recv().await.is_some() {
                let _ = tx.send(NameEvent::Lost).await;

                if let Err(e) = inner.release(&conn).await {
                    tracing::warn!("failed to release lost name: {e}");
                }
            }
        });
    }

    let mut acquired_watch = match conn.watch_signal(rule("NameAcquired")).await {
        Ok(watch) => watch,
        Err(e) => {
            tracing::warn!("could not set up NameAcquired signal watch: {e}");
            let _ = inner.release(&conn).await;
            return;
        }
    };

    if let Some(handle) =
        inner.store_watch(|state| &mut state.acquired_watch, acquired_watch.handle())
    {
        let _ = handle.cancel().await;
        return;
    }

    {
        let tx = tx.clone();

        tokio::spawn(async move {
            while acquired_watch.recv().await.is_some() {
                let _ = tx.send(NameEvent::Acquired).await;
            }
        });
    }

    let result = match conn.bus().request_name(&inner.name, flags).await {
        Ok(result) => result,
        Err(e) => {
            tracing::warn!("error requesting bus name {}: {e}", inner.name);
            return;
        }
    };

    match result {
        REQUEST_NAME_REPLY_PRIMARY_OWNER => {
            inner.mark_needs_release();
            let _ = tx.send(NameEvent::Acquired).await;
        }
        REQUEST_NAME_REPLY_IN_QUEUE => {
            inner.mark_needs_release();
            let _ = tx.send(NameEvent::InQueue).await;
        }
        REQUEST_NAME_REPLY_EXISTS => {
            let _ = tx.send(NameEvent::Exists).await;
            let _ = inner.release(&conn).await;
        }
        REQUEST_NAME_REPLY_ALREADY_OWNER => {
            let _ = tx.send(NameEvent::AlreadyOwned).await;
            let _ = inner.release(&conn).await;
        }
        other => {
            let _ = tx.send(NameEvent::Unknown(other)).await;
            let _ = inner.release(&conn).await;
        }
    }
}
