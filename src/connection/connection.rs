use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::time::Duration;

use rand::RngCore;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};

use crate::bus_proxy::{BusProxy, ObjectProxy};
use crate::error::{Error, ErrorKind, Result};
use crate::names::{self, BusName, NameFlags, NameWatch};
use crate::protocol::{
    Flags, MessageType, BUS_DAEMON_NAME, ERR_UNKNOWN_OBJECT, PEER_IFACE,
};
use crate::sasl;
use crate::transport::{self, Address, StreamReadHalf, StreamWriteHalf};
use crate::utils::hex_encode;
use crate::watch::{SignalWatch, SignalWatchHandle, SignalWatchSet, WatchEntry, SIGNAL_QUEUE};
use crate::{MatchRule, Message, ObjectPath};

type FilterFn = dyn Fn(Message) -> Option<Message> + Send + Sync;

/// A connection to a message bus.
///
/// The connection owns the socket and multiplexes it: method calls from any
/// number of tasks, signal subscriptions, and incoming method calls routed
/// to registered object paths all share the one duplex stream.
///
/// `Connection` is a cheap handle: clones refer to the same underlying
/// connection.
///
/// # Examples
///
/// ```no_run
/// use wirebus::Connection;
///
/// # #[tokio::main] async fn main() -> wirebus::Result<()> {
/// let conn = Connection::session().await?;
/// println!("unique name: {:?}", conn.unique_name());
/// # Ok(()) }
/// ```
#[derive(Clone)]
pub struct Connection {
    pub(crate) inner: Arc<ConnectionInner>,
}

pub(crate) struct ConnectionInner {
    unique_name: OnceLock<String>,
    writer: tokio::sync::Mutex<StreamWriteHalf>,
    serial: AtomicU32,
    next_watch_id: AtomicU64,
    pub(crate) handlers: Mutex<Handlers>,
    pub(crate) name_infos: tokio::sync::Mutex<HashMap<String, Arc<names::NameInfo>>>,
}

/// Shared dispatch state. The mutex is held only briefly, never across I/O.
pub(crate) struct Handlers {
    closed: bool,
    replies: HashMap<u32, oneshot::Sender<Message>>,
    paths: HashMap<ObjectPath, mpsc::Sender<Message>>,
    signals: SignalWatchSet,
    filters: Vec<(u64, Arc<FilterFn>)>,
}

impl Connection {
    /// Connect to the session bus.
    ///
    /// The address is taken from the `DBUS_SESSION_BUS_ADDRESS` environment
    /// variable.
    pub async fn session() -> Result<Self> {
        Self::connect(&transport::session_bus_address()?).await
    }

    /// Connect to the system bus.
    ///
    /// The address is taken from the `DBUS_SYSTEM_BUS_ADDRESS` environment
    /// variable, with a fallback to the well-known default address.
    pub async fn system() -> Result<Self> {
        Self::connect(&transport::system_bus_address()).await
    }

    /// Connect to the bus at the given address.
    ///
    /// This dials the transport, authenticates, spawns the receive task and
    /// performs the `Hello` exchange which assigns the connection its
    /// unique name.
    pub async fn connect(address: &str) -> Result<Self> {
        let address = Address::parse(address)?;
        let mut stream = address.connect().await?;

        // A single zero byte announces a D-Bus stream before the
        // authentication handshake starts.
        stream.write_all(b"\0").await?;
        sasl::authenticate(&mut stream, sasl::default_mechanisms()).await?;

        let (read_half, write_half) = stream.into_split();

        let conn = Self {
            inner: Arc::new(ConnectionInner {
                unique_name: OnceLock::new(),
                writer: tokio::sync::Mutex::new(write_half),
                serial: AtomicU32::new(0),
                next_watch_id: AtomicU64::new(0),
                handlers: Mutex::new(Handlers {
                    closed: false,
                    replies: HashMap::new(),
                    paths: HashMap::new(),
                    signals: SignalWatchSet::new(),
                    filters: Vec::new(),
                }),
                name_infos: tokio::sync::Mutex::new(HashMap::new()),
            }),
        };

        tokio::spawn(receive_loop(conn.clone(), read_half));

        match conn.bus().hello().await {
            Ok(unique_name) => {
                let _ = conn.inner.unique_name.set(unique_name);
                Ok(conn)
            }
            Err(e) => {
                let _ = conn.close().await;
                Err(e)
            }
        }
    }

    pub(crate) fn from_inner(inner: Arc<ConnectionInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn downgrade(&self) -> Weak<ConnectionInner> {
        Arc::downgrade(&self.inner)
    }

    /// The unique name assigned to this connection by the bus.
    pub fn unique_name(&self) -> Option<&str> {
        self.inner.unique_name.get().map(String::as_str)
    }

    /// A proxy for the object at `path` of the connection owning
    /// `destination`.
    pub fn object(&self, destination: impl Into<String>, path: ObjectPath) -> ObjectProxy {
        ObjectProxy::new(self.clone(), destination.into(), path)
    }

    /// A typed proxy for the message bus daemon itself.
    pub fn bus(&self) -> BusProxy {
        BusProxy::new(self.clone())
    }

    /// Test if the connection has been closed.
    pub fn is_closed(&self) -> bool {
        self.inner.handlers.lock().unwrap().closed
    }

    /// Serials are allocated atomically, independent of any lock; zero is
    /// reserved.
    fn next_serial(&self) -> u32 {
        loop {
            let serial = self.inner.serial.fetch_add(1, Ordering::Relaxed).wrapping_add(1);

            if serial != 0 {
                return serial;
            }
        }
    }

    pub(crate) fn next_watch_id(&self) -> u64 {
        self.inner.next_watch_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Send a message without waiting for a reply.
    ///
    /// Used for signals, method returns, and method calls carrying
    /// [`Flags::NO_REPLY_EXPECTED`]. The connection assigns the serial.
    pub async fn send(&self, mut msg: Message) -> Result<()> {
        if self.is_closed() {
            return Err(Error::new(ErrorKind::ConnectionClosed));
        }

        msg.set_serial(self.next_serial());
        self.write_message(&msg).await
    }

    /// Send a method call and wait for its reply.
    ///
    /// The caller is blocked until the reply arrives or the connection is
    /// torn down. An `error` reply surfaces as a remote error.
    ///
    /// # Panics
    ///
    /// Panics if the message is not a method call; only method calls have
    /// replies.
    pub async fn call(&self, msg: Message) -> Result<Message> {
        let (_, rx) = self.start_call(msg).await?;

        match rx.await {
            Ok(reply) => check_reply(reply),
            Err(..) => Err(Error::new(ErrorKind::ConnectionClosed)),
        }
    }

    /// Send a method call and wait for its reply, giving up after
    /// `timeout`.
    ///
    /// On timeout the reply slot is reaped immediately; a late reply is
    /// dropped silently when it eventually arrives.
    pub async fn call_with_timeout(&self, msg: Message, timeout: Duration) -> Result<Message> {
        let (serial, rx) = self.start_call(msg).await?;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => check_reply(reply),
            Ok(Err(..)) => Err(Error::new(ErrorKind::ConnectionClosed)),
            Err(..) => {
                self.inner.handlers.lock().unwrap().replies.remove(&serial);
                Err(Error::new(ErrorKind::MethodReplyTimeout))
            }
        }
    }

    /// Assign a serial, register a reply slot and write the call.
    async fn start_call(&self, mut msg: Message) -> Result<(u32, oneshot::Receiver<Message>)> {
        assert_eq!(
            msg.message_type(),
            MessageType::MethodCall,
            "only method calls have replies"
        );

        let serial = self.next_serial();
        msg.set_serial(serial);

        let (tx, rx) = oneshot::channel();

        {
            let mut handlers = self.inner.handlers.lock().unwrap();

            if handlers.closed {
                return Err(Error::new(ErrorKind::ConnectionClosed));
            }

            handlers.replies.insert(serial, tx);
        }

        if let Err(e) = self.write_message(&msg).await {
            self.inner.handlers.lock().unwrap().replies.remove(&serial);
            return Err(e);
        }

        Ok((serial, rx))
    }

    /// Write one frame. The writer lock is held for the whole frame, so
    /// frames from concurrent callers never interleave.
    async fn write_message(&self, msg: &Message) -> Result<()> {
        let bytes = msg.to_bytes()?;
        let mut writer = self.inner.writer.lock().await;
        writer.write_all(&bytes).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Declare that incoming method calls for `path` are delivered to the
    /// returned channel.
    ///
    /// Exactly one handler may be registered per path.
    pub fn register_path(&self, path: ObjectPath) -> Result<mpsc::Receiver<Message>> {
        let (tx, rx) = mpsc::channel(SIGNAL_QUEUE);

        let mut handlers = self.inner.handlers.lock().unwrap();

        if handlers.closed {
            return Err(Error::new(ErrorKind::ConnectionClosed));
        }

        if handlers.paths.contains_key(&path) {
            return Err(Error::new(ErrorKind::DuplicateHandler(path)));
        }

        handlers.paths.insert(path, tx);
        Ok(rx)
    }

    /// Remove the handler for `path`.
    pub fn unregister_path(&self, path: &ObjectPath) -> Result<()> {
        match self.inner.handlers.lock().unwrap().paths.remove(path) {
            Some(..) => Ok(()),
            None => Err(Error::new(ErrorKind::AlreadyCancelled)),
        }
    }

    /// Prepend a filter which receives every inbound message before
    /// dispatch.
    ///
    /// A filter may pass the message on, replace it, or drop it by
    /// returning `None`, which stops further processing. Filters must not
    /// block: they run on the receive task.
    pub fn register_message_filter<F>(&self, filter: F) -> MessageFilter
    where
        F: Fn(Message) -> Option<Message> + Send + Sync + 'static,
    {
        let id = self.next_watch_id();

        self.inner
            .handlers
            .lock()
            .unwrap()
            .filters
            .insert(0, (id, Arc::new(filter)));

        MessageFilter {
            id,
            connection: self.downgrade(),
        }
    }

    /// Subscribe to signals matching `rule`.
    ///
    /// When the rule names a well-known sender other than the bus daemon, a
    /// name watch is opened alongside the match so that the rule keeps
    /// tracking the name's current owner. For a unique-name sender, the
    /// watch cancels itself when that name vanishes from the bus.
    pub fn watch_signal(
        &self,
        rule: MatchRule,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<SignalWatch>> + Send + '_>>
    {
        Box::pin(async move {
            if rule.message_type != Some(MessageType::Signal) {
                return Err(Error::new(ErrorKind::RuleNotForSignals));
            }

            let id = self.next_watch_id();
            let rule_string = rule.serialize();
            let handle = SignalWatchHandle::new(id, rule_string.clone(), self.downgrade());
            let sender_owner = Arc::new(Mutex::new(None));

            if let Some(sender) = rule.sender.clone() {
                if sender != BUS_DAEMON_NAME {
                    let mut name_watch = self.watch_name(&sender).await?;
                    handle.set_name_watch(name_watch.handle());

                    if sender.starts_with(':') {
                        // A unique name never reappears; the watch is dead the
                        // moment its sender is.
                        let watch_handle = handle.clone();

                        tokio::spawn(async move {
                            while let Some(owner) = name_watch.recv().await {
                                if owner.is_empty() {
                                    if let Err(e) = watch_handle.cancel().await {
                                        tracing::warn!(
                                            "failed to cancel watch for vanished sender: {e}"
                                        );
                                    }

                                    break;
                                }
                            }
                        });
                    } else {
                        let sender_owner = sender_owner.clone();

                        tokio::spawn(async move {
                            while let Some(owner) = name_watch.recv().await {
                                *sender_owner.lock().unwrap() = Some(owner);
                            }
                        });
                    }
                }
            }

            let (tx, rx) = mpsc::channel(SIGNAL_QUEUE);

            let entry = Arc::new(WatchEntry {
                id,
                rule: rule.clone(),
                sender_owner,
                tx,
            });

            let closed = {
                let mut handlers = self.inner.handlers.lock().unwrap();

                if handlers.closed {
                    true
                } else {
                    handlers.signals.add(entry);
                    false
                }
            };

            if closed {
                let _ = handle.cancel().await;
                return Err(Error::new(ErrorKind::ConnectionClosed));
            }

            match self.bus().add_match(&rule_string).await {
                Ok(()) => Ok(SignalWatch::new(rule, rx, handle)),
                Err(e) => {
                    self.remove_signal_watch(id);

                    if let Err(e) = handle.cancel().await {
                        tracing::warn!("failed to cancel partially registered watch: {e}");
                    }

                    Err(e)
                }
            }
        })
    }

    /// Watch the ownership of a well-known bus name.
    ///
    /// The returned watch yields the current owner once resolved, then
    /// every subsequent owner; an empty string means the name is unowned.
    pub async fn watch_name(&self, name: &str) -> Result<NameWatch> {
        names::watch_name(self, name).await
    }

    /// Request ownership of a well-known bus name.
    ///
    /// The request proceeds asynchronously; progress is reported on the
    /// returned [`BusName`]'s event channel.
    pub fn request_name(&self, name: &str, flags: NameFlags) -> BusName {
        names::request_name(self, name, flags)
    }

    pub(crate) fn remove_signal_watch(&self, id: u64) -> bool {
        self.inner
            .handlers
            .lock()
            .unwrap()
            .signals
            .remove(id)
            .is_some()
    }

    /// Close the connection.
    ///
    /// All pending method calls fail with a closed-connection error, and
    /// every watch and handler channel is closed.
    pub async fn close(&self) -> Result<()> {
        self.inner.teardown();

        let mut writer = self.inner.writer.lock().await;
        writer.shutdown().await?;
        Ok(())
    }
}

impl ConnectionInner {
    /// Tear down dispatch state. Dropping the reply senders fails every
    /// outstanding call; dropping handler and watch senders closes their
    /// channels.
    fn teardown(&self) {
        let mut handlers = self.handlers.lock().unwrap();

        if handlers.closed {
            return;
        }

        handlers.closed = true;
        handlers.replies.clear();
        handlers.paths.clear();
        handlers.signals.clear();
        handlers.filters.clear();
    }
}

fn check_reply(reply: Message) -> Result<Message> {
    if reply.message_type() == MessageType::Error {
        return Err(reply.as_remote_error());
    }

    Ok(reply)
}

/// A registered message filter. Unregister it to stop receiving messages.
pub struct MessageFilter {
    id: u64,
    connection: Weak<ConnectionInner>,
}

impl MessageFilter {
    /// Remove the filter from the connection.
    pub fn unregister(self) -> Result<()> {
        let Some(inner) = self.connection.upgrade() else {
            return Ok(());
        };

        let mut handlers = inner.handlers.lock().unwrap();
        let before = handlers.filters.len();
        handlers.filters.retain(|(id, _)| *id != self.id);

        if handlers.filters.len() == before {
            return Err(Error::new(ErrorKind::AlreadyCancelled));
        }

        Ok(())
    }
}

/// The receive task: the only reader of the socket. Messages are processed
/// to completion, one at a time, so inbound order is preserved through the
/// filter chain and dispatch.
async fn receive_loop(conn: Connection, mut reader: StreamReadHalf) {
    loop {
        match Message::read_from(&mut reader).await {
            Ok(msg) => {
                if let Err(e) = dispatch(&conn, msg).await {
                    tracing::warn!("error dispatching message: {e}");
                    break;
                }
            }
            Err(e) => {
                if !e.is_unexpected_eof() && !conn.is_closed() {
                    tracing::warn!("failed to read message: {e}");
                }

                break;
            }
        }
    }

    conn.inner.teardown();
}

async fn dispatch(conn: &Connection, msg: Message) -> Result<()> {
    // Run the message through the registered filters, stopping if a filter
    // drops it. The filter list is copied out so no lock is held while
    // user code runs.
    let filters: Vec<Arc<FilterFn>> = {
        let handlers = conn.inner.handlers.lock().unwrap();
        handlers.filters.iter().map(|(_, f)| f.clone()).collect()
    };

    let mut msg = msg;

    for filter in filters {
        match filter(msg) {
            Some(next) => msg = next,
            None => return Ok(()),
        }
    }

    match msg.message_type() {
        MessageType::MethodCall => dispatch_method_call(conn, msg).await,
        MessageType::MethodReturn | MessageType::Error => {
            let slot = match msg.reply_serial() {
                Some(serial) => conn.inner.handlers.lock().unwrap().replies.remove(&serial),
                None => None,
            };

            // A missing slot is a late reply whose caller gave up; it is
            // dropped silently.
            if let Some(tx) = slot {
                let _ = tx.send(msg);
            }

            Ok(())
        }
        MessageType::Signal => {
            let matches = {
                let handlers = conn.inner.handlers.lock().unwrap();
                handlers.signals.find_matches(&msg)
            };

            for watch in matches {
                match watch.tx.try_send(msg.clone()) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(..)) => {
                        tracing::warn!(
                            member = msg.member().unwrap_or(""),
                            "dropping signal for watch with a full queue"
                        );
                    }
                    Err(mpsc::error::TrySendError::Closed(..)) => {}
                }
            }

            Ok(())
        }
    }
}

async fn dispatch_method_call(conn: &Connection, msg: Message) -> Result<()> {
    if msg.interface() == Some(PEER_IFACE) {
        match msg.member() {
            Some("Ping") => {
                return conn.send(msg.method_return()).await;
            }
            Some("GetMachineId") => {
                let mut reply = msg.method_return();
                reply.append(machine_id())?;
                return conn.send(reply).await;
            }
            _ => {}
        }
    }

    let handler = match msg.path() {
        Some(path) => conn.inner.handlers.lock().unwrap().paths.get(path).cloned(),
        None => None,
    };

    match handler {
        Some(tx) => {
            if tx.send(msg).await.is_err() {
                tracing::warn!("object path handler dropped without unregistering");
            }

            Ok(())
        }
        None => {
            if msg.flags().contains(Flags::NO_REPLY_EXPECTED) {
                return Ok(());
            }

            let text = match msg.path() {
                Some(path) => format!("Unknown object path {path}"),
                None => "Missing object path".to_owned(),
            };

            let reply = msg.error_reply(ERR_UNKNOWN_OBJECT, &text)?;
            conn.send(reply).await
        }
    }
}

/// The machine identifier reported by `GetMachineId`.
///
/// Falls back to a stable per-process synthesized id when the platform's
/// machine-id files are unreadable.
fn machine_id() -> &'static str {
    static MACHINE_ID: OnceLock<String> = OnceLock::new();

    MACHINE_ID.get_or_init(|| {
        for path in ["/etc/machine-id", "/var/lib/dbus/machine-id"] {
            if let Ok(contents) = std::fs::read_to_string(path) {
                let id = contents.trim();

                if !id.is_empty() {
                    return id.to_owned();
                }
            }
        }

        tracing::warn!("no readable machine-id file, synthesizing a per-process id");

        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        String::from_utf8(hex_encode(&bytes)).expect("hex is ascii")
    })
}
