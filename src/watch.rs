use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::mpsc;

use crate::connection::{Connection, ConnectionInner};
use crate::error::Result;
use crate::match_rule::{glob_prefix, path_matches};
use crate::names::NameWatchHandle;
use crate::{MatchRule, Message, ObjectPath};

/// How many undelivered signals a watch buffers before the dispatcher
/// starts dropping them.
pub(crate) const SIGNAL_QUEUE: usize = 64;

/// A single registered signal watch.
pub(crate) struct WatchEntry {
    pub(crate) id: u64,
    pub(crate) rule: MatchRule,
    /// The unique name currently owning the rule's well-known sender, kept
    /// current by the paired name watch.
    pub(crate) sender_owner: Arc<Mutex<Option<String>>>,
    pub(crate) tx: mpsc::Sender<Message>,
}

/// The set of live signal watches, indexed for dispatch.
///
/// Watches are bucketed by `(path, interface, member)` where an unset rule
/// field files under the empty string. Rule paths of the form `/prefix/*`
/// file under the glob itself; an incoming signal consults at most one
/// glob bucket: the one with the longest matching prefix.
pub(crate) struct SignalWatchSet {
    entries: HashMap<u64, Arc<WatchEntry>>,
    by_path: HashMap<String, HashMap<String, HashMap<String, Vec<u64>>>>,
    globs: HashMap<String, usize>,
}

impl SignalWatchSet {
    pub(crate) fn new() -> Self {
        Self {
            entries: HashMap::new(),
            by_path: HashMap::new(),
            globs: HashMap::new(),
        }
    }

    fn keys(rule: &MatchRule) -> (String, String, String) {
        (
            rule.path.clone().unwrap_or_default(),
            rule.interface.clone().unwrap_or_default(),
            rule.member.clone().unwrap_or_default(),
        )
    }

    pub(crate) fn add(&mut self, entry: Arc<WatchEntry>) {
        let (path, interface, member) = Self::keys(&entry.rule);

        if glob_prefix(&path).is_some() {
            *self.globs.entry(path.clone()).or_insert(0) += 1;
        }

        self.by_path
            .entry(path)
            .or_default()
            .entry(interface)
            .or_default()
            .entry(member)
            .or_default()
            .push(entry.id);

        self.entries.insert(entry.id, entry);
    }

    pub(crate) fn remove(&mut self, id: u64) -> Option<Arc<WatchEntry>> {
        let entry = self.entries.remove(&id)?;
        let (path, interface, member) = Self::keys(&entry.rule);

        if glob_prefix(&path).is_some() {
            if let Some(count) = self.globs.get_mut(&path) {
                *count -= 1;

                if *count == 0 {
                    self.globs.remove(&path);
                }
            }
        }

        if let Some(by_interface) = self.by_path.get_mut(&path) {
            if let Some(by_member) = by_interface.get_mut(&interface) {
                if let Some(watches) = by_member.get_mut(&member) {
                    watches.retain(|&other| other != id);
                }
            }
        }

        Some(entry)
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
        self.by_path.clear();
        self.globs.clear();
    }

    /// Find every watch whose rule matches the message.
    ///
    /// The index is a superset filter: candidate buckets are narrowed by
    /// [`MatchRule::matches`] before a watch is returned.
    pub(crate) fn find_matches(&self, msg: &Message) -> Vec<Arc<WatchEntry>> {
        let msg_path = msg.path().map(ObjectPath::as_str).unwrap_or("");

        let mut path_keys: Vec<&str> = vec![""];

        if !msg_path.is_empty() {
            path_keys.push(msg_path);

            // Of all registered glob buckets, only the most specific one
            // receives the signal.
            let best_glob = self
                .globs
                .keys()
                .filter(|glob| path_matches(glob, msg_path))
                .max_by_key(|glob| glob.len());

            if let Some(glob) = best_glob {
                path_keys.push(glob.as_str());
            }
        }

        let mut interface_keys = vec![""];

        if let Some(interface) = msg.interface() {
            if !interface.is_empty() {
                interface_keys.push(interface);
            }
        }

        let mut member_keys = vec![""];

        if let Some(member) = msg.member() {
            if !member.is_empty() {
                member_keys.push(member);
            }
        }

        let mut matches = Vec::new();

        for path_key in path_keys {
            let Some(by_interface) = self.by_path.get(path_key) else {
                continue;
            };

            for &interface_key in &interface_keys {
                let Some(by_member) = by_interface.get(interface_key) else {
                    continue;
                };

                for &member_key in &member_keys {
                    let Some(watches) = by_member.get(member_key) else {
                        continue;
                    };

                    for id in watches {
                        let Some(entry) = self.entries.get(id) else {
                            continue;
                        };

                        let owner = entry.sender_owner.lock().unwrap();

                        if entry.rule.matches(msg, owner.as_deref()) {
                            matches.push(entry.clone());
                        }
                    }
                }
            }
        }

        matches
    }
}

/// A live signal subscription.
///
/// Signals matching the watch rule are buffered on a bounded channel; if
/// the subscriber does not drain it, the dispatcher drops further signals
/// for this watch rather than stalling the connection.
///
/// # Examples
///
/// ```no_run
/// use wirebus::{Connection, MatchRule};
///
/// # #[tokio::main] async fn main() -> wirebus::Result<()> {
/// let conn = Connection::session().await?;
///
/// let mut watch = conn
///     .watch_signal(MatchRule::signal().with_member("NameOwnerChanged"))
///     .await?;
///
/// while let Some(msg) = watch.recv().await {
///     println!("{:?}", msg.body_values()?);
/// }
/// # Ok(()) }
/// ```
pub struct SignalWatch {
    rule: MatchRule,
    rx: mpsc::Receiver<Message>,
    handle: SignalWatchHandle,
}

impl SignalWatch {
    pub(crate) fn new(
        rule: MatchRule,
        rx: mpsc::Receiver<Message>,
        handle: SignalWatchHandle,
    ) -> Self {
        Self { rule, rx, handle }
    }

    /// The rule this watch was registered with.
    pub fn rule(&self) -> &MatchRule {
        &self.rule
    }

    /// Receive the next matching signal.
    ///
    /// Returns `None` once the watch has been cancelled or the connection
    /// has been torn down.
    pub async fn recv(&mut self) -> Option<Message> {
        self.rx.recv().await
    }

    /// A cancellation handle detached from the receiving side.
    pub fn handle(&self) -> SignalWatchHandle {
        self.handle.clone()
    }

    /// Cancel the watch, removing the match from the bus.
    ///
    /// Cancelling more than once is not an error.
    pub async fn cancel(&mut self) -> Result<()> {
        self.handle.cancel().await
    }
}

/// A cancellation handle for a [`SignalWatch`].
#[derive(Clone)]
pub struct SignalWatchHandle {
    inner: Arc<WatchHandleInner>,
}

pub(crate) struct WatchHandleInner {
    id: u64,
    rule_string: String,
    connection: Weak<ConnectionInner>,
    name_watch: Mutex<Option<NameWatchHandle>>,
    cancelled: AtomicBool,
}

impl SignalWatchHandle {
    pub(crate) fn new(id: u64, rule_string: String, connection: Weak<ConnectionInner>) -> Self {
        Self {
            inner: Arc::new(WatchHandleInner {
                id,
                rule_string,
                connection,
                name_watch: Mutex::new(None),
                cancelled: AtomicBool::new(false),
            }),
        }
    }

    pub(crate) fn set_name_watch(&self, watch: NameWatchHandle) {
        *self.inner.name_watch.lock().unwrap() = Some(watch);
    }

    /// Cancel the watch.
    ///
    /// The watch is removed from the dispatch index, `RemoveMatch` is
    /// issued exactly once, any paired name watch is cancelled, and the
    /// delivery channel is closed. Cancelling more than once is not an
    /// error.
    pub fn cancel(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            if self.inner.cancelled.swap(true, Ordering::SeqCst) {
                return Ok(());
            }

            let name_watch = self.inner.name_watch.lock().unwrap().take();

            if let Some(conn) = self.inner.connection.upgrade() {
                let conn = Connection::from_inner(conn);

                if conn.remove_signal_watch(self.inner.id) {
                    match conn.bus().remove_match(&self.inner.rule_string).await {
                        Ok(()) => {}
                        // Teardown already revoked every match this connection
                        // held.
                        Err(e) if e.is_closed() => {}
                        Err(e) => return Err(e),
                    }
                }
            }

            if let Some(watch) = name_watch {
                // The name watch cancel recurses back into signal watch
                // cancellation; this fn is already boxed, breaking the
                // mutually recursive opaque-type cycle.
                watch.cancel().await?;
            }

            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use tokio::sync::mpsc;

    use crate::{MatchRule, Message, ObjectPath};

    use super::{SignalWatchSet, WatchEntry};

    fn entry(id: u64, rule: MatchRule) -> Arc<WatchEntry> {
        // The receiving side is dropped: these tests only exercise the
        // index, never delivery.
        let (tx, _) = mpsc::channel(1);

        Arc::new(WatchEntry {
            id,
            rule,
            sender_owner: Arc::new(Mutex::new(None)),
            tx,
        })
    }

    fn signal(path: &str) -> Message {
        Message::signal(ObjectPath::new(path).unwrap(), "com.example.Iface", "Changed")
    }

    fn matched_ids(set: &SignalWatchSet, msg: &Message) -> Vec<u64> {
        let mut ids: Vec<u64> = set.find_matches(msg).iter().map(|w| w.id).collect();
        ids.sort_unstable();
        ids
    }

    #[test]
    fn test_exact_and_wildcard_buckets() {
        let mut set = SignalWatchSet::new();
        set.add(entry(1, MatchRule::signal()));
        set.add(entry(2, MatchRule::signal().with_path("/foo")));
        set.add(entry(3, MatchRule::signal().with_member("Changed")));
        set.add(entry(4, MatchRule::signal().with_member("Other")));

        assert_eq!(matched_ids(&set, &signal("/foo")), vec![1, 2, 3]);
        assert_eq!(matched_ids(&set, &signal("/bar")), vec![1, 3]);
    }

    #[test]
    fn test_glob_dispatch() {
        let mut set = SignalWatchSet::new();
        set.add(entry(1, MatchRule::signal().with_path("/*")));
        set.add(entry(2, MatchRule::signal().with_path("/foo")));
        set.add(entry(3, MatchRule::signal().with_path("/foo/*")));
        set.add(entry(4, MatchRule::signal().with_path("/foo/bar/*")));

        // The most specific glob wins.
        assert_eq!(matched_ids(&set, &signal("/foo/fie")), vec![3]);
        assert_eq!(matched_ids(&set, &signal("/foo/bar/x")), vec![4]);
        assert_eq!(matched_ids(&set, &signal("/stuff")), vec![1]);

        set.remove(1);
        set.remove(2);

        assert_eq!(matched_ids(&set, &signal("/foo/fie")), vec![3]);
    }

    #[test]
    fn test_remove() {
        let mut set = SignalWatchSet::new();
        set.add(entry(1, MatchRule::signal().with_path("/foo")));
        set.add(entry(2, MatchRule::signal().with_path("/foo")));

        assert_eq!(matched_ids(&set, &signal("/foo")), vec![1, 2]);

        assert!(set.remove(1).is_some());
        assert_eq!(matched_ids(&set, &signal("/foo")), vec![2]);

        assert!(set.remove(1).is_none());
    }

    #[test]
    fn test_sender_owner_substitution() {
        let mut set = SignalWatchSet::new();

        let watch = entry(1, MatchRule::signal().with_sender("com.example.Service"));
        let owner = watch.sender_owner.clone();
        set.add(watch);

        let msg = signal("/foo").with_sender(":1.7");
        assert!(matched_ids(&set, &msg).is_empty());

        *owner.lock().unwrap() = Some(":1.7".into());
        assert_eq!(matched_ids(&set, &msg), vec![1]);
    }
}
