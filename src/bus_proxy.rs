use std::collections::HashMap;
use std::time::Duration;

use crate::connection::Connection;
use crate::error::Result;
use crate::names::NameFlags;
use crate::protocol::{BUS_DAEMON_IFACE, BUS_DAEMON_NAME, BUS_DAEMON_PATH};
use crate::watch::SignalWatch;
use crate::{MatchRule, Message, ObjectPath, Value, Variant};

/// A proxy for a remote object on the bus.
///
/// Simplifies constructing method calls against one destination and path,
/// and acts as the basis for typed interface stubs.
///
/// # Examples
///
/// ```no_run
/// use wirebus::{Connection, ObjectPath};
///
/// # #[tokio::main] async fn main() -> wirebus::Result<()> {
/// let conn = Connection::session().await?;
///
/// let notifications = conn.object(
///     "org.freedesktop.Notifications",
///     ObjectPath::new("/org/freedesktop/Notifications")?,
/// );
///
/// let reply = notifications
///     .call(
///         "org.freedesktop.Notifications",
///         "Notify",
///         wirebus::args![
///             "wirebus", 0u32, "info", "hello", "body",
///             Vec::<String>::new(),
///             std::collections::HashMap::<String, wirebus::Variant>::new(),
///             2000i32,
///         ],
///     )
///     .await?;
///
/// let id: u32 = reply.args()?;
/// # Ok(()) }
/// ```
#[derive(Clone)]
pub struct ObjectProxy {
    connection: Connection,
    destination: String,
    path: ObjectPath,
}

impl ObjectProxy {
    pub(crate) fn new(connection: Connection, destination: String, path: ObjectPath) -> Self {
        Self {
            connection,
            destination,
            path,
        }
    }

    /// The destination the proxy addresses.
    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// The object path the proxy addresses.
    pub fn path(&self) -> &ObjectPath {
        &self.path
    }

    /// The connection the proxy calls through.
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    fn method_call(&self, interface: &str, member: &str, args: Vec<Value>) -> Result<Message> {
        let mut msg = Message::method_call(self.path.clone(), member)
            .with_destination(self.destination.clone())
            .with_interface(interface);

        msg.append_all(args)?;
        Ok(msg)
    }

    /// Call the given method on the remote object.
    ///
    /// On success the reply message is returned; its arguments can be
    /// unpacked with [`Message::args`]. A D-Bus level error surfaces as a
    /// remote error.
    pub async fn call(&self, interface: &str, member: &str, args: Vec<Value>) -> Result<Message> {
        let msg = self.method_call(interface, member, args)?;
        self.connection.call(msg).await
    }

    /// Like [`call`], giving up after `timeout`.
    ///
    /// [`call`]: Self::call
    pub async fn call_with_timeout(
        &self,
        interface: &str,
        member: &str,
        args: Vec<Value>,
        timeout: Duration,
    ) -> Result<Message> {
        let msg = self.method_call(interface, member, args)?;
        self.connection.call_with_timeout(msg, timeout).await
    }

    /// Subscribe to a signal emitted by this object.
    pub async fn watch_signal(&self, interface: &str, member: &str) -> Result<SignalWatch> {
        self.connection
            .watch_signal(
                MatchRule::signal()
                    .with_sender(self.destination.clone())
                    .with_path(self.path.as_str())
                    .with_interface(interface)
                    .with_member(member),
            )
            .await
    }
}

/// Typed stubs for the methods of the message bus daemon.
///
/// These cover the daemon calls the connection itself relies on, plus the
/// common name and service queries.
#[derive(Clone)]
pub struct BusProxy {
    proxy: ObjectProxy,
}

impl BusProxy {
    pub(crate) fn new(connection: Connection) -> Self {
        Self {
            proxy: ObjectProxy::new(
                connection,
                BUS_DAEMON_NAME.to_owned(),
                ObjectPath::new(BUS_DAEMON_PATH).expect("daemon path is valid"),
            ),
        }
    }

    async fn call<T>(&self, member: &str, args: Vec<Value>) -> Result<T>
    where
        T: crate::FromArgs,
    {
        let reply = self.proxy.call(BUS_DAEMON_IFACE, member, args).await?;
        reply.args()
    }

    /// Register with the bus; returns the connection's unique name.
    ///
    /// The connection performs this itself during connect.
    pub async fn hello(&self) -> Result<String> {
        self.call("Hello", vec![]).await
    }

    /// Install a match rule on the bus.
    pub async fn add_match(&self, rule: &str) -> Result<()> {
        self.call("AddMatch", crate::args![rule]).await
    }

    /// Remove a previously installed match rule.
    pub async fn remove_match(&self, rule: &str) -> Result<()> {
        self.call("RemoveMatch", crate::args![rule]).await
    }

    /// The unique name currently owning the given name.
    ///
    /// Fails with `org.freedesktop.DBus.Error.NameHasNoOwner` when nobody
    /// owns it.
    pub async fn get_name_owner(&self, name: &str) -> Result<String> {
        self.call("GetNameOwner", crate::args![name]).await
    }

    /// Request ownership of a well-known name; returns the daemon's reply
    /// code.
    pub async fn request_name(&self, name: &str, flags: NameFlags) -> Result<u32> {
        self.call("RequestName", crate::args![name, flags.bits()])
            .await
    }

    /// Release ownership of a well-known name; returns the daemon's reply
    /// code.
    pub async fn release_name(&self, name: &str) -> Result<u32> {
        self.call("ReleaseName", crate::args![name]).await
    }

    /// Test if anyone owns the given name.
    pub async fn name_has_owner(&self, name: &str) -> Result<bool> {
        self.call("NameHasOwner", crate::args![name]).await
    }

    /// Every name currently on the bus.
    pub async fn list_names(&self) -> Result<Vec<String>> {
        self.call("ListNames", vec![]).await
    }

    /// Every name the bus can activate a service for.
    pub async fn list_activatable_names(&self) -> Result<Vec<String>> {
        self.call("ListActivatableNames", vec![]).await
    }

    /// The unique names queued for ownership of the given name.
    pub async fn list_queued_owners(&self, name: &str) -> Result<Vec<String>> {
        self.call("ListQueuedOwners", crate::args![name]).await
    }

    /// Launch the service responsible for the given name.
    pub async fn start_service_by_name(&self, name: &str, flags: u32) -> Result<u32> {
        self.call("StartServiceByName", crate::args![name, flags])
            .await
    }

    /// The uid of the connection owning the given name.
    pub async fn get_connection_unix_user(&self, name: &str) -> Result<u32> {
        self.call("GetConnectionUnixUser", crate::args![name]).await
    }

    /// The pid of the connection owning the given name.
    pub async fn get_connection_unix_process_id(&self, name: &str) -> Result<u32> {
        self.call("GetConnectionUnixProcessID", crate::args![name])
            .await
    }

    /// The globally unique id of the bus.
    pub async fn get_id(&self) -> Result<String> {
        self.call("GetId", vec![]).await
    }
}

/// A stub for `org.freedesktop.DBus.Properties`.
pub struct Properties {
    proxy: ObjectProxy,
}

const PROPERTIES_IFACE: &str = "org.freedesktop.DBus.Properties";

impl Properties {
    /// Wrap an object proxy.
    pub fn new(proxy: ObjectProxy) -> Self {
        Self { proxy }
    }

    /// Get a property value.
    pub async fn get(&self, interface: &str, property: &str) -> Result<Value> {
        let reply = self
            .proxy
            .call(PROPERTIES_IFACE, "Get", crate::args![interface, property])
            .await?;

        reply.body().read_value()
    }

    /// Set a property value.
    pub async fn set(&self, interface: &str, property: &str, value: impl Into<Value>) -> Result<()> {
        self.proxy
            .call(
                PROPERTIES_IFACE,
                "Set",
                crate::args![interface, property, Variant::new(value.into())],
            )
            .await?;

        Ok(())
    }

    /// Get every property of an interface.
    pub async fn get_all(&self, interface: &str) -> Result<HashMap<String, Value>> {
        let reply = self
            .proxy
            .call(PROPERTIES_IFACE, "GetAll", crate::args![interface])
            .await?;

        let Value::Dict { entries, .. } = reply.body().read_value()? else {
            return Err(crate::error::Error::new(
                crate::error::ErrorKind::TypeMismatch {
                    expected: "dict",
                    found: "other",
                },
            ));
        };

        let mut out = HashMap::with_capacity(entries.len());

        for (key, value) in entries {
            if let Value::Str(key) = key {
                out.insert(key, value);
            }
        }

        Ok(out)
    }
}

/// A stub for `org.freedesktop.DBus.Introspectable`.
///
/// Yields the raw introspection XML; parsing it is left to the caller.
pub struct Introspectable {
    proxy: ObjectProxy,
}

impl Introspectable {
    /// Wrap an object proxy.
    pub fn new(proxy: ObjectProxy) -> Self {
        Self { proxy }
    }

    /// Fetch the introspection document for the object.
    pub async fn introspect(&self) -> Result<String> {
        let reply = self
            .proxy
            .call("org.freedesktop.DBus.Introspectable", "Introspect", vec![])
            .await?;

        reply.args()
    }
}
