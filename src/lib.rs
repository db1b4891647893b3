//! An asynchronous client library for the D-Bus message bus.
//!
//! This crate connects to a bus over a stream socket, performs the SASL
//! authentication handshake, marshals and unmarshals messages in the D-Bus
//! wire format, and multiplexes concurrent method calls and signal
//! subscriptions over a single connection.
//!
//! # Examples
//!
//! ```no_run
//! use wirebus::{Connection, ObjectPath};
//!
//! # #[tokio::main] async fn main() -> wirebus::Result<()> {
//! let conn = Connection::session().await?;
//!
//! let proxy = conn.object(
//!     "org.freedesktop.DBus",
//!     ObjectPath::new("/org/freedesktop/DBus")?,
//! );
//!
//! let reply = proxy
//!     .call("org.freedesktop.DBus", "NameHasOwner", wirebus::args!["org.freedesktop.DBus"])
//!     .await?;
//!
//! let has_owner: bool = reply.args()?;
//! assert!(has_owner);
//! # Ok(()) }
//! ```

#[macro_use]
mod macros;

pub use self::error::{Error, Result};
mod error;

pub mod protocol;

pub use self::signature::{Signature, SignatureError};
mod signature;

pub use self::object_path::{ObjectPath, ObjectPathError};
mod object_path;

pub use self::value::{FromArgs, Value, ValueType, Variant};
mod value;

pub use self::codec::{Decoder, Encoder};
mod codec;

pub use self::message::Message;
mod message;

pub use self::transport::{Address, AddressFamily};
mod transport;

pub mod sasl;

pub use self::match_rule::MatchRule;
mod match_rule;

pub use self::watch::{SignalWatch, SignalWatchHandle};
mod watch;

pub use self::connection::{Connection, MessageFilter};
mod connection;

pub use self::bus_proxy::{BusProxy, Introspectable, ObjectProxy, Properties};
mod bus_proxy;

pub use self::names::{BusName, NameEvent, NameFlags, NameWatch, NameWatchHandle};
mod names;

mod utils;
