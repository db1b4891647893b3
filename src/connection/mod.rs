pub use self::connection::{Connection, MessageFilter};
pub(crate) use self::connection::ConnectionInner;
mod connection;
