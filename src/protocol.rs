//! Low level details for the D-Bus protocol implementation.

use std::fmt;
use std::ops::BitOr;

/// The bus name of the message bus daemon itself.
pub const BUS_DAEMON_NAME: &str = "org.freedesktop.DBus";
/// The object path of the message bus daemon itself.
pub const BUS_DAEMON_PATH: &str = "/org/freedesktop/DBus";
/// The interface implemented by the message bus daemon.
pub const BUS_DAEMON_IFACE: &str = "org.freedesktop.DBus";

/// The peer interface every connection is expected to implement.
pub const PEER_IFACE: &str = "org.freedesktop.DBus.Peer";

/// Error name reported when a well-known name has no current owner.
pub const ERR_NAME_HAS_NO_OWNER: &str = "org.freedesktop.DBus.Error.NameHasNoOwner";
/// Error name reported when a method call addresses an unknown object path.
pub const ERR_UNKNOWN_OBJECT: &str = "org.freedesktop.DBus.Error.UnknownObject";

/// The protocol version spoken by this implementation.
pub const PROTOCOL_VERSION: u8 = 1;

pub(crate) const MAX_ARRAY_LENGTH: u32 = 1 << 26;
pub(crate) const MAX_BODY_LENGTH: u32 = 1 << 27;

/// Header field codes of the message header field array.
pub(crate) mod fields {
    pub(crate) const PATH: u8 = 1;
    pub(crate) const INTERFACE: u8 = 2;
    pub(crate) const MEMBER: u8 = 3;
    pub(crate) const ERROR_NAME: u8 = 4;
    pub(crate) const REPLY_SERIAL: u8 = 5;
    pub(crate) const DESTINATION: u8 = 6;
    pub(crate) const SENDER: u8 = 7;
    pub(crate) const SIGNATURE: u8 = 8;
}

/// The endianness of a message frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endianness {
    /// Little endian, marked `l` on the wire.
    Little,
    /// Big endian, marked `B` on the wire.
    Big,
}

impl Endianness {
    /// The native endianness of the current platform.
    pub const NATIVE: Self = if cfg!(target_endian = "big") {
        Self::Big
    } else {
        Self::Little
    };

    pub(crate) fn from_byte(b: u8) -> Option<Self> {
        match b {
            b'l' => Some(Self::Little),
            b'B' => Some(Self::Big),
            _ => None,
        }
    }

    pub(crate) fn to_byte(self) -> u8 {
        match self {
            Self::Little => b'l',
            Self::Big => b'B',
        }
    }
}

/// The type of a [`Message`].
///
/// [`Message`]: crate::Message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    /// A method call.
    MethodCall = 1,
    /// A reply to a method call.
    MethodReturn = 2,
    /// An error reply to a method call.
    Error = 3,
    /// A broadcast signal.
    Signal = 4,
}

impl MessageType {
    pub(crate) fn from_u8(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::MethodCall),
            2 => Some(Self::MethodReturn),
            3 => Some(Self::Error),
            4 => Some(Self::Signal),
            _ => None,
        }
    }

    /// The name used in match rule serialization.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MethodCall => "method_call",
            Self::MethodReturn => "method_return",
            Self::Error => "error",
            Self::Signal => "signal",
        }
    }
}

impl fmt::Display for MessageType {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Flags carried in the message header.
///
/// # Examples
///
/// ```
/// use wirebus::protocol::Flags;
///
/// let flags = Flags::NO_REPLY_EXPECTED | Flags::NO_AUTO_START;
/// assert!(flags.contains(Flags::NO_REPLY_EXPECTED));
/// assert!(!Flags::EMPTY.contains(Flags::NO_AUTO_START));
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct Flags(u8);

impl Flags {
    /// An empty set of flags.
    pub const EMPTY: Self = Self(0);
    /// The sender does not expect a method reply.
    pub const NO_REPLY_EXPECTED: Self = Self(1);
    /// The destination should not be auto-started to handle this message.
    pub const NO_AUTO_START: Self = Self(2);

    /// Test if all bits in `other` are set in this set of flags.
    #[inline]
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub(crate) fn bits(self) -> u8 {
        self.0
    }

    pub(crate) fn from_bits(bits: u8) -> Self {
        Self(bits)
    }
}

impl BitOr for Flags {
    type Output = Self;

    #[inline]
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Debug for Flags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut list = f.debug_list();

        if self.contains(Self::NO_REPLY_EXPECTED) {
            list.entry(&"NO_REPLY_EXPECTED");
        }

        if self.contains(Self::NO_AUTO_START) {
            list.entry(&"NO_AUTO_START");
        }

        list.finish()
    }
}
