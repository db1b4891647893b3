use std::fmt;

use crate::protocol::MessageType;
use crate::{Message, ObjectPath};

/// A signal filter.
///
/// Matches all messages with equal type, sender, interface, member, path
/// and first argument. Unset fields match anything.
///
/// The `path` field accepts either a concrete object path or a glob of the
/// form `/prefix/*`, which matches every path below the prefix.
///
/// # Examples
///
/// ```
/// use wirebus::MatchRule;
///
/// let rule = MatchRule::signal()
///     .with_interface("org.freedesktop.DBus")
///     .with_member("NameOwnerChanged");
///
/// assert_eq!(
///     rule.serialize(),
///     "type='signal',interface='org.freedesktop.DBus',member='NameOwnerChanged'"
/// );
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchRule {
    /// The message type to match, if any.
    pub message_type: Option<MessageType>,
    /// The sender to match, if any.
    pub sender: Option<String>,
    /// The object path or path glob to match, if any.
    pub path: Option<String>,
    /// The interface to match, if any.
    pub interface: Option<String>,
    /// The member to match, if any.
    pub member: Option<String>,
    /// The first body argument to match, if any.
    pub arg0: Option<String>,
}

impl MatchRule {
    /// Construct a rule matching signals.
    pub fn signal() -> Self {
        Self {
            message_type: Some(MessageType::Signal),
            ..Self::default()
        }
    }

    /// Set the sender to match.
    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = Some(sender.into());
        self
    }

    /// Set the object path to match.
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Set the interface to match.
    pub fn with_interface(mut self, interface: impl Into<String>) -> Self {
        self.interface = Some(interface.into());
        self
    }

    /// Set the member to match.
    pub fn with_member(mut self, member: impl Into<String>) -> Self {
        self.member = Some(member.into());
        self
    }

    /// Set the first argument to match.
    pub fn with_arg0(mut self, arg0: impl Into<String>) -> Self {
        self.arg0 = Some(arg0.into());
        self
    }

    /// Serialize the rule to the wire form installed on the message bus:
    /// `k='v'` pairs joined by commas, omitting unset fields.
    pub fn serialize(&self) -> String {
        let mut parts = Vec::new();

        if let Some(message_type) = self.message_type {
            parts.push(format!("type='{message_type}'"));
        }

        if let Some(sender) = &self.sender {
            parts.push(format!("sender='{sender}'"));
        }

        if let Some(interface) = &self.interface {
            parts.push(format!("interface='{interface}'"));
        }

        if let Some(member) = &self.member {
            parts.push(format!("member='{member}'"));
        }

        if let Some(path) = &self.path {
            parts.push(format!("path='{path}'"));
        }

        if let Some(arg0) = &self.arg0 {
            parts.push(format!("arg0='{arg0}'"));
        }

        parts.join(",")
    }

    /// Test if a message satisfies every set field of the rule.
    ///
    /// A well-known `sender` is compared through `sender_owner`, the unique
    /// name currently owning it, since the bus rewrites the sender of every
    /// message to the sending connection's unique name.
    pub(crate) fn matches(&self, msg: &Message, sender_owner: Option<&str>) -> bool {
        if let Some(message_type) = self.message_type {
            if message_type != msg.message_type() {
                return false;
            }
        }

        if let Some(sender) = &self.sender {
            let msg_sender = msg.sender().unwrap_or("");

            let matched = if sender.starts_with(':') || sender == crate::protocol::BUS_DAEMON_NAME {
                sender == msg_sender
            } else {
                match sender_owner {
                    Some(owner) => owner == msg_sender,
                    // Owner not yet resolved; fall back to the literal
                    // name.
                    None => sender == msg_sender,
                }
            };

            if !matched {
                return false;
            }
        }

        if let Some(path) = &self.path {
            let msg_path = msg.path().map(ObjectPath::as_str).unwrap_or("");

            if !path_matches(path, msg_path) {
                return false;
            }
        }

        if let Some(interface) = &self.interface {
            if Some(interface.as_str()) != msg.interface() {
                return false;
            }
        }

        if let Some(member) = &self.member {
            if Some(member.as_str()) != msg.member() {
                return false;
            }
        }

        if let Some(arg0) = &self.arg0 {
            if msg.arg0_str().as_deref() != Some(arg0.as_str()) {
                return false;
            }
        }

        true
    }
}

impl fmt::Display for MatchRule {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.serialize())
    }
}

/// Test a message path against a rule path, which may be a `/prefix/*`
/// glob.
pub(crate) fn path_matches(pattern: &str, path: &str) -> bool {
    match glob_prefix(pattern) {
        Some(prefix) => path.starts_with(prefix),
        None => pattern == path,
    }
}

/// The prefix of a glob pattern, including the trailing slash. `/foo/*`
/// yields `/foo/` and the catch-all `/*` yields `/`.
pub(crate) fn glob_prefix(pattern: &str) -> Option<&str> {
    pattern
        .strip_suffix('*')
        .filter(|prefix| prefix.ends_with('/'))
}

#[cfg(test)]
mod tests {
    use crate::protocol::MessageType;
    use crate::{Message, MatchRule, ObjectPath};

    #[test]
    fn test_serialize() {
        let rule = MatchRule {
            message_type: Some(MessageType::Signal),
            interface: Some("org.freedesktop.DBus".into()),
            member: Some("Foo".into()),
            path: Some("/bar/foo".into()),
            ..MatchRule::default()
        };

        assert_eq!(
            rule.serialize(),
            "type='signal',interface='org.freedesktop.DBus',member='Foo',path='/bar/foo'"
        );
    }

    #[test]
    fn test_serialize_omits_unset_fields() {
        assert_eq!(MatchRule::default().serialize(), "");
        assert_eq!(MatchRule::signal().serialize(), "type='signal'");
    }

    fn signal(path: &str, interface: &str, member: &str) -> Message {
        Message::signal(ObjectPath::new(path).unwrap(), interface, member).with_sender(":1.7")
    }

    #[test]
    fn test_matches_fields() {
        let msg = signal("/bar/foo", "org.freedesktop.DBus", "Foo");

        assert!(MatchRule::signal().matches(&msg, None));
        assert!(MatchRule::signal()
            .with_interface("org.freedesktop.DBus")
            .with_member("Foo")
            .with_path("/bar/foo")
            .matches(&msg, None));

        assert!(!MatchRule::signal().with_member("Bar").matches(&msg, None));
        assert!(!MatchRule::signal().with_path("/bar").matches(&msg, None));
        assert!(!MatchRule::default()
            .with_interface("org.example")
            .matches(&msg, None));
    }

    #[test]
    fn test_matches_glob_path() {
        let msg = signal("/bar/foo", "org.freedesktop.DBus", "Foo");

        assert!(MatchRule::signal().with_path("/bar/*").matches(&msg, None));
        assert!(MatchRule::signal().with_path("/*").matches(&msg, None));
        assert!(!MatchRule::signal().with_path("/baz/*").matches(&msg, None));
    }

    #[test]
    fn test_matches_unique_sender_directly() {
        let msg = signal("/bar/foo", "org.freedesktop.DBus", "Foo");

        assert!(MatchRule::signal().with_sender(":1.7").matches(&msg, None));
        assert!(!MatchRule::signal().with_sender(":1.8").matches(&msg, None));
    }

    #[test]
    fn test_matches_well_known_sender_through_owner() {
        let msg = signal("/bar/foo", "org.freedesktop.DBus", "Foo");

        let rule = MatchRule::signal().with_sender("com.example.Service");

        assert!(rule.matches(&msg, Some(":1.7")));
        assert!(!rule.matches(&msg, Some(":1.8")));
        // Unresolved owner falls back to the literal name.
        assert!(!rule.matches(&msg, None));
    }

    #[test]
    fn test_matches_arg0() {
        let mut msg = signal("/bar/foo", "org.freedesktop.DBus", "NameOwnerChanged");
        msg.append("com.example.Service").unwrap();

        assert!(MatchRule::signal()
            .with_arg0("com.example.Service")
            .matches(&msg, None));
        assert!(!MatchRule::signal()
            .with_arg0("com.example.Other")
            .matches(&msg, None));
    }

    #[test]
    fn test_matches_message_type() {
        let call = Message::method_call(ObjectPath::new("/bar").unwrap(), "Foo");
        assert!(!MatchRule::signal().matches(&call, None));
    }
}
