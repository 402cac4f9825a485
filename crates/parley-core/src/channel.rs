//! Pub/sub channel naming.
//!
//! Group events travel on `group:<id>`, user-addressed events on
//! `private:<userId>`. Every instance subscribes to both namespaces.

use std::fmt;

use crate::ids::{GroupId, UserId};

const GROUP_PREFIX: &str = "group:";
const PRIVATE_PREFIX: &str = "private:";

/// Pattern matching every group channel.
pub const GROUP_PATTERN: &str = "group:*";
/// Pattern matching every user-addressed channel.
pub const PRIVATE_PATTERN: &str = "private:*";
/// Patterns the bridge subscribes to at startup.
pub const SUBSCRIPTION_PATTERNS: [&str; 2] = [GROUP_PATTERN, PRIVATE_PATTERN];

/// A parsed channel name.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Events for every member of a group.
    Group(GroupId),
    /// Events for every connection of one user.
    Private(UserId),
}

impl Channel {
    /// Parse a channel name. Returns `None` for unknown prefixes, an empty
    /// user, or a group id that is non-numeric or zero.
    pub fn parse(name: &str) -> Option<Self> {
        if let Some(rest) = name.strip_prefix(GROUP_PREFIX) {
            let id: u64 = rest.parse().ok()?;
            return (id != 0).then(|| Self::Group(GroupId::new(id)));
        }
        if let Some(rest) = name.strip_prefix(PRIVATE_PREFIX) {
            return (!rest.is_empty()).then(|| Self::Private(UserId::from(rest)));
        }
        None
    }

    /// Channel name for a group.
    pub fn group(id: GroupId) -> String {
        format!("{GROUP_PREFIX}{id}")
    }

    /// Channel name for a user.
    pub fn private(user: &UserId) -> String {
        format!("{PRIVATE_PREFIX}{user}")
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Group(id) => write!(f, "{GROUP_PREFIX}{id}"),
            Self::Private(user) => write!(f, "{PRIVATE_PREFIX}{user}"),
        }
    }
}

/// Glob match with a single trailing `*` (the only form the bridge uses).
pub fn pattern_matches(pattern: &str, channel: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => channel.starts_with(prefix),
        None => pattern == channel,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_group() {
        assert_eq!(Channel::parse("group:42"), Some(Channel::Group(GroupId::new(42))));
    }

    #[test]
    fn parse_private() {
        assert_eq!(
            Channel::parse("private:abc123"),
            Some(Channel::Private(UserId::from("abc123")))
        );
    }

    #[test]
    fn parse_rejects_malformed() {
        assert_eq!(Channel::parse("group:"), None);
        assert_eq!(Channel::parse("group:0"), None);
        assert_eq!(Channel::parse("group:abc"), None);
        assert_eq!(Channel::parse("private:"), None);
        assert_eq!(Channel::parse("presence:1"), None);
        assert_eq!(Channel::parse(""), None);
    }

    #[test]
    fn names_round_trip_through_display() {
        let g = Channel::group(GroupId::new(7));
        assert_eq!(g, "group:7");
        assert_eq!(Channel::parse(&g).unwrap().to_string(), g);

        let p = Channel::private(&UserId::from("bob"));
        assert_eq!(p, "private:bob");
        assert_eq!(Channel::parse(&p).unwrap().to_string(), p);
    }

    #[test]
    fn trailing_glob() {
        assert!(pattern_matches("group:*", "group:1"));
        assert!(!pattern_matches("group:*", "private:1"));
        assert!(pattern_matches("private:bob", "private:bob"));
        assert!(!pattern_matches("private:bob", "private:bobby"));
    }
}
