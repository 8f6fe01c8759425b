//! Human-readable identity events.
//!
//! Notices are inserted as system messages into the conversation they are
//! scoped to. The phrasing distinguishes changes the user made on this
//! device, changes synced from another of the user's devices, and the
//! group-conversation copies of both.

use std::fmt;

/// Conversation a notice is inserted into.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NoticeScope {
    /// One-to-one conversation with the peer.
    Direct,
    /// A group conversation the peer is a member of.
    Group {
        /// Group identifier.
        group_id: String,
    },
}

/// Where the change was made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NoticeOrigin {
    /// The user acted on this device.
    Local,
    /// Synced from another of the user's devices, or observed on the wire.
    Remote,
}

/// What happened to the peer's identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdentityChange {
    /// Marked verified.
    MarkedVerified,
    /// Verification cleared.
    MarkedUnverified,
    /// The peer's identity key changed.
    KeyChanged,
}

/// One system message about a peer's identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdentityNotice {
    /// Peer the notice is about.
    pub peer: String,
    /// Conversation to insert it into.
    pub scope: NoticeScope,
    /// Where the change was made.
    pub origin: NoticeOrigin,
    /// What happened.
    pub change: IdentityChange,
}

impl IdentityNotice {
    /// Text shown in the conversation.
    pub fn describe(&self) -> String {
        let peer = &self.peer;
        let suffix = match self.origin {
            NoticeOrigin::Local => "",
            NoticeOrigin::Remote => " from another device",
        };

        match (&self.scope, self.change) {
            (NoticeScope::Direct, IdentityChange::KeyChanged) => {
                format!("Your safety number with {peer} has changed")
            },
            (NoticeScope::Group { .. }, IdentityChange::KeyChanged) => {
                format!("The safety number of group member {peer} has changed")
            },
            (NoticeScope::Direct, IdentityChange::MarkedVerified) => {
                format!("You marked your safety number with {peer} verified{suffix}")
            },
            (NoticeScope::Direct, IdentityChange::MarkedUnverified) => {
                format!("You marked your safety number with {peer} unverified{suffix}")
            },
            (NoticeScope::Group { .. }, IdentityChange::MarkedVerified) => {
                format!("You marked group member {peer} verified{suffix}")
            },
            (NoticeScope::Group { .. }, IdentityChange::MarkedUnverified) => {
                format!("You marked group member {peer} unverified{suffix}")
            },
        }
    }
}

impl fmt::Display for IdentityNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

/// Banner text warning that the listed peers are no longer verified.
///
/// Names one or two peers explicitly and counts the rest. `None` when the
/// list is empty.
pub fn describe_unverified<S: AsRef<str>>(names: &[S]) -> Option<String> {
    match names {
        [] => None,
        [only] => Some(format!("{} is no longer verified", only.as_ref())),
        [first, second] => {
            Some(format!("{} and {} are no longer verified", first.as_ref(), second.as_ref()))
        },
        [first, second, rest @ ..] => {
            let others = if rest.len() == 1 {
                "1 other".to_string()
            } else {
                format!("{} others", rest.len())
            };
            Some(format!(
                "{}, {}, and {others} are no longer verified",
                first.as_ref(),
                second.as_ref()
            ))
        },
    }
}

#[cfg(test)]
mod tests {
    use insta::assert_snapshot;

    use super::*;

    fn direct(origin: NoticeOrigin, change: IdentityChange) -> String {
        IdentityNotice { peer: "Bob".to_string(), scope: NoticeScope::Direct, origin, change }
            .describe()
    }

    fn group(origin: NoticeOrigin, change: IdentityChange) -> String {
        let scope = NoticeScope::Group { group_id: "g1".to_string() };
        IdentityNotice { peer: "Bob".to_string(), scope, origin, change }.describe()
    }

    #[test]
    fn direct_phrasing() {
        assert_snapshot!(
            direct(NoticeOrigin::Local, IdentityChange::MarkedVerified),
            @"You marked your safety number with Bob verified"
        );
        assert_snapshot!(
            direct(NoticeOrigin::Remote, IdentityChange::MarkedVerified),
            @"You marked your safety number with Bob verified from another device"
        );
        assert_snapshot!(
            direct(NoticeOrigin::Local, IdentityChange::MarkedUnverified),
            @"You marked your safety number with Bob unverified"
        );
        assert_snapshot!(
            direct(NoticeOrigin::Remote, IdentityChange::KeyChanged),
            @"Your safety number with Bob has changed"
        );
    }

    #[test]
    fn group_phrasing() {
        assert_snapshot!(
            group(NoticeOrigin::Local, IdentityChange::MarkedVerified),
            @"You marked group member Bob verified"
        );
        assert_snapshot!(
            group(NoticeOrigin::Remote, IdentityChange::MarkedUnverified),
            @"You marked group member Bob unverified from another device"
        );
        assert_snapshot!(
            group(NoticeOrigin::Remote, IdentityChange::KeyChanged),
            @"The safety number of group member Bob has changed"
        );
    }

    #[test]
    fn unverified_banner_pluralizes() {
        let none: [&str; 0] = [];
        assert_eq!(describe_unverified(&none), None);

        assert_snapshot!(
            describe_unverified(&["Bob"]).unwrap_or_default(),
            @"Bob is no longer verified"
        );
        assert_snapshot!(
            describe_unverified(&["Bob", "Carol"]).unwrap_or_default(),
            @"Bob and Carol are no longer verified"
        );
        assert_snapshot!(
            describe_unverified(&["Bob", "Carol", "Dan"]).unwrap_or_default(),
            @"Bob, Carol, and 1 other are no longer verified"
        );
        assert_snapshot!(
            describe_unverified(&["Bob", "Carol", "Dan", "Eve"]).unwrap_or_default(),
            @"Bob, Carol, and 2 others are no longer verified"
        );
    }
}
