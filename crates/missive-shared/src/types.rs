//! Domain model structs stored as documents in the remote database.
//!
//! Every struct derives `Serialize` and `Deserialize` so it can be written
//! to and read from the document store without a separate mapping layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

// Ids are opaque strings: the backing document store addresses documents by
// free-form path segments, not by a fixed binary format.

/// Identifier of a user profile document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a conversation document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct ConversationId(pub String);

impl ConversationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a message document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Derived identity of a direct conversation: both participant ids joined
/// smallest-first, so `(a, b)` and `(b, a)` produce the same key.
pub fn direct_pair_key(a: &UserId, b: &UserId) -> String {
    if a <= b {
        format!("{}:{}", a, b)
    } else {
        format!("{}:{}", b, a)
    }
}

// ---------------------------------------------------------------------------
// User profile
// ---------------------------------------------------------------------------

/// A user profile document, created on first sign-in and never hard-deleted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserProfile {
    /// Stable user identifier assigned by the auth provider.
    pub uid: UserId,
    /// Display name chosen by the user.
    pub username: String,
    /// Lowercase projection of `username`, maintained on every write.
    /// Prefix search queries this field only.
    pub username_lowercase: String,
    /// Phone number in the form it was registered with.
    pub phone: String,
    /// Download URL of the avatar, if one was uploaded.
    pub profile_picture_url: Option<String>,
    /// Push registration token of the user's current device, if known.
    pub push_token: Option<String>,
    /// Free-text presence status.  `"Online"` and `"Offline"` are
    /// distinguished values; anything else is shown verbatim.
    pub presence_status: String,
    /// Epoch milliseconds of the last disconnect.  Only meaningful while
    /// `presence_status` is not `"Online"`.
    pub last_seen_ms: Option<i64>,
    /// Uids of users this user has added as contacts.
    #[serde(default)]
    pub contacts: Vec<UserId>,
}

impl UserProfile {
    pub fn is_online(&self) -> bool {
        self.presence_status == crate::constants::PRESENCE_ONLINE
    }
}

// ---------------------------------------------------------------------------
// Conversation
// ---------------------------------------------------------------------------

/// A pinned message: a denormalized copy of the message kept on the
/// conversation document.  Either all fields are present or the whole
/// struct is absent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PinnedMessage {
    pub message_id: MessageId,
    pub text: String,
    pub sender_id: UserId,
}

/// A conversation document (direct chat or group).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Conversation {
    /// Unique conversation identifier.
    pub id: ConversationId,
    /// Member uids.  At least two; sorted ascending for direct chats.
    pub participants: Vec<UserId>,
    /// Whether this is a group conversation.
    pub is_group: bool,
    /// Group display name.  Present exactly when `is_group` is true.
    pub group_name: Option<String>,
    /// Sorted-pair key (`"{min}:{max}"`) for direct chats; the field the
    /// dedup lookup queries.  Absent on groups.
    pub pair_key: Option<String>,
    /// Preview text of the most recent message (empty before the first one).
    #[serde(default)]
    pub last_message: String,
    /// Server timestamp of the most recent message.  Monotonically
    /// non-decreasing; `None` before the first message.
    pub last_message_ts: Option<DateTime<Utc>>,
    /// Currently pinned message, if any.
    pub pinned: Option<PinnedMessage>,
}

impl Conversation {
    /// For a direct chat, the participant other than `viewer`.
    ///
    /// Returns `None` for groups and for conversations `viewer` is not a
    /// member of.
    pub fn other_participant(&self, viewer: &UserId) -> Option<&UserId> {
        if self.is_group || !self.participants.contains(viewer) {
            return None;
        }
        self.participants.iter().find(|p| *p != viewer)
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// Delivery status of a message.  Transitions only move forward
/// (`Sent < Delivered < Read`), which the derived `Ord` encodes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "UPPERCASE")]
pub enum MessageStatus {
    Sent,
    Delivered,
    Read,
}

impl MessageStatus {
    /// Whether moving from `self` to `next` is a forward transition.
    pub fn can_advance_to(self, next: MessageStatus) -> bool {
        next > self
    }
}

/// A single chat message.  Belongs to exactly one conversation for its whole
/// lifetime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    /// Unique message identifier, allocated before the write commits.
    pub id: MessageId,
    /// The conversation this message belongs to.
    pub conversation_id: ConversationId,
    /// Uid of the author.
    pub sender_id: UserId,
    /// Message body.
    pub text: String,
    /// Server-assigned commit timestamp.  `None` only before the write
    /// has committed.
    pub timestamp: Option<DateTime<Utc>>,
    /// Current delivery status.
    pub status: MessageStatus,
}

// ---------------------------------------------------------------------------
// Derived views
// ---------------------------------------------------------------------------

/// A conversation joined with the resolved peer profile.  Derived for
/// display; never persisted.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ConversationView {
    pub conversation: Conversation,
    /// The other participant's profile for direct chats; `None` for groups.
    pub peer: Option<UserProfile>,
}

impl ConversationView {
    /// Title line: the group name, or the peer's username for direct chats.
    pub fn title(&self) -> &str {
        if let Some(name) = self.conversation.group_name.as_deref() {
            return name;
        }
        match &self.peer {
            Some(profile) => &profile.username,
            None => "",
        }
    }
}
