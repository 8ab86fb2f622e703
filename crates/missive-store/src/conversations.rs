//! Conversation store: creation, dedup lookup, preview and membership.

use serde_json::json;
use tracing::debug;

use missive_shared::constants::MAX_GROUP_NAME_LEN;
use missive_shared::{
    direct_pair_key, Conversation, ConversationId, MissiveError, PinnedMessage, Result, UserId,
};

use crate::database::{collections, Database, Filter, Query, SortOrder};
use crate::document::Patch;
use crate::live::{DocFeed, QueryFeed};

/// Typed operations over the `conversations` collection.
#[derive(Clone)]
pub struct ConversationStore {
    db: Database,
}

impl ConversationStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Returns the direct conversation between two users, creating it if
    /// none exists yet.
    ///
    /// Identity is the stored sorted-pair key, so `(a, b)` and `(b, a)`
    /// resolve to the same conversation.  Lookup and create are two steps:
    /// two racing first-openers can each create a document, and the loser's
    /// copy stays unreferenced.  A deterministic id derived from the pair
    /// key would close that window.
    pub async fn create_or_get_direct(&self, a: &UserId, b: &UserId) -> Result<ConversationId> {
        if a == b {
            return Err(MissiveError::Validation(
                "cannot open a conversation with yourself".to_string(),
            ));
        }
        let pair_key = direct_pair_key(a, b);
        let q = Query::new()
            .filter(Filter::Eq("pair_key".into(), json!(pair_key)))
            .limit(1);
        let existing = self.db.query(collections::CONVERSATIONS, &q).await;
        if let Some(doc) = existing.into_iter().next() {
            let convo: Conversation = doc.decode()?;
            return Ok(convo.id);
        }

        let id = ConversationId::new(self.db.allocate_id());
        let mut participants = vec![a.clone(), b.clone()];
        participants.sort();
        let convo = Conversation {
            id: id.clone(),
            participants,
            is_group: false,
            group_name: None,
            pair_key: Some(pair_key),
            last_message: String::new(),
            last_message_ts: None,
            pinned: None,
        };
        self.db
            .create(
                collections::CONVERSATIONS,
                id.as_str(),
                Patch::from_model(&convo)?,
            )
            .await?;
        debug!(conversation = %id, "created direct conversation");
        Ok(id)
    }

    /// Creates a group conversation.  The creator is always a member and
    /// duplicate member ids collapse.
    pub async fn create_group(
        &self,
        name: &str,
        members: &[UserId],
        creator: &UserId,
    ) -> Result<ConversationId> {
        let name = name.trim();
        if name.is_empty() {
            return Err(MissiveError::Validation("group name is empty".to_string()));
        }
        if name.chars().count() > MAX_GROUP_NAME_LEN {
            return Err(MissiveError::Validation("group name is too long".to_string()));
        }
        let mut participants: Vec<UserId> = members.to_vec();
        participants.push(creator.clone());
        participants.sort();
        participants.dedup();
        if participants.len() < 2 {
            return Err(MissiveError::Validation(
                "a group needs at least two participants".to_string(),
            ));
        }
        let member_count = participants.len();

        let id = ConversationId::new(self.db.allocate_id());
        let convo = Conversation {
            id: id.clone(),
            participants,
            is_group: true,
            group_name: Some(name.to_string()),
            pair_key: None,
            last_message: String::new(),
            last_message_ts: None,
            pinned: None,
        };
        self.db
            .create(
                collections::CONVERSATIONS,
                id.as_str(),
                Patch::from_model(&convo)?,
            )
            .await?;
        debug!(conversation = %id, members = member_count, "created group conversation");
        Ok(id)
    }

    /// Loads one conversation.
    pub async fn get(&self, id: &ConversationId) -> Result<Conversation> {
        match self.db.get(collections::CONVERSATIONS, id.as_str()).await {
            Some(doc) => doc.decode(),
            None => Err(MissiveError::NotFound(format!("conversation {id}"))),
        }
    }

    /// Live snapshot of one conversation document.
    pub async fn watch(&self, id: &ConversationId) -> DocFeed {
        self.db
            .watch_doc(collections::CONVERSATIONS, id.as_str())
            .await
    }

    /// Live list of the user's conversations, most recently active first.
    /// Conversations without any message yet sort last.
    pub async fn watch_for_user(&self, uid: &UserId) -> QueryFeed {
        let q = Query::new()
            .filter(Filter::ArrayContains("participants".into(), json!(uid)))
            .order_by("last_message_ts", SortOrder::Desc);
        self.db.watch_query(collections::CONVERSATIONS, q).await
    }

    /// Patch fragment rewriting the preview fields.  `MessageStore::append`
    /// applies it in the same batch as the message create.
    pub(crate) fn preview_patch(text: &str) -> Patch {
        Patch::new()
            .set("last_message", json!(text))
            .server_timestamp("last_message_ts")
    }

    /// Rewrites the conversation preview (last-write-wins; the timestamp is
    /// server-assigned and never moves backwards).
    pub async fn update_preview(&self, id: &ConversationId, text: &str) -> Result<()> {
        self.db
            .update(
                collections::CONVERSATIONS,
                id.as_str(),
                Self::preview_patch(text),
            )
            .await
    }

    /// Pins a message, or clears the pin with `None`.  The denormalized
    /// fields travel as one unit; a partially-pinned state cannot exist.
    pub async fn pin(&self, id: &ConversationId, pinned: Option<PinnedMessage>) -> Result<()> {
        let value = serde_json::to_value(&pinned)?;
        self.db
            .update(
                collections::CONVERSATIONS,
                id.as_str(),
                Patch::new().set("pinned", value),
            )
            .await
    }

    /// Adds members to a group.
    pub async fn add_participants(&self, id: &ConversationId, added: &[UserId]) -> Result<()> {
        let convo = self.require_group(id, "add participants to").await?;
        let mut participants = convo.participants;
        for uid in added {
            if !participants.contains(uid) {
                participants.push(uid.clone());
            }
        }
        self.set_participants(id, &participants).await
    }

    /// Removes members from a group.  A group never drops below two
    /// participants.
    pub async fn remove_participants(&self, id: &ConversationId, removed: &[UserId]) -> Result<()> {
        let convo = self.require_group(id, "remove participants from").await?;
        let participants: Vec<UserId> = convo
            .participants
            .into_iter()
            .filter(|p| !removed.contains(p))
            .collect();
        if participants.len() < 2 {
            return Err(MissiveError::Validation(
                "a group keeps at least two participants".to_string(),
            ));
        }
        self.set_participants(id, &participants).await
    }

    /// Renames a group.
    pub async fn rename_group(&self, id: &ConversationId, name: &str) -> Result<()> {
        let name = name.trim();
        if name.is_empty() {
            return Err(MissiveError::Validation("group name is empty".to_string()));
        }
        self.require_group(id, "rename").await?;
        self.db
            .update(
                collections::CONVERSATIONS,
                id.as_str(),
                Patch::new().set("group_name", json!(name)),
            )
            .await
    }

    async fn set_participants(&self, id: &ConversationId, participants: &[UserId]) -> Result<()> {
        self.db
            .update(
                collections::CONVERSATIONS,
                id.as_str(),
                Patch::new().set("participants", serde_json::to_value(participants)?),
            )
            .await
    }

    async fn require_group(&self, id: &ConversationId, what: &str) -> Result<Conversation> {
        let convo = self.get(id).await?;
        if !convo.is_group {
            return Err(MissiveError::InvalidOperation(format!(
                "cannot {what} a direct conversation"
            )));
        }
        Ok(convo)
    }
}
