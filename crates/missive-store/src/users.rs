//! User directory: profiles, presence fields and prefix search.

use serde_json::json;
use tracing::debug;

use missive_shared::constants::{DIRECTORY_SEARCH_LIMIT, PREFIX_RANGE_CEILING, PRESENCE_OFFLINE};
use missive_shared::{MissiveError, Result, UserId, UserProfile};

use crate::database::{collections, Database, Filter, Query, SortOrder};
use crate::document::Patch;
use crate::live::DocFeed;

/// Fields a caller provides when creating or refreshing a profile.
#[derive(Debug, Clone)]
pub struct NewProfile {
    pub uid: UserId,
    pub username: String,
    pub phone: String,
}

/// Typed operations over the `users` collection.
#[derive(Clone)]
pub struct UserDirectory {
    db: Database,
}

impl UserDirectory {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Creates the profile on first sign-in, refreshes the identity fields
    /// afterwards.  `username_lowercase` is re-derived on every write; it is
    /// the only field prefix search consults.
    pub async fn upsert_profile(&self, profile: &NewProfile) -> Result<()> {
        let username = profile.username.trim();
        if username.is_empty() {
            return Err(MissiveError::Validation("username is empty".to_string()));
        }

        let existing = self.db.get(collections::USERS, profile.uid.as_str()).await;
        let patch = if existing.is_some() {
            Patch::new()
                .set("username", json!(username))
                .set("username_lowercase", json!(username.to_lowercase()))
                .set("phone", json!(profile.phone))
        } else {
            let full = UserProfile {
                uid: profile.uid.clone(),
                username: username.to_string(),
                username_lowercase: username.to_lowercase(),
                phone: profile.phone.clone(),
                profile_picture_url: None,
                push_token: None,
                presence_status: PRESENCE_OFFLINE.to_string(),
                last_seen_ms: None,
                contacts: vec![],
            };
            Patch::from_model(&full)?
        };
        self.db
            .merge(collections::USERS, profile.uid.as_str(), patch)
            .await?;
        debug!(uid = %profile.uid, "profile upserted");
        Ok(())
    }

    /// Loads a profile; absence is an error.
    pub async fn get(&self, uid: &UserId) -> Result<UserProfile> {
        match self.find(uid).await? {
            Some(profile) => Ok(profile),
            None => Err(MissiveError::NotFound(format!("user {uid}"))),
        }
    }

    /// Loads a profile; absence is `Ok(None)`.
    pub async fn find(&self, uid: &UserId) -> Result<Option<UserProfile>> {
        match self.db.get(collections::USERS, uid.as_str()).await {
            Some(doc) => Ok(Some(doc.decode()?)),
            None => Ok(None),
        }
    }

    /// Live snapshot of one profile document.
    pub async fn watch(&self, uid: &UserId) -> DocFeed {
        self.db.watch_doc(collections::USERS, uid.as_str()).await
    }

    /// Case-insensitive username prefix search, ordered by username and
    /// capped at [`DIRECTORY_SEARCH_LIMIT`].  A blank prefix matches nobody.
    pub async fn search_prefix(&self, prefix: &str, limit: usize) -> Result<Vec<UserProfile>> {
        let needle = prefix.trim().to_lowercase();
        if needle.is_empty() {
            return Ok(Vec::new());
        }
        let upper = format!("{needle}{PREFIX_RANGE_CEILING}");
        let q = Query::new()
            .filter(Filter::Range {
                field: "username_lowercase".into(),
                start: json!(needle),
                end: json!(upper),
            })
            .order_by("username_lowercase", SortOrder::Asc)
            .limit(limit.min(DIRECTORY_SEARCH_LIMIT));
        self.db
            .query(collections::USERS, &q)
            .await
            .iter()
            .map(|doc| doc.decode())
            .collect()
    }

    /// Writes the presence fields (last-write-wins across devices).
    pub async fn set_presence(
        &self,
        uid: &UserId,
        status: &str,
        last_seen_ms: Option<i64>,
    ) -> Result<()> {
        let patch = Patch::new()
            .set("presence_status", json!(status))
            .set("last_seen_ms", json!(last_seen_ms));
        self.db.update(collections::USERS, uid.as_str(), patch).await
    }

    /// Stores or clears the device push token.
    pub async fn set_push_token(&self, uid: &UserId, token: Option<&str>) -> Result<()> {
        let patch = match token {
            Some(token) => Patch::new().set("push_token", json!(token)),
            None => Patch::new().delete("push_token"),
        };
        self.db.update(collections::USERS, uid.as_str(), patch).await
    }

    /// Stores the avatar download URL.
    pub async fn set_profile_picture(&self, uid: &UserId, url: &str) -> Result<()> {
        self.db
            .update(
                collections::USERS,
                uid.as_str(),
                Patch::new().set("profile_picture_url", json!(url)),
            )
            .await
    }

    /// Adds `other` to the user's contact list.  Idempotent.
    pub async fn add_contact(&self, uid: &UserId, other: &UserId) -> Result<()> {
        let mut profile = self.get(uid).await?;
        if profile.contacts.contains(other) {
            return Ok(());
        }
        profile.contacts.push(other.clone());
        self.db
            .update(
                collections::USERS,
                uid.as_str(),
                Patch::new().set("contacts", serde_json::to_value(&profile.contacts)?),
            )
            .await
    }
}
