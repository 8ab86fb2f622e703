//! Auth session.
//!
//! The identity itself comes from an [`AuthProvider`]; the session binds it
//! to the user directory so that signing in bootstraps a profile document
//! and signing out leaves a last-seen timestamp behind.

use chrono::Utc;
use tokio::sync::watch;
use tracing::info;

use missive_shared::constants::{PRESENCE_OFFLINE, PRESENCE_ONLINE};
use missive_shared::{MissiveError, Result, UserId};
use missive_store::{NewProfile, UserDirectory};

/// Source of the signed-in identity.
///
/// Production builds front the hosted auth service; tests and the local
/// server use [`LocalAuth`].
pub trait AuthProvider: Send + Sync {
    /// Uid of the signed-in user, if any.
    fn current_user(&self) -> Option<UserId>;

    /// Identity stream. Emits on every sign-in and sign-out.
    fn watch(&self) -> watch::Receiver<Option<UserId>>;
}

/// In-process auth provider backed by a watch channel.
#[derive(Debug)]
pub struct LocalAuth {
    tx: watch::Sender<Option<UserId>>,
}

impl LocalAuth {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx }
    }

    /// Replaces the signed-in identity.
    pub fn sign_in(&self, uid: UserId) {
        self.tx.send_replace(Some(uid));
    }

    /// Clears the signed-in identity.
    pub fn sign_out(&self) {
        self.tx.send_replace(None);
    }
}

impl Default for LocalAuth {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthProvider for LocalAuth {
    fn current_user(&self) -> Option<UserId> {
        self.tx.borrow().clone()
    }

    fn watch(&self) -> watch::Receiver<Option<UserId>> {
        self.tx.subscribe()
    }
}

/// The signed-in user's session.
pub struct Session<A> {
    auth: A,
    directory: UserDirectory,
}

impl<A: AuthProvider> Session<A> {
    pub fn new(auth: A, directory: UserDirectory) -> Self {
        Self { auth, directory }
    }

    /// Uid of the signed-in user, or [`MissiveError::AuthenticationRequired`].
    pub fn require_user(&self) -> Result<UserId> {
        self.auth
            .current_user()
            .ok_or(MissiveError::AuthenticationRequired)
    }

    /// Signed-in check without the error.
    pub fn current_user(&self) -> Option<UserId> {
        self.auth.current_user()
    }

    /// Identity stream, forwarded from the provider.
    pub fn watch(&self) -> watch::Receiver<Option<UserId>> {
        self.auth.watch()
    }

    /// Completes a sign-in: creates or refreshes the profile document and
    /// marks the user online. Call once the provider reports an identity.
    pub async fn sign_in(&self, username: &str, phone: &str) -> Result<UserId> {
        let uid = self.require_user()?;
        self.directory
            .upsert_profile(&NewProfile {
                uid: uid.clone(),
                username: username.to_string(),
                phone: phone.to_string(),
            })
            .await?;
        self.directory
            .set_presence(&uid, PRESENCE_ONLINE, None)
            .await?;
        info!(uid = %uid, "session established");
        Ok(uid)
    }

    /// Marks the user offline with a last-seen timestamp. Call before the
    /// provider drops the identity.
    pub async fn sign_out(&self) -> Result<()> {
        let uid = self.require_user()?;
        let now_ms = Utc::now().timestamp_millis();
        self.directory
            .set_presence(&uid, PRESENCE_OFFLINE, Some(now_ms))
            .await?;
        info!(uid = %uid, "session closed");
        Ok(())
    }

    /// Registers the device push token for the signed-in user.
    pub async fn register_push_token(&self, token: &str) -> Result<()> {
        let uid = self.require_user()?;
        self.directory.set_push_token(&uid, Some(token)).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use missive_store::Database;

    fn fixture() -> (Database, Session<LocalAuth>) {
        let db = Database::new();
        let session = Session::new(LocalAuth::new(), UserDirectory::new(db.clone()));
        (db, session)
    }

    #[tokio::test]
    async fn everything_requires_an_identity() {
        let (_db, session) = fixture();

        assert!(matches!(
            session.require_user(),
            Err(MissiveError::AuthenticationRequired)
        ));
        assert!(matches!(
            session.sign_in("ada", "+15550001111").await,
            Err(MissiveError::AuthenticationRequired)
        ));
        assert!(matches!(
            session.register_push_token("tok").await,
            Err(MissiveError::AuthenticationRequired)
        ));
    }

    #[tokio::test]
    async fn sign_in_bootstraps_an_online_profile() {
        let (db, session) = fixture();
        let ada = UserId::new("ada");
        session.auth.sign_in(ada.clone());

        let uid = session.sign_in("Ada", "+1 555 000 1111").await.unwrap();
        assert_eq!(uid, ada);

        let directory = UserDirectory::new(db);
        let profile = directory.get(&ada).await.unwrap();
        assert_eq!(profile.username, "Ada");
        assert_eq!(profile.username_lowercase, "ada");
        assert!(profile.is_online());
    }

    #[tokio::test]
    async fn sign_out_leaves_a_last_seen_timestamp() {
        let (db, session) = fixture();
        let ada = UserId::new("ada");
        session.auth.sign_in(ada.clone());
        session.sign_in("Ada", "+15550001111").await.unwrap();

        session.sign_out().await.unwrap();

        let profile = UserDirectory::new(db).get(&ada).await.unwrap();
        assert!(!profile.is_online());
        assert!(profile.last_seen_ms.is_some());
    }

    #[tokio::test]
    async fn identity_stream_reports_switches() {
        let auth = LocalAuth::new();
        let mut rx = auth.watch();
        assert!(rx.borrow_and_update().is_none());

        auth.sign_in(UserId::new("ada"));
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().clone(), Some(UserId::new("ada")));

        auth.sign_out();
        rx.changed().await.unwrap();
        assert!(rx.borrow_and_update().is_none());
    }
}
