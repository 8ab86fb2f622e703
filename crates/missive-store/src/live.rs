//! Live subscription feeds.
//!
//! Each `watch_*` call on the [`Database`](crate::database::Database) hands
//! back one of the feed types below.  Dropping a feed tears the subscription
//! down: the engine prunes watchers whose receiving side is gone at the next
//! commit, and a dropped feed can never observe another emission.

use tokio::sync::{mpsc, watch};

use crate::document::Document;

/// Live result set of a registered query.
///
/// The full current result is re-emitted whenever a commit changes it;
/// commits that leave the result identical emit nothing.
#[derive(Debug)]
pub struct QueryFeed {
    pub(crate) rx: watch::Receiver<Vec<Document>>,
}

impl QueryFeed {
    /// Most recent committed result.
    pub fn current(&self) -> Vec<Document> {
        self.rx.borrow().clone()
    }

    /// Waits for the result to change.  Returns `false` once the feed is
    /// closed (the database was dropped).
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }

    /// Whether an emission is pending that [`current`](Self::current) has
    /// not returned yet.  `false` once the feed is closed.
    pub fn has_changed(&self) -> bool {
        self.rx.has_changed().unwrap_or(false)
    }

    /// Tears the subscription down.  Dropping the feed has the same effect.
    pub fn close(self) {}
}

/// Live snapshot of a single document (`None` while it does not exist).
#[derive(Debug)]
pub struct DocFeed {
    pub(crate) rx: watch::Receiver<Option<Document>>,
}

impl DocFeed {
    /// Most recent committed snapshot.
    pub fn current(&self) -> Option<Document> {
        self.rx.borrow().clone()
    }

    /// Waits for the snapshot to change.  Returns `false` once the feed is
    /// closed.
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }

    /// Tears the subscription down.  Dropping the feed has the same effect.
    pub fn close(self) {}
}

/// Stream of committed document creations in one collection.
///
/// Fires exactly once per created document, in commit order.  Documents
/// created before the feed was registered are not replayed.
#[derive(Debug)]
pub struct CreationFeed {
    pub(crate) rx: mpsc::UnboundedReceiver<Document>,
}

impl CreationFeed {
    /// Next created document; `None` once the feed is closed.
    pub async fn next(&mut self) -> Option<Document> {
        self.rx.recv().await
    }

    /// Tears the subscription down.  Dropping the feed has the same effect.
    pub fn close(self) {}
}
