//! The in-process document database.
//!
//! Named collections of JSON documents with declarative queries, atomic
//! write batches, server-assigned timestamps and live subscriptions.  The
//! API mirrors the hosted document store the messaging core runs against in
//! production, which keeps every sync rule built on top testable in-process.
//!
//! Watchers are notified under the same lock that commits the batch, so
//! within one subscription successive emissions always reflect monotonically
//! newer commits.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde_json::{Map, Value};
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, trace};
use uuid::Uuid;

use missive_shared::{MissiveError, Result};

use crate::document::{Document, Patch, WriteBatch, WriteOp};
use crate::live::{CreationFeed, DocFeed, QueryFeed};

/// Collection names used by the typed stores.
pub mod collections {
    pub const USERS: &str = "users";
    pub const CONVERSATIONS: &str = "conversations";
    pub const MESSAGES: &str = "messages";
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

/// A single query predicate.
#[derive(Debug, Clone)]
pub enum Filter {
    /// Field equals the value (a missing field compares as null).
    Eq(String, Value),
    /// Array-valued field contains the value.
    ArrayContains(String, Value),
    /// `start <= field < end`; the shape of a prefix search.
    Range {
        field: String,
        start: Value,
        end: Value,
    },
}

/// Sort direction of an `order_by`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

/// Declarative query over one collection: conjunctive filters, at most one
/// order-by and an optional result limit.  Ties (and results without an
/// order-by) fall back to document-id order, so query results are always
/// deterministic.
#[derive(Debug, Clone, Default)]
pub struct Query {
    filters: Vec<Filter>,
    order: Option<(String, SortOrder)>,
    limit: Option<usize>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.order = Some((field.into(), order));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Total order over JSON values: null < bool < number < string < composite.
/// Numbers compare as f64, strings lexicographically.  Commit timestamps use
/// a fixed-width RFC 3339 format, so their string order is chronological.
fn cmp_values(a: &Value, b: &Value) -> Ordering {
    fn rank(v: &Value) -> u8 {
        match v {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::Array(_) => 4,
            Value::Object(_) => 5,
        }
    }
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}

fn matches(body: &Map<String, Value>, filter: &Filter) -> bool {
    match filter {
        Filter::Eq(field, value) => body.get(field).unwrap_or(&Value::Null) == value,
        Filter::ArrayContains(field, value) => body
            .get(field)
            .and_then(Value::as_array)
            .map(|items| items.contains(value))
            .unwrap_or(false),
        Filter::Range { field, start, end } => {
            let value = body.get(field).unwrap_or(&Value::Null);
            cmp_values(start, value) != Ordering::Greater
                && cmp_values(value, end) == Ordering::Less
        }
    }
}

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

struct QueryWatcher {
    collection: String,
    query: Query,
    tx: watch::Sender<Vec<Document>>,
}

struct DocWatcher {
    collection: String,
    doc_id: String,
    tx: watch::Sender<Option<Document>>,
}

struct CreationWatcher {
    collection: String,
    tx: mpsc::UnboundedSender<Document>,
}

#[derive(Default)]
struct State {
    collections: HashMap<String, BTreeMap<String, Map<String, Value>>>,
    last_commit_ts: Option<DateTime<Utc>>,
    commit_seq: u64,
    query_watchers: Vec<QueryWatcher>,
    doc_watchers: Vec<DocWatcher>,
    creation_watchers: Vec<CreationWatcher>,
}

impl State {
    fn exists(&self, collection: &str, id: &str) -> bool {
        self.collections
            .get(collection)
            .map(|docs| docs.contains_key(id))
            .unwrap_or(false)
    }

    fn doc(&self, collection: &str, id: &str) -> Option<Document> {
        let body = self.collections.get(collection)?.get(id)?;
        Some(Document {
            id: id.to_string(),
            body: Value::Object(body.clone()),
        })
    }

    fn evaluate(&self, collection: &str, query: &Query) -> Vec<Document> {
        let Some(docs) = self.collections.get(collection) else {
            return Vec::new();
        };
        let mut hits: Vec<(&String, &Map<String, Value>)> = docs
            .iter()
            .filter(|(_, body)| query.filters.iter().all(|f| matches(body, f)))
            .collect();

        if let Some((field, order)) = &query.order {
            hits.sort_by(|a, b| {
                let av = a.1.get(field).unwrap_or(&Value::Null);
                let bv = b.1.get(field).unwrap_or(&Value::Null);
                let mut by_field = cmp_values(av, bv);
                if *order == SortOrder::Desc {
                    by_field = by_field.reverse();
                }
                by_field.then_with(|| a.0.cmp(b.0))
            });
        }

        let mut out: Vec<Document> = hits
            .into_iter()
            .map(|(id, body)| Document {
                id: id.clone(),
                body: Value::Object(body.clone()),
            })
            .collect();
        if let Some(limit) = query.limit {
            out.truncate(limit);
        }
        out
    }

    /// Pushes the committed changes out to live feeds.  Runs under the
    /// commit lock; watchers whose receiving side is gone are pruned here.
    fn notify(&mut self, touched: &[(String, String)], created: &[(String, Document)]) {
        self.creation_watchers.retain(|w| !w.tx.is_closed());
        for (collection, doc) in created {
            for watcher in &self.creation_watchers {
                if watcher.collection == *collection {
                    let _ = watcher.tx.send(doc.clone());
                }
            }
        }

        let touched_collections: HashSet<&str> =
            touched.iter().map(|(c, _)| c.as_str()).collect();

        let mut query_watchers = std::mem::take(&mut self.query_watchers);
        query_watchers.retain(|w| !w.tx.is_closed());
        for watcher in &query_watchers {
            if touched_collections.contains(watcher.collection.as_str()) {
                let next = self.evaluate(&watcher.collection, &watcher.query);
                watcher.tx.send_if_modified(|current| {
                    if *current == next {
                        false
                    } else {
                        *current = next;
                        true
                    }
                });
            }
        }
        self.query_watchers = query_watchers;

        let mut doc_watchers = std::mem::take(&mut self.doc_watchers);
        doc_watchers.retain(|w| !w.tx.is_closed());
        for watcher in &doc_watchers {
            let hit = touched
                .iter()
                .any(|(c, id)| *c == watcher.collection && *id == watcher.doc_id);
            if hit {
                let next = self.doc(&watcher.collection, &watcher.doc_id);
                watcher.tx.send_if_modified(|current| {
                    if *current == next {
                        false
                    } else {
                        *current = next;
                        true
                    }
                });
            }
        }
        self.doc_watchers = doc_watchers;
    }
}

// ---------------------------------------------------------------------------
// Database handle
// ---------------------------------------------------------------------------

/// Handle to the shared database.  Clones are cheap and share one state.
#[derive(Clone, Default)]
pub struct Database {
    state: Arc<Mutex<State>>,
}

impl Database {
    /// Creates an empty database.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a fresh document id.  Ids are client-allocated: the caller
    /// knows the id before the write commits.
    pub fn allocate_id(&self) -> String {
        Uuid::new_v4().to_string()
    }

    /// Reads one document.
    pub async fn get(&self, collection: &str, id: &str) -> Option<Document> {
        self.state.lock().await.doc(collection, id)
    }

    /// Runs a query against the current committed state.
    pub async fn query(&self, collection: &str, query: &Query) -> Vec<Document> {
        self.state.lock().await.evaluate(collection, query)
    }

    /// Number of batches committed so far.
    pub async fn commit_seq(&self) -> u64 {
        self.state.lock().await.commit_seq
    }

    /// Commits a batch atomically.
    ///
    /// Validation runs first: a `create` of an existing document or an
    /// `update` of a missing one fails the whole batch with nothing applied.
    /// Guarded updates whose guard no longer holds are skipped, not failed.
    /// Watchers observe only the committed state.
    pub async fn apply(&self, batch: WriteBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut state = self.state.lock().await;

        for op in &batch.ops {
            match op {
                WriteOp::Create { collection, id, .. } => {
                    if state.exists(collection, id) {
                        return Err(MissiveError::Remote(format!(
                            "document already exists: {collection}/{id}"
                        )));
                    }
                }
                WriteOp::Update { collection, id, .. } => {
                    if !state.exists(collection, id) {
                        return Err(MissiveError::NotFound(format!("{collection}/{id}")));
                    }
                }
                WriteOp::Merge { .. } => {}
            }
        }

        // The commit clock is strictly increasing, even if the wall clock
        // stalls or steps backwards, so server-timestamp order matches
        // commit order.
        let now = Utc::now();
        let commit_ts = match state.last_commit_ts {
            Some(prev) if now <= prev => prev + Duration::microseconds(1),
            _ => now,
        };
        state.last_commit_ts = Some(commit_ts);
        let ts_str = commit_ts.to_rfc3339_opts(SecondsFormat::Micros, true);

        let mut created: Vec<(String, Document)> = Vec::new();
        let mut touched: Vec<(String, String)> = Vec::new();

        for op in &batch.ops {
            match op {
                WriteOp::Create {
                    collection,
                    id,
                    fields,
                } => {
                    let mut body = Map::new();
                    fields.apply_to(&mut body, &ts_str);
                    let doc = Document {
                        id: id.clone(),
                        body: Value::Object(body.clone()),
                    };
                    state
                        .collections
                        .entry(collection.clone())
                        .or_default()
                        .insert(id.clone(), body);
                    created.push((collection.clone(), doc));
                    touched.push((collection.clone(), id.clone()));
                }
                WriteOp::Update {
                    collection,
                    id,
                    fields,
                    guard,
                } => {
                    let body = state
                        .collections
                        .get_mut(collection.as_str())
                        .and_then(|docs| docs.get_mut(id.as_str()));
                    let Some(body) = body else { continue };
                    if let Some(guard) = guard {
                        if body.get(&guard.field).unwrap_or(&Value::Null) != &guard.equals {
                            trace!(%collection, %id, field = %guard.field, "guarded update skipped");
                            continue;
                        }
                    }
                    fields.apply_to(body, &ts_str);
                    touched.push((collection.clone(), id.clone()));
                }
                WriteOp::Merge {
                    collection,
                    id,
                    fields,
                } => {
                    let docs = state.collections.entry(collection.clone()).or_default();
                    let was_present = docs.contains_key(id.as_str());
                    let body = docs.entry(id.clone()).or_default();
                    fields.apply_to(body, &ts_str);
                    if !was_present {
                        let doc = Document {
                            id: id.clone(),
                            body: Value::Object(body.clone()),
                        };
                        created.push((collection.clone(), doc));
                    }
                    touched.push((collection.clone(), id.clone()));
                }
            }
        }

        state.commit_seq += 1;
        debug!(seq = state.commit_seq, ops = batch.len(), "batch committed");

        state.notify(&touched, &created);
        Ok(())
    }

    /// Registers a live query.  The feed starts out holding the current
    /// result and re-emits the full result whenever a commit changes it.
    pub async fn watch_query(&self, collection: &str, query: Query) -> QueryFeed {
        let mut state = self.state.lock().await;
        let initial = state.evaluate(collection, &query);
        let (tx, rx) = watch::channel(initial);
        state.query_watchers.push(QueryWatcher {
            collection: collection.to_string(),
            query,
            tx,
        });
        QueryFeed { rx }
    }

    /// Registers a live single-document snapshot.
    pub async fn watch_doc(&self, collection: &str, id: &str) -> DocFeed {
        let mut state = self.state.lock().await;
        let initial = state.doc(collection, id);
        let (tx, rx) = watch::channel(initial);
        state.doc_watchers.push(DocWatcher {
            collection: collection.to_string(),
            doc_id: id.to_string(),
            tx,
        });
        DocFeed { rx }
    }

    /// Registers a creation trigger: one event per document committed into
    /// `collection` from now on.
    pub async fn on_create(&self, collection: &str) -> CreationFeed {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state.lock().await.creation_watchers.push(CreationWatcher {
            collection: collection.to_string(),
            tx,
        });
        CreationFeed { rx }
    }

    /// Number of live feeds still registered. Closed feeds are pruned on
    /// the commit after their receiver drops, so this trails reality by at
    /// most one write.
    pub async fn watcher_count(&self) -> usize {
        let state = self.state.lock().await;
        state.query_watchers.len() + state.doc_watchers.len() + state.creation_watchers.len()
    }
}

// ---------------------------------------------------------------------------
// Convenience single-op commits
// ---------------------------------------------------------------------------

impl Database {
    /// Creates one document.
    pub async fn create(&self, collection: &str, id: &str, fields: Patch) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.create(collection, id, fields);
        self.apply(batch).await
    }

    /// Updates one existing document.
    pub async fn update(&self, collection: &str, id: &str, fields: Patch) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.update(collection, id, fields);
        self.apply(batch).await
    }

    /// Creates or merges one document.
    pub async fn merge(&self, collection: &str, id: &str, fields: Patch) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.merge(collection, id, fields);
        self.apply(batch).await
    }
}
