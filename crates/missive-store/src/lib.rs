//! # missive-store
//!
//! The document store behind the messaging core: an in-process database
//! with live queries, plus the typed stores built on top of it (user
//! directory, conversations, messages).
//!
//! The engine speaks the same contract as the hosted document database the
//! production clients run against: atomic write batches, server-assigned
//! timestamps, and subscriptions that re-emit the full current result after
//! every change.  A platform binding re-implements [`Database`]'s surface;
//! everything above it stays unchanged.

pub mod conversations;
pub mod database;
pub mod document;
pub mod live;
pub mod messages;
pub mod users;

pub use conversations::ConversationStore;
pub use database::{collections, Database, Filter, Query, SortOrder};
pub use document::{Document, FieldValue, Guard, Patch, WriteBatch};
pub use live::{CreationFeed, DocFeed, QueryFeed};
pub use messages::MessageStore;
pub use users::{NewProfile, UserDirectory};
