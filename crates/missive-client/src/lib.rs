//! # missive-client
//!
//! Client-side sync core: the auth session, the projectors that turn live
//! store feeds into renderable view state, and the device-contact merge
//! behind the people picker.
//!
//! Projectors own their subscriptions. Each one runs in a single tokio task
//! that combines its input feeds with `select!`, recomputes its view state
//! on every emission, and publishes through a watch channel. Dropping the
//! projector handle stops the task and releases every feed it held.

pub mod chat;
pub mod contacts;
pub mod roster;
pub mod session;

pub use chat::{ChatScreen, ChatViewState};
pub use contacts::{ContactBook, ContactEntry, ContactsProvider, DeviceContact, StaticContacts};
pub use roster::ConversationList;
pub use session::{AuthProvider, LocalAuth, Session};
