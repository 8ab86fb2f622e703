//! # missive-shared
//!
//! Domain model and common helpers for the Missive messaging core.
//!
//! Identifiers, the persisted document shapes (`UserProfile`,
//! `Conversation`, `Message`), the workspace-wide error taxonomy and the
//! presence formatter live here so every other crate agrees on them.

pub mod constants;
pub mod presence;
pub mod types;

mod error;

pub use error::{MissiveError, Result};
pub use types::*;
