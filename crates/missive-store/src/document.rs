//! Documents and write primitives.
//!
//! A [`Document`] is an id plus a JSON body.  Writes are expressed as
//! [`Patch`]es (per-field assignments, applied in order) collected into a
//! [`WriteBatch`]; the batch commits atomically through
//! [`Database::apply`](crate::database::Database::apply).

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use missive_shared::{MissiveError, Result};

// ---------------------------------------------------------------------------
// Document
// ---------------------------------------------------------------------------

/// A stored document: the id under which it lives plus its JSON body.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub body: Value,
}

impl Document {
    /// Decodes the body into a typed model.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.body.clone()).map_err(Into::into)
    }
}

// ---------------------------------------------------------------------------
// Field writes
// ---------------------------------------------------------------------------

/// A single field write inside a [`Patch`].
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// Literal JSON value.
    Json(Value),
    /// Resolved to the commit timestamp when the batch applies.
    ServerTimestamp,
    /// Removes the field.
    Delete,
}

/// An ordered set of field writes.  Later writes to the same field win.
///
/// A patch is both the payload of an update (fields merged into the existing
/// body) and of a create (fields applied to an empty body).
#[derive(Debug, Clone, Default)]
pub struct Patch {
    fields: Vec<(String, FieldValue)>,
}

impl Patch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assigns a literal value to a field.
    pub fn set(mut self, field: impl Into<String>, value: Value) -> Self {
        self.fields.push((field.into(), FieldValue::Json(value)));
        self
    }

    /// Assigns the commit timestamp to a field.
    pub fn server_timestamp(mut self, field: impl Into<String>) -> Self {
        self.fields.push((field.into(), FieldValue::ServerTimestamp));
        self
    }

    /// Removes a field.
    pub fn delete(mut self, field: impl Into<String>) -> Self {
        self.fields.push((field.into(), FieldValue::Delete));
        self
    }

    /// Builds a patch assigning every top-level field of a serialized model.
    ///
    /// The model must serialize to a JSON object.
    pub fn from_model<T: Serialize>(model: &T) -> Result<Self> {
        let value = serde_json::to_value(model)?;
        let Value::Object(map) = value else {
            return Err(MissiveError::Remote(
                "document body must serialize to an object".to_string(),
            ));
        };
        let mut patch = Self::new();
        for (field, value) in map {
            patch = patch.set(field, value);
        }
        Ok(patch)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Applies the writes to a body in order.  `commit_ts` is the
    /// pre-formatted timestamp substituted for [`FieldValue::ServerTimestamp`].
    pub(crate) fn apply_to(&self, body: &mut Map<String, Value>, commit_ts: &str) {
        for (field, write) in &self.fields {
            match write {
                FieldValue::Json(value) => {
                    body.insert(field.clone(), value.clone());
                }
                FieldValue::ServerTimestamp => {
                    body.insert(field.clone(), Value::String(commit_ts.to_string()));
                }
                FieldValue::Delete => {
                    body.remove(field);
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Batched writes
// ---------------------------------------------------------------------------

/// Precondition on a guarded update: the op applies only while the named
/// field currently equals the value, and is skipped otherwise.
#[derive(Debug, Clone)]
pub struct Guard {
    pub field: String,
    pub equals: Value,
}

impl Guard {
    pub fn field_equals(field: impl Into<String>, equals: Value) -> Self {
        Self {
            field: field.into(),
            equals,
        }
    }
}

#[derive(Debug)]
pub(crate) enum WriteOp {
    /// Fails the whole batch if the document already exists.
    Create {
        collection: String,
        id: String,
        fields: Patch,
    },
    /// Fails the whole batch if the document does not exist.  With a guard,
    /// the op is silently skipped when the guard no longer holds.
    Update {
        collection: String,
        id: String,
        fields: Patch,
        guard: Option<Guard>,
    },
    /// Creates the document if absent, merges into it otherwise.
    Merge {
        collection: String,
        id: String,
        fields: Patch,
    },
}

/// A set of writes that commits atomically: either every op applies (guarded
/// ops may individually skip) or none do, and watchers only ever observe the
/// committed state.
#[derive(Debug, Default)]
pub struct WriteBatch {
    pub(crate) ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(
        &mut self,
        collection: impl Into<String>,
        id: impl Into<String>,
        fields: Patch,
    ) -> &mut Self {
        self.ops.push(WriteOp::Create {
            collection: collection.into(),
            id: id.into(),
            fields,
        });
        self
    }

    pub fn update(
        &mut self,
        collection: impl Into<String>,
        id: impl Into<String>,
        fields: Patch,
    ) -> &mut Self {
        self.ops.push(WriteOp::Update {
            collection: collection.into(),
            id: id.into(),
            fields,
            guard: None,
        });
        self
    }

    /// Adds an update that only applies while `guard` holds.
    pub fn update_if(
        &mut self,
        collection: impl Into<String>,
        id: impl Into<String>,
        guard: Guard,
        fields: Patch,
    ) -> &mut Self {
        self.ops.push(WriteOp::Update {
            collection: collection.into(),
            id: id.into(),
            fields,
            guard: Some(guard),
        });
        self
    }

    pub fn merge(
        &mut self,
        collection: impl Into<String>,
        id: impl Into<String>,
        fields: Patch,
    ) -> &mut Self {
        self.ops.push(WriteOp::Merge {
            collection: collection.into(),
            id: id.into(),
            fields,
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }
}
