//! User records and request field validation

use crate::common::{Error, Result};
use serde::{Deserialize, Serialize};
use uuid::{Uuid, Variant};

/// Length of a hyphenated UUID (`8-4-4-4-12`)
const HYPHENATED_LEN: usize = 36;

/// A user record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub id: Uuid,
    pub username: String,
    pub age: i64,
    pub hobbies: Vec<String>,
}

impl Record {
    pub fn new(id: Uuid, fields: RecordFields) -> Self {
        Self {
            id,
            username: fields.username,
            age: fields.age,
            hobbies: fields.hobbies,
        }
    }
}

/// The replaceable (non-id) part of a record, as sent by clients on create/update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordFields {
    pub username: String,
    pub age: i64,
    pub hobbies: Vec<String>,
}

impl RecordFields {
    /// Decode a request body.
    ///
    /// Unparseable JSON is a `MalformedBody`; well-formed JSON with missing or
    /// wrong-typed fields is `InvalidInput`.
    pub fn from_json(body: &[u8]) -> Result<Self> {
        let value: serde_json::Value =
            serde_json::from_slice(body).map_err(|e| Error::MalformedBody(e.to_string()))?;
        let fields: RecordFields =
            serde_json::from_value(value).map_err(|e| Error::InvalidInput(e.to_string()))?;
        fields.validate()?;
        Ok(fields)
    }

    /// Field checks the type system can't express.
    pub fn validate(&self) -> Result<()> {
        if self.username.is_empty() {
            return Err(Error::InvalidInput("username must not be empty".into()));
        }
        Ok(())
    }
}

/// Parse a path identifier: a hyphenated RFC 4122 UUID of version 1 to 8,
/// or the nil and max UUIDs.
pub fn parse_id(raw: &str) -> Result<Uuid> {
    let invalid = || Error::InvalidIdentifier(raw.to_string());
    if raw.len() != HYPHENATED_LEN {
        return Err(invalid());
    }
    let id = Uuid::parse_str(raw).map_err(|_| invalid())?;
    if id.is_nil() || id.as_u128() == u128::MAX {
        return Ok(id);
    }
    let versioned = (1..=8).contains(&id.get_version_num());
    if !versioned || id.get_variant() != Variant::RFC4122 {
        return Err(invalid());
    }
    Ok(id)
}

/// Records every process starts with unless seeding is disabled.
pub fn seed_records() -> Vec<Record> {
    [
        ("1e4b0a5c-2d6d-4bb6-a839-74576cbd2fbd", "John", 30, ["reading", "swimming"]),
        ("2f07a5c4-1c3f-4cb6-b739-64576bbd4fbc", "Jane", 25, ["writing", "reading"]),
        ("3e1c8a9f-2b4e-4876-89b2-64576ab13dcd", "Bob", 40, ["swimming", "cooking"]),
    ]
    .into_iter()
    .map(|(id, username, age, hobbies)| Record {
        id: Uuid::parse_str(id).unwrap_or_else(|_| Uuid::new_v4()),
        username: username.to_string(),
        age,
        hobbies: hobbies.iter().map(|h| h.to_string()).collect(),
    })
    .collect()
}
