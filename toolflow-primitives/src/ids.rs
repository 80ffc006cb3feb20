//! Call and batch identifier types.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, Result};

const MAX_CALL_ID_LEN: usize = 128;

/// Identifier of a tool call, unique within its batch.
///
/// Identifiers are restricted to ASCII alphanumerics, `-`, `_` and `:` so that
/// they can be referenced unambiguously from `${id.path}` placeholders.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CallId(String);

impl CallId {
    /// Creates a call identifier after validating its format.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidCallId`] if the identifier is empty, too long,
    /// or contains unsupported characters.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        validate_call_id(&id)?;
        Ok(Self(id))
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for CallId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<CallId> for String {
    fn from(value: CallId) -> Self {
        value.0
    }
}

impl TryFrom<String> for CallId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl TryFrom<&str> for CallId {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self> {
        Self::new(value)
    }
}

impl FromStr for CallId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl AsRef<str> for CallId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

fn validate_call_id(id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(Error::InvalidCallId {
            id: String::new(),
            reason: "identifier cannot be empty".into(),
        });
    }

    if id.len() > MAX_CALL_ID_LEN {
        return Err(Error::InvalidCallId {
            id: id.into(),
            reason: format!("identifier length must be <= {MAX_CALL_ID_LEN}"),
        });
    }

    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | ':'))
    {
        return Err(Error::InvalidCallId {
            id: id.into(),
            reason: "identifier must contain alphanumeric, dash, underscore, or colon".into(),
        });
    }

    Ok(())
}

/// Unique identifier for one orchestrated batch execution.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(Uuid);

impl BatchId {
    /// Generates a random batch identifier.
    #[must_use]
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(self) -> Uuid {
        self.0
    }
}

impl Default for BatchId {
    fn default() -> Self {
        Self::random()
    }
}

impl Display for BatchId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl FromStr for BatchId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let uuid = Uuid::parse_str(s).map_err(Error::from)?;
        Ok(Self(uuid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_placeholder_safe_ids() {
        for id in ["a", "read-1", "step_2", "ns:call", "A9"] {
            assert!(CallId::new(id).is_ok(), "{id} should be valid");
        }
    }

    #[test]
    fn rejects_ids_that_break_placeholders() {
        for id in ["", "a.b", "${a}", "with space"] {
            let err = CallId::new(id).expect_err("should be rejected");
            assert!(matches!(err, Error::InvalidCallId { .. }));
        }
    }

    #[test]
    fn call_id_deserialization_validates() {
        let ok: CallId = serde_json::from_str("\"fetch-1\"").expect("valid id");
        assert_eq!(ok.as_str(), "fetch-1");
        assert!(serde_json::from_str::<CallId>("\"bad.id\"").is_err());
    }

    #[test]
    fn round_trip_batch_id() {
        let id = BatchId::random();
        let parsed = id.to_string().parse::<BatchId>().expect("parse");
        assert_eq!(id, parsed);
    }
}
