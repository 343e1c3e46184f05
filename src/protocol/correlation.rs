use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique correlation identifier used to match RPC requests and responses.
///
/// Correlators are random 128-bit identifiers rendered as 32 lowercase hex
/// characters with no delimiters. They are carried in message properties and
/// are opaque to the transport layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Generate a new unique correlation ID.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Borrow the correlation ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume the ID, returning the underlying string.
    pub fn into_string(self) -> String {
        self.0
    }
}

impl From<String> for CorrelationId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for CorrelationId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
