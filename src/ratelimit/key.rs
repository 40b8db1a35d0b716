//! Client and counter key types.

use std::fmt;

/// Opaque identifier for a caller, usually an IP address.
///
/// Derived from request metadata and not verified in any way; see
/// [`ClientIdentifier`](super::ClientIdentifier) for how it is chosen.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientKey(String);

impl ClientKey {
    /// Key used when a request carries no usable address.
    pub const UNKNOWN: &'static str = "unknown";

    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn unknown() -> Self {
        Self(Self::UNKNOWN.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ClientKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// A key that uniquely identifies a (client, route) request log.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CounterKey {
    /// The caller
    pub client: ClientKey,
    /// The request path the quota applies to
    pub route: String,
}

impl CounterKey {
    pub fn new(client: ClientKey, route: impl Into<String>) -> Self {
        Self {
            client,
            route: route.into(),
        }
    }

    /// Convert the counter key to a string representation.
    ///
    /// This is useful for logging and debugging.
    pub fn to_string_key(&self) -> String {
        format!("{}:{}", self.client, self.route)
    }
}

impl fmt::Display for CounterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_string_key())
    }
}
