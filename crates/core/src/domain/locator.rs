// Namespace/Queue Locator

use crate::domain::error::{DomainError, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Separator between the broker namespace and the queue name
pub const LOCATOR_SEPARATOR: char = '/';

/// Addresses one queue inside one broker namespace (`"namespace/queue"`)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NamespaceQueueLocator {
    namespace: String,
    queue: String,
}

impl NamespaceQueueLocator {
    /// Build from two explicit parts. Both must be non-empty.
    pub fn new(namespace: impl Into<String>, queue: impl Into<String>) -> Result<Self> {
        let locator = Self {
            namespace: namespace.into(),
            queue: queue.into(),
        };
        if !locator.is_valid() {
            return Err(DomainError::InvalidLocator(locator.to_string()));
        }
        Ok(locator)
    }

    /// Split a `"namespace/queue"` token.
    ///
    /// Exactly one separator is accepted; `"ns"`, `"ns/"`, `"/q"` and
    /// `"ns/q/extra"` are all rejected.
    pub fn parse(token: &str) -> Result<Self> {
        let mut parts = token.split(LOCATOR_SEPARATOR);
        let (Some(namespace), Some(queue), None) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(DomainError::InvalidLocator(token.to_string()));
        };
        Self::new(namespace, queue).map_err(|_| DomainError::InvalidLocator(token.to_string()))
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn is_valid(&self) -> bool {
        !self.namespace.is_empty() && !self.queue.is_empty()
    }
}

impl fmt::Display for NamespaceQueueLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.namespace, LOCATOR_SEPARATOR, self.queue)
    }
}

impl FromStr for NamespaceQueueLocator {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for NamespaceQueueLocator {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for NamespaceQueueLocator {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let token = String::deserialize(deserializer)?;
        Self::parse(&token).map_err(serde::de::Error::custom)
    }
}
