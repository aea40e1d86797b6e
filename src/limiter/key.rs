//! Limiter key derivation.

use crate::config::KeyingMode;

/// Prefix namespacing guard entries within a shared store.
const KEY_PREFIX: &str = "form-rate";

/// The identity under which consumption counts are tracked.
///
/// Derivation is deterministic: the same (mode, form identifier, client
/// address) triple always yields the same key. Global mode collapses the
/// form dimension but keeps partitioning by client address, since the
/// consumed subject is the submitting client.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LimiterKey(String);

impl LimiterKey {
    /// Derive the key for one submission.
    pub fn derive(mode: KeyingMode, form_identifier: &str, client_address: &str) -> Self {
        let key = match mode {
            KeyingMode::Global => format!("{}:global:{}", KEY_PREFIX, client_address),
            KeyingMode::PerForm => {
                format!("{}:form:{}:{}", KEY_PREFIX, form_identifier, client_address)
            }
        };
        Self(key)
    }

    /// The storage key string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for LimiterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
