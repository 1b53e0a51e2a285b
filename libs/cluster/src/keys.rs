//! Desired-state store key layout.

use vigil_id::ServiceId;

/// How service records are laid out in the desired-state store.
///
/// A record lives at `{application_prefix}{delimiter}{service_id}` and the
/// listing of all known services is every key under `listing_prefix`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyLayout {
    pub application_prefix: String,
    pub delimiter: String,
    pub listing_prefix: String,
}

impl Default for KeyLayout {
    fn default() -> Self {
        Self {
            application_prefix: "containership::application".to_string(),
            delimiter: "::".to_string(),
            listing_prefix: "containership::application::".to_string(),
        }
    }
}

impl KeyLayout {
    /// Store key holding the record for `service`.
    pub fn service_key(&self, service: &ServiceId) -> String {
        format!("{}{}{}", self.application_prefix, self.delimiter, service)
    }
}
