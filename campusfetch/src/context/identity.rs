//! Identity of the collected entity in storage.

use serde::{Deserialize, Serialize};

/// Result of the mandatory first lookup: the storage keys of the institution.
///
/// A pipeline may only proceed past identity resolution when `entity_id` is
/// present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IdentityResult {
    /// Primary key of the institution row.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<i64>,
    /// Primary key of the region row.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region_id: Option<i64>,
}

impl IdentityResult {
    /// Creates a resolved identity.
    #[must_use]
    pub fn resolved(entity_id: i64) -> Self {
        Self {
            entity_id: Some(entity_id),
            region_id: None,
        }
    }

    /// Creates an identity with no entity id.
    #[must_use]
    pub fn unresolved() -> Self {
        Self::default()
    }

    /// Sets the region id.
    #[must_use]
    pub fn with_region_id(mut self, region_id: i64) -> Self {
        self.region_id = Some(region_id);
        self
    }

    /// Returns true if an entity id is present.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.entity_id.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolved() {
        let id = IdentityResult::resolved(42).with_region_id(7);
        assert!(id.is_resolved());
        assert_eq!(id.entity_id, Some(42));
        assert_eq!(id.region_id, Some(7));
    }

    #[test]
    fn test_unresolved() {
        assert!(!IdentityResult::unresolved().is_resolved());
        let from_json: IdentityResult = serde_json::from_str(r#"{"region_id": 3}"#).unwrap();
        assert!(!from_json.is_resolved());
    }
}
