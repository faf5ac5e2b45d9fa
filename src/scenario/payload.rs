//! Request payload construction
//!
//! Optional fields are only ever added when a value is configured; an
//! absent player uuid never becomes `""` or `null` on the wire.

use serde_json::{Map, Value};

use crate::sink::sanitize;

/// Wire name of the shared-secret field
pub const KEY_FIELD: &str = "key";

/// Optional player identity used to qualify player-scoped steps
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlayerIdentity {
    pub uuid: Option<String>,
    pub name: Option<String>,
}

impl PlayerIdentity {
    /// Build an identity, treating blank strings as absent
    pub fn new(uuid: Option<String>, name: Option<String>) -> Self {
        Self {
            uuid: uuid.filter(|s| !s.trim().is_empty()),
            name: name.filter(|s| !s.trim().is_empty()),
        }
    }

    /// Whether neither uuid nor name is configured
    pub fn is_empty(&self) -> bool {
        self.uuid.is_none() && self.name.is_none()
    }

    /// File-safe qualifier: the uuid, else the name, else `unknown`
    pub fn qualifier(&self) -> String {
        sanitize(self.uuid.as_deref().or(self.name.as_deref()))
    }
}

/// Builder for a JSON object payload
#[derive(Debug, Clone, Default)]
pub struct PayloadBuilder {
    fields: Map<String, Value>,
}

impl PayloadBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a payload carrying the shared key
    pub fn authenticated(key: &str) -> Self {
        Self::new().field(KEY_FIELD, key)
    }

    /// Set a field
    pub fn field(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(name.to_string(), value.into());
        self
    }

    /// Set a field only when `value` is present
    pub fn optional<V: Into<Value>>(self, name: &str, value: Option<V>) -> Self {
        match value {
            Some(value) => self.field(name, value),
            None => self,
        }
    }

    /// Add `playerUuid` and `playerName` for whichever are configured
    pub fn player(self, player: &PlayerIdentity) -> Self {
        self.optional("playerUuid", player.uuid.clone())
            .optional("playerName", player.name.clone())
    }

    /// Add `page` and `pageSize`
    pub fn page(self, page: u32, page_size: u32) -> Self {
        self.field("page", page).field("pageSize", page_size)
    }

    /// Merge every entry of `fields`, overwriting existing ones
    pub fn extend(mut self, fields: Map<String, Value>) -> Self {
        self.fields.extend(fields);
        self
    }

    pub fn build(self) -> Value {
        Value::Object(self.fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_blank_identity_is_empty() {
        let player = PlayerIdentity::new(Some("  ".to_string()), None);
        assert!(player.is_empty());
        assert_eq!(player.qualifier(), "unknown");
    }

    #[test]
    fn test_qualifier_prefers_uuid() {
        let player = PlayerIdentity::new(
            Some("a1b2-c3".to_string()),
            Some("Steve".to_string()),
        );
        assert_eq!(player.qualifier(), "a1b2-c3");

        let by_name = PlayerIdentity::new(None, Some("Steve Jr!".to_string()));
        assert_eq!(by_name.qualifier(), "Steve_Jr_");
    }

    #[test]
    fn test_absent_player_fields_are_omitted() {
        let only_name = PlayerIdentity::new(None, Some("Steve".to_string()));
        let payload = PayloadBuilder::authenticated("k").player(&only_name).build();

        assert_eq!(payload, json!({"key": "k", "playerName": "Steve"}));
        assert!(payload.get("playerUuid").is_none());
    }

    #[test]
    fn test_page_fields() {
        let payload = PayloadBuilder::authenticated("k").page(1, 20).build();
        assert_eq!(payload, json!({"key": "k", "page": 1, "pageSize": 20}));
    }
}
