//! Rehydration of objects carried by LiveQuery events.
//!
//! The object model itself lives outside this crate; [`ObjectDecoder`] is the
//! seam through which event payloads become [`ParseObject`]s.

use std::collections::HashMap;
use std::sync::Mutex;

use serde_json::{Map as JsonMap, Value as JsonValue};

/// A decoded backend object: class, id and attribute map.
#[derive(Clone, Debug, PartialEq)]
pub struct ParseObject {
    class_name: String,
    object_id: Option<String>,
    attributes: JsonMap<String, JsonValue>,
}

impl ParseObject {
    pub fn new(class_name: impl Into<String>, object_id: Option<String>) -> Self {
        Self {
            class_name: class_name.into(),
            object_id,
            attributes: JsonMap::new(),
        }
    }

    /// Builds an object from its wire form. `className`, `objectId` and `__type`
    /// are lifted out of the attribute map.
    pub fn from_json_map(mut json: JsonMap<String, JsonValue>) -> Self {
        json.remove("__type");
        let class_name = match json.remove("className") {
            Some(JsonValue::String(name)) => name,
            _ => String::new(),
        };
        let object_id = match json.remove("objectId") {
            Some(JsonValue::String(id)) => Some(id),
            _ => None,
        };
        Self {
            class_name,
            object_id,
            attributes: json,
        }
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn id(&self) -> Option<&str> {
        self.object_id.as_deref()
    }

    pub fn get(&self, key: &str) -> Option<&JsonValue> {
        self.attributes.get(key)
    }

    pub fn has(&self, key: &str) -> bool {
        self.attributes.contains_key(key)
    }

    pub fn attributes(&self) -> &JsonMap<String, JsonValue> {
        &self.attributes
    }

    pub fn created_at(&self) -> Option<&str> {
        self.attributes.get("createdAt").and_then(JsonValue::as_str)
    }

    pub fn updated_at(&self) -> Option<&str> {
        self.attributes.get("updatedAt").and_then(JsonValue::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: JsonValue) {
        self.attributes.insert(key.into(), value);
    }

    pub fn to_json(&self) -> JsonValue {
        let mut json = self.attributes.clone();
        json.insert(
            "className".into(),
            JsonValue::String(self.class_name.clone()),
        );
        if let Some(id) = &self.object_id {
            json.insert("objectId".into(), JsonValue::String(id.clone()));
        }
        JsonValue::Object(json)
    }
}

/// Wire JSON for one object plus the fields the event says are gone.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ObjectPayload {
    pub json: JsonMap<String, JsonValue>,
    /// Fields that must not survive a merge with previously known state.
    pub unset: Vec<String>,
}

impl ObjectPayload {
    pub fn new(json: JsonMap<String, JsonValue>) -> Self {
        Self {
            json,
            unset: Vec::new(),
        }
    }
}

/// Turns event payloads into objects.
///
/// With `override_cache` the payload replaces whatever the decoder knew about
/// the object; without it the payload is merged over the known state.
pub trait ObjectDecoder: Send + Sync {
    fn from_json(&self, payload: ObjectPayload, override_cache: bool) -> ParseObject;
}

/// Default decoder keeping the last known server state of every object it saw,
/// keyed by class name and object id.
#[derive(Debug, Default)]
pub struct CachedObjectDecoder {
    states: Mutex<HashMap<(String, String), JsonMap<String, JsonValue>>>,
}

impl CachedObjectDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last known state for an object, if the decoder has seen it.
    pub fn cached_state(
        &self,
        class_name: &str,
        object_id: &str,
    ) -> Option<JsonMap<String, JsonValue>> {
        self.states
            .lock()
            .unwrap()
            .get(&(class_name.to_string(), object_id.to_string()))
            .cloned()
    }

    pub fn clear(&self) {
        self.states.lock().unwrap().clear();
    }
}

impl ObjectDecoder for CachedObjectDecoder {
    fn from_json(&self, payload: ObjectPayload, override_cache: bool) -> ParseObject {
        let ObjectPayload { json, unset } = payload;
        let mut object = ParseObject::from_json_map(json);
        let Some(id) = object.id().map(str::to_string) else {
            return object;
        };
        let key = (object.class_name.clone(), id);

        let mut states = self.states.lock().unwrap();
        if !override_cache {
            if let Some(known) = states.get(&key) {
                let mut merged = known.clone();
                merged.extend(std::mem::take(&mut object.attributes));
                object.attributes = merged;
            }
        }
        for field in &unset {
            object.attributes.remove(field);
        }
        states.insert(key, object.attributes.clone());
        object
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: JsonValue) -> JsonMap<String, JsonValue> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn from_json_map_lifts_identity_fields() {
        let object = ParseObject::from_json_map(map(json!({
            "__type": "Object",
            "className": "GameScore",
            "objectId": "abc",
            "score": 5,
        })));
        assert_eq!(object.class_name(), "GameScore");
        assert_eq!(object.id(), Some("abc"));
        assert_eq!(object.get("score"), Some(&json!(5)));
        assert!(!object.has("__type"));
        assert_eq!(object.to_json()["objectId"], "abc");
    }

    #[test]
    fn merge_keeps_known_fields_and_drops_unset() {
        let decoder = CachedObjectDecoder::new();
        decoder.from_json(
            ObjectPayload::new(map(json!({
                "className": "GameScore", "objectId": "a", "score": 1, "name": "x", "level": 2,
            }))),
            true,
        );

        let merged = decoder.from_json(
            ObjectPayload {
                json: map(json!({ "className": "GameScore", "objectId": "a", "score": 2 })),
                unset: vec!["level".into()],
            },
            false,
        );

        assert_eq!(merged.get("score"), Some(&json!(2)));
        assert_eq!(merged.get("name"), Some(&json!("x")));
        assert!(!merged.has("level"));
    }

    #[test]
    fn override_discards_known_state() {
        let decoder = CachedObjectDecoder::new();
        decoder.from_json(
            ObjectPayload::new(map(json!({
                "className": "GameScore", "objectId": "a", "stale": true,
            }))),
            true,
        );

        let fresh = decoder.from_json(
            ObjectPayload::new(map(json!({ "className": "GameScore", "objectId": "a", "score": 9 }))),
            true,
        );

        assert!(!fresh.has("stale"));
        assert_eq!(
            decoder.cached_state("GameScore", "a"),
            Some(map(json!({ "score": 9 })))
        );
    }
}
