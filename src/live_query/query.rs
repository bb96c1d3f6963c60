use serde_json::{Map as JsonMap, Value as JsonValue};

use super::protocol::QueryFrame;

/// Fields the server always returns, whatever `keys` selection the query carries.
pub(crate) const RESERVED_FIELDS: [&str; 4] = ["objectId", "className", "createdAt", "updatedAt"];

/// The query a subscription listens to: a class, a `where` constraint and
/// optional field selection (`keys`) and trigger fields (`watch`).
#[derive(Clone, Debug, PartialEq)]
pub struct LiveQuery {
    class_name: String,
    where_clause: JsonMap<String, JsonValue>,
    keys: Option<Vec<String>>,
    watch: Option<Vec<String>>,
}

impl LiveQuery {
    pub fn new(class_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            where_clause: JsonMap::new(),
            keys: None,
            watch: None,
        }
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn where_clause(&self) -> &JsonMap<String, JsonValue> {
        &self.where_clause
    }

    /// Selected fields, when the query restricts the returned attributes.
    pub fn keys(&self) -> Option<&[String]> {
        self.keys.as_deref()
    }

    pub fn watched(&self) -> Option<&[String]> {
        self.watch.as_deref()
    }

    pub fn where_equal_to(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.where_clause.insert(key.into(), value.into());
        self
    }

    /// Replaces the whole `where` clause. Non-object values clear it.
    pub fn with_where(mut self, clause: JsonValue) -> Self {
        self.where_clause = match clause {
            JsonValue::Object(map) => map,
            _ => JsonMap::new(),
        };
        self
    }

    /// Restricts the attributes returned in events to `keys`.
    pub fn select<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keys
            .get_or_insert_with(Vec::new)
            .extend(keys.into_iter().map(Into::into));
        self
    }

    /// Only changes to these fields trigger `update` events.
    pub fn watch<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.watch
            .get_or_insert_with(Vec::new)
            .extend(fields.into_iter().map(Into::into));
        self
    }

    pub(crate) fn to_frame(&self) -> QueryFrame {
        QueryFrame {
            class_name: self.class_name.clone(),
            where_clause: self.where_clause.clone(),
            keys: self.keys.clone(),
            watch: self.watch.clone(),
        }
    }

    /// Drops attributes outside the selected keys. Queries without a selection keep everything.
    pub(crate) fn mask(&self, object: &mut JsonMap<String, JsonValue>) {
        if let Some(keys) = &self.keys {
            object.retain(|field, _| {
                RESERVED_FIELDS.contains(&field.as_str()) || keys.iter().any(|key| key == field)
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builder_accumulates_constraints() {
        let query = LiveQuery::new("GameScore")
            .where_equal_to("player", "Sean")
            .select(["score"])
            .select(["cheatMode"])
            .watch(["score"]);

        let frame = query.to_frame();
        assert_eq!(frame.class_name, "GameScore");
        assert_eq!(frame.where_clause["player"], "Sean");
        assert_eq!(
            frame.keys,
            Some(vec!["score".to_string(), "cheatMode".to_string()])
        );
        assert_eq!(frame.watch, Some(vec!["score".to_string()]));
    }

    #[test]
    fn mask_keeps_selected_and_reserved_fields() {
        let query = LiveQuery::new("GameScore").select(["score"]);
        let mut object = json!({
            "objectId": "a",
            "className": "GameScore",
            "updatedAt": "2024-01-01T00:00:00.000Z",
            "score": 3,
            "secret": true,
        })
        .as_object()
        .cloned()
        .unwrap();

        query.mask(&mut object);

        assert!(object.contains_key("score"));
        assert!(object.contains_key("objectId"));
        assert!(object.contains_key("updatedAt"));
        assert!(!object.contains_key("secret"));
    }

    #[test]
    fn unselected_queries_do_not_mask() {
        let query = LiveQuery::new("GameScore");
        let mut object = json!({ "secret": true }).as_object().cloned().unwrap();
        query.mask(&mut object);
        assert!(object.contains_key("secret"));
    }
}
