// Query and command builders for the local adapter API.

use std::fmt;

use serde_json::{Map, Value, json};

/// Envelope key wrapping every outgoing command.
pub const COMMAND_KEY: &str = "c";
/// Envelope key wrapping every successful response.
pub const RESPONSE_KEY: &str = "r";

/// Ordered attribute scope, e.g. `["indoorUnit", "status"]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryPath(Vec<String>);

impl QueryPath {
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// `{"c":{"seg0":{"seg1":{}}}}`
    pub fn to_query(&self) -> Value {
        self.wrap(Value::Object(Map::new()))
    }

    /// The path query with the innermost `{}` replaced by `{"<attribute>":{}}`.
    pub fn attribute_query(&self, attribute: &str) -> Value {
        let mut leaf = Map::new();
        leaf.insert(attribute.to_owned(), Value::Object(Map::new()));
        self.wrap(Value::Object(leaf))
    }

    /// The path query carrying `value` at the innermost level, used for writes.
    pub fn command(&self, value: Value) -> Value {
        self.wrap(value)
    }

    /// The value at this path under the `r` envelope of a response.
    pub fn extract<'a>(&self, response: &'a Value) -> Option<&'a Value> {
        self.0
            .iter()
            .try_fold(response.get(RESPONSE_KEY)?, |node, segment| node.get(segment))
    }

    fn wrap(&self, leaf: Value) -> Value {
        let inner = self.0.iter().rev().fold(leaf, |acc, segment| {
            let mut level = Map::new();
            level.insert(segment.clone(), acc);
            Value::Object(level)
        });
        let mut envelope = Map::new();
        envelope.insert(COMMAND_KEY.to_owned(), inner);
        Value::Object(envelope)
    }
}

impl fmt::Display for QueryPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("."))
    }
}

/// `{"c":{"adapter":{"status":{"runState":"reboot"}}}}`
pub fn reboot_command() -> Value {
    QueryPath::new(["adapter", "status"]).command(json!({ "runState": "reboot" }))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn builds_nested_query() {
        let path = QueryPath::new(["indoorUnit", "status"]);
        assert_eq!(
            serde_json::to_string(&path.to_query()).unwrap(),
            r#"{"c":{"indoorUnit":{"status":{}}}}"#
        );
        assert_eq!(path.to_string(), "indoorUnit.status");
    }

    #[test]
    fn attribute_query_replaces_innermost_level() {
        let path = QueryPath::new(["sensors", "0"]);
        assert_eq!(
            serde_json::to_string(&path.attribute_query("humidity")).unwrap(),
            r#"{"c":{"sensors":{"0":{"humidity":{}}}}}"#
        );
    }

    #[test]
    fn reboot_command_shape() {
        assert_eq!(
            serde_json::to_string(&reboot_command()).unwrap(),
            r#"{"c":{"adapter":{"status":{"runState":"reboot"}}}}"#
        );
    }

    #[test]
    fn extracts_under_response_envelope() {
        let path = QueryPath::new(["indoorUnit", "status"]);
        let response = json!({ "r": { "indoorUnit": { "status": { "mode": "heat" } } } });
        assert_eq!(path.extract(&response), Some(&json!({ "mode": "heat" })));
        assert_eq!(path.extract(&json!({ "_api_error": "serializer_error" })), None);
        assert_eq!(
            QueryPath::new(["adapter", "status"]).extract(&response),
            None
        );
    }
}
