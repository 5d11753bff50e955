use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Primitive type an argument may be declared with.
///
/// An `ArgSpec` without a declared type accepts any primitive.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ArgType {
    String,
    Number,
    Boolean,
}

impl ArgType {
    /// Wire name used in configuration documents and error messages.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ArgType::String => "string",
            ArgType::Number => "number",
            ArgType::Boolean => "boolean",
        }
    }
}

impl std::fmt::Display for ArgType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A client-supplied argument value.
///
/// Only JSON primitives are representable; arrays, objects and `null`
/// never reach the invocation builder.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    String(String),
    Number(serde_json::Number),
    Boolean(bool),
}

impl ArgValue {
    /// Convert a JSON value into an argument value.
    ///
    /// # Errors
    ///
    /// Returns the JSON kind name (`"object"`, `"array"`, `"null"`) when the
    /// value is not a primitive.
    pub fn from_json(value: &Value) -> Result<Self, &'static str> {
        match value {
            Value::String(s) => Ok(ArgValue::String(s.clone())),
            Value::Number(n) => Ok(ArgValue::Number(n.clone())),
            Value::Bool(b) => Ok(ArgValue::Boolean(*b)),
            Value::Array(_) => Err("array"),
            Value::Object(_) => Err("object"),
            Value::Null => Err("null"),
        }
    }

    /// Runtime type of this value.
    #[must_use]
    pub fn arg_type(&self) -> ArgType {
        match self {
            ArgValue::String(_) => ArgType::String,
            ArgValue::Number(_) => ArgType::Number,
            ArgValue::Boolean(_) => ArgType::Boolean,
        }
    }

    /// Render the value as a single positional argument.
    ///
    /// Integral floats drop their fraction (`3.0` renders as `3`).
    #[must_use]
    pub fn to_arg(&self) -> String {
        match self {
            ArgValue::String(s) => s.clone(),
            ArgValue::Boolean(b) => b.to_string(),
            ArgValue::Number(n) => match n.as_f64() {
                Some(f) if n.is_f64() && f.fract() == 0.0 && f.abs() < 1e15 => {
                    format!("{f:.0}")
                }
                _ => n.to_string(),
            },
        }
    }
}

/// Inbound message: one command request per WebSocket text frame.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommandRequest {
    #[serde(
        default,
        deserialize_with = "command_name_from_json",
        skip_serializing_if = "Option::is_none"
    )]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Map<String, Value>>,
}

/// Scalar names are taken as their text (`5` looks up command `"5"`).
/// `null`, `false`, zero and composites name no command.
fn command_name_from_json<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(name) => Some(name),
        Value::Number(n) if n.as_f64().is_some_and(|f| f.abs() > 0.0) => Some(n.to_string()),
        Value::Bool(true) => Some("true".to_string()),
        Value::Null | Value::Bool(false) | Value::Number(_) | Value::Array(_) | Value::Object(_) => {
            None
        }
    })
}

impl CommandRequest {
    /// Decode a raw text payload.
    ///
    /// # Errors
    ///
    /// Returns an error when the payload is not a JSON object of the
    /// expected shape.
    pub fn decode(payload: &str) -> serde_json::Result<Self> {
        serde_json::from_str(payload)
    }

    /// The command name, if present and non-empty.
    #[must_use]
    pub fn command_name(&self) -> Option<&str> {
        self.command.as_deref().filter(|name| !name.is_empty())
    }
}

/// Status tag of an outbound event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Running,
    Success,
    Error,
}

/// Outbound message: one per status event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutboundEvent {
    pub status: EventStatus,
    pub msg: String,
}

impl OutboundEvent {
    pub fn running(msg: impl Into<String>) -> Self {
        Self {
            status: EventStatus::Running,
            msg: msg.into(),
        }
    }

    #[must_use]
    pub fn success() -> Self {
        Self {
            status: EventStatus::Success,
            msg: String::new(),
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            status: EventStatus::Error,
            msg: msg.into(),
        }
    }

    /// Encode as a JSON text frame.
    #[must_use]
    pub fn encode(&self) -> String {
        // Serialising two plain fields cannot fail; fall back to a fixed
        // error frame rather than panicking.
        serde_json::to_string(self)
            .unwrap_or_else(|_| r#"{"status":"error","msg":""}"#.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn arg_type_wire_names() {
        let cases = [
            (ArgType::String, "\"string\""),
            (ArgType::Number, "\"number\""),
            (ArgType::Boolean, "\"boolean\""),
        ];
        for (variant, expected_json) in &cases {
            let json = serde_json::to_string(variant).unwrap();
            assert_eq!(&json, expected_json);
        }
    }

    #[test]
    fn arg_type_rejects_unknown_names() {
        assert!(serde_json::from_str::<ArgType>("\"object\"").is_err());
        assert!(serde_json::from_str::<ArgType>("\"String\"").is_err());
    }

    #[test]
    fn arg_value_from_json_primitives() {
        assert_eq!(
            ArgValue::from_json(&json!("hi")),
            Ok(ArgValue::String("hi".to_string()))
        );
        assert_eq!(ArgValue::from_json(&json!(true)), Ok(ArgValue::Boolean(true)));
        assert_eq!(
            ArgValue::from_json(&json!(7)).map(|v| v.arg_type()),
            Ok(ArgType::Number)
        );
    }

    #[test]
    fn arg_value_from_json_rejects_composites() {
        assert_eq!(ArgValue::from_json(&json!([1, 2])), Err("array"));
        assert_eq!(ArgValue::from_json(&json!({"a": 1})), Err("object"));
        assert_eq!(ArgValue::from_json(&Value::Null), Err("null"));
    }

    #[test]
    fn arg_value_rendering() {
        let render = |v: Value| ArgValue::from_json(&v).unwrap().to_arg();
        assert_eq!(render(json!("a b")), "a b");
        assert_eq!(render(json!(false)), "false");
        assert_eq!(render(json!(42)), "42");
        assert_eq!(render(json!(-3)), "-3");
        assert_eq!(render(json!(3.0)), "3");
        assert_eq!(render(json!(1.5)), "1.5");
    }

    #[test]
    fn command_request_decodes_full_envelope() {
        let req = CommandRequest::decode(r#"{"command":"echo","args":{"text":"hi"}}"#).unwrap();
        assert_eq!(req.command_name(), Some("echo"));
        assert_eq!(req.args.unwrap()["text"], json!("hi"));
    }

    #[test]
    fn command_request_without_command() {
        let req = CommandRequest::decode(r#"{"args":{}}"#).unwrap();
        assert_eq!(req.command_name(), None);

        let req = CommandRequest::decode(r#"{"command":""}"#).unwrap();
        assert_eq!(req.command_name(), None);
    }

    #[test]
    fn command_request_rejects_garbage() {
        assert!(CommandRequest::decode("not json").is_err());
        assert!(CommandRequest::decode("[1,2,3]").is_err());
        assert!(CommandRequest::decode(r#"{"args":[1]}"#).is_err());
    }

    #[test]
    fn scalar_command_names_are_taken_as_text() {
        let name = |payload: &str| {
            CommandRequest::decode(payload)
                .unwrap()
                .command_name()
                .map(str::to_string)
        };
        assert_eq!(name(r#"{"command":5}"#).as_deref(), Some("5"));
        assert_eq!(name(r#"{"command":1.5}"#).as_deref(), Some("1.5"));
        assert_eq!(name(r#"{"command":true}"#).as_deref(), Some("true"));
        assert_eq!(name(r#"{"command":0}"#), None);
        assert_eq!(name(r#"{"command":false}"#), None);
        assert_eq!(name(r#"{"command":null}"#), None);
        assert_eq!(name(r#"{"command":["echo"]}"#), None);
        assert_eq!(name(r#"{"command":{"name":"echo"}}"#), None);
    }

    #[test]
    fn outbound_event_encoding() {
        assert_eq!(
            OutboundEvent::running("hi").encode(),
            r#"{"status":"running","msg":"hi"}"#
        );
        assert_eq!(OutboundEvent::success().encode(), r#"{"status":"success","msg":""}"#);
        assert_eq!(
            OutboundEvent::error("bad").encode(),
            r#"{"status":"error","msg":"bad"}"#
        );
    }
}
