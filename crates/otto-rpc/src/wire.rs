//! The JSON wire envelope: one JSON object per message.

use serde_json::{json, Map, Value};

/// Protocol version spoken by this server.
pub const JSON_PROTOCOL_VERSION: &str = "1.0";

/// A parsed request envelope.
#[derive(Debug)]
pub struct Request {
    pub id: i32,
    pub namespace: String,
    pub method: String,
    pub params: Map<String, Value>,
    pub token: Option<String>,
}

/// Envelope-level parse failures; `id` is what could be salvaged.
#[derive(Debug)]
pub struct RequestError {
    pub id: i32,
    pub message: String,
}

impl Request {
    /// Parse one frame. Errors carry the partially parsed id, or -1 when
    /// even that is unavailable.
    pub fn parse(data: &str) -> Result<Request, RequestError> {
        let value: Value = serde_json::from_str(data).map_err(|e| RequestError {
            id: -1,
            message: format!("Failed to parse JSON data: {e}"),
        })?;

        let id = value.get("id").and_then(Value::as_i64);
        let Some(id) = id.and_then(|id| i32::try_from(id).ok()) else {
            return Err(RequestError {
                id: -1,
                message: "Error parsing command. Missing 'id'".to_string(),
            });
        };

        let method = value.get("method").and_then(Value::as_str).unwrap_or("");
        let mut parts = method.split('.');
        let (Some(namespace), Some(method), None) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(RequestError {
                id,
                message: format!(
                    "Error parsing method. Got: '{}', expected: 'Namespace.Method'",
                    value.get("method").and_then(Value::as_str).unwrap_or("")
                ),
            });
        };
        if namespace.is_empty() || method.is_empty() {
            return Err(RequestError {
                id,
                message: "Error parsing method. Empty namespace or method".to_string(),
            });
        }

        let params = match value.get("params") {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(map)) => map.clone(),
            Some(_) => {
                return Err(RequestError {
                    id,
                    message: "Invalid params: expected an object".to_string(),
                })
            }
        };

        let token = value
            .get("token")
            .and_then(Value::as_str)
            .map(str::to_string);

        Ok(Request {
            id,
            namespace: namespace.to_string(),
            method: method.to_string(),
            params,
            token,
        })
    }
}

pub fn success_response(id: i32, params: Value) -> String {
    json!({"id": id, "status": "success", "params": params}).to_string()
}

pub fn error_response(id: i32, error: &str) -> String {
    json!({"id": id, "status": "error", "error": error}).to_string()
}

pub fn unauthorized_response(id: i32, error: &str) -> String {
    json!({"id": id, "status": "unauthorized", "error": error}).to_string()
}

pub fn notification_message(id: i32, name: &str, params: Value) -> String {
    json!({"id": id, "notification": name, "params": params}).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_full_request() {
        let request = Request::parse(
            r#"{"id": 7, "method": "Rules.GetRules", "params": {}, "token": "abc"}"#,
        )
        .unwrap();
        assert_eq!(request.id, 7);
        assert_eq!(request.namespace, "Rules");
        assert_eq!(request.method, "GetRules");
        assert_eq!(request.token.as_deref(), Some("abc"));
    }

    #[test]
    fn params_are_optional() {
        let request = Request::parse(r#"{"id": 1, "method": "JSONRPC.Hello"}"#).unwrap();
        assert!(request.params.is_empty());
        assert!(request.token.is_none());
    }

    #[test]
    fn broken_json_reports_id_minus_one() {
        let err = Request::parse("{nope").unwrap_err();
        assert_eq!(err.id, -1);
    }

    #[test]
    fn missing_id_is_an_error() {
        let err = Request::parse(r#"{"method": "JSONRPC.Hello"}"#).unwrap_err();
        assert_eq!(err.id, -1);
    }

    #[test]
    fn malformed_method_keeps_the_id() {
        let err = Request::parse(r#"{"id": 3, "method": "NoDotHere"}"#).unwrap_err();
        assert_eq!(err.id, 3);
        assert!(err.message.contains("Namespace.Method"));

        let err = Request::parse(r#"{"id": 4, "method": "Too.Many.Dots"}"#).unwrap_err();
        assert_eq!(err.id, 4);
    }

    #[test]
    fn responses_are_single_json_objects() {
        let response = success_response(5, json!({"x": 1}));
        let value: Value = serde_json::from_str(&response).unwrap();
        assert_eq!(value["status"], "success");
        assert_eq!(value["params"]["x"], 1);

        let value: Value =
            serde_json::from_str(&unauthorized_response(5, "Forbidden: Invalid token."))
                .unwrap();
        assert_eq!(value["status"], "unauthorized");
    }
}
