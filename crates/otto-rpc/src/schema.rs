//! JSON-type-level schemas for methods and notifications.
//!
//! Every handler declares its method table at construction; the registry
//! combines the tables into the introspection document and validates both
//! incoming params and handler returns against them. Optional fields render
//! with an `o:` prefix in the introspection output.

use std::collections::BTreeMap;

use serde_json::{json, Map, Value};
use uuid::Uuid;

/// JSON-level type of one field.
#[derive(Debug, Clone)]
pub enum Schema {
    Bool,
    Int,
    Uint,
    Double,
    String,
    Uuid,
    /// Any JSON object; used where the value is an open structure.
    Object,
    /// Any JSON value.
    Variant,
    Array(Box<Schema>),
    /// A named type from [`type_definitions`].
    Ref(&'static str),
}

/// One named field of a param or return object.
#[derive(Debug, Clone)]
pub struct Field {
    pub name: &'static str,
    pub schema: Schema,
    pub optional: bool,
}

impl Field {
    pub fn required(name: &'static str, schema: Schema) -> Self {
        Self {
            name,
            schema,
            optional: false,
        }
    }

    pub fn optional(name: &'static str, schema: Schema) -> Self {
        Self {
            name,
            schema,
            optional: true,
        }
    }
}

/// Declaration of one callable method.
#[derive(Debug, Clone)]
pub struct MethodDescriptor {
    pub name: &'static str,
    pub description: &'static str,
    pub params: Vec<Field>,
    pub returns: Vec<Field>,
}

/// Declaration of one notification a namespace can emit.
#[derive(Debug, Clone)]
pub struct NotificationDescriptor {
    pub name: &'static str,
    pub description: &'static str,
    pub params: Vec<Field>,
}

/// A named wire type: an enum of string values or an object shape.
#[derive(Debug, Clone)]
pub enum TypeDef {
    Enum(&'static [&'static str]),
    Object(Vec<Field>),
}

/// All named types referenced by `Schema::Ref`.
pub fn type_definitions() -> BTreeMap<&'static str, TypeDef> {
    let mut types = BTreeMap::new();
    types.insert(
        "RuleError",
        TypeDef::Enum(&[
            "NoError",
            "DuplicateId",
            "RuleNotFound",
            "DeviceNotFound",
            "EventTypeNotFound",
            "ActionTypeNotFound",
            "StateTypeNotFound",
            "InvalidRuleFormat",
            "InvalidStateEvaluatorValue",
            "InvalidTimeDescriptor",
            "InvalidTimeEventItem",
            "InvalidCalendarItem",
            "InvalidRepeatingOption",
            "InvalidRuleActionParameter",
            "TypesNotMatching",
            "NotExecutable",
            "NoExitActions",
            "ContainsEventBasedAction",
            "BackendError",
        ]),
    );
    types.insert(
        "UserError",
        TypeDef::Enum(&[
            "NoError",
            "InvalidUserId",
            "DuplicateUserId",
            "BadPassword",
            "TokenNotFound",
            "BackendError",
            "PermissionDenied",
        ]),
    );
    types.insert(
        "ConfigurationError",
        TypeDef::Enum(&[
            "NoError",
            "InvalidTimeZone",
            "InvalidStringLength",
            "InvalidLanguage",
            "InvalidPort",
            "InvalidHostAddress",
            "BackendError",
        ]),
    );
    types.insert(
        "TokenInfo",
        TypeDef::Object(vec![
            Field::required("id", Schema::Uuid),
            Field::required("username", Schema::String),
            Field::required("createdAt", Schema::String),
            Field::required("deviceName", Schema::String),
        ]),
    );
    types.insert(
        "ServerConfiguration",
        TypeDef::Object(vec![
            Field::required("id", Schema::String),
            Field::required("address", Schema::String),
            Field::required("port", Schema::Uint),
            Field::optional("sslEnabled", Schema::Bool),
            Field::optional("authenticationEnabled", Schema::Bool),
        ]),
    );
    types.insert(
        "RuleDescription",
        TypeDef::Object(vec![
            Field::required("id", Schema::Uuid),
            Field::required("name", Schema::String),
            Field::required("enabled", Schema::Bool),
            Field::required("active", Schema::Bool),
            Field::required("executable", Schema::Bool),
        ]),
    );
    // Rules are open structures; their exact shape is defined by the rule
    // storage format.
    types.insert("Rule", TypeDef::Object(vec![]));
    types
}

/// Validate a params/returns object against a field list.
pub fn validate_object(fields: &[Field], value: &Map<String, Value>) -> Result<(), String> {
    for field in fields {
        match value.get(field.name) {
            None if field.optional => {}
            None => return Err(format!("missing parameter '{}'", field.name)),
            Some(v) => validate_value(&field.schema, v)
                .map_err(|e| format!("parameter '{}': {e}", field.name))?,
        }
    }
    Ok(())
}

fn validate_value(schema: &Schema, value: &Value) -> Result<(), String> {
    match schema {
        Schema::Bool if value.is_boolean() => Ok(()),
        Schema::Int if value.is_i64() => Ok(()),
        Schema::Uint if value.is_u64() => Ok(()),
        Schema::Double if value.is_number() => Ok(()),
        Schema::String if value.is_string() => Ok(()),
        Schema::Uuid => match value.as_str().map(Uuid::parse_str) {
            Some(Ok(_)) => Ok(()),
            _ => Err("expected a uuid".to_string()),
        },
        Schema::Object if value.is_object() => Ok(()),
        Schema::Variant => Ok(()),
        Schema::Array(inner) => match value.as_array() {
            Some(items) => items.iter().try_for_each(|item| validate_value(inner, item)),
            None => Err("expected an array".to_string()),
        },
        Schema::Ref(name) => match type_definitions().get(name) {
            Some(TypeDef::Enum(values)) => match value.as_str() {
                Some(s) if values.contains(&s) => Ok(()),
                _ => Err(format!("expected one of the {name} values")),
            },
            Some(TypeDef::Object(fields)) => match value.as_object() {
                Some(map) => validate_object(fields, map),
                None => Err(format!("expected a {name} object")),
            },
            None => Err(format!("unknown type reference {name}")),
        },
        _ => Err(format!("expected {}", schema_name(schema))),
    }
}

fn schema_name(schema: &Schema) -> String {
    match schema {
        Schema::Bool => "Bool".to_string(),
        Schema::Int => "Int".to_string(),
        Schema::Uint => "Uint".to_string(),
        Schema::Double => "Double".to_string(),
        Schema::String => "String".to_string(),
        Schema::Uuid => "Uuid".to_string(),
        Schema::Object => "Object".to_string(),
        Schema::Variant => "Variant".to_string(),
        Schema::Array(inner) => format!("[{}]", schema_name(inner)),
        Schema::Ref(name) => format!("$ref:{name}"),
    }
}

fn render_schema(schema: &Schema) -> Value {
    match schema {
        Schema::Array(inner) => json!([render_schema(inner)]),
        other => Value::String(schema_name(other)),
    }
}

fn render_fields(fields: &[Field]) -> Value {
    let mut map = Map::new();
    for field in fields {
        let key = if field.optional {
            format!("o:{}", field.name)
        } else {
            field.name.to_string()
        };
        map.insert(key, render_schema(&field.schema));
    }
    Value::Object(map)
}

/// Build the introspection document from all registered handlers' tables.
pub fn introspection_document<'a>(
    handlers: impl Iterator<Item = (&'a str, &'a [MethodDescriptor], &'a [NotificationDescriptor])>,
) -> Value {
    let mut methods = Map::new();
    let mut notifications = Map::new();

    for (namespace, handler_methods, handler_notifications) in handlers {
        for method in handler_methods {
            methods.insert(
                format!("{namespace}.{}", method.name),
                json!({
                    "description": method.description,
                    "params": render_fields(&method.params),
                    "returns": render_fields(&method.returns),
                }),
            );
        }
        for notification in handler_notifications {
            notifications.insert(
                format!("{namespace}.{}", notification.name),
                json!({
                    "description": notification.description,
                    "params": render_fields(&notification.params),
                }),
            );
        }
    }

    let mut types = Map::new();
    for (name, def) in type_definitions() {
        let rendered = match def {
            TypeDef::Enum(values) => json!(values),
            TypeDef::Object(fields) => render_fields(&fields),
        };
        types.insert(name.to_string(), rendered);
    }

    json!({
        "types": types,
        "methods": methods,
        "notifications": notifications,
    })
}
