//! Phase configuration data
//!
//! Every phase method declares a static table of [`FieldSpec`]s. The same
//! table drives normalization of user input, (de)serialization of the
//! resolved data into the workdir and the method's command line options.

use crate::core::error::{Error, Result};
use crate::core::names::safe_name;
use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;

/// Order given to phases which do not declare one
pub const DEFAULT_ORDER: i64 = 50;

/// Keys shared by every phase, handled outside the field tables
pub const COMMON_KEYS: &[&str] = &["name", "how", "order", "summary", "where"];

/// Storage shape of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Flag,
    Integer,
    Text,
    List,
    /// Structured value kept as-is, not exposed on the command line
    Data,
}

/// Normalized value of a single field
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Unset,
    Flag(bool),
    Integer(i64),
    Text(String),
    List(Vec<String>),
    Data(Value),
}

/// Custom normalizer: field key and raw user value in, normalized value out
pub type Normalizer = fn(&str, &Value) -> Result<FieldValue>;

/// Declarative description of one phase field
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    /// Key in the plan metadata and in the persisted data
    pub key: &'static str,
    /// Long command line option (without dashes)
    pub option: &'static str,
    pub short: Option<char>,
    pub metavar: &'static str,
    pub help: &'static str,
    pub kind: FieldKind,
    pub default: fn() -> FieldValue,
    /// Overrides the kind-based normalization when set
    pub normalize: Option<Normalizer>,
}

fn unset() -> FieldValue {
    FieldValue::Unset
}

fn no() -> FieldValue {
    FieldValue::Flag(false)
}

fn empty_list() -> FieldValue {
    FieldValue::List(Vec::new())
}

impl FieldSpec {
    pub const fn new(key: &'static str, kind: FieldKind, help: &'static str) -> Self {
        let default: fn() -> FieldValue = match kind {
            FieldKind::Flag => no,
            FieldKind::List => empty_list,
            _ => unset,
        };
        Self {
            key,
            option: key,
            short: None,
            metavar: "",
            help,
            kind,
            default,
            normalize: None,
        }
    }

    pub const fn flag(key: &'static str, help: &'static str) -> Self {
        Self::new(key, FieldKind::Flag, help)
    }

    pub const fn integer(key: &'static str, help: &'static str) -> Self {
        Self::new(key, FieldKind::Integer, help)
    }

    pub const fn text(key: &'static str, help: &'static str) -> Self {
        Self::new(key, FieldKind::Text, help)
    }

    pub const fn list(key: &'static str, help: &'static str) -> Self {
        Self::new(key, FieldKind::List, help)
    }

    pub const fn data(key: &'static str, help: &'static str) -> Self {
        Self::new(key, FieldKind::Data, help)
    }

    pub const fn with_short(self, short: char) -> Self {
        Self {
            short: Some(short),
            ..self
        }
    }

    pub const fn with_option(self, option: &'static str) -> Self {
        Self { option, ..self }
    }

    pub const fn with_metavar(self, metavar: &'static str) -> Self {
        Self { metavar, ..self }
    }

    pub const fn with_default(self, default: fn() -> FieldValue) -> Self {
        Self { default, ..self }
    }

    pub const fn with_normalizer(self, normalize: Normalizer) -> Self {
        Self {
            normalize: Some(normalize),
            ..self
        }
    }

    /// Whether the field gets a command line option
    pub fn is_cli_option(&self) -> bool {
        self.kind != FieldKind::Data
    }

    /// Turn raw user input into the normalized value
    pub fn normalize_value(&self, raw: &Value) -> Result<FieldValue> {
        if let Some(normalize) = self.normalize {
            return normalize(self.key, raw);
        }
        if raw.is_null() {
            return Ok((self.default)());
        }
        match self.kind {
            FieldKind::Flag => match raw {
                Value::Bool(b) => Ok(FieldValue::Flag(*b)),
                _ => Err(self.invalid(raw, "a boolean")),
            },
            FieldKind::Integer => match raw {
                Value::Number(n) => n
                    .as_i64()
                    .map(FieldValue::Integer)
                    .ok_or_else(|| self.invalid(raw, "an integer")),
                Value::String(s) => s
                    .trim()
                    .parse::<i64>()
                    .map(FieldValue::Integer)
                    .map_err(|_| self.invalid(raw, "an integer")),
                _ => Err(self.invalid(raw, "an integer")),
            },
            FieldKind::Text => scalar_to_string(raw)
                .map(FieldValue::Text)
                .ok_or_else(|| self.invalid(raw, "a string")),
            FieldKind::List => match raw {
                Value::Sequence(items) => items
                    .iter()
                    .map(|item| scalar_to_string(item).ok_or_else(|| self.invalid(raw, "a list of strings")))
                    .collect::<Result<Vec<_>>>()
                    .map(FieldValue::List),
                other => scalar_to_string(other)
                    .map(|s| FieldValue::List(vec![s]))
                    .ok_or_else(|| self.invalid(raw, "a string or a list of strings")),
            },
            FieldKind::Data => Ok(FieldValue::Data(raw.clone())),
        }
    }

    /// Convert a normalized value into a plain storage value
    pub fn serialize_value(&self, value: &FieldValue) -> Value {
        match value {
            FieldValue::Unset => Value::Null,
            FieldValue::Flag(b) => Value::Bool(*b),
            FieldValue::Integer(i) => Value::Number((*i).into()),
            FieldValue::Text(s) => Value::String(s.clone()),
            FieldValue::List(items) => {
                Value::Sequence(items.iter().map(|s| Value::String(s.clone())).collect())
            }
            FieldValue::Data(v) => v.clone(),
        }
    }

    /// Strict inverse of [`FieldSpec::serialize_value`]
    pub fn unserialize_value(&self, stored: &Value) -> Result<FieldValue> {
        if stored.is_null() {
            return Ok(FieldValue::Unset);
        }
        match (self.kind, stored) {
            (FieldKind::Flag, Value::Bool(b)) => Ok(FieldValue::Flag(*b)),
            (FieldKind::Integer, Value::Number(n)) => n
                .as_i64()
                .map(FieldValue::Integer)
                .ok_or_else(|| self.corrupted(stored)),
            (FieldKind::Text, Value::String(s)) => Ok(FieldValue::Text(s.clone())),
            (FieldKind::List, Value::Sequence(items)) => items
                .iter()
                .map(|item| match item {
                    Value::String(s) => Ok(s.clone()),
                    _ => Err(self.corrupted(stored)),
                })
                .collect::<Result<Vec<_>>>()
                .map(FieldValue::List),
            (FieldKind::Data, value) => Ok(FieldValue::Data(value.clone())),
            _ => Err(self.corrupted(stored)),
        }
    }

    fn invalid(&self, raw: &Value, expected: &str) -> Error {
        Error::specification(format!(
            "Field '{}' must be {}, got '{}'.",
            self.key,
            expected,
            render_scalar(raw)
        ))
    }

    fn corrupted(&self, stored: &Value) -> Error {
        Error::general(format!(
            "Stored value of field '{}' is corrupted: '{}'.",
            self.key,
            render_scalar(stored)
        ))
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn render_scalar(value: &Value) -> String {
    scalar_to_string(value).unwrap_or_else(|| {
        serde_yaml::to_string(value)
            .map(|s| s.trim().to_string())
            .unwrap_or_default()
    })
}

/// Resolved configuration of one phase
#[derive(Debug, Clone, PartialEq)]
pub struct StepData {
    /// Phase name, unique within its step
    pub name: String,
    /// Full name of the resolved method
    pub how: String,
    pub order: i64,
    pub summary: Option<String>,
    /// Guest names or roles the phase is limited to (empty means all)
    pub where_: Vec<String>,
    pub fields: BTreeMap<String, FieldValue>,
}

impl StepData {
    /// Phase data with every field at its default
    pub fn defaults(name: &str, how: &str, fields: &[FieldSpec]) -> Self {
        Self {
            name: name.to_string(),
            how: how.to_string(),
            order: DEFAULT_ORDER,
            summary: None,
            where_: Vec::new(),
            fields: fields
                .iter()
                .map(|f| (f.key.to_string(), (f.default)()))
                .collect(),
        }
    }

    /// Normalize raw user configuration for the resolved method
    ///
    /// `how` is the resolved method name, which is what gets recorded,
    /// not the prefix the user typed.
    pub fn normalize(raw: &Mapping, default_name: &str, how: &str, fields: &[FieldSpec]) -> Result<Self> {
        let mut data = Self::defaults(default_name, how, fields);

        for (key, value) in raw {
            let key = key
                .as_str()
                .ok_or_else(|| Error::specification("Phase keys must be strings."))?;
            match key {
                "how" => {}
                "name" => {
                    data.name = scalar_to_string(value)
                        .ok_or_else(|| Error::specification("Phase 'name' must be a string."))?;
                }
                "order" => {
                    data.order = value
                        .as_i64()
                        .ok_or_else(|| Error::specification("Phase 'order' must be an integer."))?;
                }
                "summary" => data.summary = scalar_to_string(value),
                "where" => {
                    data.where_ = match FieldSpec::list("where", "").normalize_value(value)? {
                        FieldValue::List(items) => items,
                        _ => Vec::new(),
                    };
                }
                other => {
                    let field = fields.iter().find(|f| f.key == other).ok_or_else(|| {
                        Error::specification(format!(
                            "Unknown key '{}' for method '{}' in phase '{}'.",
                            other, how, data.name
                        ))
                    })?;
                    let normalized = field.normalize_value(value).map_err(|e| {
                        e.wrap(
                            crate::core::error::ErrorKind::Specification,
                            format!("Invalid configuration of phase '{}'.", data.name),
                        )
                    })?;
                    data.fields.insert(field.key.to_string(), normalized);
                }
            }
        }

        Ok(data)
    }

    /// Plain storage representation
    pub fn serialize(&self, fields: &[FieldSpec]) -> Mapping {
        let mut map = Mapping::new();
        map.insert("name".into(), Value::String(self.name.clone()));
        map.insert("how".into(), Value::String(self.how.clone()));
        map.insert("order".into(), Value::Number(self.order.into()));
        map.insert(
            "summary".into(),
            self.summary.clone().map(Value::String).unwrap_or(Value::Null),
        );
        map.insert(
            "where".into(),
            Value::Sequence(self.where_.iter().cloned().map(Value::String).collect()),
        );
        for field in fields {
            let value = self
                .fields
                .get(field.key)
                .cloned()
                .unwrap_or_else(|| (field.default)());
            map.insert(field.key.into(), field.serialize_value(&value));
        }
        map
    }

    /// Rebuild data from its storage representation
    pub fn unserialize(stored: &Mapping, fields: &[FieldSpec]) -> Result<Self> {
        let text = |key: &str| -> Result<String> {
            stored
                .get(key)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| Error::general(format!("Stored phase data lacks '{}'.", key)))
        };
        let name = text("name")?;
        let how = text("how")?;
        let mut data = Self::defaults(&name, &how, fields);
        data.order = stored
            .get("order")
            .and_then(Value::as_i64)
            .unwrap_or(DEFAULT_ORDER);
        data.summary = stored
            .get("summary")
            .and_then(Value::as_str)
            .map(str::to_string);
        if let Some(Value::Sequence(items)) = stored.get("where") {
            data.where_ = items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect();
        }
        for field in fields {
            if let Some(value) = stored.get(field.key) {
                data.fields
                    .insert(field.key.to_string(), field.unserialize_value(value)?);
            }
        }
        Ok(data)
    }

    pub fn set(&mut self, key: &str, value: FieldValue) {
        self.fields.insert(key.to_string(), value);
    }

    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.fields.get(key)
    }

    pub fn flag(&self, key: &str) -> bool {
        matches!(self.fields.get(key), Some(FieldValue::Flag(true)))
    }

    pub fn integer(&self, key: &str) -> Option<i64> {
        match self.fields.get(key) {
            Some(FieldValue::Integer(i)) => Some(*i),
            _ => None,
        }
    }

    pub fn text(&self, key: &str) -> Option<&str> {
        match self.fields.get(key) {
            Some(FieldValue::Text(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn list(&self, key: &str) -> &[String] {
        match self.fields.get(key) {
            Some(FieldValue::List(items)) => items.as_slice(),
            _ => &[],
        }
    }

    pub fn value(&self, key: &str) -> Option<&Value> {
        match self.fields.get(key) {
            Some(FieldValue::Data(v)) => Some(v),
            _ => None,
        }
    }

    /// Phase name usable in file names
    pub fn safe_name(&self) -> String {
        safe_name(&self.name)
    }

    /// Whether the phase should act on a guest with this name and role
    pub fn applies_to(&self, guest_name: &str, guest_role: Option<&str>) -> bool {
        self.where_.is_empty()
            || self
                .where_
                .iter()
                .any(|w| w == guest_name || Some(w.as_str()) == guest_role)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn five_minutes() -> FieldValue {
        FieldValue::Text("5m".to_string())
    }

    const FIELDS: &[FieldSpec] = &[
        FieldSpec::list("script", "Shell script to be executed.").with_short('s'),
        FieldSpec::flag("install-build-require", "Install build requirements."),
        FieldSpec::integer("port", "Port to connect to."),
        FieldSpec::text("duration", "Timeout.").with_default(five_minutes),
        FieldSpec::text("file", "Output file."),
        FieldSpec::data("tests", "Inline tests."),
    ];

    fn mapping(yaml: &str) -> Mapping {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_defaults_follow_field_kinds() {
        let data = StepData::defaults("default-0", "shell", FIELDS);
        assert_eq!(data.list("script"), &[] as &[String]);
        assert!(!data.flag("install-build-require"));
        assert_eq!(data.integer("port"), None);
        assert_eq!(data.text("duration"), Some("5m"));
        assert_eq!(data.get("file"), Some(&FieldValue::Unset));
        assert_eq!(data.order, DEFAULT_ORDER);
    }

    #[test]
    fn test_normalize_single_script_into_list() {
        let raw = mapping("how: sh\nname: setup\nscript: echo hi\nport: '22'\norder: 10");
        let data = StepData::normalize(&raw, "default-0", "shell", FIELDS).unwrap();

        assert_eq!(data.name, "setup");
        assert_eq!(data.how, "shell");
        assert_eq!(data.order, 10);
        assert_eq!(data.list("script"), &["echo hi".to_string()]);
        assert_eq!(data.integer("port"), Some(22));
    }

    #[test]
    fn test_normalize_rejects_unknown_key() {
        let raw = mapping("how: shell\nscirpt: echo hi");
        let err = StepData::normalize(&raw, "default-0", "shell", FIELDS).unwrap_err();
        assert_eq!(err.kind(), crate::core::error::ErrorKind::Specification);
        assert!(err.message().contains("scirpt"));
    }

    #[test]
    fn test_normalize_rejects_wrong_type() {
        let raw = mapping("install-build-require: maybe");
        let err = StepData::normalize(&raw, "default-0", "distgit", FIELDS).unwrap_err();
        assert_eq!(err.kind(), crate::core::error::ErrorKind::Specification);
    }

    #[test]
    fn test_serialize_round_trip() {
        let raw = mapping(
            r#"
name: build
summary: Build the thing
where: [client]
script: ["make", "make check"]
install-build-require: true
port: 2222
file: out.xml
tests:
  - name: /smoke
    test: ./run.sh
"#,
        );
        let data = StepData::normalize(&raw, "default-0", "distgit", FIELDS).unwrap();
        let stored = data.serialize(FIELDS);
        let restored = StepData::unserialize(&stored, FIELDS).unwrap();
        assert_eq!(restored, data);

        // and the stored form survives a trip through YAML text
        let text = serde_yaml::to_string(&stored).unwrap();
        let reparsed: Mapping = serde_yaml::from_str(&text).unwrap();
        assert_eq!(reparsed, stored);
    }

    #[test]
    fn test_serialize_produces_plain_values() {
        let data = StepData::defaults("default-0", "shell", FIELDS);
        let stored = data.serialize(FIELDS);
        for (_, value) in &stored {
            assert!(!matches!(value, Value::Tagged(_)));
        }
        assert_eq!(stored.get("file"), Some(&Value::Null));
        assert_eq!(StepData::unserialize(&stored, FIELDS).unwrap(), data);
    }

    #[test]
    fn test_unset_data_field_round_trip() {
        let data = StepData::defaults("default-0", "shell", FIELDS);
        assert_eq!(data.get("tests"), Some(&FieldValue::Unset));

        let stored = data.serialize(FIELDS);
        assert_eq!(stored.get("tests"), Some(&Value::Null));
        let restored = StepData::unserialize(&stored, FIELDS).unwrap();
        assert_eq!(restored.get("tests"), Some(&FieldValue::Unset));
        assert_eq!(restored.value("tests"), None);
    }

    #[test]
    fn test_applies_to_where() {
        let mut data = StepData::defaults("default-0", "shell", FIELDS);
        assert!(data.applies_to("anything", None));

        data.where_ = vec!["server".to_string()];
        assert!(data.applies_to("guest-1", Some("server")));
        assert!(data.applies_to("server", None));
        assert!(!data.applies_to("guest-2", Some("client")));
    }
}
