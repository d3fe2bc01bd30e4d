use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::capability::CapabilityError;

/// Primitive argument value inferred from a raw protocol token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Integer(i64),
    Float(f64),
    Boolean(bool),
    String(String),
}

/// Type tag for [`Value`], used by capability parameter declarations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    Integer,
    Float,
    Boolean,
    String,
}

impl ValueKind {
    pub fn json_type(&self) -> &'static str {
        match self {
            Self::Integer => "integer",
            Self::Float => "number",
            Self::Boolean => "boolean",
            Self::String => "string",
        }
    }
}

/// Canonical text form: [`coerce`] of the printed value gives the value back.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer(value) => write!(f, "{value}"),
            // Debug keeps a trailing `.0` so the text coerces back to a float.
            Self::Float(value) => write!(f, "{value:?}"),
            Self::Boolean(value) => write!(f, "{value}"),
            Self::String(value) if needs_quotes(value) => write!(f, "'{value}'"),
            Self::String(value) => f.write_str(value),
        }
    }
}

/// Whether the bare text would coerce to something other than itself: a
/// number, a boolean, padded text or text wrapped in quotes.
fn needs_quotes(text: &str) -> bool {
    !matches!(coerce(text), Value::String(ref coerced) if coerced == text)
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

/// Infers a [`Value`] from a raw argument token.
///
/// Tries integer, then float, then `true`/`false` (any case). Anything else
/// becomes a string with one layer of matching quotes removed. Never fails.
pub fn coerce(raw: &str) -> Value {
    let token = raw.trim();
    if let Ok(value) = token.parse::<i64>() {
        return Value::Integer(value);
    }
    if let Ok(value) = token.parse::<f64>() {
        return Value::Float(value);
    }
    if token.eq_ignore_ascii_case("true") {
        return Value::Boolean(true);
    }
    if token.eq_ignore_ascii_case("false") {
        return Value::Boolean(false);
    }
    Value::String(strip_matching_quotes(token).to_string())
}

fn strip_matching_quotes(token: &str) -> &str {
    for quote in ['"', '\''] {
        if token.len() >= 2 && token.starts_with(quote) && token.ends_with(quote) {
            return &token[1..token.len() - 1];
        }
    }
    token
}

/// Ordered argument mapping of a single call. Keys keep their first-seen order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Arguments(IndexMap<String, Value>);

impl Arguments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `value` unless `key` is already present. Returns whether it was inserted.
    pub fn insert_first(&mut self, key: impl Into<String>, value: Value) -> bool {
        match self.0.entry(key.into()) {
            indexmap::map::Entry::Occupied(_) => false,
            indexmap::map::Entry::Vacant(slot) => {
                slot.insert(value);
                true
            }
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(key, value)| (key.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn required_str(&self, key: &str) -> Result<&str, CapabilityError> {
        match self.0.get(key) {
            Some(Value::String(value)) => Ok(value),
            Some(other) => Err(CapabilityError::InvalidInput(format!(
                "{key} must be a string, got {other}"
            ))),
            None => Err(CapabilityError::InvalidInput(format!("missing {key}"))),
        }
    }

    /// Any value as plain text: strings verbatim, everything else in its
    /// canonical form. Useful for free-text parameters that the coercer may
    /// have turned into numbers.
    pub fn required_text(&self, key: &str) -> Result<String, CapabilityError> {
        match self.0.get(key) {
            Some(Value::String(value)) => Ok(value.clone()),
            Some(other) => Ok(other.to_string()),
            None => Err(CapabilityError::InvalidInput(format!("missing {key}"))),
        }
    }

    /// Integers, or strings holding one (escaped values are never coerced in
    /// the bracketed dialect).
    pub fn required_i64(&self, key: &str) -> Result<i64, CapabilityError> {
        match self.0.get(key) {
            Some(Value::Integer(value)) => Ok(*value),
            Some(Value::String(text)) => text.trim().parse::<i64>().map_err(|_| {
                CapabilityError::InvalidInput(format!("{key} must be an integer, got {text}"))
            }),
            Some(other) => Err(CapabilityError::InvalidInput(format!(
                "{key} must be an integer, got {other}"
            ))),
            None => Err(CapabilityError::InvalidInput(format!("missing {key}"))),
        }
    }

    pub fn optional_i64(&self, key: &str) -> Result<Option<i64>, CapabilityError> {
        if self.0.contains_key(key) {
            self.required_i64(key).map(Some)
        } else {
            Ok(None)
        }
    }
}

impl FromIterator<(String, Value)> for Arguments {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        let mut args = Self::new();
        for (key, value) in iter {
            args.insert_first(key, value);
        }
        args
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coerce_follows_priority_order() {
        assert_eq!(coerce("42"), Value::Integer(42));
        assert_eq!(coerce("-7"), Value::Integer(-7));
        assert_eq!(coerce("2.5"), Value::Float(2.5));
        assert_eq!(coerce("TRUE"), Value::Boolean(true));
        assert_eq!(coerce("False"), Value::Boolean(false));
        assert_eq!(coerce("notepad"), Value::String("notepad".into()));
    }

    #[test]
    fn coerce_strips_whitespace_and_one_quote_layer() {
        assert_eq!(coerce("  'hello'  "), Value::String("hello".into()));
        assert_eq!(coerce("\"\"quoted\"\""), Value::String("\"quoted\"".into()));
        assert_eq!(coerce("'mismatched\""), Value::String("'mismatched\"".into()));
        assert_eq!(coerce(" 12 "), Value::Integer(12));
    }

    #[test]
    fn coerce_is_total() {
        assert_eq!(coerce(""), Value::String(String::new()));
        assert_eq!(coerce("'"), Value::String("'".into()));
        assert_eq!(coerce("truest"), Value::String("truest".into()));
    }

    #[test]
    fn canonical_text_coerces_back_to_equal_value() {
        let values = [
            Value::Integer(5),
            Value::Integer(-120),
            Value::Float(1.0),
            Value::Float(-0.25),
            Value::Float(1e300),
            Value::Boolean(true),
            Value::Boolean(false),
            Value::String("open notepad".into()),
            Value::String("5".into()),
            Value::String("true".into()),
            Value::String(" x ".into()),
            Value::String("a<b".into()),
            Value::String("'quoted'".into()),
            Value::String(String::new()),
        ];
        for value in values {
            assert_eq!(coerce(&value.to_string()), value, "value {value:?}");
        }
    }

    #[test]
    fn only_ambiguous_strings_are_quoted() {
        assert_eq!(Value::from("notepad").to_string(), "notepad");
        assert_eq!(Value::from("5").to_string(), "'5'");
        assert_eq!(Value::from("TRUE").to_string(), "'TRUE'");
        assert_eq!(Value::from(" x ").to_string(), "' x '");
        assert_eq!(Value::from("'a'").to_string(), "''a''");
    }

    #[test]
    fn integer_overflow_falls_back_to_float() {
        assert_eq!(
            coerce("99999999999999999999"),
            Value::Float(99999999999999999999.0)
        );
    }

    #[test]
    fn first_insert_wins() {
        let mut args = Arguments::new();
        assert!(args.insert_first("a", Value::from("x")));
        assert!(!args.insert_first("a", Value::Integer(5)));
        assert_eq!(args.get("a"), Some(&Value::from("x")));
        assert_eq!(args.len(), 1);
    }

    #[test]
    fn typed_accessors_report_mismatches() {
        let args = Arguments::new().with("level", 50i64).with("name", "calc");
        assert_eq!(args.required_i64("level").unwrap(), 50);
        assert_eq!(args.required_str("name").unwrap(), "calc");
        assert!(args.required_str("level").is_err());
        assert!(args.required_i64("missing").is_err());
        assert_eq!(args.optional_i64("x").unwrap(), None);
        assert_eq!(args.required_text("level").unwrap(), "50");

        let digits = Arguments::new().with("text", "5");
        assert_eq!(digits.required_text("text").unwrap(), "5");

        let escaped = Arguments::new().with("level", " 30 ");
        assert_eq!(escaped.required_i64("level").unwrap(), 30);
    }

    #[test]
    fn serializes_untagged() {
        let args = Arguments::new()
            .with("app_name", "notepad")
            .with("level", 3i64)
            .with("on", true);
        let json = serde_json::to_string(&args).unwrap();
        assert_eq!(json, r#"{"app_name":"notepad","level":3,"on":true}"#);
    }
}
