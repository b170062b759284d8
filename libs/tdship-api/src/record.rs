/// Dynamically typed record value, as delivered by the host.
///
/// Strategy by type:
/// - Integer: `i128`, wide enough to carry values outside the 64-bit range
///   that MessagePack can represent natively. The encoder decides what to
///   do with them.
/// - Map: ordered `(key, value)` pairs; insertion order is preserved on the wire.
/// - Binary: opaque bytes, written as MessagePack `bin`.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Nil,
    Bool(bool),
    Integer(i128),
    Float(f64),
    String(String),
    Binary(Vec<u8>),
    Array(Vec<Value>),
    Map(Vec<(String, Value)>),
}

impl Value {
    /// Short type name, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "bool",
            Value::Integer(_) => "integer",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Binary(_) => "binary",
            Value::Array(_) => "array",
            Value::Map(_) => "map",
        }
    }

    pub fn as_map(&self) -> Option<&[(String, Value)]> {
        match self {
            Value::Map(entries) => Some(entries),
            _ => None,
        }
    }

    /// Build a map value from `(key, value)` pairs.
    pub fn map<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Value::Map(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Lossy JSON view of the value (binary becomes a UTF-8 lossy string,
    /// out-of-range integers become strings).
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Nil => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Integer(i) => {
                if let Ok(v) = i64::try_from(*i) {
                    v.into()
                } else if let Ok(v) = u64::try_from(*i) {
                    v.into()
                } else {
                    serde_json::Value::String(i.to_string())
                }
            }
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Binary(b) => serde_json::Value::String(String::from_utf8_lossy(b).into_owned()),
            Value::Array(items) => serde_json::Value::Array(items.iter().map(Value::to_json).collect()),
            Value::Map(entries) => serde_json::Value::Object(
                entries.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Nil,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Integer(i.into())
                } else if let Some(u) = n.as_u64() {
                    Value::Integer(u.into())
                } else if let Ok(i) = n.to_string().parse::<i128>() {
                    Value::Integer(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => {
                Value::Map(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v.into())
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

/// One event handed over by the host: the event time in Unix seconds and
/// the record itself. The record is expected to be a map; anything else is
/// rejected by the encoder.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub time: i64,
    pub record: Value,
}

impl Event {
    pub fn new(time: i64, record: Value) -> Self {
        Self { time, record }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_object_keeps_key_order() {
        let json: serde_json::Value = serde_json::from_str(r#"{"b":1,"a":"x"}"#).unwrap();
        let value = Value::from(json);
        let keys: Vec<&str> = value
            .as_map()
            .unwrap()
            .iter()
            .map(|(k, _)| k.as_str())
            .collect();
        assert_eq!(keys, ["b", "a"]);
    }

    #[test]
    fn integer_beyond_u64_stays_an_integer() {
        let json: serde_json::Value = serde_json::from_str("18446744073709551616").unwrap();
        assert_eq!(Value::from(json), Value::Integer(i128::from(u64::MAX) + 1));

        let json: serde_json::Value = serde_json::from_str("-9223372036854775809").unwrap();
        assert_eq!(Value::from(json), Value::Integer(i128::from(i64::MIN) - 1));
    }

    #[test]
    fn fractional_json_number_is_float() {
        let json: serde_json::Value = serde_json::from_str("1.5").unwrap();
        assert_eq!(Value::from(json), Value::Float(1.5));
    }

    #[test]
    fn large_unsigned_json_number_is_integer() {
        let json: serde_json::Value = serde_json::from_str("18446744073709551615").unwrap();
        assert_eq!(Value::from(json), Value::Integer(u64::MAX as i128));
    }

    #[test]
    fn out_of_range_integer_renders_as_json_string() {
        let v = Value::Integer(i128::from(u64::MAX) + 1);
        assert_eq!(v.to_json(), serde_json::json!("18446744073709551616"));
    }

    #[test]
    fn type_names() {
        assert_eq!(Value::Nil.type_name(), "nil");
        assert_eq!(Value::from("x").type_name(), "string");
        assert_eq!(Value::map([("a", Value::from(1))]).type_name(), "map");
    }
}
