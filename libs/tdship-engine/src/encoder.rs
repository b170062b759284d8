use tdship_api::Value;

pub const DEFAULT_KEY_NUM_LIMIT: usize = 512;
pub const DEFAULT_RECORD_SIZE_LIMIT: usize = 32 * 1024 * 1024;

const TIME_KEY: &str = "time";
const ALT_TIME_KEY: &str = ":time";
const SUMMARY_LEN: usize = 100;

/// What to do with a record whose encoded size exceeds the limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OversizePolicy {
    /// Log a warning and ship the record anyway.
    #[default]
    Warn,
    /// Drop the record as invalid.
    Reject,
}

/// Why a single record was not encoded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncodeError {
    #[error("record must be a map, got {0}")]
    NotAMap(&'static str),

    #[error("too many number of keys ({0} keys)")]
    TooManyKeys(usize),

    #[error("size of a record too large ({0} bytes)")]
    TooLarge(usize),

    #[error("msgpack encoding failed: {0}")]
    Encoding(String),
}

/// Failure inside one codec pass.
#[derive(Debug)]
enum CodecError {
    /// Integer outside what MessagePack can carry natively.
    Overflow(i128),
    Write(String),
}

/// Integer handling of a codec pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Codec {
    /// Native MessagePack integers only; wider values fail with `Overflow`.
    Strict,
    /// Values outside the native range are written as decimal strings.
    Normalized,
}

/// Validates one record and writes it as MessagePack.
#[derive(Debug, Clone)]
pub struct RecordEncoder {
    key_num_limit: usize,
    record_size_limit: usize,
    oversize_policy: OversizePolicy,
}

impl Default for RecordEncoder {
    fn default() -> Self {
        Self::new(
            DEFAULT_KEY_NUM_LIMIT,
            DEFAULT_RECORD_SIZE_LIMIT,
            OversizePolicy::default(),
        )
    }
}

impl RecordEncoder {
    pub fn new(key_num_limit: usize, record_size_limit: usize, oversize_policy: OversizePolicy) -> Self {
        Self {
            key_num_limit,
            record_size_limit,
            oversize_policy,
        }
    }

    pub fn key_num_limit(&self) -> usize {
        self.key_num_limit
    }

    /// Encode `record` with `time` injected.
    pub fn encode(&self, record: &Value, time: i64) -> Result<Vec<u8>, EncodeError> {
        let mut out = Vec::new();
        self.encode_into(record, time, &mut out)?;
        Ok(out)
    }

    /// Append the encoded record to `out` and return the number of bytes
    /// written. On error `out` is left exactly as it was.
    pub fn encode_into(&self, record: &Value, time: i64, out: &mut Vec<u8>) -> Result<usize, EncodeError> {
        let entries = record
            .as_map()
            .ok_or_else(|| EncodeError::NotAMap(record.type_name()))?;

        let time_value = Value::Integer(time.into());
        let fields = inject_time(entries, &time_value);
        if fields.len() > self.key_num_limit {
            return Err(EncodeError::TooManyKeys(fields.len()));
        }

        let start = out.len();
        match write_map(out, &fields, Codec::Strict) {
            Ok(()) => {}
            Err(CodecError::Overflow(value)) => {
                tracing::debug!(%value, "integer out of msgpack range, re-encoding record with normalized integers");
                out.truncate(start);
                if let Err(e) = write_map(out, &fields, Codec::Normalized) {
                    out.truncate(start);
                    return Err(EncodeError::Encoding(e.to_string()));
                }
            }
            Err(e) => {
                out.truncate(start);
                return Err(EncodeError::Encoding(e.to_string()));
            }
        }

        let size = out.len() - start;
        if size > self.record_size_limit {
            match self.oversize_policy {
                OversizePolicy::Warn => {
                    tracing::warn!(size, record = %summarize(record), "size of a record too large");
                }
                OversizePolicy::Reject => {
                    out.truncate(start);
                    return Err(EncodeError::TooLarge(size));
                }
            }
        }
        Ok(size)
    }
}

/// Record fields with `time` set: an existing `time` is overwritten in
/// place, `:time` is dropped, otherwise `time` goes last.
fn inject_time<'a>(entries: &'a [(String, Value)], time: &'a Value) -> Vec<(&'a str, &'a Value)> {
    let mut fields = Vec::with_capacity(entries.len() + 1);
    let mut has_time = false;
    for (key, value) in entries {
        match key.as_str() {
            ALT_TIME_KEY => continue,
            TIME_KEY if has_time => continue,
            TIME_KEY => {
                has_time = true;
                fields.push((TIME_KEY, time));
            }
            _ => fields.push((key.as_str(), value)),
        }
    }
    if !has_time {
        fields.push((TIME_KEY, time));
    }
    fields
}

/// Short JSON rendering of a record for log lines.
pub fn summarize(record: &Value) -> String {
    let json = record.to_json().to_string();
    if json.chars().count() > SUMMARY_LEN {
        let head: String = json.chars().take(SUMMARY_LEN - 3).collect();
        format!("{head}...")
    } else {
        json
    }
}

// ── Codec ──

impl std::fmt::Display for CodecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CodecError::Overflow(v) => write!(f, "integer {v} out of range"),
            CodecError::Write(msg) => f.write_str(msg),
        }
    }
}

fn write_err(e: impl std::fmt::Display) -> CodecError {
    CodecError::Write(e.to_string())
}

fn len_u32(len: usize) -> Result<u32, CodecError> {
    u32::try_from(len).map_err(|_| CodecError::Write(format!("length {len} exceeds msgpack limit")))
}

fn write_map(out: &mut Vec<u8>, fields: &[(&str, &Value)], codec: Codec) -> Result<(), CodecError> {
    rmp::encode::write_map_len(out, len_u32(fields.len())?).map_err(write_err)?;
    for (key, value) in fields {
        rmp::encode::write_str(out, key).map_err(write_err)?;
        write_value(out, value, codec)?;
    }
    Ok(())
}

fn write_value(out: &mut Vec<u8>, value: &Value, codec: Codec) -> Result<(), CodecError> {
    match value {
        Value::Nil => rmp::encode::write_nil(out).map_err(write_err),
        Value::Bool(b) => rmp::encode::write_bool(out, *b).map_err(write_err),
        Value::Integer(i) => write_integer(out, *i, codec),
        Value::Float(f) => rmp::encode::write_f64(out, *f).map_err(write_err),
        Value::String(s) => rmp::encode::write_str(out, s).map_err(write_err),
        Value::Binary(b) => rmp::encode::write_bin(out, b).map_err(write_err),
        Value::Array(items) => {
            rmp::encode::write_array_len(out, len_u32(items.len())?).map_err(write_err)?;
            for item in items {
                write_value(out, item, codec)?;
            }
            Ok(())
        }
        Value::Map(entries) => {
            rmp::encode::write_map_len(out, len_u32(entries.len())?).map_err(write_err)?;
            for (key, item) in entries {
                rmp::encode::write_str(out, key).map_err(write_err)?;
                write_value(out, item, codec)?;
            }
            Ok(())
        }
    }
}

fn write_integer(out: &mut Vec<u8>, value: i128, codec: Codec) -> Result<(), CodecError> {
    if let Ok(v) = u64::try_from(value) {
        rmp::encode::write_uint(out, v).map(|_| ()).map_err(write_err)
    } else if let Ok(v) = i64::try_from(value) {
        rmp::encode::write_sint(out, v).map(|_| ()).map_err(write_err)
    } else {
        match codec {
            Codec::Strict => Err(CodecError::Overflow(value)),
            Codec::Normalized => rmp::encode::write_str(out, &value.to_string()).map_err(write_err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T: i64 = 1388534400; // 2014-01-01 00:00:00 UTC

    fn decode(bytes: &[u8]) -> rmpv::Value {
        let mut cursor = bytes;
        let value = rmpv::decode::read_value(&mut cursor).unwrap();
        assert!(cursor.is_empty(), "trailing bytes after one record");
        value
    }

    fn get<'a>(map: &'a rmpv::Value, key: &str) -> Option<&'a rmpv::Value> {
        map.as_map()
            .unwrap()
            .iter()
            .find(|(k, _)| k.as_str() == Some(key))
            .map(|(_, v)| v)
    }

    #[test]
    fn injects_time_at_the_end() {
        let record = Value::map([("a", Value::from(1))]);
        let bytes = RecordEncoder::default().encode(&record, T).unwrap();
        let expected = rmpv::Value::Map(vec![
            ("a".into(), 1.into()),
            ("time".into(), T.into()),
        ]);
        assert_eq!(decode(&bytes), expected);
    }

    #[test]
    fn overwrites_user_time_and_drops_symbol_time() {
        let record = Value::map([
            ("time", Value::from("yesterday")),
            ("msg", Value::from("hi")),
            (":time", Value::from(5)),
        ]);
        let decoded = decode(&RecordEncoder::default().encode(&record, T).unwrap());
        let map = decoded.as_map().unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map[0], ("time".into(), T.into()));
        assert_eq!(map[1], ("msg".into(), "hi".into()));
    }

    #[test]
    fn nested_values_round_trip() {
        let record = Value::map([
            ("flag", Value::Bool(true)),
            ("none", Value::Nil),
            ("ratio", Value::Float(0.5)),
            ("neg", Value::from(-42)),
            ("raw", Value::Binary(vec![0, 159, 255])),
            ("list", Value::Array(vec![Value::from(1), Value::from("two")])),
            ("nested", Value::map([("k", Value::from("v"))])),
        ]);
        let decoded = decode(&RecordEncoder::default().encode(&record, T).unwrap());
        assert_eq!(get(&decoded, "flag"), Some(&rmpv::Value::Boolean(true)));
        assert_eq!(get(&decoded, "none"), Some(&rmpv::Value::Nil));
        assert_eq!(get(&decoded, "ratio"), Some(&rmpv::Value::F64(0.5)));
        assert_eq!(get(&decoded, "neg"), Some(&rmpv::Value::from(-42)));
        assert_eq!(get(&decoded, "raw"), Some(&rmpv::Value::Binary(vec![0, 159, 255])));
        assert_eq!(
            get(&decoded, "list"),
            Some(&rmpv::Value::Array(vec![1.into(), "two".into()]))
        );
        assert_eq!(
            get(&decoded, "nested"),
            Some(&rmpv::Value::Map(vec![("k".into(), "v".into())]))
        );
        assert_eq!(get(&decoded, "time"), Some(&rmpv::Value::from(T)));
    }

    #[test]
    fn too_many_keys_is_rejected_without_output() {
        let record = Value::Map((0..5012).map(|i| (format!("k{i}"), Value::from(i))).collect());
        let encoder = RecordEncoder::new(512, DEFAULT_RECORD_SIZE_LIMIT, OversizePolicy::Warn);
        let mut out = b"previous".to_vec();
        let err = encoder.encode_into(&record, T, &mut out).unwrap_err();
        // 5012 user keys plus the injected time.
        assert_eq!(err, EncodeError::TooManyKeys(5013));
        assert_eq!(out, b"previous");
    }

    #[test]
    fn key_limit_counts_injected_time() {
        let encoder = RecordEncoder::new(2, DEFAULT_RECORD_SIZE_LIMIT, OversizePolicy::Warn);
        let two = Value::map([("a", Value::from(1)), ("b", Value::from(2))]);
        assert_eq!(encoder.encode(&two, T), Err(EncodeError::TooManyKeys(3)));
        let with_time = Value::map([("a", Value::from(1)), ("time", Value::from(2))]);
        assert!(encoder.encode(&with_time, T).is_ok());
    }

    #[test]
    fn non_map_records_are_type_errors() {
        let encoder = RecordEncoder::default();
        assert_eq!(
            encoder.encode(&Value::from("invalid"), T),
            Err(EncodeError::NotAMap("string"))
        );
        assert_eq!(
            encoder.encode(&Value::Array(vec![]), T),
            Err(EncodeError::NotAMap("array"))
        );
    }

    #[test]
    fn out_of_range_integers_fall_back_to_strings() {
        let big = i128::from(u64::MAX) + 1;
        let small = i128::from(i64::MIN) - 1;
        let record = Value::map([
            ("big", Value::Integer(big)),
            ("small", Value::Array(vec![Value::Integer(small)])),
            ("ok", Value::Integer(u64::MAX.into())),
        ]);
        let decoded = decode(&RecordEncoder::default().encode(&record, T).unwrap());
        assert_eq!(get(&decoded, "big"), Some(&rmpv::Value::from("18446744073709551616")));
        assert_eq!(
            get(&decoded, "small"),
            Some(&rmpv::Value::Array(vec!["-9223372036854775809".into()]))
        );
        assert_eq!(get(&decoded, "ok"), Some(&rmpv::Value::from(u64::MAX)));
    }

    #[test]
    fn oversize_warns_by_default_and_rejects_on_request() {
        let record = Value::map([("blob", Value::from("x".repeat(64)))]);

        let warn = RecordEncoder::new(DEFAULT_KEY_NUM_LIMIT, 16, OversizePolicy::Warn);
        let bytes = warn.encode(&record, T).unwrap();
        assert!(bytes.len() > 16);

        let reject = RecordEncoder::new(DEFAULT_KEY_NUM_LIMIT, 16, OversizePolicy::Reject);
        let mut out = Vec::new();
        let err = reject.encode_into(&record, T, &mut out).unwrap_err();
        assert!(matches!(err, EncodeError::TooLarge(n) if n == bytes.len()));
        assert!(out.is_empty());
    }

    #[test]
    fn summary_is_truncated() {
        let record = Value::map([("msg", Value::from("y".repeat(500)))]);
        let summary = summarize(&record);
        assert_eq!(summary.chars().count(), 100);
        assert!(summary.ends_with("..."));

        let short = Value::map([("a", Value::from(1))]);
        assert_eq!(summarize(&short), r#"{"a":1}"#);
    }
}
