use serde::Deserialize;
use tdship_api::{Event, Value};

/// One line of input: `{"tag": "td.db.table", "time": 1700000000, "record": {...}}`.
/// `tag` and `time` are optional.
#[derive(Debug, Deserialize)]
struct Line {
    #[serde(default)]
    tag: Option<String>,
    #[serde(default)]
    time: Option<i64>,
    record: serde_json::Value,
}

/// Parse one NDJSON line into `(tag, event)`. Lines without a tag use
/// `default_tag`; lines without a time use `now`.
pub fn parse_line(line: &str, default_tag: Option<&str>, now: i64) -> Result<(String, Event), String> {
    let line: Line = serde_json::from_str(line).map_err(|e| e.to_string())?;
    let tag = line
        .tag
        .or_else(|| default_tag.map(str::to_string))
        .ok_or_else(|| "line has no \"tag\" and no --tag was given".to_string())?;
    Ok((tag, Event::new(line.time.unwrap_or(now), Value::from(line.record))))
}

pub fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_line() {
        let (tag, event) =
            parse_line(r#"{"tag":"td.db.tbl","time":42,"record":{"a":1}}"#, None, 7).unwrap();
        assert_eq!(tag, "td.db.tbl");
        assert_eq!(event.time, 42);
        assert_eq!(event.record, Value::map([("a", Value::Integer(1))]));
    }

    #[test]
    fn missing_fields_use_defaults() {
        let (tag, event) = parse_line(r#"{"record":{"a":"x"}}"#, Some("db.tbl"), 7).unwrap();
        assert_eq!(tag, "db.tbl");
        assert_eq!(event.time, 7);
    }

    #[test]
    fn big_integers_keep_precision_and_key_order() {
        let (_, event) = parse_line(
            r#"{"tag":"test_db.events","time":1,"record":{"big":18446744073709551616,"z":1,"a":2}}"#,
            None,
            0,
        )
        .unwrap();
        assert_eq!(
            event.record,
            Value::map([
                ("big", Value::Integer(i128::from(u64::MAX) + 1)),
                ("z", Value::Integer(1)),
                ("a", Value::Integer(2)),
            ])
        );

        // the encoder ships it as a decimal string instead of a float
        let encoded = tdship_engine::RecordEncoder::default()
            .encode(&event.record, event.time)
            .unwrap();
        assert!(encoded.windows(20).any(|w| w == b"18446744073709551616"));
    }

    #[test]
    fn bad_lines_are_reported() {
        assert!(parse_line("not json", Some("db.tbl"), 0).is_err());
        assert!(parse_line(r#"{"record":{}}"#, None, 0).is_err());
        assert!(parse_line(r#"{"tag":"db.tbl"}"#, None, 0).is_err());
    }
}
