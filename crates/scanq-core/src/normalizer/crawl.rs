use serde_json::{Map, Value};

/// Splits newline-delimited crawler output into entries.
///
/// Lines that parse to a JSON object are kept as-is; any other non-blank line is
/// preserved as `{"raw": line}` so nothing the crawler printed is lost.
pub fn parse_crawl_output(stdout: &str) -> Vec<Value> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| match serde_json::from_str::<Value>(line) {
            Ok(value @ Value::Object(_)) => value,
            _ => raw_entry(line),
        })
        .collect()
}

fn raw_entry(line: &str) -> Value {
    let mut map = Map::new();
    map.insert("raw".to_string(), Value::String(line.to_string()));
    Value::Object(map)
}

/// The discovered URL of a parsed entry, if it has one.
pub fn entry_url(entry: &Value) -> Option<&str> {
    entry
        .pointer("/request/endpoint")
        .or_else(|| entry.get("endpoint"))
        .or_else(|| entry.get("url"))
        .or_else(|| entry.pointer("/request/url"))
        .and_then(Value::as_str)
        .filter(|url| !url.is_empty())
}

pub fn entry_content_length(entry: &Value) -> Option<i64> {
    entry
        .pointer("/response/content_length")
        .or_else(|| entry.get("content_length"))
        .and_then(Value::as_i64)
}
