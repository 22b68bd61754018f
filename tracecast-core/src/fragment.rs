//! Resilient fragment parser
//!
//! The trace file is appended to while we read it, so at any moment the
//! document may end in the middle of an event object. Instead of decoding the
//! whole document we locate the events array structurally and cut it into
//! top-level `{ ... }` fragments with a quote- and escape-aware depth counter.
//! Each balanced fragment is then decoded on its own.
//!
//! A trailing fragment that never closes is dropped; it will be complete on a
//! later read. A balanced fragment that is not valid JSON is skipped on its
//! own without affecting its neighbours.
//!
//! When the events field cannot be found at all (early writes, legacy bare
//! arrays, concatenated objects) the whole document is scanned instead.

use std::ops::Range;

use serde_json::Value;

pub const DEFAULT_EVENTS_FIELD: &str = "traceEvents";

/// What closes the region being scanned and which brackets count as nesting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanMode {
    /// Inside the events array: `{}` and `[]` both nest, and a closer at depth
    /// zero is the end of the array.
    Array,
    /// Whole-document fallback: only braces nest, stray closers are ignored.
    Document,
}

#[derive(Debug, Clone)]
pub struct FragmentParser {
    field: String,
}

impl Default for FragmentParser {
    fn default() -> Self {
        Self::new(DEFAULT_EVENTS_FIELD)
    }
}

impl FragmentParser {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
        }
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    /// Extract every complete event object, in file order.
    ///
    /// Never fails: malformed or truncated input only yields fewer objects.
    pub fn parse(&self, raw: &[u8]) -> Vec<Value> {
        match find_array_body(raw, self.field.as_bytes()) {
            Some(offset) => {
                let body = &raw[offset..];
                decode_fragments(body, scan_objects(body, ScanMode::Array))
            }
            None => {
                tracing::debug!(field = %self.field, "Events field not found, scanning whole document");
                decode_fragments(raw, scan_objects(raw, ScanMode::Document))
            }
        }
    }
}

/// Parse with the default `traceEvents` field.
pub fn parse_fragments(raw: &[u8]) -> Vec<Value> {
    FragmentParser::default().parse(raw)
}

/// Offset just past the `[` that opens `"<key>": [`, if present.
///
/// Strings are skipped as whole tokens so that a key-like sequence inside a
/// string value never matches.
fn find_array_body(raw: &[u8], key: &[u8]) -> Option<usize> {
    let mut i = 0;
    while i < raw.len() {
        if raw[i] != b'"' {
            i += 1;
            continue;
        }
        let start = i + 1;
        let end = string_end(raw, start)?;
        if &raw[start..end] == key {
            let mut j = skip_whitespace(raw, end + 1);
            if raw.get(j) == Some(&b':') {
                j = skip_whitespace(raw, j + 1);
                if raw.get(j) == Some(&b'[') {
                    return Some(j + 1);
                }
            }
        }
        i = end + 1;
    }
    None
}

/// Index of the closing quote of a string whose content starts at `start`.
fn string_end(raw: &[u8], start: usize) -> Option<usize> {
    let mut i = start;
    while i < raw.len() {
        match raw[i] {
            b'\\' => i += 2,
            b'"' => return Some(i),
            _ => i += 1,
        }
    }
    None
}

fn skip_whitespace(raw: &[u8], mut i: usize) -> usize {
    while i < raw.len() && raw[i].is_ascii_whitespace() {
        i += 1;
    }
    i
}

/// Byte ranges of the balanced top-level objects in `body`.
fn scan_objects(body: &[u8], mode: ScanMode) -> Vec<Range<usize>> {
    let mut ranges = Vec::new();
    let mut depth: usize = 0;
    let mut start: Option<usize> = None;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in body.iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }

        match b {
            b'"' => in_string = true,
            b'{' => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            b'[' if mode == ScanMode::Array => depth += 1,
            b'}' | b']' => {
                if b == b']' && mode == ScanMode::Document {
                    continue;
                }
                if depth == 0 {
                    match mode {
                        ScanMode::Array => break,
                        ScanMode::Document => continue,
                    }
                }
                depth -= 1;
                if depth == 0 {
                    if let Some(s) = start.take() {
                        ranges.push(s..i + 1);
                    }
                }
            }
            _ => {}
        }
    }

    ranges
}

fn decode_fragments(body: &[u8], ranges: Vec<Range<usize>>) -> Vec<Value> {
    let mut objects = Vec::with_capacity(ranges.len());
    for range in ranges {
        match serde_json::from_slice::<Value>(&body[range.clone()]) {
            Ok(value) => objects.push(value),
            Err(e) => {
                tracing::debug!(
                    start = range.start,
                    end = range.end,
                    error = %e,
                    "Skipping malformed trace fragment"
                );
            }
        }
    }
    objects
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ids(values: &[Value]) -> Vec<i64> {
        values.iter().filter_map(|v| v["id"].as_i64()).collect()
    }

    #[test]
    fn test_truncated_tail_is_dropped() {
        let raw = br#"{"traceEvents": [{"id":1},{"id":2},{"id":3,"na"#;
        let events = parse_fragments(raw);
        assert_eq!(events, vec![json!({"id":1}), json!({"id":2})]);
    }

    #[test]
    fn test_completed_tail_yields_one_more() {
        let truncated = br#"{"otherData": {}, "traceEvents": [{"id":1},{"id":2,"name":"ma"#;
        let completed =
            br#"{"otherData": {}, "traceEvents": [{"id":1},{"id":2,"name":"matmul"}"#;
        assert_eq!(ids(&parse_fragments(truncated)), vec![1]);
        assert_eq!(ids(&parse_fragments(completed)), vec![1, 2]);
    }

    #[test]
    fn test_structural_characters_inside_strings() {
        let raw = br#"{"traceEvents": [
            {"id":1,"name":"a},{b"},
            {"id":2,"args":{"text":"brace { and ] bracket"}},
            {"id":3,"name":"quote \" inside"},
            {"id":4,"name":"backslash \\"},
            {"id":5,"name":"tail \"}, {\"id\":99"#;
        let events = parse_fragments(raw);
        assert_eq!(ids(&events), vec![1, 2, 3, 4]);
        assert_eq!(events[0]["name"], "a},{b");
        assert_eq!(events[3]["name"], "backslash \\");
    }

    #[test]
    fn test_invalid_fragment_is_skipped_alone() {
        let raw = br#"{"traceEvents": [{"id":1},{"id":,},{"id":3}]}"#;
        assert_eq!(ids(&parse_fragments(raw)), vec![1, 3]);
    }

    #[test]
    fn test_scan_stops_at_end_of_array() {
        let raw = br#"{"traceEvents": [{"id":1},{"id":2}], "later": [{"id":7}]}"#;
        assert_eq!(ids(&parse_fragments(raw)), vec![1, 2]);
    }

    #[test]
    fn test_found_field_with_no_complete_object_yields_nothing() {
        // otherData's `{}` must not leak in through the fallback path
        let raw = b"{\n\"otherData\": {}, \n\"traceEvents\": [{\"name\": \"process_na";
        assert!(parse_fragments(raw).is_empty());
    }

    #[test]
    fn test_key_text_inside_string_value_is_ignored() {
        let raw = br#"{"note":"\"traceEvents\": [{\"id\":42}]", "traceEvents": [{"id":1}"#;
        assert_eq!(ids(&parse_fragments(raw)), vec![1]);
    }

    #[test]
    fn test_fallback_on_bare_array() {
        let raw = br#"[{"id":1},{"id":2,"args":{"k":[1,2]}},{"id""#;
        assert_eq!(ids(&parse_fragments(raw)), vec![1, 2]);
    }

    #[test]
    fn test_fallback_on_concatenated_objects_with_stray_closer() {
        let raw = br#"} {"id":1} garbage {"id":2}{"id":"#;
        assert_eq!(ids(&parse_fragments(raw)), vec![1, 2]);
    }

    #[test]
    fn test_custom_field_name() {
        let parser = FragmentParser::new("events");
        let raw = br#"{"traceEvents": [{"id":9}], "events" : [ {"id":1} , {"id":2}"#;
        assert_eq!(parser.field(), "events");
        assert_eq!(ids(&parser.parse(raw)), vec![1, 2]);
    }

    #[test]
    fn test_empty_and_garbage_input() {
        assert!(parse_fragments(b"").is_empty());
        assert!(parse_fragments(b"\"traceEvents").is_empty());
        assert!(parse_fragments(b"not json at all").is_empty());
    }

    #[test]
    fn test_nested_array_element_is_not_an_event() {
        let raw = br#"{"traceEvents": [[{"id":5}], {"id":1}, 3, {"id":2}"#;
        assert_eq!(ids(&parse_fragments(raw)), vec![1, 2]);
    }
}
