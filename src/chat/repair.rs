// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Best-effort recovery of malformed tool-call arguments
//!
//! Models occasionally emit two argument objects back to back
//! (`{"a":1}{"b":2}`) or trail garbage after a complete object. Strategies
//! are tried in order:
//!
//! 1. strict parse, so valid input comes back unchanged
//! 2. split on the literal `}{` and parse each piece
//! 3. cut at a point where brace depth returns to zero

use serde_json::Value;

use crate::error::RepairError;

/// Repair `raw` into a single value.
///
/// For concatenated objects the first piece that parses wins.
pub fn repair(raw: &str) -> Result<Value, RepairError> {
    if let Ok(value) = serde_json::from_str(raw) {
        return Ok(value);
    }

    if let Some(first) = parse_concatenated(raw).into_iter().next() {
        tracing::debug!(target: "grokit.stream", "repaired concatenated arguments");
        return Ok(first);
    }

    truncate_balanced(raw)
}

/// Repair `raw` into every value it contains.
///
/// Used where a tool can act on each object separately, e.g. several
/// `read_file` calls squeezed into one argument string.
pub fn repair_all(raw: &str) -> Result<Vec<Value>, RepairError> {
    if let Ok(value) = serde_json::from_str(raw) {
        return Ok(vec![value]);
    }

    let pieces = parse_concatenated(raw);
    if !pieces.is_empty() {
        return Ok(pieces);
    }

    truncate_balanced(raw).map(|value| vec![value])
}

/// Split on `}{` and restore the braces the split consumed.
pub fn split_concatenated(raw: &str) -> Vec<String> {
    let parts: Vec<&str> = raw.split("}{").collect();
    if parts.len() < 2 {
        return vec![raw.to_string()];
    }

    let last = parts.len() - 1;
    parts
        .iter()
        .enumerate()
        .map(|(i, part)| match i {
            0 => format!("{part}}}"),
            i if i == last => format!("{{{part}"),
            _ => format!("{{{part}}}"),
        })
        .collect()
}

fn parse_concatenated(raw: &str) -> Vec<Value> {
    if !raw.contains("}{") {
        return vec![];
    }
    split_concatenated(raw)
        .iter()
        .filter_map(|piece| serde_json::from_str(piece).ok())
        .collect()
}

/// Byte offsets just past each `}` that closes a top-level object.
///
/// Braces inside string literals are not counted. A stray `}` at depth zero
/// is ignored.
fn zero_depth_cuts(raw: &str) -> Vec<usize> {
    let mut cuts = Vec::new();
    let mut depth: usize = 0;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in raw.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }

        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    cuts.push(i + 1);
                }
            }
            _ => {}
        }
    }

    cuts
}

fn truncate_balanced(raw: &str) -> Result<Value, RepairError> {
    let cuts = zero_depth_cuts(raw);
    if cuts.is_empty() {
        return Err(RepairError {
            reason: "brace depth never returns to zero".to_string(),
        });
    }

    for cut in cuts.iter().rev() {
        if let Ok(value) = serde_json::from_str(&raw[..*cut]) {
            tracing::debug!(
                target: "grokit.stream",
                kept = *cut,
                dropped = raw.len() - cut,
                "repaired arguments by truncation"
            );
            return Ok(value);
        }
    }

    Err(RepairError {
        reason: "no balanced prefix parses".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_valid_input_unchanged() {
        let raw = r#"{"filename": "a.txt", "nested": {"x": [1, 2]}}"#;
        let expected: Value = serde_json::from_str(raw).unwrap();
        assert_eq!(repair(raw).unwrap(), expected);
    }

    #[test]
    fn test_repair_idempotent() {
        let once = repair(r#"{"a":1}{"b":2}"#).unwrap();
        let twice = repair(&once.to_string()).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_concatenated_objects() {
        let raw = r#"{"a":1}{"b":2}"#;
        assert_eq!(repair(raw).unwrap(), json!({"a": 1}));
        assert_eq!(
            repair_all(raw).unwrap(),
            vec![json!({"a": 1}), json!({"b": 2})]
        );
    }

    #[test]
    fn test_three_concatenated_objects() {
        let raw = r#"{"filename":"a"}{"filename":"b"}{"filename":"c"}"#;
        let all = repair_all(raw).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[1], json!({"filename": "b"}));
    }

    #[test]
    fn test_split_restores_braces() {
        assert_eq!(
            split_concatenated(r#"{"a":1}{"b":2}{"c":3}"#),
            vec![r#"{"a":1}"#, r#"{"b":2}"#, r#"{"c":3}"#]
        );
        assert_eq!(split_concatenated(r#"{"a":1}"#), vec![r#"{"a":1}"#]);
    }

    #[test]
    fn test_trailing_garbage() {
        assert_eq!(repair(r#"{"a":1}xyz"#).unwrap(), json!({"a": 1}));
        assert_eq!(repair(r#"{"a":1}}"#).unwrap(), json!({"a": 1}));
    }

    #[test]
    fn test_truncation_ignores_braces_in_strings() {
        let raw = r#"{"content":"fn main() {}"} trailing"#;
        assert_eq!(repair(raw).unwrap(), json!({"content": "fn main() {}"}));
    }

    #[test]
    fn test_truncation_falls_back_to_earlier_cut() {
        // The last balanced prefix is invalid, the first one parses.
        let raw = r#"{"a":1} {oops}"#;
        assert_eq!(repair(raw).unwrap(), json!({"a": 1}));
    }

    #[test]
    fn test_unterminated_fails() {
        let err = repair(r#"{"a": {"b": 1"#).unwrap_err();
        assert!(err.reason.contains("never returns to zero"));
        assert!(repair_all(r#"{"a": "#).is_err());
    }

    #[test]
    fn test_no_object_fails() {
        assert!(repair("not json at all").is_err());
    }

    #[test]
    fn test_repair_all_single_value() {
        assert_eq!(repair_all(r#"{"a":1}"#).unwrap(), vec![json!({"a": 1})]);
        assert_eq!(repair_all(r#"{"a":1} junk"#).unwrap(), vec![json!({"a": 1})]);
    }
}
