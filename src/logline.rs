//! Parses a stderr line as either `key=value` tokens or the alternate
//! `[LEVEL] message` SDK format (§4.5.1).

use std::collections::BTreeMap;

use bstr::ByteSlice;

/// Parsed fields from one stderr line. Unknown keys are kept verbatim;
/// `time`, `level`, `msg` are the only keys spec.md names explicitly.
pub type LogFields = BTreeMap<String, String>;

const SDK_LEVELS: &[&str] = &["DEBUG", "INFO", "WARN", "WARNING", "ERR", "ERROR", "FATAL"];

/// Returns an empty map on any parse failure (§4.5.1: "parse errors silently
/// produce an empty mapping").
pub fn parse(line: &[u8]) -> LogFields {
    if let Some(fields) = parse_sdk_format(line) {
        return fields;
    }
    parse_key_value(line)
}

fn parse_sdk_format(line: &[u8]) -> Option<LogFields> {
    let line = line.trim();
    let rest = line.strip_prefix(b"[")?;
    let (level, rest) = rest.split_once_str(b"]")?;
    let level = level.to_str().ok()?.trim();
    if !SDK_LEVELS.contains(&level) {
        return None;
    }
    let mut fields = LogFields::new();
    fields.insert("level".to_string(), level.to_lowercase());
    fields.insert(
        "msg".to_string(),
        rest.trim().to_str_lossy().into_owned(),
    );
    Some(fields)
}

fn parse_key_value(line: &[u8]) -> LogFields {
    let mut fields = LogFields::new();
    let mut rest = line.trim();

    while !rest.is_empty() {
        rest = rest.trim_start();
        if rest.is_empty() {
            break;
        }

        let Some(eq_pos) = rest.find_byte(b'=') else {
            return LogFields::new();
        };
        let key = match rest[..eq_pos].to_str() {
            Ok(k) if !k.is_empty() => k.to_string(),
            _ => return LogFields::new(),
        };
        rest = &rest[eq_pos + 1..];

        let (value, remainder) = match rest.first() {
            Some(b'"') => {
                let Some((value, remainder)) = take_quoted(&rest[1..]) else {
                    return LogFields::new();
                };
                (value, remainder)
            }
            Some(b'&') if rest.get(1) == Some(&b'{') => take_braced(rest),
            _ => take_bareword(rest),
        };

        fields.insert(key, value);
        rest = remainder;
    }

    fields
}

/// Consumes up to the next unescaped `"`, preserving escaped inner quotes verbatim.
fn take_quoted(input: &[u8]) -> Option<(String, &[u8])> {
    let mut out = Vec::new();
    let mut i = 0;
    while i < input.len() {
        match input[i] {
            b'\\' if i + 1 < input.len() && input[i + 1] == b'"' => {
                out.push(b'\\');
                out.push(b'"');
                i += 2;
            }
            b'"' => {
                return Some((String::from_utf8_lossy(&out).into_owned(), &input[i + 1..]));
            }
            c => {
                out.push(c);
                i += 1;
            }
        }
    }
    None
}

fn take_braced(input: &[u8]) -> (String, &[u8]) {
    if let Some(end) = input.find_byte(b'}') {
        let value = String::from_utf8_lossy(&input[..=end]).into_owned();
        (value, &input[end + 1..])
    } else {
        (String::from_utf8_lossy(input).into_owned(), b"")
    }
}

fn take_bareword(input: &[u8]) -> (String, &[u8]) {
    let end = input
        .iter()
        .position(|b| b.is_ascii_whitespace())
        .unwrap_or(input.len());
    (
        String::from_utf8_lossy(&input[..end]).into_owned(),
        &input[end..],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quoted_value_strips_surrounding_quotes() {
        let fields = parse(br#"time=2024-01-01T00:00:00Z level="info" msg="hello world""#);
        assert_eq!(fields.get("level").map(String::as_str), Some("info"));
        assert_eq!(fields.get("msg").map(String::as_str), Some("hello world"));
    }

    #[test]
    fn escaped_inner_quotes_are_preserved() {
        let fields = parse(br#"msg="he said \"hi\"""#);
        assert_eq!(
            fields.get("msg").map(String::as_str),
            Some(r#"he said \"hi\""#)
        );
    }

    #[test]
    fn bareword_values_have_no_whitespace() {
        let fields = parse(b"level=error code=500");
        assert_eq!(fields.get("level").map(String::as_str), Some("error"));
        assert_eq!(fields.get("code").map(String::as_str), Some("500"));
    }

    #[test]
    fn brace_literal_value() {
        let fields = parse(b"context=&{foo bar} level=warn");
        assert_eq!(
            fields.get("context").map(String::as_str),
            Some("&{foo bar}")
        );
        assert_eq!(fields.get("level").map(String::as_str), Some("warn"));
    }

    #[test]
    fn sdk_format_normalizes_level_to_lowercase() {
        let fields = parse(b"[WARN] disk nearly full");
        assert_eq!(fields.get("level").map(String::as_str), Some("warn"));
        assert_eq!(fields.get("msg").map(String::as_str), Some("disk nearly full"));
    }

    #[test]
    fn unrecognized_format_yields_empty_map() {
        assert!(parse(b"just some free-form text").is_empty());
    }

    #[test]
    fn malformed_key_value_yields_empty_map() {
        assert!(parse(b"notakeyvalue").is_empty());
    }
}
