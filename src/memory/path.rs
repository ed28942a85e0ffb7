//! Path lookup into JSON messages
//!
//! Supports the dotted / indexed subset of JSONPath used in scripts:
//! `$.buttons[0].text`, `messageText`, `cards.1.content`, `$["odd key"]`.

use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Key(String),
    Index(usize),
}

fn parse(path: &str) -> Option<Vec<Segment>> {
    let path = path.trim();
    let path = path.strip_prefix('$').unwrap_or(path);
    let mut segments = Vec::new();
    let mut chars = path.chars().peekable();
    let mut key = String::new();

    let flush = |key: &mut String, segments: &mut Vec<Segment>| {
        if !key.is_empty() {
            let taken = std::mem::take(key);
            match taken.parse::<usize>() {
                Ok(i) => segments.push(Segment::Index(i)),
                Err(_) => segments.push(Segment::Key(taken)),
            }
        }
    };

    while let Some(c) = chars.next() {
        match c {
            '.' => flush(&mut key, &mut segments),
            '[' => {
                flush(&mut key, &mut segments);
                let mut inner = String::new();
                loop {
                    match chars.next()? {
                        ']' => break,
                        c => inner.push(c),
                    }
                }
                let inner = inner.trim();
                let quoted = inner
                    .strip_prefix('"')
                    .and_then(|s| s.strip_suffix('"'))
                    .or_else(|| inner.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')));
                match quoted {
                    Some(k) => segments.push(Segment::Key(k.to_string())),
                    None => segments.push(Segment::Index(inner.parse().ok()?)),
                }
            }
            c => key.push(c),
        }
    }
    flush(&mut key, &mut segments);
    Some(segments)
}

/// Resolve `path` inside `value`
pub fn lookup<'v>(value: &'v Value, path: &str) -> Option<&'v Value> {
    parse(path)?
        .iter()
        .try_fold(value, |current, segment| match (segment, current) {
            (Segment::Key(k), Value::Object(map)) => map.get(k),
            (Segment::Index(i), Value::Array(items)) => items.get(*i),
            // Numeric keys on objects, e.g. `{"1": ...}`
            (Segment::Index(i), Value::Object(map)) => map.get(&i.to_string()),
            _ => None,
        })
}

/// Text form of a JSON value, strings unquoted
pub fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
