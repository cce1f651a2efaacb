//! Null normalization for handler output.
//!
//! `null` を `""` に置き換える。対象はトップレベルの値と、
//! トップレベルにある配列の要素・オブジェクトの値まで。それより深い階層はそのまま。

use serde_json::{Map, Value};

fn blank(value: Value) -> Value {
    match value {
        Value::Null => Value::String(String::new()),
        other => other,
    }
}

/// Replace null-equivalent fields of a handler result with empty strings.
pub fn none_to_blank(obj: Map<String, Value>) -> Map<String, Value> {
    obj.into_iter()
        .map(|(key, value)| {
            let value = match value {
                Value::Array(items) => Value::Array(items.into_iter().map(blank).collect()),
                Value::Object(fields) => Value::Object(
                    fields
                        .into_iter()
                        .map(|(k, v)| (k, blank(v)))
                        .collect(),
                ),
                other => blank(other),
            };
            (key, value)
        })
        .collect()
}
