use std::collections::BTreeMap;

use crate::domain::{AttrValue, PropValue};

/// Escapes a string for embedding inside a double-quoted Cypher literal.
pub fn escape_str(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    for ch in value.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            other => out.push(other),
        }
    }
    out
}

pub fn escape_value(value: &AttrValue) -> AttrValue {
    match value {
        AttrValue::Scalar(PropValue::Str(text)) => AttrValue::Scalar(PropValue::Str(escape_str(text))),
        AttrValue::Scalar(PropValue::List(items)) => {
            escape_value(&AttrValue::from(PropValue::List(items.clone())))
        }
        AttrValue::Scalar(other) => AttrValue::Scalar(other.clone()),
        AttrValue::List(items) => AttrValue::List(items.iter().map(escape_value).collect()),
        AttrValue::Map(entries) => AttrValue::Map(
            entries
                .iter()
                .map(|(key, value)| (key.clone(), escape_value(value)))
                .collect::<BTreeMap<_, _>>(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_backslash_before_quote() {
        assert_eq!(escape_str(r#"a\"b"#), r#"a\\\"b"#);
        assert_eq!(escape_str("line\nnext"), "line\\nnext");
    }

    #[test]
    fn nested_values_are_escaped() {
        let mut inner = BTreeMap::new();
        inner.insert("k".to_string(), AttrValue::Scalar(PropValue::from("say \"hi\"")));
        let value = AttrValue::List(vec![
            AttrValue::Map(inner),
            AttrValue::Scalar(PropValue::Int(4)),
        ]);

        let AttrValue::List(items) = escape_value(&value) else {
            panic!("expected list");
        };
        let AttrValue::Map(entries) = &items[0] else {
            panic!("expected map");
        };
        assert_eq!(
            entries["k"],
            AttrValue::Scalar(PropValue::from("say \\\"hi\\\""))
        );
        assert_eq!(items[1], AttrValue::Scalar(PropValue::Int(4)));
    }
}
