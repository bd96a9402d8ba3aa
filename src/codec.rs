//! Body serialization keyed by media type.

use std::sync::OnceLock;

use regex::Regex;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value as JsonValue;

use crate::{ResilientHttpError, Result};

/// Media types understood without a custom [`Converter`].
pub mod media_type {
    pub const JSON: &str = "application/json";
    pub const XML: &str = "application/xml";
    pub const PLAIN: &str = "text/plain";
}

/// Caller-supplied body format that takes precedence over the built-in ones.
///
/// Values cross the boundary as [`serde_json::Value`] so the trait stays
/// object-safe and a client can hold an `Arc<dyn Converter>`.
pub trait Converter: Send + Sync {
    fn serialize(&self, value: &JsonValue) -> Result<String>;
    fn deserialize(&self, text: &str) -> Result<JsonValue>;
}

/// Returns the lowercase media type without parameters (`; charset=...`).
pub fn essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// Serializes `value` for a request body.
pub fn serialize<T>(value: &T, content_type: &str, converter: Option<&dyn Converter>) -> Result<String>
where
    T: Serialize + ?Sized,
{
    if let Some(converter) = converter {
        let value = serde_json::to_value(value)
            .map_err(|err| ResilientHttpError::Serialization(err.to_string()))?;
        return converter.serialize(&value);
    }

    match essence(content_type).as_str() {
        media_type::JSON => serde_json::to_string(value)
            .map_err(|err| ResilientHttpError::Serialization(err.to_string())),
        media_type::XML => serialize_xml(value),
        _ => match serde_json::to_value(value) {
            Ok(JsonValue::String(text)) => Ok(text),
            _ => Err(ResilientHttpError::UnsupportedContentType(
                content_type.to_owned(),
            )),
        },
    }
}

/// A top-level string is taken as already-serialized XML. Other scalars have
/// no element name of their own and are wrapped in `<value>`.
fn serialize_xml<T>(value: &T) -> Result<String>
where
    T: Serialize + ?Sized,
{
    let xml = match serde_json::to_value(value) {
        Ok(JsonValue::String(text)) => return Ok(clean_xml(&text)),
        Ok(JsonValue::Bool(_) | JsonValue::Number(_) | JsonValue::Null) => {
            quick_xml::se::to_string_with_root(XML_SCALAR_ROOT, value)
        }
        _ => quick_xml::se::to_string(value),
    };
    xml.map(|xml| clean_xml(&xml))
        .map_err(|err| ResilientHttpError::Serialization(err.to_string()))
}

const XML_SCALAR_ROOT: &str = "value";

/// Deserializes a response body into `T`.
///
/// For an unknown media type, a `T` that accepts a plain string (such as
/// `String`) receives the raw text.
pub fn deserialize<T>(text: &str, content_type: &str, converter: Option<&dyn Converter>) -> Result<T>
where
    T: DeserializeOwned,
{
    if let Some(converter) = converter {
        let value = converter.deserialize(text)?;
        return serde_json::from_value(value)
            .map_err(|err| ResilientHttpError::Deserialization(err.to_string()));
    }

    match essence(content_type).as_str() {
        media_type::JSON => serde_json::from_str(text).map_err(|err| {
            ResilientHttpError::Deserialization(format!("invalid JSON: {err}; body: {text}"))
        }),
        media_type::XML => quick_xml::de::from_str(text).map_err(|err| {
            ResilientHttpError::Deserialization(format!("invalid XML: {err}; body: {text}"))
        }),
        _ => serde_json::from_value(JsonValue::String(text.to_owned()))
            .map_err(|_| ResilientHttpError::UnsupportedContentType(content_type.to_owned())),
    }
}

/// Strips whitespace between adjacent tags.
pub fn clean_xml(xml: &str) -> String {
    static BETWEEN_TAGS: OnceLock<Regex> = OnceLock::new();
    let pattern = BETWEEN_TAGS.get_or_init(|| Regex::new(r">\s*<").expect("pattern is valid"));
    pattern.replace_all(xml, "><").into_owned()
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};
    use serde_json::Value as JsonValue;

    use super::{clean_xml, deserialize, essence, media_type, serialize, Converter};
    use crate::{ResilientHttpError, Result};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Widget {
        name: String,
        quantity: u32,
        active: bool,
    }

    fn widget() -> Widget {
        Widget {
            name: "sprocket".to_owned(),
            quantity: 12,
            active: true,
        }
    }

    /// Wraps JSON in a `widget:` prefix so tests can tell it ran.
    struct PrefixedJson;

    impl Converter for PrefixedJson {
        fn serialize(&self, value: &JsonValue) -> Result<String> {
            Ok(format!("widget:{value}"))
        }

        fn deserialize(&self, text: &str) -> Result<JsonValue> {
            let body = text.strip_prefix("widget:").ok_or_else(|| {
                ResilientHttpError::Deserialization("missing widget: prefix".to_owned())
            })?;
            serde_json::from_str(body)
                .map_err(|err| ResilientHttpError::Deserialization(err.to_string()))
        }
    }

    #[test]
    fn essence_drops_parameters_and_case() {
        assert_eq!(essence("Application/JSON; charset=utf-8"), "application/json");
        assert_eq!(essence(""), "");
    }

    #[test]
    fn json_round_trip() {
        let text = serialize(&widget(), media_type::JSON, None).expect("serialize");
        assert_eq!(text, r#"{"name":"sprocket","quantity":12,"active":true}"#);
        let back: Widget =
            deserialize(&text, "application/json; charset=utf-8", None).expect("deserialize");
        assert_eq!(back, widget());
    }

    #[test]
    fn xml_round_trip() {
        let text = serialize(&widget(), media_type::XML, None).expect("serialize");
        assert!(text.starts_with("<Widget>"));
        assert!(!text.contains("> <"));
        let back: Widget = deserialize(&text, media_type::XML, None).expect("deserialize");
        assert_eq!(back, widget());
    }

    #[test]
    fn xml_string_is_sent_as_written() {
        let text = serialize("<a>\n  <b>1</b>\n</a>", media_type::XML, None).expect("serialize");
        assert_eq!(text, "<a><b>1</b></a>");
    }

    #[test]
    fn xml_scalar_is_wrapped_in_value_element() {
        let text = serialize(&42u32, media_type::XML, None).expect("serialize");
        assert_eq!(text, "<value>42</value>");
    }

    #[test]
    fn converter_takes_precedence_over_content_type() {
        let text = serialize(&widget(), "text/widget", Some(&PrefixedJson)).expect("serialize");
        assert!(text.starts_with("widget:{"));
        let back: Widget = deserialize(&text, "", Some(&PrefixedJson)).expect("deserialize");
        assert_eq!(back, widget());
    }

    #[test]
    fn plain_string_passes_through_unknown_type() {
        let text = serialize("This is a test string.", media_type::PLAIN, None).expect("serialize");
        assert_eq!(text, "This is a test string.");
        let back: String = deserialize(&text, media_type::PLAIN, None).expect("deserialize");
        assert_eq!(back, "This is a test string.");
    }

    #[test]
    fn unknown_type_rejects_structured_values() {
        let err = serialize(&widget(), "text/csv", None).expect_err("must fail");
        assert!(matches!(err, ResilientHttpError::UnsupportedContentType(ref ct) if ct == "text/csv"));

        let err = deserialize::<Widget>("{}", "text/csv", None).expect_err("must fail");
        assert!(matches!(err, ResilientHttpError::UnsupportedContentType(_)));
    }

    #[test]
    fn malformed_json_is_a_deserialization_error() {
        let err = deserialize::<Widget>("{not json", media_type::JSON, None).expect_err("must fail");
        assert!(matches!(err, ResilientHttpError::Deserialization(_)));
    }

    #[test]
    fn clean_xml_removes_inter_tag_whitespace() {
        let dirty = "<Widget>\n  <name>a b</name>\n  <quantity>1</quantity>\n</Widget>";
        assert_eq!(
            clean_xml(dirty),
            "<Widget><name>a b</name><quantity>1</quantity></Widget>"
        );
    }
}
