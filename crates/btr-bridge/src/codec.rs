//! Value codec for text-only message channels.
//!
//! Byte buffers and query parameters are inlined as tagged objects:
//!
//! ```text
//! {"__btrType":"ArrayBuffer","body":[1,2,3]}
//! {"__btrType":"URLSearchParams","body":"a=1&b=2"}
//! ```
//!
//! Blobs need an asynchronous read before their bytes are known, so the tree
//! is first serialized with a placeholder string in each blob's `body`. The
//! blobs are then materialized and every quoted placeholder is replaced by
//! the blob's byte array in a single substitution pass.

use crate::config::{BridgeConfig, Context};
use crate::value::{Blob, QueryParams, Value};
use crate::{BridgeError, Result};
use bytes::Bytes;
use regex::{Captures, Regex};
use serde_json::Map;
use tracing::debug;

const BLOB: &str = "Blob";
const ARRAY_BUFFER: &str = "ArrayBuffer";
const URL_SEARCH_PARAMS: &str = "URLSearchParams";

/// A value as it crosses the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum EncodedValue {
    /// Textual form with binary payloads inlined.
    Text(String),
    /// Structured pass-through for transports that carry binary values.
    Native(Value),
}

impl EncodedValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            EncodedValue::Text(text) => Some(text),
            EncodedValue::Native(_) => None,
        }
    }
}

/// Encoder/decoder for [`Value`] trees.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Codec {
    passthrough: bool,
    strict: bool,
}

impl Default for Codec {
    fn default() -> Self {
        Self::text()
    }
}

impl Codec {
    /// Always round-trip through text.
    pub fn text() -> Self {
        Self {
            passthrough: false,
            strict: false,
        }
    }

    /// Hand values to the transport unchanged.
    pub fn passthrough() -> Self {
        Self {
            passthrough: true,
            strict: false,
        }
    }

    pub fn for_context(context: &Context) -> Self {
        if context.transport_supports_binary {
            Self::passthrough()
        } else {
            Self::text()
        }
    }

    /// Reject unknown type markers on decode instead of keeping them as plain objects.
    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn is_passthrough(&self) -> bool {
        self.passthrough
    }

    pub async fn encode(&self, value: Value) -> Result<EncodedValue> {
        if self.passthrough {
            return Ok(EncodedValue::Native(value));
        }
        self.encode_text(&value).await.map(EncodedValue::Text)
    }

    /// Decode either form; native values are returned as-is.
    pub fn decode(&self, encoded: EncodedValue) -> Result<Value> {
        match encoded {
            EncodedValue::Text(text) => self.decode_text(&text),
            EncodedValue::Native(value) => Ok(value),
        }
    }

    pub async fn encode_text(&self, value: &Value) -> Result<String> {
        let nonce = uuid::Uuid::new_v4().simple().to_string();
        let mut blobs = Vec::new();
        let tree = mark(value, &nonce, &mut blobs);
        let text = serde_json::to_string(&tree)?;

        if blobs.is_empty() {
            return Ok(text);
        }

        let mut rendered = vec![String::new(); blobs.len()];
        for index in (0..blobs.len()).rev() {
            let data = blobs[index].bytes().await?;
            rendered[index] = serde_json::to_string(data.as_ref())?;
        }

        let pattern = Regex::new(&format!(
            r#""{}{}_(\d+)\$""#,
            regex::escape(BridgeConfig::PLACEHOLDER_PREFIX),
            nonce
        ))
        .map_err(|e| BridgeError::Other(format!("Invalid placeholder pattern: {}", e)))?;

        debug!("Inlining {} blob(s) into encoded payload", blobs.len());

        let substituted = pattern.replace_all(&text, |caps: &Captures| {
            caps[1]
                .parse::<usize>()
                .ok()
                .and_then(|index| rendered.get(index))
                .cloned()
                .unwrap_or_else(|| caps[0].to_string())
        });

        Ok(substituted.into_owned())
    }

    pub fn decode_text(&self, text: &str) -> Result<Value> {
        let tree: serde_json::Value = serde_json::from_str(text).map_err(|e| BridgeError::Parse {
            message: format!("Malformed payload: {}", e),
            source: Some(e),
        })?;
        self.unmark(tree)
    }

    fn unmark(&self, tree: serde_json::Value) -> Result<Value> {
        match tree {
            serde_json::Value::Array(items) => items
                .into_iter()
                .map(|item| self.unmark(item))
                .collect::<Result<Vec<_>>>()
                .map(Value::Array),
            serde_json::Value::Object(mut map) => {
                let marker = map
                    .get(BridgeConfig::TYPE_MARKER_KEY)
                    .and_then(|m| m.as_str())
                    .map(str::to_string);

                match marker.as_deref() {
                    Some(BLOB) => {
                        let data = byte_body(map.remove("body"), BLOB)?;
                        let content_type = map
                            .get("type")
                            .and_then(|t| t.as_str())
                            .unwrap_or_default()
                            .to_string();
                        Ok(Value::Blob(Blob::new(data, content_type)))
                    }
                    Some(ARRAY_BUFFER) => Ok(Value::Bytes(byte_body(map.remove("body"), ARRAY_BUFFER)?)),
                    Some(URL_SEARCH_PARAMS) => match map.remove("body") {
                        Some(serde_json::Value::String(body)) => {
                            Ok(Value::Query(QueryParams::parse(&body)))
                        }
                        _ => Err(BridgeError::parse("URLSearchParams body must be a string")),
                    },
                    Some(other) if self.strict => Err(BridgeError::UnsupportedType {
                        type_name: other.to_string(),
                    }),
                    _ => map
                        .into_iter()
                        .map(|(key, value)| Ok((key, self.unmark(value)?)))
                        .collect::<Result<_>>()
                        .map(Value::Object),
                }
            }
            scalar => Ok(Value::from(scalar)),
        }
    }
}

fn mark<'a>(value: &'a Value, nonce: &str, blobs: &mut Vec<&'a Blob>) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Number(n) => serde_json::Value::Number(n.clone()),
        Value::String(s) => serde_json::Value::String(s.clone()),
        Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(|item| mark(item, nonce, blobs)).collect())
        }
        Value::Object(map) => serde_json::Value::Object(
            map.iter()
                .map(|(key, item)| (key.clone(), mark(item, nonce, blobs)))
                .collect(),
        ),
        Value::Blob(blob) => {
            blobs.push(blob);
            let placeholder = format!(
                "{}{}_{}$",
                BridgeConfig::PLACEHOLDER_PREFIX,
                nonce,
                blobs.len() - 1
            );
            let mut marked = tagged(BLOB, serde_json::Value::String(placeholder));
            marked.insert(
                "type".to_string(),
                serde_json::Value::String(blob.content_type().to_string()),
            );
            serde_json::Value::Object(marked)
        }
        Value::Bytes(data) => serde_json::Value::Object(tagged(
            ARRAY_BUFFER,
            data.iter().map(|b| serde_json::Value::from(*b)).collect(),
        )),
        Value::Query(query) => serde_json::Value::Object(tagged(
            URL_SEARCH_PARAMS,
            serde_json::Value::String(query.to_string()),
        )),
    }
}

fn tagged(type_name: &str, body: serde_json::Value) -> Map<String, serde_json::Value> {
    let mut map = Map::new();
    map.insert(
        BridgeConfig::TYPE_MARKER_KEY.to_string(),
        serde_json::Value::String(type_name.to_string()),
    );
    map.insert("body".to_string(), body);
    map
}

fn byte_body(body: Option<serde_json::Value>, type_name: &str) -> Result<Bytes> {
    let items = match body {
        Some(serde_json::Value::Array(items)) => items,
        _ => {
            return Err(BridgeError::parse(format!(
                "{} body must be an array of bytes",
                type_name
            )))
        }
    };

    items
        .iter()
        .map(|item| {
            item.as_u64()
                .and_then(|n| u8::try_from(n).ok())
                .ok_or_else(|| {
                    BridgeError::parse(format!("{} body contains a non-byte value: {}", type_name, item))
                })
        })
        .collect::<Result<Vec<u8>>>()
        .map(Bytes::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn sample_tree() -> Value {
        let mut inner = BTreeMap::new();
        inner.insert("thumb".to_string(), Blob::new(vec![0u8, 255, 3], "image/png").into());
        inner.insert("raw".to_string(), Value::Bytes(Bytes::from_static(&[9, 8])));
        inner.insert(
            "form".to_string(),
            QueryParams::new().with("assetId", "42").into(),
        );
        Value::Array(vec![
            1.into(),
            "text".into(),
            Value::Null,
            true.into(),
            Value::Object(inner),
            Blob::new(Vec::<u8>::new(), "").into(),
        ])
    }

    #[tokio::test]
    async fn test_text_roundtrip_with_nested_binary_values() {
        let codec = Codec::text();
        let value = sample_tree();

        let encoded = codec.encode(value.clone()).await.unwrap();
        assert!(encoded.as_text().is_some());

        assert_eq!(codec.decode(encoded).unwrap(), value);
    }

    #[tokio::test]
    async fn test_encoded_form_inlines_tagged_bodies() {
        let codec = Codec::text();
        let value = Value::Array(vec![
            Value::Bytes(Bytes::from_static(&[1, 2])),
            Blob::new(vec![5u8], "text/plain").into(),
        ]);

        let text = codec.encode_text(&value).await.unwrap();

        assert!(text.contains(r#"{"__btrType":"ArrayBuffer","body":[1,2]}"#));
        assert!(text.contains(r#"{"__btrType":"Blob","body":[5],"type":"text/plain"}"#));
        assert!(!text.contains(BridgeConfig::PLACEHOLDER_PREFIX));
    }

    #[tokio::test]
    async fn test_many_blobs_substitute_by_their_own_index() {
        let codec = Codec::text();
        let blobs: Vec<Value> = (0u8..12).map(|i| Blob::new(vec![i], "x/y").into()).collect();
        let value = Value::Array(blobs);

        let decoded = codec.decode_text(&codec.encode_text(&value).await.unwrap()).unwrap();
        assert_eq!(decoded, value);
    }

    #[tokio::test]
    async fn test_placeholder_lookalike_strings_survive() {
        let codec = Codec::text();
        let value = Value::Array(vec![
            "$btr_async_value_0$".into(),
            Blob::new(vec![1u8], "").into(),
        ]);

        let decoded = codec.decode_text(&codec.encode_text(&value).await.unwrap()).unwrap();
        assert_eq!(decoded, value);
    }

    #[tokio::test]
    async fn test_file_backed_blob_is_read_on_encode() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("avatar.png");
        std::fs::write(&path, [4u8, 5, 6]).unwrap();

        let codec = Codec::text();
        let encoded = codec
            .encode(Blob::from_file(&path, "image/png").into())
            .await
            .unwrap();

        assert_eq!(
            codec.decode(encoded).unwrap(),
            Value::Blob(Blob::new(vec![4u8, 5, 6], "image/png"))
        );
    }

    #[tokio::test]
    async fn test_missing_blob_file_fails_encode() {
        let codec = Codec::text();
        let result = codec
            .encode(Blob::from_file("/nonexistent/blob.bin", "").into())
            .await;
        assert!(matches!(result, Err(BridgeError::Io { .. })));
    }

    #[tokio::test]
    async fn test_passthrough_is_identity() {
        let codec = Codec::for_context(&Context::background().with_binary_transport(true));
        let value = sample_tree();

        let encoded = codec.encode(value.clone()).await.unwrap();
        assert_eq!(encoded, EncodedValue::Native(value.clone()));
        assert_eq!(codec.decode(encoded).unwrap(), value);
    }

    #[test]
    fn test_malformed_text_is_parse_error() {
        let result = Codec::text().decode_text("{not json");
        assert!(matches!(result, Err(BridgeError::Parse { .. })));
    }

    #[test]
    fn test_bad_byte_values_are_parse_errors() {
        let codec = Codec::text();
        assert!(matches!(
            codec.decode_text(r#"{"__btrType":"ArrayBuffer","body":[256]}"#),
            Err(BridgeError::Parse { .. })
        ));
        assert!(matches!(
            codec.decode_text(r#"{"__btrType":"URLSearchParams","body":5}"#),
            Err(BridgeError::Parse { .. })
        ));
    }

    #[test]
    fn test_unknown_marker_permissive_and_strict() {
        let text = r#"{"__btrType":"Map","body":[]}"#;

        let permissive = Codec::text().decode_text(text).unwrap();
        assert_eq!(
            permissive.get(BridgeConfig::TYPE_MARKER_KEY).and_then(Value::as_str),
            Some("Map")
        );

        let strict = Codec::text().with_strict(true).decode_text(text);
        match strict {
            Err(BridgeError::UnsupportedType { type_name }) => assert_eq!(type_name, "Map"),
            other => panic!("Expected UnsupportedType, got: {:?}", other),
        }
    }
}
