//! Body formatters selected by content type.

use std::sync::Arc;

use bytes::Bytes;
use serde_json::Value;

use crate::{HttpClientError, Result};

/// Serializer/deserializer for one family of media types.
///
/// Models cross the trait boundary as [`serde_json::Value`] so formatters stay
/// object safe; typed conversion happens on either side.
pub trait Formatter: Send + Sync {
    /// Media types handled by this formatter, lowercase, without parameters.
    fn media_types(&self) -> &[&'static str];

    /// Whether this formatter handles the given media type.
    fn supports(&self, media_type: &str) -> bool {
        self.media_types().iter().any(|m| m.eq_ignore_ascii_case(media_type))
    }

    /// Serialize a model into a request body.
    fn serialize(&self, value: &Value) -> Result<Bytes>;

    /// Deserialize a response body.
    fn deserialize(&self, body: &[u8]) -> Result<Value>;
}

/// JSON formatter, also matching structured `+json` media types.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonFormatter;

impl Formatter for JsonFormatter {
    fn media_types(&self) -> &[&'static str] {
        &["application/json", "text/json"]
    }

    fn supports(&self, media_type: &str) -> bool {
        self.media_types().iter().any(|m| m.eq_ignore_ascii_case(media_type))
            || media_type.to_ascii_lowercase().ends_with("+json")
    }

    fn serialize(&self, value: &Value) -> Result<Bytes> {
        serde_json::to_vec(value)
            .map(Bytes::from)
            .map_err(|e| HttpClientError::Format(e.to_string()))
    }

    fn deserialize(&self, body: &[u8]) -> Result<Value> {
        serde_json::from_slice(body).map_err(|e| HttpClientError::Format(e.to_string()))
    }
}

/// `application/x-www-form-urlencoded` formatter for flat records.
#[derive(Debug, Default, Clone, Copy)]
pub struct FormUrlEncodedFormatter;

impl Formatter for FormUrlEncodedFormatter {
    fn media_types(&self) -> &[&'static str] {
        &["application/x-www-form-urlencoded"]
    }

    fn serialize(&self, value: &Value) -> Result<Bytes> {
        serde_urlencoded::to_string(value)
            .map(Bytes::from)
            .map_err(|e| HttpClientError::Format(e.to_string()))
    }

    fn deserialize(&self, body: &[u8]) -> Result<Value> {
        let pairs: Vec<(String, String)> = serde_urlencoded::from_bytes(body)
            .map_err(|e| HttpClientError::Format(e.to_string()))?;
        Ok(Value::Object(
            pairs.into_iter().map(|(k, v)| (k, Value::String(v))).collect(),
        ))
    }
}

/// Plain text formatter; models must be strings.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainTextFormatter;

impl Formatter for PlainTextFormatter {
    fn media_types(&self) -> &[&'static str] {
        &["text/plain"]
    }

    fn serialize(&self, value: &Value) -> Result<Bytes> {
        match value {
            Value::String(text) => Ok(Bytes::from(text.clone())),
            other => Ok(Bytes::from(other.to_string())),
        }
    }

    fn deserialize(&self, body: &[u8]) -> Result<Value> {
        std::str::from_utf8(body)
            .map(|text| Value::String(text.to_string()))
            .map_err(|e| HttpClientError::Format(e.to_string()))
    }
}

/// Ordered set of formatters. The first one is the default.
#[derive(Clone)]
pub struct FormatterCollection {
    formatters: Vec<Arc<dyn Formatter>>,
}

impl FormatterCollection {
    /// An empty collection.
    pub fn empty() -> Self {
        Self {
            formatters: Vec::new(),
        }
    }

    /// Add a formatter after the existing ones.
    pub fn add<F: Formatter + 'static>(&mut self, formatter: F) {
        self.formatters.push(Arc::new(formatter));
    }

    /// Add a formatter ahead of the existing ones, making it the default.
    pub fn add_first<F: Formatter + 'static>(&mut self, formatter: F) {
        self.formatters.insert(0, Arc::new(formatter));
    }

    /// Number of registered formatters.
    pub fn len(&self) -> usize {
        self.formatters.len()
    }

    /// Whether no formatters are registered.
    pub fn is_empty(&self) -> bool {
        self.formatters.is_empty()
    }

    /// Select a formatter for a `Content-Type` value.
    ///
    /// Parameters such as `charset` are ignored. Without a content type the
    /// default (first) formatter is used.
    pub fn select(&self, content_type: Option<&str>) -> Result<Arc<dyn Formatter>> {
        let media_type = content_type
            .map(|ct| ct.split(';').next().unwrap_or_default().trim())
            .filter(|ct| !ct.is_empty());

        let found = match media_type {
            Some(media_type) => self.formatters.iter().find(|f| f.supports(media_type)),
            None => self.formatters.first(),
        };

        found.cloned().ok_or_else(|| {
            HttpClientError::NoFormatter(media_type.unwrap_or("<none>").to_string())
        })
    }
}

impl Default for FormatterCollection {
    fn default() -> Self {
        let mut formatters = Self::empty();
        formatters.add(JsonFormatter);
        formatters.add(FormUrlEncodedFormatter);
        formatters.add(PlainTextFormatter);
        formatters
    }
}

impl std::fmt::Debug for FormatterCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.formatters.iter().map(|fmt| fmt.media_types()))
            .finish()
    }
}
