//! Query string merging and URL resolution.
//!
//! Works on the textual URL so existing query entries are never reparsed,
//! reordered or re-encoded.

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde::Serialize;

use crate::{HttpClientError, Result};

/// Everything except RFC 3986 unreserved characters.
const QUERY_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// A value that can be used as a query argument.
///
/// `None` marks a null argument, which is dropped or sent as `key=` depending
/// on the `ignore_null_arguments` option.
pub trait ArgumentValue {
    /// Convert into the textual argument value.
    fn into_argument(self) -> Option<String>;
}

impl ArgumentValue for String {
    fn into_argument(self) -> Option<String> {
        Some(self)
    }
}

impl ArgumentValue for &str {
    fn into_argument(self) -> Option<String> {
        Some(self.to_string())
    }
}

impl ArgumentValue for &String {
    fn into_argument(self) -> Option<String> {
        Some(self.clone())
    }
}

impl<T: ArgumentValue> ArgumentValue for Option<T> {
    fn into_argument(self) -> Option<String> {
        self.and_then(ArgumentValue::into_argument)
    }
}

macro_rules! display_argument {
    ($($ty:ty),*) => {
        $(
            impl ArgumentValue for $ty {
                fn into_argument(self) -> Option<String> {
                    Some(self.to_string())
                }
            }
        )*
    };
}

display_argument!(
    bool, char, i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize, f32, f64
);

/// Ordered query arguments built from a serializable record.
///
/// Arrays become repeated keys and `null` fields become null arguments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Arguments {
    pairs: Vec<(String, Option<String>)>,
}

impl Arguments {
    /// Create an empty argument list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an argument.
    pub fn push(&mut self, key: impl Into<String>, value: impl ArgumentValue) {
        self.pairs.push((key.into(), value.into_argument()));
    }

    /// Flatten the top-level fields of a serializable struct or map.
    pub fn from_serialize<T: Serialize + ?Sized>(record: &T) -> Result<Self> {
        let value = serde_json::to_value(record)
            .map_err(|e| HttpClientError::RequestBuild(e.to_string()))?;
        let serde_json::Value::Object(fields) = value else {
            return Err(HttpClientError::RequestBuild(
                "query arguments must serialize to a map".to_string(),
            ));
        };

        let mut arguments = Self::new();
        for (key, field) in fields {
            match field {
                serde_json::Value::Array(items) => {
                    for item in items {
                        arguments.pairs.push((key.clone(), scalar_to_argument(item)));
                    }
                }
                other => arguments.pairs.push((key, scalar_to_argument(other))),
            }
        }
        Ok(arguments)
    }

    /// Number of arguments.
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    /// Whether there are no arguments.
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

impl IntoIterator for Arguments {
    type Item = (String, Option<String>);
    type IntoIter = std::vec::IntoIter<(String, Option<String>)>;

    fn into_iter(self) -> Self::IntoIter {
        self.pairs.into_iter()
    }
}

fn scalar_to_argument(value: serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

/// Append arguments to a URL's query string.
///
/// Non-null pairs come first in their original order, then null pairs as
/// `key=` unless `ignore_null_arguments` is set. Duplicate keys are kept. A
/// fragment stays after the query. If nothing is added the URL is returned
/// unchanged.
pub fn merge_query<K, V>(url: &str, arguments: &[(K, Option<V>)], ignore_null_arguments: bool) -> String
where
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut addition = String::new();
    let mut push = |key: &str, value: &str| {
        if !addition.is_empty() {
            addition.push('&');
        }
        addition.extend(utf8_percent_encode(key, QUERY_COMPONENT));
        addition.push('=');
        addition.extend(utf8_percent_encode(value, QUERY_COMPONENT));
    };

    for (key, value) in arguments {
        if let Some(value) = value {
            push(key.as_ref(), value.as_ref());
        }
    }
    if !ignore_null_arguments {
        for (key, value) in arguments {
            if value.is_none() {
                push(key.as_ref(), "");
            }
        }
    }

    if addition.is_empty() {
        return url.to_string();
    }

    let (head, fragment) = match url.find('#') {
        Some(index) => url.split_at(index),
        None => (url, ""),
    };

    let mut merged = String::with_capacity(url.len() + addition.len() + 1);
    merged.push_str(head);
    match head.find('?') {
        Some(index) if index + 1 < head.len() && !head.ends_with('&') => merged.push('&'),
        Some(_) => {}
        None => merged.push('?'),
    }
    merged.push_str(&addition);
    merged.push_str(fragment);
    merged
}

/// Resolve a resource against an optional base URL.
pub fn resolve_url(base: Option<&str>, resource: &str) -> Result<String> {
    let resource = resource.trim();

    if resource.is_empty() {
        return base.map(str::to_string).ok_or_else(|| {
            HttpClientError::InvalidUrl("no resource and no base URL were specified".to_string())
        });
    }
    if let Ok(absolute) = url::Url::parse(resource)
        && absolute.has_host()
    {
        return Ok(resource.to_string());
    }

    let base = base.ok_or_else(|| {
        HttpClientError::Configuration(format!(
            "can't use relative URL '{resource}' because no base URL was specified"
        ))
    })?;
    let parsed = url::Url::parse(base)?;

    if parsed.fragment().is_some() || resource.starts_with('#') {
        return Ok(format!("{base}{resource}"));
    }

    if resource.starts_with('?') || resource.starts_with('&') {
        let query = resource.trim_start_matches(['?', '&']);
        let base = base.trim_end_matches('&');
        let separator = if base.ends_with('?') {
            ""
        } else if parsed.query().is_some() {
            "&"
        } else {
            "?"
        };
        return Ok(format!("{base}{separator}{query}"));
    }

    let mut directory = parsed;
    if !directory.path().ends_with('/') {
        let path = format!("{}/", directory.path());
        directory.set_path(&path);
    }
    Ok(directory.join(resource)?.to_string())
}
