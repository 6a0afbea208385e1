//! Base URL canonicalization and route URL building.

use std::collections::{BTreeMap, HashSet};

use serde_json::Value;
use url::Url;

/// Error type for URL building failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UrlError {
    #[error("empty URL")]
    Empty,

    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("missing route param: {0}")]
    MissingParam(String),
}

/// Param holding extra query values, flattened into the query string.
const QUERY_PARAM: &str = "query";

/// Canonicalize the API base URL.
///
/// Normalization steps:
/// 1. Trim leading/trailing whitespace
/// 2. Default scheme to https:// if missing
/// 3. Lowercase the host
/// 4. Remove fragment and query
pub fn canonicalize_base(input: &str) -> Result<Url, UrlError> {
    let trimmed = input.trim();

    if trimmed.is_empty() {
        return Err(UrlError::Empty);
    }

    let url_str = if trimmed.contains("://") { trimmed.to_string() } else { format!("https://{trimmed}") };

    let mut parsed = Url::parse(&url_str).map_err(|e| UrlError::InvalidUrl(e.to_string()))?;

    match parsed.scheme() {
        "http" | "https" => {}
        scheme => return Err(UrlError::UnsupportedScheme(scheme.to_string())),
    }

    if let Some(host) = parsed.host_str() {
        let host = host.to_lowercase();
        parsed.set_host(Some(&host)).map_err(|e| UrlError::InvalidUrl(e.to_string()))?;
    }

    parsed.set_fragment(None);
    parsed.set_query(None);

    Ok(parsed)
}

/// Render `template` (segments like `:post_id`) against `base`.
///
/// Params the template does not consume become query pairs, and so do the
/// entries of a nested `query` object. Null params are skipped.
pub fn build_url(base: &Url, template: &str, params: &BTreeMap<String, Value>) -> Result<Url, UrlError> {
    let mut url = base.clone();
    let mut consumed = HashSet::new();

    {
        let mut segments =
            url.path_segments_mut().map_err(|_| UrlError::InvalidUrl(format!("{base} cannot be a base")))?;
        segments.pop_if_empty();

        for part in template.split('/').filter(|part| !part.is_empty()) {
            match part.strip_prefix(':') {
                Some(name) => {
                    let value = params
                        .get(name)
                        .filter(|v| !v.is_null())
                        .ok_or_else(|| UrlError::MissingParam(name.to_string()))?;
                    segments.push(&scalar(value));
                    consumed.insert(name);
                }
                None => {
                    segments.push(part);
                }
            }
        }
    }

    let mut pairs = Vec::new();
    for (name, value) in params {
        if consumed.contains(name.as_str()) {
            continue;
        }
        match (name.as_str(), value) {
            (QUERY_PARAM, Value::Object(query)) => {
                for (name, value) in query {
                    flatten(name, value, &mut pairs);
                }
            }
            _ => flatten(name, value, &mut pairs),
        }
    }

    if !pairs.is_empty() {
        url.query_pairs_mut().extend_pairs(pairs);
    }

    Ok(url)
}

/// Rails-style query flattening: `a[]=1&a[]=2`, `filter[kind]=text`.
fn flatten(name: &str, value: &Value, pairs: &mut Vec<(String, String)>) {
    match value {
        Value::Null => {}
        Value::Array(items) => {
            for item in items {
                flatten(&format!("{name}[]"), item, pairs);
            }
        }
        Value::Object(fields) => {
            for (field, item) in fields {
                flatten(&format!("{name}[{field}]"), item, pairs);
            }
        }
        scalar_value => pairs.push((name.to_string(), scalar(scalar_value))),
    }
}

fn scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
