// API wire types.
// Request parameters, the response envelope, and serde helpers for the simple API.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::cache::TOKEN_PARAM;
use crate::error::{GlitchError, Result};

/// Request parameters. Ordered so cache keys are deterministic.
pub type Params = BTreeMap<String, String>;

/// Build a parameter map from string pairs.
pub fn params<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Params
where
    K: Into<String>,
    V: Into<String>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

/// A request as handed to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub endpoint: String,
    pub params: Params,
    pub headers: Vec<(String, String)>,
}

impl HttpRequest {
    /// Parameters with the credential removed, for diagnostics.
    pub fn public_params(&self) -> Params {
        self.params
            .iter()
            .filter(|(k, _)| k.as_str() != TOKEN_PARAM)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

/// Validate the `{"ok": 1}` envelope every response carries.
pub fn check_envelope(endpoint: &str, params: &Params, body: Value) -> Result<Value> {
    if body.get("ok").and_then(Value::as_i64) == Some(1) {
        return Ok(body);
    }

    let code = body
        .get("error")
        .and_then(Value::as_str)
        .unwrap_or("unknown error")
        .to_string();

    Err(GlitchError::Api {
        code,
        endpoint: endpoint.to_string(),
        params: params.clone(),
    })
}

/// Page count reported by a paginated response; absent means one page.
pub fn page_count(body: &Value) -> u64 {
    body.get("pages").and_then(Value::as_u64).unwrap_or(1)
}

/// Deserialize the API's `0|1` flags (also accepting JSON booleans).
pub fn int_bool<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Bool(b) => b,
        Value::Number(n) => n.as_i64().is_some_and(|n| n != 0),
        Value::String(s) => s != "0" && !s.is_empty(),
        _ => false,
    })
}

/// Deserialize a collection that the API sends either as an object keyed by
/// id or as an array (PHP-style empty objects arrive as `[]`).
pub fn keyed_object<'de, D>(
    deserializer: D,
) -> std::result::Result<serde_json::Map<String, Value>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Object(map) => map,
        _ => serde_json::Map::new(),
    })
}

/// Deserialize a list of ids sent either as an array or as an object keyed by id.
pub fn id_list<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .collect(),
        Value::Object(map) => map.into_iter().map(|(k, _)| k).collect(),
        Value::String(s) if !s.is_empty() => vec![s],
        _ => Vec::new(),
    })
}

/// Deserialize a non-negative count that may arrive as a float or a string.
pub fn lenient_u64<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f > 0.0).map(|f| f as u64))
            .unwrap_or(0),
        Value::String(s) => s.trim().parse().unwrap_or(0),
        _ => 0,
    })
}
