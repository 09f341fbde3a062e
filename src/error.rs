// Error types for glitchq.
// Separates application-level API rejections from transport failures.

use std::collections::BTreeMap;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum GlitchError {
    /// The API answered with `ok != 1`.
    #[error("{code} for {endpoint}?{}", format_params(.params))]
    Api {
        code: String,
        endpoint: String,
        params: BTreeMap<String, String>,
    },

    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Request to {endpoint} timed out")]
    Timeout { endpoint: String },

    #[error("Malformed response body from {endpoint}: {source}")]
    MalformedBody {
        endpoint: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Missing API token: set GLITCH_TOKEN or create the token file")]
    MissingToken,

    #[error("Invalid header value: {0}")]
    InvalidHeader(#[from] reqwest::header::InvalidHeaderValue),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl GlitchError {
    /// Network, timeout and undecodable-body failures.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            GlitchError::Transport(_) | GlitchError::Timeout { .. } | GlitchError::MalformedBody { .. }
        )
    }

    /// Server-reported error code, for application-level rejections.
    pub fn api_code(&self) -> Option<&str> {
        match self {
            GlitchError::Api { code, .. } => Some(code),
            _ => None,
        }
    }
}

fn format_params(params: &BTreeMap<String, String>) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

pub type Result<T> = std::result::Result<T, GlitchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_display() {
        let mut params = BTreeMap::new();
        params.insert("skill_class".to_string(), "alchemy_1".to_string());
        params.insert("page".to_string(), "2".to_string());

        let err = GlitchError::Api {
            code: "not_enough_brain".to_string(),
            endpoint: "skills.learn".to_string(),
            params,
        };

        assert_eq!(
            err.to_string(),
            "not_enough_brain for skills.learn?page=2&skill_class=alchemy_1"
        );
        assert_eq!(err.api_code(), Some("not_enough_brain"));
        assert!(!err.is_transport());
    }

    #[test]
    fn test_transport_classification() {
        let timeout = GlitchError::Timeout {
            endpoint: "players.info".to_string(),
        };
        assert!(timeout.is_transport());
        assert!(timeout.api_code().is_none());

        let source = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let malformed = GlitchError::MalformedBody {
            endpoint: "players.info".to_string(),
            source,
        };
        assert!(malformed.is_transport());

        assert!(!GlitchError::MissingToken.is_transport());
    }
}
