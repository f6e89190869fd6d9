//! CORS (Cross-Origin Resource Sharing) configuration
//!
//! The landing page is served from the same origin, so CORS only matters when
//! another front-end posts uploads or fetches artifacts directly.

use std::str::FromStr;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};

/// CORS configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorsConfig {
    /// Enable CORS
    pub enabled: bool,
    /// Allowed origins (None = allow all)
    pub allowed_origins: Option<Vec<String>>,
    /// Allowed HTTP methods
    pub allowed_methods: Vec<String>,
    /// Allowed request headers
    pub allowed_headers: Vec<String>,
    /// Headers readable by cross-origin scripts
    pub expose_headers: Vec<String>,
    /// Preflight cache duration in seconds
    pub max_age_secs: u64,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            allowed_origins: None,
            allowed_methods: ["GET", "POST", "OPTIONS"].map(String::from).to_vec(),
            allowed_headers: vec!["Content-Type".to_string()],
            // Lets a cross-origin client read the artifact filename
            expose_headers: vec!["Content-Disposition".to_string()],
            max_age_secs: 86400,
        }
    }
}

/// Parse every entry, dropping the ones that are not valid
fn parse_all<T: FromStr>(values: &[String]) -> Vec<T> {
    values.iter().filter_map(|v| v.parse().ok()).collect()
}

impl CorsConfig {
    /// Restrict to the given origins
    pub fn strict(origins: Vec<String>) -> Self {
        Self {
            allowed_origins: Some(origins),
            max_age_secs: 3600,
            ..Default::default()
        }
    }

    /// Create a disabled config
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }

    /// Whether every origin is accepted
    fn allows_any_origin(&self) -> bool {
        self.allowed_origins
            .as_ref()
            .map_or(true, |origins| origins.iter().any(|o| o == "*"))
    }

    /// Build the tower-http layer; a disabled config adds no headers
    pub fn into_layer(self) -> CorsLayer {
        if !self.enabled {
            return CorsLayer::new();
        }

        let mut layer = CorsLayer::new()
            .allow_methods(parse_all::<axum::http::Method>(&self.allowed_methods))
            .allow_headers(parse_all::<axum::http::HeaderName>(&self.allowed_headers))
            .expose_headers(parse_all::<axum::http::HeaderName>(&self.expose_headers))
            .max_age(Duration::from_secs(self.max_age_secs));

        if self.allows_any_origin() {
            layer = layer.allow_origin(Any);
        } else if let Some(origins) = &self.allowed_origins {
            let origins = parse_all::<axum::http::HeaderValue>(origins);
            if !origins.is_empty() {
                layer = layer.allow_origin(origins);
            }
        }

        layer
    }
}
