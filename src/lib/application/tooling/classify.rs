//! Maps raw transport and runtime failures onto [`McpError`].
//!
//! First match wins, case-insensitive substring search over the error message:
//! CORS markers, then timeout markers, then connect markers, then `Unknown`.

use super::error::{BoxError, McpError, McpErrorKind};
use crate::config::ClassifierConfig;
use tracing::debug;

const CORS_MARKERS: [&str; 3] = ["cors", "access to fetch", "blocked by cors"];

#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    timeout_markers: Vec<String>,
    connect_markers: Vec<String>,
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new(&ClassifierConfig::default())
    }
}

impl ErrorClassifier {
    pub fn new(config: &ClassifierConfig) -> Self {
        let normalise = |markers: &[String]| -> Vec<String> {
            markers
                .iter()
                .map(|marker| marker.trim().to_lowercase())
                .filter(|marker| !marker.is_empty())
                .collect()
        };
        Self {
            timeout_markers: normalise(&config.timeout_markers),
            connect_markers: normalise(&config.connect_markers),
        }
    }

    /// Classify any error. An error that already is an [`McpError`] is returned as-is;
    /// everything else keeps the original error as `cause`.
    pub fn classify(&self, error: impl Into<BoxError>, server: Option<&str>) -> McpError {
        let raw: BoxError = error.into();
        let raw = match raw.downcast::<McpError>() {
            Ok(classified) => return *classified,
            Err(raw) => raw,
        };

        let message = raw.to_string();
        let kind = self.kind_for(&message);
        debug!(server, kind = ?kind, "Classified tool server error");

        let display = match kind {
            McpErrorKind::Cors => format!("CORS error: {message}"),
            _ => message,
        };
        let mut classified = McpError::new(kind, display).with_cause(raw);
        if let Some(server) = server {
            classified = classified.with_server(server);
        }
        classified
    }

    fn kind_for(&self, message: &str) -> McpErrorKind {
        let lowered = message.to_lowercase();
        if CORS_MARKERS.iter().any(|marker| lowered.contains(marker)) {
            McpErrorKind::Cors
        } else if self.timeout_markers.iter().any(|m| lowered.contains(m.as_str())) {
            McpErrorKind::Timeout { timeout_ms: 0 }
        } else if self.connect_markers.iter().any(|m| lowered.contains(m.as_str())) {
            McpErrorKind::Connection
        } else {
            McpErrorKind::Unknown
        }
    }
}
