use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::PREVIEW_ELLIPSIS;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestLogEntry {
    pub timestamp: DateTime<Utc>,
    pub user_request: String,
    pub response_preview: String,
    pub response_length: usize,
}

impl RequestLogEntry {
    pub fn new(
        timestamp: DateTime<Utc>,
        user_request: &str,
        response: &str,
        preview_chars: usize,
    ) -> Self {
        Self {
            timestamp,
            user_request: user_request.to_string(),
            response_preview: preview(response, preview_chars),
            response_length: response.chars().count(),
        }
    }
}

/// First `limit` characters of `text`, with an ellipsis marker if anything was cut.
pub fn preview(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((boundary, _)) => format!("{}{}", &text[..boundary], PREVIEW_ELLIPSIS),
        None => text.to_string(),
    }
}
