//! Rendering of host events for console output.
//!
//! - **Text**: one human-readable line per event
//! - **Json**: one JSON object per line, tagged with `"event"`

use serde::{Deserialize, Serialize};

use crate::event::HostEvent;

/// Console output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    /// Plain text, as the device controller always printed it.
    #[default]
    Text,
    /// JSON lines.
    Json,
}

/// Renders one event as a single line (no trailing newline).
pub fn render(event: &HostEvent, format: OutputFormat) -> String {
    match format {
        OutputFormat::Text => event.to_string(),
        OutputFormat::Json => serde_json::to_string(event).unwrap_or_else(|e| {
            tracing::warn!(error = %e, kind = event.kind(), "Failed to serialize event");
            event.to_string()
        }),
    }
}
