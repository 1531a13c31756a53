//! Console sink: one line per host event on stdout.

use std::io::{self, Write};

use lightwire_core::{HostEvent, OutputFormat, render};
use lightwire_host::EventSink;

/// Prints every event to stdout in the chosen format.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleSink {
    format: OutputFormat,
}

impl ConsoleSink {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    /// Writes one rendered event followed by a newline.
    pub fn write_event<W: Write>(&self, out: &mut W, event: &HostEvent) -> io::Result<()> {
        writeln!(out, "{}", render(event, self.format))?;
        out.flush()
    }
}

impl EventSink for ConsoleSink {
    fn emit(&self, event: &HostEvent) {
        let stdout = io::stdout();
        let mut out = stdout.lock();
        if let Err(e) = self.write_event(&mut out, event) {
            tracing::warn!(error = %e, kind = event.kind(), "Failed to write event");
        }
    }
}

#[cfg(test)]
mod tests {
    use lightwire_core::{AlertLevel, LightAlert};

    use super::*;

    fn alert() -> HostEvent {
        HostEvent::Alert(LightAlert {
            level: AlertLevel::High,
            value: 950,
            sequence: 2,
        })
    }

    #[test]
    fn text_lines() {
        let sink = ConsoleSink::default();
        let mut out = Vec::new();
        sink.write_event(&mut out, &HostEvent::message("Hello")).unwrap();
        sink.write_event(&mut out, &alert()).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "Hello\nHigh Light (950)\n");
    }

    #[test]
    fn json_lines() {
        let sink = ConsoleSink::new(OutputFormat::Json);
        let mut out = Vec::new();
        sink.write_event(&mut out, &alert()).unwrap();

        let line = String::from_utf8(out).unwrap();
        let value: serde_json::Value = serde_json::from_str(line.trim_end()).unwrap();
        assert_eq!(value["event"], "alert");
        assert_eq!(value["level"], "high");
        assert_eq!(value["value"], 950);
    }
}
