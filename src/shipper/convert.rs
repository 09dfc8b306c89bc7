//! Raw console line → container-log record.
//!
//! The collector expects one JSON object per line in the shape
//!
//! ```text
//! {"time": "2024-01-01T00:00:00Z", "stream": "stdout","log":"text\n"}
//! ```
//!
//! The record is rendered by hand rather than through a serializer: the byte
//! layout above is what existing collectors were fed, and only double quotes
//! are escaped in the `log` value.

use chrono::{DateTime, SecondsFormat, Utc};

/// Output stream tag of a record. Console output is always reported as stdout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
}

impl Stream {
    pub fn as_str(self) -> &'static str {
        match self {
            Stream::Stdout => "stdout",
        }
    }
}

/// One structured record, produced per input line and rendered immediately.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    /// Wall-clock time the line arrived.
    pub time: DateTime<Utc>,
    pub stream: Stream,
    /// Trimmed, quote-escaped line content (without the trailing `\n`).
    pub text: String,
}

impl LogRecord {
    /// Build a stdout record from a raw line.
    pub fn new(raw: &str, time: DateTime<Utc>) -> Self {
        Self {
            time,
            stream: Stream::Stdout,
            text: escape_line(raw),
        }
    }

    /// Render the record as a newline-terminated line.
    pub fn render(&self) -> String {
        format!(
            "{{\"time\": \"{}\", \"stream\": \"{}\",\"log\":\"{}\\n\"}}\n",
            self.time.to_rfc3339_opts(SecondsFormat::Secs, true),
            self.stream.as_str(),
            self.text,
        )
    }
}

/// Convert one raw line that arrived at `time` into a rendered record.
pub fn convert_line(raw: &str, time: DateTime<Utc>) -> String {
    LogRecord::new(raw, time).render()
}

/// Strip trailing whitespace and backslash-escape double quotes.
pub fn escape_line(raw: &str) -> String {
    raw.trim_end().replace('"', "\\\"")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn new_year() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn converts_quoted_line() {
        let out = convert_line("He said \"hi\"", new_year());
        assert_eq!(
            out,
            "{\"time\": \"2024-01-01T00:00:00Z\", \"stream\": \"stdout\",\"log\":\"He said \\\"hi\\\"\\n\"}\n"
        );
    }

    #[test]
    fn strips_trailing_whitespace_and_newlines() {
        assert_eq!(escape_line("boot ok \t\r\n"), "boot ok");
        assert_eq!(escape_line("   leading kept"), "   leading kept");
        assert_eq!(escape_line("\n"), "");
    }

    #[test]
    fn only_quotes_are_escaped() {
        assert_eq!(escape_line("tab\there \\ back"), "tab\there \\ back");
        assert_eq!(escape_line("\"\""), "\\\"\\\"");
    }

    #[test]
    fn escaping_round_trips() {
        for raw in ["plain", "say \"x\"", "\"", "a \\\" b", "ends with quote\""] {
            let escaped = escape_line(raw);
            assert_eq!(escaped.replace("\\\"", "\""), raw.trim_end());
        }
    }

    #[test]
    fn rendered_record_is_json() {
        let out = convert_line("kernel: [    0.000000] Linux version \"6.1\"  \n", new_year());
        assert!(out.ends_with('\n'));
        assert_eq!(out.matches('\n').count(), 1);

        let value: serde_json::Value = serde_json::from_str(out.trim_end()).expect("valid json");
        assert_eq!(value["time"], "2024-01-01T00:00:00Z");
        assert_eq!(value["stream"], "stdout");
        assert_eq!(
            value["log"],
            "kernel: [    0.000000] Linux version \"6.1\"\n"
        );
    }

    #[test]
    fn record_keeps_fields() {
        let record = LogRecord::new("x  ", new_year());
        assert_eq!(record.stream, Stream::Stdout);
        assert_eq!(record.text, "x");
        assert_eq!(record.time, new_year());
    }
}
