//! Structured log events, one JSON object per line on stdout.

use serde::Serialize;

#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum LogEvent<'a> {
    File {
        status: &'a str,
        file: &'a str,
        points: u64,
    },
    Progress {
        thread: usize,
        #[serde(rename = "currentPoint")]
        current_point: u64,
        #[serde(rename = "totalPoints")]
        total_points: u64,
        percentage: f64,
        file: &'a str,
    },
    Error {
        message: &'a str,
        #[serde(skip_serializing_if = "Option::is_none")]
        file: Option<&'a str>,
    },
    End {
        status: &'a str,
        files: u64,
        points: u64,
        errors: u64,
        clamped: u64,
    },
}

/// Shared emitter; a disabled instance swallows everything so call sites
/// never branch on the `json` setting.
#[derive(Debug, Clone, Copy)]
pub struct EventWriter {
    enabled: bool,
}

impl EventWriter {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub fn emit(&self, event: &LogEvent<'_>) {
        if !self.enabled {
            return;
        }
        match serde_json::to_string(event) {
            Ok(line) => println!("{line}"),
            Err(e) => log::warn!("failed to serialize log event: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_tag() {
        let event = LogEvent::Progress {
            thread: 2,
            current_point: 50,
            total_points: 200,
            percentage: 25.0,
            file: "a.las",
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"event\":\"progress\""));
        assert!(json.contains("\"currentPoint\":50"));

        let end = LogEvent::End {
            status: "success",
            files: 3,
            points: 1000,
            errors: 0,
            clamped: 2,
        };
        let json = serde_json::to_string(&end).unwrap();
        assert!(json.contains("\"event\":\"end\""));
    }
}
