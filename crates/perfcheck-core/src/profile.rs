//! Profile results
//!
//! One [`ProfileResult`] is produced per successful profiling round trip.

use serde::{Deserialize, Serialize};

/// Measurements captured from a single instrumented request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileResult {
    /// Server-side elapsed time in milliseconds (`X-Runtime` * 1000)
    pub latency_ms: f64,
    /// Database queries issued while serving the request
    pub query_count: u64,
    /// Link to the profiler artifact recorded for this request
    pub profile_url: String,
    pub response_code: u16,
    pub response_body: String,
    /// Resident set size of the server process after the request, in KiB
    pub server_memory_kb: u64,
    /// Stack trace lines, present only when the response pointed at one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backtrace: Option<Vec<String>>,
}

impl ProfileResult {
    /// Whether the target answered with a 2xx status.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.response_code)
    }

    /// Latency in seconds, as reported by the target.
    pub fn latency_secs(&self) -> f64 {
        self.latency_ms / 1000.0
    }

    /// One-line summary for logs and terminal output.
    pub fn summary(&self) -> String {
        format!(
            "{} {:.1}ms {} queries {}KB",
            self.response_code, self.latency_ms, self.query_count, self.server_memory_kb
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ProfileResult {
        ProfileResult {
            latency_ms: 120500.0,
            query_count: 80,
            profile_url: "http://127.0.0.1:3031/mini-profiler-resources/results?id=abc".into(),
            response_code: 200,
            response_body: "body".into(),
            server_memory_kb: 2048,
            backtrace: None,
        }
    }

    #[test]
    fn test_absent_backtrace_is_omitted_from_json() {
        let json = serde_json::to_value(sample()).unwrap();
        assert!(json.get("backtrace").is_none());
        assert_eq!(json["query_count"], 80);
    }

    #[test]
    fn test_backtrace_survives_json() {
        let mut result = sample();
        result.backtrace = Some(vec!["one".into(), "two".into()]);

        let json = serde_json::to_string(&result).unwrap();
        let parsed: ProfileResult = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.backtrace, Some(vec!["one".into(), "two".into()]));
    }

    #[test]
    fn test_summary_and_status() {
        let result = sample();
        assert!(result.is_success());
        assert_eq!(result.latency_secs(), 120.5);
        assert_eq!(result.summary(), "200 120500.0ms 80 queries 2048KB");
    }
}
