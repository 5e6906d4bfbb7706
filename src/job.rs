//! Job file parsing.
//!
//! A job file is JSON with the endpoints to deliver to and the ordered
//! payloads to send:
//!
//! ```json
//! {
//!   "endpoints": ["https://a.example.com/hook", "https://b.example.com/hook"],
//!   "payloads": [{"content": "deploy started"}, "plain text"]
//! }
//! ```
//!
//! Strings become plain-text payloads, any other JSON value is sent as JSON.

use std::path::Path;

use anyhow::{Context, Result};
use fanout_core::Payload;
use serde::Deserialize;

/// Parsed job file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobFile {
    /// Endpoint URLs, validated when the job is built.
    pub endpoints: Vec<String>,
    /// Payloads in delivery order.
    #[serde(default)]
    pub payloads: Vec<PayloadSpec>,
}

/// One payload entry.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum PayloadSpec {
    /// Sent as `text/plain`.
    Text(String),
    /// Sent as `application/json`.
    Json(serde_json::Value),
}

impl JobFile {
    /// Reads and parses a job file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read job file {}", path.display()))?;
        Self::parse(&contents).with_context(|| format!("invalid job file {}", path.display()))
    }

    /// Parses job JSON.
    pub fn parse(contents: &str) -> Result<Self> {
        Ok(serde_json::from_str(contents)?)
    }

    /// Converts payload entries into payloads.
    pub fn payloads(&self) -> Result<Vec<Payload>> {
        self.payloads
            .iter()
            .enumerate()
            .map(|(index, spec)| match spec {
                PayloadSpec::Text(text) => Ok(Payload::text(text.clone())),
                PayloadSpec::Json(value) => Payload::json(value)
                    .with_context(|| format!("payload {index} could not be encoded")),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn parses_mixed_payloads() {
        let job = JobFile::parse(
            r#"{
                "endpoints": ["https://a.example.com/hook"],
                "payloads": ["x", {"content": "y", "embeds": []}]
            }"#,
        )
        .unwrap();

        assert_eq!(job.endpoints, vec!["https://a.example.com/hook"]);

        let payloads = job.payloads().unwrap();
        assert_eq!(payloads.len(), 2);
        assert_eq!(payloads[0].body.as_ref(), b"x");
        assert!(payloads[0].content_type.starts_with("text/plain"));
        assert_eq!(payloads[1].content_type, "application/json");

        let decoded: serde_json::Value = serde_json::from_slice(&payloads[1].body).unwrap();
        assert_eq!(decoded["content"], "y");
    }

    #[test]
    fn payloads_default_to_empty() {
        let job = JobFile::parse(r#"{"endpoints": ["https://a.example.com/hook"]}"#).unwrap();
        assert!(job.payloads.is_empty());
    }

    #[test]
    fn unknown_fields_rejected() {
        let result = JobFile::parse(r#"{"endpoints": [], "webhooks": []}"#);
        assert!(result.is_err());
    }

    #[test]
    fn loads_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"endpoints": ["https://a.example.com/hook"], "payloads": [1, 2]}}"#)
            .unwrap();

        let job = JobFile::load(file.path()).unwrap();
        assert_eq!(job.payloads, vec![
            PayloadSpec::Json(serde_json::json!(1)),
            PayloadSpec::Json(serde_json::json!(2)),
        ]);
    }

    #[test]
    fn missing_file_reports_path() {
        let error = JobFile::load(Path::new("/nonexistent/job.json")).unwrap_err();
        assert!(format!("{error:#}").contains("/nonexistent/job.json"));
    }
}
