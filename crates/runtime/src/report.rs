//! End-of-run report
//!
//! Dumps the run summary when a program finishes, controlled by the
//! `WEFT_REPORT` env var:
//! - Unset or `0` → no report
//! - `1` → human-readable to stderr
//! - `json` → JSON to stderr
//! - `json:/path` → JSON to file
//!
//! ## Feature Flag
//!
//! This module requires the `diagnostics` feature (enabled by default).
//! When disabled, `report_stub.rs` provides a no-op `emit_report`.

#![cfg(feature = "diagnostics")]

use crate::engine::RunSummary;
use std::io::Write;
use std::sync::OnceLock;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportFormat {
    Human,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportDestination {
    Stderr,
    File(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportConfig {
    pub format: ReportFormat,
    pub destination: ReportDestination,
}

impl ReportConfig {
    /// Parse from the `WEFT_REPORT` environment variable
    pub fn from_env() -> Option<Self> {
        Self::parse(&std::env::var("WEFT_REPORT").ok()?)
    }

    /// Parse a `WEFT_REPORT` value
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "" | "0" => None,
            "1" => Some(ReportConfig {
                format: ReportFormat::Human,
                destination: ReportDestination::Stderr,
            }),
            "json" => Some(ReportConfig {
                format: ReportFormat::Json,
                destination: ReportDestination::Stderr,
            }),
            s if s.starts_with("json:") && s.len() > 5 => Some(ReportConfig {
                format: ReportFormat::Json,
                destination: ReportDestination::File(s[5..].to_string()),
            }),
            _ => {
                warn!("WEFT_REPORT='{}' not recognized, ignoring", value);
                None
            }
        }
    }
}

static REPORT_CONFIG: OnceLock<Option<ReportConfig>> = OnceLock::new();

fn get_report_config() -> &'static Option<ReportConfig> {
    REPORT_CONFIG.get_or_init(ReportConfig::from_env)
}

fn format_human(summary: &RunSummary) -> String {
    let mut out = String::new();
    out.push_str("=== WEFT REPORT ===\n");
    out.push_str(&format!("Wall clock:      {} ms\n", summary.elapsed_ms));
    out.push_str(&format!("Publications:    {}\n", summary.publications));
    out.push_str(&format!("Tokens created:  {}\n", summary.tokens_created));
    out.push_str(&format!("Peak tokens:     {}\n", summary.peak_tokens));
    out.push_str(&format!("Site calls:      {}\n", summary.site_calls));
    out.push_str(&format!("Errors:          {}\n", summary.errors));
    out.push_str("===================\n");
    out
}

#[cfg(feature = "report-json")]
fn format_json(summary: &RunSummary) -> String {
    let mut json = serde_json::to_string(summary).unwrap_or_else(|_| "{}".to_string());
    json.push('\n');
    json
}

#[cfg(not(feature = "report-json"))]
fn format_json(summary: &RunSummary) -> String {
    warn!("WEFT_REPORT=json requires the 'report-json' feature, falling back to human format");
    format_human(summary)
}

/// Write `summary` as configured by `config`
pub fn write_report(config: &ReportConfig, summary: &RunSummary) {
    let output = match config.format {
        ReportFormat::Human => format_human(summary),
        ReportFormat::Json => format_json(summary),
    };

    match &config.destination {
        ReportDestination::Stderr => {
            let _ = std::io::stderr().write_all(output.as_bytes());
        }
        ReportDestination::File(path) => {
            if let Err(e) = std::fs::write(path, output.as_bytes()) {
                warn!("could not write report to {}: {}", path, e);
                let _ = std::io::stderr().write_all(output.as_bytes());
            }
        }
    }
}

/// Emit the report `WEFT_REPORT` asks for, if any
pub fn emit_report(summary: &RunSummary) {
    if let Some(config) = get_report_config() {
        write_report(config, summary);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary() -> RunSummary {
        RunSummary {
            publications: 2,
            tokens_created: 10,
            peak_tokens: 5,
            site_calls: 3,
            errors: 1,
            elapsed_ms: 42,
        }
    }

    #[test]
    fn test_config_parse_variants() {
        assert_eq!(ReportConfig::parse("0"), None);
        assert_eq!(ReportConfig::parse(""), None);
        assert_eq!(ReportConfig::parse("verbose"), None);
        assert_eq!(ReportConfig::parse("json:"), None);
        assert_eq!(
            ReportConfig::parse("1"),
            Some(ReportConfig {
                format: ReportFormat::Human,
                destination: ReportDestination::Stderr,
            })
        );
        assert_eq!(
            ReportConfig::parse("json"),
            Some(ReportConfig {
                format: ReportFormat::Json,
                destination: ReportDestination::Stderr,
            })
        );
        assert_eq!(
            ReportConfig::parse("json:/tmp/report.json"),
            Some(ReportConfig {
                format: ReportFormat::Json,
                destination: ReportDestination::File("/tmp/report.json".to_string()),
            })
        );
    }

    #[test]
    fn test_format_human() {
        let output = format_human(&summary());
        assert!(output.contains("WEFT REPORT"));
        assert!(output.contains("42 ms"));
        assert!(output.contains("Publications:    2"));
        assert!(output.contains("Peak tokens:     5"));
    }

    #[cfg(feature = "report-json")]
    #[test]
    fn test_write_json_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");
        let config = ReportConfig {
            format: ReportFormat::Json,
            destination: ReportDestination::File(path.to_string_lossy().into_owned()),
        };

        write_report(&config, &summary());

        let text = std::fs::read_to_string(&path).unwrap();
        let json: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(json["publications"], 2);
        assert_eq!(json["tokens_created"], 10);
        assert_eq!(json["elapsed_ms"], 42);
    }
}
