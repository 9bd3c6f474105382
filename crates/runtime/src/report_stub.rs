//! Stub report module for builds without the "diagnostics" feature.

use crate::engine::RunSummary;

/// No-op: diagnostics feature not enabled
pub fn emit_report(_summary: &RunSummary) {}
