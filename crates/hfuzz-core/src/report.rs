//! Crash reporting sink contract (C10). The supervisor calls this once per
//! surfaced (non-suppressed) crash; `hfuzz-backend-unix` ships the default
//! plain-text implementation.

use crate::backend::{Classification, CrashInfo};
use crate::feedback::Counters;

/// Everything the supervisor knows about a surfaced crash, handed to a
/// [`CrashReportSink`] for rendering/persistence.
#[derive(Debug, Clone)]
pub struct CrashReport<'a> {
    pub candidate_file_name: &'a str,
    pub orig_seed_name: &'a str,
    pub classification: Classification,
    pub crash: &'a CrashInfo,
    pub counters: Counters,
}

/// Sink for surfaced crash reports. Suppressed (blacklisted) crashes are
/// never passed here; they only increment the blacklisted-crash counter.
pub trait CrashReportSink: Send + Sync {
    fn report(&self, report: &CrashReport<'_>);
}

/// A sink that discards every report; used for tests and dry runs that don't
/// care about persisted output.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullReportSink;

impl CrashReportSink for NullReportSink {
    fn report(&self, _report: &CrashReport<'_>) {}
}
