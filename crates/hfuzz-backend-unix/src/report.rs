//! Default crash report sink (C10): appends a plain-text block per surfaced
//! crash to the configured report file, grounded on the source's
//! `HONGGFUZZ.REPORT.TXT` convention.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use hfuzz_core::report::{CrashReport, CrashReportSink};
use tracing::warn;

#[derive(Debug)]
pub struct PlainTextReportSink {
    path: PathBuf,
    lock: Mutex<()>,
}

impl PlainTextReportSink {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
        }
    }
}

impl CrashReportSink for PlainTextReportSink {
    fn report(&self, report: &CrashReport<'_>) {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let block = format!(
            "=====================================================\n\
             FILE: {}\n\
             ORIG_FILE: {}\n\
             STACK_HASH: {:016x}\n\
             SIGNAL: {:?}\n\
             SUMMARY: {}\n\n",
            report.candidate_file_name,
            report.orig_seed_name,
            report.crash.stack_hash,
            report.crash.signal,
            report.crash.summary,
        );
        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut file| file.write_all(block.as_bytes()));
        if let Err(err) = result {
            warn!(?err, path = ?self.path, "failed to append crash report");
        }
    }
}

#[cfg(test)]
mod tests {
    use hfuzz_core::backend::{Classification, CrashInfo};
    use hfuzz_core::feedback::Counters;
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn appends_block_per_report() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("report.txt");
        let sink = PlainTextReportSink::new(path.clone());
        let crash = CrashInfo {
            signal: Some(6),
            stack_hash: 0xdead_beef,
            faulting_pc: None,
            access_address: None,
            summary: "abort".to_owned(),
        };
        let report = CrashReport {
            candidate_file_name: "candidate.fuzz",
            orig_seed_name: "seed",
            classification: Classification::Crash,
            crash: &crash,
            counters: Counters::zero(),
        };
        sink.report(&report);
        sink.report(&report);
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.matches("deadbeef").count(), 2);
    }
}
