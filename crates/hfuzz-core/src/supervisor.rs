//! Supervisor loop (§4.5): one iteration of seed selection, staging,
//! execution, and feedback.

use libafl_bolts::rands::Rand;
use tracing::{info, warn};

use crate::backend::{Classification, ExecutionBackend};
use crate::config::{FuzzerConfig, PreparationMode, VERIFIER_ITER};
use crate::corpus::{CorpusIndex, DYNAMIC_PLACEHOLDER};
use crate::dictionary::{Blacklist, Dictionary};
use crate::error::{CoreError, StageError};
use crate::feedback::{Counters, FeedbackStore};
use crate::io;
use crate::mutate;
use crate::pool::GlobalCounters;
use crate::report::{CrashReport, CrashReportSink};
use crate::stage;

/// Per-worker scratch state for a single iteration (§3 Fuzzer instance). All
/// fields are reset at the start of [`Supervisor::run_iteration`].
#[derive(Debug, Default)]
struct FuzzInstance {
    candidate: Vec<u8>,
    orig_file_name: String,
}

/// Everything one worker needs to run iterations; borrows are valid for the
/// whole pool lifetime.
pub struct Supervisor<'a, B: ExecutionBackend, S: CrashReportSink> {
    pub config: &'a FuzzerConfig,
    pub corpus: &'a CorpusIndex,
    pub dictionary: &'a Dictionary,
    pub blacklist: &'a Blacklist,
    pub feedback: Option<&'a FeedbackStore>,
    pub backend: &'a B,
    pub sink: &'a S,
    pub counters: &'a GlobalCounters,
}

impl<'a, B: ExecutionBackend, S: CrashReportSink> Supervisor<'a, B, S> {
    /// Runs exactly one iteration: pick a seed, stage a candidate, launch
    /// and reap the target, update feedback, and report crashes.
    pub fn run_iteration(&self, rand: &mut impl Rand) -> Result<(), CoreError> {
        let mut instance = FuzzInstance::default();

        let seed_path = self.corpus.pick_random(rand);
        instance.orig_file_name = seed_path
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| DYNAMIC_PLACEHOLDER.to_owned());

        let candidate_path = stage::fresh_candidate_path(&self.config.workspace, &self.config.extension, rand);

        self.prepare_candidate(&mut instance, seed_path, &candidate_path, rand)?;

        let argv = stage::substitute_placeholder(
            &self.config.target_argv,
            crate::config::FILE_PLACEHOLDER,
            &candidate_path,
        );

        let delivered_path = matches!(self.config.delivery, crate::config::DeliveryMode::Argv)
            .then(|| candidate_path.clone());
        let stdin_bytes = matches!(self.config.delivery, crate::config::DeliveryMode::Stdin)
            .then_some(instance.candidate.as_slice());

        let outcome = self.execute(&argv, delivered_path.as_deref(), stdin_bytes);

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(err) => {
                let _ = std::fs::remove_file(&candidate_path);
                warn!(?err, "iteration failed to execute target");
                return Err(err.into());
            }
        };

        match outcome.classification {
            Classification::Timeout => {
                self.counters.timeouts.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            }
            Classification::Crash => {
                self.handle_crash(&instance, &candidate_path, &outcome, rand)?;
            }
            Classification::NormalExit | Classification::ExternalKilled => {}
        }

        let _ = std::fs::remove_file(&candidate_path);

        if self.config.preparation == PreparationMode::Dynamic
            && outcome.classification != Classification::Crash
        {
            if let Some(feedback) = self.feedback {
                feedback.try_update(&instance.candidate, outcome.counters)?;
                if feedback.needs_reset() {
                    feedback.reset();
                }
            }
        }

        self.counters.mutations_done.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        Ok(())
    }

    fn prepare_candidate(
        &self,
        instance: &mut FuzzInstance,
        seed_path: Option<&std::path::Path>,
        candidate_path: &std::path::Path,
        rand: &mut impl Rand,
    ) -> Result<(), CoreError> {
        match self.config.preparation {
            PreparationMode::Dynamic => {
                let feedback = self
                    .feedback
                    .ok_or(StageError::MissingFeedbackStore)?;
                if let Some(seed_path) = seed_path {
                    let seed_bytes = io::read_to_buffer(seed_path, self.config.max_file_size)
                        .map_err(StageError::SeedRead)?;
                    feedback.seed_initial(&seed_bytes)?;
                }
                let (bytes, _) = feedback.snapshot()?;
                instance.candidate = bytes;
                mutate::resize(&mut instance.candidate, self.config.max_file_size, self.config.flip_rate, rand);
                mutate::mangle(&mut instance.candidate, self.config.flip_rate, self.dictionary, rand);
                stage::materialize(candidate_path, &instance.candidate)?;
                Ok(())
            }
            PreparationMode::External => {
                instance.candidate = match seed_path {
                    Some(path) => io::read_to_buffer(path, self.config.max_file_size)
                        .map_err(StageError::SeedRead)?,
                    None => Vec::new(),
                };
                stage::materialize(candidate_path, &instance.candidate)?;
                self.run_external_mutator(candidate_path)?;
                instance.candidate =
                    io::read_to_buffer(candidate_path, self.config.max_file_size).unwrap_or_default();
                Ok(())
            }
            PreparationMode::Plain => {
                let seed_path = seed_path.ok_or(StageError::EmptySeed)?;
                instance.candidate = io::read_to_buffer(seed_path, self.config.max_file_size)
                    .map_err(StageError::SeedRead)?;
                mutate::resize(&mut instance.candidate, self.config.max_file_size, self.config.flip_rate, rand);
                mutate::mangle(&mut instance.candidate, self.config.flip_rate, self.dictionary, rand);
                stage::materialize(candidate_path, &instance.candidate)?;
                Ok(())
            }
        }
    }

    fn run_external_mutator(&self, candidate_path: &std::path::Path) -> Result<(), StageError> {
        let Some(mutate_cmd) = &self.config.mutate_cmd else {
            return Ok(());
        };
        let status = std::process::Command::new(mutate_cmd)
            .arg(candidate_path)
            .status()
            .map_err(|err| StageError::ExternalMutatorFailed(err.to_string()))?;
        if !status.success() {
            return Err(StageError::ExternalMutatorFailed(status.to_string()));
        }
        Ok(())
    }

    fn execute(
        &self,
        argv: &[String],
        candidate_path: Option<&std::path::Path>,
        stdin_bytes: Option<&[u8]>,
    ) -> Result<crate::backend::ExecutionOutcome, CoreError> {
        let handle = self
            .backend
            .launch_child(self.config, argv, candidate_path, stdin_bytes)?;
        let outcome = self.backend.reap_child(self.config, handle)?;
        Ok(outcome)
    }

    fn handle_crash(
        &self,
        instance: &FuzzInstance,
        candidate_path: &std::path::Path,
        outcome: &crate::backend::ExecutionOutcome,
        rand: &mut impl Rand,
    ) -> Result<(), CoreError> {
        use std::sync::atomic::Ordering;

        let Some(crash) = &outcome.crash else {
            return Ok(());
        };
        self.counters.crashes.fetch_add(1, Ordering::Relaxed);

        if let Some(feedback) = self.feedback {
            feedback.note_crash(crate::config::DYNFILE_SUB_MASK);
        }

        if self.blacklist.contains(crash.stack_hash) {
            self.counters.blacklisted_crashes.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }

        let is_new_stack_hash = self.counters.record_stack_hash(crash.stack_hash);
        if self.config.save_unique && !is_new_stack_hash {
            return Ok(());
        }

        let mut reproducible = true;
        if self.config.use_verifier {
            reproducible = self.verify_crash(instance, candidate_path, crash.stack_hash, rand)?;
            if reproducible {
                self.counters.verified_crashes.fetch_add(1, Ordering::Relaxed);
            }
        }

        self.counters.unique_crashes.fetch_add(1, Ordering::Relaxed);

        let candidate_file_name = candidate_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let report = CrashReport {
            candidate_file_name: &candidate_file_name,
            orig_seed_name: &instance.orig_file_name,
            classification: outcome.classification,
            crash,
            counters: outcome.counters,
        };
        self.sink.report(&report);

        if self.config.save_all || (self.config.save_unique && reproducible) {
            let dest = self
                .config
                .workspace
                .join(format!("{:016x}.{}", crash.stack_hash, self.config.extension));
            if let Err(err) = io::copy_or_link(candidate_path, &dest) {
                warn!(?err, path = ?dest, "failed to persist crashing candidate");
            }
        }

        info!(stack_hash = crash.stack_hash, "crash surfaced");
        Ok(())
    }

    fn verify_crash(
        &self,
        instance: &FuzzInstance,
        candidate_path: &std::path::Path,
        original_stack_hash: u64,
        _rand: &mut impl Rand,
    ) -> Result<bool, CoreError> {
        let argv = stage::substitute_placeholder(
            &self.config.target_argv,
            crate::config::FILE_PLACEHOLDER,
            candidate_path,
        );
        let delivered_path = matches!(self.config.delivery, crate::config::DeliveryMode::Argv)
            .then_some(candidate_path);
        let stdin_bytes = matches!(self.config.delivery, crate::config::DeliveryMode::Stdin)
            .then_some(instance.candidate.as_slice());

        for _ in 0..VERIFIER_ITER {
            let outcome = self.execute(&argv, delivered_path, stdin_bytes)?;
            let matches = matches!(outcome.classification, Classification::Crash)
                && outcome
                    .crash
                    .as_ref()
                    .is_some_and(|c| c.stack_hash == original_stack_hash);
            if !matches {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// Used by tests to assemble a synthetic crash-free outcome without a real
/// backend.
#[cfg(test)]
pub(crate) fn dummy_counters() -> Counters {
    Counters::zero()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dummy_counters_are_zeroed() {
        assert_eq!(dummy_counters(), Counters::zero());
    }
}
