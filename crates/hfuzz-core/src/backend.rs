//! The execution backend contract (§4.7): the core depends only on this
//! trait, never on a concrete process-launch mechanism. `hfuzz-backend-unix`
//! ships the reference fork/exec implementation.

use std::path::Path;

use crate::config::FuzzerConfig;
use crate::error::BackendError;
use crate::feedback::Counters;

/// How a single iteration's child process terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    NormalExit,
    Timeout,
    Crash,
    ExternalKilled,
}

/// Crash-specific metadata; only meaningful when `classification ==
/// Classification::Crash`. The core never interprets these fields beyond
/// `stack_hash` (uniqueness/blacklist) and `summary` (report rendering).
#[derive(Debug, Clone)]
pub struct CrashInfo {
    pub signal: Option<i32>,
    pub stack_hash: u64,
    pub faulting_pc: Option<u64>,
    pub access_address: Option<u64>,
    pub summary: String,
}

/// The result of reaping one child process.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub classification: Classification,
    pub counters: Counters,
    pub crash: Option<CrashInfo>,
}

/// A launched child, opaque to the core beyond what `reap` needs.
pub trait ChildHandle: std::fmt::Debug + Send {}

/// Platform-specific launch/reap contract the supervisor depends on.
///
/// Implementations are expected to apply resource limits, stdio redirection,
/// and the configured timeout inside `launch`, and to classify the
/// termination and collect counters inside `reap`. The core calls `launch`
/// then immediately `reap`; it never holds a handle across iterations.
pub trait ExecutionBackend: Send + Sync {
    type Handle: ChildHandle;

    /// One-time backend setup (e.g. opening perf events). Called once before
    /// the worker pool starts.
    fn arch_init(&self, config: &FuzzerConfig) -> Result<(), BackendError>;

    /// Launches the target. In [`crate::config::DeliveryMode::Argv`],
    /// `candidate_path` names the on-disk candidate already referenced by
    /// `argv`. In [`crate::config::DeliveryMode::Stdin`], `stdin_bytes`
    /// holds the candidate and the backend writes it to the child's stdin
    /// itself (§4.3 deliver_via_stdin) before returning.
    fn launch_child(
        &self,
        config: &FuzzerConfig,
        argv: &[String],
        candidate_path: Option<&Path>,
        stdin_bytes: Option<&[u8]>,
    ) -> Result<Self::Handle, BackendError>;

    /// Blocks until the child terminates or the configured timeout elapses,
    /// returning its classification, counters, and crash metadata if any.
    fn reap_child(
        &self,
        config: &FuzzerConfig,
        handle: Self::Handle,
    ) -> Result<ExecutionOutcome, BackendError>;
}
