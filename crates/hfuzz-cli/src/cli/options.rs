use std::path::PathBuf;

use clap::Parser;
use nix::sys::signal::Signal;

/// Global, cross-cutting options not specific to any single fuzzing knob.
#[derive(Debug, Parser)]
pub struct GlobalOptions {
    /// Default `tracing` filter level, overridable via `RUST_LOG`.
    #[arg(long, env = "HFUZZ_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

/// Coverage-guided, mutation-based fuzzing harness.
#[derive(Debug, Parser)]
#[command(name = "hfuzz", version, about)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOptions,

    /// Seed file or directory of seed files.
    #[arg(short = 'f', long, env = "HFUZZ_INPUT")]
    pub input: PathBuf,

    /// Deliver the candidate via the target's stdin instead of a file argument.
    #[arg(long)]
    pub stdin_input: bool,

    /// Redirect the child's stdin/stdout/stderr to /dev/null.
    #[arg(short = 'q', long)]
    pub nullify_stdio: bool,

    /// Persist every candidate, not only unique crashes.
    #[arg(long)]
    pub save_all: bool,

    /// Disable stack-hash deduplication of surfaced crashes.
    #[arg(long)]
    pub no_save_unique: bool,

    /// Candidate filename extension (no path separator).
    #[arg(short = 'e', long, default_value = "fuzz")]
    pub extension: String,

    /// Directory for corpus/crash/report output.
    #[arg(short = 'W', long, env = "HFUZZ_WORKSPACE", default_value = ".")]
    pub workspace: PathBuf,

    /// Expected fraction of bytes perturbed per mutation, in [0, 1].
    #[arg(short = 'r', long, default_value_t = 0.001)]
    pub flip_rate: f64,

    /// NUL-delimited dictionary tokens file for the mutation engine.
    #[arg(short = 'w', long)]
    pub wordlist: Option<PathBuf>,

    /// Sorted ascending hex stack-hash blacklist file.
    #[arg(long)]
    pub blacklist: Option<PathBuf>,

    /// Per-child wall-clock timeout, in seconds.
    #[arg(short = 't', long, default_value_t = 3)]
    pub timeout: u64,

    /// Number of parallel worker threads.
    #[arg(short = 'n', long, default_value_t = 2)]
    pub threads: usize,

    /// Total iterations across all workers; 0 means unlimited.
    #[arg(short = 'N', long, default_value_t = 0)]
    pub iterations: u64,

    /// Per-child address-space limit in MiB; 0 means no limit.
    #[arg(long, default_value_t = 0)]
    pub rlimit_as: u64,

    /// Maximum candidate size, accepts suffixes (B/K/M/G/T).
    #[arg(short = 'F', long, default_value = "1M")]
    pub max_file_size: String,

    /// Extra `KEY=VALUE` environment variable for the child; may repeat.
    #[arg(long = "env", value_name = "KEY=VALUE")]
    pub env: Vec<String>,

    /// External mutator program; replaces the internal mutation engine.
    #[arg(long)]
    pub mutate_cmd: Option<PathBuf>,

    /// Feed instruction-count coverage into the dynamic-best comparison.
    #[arg(long)]
    pub dynfile_instr: bool,

    /// Feed branch-count coverage into the dynamic-best comparison.
    #[arg(long)]
    pub dynfile_branch: bool,

    /// Feed unique-block coverage into the dynamic-best comparison.
    #[arg(long)]
    pub dynfile_block: bool,

    /// Feed unique-edge coverage into the dynamic-best comparison.
    #[arg(long)]
    pub dynfile_edge: bool,

    /// Feed a custom counter into the dynamic-best comparison.
    #[arg(long)]
    pub dynfile_custom: bool,

    /// Re-run crashes to confirm reproducibility before counting them unique.
    #[arg(short = 'V', long)]
    pub use_verifier: bool,

    /// Signal sent to a timed-out child's process group.
    #[arg(long, default_value = "SIGKILL", value_parser = parse_signal)]
    pub kill_signal: Signal,

    /// Crash report file path; defaults to `<workspace>/HONGGFUZZ.REPORT.TXT`.
    #[arg(long)]
    pub report_file: Option<PathBuf>,

    /// Iterations an unimproved dynamic best may persist before re-seeding.
    #[arg(long, default_value_t = hfuzz_core::config::MAX_DYN_FILE_ITER)]
    pub max_dyn_file_iter: u64,

    /// Target argv, after `--`. Must contain `___FILE___` unless `--stdin-input` is set.
    #[arg(last = true, required = true)]
    pub target_argv: Vec<String>,
}

fn parse_signal(value: &str) -> Result<Signal, String> {
    match value.to_ascii_uppercase().as_str() {
        "SIGKILL" | "KILL" => Ok(Signal::SIGKILL),
        "SIGTERM" | "TERM" => Ok(Signal::SIGTERM),
        "SIGINT" | "INT" => Ok(Signal::SIGINT),
        "SIGABRT" | "ABRT" => Ok(Signal::SIGABRT),
        "SIGQUIT" | "QUIT" => Ok(Signal::SIGQUIT),
        other => Err(format!("unknown signal {other:?}")),
    }
}
