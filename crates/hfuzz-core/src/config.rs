use std::path::{Path, PathBuf};
use std::time::Duration;

use bitflags::bitflags;

use crate::error::ConfigError;

/// Literal token recognized (and substituted) inside the target's argv.
pub const FILE_PLACEHOLDER: &str = "___FILE___";

/// Default crash report file name, relative to the workspace.
pub const DEFAULT_REPORT_FILE: &str = "HONGGFUZZ.REPORT.TXT";

/// Number of times a crash is re-run under `use_verifier` before being
/// counted as reproducible.
pub const VERIFIER_ITER: u32 = 5;

/// Budget on unimproved dynamic-best persistence before re-seeding.
pub const MAX_DYN_FILE_ITER: u64 = 0x2000;

/// Mask applied to `iter_since_reset` when a candidate crashes, to push the
/// store toward re-seeding sooner.
pub const DYNFILE_SUB_MASK: u64 = 0xFFF;

bitflags! {
    /// Which feedback dimensions (§3 Counter vector) are fed into the
    /// dominance rule. Mirrors the source's `dynFileMethod_t` bitmask.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DynFileMethod: u32 {
        const INSTR_COUNT        = 0x1;
        const BRANCH_COUNT       = 0x2;
        const UNIQUE_BLOCK_COUNT = 0x8;
        const UNIQUE_EDGE_COUNT  = 0x10;
        const CUSTOM             = 0x20;
    }
}

impl DynFileMethod {
    /// Number of counter slots a [`crate::feedback::Counters`] needs to hold
    /// every dimension this mask can enable.
    pub const DIMENSIONS: usize = 5;

    /// Index into a [`crate::feedback::Counters`] array for each enabled bit,
    /// in a stable order.
    pub fn enabled_indices(self) -> impl Iterator<Item = usize> {
        [
            (Self::INSTR_COUNT, 0),
            (Self::BRANCH_COUNT, 1),
            (Self::UNIQUE_BLOCK_COUNT, 2),
            (Self::UNIQUE_EDGE_COUNT, 3),
            (Self::CUSTOM, 4),
        ]
        .into_iter()
        .filter(move |(flag, _)| self.contains(*flag))
        .map(|(_, idx)| idx)
    }
}

/// How a candidate's bytes are prepared each iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreparationMode {
    /// Mutate in-process against the shared dynamic best (§4.5 dynamic).
    Dynamic,
    /// Hand the candidate path to an external program (§4.5 external).
    External,
    /// Read a seed, mutate in-process, write it out (§4.5 plain).
    Plain,
}

/// How the candidate reaches the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    /// Candidate path is substituted into argv in place of [`FILE_PLACEHOLDER`].
    Argv,
    /// Candidate bytes are written to the child's stdin.
    Stdin,
}

/// Validated, immutable configuration for one fuzzing run. Constructed once
/// via [`FuzzerConfig::build`] before the worker pool starts; every field
/// here has already passed the checks in §6/§7.
#[derive(Debug, Clone)]
pub struct FuzzerConfig {
    pub input: PathBuf,
    pub delivery: DeliveryMode,
    pub nullify_stdio: bool,
    pub save_all: bool,
    pub save_unique: bool,
    pub extension: String,
    pub workspace: PathBuf,
    pub flip_rate: f64,
    pub timeout: Duration,
    pub threads: usize,
    pub iterations: u64,
    pub rlimit_as_mb: Option<u64>,
    pub max_file_size: usize,
    pub env: Vec<(String, String)>,
    pub mutate_cmd: Option<PathBuf>,
    pub dyn_file_method: DynFileMethod,
    pub use_verifier: bool,
    pub kill_signal: nix::sys::signal::Signal,
    pub report_file: PathBuf,
    pub max_dyn_file_iter: u64,
    pub preparation: PreparationMode,
    pub target_argv: Vec<String>,
}

/// Plain, unvalidated input to [`FuzzerConfig::build`]; this is the shape the
/// CLI crate fills in directly from parsed arguments.
#[derive(Debug, Clone)]
pub struct RawConfig {
    pub input: PathBuf,
    pub stdin_input: bool,
    pub nullify_stdio: bool,
    pub save_all: bool,
    pub save_unique: bool,
    pub extension: String,
    pub workspace: PathBuf,
    pub flip_rate: f64,
    pub timeout_secs: u64,
    pub threads: usize,
    pub iterations: u64,
    pub rlimit_as_mb: u64,
    pub max_file_size: usize,
    pub env: Vec<(String, String)>,
    pub mutate_cmd: Option<PathBuf>,
    pub dyn_file_method: DynFileMethod,
    pub use_verifier: bool,
    pub kill_signal: nix::sys::signal::Signal,
    pub report_file: Option<PathBuf>,
    pub max_dyn_file_iter: u64,
    pub target_argv: Vec<String>,
}

impl FuzzerConfig {
    pub fn build(raw: RawConfig) -> Result<Self, ConfigError> {
        if !raw.input.exists() {
            return Err(ConfigError::InputMissing(raw.input));
        }
        if raw.workspace != Path::new(".") && !raw.workspace.exists() {
            return Err(ConfigError::WorkspaceMissing(raw.workspace));
        }
        if !(0.0..=1.0).contains(&raw.flip_rate) {
            return Err(ConfigError::FlipRateOutOfRange(raw.flip_rate));
        }
        if raw.threads == 0 {
            return Err(ConfigError::ZeroThreads);
        }
        if raw.max_file_size == 0 {
            return Err(ConfigError::ZeroMaxFileSize);
        }
        if raw.extension.contains('/') {
            return Err(ConfigError::ExtensionContainsSeparator(raw.extension));
        }

        let delivery = if raw.stdin_input {
            DeliveryMode::Stdin
        } else {
            DeliveryMode::Argv
        };
        if delivery == DeliveryMode::Argv
            && !raw
                .target_argv
                .iter()
                .any(|arg| arg.contains(FILE_PLACEHOLDER))
        {
            return Err(ConfigError::NoFileDeliveryMechanism {
                placeholder: FILE_PLACEHOLDER.to_owned(),
            });
        }

        let perf_dimensions = DynFileMethod::INSTR_COUNT
            | DynFileMethod::BRANCH_COUNT
            | DynFileMethod::UNIQUE_BLOCK_COUNT
            | DynFileMethod::UNIQUE_EDGE_COUNT;
        if raw.dyn_file_method.contains(DynFileMethod::CUSTOM)
            && raw.dyn_file_method.intersects(perf_dimensions)
        {
            return Err(ConfigError::ConflictingFeedbackDimensions);
        }
        const SANCOV_MIN_TIMEOUT_SECS: u64 = 15;
        if raw.dyn_file_method.contains(DynFileMethod::CUSTOM) && raw.timeout_secs < SANCOV_MIN_TIMEOUT_SECS {
            return Err(ConfigError::TimeoutTooShortForSancov {
                min: SANCOV_MIN_TIMEOUT_SECS,
            });
        }

        let preparation = if raw.mutate_cmd.is_some() {
            PreparationMode::External
        } else if !raw.dyn_file_method.is_empty() {
            PreparationMode::Dynamic
        } else {
            PreparationMode::Plain
        };

        Ok(Self {
            input: raw.input,
            delivery,
            nullify_stdio: raw.nullify_stdio,
            save_all: raw.save_all,
            save_unique: raw.save_unique,
            extension: raw.extension,
            workspace: raw.workspace.clone(),
            flip_rate: raw.flip_rate,
            timeout: Duration::from_secs(raw.timeout_secs),
            threads: raw.threads,
            iterations: raw.iterations,
            rlimit_as_mb: (raw.rlimit_as_mb > 0).then_some(raw.rlimit_as_mb),
            max_file_size: raw.max_file_size,
            env: raw.env,
            mutate_cmd: raw.mutate_cmd,
            dyn_file_method: raw.dyn_file_method,
            use_verifier: raw.use_verifier,
            kill_signal: raw.kill_signal,
            report_file: raw
                .report_file
                .unwrap_or_else(|| raw.workspace.join(DEFAULT_REPORT_FILE)),
            max_dyn_file_iter: raw.max_dyn_file_iter,
            preparation,
            target_argv: raw.target_argv,
        })
    }

    /// Parses a byte-size string like `1M`, `512K`, `2G` (base-1024 suffixes,
    /// case-insensitive, suffix optional) into a byte count.
    pub fn parse_size(value: &str) -> Result<usize, ConfigError> {
        let value = value.trim();
        let (digits, mult) = match value
            .chars()
            .last()
            .map(|c| c.to_ascii_uppercase())
        {
            Some('B') => (&value[..value.len() - 1], 1usize),
            Some('K') => (&value[..value.len() - 1], 1024),
            Some('M') => (&value[..value.len() - 1], 1024 * 1024),
            Some('G') => (&value[..value.len() - 1], 1024 * 1024 * 1024),
            Some('T') => (&value[..value.len() - 1], 1024 * 1024 * 1024 * 1024),
            _ => (value, 1),
        };
        let digits = digits.trim();
        let count: usize = digits
            .parse()
            .map_err(|_| ConfigError::InvalidSize(value.to_owned()))?;
        Ok(count * mult)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_size_suffixes() {
        assert_eq!(FuzzerConfig::parse_size("1024").unwrap(), 1024);
        assert_eq!(FuzzerConfig::parse_size("1K").unwrap(), 1024);
        assert_eq!(FuzzerConfig::parse_size("1M").unwrap(), 1024 * 1024);
        assert_eq!(FuzzerConfig::parse_size("2g").unwrap(), 2 * 1024 * 1024 * 1024);
    }

    #[test]
    fn enabled_indices_in_stable_order() {
        let mask = DynFileMethod::BRANCH_COUNT | DynFileMethod::UNIQUE_EDGE_COUNT;
        let indices: Vec<_> = mask.enabled_indices().collect();
        assert_eq!(indices, vec![1, 3]);
    }

    fn minimal_raw(workspace: &Path, input: &Path) -> RawConfig {
        RawConfig {
            input: input.to_path_buf(),
            stdin_input: false,
            nullify_stdio: false,
            save_all: false,
            save_unique: true,
            extension: "fuzz".to_owned(),
            workspace: workspace.to_path_buf(),
            flip_rate: 0.01,
            timeout_secs: 3,
            threads: 1,
            iterations: 0,
            rlimit_as_mb: 0,
            max_file_size: 64,
            env: Vec::new(),
            mutate_cmd: None,
            dyn_file_method: DynFileMethod::empty(),
            use_verifier: false,
            kill_signal: nix::sys::signal::Signal::SIGKILL,
            report_file: None,
            max_dyn_file_iter: MAX_DYN_FILE_ITER,
            target_argv: vec!["target".to_owned(), FILE_PLACEHOLDER.to_owned()],
        }
    }

    #[test]
    fn build_accepts_a_minimal_valid_config() {
        let dir = tempfile::tempdir().unwrap();
        let seed = dir.path().join("seed");
        std::fs::write(&seed, b"x").unwrap();
        let raw = minimal_raw(dir.path(), &seed);
        assert!(FuzzerConfig::build(raw).is_ok());
    }

    #[test]
    fn build_rejects_missing_placeholder_without_stdin() {
        let dir = tempfile::tempdir().unwrap();
        let seed = dir.path().join("seed");
        std::fs::write(&seed, b"x").unwrap();
        let mut raw = minimal_raw(dir.path(), &seed);
        raw.target_argv = vec!["target".to_owned()];
        assert!(matches!(
            FuzzerConfig::build(raw),
            Err(ConfigError::NoFileDeliveryMechanism { .. })
        ));
    }

    #[test]
    fn build_rejects_custom_combined_with_perf_dimensions() {
        let dir = tempfile::tempdir().unwrap();
        let seed = dir.path().join("seed");
        std::fs::write(&seed, b"x").unwrap();
        let mut raw = minimal_raw(dir.path(), &seed);
        raw.dyn_file_method = DynFileMethod::CUSTOM | DynFileMethod::INSTR_COUNT;
        raw.timeout_secs = 15;
        assert!(matches!(
            FuzzerConfig::build(raw),
            Err(ConfigError::ConflictingFeedbackDimensions)
        ));
    }

    #[test]
    fn build_rejects_short_timeout_under_custom_feedback() {
        let dir = tempfile::tempdir().unwrap();
        let seed = dir.path().join("seed");
        std::fs::write(&seed, b"x").unwrap();
        let mut raw = minimal_raw(dir.path(), &seed);
        raw.dyn_file_method = DynFileMethod::CUSTOM;
        raw.timeout_secs = 3;
        assert!(matches!(
            FuzzerConfig::build(raw),
            Err(ConfigError::TimeoutTooShortForSancov { min: 15 })
        ));
    }
}
