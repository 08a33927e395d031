use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use hfuzz_backend_unix::{PlainTextReportSink, UnixBackend};
use hfuzz_core::backend::ExecutionBackend;
use hfuzz_core::config::{DynFileMethod, FuzzerConfig, PreparationMode, RawConfig};
use hfuzz_core::corpus::CorpusIndex;
use hfuzz_core::dictionary::{Blacklist, Dictionary};
use hfuzz_core::feedback::FeedbackStore;
use hfuzz_core::pool::{self, GlobalCounters};
use hfuzz_core::supervisor::Supervisor;
use libafl_bolts::rands::StdRand;
use tracing::warn;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

mod options;

pub use options::{Cli, GlobalOptions};

/// Installs the global `tracing` subscriber: an `EnvFilter` seeded from
/// `--log-level` (overridable via `RUST_LOG`) feeding a plain `fmt` layer.
pub fn setup_logger(default_level: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .try_init()
        .map_err(|err| anyhow::anyhow!("failed to install logger: {err}"))
}

impl Cli {
    pub fn run(self) -> anyhow::Result<()> {
        setup_logger(&self.global.log_level)?;

        let raw = self.into_raw_config()?;
        let config = Arc::new(FuzzerConfig::build(raw)?);

        pool::install_signal_handlers()?;

        let allow_empty = config.preparation != PreparationMode::Plain;
        let corpus = Arc::new(CorpusIndex::load(
            &config.input,
            config.max_file_size as u64,
            allow_empty,
        )?);
        let dictionary = Arc::new(self.load_dictionary()?);
        let blacklist = Arc::new(self.load_blacklist()?);
        let feedback = (config.preparation == PreparationMode::Dynamic).then(|| {
            Arc::new(FeedbackStore::new(
                &config.workspace,
                config.max_file_size,
                config.dyn_file_method,
                config.max_dyn_file_iter,
            ))
        });

        let backend = Arc::new(UnixBackend::new());
        backend.arch_init(&config)?;
        let sink = Arc::new(PlainTextReportSink::new(config.report_file.clone()));
        let counters = Arc::new(GlobalCounters::default());

        let iterations_cap = config.iterations;

        let pool_counters = Arc::clone(&counters);
        pool::run_pool(
            config.threads,
            Duration::from_secs(2),
            Arc::clone(&counters),
            move |idx, stop, _gate| {
                let mut rand = StdRand::with_seed(0xC0FFEE_u64 ^ idx as u64);
                let supervisor = Supervisor {
                    config: config.as_ref(),
                    corpus: corpus.as_ref(),
                    dictionary: dictionary.as_ref(),
                    blacklist: blacklist.as_ref(),
                    feedback: feedback.as_deref(),
                    backend: backend.as_ref(),
                    sink: sink.as_ref(),
                    counters: pool_counters.as_ref(),
                };
                loop {
                    if stop.load(Ordering::Relaxed) {
                        break;
                    }
                    if iterations_cap > 0 && pool_counters.mutations_done.load(Ordering::Relaxed) >= iterations_cap {
                        break;
                    }
                    if let Err(err) = supervisor.run_iteration(&mut rand) {
                        warn!(?err, "iteration failed");
                    }
                }
            },
        );

        Ok(())
    }

    /// Parses the NUL-delimited wordlist file, if any, into dictionary tokens.
    fn load_dictionary(&self) -> anyhow::Result<Dictionary> {
        let Some(path) = &self.wordlist else {
            return Ok(Dictionary::empty());
        };
        let bytes = std::fs::read(path)?;
        let tokens = bytes
            .split(|&b| b == 0)
            .filter(|token| !token.is_empty())
            .map(|token| token.to_vec())
            .collect();
        Ok(Dictionary::new(tokens))
    }

    /// Parses a sorted ascending hex-per-line stack-hash blacklist file.
    fn load_blacklist(&self) -> anyhow::Result<Blacklist> {
        let Some(path) = &self.blacklist else {
            return Ok(Blacklist::empty());
        };
        let text = std::fs::read_to_string(path)?;
        let hashes = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|line| {
                u64::from_str_radix(line, 16)
                    .map_err(|_| anyhow::anyhow!("invalid stack hash in blacklist: {line:?}"))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Blacklist::new(hashes))
    }

    fn into_raw_config(&self) -> anyhow::Result<RawConfig> {
        let mut dyn_file_method = DynFileMethod::empty();
        if self.dynfile_instr {
            dyn_file_method |= DynFileMethod::INSTR_COUNT;
        }
        if self.dynfile_branch {
            dyn_file_method |= DynFileMethod::BRANCH_COUNT;
        }
        if self.dynfile_block {
            dyn_file_method |= DynFileMethod::UNIQUE_BLOCK_COUNT;
        }
        if self.dynfile_edge {
            dyn_file_method |= DynFileMethod::UNIQUE_EDGE_COUNT;
        }
        if self.dynfile_custom {
            dyn_file_method |= DynFileMethod::CUSTOM;
        }

        let max_file_size = FuzzerConfig::parse_size(&self.max_file_size)?;

        Ok(RawConfig {
            input: self.input.clone(),
            stdin_input: self.stdin_input,
            nullify_stdio: self.nullify_stdio,
            save_all: self.save_all,
            save_unique: !self.no_save_unique,
            extension: self.extension.clone(),
            workspace: self.workspace.clone(),
            flip_rate: self.flip_rate,
            timeout_secs: self.timeout,
            threads: self.threads,
            iterations: self.iterations,
            rlimit_as_mb: self.rlimit_as,
            max_file_size,
            env: parse_env_assignments(&self.env)?,
            mutate_cmd: self.mutate_cmd.clone(),
            dyn_file_method,
            use_verifier: self.use_verifier,
            kill_signal: self.kill_signal,
            report_file: self.report_file.clone(),
            max_dyn_file_iter: self.max_dyn_file_iter,
            target_argv: self.target_argv.clone(),
        })
    }
}

/// Parses `KEY=VALUE` entries as passed repeatedly via `--env`.
fn parse_env_assignments(entries: &[String]) -> anyhow::Result<Vec<(String, String)>> {
    entries
        .iter()
        .map(|entry| {
            entry
                .split_once('=')
                .map(|(k, v)| (k.to_owned(), v.to_owned()))
                .ok_or_else(|| anyhow::anyhow!("invalid --env entry {entry:?}, expected KEY=VALUE"))
        })
        .collect()
}

