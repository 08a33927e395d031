//! Reference Unix execution backend (§4.7): per-iteration `fork`+`exec`,
//! `setrlimit`, a kernel-timer timeout enforced in the child plus a
//! wall-clock deadline polled in the parent, and `waitpid`-based reaping.

use std::collections::hash_map::DefaultHasher;
use std::ffi::CString;
use std::hash::{Hash, Hasher};
use std::os::fd::AsRawFd;
use std::path::Path;
use std::time::{Duration, Instant};

use hfuzz_core::backend::{ChildHandle, Classification, CrashInfo, ExecutionBackend, ExecutionOutcome};
use hfuzz_core::config::{DeliveryMode, FuzzerConfig};
use hfuzz_core::error::BackendError;
use hfuzz_core::feedback::Counters;
use nix::sys::resource::{Resource, setrlimit};
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::sys::{signal, stat};
use nix::unistd::{ForkResult, Pid, alarm, execvp, fork, setsid};
use os_pipe::PipeReader;
use tracing::warn;

/// A forked child awaiting reap. Stdin delivery, when in use, is already
/// complete by the time this handle exists (§4.7 launch_child).
#[derive(Debug)]
pub struct UnixChildHandle {
    pid: Pid,
    deadline: Instant,
}

impl ChildHandle for UnixChildHandle {}

/// The reference backend. Stateless: all per-run state lives in
/// [`UnixChildHandle`].
#[derive(Debug, Default, Clone, Copy)]
pub struct UnixBackend;

impl UnixBackend {
    pub fn new() -> Self {
        Self
    }

    /// Runs entirely in the forked child between `fork` and `exec`; every
    /// call here must be async-signal-safe (§9 forking semantics).
    fn run_child(config: &FuzzerConfig, argv: &[String], stdin_read: Option<PipeReader>) -> ! {
        let _ = setsid();

        if let Some(mb) = config.rlimit_as_mb {
            let bytes = mb * 1024 * 1024;
            let _ = setrlimit(Resource::RLIMIT_AS, bytes, bytes);
        }

        if config.nullify_stdio
            && let Ok(devnull) = nix::fcntl::open("/dev/null", nix::fcntl::OFlag::O_RDWR, stat::Mode::empty())
        {
            let fd = devnull.as_raw_fd();
            unsafe {
                libc::dup2(fd, 1);
                libc::dup2(fd, 2);
            }
        }

        if let Some(stdin_read) = stdin_read {
            unsafe {
                libc::dup2(stdin_read.as_raw_fd(), 0);
            }
        }

        for (key, value) in &config.env {
            unsafe {
                std::env::set_var(key, value);
            }
        }

        // The child's own kernel alarm is the backstop if the parent's
        // wall-clock poll is ever delayed by scheduling.
        let _ = alarm::set(config.timeout.as_secs().max(1) as u32);

        let argv: Vec<CString> = argv
            .iter()
            .map(|s| CString::new(s.as_str()).unwrap_or_default())
            .collect();
        if argv.is_empty() {
            std::process::exit(127);
        }
        let _ = execvp(&argv[0], &argv);
        // exec only returns on failure.
        std::process::exit(127);
    }
}

impl ExecutionBackend for UnixBackend {
    type Handle = UnixChildHandle;

    fn arch_init(&self, _config: &FuzzerConfig) -> Result<(), BackendError> {
        Ok(())
    }

    fn launch_child(
        &self,
        config: &FuzzerConfig,
        argv: &[String],
        _candidate_path: Option<&Path>,
        stdin_bytes: Option<&[u8]>,
    ) -> Result<Self::Handle, BackendError> {
        let stdin_pipe = if matches!(config.delivery, DeliveryMode::Stdin) {
            Some(os_pipe::pipe().map_err(|e| BackendError::Launch(e.to_string()))?)
        } else {
            None
        };

        // SAFETY: the child path in `run_child` only calls async-signal-safe
        // syscalls (setsid, setrlimit, dup2, alarm, execvp) before handing
        // off control.
        let result = unsafe { fork() }.map_err(|e| BackendError::Launch(e.to_string()))?;

        match result {
            ForkResult::Child => {
                let stdin_read = stdin_pipe.map(|(read, write)| {
                    drop(write);
                    read
                });
                Self::run_child(config, argv, stdin_read);
            }
            ForkResult::Parent { child } => {
                let mut stdin_write = stdin_pipe.map(|(read, write)| {
                    drop(read);
                    write
                });
                if let (Some(writer), Some(bytes)) = (stdin_write.as_mut(), stdin_bytes) {
                    let fd = unsafe { std::os::fd::BorrowedFd::borrow_raw(writer.as_raw_fd()) };
                    if let Err(err) = hfuzz_core::stage::deliver_via_stdin(fd, bytes) {
                        warn!(?err, "failed to write candidate to child stdin");
                    }
                }
                // Drop the write end now so the child observes EOF once it
                // has consumed the candidate, rather than blocking forever.
                drop(stdin_write.take());
                Ok(UnixChildHandle {
                    pid: child,
                    deadline: Instant::now() + config.timeout + Duration::from_millis(200),
                })
            }
        }
    }

    fn reap_child(&self, config: &FuzzerConfig, handle: Self::Handle) -> Result<ExecutionOutcome, BackendError> {
        let UnixChildHandle { pid, deadline } = handle;

        loop {
            match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::StillAlive) => {
                    if Instant::now() >= deadline {
                        if let Err(err) = signal::kill(Pid::from_raw(-pid.as_raw()), config.kill_signal) {
                            warn!(?err, "failed to kill timed-out child's process group");
                        }
                        let _ = waitpid(pid, None);
                        return Ok(ExecutionOutcome {
                            classification: Classification::Timeout,
                            counters: Counters::zero(),
                            crash: None,
                        });
                    }
                    std::thread::sleep(Duration::from_millis(10));
                }
                Ok(status) => return Ok(classify(status)),
                Err(nix::errno::Errno::EINTR) => continue,
                Err(err) => return Err(BackendError::Reap(err.to_string())),
            }
        }
    }
}

/// Reference crash classification: `WIFSIGNALED` is always a crash;
/// anything else is a normal exit. The stack hash is a cheap digest (signal
/// number + pid), adequate for the uniqueness/blacklist contract the core
/// relies on but explicitly not a substitute for a real unwinder (§4.7).
fn classify(status: WaitStatus) -> ExecutionOutcome {
    match status {
        WaitStatus::Signaled(pid, signal, _) => {
            let mut hasher = DefaultHasher::new();
            (signal as i32).hash(&mut hasher);
            pid.as_raw().hash(&mut hasher);
            let stack_hash = hasher.finish();
            ExecutionOutcome {
                classification: Classification::Crash,
                counters: Counters::zero(),
                crash: Some(CrashInfo {
                    signal: Some(signal as i32),
                    stack_hash,
                    faulting_pc: None,
                    access_address: None,
                    summary: format!("terminated by signal {signal:?}"),
                }),
            }
        }
        WaitStatus::Exited(..) => ExecutionOutcome {
            classification: Classification::NormalExit,
            counters: Counters::zero(),
            crash: None,
        },
        _ => ExecutionOutcome {
            classification: Classification::ExternalKilled,
            counters: Counters::zero(),
            crash: None,
        },
    }
}
