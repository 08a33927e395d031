//! Input preparation pipeline (§4.3): candidate path generation, atomic
//! materialization to disk, stdin delivery, and `___FILE___` substitution.

use std::os::fd::BorrowedFd;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use libafl_bolts::rands::Rand;

use crate::error::StageError;
use crate::io;

/// Builds a candidate path of the form
/// `work_dir/.hfuzz.<pid>.<unix_secs>.<62-bit-hex-nonce>.<ext>`, matching the
/// source's collision-resistant naming scheme. Collisions, if they occur, are
/// handled by the caller's exclusive-create open failing.
pub fn fresh_candidate_path(work_dir: &Path, ext: &str, rand: &mut impl Rand) -> PathBuf {
    let pid = std::process::id();
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let nonce: u64 = rand.next() & 0x3FFF_FFFF_FFFF_FFFF;
    let name = if ext.is_empty() {
        format!(".hfuzz.{pid}.{secs}.{nonce:016x}")
    } else {
        format!(".hfuzz.{pid}.{secs}.{nonce:016x}.{ext}")
    };
    work_dir.join(name)
}

/// Writes `bytes` to a brand-new `path`. On success the file exists with
/// exactly `bytes`; on failure no file is left behind (§4.3 materialize).
pub fn materialize(path: &Path, bytes: &[u8]) -> Result<(), StageError> {
    io::write_exclusive(path, bytes).map_err(|source| {
        if source.kind() == std::io::ErrorKind::AlreadyExists {
            StageError::PathCollision
        } else {
            StageError::Materialize {
                path: path.to_path_buf(),
                source,
            }
        }
    })
}

/// Writes `bytes` to the child's stdin, handling short writes and signal
/// interruption (§4.3 deliver_via_stdin).
pub fn deliver_via_stdin(child_stdin: BorrowedFd<'_>, bytes: &[u8]) -> Result<(), StageError> {
    io::write_all_fd(child_stdin, bytes).map_err(|err| StageError::Materialize {
        path: PathBuf::from("<stdin>"),
        source: std::io::Error::from_raw_os_error(err as i32),
    })
}

/// Substitutes every occurrence of `placeholder` inside each argv entry
/// (possibly as a substring) with `candidate_path`.
pub fn substitute_placeholder(argv: &[String], placeholder: &str, candidate_path: &Path) -> Vec<String> {
    let replacement = candidate_path.to_string_lossy();
    argv.iter()
        .map(|arg| arg.replace(placeholder, &replacement))
        .collect()
}
