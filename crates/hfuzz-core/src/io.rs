//! File I/O primitives grounded on `files.c` (§4.8): bounded reads, atomic
//! exclusive-create writes, EINTR-retrying partial I/O, hardlink-or-copy.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::fd::BorrowedFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

use nix::errno::Errno;
use nix::fcntl::{self, OFlag};
use nix::unistd;

/// Reads up to `max` bytes of `path` into a fresh buffer. Mirrors
/// `files_readFileToBufMax`: a file over `max` bytes is treated as a failure,
/// not a truncated read.
pub fn read_to_buffer(path: &Path, max: usize) -> io::Result<Vec<u8>> {
    let mut file = File::open(path)?;
    let len = file.metadata()?.len();
    if len > max as u64 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("{path:?} is {len} bytes, exceeds max {max}"),
        ));
    }
    let mut buf = Vec::with_capacity(len as usize);
    file.read_to_end(&mut buf)?;
    Ok(buf)
}

/// Writes `bytes` to a newly created `path`. Fails if `path` already exists;
/// unlinks any partial output left behind by a failed write.
pub fn write_exclusive(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o644)
        .open(path)?;
    if let Err(err) = file.write_all(bytes) {
        let _ = fs::remove_file(path);
        return Err(err);
    }
    Ok(())
}

/// Writes `bytes` to `path`, truncating it if it already exists (used for the
/// dynamic best-copy destination, which is always replaced wholesale).
pub fn write_truncate(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o644)
        .open(path)?;
    if let Err(err) = file.write_all(bytes) {
        let _ = fs::remove_file(path);
        return Err(err);
    }
    Ok(())
}

/// Atomically replaces `dest` with `bytes` by writing to a sibling temp file
/// and renaming over it. Used to publish `CURRENT_BEST` (§4.4).
pub fn publish_atomic(dest: &Path, bytes: &[u8]) -> io::Result<()> {
    let tmp_name = dest
        .file_name()
        .map(|name| {
            let mut s = std::ffi::OsString::from(".tmp.");
            s.push(name);
            s
        })
        .unwrap_or_else(|| ".tmp.CURRENT_BEST".into());
    let tmp_path = dest.with_file_name(tmp_name);
    write_truncate(&tmp_path, bytes)?;
    fs::rename(&tmp_path, dest)?;
    Ok(())
}

/// Writes all of `bytes` to `fd`, retrying on interruption and resuming
/// partial writes. Mirrors `files_writeToFd`.
pub fn write_all_fd(fd: BorrowedFd<'_>, mut bytes: &[u8]) -> nix::Result<()> {
    while !bytes.is_empty() {
        match unistd::write(fd, bytes) {
            Ok(0) => return Err(Errno::EIO),
            Ok(written) => bytes = &bytes[written..],
            Err(Errno::EINTR) => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(())
}

/// Reads from `fd` into `buf` until it is full or EOF, retrying on
/// interruption. Mirrors `files_readFromFd`. Returns the number of bytes read.
pub fn read_all_fd(fd: BorrowedFd<'_>, buf: &mut [u8]) -> nix::Result<usize> {
    let mut total = 0;
    while total < buf.len() {
        match unistd::read(fd, &mut buf[total..]) {
            Ok(0) => break,
            Ok(n) => total += n,
            Err(Errno::EINTR) => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(total)
}

/// Outcome of [`copy_or_link`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkOutcome {
    Linked,
    Copied,
    AlreadyExists,
}

/// Attempts a hard link from `src` to `dst` first (cheap, no data copy); on
/// `EEXIST` reports it so the caller can skip duplicates; on other failures
/// falls back to an exclusive-create copy.
pub fn copy_or_link(src: &Path, dst: &Path) -> io::Result<LinkOutcome> {
    match fs::hard_link(src, dst) {
        Ok(()) => Ok(LinkOutcome::Linked),
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => Ok(LinkOutcome::AlreadyExists),
        Err(_) => {
            let bytes = fs::read(src)?;
            match write_exclusive(dst, &bytes) {
                Ok(()) => Ok(LinkOutcome::Copied),
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                    Ok(LinkOutcome::AlreadyExists)
                }
                Err(err) => Err(err),
            }
        }
    }
}

/// Reads up to `max` bytes of a sysfs-style one-line file, trims trailing
/// whitespace/newlines, and returns the result as a `String`.
pub fn read_trimmed_line(path: &Path, max: usize) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut buf = Vec::with_capacity(max);
    file.by_ref().take(max as u64).read_to_end(&mut buf)?;
    let text = String::from_utf8_lossy(&buf);
    Ok(text.trim_end().to_owned())
}

/// Opens `path` for exclusive creation, mapping to the `O_CREAT|O_EXCL`
/// semantics relied on by the input stager; used where `std::fs` alone
/// doesn't expose the flag combination tests need to assert on directly.
pub fn open_exclusive(path: &Path) -> nix::Result<std::os::fd::OwnedFd> {
    fcntl::open(
        path,
        OFlag::O_WRONLY | OFlag::O_CREAT | OFlag::O_EXCL,
        nix::sys::stat::Mode::from_bits_truncate(0o644),
    )
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn write_exclusive_fails_on_existing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("f");
        write_exclusive(&path, b"a").unwrap();
        assert!(write_exclusive(&path, b"b").is_err());
    }

    #[test]
    fn publish_atomic_replaces_destination() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("CURRENT_BEST");
        publish_atomic(&dest, b"first").unwrap();
        assert_eq!(fs::read(&dest).unwrap(), b"first");
        publish_atomic(&dest, b"second").unwrap();
        assert_eq!(fs::read(&dest).unwrap(), b"second");
    }

    #[test]
    fn copy_or_link_detects_existing() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src");
        fs::write(&src, b"data").unwrap();
        let dst = dir.path().join("dst");
        assert_eq!(copy_or_link(&src, &dst).unwrap(), LinkOutcome::Linked);
        assert_eq!(
            copy_or_link(&src, &dst).unwrap(),
            LinkOutcome::AlreadyExists
        );
    }

    #[test]
    fn read_to_buffer_rejects_oversized() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("big");
        fs::write(&path, vec![0u8; 16]).unwrap();
        assert!(read_to_buffer(&path, 8).is_err());
        assert!(read_to_buffer(&path, 16).is_ok());
    }
}
