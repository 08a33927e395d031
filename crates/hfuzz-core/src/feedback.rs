//! The dynamic-input feedback engine (§4.4): a mutex-guarded "best" triple
//! plus the monotone accept/reject rule over multi-dimensional counters.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, info};

use crate::config::DynFileMethod;
use crate::error::FeedbackError;
use crate::io;

/// One sample of the multi-dimensional feedback signal for a single run.
/// Slots follow [`DynFileMethod::enabled_indices`]'s stable order; disabled
/// dimensions are left at zero and never compared.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counters(pub [u64; DynFileMethod::DIMENSIONS]);

impl Counters {
    pub fn zero() -> Self {
        Self::default()
    }

    /// `self` dominates `other` iff every enabled dimension of `self` is
    /// `>= other`'s (§3 Counter vector comparison, strict Pareto rule).
    pub fn dominates(&self, other: &Counters, enabled: DynFileMethod) -> bool {
        enabled
            .enabled_indices()
            .all(|idx| self.0[idx] >= other.0[idx])
    }
}

struct Best {
    bytes: Vec<u8>,
    counters: Counters,
}

/// Shared, process-wide champion input plus its counters. The only
/// cross-worker happens-before edge in the supervisor (§5).
pub struct FeedbackStore {
    best: Mutex<Best>,
    iter_since_reset: AtomicU64,
    seeded: AtomicU64,
    max_file_size: usize,
    enabled: DynFileMethod,
    max_dyn_file_iter: u64,
    publish_path: PathBuf,
}

impl std::fmt::Debug for FeedbackStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedbackStore")
            .field("max_file_size", &self.max_file_size)
            .field("enabled", &self.enabled)
            .field("publish_path", &self.publish_path)
            .finish_non_exhaustive()
    }
}

impl FeedbackStore {
    pub fn new(workspace: &Path, max_file_size: usize, enabled: DynFileMethod, max_dyn_file_iter: u64) -> Self {
        Self {
            best: Mutex::new(Best {
                bytes: Vec::new(),
                counters: Counters::zero(),
            }),
            iter_since_reset: AtomicU64::new(0),
            seeded: AtomicU64::new(0),
            max_file_size,
            enabled,
            max_dyn_file_iter,
            publish_path: workspace.join("CURRENT_BEST"),
        }
    }

    /// Loads a starting candidate from `bytes` the first time this is
    /// called after construction (or after a reset); a no-op thereafter
    /// (§4.4 idempotence of seeding).
    pub fn seed_initial(&self, bytes: &[u8]) -> Result<(), FeedbackError> {
        if self.seeded.swap(1, Ordering::AcqRel) == 1 {
            return Ok(());
        }
        if bytes.len() > self.max_file_size {
            return Err(FeedbackError::CandidateTooLarge(bytes.len(), self.max_file_size));
        }
        let mut best = self.best.lock().map_err(|_| FeedbackError::Poisoned)?;
        best.bytes = bytes.to_vec();
        Ok(())
    }

    /// Returns a consistent copy of the current best triple.
    pub fn snapshot(&self) -> Result<(Vec<u8>, Counters), FeedbackError> {
        let best = self.best.lock().map_err(|_| FeedbackError::Poisoned)?;
        Ok((best.bytes.clone(), best.counters))
    }

    /// Accepts `candidate` iff it dominates the current best on every
    /// enabled dimension; on acceptance, atomically publishes the new best
    /// to `workspace/CURRENT_BEST`.
    pub fn try_update(&self, candidate: &[u8], counters: Counters) -> Result<bool, FeedbackError> {
        if candidate.len() > self.max_file_size {
            return Err(FeedbackError::CandidateTooLarge(candidate.len(), self.max_file_size));
        }
        let mut best = self.best.lock().map_err(|_| FeedbackError::Poisoned)?;
        if !counters.dominates(&best.counters, self.enabled) {
            debug!(?counters, current = ?best.counters, "candidate rejected by dominance rule");
            return Ok(false);
        }
        best.bytes.clear();
        best.bytes.extend_from_slice(candidate);
        best.counters = counters;
        drop(best);

        self.iter_since_reset.fetch_add(1, Ordering::AcqRel);
        if let Err(err) = io::publish_atomic(&self.publish_path, candidate) {
            tracing::warn!(?err, path = ?self.publish_path, "failed to publish CURRENT_BEST");
        }
        info!(size = candidate.len(), ?counters, "dynamic best improved");
        Ok(true)
    }

    /// Clamps `iter_since_reset` after a crashing candidate, per the
    /// resolved open question in §9: only the iteration budget is reduced,
    /// `best_counters` itself is left untouched.
    pub fn note_crash(&self, mask: u64) {
        self.iter_since_reset.fetch_and(mask, Ordering::AcqRel);
    }

    /// Whether the unimproved-best budget has expired and the store should
    /// be re-seeded from the corpus.
    pub fn needs_reset(&self) -> bool {
        self.iter_since_reset.load(Ordering::Acquire) >= self.max_dyn_file_iter
    }

    /// Resets the store so the next `seed_initial` call takes effect again,
    /// clearing the current best candidate and its counters (§4.4: "on
    /// expiry, the store re-seeds from the corpus and resets counters") so a
    /// freshly seeded candidate can dominate again instead of being
    /// permanently rejected against a stale high-water mark.
    pub fn reset(&self) {
        self.iter_since_reset.store(0, Ordering::Release);
        self.seeded.store(0, Ordering::Release);
        let mut best = match self.best.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        best.bytes.clear();
        best.counters = Counters::zero();
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    fn counters(v: [u64; DynFileMethod::DIMENSIONS]) -> Counters {
        Counters(v)
    }

    #[test]
    fn strict_dominance_accepts_and_rejects() {
        let dir = tempdir().unwrap();
        let store = FeedbackStore::new(dir.path(), 64, DynFileMethod::INSTR_COUNT, 100);
        assert!(store.try_update(b"a", counters([5, 0, 0, 0, 0])).unwrap());
        assert!(!store.try_update(b"b", counters([4, 0, 0, 0, 0])).unwrap());
        assert!(store.try_update(b"c", counters([5, 0, 0, 0, 0])).unwrap());
        let (bytes, _) = store.snapshot().unwrap();
        assert_eq!(bytes, b"c");
    }

    #[test]
    fn publishes_current_best_atomically() {
        let dir = tempdir().unwrap();
        let store = FeedbackStore::new(dir.path(), 64, DynFileMethod::INSTR_COUNT, 100);
        store.try_update(b"winner", counters([1, 0, 0, 0, 0])).unwrap();
        let published = std::fs::read(dir.path().join("CURRENT_BEST")).unwrap();
        assert_eq!(published, b"winner");
    }

    #[test]
    fn seed_initial_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = FeedbackStore::new(dir.path(), 64, DynFileMethod::INSTR_COUNT, 100);
        store.seed_initial(b"seed").unwrap();
        store.try_update(b"improved", counters([1, 0, 0, 0, 0])).unwrap();
        store.seed_initial(b"other-seed").unwrap();
        let (bytes, _) = store.snapshot().unwrap();
        assert_eq!(bytes, b"improved");
    }

    #[test]
    fn candidate_over_max_size_is_rejected() {
        let dir = tempdir().unwrap();
        let store = FeedbackStore::new(dir.path(), 4, DynFileMethod::INSTR_COUNT, 100);
        assert!(store.try_update(b"too-long", counters([1, 0, 0, 0, 0])).is_err());
    }

    #[test]
    fn reset_clears_best_so_a_lower_counter_can_win_again() {
        let dir = tempdir().unwrap();
        let store = FeedbackStore::new(dir.path(), 64, DynFileMethod::INSTR_COUNT, 100);
        store.try_update(b"high-water-mark", counters([100, 0, 0, 0, 0])).unwrap();
        store.reset();
        let (bytes, best_counters) = store.snapshot().unwrap();
        assert!(bytes.is_empty());
        assert_eq!(best_counters, Counters::zero());
        assert!(store.try_update(b"fresh", counters([1, 0, 0, 0, 0])).unwrap());
    }
}
