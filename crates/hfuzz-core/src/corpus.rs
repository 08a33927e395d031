use std::fs;
use std::path::{Path, PathBuf};

use libafl_bolts::rands::Rand;
use tracing::warn;

use crate::error::StageError;

/// A placeholder entry used when no real seed file is available but the
/// configured mode (dynamic or external) can still make progress without one.
pub const DYNAMIC_PLACEHOLDER: &str = "DYNAMIC_FILE";

/// Read-only, immutable-after-load set of seed paths (§4.1).
#[derive(Debug, Clone)]
pub struct CorpusIndex {
    entries: Vec<PathBuf>,
}

impl CorpusIndex {
    /// Loads the corpus from a single file or a directory of files.
    ///
    /// Mirrors `files_readdir`: non-regular, empty, and oversized entries are
    /// skipped with a warning rather than failing the whole load. An empty
    /// result is only acceptable when `allow_empty` is set (dynamic/external
    /// modes can synthesize a starting point without a real seed).
    pub fn load(input: &Path, max_size: u64, allow_empty: bool) -> Result<Self, StageError> {
        let metadata = fs::metadata(input).map_err(StageError::SeedRead)?;

        let entries = if metadata.is_dir() {
            let mut entries = Vec::new();
            for entry in fs::read_dir(input).map_err(StageError::SeedRead)? {
                let entry = entry.map_err(StageError::SeedRead)?;
                let path = entry.path();
                let Ok(meta) = entry.metadata() else {
                    warn!(?path, "skipping corpus entry: cannot stat");
                    continue;
                };
                if !meta.is_file() {
                    continue;
                }
                if meta.len() == 0 {
                    warn!(?path, "skipping corpus entry: empty file");
                    continue;
                }
                if meta.len() > max_size {
                    warn!(?path, size = meta.len(), max_size, "skipping corpus entry: too large");
                    continue;
                }
                entries.push(path);
            }
            entries
        } else {
            vec![input.to_path_buf()]
        };

        if entries.is_empty() && !allow_empty {
            return Err(StageError::EmptySeed);
        }

        Ok(Self { entries })
    }

    /// Builds a corpus with no real seeds, for dynamic/external modes that
    /// start from a synthetic placeholder.
    pub fn empty() -> Self {
        Self { entries: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Uniformly picks one seed path. Returns `None` if the corpus is empty
    /// (the caller falls back to the dynamic placeholder).
    pub fn pick_random(&self, rand: &mut impl Rand) -> Option<&Path> {
        if self.entries.is_empty() {
            return None;
        }
        let idx = rand.below(self.entries.len());
        Some(&self.entries[idx])
    }
}
