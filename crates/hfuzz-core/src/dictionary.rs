use std::collections::HashSet;

/// Stack hashes to suppress from crash reporting, parsed by the caller from a
/// sorted ascending hex-per-line file (§3 Blacklist/dictionary sets).
#[derive(Debug, Clone, Default)]
pub struct Blacklist {
    hashes: HashSet<u64>,
}

impl Blacklist {
    pub fn new(hashes: impl IntoIterator<Item = u64>) -> Self {
        Self {
            hashes: hashes.into_iter().collect(),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn contains(&self, stack_hash: u64) -> bool {
        self.hashes.contains(&stack_hash)
    }

    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }
}

/// Dictionary tokens used by the mutation engine in place of random bytes,
/// parsed by the caller from a NUL-delimited wordlist file.
#[derive(Debug, Clone, Default)]
pub struct Dictionary {
    tokens: Vec<Vec<u8>>,
}

impl Dictionary {
    pub fn new(tokens: Vec<Vec<u8>>) -> Self {
        Self { tokens }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn tokens(&self) -> &[Vec<u8>] {
        &self.tokens
    }
}
