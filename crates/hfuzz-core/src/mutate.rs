//! Pure, reentrant byte-buffer transformations (§4.2). No shared state; every
//! function takes its PRNG explicitly so callers control determinism.

use libafl_bolts::rands::Rand;

use crate::dictionary::Dictionary;

/// Probability that [`resize`] changes the buffer length at all, once called.
const RESIZE_PROBABILITY: f64 = 0.1;

/// Randomly grows or shrinks `bytes` within `[1, max_size]`. A no-op most of
/// the time; the exact policy isn't semantically load-bearing beyond staying
/// in range (§4.2). `flip_rate == 0.0` is a documented no-op, matching
/// `mangle` (§8 mutation preservation).
pub fn resize(bytes: &mut Vec<u8>, max_size: usize, flip_rate: f64, rand: &mut impl Rand) {
    debug_assert!(max_size >= 1);
    if flip_rate <= 0.0 || !rand.coinflip(RESIZE_PROBABILITY) {
        return;
    }
    let max_size = max_size.max(1);
    let new_len = 1 + rand.below(max_size);
    if new_len <= bytes.len() {
        bytes.truncate(new_len);
    } else {
        bytes.resize_with(new_len, || rand.below(256) as u8);
    }
}

/// Applies random byte-level perturbations whose expected count is
/// `flip_rate * size` (§4.2). `flip_rate == 0.0` is a documented no-op.
pub fn mangle(bytes: &mut [u8], flip_rate: f64, dictionary: &Dictionary, rand: &mut impl Rand) {
    if bytes.is_empty() || flip_rate <= 0.0 {
        return;
    }

    let expected = (flip_rate * bytes.len() as f64).ceil() as usize;
    for _ in 0..expected.max(1) {
        if flip_rate <= 0.0 {
            break;
        }
        if !rand.coinflip(flip_rate) {
            continue;
        }
        if !dictionary.is_empty() && rand.coinflip(0.5) {
            splice_token(bytes, dictionary, rand);
        } else if rand.coinflip(0.5) {
            let idx = rand.below(bytes.len());
            bytes[idx] ^= 1 << rand.below(8);
        } else {
            let idx = rand.below(bytes.len());
            bytes[idx] = rand.below(256) as u8;
        }
    }
}

fn splice_token(bytes: &mut [u8], dictionary: &Dictionary, rand: &mut impl Rand) {
    let tokens = dictionary.tokens();
    let token = &tokens[rand.below(tokens.len())];
    if token.is_empty() || bytes.is_empty() {
        return;
    }
    let start = rand.below(bytes.len());
    let len = token.len().min(bytes.len() - start);
    bytes[start..start + len].copy_from_slice(&token[..len]);
}

#[cfg(test)]
mod tests {
    use libafl_bolts::rands::StdRand;

    use super::*;

    #[test]
    fn mangle_is_noop_at_zero_flip_rate() {
        let original = vec![1u8, 2, 3, 4, 5];
        let mut bytes = original.clone();
        let mut rand = StdRand::with_seed(7);
        mangle(&mut bytes, 0.0, &Dictionary::empty(), &mut rand);
        assert_eq!(bytes, original);
    }

    #[test]
    fn resize_stays_in_bounds() {
        let mut rand = StdRand::with_seed(1);
        for _ in 0..200 {
            let mut bytes = vec![0u8; 4];
            resize(&mut bytes, 16, 1.0, &mut rand);
            assert!((1..=16).contains(&bytes.len()));
        }
    }

    #[test]
    fn resize_is_noop_at_zero_flip_rate() {
        let mut rand = StdRand::with_seed(1);
        for _ in 0..200 {
            let mut bytes = vec![0u8; 4];
            resize(&mut bytes, 16, 0.0, &mut rand);
            assert_eq!(bytes.len(), 4);
        }
    }

    #[test]
    fn mangle_preserves_length() {
        let mut rand = StdRand::with_seed(3);
        let mut bytes = vec![0u8; 32];
        mangle(&mut bytes, 0.5, &Dictionary::empty(), &mut rand);
        assert_eq!(bytes.len(), 32);
    }
}
