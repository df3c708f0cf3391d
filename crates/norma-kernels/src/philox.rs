//! Counter-based dropout randomness.
//!
//! Masks are drawn from Philox4x32-10 keyed by the generator seed. Every
//! kernel thread owns a subsequence (its global thread id) and walks it from
//! the launch offset, so a launch's draws are a pure function of
//! `(seed, offset, thread, draw)`. The [`Generator`] hands out disjoint
//! offset windows under a lock.

use std::sync::OnceLock;

use parking_lot::Mutex;

const PHILOX_M0: u32 = 0xD251_1F53;
const PHILOX_M1: u32 = 0xCD9E_8D57;
const PHILOX_W0: u32 = 0x9E37_79B9;
const PHILOX_W1: u32 = 0xBB67_AE85;

/// 2^-32; maps a 32-bit draw into (0, 1].
const TWO_POW_32_INV: f32 = 2.328_306_4e-10;

/// Seed of the process-wide default generator.
pub const DEFAULT_SEED: u64 = 67_280_421_310_721;

#[inline]
fn mulhilo(a: u32, b: u32) -> (u32, u32) {
    let p = u64::from(a) * u64::from(b);
    ((p >> 32) as u32, p as u32)
}

#[inline]
fn round(ctr: [u32; 4], key: [u32; 2]) -> [u32; 4] {
    let (hi0, lo0) = mulhilo(PHILOX_M0, ctr[0]);
    let (hi1, lo1) = mulhilo(PHILOX_M1, ctr[2]);
    [hi1 ^ ctr[1] ^ key[0], lo1, hi0 ^ ctr[3] ^ key[1], lo0]
}

/// One Philox4x32-10 block.
pub fn philox4x32_10(mut ctr: [u32; 4], mut key: [u32; 2]) -> [u32; 4] {
    for _ in 0..9 {
        ctr = round(ctr, key);
        key[0] = key[0].wrapping_add(PHILOX_W0);
        key[1] = key[1].wrapping_add(PHILOX_W1);
    }
    round(ctr, key)
}

/// Seed and starting offset reserved for one launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhiloxState {
    pub seed: u64,
    pub offset: u64,
}

impl PhiloxState {
    pub fn new(seed: u64, offset: u64) -> Self {
        Self { seed, offset }
    }

    /// Raw 32-bit value `draw` of `subsequence`, starting at this offset.
    pub fn draw_bits(&self, subsequence: u64, draw: u64) -> u32 {
        let pos = self.offset + draw;
        let block = pos / 4;
        let ctr = [
            block as u32,
            (block >> 32) as u32,
            subsequence as u32,
            (subsequence >> 32) as u32,
        ];
        let key = [self.seed as u32, (self.seed >> 32) as u32];
        philox4x32_10(ctr, key)[(pos % 4) as usize]
    }

    /// Uniform sample in (0, 1].
    #[inline]
    pub fn uniform(&self, subsequence: u64, draw: u64) -> f32 {
        self.draw_bits(subsequence, draw) as f32 * TWO_POW_32_INV + TWO_POW_32_INV / 2.0
    }
}

/// Round an offset increment up to a whole Philox block.
pub fn round_increment(increment: u64) -> u64 {
    (increment + 3) / 4 * 4
}

/// A seeded Philox stream whose offset advances as launches reserve draws.
#[derive(Debug)]
pub struct Generator {
    state: Mutex<PhiloxState>,
}

impl Generator {
    pub fn new(seed: u64) -> Self {
        Self {
            state: Mutex::new(PhiloxState::new(seed, 0)),
        }
    }

    pub fn seed(&self) -> u64 {
        self.state.lock().seed
    }

    pub fn offset(&self) -> u64 {
        self.state.lock().offset
    }

    /// Reseed and rewind to offset zero.
    pub fn manual_seed(&self, seed: u64) {
        *self.state.lock() = PhiloxState::new(seed, 0);
    }

    /// Reserve `increment` draws per thread: returns the current state and
    /// moves the offset past the reservation, rounded up to a multiple of 4.
    pub fn philox_state(&self, increment: u64) -> PhiloxState {
        let mut state = self.state.lock();
        let reserved = *state;
        state.offset += round_increment(increment);
        tracing::trace!(
            seed = reserved.seed,
            offset = reserved.offset,
            increment,
            "reserved philox window"
        );
        reserved
    }
}

impl Default for Generator {
    fn default() -> Self {
        Self::new(DEFAULT_SEED)
    }
}

static DEFAULT_GENERATOR: OnceLock<Generator> = OnceLock::new();

/// Process-wide generator used when a call does not bring its own.
pub fn default_generator() -> &'static Generator {
    DEFAULT_GENERATOR.get_or_init(Generator::default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_answer_zero() {
        let out = philox4x32_10([0; 4], [0; 2]);
        assert_eq!(out, [0x6627_e8d5, 0xe169_c58d, 0xbc57_ac4c, 0x9b00_dbd8]);
    }

    #[test]
    fn test_known_answer_ones() {
        let out = philox4x32_10([u32::MAX; 4], [u32::MAX; 2]);
        assert_eq!(out, [0x408f_276d, 0x41c8_3b0e, 0xa20b_c7c6, 0x6d54_51fd]);
    }

    #[test]
    fn test_uniform_range() {
        let st = PhiloxState::new(7, 0);
        for d in 0..1000 {
            let u = st.uniform(3, d);
            assert!(u > 0.0 && u <= 1.0, "{u}");
        }
    }

    #[test]
    fn test_offset_shifts_stream() {
        let a = PhiloxState::new(42, 0);
        let b = PhiloxState::new(42, 8);
        for d in 0..16 {
            assert_eq!(a.draw_bits(5, d + 8), b.draw_bits(5, d));
        }
    }

    #[test]
    fn test_subsequences_differ() {
        let st = PhiloxState::new(42, 0);
        let a: Vec<u32> = (0..8).map(|d| st.draw_bits(0, d)).collect();
        let b: Vec<u32> = (0..8).map(|d| st.draw_bits(1, d)).collect();
        assert_ne!(a, b);
    }

    #[test]
    fn test_generator_reserves_rounded_windows() {
        let gen = Generator::new(1);
        assert_eq!(gen.philox_state(5), PhiloxState::new(1, 0));
        assert_eq!(gen.offset(), 8);
        assert_eq!(gen.philox_state(4), PhiloxState::new(1, 8));
        assert_eq!(gen.offset(), 12);
        assert_eq!(gen.philox_state(0).offset, 12);
        assert_eq!(gen.offset(), 12);
    }

    #[test]
    fn test_manual_seed_rewinds() {
        let gen = Generator::new(1);
        gen.philox_state(100);
        gen.manual_seed(9);
        assert_eq!(gen.seed(), 9);
        assert_eq!(gen.offset(), 0);
    }

    #[test]
    fn test_concurrent_reservations_disjoint() {
        let gen = std::sync::Arc::new(Generator::new(3));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let gen = gen.clone();
                std::thread::spawn(move || (0..50).map(|_| gen.philox_state(6).offset).collect::<Vec<_>>())
            })
            .collect();
        let mut offsets: Vec<u64> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
        offsets.sort_unstable();
        for pair in offsets.windows(2) {
            assert!(pair[1] - pair[0] >= 8);
        }
        assert_eq!(gen.offset(), 8 * 50 * 8);
    }
}
