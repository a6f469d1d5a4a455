//! FlipHash placement.
//!
//! Maps a key to an index in `[0, n)` such that growing the range to
//! `n + 1` moves only about `1/n` of the keys, and every key that moves
//! lands on the new slot `n`. The dispatcher feeds it the client IP and the
//! current pool size; the returned index selects the backend.
//!
//! All hashing is seeded xxh3-64. Seeds pack two 16-bit values:
//! `seed(a, b) = (a & 0xFFFF) | ((b & 0xFFFF) << 16)`.

use xxhash_rust::xxh3::xxh3_64_with_seed;

/// Maximum redraws in the out-of-range rejection loop of [`fliphash`].
const MAX_REDRAWS: u16 = 64;

fn seed(a: u16, b: u16) -> u64 {
    u64::from(a) | (u64::from(b) << 16)
}

/// Low `bits` bits set, saturating at the full word.
fn mask(bits: u32) -> u64 {
    if bits >= 64 {
        u64::MAX
    } else {
        (1u64 << bits) - 1
    }
}

fn hash(seed: u64, key: &[u8]) -> u64 {
    xxh3_64_with_seed(key, seed)
}

/// Assign `key` to a range of size `2^r`.
///
/// Draws `a` in `[0, 2^r)`, keeps its highest set bit and re-draws the bits
/// below it with a hash seeded by the bit position. When `r` grows by one,
/// only keys whose new top bit comes up set are re-assigned, which is what
/// gives the scheme its minimal-disruption property.
#[must_use]
pub fn fliphash_pow2(key: &[u8], r: u32) -> u64 {
    let a = hash(seed(0, 0), key) & mask(r);
    if a <= 1 {
        return a;
    }
    let b = 63 - a.leading_zeros();
    let c = hash(seed(b as u16, 0), key) & mask(b);
    (1u64 << b) | c
}

/// Assign `key` to `[0, n)` for arbitrary `n >= 1`.
///
/// Hashes into the next power of two and resolves out-of-range draws by
/// bounded re-hashing: a redraw below `2^(r-1)` falls back to the
/// half-range assignment, a redraw inside `[2^(r-1), n)` is taken as is.
///
/// # Panics
///
/// Panics if `n == 0`. Callers must check for an empty pool first.
#[must_use]
pub fn fliphash(key: &[u8], n: u64) -> u64 {
    assert_ne!(n, 0, "placement over an empty range");
    if n == 1 {
        return 0;
    }

    // Smallest r with 2^r >= n.
    let r = 64 - (n - 1).leading_zeros();
    let d = fliphash_pow2(key, r);
    if d < n {
        return d;
    }

    let half = 1u64 << (r - 1);
    for i in 0..MAX_REDRAWS {
        let e = hash(seed((r - 1) as u16, i), key) & mask(r);
        if e < half {
            return fliphash_pow2(key, r - 1);
        }
        if e < n {
            return e;
        }
    }
    fliphash_pow2(key, r - 1)
}
