//! `chord-ring`: identifier arithmetic for the Chord hash ring.
//!
//! The ring is the modular space `[0, 2^m)`. This crate owns:
//! - [`RingId`]: a fixed-width 160-bit identifier (the full SHA-1 output
//!   width), so the same representation works whether the ring is
//!   configured with `m = 6` (a classroom-sized ring) or `m = 160`
//!   (the full SHA-1 space). "mod 2^m" is a bitmask of the low `m` bits
//!   since `2^m` is always a power of two — no division is needed.
//! - [`RingParams`]: the `m` (and derived successor-list/finger-table
//!   sizing) that is threaded through node construction instead of
//!   living as free-floating constants, so callers (including tests)
//!   can instantiate rings of different sizes.
//! - [`between`]: the clockwise ring-interval test every routing and
//!   maintenance decision in this crate is built on.
//!
//! Identifiers compare and hash like ordinary integers: [`RingId`] stores
//! its bytes big-endian, so byte-wise lexicographic ordering is numeric
//! ordering, and it derives `Hash`/`Eq`/`Ord` directly — no pointer-identity
//! map-key surprises.

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::fmt;

/// Width, in bytes, of a SHA-1 digest. This bounds `m` at 160 bits.
pub const ID_BYTES: usize = 20;

/// Maximum supported ring bit-width (the full SHA-1 output width).
pub const MAX_M: u32 = (ID_BYTES * 8) as u32;

/// A 160-bit ring identifier, stored big-endian so that `Ord` matches
/// numeric order. Identifiers handed out by [`RingParams::hash`] are
/// always pre-masked to the configured `m`; arithmetic helpers re-mask
/// their results so an out-of-range `RingId` can't silently leak in.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RingId(#[serde(with = "id_bytes")] [u8; ID_BYTES]);

mod id_bytes {
    use super::ID_BYTES;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8; ID_BYTES], s: S) -> Result<S::Ok, S::Error> {
        serde::Serialize::serialize(&bytes.to_vec(), s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; ID_BYTES], D::Error> {
        let v: Vec<u8> = serde::Deserialize::deserialize(d)?;
        if v.len() != ID_BYTES {
            return Err(serde::de::Error::custom(format!(
                "ring id must be {ID_BYTES} bytes, got {}",
                v.len()
            )));
        }
        let mut out = [0u8; ID_BYTES];
        out.copy_from_slice(&v);
        Ok(out)
    }
}

impl RingId {
    /// The zero identifier.
    pub const ZERO: RingId = RingId([0u8; ID_BYTES]);

    /// Build a `RingId` from raw big-endian bytes without masking. Callers
    /// that need ring-valid ids should go through [`RingParams::hash`] or
    /// [`RingParams::mask`].
    pub fn from_bytes(bytes: [u8; ID_BYTES]) -> Self {
        RingId(bytes)
    }

    pub fn to_bytes(self) -> [u8; ID_BYTES] {
        self.0
    }

    /// Low 64 bits, for display and for rings small enough that the full
    /// identifier fits (`m <= 64`, the common case, including the
    /// reference `m = 6` configuration). Rings configured with `m > 64`
    /// still compare/hash correctly via the full byte array; this is a
    /// debug aid only.
    pub fn as_u64(self) -> u64 {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&self.0[ID_BYTES - 8..]);
        u64::from_be_bytes(buf)
    }

    fn add(self, other: RingId) -> RingId {
        let mut out = [0u8; ID_BYTES];
        let mut carry: u16 = 0;
        for i in (0..ID_BYTES).rev() {
            let sum = self.0[i] as u16 + other.0[i] as u16 + carry;
            out[i] = (sum & 0xFF) as u8;
            carry = sum >> 8;
        }
        // Carry out of the top byte is dropped: this is exactly mod 2^160.
        RingId(out)
    }

    /// The identifier with only bit `exp` set (`2^exp`), as a 160-bit value.
    fn single_bit(exp: u32) -> RingId {
        let mut out = [0u8; ID_BYTES];
        if exp < MAX_M {
            let byte_from_lsb = (exp / 8) as usize;
            let byte_idx = ID_BYTES - 1 - byte_from_lsb;
            out[byte_idx] = 1u8 << (exp % 8);
        }
        RingId(out)
    }
}

impl fmt::Debug for RingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RingId({})", self.as_u64())
    }
}

impl fmt::Display for RingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u64())
    }
}

/// The ring's sizing configuration: `m` determines the identifier space
/// `[0, 2^m)`. `successor_list_len` and `finger_table_len` are carried
/// alongside since both are meaningful only in terms of a concrete ring.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RingParams {
    pub m: u32,
    pub successor_list_len: usize,
}

impl RingParams {
    /// `m` in `[1, 160]`. Returns `None` for an out-of-range `m` — callers
    /// validate this at config time (see `chord-config`) so this is a
    /// debug-assertion-style guard, not a user-facing error path.
    pub fn new(m: u32, successor_list_len: usize) -> Option<Self> {
        if m == 0 || m > MAX_M || successor_list_len == 0 {
            return None;
        }
        Some(RingParams {
            m,
            successor_list_len,
        })
    }

    /// Number of rows in the finger table (rows `1..=m`; row 0 mirrors self
    /// and is never populated by `fix_fingers`).
    pub fn finger_table_len(&self) -> usize {
        self.m as usize
    }

    /// Zero out every bit above position `m - 1`, implementing `x mod 2^m`.
    pub fn mask(&self, id: RingId) -> RingId {
        if self.m >= MAX_M {
            return id;
        }
        let bits_to_clear = MAX_M - self.m;
        let full_bytes = (bits_to_clear / 8) as usize;
        let remaining_bits = bits_to_clear % 8;
        let mut bytes = id.0;
        for b in bytes.iter_mut().take(full_bytes) {
            *b = 0;
        }
        if remaining_bits > 0 {
            let keep_mask = 0xFFu8 >> remaining_bits;
            bytes[full_bytes] &= keep_mask;
        }
        RingId(bytes)
    }

    /// `SHA1(s) mod 2^m`.
    pub fn hash(&self, s: &str) -> RingId {
        let mut hasher = Sha1::new();
        hasher.update(s.as_bytes());
        let digest = hasher.finalize();
        let mut bytes = [0u8; ID_BYTES];
        bytes.copy_from_slice(&digest);
        self.mask(RingId(bytes))
    }

    /// `(id + 2^exp) mod 2^m`, used to compute finger-table start
    /// positions: `exp` is `i - 1` for finger row `i` in `[1, m]`.
    pub fn add_pow2(&self, id: RingId, exp: u32) -> RingId {
        self.mask(id.add(RingId::single_bit(exp)))
    }

    /// The start identifier of finger row `i` (`i` in `[1, m]`):
    /// `(self_id + 2^(i-1)) mod 2^m`.
    pub fn finger_start(&self, self_id: RingId, i: u32) -> RingId {
        self.add_pow2(self_id, i - 1)
    }
}

/// True iff `x` lies strictly clockwise of `a` and, depending on
/// `inclusive`, strictly before or at-or-before `b`, walking clockwise
/// around the ring. Handles both the ordinary case (`a < b`) and wrap
/// around zero (`b <= a`).
///
/// `a == b` denotes the empty arc and returns `inclusive` directly,
/// matching the convention of the reference implementation this crate
/// was ported from: an empty arc is conventionally treated as "the whole
/// ring" only in the inclusive case (used e.g. to let a solo node answer
/// for every key).
pub fn between(a: RingId, x: RingId, b: RingId, inclusive: bool) -> bool {
    if a == b {
        return inclusive;
    }
    if a < b {
        if inclusive {
            a < x && x <= b
        } else {
            a < x && x < b
        }
    } else if inclusive {
        x > a || x <= b
    } else {
        x > a || x < b
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(m: u32) -> RingParams {
        RingParams::new(m, 3).unwrap()
    }

    #[test]
    fn hash_is_masked_to_m_bits() {
        let p = params(6);
        let id = p.hash("127.0.0.1:8100");
        assert!(id.as_u64() < 64);
    }

    #[test]
    fn hash_is_deterministic() {
        let p = params(6);
        assert_eq!(p.hash("a"), p.hash("a"));
        assert_ne!(p.hash("a"), p.hash("b"));
    }

    #[test]
    fn finger_start_wraps_mod_ring_size() {
        let p = params(6);
        let self_id = RingId::from_bytes({
            let mut b = [0u8; ID_BYTES];
            b[ID_BYTES - 1] = 60;
            b
        });
        // 60 + 2^2 = 64 -> wraps to 0 on a 2^6 ring.
        assert_eq!(p.finger_start(self_id, 3).as_u64(), 0);
    }

    #[test]
    fn between_ordinary_interval() {
        let id = |v: u64| {
            let mut b = [0u8; ID_BYTES];
            b[ID_BYTES - 8..].copy_from_slice(&v.to_be_bytes());
            RingId::from_bytes(b)
        };
        assert!(between(id(10), id(20), id(30), false));
        assert!(!between(id(10), id(5), id(30), false));
        assert!(!between(id(10), id(30), id(30), false));
        assert!(between(id(10), id(30), id(30), true));
    }

    #[test]
    fn between_wraps_past_zero() {
        let id = |v: u64| {
            let mut b = [0u8; ID_BYTES];
            b[ID_BYTES - 8..].copy_from_slice(&v.to_be_bytes());
            RingId::from_bytes(b)
        };
        // ring of size 64: arc (48, 10] wraps through 0.
        assert!(between(id(48), id(5), id(10), true));
        assert!(between(id(48), id(63), id(10), true));
        assert!(!between(id(48), id(20), id(10), true));
    }

    #[test]
    fn between_empty_arc_returns_inclusive_flag() {
        let id = |v: u64| {
            let mut b = [0u8; ID_BYTES];
            b[ID_BYTES - 8..].copy_from_slice(&v.to_be_bytes());
            RingId::from_bytes(b)
        };
        assert!(between(id(7), id(99), id(7), true));
        assert!(!between(id(7), id(99), id(7), false));
    }

    #[test]
    fn ordering_matches_numeric_value() {
        let id = |v: u64| {
            let mut b = [0u8; ID_BYTES];
            b[ID_BYTES - 8..].copy_from_slice(&v.to_be_bytes());
            RingId::from_bytes(b)
        };
        assert!(id(5) < id(6));
        assert!(id(1 << 40) < id((1 << 40) + 1));
    }

    #[test]
    fn adjacent_ids_three_node_ring() {
        // Mirrors the spec's S3 scenario ids {10, 25, 48} on a 2^6 ring.
        let p = params(6);
        let id = |v: u64| {
            let mut b = [0u8; ID_BYTES];
            b[ID_BYTES - 8..].copy_from_slice(&v.to_be_bytes());
            RingId::from_bytes(b)
        };
        let (n10, n25, n48) = (id(10), id(25), id(48));
        assert!(between(n10, id(30), n48, true));
        assert!(between(n25, id(30), n48, true));
        assert!(between(n48, id(30), n10, true));
        let _ = p;
    }
}
