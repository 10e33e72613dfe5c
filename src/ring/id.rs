use sha1::{Digest, Sha1};
use std::fmt;

/// Width of a ring identifier in bytes.
pub const ID_BYTES: usize = 20;
/// Width of a ring identifier in bits; also the size of the finger table.
pub const ID_BITS: usize = 160;

/// A position on the 160-bit identifier ring.
///
/// Stored big-endian, so the derived lexicographic ordering of the byte
/// array is exactly the unsigned integer ordering.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Id([u8; ID_BYTES]);

impl Id {
    pub const ZERO: Id = Id([0u8; ID_BYTES]);

    pub const fn from_bytes(bytes: [u8; ID_BYTES]) -> Self {
        Id(bytes)
    }

    /// Reads an identifier from a wire field; `None` unless exactly 20 bytes.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; ID_BYTES] = bytes.try_into().ok()?;
        Some(Id(arr))
    }

    /// SHA-1 digest of arbitrary bytes, mapped onto the ring.
    pub fn digest(input: &[u8]) -> Self {
        let hash = Sha1::digest(input);
        let mut bytes = [0u8; ID_BYTES];
        bytes.copy_from_slice(&hash);
        Id(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; ID_BYTES] {
        &self.0
    }

    /// `(self + 2^power) mod 2^160`. A power outside `[0, 160)` leaves the
    /// identifier unchanged.
    pub fn add_pow2(&self, power: usize) -> Id {
        if power >= ID_BITS {
            return *self;
        }

        let mut result = self.0;
        let byte_index = ID_BYTES - 1 - power / 8;
        let bit = 1u16 << (power % 8);

        let mut carry = bit;
        let mut i = byte_index as isize;
        while i >= 0 && carry != 0 {
            let sum = result[i as usize] as u16 + carry;
            result[i as usize] = (sum & 0xFF) as u8;
            carry = sum >> 8;
            i -= 1;
        }

        Id(result)
    }

    /// Short hex prefix for log lines.
    pub fn short_hex(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

/// Membership of `id` in the clockwise arc from `start` (exclusive) to `end`
/// (inclusive or exclusive), wrapping past zero when `start > end`.
///
/// A degenerate arc (`start == end`) contains only its endpoint, and only
/// when the end is inclusive.
pub fn in_arc(id: &Id, start: &Id, end: &Id, inclusive_end: bool) -> bool {
    if start == end {
        return inclusive_end && id == start;
    }

    let before_end = if inclusive_end { id <= end } else { id < end };

    if start < end {
        id > start && before_end
    } else {
        id > start || before_end
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Id({}..)", self.short_hex())
    }
}
