//! Position keys for ordering siblings without renumbering.
//!
//! A key is a string of base-256 digits read as a fraction in `[0, 1)`.
//! Keys never end in a zero digit, which makes plain lexicographic byte
//! comparison agree with numeric comparison. New keys can always be
//! generated strictly before, after or between existing ones.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// A totally ordered sibling position.
///
/// Ordering is lexicographic over the raw bytes. Two keys generated by
/// different clients for the same slot are kept apart by the suffix each
/// client appends (usually derived from the item identity).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PositionKey {
    bytes: Vec<u8>,
}

impl PositionKey {
    /// Wrap raw bytes. Use [`PositionKey::is_valid`] before trusting input
    /// from the wire.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    /// Raw bytes of the key.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// A key is valid when it is non-empty and has no trailing zero digit.
    pub fn is_valid(&self) -> bool {
        matches!(self.bytes.last(), Some(&last) if last != 0)
    }

    /// First position in an empty sibling list.
    pub fn initial(suffix: &[u8]) -> Self {
        Self::with_suffix(vec![0x80], suffix)
    }

    /// A position strictly after `prev`.
    pub fn after(prev: &PositionKey, suffix: &[u8]) -> Self {
        Self::with_suffix(midpoint(&prev.bytes, None), suffix)
    }

    /// A position strictly before `next`.
    pub fn before(next: &PositionKey, suffix: &[u8]) -> Self {
        Self::with_suffix(midpoint(&[], Some(&next.bytes)), suffix)
    }

    /// A position strictly between `lo` and `hi`. The bounds may be given
    /// in either order; equal bounds yield a key after them.
    pub fn between(lo: &PositionKey, hi: &PositionKey, suffix: &[u8]) -> Self {
        match lo.cmp(hi) {
            Ordering::Less => Self::with_suffix(midpoint(&lo.bytes, Some(&hi.bytes)), suffix),
            Ordering::Greater => Self::with_suffix(midpoint(&hi.bytes, Some(&lo.bytes)), suffix),
            Ordering::Equal => Self::after(lo, suffix),
        }
    }

    fn with_suffix(mut digits: Vec<u8>, suffix: &[u8]) -> Self {
        // Appending keeps the bounds: the midpoint already differs from both
        // neighbours before the suffix starts.
        let trimmed = match suffix.iter().rposition(|&b| b != 0) {
            Some(last) => &suffix[..=last],
            None => &[][..],
        };
        digits.extend_from_slice(trimmed);
        Self { bytes: digits }
    }
}

/// Digits strictly between `lo` and `hi` (`None` meaning 1.0).
///
/// `lo` must be less than `hi` and neither may end in a zero digit.
fn midpoint(lo: &[u8], hi: Option<&[u8]>) -> Vec<u8> {
    let mut out = Vec::new();
    let mut hi = hi;
    let mut i = 0;
    loop {
        let l = lo.get(i).copied().unwrap_or(0) as u16;
        let h = match hi {
            // Both exhausted only happens for malformed bounds.
            Some(h) if i < h.len() || i < lo.len() => h.get(i).copied().unwrap_or(0) as u16,
            _ => 256,
        };

        if l == h {
            out.push(l as u8);
            i += 1;
            continue;
        }

        let mid = (l + h) / 2;
        if mid > l {
            out.push(mid as u8);
            return out;
        }

        // Adjacent digits: keep `l` and find room above the rest of `lo`.
        out.push(l as u8);
        hi = None;
        i += 1;
    }
}

impl Ord for PositionKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.bytes.cmp(&other.bytes)
    }
}

impl PartialOrd for PositionKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
