//! Dense lexicographic order key generation.
//!
//! Keys are ASCII strings compared bytewise. The alphabet runs from `!`
//! (0x21) to `}` (0x7D); `~` is reserved so an appended suffix can always
//! sort above any existing key. The empty string is the minimum sentinel
//! and never a real key.

use crate::domain::errors::ChatError;

const LO: u8 = b'!';
const HI: u8 = b'}';
const MID: u8 = b'O';

/// Number of mid bytes a fresh chat starts with, leaving room to generate
/// keys before the first one without immediate lengthening.
const HEADROOM: usize = 4;

/// Produces order keys that keep the per-chat total order dense.
pub trait OrderKeyGenerator: Send + Sync {
    /// A key strictly greater than `prev`. `prev` may be empty for the
    /// first message of a chat.
    fn next(&self, prev: &str) -> String;

    /// A key strictly between `prev` and `next`. `prev` may be the empty
    /// minimum sentinel.
    fn between(&self, prev: &str, next: &str) -> Result<String, ChatError>;
}

/// Default generator: append-increment for `next`, digit-walk fractional
/// midpoints for `between`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DenseKeyGenerator;

impl OrderKeyGenerator for DenseKeyGenerator {
    fn next(&self, prev: &str) -> String {
        if prev.is_empty() {
            return String::from_utf8(vec![MID; HEADROOM]).unwrap_or_default();
        }
        let mut bytes = prev.as_bytes().to_vec();
        match bytes.last_mut() {
            Some(last) if *last < HI => *last += 1,
            _ => bytes.push(MID),
        }
        String::from_utf8(bytes).unwrap_or_else(|_| format!("{prev}{}", MID as char))
    }

    fn between(&self, prev: &str, next: &str) -> Result<String, ChatError> {
        if !next.is_empty() && prev >= next {
            return Err(ChatError::invalid(format!(
                "order keys out of order: {prev:?} >= {next:?}"
            )));
        }

        let prev_bytes = prev.as_bytes();
        let next_bytes = next.as_bytes();
        let mut out = Vec::with_capacity(prev_bytes.len().max(next_bytes.len()) + 1);
        // once the prefix diverges below the upper bound, only the lower
        // bound constrains the remaining digits
        let mut upper_bounded = !next.is_empty();

        for i in 0.. {
            let has_prev = i < prev_bytes.len();
            let pd = if has_prev { prev_bytes[i] } else { LO - 1 };
            let nd = if upper_bounded {
                next_bytes.get(i).copied().unwrap_or(LO)
            } else {
                HI + 1
            };

            if nd > pd + 1 {
                out.push(midpoint(pd, nd));
                return String::from_utf8(out)
                    .map_err(|_| ChatError::invalid("non-ascii order key"));
            }

            if !has_prev && nd <= LO {
                if i + 1 >= next_bytes.len() {
                    // every key extending the shared prefix reaches next
                    // itself: no strict midpoint exists at any length
                    return Err(ChatError::OrderSpaceExhausted);
                }
                // the shared prefix plus the minimum digit is a strict
                // prefix of next, already inside the range
                out.push(LO);
                return String::from_utf8(out)
                    .map_err(|_| ChatError::invalid("non-ascii order key"));
            }

            out.push(pd);
            if pd < nd {
                upper_bounded = false;
            }
        }
        unreachable!()
    }
}

fn midpoint(lo: u8, hi: u8) -> u8 {
    // lo may be the virtual LO-1, hi the virtual HI+1
    lo + (hi - lo) / 2
}
