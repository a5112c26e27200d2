//! Process-wide packet sequence numbers.

use std::sync::atomic::{AtomicU32, Ordering};

static SEQUENCE: AtomicU32 = AtomicU32::new(0);

/// Next sequence number. Wraps around but never returns zero, since zero
/// marks "unassigned" in a packet header.
pub fn next_sequence() -> u32 {
    loop {
        let next = SEQUENCE.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        if next != 0 {
            return next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_is_nonzero_and_increasing() {
        let a = next_sequence();
        let b = next_sequence();
        assert_ne!(a, 0);
        assert!(b > a);
    }
}
