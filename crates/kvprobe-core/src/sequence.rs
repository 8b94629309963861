//! Unique byte strings for test keys and values.

use std::sync::atomic::{AtomicU64, Ordering};

/// Width of the counter at the front of every generated sequence.
pub const COUNTER_WIDTH: usize = 8;

/// Hands out strictly increasing byte strings.
///
/// Each call bumps an atomic counter and writes it big-endian into the first
/// eight bytes, zero padding the rest, so concurrent callers never collide and
/// later sequences compare greater than earlier ones.
#[derive(Debug, Default)]
pub struct SequenceGenerator {
    counter: AtomicU64,
}

impl SequenceGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next sequence, `len` bytes long (never shorter than the counter).
    pub fn next(&self, len: usize) -> Vec<u8> {
        let count = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        let mut bytes = vec![0u8; len.max(COUNTER_WIDTH)];
        bytes[..COUNTER_WIDTH].copy_from_slice(&count.to_be_bytes());
        bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn sequences_increase() {
        let generator = SequenceGenerator::new();
        let a = generator.next(8);
        let b = generator.next(8);
        assert_eq!(a, 1u64.to_be_bytes());
        assert!(b > a);
    }

    #[test]
    fn padding_and_minimum_width() {
        let generator = SequenceGenerator::new();
        let value = generator.next(16);
        assert_eq!(value.len(), 16);
        assert!(value[COUNTER_WIDTH..].iter().all(|b| *b == 0));
        assert_eq!(generator.next(2).len(), COUNTER_WIDTH);
    }

    #[test]
    fn concurrent_callers_never_collide() {
        let generator = Arc::new(SequenceGenerator::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let generator = generator.clone();
                std::thread::spawn(move || (0..500).map(|_| generator.next(8)).collect::<Vec<_>>())
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for key in handle.join().unwrap() {
                assert!(seen.insert(key), "duplicate key generated");
            }
        }
        assert_eq!(seen.len(), 4000);
    }
}
