//! Bounded, chunked float32 sample ring (spec §4.1).
//!
//! A deque of chunks rather than one contiguous buffer: appends are O(1)
//! amortized and cheap to perform under the shared-state lock, and eviction
//! drops whole oldest chunks instead of shifting a giant array.

use std::collections::VecDeque;

/// Per-channel bounded sample buffer.
#[derive(Debug, Clone)]
pub struct SampleRing {
    max_samples: usize,
    parts: VecDeque<Vec<f32>>,
    total_samples: usize,
}

impl SampleRing {
    /// Creates an empty ring with the given capacity.
    pub fn new(max_samples: usize) -> Self {
        Self {
            max_samples,
            parts: VecDeque::new(),
            total_samples: 0,
        }
    }

    /// Appends a block of samples, evicting whole oldest chunks until the
    /// total fits within capacity. A block larger than capacity is
    /// truncated to its tail before being stored. Appending an empty block
    /// is a no-op.
    pub fn append(&mut self, samples: &[f32]) {
        if samples.is_empty() {
            return;
        }

        let chunk: Vec<f32> = if samples.len() > self.max_samples {
            samples[samples.len() - self.max_samples..].to_vec()
        } else {
            samples.to_vec()
        };

        self.total_samples += chunk.len();
        self.parts.push_back(chunk);

        while self.total_samples > self.max_samples {
            if let Some(front) = self.parts.pop_front() {
                self.total_samples -= front.len();
            } else {
                break;
            }
        }
    }

    /// Returns a contiguous snapshot (copy) of the ring's current contents,
    /// oldest sample first. Empty ring yields a zero-length vector.
    pub fn get(&self) -> Vec<f32> {
        let mut out = Vec::with_capacity(self.total_samples);
        for part in &self.parts {
            out.extend_from_slice(part);
        }
        out
    }

    /// Current sample count.
    pub fn len(&self) -> usize {
        self.total_samples
    }

    /// Whether the ring holds no samples.
    pub fn is_empty(&self) -> bool {
        self.total_samples == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_then_get_is_a_suffix_within_capacity() {
        let mut ring = SampleRing::new(5);
        ring.append(&[1.0, 2.0, 3.0]);
        ring.append(&[4.0, 5.0, 6.0, 7.0]);
        let snapshot = ring.get();
        assert!(snapshot.len() <= 5);
        assert_eq!(snapshot, vec![3.0, 4.0, 5.0, 6.0, 7.0]);
    }

    #[test]
    fn total_never_exceeds_capacity() {
        let mut ring = SampleRing::new(10);
        for _ in 0..20 {
            ring.append(&[0.0; 3]);
            assert!(ring.len() <= 10);
        }
    }

    #[test]
    fn appending_empty_block_is_a_noop() {
        let mut ring = SampleRing::new(10);
        ring.append(&[1.0, 2.0]);
        let before = ring.get();
        ring.append(&[]);
        assert_eq!(ring.get(), before);
    }

    #[test]
    fn oversized_block_keeps_only_its_tail() {
        let mut ring = SampleRing::new(3);
        ring.append(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(ring.get(), vec![3.0, 4.0, 5.0]);
    }

    #[test]
    fn empty_ring_yields_zero_length_snapshot() {
        let ring = SampleRing::new(8);
        assert!(ring.get().is_empty());
        assert!(ring.is_empty());
    }
}
