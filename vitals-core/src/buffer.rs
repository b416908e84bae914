//! Time-ordered storage of accepted channel samples for one session.

use std::collections::VecDeque;
use std::time::Duration;

use crate::channel::{Channel, ChannelSample};

/// Bounded FIFO of samples. The oldest entries are evicted first, both when
/// the hard capacity is exceeded and when an estimator trims the window.
#[derive(Debug, Clone)]
pub struct SampleBuffer {
    samples: VecDeque<ChannelSample>,
    capacity: usize,
}

impl SampleBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    pub fn push(&mut self, sample: ChannelSample) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    /// Keeps only the `n` most recent samples.
    pub fn trim_to_newest(&mut self, n: usize) {
        let excess = self.samples.len().saturating_sub(n);
        self.samples.drain(..excess);
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChannelSample> {
        self.samples.iter()
    }

    pub fn latest(&self) -> Option<&ChannelSample> {
        self.samples.back()
    }

    /// Time spanned by the buffered samples.
    pub fn span(&self) -> Duration {
        match (self.samples.front(), self.samples.back()) {
            (Some(first), Some(last)) => last.timestamp.saturating_sub(first.timestamp),
            _ => Duration::ZERO,
        }
    }

    /// Copies one channel out as a plain array, oldest first.
    pub fn channel_values(&self, channel: Channel) -> Vec<f64> {
        self.samples.iter().map(|s| s.get(channel)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample(i: u64) -> ChannelSample {
        ChannelSample {
            timestamp: Duration::from_millis(i * 33),
            red: i as f64,
            green: i as f64 * 2.0,
            blue: 1.0,
        }
    }

    #[test]
    fn trim_keeps_newest() {
        let mut buf = SampleBuffer::new(100);
        (0..10).for_each(|i| buf.push(sample(i)));
        buf.trim_to_newest(4);
        assert_eq!(buf.channel_values(Channel::Red), vec![6.0, 7.0, 8.0, 9.0]);
        assert_eq!(buf.channel_values(Channel::Green), vec![12.0, 14.0, 16.0, 18.0]);
        assert_eq!(buf.span(), Duration::from_millis(99));

        buf.trim_to_newest(10);
        assert_eq!(buf.len(), 4);
    }

    #[test]
    fn capacity_evicts_oldest() {
        let mut buf = SampleBuffer::new(3);
        (0..5).for_each(|i| buf.push(sample(i)));
        assert_eq!(buf.channel_values(Channel::Red), vec![2.0, 3.0, 4.0]);
        assert_eq!(buf.latest().map(|s| s.red), Some(4.0));
    }

    proptest! {
        #[test]
        fn stays_bounded_and_ordered(
            capacity in 1usize..64,
            ops in proptest::collection::vec((any::<bool>(), 0usize..80), 0..200),
        ) {
            let mut buf = SampleBuffer::new(capacity);
            let mut next = 0u64;
            for (is_push, n) in ops {
                if is_push {
                    buf.push(sample(next));
                    next += 1;
                } else {
                    buf.trim_to_newest(n);
                    prop_assert!(buf.len() <= n);
                }
                prop_assert!(buf.len() <= capacity);
            }
            let stamps: Vec<_> = buf.iter().map(|s| s.timestamp).collect();
            prop_assert!(stamps.windows(2).all(|w| w[0] < w[1]));
            if let Some(last) = buf.latest() {
                prop_assert_eq!(last.red, (next - 1) as f64);
            }
        }
    }
}
