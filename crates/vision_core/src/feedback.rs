use crate::resources::Pooled;
use ndarray::Array4;
use serde::Serialize;
use std::collections::VecDeque;
use tracing::debug;

pub const FEEDBACK_CAPACITY: usize = 100;

/// One labeled frame kept for later training. The tensor stays leased until
/// the sample is evicted or the buffer is cleared.
pub struct FeedbackEntry {
    pub frame_id: u64,
    pub label: String,
    pub confidence: f32,
    pub recorded_at_ms: u64,
    pub tensor: Pooled<Array4<f32>>,
}

/// What callers see of a stored entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedbackSample {
    pub frame_id: u64,
    pub label: String,
    pub confidence: f32,
    pub recorded_at_ms: u64,
}

/// Bounded, oldest-first ring of feedback entries.
pub struct FeedbackBuffer {
    entries: VecDeque<FeedbackEntry>,
    capacity: usize,
}

impl Default for FeedbackBuffer {
    fn default() -> Self {
        Self::with_capacity(FEEDBACK_CAPACITY)
    }
}

impl FeedbackBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    pub fn record(&mut self, entry: FeedbackEntry) {
        while self.entries.len() >= self.capacity {
            // the evicted tensor is released here, before the push
            if let Some(old) = self.entries.pop_front() {
                debug!(frame_id = old.frame_id, label = %old.label, "feedback sample evicted");
            }
        }
        self.entries.push_back(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn samples(&self) -> Vec<FeedbackSample> {
        self.entries
            .iter()
            .map(|e| FeedbackSample {
                frame_id: e.frame_id,
                label: e.label.clone(),
                confidence: e.confidence,
                recorded_at_ms: e.recorded_at_ms,
            })
            .collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::{BufferLedger, ResourcePool};

    fn entry(pool: &ResourcePool, i: u64) -> FeedbackEntry {
        FeedbackEntry {
            frame_id: i,
            label: format!("label-{i}"),
            confidence: 0.5,
            recorded_at_ms: i * 10,
            tensor: pool.zeros4((1, 2, 2, 3)),
        }
    }

    #[test]
    fn keeps_the_newest_hundred() {
        let ledger = BufferLedger::new();
        let pool = ResourcePool::new(&ledger, "feedback");
        let mut buf = FeedbackBuffer::new();
        for i in 0..105 {
            buf.record(entry(&pool, i));
        }
        assert_eq!(buf.len(), FEEDBACK_CAPACITY);
        let samples = buf.samples();
        assert_eq!(samples.first().unwrap().frame_id, 5);
        assert_eq!(samples.last().unwrap().frame_id, 104);
        // evicted tensors went back
        assert_eq!(ledger.live(), FEEDBACK_CAPACITY);
        buf.clear();
        assert_eq!(ledger.live(), 0);
    }

    #[test]
    fn eviction_releases_before_append() {
        let ledger = BufferLedger::new();
        let pool = ResourcePool::new(&ledger, "feedback");
        let mut buf = FeedbackBuffer::with_capacity(1);
        buf.record(entry(&pool, 0));
        buf.record(entry(&pool, 1));
        assert_eq!(ledger.live(), 1);
        assert_eq!(buf.samples()[0].label, "label-1");
    }
}
