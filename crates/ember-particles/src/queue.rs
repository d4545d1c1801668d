//! Priority queue of pending effect requests with expiry and batching
//!
//! Entries are kept sorted by descending priority; equal priorities stay in
//! arrival order. Each frame `dequeue` hands back at most
//! `max_effects_per_frame` requests grouped by batch key.

use crate::config::EffectOverrides;
use ember_core::Vec3;
use serde::Serialize;
use std::collections::BTreeMap;

/// Queue sizing and batching limits
#[derive(Debug, Clone, PartialEq)]
pub struct QueueSettings {
    pub max_queue_size: usize,
    pub max_effects_per_frame: usize,
    pub batch_size: usize,
    pub default_max_age_ms: f64,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            max_queue_size: 256,
            max_effects_per_frame: 16,
            batch_size: 10,
            default_max_age_ms: 1000.0,
        }
    }
}

/// Optional per-request queueing parameters
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueueOptions {
    /// Higher runs first
    pub priority: i32,
    /// Falls back to the queue's default when `None`
    pub max_age_ms: Option<f64>,
    /// Falls back to effect name plus rounded position when `None`
    pub batch_key: Option<String>,
}

impl QueueOptions {
    pub fn with_priority(priority: i32) -> Self {
        Self {
            priority,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueuedEffect {
    pub name: String,
    pub position: Vec3,
    pub overrides: Option<EffectOverrides>,
    pub priority: i32,
    pub enqueued_ms: f64,
    pub max_age_ms: f64,
    pub batch_key: String,
}

impl QueuedEffect {
    pub fn is_expired(&self, now_ms: f64) -> bool {
        now_ms - self.enqueued_ms >= self.max_age_ms
    }
}

/// Requests sharing a batch key, emitted together
#[derive(Debug, Clone, PartialEq)]
pub struct EffectBatch {
    pub key: String,
    pub effects: Vec<QueuedEffect>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub total: usize,
    pub by_priority: BTreeMap<i32, usize>,
    pub by_effect: BTreeMap<String, usize>,
    /// Requests refused because the queue was full after pruning
    pub rejected: u64,
    /// Requests dropped for exceeding their max age
    pub expired: u64,
}

/// Name plus position rounded to the nearest world unit
pub fn default_batch_key(name: &str, position: Vec3) -> String {
    format!(
        "{name}_{}_{}_{}",
        position.x.round() as i64,
        position.y.round() as i64,
        position.z.round() as i64
    )
}

pub struct EffectQueue {
    settings: QueueSettings,
    entries: Vec<QueuedEffect>,
    rejected: u64,
    expired: u64,
}

impl EffectQueue {
    pub fn new(settings: QueueSettings) -> Self {
        Self {
            entries: Vec::with_capacity(settings.max_queue_size),
            settings,
            rejected: 0,
            expired: 0,
        }
    }

    pub fn settings(&self) -> &QueueSettings {
        &self.settings
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Queued requests in the order they will be considered
    pub fn entries(&self) -> &[QueuedEffect] {
        &self.entries
    }

    /// Queue a request. Returns false if the queue is still full after
    /// pruning; the request is dropped.
    pub fn enqueue(
        &mut self,
        name: impl Into<String>,
        position: Vec3,
        overrides: Option<EffectOverrides>,
        options: QueueOptions,
        now_ms: f64,
    ) -> bool {
        let name = name.into();
        if self.entries.len() >= self.settings.max_queue_size {
            self.prune(now_ms);
        }
        if self.entries.len() >= self.settings.max_queue_size {
            self.rejected += 1;
            tracing::debug!(effect = %name, queued = self.entries.len(), "effect queue full, request dropped");
            return false;
        }

        let batch_key = options
            .batch_key
            .unwrap_or_else(|| default_batch_key(&name, position));
        let entry = QueuedEffect {
            name,
            position,
            overrides,
            priority: options.priority,
            enqueued_ms: now_ms,
            max_age_ms: options.max_age_ms.unwrap_or(self.settings.default_max_age_ms),
            batch_key,
        };
        let at = self
            .entries
            .partition_point(|queued| queued.priority >= entry.priority);
        self.entries.insert(at, entry);
        true
    }

    /// Drop expired entries, then cut to 80% of capacity if still full.
    /// Truncation removes from the tail: lowest priority, newest first.
    fn prune(&mut self, now_ms: f64) {
        let before = self.entries.len();
        self.entries.retain(|queued| !queued.is_expired(now_ms));
        self.expired += (before - self.entries.len()) as u64;

        if self.entries.len() >= self.settings.max_queue_size {
            let keep = self.settings.max_queue_size * 4 / 5;
            tracing::debug!(
                dropped = self.entries.len() - keep,
                "effect queue truncated"
            );
            self.entries.truncate(keep);
        }
    }

    /// Take this frame's requests, grouped into batches.
    ///
    /// Expired entries met along the way are discarded. Once the emitted plus
    /// still-grouping entries reach the per-frame cap the walk stops taking
    /// new work; those entries stay queued in order for a later frame.
    pub fn dequeue(&mut self, now_ms: f64) -> Vec<EffectBatch> {
        let cap = self.settings.max_effects_per_frame;
        let batch_size = self.settings.batch_size.max(1);

        let mut slots: Vec<Option<QueuedEffect>> =
            std::mem::take(&mut self.entries).into_iter().map(Some).collect();
        // Open groups in first-seen order: (key, indices into `slots`)
        let mut open: Vec<(String, Vec<usize>)> = Vec::new();
        let mut ready: Vec<(String, Vec<usize>)> = Vec::new();
        let mut claimed = 0usize;

        for index in 0..slots.len() {
            let Some(entry) = &slots[index] else { continue };
            if entry.is_expired(now_ms) {
                tracing::trace!(effect = %entry.name, "queued effect expired");
                slots[index] = None;
                self.expired += 1;
                continue;
            }
            if claimed >= cap {
                continue;
            }
            claimed += 1;

            let group = match open.iter().position(|(key, _)| *key == entry.batch_key) {
                Some(group) => group,
                None => {
                    open.push((entry.batch_key.clone(), Vec::new()));
                    open.len() - 1
                }
            };
            open[group].1.push(index);
            if open[group].1.len() >= batch_size {
                ready.push(open.remove(group));
            }
        }
        // Claimed entries never exceed the cap, so every open group fits
        ready.append(&mut open);

        let batches = ready
            .into_iter()
            .map(|(key, indices)| EffectBatch {
                key,
                effects: indices
                    .into_iter()
                    .filter_map(|index| slots[index].take())
                    .collect(),
            })
            .collect();
        self.entries = slots.into_iter().flatten().collect();
        batches
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn stats(&self) -> QueueStats {
        let mut stats = QueueStats {
            total: self.entries.len(),
            rejected: self.rejected,
            expired: self.expired,
            ..Default::default()
        };
        for entry in &self.entries {
            *stats.by_priority.entry(entry.priority).or_default() += 1;
            *stats.by_effect.entry(entry.name.clone()).or_default() += 1;
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn queue(max_queue_size: usize, max_effects_per_frame: usize, batch_size: usize) -> EffectQueue {
        EffectQueue::new(QueueSettings {
            max_queue_size,
            max_effects_per_frame,
            batch_size,
            default_max_age_ms: 1000.0,
        })
    }

    fn total(batches: &[EffectBatch]) -> usize {
        batches.iter().map(|b| b.effects.len()).sum()
    }

    #[test]
    fn same_spot_requests_collapse_into_one_batch() {
        let mut q = queue(256, 16, 10);
        let at = Vec3::new(10.2, 0.4, -3.1);
        for _ in 0..3 {
            assert!(q.enqueue("explosion", at, None, QueueOptions::default(), 0.0));
        }
        let batches = q.dequeue(1.0);
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].effects.len(), 3);
        assert_eq!(batches[0].key, "explosion_10_0_-3");
        assert!(q.is_empty());
    }

    #[test]
    fn nearby_positions_share_default_key() {
        assert_eq!(
            default_batch_key("spark", Vec3::new(1.4, 2.0, -0.4)),
            default_batch_key("spark", Vec3::new(0.6, 1.7, 0.3))
        );
        assert_ne!(
            default_batch_key("spark", Vec3::ZERO),
            default_batch_key("smoke", Vec3::ZERO)
        );
    }

    #[test]
    fn expired_request_is_never_dequeued() {
        let mut q = queue(256, 16, 10);
        let options = QueueOptions {
            max_age_ms: Some(500.0),
            ..Default::default()
        };
        q.enqueue("spark", Vec3::ZERO, None, options, 1000.0);
        assert!(q.dequeue(1500.0).is_empty());
        assert!(q.is_empty());
        assert_eq!(q.stats().expired, 1);
    }

    #[test]
    fn fresh_request_survives_until_dequeued() {
        let mut q = queue(256, 16, 10);
        let options = QueueOptions {
            max_age_ms: Some(500.0),
            ..Default::default()
        };
        q.enqueue("spark", Vec3::ZERO, None, options, 1000.0);
        assert_eq!(total(&q.dequeue(1499.0)), 1);
    }

    #[test]
    fn higher_priority_first_and_ties_fifo() {
        let mut q = queue(256, 16, 1);
        q.enqueue("low", Vec3::ZERO, None, QueueOptions::with_priority(0), 0.0);
        q.enqueue("high_a", Vec3::ZERO, None, QueueOptions::with_priority(5), 0.0);
        q.enqueue("mid", Vec3::ZERO, None, QueueOptions::with_priority(2), 0.0);
        q.enqueue("high_b", Vec3::ZERO, None, QueueOptions::with_priority(5), 0.0);

        let names: Vec<_> = q.entries().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["high_a", "high_b", "mid", "low"]);

        let order: Vec<_> = q
            .dequeue(1.0)
            .into_iter()
            .map(|b| b.effects[0].name.clone())
            .collect();
        assert_eq!(order, ["high_a", "high_b", "mid", "low"]);
    }

    #[test]
    fn per_frame_cap_leaves_rest_queued_in_order() {
        let mut q = queue(256, 4, 10);
        for i in 0..10 {
            let options = QueueOptions {
                batch_key: Some(format!("k{i}")),
                ..Default::default()
            };
            q.enqueue("spark", Vec3::ZERO, None, options, 0.0);
        }
        let first = q.dequeue(1.0);
        assert_eq!(total(&first), 4);
        assert_eq!(q.len(), 6);
        assert_eq!(q.entries()[0].batch_key, "k4");

        assert_eq!(total(&q.dequeue(2.0)), 4);
        assert_eq!(total(&q.dequeue(3.0)), 2);
        assert!(q.is_empty());
    }

    #[test]
    fn full_batches_are_emitted_as_they_fill() {
        let mut q = queue(256, 16, 2);
        for _ in 0..5 {
            q.enqueue("spark", Vec3::ZERO, None, QueueOptions::default(), 0.0);
        }
        let sizes: Vec<_> = q.dequeue(1.0).iter().map(|b| b.effects.len()).collect();
        assert_eq!(sizes, [2, 2, 1]);
    }

    #[test]
    fn full_queue_prunes_expired_before_truncating() {
        let mut q = queue(5, 16, 10);
        let short = QueueOptions {
            max_age_ms: Some(10.0),
            ..Default::default()
        };
        for _ in 0..5 {
            q.enqueue("old", Vec3::ZERO, None, short.clone(), 0.0);
        }
        assert!(q.enqueue("new", Vec3::ZERO, None, QueueOptions::default(), 100.0));
        assert_eq!(q.len(), 1);
        assert_eq!(q.entries()[0].name, "new");
    }

    #[test]
    fn truncation_keeps_highest_priority_and_oldest() {
        let mut q = queue(10, 16, 10);
        for i in 0..10 {
            let priority = if i < 3 { 9 } else { 0 };
            q.enqueue(format!("e{i}"), Vec3::ZERO, None, QueueOptions::with_priority(priority), 0.0);
        }
        assert!(q.enqueue("late", Vec3::ZERO, None, QueueOptions::with_priority(1), 1.0));
        assert_eq!(q.len(), 9);

        let names: Vec<_> = q.entries().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["e0", "e1", "e2", "late", "e3", "e4", "e5", "e6", "e7"]);
    }

    #[test]
    fn zero_capacity_rejects() {
        let mut q = queue(0, 16, 10);
        assert!(!q.enqueue("spark", Vec3::ZERO, None, QueueOptions::default(), 0.0));
        assert_eq!(q.stats().rejected, 1);
    }

    #[test]
    fn stats_group_by_priority_and_effect() {
        let mut q = queue(256, 16, 10);
        q.enqueue("spark", Vec3::ZERO, None, QueueOptions::with_priority(1), 0.0);
        q.enqueue("spark", Vec3::UP, None, QueueOptions::with_priority(2), 0.0);
        q.enqueue("smoke", Vec3::ZERO, None, QueueOptions::with_priority(1), 0.0);

        let stats = q.stats();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.by_priority[&1], 2);
        assert_eq!(stats.by_priority[&2], 1);
        assert_eq!(stats.by_effect["spark"], 2);
        assert_eq!(stats.by_effect["smoke"], 1);

        q.clear();
        assert_eq!(q.stats().total, 0);
    }

    proptest! {
        #[test]
        fn queue_length_stays_bounded(
            max in 1usize..40,
            requests in proptest::collection::vec((0i32..4, 0u32..50), 1..200),
        ) {
            let mut q = queue(max, 16, 10);
            for (step, (priority, age)) in requests.into_iter().enumerate() {
                let options = QueueOptions {
                    priority,
                    max_age_ms: Some(age as f64),
                    batch_key: None,
                };
                q.enqueue("spark", Vec3::ZERO, None, options, step as f64);
                prop_assert!(q.len() <= max);
            }
        }

        #[test]
        fn dequeue_never_exceeds_frame_cap(
            cap in 0usize..20,
            batch_size in 1usize..8,
            keys in proptest::collection::vec(0u8..5, 0..100),
        ) {
            let mut q = queue(512, cap, batch_size);
            for key in &keys {
                let options = QueueOptions {
                    batch_key: Some(format!("k{key}")),
                    ..Default::default()
                };
                q.enqueue("spark", Vec3::ZERO, None, options, 0.0);
            }
            let mut remaining = keys.len();
            for frame in 0..4 {
                let batches = q.dequeue(frame as f64);
                let taken = total(&batches);
                prop_assert!(taken <= cap);
                prop_assert!(batches.iter().all(|b| b.effects.len() <= batch_size));
                remaining -= taken;
                prop_assert_eq!(q.len(), remaining);
            }
        }
    }
}
