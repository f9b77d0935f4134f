//! Latency sampling types.
//!
//! A sample carries the client's home and world round-trip times; the single
//! scalar driving control decisions is the larger of the two. A short window
//! of recent samples backs the average figure in the status output.

use std::collections::VecDeque;

/// Hard ceiling the client enforces on the tuning setting, in milliseconds.
pub const SETTING_MAX_MS: u32 = 400;

/// Window capacity (40 samples ≈ 10 minutes at the steady cadence).
pub const LATENCY_WINDOW_CAPACITY: usize = 40;

/// One latency reading from the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatencySample {
    /// Round-trip time to the home server in milliseconds.
    pub home_ms: u32,
    /// Round-trip time to the world server in milliseconds.
    pub world_ms: u32,
}

impl LatencySample {
    pub fn new(home_ms: u32, world_ms: u32) -> Self {
        Self { home_ms, world_ms }
    }

    /// The effective latency: max of home and world, bounded by the setting
    /// domain.
    pub fn effective_ms(&self) -> u32 {
        self.home_ms.max(self.world_ms).min(SETTING_MAX_MS)
    }
}

/// Compute the value the reconciler would write for an effective latency,
/// honoring the policy cap and the client's hard ceiling.
pub fn candidate_ms(effective_ms: u32, cap_ms: u32) -> u32 {
    effective_ms.min(cap_ms).min(SETTING_MAX_MS)
}

/// Fixed-capacity window of recent effective-latency values.
#[derive(Debug)]
pub struct LatencyWindow {
    samples: VecDeque<u32>,
    capacity: usize,
}

impl LatencyWindow {
    pub fn new() -> Self {
        Self::with_capacity(LATENCY_WINDOW_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Push a value, evicting the oldest when at capacity.
    pub fn push(&mut self, effective_ms: u32) {
        if self.samples.len() >= self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(effective_ms);
    }

    /// Average of the window, 0.0 when empty.
    pub fn average(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let sum: u64 = self.samples.iter().map(|&v| u64::from(v)).sum();
        sum as f64 / self.samples.len() as f64
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

impl Default for LatencyWindow {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn effective_is_max_of_home_and_world() {
        assert_eq!(LatencySample::new(40, 60).effective_ms(), 60);
        assert_eq!(LatencySample::new(80, 25).effective_ms(), 80);
        assert_eq!(LatencySample::new(0, 0).effective_ms(), 0);
    }

    #[test]
    fn effective_is_bounded_by_setting_domain() {
        assert_eq!(LatencySample::new(500, 120).effective_ms(), SETTING_MAX_MS);
        assert_eq!(LatencySample::new(120, 9999).effective_ms(), SETTING_MAX_MS);
    }

    #[test]
    fn candidate_honors_cap_then_ceiling() {
        assert_eq!(candidate_ms(60, 300), 60);
        assert_eq!(candidate_ms(350, 300), 300);
        assert_eq!(candidate_ms(400, 400), 400);
    }

    proptest! {
        #[test]
        fn prop_candidate_within_domain_and_cap(
            effective in 0u32..2000,
            cap in 100u32..=400,
        ) {
            let candidate = candidate_ms(effective, cap);
            prop_assert!(candidate <= SETTING_MAX_MS);
            prop_assert!(candidate <= cap);
            prop_assert!(candidate <= effective);
        }

        #[test]
        fn prop_window_never_exceeds_capacity(
            values in prop::collection::vec(0u32..400, 0..120)
        ) {
            let mut window = LatencyWindow::new();
            for v in &values {
                window.push(*v);
                prop_assert!(window.len() <= LATENCY_WINDOW_CAPACITY);
            }
            if values.len() >= LATENCY_WINDOW_CAPACITY {
                prop_assert_eq!(window.len(), LATENCY_WINDOW_CAPACITY);
            } else {
                prop_assert_eq!(window.len(), values.len());
            }
        }
    }

    #[test]
    fn window_average() {
        let mut window = LatencyWindow::new();
        assert_eq!(window.average(), 0.0);

        window.push(30);
        window.push(60);
        window.push(90);
        assert_eq!(window.average(), 60.0);
    }

    #[test]
    fn window_evicts_oldest() {
        let mut window = LatencyWindow::with_capacity(3);
        for v in [10, 20, 30, 40] {
            window.push(v);
        }
        assert_eq!(window.len(), 3);
        assert_eq!(window.average(), 30.0);
    }
}
