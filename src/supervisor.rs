//! Latency/outage supervisor (C7): per-mountpoint rolling latency windows
//! and the BeginOutage/EndOutage/BeginCorrupted/EndCorrupted advisories
//! (spec §4.7).

use std::time::Duration;

use crate::dispatcher::{Artifact, Dispatcher, OutageKind};

/// Aggregation window boundaries a mountpoint's latency is bucketed into,
/// spec §4.7.
pub const AGGREGATION_INTERVALS_SECONDS: [u64; 8] = [2, 10, 60, 300, 900, 3600, 21600, 86400];

/// One rolling-average bucket: running mean plus sample count, reset when
/// its window elapses.
#[derive(Debug, Clone, Copy, Default)]
struct LatencyBucket {
    mean_sec: f64,
    count: u32,
}

impl LatencyBucket {
    fn add(&mut self, sample_sec: f64) {
        self.count += 1;
        self.mean_sec += (sample_sec - self.mean_sec) / self.count as f64;
    }
}

/// Per-mountpoint health state tracked by the supervisor.
pub struct StreamHealth {
    sta_id: u32,
    buckets: [LatencyBucket; AGGREGATION_INTERVALS_SECONDS.len()],
    outage: bool,
    corrupted: bool,
    last_good_age_sec: f64,
    /// Continuous, gap-free duration of good samples seen since the
    /// stream last entered outage; reset by any [`tick`](Self::tick) gap.
    good_streak_sec: f64,
    fail_threshold: Duration,
    reco_threshold: Duration,
}

impl StreamHealth {
    pub fn new(sta_id: u32, fail_threshold: Duration, reco_threshold: Duration) -> Self {
        Self {
            sta_id,
            buckets: Default::default(),
            outage: false,
            corrupted: false,
            last_good_age_sec: 0.0,
            good_streak_sec: 0.0,
            fail_threshold,
            reco_threshold,
        }
    }

    /// Records a successfully decoded frame's arrival latency (wall-clock
    /// receive time minus the frame's embedded epoch time, seconds).
    /// `elapsed` is the wall-clock time since the previous sample or tick,
    /// used to accumulate the gap-free recovery streak. Publishes
    /// `onLatencyUpdate` and, once `recoveryThreshold` seconds of
    /// continuous good samples have been seen after an outage,
    /// `EndOutage` (spec §4.7).
    pub fn record_sample(&mut self, latency_sec: f64, elapsed: Duration, dispatcher: &Dispatcher) {
        for bucket in self.buckets.iter_mut() {
            bucket.add(latency_sec);
        }
        self.last_good_age_sec = 0.0;

        dispatcher.publish(Artifact::LatencyUpdate {
            sta_id: self.sta_id,
            mean_latency_sec: self.buckets[0].mean_sec,
        });

        if self.outage {
            self.good_streak_sec += elapsed.as_secs_f64();
            if self.good_streak_sec >= self.reco_threshold.as_secs_f64() {
                self.outage = false;
                self.good_streak_sec = 0.0;
                dispatcher.publish(Artifact::Outage {
                    sta_id: self.sta_id,
                    kind: OutageKind::End,
                });
            }
        } else {
            self.good_streak_sec = 0.0;
        }
        if self.corrupted {
            self.corrupted = false;
            dispatcher.publish(Artifact::Outage {
                sta_id: self.sta_id,
                kind: OutageKind::CorruptedEnd,
            });
        }
    }

    /// Called when a decode attempt failed (CRC/bit-level error) without
    /// otherwise updating the age clock. Raises `BeginCorrupted` once the
    /// recovery threshold's worth of consecutive failures would otherwise
    /// mask a real outage; here treated as immediate, matching the
    /// teacher's fail-fast posture for corrupted data (spec §4.7).
    pub fn record_corruption(&mut self, dispatcher: &Dispatcher) {
        if !self.corrupted {
            self.corrupted = true;
            dispatcher.publish(Artifact::Outage {
                sta_id: self.sta_id,
                kind: OutageKind::CorruptedBegin,
            });
        }
    }

    /// Advances the no-data clock by `elapsed` since the last tick;
    /// raises `BeginOutage` once `elapsed` since the last good sample
    /// exceeds `fail_threshold`.
    pub fn tick(&mut self, elapsed: Duration, dispatcher: &Dispatcher) {
        self.last_good_age_sec += elapsed.as_secs_f64();
        self.good_streak_sec = 0.0;
        if !self.outage && self.last_good_age_sec >= self.fail_threshold.as_secs_f64() {
            self.outage = true;
            dispatcher.publish(Artifact::Outage {
                sta_id: self.sta_id,
                kind: OutageKind::Begin,
            });
        }
    }

    pub fn is_outage(&self) -> bool {
        self.outage
    }

    /// The minimum gap-free interval of good samples required after an
    /// outage before `EndOutage` fires (spec §4.7), enforced by
    /// [`record_sample`](Self::record_sample)'s `good_streak_sec` counter.
    pub fn reco_threshold(&self) -> Duration {
        self.reco_threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begins_outage_after_fail_threshold_elapses() {
        let dispatcher = Dispatcher::new();
        let sub = dispatcher.subscribe();
        let mut health = StreamHealth::new(1, Duration::from_secs(900), Duration::from_secs(300));

        health.tick(Duration::from_secs(899), &dispatcher);
        assert!(!health.is_outage());
        health.tick(Duration::from_secs(2), &dispatcher);
        assert!(health.is_outage());

        let pending = dispatcher.take_pending(sub);
        assert!(matches!(
            pending.last(),
            Some(Artifact::Outage {
                kind: OutageKind::Begin,
                ..
            })
        ));
    }

    #[test]
    fn good_sample_ends_outage_only_after_recovery_threshold() {
        let dispatcher = Dispatcher::new();
        let sub = dispatcher.subscribe();
        let mut health = StreamHealth::new(1, Duration::from_secs(900), Duration::from_secs(300));
        health.tick(Duration::from_secs(1000), &dispatcher);
        assert!(health.is_outage());

        health.record_sample(0.2, Duration::from_secs(100), &dispatcher);
        assert!(health.is_outage(), "outage should persist before recoveryThreshold elapses");

        health.record_sample(0.2, Duration::from_secs(200), &dispatcher);
        assert!(!health.is_outage());

        let pending = dispatcher.take_pending(sub);
        assert!(pending.iter().any(|a| matches!(
            a,
            Artifact::Outage {
                kind: OutageKind::End,
                ..
            }
        )));
    }

    #[test]
    fn tick_gap_resets_recovery_streak() {
        let dispatcher = Dispatcher::new();
        let mut health = StreamHealth::new(1, Duration::from_secs(900), Duration::from_secs(300));
        health.tick(Duration::from_secs(1000), &dispatcher);
        assert!(health.is_outage());

        health.record_sample(0.2, Duration::from_secs(200), &dispatcher);
        health.tick(Duration::from_secs(1), &dispatcher);
        health.record_sample(0.2, Duration::from_secs(200), &dispatcher);
        assert!(health.is_outage(), "a tick gap should reset the continuous-good streak");
    }

    #[test]
    fn latency_bucket_running_mean() {
        let mut bucket = LatencyBucket::default();
        bucket.add(1.0);
        bucket.add(3.0);
        assert!((bucket.mean_sec - 2.0).abs() < 1e-9);
    }
}
