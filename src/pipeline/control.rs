//! Periodic vehicle commands, mode changes and the 1 Hz statistics report
//!
//! Nothing in the binary flips `DriveMode` yet; the mode stays as configured
//! at startup unless an embedding caller changes it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::capture::source::{ActorId, DataSource, VehicleControl};
use crate::pipeline::stats::{SharedStats, StatsReport};
use crate::{ControlConfig, StreamError};

/// Driving mode flags other contexts may flip at any time
#[derive(Debug, Clone)]
pub struct DriveMode {
    autopilot: Arc<AtomicBool>,
    reverse: Arc<AtomicBool>,
}

impl DriveMode {
    pub fn new(autopilot: bool) -> Self {
        Self {
            autopilot: Arc::new(AtomicBool::new(autopilot)),
            reverse: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn autopilot(&self) -> bool {
        self.autopilot.load(Ordering::Relaxed)
    }

    pub fn set_autopilot(&self, enabled: bool) {
        self.autopilot.store(enabled, Ordering::Relaxed);
    }

    pub fn reverse(&self) -> bool {
        self.reverse.load(Ordering::Relaxed)
    }

    pub fn set_reverse(&self, reverse: bool) {
        self.reverse.store(reverse, Ordering::Relaxed);
    }
}

pub struct ControlLoop {
    source: Arc<dyn DataSource>,
    vehicle: ActorId,
    mode: DriveMode,
    /// Mode last applied to the vehicle
    applied_autopilot: bool,
    stats: SharedStats,
    report_interval: Duration,
    last_report: Instant,
}

impl ControlLoop {
    /// `mode.autopilot()` is assumed to be already applied to `vehicle`
    pub fn new(
        source: Arc<dyn DataSource>,
        vehicle: ActorId,
        mode: DriveMode,
        stats: SharedStats,
        config: &ControlConfig,
    ) -> Self {
        let now = Instant::now();
        Self {
            applied_autopilot: mode.autopilot(),
            source,
            vehicle,
            mode,
            stats,
            report_interval: Duration::from_millis(config.report_interval_ms),
            last_report: now,
        }
    }

    /// One iteration. Returns a report when one was due.
    pub fn tick(&mut self, now: Instant) -> Result<Option<StatsReport>, StreamError> {
        let autopilot = self.mode.autopilot();
        if autopilot != self.applied_autopilot {
            info!(autopilot, "Switching drive mode");
            self.source.set_autopilot(self.vehicle, autopilot)?;
            self.applied_autopilot = autopilot;
        }

        if !autopilot {
            let control = VehicleControl {
                reverse: self.mode.reverse(),
                ..VehicleControl::default()
            };
            self.source.apply_control(self.vehicle, &control)?;
        }

        if now.saturating_duration_since(self.last_report) < self.report_interval {
            return Ok(None);
        }
        self.last_report = now;
        self.report().map(Some)
    }

    /// Current rates plus a timed ping
    pub fn report(&self) -> Result<StatsReport, StreamError> {
        let stats = self.stats.load();

        let sent = Instant::now();
        self.source.ping()?;
        let round_trip = sent.elapsed();

        let report = StatsReport {
            observed_fps: stats.observed_fps,
            source_fps: stats.source_fps,
            round_trip,
            warmup: stats.warmup,
        };

        metrics::gauge!("simstream_observed_fps").set(report.observed_fps);
        metrics::gauge!("simstream_source_fps").set(report.source_fps);
        metrics::histogram!("simstream_round_trip_seconds").record(round_trip.as_secs_f64());

        if report.warmup {
            debug!(
                observed_fps = report.observed_fps,
                source_fps = report.source_fps,
                round_trip = ?report.round_trip,
                "Stream warming up"
            );
        } else {
            info!(
                "FPS: {:.2}  Server FPS: {:.2}  Round trip time: {:?}",
                report.observed_fps, report.source_fps, report.round_trip
            );
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::source::Blueprint;
    use crate::capture::synthetic::{SyntheticOptions, SyntheticSource};
    use crate::capture::Transform;
    use crate::pipeline::stats::RateStats;

    fn setup(autopilot: bool) -> (Arc<SyntheticSource>, ActorId, DriveMode, ControlLoop) {
        let source = Arc::new(SyntheticSource::new(SyntheticOptions {
            ping_latency: Duration::from_millis(5),
            ..Default::default()
        }));
        let vehicle = source
            .spawn_actor(&Blueprint::new("vehicle.audi.tt"), Transform::default(), None)
            .unwrap();
        source.set_autopilot(vehicle, autopilot).unwrap();

        let mode = DriveMode::new(autopilot);
        let config = ControlConfig {
            autopilot,
            tick_ms: 10,
            report_interval_ms: 1_000,
        };
        let control = ControlLoop::new(
            source.clone(),
            vehicle,
            mode.clone(),
            SharedStats::new(),
            &config,
        );
        (source, vehicle, mode, control)
    }

    #[test]
    fn manual_mode_applies_control_each_tick() {
        let (source, _, mode, mut control) = setup(false);
        mode.set_reverse(true);

        let now = Instant::now();
        assert!(control.tick(now).unwrap().is_none());
        assert!(control.tick(now).unwrap().is_none());

        assert_eq!(source.controls_applied(), 2);
        assert!(source.last_control().unwrap().reverse);
    }

    #[test]
    fn mode_change_is_applied_once() {
        let (source, vehicle, mode, mut control) = setup(false);
        mode.set_autopilot(true);

        let now = Instant::now();
        control.tick(now).unwrap();
        control.tick(now).unwrap();

        assert_eq!(source.autopilot(vehicle), Some(true));
        assert_eq!(source.controls_applied(), 0);
    }

    #[test]
    fn report_is_due_once_per_interval() {
        let (source, _, _, mut control) = setup(true);
        let start = Instant::now();

        assert!(control.tick(start).unwrap().is_none());
        let report = control
            .tick(start + Duration::from_millis(1_100))
            .unwrap()
            .expect("report due");
        assert!(report.round_trip >= Duration::from_millis(5));
        assert!(control
            .tick(start + Duration::from_millis(1_500))
            .unwrap()
            .is_none());
        assert_eq!(source.pings(), 1);
    }

    #[test]
    fn report_reads_latest_rates() {
        let (_, _, _, control) = setup(true);
        control.stats.store(RateStats {
            observed_fps: 50.0,
            source_fps: 75.0,
            last_sequence: 8,
            frames: 5,
            warmup: false,
        });

        let report = control.report().unwrap();
        assert_eq!(report.observed_fps, 50.0);
        assert_eq!(report.source_fps, 75.0);
        assert!(!report.warmup);
    }
}
