//! Live data acquisition: two independent producers (motion, location) feeding
//! bounded channels, started and stopped as one unit.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use log::{debug, warn};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::interval;

use crate::config::RecorderConfig;
use crate::error::{RecorderError, Result};
use crate::samples::{LocationFix, MotionSample};

/// Orientation-frame acceleration stream. Polled once per sampling period.
pub trait MotionSource: Send + Sync + 'static {
    fn poll_sample(&self) -> Option<MotionSample>;
}

/// Position fix stream. Polled once per location interval; also used for the
/// one-shot seed fix before a session goes live.
pub trait LocationSource: Send + Sync + 'static {
    /// Platform permission request. Must be called before any fix is read.
    fn request_permission(&self) -> bool;
    fn poll_fix(&self) -> Option<LocationFix>;
}

/// Receiving ends of the two producer channels.
pub struct AcquisitionStreams {
    pub motion_rx: Receiver<MotionSample>,
    pub location_rx: Receiver<LocationFix>,
}

/// Handle to the running producer pair.
pub struct AcquisitionChannel {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl AcquisitionChannel {
    /// Request permissions and subscribe both producers.
    ///
    /// On `PermissionDenied` nothing subscribes and no task is spawned.
    pub fn start(
        motion: Arc<dyn MotionSource>,
        location: Arc<dyn LocationSource>,
        config: &RecorderConfig,
    ) -> Result<(Self, AcquisitionStreams)> {
        if !location.request_permission() {
            return Err(RecorderError::PermissionDenied);
        }

        let (motion_tx, motion_rx) = mpsc::channel(config.motion_channel_capacity);
        let (location_tx, location_rx) = mpsc::channel(config.location_channel_capacity);
        let (shutdown, shutdown_rx) = watch::channel(false);

        let handles = vec![
            tokio::spawn(motion_loop(
                motion,
                motion_tx,
                config.motion_period,
                shutdown_rx.clone(),
            )),
            tokio::spawn(location_loop(
                location,
                location_tx,
                config.location_interval,
                shutdown_rx,
            )),
        ];

        Ok((
            AcquisitionChannel { shutdown, handles },
            AcquisitionStreams {
                motion_rx,
                location_rx,
            },
        ))
    }

    /// Unsubscribe both producers. Idempotent; safe when already stopped.
    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Abort producer tasks outright; used on clear so no late tick survives.
    pub fn shutdown_now(&mut self) {
        self.stop();
        for handle in self.handles.drain(..) {
            handle.abort();
        }
    }
}

async fn motion_loop(
    source: Arc<dyn MotionSource>,
    tx: Sender<MotionSample>,
    period: std::time::Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval(period);
    let mut sample_count = 0u64;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => {
                debug!("[motion] stopped after {} samples", sample_count);
                break;
            }
        }
        if *shutdown.borrow() {
            debug!("[motion] stopped after {} samples", sample_count);
            break;
        }

        let Some(sample) = source.poll_sample() else {
            continue;
        };

        match tx.try_send(sample) {
            Ok(_) => {
                sample_count += 1;
                if sample_count % 1000 == 0 {
                    debug!("[motion] {} samples", sample_count);
                }
            }
            Err(TrySendError::Closed(_)) => {
                debug!("[motion] channel closed after {} samples", sample_count);
                break;
            }
            Err(TrySendError::Full(_)) => {
                // Consumer is behind, drop this sample.
            }
        }
    }
}

async fn location_loop(
    source: Arc<dyn LocationSource>,
    tx: Sender<LocationFix>,
    period: std::time::Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval(period);
    let mut fix_count = 0u64;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => {
                debug!("[location] stopped after {} fixes", fix_count);
                break;
            }
        }
        if *shutdown.borrow() {
            debug!("[location] stopped after {} fixes", fix_count);
            break;
        }

        let Some(fix) = source.poll_fix() else {
            // Transient location failure, carry on with the retained fix.
            continue;
        };

        match tx.try_send(fix) {
            Ok(_) => {
                fix_count += 1;
                if fix_count % 100 == 0 {
                    debug!("[location] {} fixes", fix_count);
                }
            }
            Err(TrySendError::Closed(_)) => {
                debug!("[location] channel closed after {} fixes", fix_count);
                break;
            }
            Err(TrySendError::Full(_)) => {
                warn!("[location] channel full, dropping fix");
            }
        }
    }
}

fn epoch_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Simulated accelerometer: gravity on z with a small road-vibration wobble.
pub struct SimulatedMotion {
    counter: AtomicU64,
}

impl SimulatedMotion {
    pub fn new() -> Self {
        SimulatedMotion {
            counter: AtomicU64::new(0),
        }
    }
}

impl Default for SimulatedMotion {
    fn default() -> Self {
        Self::new()
    }
}

impl MotionSource for SimulatedMotion {
    fn poll_sample(&self) -> Option<MotionSample> {
        use std::f64::consts::PI;
        let t = self.counter.fetch_add(1, Ordering::Relaxed) as f64 * 0.01;
        Some(MotionSample {
            x: (t * 2.0 * PI).sin() * 0.5,
            y: 9.81 + (t * 7.0 * PI).sin() * 0.4,
            z: (t * 2.0 * PI).cos() * 0.3,
            timestamp: epoch_millis(),
        })
    }
}

/// Simulated GPS: drives north-east from a fixed origin at a constant speed.
pub struct SimulatedLocation {
    counter: AtomicU64,
    speed_mps: f64,
    permission_granted: AtomicBool,
    deny_permission: bool,
}

impl SimulatedLocation {
    pub fn new(speed_mps: f64) -> Self {
        SimulatedLocation {
            counter: AtomicU64::new(0),
            speed_mps,
            permission_granted: AtomicBool::new(false),
            deny_permission: false,
        }
    }

    /// A source whose permission request always fails.
    pub fn denied() -> Self {
        SimulatedLocation {
            counter: AtomicU64::new(0),
            speed_mps: 0.0,
            permission_granted: AtomicBool::new(false),
            deny_permission: true,
        }
    }
}

impl LocationSource for SimulatedLocation {
    fn request_permission(&self) -> bool {
        if self.deny_permission {
            return false;
        }
        self.permission_granted.store(true, Ordering::Relaxed);
        true
    }

    fn poll_fix(&self) -> Option<LocationFix> {
        if !self.permission_granted.load(Ordering::Relaxed) {
            return None;
        }
        let seq = self.counter.fetch_add(1, Ordering::Relaxed) as f64;
        Some(LocationFix {
            latitude: 3.1390 + seq * 0.00002,
            longitude: 101.6869 + seq * 0.00002,
            timestamp: epoch_millis(),
            speed_mps: Some(self.speed_mps),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_denied_source_blocks_fixes() {
        let source = SimulatedLocation::denied();
        assert!(!source.request_permission());
        assert!(source.poll_fix().is_none());
    }

    #[test]
    fn test_granted_source_yields_fixes() {
        let source = SimulatedLocation::new(10.0);
        assert!(source.request_permission());
        let fix = source.poll_fix().unwrap();
        assert_eq!(fix.speed_mps, Some(10.0));
    }

    #[tokio::test]
    async fn test_permission_denied_spawns_nothing() {
        let motion = Arc::new(SimulatedMotion::new());
        let location = Arc::new(SimulatedLocation::denied());
        let result = AcquisitionChannel::start(motion, location, &RecorderConfig::default());
        assert!(matches!(result, Err(RecorderError::PermissionDenied)));
    }

    #[tokio::test]
    async fn test_start_and_stop_is_idempotent() {
        let motion = Arc::new(SimulatedMotion::new());
        let location = Arc::new(SimulatedLocation::new(10.0));
        let (channel, mut streams) =
            AcquisitionChannel::start(motion, location, &RecorderConfig::default()).unwrap();

        // Producers deliver at least one motion sample.
        let sample = tokio::time::timeout(Duration::from_secs(2), streams.motion_rx.recv())
            .await
            .expect("motion producer timed out");
        assert!(sample.is_some());

        channel.stop();
        channel.stop();
        assert!(channel.is_stopped());
    }
}
