//! Session lifecycle and the runtime that owns all mutable recording state.
//!
//! All mutation of the shared state (log, buffer, retained fix, smoothed
//! speed) goes through one mutex; producers feed a single pump task, so the
//! buffer drain and the appends it races with are serialized.

use std::sync::{Arc, Mutex};

use chrono::{Local, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::acquisition::{
    AcquisitionChannel, AcquisitionStreams, LocationSource, MotionSource,
};
use crate::buffer::SampleBuffer;
use crate::config::RecorderConfig;
use crate::error::{RecorderError, Result};
use crate::estimator;
use crate::samples::{LocationFix, LogEntry, MotionSample};
use crate::store::{BatchDoc, DocumentStore, GeoPoint, SessionDoc};
use crate::uploader::{self, UploaderHandle};

/// Session state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// No session; nothing is collected.
    Idle,
    /// Recording: producers live, samples accepted, uploader ticking.
    Active,
    /// Producers live but callbacks suppressed; uploader canceled.
    Paused,
}

/// Mutable fields owned by one recording session.
struct RuntimeState {
    state: SessionState,
    session_id: Option<String>,
    vehicle_type: String,
    log: Vec<LogEntry>,
    buffer: SampleBuffer,
    latest_fix: Option<LocationFix>,
    previous_fix: Option<LocationFix>,
    smoothed_speed_kmh: f64,
}

impl RuntimeState {
    fn new() -> Self {
        RuntimeState {
            state: SessionState::Idle,
            session_id: None,
            vehicle_type: String::new(),
            log: Vec::new(),
            buffer: SampleBuffer::new(),
            latest_fix: None,
            previous_fix: None,
            smoothed_speed_kmh: 0.0,
        }
    }

    fn reset_for_new_session(&mut self, session_id: String, vehicle_type: String) {
        self.state = SessionState::Idle;
        self.session_id = Some(session_id);
        self.vehicle_type = vehicle_type;
        self.log.clear();
        self.buffer.discard();
        self.latest_fix = None;
        self.previous_fix = None;
        self.smoothed_speed_kmh = 0.0;
    }
}

/// Background tasks tied to the Active lifetime.
#[derive(Default)]
struct Tasks {
    acquisition: Option<AcquisitionChannel>,
    pump: Option<JoinHandle<()>>,
    uploader: Option<UploaderHandle>,
}

pub(crate) struct RecorderInner {
    config: RecorderConfig,
    store: Arc<dyn DocumentStore>,
    state: Mutex<RuntimeState>,
    tasks: Mutex<Tasks>,
}

impl RecorderInner {
    /// Motion callback. Applies the speed gate, then appends the sample to the
    /// exposed log and the flush buffer with the location/speed retained at
    /// this moment.
    pub(crate) fn handle_motion(&self, sample: MotionSample) {
        let mut st = self.state.lock().unwrap();
        if st.state != SessionState::Active {
            return;
        }
        if st.smoothed_speed_kmh < self.config.speed_gate_kmh {
            // Idling or stationary; vibration here is noise, not road surface.
            return;
        }
        let (latitude, longitude) = match st.latest_fix.as_ref() {
            Some(fix) => (fix.latitude, fix.longitude),
            None => (0.0, 0.0),
        };
        let entry = LogEntry {
            x: sample.x,
            y: sample.y,
            z: sample.z,
            timestamp: sample.timestamp,
            latitude,
            longitude,
            speed: st.smoothed_speed_kmh,
            vehicle_type: st.vehicle_type.clone(),
        };
        st.log.push(entry.clone());
        st.buffer.append(entry);
    }

    /// Location callback. Rotates the retained fixes and advances the smoothed
    /// speed estimate.
    pub(crate) fn handle_fix(&self, fix: LocationFix) {
        let mut st = self.state.lock().unwrap();
        if st.state != SessionState::Active {
            return;
        }
        let raw = estimator::derive_speed_kmh(fix.speed_mps, st.latest_fix.as_ref(), &fix);
        st.smoothed_speed_kmh =
            estimator::smooth(st.smoothed_speed_kmh, raw, self.config.smoothing_alpha);
        st.previous_fix = st.latest_fix.take();
        st.latest_fix = Some(fix);
    }

    /// One uploader tick: drain the buffer and persist a single batch.
    ///
    /// Returns `Ok(false)` when there was nothing to flush. On a store error
    /// the drained samples are already gone; delivery is at-most-once.
    pub(crate) fn flush_once(&self) -> Result<bool> {
        let (session_id, batch) = {
            let mut st = self.state.lock().unwrap();
            if st.state != SessionState::Active || st.buffer.is_empty() {
                return Ok(false);
            }
            let data = st.buffer.drain_all();
            let location = st
                .latest_fix
                .as_ref()
                .map(|f| GeoPoint {
                    latitude: f.latitude,
                    longitude: f.longitude,
                })
                .unwrap_or(GeoPoint {
                    latitude: 0.0,
                    longitude: 0.0,
                });
            let batch = BatchDoc::from_entries(
                Utc::now().timestamp_millis(),
                data,
                location,
                st.smoothed_speed_kmh,
                st.vehicle_type.clone(),
            );
            let session_id = st.session_id.clone().unwrap_or_default();
            (session_id, batch)
        };
        self.store.append_batch(&session_id, &batch)?;
        Ok(true)
    }

    fn stop_uploader(&self) {
        if let Some(uploader) = self.tasks.lock().unwrap().uploader.take() {
            uploader.shutdown();
        }
    }

    fn stop_all_tasks(&self) {
        let mut tasks = self.tasks.lock().unwrap();
        if let Some(uploader) = tasks.uploader.take() {
            uploader.shutdown();
        }
        if let Some(mut acquisition) = tasks.acquisition.take() {
            acquisition.shutdown_now();
        }
        if let Some(pump) = tasks.pump.take() {
            pump.abort();
        }
    }
}

/// The externally visible recorder: a reactive read of `log`/`logging` plus
/// the four lifecycle commands.
pub struct SessionRecorder {
    inner: Arc<RecorderInner>,
    motion: Arc<dyn MotionSource>,
    location: Arc<dyn LocationSource>,
}

impl SessionRecorder {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        motion: Arc<dyn MotionSource>,
        location: Arc<dyn LocationSource>,
        config: RecorderConfig,
    ) -> Self {
        SessionRecorder {
            inner: Arc::new(RecorderInner {
                config,
                store,
                state: Mutex::new(RuntimeState::new()),
                tasks: Mutex::new(Tasks::default()),
            }),
            motion,
            location,
        }
    }

    /// Start a fresh session, replacing any running one.
    ///
    /// The parent record is persisted before any local state is touched; a
    /// store failure aborts with the previous session intact. Returns the new
    /// session id.
    ///
    /// Session ids are local time at second precision, so two calls within
    /// the same second collide on the same remote document. Known defect in
    /// the deployed schema, kept as-is.
    pub fn start_new(&self, vehicle_type: &str) -> Result<String> {
        let session_id = Local::now().format("%Y-%m-%d-%H-%M-%S").to_string();
        let doc = SessionDoc {
            created_at: Utc::now().timestamp_millis(),
            session_id: session_id.clone(),
            status: "active".to_string(),
            vehicletype: vehicle_type.to_string(),
        };
        self.inner.store.create_session(&doc)?;

        // Previous session (if any) only dies once the new record exists.
        self.inner.stop_all_tasks();
        self.inner
            .state
            .lock()
            .unwrap()
            .reset_for_new_session(session_id.clone(), vehicle_type.to_string());

        // Best-effort seed so the first motion samples carry a real position
        // and the gate sees a live speed estimate from the start.
        if self.location.request_permission() {
            if let Some(fix) = self.location.poll_fix() {
                let mut st = self.inner.state.lock().unwrap();
                let raw = estimator::derive_speed_kmh(fix.speed_mps, None, &fix);
                st.smoothed_speed_kmh =
                    estimator::smooth(0.0, raw, self.inner.config.smoothing_alpha);
                st.latest_fix = Some(fix);
            }
        }

        let (channel, streams) = AcquisitionChannel::start(
            self.motion.clone(),
            self.location.clone(),
            &self.inner.config,
        )?;
        let pump = tokio::spawn(pump_loop(self.inner.clone(), streams));
        let uploader_handle = uploader::spawn(self.inner.clone(), self.inner.config.upload_interval);

        {
            let mut tasks = self.inner.tasks.lock().unwrap();
            tasks.acquisition = Some(channel);
            tasks.pump = Some(pump);
            tasks.uploader = Some(uploader_handle);
        }
        self.inner.state.lock().unwrap().state = SessionState::Active;

        info!("session {} started ({})", session_id, vehicle_type);
        Ok(session_id)
    }

    /// Suspend recording. Buffered-but-unflushed samples are dropped, not
    /// flushed: a buffer straddling the pause is not trustworthy. The log is
    /// untouched.
    pub fn pause(&self) -> Result<()> {
        {
            let mut st = self.inner.state.lock().unwrap();
            match st.state {
                SessionState::Active => {
                    st.buffer.discard();
                    st.state = SessionState::Paused;
                }
                SessionState::Paused => {
                    return Err(RecorderError::InvalidState("already paused".to_string()))
                }
                SessionState::Idle => {
                    return Err(RecorderError::InvalidState("no active session".to_string()))
                }
            }
        }
        self.inner.stop_uploader();
        info!("session paused");
        Ok(())
    }

    /// Re-enable sample acceptance and restart the uploader timer fresh. Log,
    /// buffer and smoothing state carry over.
    pub fn resume(&self) -> Result<()> {
        {
            let mut st = self.inner.state.lock().unwrap();
            match st.state {
                SessionState::Paused => st.state = SessionState::Active,
                SessionState::Active => {
                    return Err(RecorderError::InvalidState("already active".to_string()))
                }
                SessionState::Idle => {
                    return Err(RecorderError::InvalidState("no session to resume".to_string()))
                }
            }
        }
        let handle = uploader::spawn(self.inner.clone(), self.inner.config.upload_interval);
        self.inner.tasks.lock().unwrap().uploader = Some(handle);
        info!("session resumed");
        Ok(())
    }

    /// Full reset from any state. Stops producers and uploader, clears all
    /// local state. Already-persisted documents are left alone.
    pub fn clear(&self) {
        self.inner.stop_all_tasks();
        let mut st = self.inner.state.lock().unwrap();
        if st.session_id.is_some() {
            info!("session {} cleared", st.session_id.as_deref().unwrap_or(""));
        }
        *st = RuntimeState::new();
    }

    /// Snapshot of the full, append-only sample log for the current session.
    pub fn log(&self) -> Vec<LogEntry> {
        self.inner.state.lock().unwrap().log.clone()
    }

    /// True while samples are being accepted.
    pub fn logging(&self) -> bool {
        self.inner.state.lock().unwrap().state == SessionState::Active
    }

    pub fn state(&self) -> SessionState {
        self.inner.state.lock().unwrap().state
    }

    pub fn session_id(&self) -> Option<String> {
        self.inner.state.lock().unwrap().session_id.clone()
    }

    /// Latest smoothed speed estimate, km/h.
    pub fn smoothed_speed_kmh(&self) -> f64 {
        self.inner.state.lock().unwrap().smoothed_speed_kmh
    }

    /// Number of samples waiting for the next flush.
    pub fn buffered_len(&self) -> usize {
        self.inner.state.lock().unwrap().buffer.len()
    }

    #[cfg(test)]
    pub(crate) fn inner(&self) -> &Arc<RecorderInner> {
        &self.inner
    }
}

impl Drop for SessionRecorder {
    fn drop(&mut self) {
        self.inner.stop_all_tasks();
    }
}

/// Single consumer for both producer channels; the only caller of the sample
/// and fix handlers once a session is live.
async fn pump_loop(inner: Arc<RecorderInner>, mut streams: AcquisitionStreams) {
    loop {
        tokio::select! {
            sample = streams.motion_rx.recv() => match sample {
                Some(sample) => inner.handle_motion(sample),
                None => break,
            },
            fix = streams.location_rx.recv() => match fix {
                Some(fix) => inner.handle_fix(fix),
                None => break,
            },
        }
    }
    if inner.state.lock().unwrap().state != SessionState::Idle {
        warn!("acquisition channels closed while session still live");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    /// Motion source that never produces on its own; tests inject samples
    /// directly through the handlers.
    struct SilentMotion;
    impl MotionSource for SilentMotion {
        fn poll_sample(&self) -> Option<MotionSample> {
            None
        }
    }

    /// Location source that grants permission but never fixes.
    struct NoFixLocation;
    impl LocationSource for NoFixLocation {
        fn request_permission(&self) -> bool {
            true
        }
        fn poll_fix(&self) -> Option<LocationFix> {
            None
        }
    }

    /// Location source that refuses permission.
    struct DeniedLocation;
    impl LocationSource for DeniedLocation {
        fn request_permission(&self) -> bool {
            false
        }
        fn poll_fix(&self) -> Option<LocationFix> {
            None
        }
    }

    fn recorder_with(store: Arc<MemoryStore>) -> SessionRecorder {
        SessionRecorder::new(
            store,
            Arc::new(SilentMotion),
            Arc::new(NoFixLocation),
            RecorderConfig::default(),
        )
    }

    fn motion(y: f64, ts: i64) -> MotionSample {
        MotionSample::new(0.1, y, 9.8, ts)
    }

    fn fix_with_speed(kmh: f64, ts: i64) -> LocationFix {
        LocationFix::new(3.139, 101.687, ts, Some(kmh / 3.6))
    }

    #[tokio::test]
    async fn test_start_new_persists_parent_and_goes_active() {
        let store = Arc::new(MemoryStore::new());
        let recorder = recorder_with(store.clone());

        let id = recorder.start_new("car").unwrap();
        assert_eq!(recorder.state(), SessionState::Active);
        assert!(recorder.logging());
        assert_eq!(recorder.session_id(), Some(id.clone()));

        let doc = store.session(&id).expect("session doc persisted");
        assert_eq!(doc.status, "active");
        assert_eq!(doc.vehicletype, "car");
        recorder.clear();
    }

    #[tokio::test]
    async fn test_start_new_aborts_on_store_failure() {
        let store = Arc::new(MemoryStore::new());
        let recorder = recorder_with(store.clone());

        let first = recorder.start_new("car").unwrap();
        recorder.inner().handle_fix(fix_with_speed(36.0, 1_000));
        recorder.inner().handle_motion(motion(1.0, 1_010));
        assert_eq!(recorder.log().len(), 1);

        store.set_fail_writes(true);
        let err = recorder.start_new("truck").unwrap_err();
        assert!(matches!(err, RecorderError::Storage(_)));

        // Prior session untouched.
        assert_eq!(recorder.state(), SessionState::Active);
        assert_eq!(recorder.session_id(), Some(first));
        assert_eq!(recorder.log().len(), 1);
        store.set_fail_writes(false);
        recorder.clear();
    }

    #[tokio::test]
    async fn test_permission_denied_does_not_start() {
        let store = Arc::new(MemoryStore::new());
        let recorder = SessionRecorder::new(
            store,
            Arc::new(SilentMotion),
            Arc::new(DeniedLocation),
            RecorderConfig::default(),
        );
        let err = recorder.start_new("car").unwrap_err();
        assert!(matches!(err, RecorderError::PermissionDenied));
        assert_eq!(recorder.state(), SessionState::Idle);
        assert!(!recorder.logging());
    }

    #[tokio::test]
    async fn test_speed_gate_filters_slow_samples() {
        let store = Arc::new(MemoryStore::new());
        let recorder = recorder_with(store);
        recorder.start_new("car").unwrap();
        let inner = recorder.inner().clone();

        // Alternate stationary and 10 km/h fixes; alpha 0.8 means the estimate
        // lands at 8 km/h after a fast fix and 1.6 km/h after a slow one.
        let mut ts = 0i64;
        let mut accepted = 0usize;
        for i in 0..10 {
            let kmh = if i % 2 == 0 { 0.0 } else { 10.0 };
            ts += 500;
            inner.handle_fix(fix_with_speed(kmh, ts));
            let gated = recorder.smoothed_speed_kmh() < 5.0;
            inner.handle_motion(motion(1.0, ts + 1));
            if !gated {
                accepted += 1;
            }
        }

        // Only samples following a >=5 km/h estimate were retained.
        assert_eq!(accepted, 5);
        assert_eq!(recorder.log().len(), accepted);
        for entry in recorder.log() {
            assert!(entry.speed >= 5.0);
        }
        recorder.clear();
    }

    #[tokio::test]
    async fn test_sample_carries_smoothed_speed_and_fix() {
        let store = Arc::new(MemoryStore::new());
        let recorder = recorder_with(store);
        recorder.start_new("motorcycle").unwrap();
        let inner = recorder.inner().clone();

        inner.handle_fix(fix_with_speed(36.0, 500));
        inner.handle_motion(motion(2.5, 505));

        let log = recorder.log();
        assert_eq!(log.len(), 1);
        let entry = &log[0];
        // smooth(0, 36, 0.8) = 28.8
        assert!((entry.speed - 28.8).abs() < 1e-9);
        assert_eq!(entry.latitude, 3.139);
        assert_eq!(entry.longitude, 101.687);
        assert_eq!(entry.vehicle_type, "motorcycle");
        assert_eq!(entry.y, 2.5);
        recorder.clear();
    }

    #[tokio::test]
    async fn test_pause_drops_buffer_keeps_log() {
        let store = Arc::new(MemoryStore::new());
        let recorder = recorder_with(store);
        recorder.start_new("car").unwrap();
        let inner = recorder.inner().clone();

        inner.handle_fix(fix_with_speed(36.0, 500));
        inner.handle_motion(motion(1.0, 510));
        inner.handle_motion(motion(2.0, 520));
        assert_eq!(recorder.buffered_len(), 2);
        assert_eq!(recorder.log().len(), 2);

        recorder.pause().unwrap();
        assert_eq!(recorder.state(), SessionState::Paused);
        assert_eq!(recorder.buffered_len(), 0);
        assert_eq!(recorder.log().len(), 2);

        // Suppressed while paused.
        inner.handle_motion(motion(3.0, 530));
        inner.handle_fix(fix_with_speed(72.0, 1_000));
        assert_eq!(recorder.log().len(), 2);
        assert_eq!(recorder.buffered_len(), 0);
        recorder.clear();
    }

    #[tokio::test]
    async fn test_resume_keeps_history_and_smoothing() {
        let store = Arc::new(MemoryStore::new());
        let recorder = recorder_with(store);
        recorder.start_new("car").unwrap();
        let inner = recorder.inner().clone();

        inner.handle_fix(fix_with_speed(36.0, 500));
        inner.handle_motion(motion(1.0, 510));
        recorder.pause().unwrap();
        let speed_before = recorder.smoothed_speed_kmh();

        recorder.resume().unwrap();
        assert_eq!(recorder.state(), SessionState::Active);
        assert_eq!(recorder.log().len(), 1);
        assert_eq!(recorder.smoothed_speed_kmh(), speed_before);

        inner.handle_motion(motion(2.0, 1_200));
        assert_eq!(recorder.log().len(), 2);
        recorder.clear();
    }

    #[tokio::test]
    async fn test_invalid_transitions() {
        let store = Arc::new(MemoryStore::new());
        let recorder = recorder_with(store);

        assert!(recorder.pause().is_err());
        assert!(recorder.resume().is_err());

        recorder.start_new("car").unwrap();
        assert!(recorder.resume().is_err());
        recorder.pause().unwrap();
        assert!(recorder.pause().is_err());
        recorder.clear();
    }

    #[tokio::test]
    async fn test_clear_resets_from_every_state() {
        let store = Arc::new(MemoryStore::new());
        let recorder = recorder_with(store);

        // From Idle.
        recorder.clear();
        assert_eq!(recorder.state(), SessionState::Idle);
        assert!(recorder.log().is_empty());
        assert!(!recorder.logging());

        // From Active.
        recorder.start_new("car").unwrap();
        let inner = recorder.inner().clone();
        inner.handle_fix(fix_with_speed(36.0, 500));
        inner.handle_motion(motion(1.0, 510));
        recorder.clear();
        assert_eq!(recorder.state(), SessionState::Idle);
        assert!(recorder.log().is_empty());
        assert!(!recorder.logging());
        assert_eq!(recorder.session_id(), None);
        assert_eq!(recorder.smoothed_speed_kmh(), 0.0);

        // From Paused.
        recorder.start_new("car").unwrap();
        recorder.pause().unwrap();
        recorder.clear();
        assert_eq!(recorder.state(), SessionState::Idle);
        assert!(recorder.log().is_empty());
        assert!(!recorder.logging());
    }

    #[tokio::test]
    async fn test_start_new_resets_log_and_changes_id() {
        let store = Arc::new(MemoryStore::new());
        let recorder = recorder_with(store.clone());

        let first = recorder.start_new("car").unwrap();
        let inner = recorder.inner().clone();
        inner.handle_fix(fix_with_speed(36.0, 500));
        inner.handle_motion(motion(1.0, 510));
        assert_eq!(recorder.log().len(), 1);

        // Same-second ids collide by design; wait out the second boundary.
        tokio::time::sleep(std::time::Duration::from_millis(1100)).await;

        let second = recorder.start_new("car").unwrap();
        assert_ne!(first, second);
        assert!(recorder.log().is_empty());
        assert_eq!(recorder.state(), SessionState::Active);
        assert_eq!(store.session_count(), 2);
        recorder.clear();
    }

    #[tokio::test]
    async fn test_flush_once_semantics() {
        let store = Arc::new(MemoryStore::new());
        let recorder = recorder_with(store.clone());
        let id = recorder.start_new("car").unwrap();
        let inner = recorder.inner().clone();
        let writes_after_start = store.write_count();

        // Empty buffer: no-op, no document.
        assert!(!inner.flush_once().unwrap());
        assert_eq!(store.write_count(), writes_after_start);

        inner.handle_fix(fix_with_speed(36.0, 500));
        inner.handle_motion(motion(1.0, 510));
        inner.handle_motion(motion(2.0, 520));
        inner.handle_motion(motion(3.0, 530));

        assert!(inner.flush_once().unwrap());
        assert_eq!(recorder.buffered_len(), 0);

        let batches = store.batches(&id);
        assert_eq!(batches.len(), 1);
        let batch = &batches[0];
        assert_eq!(batch.data.len(), 3);
        assert_eq!(batch.y_values, vec![1.0, 2.0, 3.0]);
        assert_eq!(batch.vehicletype, "car");
        assert_eq!(batch.location.latitude, 3.139);
        assert!((batch.speed - 28.8).abs() < 1e-9);

        // Log retains everything the flush took from the buffer.
        assert_eq!(recorder.log().len(), 3);
        recorder.clear();
    }

    #[tokio::test]
    async fn test_flush_failure_drops_samples() {
        let store = Arc::new(MemoryStore::new());
        let recorder = recorder_with(store.clone());
        let id = recorder.start_new("car").unwrap();
        let inner = recorder.inner().clone();

        inner.handle_fix(fix_with_speed(36.0, 500));
        inner.handle_motion(motion(1.0, 510));

        store.set_fail_writes(true);
        assert!(inner.flush_once().is_err());
        store.set_fail_writes(false);

        // At-most-once: the drained samples are gone, not re-queued.
        assert_eq!(recorder.buffered_len(), 0);
        assert!(store.batches(&id).is_empty());

        // Next flush proceeds normally with new samples.
        inner.handle_motion(motion(2.0, 520));
        assert!(inner.flush_once().unwrap());
        assert_eq!(store.batches(&id).len(), 1);
        assert_eq!(store.batches(&id)[0].y_values, vec![2.0]);
        recorder.clear();
    }
}
