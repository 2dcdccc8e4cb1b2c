// Road roughness sensor-logging core
// Records accelerometer/GPS sessions while driving and batches them into a
// document store for downstream IRI processing.

pub mod acquisition;
pub mod buffer;
pub mod config;
pub mod error;
pub mod estimator;
pub mod iri;
pub mod samples;
pub mod session;
pub mod store;

mod uploader;

pub use acquisition::{
    AcquisitionChannel, LocationSource, MotionSource, SimulatedLocation, SimulatedMotion,
};
pub use config::RecorderConfig;
pub use error::{RecorderError, Result};
pub use samples::{LocationFix, LogEntry, MotionSample};
pub use session::{SessionRecorder, SessionState};
pub use store::{BatchDoc, DocumentStore, GeoPoint, JsonDirStore, MemoryStore, SessionDoc, StoreError};
