use serde::{Deserialize, Serialize};

/// One accepted motion sample, as exposed in the session log and persisted
/// inside batch documents. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    /// Epoch millis at capture time.
    pub timestamp: i64,
    pub latitude: f64,
    pub longitude: f64,
    /// Smoothed speed estimate at capture time, km/h.
    pub speed: f64,
    #[serde(rename = "vehicleType")]
    pub vehicle_type: String,
}

/// Raw accelerometer sample from the motion source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MotionSample {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub timestamp: i64,
}

impl MotionSample {
    pub fn new(x: f64, y: f64, z: f64, timestamp: i64) -> Self {
        Self { x, y, z, timestamp }
    }

    pub fn magnitude(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }
}

/// Position fix from the location source. Only the latest fix and the one
/// before it are ever retained.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationFix {
    pub latitude: f64,
    pub longitude: f64,
    /// Epoch millis of the fix.
    pub timestamp: i64,
    /// Provider-reported speed in m/s, when available and trustworthy.
    pub speed_mps: Option<f64>,
}

impl LocationFix {
    pub fn new(latitude: f64, longitude: f64, timestamp: i64, speed_mps: Option<f64>) -> Self {
        Self {
            latitude,
            longitude,
            timestamp,
            speed_mps,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_motion_magnitude() {
        let sample = MotionSample::new(3.0, 4.0, 0.0, 0);
        assert_eq!(sample.magnitude(), 5.0);
    }

    #[test]
    fn test_log_entry_wire_names() {
        let entry = LogEntry {
            x: 0.1,
            y: 9.8,
            z: 0.2,
            timestamp: 1_700_000_000_000,
            latitude: 3.12,
            longitude: 101.65,
            speed: 42.0,
            vehicle_type: "car".to_string(),
        };
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"vehicleType\":\"car\""));
        assert!(json.contains("\"timestamp\":1700000000000"));
    }
}
