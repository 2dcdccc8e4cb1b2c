use std::time::Duration;

/// Tunable parameters for a recording session.
///
/// The speed gate and smoothing factor have no documented derivation; they are
/// kept configurable with the field-tested defaults rather than second-guessed.
#[derive(Debug, Clone)]
pub struct RecorderConfig {
    /// Samples captured below this smoothed speed are discarded.
    pub speed_gate_kmh: f64,
    /// Exponential moving average weight on the newest speed estimate.
    pub smoothing_alpha: f64,
    /// Accelerometer sampling period.
    pub motion_period: Duration,
    /// Location fix interval.
    pub location_interval: Duration,
    /// Batch flush interval.
    pub upload_interval: Duration,
    /// Bounded capacity of the motion sample channel.
    pub motion_channel_capacity: usize,
    /// Bounded capacity of the location fix channel.
    pub location_channel_capacity: usize,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        RecorderConfig {
            speed_gate_kmh: 5.0,
            smoothing_alpha: 0.8,
            motion_period: Duration::from_millis(10),
            location_interval: Duration::from_millis(500),
            upload_interval: Duration::from_millis(1000),
            motion_channel_capacity: 500,
            location_channel_capacity: 100,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RecorderConfig::default();
        assert_eq!(config.speed_gate_kmh, 5.0);
        assert_eq!(config.smoothing_alpha, 0.8);
        assert_eq!(config.upload_interval, Duration::from_millis(1000));
    }
}
