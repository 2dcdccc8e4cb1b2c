//! Distance and speed estimation helpers.
//!
//! Pure functions; the only state involved is the smoothing accumulator, which
//! the caller owns.

use crate::samples::LocationFix;

const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Great-circle distance between two points in meters.
///
/// The inner haversine term is clamped to [0, 1] so float error near identical
/// or antipodal points cannot produce a negative sqrt or an out-of-range asin.
pub fn haversine_meters(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();
    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    let a = a.clamp(0.0, 1.0);
    2.0 * EARTH_RADIUS_M * a.sqrt().asin()
}

/// Instantaneous speed estimate in km/h for the current fix.
///
/// A non-negative provider speed wins. Otherwise the speed is derived from the
/// distance to the previous fix; out-of-order or duplicate timestamps yield 0
/// rather than a division by a non-positive delta.
pub fn derive_speed_kmh(
    raw_speed_mps: Option<f64>,
    previous: Option<&LocationFix>,
    current: &LocationFix,
) -> f64 {
    if let Some(mps) = raw_speed_mps {
        if mps >= 0.0 {
            return mps * 3.6;
        }
    }

    match previous {
        Some(prev) => {
            let dt_s = (current.timestamp - prev.timestamp) as f64 / 1000.0;
            if dt_s <= 0.0 {
                return 0.0;
            }
            let dist_m = haversine_meters(
                prev.latitude,
                prev.longitude,
                current.latitude,
                current.longitude,
            );
            dist_m / dt_s * 3.6
        }
        None => 0.0,
    }
}

/// Exponential moving average step.
///
/// The default alpha of 0.8 weights the newest sample heavily so the estimate
/// tracks real speed changes (stopping at a light) within a couple of fixes.
pub fn smooth(previous_smoothed: f64, new_raw: f64, alpha: f64) -> f64 {
    previous_smoothed * (1.0 - alpha) + new_raw * alpha
}
