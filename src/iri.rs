//! Offline road-roughness post-processing over persisted vibration logs.
//!
//! Only the vertical (`y`) acceleration is used. The pipeline per track is:
//! denoise (high-pass, Hampel, rolling median, moving average), cumulative
//! distance along the raw GPS trace, then one IRI value per distance window.
//! Windows driven too slowly are skipped outright: below ~30 km/h
//! accelerometer drift dominates and produces fake rough readings.

use serde::{Deserialize, Serialize};

use crate::estimator::haversine_meters;
use crate::samples::LogEntry;

/// Post-processing parameters with the deployed defaults.
#[derive(Debug, Clone)]
pub struct IriConfig {
    /// One IRI value per this many meters of travel.
    pub window_m: f64,
    /// Windows (including the tail remainder) shorter than this are dropped.
    pub min_window_m: f64,
    /// Windows with a lower average speed are dropped (m/s).
    pub min_speed_mps: f64,
    /// High-pass baseline window, seconds.
    pub highpass_sec: f64,
    /// Hampel outlier window, seconds.
    pub hampel_sec: f64,
    /// Hampel rejection threshold in scaled MADs.
    pub hampel_k: f64,
    /// Rolling median window, seconds.
    pub median_sec: f64,
    /// Moving average window, seconds.
    pub mean_sec: f64,
    /// Split a track when consecutive samples are further apart in time.
    pub max_gap_secs: f64,
    /// Split a track when consecutive samples jump further than this.
    pub max_gap_m: f64,
    /// Discard track fragments with fewer samples.
    pub min_track_len: usize,
    /// Discard whole tracks shorter than this.
    pub min_track_m: f64,
}

impl Default for IriConfig {
    fn default() -> Self {
        IriConfig {
            window_m: 100.0,
            min_window_m: 20.0,
            min_speed_mps: 8.3,
            highpass_sec: 1.0,
            hampel_sec: 0.5,
            hampel_k: 3.0,
            median_sec: 0.2,
            mean_sec: 0.2,
            max_gap_secs: 15.0,
            max_gap_m: 200.0,
            min_track_len: 10,
            min_track_m: 50.0,
        }
    }
}

/// One row of the flattened vibration log.
#[derive(Debug, Clone, PartialEq)]
pub struct RoadSample {
    /// Seconds since epoch.
    pub t: f64,
    pub lat: f64,
    pub lon: f64,
    /// Vertical acceleration, m/s².
    pub y: f64,
}

impl RoadSample {
    pub fn from_entry(entry: &LogEntry) -> Self {
        RoadSample {
            t: entry.timestamp as f64 / 1000.0,
            lat: entry.latitude,
            lon: entry.longitude,
            y: entry.y,
        }
    }
}

/// IRI result for one distance window of a track.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowIri {
    pub start_idx: usize,
    pub end_idx: usize,
    pub distance_m: f64,
    /// Roughness in m/km over the window.
    pub iri: f64,
}

/// Sampling rate from median timestamp spacing; 100 Hz when undeterminable.
pub fn estimate_sample_rate(t: &[f64]) -> f64 {
    let mut dts: Vec<f64> = t
        .windows(2)
        .map(|w| w[1] - w[0])
        .filter(|dt| dt.is_finite() && *dt > 0.0)
        .collect();
    if dts.is_empty() {
        return 100.0;
    }
    dts.sort_by(|a, b| a.partial_cmp(b).unwrap());
    1.0 / median_of_sorted(&dts)
}

fn median_of_sorted(sorted: &[f64]) -> f64 {
    let n = sorted.len();
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    }
}

fn centered_window(i: usize, win: usize, n: usize) -> (usize, usize) {
    let half = win / 2;
    let lo = i.saturating_sub(half);
    let hi = (i + half + 1).min(n);
    (lo, hi)
}

/// Centered rolling median with edge truncation.
pub fn rolling_median(y: &[f64], win: usize) -> Vec<f64> {
    if win <= 1 {
        return y.to_vec();
    }
    let n = y.len();
    let mut out = Vec::with_capacity(n);
    let mut scratch = Vec::with_capacity(win);
    for i in 0..n {
        let (lo, hi) = centered_window(i, win, n);
        scratch.clear();
        scratch.extend_from_slice(&y[lo..hi]);
        scratch.sort_by(|a, b| a.partial_cmp(b).unwrap());
        out.push(median_of_sorted(&scratch));
    }
    out
}

/// Centered rolling mean with edge truncation (high-pass baseline).
pub fn rolling_mean(y: &[f64], win: usize) -> Vec<f64> {
    if win <= 1 {
        return y.to_vec();
    }
    let n = y.len();
    let mut out = Vec::with_capacity(n);
    for i in 0..n {
        let (lo, hi) = centered_window(i, win, n);
        let sum: f64 = y[lo..hi].iter().sum();
        out.push(sum / (hi - lo) as f64);
    }
    out
}

/// Zero-padded moving average (uniform convolution, same length).
pub fn moving_average(y: &[f64], win: usize) -> Vec<f64> {
    if win <= 1 {
        return y.to_vec();
    }
    let n = y.len();
    let mut out = Vec::with_capacity(n);
    for i in 0..n {
        let (lo, hi) = centered_window(i, win, n);
        let sum: f64 = y[lo..hi].iter().sum();
        // Out-of-range taps count as zeros, so divide by the full width.
        out.push(sum / win as f64);
    }
    out
}

/// Hampel filter: replace points further than `k` scaled MADs from the local
/// median with that median. A zero MAD (flat window) rejects nothing.
pub fn hampel(y: &[f64], win: usize, k: f64) -> Vec<f64> {
    if win <= 1 {
        return y.to_vec();
    }
    let med = rolling_median(y, win);
    let abs_dev: Vec<f64> = y.iter().zip(&med).map(|(v, m)| (v - m).abs()).collect();
    let mad: Vec<f64> = rolling_median(&abs_dev, win)
        .into_iter()
        .map(|m| 1.4826 * m)
        .collect();

    y.iter()
        .enumerate()
        .map(|(i, &v)| {
            if mad[i] > 0.0 && (v - med[i]).abs() > k * mad[i] {
                med[i]
            } else {
                v
            }
        })
        .collect()
}

fn window_samples(sec: f64, fs: f64) -> usize {
    let n = ((sec * fs).round() as usize).max(3);
    if n % 2 == 1 {
        n
    } else {
        n + 1
    }
}

/// Full denoising chain on the vertical acceleration channel.
pub fn denoise_vertical(a: &[f64], t: &[f64], config: &IriConfig) -> Vec<f64> {
    if a.len() < 2 {
        return a.to_vec();
    }

    let mut dts: Vec<f64> = t
        .windows(2)
        .map(|w| w[1] - w[0])
        .filter(|dt| dt.is_finite() && *dt > 0.0)
        .collect();
    dts.sort_by(|x, y| x.partial_cmp(y).unwrap());
    let dt = if dts.is_empty() {
        0.01
    } else {
        median_of_sorted(&dts)
    };

    // High-pass: subtract the slow baseline so gravity and body lean drop out.
    let win_hp = ((config.highpass_sec / dt.max(1e-6)).round() as usize).max(3);
    let baseline = rolling_mean(a, win_hp);
    let hp: Vec<f64> = a.iter().zip(&baseline).map(|(v, b)| v - b).collect();

    let fs = estimate_sample_rate(t);
    let y = hampel(&hp, window_samples(config.hampel_sec, fs), config.hampel_k);
    let y = rolling_median(&y, window_samples(config.median_sec, fs));
    moving_average(&y, window_samples(config.mean_sec, fs))
}

/// Cumulative travel distance along the raw GPS trace, meters.
pub fn cumulative_distance(samples: &[RoadSample]) -> Vec<f64> {
    let mut out = Vec::with_capacity(samples.len());
    let mut acc = 0.0;
    for (i, s) in samples.iter().enumerate() {
        if i > 0 {
            let p = &samples[i - 1];
            acc += haversine_meters(p.lat, p.lon, s.lat, s.lon);
        }
        out.push(acc);
    }
    out
}

/// Cumulative trapezoidal integral of `y` over `x`; degenerate steps are
/// clamped so a repeated timestamp cannot zero or invert the integral.
pub fn cumtrapz(y: &[f64], x: &[f64]) -> Vec<f64> {
    let n = y.len();
    let mut out = Vec::with_capacity(n);
    out.push(0.0);
    for i in 1..n {
        let mut dx = x[i] - x[i - 1];
        if !dx.is_finite() || dx <= 0.0 {
            dx = 1e-6;
        }
        let area = 0.5 * (y[i] + y[i - 1]) * dx;
        out.push(out[i - 1] + area);
    }
    out
}

fn trapz(y: &[f64], x: &[f64]) -> f64 {
    let mut acc = 0.0;
    for i in 1..y.len() {
        let dx = x[i] - x[i - 1];
        if dx.is_finite() && dx > 0.0 {
            acc += 0.5 * (y[i] + y[i - 1]) * dx;
        }
    }
    acc
}

/// Partition sample indices into distance windows of `window_m`, with a tail
/// window kept only when it covers at least `min_window_m`.
pub fn window_by_distance(cumdist: &[f64], config: &IriConfig) -> Vec<(usize, usize)> {
    let n = cumdist.len();
    if n < 2 {
        return Vec::new();
    }

    let mut windows = Vec::new();
    let mut start_idx = 0;
    let mut start_dist = cumdist[0];

    for i in 1..n {
        if cumdist[i] - start_dist >= config.window_m {
            windows.push((start_idx, i));
            start_idx = i;
            start_dist = cumdist[i];
        }
    }

    if start_idx < n - 1 && cumdist[n - 1] - start_dist >= config.min_window_m {
        windows.push((start_idx, n - 1));
    }

    windows
}

/// IRI for one window: the displacement-equivalent of the rectified velocity
/// integral, normalized per kilometer of travel. `None` when the window is
/// too short, too slow, or degenerate in time.
pub fn iri_for_window(t: &[f64], a: &[f64], dist_m: f64, config: &IriConfig) -> Option<f64> {
    if t.len() < 2 {
        return None;
    }
    let duration = t[t.len() - 1] - t[0];
    if duration <= 0.0 {
        return None;
    }
    if dist_m / duration < config.min_speed_mps {
        return None;
    }
    if dist_m < config.min_window_m {
        return None;
    }

    let v = cumtrapz(a, t);
    let v_abs: Vec<f64> = v.iter().map(|x| x.abs()).collect();
    let disp_equiv = trapz(&v_abs, t);
    Some(disp_equiv / (dist_m / 1000.0))
}

/// Split a flattened log into continuous driving tracks at time or distance
/// gaps, dropping fragments too short to be meaningful.
pub fn split_tracks(samples: &[RoadSample], config: &IriConfig) -> Vec<Vec<RoadSample>> {
    if samples.is_empty() {
        return Vec::new();
    }

    let mut tracks = Vec::new();
    let mut start = 0;
    for i in 1..samples.len() {
        let prev = &samples[i - 1];
        let cur = &samples[i];
        let dt = cur.t - prev.t;
        let jump = haversine_meters(prev.lat, prev.lon, cur.lat, cur.lon);
        if dt > config.max_gap_secs || jump > config.max_gap_m {
            if i - start > config.min_track_len {
                tracks.push(samples[start..i].to_vec());
            }
            start = i;
        }
    }
    if samples.len() - start > config.min_track_len {
        tracks.push(samples[start..].to_vec());
    }
    tracks
}

/// IRI values for every valid distance window of one continuous track.
pub fn process_track(samples: &[RoadSample], config: &IriConfig) -> Vec<WindowIri> {
    if samples.len() < 2 {
        return Vec::new();
    }

    let t0 = samples[0].t;
    let t_rel: Vec<f64> = samples.iter().map(|s| s.t - t0).collect();
    let a_raw: Vec<f64> = samples.iter().map(|s| s.y).collect();
    let a_clean = denoise_vertical(&a_raw, &t_rel, config);

    let cumdist = cumulative_distance(samples);
    if *cumdist.last().unwrap() < config.min_track_m {
        return Vec::new();
    }

    let mut out = Vec::new();
    for (i0, i1) in window_by_distance(&cumdist, config) {
        let dist = (cumdist[i1] - cumdist[i0]).max(0.0);
        if let Some(iri) = iri_for_window(&t_rel[i0..=i1], &a_clean[i0..=i1], dist, config) {
            out.push(WindowIri {
                start_idx: i0,
                end_idx: i1,
                distance_m: dist,
                iri,
            });
        }
    }
    out
}

/// Display color bucket for an IRI value (green / yellow / orange / red).
pub fn iri_color(v: f64) -> &'static str {
    if v < 2.5 {
        "#22c55e"
    } else if v < 4.5 {
        "#eab308"
    } else if v < 6.5 {
        "#f97316"
    } else {
        "#ef4444"
    }
}

/// Repeatability statistics over per-traversal mean IRI values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsistencyStats {
    pub traversals: usize,
    pub mean: f64,
    pub std_dev: f64,
    /// Coefficient of variation (std / mean).
    pub cv: f64,
}

/// Needs at least two traversals; sample standard deviation (ddof = 1).
pub fn consistency(traversal_means: &[f64]) -> Option<ConsistencyStats> {
    let n = traversal_means.len();
    if n < 2 {
        return None;
    }
    let mean = traversal_means.iter().sum::<f64>() / n as f64;
    let var = traversal_means
        .iter()
        .map(|v| (v - mean).powi(2))
        .sum::<f64>()
        / (n - 1) as f64;
    let std_dev = var.sqrt();
    let cv = if mean != 0.0 { std_dev / mean } else { 0.0 };
    Some(ConsistencyStats {
        traversals: n,
        mean,
        std_dev,
        cv,
    })
}
