use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use clap::Parser;
use tokio::time::sleep;

use road_logger_rs::iri::{self, IriConfig, RoadSample};
use road_logger_rs::{
    JsonDirStore, RecorderConfig, SessionRecorder, SimulatedLocation, SimulatedMotion,
};

#[derive(Parser, Debug)]
#[command(name = "road_logger")]
#[command(about = "Road roughness session recorder - simulated drive demo", long_about = None)]
struct Args {
    /// Recording duration in seconds
    #[arg(value_name = "SECONDS", default_value = "10")]
    duration: u64,

    /// Vehicle type written into the session documents
    #[arg(long, default_value = "car")]
    vehicle: String,

    /// Simulated drive speed in m/s
    #[arg(long, default_value = "12.0")]
    speed: f64,

    /// Minimum smoothed speed (km/h) below which samples are discarded
    #[arg(long, default_value = "5.0")]
    speed_gate: f64,

    /// Exponential smoothing factor for the speed estimate
    #[arg(long, default_value = "0.8")]
    alpha: f64,

    /// Output directory for session and batch documents
    #[arg(long, default_value = "road_logger_sessions")]
    output_dir: String,

    /// Run the IRI post-processing pass over the recorded log before exit
    #[arg(long)]
    process_iri: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    println!("[{}] Road Logger starting", ts_now());
    println!("  Duration: {} seconds", args.duration);
    println!("  Vehicle: {}", args.vehicle);
    println!("  Simulated speed: {} m/s", args.speed);
    println!("  Output dir: {}", args.output_dir);

    let store = Arc::new(JsonDirStore::new(&args.output_dir)?);
    let motion = Arc::new(SimulatedMotion::new());
    let location = Arc::new(SimulatedLocation::new(args.speed));

    let config = RecorderConfig {
        speed_gate_kmh: args.speed_gate,
        smoothing_alpha: args.alpha,
        ..RecorderConfig::default()
    };
    let recorder = SessionRecorder::new(store, motion, location, config);

    let session_id = recorder.start_new(&args.vehicle)?;
    println!("[{}] Session {} recording...", ts_now(), session_id);

    sleep(Duration::from_secs(args.duration)).await;

    let log = recorder.log();
    println!("\n=== Session Stats ===");
    println!("Session id: {}", session_id);
    println!("Samples logged: {}", log.len());
    println!("Samples buffered: {}", recorder.buffered_len());
    println!(
        "Smoothed speed: {:.1} km/h",
        recorder.smoothed_speed_kmh()
    );

    if args.process_iri && !log.is_empty() {
        let samples: Vec<RoadSample> = log.iter().map(RoadSample::from_entry).collect();
        let iri_config = IriConfig::default();
        let mut window_count = 0usize;
        for track in iri::split_tracks(&samples, &iri_config) {
            for window in iri::process_track(&track, &iri_config) {
                println!(
                    "IRI window [{}..{}] {:.0} m: {:.2} m/km ({})",
                    window.start_idx,
                    window.end_idx,
                    window.distance_m,
                    window.iri,
                    iri::iri_color(window.iri)
                );
                window_count += 1;
            }
        }
        println!("IRI windows computed: {}", window_count);
    }

    recorder.clear();
    println!("[{}] Done", ts_now());
    Ok(())
}

fn ts_now() -> String {
    Utc::now().format("%H:%M:%S").to_string()
}
