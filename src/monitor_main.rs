use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use std::time::{Duration, Instant};

use dragon_radar::audio::DeviceTap;
use dragon_radar::{DirectionTracker, Radar, RadarConfig, TrackUpdate};

#[derive(Parser)]
#[command(name = "radar-monitor")]
#[command(about = "Live intensity meter for the default input device")]
struct Args {
    /// JSON config with smoothing and clamp tunables
    #[arg(long)]
    config: Option<String>,

    /// Stop after this many seconds (default: run until Ctrl+C)
    #[arg(long)]
    seconds: Option<f32>,

    /// Dial angle of the input track in degrees
    #[arg(long, default_value_t = 0.0)]
    angle: f32,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    info!("Starting Dragon Radar input monitor");

    let config = RadarConfig::load_or_default(args.config.as_deref())?;
    let frame_size = config.frame_size;
    let mut radar = Radar::new(config);

    let input = radar.register();
    radar.set_angle_and_radius(input, args.angle.to_radians(), radar.config().default_radius);

    let port = radar
        .open_port(input)
        .context("Input track vanished before it could be tapped")?;
    let tap = DeviceTap::open_default_input(port, frame_size)?;
    radar.update(input, TrackUpdate::playing(true));

    info!("Monitor initialized successfully");
    info!("Listening on {} ({} Hz, {} ch)", tap.device_name(), tap.sample_rate(), tap.channels());

    let deadline = args.seconds.map(|s| Instant::now() + Duration::from_secs_f32(s.max(0.0).min(1e6)));
    let mut arrow = DirectionTracker::new(0.2);

    loop {
        radar.pump(|_| {});
        let direction = arrow.update(radar.direction());

        if let Some(track) = radar.registry().get(input) {
            print_meter(tap.device_name(), track.raw_rms(), track.intensity(), direction.angle, direction.magnitude);
        }

        if deadline.is_some_and(|d| Instant::now() >= d) {
            break;
        }
        std::thread::sleep(Duration::from_millis(50));
    }

    drop(tap);
    info!("Dropped messages: {}", radar.dropped_messages());
    Ok(())
}

fn print_meter(device: &str, raw: f32, intensity: f32, angle: f32, magnitude: f32) {
    print!("\x1B[2J\x1B[1;1H"); // Clear screen and move cursor to top

    println!("Dragon Radar - Input Monitor");
    println!("============================");
    println!("Device: {}", device);
    println!();
    println!("RMS       |{:<50}| {:.3}", bar(raw), raw);
    println!("Intensity |{:<50}| {:.3}", bar(intensity), intensity);
    println!();
    println!("Arrow: {:6.1}° magnitude {:.3}", angle.to_degrees(), magnitude);
    println!();
    println!("Press Ctrl+C to exit");
}

fn bar(level: f32) -> String {
    "█".repeat((level.clamp(0.0, 1.0) * 50.0) as usize)
}
