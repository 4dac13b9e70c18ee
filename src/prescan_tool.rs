use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use serde::Serialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};

use dragon_radar::radar::resultant;
use dragon_radar::{
    Direction, FrameSource, NullSink, Pacing, Radar, RadarConfig, RadarEvent, TrackId,
    WavFileSource,
};

#[derive(Parser)]
#[command(name = "radar-prescan")]
#[command(about = "Run WAV files through the radar envelope pipeline and report per-track intensity")]
struct Args {
    /// WAV files, one track each
    #[arg(required = true)]
    input_files: Vec<String>,

    /// Dial angle per track in degrees, comma separated (default: evenly spread)
    #[arg(long, value_delimiter = ',')]
    angles: Vec<f32>,

    /// Radius for every track (default: from config)
    #[arg(long)]
    radius: Option<f32>,

    /// JSON config with smoothing and clamp tunables
    #[arg(long)]
    config: Option<String>,

    /// Output JSON file path
    #[arg(short, long, default_value = "radar_prescan.json")]
    output: String,

    /// Include the per-frame intensity and direction timeline
    #[arg(long)]
    frame_by_frame: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TrackReport {
    track_id: TrackId,
    file: String,
    sample_rate: u32,
    duration_seconds: f32,
    angle_degrees: f32,
    radius: f32,
    frames: usize,
    peak_rms: f32,
    peak_intensity: f32,
    mean_intensity: f32,
    final_intensity: f32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TimelineFrame {
    timestamp: f32,
    intensities: Vec<f32>,
    direction: Option<Direction>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PrescanReport {
    config: RadarConfig,
    tracks: Vec<TrackReport>,
    final_direction: Option<Direction>,
    dropped_messages: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    timeline: Option<Vec<TimelineFrame>>,
}

#[derive(Default)]
struct TrackHistory {
    rms: Vec<f32>,
    intensity: Vec<f32>,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    info!("Dragon Radar pre-scan tool");
    info!("Input files: {}", args.input_files.join(", "));
    info!("Output file: {}", args.output);

    let mut config = RadarConfig::load_or_default(args.config.as_deref())?;
    let report = prescan(&args, &mut config)?;

    for track in &report.tracks {
        info!(
            "{} ({}): {} frames, peak rms {:.3}, peak intensity {:.3}, mean {:.3}",
            track.track_id,
            track.file,
            track.frames,
            track.peak_rms,
            track.peak_intensity,
            track.mean_intensity
        );
    }
    match report.final_direction {
        Some(dir) => info!(
            "Final direction: {:.1}° magnitude {:.3}",
            dir.angle.to_degrees(),
            dir.magnitude
        ),
        None => info!("Final direction: undefined (no weight)"),
    }

    let json = serde_json::to_string_pretty(&report)?;
    std::fs::write(&args.output, json)
        .with_context(|| format!("Failed to write {}", args.output))?;
    info!("✅ Report saved to {}", args.output);

    Ok(())
}

fn prescan(args: &Args, config: &mut RadarConfig) -> Result<PrescanReport> {
    let mut sources = Vec::with_capacity(args.input_files.len());
    for path in &args.input_files {
        sources.push(WavFileSource::open(path)?);
    }

    // Offline runs are unpaced, so the channel must hold every frame of every
    // file or the pump falls behind and drops messages.
    let total_messages: usize = sources
        .iter()
        .map(|s| (s.duration_seconds() * s.sample_rate() as f32) as usize / config.frame_size + 4)
        .sum();
    config.channel_capacity = config.channel_capacity.max(total_messages);

    let mut radar = Radar::new(config.clone());
    let radius = args.radius.unwrap_or(config.default_radius);
    let count = sources.len();

    let mut tracks = Vec::with_capacity(count);
    for (i, source) in sources.into_iter().enumerate() {
        let angle_degrees = args
            .angles
            .get(i)
            .copied()
            .unwrap_or(360.0 * i as f32 / count as f32);
        let id = radar.register();
        radar.set_angle_and_radius(id, angle_degrees.to_radians(), radius);

        let sample_rate = source.sample_rate();
        let duration_seconds = source.duration_seconds();
        if !radar.attach(id, Box::new(source), Box::new(NullSink), Pacing::Unpaced) {
            warn!("⚠️  {} will report zero intensity", args.input_files[i]);
        }
        tracks.push((id, args.input_files[i].clone(), sample_rate, duration_seconds, angle_degrees));
    }

    let mut history: HashMap<TrackId, TrackHistory> = HashMap::new();
    let mut record = |event: RadarEvent| match event {
        RadarEvent::Rms { track_id, rms } => history.entry(track_id).or_default().rms.push(rms),
        RadarEvent::Intensity {
            track_id,
            intensity,
        } => history.entry(track_id).or_default().intensity.push(intensity),
        _ => {}
    };

    let started = Instant::now();
    while radar.active_chains() > 0 {
        radar.pump(&mut record);
        std::thread::sleep(Duration::from_millis(1));
    }
    info!("Analysis finished in {:.2}s", started.elapsed().as_secs_f32());

    let timeline = args
        .frame_by_frame
        .then(|| build_timeline(&radar, &tracks, &history));

    let reports = tracks
        .iter()
        .map(|(id, file, sample_rate, duration_seconds, angle_degrees)| {
            let h = history.get(id);
            let rms = h.map(|h| h.rms.as_slice()).unwrap_or(&[]);
            let intensity = h.map(|h| h.intensity.as_slice()).unwrap_or(&[]);
            TrackReport {
                track_id: *id,
                file: file.clone(),
                sample_rate: *sample_rate,
                duration_seconds: *duration_seconds,
                angle_degrees: *angle_degrees,
                radius: radar.registry().get(*id).map_or(0.0, |t| t.radius()),
                frames: intensity.len(),
                peak_rms: rms.iter().fold(0.0f32, |a, &b| a.max(b)),
                peak_intensity: intensity.iter().fold(0.0f32, |a, &b| a.max(b)),
                mean_intensity: if intensity.is_empty() {
                    0.0
                } else {
                    intensity.iter().sum::<f32>() / intensity.len() as f32
                },
                final_intensity: radar.registry().get(*id).map_or(0.0, |t| t.intensity()),
            }
        })
        .collect();

    Ok(PrescanReport {
        config: config.clone(),
        tracks: reports,
        final_direction: radar.direction(),
        dropped_messages: radar.dropped_messages(),
        timeline,
    })
}

/// Align tracks by frame index and recompute the direction at every frame.
/// A track that already ended holds its last intensity.
fn build_timeline(
    radar: &Radar,
    tracks: &[(TrackId, String, u32, f32, f32)],
    history: &HashMap<TrackId, TrackHistory>,
) -> Vec<TimelineFrame> {
    let frames = history.values().map(|h| h.intensity.len()).max().unwrap_or(0);
    let sample_rate = tracks.first().map_or(44100, |t| t.2).max(1);
    let frame_size = radar.config().frame_size;
    let max_magnitude = radar.config().max_magnitude;

    (0..frames)
        .map(|k| {
            let intensities: Vec<f32> = tracks
                .iter()
                .map(|(id, ..)| {
                    history
                        .get(id)
                        .and_then(|h| h.intensity.get(k).or(h.intensity.last()))
                        .copied()
                        .unwrap_or(0.0)
                })
                .collect();

            let contributions = tracks.iter().zip(&intensities).map(|((id, ..), &i)| {
                let track = radar.registry().get(*id);
                let radius = track.map_or(0.0, |t| t.radius());
                let angle = track.map_or(0.0, |t| t.angle());
                (i * radius, angle)
            });

            TimelineFrame {
                timestamp: (k * frame_size) as f32 / sample_rate as f32,
                direction: resultant(contributions, max_magnitude),
                intensities,
            }
        })
        .collect()
}
