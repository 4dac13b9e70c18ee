//! Real-time loudness envelopes for a multi-track radar display.
//!
//! Each track's samples are reduced to one RMS value per frame on an audio
//! thread, posted over a bounded channel, smoothed with an attack/decay
//! envelope on the owning thread and stored in a [`TrackRegistry`]. The
//! registry snapshot feeds a weighted circular mean that points the radar's
//! "average" arrow.
//!
//! ```rust,no_run
//! use dragon_radar::{BufferSource, NullSink, Pacing, Radar, RadarConfig};
//!
//! let mut radar = Radar::new(RadarConfig::default());
//! let kick = radar.register();
//! radar.set_angle_and_radius(kick, 0.0, 3.0);
//! radar.attach(
//!     kick,
//!     Box::new(BufferSource::new(vec![0.5; 44100], 44100)),
//!     Box::new(NullSink),
//!     Pacing::Realtime,
//! );
//!
//! // Once per animation frame:
//! radar.pump(|event| println!("{:?}", event));
//! if let Some(direction) = radar.direction() {
//!     println!("arrow at {:.2} rad", direction.angle);
//! }
//! ```

pub mod audio;
pub mod config;
pub mod pipeline;
pub mod radar;

pub use audio::{BufferSource, EnvelopeSmoother, FrameSource, RmsWindow, WavFileSource};
pub use config::{RadarConfig, SmoothingParams};
pub use pipeline::{AnalysisChain, FrameSink, NullSink, Pacing, Radar, RadarEvent};
pub use radar::{aggregate_direction, Direction, DirectionTracker, Track, TrackId, TrackRegistry, TrackUpdate};
