use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, Sender};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::audio::{
    AnalysisMessage, EnvelopeSmoother, FrameSource, MessageKind, MessagePort, RmsExtractor,
};
use crate::config::RadarConfig;
use crate::radar::{aggregate_direction, Direction, TrackId, TrackRegistry, TrackUpdate};

/// Destination of the pass-through audio after the analysis tap.
pub trait FrameSink: Send {
    fn write(&mut self, frame: &[f32]);
}

/// Discards the pass-through audio (analysis only).
pub struct NullSink;

impl FrameSink for NullSink {
    fn write(&mut self, _frame: &[f32]) {}
}

impl FrameSink for Vec<f32> {
    fn write(&mut self, frame: &[f32]) {
        self.extend_from_slice(frame);
    }
}

/// How a chain thread schedules its frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pacing {
    /// One frame per frame period of the source's sample rate, like a host
    /// audio clock
    Realtime,
    /// As fast as the source delivers, for offline analysis
    Unpaced,
}

/// One track's audio-domain worker: source -> RMS tap -> sink.
pub struct AnalysisChain {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    track: TrackId,
}

impl AnalysisChain {
    pub fn spawn(
        source: Box<dyn FrameSource>,
        sink: Box<dyn FrameSink>,
        port: MessagePort,
        frame_size: usize,
        pacing: Pacing,
    ) -> Result<Self> {
        let track = port.track();
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();

        let handle = thread::Builder::new()
            .name(format!("radar-{}", track))
            .spawn(move || run_chain(source, sink, port, frame_size.max(1), pacing, stop_flag))
            .with_context(|| format!("Failed to spawn analysis thread for {}", track))?;

        Ok(Self {
            stop,
            handle: Some(handle),
            track,
        })
    }

    pub fn track(&self) -> TrackId {
        self.track
    }

    /// True once the worker has exited on its own (end of stream).
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }

    /// Stop the worker and wait for it. After this returns nothing from
    /// this chain can post again.
    pub fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Analysis thread for {} panicked", self.track);
            }
        }
    }
}

impl Drop for AnalysisChain {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_chain(
    mut source: Box<dyn FrameSource>,
    mut sink: Box<dyn FrameSink>,
    port: MessagePort,
    frame_size: usize,
    pacing: Pacing,
    stop: Arc<AtomicBool>,
) {
    // Buffers are sized once; the loop below never allocates.
    let mut input = vec![0.0f32; frame_size];
    let mut output = vec![0.0f32; frame_size];
    let frame_period =
        Duration::from_secs_f64(frame_size as f64 / source.sample_rate().max(1) as f64);

    let mut extractor = RmsExtractor::new(port);
    extractor.post(MessageKind::Ready);

    let mut deadline = Instant::now();
    while !stop.load(Ordering::Acquire) {
        let Some(n) = source.next_frame(&mut input) else {
            extractor.post(MessageKind::Ended);
            break;
        };
        let n = n.min(frame_size);

        extractor.process(&input[..n], &mut output[..n]);
        sink.write(&output[..n]);

        if !extractor.is_connected() {
            break;
        }

        if pacing == Pacing::Realtime {
            deadline += frame_period;
            let now = Instant::now();
            if deadline > now {
                thread::sleep(deadline - now);
            } else {
                deadline = now;
            }
        }
    }
}

/// Update emitted to visualization/store consumers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum RadarEvent {
    Ready { track_id: TrackId },
    Rms { track_id: TrackId, rms: f32 },
    Intensity { track_id: TrackId, intensity: f32 },
    Ended { track_id: TrackId },
}

impl RadarEvent {
    pub fn track_id(&self) -> TrackId {
        match *self {
            RadarEvent::Ready { track_id }
            | RadarEvent::Rms { track_id, .. }
            | RadarEvent::Intensity { track_id, .. }
            | RadarEvent::Ended { track_id } => track_id,
        }
    }
}

struct Slot {
    /// Only messages carrying this generation are accepted
    generation: u64,
    chain: Option<AnalysisChain>,
}

/// UI-domain owner of the registry and every track's analysis chain.
///
/// All registry writes happen in [`Radar::pump`] on the owning thread; the
/// audio domain only ever posts messages into the bounded channel.
pub struct Radar {
    config: RadarConfig,
    registry: TrackRegistry,
    smoother: EnvelopeSmoother,
    sender: Sender<AnalysisMessage>,
    receiver: Receiver<AnalysisMessage>,
    dropped: Arc<AtomicU64>,
    reported_drops: u64,
    slots: HashMap<TrackId, Slot>,
    next_generation: u64,
}

impl Radar {
    pub fn new(config: RadarConfig) -> Self {
        let (sender, receiver) = crossbeam_channel::bounded(config.channel_capacity.max(1));
        Self {
            registry: TrackRegistry::new(&config),
            smoother: EnvelopeSmoother::new(config.smoothing),
            config,
            sender,
            receiver,
            dropped: Arc::new(AtomicU64::new(0)),
            reported_drops: 0,
            slots: HashMap::new(),
            next_generation: 0,
        }
    }

    pub fn config(&self) -> &RadarConfig {
        &self.config
    }

    /// Read-only view for visualization
    pub fn registry(&self) -> &TrackRegistry {
        &self.registry
    }

    pub fn register(&mut self) -> TrackId {
        let id = self.registry.register();
        debug!("Registered {}", id);
        id
    }

    /// Tear down the track's chain, then forget the track.
    pub fn unregister(&mut self, id: TrackId) -> bool {
        if let Some(mut slot) = self.slots.remove(&id) {
            if let Some(mut chain) = slot.chain.take() {
                chain.shutdown();
            }
        }
        let removed = self.registry.unregister(id);
        if removed {
            info!("Unregistered {}", id);
        }
        removed
    }

    pub fn update(&mut self, id: TrackId, update: TrackUpdate) -> bool {
        self.registry.update(id, update)
    }

    pub fn set_angle_and_radius(&mut self, id: TrackId, angle: f32, radius: f32) -> bool {
        self.registry.set_angle_and_radius(id, angle, radius)
    }

    pub fn set_all_playing(&mut self, is_playing: bool) {
        self.registry.set_all_playing(is_playing);
    }

    pub fn reset_all(&mut self) {
        self.registry.reset_all();
    }

    /// Start analysing `source` for track `id`.
    ///
    /// Any previous chain of the track is shut down first, so two chains never
    /// write into one track. Returns false if the track is unknown or the
    /// chain could not start; the track then simply stays at zero intensity.
    pub fn attach(
        &mut self,
        id: TrackId,
        source: Box<dyn FrameSource>,
        sink: Box<dyn FrameSink>,
        pacing: Pacing,
    ) -> bool {
        let Some(port) = self.open_port(id) else {
            warn!("Cannot attach a source to unknown {}", id);
            return false;
        };

        match AnalysisChain::spawn(source, sink, port, self.config.frame_size, pacing) {
            Ok(chain) => {
                if let Some(slot) = self.slots.get_mut(&id) {
                    slot.chain = Some(chain);
                }
                self.registry.update(id, TrackUpdate::playing(true));
                info!("🎚️ Attached analysis chain to {}", id);
                true
            }
            Err(e) => {
                warn!("⚠️  Analysis disabled for {}: {:#}", id, e);
                false
            }
        }
    }

    /// Fresh message port for an audio-domain driver the caller runs itself,
    /// such as a device callback.
    ///
    /// Any existing chain is shut down and messages from earlier ports of the
    /// track are ignored from now on.
    pub fn open_port(&mut self, id: TrackId) -> Option<MessagePort> {
        if !self.registry.contains(id) {
            return None;
        }
        self.detach(id);
        let generation = self.bump_generation();
        self.slots.insert(
            id,
            Slot {
                generation,
                chain: None,
            },
        );
        Some(MessagePort::new(
            self.sender.clone(),
            id,
            generation,
            self.dropped.clone(),
        ))
    }

    /// Stop analysing the track without unregistering it.
    pub fn detach(&mut self, id: TrackId) {
        let generation = self.bump_generation();
        if let Some(slot) = self.slots.get_mut(&id) {
            slot.generation = generation;
            if let Some(mut chain) = slot.chain.take() {
                chain.shutdown();
                debug!("Detached analysis chain from {}", id);
            }
        }
    }

    fn bump_generation(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }

    fn accepts(&self, message: &AnalysisMessage) -> bool {
        self.slots
            .get(&message.track)
            .is_some_and(|slot| slot.generation == message.generation)
    }

    /// Drain every pending message without blocking.
    ///
    /// Each accepted RMS value is smoothed into the registry and reported as
    /// an `Rms` then an `Intensity` event. Messages from detached chains or
    /// unregistered tracks are discarded. Returns the number of messages
    /// drained.
    pub fn pump<F>(&mut self, mut on_event: F) -> usize
    where
        F: FnMut(RadarEvent),
    {
        // A chain that exited before this drain has every message it will
        // ever send already queued, including an Ended that may have been
        // dropped on a full channel.
        let finished: Vec<TrackId> = self
            .slots
            .iter()
            .filter(|(_, slot)| slot.chain.as_ref().is_some_and(|c| c.is_finished()))
            .map(|(id, _)| *id)
            .collect();

        let mut drained = 0;
        while let Ok(message) = self.receiver.try_recv() {
            drained += 1;
            if !self.accepts(&message) {
                continue;
            }
            let track_id = message.track;

            match message.kind {
                MessageKind::Ready => {
                    debug!("Analysis chain for {} is ready", track_id);
                    on_event(RadarEvent::Ready { track_id });
                }
                MessageKind::Rms(rms) => {
                    let Some(intensity) = self.smoother.apply(&mut self.registry, track_id, rms)
                    else {
                        continue;
                    };
                    on_event(RadarEvent::Rms { track_id, rms });
                    on_event(RadarEvent::Intensity {
                        track_id,
                        intensity,
                    });
                }
                MessageKind::Ended => {
                    if self.finish_chain(track_id) {
                        on_event(RadarEvent::Ended { track_id });
                    }
                }
            }
        }

        for track_id in finished {
            if self.finish_chain(track_id) {
                on_event(RadarEvent::Ended { track_id });
            }
        }

        let dropped = self.dropped.load(Ordering::Relaxed);
        if dropped > self.reported_drops {
            warn!(
                "Dropped {} analysis messages (channel full); pump more often or raise channel_capacity",
                dropped - self.reported_drops
            );
            self.reported_drops = dropped;
        }

        drained
    }

    /// Join a chain that reached end of stream. False if there was none.
    fn finish_chain(&mut self, id: TrackId) -> bool {
        let Some(mut chain) = self.slots.get_mut(&id).and_then(|s| s.chain.take()) else {
            return false;
        };
        chain.shutdown();
        self.registry.update(id, TrackUpdate::playing(false));
        info!("Source for {} ended", id);
        true
    }

    /// True while the track has a live chain
    pub fn is_attached(&self, id: TrackId) -> bool {
        self.slots.get(&id).is_some_and(|s| s.chain.is_some())
    }

    pub fn active_chains(&self) -> usize {
        self.slots.values().filter(|s| s.chain.is_some()).count()
    }

    /// Weighted resultant of all tracks, `None` when undefined
    pub fn direction(&self) -> Option<Direction> {
        aggregate_direction(self.registry.iter(), self.config.max_magnitude)
    }

    /// Messages lost to a full channel since start
    pub fn dropped_messages(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Stop every chain. Tracks stay registered.
    pub fn shutdown(&mut self) {
        let ids: Vec<TrackId> = self.slots.keys().copied().collect();
        for id in ids {
            self.detach(id);
        }
    }
}

impl Drop for Radar {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::BufferSource;
    use std::f32::consts::FRAC_PI_2;
    use std::sync::atomic::AtomicUsize;

    const FRAME: usize = 128;

    fn levels_source(levels: &[f32]) -> Box<dyn FrameSource> {
        Box::new(BufferSource::from_levels(levels, FRAME, 44100))
    }

    /// Pump until `done` holds, giving the chain threads time to run.
    fn pump_until<F>(radar: &mut Radar, events: &mut Vec<RadarEvent>, mut done: F)
    where
        F: FnMut(&[RadarEvent]) -> bool,
    {
        let deadline = Instant::now() + Duration::from_secs(10);
        while !done(events.as_slice()) {
            assert!(Instant::now() < deadline, "timed out waiting for radar events");
            radar.pump(|e| events.push(e));
            thread::sleep(Duration::from_millis(1));
        }
    }

    fn ended(id: TrackId) -> impl FnMut(&[RadarEvent]) -> bool {
        move |events| events.contains(&RadarEvent::Ended { track_id: id })
    }

    fn intensities(events: &[RadarEvent], id: TrackId) -> Vec<f32> {
        events
            .iter()
            .filter_map(|e| match *e {
                RadarEvent::Intensity {
                    track_id,
                    intensity,
                } if track_id == id => Some(intensity),
                _ => None,
            })
            .collect()
    }

    struct CountingSink(Arc<AtomicUsize>);

    impl FrameSink for CountingSink {
        fn write(&mut self, frame: &[f32]) {
            self.0.fetch_add(frame.len(), Ordering::Relaxed);
        }
    }

    #[test]
    fn test_single_track_end_to_end() {
        let mut radar = Radar::new(RadarConfig::default());
        let id = radar.register();

        let mut levels = vec![0.0; 29];
        levels.push(0.8);
        let written = Arc::new(AtomicUsize::new(0));
        assert!(radar.attach(
            id,
            levels_source(&levels),
            Box::new(CountingSink(written.clone())),
            Pacing::Unpaced,
        ));
        assert!(radar.registry().get(id).unwrap().is_playing());

        let mut events = Vec::new();
        pump_until(&mut radar, &mut events, ended(id));

        assert_eq!(events[0], RadarEvent::Ready { track_id: id });
        let values = intensities(&events, id);
        assert_eq!(values.len(), 30);
        assert!(values[..29].iter().all(|&v| v == 0.0));
        assert!((values[29] - 0.24).abs() < 1e-5);

        let track = radar.registry().get(id).unwrap();
        assert!((track.raw_rms() - 0.8).abs() < 1e-5);
        assert!(!track.is_playing());
        assert!(!radar.is_attached(id));
        assert_eq!(written.load(Ordering::Relaxed), 30 * FRAME);
    }

    #[test]
    fn test_rms_precedes_intensity() {
        let mut radar = Radar::new(RadarConfig::default());
        let id = radar.register();
        radar.attach(id, levels_source(&[0.5]), Box::new(NullSink), Pacing::Unpaced);

        let mut events = Vec::new();
        pump_until(&mut radar, &mut events, ended(id));
        let kinds: Vec<&str> = events
            .iter()
            .map(|e| match e {
                RadarEvent::Ready { .. } => "ready",
                RadarEvent::Rms { .. } => "rms",
                RadarEvent::Intensity { .. } => "intensity",
                RadarEvent::Ended { .. } => "ended",
            })
            .collect();
        assert_eq!(kinds, vec!["ready", "rms", "intensity", "ended"]);
    }

    #[test]
    fn test_two_tracks_direction() {
        let mut radar = Radar::new(RadarConfig::default());
        let a = radar.register();
        let b = radar.register();
        radar.set_angle_and_radius(a, 0.0, 3.0);
        radar.set_angle_and_radius(b, FRAC_PI_2, 3.0);
        assert_eq!(radar.direction(), None);

        radar.attach(a, levels_source(&[0.5; 10]), Box::new(NullSink), Pacing::Unpaced);
        radar.attach(b, levels_source(&[0.5; 10]), Box::new(NullSink), Pacing::Unpaced);
        assert_eq!(radar.active_chains(), 2);

        let mut events = Vec::new();
        pump_until(&mut radar, &mut events, |ev| {
            ev.contains(&RadarEvent::Ended { track_id: a })
                && ev.contains(&RadarEvent::Ended { track_id: b })
        });

        let ia = radar.registry().get(a).unwrap().intensity();
        let ib = radar.registry().get(b).unwrap().intensity();
        assert!((ia - ib).abs() < 1e-6);

        let dir = radar.direction().unwrap();
        assert!((dir.angle - std::f32::consts::FRAC_PI_4).abs() < 1e-4);
        assert!(dir.magnitude <= radar.config().max_magnitude);
    }

    #[test]
    fn test_unregister_discards_late_messages() {
        let mut radar = Radar::new(RadarConfig::default());
        let id = radar.register();
        let port = radar.open_port(id).unwrap();

        port.post(MessageKind::Rms(0.9));
        assert!(radar.unregister(id));
        port.post(MessageKind::Rms(0.9));

        let mut events = Vec::new();
        assert_eq!(radar.pump(|e| events.push(e)), 2);
        assert!(events.is_empty());
        assert!(radar.registry().get(id).is_none());
        assert!(!radar.update(id, TrackUpdate::angle(1.0)));
    }

    #[test]
    fn test_replacing_source_ignores_old_chain() {
        let mut radar = Radar::new(RadarConfig::default());
        let id = radar.register();
        let old_port = radar.open_port(id).unwrap();
        let new_port = radar.open_port(id).unwrap();

        old_port.post(MessageKind::Rms(1.0));
        new_port.post(MessageKind::Rms(0.5));

        let mut events = Vec::new();
        radar.pump(|e| events.push(e));
        assert_eq!(
            events,
            vec![
                RadarEvent::Rms { track_id: id, rms: 0.5 },
                RadarEvent::Intensity { track_id: id, intensity: 0.15 },
            ]
        );
    }

    #[test]
    fn test_attach_replaces_running_chain() {
        let mut radar = Radar::new(RadarConfig::default());
        let id = radar.register();

        // A looping source never ends on its own
        let endless = Box::new(BufferSource::new(vec![0.9; FRAME], 44100).looping(true));
        assert!(radar.attach(id, endless, Box::new(NullSink), Pacing::Realtime));
        thread::sleep(Duration::from_millis(20));

        assert!(radar.attach(id, levels_source(&[0.0; 5]), Box::new(NullSink), Pacing::Unpaced));
        assert_eq!(radar.active_chains(), 1);

        let mut events = Vec::new();
        pump_until(&mut radar, &mut events, ended(id));
        // Only the second chain's silence got through
        assert!(events
            .iter()
            .all(|e| !matches!(e, RadarEvent::Rms { rms, .. } if *rms > 0.0)));
        assert_eq!(intensities(&events, id).len(), 5);
    }

    #[test]
    fn test_attach_unknown_track_fails_softly() {
        let mut radar = Radar::new(RadarConfig::default());
        let id = radar.register();
        radar.unregister(id);
        assert!(!radar.attach(id, levels_source(&[0.5]), Box::new(NullSink), Pacing::Unpaced));
        assert_eq!(radar.active_chains(), 0);
    }

    #[test]
    fn test_detach_stops_updates() {
        let mut radar = Radar::new(RadarConfig::default());
        let id = radar.register();
        let endless = Box::new(BufferSource::new(vec![0.5; FRAME], 44100).looping(true));
        radar.attach(id, endless, Box::new(NullSink), Pacing::Realtime);
        thread::sleep(Duration::from_millis(10));

        radar.detach(id);
        assert!(!radar.is_attached(id));
        radar.pump(|_| {});
        let before = radar.registry().get(id).unwrap().clone();
        thread::sleep(Duration::from_millis(10));
        radar.pump(|_| {});
        assert_eq!(radar.registry().get(id).unwrap(), &before);
    }

    #[test]
    fn test_full_channel_counts_drops() {
        let config = RadarConfig {
            channel_capacity: 4,
            ..RadarConfig::default()
        };
        let mut radar = Radar::new(config);
        let id = radar.register();
        let port = radar.open_port(id).unwrap();
        for _ in 0..10 {
            port.post(MessageKind::Rms(0.3));
        }
        assert_eq!(radar.dropped_messages(), 6);
        assert_eq!(radar.pump(|_| {}), 4);
    }

    #[test]
    fn test_event_json_shape() {
        let event = RadarEvent::Intensity {
            track_id: TrackId(3),
            intensity: 0.5,
        };
        let json = serde_json::to_value(event).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "type": "intensity", "trackId": "track-3", "intensity": 0.5 })
        );
    }
}
