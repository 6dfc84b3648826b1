use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, SyncSender};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use parking_lot::Mutex;

use crate::models::config::RenderConfiguration;
use crate::models::error::StreamError;
use crate::models::events::PlaybackStopped;
use crate::models::format::AudioFormat;
use crate::models::state::{AtomicPlaybackState, PlaybackState};
use crate::processing::format_converter::ConvertingSource;
use crate::render::negotiation::negotiate;
use crate::traits::clock::{Clock, SystemClock};
use crate::traits::observers::PlaybackObserver;
use crate::traits::render_device::{BufferEvent, RenderDevice, StreamParams};
use crate::traits::wave_source::WaveSource;

/// Below this many free frames a refill is skipped.
const MIN_REFILL_FRAMES: u32 = 5;

type SharedSource = Arc<Mutex<Box<dyn WaveSource>>>;

/// Everything `initialize` sets up and `dispose` tears down.
#[derive(Default)]
struct Session {
    source: Option<SharedSource>,
    format: Option<AudioFormat>,
    /// Effective latency (configured, or what the device reported).
    latency: Duration,
    event: Option<Arc<dyn BufferEvent>>,
    worker: Option<JoinHandle<()>>,
    initialized: bool,
}

/// Plays a [`WaveSource`] on a [`RenderDevice`] from a background thread.
///
/// ```text
/// initialize(source) → negotiate format → open hardware stream
/// play()  → spawn playback thread, wait until it is running
/// pause() / resume() / stop() / dispose()
/// ```
///
/// Control methods are serialized by one session lock and must not be called
/// from the playback thread (including from a [`PlaybackObserver`]); such
/// calls fail with [`StreamError::InvalidCallContext`].
pub struct RenderEngine<D: RenderDevice + 'static> {
    config: RenderConfiguration,
    device: Arc<Mutex<D>>,
    clock: Arc<dyn Clock>,
    state: Arc<AtomicPlaybackState>,
    session: Mutex<Session>,
    observers: Arc<Mutex<Vec<Arc<dyn PlaybackObserver>>>>,
    worker_thread: Arc<Mutex<Option<ThreadId>>>,
    disposed: AtomicBool,
}

impl<D: RenderDevice + 'static> RenderEngine<D> {
    pub fn new(device: D, config: RenderConfiguration) -> Result<Self, StreamError> {
        Self::with_clock(device, config, Arc::new(SystemClock))
    }

    pub fn with_clock(device: D, config: RenderConfiguration, clock: Arc<dyn Clock>) -> Result<Self, StreamError> {
        config.validate().map_err(StreamError::ConfigurationFailed)?;
        Ok(Self {
            device: Arc::new(Mutex::new(device)),
            clock,
            state: Arc::new(AtomicPlaybackState::new(PlaybackState::Stopped)),
            session: Mutex::new(Session {
                latency: config.latency,
                ..Default::default()
            }),
            observers: Arc::new(Mutex::new(Vec::new())),
            worker_thread: Arc::new(Mutex::new(None)),
            disposed: AtomicBool::new(false),
            config,
        })
    }

    pub fn add_observer(&self, observer: Arc<dyn PlaybackObserver>) {
        self.observers.lock().push(observer);
    }

    pub fn config(&self) -> &RenderConfiguration {
        &self.config
    }

    /// Current state; never blocks.
    pub fn state(&self) -> PlaybackState {
        self.state.load()
    }

    pub fn is_initialized(&self) -> bool {
        self.session.lock().initialized
    }

    /// Format the hardware stream was opened with.
    pub fn output_format(&self) -> Option<AudioFormat> {
        self.session.lock().format
    }

    /// Latency the playback thread paces itself by.
    pub fn latency(&self) -> Duration {
        self.session.lock().latency
    }

    /// Whether a playback thread handle is still held (it may be winding down).
    pub fn has_worker(&self) -> bool {
        self.session.lock().worker.is_some()
    }

    /// Negotiate a format for `source` and open the hardware stream.
    ///
    /// Only allowed while stopped. If the negotiated format differs from the
    /// source's, the source is wrapped in a [`ConvertingSource`].
    pub fn initialize<S: WaveSource + 'static>(&self, source: S) -> Result<(), StreamError> {
        self.check_thread()?;
        let mut session = self.session.lock();
        self.check_disposed()?;
        if !self.state.load().is_stopped() {
            return Err(StreamError::InvalidState(format!(
                "initialize requires a stopped engine, state is {:?}",
                self.state.load()
            )));
        }

        let requested = source.format();
        requested.validate().map_err(StreamError::UnsupportedFormat)?;

        // A worker that hit end of stream may still be draining.
        Self::join_worker(&mut session);
        self.release_session(&mut session);

        let resolution = {
            let device = self.device.lock();
            negotiate(&requested, &*device, self.config.share_mode)?
        };

        let source: Box<dyn WaveSource> = if resolution.requires_conversion {
            log::warn!(
                "Device does not accept {}, converting to {}",
                requested,
                resolution.format
            );
            Box::new(ConvertingSource::new(source, resolution.format)?)
        } else {
            Box::new(source)
        };

        let (latency, event) = match self.open_stream(&resolution.format) {
            Ok(opened) => opened,
            Err(e) => {
                self.device.lock().release();
                return Err(e);
            }
        };

        session.source = Some(Arc::new(Mutex::new(source)));
        session.format = Some(resolution.format);
        session.latency = latency;
        session.event = event;
        session.initialized = true;
        log::debug!(
            "Render engine initialized: {} ({:?}, latency {:?})",
            resolution.format,
            self.config.share_mode,
            latency
        );
        Ok(())
    }

    /// Start (or resume) playback.
    ///
    /// From stopped, spawns the playback thread and returns once it has
    /// started the hardware stream or failed to.
    pub fn play(&self) -> Result<(), StreamError> {
        self.check_thread()?;
        let mut session = self.session.lock();
        self.check_disposed()?;
        if !session.initialized {
            return Err(StreamError::NotInitialized);
        }

        match self.state.load() {
            PlaybackState::Playing => Ok(()),
            PlaybackState::Paused => {
                self.state.transition(PlaybackState::Paused, PlaybackState::Playing);
                Ok(())
            }
            PlaybackState::Stopped => {
                Self::join_worker(&mut session);

                let (format, source) = match (session.format, session.source.clone()) {
                    (Some(format), Some(source)) => (format, source),
                    _ => return Err(StreamError::NotInitialized),
                };
                let worker = PlaybackWorker {
                    device: Arc::clone(&self.device),
                    source,
                    state: Arc::clone(&self.state),
                    clock: Arc::clone(&self.clock),
                    observers: Arc::clone(&self.observers),
                    worker_thread: Arc::clone(&self.worker_thread),
                    event: session.event.clone(),
                    format,
                    latency: session.latency,
                    exclusive: self.config.is_exclusive(),
                };

                let (started_tx, started_rx) = mpsc::sync_channel(1);
                let handle = thread::Builder::new()
                    .name(self.config.thread_name.clone())
                    .spawn(move || worker.run(started_tx))
                    .map_err(|e| StreamError::Thread(format!("failed to spawn playback thread: {}", e)))?;
                session.worker = Some(handle);

                let started = started_rx
                    .recv()
                    .unwrap_or_else(|_| Err(StreamError::Thread("playback thread exited before starting".into())));
                if started.is_err() {
                    Self::join_worker(&mut session);
                }
                started
            }
        }
    }

    /// Pause playback. No-op unless playing.
    pub fn pause(&self) -> Result<(), StreamError> {
        self.check_thread()?;
        let session = self.session.lock();
        self.check_disposed()?;
        if !session.initialized {
            return Err(StreamError::NotInitialized);
        }
        if self.state.transition(PlaybackState::Playing, PlaybackState::Paused) {
            log::debug!("Playback paused");
        }
        Ok(())
    }

    /// Resume paused playback. No-op unless paused.
    pub fn resume(&self) -> Result<(), StreamError> {
        self.check_thread()?;
        let session = self.session.lock();
        self.check_disposed()?;
        if !session.initialized {
            return Err(StreamError::NotInitialized);
        }
        if self.state.transition(PlaybackState::Paused, PlaybackState::Playing) {
            log::debug!("Playback resumed");
        }
        Ok(())
    }

    /// Stop playback and wait for the playback thread to exit. Idempotent.
    pub fn stop(&self) -> Result<(), StreamError> {
        self.check_thread()?;
        let mut session = self.session.lock();
        self.check_disposed()?;
        self.state.store(PlaybackState::Stopped);
        // The worker never takes the session lock.
        Self::join_worker(&mut session);
        Ok(())
    }

    /// Stop playback and release the hardware stream. Idempotent.
    pub fn dispose(&self) -> Result<(), StreamError> {
        self.check_thread()?;
        let mut session = self.session.lock();
        if self.disposed.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.state.store(PlaybackState::Stopped);
        Self::join_worker(&mut session);
        self.release_session(&mut session);
        self.disposed.store(true, Ordering::SeqCst);
        log::debug!("Render engine disposed");
        Ok(())
    }

    // --- Internal helpers ---

    fn check_thread(&self) -> Result<(), StreamError> {
        if *self.worker_thread.lock() == Some(thread::current().id()) {
            return Err(StreamError::InvalidCallContext);
        }
        Ok(())
    }

    fn check_disposed(&self) -> Result<(), StreamError> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(StreamError::ObjectDisposed("RenderEngine"));
        }
        Ok(())
    }

    fn join_worker(session: &mut Session) {
        if let Some(handle) = session.worker.take() {
            if handle.join().is_err() {
                log::error!("Playback thread panicked");
            }
        }
    }

    fn release_session(&self, session: &mut Session) {
        if session.initialized {
            self.device.lock().release();
        }
        session.source = None;
        session.format = None;
        session.event = None;
        session.latency = self.config.latency;
        session.initialized = false;
    }

    /// Initialize the hardware stream, retrying once with an aligned
    /// buffer duration. Returns the effective latency and the buffer event.
    fn open_stream(&self, format: &AudioFormat) -> Result<(Duration, Option<Arc<dyn BufferEvent>>), StreamError> {
        let mut device = self.device.lock();
        let mut buffer_duration = self.config.latency;

        let params = |buffer_duration: Duration| {
            let (buffer_duration, periodicity) = match (self.config.is_event_driven(), self.config.is_exclusive()) {
                (false, _) => (buffer_duration, Duration::ZERO),
                (true, true) => (buffer_duration, buffer_duration),
                // Shared event-driven streams let the engine pick the buffer.
                (true, false) => (Duration::ZERO, Duration::ZERO),
            };
            StreamParams {
                share_mode: self.config.share_mode,
                format: *format,
                buffer_duration,
                periodicity,
                event_callback: self.config.is_event_driven(),
            }
        };

        match device.initialize(&params(buffer_duration)) {
            Ok(()) => {}
            Err(StreamError::BufferSizeNotAligned) => {
                let frames = device.buffer_size()?;
                buffer_duration = aligned_duration(frames, format.sample_rate);
                log::warn!(
                    "Buffer size not aligned, retrying with {} frames ({:?})",
                    frames,
                    buffer_duration
                );
                device.initialize(&params(buffer_duration))?;
            }
            Err(e) => return Err(e),
        }

        let reported = device.stream_latency();
        let latency = if reported.is_zero() {
            self.config.latency
        } else {
            reported
        };

        let event = if self.config.is_event_driven() {
            Some(device.create_event_handle()?)
        } else {
            None
        };

        Ok((latency, event))
    }
}

impl<D: RenderDevice + 'static> Drop for RenderEngine<D> {
    fn drop(&mut self) {
        if let Err(e) = self.dispose() {
            log::warn!("Render engine dropped without disposal: {}", e);
        }
    }
}

/// Duration of `frames` at `sample_rate`, rounded to the nearest 100 ns.
fn aligned_duration(frames: u32, sample_rate: u32) -> Duration {
    let ticks = (10_000_000.0 * frames as f64 / sample_rate.max(1) as f64 + 0.5) as u64;
    Duration::from_nanos(ticks * 100)
}

/// State moved onto the playback thread.
struct PlaybackWorker<D: RenderDevice> {
    device: Arc<Mutex<D>>,
    source: SharedSource,
    state: Arc<AtomicPlaybackState>,
    clock: Arc<dyn Clock>,
    observers: Arc<Mutex<Vec<Arc<dyn PlaybackObserver>>>>,
    worker_thread: Arc<Mutex<Option<ThreadId>>>,
    event: Option<Arc<dyn BufferEvent>>,
    format: AudioFormat,
    latency: Duration,
    exclusive: bool,
}

impl<D: RenderDevice> PlaybackWorker<D> {
    fn run(self, started: SyncSender<Result<(), StreamError>>) {
        *self.worker_thread.lock() = Some(thread::current().id());

        let mut started = Some(started);
        let mut registered = false;
        let result = self.playback(&mut started, &mut registered);

        self.state.store(PlaybackState::Stopped);
        if registered {
            self.device.lock().leave_render_thread();
        }

        if let Err(ref e) = result {
            log::error!("Playback thread failed: {}", e);
        }
        if let Some(started) = started.take() {
            let _ = started.send(result.clone());
        }

        let event = PlaybackStopped { error: result.err() };
        let observers = self.observers.lock().clone();
        for observer in &observers {
            observer.on_stopped(&event);
        }
        log::debug!("Playback thread exited");
    }

    fn playback(
        &self,
        started: &mut Option<SyncSender<Result<(), StreamError>>>,
        registered: &mut bool,
    ) -> Result<(), StreamError> {
        let buffer_frames = {
            let mut device = self.device.lock();
            device.enter_render_thread(self.latency)?;
            *registered = true;
            let buffer_frames = device.buffer_size()?;
            device.start()?;
            buffer_frames
        };
        self.state.store(PlaybackState::Playing);
        if let Some(started) = started.take() {
            let _ = started.send(Ok(()));
        }

        let frame_size = self.format.block_align();
        let mut buffer = vec![0u8; buffer_frames as usize * frame_size];
        let result = self.render_loop(&mut buffer, buffer_frames, frame_size);

        // Let queued frames play out.
        self.clock.sleep(self.latency / 2);

        let mut device = self.device.lock();
        let stopped = device.stop();
        let reset = device.reset();
        result.and(stopped).and(reset)
    }

    fn render_loop(&self, buffer: &mut [u8], buffer_frames: u32, frame_size: usize) -> Result<(), StreamError> {
        let exclusive_event = self.exclusive && self.event.is_some();
        let mut device_halted = false;

        while !self.state.load().is_stopped() {
            match &self.event {
                Some(event) => {
                    let signaled = event.wait(self.latency * 3);
                    // A device halted for pause must still be restarted below.
                    if !signaled && !self.state.load().is_playing() && !device_halted {
                        continue;
                    }
                }
                None => self.clock.sleep((self.latency / 8).max(Duration::from_millis(1))),
            }

            match self.state.load() {
                PlaybackState::Playing => {
                    if device_halted {
                        self.device.lock().start()?;
                        device_halted = false;
                    }

                    let padding = if exclusive_event {
                        0
                    } else {
                        self.device.lock().current_padding()?
                    };
                    let free_frames = buffer_frames.saturating_sub(padding);
                    if free_frames <= MIN_REFILL_FRAMES {
                        continue;
                    }

                    if !self.refill(buffer, free_frames, frame_size, exclusive_event)? {
                        log::debug!("Source exhausted, stopping playback");
                        self.state.store(PlaybackState::Stopped);
                    }
                }
                PlaybackState::Paused if self.exclusive && !device_halted => {
                    // Exclusive streams would loop the last buffer while paused.
                    self.device.lock().stop()?;
                    device_halted = true;
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Pull up to `frames` frames from the source into the device.
    ///
    /// Returns `false` at end of stream.
    fn refill(&self, buffer: &mut [u8], frames: u32, frame_size: usize, exclusive_event: bool) -> Result<bool, StreamError> {
        let count = (frames as usize * frame_size).min(buffer.len());
        if count == 0 {
            return Ok(true);
        }

        let read = self.source.lock().read(&mut buffer[..count])?;
        if read == 0 {
            return Ok(false);
        }

        let frames_to_write = if exclusive_event && read < count {
            // Exclusive event-driven streams must be handed the full packet.
            buffer[read..count].fill(0);
            (count / frame_size) as u32
        } else {
            (read / frame_size) as u32
        };
        if frames_to_write == 0 {
            return Ok(true);
        }

        let bytes = frames_to_write as usize * frame_size;
        self.device.lock().write_frames(&buffer[..bytes], frames_to_write)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::config::TimingMode;
    use crate::models::format::{SampleEncoding, ShareMode};
    use crate::test_support::{
        EndlessSource, ManualClock, MockRenderDevice, RecordingPlaybackObserver, VecSource,
    };
    use std::sync::Weak;
    use std::time::Instant;

    fn stereo16() -> AudioFormat {
        AudioFormat::pcm(48000, 16, 2)
    }

    fn config() -> RenderConfiguration {
        RenderConfiguration {
            latency: Duration::from_millis(8),
            ..Default::default()
        }
    }

    fn engine(device: MockRenderDevice, config: RenderConfiguration) -> RenderEngine<MockRenderDevice> {
        RenderEngine::with_clock(device, config, Arc::new(ManualClock::new())).unwrap()
    }

    fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        false
    }

    #[test]
    fn play_writes_and_stop_joins() {
        let device = MockRenderDevice::supporting(stereo16());
        let engine = engine(device.clone(), config());
        let observer = Arc::new(RecordingPlaybackObserver::default());
        engine.add_observer(observer.clone());

        engine.initialize(EndlessSource::new(stereo16())).unwrap();
        engine.play().unwrap();
        assert_eq!(engine.state(), PlaybackState::Playing);
        assert!(wait_until(|| device.written_len() > 0));

        engine.stop().unwrap();
        assert_eq!(engine.state(), PlaybackState::Stopped);
        assert!(!engine.has_worker());

        let state = device.state();
        assert_eq!(state.start_count, 1);
        assert_eq!(state.stop_count, 1);
        assert_eq!(state.reset_count, 1);
        assert_eq!(state.enter_thread_count, 1);
        assert_eq!(state.leave_thread_count, 1);
        assert!(state.write_calls.iter().all(|&frames| frames == 480));
        drop(state);

        assert_eq!(observer.events(), vec![PlaybackStopped { error: None }]);
    }

    #[test]
    fn second_stop_is_a_no_op() {
        let device = MockRenderDevice::supporting(stereo16());
        let engine = engine(device.clone(), config());
        engine.initialize(EndlessSource::new(stereo16())).unwrap();
        engine.play().unwrap();

        engine.stop().unwrap();
        engine.stop().unwrap();

        assert_eq!(device.state().stop_count, 1);
    }

    #[test]
    fn play_then_immediate_stop_repeatedly() {
        let device = MockRenderDevice::supporting(stereo16());
        let engine = engine(device.clone(), config());
        engine.initialize(EndlessSource::new(stereo16())).unwrap();

        for _ in 0..20 {
            engine.play().unwrap();
            engine.stop().unwrap();
        }

        assert_eq!(device.state().start_count, 20);
        assert_eq!(engine.state(), PlaybackState::Stopped);
    }

    #[test]
    fn end_of_stream_stops_with_one_clean_notification() {
        let device = MockRenderDevice::supporting(stereo16());
        let engine = engine(device.clone(), config());
        let observer = Arc::new(RecordingPlaybackObserver::default());
        engine.add_observer(observer.clone());

        engine.initialize(VecSource::empty(stereo16())).unwrap();
        engine.play().unwrap();

        assert!(wait_until(|| !observer.events().is_empty()));
        assert_eq!(engine.state(), PlaybackState::Stopped);
        engine.stop().unwrap();

        assert_eq!(observer.events(), vec![PlaybackStopped { error: None }]);
        assert!(device.state().written.is_empty());
    }

    #[test]
    fn finite_source_is_played_completely() {
        let device = MockRenderDevice::supporting(stereo16());
        let engine = engine(device.clone(), config());
        let data: Vec<u8> = (0..4000u32).map(|i| i as u8).collect();

        engine.initialize(VecSource::new(stereo16(), data.clone())).unwrap();
        engine.play().unwrap();
        assert!(wait_until(|| engine.state().is_stopped()));
        engine.stop().unwrap();

        assert_eq!(device.state().written, data);
    }

    #[test]
    fn worker_error_is_reported_and_state_forced_to_stopped() {
        let device = MockRenderDevice::supporting(stereo16());
        let engine = engine(device.clone(), config());
        let observer = Arc::new(RecordingPlaybackObserver::default());
        engine.add_observer(observer.clone());

        engine.initialize(EndlessSource::new(stereo16())).unwrap();
        engine.play().unwrap();
        device.set_fail_padding(true);

        assert!(wait_until(|| !observer.events().is_empty()));
        engine.stop().unwrap();

        let events = observer.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].error, Some(StreamError::device("padding query failed")));
        assert_eq!(engine.state(), PlaybackState::Stopped);
        // stream is still stopped and reset after the failure
        assert_eq!(device.state().reset_count, 1);
    }

    #[test]
    fn failed_start_is_returned_from_play() {
        let device = MockRenderDevice::supporting(stereo16()).failing_start();
        let engine = engine(device, config());
        let observer = Arc::new(RecordingPlaybackObserver::default());
        engine.add_observer(observer.clone());
        engine.initialize(EndlessSource::new(stereo16())).unwrap();

        assert_eq!(engine.play(), Err(StreamError::device("start failed")));
        assert!(!engine.has_worker());
        assert_eq!(engine.state(), PlaybackState::Stopped);
        assert_eq!(observer.events().len(), 1);
    }

    #[test]
    fn pause_and_resume_follow_state_rules() {
        let device = MockRenderDevice::supporting(stereo16());
        let engine = engine(device, config());
        engine.initialize(EndlessSource::new(stereo16())).unwrap();

        // no-ops while stopped
        engine.pause().unwrap();
        engine.resume().unwrap();
        assert_eq!(engine.state(), PlaybackState::Stopped);

        engine.play().unwrap();
        engine.resume().unwrap();
        assert_eq!(engine.state(), PlaybackState::Playing);
        engine.pause().unwrap();
        assert_eq!(engine.state(), PlaybackState::Paused);
        engine.play().unwrap();
        assert_eq!(engine.state(), PlaybackState::Playing);

        engine.stop().unwrap();
    }

    #[test]
    fn exclusive_pause_halts_and_restarts_stream() {
        let device = MockRenderDevice::supporting(stereo16());
        let config = RenderConfiguration {
            share_mode: ShareMode::Exclusive,
            ..config()
        };
        let engine = engine(device.clone(), config);
        engine.initialize(EndlessSource::new(stereo16())).unwrap();
        engine.play().unwrap();

        engine.pause().unwrap();
        assert!(wait_until(|| device.state().stop_count == 1));
        engine.resume().unwrap();
        assert!(wait_until(|| device.state().start_count == 2));

        engine.stop().unwrap();
        assert_eq!(device.state().stop_count, 2);
    }

    #[test]
    fn shared_pause_keeps_stream_running() {
        let device = MockRenderDevice::supporting(stereo16());
        let engine = engine(device.clone(), config());
        engine.initialize(EndlessSource::new(stereo16())).unwrap();
        engine.play().unwrap();

        engine.pause().unwrap();
        thread::sleep(Duration::from_millis(20));
        assert_eq!(device.state().stop_count, 0);

        engine.stop().unwrap();
    }

    #[test]
    fn exclusive_event_driven_pads_short_reads() {
        let device = MockRenderDevice::supporting(stereo16());
        let config = RenderConfiguration {
            share_mode: ShareMode::Exclusive,
            timing: TimingMode::EventDriven,
            ..config()
        };
        let engine = engine(device.clone(), config);
        engine.initialize(VecSource::new(stereo16(), vec![7u8; 100])).unwrap();
        engine.play().unwrap();
        assert!(wait_until(|| engine.state().is_stopped()));
        engine.stop().unwrap();

        let state = device.state();
        assert_eq!(state.write_calls, vec![480]);
        assert_eq!(state.written.len(), 480 * 4);
        assert!(state.written[..100].iter().all(|&b| b == 7));
        assert!(state.written[100..].iter().all(|&b| b == 0));
        assert!(state.event.as_ref().map_or(false, |e| e.wait_count() > 0));
        assert!(state.initialize_calls[0].event_callback);
        assert_eq!(state.initialize_calls[0].periodicity, Duration::from_millis(8));
    }

    #[test]
    fn polling_sleeps_an_eighth_of_latency_and_drains_half() {
        let device = MockRenderDevice::supporting(stereo16());
        let clock = ManualClock::new();
        let engine = RenderEngine::with_clock(device, config(), Arc::new(clock.clone())).unwrap();
        engine.initialize(VecSource::new(stereo16(), vec![1u8; 64])).unwrap();
        engine.play().unwrap();
        assert!(wait_until(|| engine.state().is_stopped()));
        engine.stop().unwrap();

        let sleeps = clock.sleeps();
        assert_eq!(sleeps.first(), Some(&Duration::from_millis(1)));
        assert_eq!(sleeps.last(), Some(&Duration::from_millis(4)));
    }

    #[test]
    fn busy_hardware_buffer_skips_refill() {
        let device = MockRenderDevice::supporting(stereo16()).with_padding(476);
        let engine = engine(device.clone(), config());
        engine.initialize(EndlessSource::new(stereo16())).unwrap();
        engine.play().unwrap();
        thread::sleep(Duration::from_millis(20));
        engine.stop().unwrap();

        assert!(device.state().write_calls.is_empty());
    }

    #[test]
    fn misaligned_buffer_is_retried_once_with_aligned_duration() {
        let device = MockRenderDevice::supporting(AudioFormat::pcm(44100, 16, 2)).misaligned_once();
        let engine = engine(device.clone(), config());

        engine.initialize(EndlessSource::new(AudioFormat::pcm(44100, 16, 2))).unwrap();

        let state = device.state();
        assert_eq!(state.initialize_calls.len(), 2);
        assert_eq!(state.initialize_calls[0].buffer_duration, Duration::from_millis(8));
        // 441 frames at 44.1 kHz
        assert_eq!(state.initialize_calls[1].buffer_duration, Duration::from_millis(10));
    }

    #[test]
    fn reported_stream_latency_replaces_configured() {
        let device = MockRenderDevice::supporting(stereo16()).with_stream_latency(Duration::from_millis(30));
        let engine = engine(device, config());
        assert_eq!(engine.latency(), Duration::from_millis(8));

        engine.initialize(EndlessSource::new(stereo16())).unwrap();

        assert_eq!(engine.latency(), Duration::from_millis(30));
    }

    #[test]
    fn unsupported_source_is_converted() {
        let device = MockRenderDevice::supporting(stereo16());
        let engine = engine(device.clone(), config());

        let samples: Vec<u8> = [0.5f32; 12].iter().flat_map(|s| s.to_le_bytes()).collect();
        engine.initialize(VecSource::new(AudioFormat::float(48000, 6), samples)).unwrap();
        assert_eq!(engine.output_format(), Some(stereo16()));

        engine.play().unwrap();
        assert!(wait_until(|| engine.state().is_stopped()));
        engine.stop().unwrap();

        // 2 frames of 6ch float → 2 frames of stereo 16-bit
        assert_eq!(device.state().written.len(), 8);
    }

    #[test]
    fn compressed_source_cannot_fall_back_to_pcm() {
        let device = MockRenderDevice::supporting(stereo16());
        let engine = engine(device.clone(), config());
        let compressed = AudioFormat::new(48000, 16, 2, SampleEncoding::Compressed);

        let result = engine.initialize(EndlessSource::new(compressed));

        assert!(matches!(result, Err(StreamError::UnsupportedFormat(_))));
        assert!(!engine.is_initialized());
        assert_eq!(device.state().start_count, 0);
    }

    #[test]
    fn invalid_source_format_is_rejected() {
        let device = MockRenderDevice::supporting(stereo16());
        let engine = engine(device.clone(), config());

        let result = engine.initialize(EndlessSource::new(AudioFormat::pcm(48000, 16, 0)));

        assert!(matches!(result, Err(StreamError::UnsupportedFormat(_))));
        assert!(!engine.is_initialized());
        assert!(device.state().format_queries.is_empty());
    }

    #[test]
    fn unsupported_format_fails_initialize() {
        let engine = engine(MockRenderDevice::new(), config());

        let result = engine.initialize(EndlessSource::new(stereo16()));

        assert!(matches!(result, Err(StreamError::UnsupportedFormat(_))));
        assert!(!engine.is_initialized());
    }

    #[test]
    fn misuse_is_rejected() {
        let device = MockRenderDevice::supporting(stereo16());
        let engine = engine(device.clone(), config());

        assert_eq!(engine.play(), Err(StreamError::NotInitialized));
        assert_eq!(engine.pause(), Err(StreamError::NotInitialized));

        engine.initialize(EndlessSource::new(stereo16())).unwrap();
        engine.play().unwrap();
        assert!(matches!(
            engine.initialize(EndlessSource::new(stereo16())),
            Err(StreamError::InvalidState(_))
        ));

        engine.dispose().unwrap();
        engine.dispose().unwrap();
        assert_eq!(engine.play(), Err(StreamError::ObjectDisposed("RenderEngine")));
        assert_eq!(engine.stop(), Err(StreamError::ObjectDisposed("RenderEngine")));
        assert_eq!(device.state().release_count, 1);
    }

    #[test]
    fn reinitialize_after_stop_releases_previous_stream() {
        let device = MockRenderDevice::supporting(stereo16());
        let engine = engine(device.clone(), config());

        engine.initialize(EndlessSource::new(stereo16())).unwrap();
        engine.play().unwrap();
        engine.stop().unwrap();
        engine.initialize(EndlessSource::new(stereo16())).unwrap();

        let state = device.state();
        assert_eq!(state.release_count, 1);
        assert_eq!(state.initialize_calls.len(), 2);
    }

    #[test]
    fn drop_disposes() {
        let device = MockRenderDevice::supporting(stereo16());
        {
            let engine = engine(device.clone(), config());
            engine.initialize(EndlessSource::new(stereo16())).unwrap();
            engine.play().unwrap();
        }
        let state = device.state();
        assert_eq!(state.release_count, 1);
        assert_eq!(state.stop_count, 1);
    }

    /// Calls `stop()` on its engine from inside the notification.
    struct ReentrantObserver {
        engine: Mutex<Weak<RenderEngine<MockRenderDevice>>>,
        result: Mutex<Option<Result<(), StreamError>>>,
    }

    impl PlaybackObserver for ReentrantObserver {
        fn on_stopped(&self, _event: &PlaybackStopped) {
            if let Some(engine) = self.engine.lock().upgrade() {
                *self.result.lock() = Some(engine.stop());
            }
        }
    }

    #[test]
    fn control_calls_from_playback_thread_are_rejected() {
        let device = MockRenderDevice::supporting(stereo16());
        let engine = Arc::new(engine(device, config()));
        let observer = Arc::new(ReentrantObserver {
            engine: Mutex::new(Arc::downgrade(&engine)),
            result: Mutex::new(None),
        });
        engine.add_observer(observer.clone());

        engine.initialize(VecSource::empty(stereo16())).unwrap();
        engine.play().unwrap();
        assert!(wait_until(|| observer.result.lock().is_some()));
        engine.stop().unwrap();

        assert_eq!(*observer.result.lock(), Some(Err(StreamError::InvalidCallContext)));
    }

    #[test]
    fn rejects_invalid_configuration() {
        let config = RenderConfiguration {
            latency: Duration::ZERO,
            ..Default::default()
        };
        assert!(matches!(
            RenderEngine::new(MockRenderDevice::new(), config),
            Err(StreamError::ConfigurationFailed(_))
        ));
    }
}
