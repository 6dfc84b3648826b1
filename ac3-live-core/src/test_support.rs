//! In-memory doubles for the device, codec, source, sink and capture boundaries.
//!
//! Compiled for unit tests and, with the `test-support` feature, for
//! downstream crates' tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use crate::models::codec::{CodecContext, CodecStatus, A52_MAX_CODED_FRAME_SIZE, A52_SAMPLES_PER_FRAME};
use crate::models::device::{AudioTransportType, DeviceFlow, DeviceInfo};
use crate::models::error::StreamError;
use crate::models::events::{FrameEncoded, PlaybackStopped};
use crate::models::format::{AudioFormat, ShareMode};
use crate::traits::byte_sink::ByteSink;
use crate::traits::capture_provider::{AudioBufferCallback, CaptureProvider};
use crate::traits::clock::Clock;
use crate::traits::codec::{FrameCodec, Sample};
use crate::traits::observers::{FrameObserver, PlaybackObserver};
use crate::traits::render_device::{BufferEvent, FormatSupport, RenderDevice, StreamParams};
use crate::traits::wave_source::WaveSource;

// ---------------------------------------------------------------------------
// Render device
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MockDeviceState {
    pub supported: Vec<AudioFormat>,
    pub closest_match: Option<AudioFormat>,
    pub mix_format: Option<AudioFormat>,
    pub device_format: Option<AudioFormat>,
    pub buffer_frames: u32,
    pub padding: u32,
    pub stream_latency: Duration,
    pub misaligned_once: bool,
    pub fail_start: bool,
    pub fail_padding: bool,

    pub format_queries: Vec<(ShareMode, AudioFormat)>,
    pub initialize_calls: Vec<StreamParams>,
    pub written: Vec<u8>,
    pub write_calls: Vec<u32>,
    pub start_count: usize,
    pub stop_count: usize,
    pub reset_count: usize,
    pub release_count: usize,
    pub enter_thread_count: usize,
    pub leave_thread_count: usize,
    pub render_threads: Vec<thread::ThreadId>,
    pub event: Option<Arc<MockBufferEvent>>,
}

/// Scriptable [`RenderDevice`]. Clones share state, so a test keeps one
/// clone for inspection and hands the other to the engine.
#[derive(Debug, Clone)]
pub struct MockRenderDevice {
    state: Arc<Mutex<MockDeviceState>>,
}

impl Default for MockRenderDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRenderDevice {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockDeviceState {
                buffer_frames: 480,
                ..Default::default()
            })),
        }
    }

    /// Device that accepts exactly `format`.
    pub fn supporting(format: AudioFormat) -> Self {
        Self::new().with_supported(format)
    }

    pub fn with_supported(self, format: AudioFormat) -> Self {
        self.state.lock().supported.push(format);
        self
    }

    pub fn with_closest_match(self, format: AudioFormat) -> Self {
        self.state.lock().closest_match = Some(format);
        self
    }

    pub fn with_mix_format(self, format: AudioFormat) -> Self {
        self.state.lock().mix_format = Some(format);
        self
    }

    pub fn with_device_format(self, format: AudioFormat) -> Self {
        self.state.lock().device_format = Some(format);
        self
    }

    pub fn with_buffer_frames(self, frames: u32) -> Self {
        self.state.lock().buffer_frames = frames;
        self
    }

    pub fn with_padding(self, frames: u32) -> Self {
        self.state.lock().padding = frames;
        self
    }

    pub fn with_stream_latency(self, latency: Duration) -> Self {
        self.state.lock().stream_latency = latency;
        self
    }

    /// The first `initialize` fails with `BufferSizeNotAligned`.
    pub fn misaligned_once(self) -> Self {
        self.state.lock().misaligned_once = true;
        self
    }

    pub fn failing_start(self) -> Self {
        self.state.lock().fail_start = true;
        self
    }

    pub fn set_fail_padding(&self, fail: bool) {
        self.state.lock().fail_padding = fail;
    }

    pub fn state(&self) -> parking_lot::MutexGuard<'_, MockDeviceState> {
        self.state.lock()
    }

    pub fn written_len(&self) -> usize {
        self.state.lock().written.len()
    }
}

impl RenderDevice for MockRenderDevice {
    fn is_format_supported(&self, share_mode: ShareMode, format: &AudioFormat) -> FormatSupport {
        let mut state = self.state.lock();
        state.format_queries.push((share_mode, *format));
        if state.supported.contains(format) {
            FormatSupport::Supported
        } else if let Some(closest) = state.closest_match {
            FormatSupport::ClosestMatch(closest)
        } else {
            FormatSupport::Unsupported
        }
    }

    fn mix_format(&self) -> Option<AudioFormat> {
        self.state.lock().mix_format
    }

    fn device_format(&self) -> Option<AudioFormat> {
        self.state.lock().device_format
    }

    fn initialize(&mut self, params: &StreamParams) -> Result<(), StreamError> {
        let mut state = self.state.lock();
        state.initialize_calls.push(*params);
        if state.misaligned_once {
            state.misaligned_once = false;
            state.buffer_frames = 441;
            return Err(StreamError::BufferSizeNotAligned);
        }
        Ok(())
    }

    fn buffer_size(&self) -> Result<u32, StreamError> {
        Ok(self.state.lock().buffer_frames)
    }

    fn current_padding(&self) -> Result<u32, StreamError> {
        let state = self.state.lock();
        if state.fail_padding {
            return Err(StreamError::device("padding query failed"));
        }
        Ok(state.padding)
    }

    fn stream_latency(&self) -> Duration {
        self.state.lock().stream_latency
    }

    fn create_event_handle(&mut self) -> Result<Arc<dyn BufferEvent>, StreamError> {
        let event = Arc::new(MockBufferEvent::default());
        self.state.lock().event = Some(Arc::clone(&event));
        Ok(event)
    }

    fn write_frames(&mut self, data: &[u8], frames: u32) -> Result<(), StreamError> {
        let mut state = self.state.lock();
        state.written.extend_from_slice(data);
        state.write_calls.push(frames);
        Ok(())
    }

    fn start(&mut self) -> Result<(), StreamError> {
        let mut state = self.state.lock();
        if state.fail_start {
            return Err(StreamError::device("start failed"));
        }
        state.start_count += 1;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), StreamError> {
        self.state.lock().stop_count += 1;
        Ok(())
    }

    fn reset(&mut self) -> Result<(), StreamError> {
        self.state.lock().reset_count += 1;
        Ok(())
    }

    fn release(&mut self) {
        self.state.lock().release_count += 1;
    }

    fn enter_render_thread(&mut self, _latency: Duration) -> Result<(), StreamError> {
        let mut state = self.state.lock();
        state.enter_thread_count += 1;
        state.render_threads.push(thread::current().id());
        Ok(())
    }

    fn leave_render_thread(&mut self) {
        self.state.lock().leave_thread_count += 1;
    }
}

/// Buffer event that reports "signaled" after a short real pause.
#[derive(Debug)]
pub struct MockBufferEvent {
    signaled: AtomicBool,
    waits: AtomicUsize,
}

impl Default for MockBufferEvent {
    fn default() -> Self {
        Self {
            signaled: AtomicBool::new(true),
            waits: AtomicUsize::new(0),
        }
    }
}

impl MockBufferEvent {
    /// `false` makes every wait time out.
    pub fn set_signaled(&self, signaled: bool) {
        self.signaled.store(signaled, Ordering::SeqCst);
    }

    pub fn wait_count(&self) -> usize {
        self.waits.load(Ordering::SeqCst)
    }
}

impl BufferEvent for MockBufferEvent {
    fn wait(&self, timeout: Duration) -> bool {
        self.waits.fetch_add(1, Ordering::SeqCst);
        thread::sleep(timeout.min(Duration::from_millis(1)));
        self.signaled.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// Sources
// ---------------------------------------------------------------------------

/// Plays a fixed byte vector, then reports end of stream.
#[derive(Debug, Clone)]
pub struct VecSource {
    format: AudioFormat,
    data: Vec<u8>,
    position: usize,
}

impl VecSource {
    pub fn new(format: AudioFormat, data: Vec<u8>) -> Self {
        Self {
            format,
            data,
            position: 0,
        }
    }

    /// A source that is exhausted from the first read.
    pub fn empty(format: AudioFormat) -> Self {
        Self::new(format, Vec::new())
    }
}

impl WaveSource for VecSource {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn read(&mut self, buffer: &mut [u8]) -> Result<usize, StreamError> {
        let count = buffer.len().min(self.data.len() - self.position);
        buffer[..count].copy_from_slice(&self.data[self.position..self.position + count]);
        self.position += count;
        Ok(count)
    }
}

/// Never ends; every read fills the buffer with `fill`.
#[derive(Debug, Clone)]
pub struct EndlessSource {
    format: AudioFormat,
    fill: u8,
    reads: Arc<AtomicUsize>,
}

impl EndlessSource {
    pub fn new(format: AudioFormat) -> Self {
        Self {
            format,
            fill: 0x11,
            reads: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Shared read counter (clones observe the same count).
    pub fn reads(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.reads)
    }
}

impl WaveSource for EndlessSource {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn read(&mut self, buffer: &mut [u8]) -> Result<usize, StreamError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        buffer.fill(self.fill);
        Ok(buffer.len())
    }
}

/// Fails every read with the given error.
#[derive(Debug, Clone)]
pub struct FailingSource {
    format: AudioFormat,
    error: StreamError,
}

impl FailingSource {
    pub fn new(format: AudioFormat, error: StreamError) -> Self {
        Self { format, error }
    }
}

impl WaveSource for FailingSource {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn read(&mut self, _buffer: &mut [u8]) -> Result<usize, StreamError> {
        Err(self.error.clone())
    }
}

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

/// Records requested sleeps and only pauses briefly for each.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    sleeps: Arc<Mutex<Vec<Duration>>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().clone()
    }
}

impl Clock for ManualClock {
    fn sleep(&self, duration: Duration) {
        self.sleeps.lock().push(duration);
        thread::sleep(Duration::from_micros(200));
    }
}

// ---------------------------------------------------------------------------
// Codec
// ---------------------------------------------------------------------------

/// One recorded `encode_frame` call.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodeCall {
    pub samples_per_channel: usize,
    /// Little-endian bytes of the samples passed in.
    pub samples: Vec<u8>,
}

#[derive(Debug, Default)]
pub struct MockCodecLog {
    pub calls: Vec<EncodeCall>,
    pub close_count: usize,
    /// Results returned before falling back to the defaults.
    pub script: VecDeque<i32>,
}

/// Shared view of a [`MockCodec`]'s call log.
#[derive(Debug, Clone)]
pub struct MockCodecHandle(Arc<Mutex<MockCodecLog>>);

impl MockCodecHandle {
    pub fn calls(&self) -> Vec<EncodeCall> {
        self.0.lock().calls.clone()
    }

    pub fn call_count(&self) -> usize {
        self.0.lock().calls.len()
    }

    pub fn close_count(&self) -> usize {
        self.0.lock().close_count
    }

    pub fn push_result(&self, result: i32) {
        self.0.lock().script.push_back(result);
    }
}

/// Codec double.
///
/// Unscripted calls with samples return a `frame_size`-byte frame filled with
/// the 1-based call number; flush calls (`samples_per_channel == 0`) return 0.
#[derive(Debug)]
pub struct MockCodec {
    context: CodecContext,
    samples_per_frame: usize,
    frame_size: usize,
    log: Arc<Mutex<MockCodecLog>>,
}

impl MockCodec {
    pub fn new(context: CodecContext) -> Self {
        Self {
            context,
            samples_per_frame: A52_SAMPLES_PER_FRAME,
            frame_size: 128,
            log: Arc::new(Mutex::new(MockCodecLog::default())),
        }
    }

    pub fn with_samples_per_frame(mut self, samples_per_frame: usize) -> Self {
        self.samples_per_frame = samples_per_frame;
        self
    }

    pub fn with_frame_size(mut self, frame_size: usize) -> Self {
        self.frame_size = frame_size;
        self
    }

    pub fn with_script(self, results: impl IntoIterator<Item = i32>) -> Self {
        self.log.lock().script.extend(results);
        self
    }

    pub fn handle(&self) -> MockCodecHandle {
        MockCodecHandle(Arc::clone(&self.log))
    }
}

impl<S: Sample> FrameCodec<S> for MockCodec {
    fn context(&self) -> &CodecContext {
        &self.context
    }

    fn samples_per_frame(&self) -> usize {
        self.samples_per_frame
    }

    fn max_frame_size(&self) -> usize {
        A52_MAX_CODED_FRAME_SIZE.max(self.frame_size)
    }

    fn encode_frame(&mut self, frame_buffer: &mut [u8], samples: &[S], samples_per_channel: usize) -> i32 {
        let mut log = self.log.lock();
        let mut bytes = Vec::new();
        for &sample in samples {
            sample.write_le(&mut bytes);
        }
        log.calls.push(EncodeCall {
            samples_per_channel,
            samples: bytes,
        });
        let call_number = log.calls.len();

        let result = match log.script.pop_front() {
            Some(result) => result,
            None if samples_per_channel == 0 => 0,
            None => self.frame_size as i32,
        };
        if result > 0 {
            frame_buffer[..result as usize].fill(call_number as u8);
        }
        result
    }

    fn status(&self) -> CodecStatus {
        CodecStatus {
            quality: 100,
            bit_rate: 448,
            bandwidth_code: 60,
        }
    }

    fn close(&mut self) {
        self.log.lock().close_count += 1;
    }
}

// ---------------------------------------------------------------------------
// Sinks and observers
// ---------------------------------------------------------------------------

/// Records each write as a separate chunk. Clones share the record.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    writes: Arc<Mutex<Vec<Vec<u8>>>>,
    flushes: Arc<AtomicUsize>,
    fail_writes: Arc<AtomicBool>,
    fail_after: Arc<Mutex<Option<usize>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.writes.lock().clone()
    }

    pub fn bytes(&self) -> Vec<u8> {
        self.writes.lock().concat()
    }

    pub fn flush_count(&self) -> usize {
        self.flushes.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Reject every write once `writes` chunks have been recorded.
    pub fn fail_after(&self, writes: usize) {
        *self.fail_after.lock() = Some(writes);
    }
}

impl ByteSink for RecordingSink {
    fn write(&mut self, bytes: &[u8]) -> Result<(), StreamError> {
        let mut writes = self.writes.lock();
        let over_limit = self.fail_after.lock().is_some_and(|limit| writes.len() >= limit);
        if over_limit || self.fail_writes.load(Ordering::SeqCst) {
            return Err(StreamError::StorageError("sink rejected write".into()));
        }
        writes.push(bytes.to_vec());
        Ok(())
    }

    fn flush(&mut self) -> Result<(), StreamError> {
        self.flushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct RecordingPlaybackObserver {
    events: Mutex<Vec<PlaybackStopped>>,
}

impl RecordingPlaybackObserver {
    pub fn events(&self) -> Vec<PlaybackStopped> {
        self.events.lock().clone()
    }
}

impl PlaybackObserver for RecordingPlaybackObserver {
    fn on_stopped(&self, event: &PlaybackStopped) {
        self.events.lock().push(event.clone());
    }
}

#[derive(Debug, Default)]
pub struct RecordingFrameObserver {
    events: Mutex<Vec<FrameEncoded>>,
}

impl RecordingFrameObserver {
    pub fn events(&self) -> Vec<FrameEncoded> {
        self.events.lock().clone()
    }

    pub fn frame_numbers(&self) -> Vec<u64> {
        self.events.lock().iter().map(|e| e.frame_number).collect()
    }
}

impl FrameObserver for RecordingFrameObserver {
    fn on_frame_encoded(&self, event: &FrameEncoded) {
        self.events.lock().push(*event);
    }
}

// ---------------------------------------------------------------------------
// Capture
// ---------------------------------------------------------------------------

/// Capture provider driven by the test: [`MockCaptureProvider::emit`]
/// invokes the registered callback on the calling thread.
#[derive(Clone)]
pub struct MockCaptureProvider {
    sample_rate: u32,
    channels: u16,
    callback: Arc<Mutex<Option<AudioBufferCallback>>>,
    available: bool,
}

impl MockCaptureProvider {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
            callback: Arc::new(Mutex::new(None)),
            available: true,
        }
    }

    pub fn unavailable(mut self) -> Self {
        self.available = false;
        self
    }

    pub fn is_running(&self) -> bool {
        self.callback.lock().is_some()
    }

    /// Deliver one interleaved block. Returns `false` if capture is not running.
    pub fn emit(&self, samples: &[f32]) -> bool {
        let callback = self.callback.lock().clone();
        match callback {
            Some(callback) => {
                callback(samples, self.sample_rate, self.channels);
                true
            }
            None => false,
        }
    }
}

impl CaptureProvider for MockCaptureProvider {
    fn is_available(&self) -> bool {
        self.available
    }

    fn start(&mut self, callback: AudioBufferCallback) -> Result<(), StreamError> {
        if !self.available {
            return Err(StreamError::DeviceNotAvailable);
        }
        *self.callback.lock() = Some(callback);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), StreamError> {
        self.callback.lock().take();
        Ok(())
    }

    fn device_info(&self) -> DeviceInfo {
        DeviceInfo {
            id: "mock-loopback".into(),
            name: "Mock loopback".into(),
            flow: DeviceFlow::Loopback,
            is_default: true,
            transport_type: Some(AudioTransportType::Virtual),
        }
    }
}
