use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;

use crate::encoding::accumulator::{AbortHandle, FrameAccumulator};
use crate::models::config::{BridgeConfiguration, QueuePolicy};
use crate::models::error::StreamError;
use crate::models::events::BridgeDiagnostics;
use crate::processing::channel_map::ChannelMap;
use crate::traits::byte_sink::ByteSink;
use crate::traits::capture_provider::AudioBufferCallback;
use crate::traits::clock::Clock;
use crate::traits::codec::FrameCodec;

/// One fixed-duration block of reordered interleaved samples.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBatch {
    pub samples: Vec<f32>,
    /// Samples per channel.
    pub frames: usize,
    pub channels: u16,
    /// 0-based, in capture order.
    pub sequence: u64,
}

/// What [`EpochBatcher::push`] did with a captured block.
#[derive(Debug, Clone, PartialEq)]
pub enum BlockOutcome {
    /// The block was appended; `completed` holds batches it filled.
    Accepted { frames: usize, completed: Vec<SampleBatch> },
    /// Rate or channel count differ from the configured stream; the block was skipped.
    Mismatched { sample_rate: u32, channels: u16 },
}

/// Reorders captured blocks into the target channel layout and cuts them
/// into batches of `frames_per_batch` frames.
#[derive(Debug)]
pub struct EpochBatcher {
    map: ChannelMap,
    sample_rate: u32,
    channels: u16,
    samples_per_batch: usize,
    current: Vec<f32>,
    scratch: Vec<f32>,
    next_sequence: u64,
}

impl EpochBatcher {
    pub fn new(config: &BridgeConfiguration) -> Self {
        let samples_per_batch = config.samples_per_batch().max(config.channels as usize);
        Self {
            map: config.channel_map.clone(),
            sample_rate: config.sample_rate,
            channels: config.channels,
            samples_per_batch,
            current: Vec::with_capacity(samples_per_batch),
            scratch: Vec::new(),
            next_sequence: 0,
        }
    }

    pub fn push(&mut self, samples: &[f32], sample_rate: u32, channels: u16) -> BlockOutcome {
        if sample_rate != self.sample_rate || channels != self.channels {
            return BlockOutcome::Mismatched { sample_rate, channels };
        }

        self.scratch.clear();
        self.map.remap_into(samples, &mut self.scratch);
        let frames = self.scratch.len() / self.channels as usize;

        let mut completed = Vec::new();
        let mut offset = 0;
        while offset < self.scratch.len() {
            let room = self.samples_per_batch - self.current.len();
            let take = room.min(self.scratch.len() - offset);
            self.current.extend_from_slice(&self.scratch[offset..offset + take]);
            offset += take;
            if self.current.len() == self.samples_per_batch {
                let full = std::mem::replace(&mut self.current, Vec::with_capacity(self.samples_per_batch));
                completed.push(self.seal(full));
            }
        }
        BlockOutcome::Accepted { frames, completed }
    }

    /// The partially filled batch, if any samples are pending.
    pub fn take_partial(&mut self) -> Option<SampleBatch> {
        if self.current.is_empty() {
            return None;
        }
        let partial = std::mem::take(&mut self.current);
        Some(self.seal(partial))
    }

    /// Samples waiting in the current batch.
    pub fn pending_samples(&self) -> usize {
        self.current.len()
    }

    fn seal(&mut self, samples: Vec<f32>) -> SampleBatch {
        let batch = SampleBatch {
            frames: samples.len() / self.channels as usize,
            channels: self.channels,
            sequence: self.next_sequence,
            samples,
        };
        self.next_sequence += 1;
        batch
    }
}

/// FIFO of completed batches between the capture callback and the encode loop.
#[derive(Debug)]
pub struct BatchQueue {
    batches: Mutex<VecDeque<SampleBatch>>,
    policy: QueuePolicy,
}

impl BatchQueue {
    pub fn new(policy: QueuePolicy) -> Self {
        Self {
            batches: Mutex::new(VecDeque::new()),
            policy,
        }
    }

    /// Enqueue a batch. Returns `false` if the policy dropped it.
    pub fn push(&self, batch: SampleBatch) -> bool {
        let mut batches = self.batches.lock();
        if let QueuePolicy::Bounded { max_batches } = self.policy {
            if batches.len() >= max_batches {
                return false;
            }
        }
        batches.push_back(batch);
        true
    }

    /// Take everything queued, leaving the queue empty.
    pub fn drain(&self) -> VecDeque<SampleBatch> {
        std::mem::take(&mut *self.batches.lock())
    }

    /// Discard everything queued. Returns how many batches were discarded.
    pub fn clear(&self) -> usize {
        let mut batches = self.batches.lock();
        let count = batches.len();
        batches.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.batches.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Counts bytes on their way to the real sink.
struct CountingSink {
    inner: Box<dyn ByteSink>,
    bytes: u64,
}

impl ByteSink for CountingSink {
    fn write(&mut self, bytes: &[u8]) -> Result<(), StreamError> {
        self.inner.write(bytes)?;
        self.bytes += bytes.len() as u64;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), StreamError> {
        self.inner.flush()
    }
}

/// Flags shared by the bridge handle, the capture callback and the encode loop.
#[derive(Debug, Default)]
struct BridgeFlags {
    /// Capture callback appends while set.
    accepting: AtomicBool,
    /// Encode loop keeps polling while set.
    running: AtomicBool,
    aborted: AtomicBool,
}

/// Decouples the real-time capture callback from frame encoding.
///
/// ```text
/// [capture callback] → reorder → epoch batch → [BatchQueue] → encode loop → FrameAccumulator → sink
/// ```
///
/// The callback only reorders, appends and enqueues; it never waits on the
/// encoder. The encode loop drains the queue in FIFO order, then sleeps for
/// `poll_interval`.
pub struct StageBridge {
    config: BridgeConfiguration,
    batcher: Arc<Mutex<EpochBatcher>>,
    queue: Arc<BatchQueue>,
    diagnostics: Arc<Mutex<BridgeDiagnostics>>,
    flags: Arc<BridgeFlags>,
    abort: AbortHandle,
    worker: Option<JoinHandle<Result<(), StreamError>>>,
}

impl StageBridge {
    /// Start the encode loop. The accumulator's codec must match the
    /// configured channel count and sample rate.
    pub fn start<C: FrameCodec<f32> + 'static>(
        config: BridgeConfiguration,
        accumulator: FrameAccumulator<f32, C>,
        sink: Box<dyn ByteSink>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, StreamError> {
        config.validate().map_err(StreamError::ConfigurationFailed)?;
        let context = *accumulator.context();
        if context.channels != config.channels || context.sample_rate != config.sample_rate {
            return Err(StreamError::ConfigurationFailed(format!(
                "codec expects {} ch @ {} Hz, bridge delivers {} ch @ {} Hz",
                context.channels, context.sample_rate, config.channels, config.sample_rate
            )));
        }

        let flags = Arc::new(BridgeFlags::default());
        flags.accepting.store(true, Ordering::SeqCst);
        flags.running.store(true, Ordering::SeqCst);

        let batcher = Arc::new(Mutex::new(EpochBatcher::new(&config)));
        let queue = Arc::new(BatchQueue::new(config.queue_policy));
        let diagnostics = Arc::new(Mutex::new(BridgeDiagnostics::default()));
        let abort = accumulator.abort_handle();

        let encode_loop = EncodeLoop {
            accumulator,
            sink: CountingSink { inner: sink, bytes: 0 },
            queue: Arc::clone(&queue),
            diagnostics: Arc::clone(&diagnostics),
            flags: Arc::clone(&flags),
            clock,
            poll_interval: config.poll_interval,
            flush_every: config.flush_every,
            since_flush: 0,
        };
        let worker = thread::Builder::new()
            .name("encode-loop".into())
            .spawn(move || encode_loop.run())
            .map_err(|e| StreamError::Thread(format!("failed to spawn encode thread: {}", e)))?;

        log::debug!(
            "Stage bridge started: {} ch @ {} Hz, {} frames per batch",
            config.channels,
            config.sample_rate,
            config.frames_per_batch()
        );

        Ok(Self {
            config,
            batcher,
            queue,
            diagnostics,
            flags,
            abort,
            worker: Some(worker),
        })
    }

    /// Callback to hand to a [`CaptureProvider`](crate::traits::capture_provider::CaptureProvider).
    pub fn capture_callback(&self) -> AudioBufferCallback {
        let batcher = Arc::clone(&self.batcher);
        let queue = Arc::clone(&self.queue);
        let diagnostics = Arc::clone(&self.diagnostics);
        let flags = Arc::clone(&self.flags);

        Arc::new(move |samples: &[f32], sample_rate: u32, channels: u16| {
            if !flags.accepting.load(Ordering::SeqCst) {
                return;
            }
            let outcome = batcher.lock().push(samples, sample_rate, channels);

            let mut diag = diagnostics.lock();
            diag.callback_count += 1;
            match outcome {
                BlockOutcome::Mismatched { sample_rate, channels } => {
                    diag.mismatched_blocks += 1;
                    if diag.mismatched_blocks == 1 {
                        log::warn!(
                            "Skipping capture block: {} ch @ {} Hz does not match the stream",
                            channels,
                            sample_rate
                        );
                    }
                }
                BlockOutcome::Accepted { frames, completed } => {
                    diag.frames_captured += frames as u64;
                    for batch in completed {
                        enqueue(&queue, batch, &mut diag);
                    }
                }
            }
        })
    }

    pub fn config(&self) -> &BridgeConfiguration {
        &self.config
    }

    pub fn diagnostics(&self) -> BridgeDiagnostics {
        self.diagnostics.lock().clone()
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    /// Encode everything captured so far, flush the codec and the sink, and
    /// join the encode loop. Idempotent.
    ///
    /// Stop the capture provider first so no block arrives after the final batch.
    pub fn stop(&mut self) -> Result<BridgeDiagnostics, StreamError> {
        let Some(worker) = self.worker.take() else {
            return Ok(self.diagnostics());
        };
        self.flags.accepting.store(false, Ordering::SeqCst);

        let partial = self.batcher.lock().take_partial();
        if let Some(batch) = partial {
            enqueue(&self.queue, batch, &mut self.diagnostics.lock());
        }
        self.flags.running.store(false, Ordering::SeqCst);

        let result = join_encode_loop(worker);
        let diagnostics = self.diagnostics();
        log::debug!("Stage bridge stopped: {:?}", diagnostics);
        result.map(|_| diagnostics)
    }

    /// Discard pending batches, abort the accumulator at its next frame
    /// boundary and join the encode loop without flushing. Idempotent.
    pub fn abort(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        self.flags.accepting.store(false, Ordering::SeqCst);
        self.flags.aborted.store(true, Ordering::SeqCst);
        self.abort.abort();
        self.flags.running.store(false, Ordering::SeqCst);

        let discarded = self.queue.clear() + usize::from(self.batcher.lock().take_partial().is_some());
        self.diagnostics.lock().batches_dropped += discarded as u64;

        if let Err(e) = join_encode_loop(worker) {
            log::debug!("Encode loop ended with {} during abort", e);
        }
        log::debug!("Stage bridge aborted, {} batches discarded", discarded);
    }
}

impl Drop for StageBridge {
    fn drop(&mut self) {
        self.abort();
    }
}

fn enqueue(queue: &BatchQueue, batch: SampleBatch, diagnostics: &mut BridgeDiagnostics) {
    let sequence = batch.sequence;
    if queue.push(batch) {
        diagnostics.batches_enqueued += 1;
    } else {
        diagnostics.batches_dropped += 1;
        log::warn!("Batch queue full, dropped batch {}", sequence);
    }
}

fn join_encode_loop(worker: JoinHandle<Result<(), StreamError>>) -> Result<(), StreamError> {
    worker
        .join()
        .unwrap_or_else(|_| Err(StreamError::Thread("encode thread panicked".into())))
}

struct EncodeLoop<C: FrameCodec<f32>> {
    accumulator: FrameAccumulator<f32, C>,
    sink: CountingSink,
    queue: Arc<BatchQueue>,
    diagnostics: Arc<Mutex<BridgeDiagnostics>>,
    flags: Arc<BridgeFlags>,
    clock: Arc<dyn Clock>,
    poll_interval: std::time::Duration,
    flush_every: u32,
    since_flush: u32,
}

impl<C: FrameCodec<f32>> EncodeLoop<C> {
    fn run(mut self) -> Result<(), StreamError> {
        let result = self.encode();
        if let Err(ref e) = result {
            log::error!("Encode loop failed: {}", e);
            self.flags.accepting.store(false, Ordering::SeqCst);
            self.queue.clear();
        }
        self.accumulator.close();
        result
    }

    fn encode(&mut self) -> Result<(), StreamError> {
        loop {
            // Read before draining so batches enqueued by stop() are seen.
            let running = self.flags.running.load(Ordering::SeqCst);
            self.drain_queue()?;
            if self.flags.aborted.load(Ordering::SeqCst) || self.accumulator.is_done() {
                return Ok(());
            }
            if !running {
                break;
            }
            self.clock.sleep(self.poll_interval);
        }

        let frames = self.accumulator.finish(&mut self.sink)?;
        self.sink.flush()?;
        self.record_frames(frames);
        Ok(())
    }

    fn drain_queue(&mut self) -> Result<(), StreamError> {
        let mut pending = self.queue.drain();
        while let Some(batch) = pending.pop_front() {
            if self.flags.aborted.load(Ordering::SeqCst) {
                self.diagnostics.lock().batches_dropped += pending.len() as u64 + 1;
                return Ok(());
            }
            let frames = self.accumulator.feed(&batch.samples, batch.frames, &mut self.sink)?;
            self.diagnostics.lock().batches_encoded += 1;
            self.record_frames(frames);
            if self.accumulator.is_done() {
                self.diagnostics.lock().batches_dropped += pending.len() as u64;
                return Ok(());
            }

            self.since_flush += 1;
            if self.flush_every > 0 && self.since_flush >= self.flush_every {
                self.sink.flush()?;
                self.since_flush = 0;
            }
        }
        Ok(())
    }

    fn record_frames(&self, frames: usize) {
        let mut diag = self.diagnostics.lock();
        diag.frames_encoded += frames as u64;
        diag.bytes_encoded = self.sink.bytes;
    }
}
