use std::sync::Arc;

use parking_lot::Mutex;

use crate::models::error::StreamError;
use crate::models::format::AudioFormat;
use crate::processing::ring_buffer::RingBuffer;
use crate::traits::byte_sink::ByteSink;
use crate::traits::wave_source::WaveSource;

#[derive(Debug)]
struct FeedState {
    ring: RingBuffer<u8>,
    closed: bool,
    dropped: u64,
}

/// Bounded byte FIFO between the encode loop and the render engine.
///
/// The encode side writes through [`ByteSink`]; the render side reads
/// through [`WaveSource`]. Clones share the same buffer. When full, the
/// oldest bytes are dropped in whole frames so reads stay frame-aligned.
/// While open and empty, reads return silence so the device keeps running;
/// after [`FeedBuffer::close`] the remaining bytes drain and then reads
/// return 0 (end of stream).
#[derive(Debug, Clone)]
pub struct FeedBuffer {
    format: AudioFormat,
    state: Arc<Mutex<FeedState>>,
}

impl FeedBuffer {
    pub fn new(format: AudioFormat, capacity_bytes: usize) -> Self {
        Self {
            format,
            state: Arc::new(Mutex::new(FeedState {
                ring: RingBuffer::new(capacity_bytes),
                closed: false,
                dropped: 0,
            })),
        }
    }

    /// Buffer sized to hold `duration` of `format`.
    pub fn with_duration(format: AudioFormat, duration: std::time::Duration) -> Self {
        let bytes = format.frames_to_bytes(format.frames_for(duration).max(1));
        Self::new(format, bytes)
    }

    /// No more writes will follow; readers see end of stream once drained.
    pub fn close(&self) {
        self.state.lock().closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Bytes currently buffered.
    pub fn len(&self) -> usize {
        self.state.lock().ring.count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total bytes discarded because the reader fell behind.
    pub fn dropped_bytes(&self) -> u64 {
        self.state.lock().dropped
    }
}

impl ByteSink for FeedBuffer {
    fn write(&mut self, bytes: &[u8]) -> Result<(), StreamError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(StreamError::InvalidState("feed buffer is closed".into()));
        }
        let mut bytes = bytes;
        let overflow = (state.ring.count() + bytes.len()).saturating_sub(state.ring.capacity());
        if overflow > 0 {
            let align = self.format.block_align().max(1);
            let to_drop = overflow.div_ceil(align) * align;
            let from_ring = state.ring.discard(to_drop);
            let from_input = (to_drop - from_ring).min(bytes.len());
            bytes = &bytes[from_input..];
            let dropped = from_ring + from_input;
            state.dropped += dropped as u64;
            log::warn!("Feed buffer overflow, dropped {} bytes", dropped);
        }
        state.ring.write(bytes);
        Ok(())
    }
}

impl WaveSource for FeedBuffer {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn read(&mut self, buffer: &mut [u8]) -> Result<usize, StreamError> {
        let mut state = self.state.lock();
        if state.closed {
            return Ok(state.ring.read_into(buffer));
        }

        // Only whole frames while live; a partial tail waits for the next write.
        let align = self.format.block_align().max(1);
        let mut whole = buffer.len().min(state.ring.count());
        whole -= whole % align;
        if whole > 0 {
            return Ok(state.ring.read_into(&mut buffer[..whole]));
        }
        // Underrun while live.
        buffer.fill(0);
        Ok(buffer.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::format::SampleEncoding;

    fn format() -> AudioFormat {
        AudioFormat::new(48000, 16, 2, SampleEncoding::Compressed)
    }

    #[test]
    fn writes_are_read_back_in_order() {
        let mut sink = FeedBuffer::new(format(), 16);
        let mut source = sink.clone();

        sink.write(&[1, 2, 3]).unwrap();
        sink.write(&[4]).unwrap();

        let mut out = [0u8; 8];
        assert_eq!(source.read(&mut out).unwrap(), 4);
        assert_eq!(&out[..4], &[1, 2, 3, 4]);
    }

    #[test]
    fn partial_frame_waits_for_more_bytes() {
        // block align is 4
        let mut sink = FeedBuffer::new(format(), 16);
        let mut source = sink.clone();
        sink.write(&[1, 2, 3, 4, 5, 6]).unwrap();

        let mut out = [0u8; 8];
        assert_eq!(source.read(&mut out).unwrap(), 4);
        assert_eq!(sink.len(), 2);

        sink.write(&[7, 8]).unwrap();
        assert_eq!(source.read(&mut out).unwrap(), 4);
        assert_eq!(&out[..4], &[5, 6, 7, 8]);
    }

    #[test]
    fn empty_open_buffer_returns_silence() {
        let mut source = FeedBuffer::new(format(), 16);
        let mut out = [0xAAu8; 6];

        assert_eq!(source.read(&mut out).unwrap(), 6);
        assert_eq!(out, [0; 6]);
    }

    #[test]
    fn closed_buffer_drains_then_ends() {
        let mut sink = FeedBuffer::new(format(), 16);
        let mut source = sink.clone();
        sink.write(&[9, 9]).unwrap();
        sink.close();

        let mut out = [0u8; 4];
        assert_eq!(source.read(&mut out).unwrap(), 2);
        assert_eq!(source.read(&mut out).unwrap(), 0);
        assert!(sink.write(&[1]).is_err());
    }

    #[test]
    fn overflow_drops_oldest_and_counts() {
        let mut sink = FeedBuffer::new(format(), 8);
        sink.write(&[1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12]).unwrap();

        assert_eq!(sink.dropped_bytes(), 4);
        let mut out = [0u8; 8];
        assert_eq!(sink.clone().read(&mut out).unwrap(), 8);
        assert_eq!(out, [5, 6, 7, 8, 9, 10, 11, 12]);
    }

    #[test]
    fn overflow_drops_whole_frames() {
        // block align is 4; 4 + 6 bytes overflow an 8-byte buffer by 2
        let mut sink = FeedBuffer::new(format(), 8);
        let mut source = sink.clone();
        sink.write(&[1, 2, 3, 4]).unwrap();
        sink.write(&[5, 6, 7, 8, 9, 10]).unwrap();

        assert_eq!(sink.dropped_bytes(), 4);
        let mut out = [0u8; 8];
        assert_eq!(source.read(&mut out).unwrap(), 4);
        assert_eq!(&out[..4], &[5, 6, 7, 8]);

        sink.write(&[11, 12]).unwrap();
        assert_eq!(source.read(&mut out).unwrap(), 4);
        assert_eq!(&out[..4], &[9, 10, 11, 12]);
    }

    #[test]
    fn oversized_write_keeps_frame_aligned_tail() {
        let mut sink = FeedBuffer::new(format(), 8);
        sink.write(&[1, 2, 3, 4, 5, 6, 7, 8, 9, 10]).unwrap();

        assert_eq!(sink.dropped_bytes(), 4);
        assert_eq!(sink.len(), 6);
        let mut out = [0u8; 4];
        assert_eq!(sink.clone().read(&mut out).unwrap(), 4);
        assert_eq!(out, [5, 6, 7, 8]);
    }

    #[test]
    fn duration_sizing() {
        let buffer = FeedBuffer::with_duration(AudioFormat::pcm(48000, 16, 2), std::time::Duration::from_millis(10));
        let mut sink = buffer.clone();
        sink.write(&vec![0u8; 2000]).unwrap();
        assert_eq!(buffer.len(), 1920);
    }
}
