pub mod accumulator;
#[cfg(feature = "native-codec")]
pub mod native;
pub mod raw_codec;

pub use accumulator::{AbortHandle, FrameAccumulator, RemapFn};
#[cfg(feature = "native-codec")]
pub use native::NativeFrameCodec;
pub use raw_codec::RawFrameCodec;
