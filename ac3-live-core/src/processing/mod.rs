pub mod channel_map;
pub mod format_converter;
pub mod resampler;
pub mod ring_buffer;
pub mod sample_convert;
