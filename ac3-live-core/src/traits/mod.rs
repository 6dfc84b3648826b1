pub mod byte_sink;
pub mod capture_provider;
pub mod clock;
pub mod codec;
pub mod observers;
pub mod render_device;
pub mod wave_source;
