pub mod codec;
pub mod config;
pub mod device;
pub mod error;
pub mod events;
pub mod format;
pub mod state;
pub mod stream_result;
