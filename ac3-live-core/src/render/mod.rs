pub mod engine;
pub mod feed_buffer;
pub mod negotiation;

pub use engine::RenderEngine;
pub use feed_buffer::FeedBuffer;
pub use negotiation::{candidate_formats, negotiate, FormatResolution};
