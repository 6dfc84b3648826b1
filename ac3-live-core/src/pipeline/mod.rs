pub mod bridge;
pub mod live;

pub use bridge::{BatchQueue, BlockOutcome, EpochBatcher, SampleBatch, StageBridge};
pub use live::{LivePipeline, LiveSessionResult};
