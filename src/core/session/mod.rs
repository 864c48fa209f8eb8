pub mod config;
pub mod events;
pub mod manager;
pub mod pipeline;
pub mod source;

pub use config::{RuntimeSettings, SamplingConfig};
pub use events::{label_for, PipelineEvent, SessionReport, SessionStats, StopReason};
pub use manager::{SessionManager, SessionState};
pub use pipeline::SamplingLoop;
pub use source::{frame_channel, ChannelFrameSource, FrameSender, FrameSource, ReplayFrameSource};
