pub mod detector;
pub mod frame;
pub mod metrics;

pub use detector::{
    ChangeScore, DecisionReason, SceneChangeDetector, SceneDecision, SceneWeights,
    DEFAULT_SCENE_THRESHOLD, FRAME_HISTORY_LENGTH,
};
pub use frame::{Frame, PixelFormat};
pub use metrics::{compute_metrics, Comparison, FrameBaseline, FrameMetrics, MetricsConfig};
