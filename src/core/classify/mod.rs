pub mod backend;
pub mod preprocess;
pub mod smoother;
#[cfg(feature = "backend-tract")]
pub mod tract;

pub use backend::{InferenceBackend, MeanIntensityBackend, ScriptedBackend};
pub use preprocess::{Preprocessor, Tensor};
pub use smoother::{
    ClassificationSmoother, ClassificationState, DecisionPath, SmoothedClassification,
    SmootherConfig, SmootherState,
};
#[cfg(feature = "backend-tract")]
pub use tract::TractBackend;
