use super::frame::Frame;
use super::metrics::{compute_metrics, Comparison, FrameBaseline, FrameMetrics, MetricsConfig};
use crate::core::history::BoundedHistory;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

pub const DEFAULT_SCENE_THRESHOLD: f32 = 0.15;
pub const FRAME_HISTORY_LENGTH: usize = 3;

/// 场景变化分数的加权参数
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SceneWeights {
    pub motion: f32,
    pub color: f32,
    pub edge: f32,
    pub center: f32,
    /// 运动方差放大系数
    pub variance_gain: f32,
    /// 方差加成上限
    pub variance_boost_cap: f32,
}

impl Default for SceneWeights {
    fn default() -> Self {
        Self {
            motion: 0.35,
            color: 0.25,
            edge: 0.15,
            center: 0.25,
            variance_gain: 2.0,
            variance_boost_cap: 0.5,
        }
    }
}

/// [0, 1] 区间内的综合变化分数
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize)]
pub struct ChangeScore(f32);

impl ChangeScore {
    pub fn new(value: f32) -> Self {
        if value.is_nan() {
            return Self(0.0);
        }
        Self(value.clamp(0.0, 1.0))
    }

    pub fn value(self) -> f32 {
        self.0
    }

    pub fn exceeds(self, threshold: f32) -> bool {
        self.0 > threshold
    }
}

/// 运动历史填满后，按方差给运动项加成（镜头切换时方差大）
pub fn variance_boost(motion_history: &BoundedHistory<f32>, weights: &SceneWeights) -> f32 {
    if !motion_history.is_full() {
        return 0.0;
    }
    (motion_history.variance() * weights.variance_gain).min(weights.variance_boost_cap)
}

pub fn combined_score(
    metrics: &FrameMetrics,
    motion_history: &BoundedHistory<f32>,
    weights: &SceneWeights,
) -> ChangeScore {
    let motion = metrics.motion_score + variance_boost(motion_history, weights);
    ChangeScore::new(
        weights.motion * motion
            + weights.color * metrics.color_score
            + weights.edge * metrics.edge_score
            + weights.center * metrics.center_score,
    )
}

pub fn should_process(
    metrics: &FrameMetrics,
    motion_history: &BoundedHistory<f32>,
    weights: &SceneWeights,
    threshold: f32,
) -> bool {
    combined_score(metrics, motion_history, weights).exceeds(threshold)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DecisionReason {
    /// 会话首帧
    FirstFrame,
    /// 尺寸变化导致基线作废
    BaselineReset,
    /// 上次推理失败，本帧强制重试
    Retry,
    SceneChange,
    BelowThreshold,
}

#[derive(Debug, Clone)]
pub struct SceneDecision {
    pub should_process: bool,
    pub reason: DecisionReason,
    pub score: Option<ChangeScore>,
    pub metrics: Option<FrameMetrics>,
}

impl SceneDecision {
    fn always(reason: DecisionReason) -> Self {
        Self {
            should_process: true,
            reason,
            score: None,
            metrics: None,
        }
    }
}

/// 场景变化检测器：持有唯一的基线帧和最近的运动分数
pub struct SceneChangeDetector {
    metrics_config: MetricsConfig,
    weights: SceneWeights,
    threshold: f32,
    baseline: Option<FrameBaseline>,
    motion_history: BoundedHistory<f32>,
    retry_pending: bool,
    baseline_resets: u64,
}

impl SceneChangeDetector {
    pub fn new() -> Self {
        Self::with_threshold(DEFAULT_SCENE_THRESHOLD)
    }

    pub fn with_threshold(threshold: f32) -> Self {
        Self::with_config(
            MetricsConfig::default(),
            SceneWeights::default(),
            FRAME_HISTORY_LENGTH,
            threshold,
        )
    }

    pub fn with_config(
        metrics_config: MetricsConfig,
        weights: SceneWeights,
        history_length: usize,
        threshold: f32,
    ) -> Self {
        Self {
            metrics_config,
            weights,
            threshold: threshold.clamp(0.0, 1.0),
            baseline: None,
            motion_history: BoundedHistory::new(history_length),
            retry_pending: false,
            baseline_resets: 0,
        }
    }

    /// 判断当前帧是否值得送去推理；跳过的帧不会更新基线
    pub fn evaluate(&mut self, frame: &Frame) -> SceneDecision {
        match compute_metrics(frame, self.baseline.as_ref(), &self.metrics_config) {
            Comparison::NoBaseline => SceneDecision::always(DecisionReason::FirstFrame),
            Comparison::DimensionMismatch { baseline, current } => {
                warn!(
                    "📐 Frame size changed {}x{} -> {}x{}, dropping baseline",
                    baseline.0, baseline.1, current.0, current.1
                );
                self.baseline = None;
                self.motion_history.clear();
                self.baseline_resets += 1;
                SceneDecision::always(DecisionReason::BaselineReset)
            }
            Comparison::Metrics(metrics) => {
                let score = combined_score(&metrics, &self.motion_history, &self.weights);
                self.motion_history.push(metrics.motion_score);

                let reason = if self.retry_pending {
                    DecisionReason::Retry
                } else if score.exceeds(self.threshold) {
                    DecisionReason::SceneChange
                } else {
                    DecisionReason::BelowThreshold
                };

                debug!(
                    "frame #{} motion={:.3} center={:.3} color={:.3} edge={:.3} score={:.3} threshold={:.3} -> {:?}",
                    frame.frame_number,
                    metrics.motion_score,
                    metrics.center_score,
                    metrics.color_score,
                    metrics.edge_score,
                    score.value(),
                    self.threshold,
                    reason
                );

                SceneDecision {
                    should_process: reason != DecisionReason::BelowThreshold,
                    reason,
                    score: Some(score),
                    metrics: Some(metrics),
                }
            }
        }
    }

    /// 帧已完成分类：成为新的基线
    pub fn commit(&mut self, frame: Frame, metrics: Option<FrameMetrics>) {
        let baseline = match metrics {
            Some(m) => FrameBaseline::from_metrics(frame, m),
            None => FrameBaseline::new(frame, &self.metrics_config),
        };
        self.baseline = Some(baseline);
        self.retry_pending = false;
    }

    /// 推理失败后，让下一帧绕过阈值
    pub fn request_retry(&mut self) {
        self.retry_pending = true;
    }

    pub fn set_threshold(&mut self, threshold: f32) {
        self.threshold = threshold.clamp(0.0, 1.0);
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn baseline(&self) -> Option<&FrameBaseline> {
        self.baseline.as_ref()
    }

    pub fn motion_history(&self) -> &BoundedHistory<f32> {
        &self.motion_history
    }

    pub fn baseline_resets(&self) -> u64 {
        self.baseline_resets
    }

    pub fn reset(&mut self) {
        self.baseline = None;
        self.motion_history.clear();
        self.retry_pending = false;
        self.baseline_resets = 0;
    }
}

impl Default for SceneChangeDetector {
    fn default() -> Self {
        Self::new()
    }
}
