//! 分类结果平滑：EMA + 置信度快速通道 + 滞回多数投票 + 近期高置信偏置
//!
//! 判定优先级固定为：快速通道 → 历史投票 → 近期高置信覆盖。

use crate::core::history::BoundedHistory;
use log::debug;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const BASE_CONFIDENCE: f32 = 0.5;
const CONFIDENCE_SLOPE: f32 = 2.0;
const DEAD_ZONE_CONFIDENCE: f32 = 0.3;
const STABILITY_BONUS: f32 = 0.15;
const COMMERCIAL_PENALTY: f32 = 0.6;
const COMMERCIAL_WINDOW: usize = 3;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SmootherConfig {
    /// 预测历史与分类历史的容量
    pub history_size: usize,
    /// EMA 系数
    pub alpha: f32,
    /// 进入“篮球”状态的阈值
    pub upper_threshold: f32,
    /// 退出“篮球”状态的阈值
    pub lower_threshold: f32,
    /// 多数投票比例
    pub majority_threshold: f32,
    /// 超过该置信度走快速通道
    pub quick_change_confidence: f32,
    /// 方差低于该值视为稳定
    pub stable_variance: f32,
    pub commercial_low: f32,
    pub commercial_high: f32,
    /// 高置信事件的有效时长
    pub recency_window_ms: u64,
    /// 近期均值距上阈值多近时沿用上次状态
    pub recency_margin: f32,
}

impl Default for SmootherConfig {
    fn default() -> Self {
        Self {
            history_size: 5,
            alpha: 0.3,
            upper_threshold: 0.6,
            lower_threshold: 0.4,
            majority_threshold: 0.6,
            quick_change_confidence: 0.8,
            stable_variance: 0.03,
            commercial_low: 0.3,
            commercial_high: 0.7,
            recency_window_ms: 2000,
            recency_margin: 0.1,
        }
    }
}

impl SmootherConfig {
    pub fn for_high_motion() -> Self {
        Self {
            history_size: 4,
            alpha: 0.4,
            ..Default::default()
        }
    }

    pub fn for_low_motion() -> Self {
        Self {
            history_size: 7,
            alpha: 0.2,
            quick_change_confidence: 0.85,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ClassificationState {
    Uninitialized,
    Basketball,
    NotBasketball,
}

impl ClassificationState {
    fn from_last(last: Option<bool>) -> Self {
        match last {
            None => ClassificationState::Uninitialized,
            Some(true) => ClassificationState::Basketball,
            Some(false) => ClassificationState::NotBasketball,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DecisionPath {
    FastPath,
    History,
    RecencyOverride,
}

/// 单次更新的输出
#[derive(Debug, Clone, Serialize)]
pub struct SmoothedClassification {
    pub state: bool,
    pub raw_score: f32,
    pub ema: f32,
    pub variance: f32,
    pub confidence: f32,
    pub commercial_pattern: bool,
    pub path: DecisionPath,
}

/// 一个采集会话内持续存在的平滑状态
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SmootherState {
    pub ema: Option<f32>,
    pub last_state: Option<bool>,
    /// 会话时钟上最近一次高置信判定的时间
    pub last_high_confidence: Option<Duration>,
}

/// 最近三次分数出现 低→高→低 或 高→低→高 的尖峰
pub fn detect_commercial_pattern(scores: &[f32], low: f32, high: f32) -> bool {
    if scores.len() < COMMERCIAL_WINDOW {
        return false;
    }
    let w = &scores[scores.len() - COMMERCIAL_WINDOW..];

    let spike = w[0] < low && w[1] > high && w[2] < low;
    let dip = w[0] > high && w[1] < low && w[2] > high;
    spike || dip
}

pub fn confidence_level(
    score: f32,
    is_stable: bool,
    has_commercial_pattern: bool,
    config: &SmootherConfig,
) -> f32 {
    let mut confidence = if score > config.upper_threshold {
        BASE_CONFIDENCE + (score - config.upper_threshold) * CONFIDENCE_SLOPE
    } else if score < config.lower_threshold {
        BASE_CONFIDENCE + (config.lower_threshold - score) * CONFIDENCE_SLOPE
    } else {
        DEAD_ZONE_CONFIDENCE
    };

    if is_stable {
        confidence += STABILITY_BONUS;
    }
    if has_commercial_pattern {
        confidence *= COMMERCIAL_PENALTY;
    }

    confidence.min(1.0)
}

pub struct ClassificationSmoother {
    config: SmootherConfig,
    state: SmootherState,
    predictions: BoundedHistory<f32>,
    classifications: BoundedHistory<bool>,
    update_count: u64,
}

impl ClassificationSmoother {
    pub fn new() -> Self {
        Self::with_config(SmootherConfig::default())
    }

    pub fn with_config(config: SmootherConfig) -> Self {
        Self {
            predictions: BoundedHistory::new(config.history_size),
            classifications: BoundedHistory::new(config.history_size),
            state: SmootherState::default(),
            config,
            update_count: 0,
        }
    }

    /// 输入一次原始推理分数，返回稳定后的状态
    ///
    /// `now` 是会话内的单调时间，只用于近期高置信判断。
    pub fn update(&mut self, raw_score: f32, now: Duration) -> SmoothedClassification {
        self.update_count += 1;
        self.predictions.push(raw_score);

        let alpha = self.config.alpha;
        let ema = match self.state.ema {
            None => raw_score,
            Some(prev) => alpha * raw_score + (1.0 - alpha) * prev,
        };
        self.state.ema = Some(ema);

        let variance = self.predictions.variance();
        let is_stable = variance < self.config.stable_variance;
        let commercial_pattern = detect_commercial_pattern(
            &self.predictions.recent(COMMERCIAL_WINDOW),
            self.config.commercial_low,
            self.config.commercial_high,
        );
        let confidence = confidence_level(raw_score, is_stable, commercial_pattern, &self.config);

        let (new_state, path) =
            if confidence > self.config.quick_change_confidence && !commercial_pattern {
                self.state.last_high_confidence = Some(now);
                (raw_score > self.config.upper_threshold, DecisionPath::FastPath)
            } else {
                let voted = self.state_from_history(raw_score);
                if self.recency_applies(now) {
                    (self.state.last_state.unwrap_or(false), DecisionPath::RecencyOverride)
                } else {
                    (voted, DecisionPath::History)
                }
            };

        self.state.last_state = Some(new_state);

        debug!(
            "Raw: {:.3}, EMA: {:.3}, Variance: {:.4}, Confidence: {:.2}, CommercialPattern: {}, Path: {:?}, Prediction: {}",
            raw_score,
            ema,
            variance,
            confidence,
            commercial_pattern,
            path,
            new_state
        );

        SmoothedClassification {
            state: new_state,
            raw_score,
            ema,
            variance,
            confidence,
            commercial_pattern,
            path,
        }
    }

    /// 滞回分类后写入分类历史，再做多数投票
    fn state_from_history(&mut self, score: f32) -> bool {
        let previous = self.state.last_state.unwrap_or(false);
        let current = if score > self.config.upper_threshold {
            true
        } else if score < self.config.lower_threshold {
            false
        } else {
            previous
        };
        self.classifications.push(current);

        match self.classifications.true_ratio() {
            Some(ratio) if ratio > self.config.majority_threshold => true,
            Some(ratio) if ratio < 1.0 - self.config.majority_threshold => false,
            _ => previous,
        }
    }

    fn recency_applies(&self, now: Duration) -> bool {
        let Some(last_high) = self.state.last_high_confidence else {
            return false;
        };
        let window = Duration::from_millis(self.config.recency_window_ms);
        if now.saturating_sub(last_high) >= window {
            return false;
        }
        (self.predictions.mean() - self.config.upper_threshold).abs() < self.config.recency_margin
    }

    pub fn current_state(&self) -> ClassificationState {
        ClassificationState::from_last(self.state.last_state)
    }

    pub fn state(&self) -> &SmootherState {
        &self.state
    }

    pub fn predictions(&self) -> &BoundedHistory<f32> {
        &self.predictions
    }

    pub fn classifications(&self) -> &BoundedHistory<bool> {
        &self.classifications
    }

    pub fn update_count(&self) -> u64 {
        self.update_count
    }

    pub fn config(&self) -> &SmootherConfig {
        &self.config
    }

    pub fn reset(&mut self) {
        self.state = SmootherState::default();
        self.predictions.clear();
        self.classifications.clear();
        self.update_count = 0;
    }
}

impl Default for ClassificationSmoother {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STEP: Duration = Duration::from_millis(200);

    fn feed(smoother: &mut ClassificationSmoother, scores: &[f32]) -> Vec<SmoothedClassification> {
        let start = STEP * smoother.update_count() as u32;
        scores
            .iter()
            .enumerate()
            .map(|(i, &s)| smoother.update(s, start + STEP * i as u32))
            .collect()
    }

    #[test]
    fn test_end_to_end_sequence() {
        let mut smoother = ClassificationSmoother::new();
        let states: Vec<bool> = feed(&mut smoother, &[0.1, 0.15, 0.2, 0.7, 0.75, 0.8, 0.78])
            .into_iter()
            .map(|r| r.state)
            .collect();

        assert_eq!(states, vec![false, false, false, true, true, true, true]);
        assert_eq!(smoother.current_state(), ClassificationState::Basketball);
    }

    #[test]
    fn test_hysteresis_dead_zone_keeps_state() {
        let mut smoother = ClassificationSmoother::new();
        let first = smoother.update(0.65, Duration::ZERO);
        assert!(first.state);
        assert_eq!(first.path, DecisionPath::History);

        let next = smoother.update(0.5, STEP);
        assert!(next.state);
        assert_eq!(smoother.classifications().to_vec(), vec![true, true]);
    }

    #[test]
    fn test_no_consensus_keeps_last_state() {
        let mut smoother = ClassificationSmoother::new();
        let results = feed(&mut smoother, &[0.65, 0.65, 0.35, 0.35, 0.35, 0.35]);

        assert!(results.iter().all(|r| r.path == DecisionPath::History));
        assert!(results[2].state);
        // [T, T, F, F]：没有多数，沿用上次
        assert!(results[3].state);
        assert!(results[4].state);
        // [T, F, F, F, F]
        assert!(!results[5].state);
    }

    #[test]
    fn test_fast_path_bypasses_history() {
        let mut smoother = ClassificationSmoother::new();
        feed(&mut smoother, &[0.35, 0.35, 0.35]);
        assert_eq!(smoother.classifications().to_vec(), vec![false, false, false]);

        let result = smoother.update(0.95, Duration::from_secs(1));
        assert!(result.confidence > 0.8);
        assert_eq!(result.path, DecisionPath::FastPath);
        assert!(result.state);
        // 快速通道不写分类历史
        assert_eq!(smoother.classifications().len(), 3);
        assert_eq!(smoother.state().last_high_confidence, Some(Duration::from_secs(1)));
    }

    #[test]
    fn test_fast_path_with_stable_signal() {
        let mut smoother = ClassificationSmoother::new();
        let results = feed(&mut smoother, &[0.9, 0.92, 0.95]);
        let last = results.last().unwrap();

        assert!(last.variance < 0.03);
        assert!(last.confidence > 0.8);
        assert_eq!(last.path, DecisionPath::FastPath);
        assert!(last.state);
    }

    #[test]
    fn test_commercial_spike_suppresses_fast_path() {
        let mut smoother = ClassificationSmoother::new();
        let results = feed(&mut smoother, &[0.1, 0.9, 0.1]);
        let last = &results[2];

        assert!(last.commercial_pattern);
        assert!(last.confidence <= 0.8);
        assert_ne!(last.path, DecisionPath::FastPath);
        assert!(!last.state);
    }

    #[test]
    fn test_commercial_dip_detected() {
        assert!(detect_commercial_pattern(&[0.9, 0.1, 0.9], 0.3, 0.7));
        assert!(detect_commercial_pattern(&[0.5, 0.1, 0.9, 0.1], 0.3, 0.7));
        assert!(!detect_commercial_pattern(&[0.1, 0.9], 0.3, 0.7));
        assert!(!detect_commercial_pattern(&[0.2, 0.6, 0.2], 0.3, 0.7));
    }

    #[test]
    fn test_confidence_levels() {
        let config = SmootherConfig::default();

        assert!((confidence_level(0.7, false, false, &config) - 0.7).abs() < 1e-6);
        assert!((confidence_level(0.3, false, false, &config) - 0.7).abs() < 1e-6);
        assert!((confidence_level(0.5, false, false, &config) - 0.3).abs() < 1e-6);
        assert!((confidence_level(0.5, true, false, &config) - 0.45).abs() < 1e-6);
        assert!((confidence_level(0.7, true, true, &config) - 0.51).abs() < 1e-6);
        assert_eq!(confidence_level(0.99, true, false, &config), 1.0);
    }

    #[test]
    fn test_ema_convex_combination() {
        let mut smoother = ClassificationSmoother::new();
        assert_eq!(smoother.state().ema, None);

        smoother.update(0.1, Duration::ZERO);
        assert_eq!(smoother.state().ema, Some(0.1));

        let result = smoother.update(0.9, STEP);
        assert!((result.ema - 0.34).abs() < 1e-6);
    }

    #[test]
    fn test_recency_override() {
        let mut smoother = ClassificationSmoother::new();
        let first = smoother.update(0.95, Duration::ZERO);
        assert_eq!(first.path, DecisionPath::FastPath);
        assert!(first.state);

        // 均值 0.625 紧贴上阈值，且距高置信判定不到 2 秒
        let second = smoother.update(0.3, Duration::from_millis(500));
        assert_eq!(second.path, DecisionPath::RecencyOverride);
        assert!(second.state);

        let third = smoother.update(0.3, Duration::from_secs(3));
        assert_eq!(third.path, DecisionPath::History);
        assert!(!third.state);
    }

    #[test]
    fn test_dead_zone_without_history_defaults_false() {
        let mut smoother = ClassificationSmoother::new();
        assert_eq!(smoother.current_state(), ClassificationState::Uninitialized);

        let result = smoother.update(0.5, Duration::ZERO);
        assert!(!result.state);
        assert_eq!(smoother.current_state(), ClassificationState::NotBasketball);
    }

    #[test]
    fn test_histories_bounded() {
        let mut smoother = ClassificationSmoother::new();
        feed(&mut smoother, &[0.45, 0.5, 0.55, 0.5, 0.45, 0.5]);

        assert_eq!(smoother.predictions().len(), 5);
        assert_eq!(smoother.predictions().to_vec(), vec![0.5, 0.55, 0.5, 0.45, 0.5]);
        assert_eq!(smoother.classifications().len(), 5);
    }

    #[test]
    fn test_reset() {
        let mut smoother = ClassificationSmoother::new();
        feed(&mut smoother, &[0.9, 0.9, 0.2]);
        smoother.reset();

        assert_eq!(smoother.state(), &SmootherState::default());
        assert!(smoother.predictions().is_empty());
        assert!(smoother.classifications().is_empty());
        assert_eq!(smoother.update_count(), 0);
    }
}
