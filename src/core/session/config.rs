use crate::core::classify::smoother::SmootherConfig;
use crate::core::error::ConfigError;
use crate::core::scene::detector::{SceneWeights, DEFAULT_SCENE_THRESHOLD, FRAME_HISTORY_LENGTH};
use crate::core::scene::metrics::MetricsConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// 采样会话配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SamplingConfig {
    /// 两次推理之间的最小间隔
    pub throttle_ms: u64,
    /// 跳过一帧后重新检查前的等待
    pub skip_delay_ms: u64,
    pub scene_detection_threshold: f32,
    /// 运动方差加成所需的历史长度
    pub frame_history_length: usize,
    /// 连续失败多少次后上报错误事件
    pub max_consecutive_failures: u32,
    pub input_width: u32,
    pub input_height: u32,
    pub metrics: MetricsConfig,
    pub weights: SceneWeights,
    pub smoother: SmootherConfig,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            throttle_ms: 200,
            skip_delay_ms: 100,
            scene_detection_threshold: DEFAULT_SCENE_THRESHOLD,
            frame_history_length: FRAME_HISTORY_LENGTH,
            max_consecutive_failures: 3,
            input_width: 224,
            input_height: 224,
            metrics: MetricsConfig::default(),
            weights: SceneWeights::default(),
            smoother: SmootherConfig::default(),
        }
    }
}

impl SamplingConfig {
    /// 快节奏画面：更灵敏
    pub fn for_high_motion() -> Self {
        Self {
            throttle_ms: 150,
            scene_detection_threshold: 0.12,
            smoother: SmootherConfig::for_high_motion(),
            ..Default::default()
        }
    }

    /// 慢节奏画面：更保守
    pub fn for_low_motion() -> Self {
        Self {
            throttle_ms: 300,
            skip_delay_ms: 150,
            scene_detection_threshold: 0.18,
            smoother: SmootherConfig::for_low_motion(),
            ..Default::default()
        }
    }

    /// 解析 JSON5（兼容普通 JSON）
    pub fn from_json5_str(input: &str) -> Result<Self, ConfigError> {
        let config: SamplingConfig = json5::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json5_str(&content)
    }

    pub fn throttle(&self) -> Duration {
        Duration::from_millis(self.throttle_ms)
    }

    pub fn skip_delay(&self) -> Duration {
        Duration::from_millis(self.skip_delay_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| -> Result<(), ConfigError> { Err(ConfigError::Invalid(msg)) };

        check_unit("scene_detection_threshold", self.scene_detection_threshold)?;
        if self.frame_history_length == 0 {
            return invalid("frame_history_length must be > 0".to_string());
        }
        if self.input_width == 0 || self.input_height == 0 {
            return invalid(format!(
                "input size must be non-zero, got {}x{}",
                self.input_width, self.input_height
            ));
        }

        let m = &self.metrics;
        if m.block_size == 0
            || m.block_sample_stride == 0
            || m.histogram_sample_stride == 0
            || m.edge_grid_stride == 0
        {
            return invalid("block size and sampling strides must be > 0".to_string());
        }
        check_unit("metrics.center_fraction", m.center_fraction)?;
        if !m.edge_threshold.is_finite() || m.edge_threshold < 0.0 {
            return invalid(format!("metrics.edge_threshold invalid: {}", m.edge_threshold));
        }

        let w = &self.weights;
        let weights = [
            ("weights.motion", w.motion),
            ("weights.color", w.color),
            ("weights.edge", w.edge),
            ("weights.center", w.center),
            ("weights.variance_gain", w.variance_gain),
            ("weights.variance_boost_cap", w.variance_boost_cap),
        ];
        for (name, value) in weights {
            if !value.is_finite() || value < 0.0 {
                return invalid(format!("{name} must be a non-negative number, got {value}"));
            }
        }
        if w.motion + w.color + w.edge + w.center <= 0.0 {
            return invalid("scene weights sum to zero".to_string());
        }

        let s = &self.smoother;
        if s.history_size == 0 {
            return invalid("smoother.history_size must be > 0".to_string());
        }
        check_unit("smoother.alpha", s.alpha)?;
        check_unit("smoother.upper_threshold", s.upper_threshold)?;
        check_unit("smoother.lower_threshold", s.lower_threshold)?;
        check_unit("smoother.majority_threshold", s.majority_threshold)?;
        check_unit("smoother.quick_change_confidence", s.quick_change_confidence)?;
        check_unit("smoother.commercial_low", s.commercial_low)?;
        check_unit("smoother.commercial_high", s.commercial_high)?;
        check_unit("smoother.recency_margin", s.recency_margin)?;
        if s.lower_threshold >= s.upper_threshold {
            return invalid(format!(
                "smoother.lower_threshold ({}) must be below upper_threshold ({})",
                s.lower_threshold, s.upper_threshold
            ));
        }
        if !s.stable_variance.is_finite() || s.stable_variance < 0.0 {
            return invalid(format!(
                "smoother.stable_variance invalid: {}",
                s.stable_variance
            ));
        }

        Ok(())
    }
}

fn check_unit(name: &str, value: f32) -> Result<(), ConfigError> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::Invalid(format!(
            "{name} must be within [0, 1], got {value}"
        )))
    }
}

/// 运行中可调整的设置（通过 watch 通道下发）
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RuntimeSettings {
    pub scene_detection_threshold: f32,
}

impl RuntimeSettings {
    pub fn from_config(config: &SamplingConfig) -> Self {
        Self {
            scene_detection_threshold: config.scene_detection_threshold,
        }
    }

    pub fn with_threshold(threshold: f32) -> Self {
        let threshold = if threshold.is_finite() {
            threshold.clamp(0.0, 1.0)
        } else {
            DEFAULT_SCENE_THRESHOLD
        };
        Self {
            scene_detection_threshold: threshold,
        }
    }
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self::from_config(&SamplingConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SamplingConfig::default();

        assert_eq!(config.throttle_ms, 200);
        assert_eq!(config.scene_detection_threshold, 0.15);
        assert_eq!(config.frame_history_length, 3);
        assert_eq!(config.smoother.history_size, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_presets_are_valid() {
        let high = SamplingConfig::for_high_motion();
        let low = SamplingConfig::for_low_motion();

        assert!(high.validate().is_ok());
        assert!(low.validate().is_ok());
        assert!(high.scene_detection_threshold < low.scene_detection_threshold);
        assert!(high.throttle_ms < low.throttle_ms);
    }

    #[test]
    fn test_partial_json5() {
        let config = SamplingConfig::from_json5_str(
            r#"{
                // 只覆盖部分字段
                throttle_ms: 500,
                scene_detection_threshold: 0.3,
                smoother: { alpha: 0.5 },
            }"#,
        )
        .unwrap();

        assert_eq!(config.throttle_ms, 500);
        assert_eq!(config.scene_detection_threshold, 0.3);
        assert_eq!(config.smoother.alpha, 0.5);
        assert_eq!(config.smoother.upper_threshold, 0.6);
        assert_eq!(config.metrics.block_size, 32);
    }

    #[test]
    fn test_plain_json_accepted() {
        let config =
            SamplingConfig::from_json5_str(r#"{"skip_delay_ms": 50, "max_consecutive_failures": 5}"#)
                .unwrap();

        assert_eq!(config.skip_delay_ms, 50);
        assert_eq!(config.max_consecutive_failures, 5);
    }

    #[test]
    fn test_rejects_invalid_values() {
        let bad_threshold = SamplingConfig::from_json5_str("{ scene_detection_threshold: 1.5 }");
        assert!(matches!(bad_threshold, Err(ConfigError::Invalid(_))));

        let inverted = SamplingConfig::from_json5_str(
            "{ smoother: { lower_threshold: 0.7, upper_threshold: 0.6 } }",
        );
        assert!(matches!(inverted, Err(ConfigError::Invalid(_))));

        let zero_block = SamplingConfig::from_json5_str("{ metrics: { block_size: 0 } }");
        assert!(matches!(zero_block, Err(ConfigError::Invalid(_))));

        let zero_weights = SamplingConfig::from_json5_str(
            "{ weights: { motion: 0, color: 0, edge: 0, center: 0 } }",
        );
        assert!(matches!(zero_weights, Err(ConfigError::Invalid(_))));

        let zero_history = SamplingConfig::from_json5_str("{ smoother: { history_size: 0 } }");
        assert!(matches!(zero_history, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_parse_error() {
        let result = SamplingConfig::from_json5_str("{ throttle_ms: ");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_load_missing_file() {
        let result = SamplingConfig::load("/definitely/not/here.json5");
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    #[test]
    fn test_runtime_settings_clamped() {
        assert_eq!(RuntimeSettings::with_threshold(2.0).scene_detection_threshold, 1.0);
        assert_eq!(RuntimeSettings::with_threshold(-1.0).scene_detection_threshold, 0.0);
        assert_eq!(
            RuntimeSettings::with_threshold(f32::NAN).scene_detection_threshold,
            0.15
        );
        assert_eq!(RuntimeSettings::default().scene_detection_threshold, 0.15);
    }
}
