use crate::core::classify::preprocess::Tensor;
use crate::core::error::InferenceError;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// 推理后端：输入预处理后的张量，输出 [0,1] 的篮球置信度
///
/// 一个会话内只加载一次并复用；同一时刻最多只有一次调用在进行。
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    fn name(&self) -> &'static str;

    async fn classify(&self, tensor: &Tensor) -> Result<f32, InferenceError>;

    /// 可选的预热
    async fn warm_up(&self) -> Result<(), InferenceError> {
        Ok(())
    }
}

/// 校验后端返回的分数
pub fn validate_score(score: f32) -> Result<f32, InferenceError> {
    if score.is_finite() && (0.0..=1.0).contains(&score) {
        Ok(score)
    } else {
        Err(InferenceError::InvalidScore(score))
    }
}

/// 按脚本依次返回结果的后端（测试、回放）
pub struct ScriptedBackend {
    script: Mutex<VecDeque<Result<f32, InferenceError>>>,
    fallback: f32,
    delay: Option<Duration>,
    calls: AtomicUsize,
    warm_ups: AtomicUsize,
}

impl ScriptedBackend {
    pub fn new(script: Vec<Result<f32, InferenceError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback: 0.0,
            delay: None,
            calls: AtomicUsize::new(0),
            warm_ups: AtomicUsize::new(0),
        }
    }

    pub fn with_scores(scores: &[f32]) -> Self {
        Self::new(scores.iter().map(|&s| Ok(s)).collect())
    }

    /// 脚本用完之后返回的分数
    pub fn with_fallback(mut self, fallback: f32) -> Self {
        self.fallback = fallback;
        self
    }

    /// 模拟推理耗时
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn warm_up_count(&self) -> usize {
        self.warm_ups.load(Ordering::SeqCst)
    }

    fn next_result(&self) -> Result<f32, InferenceError> {
        let mut script = self
            .script
            .lock()
            .map_err(|_| InferenceError::Backend("script lock poisoned".to_string()))?;
        script.pop_front().unwrap_or(Ok(self.fallback))
    }
}

#[async_trait]
impl InferenceBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn classify(&self, _tensor: &Tensor) -> Result<f32, InferenceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.next_result()
    }

    async fn warm_up(&self) -> Result<(), InferenceError> {
        self.warm_ups.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// 基于平均亮度的轻量后端（没有模型时的降级方案）
pub struct MeanIntensityBackend {
    expected_shape: Option<[usize; 4]>,
}

impl MeanIntensityBackend {
    pub fn new() -> Self {
        Self {
            expected_shape: None,
        }
    }

    pub fn with_shape(shape: [usize; 4]) -> Self {
        Self {
            expected_shape: Some(shape),
        }
    }
}

impl Default for MeanIntensityBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl InferenceBackend for MeanIntensityBackend {
    fn name(&self) -> &'static str {
        "mean-intensity"
    }

    async fn classify(&self, tensor: &Tensor) -> Result<f32, InferenceError> {
        if let Some(expected) = self.expected_shape {
            if tensor.shape() != expected {
                return Err(InferenceError::ShapeMismatch {
                    expected,
                    actual: tensor.shape(),
                });
            }
        }

        let data = tensor.data();
        if data.is_empty() {
            return Err(InferenceError::EmptyOutput);
        }

        let mean = data.iter().sum::<f32>() / data.len() as f32;
        validate_score((mean / 255.0).clamp(0.0, 1.0))
    }
}
