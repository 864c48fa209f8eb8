#![cfg(feature = "backend-tract")]

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use log::info;
use tract_onnx::prelude::*;

use crate::core::classify::backend::{validate_score, InferenceBackend};
use crate::core::classify::preprocess::Tensor as InputTensor;
use crate::core::error::InferenceError;

/// 基于 tract 的 ONNX 分类后端
///
/// 输入为 NHWC `1×H×W×3` 的 0-255 浮点张量，输出取第一个元素作为篮球置信度。
/// `run` 是同步的 CPU 计算，放到阻塞线程池执行，不占用异步工作线程。
pub struct TractBackend {
    model: Arc<SimplePlan<TypedFact, Box<dyn TypedOp>>>,
    width: u32,
    height: u32,
}

impl TractBackend {
    pub fn load<P: AsRef<Path>>(
        model_path: P,
        width: u32,
        height: u32,
    ) -> Result<Self, InferenceError> {
        let model_path = model_path.as_ref();
        let load_err =
            |stage: &str, e: TractError| InferenceError::ModelLoad(format!("{stage}: {e}"));

        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .map_err(|e| load_err(&model_path.display().to_string(), e))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, height as usize, width as usize, 3),
                ),
            )
            .map_err(|e| load_err("input fact", e))?
            .into_optimized()
            .map_err(|e| load_err("optimize", e))?
            .into_runnable()
            .map_err(|e| load_err("runnable", e))?;

        info!(
            "🧠 ONNX model loaded: {} ({}x{})",
            model_path.display(),
            width,
            height
        );

        Ok(Self {
            model: Arc::new(model),
            width,
            height,
        })
    }

    fn input_shape(&self) -> [usize; 4] {
        [1, self.height as usize, self.width as usize, 3]
    }

    fn build_input(&self, tensor: &InputTensor) -> Result<Tensor, InferenceError> {
        let expected = self.input_shape();
        if tensor.shape() != expected {
            return Err(InferenceError::ShapeMismatch {
                expected,
                actual: tensor.shape(),
            });
        }

        let array = tract_ndarray::Array4::from_shape_vec(
            (expected[0], expected[1], expected[2], expected[3]),
            tensor.data().to_vec(),
        )
        .map_err(|e| InferenceError::Backend(e.to_string()))?;

        Ok(array.into_tensor())
    }

    async fn run_blocking(&self, input: Tensor) -> Result<TVec<TValue>, InferenceError> {
        let model = Arc::clone(&self.model);
        tokio::task::spawn_blocking(move || model.run(tvec!(input.into())))
            .await
            .map_err(|e| InferenceError::Backend(format!("inference task join error: {e}")))?
            .map_err(|e| InferenceError::Backend(format!("ONNX inference failed: {e}")))
    }

    fn extract_score(outputs: TVec<TValue>) -> Result<f32, InferenceError> {
        let output = outputs.first().ok_or(InferenceError::EmptyOutput)?;
        let scores = output
            .to_array_view::<f32>()
            .map_err(|e| InferenceError::Backend(format!("output tensor was not f32: {e}")))?;
        let score = scores.iter().next().copied().ok_or(InferenceError::EmptyOutput)?;
        validate_score(score)
    }
}

#[async_trait]
impl InferenceBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    async fn classify(&self, tensor: &InputTensor) -> Result<f32, InferenceError> {
        let input = self.build_input(tensor)?;
        let outputs = self.run_blocking(input).await?;
        Self::extract_score(outputs)
    }

    /// 用全零输入跑一遍，提前完成首次推理的初始化
    async fn warm_up(&self) -> Result<(), InferenceError> {
        let [n, h, w, c] = self.input_shape();
        let input = tract_ndarray::Array4::<f32>::zeros((n, h, w, c)).into_tensor();
        let started = std::time::Instant::now();
        self.run_blocking(input).await?;
        info!("🔥 ONNX model warmed up in {:?}", started.elapsed());
        Ok(())
    }
}
