//! 采样循环：取帧 → 场景判定 → 预处理 → 推理 → 平滑 → 事件
//!
//! 一个会话只有一个循环，帧严格按顺序处理，同一时刻最多一次推理。
//! 场景判定、缩放和推理都不在循环所在的工作线程上执行，stop 随时可以打断等待。

use super::config::{RuntimeSettings, SamplingConfig};
use super::events::{
    duration_millis, label_for, PipelineEvent, SessionReport, SessionStats, StopReason,
};
use super::source::FrameSource;
use crate::core::classify::backend::{validate_score, InferenceBackend};
use crate::core::classify::preprocess::Preprocessor;
use crate::core::classify::smoother::ClassificationSmoother;
use crate::core::error::InferenceError;
use crate::core::scene::detector::{DecisionReason, SceneChangeDetector};
use crate::core::scene::frame::Frame;
use crate::core::scene::metrics::FrameMetrics;
use log::{debug, error, info, warn};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep, sleep_until, Instant};

/// 等到 stop 信号；发送端被丢弃也视为停止
async fn stop_requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

pub struct SamplingLoop {
    config: SamplingConfig,
    source: Box<dyn FrameSource>,
    backend: Arc<dyn InferenceBackend>,
    detector: SceneChangeDetector,
    preprocessor: Preprocessor,
    smoother: ClassificationSmoother,
    events: mpsc::UnboundedSender<PipelineEvent>,
    settings: watch::Receiver<RuntimeSettings>,
    shutdown: watch::Receiver<bool>,
    stats: SessionStats,
    consecutive_failures: u32,
    last_emitted: Option<bool>,
}

impl SamplingLoop {
    pub fn new(
        config: SamplingConfig,
        source: Box<dyn FrameSource>,
        backend: Arc<dyn InferenceBackend>,
        events: mpsc::UnboundedSender<PipelineEvent>,
        settings: watch::Receiver<RuntimeSettings>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let threshold = settings.borrow().scene_detection_threshold;
        Self {
            detector: detector_for(&config, threshold),
            preprocessor: Preprocessor::with_size(config.input_width, config.input_height),
            smoother: ClassificationSmoother::with_config(config.smoother.clone()),
            config,
            source,
            backend,
            events,
            settings,
            shutdown,
            stats: SessionStats::default(),
            consecutive_failures: 0,
            last_emitted: None,
        }
    }

    /// 阻塞任务异常退出时检测器已丢失，从空基线重新开始
    fn rebuild_detector(&mut self) {
        let threshold = self.settings.borrow().scene_detection_threshold;
        self.detector = detector_for(&self.config, threshold);
    }

    fn is_stopped(&self) -> bool {
        *self.shutdown.borrow()
    }

    fn emit(&self, event: PipelineEvent) {
        // 展示层已经不再接收时直接丢弃
        let _ = self.events.send(event);
    }

    pub async fn run(mut self) -> SessionReport {
        let started = Instant::now();
        let throttle = self.config.throttle();
        let skip_delay = self.config.skip_delay();
        let mut last_inference: Option<Instant> = None;

        info!(
            "🏀 Sampling session started: backend={}, throttle={}ms, threshold={:.2}",
            self.backend.name(),
            self.config.throttle_ms,
            self.detector.threshold()
        );

        let warm_up = tokio::select! {
            biased;
            _ = stop_requested(&mut self.shutdown) => None,
            result = self.backend.warm_up() => Some(result),
        };
        if let Some(Err(e)) = warm_up {
            warn!("⚠️ Backend warm-up failed, continuing: {}", e);
        }

        let reason = loop {
            if self.is_stopped() {
                break StopReason::Requested;
            }

            if let Some(last) = last_inference {
                tokio::select! {
                    biased;
                    _ = stop_requested(&mut self.shutdown) => break StopReason::Requested,
                    _ = sleep_until(last + throttle) => {}
                }
            }

            let next = tokio::select! {
                biased;
                _ = stop_requested(&mut self.shutdown) => break StopReason::Requested,
                frame = self.source.next_frame() => frame,
            };
            let Some(frame) = next else {
                break StopReason::SourceEnded;
            };
            self.stats.frames_received += 1;

            let threshold = self.settings.borrow().scene_detection_threshold;
            self.detector.set_threshold(threshold);

            let mut detector = std::mem::take(&mut self.detector);
            let preprocessor = self.preprocessor;
            let mut analysis = tokio::task::spawn_blocking(move || {
                let decision = detector.evaluate(&frame);
                let tensor = decision
                    .should_process
                    .then(|| preprocessor.preprocess(&frame));
                (detector, frame, decision, tensor)
            });
            let analyzed = tokio::select! {
                biased;
                _ = stop_requested(&mut self.shutdown) => break StopReason::Requested,
                joined = &mut analysis => joined,
            };
            let (detector, frame, decision, tensor) = match analyzed {
                Ok(out) => out,
                Err(e) => {
                    error!("❌ Scene analysis task failed: {}", e);
                    self.rebuild_detector();
                    continue;
                }
            };
            self.detector = detector;
            if decision.reason == DecisionReason::BaselineReset {
                self.stats.baseline_resets += 1;
            }

            let Some(tensor) = tensor else {
                self.stats.frames_skipped += 1;
                tokio::select! {
                    biased;
                    _ = stop_requested(&mut self.shutdown) => break StopReason::Requested,
                    _ = sleep(skip_delay) => {}
                }
                continue;
            };

            let tensor = match tensor {
                Ok(tensor) => tensor,
                Err(e) => {
                    warn!("⚠️ Preprocess failed for frame #{}: {}", frame.frame_number, e);
                    self.record_failure(InferenceError::Backend(e.to_string()));
                    continue;
                }
            };

            last_inference = Some(Instant::now());
            let backend = Arc::clone(&self.backend);
            let mut inference = tokio::spawn(async move { backend.classify(&tensor).await });
            let result = tokio::select! {
                biased;
                _ = stop_requested(&mut self.shutdown) => {
                    inference.abort();
                    break StopReason::Requested;
                }
                joined = &mut inference => joined
                    .map_err(|e| InferenceError::Backend(format!("inference task failed: {e}")))
                    .and_then(|result| result)
                    .and_then(validate_score),
            };

            // stop 之后返回的结果不能再改动任何状态
            if self.is_stopped() {
                break StopReason::Requested;
            }

            let raw_score = match result {
                Ok(score) => score,
                Err(e) => {
                    self.record_failure(e);
                    continue;
                }
            };
            self.consecutive_failures = 0;

            let timestamp_ms = duration_millis(frame.timestamp);
            let frame_number = frame.frame_number;
            let smoothed = self.smoother.update(raw_score, started.elapsed());
            self.commit_baseline(frame, decision.metrics).await;
            self.stats.frames_classified += 1;

            self.emit(PipelineEvent::Classification {
                state: smoothed.state,
                label: label_for(smoothed.state),
                confidence: smoothed.confidence,
                raw_score,
                ema: smoothed.ema,
                timestamp_ms,
                frame_number,
            });

            if self.last_emitted != Some(smoothed.state) {
                info!(
                    "🔄 State changed: {} -> {} (frame #{}, reason {:?})",
                    self.last_emitted.map(label_for).unwrap_or("None"),
                    label_for(smoothed.state),
                    frame_number,
                    decision.reason
                );
                self.emit(PipelineEvent::StateChanged {
                    previous: self.last_emitted,
                    current: smoothed.state,
                    timestamp_ms,
                });
                self.last_emitted = Some(smoothed.state);
            }
        };

        self.stats.finish(started.elapsed());

        info!(
            "⏹️ Sampling session stopped ({:?}): received={}, classified={}, skipped={}, failures={}, fps={:.2}",
            reason,
            self.stats.frames_received,
            self.stats.frames_classified,
            self.stats.frames_skipped,
            self.stats.inference_failures,
            self.stats.effective_fps
        );

        self.emit(PipelineEvent::Stopped {
            reason,
            stats: self.stats.clone(),
        });

        SessionReport {
            reason,
            stats: self.stats,
            final_state: self.smoother.state().last_state,
        }
    }

    /// 新基线可能需要完整计算一遍指标，同样放到阻塞线程
    async fn commit_baseline(&mut self, frame: Frame, metrics: Option<FrameMetrics>) {
        let mut detector = std::mem::take(&mut self.detector);
        let committed = tokio::task::spawn_blocking(move || {
            detector.commit(frame, metrics);
            detector
        })
        .await;

        match committed {
            Ok(detector) => self.detector = detector,
            Err(e) => {
                error!("❌ Baseline update task failed: {}", e);
                self.rebuild_detector();
            }
        }
    }

    /// 本轮不更新平滑器和基线，下一帧强制重试
    fn record_failure(&mut self, err: InferenceError) {
        self.stats.inference_failures += 1;
        self.consecutive_failures += 1;
        self.detector.request_retry();

        warn!(
            "⚠️ Inference failed ({} in a row): {}",
            self.consecutive_failures, err
        );

        let limit = self.config.max_consecutive_failures.max(1);
        if self.consecutive_failures % limit == 0 {
            error!(
                "❌ {} consecutive inference failures, last error: {}",
                self.consecutive_failures, err
            );
            self.emit(PipelineEvent::InferenceError {
                message: err.to_string(),
                consecutive_failures: self.consecutive_failures,
            });
        } else {
            debug!("retrying on next frame");
        }
    }
}

fn detector_for(config: &SamplingConfig, threshold: f32) -> SceneChangeDetector {
    SceneChangeDetector::with_config(
        config.metrics.clone(),
        config.weights.clone(),
        config.frame_history_length,
        threshold,
    )
}
