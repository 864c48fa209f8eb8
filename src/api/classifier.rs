//! 篮球画面分类器（供宿主壳调用的同步接口）

use crate::core::classify::backend::InferenceBackend;
use crate::core::error::SessionError;
use crate::core::scene::frame::Frame;
use crate::core::session::{
    frame_channel, FrameSender, PipelineEvent, SamplingConfig, SessionManager, SessionReport,
    SessionState,
};
use log::{info, warn};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;
use tokio::sync::mpsc;

/// 篮球画面分类器：场景门控 + 推理 + 平滑
///
/// 宿主不需要自己的异步运行时；不要在 tokio 运行时内部调用阻塞方法。
///
/// ```ignore
/// let mut classifier = BasketballClassifier::create()?;
/// classifier.start(backend)?;
/// classifier.push_frame(width, height, rgba, timestamp_ms);
/// for event in classifier.poll_events() { /* 更新界面、静音 */ }
/// classifier.stop();
/// ```
pub struct BasketballClassifier {
    runtime: Runtime,
    manager: SessionManager,
    frames: Option<FrameSender>,
    events: Option<mpsc::UnboundedReceiver<PipelineEvent>>,
    next_frame_number: u64,
}

impl BasketballClassifier {
    pub fn create() -> Result<Self, SessionError> {
        Self::with_config(SamplingConfig::default())
    }

    pub fn with_config(config: SamplingConfig) -> Result<Self, SessionError> {
        config.validate()?;
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("courtside-session")
            .enable_time()
            .build()?;

        info!("🏀 BasketballClassifier: created");
        Ok(Self {
            runtime,
            manager: SessionManager::with_config(config),
            frames: None,
            events: None,
            next_frame_number: 0,
        })
    }

    /// 从 JSON5/JSON 配置文件创建
    pub fn from_config_file<P: AsRef<Path>>(path: P) -> Result<Self, SessionError> {
        Self::with_config(SamplingConfig::load(path)?)
    }

    /// 开始新的采集会话
    pub fn start(&mut self, backend: Arc<dyn InferenceBackend>) -> Result<(), SessionError> {
        // 只保留一帧：循环忙时新帧直接丢弃，取到的总是较新的画面
        let (sender, source) = frame_channel(1);
        let events = {
            let _guard = self.runtime.enter();
            self.manager.start(Box::new(source), backend)?
        };

        self.frames = Some(sender);
        self.events = Some(events);
        self.next_frame_number = 0;
        Ok(())
    }

    /// 投递一帧 RGBA 画面；会话未运行、帧无效或循环正忙时返回 false
    pub fn push_frame(&mut self, width: u32, height: u32, rgba: Vec<u8>, timestamp_ms: u64) -> bool {
        match Frame::new(width, height, rgba, timestamp_ms, self.next_frame_number) {
            Ok(frame) => self.offer(frame),
            Err(e) => {
                warn!("⚠️ Rejected frame: {}", e);
                false
            }
        }
    }

    /// 投递 JPEG/PNG 截图
    pub fn push_encoded(&mut self, bytes: &[u8], timestamp_ms: u64) -> bool {
        match Frame::from_encoded(bytes, timestamp_ms, self.next_frame_number) {
            Ok(frame) => self.offer(frame),
            Err(e) => {
                warn!("⚠️ Rejected encoded frame: {}", e);
                false
            }
        }
    }

    fn offer(&mut self, frame: Frame) -> bool {
        let Some(sender) = &self.frames else {
            return false;
        };
        let accepted = sender.offer(frame);
        if accepted {
            self.next_frame_number += 1;
        }
        accepted
    }

    /// 取出目前为止的所有事件
    pub fn poll_events(&mut self) -> Vec<PipelineEvent> {
        let mut out = Vec::new();
        if let Some(events) = self.events.as_mut() {
            while let Ok(event) = events.try_recv() {
                out.push(event);
            }
        }
        out
    }

    /// 阻塞等待下一条事件
    pub fn next_event_timeout(&mut self, timeout: Duration) -> Option<PipelineEvent> {
        let events = self.events.as_mut()?;
        self.runtime
            .block_on(async { tokio::time::timeout(timeout, events.recv()).await })
            .ok()
            .flatten()
    }

    /// 停止会话并返回统计；`Stopped` 事件仍可通过 `poll_events` 取到
    pub fn stop(&mut self) -> Option<SessionReport> {
        let report = self.runtime.block_on(self.manager.stop());
        self.frames = None;
        if let Some(report) = &report {
            info!(
                "⏹️ BasketballClassifier: stopped after {} classified frames",
                report.stats.frames_classified
            );
        }
        report
    }

    pub fn set_scene_detection_threshold(&self, value: f32) {
        self.manager.set_scene_detection_threshold(value);
    }

    pub fn scene_detection_threshold(&self) -> f32 {
        self.manager.scene_detection_threshold()
    }

    pub fn state(&self) -> SessionState {
        self.manager.state()
    }
}

impl Drop for BasketballClassifier {
    fn drop(&mut self) {
        if self.manager.state() == SessionState::Sampling {
            let _ = self.runtime.block_on(self.manager.stop());
        }
        self.frames = None;
        info!("🗑️ BasketballClassifier: released");
    }
}
