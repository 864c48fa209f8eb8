//! 会话管理：同一时刻只允许一个采样会话

use super::config::{RuntimeSettings, SamplingConfig};
use super::events::{PipelineEvent, SessionReport};
use super::pipeline::SamplingLoop;
use super::source::FrameSource;
use crate::core::classify::backend::InferenceBackend;
use crate::core::error::SessionError;
use log::{error, info};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Idle,
    Sampling,
    Stopped,
}

struct ActiveSession {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<SessionReport>,
}

pub struct SessionManager {
    config: SamplingConfig,
    settings: watch::Sender<RuntimeSettings>,
    active: Option<ActiveSession>,
    last_report: Option<SessionReport>,
    sessions_started: u64,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::with_config(SamplingConfig::default())
    }

    pub fn with_config(config: SamplingConfig) -> Self {
        let (settings, _) = watch::channel(RuntimeSettings::from_config(&config));
        Self {
            config,
            settings,
            active: None,
            last_report: None,
            sessions_started: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        match &self.active {
            Some(session) if !session.handle.is_finished() => SessionState::Sampling,
            Some(_) => SessionState::Stopped,
            None if self.sessions_started == 0 => SessionState::Idle,
            None => SessionState::Stopped,
        }
    }

    /// 启动新会话，返回事件接收端；必须在 tokio 运行时内调用
    pub fn start(
        &mut self,
        source: Box<dyn FrameSource>,
        backend: Arc<dyn InferenceBackend>,
    ) -> Result<mpsc::UnboundedReceiver<PipelineEvent>, SessionError> {
        if self.state() == SessionState::Sampling {
            return Err(SessionError::AlreadyRunning);
        }
        self.config.validate()?;

        // 上一个会话已自行结束（采集端关闭），它的 Stopped 事件已经发出
        self.active = None;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (shutdown, shutdown_rx) = watch::channel(false);
        let sampling = SamplingLoop::new(
            self.config.clone(),
            source,
            backend,
            events_tx,
            self.settings.subscribe(),
            shutdown_rx,
        );

        let handle = tokio::spawn(sampling.run());
        self.active = Some(ActiveSession { shutdown, handle });
        self.sessions_started += 1;

        info!("▶️ Session #{} started", self.sessions_started);
        Ok(events_rx)
    }

    /// 请求停止并等待循环退出；进行中的推理结果会被丢弃
    pub async fn stop(&mut self) -> Option<SessionReport> {
        let session = self.active.take()?;
        let _ = session.shutdown.send(true);
        self.join(session.handle).await
    }

    /// 等待会话自然结束（采集端关闭）
    pub async fn wait(&mut self) -> Option<SessionReport> {
        let session = self.active.take()?;
        let ActiveSession { shutdown, handle } = session;
        let report = self.join(handle).await;
        drop(shutdown);
        report
    }

    async fn join(&mut self, handle: JoinHandle<SessionReport>) -> Option<SessionReport> {
        match handle.await {
            Ok(report) => {
                self.last_report = Some(report.clone());
                Some(report)
            }
            Err(e) => {
                error!("❌ Session task failed: {}", e);
                None
            }
        }
    }

    pub fn set_scene_detection_threshold(&self, value: f32) {
        let settings = RuntimeSettings::with_threshold(value);
        info!(
            "🎚️ Scene detection threshold set to {:.2}",
            settings.scene_detection_threshold
        );
        self.settings.send_replace(settings);
    }

    pub fn scene_detection_threshold(&self) -> f32 {
        self.settings.borrow().scene_detection_threshold
    }

    pub fn config(&self) -> &SamplingConfig {
        &self.config
    }

    pub fn last_report(&self) -> Option<&SessionReport> {
        self.last_report.as_ref()
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        if let Some(session) = self.active.take() {
            let _ = session.shutdown.send(true);
        }
    }
}
