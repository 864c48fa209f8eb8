use serde::Serialize;
use std::time::Duration;

pub const BASKETBALL_LABEL: &str = "Basketball Detected";
pub const NO_BASKETBALL_LABEL: &str = "No Basketball";

/// 毫秒数，超出 u64 时饱和
pub fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

pub fn label_for(state: bool) -> &'static str {
    if state {
        BASKETBALL_LABEL
    } else {
        NO_BASKETBALL_LABEL
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// 外部调用 stop
    Requested,
    /// 采集端已结束
    SourceEnded,
}

/// 会话统计
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionStats {
    pub frames_received: u64,
    pub frames_skipped: u64,
    pub frames_classified: u64,
    pub inference_failures: u64,
    pub baseline_resets: u64,
    pub duration_ms: u64,
    /// 每秒完成分类的帧数
    pub effective_fps: f32,
}

impl SessionStats {
    pub fn finish(&mut self, elapsed: Duration) {
        self.duration_ms = duration_millis(elapsed);
        let secs = elapsed.as_secs_f32();
        self.effective_fps = if secs > 0.0 {
            self.frames_classified as f32 / secs
        } else {
            0.0
        };
    }
}

/// 发往展示层的事件
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    /// 每个完成分类的帧一条
    Classification {
        state: bool,
        label: &'static str,
        confidence: f32,
        raw_score: f32,
        ema: f32,
        timestamp_ms: u64,
        frame_number: u64,
    },
    /// 稳定状态发生变化（会话第一条分类也算）
    StateChanged {
        previous: Option<bool>,
        current: bool,
        timestamp_ms: u64,
    },
    /// 连续推理失败，非致命
    InferenceError {
        message: String,
        consecutive_failures: u32,
    },
    Stopped {
        reason: StopReason,
        stats: SessionStats,
    },
}

impl PipelineEvent {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// 会话结束后的汇总
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionReport {
    pub reason: StopReason,
    pub stats: SessionStats,
    pub final_state: Option<bool>,
}
