use crate::core::scene::frame::Frame;
use async_trait::async_trait;
use std::collections::VecDeque;
use tokio::sync::mpsc;

/// 画面采集端
#[async_trait]
pub trait FrameSource: Send {
    /// 下一帧；`None` 表示采集已结束
    async fn next_frame(&mut self) -> Option<Frame>;
}

/// 推送式采集：宿主通过 [`FrameSender`] 投递帧
pub struct ChannelFrameSource {
    receiver: mpsc::Receiver<Frame>,
}

#[derive(Clone)]
pub struct FrameSender {
    sender: mpsc::Sender<Frame>,
}

/// 创建一对采集通道；`capacity` 是允许排队的帧数
pub fn frame_channel(capacity: usize) -> (FrameSender, ChannelFrameSource) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    (FrameSender { sender }, ChannelFrameSource { receiver })
}

impl FrameSender {
    /// 等待队列有空位后投递；会话已结束时返回 false
    pub async fn send(&self, frame: Frame) -> bool {
        self.sender.send(frame).await.is_ok()
    }

    /// 不等待：队列已满（循环正忙）或会话已结束时丢弃该帧
    pub fn offer(&self, frame: Frame) -> bool {
        self.sender.try_send(frame).is_ok()
    }
}

#[async_trait]
impl FrameSource for ChannelFrameSource {
    async fn next_frame(&mut self) -> Option<Frame> {
        self.receiver.recv().await
    }
}

/// 回放一组预先准备好的帧
pub struct ReplayFrameSource {
    frames: VecDeque<Frame>,
}

impl ReplayFrameSource {
    pub fn new(frames: Vec<Frame>) -> Self {
        Self {
            frames: frames.into(),
        }
    }
}

#[async_trait]
impl FrameSource for ReplayFrameSource {
    async fn next_frame(&mut self) -> Option<Frame> {
        self.frames.pop_front()
    }
}
