// 媒体管线适配接口
//
// 管线本身（解码、协议解析、渲染）不在本 crate 内实现。每路一个接收器实例，
// 由 `ReceiverFactory` 创建；丢弃 Box 即销毁。所有请求立即返回，结果通过
// `ReceiverEventSink` 异步回报，可以在接收器自己的线程上调用。
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::sink::VideoSink;
use crate::slot::Endpoint;
use crate::state::{AggregateState, FrameSize};
use crate::ChannelId;

/// 创建接收器时生效的参数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReceiverOptions {
    pub low_latency: bool,
}

/// 接收器能力接口
pub trait VideoReceiver: Send {
    /// 请求开始接收；`Err` 表示请求被立即拒绝
    fn start(&mut self, endpoint: &Endpoint, sink: &VideoSink, events: ReceiverEventSink) -> Result<()>;

    fn stop(&mut self) -> Result<()>;

    fn start_recording(&mut self, path: &Path) -> Result<()>;

    fn stop_recording(&mut self) -> Result<()>;

    /// 单帧截图
    fn grab_image(&mut self, path: &Path) -> Result<()>;
}

/// 接收器工厂
pub trait ReceiverFactory: Send {
    fn create(&mut self, channel: ChannelId, options: ReceiverOptions) -> Result<Box<dyn VideoReceiver>>;
}

/// 接收器通知
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiverEvent {
    Streaming(bool),
    Decoding(bool),
    Recording(bool),
    FrameSize(FrameSize),
    /// 不可恢复错误，通道回到 Disabled
    Error(String),
}

/// 带代数标签的通知，转发给控制线程
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiverNotice {
    pub channel: ChannelId,
    pub generation: u32,
    pub event: ReceiverEvent,
}

/// 接收器回报通道
///
/// 每次启动生成一个新的实例。先写聚合状态（原子），再把通知转发给控制线程；
/// 代数过期的通知在两处都被丢弃。
#[derive(Clone)]
pub struct ReceiverEventSink {
    channel: ChannelId,
    generation: u32,
    state: Arc<AggregateState>,
    tx: mpsc::UnboundedSender<ReceiverNotice>,
}

impl ReceiverEventSink {
    pub fn new(
        channel: ChannelId,
        generation: u32,
        state: Arc<AggregateState>,
        tx: mpsc::UnboundedSender<ReceiverNotice>,
    ) -> Self {
        Self {
            channel,
            generation,
            state,
            tx,
        }
    }

    pub fn channel(&self) -> ChannelId {
        self.channel
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    pub fn streaming_changed(&self, streaming: bool) {
        self.emit(ReceiverEvent::Streaming(streaming));
    }

    pub fn decoding_changed(&self, decoding: bool) {
        self.emit(ReceiverEvent::Decoding(decoding));
    }

    pub fn recording_changed(&self, recording: bool) {
        self.emit(ReceiverEvent::Recording(recording));
    }

    pub fn frame_size(&self, size: FrameSize) {
        self.emit(ReceiverEvent::FrameSize(size));
    }

    pub fn error(&self, message: impl Into<String>) {
        self.emit(ReceiverEvent::Error(message.into()));
    }

    pub fn emit(&self, event: ReceiverEvent) {
        if !self.state.apply(self.channel, self.generation, &event) {
            return;
        }

        // 控制线程已退出时只保留聚合状态
        let _ = self.tx.send(ReceiverNotice {
            channel: self.channel,
            generation: self.generation,
            event,
        });
    }
}
