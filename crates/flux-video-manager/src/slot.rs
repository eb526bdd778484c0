use serde::Serialize;
use std::fmt;

use crate::receiver::VideoReceiver;
use crate::sink::VideoSink;
use crate::state::GENERATION_MASK;
use crate::ChannelId;

/// 通道端点
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "target", rename_all = "lowercase")]
pub enum Endpoint {
    /// 未配置，通道不可启动
    #[default]
    Disabled,
    /// 网络传输地址（rtsp:// udp:// udp265:// mpegts:// tcp://）
    Network(String),
    /// 本地采集设备 ID（仅第 0 路）
    Capture(String),
}

impl Endpoint {
    /// 传输地址，未配置时为空串
    pub fn uri(&self) -> &str {
        match self {
            Self::Disabled => "",
            Self::Network(uri) | Self::Capture(uri) => uri,
        }
    }

    pub fn is_disabled(&self) -> bool {
        matches!(self, Self::Disabled)
    }

    pub fn is_capture(&self) -> bool {
        matches!(self, Self::Capture(_))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disabled => write!(f, "<disabled>"),
            Self::Network(uri) => write!(f, "{}", uri),
            Self::Capture(device) => write!(f, "capture:{}", device),
        }
    }
}

/// 通道状态机
///
/// `Disabled -> Starting -> Streaming -> Stopping -> Disabled`，接收器报错时回到 `Disabled`。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelState {
    #[default]
    Disabled,
    Starting,
    Streaming,
    Stopping,
}

/// 单路图传槽位
///
/// 只由 `LifecycleController` 修改。`started` 表示已发出启动请求（意图），
/// 并不代表媒体数据已经到达。
pub struct ChannelSlot {
    pub(crate) id: ChannelId,
    pub(crate) receiver: Option<Box<dyn VideoReceiver>>,
    /// 当前接收器实例编号，每次重建递增
    pub(crate) instance: u64,
    /// 事件代数，每次启动/停止递增，过期代数的通知被丢弃
    pub(crate) generation: u32,
    pub(crate) sink: Option<VideoSink>,
    pub(crate) sink_bound: bool,
    pub(crate) endpoint: Endpoint,
    pub(crate) started: bool,
    pub(crate) low_latency: bool,
    /// 被外部条件（链路中断）挂起，期间不允许启动
    pub(crate) held: bool,
    pub(crate) state: ChannelState,
}

impl ChannelSlot {
    pub(crate) fn new(id: ChannelId) -> Self {
        Self {
            id,
            receiver: None,
            instance: 0,
            generation: 0,
            sink: None,
            sink_bound: false,
            endpoint: Endpoint::Disabled,
            started: false,
            low_latency: false,
            held: false,
            state: ChannelState::Disabled,
        }
    }

    pub(crate) fn next_generation(&mut self) -> u32 {
        self.generation = self.generation.wrapping_add(1) & GENERATION_MASK;
        self.generation
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn is_held(&self) -> bool {
        self.held
    }

    pub fn has_receiver(&self) -> bool {
        self.receiver.is_some()
    }

    pub fn instance(&self) -> u64 {
        self.instance
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    pub fn low_latency(&self) -> bool {
        self.low_latency
    }

    pub fn sink(&self) -> Option<&VideoSink> {
        self.sink.as_ref()
    }

    pub fn is_sink_bound(&self) -> bool {
        self.sink_bound
    }
}

impl fmt::Debug for ChannelSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelSlot")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("endpoint", &self.endpoint)
            .field("started", &self.started)
            .field("instance", &self.instance)
            .field("generation", &self.generation)
            .field("receiver", &self.receiver.as_ref().map(|_| "VideoReceiver"))
            .field("sink_bound", &self.sink_bound)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_uri() {
        assert_eq!(Endpoint::Disabled.uri(), "");
        assert_eq!(Endpoint::Network("udp://0.0.0.0:5600".into()).uri(), "udp://0.0.0.0:5600");
        assert!(Endpoint::Capture("/dev/video0".into()).is_capture());
    }

    #[test]
    fn test_generation_wraps_within_mask() {
        let mut slot = ChannelSlot::new(0);
        slot.generation = GENERATION_MASK;
        assert_eq!(slot.next_generation(), 0);
        assert_eq!(slot.next_generation(), 1);
    }
}
