use serde::Serialize;
use std::path::PathBuf;

use crate::slot::ChannelState;
use crate::state::FrameSize;
use crate::ChannelId;

/// 对外发布的视频事件
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum VideoEvent {
    StreamingChanged(bool),
    DecodingChanged(bool),
    RecordingChanged(bool),
    VideoSizeChanged(FrameSize),
    /// 至少一路录像请求被接受
    RecordingStarted,
    /// 拍照结果；空路径表示失败（无可用视频）
    ImageFileChanged(PathBuf),
    ChannelStateChanged { channel: ChannelId, state: ChannelState },
}
