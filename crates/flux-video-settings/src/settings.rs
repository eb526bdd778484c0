use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// 最大通道数
pub const MAX_CHANNELS: usize = 16;

/// 默认通道数（4 路图传）
pub const DEFAULT_CHANNEL_COUNT: usize = 4;

/// 默认 UDP 起始端口，第 i 路使用 `DEFAULT_UDP_PORT + i`
const DEFAULT_UDP_PORT: u16 = 5600;

/// 视频源类型
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoSource {
    /// 未启用
    #[default]
    Disabled,
    Rtsp,
    UdpH264,
    UdpH265,
    MpegTs,
    Tcp,
    /// 本地采集设备（仅第 0 路）
    Uvc,
}

impl VideoSource {
    /// 是否使用 UDP 端口
    pub fn uses_udp_port(&self) -> bool {
        matches!(self, Self::UdpH264 | Self::UdpH265 | Self::MpegTs)
    }

    /// 是否为网络源
    pub fn is_network(&self) -> bool {
        !matches!(self, Self::Disabled | Self::Uvc)
    }
}

/// 单路图传配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelSettings {
    pub source: VideoSource,
    pub rtsp_url: String,
    pub udp_port: u16,
    /// `host:port`
    pub tcp_url: String,
    pub uvc_device: String,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            source: VideoSource::Disabled,
            rtsp_url: String::new(),
            udp_port: DEFAULT_UDP_PORT,
            tcp_url: String::new(),
            uvc_device: String::new(),
        }
    }
}

impl ChannelSettings {
    pub fn rtsp(url: impl Into<String>) -> Self {
        Self {
            source: VideoSource::Rtsp,
            rtsp_url: url.into(),
            ..Default::default()
        }
    }

    pub fn udp(source: VideoSource, port: u16) -> Self {
        Self {
            source,
            udp_port: port,
            ..Default::default()
        }
    }

    pub fn tcp(host_port: impl Into<String>) -> Self {
        Self {
            source: VideoSource::Tcp,
            tcp_url: host_port.into(),
            ..Default::default()
        }
    }

    pub fn uvc(device: impl Into<String>) -> Self {
        Self {
            source: VideoSource::Uvc,
            uvc_device: device.into(),
            ..Default::default()
        }
    }

    /// 端点相关字段是否不同（不比较视频源类型）
    pub fn endpoint_differs(&self, other: &Self) -> bool {
        self.rtsp_url != other.rtsp_url
            || self.udp_port != other.udp_port
            || self.tcp_url != other.tcp_url
            || self.uvc_device != other.uvc_device
    }
}

/// 录像容器格式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingFormat {
    #[default]
    Mkv,
    Mov,
    Mp4,
}

impl RecordingFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Mkv => "mkv",
            Self::Mov => "mov",
            Self::Mp4 => "mp4",
        }
    }
}

/// 录像配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingSettings {
    /// 录像保存目录
    pub save_path: PathBuf,

    pub format: RecordingFormat,

    /// 是否启用存储上限
    pub storage_limit: bool,

    /// 存储上限（MB）
    pub max_storage_mb: u64,
}

impl Default for RecordingSettings {
    fn default() -> Self {
        Self {
            save_path: PathBuf::from("./video"),
            format: RecordingFormat::Mkv,
            storage_limit: false,
            max_storage_mb: 10 * 1024,
        }
    }
}

/// 视频配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoSettings {
    /// 图传数量
    pub channel_count: usize,

    /// 低延迟模式（所有通道共用，在管线创建时生效）
    pub low_latency_mode: bool,

    /// 拍照保存目录
    pub photo_save_path: PathBuf,

    pub channels: Vec<ChannelSettings>,

    pub recording: RecordingSettings,
}

impl Default for VideoSettings {
    fn default() -> Self {
        let channels = (0..DEFAULT_CHANNEL_COUNT)
            .map(|i| ChannelSettings {
                udp_port: DEFAULT_UDP_PORT + i as u16,
                ..Default::default()
            })
            .collect();

        Self {
            channel_count: DEFAULT_CHANNEL_COUNT,
            low_latency_mode: false,
            photo_save_path: PathBuf::from("./photo"),
            channels,
            recording: RecordingSettings::default(),
        }
    }
}

impl VideoSettings {
    /// 实际生效的通道数
    pub fn active_channel_count(&self) -> usize {
        self.channel_count.min(MAX_CHANNELS)
    }

    /// 获取通道配置，超出通道数时返回 `None`
    pub fn channel(&self, id: usize) -> Option<&ChannelSettings> {
        if id >= self.active_channel_count() {
            return None;
        }
        self.channels.get(id)
    }

    /// 设置通道配置，必要时补齐通道列表
    pub fn set_channel(&mut self, id: usize, channel: ChannelSettings) {
        if self.channels.len() <= id {
            self.channels.resize_with(id + 1, ChannelSettings::default);
        }
        self.channels[id] = channel;
    }
}
