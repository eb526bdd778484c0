use crate::settings::VideoSettings;

/// 可观察的配置键
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SettingKey {
    /// 第 n 路视频源类型
    Source(usize),
    /// 第 n 路地址（RTSP URL / UDP 端口 / TCP 地址 / UVC 设备）
    Uri(usize),
    LowLatency,
    ChannelCount,
    Recording,
    Photo,
}

impl SettingKey {
    /// 该键所属的通道
    pub fn channel(&self) -> Option<usize> {
        match self {
            Self::Source(id) | Self::Uri(id) => Some(*id),
            _ => None,
        }
    }
}

/// 比较新旧配置，返回发生变化的键
///
/// 顺序固定：通道数、低延迟、各通道（源、地址）、录像、拍照。
pub fn diff(old: &VideoSettings, new: &VideoSettings) -> Vec<SettingKey> {
    let mut keys = Vec::new();

    if old.active_channel_count() != new.active_channel_count() {
        keys.push(SettingKey::ChannelCount);
    }
    if old.low_latency_mode != new.low_latency_mode {
        keys.push(SettingKey::LowLatency);
    }

    let span = old.channels.len().max(new.channels.len());
    for id in 0..span {
        match (old.channels.get(id), new.channels.get(id)) {
            (Some(a), Some(b)) => {
                if a.source != b.source {
                    keys.push(SettingKey::Source(id));
                }
                if a.endpoint_differs(b) {
                    keys.push(SettingKey::Uri(id));
                }
            }
            (None, None) => {}
            _ => {
                keys.push(SettingKey::Source(id));
                keys.push(SettingKey::Uri(id));
            }
        }
    }

    if old.recording != new.recording {
        keys.push(SettingKey::Recording);
    }
    if old.photo_save_path != new.photo_save_path {
        keys.push(SettingKey::Photo);
    }

    keys
}
