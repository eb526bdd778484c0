use std::collections::BTreeSet;
use tracing::{debug, info};

use flux_video_settings::{ChannelSettings, SettingKey, VideoSettings, VideoSource};

use crate::lifecycle::LifecycleController;
use crate::slot::Endpoint;
use crate::{ChannelId, PRIMARY_CHANNEL};

/// 由通道配置推导端点
///
/// 对该通道无效的配置（空地址、端口为 0、非主通道的 UVC）视为未配置。
pub fn endpoint_for(channel: ChannelId, settings: Option<&ChannelSettings>) -> Endpoint {
    let Some(settings) = settings else {
        return Endpoint::Disabled;
    };

    let udp = |scheme: &str| {
        if settings.udp_port == 0 {
            Endpoint::Disabled
        } else {
            Endpoint::Network(format!("{}://0.0.0.0:{}", scheme, settings.udp_port))
        }
    };

    match settings.source {
        VideoSource::Disabled => Endpoint::Disabled,
        VideoSource::Rtsp => match settings.rtsp_url.trim() {
            "" => Endpoint::Disabled,
            url => Endpoint::Network(url.to_string()),
        },
        VideoSource::UdpH264 => udp("udp"),
        VideoSource::UdpH265 => udp("udp265"),
        VideoSource::MpegTs => udp("mpegts"),
        VideoSource::Tcp => match settings.tcp_url.trim() {
            "" => Endpoint::Disabled,
            host => Endpoint::Network(format!("tcp://{}", host)),
        },
        VideoSource::Uvc => {
            let device = settings.uvc_device.trim();
            if channel == PRIMARY_CHANNEL && !device.is_empty() {
                Endpoint::Capture(device.to_string())
            } else {
                Endpoint::Disabled
            }
        }
    }
}

/// 配置变化反应器
///
/// 一批变化只处理一次：先拆除过期通道，再按需重启，每个通道在一批内最多重启一次。
/// 端点与低延迟参数都与槽位当前值比较，重复触发不会产生任何重启。
#[derive(Debug, Default)]
pub struct SettingsReactor {
    /// 载具提供的主通道端点
    primary_override: Option<Endpoint>,
}

impl SettingsReactor {
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置/清除载具提供的主通道端点，只影响之后的端点推导
    pub fn set_primary_override(&mut self, endpoint: Option<Endpoint>) {
        self.primary_override = endpoint;
    }

    pub fn has_primary_override(&self) -> bool {
        self.primary_override.is_some()
    }

    /// 通道端点：主通道优先使用载具提供的端点
    pub fn endpoint(&self, channel: ChannelId, settings: &VideoSettings) -> Endpoint {
        match &self.primary_override {
            Some(endpoint) if channel == PRIMARY_CHANNEL => endpoint.clone(),
            _ => endpoint_for(channel, settings.channel(channel)),
        }
    }

    /// 应用一批配置变化，返回被重启的通道
    pub fn apply(
        &self,
        controller: &mut LifecycleController,
        keys: &[SettingKey],
        settings: &VideoSettings,
    ) -> Vec<ChannelId> {
        if !keys.iter().any(Self::affects_channels) {
            return Vec::new();
        }

        let count = settings.active_channel_count();
        let mut pending = BTreeSet::new();

        // 现有通道先更新端点，使清理能看到已清空的通道
        for id in 0..controller.channel_count().min(count) {
            if controller.set_endpoint(id, self.endpoint(id, settings)) {
                pending.insert(id);
            }
        }

        controller.cleanup_stale_channels(count);

        for id in controller.grow_channels(count) {
            controller.set_endpoint(id, self.endpoint(id, settings));
            pending.insert(id);
        }

        if controller.low_latency() != settings.low_latency_mode {
            info!(low_latency = settings.low_latency_mode, "Low latency mode changed");
            controller.set_low_latency(settings.low_latency_mode);
        }

        let low_latency = controller.low_latency();
        let restarts: Vec<ChannelId> = controller
            .slots()
            .iter()
            .filter(|slot| !slot.endpoint().is_disabled())
            .filter(|slot| {
                pending.contains(&slot.id()) || slot.low_latency() != low_latency || !slot.has_receiver()
            })
            .map(|slot| slot.id())
            .collect();

        for &id in &restarts {
            controller.restart_channel(id);
        }

        debug!(keys = keys.len(), restarted = ?restarts, "Settings batch applied");
        restarts
    }

    fn affects_channels(key: &SettingKey) -> bool {
        key.channel().is_some() || matches!(key, SettingKey::LowLatency | SettingKey::ChannelCount)
    }
}
