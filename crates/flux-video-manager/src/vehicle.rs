use std::sync::{Arc, Weak};
use tokio::sync::watch;
use tracing::{debug, info};

/// 载具链路
pub trait Vehicle: Send + Sync {
    fn id(&self) -> u32;

    /// 通信中断状态订阅
    fn communication_lost(&self) -> watch::Receiver<bool>;

    /// 载具提供的主通道视频流地址，优先于本地配置
    fn video_stream_uri(&self) -> Option<String> {
        None
    }
}

/// 载具事件对主通道的要求
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimaryAction {
    Keep,
    /// 通信中断：停止主通道，端点保留
    Stop,
    /// 通信恢复：重启主通道
    Restart,
}

/// 当前载具绑定
///
/// 只持有弱引用；载具为空时主通道保持原配置，手动配置的视频流不受载具影响。
#[derive(Default)]
pub struct VehicleBinding {
    vehicle: Option<Weak<dyn Vehicle>>,
    link: Option<watch::Receiver<bool>>,
    communication_lost: bool,
    auto_stream: Option<String>,
}

impl VehicleBinding {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn vehicle(&self) -> Option<Arc<dyn Vehicle>> {
        self.vehicle.as_ref().and_then(Weak::upgrade)
    }

    pub fn is_communication_lost(&self) -> bool {
        self.communication_lost
    }

    /// 当前载具提供的视频流地址
    pub fn auto_stream(&self) -> Option<&str> {
        self.auto_stream.as_deref()
    }

    /// 切换当前载具：退订旧载具，订阅新载具
    pub fn set_active_vehicle(&mut self, vehicle: Option<Arc<dyn Vehicle>>) -> PrimaryAction {
        self.link = None;

        match vehicle {
            Some(vehicle) => {
                info!(vehicle = vehicle.id(), "Active vehicle changed");
                let link = vehicle.communication_lost();
                let lost = *link.borrow();
                self.auto_stream = vehicle
                    .video_stream_uri()
                    .map(|uri| uri.trim().to_string())
                    .filter(|uri| !uri.is_empty());
                if let Some(uri) = self.auto_stream.as_deref() {
                    info!(vehicle = vehicle.id(), uri, "Vehicle provides video stream");
                }
                self.link = Some(link);
                self.vehicle = Some(Arc::downgrade(&vehicle));
                self.communication_lost_changed(lost)
            }
            None => {
                debug!("No active vehicle");
                self.vehicle = None;
                self.auto_stream = None;
                // 不再有载具可以恢复通信，解除挂起
                self.communication_lost_changed(false)
            }
        }
    }

    pub fn communication_lost_changed(&mut self, lost: bool) -> PrimaryAction {
        if lost == self.communication_lost {
            return PrimaryAction::Keep;
        }
        self.communication_lost = lost;

        if lost {
            info!("Vehicle communication lost, stopping primary video");
            PrimaryAction::Stop
        } else {
            info!("Vehicle communication restored, restarting primary video");
            PrimaryAction::Restart
        }
    }

    /// 非阻塞地取出尚未处理的通信状态变化
    pub fn poll_changed(&mut self) -> Option<bool> {
        let link = self.link.as_mut()?;
        match link.has_changed() {
            Ok(true) => Some(*link.borrow_and_update()),
            Ok(false) => None,
            Err(_) => {
                self.link = None;
                None
            }
        }
    }

    /// 等待当前载具的通信状态变化；没有载具时永不返回
    ///
    /// 载具一端关闭时返回 `None` 并退订。
    pub async fn changed(&mut self) -> Option<bool> {
        let Some(link) = self.link.as_mut() else {
            return std::future::pending().await;
        };

        match link.changed().await {
            Ok(()) => Some(*link.borrow_and_update()),
            Err(_) => {
                debug!("Vehicle link closed");
                self.link = None;
                None
            }
        }
    }
}
