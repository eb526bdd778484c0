use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::event::VideoEvent;
use crate::receiver::{ReceiverEvent, ReceiverEventSink, ReceiverFactory, ReceiverNotice, ReceiverOptions, VideoReceiver};
use crate::sink::{SinkBinder, VideoSink};
use crate::slot::{ChannelSlot, ChannelState, Endpoint};
use crate::state::AggregateState;
use crate::{ChannelId, MAX_CHANNELS};

/// 通道生命周期控制器
///
/// 只在控制线程上使用。可恢复错误在这里被吸收，只体现为状态变化，不向调用方返回。
pub struct LifecycleController {
    slots: Vec<ChannelSlot>,
    factory: Box<dyn ReceiverFactory>,
    binder: Arc<dyn SinkBinder>,
    state: Arc<AggregateState>,
    notices: mpsc::UnboundedSender<ReceiverNotice>,
    events: broadcast::Sender<VideoEvent>,
    low_latency: bool,
    /// 视频总开关；关闭时重启只重建接收器，不启动
    video_enabled: bool,
    next_instance: u64,
    /// 自上次取出以来被停止的通道
    stopped: Vec<ChannelId>,
}

impl LifecycleController {
    /// 创建控制器，并为每路创建接收器
    pub fn new(
        channel_count: usize,
        low_latency: bool,
        factory: Box<dyn ReceiverFactory>,
        binder: Arc<dyn SinkBinder>,
        state: Arc<AggregateState>,
        notices: mpsc::UnboundedSender<ReceiverNotice>,
        events: broadcast::Sender<VideoEvent>,
    ) -> Self {
        let mut controller = Self {
            slots: Vec::new(),
            factory,
            binder,
            state,
            notices,
            events,
            low_latency,
            video_enabled: true,
            next_instance: 1,
            stopped: Vec::new(),
        };

        let count = channel_count.min(MAX_CHANNELS);
        for id in 0..count {
            controller.slots.push(ChannelSlot::new(id));
            controller.recreate_receiver(id);
        }

        info!(channels = count, low_latency, "Lifecycle controller initialized");
        controller
    }

    pub fn channel_count(&self) -> usize {
        self.slots.len()
    }

    pub fn slot(&self, id: ChannelId) -> Option<&ChannelSlot> {
        self.slots.get(id)
    }

    pub fn slots(&self) -> &[ChannelSlot] {
        &self.slots
    }

    pub fn low_latency(&self) -> bool {
        self.low_latency
    }

    /// 打开/关闭视频总开关，不会启动或停止任何通道
    pub fn set_video_enabled(&mut self, enabled: bool) {
        self.video_enabled = enabled;
    }

    /// 取出自上次调用以来被停止的通道
    pub fn take_stopped(&mut self) -> Vec<ChannelId> {
        std::mem::take(&mut self.stopped)
    }

    pub fn aggregate(&self) -> &Arc<AggregateState> {
        &self.state
    }

    /// 处于 Streaming 状态的通道
    pub fn streaming_channels(&self) -> Vec<ChannelId> {
        self.slots
            .iter()
            .filter(|s| s.state == ChannelState::Streaming)
            .map(|s| s.id)
            .collect()
    }

    pub(crate) fn receiver_mut(&mut self, id: ChannelId) -> Option<&mut Box<dyn VideoReceiver>> {
        self.slots.get_mut(id).and_then(|s| s.receiver.as_mut())
    }

    /// 设置端点，返回是否发生变化；不触发重启
    pub fn set_endpoint(&mut self, id: ChannelId, endpoint: Endpoint) -> bool {
        match self.slots.get_mut(id) {
            Some(slot) if slot.endpoint != endpoint => {
                debug!(channel = id, from = %slot.endpoint, to = %endpoint, "Endpoint changed");
                slot.endpoint = endpoint;
                true
            }
            _ => false,
        }
    }

    /// 设置低延迟模式，在下次重建接收器时生效
    pub fn set_low_latency(&mut self, low_latency: bool) {
        self.low_latency = low_latency;
    }

    /// 界面层提供/移除显示目标
    pub fn set_sink(&mut self, id: ChannelId, sink: Option<VideoSink>) {
        let Some(slot) = self.slots.get_mut(id) else {
            warn!(channel = id, "Sink for unknown channel ignored");
            return;
        };
        if slot.sink == sink {
            return;
        }

        let was_started = slot.started;
        if was_started {
            self.stop_channel(id);
        }
        if let Some(slot) = self.slots.get_mut(id) {
            slot.sink = sink;
        }
        if was_started {
            self.start_channel(id);
        }
    }

    /// 启动通道
    ///
    /// 已在 Starting/Streaming 时不做任何事；视频已关闭、未配置端点、没有显示目标或接收器时记录日志后返回。
    pub fn start_channel(&mut self, id: ChannelId) {
        if !self.video_enabled {
            debug!(channel = id, "Video is stopped, start skipped");
            return;
        }
        let Some(slot) = self.slots.get_mut(id) else {
            warn!(channel = id, "Start requested for unknown channel");
            return;
        };

        if matches!(slot.state, ChannelState::Starting | ChannelState::Streaming) {
            debug!(channel = id, state = ?slot.state, "Channel already started");
            return;
        }
        if slot.held {
            debug!(channel = id, "Channel is held, start skipped");
            return;
        }
        if slot.endpoint.is_disabled() {
            debug!(channel = id, "No transport configured, channel stays disabled");
            return;
        }
        let Some(sink) = slot.sink.clone() else {
            warn!(channel = id, "Video receiver has no sink");
            return;
        };
        if slot.receiver.is_none() {
            warn!(channel = id, "Video receiver is not created");
            return;
        }

        // 上次拆除后仍绑定的显示目标先强制释放
        if slot.sink_bound {
            self.binder.release(id, &sink);
            slot.sink_bound = false;
        }
        self.binder.bind(id, &sink);
        slot.sink_bound = true;

        let generation = slot.next_generation();
        self.state.reset(id, generation);
        let events = ReceiverEventSink::new(id, generation, self.state.clone(), self.notices.clone());

        let result = match slot.receiver.as_mut() {
            Some(receiver) => receiver.start(&slot.endpoint, &sink, events),
            None => return,
        };
        match result {
            Ok(()) => {
                info!(channel = id, generation, endpoint = %slot.endpoint, "Video receiver starting");
                slot.started = true;
                slot.state = ChannelState::Starting;
            }
            Err(e) => {
                warn!(channel = id, endpoint = %slot.endpoint, "Failed to start video receiver: {}", e);
                self.binder.release(id, &sink);
                slot.sink_bound = false;
                slot.state = ChannelState::Disabled;
                let generation = slot.next_generation();
                self.state.reset(id, generation);
                return;
            }
        }

        let _ = self.events.send(VideoEvent::ChannelStateChanged {
            channel: id,
            state: ChannelState::Starting,
        });
    }

    /// 停止通道；从未启动或已停止时不做任何事，端点保留
    pub fn stop_channel(&mut self, id: ChannelId) {
        let Some(slot) = self.slots.get_mut(id) else {
            return;
        };

        if slot.state == ChannelState::Disabled && !slot.started && !slot.sink_bound {
            return;
        }

        slot.state = ChannelState::Stopping;
        if let Some(receiver) = slot.receiver.as_mut() {
            if let Err(e) = receiver.stop() {
                warn!(channel = id, "Failed to stop video receiver: {}", e);
            }
        }

        if slot.sink_bound {
            if let Some(sink) = slot.sink.as_ref() {
                self.binder.release(id, sink);
            }
            slot.sink_bound = false;
        }

        // 丢弃该实例之后的所有通知
        let generation = slot.next_generation();
        self.state.reset(id, generation);

        slot.started = false;
        slot.state = ChannelState::Disabled;
        self.stopped.push(id);
        info!(channel = id, "Video receiver stopped");

        let _ = self.events.send(VideoEvent::ChannelStateChanged {
            channel: id,
            state: ChannelState::Disabled,
        });
    }

    /// 停止、销毁并重建接收器，再启动
    ///
    /// 唯一会重建接收器的路径。
    pub fn restart_channel(&mut self, id: ChannelId) {
        if id >= self.slots.len() {
            warn!(channel = id, "Restart requested for unknown channel");
            return;
        }

        debug!(channel = id, "Restarting video channel");
        self.stop_channel(id);
        if self.recreate_receiver(id) {
            self.start_channel(id);
        }
    }

    /// 逐路重启，单路失败不影响其它通道
    pub fn restart_all(&mut self) {
        for id in 0..self.slots.len() {
            self.restart_channel(id);
        }
    }

    pub fn start_all(&mut self) {
        for id in 0..self.slots.len() {
            self.start_channel(id);
        }
    }

    pub fn stop_all(&mut self) {
        for id in 0..self.slots.len() {
            self.stop_channel(id);
        }
    }

    /// 拆除过期通道
    ///
    /// 超出新通道数的槽位与端点已清空的通道：停止并销毁接收器。必须在任何新的启动之前执行。
    pub fn cleanup_stale_channels(&mut self, channel_count: usize) {
        let count = channel_count.min(MAX_CHANNELS);

        while self.slots.len() > count {
            let id = self.slots.len() - 1;
            self.stop_channel(id);
            self.slots.pop();
            info!(channel = id, "Video channel removed");
        }

        for id in 0..self.slots.len() {
            let stale = {
                let slot = &self.slots[id];
                slot.endpoint.is_disabled() && (slot.started || slot.receiver.is_some())
            };
            if stale {
                self.stop_channel(id);
                self.slots[id].receiver = None;
                debug!(channel = id, "Receiver of disabled channel destroyed");
            }
        }
    }

    /// 扩充槽位到新通道数，返回新增的通道（尚未创建接收器）
    pub fn grow_channels(&mut self, channel_count: usize) -> Vec<ChannelId> {
        let count = channel_count.min(MAX_CHANNELS);
        let mut added = Vec::new();

        while self.slots.len() < count {
            let id = self.slots.len();
            let mut slot = ChannelSlot::new(id);
            // 与旧实例残留的通知隔离
            let generation = slot.next_generation();
            self.state.reset(id, generation);
            self.slots.push(slot);
            added.push(id);
            info!(channel = id, "Video channel added");
        }

        added
    }

    /// 挂起通道：停止并禁止启动，端点保留
    pub fn hold_channel(&mut self, id: ChannelId) {
        self.stop_channel(id);
        if let Some(slot) = self.slots.get_mut(id) {
            slot.held = true;
        }
    }

    /// 解除挂起并重启
    pub fn release_channel(&mut self, id: ChannelId) {
        match self.slots.get_mut(id) {
            Some(slot) => slot.held = false,
            None => return,
        }
        self.restart_channel(id);
    }

    /// 处理接收器通知，代数过期时返回 `false`
    pub fn handle_notice(&mut self, notice: &ReceiverNotice) -> bool {
        let id = notice.channel;
        let Some(slot) = self.slots.get_mut(id) else {
            return false;
        };
        if slot.generation != notice.generation {
            debug!(channel = id, generation = notice.generation, "Dropping notice from superseded receiver");
            return false;
        }

        let next = match (&notice.event, slot.state) {
            (ReceiverEvent::Streaming(true), ChannelState::Starting) => Some(ChannelState::Streaming),
            // 连接断开：保留启动意图，不自动重试
            (ReceiverEvent::Streaming(false), ChannelState::Streaming) => Some(ChannelState::Starting),
            (ReceiverEvent::Error(message), _) => {
                warn!(channel = id, "Video receiver error: {}", message);
                self.stop_channel(id);
                return true;
            }
            _ => None,
        };

        if let Some(state) = next {
            debug!(channel = id, from = ?slot.state, to = ?state, "Channel state changed");
            slot.state = state;
            let _ = self.events.send(VideoEvent::ChannelStateChanged { channel: id, state });
        }
        true
    }

    /// 停止全部通道并销毁接收器
    pub fn shutdown(&mut self) {
        self.stop_all();
        for slot in &mut self.slots {
            slot.receiver = None;
        }
        info!("Lifecycle controller shut down");
    }

    fn recreate_receiver(&mut self, id: ChannelId) -> bool {
        let options = ReceiverOptions {
            low_latency: self.low_latency,
        };
        let Some(slot) = self.slots.get_mut(id) else {
            return false;
        };

        // 先销毁旧实例
        slot.receiver = None;

        match self.factory.create(id, options) {
            Ok(receiver) => {
                slot.receiver = Some(receiver);
                slot.instance = self.next_instance;
                slot.low_latency = options.low_latency;
                self.next_instance += 1;
                debug!(channel = id, instance = slot.instance, low_latency = options.low_latency, "Video receiver created");
                true
            }
            Err(e) => {
                warn!(channel = id, "Failed to create video receiver: {}", e);
                false
            }
        }
    }
}
