use arc_swap::ArcSwap;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use flux_video_settings::{SettingKey, SettingsChange, VideoSettings};

use crate::event::VideoEvent;
use crate::lifecycle::LifecycleController;
use crate::reactor::{endpoint_for, SettingsReactor};
use crate::receiver::{ReceiverFactory, ReceiverNotice};
use crate::recording::{RecordingCoordinator, SubtitleWriter};
use crate::sink::{SinkBinder, VideoSink};
use crate::slot::{ChannelState, Endpoint};
use crate::state::{AggregateState, FrameSize};
use crate::vehicle::{PrimaryAction, Vehicle, VehicleBinding};
use crate::{ChannelId, PRIMARY_CHANNEL, THERMAL_CHANNEL};

/// 当前载具（可能为空）
pub type ActiveVehicle = Option<Arc<dyn Vehicle>>;

/// 控制线程命令
#[derive(Debug)]
pub enum VideoCommand {
    StartVideo,
    StopVideo,
    StartRecording(Option<PathBuf>),
    StopRecording,
    GrabImage(Option<PathBuf>),
    SetSink {
        channel: ChannelId,
        sink: Option<VideoSink>,
    },
    /// 处理完此前的全部命令与排队通知后应答
    Flush(oneshot::Sender<()>),
    Shutdown,
}

/// 单路状态快照
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelStatus {
    pub id: ChannelId,
    pub state: ChannelState,
    pub endpoint: Endpoint,
    pub started: bool,
    pub held: bool,
    pub has_sink: bool,
    pub instance: u64,
    pub generation: u32,
    pub streaming: bool,
    pub decoding: bool,
    pub recording: bool,
}

/// 管理器状态快照，每处理完一条消息发布一次
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ManagerStatus {
    pub channels: Vec<ChannelStatus>,
    pub has_video: bool,
    pub is_uvc: bool,
    pub uvc_video_source_id: String,
    pub low_latency: bool,
    pub communication_lost: bool,
    /// 主通道使用载具提供的视频流
    pub auto_stream_configured: bool,
    pub image_file: PathBuf,
    pub recording_files: Vec<PathBuf>,
}

/// 视频管理器（控制线程）
///
/// 所有生命周期决策都在 `run` 所在的任务中完成。
pub struct VideoManager {
    controller: LifecycleController,
    reactor: SettingsReactor,
    recording: RecordingCoordinator,
    vehicle: VehicleBinding,
    settings: VideoSettings,
    commands: mpsc::UnboundedReceiver<VideoCommand>,
    notices: mpsc::UnboundedReceiver<ReceiverNotice>,
    settings_rx: Option<mpsc::Receiver<SettingsChange>>,
    vehicle_rx: Option<watch::Receiver<ActiveVehicle>>,
    status: Arc<ArcSwap<ManagerStatus>>,
}

impl VideoManager {
    pub fn builder(factory: Box<dyn ReceiverFactory>, binder: Arc<dyn SinkBinder>) -> VideoManagerBuilder {
        VideoManagerBuilder::new(factory, binder)
    }

    /// 运行控制循环，直到收到 `Shutdown` 或所有句柄被丢弃
    pub async fn run(mut self) {
        info!(channels = self.controller.channel_count(), "Video manager started");

        if let Some(rx) = self.vehicle_rx.as_mut() {
            let vehicle = rx.borrow_and_update().clone();
            self.on_vehicle_changed(vehicle);
        }
        self.controller.start_all();
        self.sync_stopped();
        self.publish_status();

        loop {
            tokio::select! {
                command = self.commands.recv() => {
                    let Some(command) = command else {
                        debug!("All video manager handles dropped");
                        break;
                    };
                    if !self.handle_command(command) {
                        break;
                    }
                }
                Some(notice) = self.notices.recv() => {
                    self.handle_notice(notice);
                }
                change = next_settings(&mut self.settings_rx) => match change {
                    Some(change) => self.apply_settings(change),
                    None => {
                        debug!("Settings subscription closed");
                        self.settings_rx = None;
                    }
                },
                vehicle = next_vehicle(&mut self.vehicle_rx) => match vehicle {
                    Some(vehicle) => self.on_vehicle_changed(vehicle),
                    None => self.vehicle_rx = None,
                },
                Some(lost) = self.vehicle.changed() => {
                    let action = self.vehicle.communication_lost_changed(lost);
                    self.apply_primary_action(action);
                }
            }

            self.sync_stopped();
            self.publish_status();
        }

        self.shutdown();
        self.publish_status();
        info!("Video manager stopped");
    }

    fn handle_command(&mut self, command: VideoCommand) -> bool {
        debug!(?command, "Video command");

        match command {
            VideoCommand::StartVideo => {
                self.controller.set_video_enabled(true);
                self.controller.start_all();
            }
            VideoCommand::StopVideo => {
                self.controller.set_video_enabled(false);
                if self.controller.aggregate().recording() {
                    self.recording.stop_recording(&mut self.controller);
                }
                self.controller.stop_all();
            }
            VideoCommand::StartRecording(path) => {
                self.recording.start_recording(&mut self.controller, path.as_deref());
            }
            VideoCommand::StopRecording => {
                self.recording.stop_recording(&mut self.controller);
            }
            VideoCommand::GrabImage(path) => {
                self.recording.grab_image(&mut self.controller, path.as_deref());
            }
            VideoCommand::SetSink { channel, sink } => {
                let provided = sink.is_some();
                self.controller.set_sink(channel, sink);
                if provided {
                    self.controller.start_channel(channel);
                }
            }
            VideoCommand::Flush(reply) => {
                self.drain_pending();
                self.sync_stopped();
                self.publish_status();
                let _ = reply.send(());
            }
            VideoCommand::Shutdown => return false,
        }

        true
    }

    fn handle_notice(&mut self, notice: ReceiverNotice) {
        if self.controller.handle_notice(&notice) {
            self.recording.on_receiver_event(notice.channel, &notice.event);
        }
    }

    /// 把被停止的通道同步给录像协调器
    fn sync_stopped(&mut self) {
        for id in self.controller.take_stopped() {
            self.recording.on_channel_stopped(id);
        }
    }

    fn apply_settings(&mut self, change: SettingsChange) {
        debug!(keys = ?change.keys, "Video settings changed");
        self.settings = change.settings;

        if change
            .keys
            .iter()
            .any(|k| matches!(k, SettingKey::Recording | SettingKey::Photo))
        {
            self.recording.apply_settings(&self.settings);
        }

        self.reactor.apply(&mut self.controller, &change.keys, &self.settings);
    }

    fn on_vehicle_changed(&mut self, vehicle: ActiveVehicle) {
        let action = self.vehicle.set_active_vehicle(vehicle);

        let auto_stream = self.vehicle.auto_stream().map(|uri| Endpoint::Network(uri.to_string()));
        self.reactor.set_primary_override(auto_stream);
        let endpoint = self.reactor.endpoint(PRIMARY_CHANNEL, &self.settings);
        let changed = self.controller.set_endpoint(PRIMARY_CHANNEL, endpoint);

        match action {
            PrimaryAction::Keep if changed => self.controller.restart_channel(PRIMARY_CHANNEL),
            action => self.apply_primary_action(action),
        }
    }

    fn apply_primary_action(&mut self, action: PrimaryAction) {
        match action {
            PrimaryAction::Keep => {}
            PrimaryAction::Stop => self.controller.hold_channel(PRIMARY_CHANNEL),
            PrimaryAction::Restart => self.controller.release_channel(PRIMARY_CHANNEL),
        }
    }

    /// 处理所有已排队的输入
    fn drain_pending(&mut self) {
        while let Some(change) = self.settings_rx.as_mut().and_then(|rx| rx.try_recv().ok()) {
            self.apply_settings(change);
        }

        let vehicle = match self.vehicle_rx.as_mut() {
            Some(rx) if rx.has_changed().unwrap_or(false) => Some(rx.borrow_and_update().clone()),
            _ => None,
        };
        if let Some(vehicle) = vehicle {
            self.on_vehicle_changed(vehicle);
        }

        if let Some(lost) = self.vehicle.poll_changed() {
            let action = self.vehicle.communication_lost_changed(lost);
            self.apply_primary_action(action);
        }

        self.sync_stopped();
        while let Ok(notice) = self.notices.try_recv() {
            self.handle_notice(notice);
        }
    }

    fn shutdown(&mut self) {
        self.drain_pending();
        self.recording.stop_recording(&mut self.controller);
        self.controller.shutdown();
    }

    fn publish_status(&self) {
        let state = self.controller.aggregate();
        let channels: Vec<ChannelStatus> = self
            .controller
            .slots()
            .iter()
            .map(|slot| ChannelStatus {
                id: slot.id(),
                state: slot.state(),
                endpoint: slot.endpoint().clone(),
                started: slot.is_started(),
                held: slot.is_held(),
                has_sink: slot.sink().is_some(),
                instance: slot.instance(),
                generation: slot.generation(),
                streaming: state.channel_streaming(slot.id()),
                decoding: state.channel_decoding(slot.id()),
                recording: state.channel_recording(slot.id()),
            })
            .collect();

        let uvc_video_source_id = match channels.first().map(|c| &c.endpoint) {
            Some(Endpoint::Capture(device)) => device.clone(),
            _ => String::new(),
        };

        self.status.store(Arc::new(ManagerStatus {
            has_video: channels.iter().any(|c| !c.endpoint.is_disabled()),
            is_uvc: !uvc_video_source_id.is_empty(),
            uvc_video_source_id,
            channels,
            low_latency: self.controller.low_latency(),
            communication_lost: self.vehicle.is_communication_lost(),
            auto_stream_configured: self.reactor.has_primary_override(),
            image_file: self.recording.image_file().to_path_buf(),
            recording_files: self.recording.recording_files(),
        }));
    }
}

async fn next_settings(rx: &mut Option<mpsc::Receiver<SettingsChange>>) -> Option<SettingsChange> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn next_vehicle(rx: &mut Option<watch::Receiver<ActiveVehicle>>) -> Option<ActiveVehicle> {
    match rx {
        Some(rx) => match rx.changed().await {
            Ok(()) => Some(rx.borrow_and_update().clone()),
            Err(_) => None,
        },
        None => std::future::pending().await,
    }
}

/// 视频管理器构建器
pub struct VideoManagerBuilder {
    factory: Box<dyn ReceiverFactory>,
    binder: Arc<dyn SinkBinder>,
    settings: VideoSettings,
    subtitle: Option<Box<dyn SubtitleWriter>>,
    settings_rx: Option<mpsc::Receiver<SettingsChange>>,
    vehicle_rx: Option<watch::Receiver<ActiveVehicle>>,
    event_capacity: usize,
}

impl VideoManagerBuilder {
    pub fn new(factory: Box<dyn ReceiverFactory>, binder: Arc<dyn SinkBinder>) -> Self {
        Self {
            factory,
            binder,
            settings: VideoSettings::default(),
            subtitle: None,
            settings_rx: None,
            vehicle_rx: None,
            event_capacity: 256,
        }
    }

    pub fn with_settings(mut self, settings: VideoSettings) -> Self {
        self.settings = settings;
        self
    }

    /// 配置变化订阅（`SettingsStore::subscribe`）
    pub fn with_settings_changes(mut self, rx: mpsc::Receiver<SettingsChange>) -> Self {
        self.settings_rx = Some(rx);
        self
    }

    pub fn with_vehicle(mut self, rx: watch::Receiver<ActiveVehicle>) -> Self {
        self.vehicle_rx = Some(rx);
        self
    }

    pub fn with_subtitle_writer(mut self, writer: Box<dyn SubtitleWriter>) -> Self {
        self.subtitle = Some(writer);
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }

    pub fn build(self) -> (VideoManager, VideoManagerHandle) {
        let (events, _) = broadcast::channel(self.event_capacity);
        let state = Arc::new(AggregateState::new(events.clone()));
        let (notice_tx, notices) = mpsc::unbounded_channel();
        let (command_tx, commands) = mpsc::unbounded_channel();

        let mut controller = LifecycleController::new(
            self.settings.active_channel_count(),
            self.settings.low_latency_mode,
            self.factory,
            self.binder,
            state.clone(),
            notice_tx,
            events.clone(),
        );
        for id in 0..controller.channel_count() {
            controller.set_endpoint(id, endpoint_for(id, self.settings.channel(id)));
        }

        let mut recording = RecordingCoordinator::new(&self.settings, events.clone());
        if let Some(writer) = self.subtitle {
            recording = recording.with_subtitle(writer);
        }

        let status = Arc::new(ArcSwap::from_pointee(ManagerStatus::default()));

        let manager = VideoManager {
            controller,
            reactor: SettingsReactor::new(),
            recording,
            vehicle: VehicleBinding::new(),
            settings: self.settings,
            commands,
            notices,
            settings_rx: self.settings_rx,
            vehicle_rx: self.vehicle_rx,
            status: status.clone(),
        };

        let handle = VideoManagerHandle {
            commands: command_tx,
            state,
            events,
            status,
        };

        (manager, handle)
    }
}

/// 视频管理器句柄
///
/// 操作只投递命令，不返回错误；结果通过发布的状态与事件观察。
#[derive(Clone)]
pub struct VideoManagerHandle {
    commands: mpsc::UnboundedSender<VideoCommand>,
    state: Arc<AggregateState>,
    events: broadcast::Sender<VideoEvent>,
    status: Arc<ArcSwap<ManagerStatus>>,
}

impl VideoManagerHandle {
    fn send(&self, command: VideoCommand) {
        if self.commands.send(command).is_err() {
            warn!("Video manager is not running");
        }
    }

    pub fn start_video(&self) {
        self.send(VideoCommand::StartVideo);
    }

    pub fn stop_video(&self) {
        self.send(VideoCommand::StopVideo);
    }

    pub fn start_recording(&self, path: Option<PathBuf>) {
        self.send(VideoCommand::StartRecording(path));
    }

    pub fn stop_recording(&self) {
        self.send(VideoCommand::StopRecording);
    }

    pub fn grab_image(&self, path: Option<PathBuf>) {
        self.send(VideoCommand::GrabImage(path));
    }

    /// 界面层提供（`Some`）或移除（`None`）某路的显示目标
    pub fn set_sink(&self, channel: ChannelId, sink: Option<VideoSink>) {
        self.send(VideoCommand::SetSink { channel, sink });
    }

    pub fn shutdown(&self) {
        self.send(VideoCommand::Shutdown);
    }

    /// 等待控制线程处理完此前投递的所有命令
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        self.send(VideoCommand::Flush(tx));
        let _ = rx.await;
    }

    pub fn streaming(&self) -> bool {
        self.state.streaming()
    }

    pub fn decoding(&self) -> bool {
        self.state.decoding()
    }

    pub fn recording(&self) -> bool {
        self.state.recording()
    }

    pub fn frame_size(&self) -> FrameSize {
        self.state.frame_size()
    }

    /// 主通道画面尺寸 (宽, 高)，未知时为 (0, 0)
    pub fn video_size(&self) -> (u16, u16) {
        let size = self.state.frame_size();
        (size.width, size.height)
    }

    pub fn is_streaming_channel(&self, channel: ChannelId) -> bool {
        self.state.channel_streaming(channel)
    }

    /// 主通道宽高比
    pub fn aspect_ratio(&self) -> f64 {
        self.state.frame_size().aspect_ratio()
    }

    pub fn thermal_aspect_ratio(&self) -> f64 {
        self.state.channel_frame_size(THERMAL_CHANNEL).aspect_ratio()
    }

    /// 第二路正在出帧
    pub fn has_thermal(&self) -> bool {
        self.state.channel_decoding(THERMAL_CHANNEL)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<VideoEvent> {
        self.events.subscribe()
    }

    pub fn status(&self) -> Arc<ManagerStatus> {
        self.status.load_full()
    }

    pub fn has_video(&self) -> bool {
        self.status.load().has_video
    }

    pub fn is_uvc(&self) -> bool {
        self.status.load().is_uvc
    }

    pub fn auto_stream_configured(&self) -> bool {
        self.status.load().auto_stream_configured
    }

    pub fn uvc_video_source_id(&self) -> String {
        self.status.load().uvc_video_source_id.clone()
    }

    pub fn image_file(&self) -> PathBuf {
        self.status.load().image_file.clone()
    }

    pub fn channel_state(&self, channel: ChannelId) -> Option<ChannelState> {
        self.status
            .load()
            .channels
            .get(channel)
            .map(|c| c.state)
    }

    pub fn aggregate(&self) -> &Arc<AggregateState> {
        &self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Call, FakeFactory, FakeLog, RecordingBinder};
    use flux_video_settings::{diff, ChannelSettings, VideoSource};
    use std::path::Path;
    use std::sync::Mutex;
    use tempfile::tempdir;
    use tokio::task::JoinHandle;

    struct Link {
        lost: watch::Sender<bool>,
        stream: Option<String>,
    }

    impl Link {
        fn new(stream: Option<&str>) -> Arc<Self> {
            Arc::new(Self {
                lost: watch::channel(false).0,
                stream: stream.map(str::to_string),
            })
        }
    }

    impl Vehicle for Link {
        fn id(&self) -> u32 {
            7
        }

        fn communication_lost(&self) -> watch::Receiver<bool> {
            self.lost.subscribe()
        }

        fn video_stream_uri(&self) -> Option<String> {
            self.stream.clone()
        }
    }

    #[derive(Clone, Default)]
    struct SubtitleLog(Arc<Mutex<Vec<String>>>);

    impl SubtitleWriter for SubtitleLog {
        fn start(&mut self, video_file: &Path) {
            self.0.lock().unwrap().push(format!("start:{}", video_file.display()));
        }

        fn stop(&mut self) {
            self.0.lock().unwrap().push("stop".to_string());
        }
    }

    fn udp_settings(channels: usize) -> VideoSettings {
        let mut settings = VideoSettings {
            channel_count: channels,
            ..Default::default()
        };
        for id in 0..channels {
            settings.set_channel(id, ChannelSettings::udp(VideoSource::UdpH264, 5600 + id as u16));
        }
        settings
    }

    fn spawn(builder: VideoManagerBuilder) -> (VideoManagerHandle, JoinHandle<()>) {
        let (manager, handle) = builder.build();
        (handle, tokio::spawn(manager.run()))
    }

    fn builder(log: &FakeLog, settings: VideoSettings) -> VideoManagerBuilder {
        VideoManager::builder(Box::new(FakeFactory::new(log.clone())), Arc::new(RecordingBinder::default()))
            .with_settings(settings)
    }

    async fn attach_sinks(handle: &VideoManagerHandle, channels: usize) {
        for id in 0..channels {
            handle.set_sink(id, Some(VideoSink::new(id)));
        }
        handle.flush().await;
    }

    #[tokio::test]
    async fn test_sinks_start_configured_channels() {
        let log = FakeLog::new();
        let mut settings = udp_settings(4);
        settings.set_channel(3, ChannelSettings::default());
        let (handle, task) = spawn(builder(&log, settings));

        attach_sinks(&handle, 4).await;

        assert!(handle.streaming());
        assert!(handle.decoding());
        assert_eq!(handle.video_size(), (1280, 720));
        assert_eq!(handle.aspect_ratio(), 1280.0 / 720.0);
        assert!(handle.has_thermal());
        assert_eq!(handle.thermal_aspect_ratio(), 1280.0 / 720.0);
        assert!(handle.has_video());
        assert_eq!(handle.channel_state(0), Some(ChannelState::Streaming));
        assert_eq!(handle.channel_state(3), Some(ChannelState::Disabled));
        assert!(!handle.is_streaming_channel(3));

        handle.shutdown();
        task.await.unwrap();
        assert!(!handle.streaming());
    }

    #[tokio::test]
    async fn test_stop_and_start_video() {
        let log = FakeLog::new();
        let (handle, task) = spawn(builder(&log, udp_settings(2)));
        attach_sinks(&handle, 2).await;

        handle.stop_video();
        handle.flush().await;
        assert!(!handle.streaming());
        assert_eq!(handle.channel_state(1), Some(ChannelState::Disabled));

        // 停止期间提供的显示目标不会启动通道
        handle.set_sink(1, Some(VideoSink::new("replacement")));
        handle.flush().await;
        assert!(!handle.is_streaming_channel(1));

        handle.start_video();
        handle.flush().await;
        assert!(handle.is_streaming_channel(0));
        assert!(handle.is_streaming_channel(1));

        handle.shutdown();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_recording_and_snapshot_through_handle() {
        let dir = tempdir().unwrap();
        let log = FakeLog::new();
        let mut settings = udp_settings(3);
        settings.set_channel(1, ChannelSettings::default());
        settings.recording.save_path = dir.path().join("video");
        settings.photo_save_path = dir.path().join("photo");
        let (handle, task) = spawn(builder(&log, settings));
        attach_sinks(&handle, 3).await;
        let mut events = handle.subscribe();

        handle.start_recording(Some(PathBuf::from("sortie")));
        handle.flush().await;

        assert!(handle.recording());
        assert!(log
            .calls_for(2)
            .contains(&Call::StartRecording(dir.path().join("video").join("sortie.3.mkv"))));
        assert!(!log.calls_for(1).iter().any(|c| matches!(c, Call::StartRecording(_))));
        assert_eq!(handle.status().recording_files.len(), 2);

        handle.grab_image(Some(PathBuf::from("a.jpg")));
        handle.flush().await;
        assert_eq!(handle.image_file(), dir.path().join("photo").join("a.jpg"));

        handle.stop_recording();
        handle.flush().await;
        assert!(!handle.recording());

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        assert!(seen.contains(&VideoEvent::RecordingStarted));
        assert!(seen.contains(&VideoEvent::RecordingChanged(true)));
        assert!(seen.contains(&VideoEvent::RecordingChanged(false)));

        handle.shutdown();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_settings_batch_through_subscription() {
        let log = FakeLog::new();
        let old = udp_settings(4);
        let (tx, rx) = mpsc::channel(8);
        let (handle, task) = spawn(builder(&log, old.clone()).with_settings_changes(rx));
        attach_sinks(&handle, 4).await;
        let before = handle.status();
        log.clear_calls();

        let mut new = old.clone();
        new.low_latency_mode = true;
        tx.send(SettingsChange {
            keys: diff(&old, &new),
            settings: new.clone(),
        })
        .await
        .unwrap();
        handle.flush().await;

        let after = handle.status();
        assert!(after.low_latency);
        for id in 0..4 {
            assert_eq!(log.starts_for(id), 1);
            assert_ne!(after.channels[id].instance, before.channels[id].instance);
            assert_eq!(after.channels[id].state, ChannelState::Streaming);
        }

        // 同一批再次送达不产生任何重启
        log.clear_calls();
        tx.send(SettingsChange {
            keys: diff(&old, &new),
            settings: new,
        })
        .await
        .unwrap();
        handle.flush().await;
        for id in 0..4 {
            assert!(log.calls_for(id).is_empty());
        }

        handle.shutdown();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_settings_restart_keeps_video_stopped() {
        let log = FakeLog::new();
        let old = udp_settings(2);
        let (tx, rx) = mpsc::channel(8);
        let (handle, task) = spawn(builder(&log, old.clone()).with_settings_changes(rx));
        attach_sinks(&handle, 2).await;

        handle.stop_video();
        handle.flush().await;
        let before = handle.status().channels[1].instance;
        log.clear_calls();

        let mut new = old.clone();
        new.set_channel(1, ChannelSettings::rtsp("rtsp://10.0.0.4/live"));
        tx.send(SettingsChange {
            keys: diff(&old, &new),
            settings: new,
        })
        .await
        .unwrap();
        handle.flush().await;

        let status = handle.status();
        assert!(!handle.streaming());
        assert_eq!(status.channels[1].state, ChannelState::Disabled);
        assert_ne!(status.channels[1].instance, before);
        assert_eq!(log.starts_for(1), 0);

        handle.start_video();
        handle.flush().await;
        assert_eq!(
            log.calls_for(1).last(),
            Some(&Call::Start {
                endpoint: Endpoint::Network("rtsp://10.0.0.4/live".into()),
                low_latency: false,
            })
        );
        assert!(handle.is_streaming_channel(1));

        handle.shutdown();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_link_restore_keeps_video_stopped() {
        let log = FakeLog::new();
        let link = Link::new(None);
        let (vehicle_tx, vehicle_rx) = watch::channel::<ActiveVehicle>(Some(link.clone()));
        let (handle, task) = spawn(builder(&log, udp_settings(2)).with_vehicle(vehicle_rx));
        attach_sinks(&handle, 2).await;
        assert!(handle.is_streaming_channel(0));

        handle.stop_video();
        handle.flush().await;
        log.clear_calls();

        link.lost.send_replace(true);
        handle.flush().await;
        assert!(handle.status().communication_lost);
        link.lost.send_replace(false);
        handle.flush().await;

        assert!(!handle.status().communication_lost);
        assert!(!handle.streaming());
        assert_eq!(handle.channel_state(0), Some(ChannelState::Disabled));
        assert_eq!(log.starts_for(0), 0);

        // 移除载具同样不会重新启动
        link.lost.send_replace(true);
        handle.flush().await;
        vehicle_tx.send_replace(None);
        handle.flush().await;
        assert_eq!(log.starts_for(0), 0);

        handle.start_video();
        handle.flush().await;
        assert!(handle.is_streaming_channel(0));

        handle.shutdown();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_link_loss_ends_primary_recording() {
        let dir = tempdir().unwrap();
        let log = FakeLog::new();
        let link = Link::new(None);
        let (_vehicle_tx, vehicle_rx) = watch::channel::<ActiveVehicle>(Some(link.clone()));
        let subtitles = SubtitleLog::default();
        let mut settings = udp_settings(2);
        settings.recording.save_path = dir.path().to_path_buf();
        let (handle, task) = spawn(
            builder(&log, settings)
                .with_vehicle(vehicle_rx)
                .with_subtitle_writer(Box::new(subtitles.clone())),
        );
        attach_sinks(&handle, 2).await;

        handle.start_recording(Some(PathBuf::from("a")));
        handle.flush().await;
        assert_eq!(handle.status().recording_files.len(), 2);

        link.lost.send_replace(true);
        handle.flush().await;
        assert_eq!(handle.status().recording_files, vec![dir.path().join("a.2.mkv")]);

        link.lost.send_replace(false);
        handle.flush().await;
        handle.start_recording(Some(PathBuf::from("b")));
        handle.flush().await;

        assert_eq!(
            *subtitles.0.lock().unwrap(),
            vec![
                format!("start:{}", dir.path().join("a.mkv").display()),
                "stop".to_string(),
                format!("start:{}", dir.path().join("b.mkv").display()),
            ]
        );

        handle.shutdown();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_vehicle_stream_replaces_primary_endpoint() {
        let log = FakeLog::new();
        let (vehicle_tx, vehicle_rx) = watch::channel::<ActiveVehicle>(None);
        let (handle, task) = spawn(builder(&log, udp_settings(2)).with_vehicle(vehicle_rx));
        attach_sinks(&handle, 2).await;
        assert!(!handle.auto_stream_configured());
        log.clear_calls();

        let auto = Endpoint::Network("rtsp://10.1.1.1:8554/auto".into());
        vehicle_tx.send_replace(Some(Link::new(Some("rtsp://10.1.1.1:8554/auto"))));
        handle.flush().await;

        assert!(handle.auto_stream_configured());
        assert_eq!(handle.status().channels[0].endpoint, auto);
        assert_eq!(
            log.calls_for(0),
            vec![
                Call::Stop,
                Call::Start {
                    endpoint: auto,
                    low_latency: false,
                },
            ]
        );
        assert!(log.calls_for(1).is_empty());
        assert!(handle.is_streaming_channel(0));

        vehicle_tx.send_replace(None);
        handle.flush().await;
        assert!(!handle.auto_stream_configured());
        assert_eq!(
            handle.status().channels[0].endpoint,
            Endpoint::Network("udp://0.0.0.0:5600".into())
        );

        handle.shutdown();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_uvc_status() {
        let log = FakeLog::new();
        let mut settings = udp_settings(1);
        settings.set_channel(0, ChannelSettings::uvc("/dev/video0"));
        let (handle, task) = spawn(builder(&log, settings));
        handle.flush().await;

        assert!(handle.is_uvc());
        assert_eq!(handle.uvc_video_source_id(), "/dev/video0");

        handle.shutdown();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_dropping_handles_stops_manager() {
        let log = FakeLog::new();
        let (manager, handle) = builder(&log, udp_settings(1)).build();
        let task = tokio::spawn(manager.run());
        handle.set_sink(0, Some(VideoSink::new(0)));
        drop(handle);

        task.await.unwrap();
        assert!(log.calls_for(0).contains(&Call::Stop));
    }
}
