//! 单元测试用的假接收器
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, mpsc};

use crate::error::{Result, VideoError};
use crate::event::VideoEvent;
use crate::lifecycle::LifecycleController;
use crate::receiver::{ReceiverFactory, ReceiverNotice, ReceiverOptions, VideoReceiver, ReceiverEventSink};
use crate::sink::{SinkBinder, VideoSink};
use crate::slot::Endpoint;
use crate::state::{AggregateState, FrameSize};
use crate::ChannelId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Start { endpoint: Endpoint, low_latency: bool },
    Stop,
    StartRecording(PathBuf),
    StopRecording,
    GrabImage(PathBuf),
}

#[derive(Default)]
struct Inner {
    calls: Vec<(ChannelId, u64, Call)>,
    created: Vec<(ChannelId, u64, bool)>,
    dropped: Vec<u64>,
    events: Vec<(ChannelId, ReceiverEventSink)>,
    next_instance: u64,
    manual: bool,
    fail_create: HashSet<ChannelId>,
    fail_start: HashSet<ChannelId>,
    fail_recording: HashSet<ChannelId>,
}

/// 所有假接收器共享的调用记录
#[derive(Clone, Default)]
pub struct FakeLog {
    inner: Arc<Mutex<Inner>>,
}

impl FakeLog {
    pub fn new() -> Self {
        let log = Self::default();
        log.inner.lock().unwrap().next_instance = 1;
        log
    }

    pub fn set_auto_stream(&self, on: bool) {
        self.inner.lock().unwrap().manual = !on;
    }

    pub fn fail_create(&self, channel: ChannelId) {
        self.inner.lock().unwrap().fail_create.insert(channel);
    }

    pub fn fail_start(&self, channel: ChannelId) {
        self.inner.lock().unwrap().fail_start.insert(channel);
    }

    pub fn fail_recording(&self, channel: ChannelId) {
        self.inner.lock().unwrap().fail_recording.insert(channel);
    }

    pub fn created(&self) -> usize {
        self.inner.lock().unwrap().created.len()
    }

    /// 某通道创建接收器时的低延迟参数
    pub fn created_for(&self, channel: ChannelId) -> Vec<bool> {
        let inner = self.inner.lock().unwrap();
        inner
            .created
            .iter()
            .filter(|(ch, _, _)| *ch == channel)
            .map(|(_, _, low_latency)| *low_latency)
            .collect()
    }

    pub fn dropped_instances(&self) -> Vec<u64> {
        self.inner.lock().unwrap().dropped.clone()
    }

    pub fn calls_for(&self, channel: ChannelId) -> Vec<Call> {
        let inner = self.inner.lock().unwrap();
        inner
            .calls
            .iter()
            .filter(|(ch, _, _)| *ch == channel)
            .map(|(_, _, call)| call.clone())
            .collect()
    }

    pub fn starts_for(&self, channel: ChannelId) -> usize {
        self.calls_for(channel)
            .iter()
            .filter(|c| matches!(c, Call::Start { .. }))
            .count()
    }

    pub fn clear_calls(&self) {
        self.inner.lock().unwrap().calls.clear();
    }

    /// 最近一次启动时交给接收器的回报通道
    pub fn last_events(&self, channel: ChannelId) -> Option<ReceiverEventSink> {
        let inner = self.inner.lock().unwrap();
        inner
            .events
            .iter()
            .rev()
            .find(|(ch, _)| *ch == channel)
            .map(|(_, sink)| sink.clone())
    }
}

pub struct FakeReceiver {
    channel: ChannelId,
    instance: u64,
    low_latency: bool,
    log: FakeLog,
    events: Option<ReceiverEventSink>,
}

impl FakeReceiver {
    fn record(&self, call: Call) {
        self.log
            .inner
            .lock()
            .unwrap()
            .calls
            .push((self.channel, self.instance, call));
    }
}

impl VideoReceiver for FakeReceiver {
    fn start(&mut self, endpoint: &Endpoint, _sink: &VideoSink, events: ReceiverEventSink) -> Result<()> {
        self.record(Call::Start {
            endpoint: endpoint.clone(),
            low_latency: self.low_latency,
        });

        let (manual, fail) = {
            let mut inner = self.log.inner.lock().unwrap();
            inner.events.push((self.channel, events.clone()));
            (inner.manual, inner.fail_start.contains(&self.channel))
        };
        if fail {
            return Err(VideoError::Receiver("start rejected".into()));
        }

        if !manual {
            events.streaming_changed(true);
            events.decoding_changed(true);
            events.frame_size(FrameSize::new(1280, 720));
        }
        self.events = Some(events);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.record(Call::Stop);
        self.events = None;
        Ok(())
    }

    fn start_recording(&mut self, path: &Path) -> Result<()> {
        self.record(Call::StartRecording(path.to_path_buf()));
        if self.log.inner.lock().unwrap().fail_recording.contains(&self.channel) {
            return Err(VideoError::Receiver("recording rejected".into()));
        }
        if let Some(events) = &self.events {
            events.recording_changed(true);
        }
        Ok(())
    }

    fn stop_recording(&mut self) -> Result<()> {
        self.record(Call::StopRecording);
        if let Some(events) = &self.events {
            events.recording_changed(false);
        }
        Ok(())
    }

    fn grab_image(&mut self, path: &Path) -> Result<()> {
        self.record(Call::GrabImage(path.to_path_buf()));
        Ok(())
    }
}

impl Drop for FakeReceiver {
    fn drop(&mut self) {
        if let Ok(mut inner) = self.log.inner.lock() {
            inner.dropped.push(self.instance);
        }
    }
}

pub struct FakeFactory {
    log: FakeLog,
}

impl FakeFactory {
    pub fn new(log: FakeLog) -> Self {
        Self { log }
    }
}

impl ReceiverFactory for FakeFactory {
    fn create(&mut self, channel: ChannelId, options: ReceiverOptions) -> Result<Box<dyn VideoReceiver>> {
        let instance = {
            let mut inner = self.log.inner.lock().unwrap();
            if inner.fail_create.contains(&channel) {
                return Err(VideoError::Receiver("create failed".into()));
            }
            let instance = inner.next_instance;
            inner.next_instance += 1;
            inner.created.push((channel, instance, options.low_latency));
            instance
        };

        Ok(Box::new(FakeReceiver {
            channel,
            instance,
            low_latency: options.low_latency,
            log: self.log.clone(),
            events: None,
        }))
    }
}

/// 记录绑定/释放顺序的显示目标绑定器
#[derive(Clone, Default)]
pub struct RecordingBinder {
    ops: Arc<Mutex<Vec<String>>>,
}

impl RecordingBinder {
    pub fn ops(&self) -> Vec<String> {
        self.ops.lock().unwrap().clone()
    }
}

impl SinkBinder for RecordingBinder {
    fn bind(&self, channel: ChannelId, _sink: &VideoSink) {
        self.ops.lock().unwrap().push(format!("bind:{}", channel));
    }

    fn release(&self, channel: ChannelId, _sink: &VideoSink) {
        self.ops.lock().unwrap().push(format!("release:{}", channel));
    }
}

pub struct Harness {
    pub controller: LifecycleController,
    pub log: FakeLog,
    pub binder: RecordingBinder,
    pub events: broadcast::Sender<VideoEvent>,
    pub notices: mpsc::UnboundedReceiver<ReceiverNotice>,
}

impl Harness {
    /// 把排队的接收器通知交给控制器处理
    pub fn pump(&mut self) {
        while let Ok(notice) = self.notices.try_recv() {
            self.controller.handle_notice(&notice);
        }
    }
}

/// 每路都已提供显示目标的控制器
pub fn harness(channels: usize) -> Harness {
    let log = FakeLog::new();
    let binder = RecordingBinder::default();
    let (events, _) = broadcast::channel(256);
    let state = Arc::new(AggregateState::new(events.clone()));
    let (tx, notices) = mpsc::unbounded_channel();

    let mut controller = LifecycleController::new(
        channels,
        false,
        Box::new(FakeFactory::new(log.clone())),
        Arc::new(binder.clone()),
        state,
        tx,
        events.clone(),
    );
    for id in 0..channels {
        controller.set_sink(id, Some(VideoSink::new(format!("sink-{}", id))));
    }

    Harness {
        controller,
        log,
        binder,
        events,
        notices,
    }
}
