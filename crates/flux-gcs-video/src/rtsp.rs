// RTSP 探测接收器
//
// 只负责连接与回报状态（连通、出帧、分辨率），不解码、不渲染。
use futures::StreamExt;
use retina::client::{PlayOptions, Session, SessionOptions, SetupOptions};
use retina::codec::{CodecItem, ParametersRef};
use std::path::Path;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use flux_video_manager::{
    ChannelId, Endpoint, FrameSize, ReceiverEventSink, ReceiverFactory, ReceiverOptions, Result, VideoError,
    VideoReceiver, VideoSink,
};

/// RTSP 探测接收器工厂
pub struct RtspProbeFactory {
    runtime: Handle,
}

impl RtspProbeFactory {
    pub fn new(runtime: Handle) -> Self {
        Self { runtime }
    }
}

impl ReceiverFactory for RtspProbeFactory {
    fn create(&mut self, channel: ChannelId, options: ReceiverOptions) -> Result<Box<dyn VideoReceiver>> {
        Ok(Box::new(RtspProbeReceiver {
            channel,
            options,
            runtime: self.runtime.clone(),
            task: None,
        }))
    }
}

/// 单路 RTSP 探测
pub struct RtspProbeReceiver {
    channel: ChannelId,
    options: ReceiverOptions,
    runtime: Handle,
    task: Option<JoinHandle<()>>,
}

impl RtspProbeReceiver {
    fn abort(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl VideoReceiver for RtspProbeReceiver {
    fn start(&mut self, endpoint: &Endpoint, _sink: &VideoSink, events: ReceiverEventSink) -> Result<()> {
        let uri = match endpoint {
            Endpoint::Network(uri) if uri.starts_with("rtsp://") || uri.starts_with("rtsps://") => uri,
            _ => return Err(VideoError::UnsupportedEndpoint(endpoint.to_string())),
        };
        let url = Url::parse(uri).map_err(|e| VideoError::UnsupportedEndpoint(format!("{}: {}", uri, e)))?;

        self.abort();
        debug!(channel = self.channel, low_latency = self.options.low_latency, %url, "Starting RTSP probe");
        self.task = Some(self.runtime.spawn(probe(self.channel, url, events)));
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.abort();
        Ok(())
    }

    fn start_recording(&mut self, _path: &Path) -> Result<()> {
        Err(VideoError::Unsupported("recording"))
    }

    fn stop_recording(&mut self) -> Result<()> {
        Ok(())
    }

    fn grab_image(&mut self, _path: &Path) -> Result<()> {
        Err(VideoError::Unsupported("image capture"))
    }
}

impl Drop for RtspProbeReceiver {
    fn drop(&mut self) {
        self.abort();
    }
}

async fn probe(channel: ChannelId, url: Url, events: ReceiverEventSink) {
    if let Err(e) = connect_and_receive(channel, &url, &events).await {
        warn!(channel, %url, "RTSP probe failed: {}", e);
    }
    events.decoding_changed(false);
    events.streaming_changed(false);
}

/// 分辨率超出 16 位时作为配置错误上报
fn checked_frame_size(events: &ReceiverEventSink, width: u32, height: u32) -> Option<FrameSize> {
    let size = FrameSize::from_dimensions(width, height);
    if size.is_none() {
        events.error(format!("unsupported frame size {}x{}", width, height));
    }
    size
}

async fn connect_and_receive(channel: ChannelId, url: &Url, events: &ReceiverEventSink) -> anyhow::Result<()> {
    let creds = if !url.username().is_empty() {
        Some(retina::client::Credentials {
            username: url.username().to_string(),
            password: url.password().unwrap_or("").to_string(),
        })
    } else {
        None
    };

    let mut session = Session::describe(url.clone(), SessionOptions::default().creds(creds)).await?;

    let video = session
        .streams()
        .iter()
        .position(|s| s.media() == "video")
        .ok_or_else(|| anyhow::anyhow!("no video stream in {}", url))?;

    session.setup(video, SetupOptions::default()).await?;

    let size = match session.streams()[video].parameters() {
        Some(ParametersRef::Video(params)) => {
            let (width, height) = params.pixel_dimensions();
            let size = checked_frame_size(events, width, height)
                .ok_or_else(|| anyhow::anyhow!("frame size {}x{} out of range", width, height))?;
            Some(size)
        }
        _ => None,
    };

    let session = session.play(PlayOptions::default()).await?.demuxed()?;
    events.streaming_changed(true);
    if let Some(size) = size {
        events.frame_size(size);
    }
    info!(channel, %url, "RTSP stream connected");

    tokio::pin!(session);
    let mut decoding = false;
    while let Some(item) = session.next().await {
        match item? {
            CodecItem::VideoFrame(_) if !decoding => {
                decoding = true;
                events.decoding_changed(true);
            }
            _ => {}
        }
    }

    info!(channel, %url, "RTSP stream ended");
    Ok(())
}
