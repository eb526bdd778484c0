use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use flux_video_manager::{RenderQueue, VideoEvent, VideoManager, VideoManagerHandle, VideoSink};
use flux_video_settings::{ConfigSource, FileSource, SettingsStore, VideoSettings};

mod rtsp;

use rtsp::RtspProbeFactory;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Video settings file (toml or json)
    #[arg(short, long, default_value = "video.toml")]
    config: PathBuf,

    /// Log filter, overrides RUST_LOG
    #[arg(short, long)]
    log_level: Option<String>,

    /// Status report interval in seconds
    #[arg(long, default_value_t = 5)]
    status_interval: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_level.as_deref());

    info!("Starting GCS video service with settings: {}", args.config.display());

    let source = Arc::new(FileSource::new(&args.config));
    if !args.config.exists() {
        warn!("Settings file not found, writing defaults");
        source
            .save(&VideoSettings::default())
            .await
            .context("failed to write default settings")?;
    }

    let store = Arc::new(SettingsStore::new(source));
    let settings = store.load().await.context("failed to load video settings")?;
    let changes = store.subscribe().await;
    store.clone().start_watching().await?;

    let (queue, mut render) = RenderQueue::new();
    let (manager, handle) = VideoManager::builder(
        Box::new(RtspProbeFactory::new(tokio::runtime::Handle::current())),
        Arc::new(queue),
    )
    .with_settings(settings)
    .with_settings_changes(changes)
    .build();
    let manager_task = tokio::spawn(manager.run());

    // 无界面运行：渲染上下文只记录绑定操作
    tokio::spawn(async move {
        while let Some(op) = render.recv().await {
            debug!(?op, "Sink operation");
        }
    });

    let reporter = tokio::spawn(report(handle.clone(), Duration::from_secs(args.status_interval.max(1))));

    wait_for_signal().await;

    reporter.abort();
    handle.shutdown();
    manager_task.await.context("video manager task failed")?;

    info!("GCS video service stopped");
    Ok(())
}

fn init_tracing(level: Option<&str>) {
    let filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// 为尚无显示目标的通道提供控制台目标，并周期性输出状态
async fn report(handle: VideoManagerHandle, interval: Duration) {
    let mut events = handle.subscribe();
    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let status = handle.status();
                for channel in status.channels.iter().filter(|c| !c.has_sink) {
                    handle.set_sink(channel.id, Some(VideoSink::new(format!("console-{}", channel.id))));
                }

                let (width, height) = handle.video_size();
                info!(
                    streaming = handle.streaming(),
                    decoding = handle.decoding(),
                    recording = handle.recording(),
                    width,
                    height,
                    aspect_ratio = handle.aspect_ratio(),
                    thermal = handle.has_thermal(),
                    auto_stream = status.auto_stream_configured,
                    channels = status.channels.len(),
                    "Video status"
                );
            }
            event = events.recv() => match event {
                Ok(VideoEvent::ChannelStateChanged { channel, state }) => {
                    info!(channel, ?state, "Channel state changed");
                }
                Ok(event) => debug!(?event, "Video event"),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Video event reporter lagged by {} events", n);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
        }
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use signal::unix::{signal, SignalKind};

    let (mut sigterm, mut sigint) = match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
        (Ok(term), Ok(int)) => (term, int),
        _ => {
            warn!("Failed to install signal handlers, falling back to Ctrl+C");
            let _ = signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => info!("Received SIGTERM"),
        _ = sigint.recv() => info!("Received SIGINT"),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    if let Err(e) = signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl+C: {}", e);
        return;
    }
    info!("Received Ctrl+C");
}

#[cfg(test)]
mod tests {
    use super::*;
    use flux_video_manager::{Endpoint, ReceiverFactory, ReceiverOptions, VideoReceiver};
    use std::path::Path;

    #[test]
    fn test_args_defaults() {
        let args = Args::parse_from(["flux-gcs-video"]);
        assert_eq!(args.config, PathBuf::from("video.toml"));
        assert_eq!(args.status_interval, 5);
        assert!(args.log_level.is_none());
    }

    #[tokio::test]
    async fn test_rtsp_backend_rejects_non_rtsp_and_recording() {
        let mut factory = RtspProbeFactory::new(tokio::runtime::Handle::current());
        let mut receiver = tokio_test::assert_ok!(factory.create(0, ReceiverOptions::default()));

        let (_manager, handle) = VideoManager::builder(
            Box::new(RtspProbeFactory::new(tokio::runtime::Handle::current())),
            Arc::new(RenderQueue::new().0),
        )
        .build();
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let events = flux_video_manager::ReceiverEventSink::new(0, 1, handle.aggregate().clone(), tx);

        let udp = Endpoint::Network("udp://0.0.0.0:5600".into());
        assert!(receiver.start(&udp, &VideoSink::new(()), events).is_err());
        assert!(receiver.start_recording(Path::new("a.mkv")).is_err());
        assert!(receiver.grab_image(Path::new("a.jpg")).is_err());
        tokio_test::assert_ok!(receiver.stop_recording());
        tokio_test::assert_ok!(receiver.stop());
    }
}
