// 录像与截图协调
use chrono::Local;
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use flux_video_settings::{RecordingFormat, VideoSettings};

use crate::event::VideoEvent;
use crate::lifecycle::LifecycleController;
use crate::receiver::ReceiverEvent;
use crate::{ChannelId, PRIMARY_CHANNEL};

/// 字幕（遥测叠加）写入器，跟随主通道录像
pub trait SubtitleWriter: Send {
    fn start(&mut self, video_file: &Path);
    fn stop(&mut self);
}

/// 输出文件命名策略
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileNaming {
    save_dir: PathBuf,
    photo_dir: PathBuf,
    format: RecordingFormat,
}

impl FileNaming {
    pub fn new(save_dir: impl Into<PathBuf>, photo_dir: impl Into<PathBuf>, format: RecordingFormat) -> Self {
        Self {
            save_dir: save_dir.into(),
            photo_dir: photo_dir.into(),
            format,
        }
    }

    pub fn from_settings(settings: &VideoSettings) -> Self {
        Self::new(
            settings.recording.save_path.clone(),
            settings.photo_save_path.clone(),
            settings.recording.format,
        )
    }

    pub fn save_dir(&self) -> &Path {
        &self.save_dir
    }

    pub fn photo_dir(&self) -> &Path {
        &self.photo_dir
    }

    /// 录像基础名（不含扩展名）
    ///
    /// 未指定时取本地时间 `yyyy-MM-dd_hh.mm.ss`；相对路径放在录像目录下。
    pub fn recording_base(&self, requested: Option<&Path>) -> PathBuf {
        let Some(requested) = requested else {
            return self
                .save_dir
                .join(Local::now().format("%Y-%m-%d_%H.%M.%S").to_string());
        };

        let path = if requested.is_absolute() {
            requested.to_path_buf()
        } else {
            self.save_dir.join(requested)
        };

        match path.extension() {
            Some(ext) if ext == self.format.extension() => path.with_extension(""),
            _ => path,
        }
    }

    /// 通道录像文件：第 0 路 `<base>.<ext>`，第 i 路 `<base>.<i+1>.<ext>`
    pub fn recording_file(&self, base: &Path, channel: ChannelId) -> PathBuf {
        let mut name = OsString::from(base.as_os_str());
        if channel != PRIMARY_CHANNEL {
            name.push(format!(".{}", channel + 1));
        }
        name.push(".");
        name.push(self.format.extension());
        PathBuf::from(name)
    }

    /// 截图文件，未指定时为 `yyyy-MM-dd_hh.mm.ss.zzz.jpg`
    pub fn snapshot_file(&self, requested: Option<&Path>) -> PathBuf {
        match requested {
            Some(path) if path.is_absolute() => path.to_path_buf(),
            Some(path) => self.photo_dir.join(path),
            None => self
                .photo_dir
                .join(Local::now().format("%Y-%m-%d_%H.%M.%S%.3f.jpg").to_string()),
        }
    }
}

fn is_recording_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            [RecordingFormat::Mkv, RecordingFormat::Mov, RecordingFormat::Mp4]
                .iter()
                .any(|f| f.extension().eq_ignore_ascii_case(ext))
        })
        .unwrap_or(false)
}

/// 按修改时间删除最旧的录像，直到总大小不超过 `max_bytes`，返回删除的文件数
pub fn prune_recordings(dir: &Path, max_bytes: u64) -> io::Result<usize> {
    let mut files: Vec<(SystemTime, u64, PathBuf)> = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let meta = entry.metadata()?;
        if !meta.is_file() || !is_recording_file(&path) {
            continue;
        }
        let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        files.push((modified, meta.len(), path));
    }

    let mut total: u64 = files.iter().map(|(_, len, _)| len).sum();
    if total <= max_bytes {
        return Ok(0);
    }

    files.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.2.cmp(&b.2)));

    let mut removed = 0;
    for (_, len, path) in files {
        if total <= max_bytes {
            break;
        }
        fs::remove_file(&path)?;
        debug!(path = %path.display(), bytes = len, "Pruned old recording");
        total = total.saturating_sub(len);
        removed += 1;
    }

    Ok(removed)
}

/// 录像与截图协调器
pub struct RecordingCoordinator {
    naming: FileNaming,
    /// 启用存储上限时的字节数
    storage_limit: Option<u64>,
    subtitle: Option<Box<dyn SubtitleWriter>>,
    subtitle_active: bool,
    files: Vec<(ChannelId, PathBuf)>,
    image_file: PathBuf,
    events: broadcast::Sender<VideoEvent>,
}

impl RecordingCoordinator {
    pub fn new(settings: &VideoSettings, events: broadcast::Sender<VideoEvent>) -> Self {
        let mut coordinator = Self {
            naming: FileNaming::from_settings(settings),
            storage_limit: None,
            subtitle: None,
            subtitle_active: false,
            files: Vec::new(),
            image_file: PathBuf::new(),
            events,
        };
        coordinator.apply_settings(settings);
        coordinator
    }

    pub fn with_subtitle(mut self, writer: Box<dyn SubtitleWriter>) -> Self {
        self.subtitle = Some(writer);
        self
    }

    pub fn apply_settings(&mut self, settings: &VideoSettings) {
        self.naming = FileNaming::from_settings(settings);
        self.storage_limit = settings
            .recording
            .storage_limit
            .then(|| settings.recording.max_storage_mb.saturating_mul(1024 * 1024));
    }

    pub fn naming(&self) -> &FileNaming {
        &self.naming
    }

    /// 最近一次截图路径，失败时为空
    pub fn image_file(&self) -> &Path {
        &self.image_file
    }

    /// 当前录像文件
    pub fn recording_files(&self) -> Vec<PathBuf> {
        self.files.iter().map(|(_, path)| path.clone()).collect()
    }

    /// 在所有 Streaming 通道上开始录像，返回成功的通道数
    ///
    /// 单路失败不影响其它通道；至少一路成功才发出 `RecordingStarted`。
    pub fn start_recording(&mut self, controller: &mut LifecycleController, requested: Option<&Path>) -> usize {
        let channels = controller.streaming_channels();
        if channels.is_empty() {
            warn!("No active video to record");
            return 0;
        }

        if let Err(e) = fs::create_dir_all(self.naming.save_dir()) {
            warn!(dir = %self.naming.save_dir().display(), "Failed to create recording directory: {}", e);
            return 0;
        }

        if let Some(max_bytes) = self.storage_limit {
            match prune_recordings(self.naming.save_dir(), max_bytes) {
                Ok(0) => {}
                Ok(n) => info!(removed = n, "Recording storage limit applied"),
                Err(e) => warn!("Failed to prune recordings: {}", e),
            }
        }

        let base = self.naming.recording_base(requested);
        self.files.clear();

        for id in channels {
            let path = self.naming.recording_file(&base, id);
            let Some(receiver) = controller.receiver_mut(id) else {
                continue;
            };
            match receiver.start_recording(&path) {
                Ok(()) => {
                    debug!(channel = id, path = %path.display(), "Recording requested");
                    self.files.push((id, path));
                }
                Err(e) => warn!(channel = id, "Failed to start recording: {}", e),
            }
        }

        let started = self.files.len();
        if started > 0 {
            info!(channels = started, base = %base.display(), "Recording started");
            let _ = self.events.send(VideoEvent::RecordingStarted);
        }
        started
    }

    /// 在所有通道上停止录像（包括未在录像的通道）
    pub fn stop_recording(&mut self, controller: &mut LifecycleController) {
        for id in 0..controller.channel_count() {
            if let Some(receiver) = controller.receiver_mut(id) {
                if let Err(e) = receiver.stop_recording() {
                    warn!(channel = id, "Failed to stop recording: {}", e);
                }
            }
        }

        self.stop_subtitle();
        if !self.files.is_empty() {
            info!("Recording stopped");
        }
        self.files.clear();
    }

    /// 截图
    ///
    /// 优先主通道，否则取编号最小的 Streaming 通道；没有可用通道时发布空路径。
    pub fn grab_image(&mut self, controller: &mut LifecycleController, requested: Option<&Path>) -> PathBuf {
        let streaming = controller.streaming_channels();
        let target = if streaming.contains(&PRIMARY_CHANNEL) {
            Some(PRIMARY_CHANNEL)
        } else {
            streaming.first().copied()
        };

        let Some(id) = target else {
            warn!("No active video to grab image from");
            return self.publish_image(PathBuf::new());
        };

        let path = self.naming.snapshot_file(requested);
        if let Some(dir) = path.parent() {
            if let Err(e) = fs::create_dir_all(dir) {
                warn!(dir = %dir.display(), "Failed to create photo directory: {}", e);
                return self.publish_image(PathBuf::new());
            }
        }

        let result = match controller.receiver_mut(id) {
            Some(receiver) => receiver.grab_image(&path),
            None => return self.publish_image(PathBuf::new()),
        };
        match result {
            Ok(()) => {
                info!(channel = id, path = %path.display(), "Image grab requested");
                self.publish_image(path)
            }
            Err(e) => {
                warn!(channel = id, "Failed to grab image: {}", e);
                self.publish_image(PathBuf::new())
            }
        }
    }

    /// 跟随主通道的录像确认启停字幕
    pub fn on_receiver_event(&mut self, channel: ChannelId, event: &ReceiverEvent) {
        if channel != PRIMARY_CHANNEL {
            return;
        }
        match event {
            ReceiverEvent::Recording(true) => self.start_subtitle(),
            ReceiverEvent::Recording(false) => self.stop_subtitle(),
            _ => {}
        }
    }

    /// 通道被停止后其录像随接收器结束
    pub fn on_channel_stopped(&mut self, channel: ChannelId) {
        let before = self.files.len();
        self.files.retain(|(id, _)| *id != channel);
        if self.files.len() != before {
            debug!(channel, "Recording ended with channel stop");
        }
        if channel == PRIMARY_CHANNEL {
            self.stop_subtitle();
        }
    }

    fn start_subtitle(&mut self) {
        if self.subtitle_active {
            return;
        }
        let Some(path) = self
            .files
            .iter()
            .find(|(id, _)| *id == PRIMARY_CHANNEL)
            .map(|(_, path)| path.clone())
        else {
            return;
        };
        if let Some(writer) = self.subtitle.as_mut() {
            writer.start(&path);
            self.subtitle_active = true;
        }
    }

    fn stop_subtitle(&mut self) {
        if !self.subtitle_active {
            return;
        }
        if let Some(writer) = self.subtitle.as_mut() {
            writer.stop();
        }
        self.subtitle_active = false;
    }

    fn publish_image(&mut self, path: PathBuf) -> PathBuf {
        self.image_file = path.clone();
        let _ = self.events.send(VideoEvent::ImageFileChanged(path.clone()));
        path
    }
}
