use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::key::{diff, SettingKey};
use crate::settings::VideoSettings;
use crate::source::ConfigSource;
use crate::validator::{default_validator, SettingsValidator};

/// 配置变更批次
///
/// 一次加载/更新产生一个批次，`keys` 为相对上一版本变化的键。
#[derive(Debug, Clone)]
pub struct SettingsChange {
    pub keys: Vec<SettingKey>,
    pub settings: VideoSettings,
}

/// 视频配置存储
pub struct SettingsStore {
    /// 配置源
    source: Arc<dyn ConfigSource>,
    validator: SettingsValidator,
    /// 当前配置
    current: Arc<RwLock<VideoSettings>>,
    /// 变更通知发送器
    notifiers: Arc<RwLock<Vec<mpsc::Sender<SettingsChange>>>>,
    /// 串行化写入：比较、保存、通知在同一把锁内完成，批次按写入顺序送达
    writer: Mutex<()>,
}

impl SettingsStore {
    pub fn new(source: Arc<dyn ConfigSource>) -> Self {
        Self::with_validator(source, default_validator())
    }

    pub fn with_validator(source: Arc<dyn ConfigSource>, validator: SettingsValidator) -> Self {
        Self {
            source,
            validator,
            current: Arc::new(RwLock::new(VideoSettings::default())),
            notifiers: Arc::new(RwLock::new(Vec::new())),
            writer: Mutex::new(()),
        }
    }

    /// 加载配置
    pub async fn load(&self) -> Result<VideoSettings> {
        info!("Loading video settings");

        let _guard = self.writer.lock().await;
        let settings = self.source.load().await?;
        self.validator.validate(&settings)?;
        self.apply(settings.clone()).await;

        info!("Video settings loaded successfully");
        Ok(settings)
    }

    /// 重新加载配置，校验失败时保留当前配置
    pub async fn reload(&self) -> Result<()> {
        debug!("Reloading video settings");

        let _guard = self.writer.lock().await;
        let settings = self.source.load().await?;
        if let Err(e) = self.validator.validate(&settings) {
            warn!("Ignoring invalid video settings: {}", e);
            return Err(e);
        }

        self.apply(settings).await;
        Ok(())
    }

    /// 更新配置
    pub async fn update(&self, settings: VideoSettings) -> Result<()> {
        let _guard = self.writer.lock().await;
        self.store(settings).await
    }

    /// 基于当前配置修改后更新，读取与写入之间不会插入其它更新
    pub async fn modify<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut VideoSettings),
    {
        let _guard = self.writer.lock().await;
        let mut settings = self.get().await;
        f(&mut settings);
        self.store(settings).await
    }

    async fn store(&self, settings: VideoSettings) -> Result<()> {
        self.validator.validate(&settings)?;
        self.source.save(&settings).await?;
        self.apply(settings).await;
        Ok(())
    }

    /// 获取当前配置
    pub async fn get(&self) -> VideoSettings {
        self.current.read().await.clone()
    }

    /// 订阅配置变更
    pub async fn subscribe(&self) -> mpsc::Receiver<SettingsChange> {
        let (tx, rx) = mpsc::channel(16);
        self.notifiers.write().await.push(tx);
        rx
    }

    /// 替换当前配置并通知订阅者（无变化时不通知），调用方须持有 `writer`
    async fn apply(&self, settings: VideoSettings) {
        let keys = {
            let mut current = self.current.write().await;
            let keys = diff(&current, &settings);
            *current = settings.clone();
            keys
        };

        if keys.is_empty() {
            debug!("Video settings unchanged");
            return;
        }

        debug!(?keys, "Video settings changed");
        self.notify(SettingsChange { keys, settings }).await;
    }

    /// 通知所有订阅者
    async fn notify(&self, change: SettingsChange) {
        let mut notifiers = self.notifiers.write().await;
        notifiers.retain(|tx| !tx.is_closed());
        for tx in notifiers.iter() {
            if let Err(e) = tx.send(change.clone()).await {
                warn!("Failed to notify settings subscriber: {}", e);
            }
        }
    }

    /// 启动配置监听
    pub async fn start_watching(self: Arc<Self>) -> Result<()> {
        info!("Starting video settings watcher");

        let mut watcher = self.source.watch().await?;

        tokio::spawn(async move {
            loop {
                match watcher.recv().await {
                    Some(()) => {
                        debug!("Video settings change detected");
                        if let Err(e) = self.reload().await {
                            warn!("Failed to reload video settings: {}", e);
                        }
                    }
                    None => {
                        warn!("Video settings watcher closed");
                        break;
                    }
                }
            }
        });

        Ok(())
    }
}
