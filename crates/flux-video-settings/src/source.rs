use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};

use crate::settings::VideoSettings;

/// 配置源抽象
#[async_trait]
pub trait ConfigSource: Send + Sync {
    /// 加载配置
    async fn load(&self) -> Result<VideoSettings>;

    /// 保存配置
    async fn save(&self, settings: &VideoSettings) -> Result<()>;

    /// 监听外部变更
    async fn watch(&self) -> Result<ConfigWatcher>;
}

/// 配置监听器
pub struct ConfigWatcher {
    rx: mpsc::Receiver<()>,
}

impl ConfigWatcher {
    pub fn new(rx: mpsc::Receiver<()>) -> Self {
        Self { rx }
    }

    pub async fn recv(&mut self) -> Option<()> {
        self.rx.recv().await
    }
}

/// 内存配置源
///
/// 由界面直接修改配置的场景，或测试中模拟外部写入；`replace` 会通知监听器。
pub struct MemorySource {
    settings: Arc<RwLock<VideoSettings>>,
    watchers: Arc<RwLock<Vec<mpsc::Sender<()>>>>,
}

impl MemorySource {
    pub fn new(settings: VideoSettings) -> Self {
        Self {
            settings: Arc::new(RwLock::new(settings)),
            watchers: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// 模拟外部写入
    pub async fn replace(&self, settings: VideoSettings) {
        *self.settings.write().await = settings;

        let mut watchers = self.watchers.write().await;
        watchers.retain(|tx| tx.try_send(()).is_ok() || !tx.is_closed());
    }
}

#[async_trait]
impl ConfigSource for MemorySource {
    async fn load(&self) -> Result<VideoSettings> {
        Ok(self.settings.read().await.clone())
    }

    async fn save(&self, settings: &VideoSettings) -> Result<()> {
        *self.settings.write().await = settings.clone();
        Ok(())
    }

    async fn watch(&self) -> Result<ConfigWatcher> {
        let (tx, rx) = mpsc::channel(10);
        self.watchers.write().await.push(tx);
        Ok(ConfigWatcher::new(rx))
    }
}
