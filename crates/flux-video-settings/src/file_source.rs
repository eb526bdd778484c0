use anyhow::{Context, Result};
use async_trait::async_trait;
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::settings::VideoSettings;
use crate::source::{ConfigSource, ConfigWatcher};

/// 文件配置源（按扩展名选择 JSON，其余按 TOML 处理）
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn is_json(&self) -> bool {
        self.path.extension().and_then(|s| s.to_str()) == Some("json")
    }
}

#[async_trait]
impl ConfigSource for FileSource {
    async fn load(&self) -> Result<VideoSettings> {
        debug!("Loading video settings from file: {:?}", self.path);

        let content = fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("failed to read {:?}", self.path))?;

        let settings = if self.is_json() {
            serde_json::from_str(&content)?
        } else {
            toml::from_str(&content)?
        };

        Ok(settings)
    }

    async fn save(&self, settings: &VideoSettings) -> Result<()> {
        debug!("Saving video settings to file: {:?}", self.path);

        let content = if self.is_json() {
            serde_json::to_string_pretty(settings)?
        } else {
            toml::to_string_pretty(settings)?
        };

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }
        fs::write(&self.path, content).await?;

        Ok(())
    }

    async fn watch(&self) -> Result<ConfigWatcher> {
        let (tx, rx) = mpsc::channel(10);
        let path = self.path.clone();

        let (notify_tx, notify_rx) = std::sync::mpsc::channel();
        let mut watcher: RecommendedWatcher = Watcher::new(notify_tx, notify::Config::default())?;
        watcher.watch(&path, RecursiveMode::NonRecursive)?;

        std::thread::spawn(move || {
            // 监听器随线程存活
            let _watcher = watcher;
            debug!("File watcher started for: {:?}", path);

            loop {
                match notify_rx.recv() {
                    Ok(Ok(Event { kind, .. })) => {
                        use notify::EventKind::*;
                        match kind {
                            Modify(_) | Create(_) => {
                                debug!("Video settings file changed: {:?}", path);
                                if tx.blocking_send(()).is_err() {
                                    break;
                                }
                            }
                            _ => {}
                        }
                    }
                    Ok(Err(e)) => {
                        error!("Watch error: {}", e);
                    }
                    Err(e) => {
                        error!("Channel error: {}", e);
                        break;
                    }
                }
            }
        });

        Ok(ConfigWatcher::new(rx))
    }
}
