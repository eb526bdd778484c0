// flux-video-settings: 多路图传配置
//
// - 配置模型（通道数量、低延迟模式、每路视频源、录像/拍照目录）
// - 按键的变更检测，供 VideoManager 决定重启哪些通道
// - 配置源（文件 + 监听）与带订阅的配置存储

pub mod error;
pub mod file_source;
pub mod key;
pub mod settings;
pub mod source;
pub mod store;
pub mod validator;

pub use error::SettingsError;
pub use file_source::FileSource;
pub use key::{diff, SettingKey};
pub use settings::{
    ChannelSettings, RecordingFormat, RecordingSettings, VideoSettings, VideoSource,
    DEFAULT_CHANNEL_COUNT, MAX_CHANNELS,
};
pub use source::{ConfigSource, ConfigWatcher, MemorySource};
pub use store::{SettingsChange, SettingsStore};
pub use validator::{default_validator, CustomRule, RangeRule, SettingsValidator, ValidationError, ValidationRule};
