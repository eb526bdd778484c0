pub mod error;
pub mod event;
pub mod lifecycle;
pub mod manager;
pub mod reactor;
pub mod receiver;
pub mod recording;
pub mod sink;
pub mod slot;
pub mod state;
pub mod vehicle;

#[cfg(test)]
mod testing;

pub use error::{Result, VideoError};
pub use event::VideoEvent;
pub use lifecycle::LifecycleController;
pub use manager::{
    ActiveVehicle, ChannelStatus, ManagerStatus, VideoCommand, VideoManager, VideoManagerBuilder, VideoManagerHandle,
};
pub use reactor::{endpoint_for, SettingsReactor};
pub use receiver::{
    ReceiverEvent, ReceiverEventSink, ReceiverFactory, ReceiverNotice, ReceiverOptions, VideoReceiver,
};
pub use recording::{prune_recordings, FileNaming, RecordingCoordinator, SubtitleWriter};
pub use sink::{RenderQueue, RenderQueueReceiver, SinkBinder, SinkOp, VideoSink};
pub use slot::{ChannelSlot, ChannelState, Endpoint};
pub use state::{AggregateState, FrameSize, DEFAULT_ASPECT_RATIO};
pub use vehicle::{PrimaryAction, Vehicle, VehicleBinding};

pub use flux_video_settings::MAX_CHANNELS;

/// 通道编号
pub type ChannelId = usize;

/// 主通道：截图与对外画面尺寸取自该通道
pub const PRIMARY_CHANNEL: ChannelId = 0;

/// 第二路（热成像）通道
pub const THERMAL_CHANNEL: ChannelId = 1;
