// 聚合状态发布
//
// 每路一个 64 位字：[代数:24][标志:8][画面尺寸:32]，接收器回调以 CAS 方式
// 写入，代数不符即丢弃。四个对外值各自独立原子存储，每次写入后由全部通道重新计算。
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use tokio::sync::broadcast;
use tracing::trace;

use crate::event::VideoEvent;
use crate::receiver::ReceiverEvent;
use crate::{ChannelId, MAX_CHANNELS, PRIMARY_CHANNEL};

/// 代数有效位
pub const GENERATION_MASK: u32 = 0x00FF_FFFF;

const GENERATION_SHIFT: u32 = 40;
const FLAGS_SHIFT: u32 = 32;

const FLAG_STREAMING: u64 = 0b001;
const FLAG_DECODING: u64 = 0b010;
const FLAG_RECORDING: u64 = 0b100;

/// 画面尺寸，打包为一个 32 位字（高 16 位宽、低 16 位高），0 表示未知
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub struct FrameSize {
    pub width: u16,
    pub height: u16,
}

impl FrameSize {
    pub const UNKNOWN: FrameSize = FrameSize { width: 0, height: 0 };

    pub const fn new(width: u16, height: u16) -> Self {
        Self { width, height }
    }

    /// 超出 16 位范围时返回 `None`，由接收器按配置错误处理
    pub fn from_dimensions(width: u32, height: u32) -> Option<Self> {
        Some(Self {
            width: u16::try_from(width).ok()?,
            height: u16::try_from(height).ok()?,
        })
    }

    pub const fn pack(self) -> u32 {
        ((self.width as u32) << 16) | self.height as u32
    }

    pub const fn unpack(value: u32) -> Self {
        Self {
            width: ((value >> 16) & 0xFFFF) as u16,
            height: (value & 0xFFFF) as u16,
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.pack() == 0
    }

    /// 宽高比；尺寸未知时为 16:9
    pub fn aspect_ratio(&self) -> f64 {
        if self.width == 0 || self.height == 0 {
            return DEFAULT_ASPECT_RATIO;
        }
        f64::from(self.width) / f64::from(self.height)
    }
}

pub const DEFAULT_ASPECT_RATIO: f64 = 16.0 / 9.0;

fn word(generation: u32) -> u64 {
    ((generation & GENERATION_MASK) as u64) << GENERATION_SHIFT
}

fn word_generation(word: u64) -> u32 {
    (word >> GENERATION_SHIFT) as u32 & GENERATION_MASK
}

fn word_flag(word: u64, flag: u64) -> bool {
    (word >> FLAGS_SHIFT) & flag != 0
}

fn with_flag(word: u64, flag: u64, on: bool) -> u64 {
    if on {
        word | (flag << FLAGS_SHIFT)
    } else {
        word & !(flag << FLAGS_SHIFT)
    }
}

fn with_size(word: u64, size: FrameSize) -> u64 {
    (word & !0xFFFF_FFFF) | size.pack() as u64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Snapshot {
    streaming: bool,
    decoding: bool,
    recording: bool,
    frame_size: u32,
}

/// 跨通道聚合状态
///
/// 写入方为各接收器线程（经 `ReceiverEventSink`）与控制线程（启动/停止时复位），
/// 读取方为界面线程，读取不加锁。
pub struct AggregateState {
    channels: Vec<AtomicU64>,
    streaming: AtomicBool,
    decoding: AtomicBool,
    recording: AtomicBool,
    frame_size: AtomicU32,
    events: broadcast::Sender<VideoEvent>,
}

impl AggregateState {
    pub fn new(events: broadcast::Sender<VideoEvent>) -> Self {
        Self {
            channels: (0..MAX_CHANNELS).map(|_| AtomicU64::new(0)).collect(),
            streaming: AtomicBool::new(false),
            decoding: AtomicBool::new(false),
            recording: AtomicBool::new(false),
            frame_size: AtomicU32::new(0),
            events,
        }
    }

    /// 任一通道已连接
    pub fn streaming(&self) -> bool {
        self.streaming.load(Ordering::Acquire)
    }

    /// 任一通道正在出帧
    pub fn decoding(&self) -> bool {
        self.decoding.load(Ordering::Acquire)
    }

    /// 任一通道正在录像
    pub fn recording(&self) -> bool {
        self.recording.load(Ordering::Acquire)
    }

    /// 主通道画面尺寸
    pub fn frame_size(&self) -> FrameSize {
        FrameSize::unpack(self.frame_size.load(Ordering::Acquire))
    }

    pub fn channel_streaming(&self, channel: ChannelId) -> bool {
        self.channel_word(channel)
            .map(|w| word_flag(w, FLAG_STREAMING))
            .unwrap_or(false)
    }

    pub fn channel_decoding(&self, channel: ChannelId) -> bool {
        self.channel_word(channel)
            .map(|w| word_flag(w, FLAG_DECODING))
            .unwrap_or(false)
    }

    pub fn channel_recording(&self, channel: ChannelId) -> bool {
        self.channel_word(channel)
            .map(|w| word_flag(w, FLAG_RECORDING))
            .unwrap_or(false)
    }

    pub fn channel_frame_size(&self, channel: ChannelId) -> FrameSize {
        self.channel_word(channel)
            .map(|w| FrameSize::unpack(w as u32))
            .unwrap_or(FrameSize::UNKNOWN)
    }

    fn channel_word(&self, channel: ChannelId) -> Option<u64> {
        self.channels.get(channel).map(|c| c.load(Ordering::Acquire))
    }

    /// 进入新代数并清空该通道的标志与尺寸（控制线程调用）
    pub fn reset(&self, channel: ChannelId, generation: u32) {
        if let Some(cell) = self.channels.get(channel) {
            cell.store(word(generation), Ordering::Release);
            self.publish();
        }
    }

    /// 应用接收器通知
    ///
    /// 代数与该通道当前代数不一致时丢弃并返回 `false`。
    pub fn apply(&self, channel: ChannelId, generation: u32, event: &ReceiverEvent) -> bool {
        let cell = match self.channels.get(channel) {
            Some(cell) => cell,
            None => return false,
        };

        let mut current = cell.load(Ordering::Acquire);
        loop {
            if word_generation(current) != generation & GENERATION_MASK {
                trace!(channel, generation, "Dropping stale receiver event");
                return false;
            }

            let next = match event {
                ReceiverEvent::Streaming(on) => with_flag(current, FLAG_STREAMING, *on),
                ReceiverEvent::Decoding(on) => with_flag(current, FLAG_DECODING, *on),
                ReceiverEvent::Recording(on) => with_flag(current, FLAG_RECORDING, *on),
                ReceiverEvent::FrameSize(size) => with_size(current, *size),
                ReceiverEvent::Error(_) => current,
            };

            if next == current {
                return true;
            }

            match cell.compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }

        self.publish();
        true
    }

    fn compute(&self) -> Snapshot {
        let mut snapshot = Snapshot {
            streaming: false,
            decoding: false,
            recording: false,
            frame_size: 0,
        };

        for (id, cell) in self.channels.iter().enumerate() {
            let w = cell.load(Ordering::Acquire);
            snapshot.streaming |= word_flag(w, FLAG_STREAMING);
            snapshot.decoding |= word_flag(w, FLAG_DECODING);
            snapshot.recording |= word_flag(w, FLAG_RECORDING);
            if id == PRIMARY_CHANNEL {
                snapshot.frame_size = w as u32;
            }
        }

        snapshot
    }

    /// 从全部通道重新计算对外值，直到计算结果稳定
    fn publish(&self) {
        loop {
            let snapshot = self.compute();

            if self.streaming.swap(snapshot.streaming, Ordering::AcqRel) != snapshot.streaming {
                let _ = self.events.send(VideoEvent::StreamingChanged(snapshot.streaming));
            }
            if self.decoding.swap(snapshot.decoding, Ordering::AcqRel) != snapshot.decoding {
                let _ = self.events.send(VideoEvent::DecodingChanged(snapshot.decoding));
            }
            if self.recording.swap(snapshot.recording, Ordering::AcqRel) != snapshot.recording {
                let _ = self.events.send(VideoEvent::RecordingChanged(snapshot.recording));
            }
            if self.frame_size.swap(snapshot.frame_size, Ordering::AcqRel) != snapshot.frame_size {
                let _ = self
                    .events
                    .send(VideoEvent::VideoSizeChanged(FrameSize::unpack(snapshot.frame_size)));
            }

            if self.compute() == snapshot {
                break;
            }
        }
    }
}
