use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::warn;

use crate::ChannelId;

static NEXT_SINK_ID: AtomicU64 = AtomicU64::new(1);

/// 显示目标句柄
///
/// 由界面层创建并持有，槽位只保存引用。
#[derive(Clone)]
pub struct VideoSink {
    id: u64,
    target: Arc<dyn Any + Send + Sync>,
}

impl VideoSink {
    pub fn new<T: Any + Send + Sync>(target: T) -> Self {
        Self {
            id: NEXT_SINK_ID.fetch_add(1, Ordering::Relaxed),
            target: Arc::new(target),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.target.downcast_ref::<T>()
    }
}

impl PartialEq for VideoSink {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for VideoSink {}

impl fmt::Debug for VideoSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VideoSink").field("id", &self.id).finish()
    }
}

/// 显示目标绑定
///
/// 绑定/释放必须发生在渲染线程上，实现负责把操作转交给渲染上下文，
/// 控制线程只发出请求。
pub trait SinkBinder: Send + Sync {
    fn bind(&self, channel: ChannelId, sink: &VideoSink);
    fn release(&self, channel: ChannelId, sink: &VideoSink);
}

/// 渲染线程待执行的绑定操作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkOp {
    Bind { channel: ChannelId, sink: VideoSink },
    Release { channel: ChannelId, sink: VideoSink },
}

/// 基于队列的 `SinkBinder`，由渲染线程在每帧开始时取出执行
#[derive(Clone)]
pub struct RenderQueue {
    tx: mpsc::UnboundedSender<SinkOp>,
}

/// 渲染线程侧
pub struct RenderQueueReceiver {
    rx: mpsc::UnboundedReceiver<SinkOp>,
}

impl RenderQueue {
    pub fn new() -> (Self, RenderQueueReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, RenderQueueReceiver { rx })
    }

    fn push(&self, op: SinkOp) {
        if self.tx.send(op).is_err() {
            warn!("Render context is gone, dropping sink operation");
        }
    }
}

impl SinkBinder for RenderQueue {
    fn bind(&self, channel: ChannelId, sink: &VideoSink) {
        self.push(SinkOp::Bind {
            channel,
            sink: sink.clone(),
        });
    }

    fn release(&self, channel: ChannelId, sink: &VideoSink) {
        self.push(SinkOp::Release {
            channel,
            sink: sink.clone(),
        });
    }
}

impl RenderQueueReceiver {
    /// 执行所有已排队的操作，返回执行数量
    pub fn drain<F: FnMut(SinkOp)>(&mut self, mut f: F) -> usize {
        let mut count = 0;
        while let Ok(op) = self.rx.try_recv() {
            f(op);
            count += 1;
        }
        count
    }

    pub async fn recv(&mut self) -> Option<SinkOp> {
        self.rx.recv().await
    }
}
