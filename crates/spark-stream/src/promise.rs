//! 写请求的完成通知：驱动侧的 [`WritePromise`] 与调用方侧的 [`WriteCompletion`]。
//!
//! # 设计背景（Why）
//! - 完成通知在传输层的异步回调中兑现，调用方却可能在任意任务中等待；二者通过一次性通道解耦，
//!   兑现点与下游回调的注册点互不依赖；
//! - `WritePromise` 的兑现方法按值消费自身，“兑现两次”在类型层面即不可表达。
//!
//! # 契约说明（What）
//! - 每个写请求恰好兑现一次：成功、拒绝或取消；
//! - 若驱动侧句柄在兑现前被丢弃，调用方观察到 [`WriteError::Cancelled`]；
//! - 进度快照由驱动在分块传输被确认时更新，可在任意线程读取。

use core::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};
use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use futures::channel::oneshot;

use crate::error::WriteError;

/// 写请求的最终结局。
pub type WriteResult = Result<(), WriteError>;

const UNKNOWN_TOTAL: u64 = u64::MAX;

#[derive(Debug)]
struct ProgressCell {
    progress: AtomicU64,
    total: AtomicU64,
}

impl ProgressCell {
    fn new() -> Self {
        Self {
            progress: AtomicU64::new(0),
            total: AtomicU64::new(UNKNOWN_TOTAL),
        }
    }

    fn snapshot(&self) -> WriteProgress {
        let total = self.total.load(Ordering::Acquire);
        WriteProgress {
            progress: self.progress.load(Ordering::Acquire),
            total: (total != UNKNOWN_TOTAL).then_some(total),
        }
    }
}

/// 写请求的进度快照。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WriteProgress {
    /// 已被传输层确认的进度（由数据源的 `progress()` 在交付时刻采样）。
    pub progress: u64,
    /// 数据源声明的总长度。
    pub total: Option<u64>,
}

/// 创建一对相互关联的兑现端与等待端。
pub(crate) fn write_promise() -> (WritePromise, WriteCompletion) {
    let (sender, receiver) = oneshot::channel();
    let progress = Arc::new(ProgressCell::new());
    (
        WritePromise {
            sender,
            progress: Arc::clone(&progress),
        },
        WriteCompletion { receiver, progress },
    )
}

/// 驱动侧的兑现端。
#[derive(Debug)]
pub(crate) struct WritePromise {
    sender: oneshot::Sender<WriteResult>,
    progress: Arc<ProgressCell>,
}

impl WritePromise {
    pub(crate) fn succeed(self) {
        self.complete(Ok(()));
    }

    pub(crate) fn fail(self, error: WriteError) {
        self.complete(Err(error));
    }

    fn complete(self, result: WriteResult) {
        // 调用方已丢弃等待端时结果无人接收，属于正常情况。
        let _ = self.sender.send(result);
    }

    pub(crate) fn set_total(&self, total: Option<u64>) {
        if let Some(total) = total {
            self.progress.total.store(total, Ordering::Release);
        }
    }

    /// 进度单调不减：乱序到达的确认不会让快照倒退。
    pub(crate) fn report_progress(&self, progress: u64, total: Option<u64>) {
        self.set_total(total);
        self.progress.progress.fetch_max(progress, Ordering::AcqRel);
    }
}

/// 调用方侧的完成句柄。
///
/// # 使用方式（How）
/// - 在异步任务中直接 `.await`；
/// - 在事件循环或测试中用 [`try_result`](Self::try_result) 非阻塞地查询；
/// - 结局只会被取出一次，取出后句柄即告用尽。
#[derive(Debug)]
#[must_use = "dropping a WriteCompletion discards the write outcome"]
pub struct WriteCompletion {
    receiver: oneshot::Receiver<WriteResult>,
    progress: Arc<ProgressCell>,
}

impl WriteCompletion {
    /// 非阻塞地查询结局；尚未兑现时返回 `None`。
    pub fn try_result(&mut self) -> Option<WriteResult> {
        match self.receiver.try_recv() {
            Ok(Some(result)) => Some(result),
            Ok(None) => None,
            Err(oneshot::Canceled) => Some(Err(WriteError::Cancelled)),
        }
    }

    /// 当前进度快照。
    pub fn progress(&self) -> WriteProgress {
        self.progress.snapshot()
    }
}

impl Future for WriteCompletion {
    type Output = WriteResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.receiver).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(oneshot::Canceled)) => Poll::Ready(Err(WriteError::Cancelled)),
            Poll::Pending => Poll::Pending,
        }
    }
}
