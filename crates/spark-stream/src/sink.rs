//! 传输层能力：驱动向连接交付分块的唯一出口。

use core::fmt;

use crate::error::TransmissionError;

/// 单次分块传输的标识，由驱动在交付前分配。
///
/// 传输层在异步完成时必须携带同一个标识回调
/// [`ChunkedWriteHandler::on_transmission_complete`](crate::ChunkedWriteHandler::on_transmission_complete)，
/// 驱动据此把结果归属到对应的写请求。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransmissionId(u64);

impl TransmissionId {
    pub(crate) const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// 原始序号，仅用于日志与诊断。
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TransmissionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx-{}", self.0)
    }
}

/// 驱动消费的传输层能力。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 把“是否可写”“交付一个分块”“冲刷”三个动作抽象出来，驱动因此与具体协议、套接字或
///   帧格式解耦；分块的帧封装属于上层协议，不在本契约之内。
///
/// ## 契约（What）
/// - `is_writable`：传输层当前能否在不无界缓冲的前提下接收更多出站数据；
/// - `write_chunk`：把分块作为一次独立传输交出。`Ok(())` 表示交付成功，完成结果稍后通过
///   `on_transmission_complete(id, ..)` 回报；`Err` 表示交付即失败，驱动按同一归因规则处理；
/// - `flush`：一次排空过程中至少交付过一个分块时，在过程结束前调用一次。
///
/// ## 风险提示（Trade-offs）
/// - 实现可以在 `write_chunk` 内同步回调驱动（提交写请求、报告完成、请求恢复或拆除），
///   驱动在调用传输层期间不持有任何内部借用；嵌套的恢复请求是无操作。
pub trait ChunkSink<C> {
    /// 当前是否可写。
    fn is_writable(&self) -> bool;

    /// 交付一个分块。
    fn write_chunk(&mut self, id: TransmissionId, chunk: C) -> Result<(), TransmissionError>;

    /// 冲刷已交付的分块。
    fn flush(&mut self) {}
}

impl<C, S> ChunkSink<C> for &mut S
where
    S: ChunkSink<C> + ?Sized,
{
    fn is_writable(&self) -> bool {
        (**self).is_writable()
    }

    fn write_chunk(&mut self, id: TransmissionId, chunk: C) -> Result<(), TransmissionError> {
        (**self).write_chunk(id, chunk)
    }

    fn flush(&mut self) {
        (**self).flush()
    }
}
