//! 写请求队列与结算簿记。
//!
//! # 设计背景（Why）
//! - 写请求的生命周期分两段：在 `pending` 中等待或正被排空，随后在 `settling` 中等待其已交付分块全部确认；
//! - 传输层的完成回调可能乱序到达，完成通知却必须严格按提交顺序兑现，因此结算只从 `settling`
//!   的队首推进，后面的请求即便已满足条件也要等待；
//! - 只有队首的写请求会被读取，所以带有在途分块的 `pending` 条目最多一个，即队首。
//!
//! # 契约说明（What）
//! - 每个数据源恰好关闭一次：离开 `pending` 时由 [`InputSlot::close`] 取走并关闭；
//! - 每个完成句柄恰好兑现一次：结算产出 [`Settled`]，由调用方在释放内部借用后统一兑现；
//! - 拆除之后清空在途登记，迟到的完成回调视为无法归属。

use std::collections::{HashMap, VecDeque};

use tracing::{debug, warn};

use crate::{
    error::{TransmissionError, WriteError, codes},
    input::{BoxedChunkedInput, ChunkPayload},
    promise::{WritePromise, WriteResult},
    sink::TransmissionId,
};

/// 写请求在驱动内部的序号，仅用于日志关联。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct WriteId(u64);

impl WriteId {
    pub(crate) const fn get(self) -> u64 {
        self.0
    }
}

/// 独占持有的数据源，关闭后即被取走。
pub(crate) struct InputSlot<C> {
    input: Option<BoxedChunkedInput<C>>,
}

impl<C: ChunkPayload> InputSlot<C> {
    pub(crate) fn new(input: BoxedChunkedInput<C>) -> Self {
        Self { input: Some(input) }
    }

    pub(crate) fn get_mut(&mut self) -> Option<&mut BoxedChunkedInput<C>> {
        self.input.as_mut()
    }

    /// 关闭数据源；关闭失败只记录日志，从不上抛。
    pub(crate) fn close(&mut self, write: WriteId) {
        let Some(mut input) = self.input.take() else {
            return;
        };
        if let Err(error) = input.close() {
            warn!(
                write_id = write.get(),
                code = codes::SOURCE_CLOSE_FAILED,
                source_code = error.code(),
                error = %error,
                "failed to close chunked source; error suppressed"
            );
        }
    }
}

/// 写请求承载的内容。
pub(crate) enum WriteBody<C> {
    /// 分块数据源。
    Input(InputSlot<C>),
    /// 原样透传的单个载荷，交付后变为 `None`。
    Message(Option<C>),
}

/// 仍在 `pending` 中的写请求。
pub(crate) struct PendingWrite<C> {
    pub(crate) id: WriteId,
    pub(crate) body: WriteBody<C>,
    promise: WritePromise,
    in_flight: usize,
}

impl<C: ChunkPayload> PendingWrite<C> {
    fn close_body(&mut self) {
        match &mut self.body {
            WriteBody::Input(slot) => slot.close(self.id),
            WriteBody::Message(message) => {
                message.take();
            }
        }
    }
}

/// 已离开 `pending`、等待结算的写请求。
struct SettlingWrite {
    id: WriteId,
    promise: WritePromise,
    in_flight: usize,
    failure: Option<WriteError>,
}

impl SettlingWrite {
    fn is_settleable(&self) -> bool {
        self.failure.is_some() || self.in_flight == 0
    }

    fn into_settled(self) -> Settled {
        let result = match self.failure {
            Some(error) => Err(error),
            None => Ok(()),
        };
        Settled {
            id: self.id,
            promise: self.promise,
            result,
        }
    }

    /// 拆除时使用：已失败的保留原因，其余一律取消。
    fn into_cancelled(self) -> Settled {
        Settled::rejected(
            self.id,
            self.promise,
            self.failure.unwrap_or(WriteError::Cancelled),
        )
    }
}

/// 在途分块的归属信息。
struct InFlightChunk {
    write: WriteId,
    progress: u64,
    total: Option<u64>,
}

/// 一个待兑现的完成结局。
#[must_use]
pub(crate) struct Settled {
    id: WriteId,
    promise: WritePromise,
    result: WriteResult,
}

impl Settled {
    pub(crate) fn rejected(id: WriteId, promise: WritePromise, error: WriteError) -> Self {
        Self {
            id,
            promise,
            result: Err(error),
        }
    }

    /// 兑现完成句柄。
    pub(crate) fn resolve(self) {
        match self.result {
            Ok(()) => {
                debug!(write_id = self.id.get(), "chunked write succeeded");
                self.promise.succeed();
            }
            Err(error) => {
                debug!(
                    write_id = self.id.get(),
                    code = error.code(),
                    "chunked write rejected"
                );
                self.promise.fail(error);
            }
        }
    }
}

/// 依次兑现一批结局。
pub(crate) fn resolve_all(settled: Vec<Settled>) {
    settled.into_iter().for_each(Settled::resolve);
}

/// 单连接的写请求簿记。
pub(crate) struct WriteQueue<C> {
    pending: VecDeque<PendingWrite<C>>,
    settling: VecDeque<SettlingWrite>,
    in_flight: HashMap<TransmissionId, InFlightChunk>,
    next_write: u64,
    next_transmission: u64,
    closed: bool,
}

impl<C: ChunkPayload> WriteQueue<C> {
    pub(crate) fn new() -> Self {
        Self {
            pending: VecDeque::new(),
            settling: VecDeque::new(),
            in_flight: HashMap::new(),
            next_write: 0,
            next_transmission: 0,
            closed: false,
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed
    }

    pub(crate) fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub(crate) fn settling_len(&self) -> usize {
        self.settling.len()
    }

    pub(crate) fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }

    pub(crate) fn allocate_write_id(&mut self) -> WriteId {
        self.next_write += 1;
        WriteId(self.next_write)
    }

    /// 追加到队尾。调用方负责先检查 [`is_closed`](Self::is_closed)。
    pub(crate) fn enqueue(&mut self, id: WriteId, body: WriteBody<C>, promise: WritePromise) {
        self.pending.push_back(PendingWrite {
            id,
            body,
            promise,
            in_flight: 0,
        });
    }

    pub(crate) fn head_mut(&mut self) -> Option<&mut PendingWrite<C>> {
        self.pending.front_mut()
    }

    /// 为队首写请求登记一次新的传输；队列为空时返回 `None`。
    pub(crate) fn register_transmission(
        &mut self,
        progress: u64,
        total: Option<u64>,
    ) -> Option<TransmissionId> {
        let head = self.pending.front_mut()?;
        head.in_flight += 1;
        if total.is_some() {
            head.promise.set_total(total);
        }
        self.next_transmission += 1;
        let id = TransmissionId::new(self.next_transmission);
        self.in_flight.insert(
            id,
            InFlightChunk {
                write: head.id,
                progress,
                total,
            },
        );
        Some(id)
    }

    /// 队首数据源已到达结尾：关闭它并转入结算。
    pub(crate) fn finish_head(&mut self) -> Vec<Settled> {
        self.retire_head(None)
    }

    /// 队首写请求失败：关闭数据源，带着失败原因转入结算。
    pub(crate) fn fail_head(&mut self, error: WriteError) -> Vec<Settled> {
        self.retire_head(Some(error))
    }

    fn retire_head(&mut self, failure: Option<WriteError>) -> Vec<Settled> {
        let Some(mut head) = self.pending.pop_front() else {
            return Vec::new();
        };
        head.close_body();
        self.settling.push_back(SettlingWrite {
            id: head.id,
            promise: head.promise,
            in_flight: head.in_flight,
            failure,
        });
        self.settle()
    }

    /// 归属一次传输的完成结果。
    ///
    /// # 契约说明（What）
    /// - 成功：对应写请求的在途计数减一，进度快照推进到交付时刻的采样值；
    /// - 失败：若该写请求仍在队首，立即关闭其数据源并带着失败转入结算；若已在结算中且尚未失败，
    ///   记录为其拒绝原因；已失败的写请求忽略后续结果；
    /// - 传输标识未登记（驱动已拆除或从未交付）时，失败以 `Err` 原样返回给连接层。
    pub(crate) fn complete_transmission(
        &mut self,
        id: TransmissionId,
        result: Result<(), TransmissionError>,
    ) -> Result<Vec<Settled>, TransmissionError> {
        let Some(chunk) = self.in_flight.remove(&id) else {
            return match result {
                Ok(()) => {
                    debug!(
                        transmission_id = id.get(),
                        "ignoring acknowledgement of unknown transmission"
                    );
                    Ok(Vec::new())
                }
                Err(error) => Err(error),
            };
        };

        if let Some(head) = self.pending.front_mut().filter(|head| head.id == chunk.write) {
            head.in_flight = head.in_flight.saturating_sub(1);
            return match result {
                Ok(()) => {
                    head.promise.report_progress(chunk.progress, chunk.total);
                    Ok(Vec::new())
                }
                Err(error) => {
                    warn!(
                        write_id = chunk.write.get(),
                        transmission_id = id.get(),
                        code = error.code(),
                        error = %error,
                        "chunk transmission failed; abandoning source"
                    );
                    Ok(self.fail_head(WriteError::Transmission(error)))
                }
            };
        }

        match self
            .settling
            .iter_mut()
            .find(|entry| entry.id == chunk.write)
        {
            Some(entry) => {
                entry.in_flight = entry.in_flight.saturating_sub(1);
                match (result, entry.failure.is_some()) {
                    (Ok(()), false) => entry.promise.report_progress(chunk.progress, chunk.total),
                    (Err(error), false) => {
                        warn!(
                            write_id = chunk.write.get(),
                            transmission_id = id.get(),
                            code = error.code(),
                            error = %error,
                            "chunk transmission failed after end of input"
                        );
                        entry.failure = Some(WriteError::Transmission(error));
                    }
                    (_, true) => debug!(
                        write_id = chunk.write.get(),
                        transmission_id = id.get(),
                        "ignoring completion for failed write"
                    ),
                }
            }
            None => debug!(
                write_id = chunk.write.get(),
                transmission_id = id.get(),
                "ignoring completion for settled write"
            ),
        }
        Ok(self.settle())
    }

    /// 从结算队首开始兑现，遇到仍有在途分块的成功候选即停止。
    fn settle(&mut self) -> Vec<Settled> {
        let mut settled = Vec::new();
        while self
            .settling
            .front()
            .is_some_and(SettlingWrite::is_settleable)
        {
            if let Some(entry) = self.settling.pop_front() {
                settled.push(entry.into_settled());
            }
        }
        settled
    }

    /// 拆除：先拒绝结算中的请求，再关闭并取消 `pending` 中的请求，均按提交顺序。
    ///
    /// 重复调用返回空集合。
    pub(crate) fn teardown(&mut self) -> Vec<Settled> {
        if self.closed {
            return Vec::new();
        }
        self.closed = true;
        self.in_flight.clear();

        let mut settled: Vec<Settled> = self
            .settling
            .drain(..)
            .map(SettlingWrite::into_cancelled)
            .collect();

        while let Some(mut write) = self.pending.pop_front() {
            write.close_body();
            settled.push(Settled::rejected(
                write.id,
                write.promise,
                WriteError::Cancelled,
            ));
        }
        settled
    }
}
