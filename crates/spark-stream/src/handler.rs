//! # 分块写出驱动
//!
//! ## 角色定位（Why）
//! - 连接写路径上的出站处理器：接收任意大或生产缓慢的数据源，按传输层的可写性逐块排空，
//!   既不把整个源缓冲进内存，也不以超过传输层承受能力的速度写出；
//! - 每条连接一个实例，所有方法都在该连接的单线程上下文中调用，因此内部状态用 `RefCell` 与 `Cell`
//!   承载，不需要任何锁。
//!
//! ## 核心流程（How）
//! - `write` 只入队，不读取数据；
//! - `resume_transfer` 是唯一的排空入口，由刷新、可写性变化或调用方显式触发。它在每一轮迭代中
//!   短暂借用队列、决定下一步，然后在**不持有借用**的情况下把分块交给传输层，传输层因此可以在
//!   `write_chunk` 内部同步回调驱动；
//! - 传输层通过 `on_transmission_complete` 回报每次传输的结果，驱动据此推进结算，按提交顺序兑现完成句柄。
//!
//! ## 风险提示（Trade-offs）
//! - 数据源回调期间驱动持有队列借用，数据源不得重入驱动；
//! - 永不结束的数据源会永远占据队首，这是无界流式数据源的合法用法。

use core::{
    cell::{Cell, RefCell},
    fmt,
};

use tracing::{debug, trace, warn};

use crate::{
    config::ChunkedWriteConfig,
    error::{ConfigError, TransmissionError, WriteError},
    input::{BoxedChunkedInput, ChunkPayload, ChunkedInput},
    promise::{WriteCompletion, write_promise},
    queue::{InputSlot, Settled, WriteBody, WriteId, WriteQueue, resolve_all},
    sink::{ChunkSink, TransmissionId},
};

/// 排空循环单步决策的结果。
enum Step<C> {
    /// 队列为空或驱动已拆除。
    Idle,
    /// 队首暂无数据，等待下一次外部触发。
    Suspend,
    /// 传输层不可写，等待可写性恢复。
    Blocked,
    /// 队首写请求已离开 `pending`（完成或失败），继续下一轮。
    Continue(Vec<Settled>),
    /// 丢弃了一个零长度分块。
    Discarded,
    /// 交付一个分块。
    Transmit { id: TransmissionId, chunk: C },
}

/// 排空标记的作用域守卫，任何退出路径都会复位。
struct DrainGuard<'a> {
    flag: &'a Cell<bool>,
}

impl<'a> DrainGuard<'a> {
    fn enter(flag: &'a Cell<bool>) -> Option<Self> {
        if flag.replace(true) {
            return None;
        }
        Some(Self { flag })
    }
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.flag.set(false);
    }
}

/// 分块写出驱动。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 在背压约束下把排队的数据源逐块交给传输层，保证跨源与源内的严格顺序；
/// - 对每个写请求保证：数据源恰好关闭一次，完成句柄恰好兑现一次，且按提交顺序兑现。
///
/// ## 契约（What）
/// - `C` 为分块载荷类型：字节型驱动使用 [`Bytes`](bytes::Bytes)，消息型驱动使用 `Vec<M>`，
///   排空逻辑只此一份；
/// - 写请求的成功条件：数据源报告到达结尾（随即被关闭），并且为它交付的每一个分块都已被传输层确认；
/// - 数据源失败、传输失败、拆除与拆除后提交分别以 [`WriteError::Source`]、[`WriteError::Transmission`]、
///   [`WriteError::Cancelled`]、[`WriteError::QueueClosed`] 拒绝；
/// - 驱动被丢弃时自动执行 [`close`](Self::close)。
///
/// ## 注意事项（Trade-offs）
/// - 驱动不是 `Sync`，也不应跨线程共享；不同连接的驱动彼此独立，可以并行运行。
pub struct ChunkedWriteHandler<C: ChunkPayload> {
    config: ChunkedWriteConfig,
    queue: RefCell<WriteQueue<C>>,
    draining: Cell<bool>,
}

/// 字节型驱动。
pub type ByteChunkedWriteHandler = ChunkedWriteHandler<bytes::Bytes>;

/// 消息型驱动。
pub type MessageChunkedWriteHandler<M> = ChunkedWriteHandler<Vec<M>>;

impl<C: ChunkPayload> ChunkedWriteHandler<C> {
    /// 以默认配置创建驱动。
    pub fn new() -> Self {
        Self::from_valid_config(ChunkedWriteConfig::default())
    }

    /// 以自定义配置创建驱动，配置非法时返回 [`ConfigError`]。
    pub fn with_config(config: ChunkedWriteConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::from_valid_config(config))
    }

    fn from_valid_config(config: ChunkedWriteConfig) -> Self {
        Self {
            config,
            queue: RefCell::new(WriteQueue::new()),
            draining: Cell::new(false),
        }
    }

    /// 当前生效的配置。
    pub fn config(&self) -> &ChunkedWriteConfig {
        &self.config
    }

    /// 提交一个分块数据源。
    ///
    /// # 契约说明（What）
    /// - 只入队，不读取任何数据；需要由刷新或可写性事件触发 [`resume_transfer`](Self::resume_transfer)；
    /// - 驱动已拆除时立即关闭数据源，返回已被 [`WriteError::QueueClosed`] 拒绝的完成句柄。
    pub fn write<I>(&self, input: I) -> WriteCompletion
    where
        I: ChunkedInput<Chunk = C> + Send + 'static,
    {
        self.write_boxed(Box::new(input))
    }

    /// 提交一个已装箱的数据源。
    pub fn write_boxed(&self, input: BoxedChunkedInput<C>) -> WriteCompletion {
        self.submit(WriteBody::Input(InputSlot::new(input)))
    }

    /// 提交一个原样透传的载荷。
    ///
    /// 载荷按队列顺序作为一次独立传输交出，完成句柄在该传输被确认后兑现。
    pub fn write_message(&self, message: C) -> WriteCompletion {
        self.submit(WriteBody::Message(Some(message)))
    }

    fn submit(&self, body: WriteBody<C>) -> WriteCompletion {
        let (promise, completion) = write_promise();
        let rejected = {
            let mut queue = self.queue.borrow_mut();
            let id = queue.allocate_write_id();
            if queue.is_closed() {
                let mut body = body;
                if let WriteBody::Input(slot) = &mut body {
                    slot.close(id);
                }
                debug!(write_id = id.get(), "chunked write submitted after teardown");
                Some(Settled::rejected(id, promise, WriteError::QueueClosed))
            } else {
                queue.enqueue(id, body, promise);
                debug!(
                    write_id = id.get(),
                    pending = queue.pending_len(),
                    "chunked write enqueued"
                );
                None
            }
        };
        if let Some(settled) = rejected {
            settled.resolve();
        }
        completion
    }

    /// 排空入口。
    ///
    /// # 教案级注释
    ///
    /// ## 意图（Why）
    /// - 在传输层可写时尽可能推进队列；遇到“暂无数据”或“不可写”即返回调度器，绝不忙等。
    ///
    /// ## 逻辑（How）
    /// 1. 已在排空中（包括传输层在 `write_chunk` 内重入）时立即返回；
    /// 2. 队首已到达结尾：关闭数据源并转入结算，不消耗可写容量；
    /// 3. 可写时读取下一个分块：非空分块作为独立传输交出；零长度分块被丢弃并重试，同一数据源
    ///    连续产出的空分块超过 `max_empty_chunks` 个则挂起；返回 `None` 时再次检查结尾，仍未结束则挂起；
    /// 4. 数据源失败时关闭它、以源错误拒绝，并继续处理下一个写请求；
    /// 5. 本轮交付过分块时调用一次 `sink.flush()`。
    ///
    /// ## 契约（What）
    /// - 同步交付失败若无法归属到任何写请求（例如传输层在 `write_chunk` 内拆除了驱动），
    ///   返回其中第一个失败，交由连接层处理；其余情况返回 `Ok(())`。
    pub fn resume_transfer<S>(&self, sink: &mut S) -> Result<(), TransmissionError>
    where
        S: ChunkSink<C> + ?Sized,
    {
        let Some(_guard) = DrainGuard::enter(&self.draining) else {
            trace!("chunked write drain already running");
            return Ok(());
        };

        let mut empty_streak = 0_u32;
        let mut handed_off = 0_usize;
        let mut unattributed = None;
        loop {
            let writable = sink.is_writable();
            match self.next_step(writable) {
                Step::Idle => break,
                Step::Suspend => {
                    debug!(
                        pending = self.pending_writes(),
                        "chunked source has no chunk ready; suspending"
                    );
                    break;
                }
                Step::Blocked => {
                    debug!(
                        pending = self.pending_writes(),
                        "transport not writable; suspending"
                    );
                    break;
                }
                Step::Continue(settled) => {
                    empty_streak = 0;
                    resolve_all(settled);
                }
                Step::Discarded => {
                    empty_streak += 1;
                    if empty_streak > self.config.max_empty_chunks() {
                        debug!(
                            empty_streak,
                            "chunked source keeps producing empty chunks; suspending"
                        );
                        break;
                    }
                }
                Step::Transmit { id, chunk } => {
                    empty_streak = 0;
                    let len = chunk.chunk_len();
                    match sink.write_chunk(id, chunk) {
                        Ok(()) => {
                            handed_off += 1;
                            trace!(transmission_id = id.get(), len, "chunk handed to transport");
                        }
                        Err(error) => {
                            // 同步交付失败与异步失败走同一条归属路径。
                            if let Err(error) = self.on_transmission_complete(id, Err(error)) {
                                unattributed.get_or_insert(error);
                            }
                        }
                    }
                }
            }
        }

        if handed_off > 0 {
            sink.flush();
        }
        unattributed.map_or(Ok(()), Err)
    }

    fn next_step(&self, writable: bool) -> Step<C> {
        let mut queue = self.queue.borrow_mut();
        if queue.is_closed() {
            return Step::Idle;
        }
        let size_hint = self.config.chunk_size_hint();
        let Some(head) = queue.head_mut() else {
            return Step::Idle;
        };
        let write_id = head.id;

        let input = match &mut head.body {
            WriteBody::Message(message) => {
                if message.is_none() {
                    return Step::Continue(queue.finish_head());
                }
                if !writable {
                    return Step::Blocked;
                }
                let Some(chunk) = message.take() else {
                    return Step::Continue(queue.finish_head());
                };
                return match queue.register_transmission(0, None) {
                    Some(id) => Step::Transmit { id, chunk },
                    None => Step::Idle,
                };
            }
            WriteBody::Input(slot) => match slot.get_mut() {
                Some(input) => input,
                None => return Step::Continue(queue.finish_head()),
            },
        };

        match input.is_end_of_input() {
            Ok(true) => {
                debug!(write_id = write_id.get(), "chunked source reached end of input");
                return Step::Continue(queue.finish_head());
            }
            Ok(false) => {}
            Err(error) => return Self::source_failed(&mut queue, write_id, error.into()),
        }
        if !writable {
            return Step::Blocked;
        }

        match input.read_chunk(size_hint) {
            Ok(Some(chunk)) if chunk.is_empty_chunk() => Step::Discarded,
            Ok(Some(chunk)) => {
                let progress = input.progress();
                let total = input.length();
                match queue.register_transmission(progress, total) {
                    Some(id) => Step::Transmit { id, chunk },
                    None => Step::Idle,
                }
            }
            Ok(None) => match input.is_end_of_input() {
                Ok(true) => {
                    debug!(write_id = write_id.get(), "chunked source reached end of input");
                    Step::Continue(queue.finish_head())
                }
                Ok(false) => Step::Suspend,
                Err(error) => Self::source_failed(&mut queue, write_id, error.into()),
            },
            Err(error) => Self::source_failed(&mut queue, write_id, error.into()),
        }
    }

    fn source_failed(
        queue: &mut WriteQueue<C>,
        write_id: WriteId,
        error: WriteError,
    ) -> Step<C> {
        warn!(
            write_id = write_id.get(),
            code = error.code(),
            error = %error,
            "chunked source failed; closing it and moving on"
        );
        Step::Continue(queue.fail_head(error))
    }

    /// 刷新事件：总是尝试排空。
    pub fn on_flush<S>(&self, sink: &mut S) -> Result<(), TransmissionError>
    where
        S: ChunkSink<C> + ?Sized,
    {
        self.resume_transfer(sink)
    }

    /// 可写性变化事件：只在变为可写时排空。
    pub fn on_writability_changed<S>(
        &self,
        sink: &mut S,
        writable: bool,
    ) -> Result<(), TransmissionError>
    where
        S: ChunkSink<C> + ?Sized,
    {
        if writable {
            return self.resume_transfer(sink);
        }
        Ok(())
    }

    /// 回报一次传输的结果。
    ///
    /// # 契约说明（What）
    /// - `Ok(())`：结果已被归属（或是对未知传输的成功确认，直接忽略）；
    /// - `Err(error)`：失败无法归属到任何写请求（驱动已拆除或标识未知），原样交还连接层处理；
    /// - 失败的写请求若仍在队首会被放弃，后续写请求需要下一次触发才会继续排空。
    pub fn on_transmission_complete(
        &self,
        id: TransmissionId,
        result: Result<(), TransmissionError>,
    ) -> Result<(), TransmissionError> {
        let outcome = self.queue.borrow_mut().complete_transmission(id, result);
        match outcome {
            Ok(settled) => {
                resolve_all(settled);
                Ok(())
            }
            Err(error) => {
                warn!(
                    transmission_id = id.get(),
                    code = error.code(),
                    error = %error,
                    "unattributed chunk transmission failure"
                );
                Err(error)
            }
        }
    }

    /// 拆除驱动：按提交顺序拒绝全部未结算的写请求，关闭仍在队列中的数据源，不再调用传输层。
    ///
    /// 重复调用是无操作。
    pub fn close(&self) {
        let settled = self.queue.borrow_mut().teardown();
        if !settled.is_empty() {
            debug!(rejected = settled.len(), "chunked write driver torn down");
        }
        resolve_all(settled);
    }

    /// 连接失活事件，等价于 [`close`](Self::close)。
    pub fn on_channel_inactive(&self) {
        self.close();
    }

    /// 仍在队列中（尚未排空完毕）的写请求数。
    pub fn pending_writes(&self) -> usize {
        self.queue.borrow().pending_len()
    }

    /// 已排空完毕、等待传输确认或前序请求结算的写请求数。
    pub fn unsettled_writes(&self) -> usize {
        self.queue.borrow().settling_len()
    }

    /// 已交付但尚未回报结果的传输数。
    pub fn in_flight_transmissions(&self) -> usize {
        self.queue.borrow().in_flight_len()
    }

    /// 是否正处于一轮排空之中。
    pub fn is_draining(&self) -> bool {
        self.draining.get()
    }

    /// 驱动是否已拆除。
    pub fn is_closed(&self) -> bool {
        self.queue.borrow().is_closed()
    }
}

impl<C: ChunkPayload> Default for ChunkedWriteHandler<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: ChunkPayload> Drop for ChunkedWriteHandler<C> {
    fn drop(&mut self) {
        resolve_all(self.queue.get_mut().teardown());
    }
}

impl<C: ChunkPayload> fmt::Debug for ChunkedWriteHandler<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("ChunkedWriteHandler");
        debug.field("config", &self.config);
        match self.queue.try_borrow() {
            Ok(queue) => debug
                .field("pending", &queue.pending_len())
                .field("settling", &queue.settling_len())
                .field("in_flight", &queue.in_flight_len())
                .field("closed", &queue.is_closed()),
            Err(_) => debug.field("queue", &"<borrowed>"),
        };
        debug.field("draining", &self.draining.get()).finish()
    }
}
