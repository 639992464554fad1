//! 分块数据源能力契约。
//!
//! # 模块定位（Why）
//! - 驱动只依赖三项能力：判定是否结束、按需产出下一个分块、释放资源；文件、字节流、消息
//!   迭代器等具体来源由上层实现，驱动对其内部 I/O 一无所知；
//! - 字节型与消息型两种形态共享同一契约，区别只在关联类型 [`ChunkedInput::Chunk`]，
//!   驱动逻辑因此只写一份。

use bytes::{Bytes, BytesMut};

use crate::error::SourceError;

/// 分块载荷需要向驱动暴露的最小信息。
///
/// # 契约说明（What）
/// - `is_empty_chunk`：零长度分块会被驱动丢弃且不消耗可写容量；
/// - `chunk_len`：分块的逻辑长度（字节数或消息条数），仅用于日志与进度统计。
pub trait ChunkPayload {
    /// 是否为零长度分块。
    fn is_empty_chunk(&self) -> bool {
        self.chunk_len() == 0
    }

    /// 分块的逻辑长度。
    fn chunk_len(&self) -> usize;
}

impl ChunkPayload for Bytes {
    fn chunk_len(&self) -> usize {
        self.len()
    }
}

impl ChunkPayload for BytesMut {
    fn chunk_len(&self) -> usize {
        self.len()
    }
}

/// 消息型分块：一次 `read_chunk` 产出的一批不透明应用消息。
impl<M> ChunkPayload for Vec<M> {
    fn chunk_len(&self) -> usize {
        self.len()
    }
}

/// 按需产出分块的惰性数据源。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 让任意大或生产缓慢的数据源以有界分块的方式进入写路径，既不把整个源缓冲进内存，
///   也不会以超过传输层承受能力的速度写出。
///
/// ## 契约（What）
/// - `is_end_of_input`：廉价且不消费数据；无法判定状态时返回 [`SourceError`]；
/// - `read_chunk`：返回 `Ok(Some(chunk))` 表示产出下一个分块；`Ok(None)` 表示“尚未结束但暂无数据”，
///   驱动会挂起并等待下一次外部触发，绝不忙等；到达结尾后重复调用必须返回 `Ok(None)`，不得重发数据；
/// - `read_chunk` 不得无界阻塞调用线程，只允许有界或异步读取；
/// - `close`：释放全部底层资源，即便从未读取或只消费了一部分也必须可安全调用；驱动保证每个源
///   恰好调用一次；
/// - `length` / `progress`：可选的总量与已产出量，用于完成句柄上的进度快照。
///
/// ## 风险提示（Trade-offs）
/// - 源在回调期间不得重入驱动（例如在 `read_chunk` 内提交新的写请求），驱动此时持有队列的独占借用。
pub trait ChunkedInput {
    /// 产出的分块类型。
    type Chunk: ChunkPayload;

    /// 是否已到达输入结尾。
    fn is_end_of_input(&mut self) -> Result<bool, SourceError>;

    /// 产出下一个分块，`size_hint` 为驱动建议的分块大小。
    fn read_chunk(&mut self, size_hint: usize) -> Result<Option<Self::Chunk>, SourceError>;

    /// 释放底层资源。
    fn close(&mut self) -> Result<(), SourceError>;

    /// 输入总长度，未知时返回 `None`。
    fn length(&self) -> Option<u64> {
        None
    }

    /// 已产出的长度。
    fn progress(&self) -> u64 {
        0
    }
}

impl<I> ChunkedInput for Box<I>
where
    I: ChunkedInput + ?Sized,
{
    type Chunk = I::Chunk;

    fn is_end_of_input(&mut self) -> Result<bool, SourceError> {
        (**self).is_end_of_input()
    }

    fn read_chunk(&mut self, size_hint: usize) -> Result<Option<Self::Chunk>, SourceError> {
        (**self).read_chunk(size_hint)
    }

    fn close(&mut self) -> Result<(), SourceError> {
        (**self).close()
    }

    fn length(&self) -> Option<u64> {
        (**self).length()
    }

    fn progress(&self) -> u64 {
        (**self).progress()
    }
}

/// 驱动内部持有的类型擦除数据源。
pub type BoxedChunkedInput<C> = Box<dyn ChunkedInput<Chunk = C> + Send>;

/// 字节型数据源：分块为有界字节缓冲。
pub trait ChunkedByteInput: ChunkedInput<Chunk = Bytes> {}

impl<T> ChunkedByteInput for T where T: ChunkedInput<Chunk = Bytes> + ?Sized {}

/// 消息型数据源：分块为一批不透明应用消息。
pub trait ChunkedMessageInput<M>: ChunkedInput<Chunk = Vec<M>> {}

impl<T, M> ChunkedMessageInput<M> for T where T: ChunkedInput<Chunk = Vec<M>> + ?Sized {}

/// 将具体数据源装箱为驱动可持有的形态。
pub fn boxed<I>(input: I) -> BoxedChunkedInput<I::Chunk>
where
    I: ChunkedInput + Send + 'static,
{
    Box::new(input)
}
