//! 分块写出驱动的可调参数。

use serde::Deserialize;

use crate::error::ConfigError;

/// 默认分块大小提示，与常见套接字发送缓冲的页粒度对齐。
pub const DEFAULT_CHUNK_SIZE_HINT: usize = 8 * 1024;

/// 单次排空过程中同一数据源允许连续产出的零长度分块数量，超出后本轮挂起。
pub const DEFAULT_MAX_EMPTY_CHUNKS: u32 = 64;

/// 驱动配置。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - `chunk_size_hint` 决定每次 `read_chunk` 建议的分块大小，影响内存占用与系统调用次数之间的平衡；
/// - `max_empty_chunks` 为“丢弃零长度分块后立即重试”设置上限，异常数据源因此无法让事件循环空转。
///
/// ## 契约 (What)
/// - 两个字段都必须大于零，[`validate`](Self::validate) 负责校验；
/// - 反序列化时缺省字段回落到默认值，因此 `{}` 即为合法配置。
///
/// ## 注意事项 (Trade-offs)
/// - 大小提示只是建议，数据源可以返回更小或更大的分块；驱动从不切分或合并分块。
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChunkedWriteConfig {
    chunk_size_hint: usize,
    max_empty_chunks: u32,
}

impl ChunkedWriteConfig {
    /// 以默认值创建配置。
    pub const fn new() -> Self {
        Self {
            chunk_size_hint: DEFAULT_CHUNK_SIZE_HINT,
            max_empty_chunks: DEFAULT_MAX_EMPTY_CHUNKS,
        }
    }

    /// 设置分块大小提示。
    pub fn with_chunk_size_hint(mut self, chunk_size_hint: usize) -> Self {
        self.chunk_size_hint = chunk_size_hint;
        self
    }

    /// 设置连续零长度分块的上限。
    pub fn with_max_empty_chunks(mut self, max_empty_chunks: u32) -> Self {
        self.max_empty_chunks = max_empty_chunks;
        self
    }

    /// 分块大小提示。
    pub fn chunk_size_hint(&self) -> usize {
        self.chunk_size_hint
    }

    /// 同一数据源连续零长度分块的容忍数量。
    pub fn max_empty_chunks(&self) -> u32 {
        self.max_empty_chunks
    }

    /// 校验配置是否可用。
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size_hint == 0 {
            return Err(ConfigError::ZeroChunkSizeHint);
        }
        if self.max_empty_chunks == 0 {
            return Err(ConfigError::ZeroEmptyChunkBudget);
        }
        Ok(())
    }
}

impl Default for ChunkedWriteConfig {
    fn default() -> Self {
        Self::new()
    }
}
