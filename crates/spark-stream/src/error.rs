//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 为分块写出路径集中定义错误语义：数据源失败、传输失败、拆除取消与队列关闭；
//! - 每个错误都携带 `<域>.<语义>` 形式的稳定错误码，便于日志与告警按码聚合。
//!
//! ## 设计要求（What）
//! - 所有错误类型派生 `thiserror::Error`，与 `std::error::Error` 生态兼容；
//! - [`WriteError`] 是完成句柄上唯一的拒绝类型，一次写请求只会收到一次；
//! - 源关闭阶段的错误只记录日志，从不覆盖更早的读取错误。

use std::{borrow::Cow, error::Error as StdError, io};

use thiserror::Error;

/// 底层原因的统一装箱形态。
pub type ErrorCause = Box<dyn StdError + Send + Sync + 'static>;

/// 稳定错误码。
pub mod codes {
    pub const SOURCE_FAILED: &str = "spark.stream.source_failed";
    pub const SOURCE_CLOSE_FAILED: &str = "spark.stream.source_close_failed";
    pub const TRANSMISSION_FAILED: &str = "spark.stream.transmission_failed";
    pub const CANCELLED: &str = "spark.stream.cancelled";
    pub const QUEUE_CLOSED: &str = "spark.stream.queue_closed";
    pub const CONFIG_INVALID: &str = "spark.stream.config_invalid";
}

/// 分块数据源在 `is_end_of_input` / `read_chunk` / `close` 中报告的失败。
///
/// # 教案式说明
/// - **意图 (Why)**：数据源失败只影响所属的那一个写请求，驱动据此拒绝其完成句柄并继续推进队列；
/// - **契约 (What)**：`code` 默认为 [`codes::SOURCE_FAILED`]；`message` 面向排障人员；`cause` 为可选底层原因；
/// - **风险 (Trade-offs)**：消息使用 `Cow` 保存，静态文案零分配，动态文案付出一次堆分配。
#[derive(Debug, Error)]
#[error("{message}")]
pub struct SourceError {
    code: &'static str,
    message: Cow<'static, str>,
    #[source]
    cause: Option<ErrorCause>,
}

impl SourceError {
    /// 构造数据源错误。
    pub fn new(message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            code: codes::SOURCE_FAILED,
            message: message.into(),
            cause: None,
        }
    }

    /// 附带底层原因。
    pub fn with_cause(mut self, cause: impl StdError + Send + Sync + 'static) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// 覆盖错误码，供实现区分“读取失败”“关闭失败”等细分语义。
    pub fn with_code(mut self, code: &'static str) -> Self {
        self.code = code;
        self
    }

    pub fn code(&self) -> &'static str {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<io::Error> for SourceError {
    fn from(error: io::Error) -> Self {
        SourceError::new(format!("chunked source io: {error}")).with_cause(error)
    }
}

/// 传输层在交付或完成一次分块传输时报告的失败。
///
/// # 教案式说明
/// - **意图 (Why)**：若失败可归属到某个写请求的在途分块，则作为该请求的拒绝原因；否则原样
///   交还给连接层的错误通道；
/// - **契约 (What)**：与 [`SourceError`] 对称，错误码默认为 [`codes::TRANSMISSION_FAILED`]。
#[derive(Debug, Error)]
#[error("{message}")]
pub struct TransmissionError {
    code: &'static str,
    message: Cow<'static, str>,
    #[source]
    cause: Option<ErrorCause>,
}

impl TransmissionError {
    /// 构造传输错误。
    pub fn new(message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            code: codes::TRANSMISSION_FAILED,
            message: message.into(),
            cause: None,
        }
    }

    /// 附带底层原因。
    pub fn with_cause(mut self, cause: impl StdError + Send + Sync + 'static) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    pub fn with_code(mut self, code: &'static str) -> Self {
        self.code = code;
        self
    }

    pub fn code(&self) -> &'static str {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<io::Error> for TransmissionError {
    fn from(error: io::Error) -> Self {
        TransmissionError::new(format!("chunk transmission io: {error}")).with_cause(error)
    }
}

/// 写请求完成句柄上的拒绝原因。
///
/// # 教案式说明
/// - **意图 (Why)**：把源失败、传输失败、拆除取消与队列关闭四类结局收敛到一个类型，调用方
///   只需匹配一次即可决定重试或放弃；
/// - **契约 (What)**：
///   - `Source`：数据源读取或终止判定失败，源已被尝试关闭；
///   - `Transmission`：该请求的某个在途分块传输失败（首个失败生效）；
///   - `Cancelled`：驱动被拆除时请求仍未结算；
///   - `QueueClosed`：驱动拆除之后才提交的请求，源已由驱动关闭。
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum WriteError {
    #[error("chunked source failed: {0}")]
    Source(#[from] SourceError),
    #[error("chunk transmission failed: {0}")]
    Transmission(#[from] TransmissionError),
    #[error("chunked write cancelled before completion")]
    Cancelled,
    #[error("chunked write queue is closed")]
    QueueClosed,
}

impl WriteError {
    /// 返回稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            WriteError::Source(error) => error.code(),
            WriteError::Transmission(error) => error.code(),
            WriteError::Cancelled => codes::CANCELLED,
            WriteError::QueueClosed => codes::QUEUE_CLOSED,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, WriteError::Cancelled)
    }
}

/// 配置校验失败。
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("chunk_size_hint must be greater than zero")]
    ZeroChunkSizeHint,
    #[error("max_empty_chunks must be greater than zero")]
    ZeroEmptyChunkBudget,
}

impl ConfigError {
    pub fn code(&self) -> &'static str {
        codes::CONFIG_INVALID
    }
}
