#![deny(unsafe_code)]

//! `spark-stream` 提供连接写路径上的分块写出驱动。
//!
//! # 模块定位（Why）
//! - 文件、字节流、消息迭代器等数据源可能任意大或生产缓慢，直接写出要么把整个源缓冲进内存，
//!   要么以超过传输层承受能力的速度写出；
//! - 驱动把这类数据源排成队列，在传输层可写时逐块排空，并为每个写请求提供恰好一次的完成通知。
//!
//! # 设计概要（How）
//! - `input` 定义数据源能力契约 [`ChunkedInput`]，字节型与消息型共享同一契约；
//! - `sink` 定义驱动消费的传输层能力 [`ChunkSink`]；
//! - `handler` 实现驱动 [`ChunkedWriteHandler`]，`queue` 承载其写请求簿记与按序结算；
//! - `promise` 提供调用方持有的 [`WriteCompletion`]，可直接 `.await`；
//! - `config` 与 `error` 分别提供可反序列化的配置与带稳定错误码的错误类型；
//! - `test_stubs` 提供可编排的数据源与记录型传输层，供单元、集成与属性测试复用。
//!
//! # 使用约束（What）
//! - 每条连接一个驱动实例，所有调用发生在该连接的单线程上下文中；
//! - 分块的帧封装由上层协议负责，驱动只保证顺序、背压与完成语义。

pub mod config;
pub mod error;
pub mod handler;
pub mod input;
pub mod promise;
mod queue;
pub mod sink;
pub mod test_stubs;

pub use config::ChunkedWriteConfig;
pub use error::{ConfigError, SourceError, TransmissionError, WriteError};
pub use handler::{ByteChunkedWriteHandler, ChunkedWriteHandler, MessageChunkedWriteHandler};
pub use input::{
    BoxedChunkedInput, ChunkPayload, ChunkedByteInput, ChunkedInput, ChunkedMessageInput, boxed,
};
pub use promise::{WriteCompletion, WriteProgress, WriteResult};
pub use sink::{ChunkSink, TransmissionId};
