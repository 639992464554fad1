//! 分块写出路径的测试桩集合：可编排的数据源与记录型传输层。
//!
//! # 设计定位（Why）
//! - 单元测试、集成测试与属性测试都需要“按剧本产出分块的数据源”和“记录每次交付的传输层”；
//!   集中提供可以避免各测试文件重复定义，并在契约变化时获得集中的编译错误提示。
//!
//! # 使用方式（How）
//! - `use spark_stream::test_stubs::input::*;` 引入 [`ScriptedInput`](input::ScriptedInput)、
//!   [`BufferedInput`](input::BufferedInput) 与 [`InputProbe`](input::InputProbe)；
//! - `use spark_stream::test_stubs::sink::RecordingSink;` 引入记录型传输层。
//!
//! # 风险与权衡（Trade-offs）
//! - 桩对象只面向测试：探针计数使用原子变量，便于在数据源移交给驱动后仍能从外部观察。

pub mod input {
    //! 可编排的数据源。

    use std::{
        collections::VecDeque,
        sync::{
            Arc,
            atomic::{AtomicUsize, Ordering},
        },
    };

    use bytes::Bytes;

    use crate::{
        error::SourceError,
        input::{ChunkPayload, ChunkedInput},
    };

    /// 数据源被移交后仍可观察的计数器。
    #[derive(Clone, Debug, Default)]
    pub struct InputProbe {
        closes: Arc<AtomicUsize>,
        reads: Arc<AtomicUsize>,
        end_checks: Arc<AtomicUsize>,
    }

    impl InputProbe {
        /// `close` 被调用的次数。
        pub fn close_count(&self) -> usize {
            self.closes.load(Ordering::SeqCst)
        }

        /// `read_chunk` 被调用的次数。
        pub fn read_count(&self) -> usize {
            self.reads.load(Ordering::SeqCst)
        }

        /// `is_end_of_input` 被调用的次数。
        pub fn end_check_count(&self) -> usize {
            self.end_checks.load(Ordering::SeqCst)
        }

        fn record(counter: &AtomicUsize) {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Debug)]
    enum Scripted<C> {
        Chunk(C),
        Stall,
        Fail(&'static str),
    }

    /// 按剧本逐步产出的数据源。
    ///
    /// # 契约说明（What）
    /// - 剧本为空即视为到达结尾；
    /// - `stall` 让下一次 `read_chunk` 返回“暂无数据”；`fail_read` 让下一次读取返回 [`SourceError`]；
    /// - `fail_end_of_input` 让首次结尾判定失败；`failing_close` 让 `close` 返回错误（仍计入探针）；
    /// - `length` 为剧本中全部分块长度之和，`progress` 为已产出长度。
    #[derive(Debug)]
    pub struct ScriptedInput<C> {
        script: VecDeque<Scripted<C>>,
        probe: InputProbe,
        end_check_failure: Option<&'static str>,
        close_failure: Option<&'static str>,
        total: u64,
        produced: u64,
    }

    impl<C: ChunkPayload> ScriptedInput<C> {
        pub fn new() -> Self {
            Self {
                script: VecDeque::new(),
                probe: InputProbe::default(),
                end_check_failure: None,
                close_failure: None,
                total: 0,
                produced: 0,
            }
        }

        /// 由分块序列直接构造。
        pub fn from_chunks(chunks: impl IntoIterator<Item = C>) -> Self {
            chunks.into_iter().fold(Self::new(), Self::chunk)
        }

        pub fn chunk(mut self, chunk: C) -> Self {
            self.total += chunk.chunk_len() as u64;
            self.script.push_back(Scripted::Chunk(chunk));
            self
        }

        pub fn stall(mut self) -> Self {
            self.script.push_back(Scripted::Stall);
            self
        }

        pub fn fail_read(mut self, message: &'static str) -> Self {
            self.script.push_back(Scripted::Fail(message));
            self
        }

        pub fn fail_end_of_input(mut self, message: &'static str) -> Self {
            self.end_check_failure = Some(message);
            self
        }

        pub fn failing_close(mut self, message: &'static str) -> Self {
            self.close_failure = Some(message);
            self
        }

        /// 获取共享探针；应在移交给驱动之前调用。
        pub fn probe(&self) -> InputProbe {
            self.probe.clone()
        }
    }

    impl<C: ChunkPayload> Default for ScriptedInput<C> {
        fn default() -> Self {
            Self::new()
        }
    }

    impl<C: ChunkPayload> ChunkedInput for ScriptedInput<C> {
        type Chunk = C;

        fn is_end_of_input(&mut self) -> Result<bool, SourceError> {
            InputProbe::record(&self.probe.end_checks);
            if let Some(message) = self.end_check_failure.take() {
                return Err(SourceError::new(message));
            }
            Ok(self.script.is_empty())
        }

        fn read_chunk(&mut self, _size_hint: usize) -> Result<Option<C>, SourceError> {
            InputProbe::record(&self.probe.reads);
            match self.script.pop_front() {
                Some(Scripted::Chunk(chunk)) => {
                    self.produced += chunk.chunk_len() as u64;
                    Ok(Some(chunk))
                }
                Some(Scripted::Stall) | None => Ok(None),
                Some(Scripted::Fail(message)) => Err(SourceError::new(message)),
            }
        }

        fn close(&mut self) -> Result<(), SourceError> {
            InputProbe::record(&self.probe.closes);
            self.script.clear();
            match self.close_failure {
                Some(message) => Err(SourceError::new(message)),
                None => Ok(()),
            }
        }

        fn length(&self) -> Option<u64> {
            Some(self.total)
        }

        fn progress(&self) -> u64 {
            self.produced
        }
    }

    /// 把一段内存缓冲按大小提示切分为字节分块的数据源。
    #[derive(Debug)]
    pub struct BufferedInput {
        remaining: Bytes,
        total: u64,
        probe: InputProbe,
    }

    impl BufferedInput {
        pub fn new(payload: impl Into<Bytes>) -> Self {
            let remaining = payload.into();
            Self {
                total: remaining.len() as u64,
                remaining,
                probe: InputProbe::default(),
            }
        }

        pub fn probe(&self) -> InputProbe {
            self.probe.clone()
        }
    }

    impl ChunkedInput for BufferedInput {
        type Chunk = Bytes;

        fn is_end_of_input(&mut self) -> Result<bool, SourceError> {
            InputProbe::record(&self.probe.end_checks);
            Ok(self.remaining.is_empty())
        }

        fn read_chunk(&mut self, size_hint: usize) -> Result<Option<Bytes>, SourceError> {
            InputProbe::record(&self.probe.reads);
            if self.remaining.is_empty() {
                return Ok(None);
            }
            let take = size_hint.min(self.remaining.len());
            Ok(Some(self.remaining.split_to(take)))
        }

        fn close(&mut self) -> Result<(), SourceError> {
            InputProbe::record(&self.probe.closes);
            self.remaining.clear();
            Ok(())
        }

        fn length(&self) -> Option<u64> {
            Some(self.total)
        }

        fn progress(&self) -> u64 {
            self.total - self.remaining.len() as u64
        }
    }
}

pub mod sink {
    //! 记录每次交付的传输层。

    use std::collections::VecDeque;

    use bytes::Bytes;

    use crate::{
        error::TransmissionError,
        handler::ChunkedWriteHandler,
        input::ChunkPayload,
        sink::{ChunkSink, TransmissionId},
    };

    /// 记录型传输层。
    ///
    /// # 契约说明（What）
    /// - 可写性由 `set_writable` 与可选的“剩余可接收分块数”共同决定，预算耗尽即报告不可写；
    /// - `fail_next_handoff` 让下一次 `write_chunk` 同步失败；
    /// - 交付成功的分块进入“待确认”列表，测试通过 [`acknowledge_all`](Self::acknowledge_all)
    ///   或 [`take_unacked`](Self::take_unacked) 自行决定确认时机与顺序。
    #[derive(Debug)]
    pub struct RecordingSink<C> {
        writable: bool,
        budget: Option<usize>,
        transmitted: Vec<(TransmissionId, C)>,
        unacked: VecDeque<TransmissionId>,
        handoff_failure: Option<TransmissionError>,
        flushes: usize,
    }

    impl<C: Clone> RecordingSink<C> {
        pub fn new() -> Self {
            Self {
                writable: true,
                budget: None,
                transmitted: Vec::new(),
                unacked: VecDeque::new(),
                handoff_failure: None,
                flushes: 0,
            }
        }

        pub fn set_writable(&mut self, writable: bool) {
            self.writable = writable;
        }

        /// 限定在报告不可写之前还能接收多少个分块；`None` 表示不限。
        pub fn set_budget(&mut self, budget: Option<usize>) {
            self.budget = budget;
        }

        pub fn fail_next_handoff(&mut self, error: TransmissionError) {
            self.handoff_failure = Some(error);
        }

        pub fn transmitted(&self) -> &[(TransmissionId, C)] {
            &self.transmitted
        }

        /// 按交付顺序返回全部分块。
        pub fn chunks(&self) -> Vec<C> {
            self.transmitted
                .iter()
                .map(|(_, chunk)| chunk.clone())
                .collect()
        }

        pub fn flush_count(&self) -> usize {
            self.flushes
        }

        /// 取走全部待确认的传输标识。
        pub fn take_unacked(&mut self) -> Vec<TransmissionId> {
            self.unacked.drain(..).collect()
        }

        /// 以成功结果确认全部待确认的传输。
        pub fn acknowledge_all(
            &mut self,
            handler: &ChunkedWriteHandler<C>,
        ) -> Result<(), TransmissionError>
        where
            C: ChunkPayload,
        {
            self.take_unacked()
                .into_iter()
                .try_for_each(|id| handler.on_transmission_complete(id, Ok(())))
        }
    }

    impl RecordingSink<Bytes> {
        /// 所有已交付字节按顺序拼接的结果。
        pub fn concatenated(&self) -> Vec<u8> {
            self.transmitted
                .iter()
                .flat_map(|(_, chunk)| chunk.iter().copied())
                .collect()
        }
    }

    impl<C: Clone> Default for RecordingSink<C> {
        fn default() -> Self {
            Self::new()
        }
    }

    impl<C> ChunkSink<C> for RecordingSink<C> {
        fn is_writable(&self) -> bool {
            self.writable && self.budget != Some(0)
        }

        fn write_chunk(&mut self, id: TransmissionId, chunk: C) -> Result<(), TransmissionError> {
            if let Some(error) = self.handoff_failure.take() {
                return Err(error);
            }
            if let Some(budget) = self.budget.as_mut() {
                *budget = budget.saturating_sub(1);
            }
            self.transmitted.push((id, chunk));
            self.unacked.push_back(id);
            Ok(())
        }

        fn flush(&mut self) {
            self.flushes += 1;
        }
    }
}
