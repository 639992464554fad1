//! 传输层在交付分块时同步回调驱动的场景。
//!
//! # 教案级注释概览
//!
//! - **核心目标 (Why)**：真实的传输层常在 `write_chunk` 内部同步完成写操作并触发回调，回调又可能
//!   提交新写请求、请求恢复排空甚至拆除连接。驱动在调用传输层期间不持有内部借用，这些重入必须安全。
//! - **合同与边界 (What)**：
//!   - 嵌套的 `resume_transfer` 是无操作：不重复读取、不重复兑现；
//!   - 同步确认会在同一轮排空中推进结算；
//!   - 排空中途提交的写请求被同一轮排空接续处理；
//!   - 排空中途拆除会立即终止本轮排空；
//!   - 拆除后才报告的同步交付失败无法归属，由 `resume_transfer` 交还调用方。

use bytes::Bytes;
use spark_stream::{
    ByteChunkedWriteHandler, ChunkSink, TransmissionError, TransmissionId, WriteCompletion,
    WriteError,
    test_stubs::{
        input::{BufferedInput, ScriptedInput},
        sink::RecordingSink,
    },
};

/// 每次交付时执行一段回调的传输层。
struct CallbackSink<'a, F> {
    handler: &'a ByteChunkedWriteHandler,
    inner: RecordingSink<Bytes>,
    on_write: F,
}

impl<'a, F> CallbackSink<'a, F>
where
    F: FnMut(&'a ByteChunkedWriteHandler, TransmissionId, usize),
{
    fn new(handler: &'a ByteChunkedWriteHandler, on_write: F) -> Self {
        Self {
            handler,
            inner: RecordingSink::new(),
            on_write,
        }
    }
}

impl<'a, F> ChunkSink<Bytes> for CallbackSink<'a, F>
where
    F: FnMut(&'a ByteChunkedWriteHandler, TransmissionId, usize),
{
    fn is_writable(&self) -> bool {
        self.inner.is_writable()
    }

    fn write_chunk(&mut self, id: TransmissionId, chunk: Bytes) -> Result<(), TransmissionError> {
        self.inner.write_chunk(id, chunk)?;
        let count = self.inner.transmitted().len();
        (self.on_write)(self.handler, id, count);
        Ok(())
    }

    fn flush(&mut self) {
        self.inner.flush();
    }
}

#[test]
fn nested_resume_is_a_no_op() {
    let handler = ByteChunkedWriteHandler::new();
    let input = ScriptedInput::new()
        .chunk(Bytes::from_static(b"a"))
        .chunk(Bytes::from_static(b"b"));
    let probe = input.probe();
    let mut completion = handler.write(input);
    let mut nested = RecordingSink::<Bytes>::new();
    let mut nested_draining = Vec::new();

    let mut sink = CallbackSink::new(&handler, |handler, _, _| {
        nested_draining.push(handler.is_draining());
        handler.resume_transfer(&mut nested).expect("attributable");
    });
    handler.resume_transfer(&mut sink).expect("attributable");
    let transmitted = sink.inner.chunks();
    sink.inner.acknowledge_all(&handler).expect("known transmissions");
    drop(sink);

    assert_eq!(nested_draining, vec![true, true]);
    assert!(nested.transmitted().is_empty(), "嵌套排空不应交付任何分块");
    assert_eq!(
        transmitted,
        vec![Bytes::from_static(b"a"), Bytes::from_static(b"b")]
    );
    assert_eq!(probe.read_count(), 2);
    assert_eq!(probe.close_count(), 1);
    assert!(!handler.is_draining());
    assert!(matches!(completion.try_result(), Some(Ok(()))));
}

#[test]
fn synchronous_acknowledgement_settles_within_the_pass() {
    let handler = ByteChunkedWriteHandler::new();
    let mut first = handler.write(BufferedInput::new(Bytes::from_static(b"first")));
    let mut second = handler.write(BufferedInput::new(Bytes::from_static(b"second")));

    let mut sink = CallbackSink::new(&handler, |handler, id, _| {
        handler
            .on_transmission_complete(id, Ok(()))
            .expect("transmission is registered before hand-off");
    });
    handler.resume_transfer(&mut sink).expect("attributable");
    drop(sink);

    assert!(matches!(first.try_result(), Some(Ok(()))));
    assert!(matches!(second.try_result(), Some(Ok(()))));
    assert_eq!(handler.unsettled_writes(), 0);
    assert_eq!(handler.in_flight_transmissions(), 0);
}

#[test]
fn write_submitted_mid_drain_is_picked_up_by_the_same_pass() {
    let handler = ByteChunkedWriteHandler::new();
    let _first = handler.write(BufferedInput::new(Bytes::from_static(b"first;")));
    let mut late: Option<WriteCompletion> = None;

    let mut sink = CallbackSink::new(&handler, |handler, _, count| {
        if count == 1 {
            late = Some(handler.write(BufferedInput::new(Bytes::from_static(b"second"))));
        }
    });
    handler.resume_transfer(&mut sink).expect("attributable");
    let output = sink.inner.concatenated();
    let flushes = sink.inner.flush_count();
    sink.inner.acknowledge_all(&handler).expect("known transmissions");
    drop(sink);

    assert_eq!(output, b"first;second");
    assert_eq!(flushes, 1);
    let mut late = late.expect("callback submitted a write");
    assert!(matches!(late.try_result(), Some(Ok(()))));
}

#[test]
fn teardown_mid_drain_stops_the_pass() {
    let handler = ByteChunkedWriteHandler::new();
    let first = ScriptedInput::new()
        .chunk(Bytes::from_static(b"1"))
        .chunk(Bytes::from_static(b"2"));
    let first_probe = first.probe();
    let second = BufferedInput::new(Bytes::from_static(b"never"));
    let second_probe = second.probe();
    let mut first_completion = handler.write(first);
    let mut second_completion = handler.write(second);

    let mut sink = CallbackSink::new(&handler, |handler, _, _| handler.close());
    handler.resume_transfer(&mut sink).expect("attributable");
    let transmitted = sink.inner.transmitted().len();
    drop(sink);

    assert_eq!(transmitted, 1);
    assert_eq!(first_probe.read_count(), 1);
    assert_eq!(first_probe.close_count(), 1);
    assert_eq!(second_probe.close_count(), 1);
    assert!(matches!(
        first_completion.try_result(),
        Some(Err(WriteError::Cancelled))
    ));
    assert!(matches!(
        second_completion.try_result(),
        Some(Err(WriteError::Cancelled))
    ));
    assert!(!handler.is_draining(), "排空标记在提前退出时同样被复位");
}

/// 在交付时先拆除驱动、再报告交付失败的传输层。
struct TearingDownSink<'a> {
    handler: &'a ByteChunkedWriteHandler,
    attempts: usize,
}

impl ChunkSink<Bytes> for TearingDownSink<'_> {
    fn is_writable(&self) -> bool {
        true
    }

    fn write_chunk(
        &mut self,
        _id: TransmissionId,
        _chunk: Bytes,
    ) -> Result<(), TransmissionError> {
        self.attempts += 1;
        self.handler.close();
        Err(TransmissionError::new("socket closed during write"))
    }
}

#[test]
fn unattributable_hand_off_failure_is_returned_to_the_caller() {
    let handler = ByteChunkedWriteHandler::new();
    let mut completion = handler.write(BufferedInput::new(Bytes::from_static(b"lost")));
    let mut sink = TearingDownSink {
        handler: &handler,
        attempts: 0,
    };

    let error = handler
        .resume_transfer(&mut sink)
        .expect_err("driver was torn down before the failure arrived");

    assert_eq!(error.message(), "socket closed during write");
    assert_eq!(sink.attempts, 1);
    assert!(handler.is_closed());
    assert!(matches!(completion.try_result(), Some(Err(WriteError::Cancelled))));
}
