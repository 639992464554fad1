//! 分块写出驱动的顺序性质验证。
//!
//! # 教案级注释概览
//!
//! - **核心目标 (Why)**：对任意数量、任意分块形态的数据源，在任意的可写性切换与任意顺序的传输确认下，
//!   传输层观察到的分块序列都必须等于各数据源自身分块序列按提交顺序的拼接：不交错、不重排、不丢失、不重复；
//!   完成句柄严格按提交顺序兑现，数据源恰好关闭一次。
//! - **设计手法 (How)**：Proptest 生成数据源剧本（分块可为空，可插入“暂无数据”）与调度剧本
//!   （每一步的可写性、可接收分块数、确认数量与确认顺序），逐步驱动后再以“全部可写 + 全部确认”收尾。
//!
//! # 合同与边界 (What)
//!
//! - **输入**：`scripts` 为每个数据源的剧本，`None` 表示一次“暂无数据”；`schedule` 为调度剧本；
//! - **断言**：
//!   - 非空分块的交付序列等于剧本中非空分块的拼接；
//!   - 任意时刻，已兑现的完成句柄构成提交顺序上的前缀；
//!   - 收尾后全部兑现为成功，每个数据源关闭一次。

use bytes::Bytes;
use proptest::prelude::*;
use spark_stream::{
    ByteChunkedWriteHandler, TransmissionId, WriteCompletion, WriteResult,
    test_stubs::{
        input::{InputProbe, ScriptedInput},
        sink::RecordingSink,
    },
};

type SourceScript = Vec<Option<Vec<u8>>>;

#[derive(Clone, Debug)]
struct Step {
    writable: bool,
    budget: usize,
    ack_count: usize,
    ack_newest_first: bool,
}

fn source_scripts() -> impl Strategy<Value = Vec<SourceScript>> {
    let chunk = prop::collection::vec(any::<u8>(), 0..12);
    let entry = prop::option::weighted(0.85, chunk);
    prop::collection::vec(prop::collection::vec(entry, 0..6), 0..5)
}

fn steps() -> impl Strategy<Value = Vec<Step>> {
    let step = (any::<bool>(), 0..4_usize, 0..4_usize, any::<bool>()).prop_map(
        |(writable, budget, ack_count, ack_newest_first)| Step {
            writable,
            budget,
            ack_count,
            ack_newest_first,
        },
    );
    prop::collection::vec(step, 0..24)
}

fn build_input(script: &SourceScript) -> ScriptedInput<Bytes> {
    script
        .iter()
        .fold(ScriptedInput::new(), |input, entry| match entry {
            Some(bytes) => input.chunk(Bytes::from(bytes.clone())),
            None => input.stall(),
        })
}

/// 记录每个完成句柄第一次被观察到的结局，并校验兑现顺序是提交顺序上的前缀。
struct CompletionLedger {
    completions: Vec<WriteCompletion>,
    outcomes: Vec<Option<WriteResult>>,
}

impl CompletionLedger {
    fn observe(&mut self) -> Result<(), TestCaseError> {
        for (completion, outcome) in self.completions.iter_mut().zip(self.outcomes.iter_mut()) {
            if outcome.is_none() {
                *outcome = completion.try_result();
            }
        }
        let settled = self.outcomes.iter().take_while(|outcome| outcome.is_some()).count();
        prop_assert!(
            self.outcomes[settled..].iter().all(Option::is_none),
            "completion resolved ahead of an earlier write: {:?}",
            self.outcomes.iter().map(Option::is_some).collect::<Vec<_>>()
        );
        Ok(())
    }
}

fn acknowledge(
    handler: &ByteChunkedWriteHandler,
    outstanding: &mut Vec<TransmissionId>,
    count: usize,
    newest_first: bool,
) -> Result<(), TestCaseError> {
    let count = count.min(outstanding.len());
    let acked: Vec<TransmissionId> = if newest_first {
        outstanding.split_off(outstanding.len() - count)
    } else {
        outstanding.drain(..count).collect()
    };
    for id in acked.into_iter().rev() {
        prop_assert!(handler.on_transmission_complete(id, Ok(())).is_ok());
    }
    Ok(())
}

proptest! {
    #[test]
    fn prop_transmission_order_matches_submission_order(
        scripts in source_scripts(),
        schedule in steps()
    ) {
        let handler = ByteChunkedWriteHandler::new();
        let mut sink = RecordingSink::new();
        let mut probes: Vec<InputProbe> = Vec::new();
        let mut ledger = CompletionLedger { completions: Vec::new(), outcomes: Vec::new() };
        for script in &scripts {
            let input = build_input(script);
            probes.push(input.probe());
            ledger.completions.push(handler.write(input));
            ledger.outcomes.push(None);
        }
        let mut outstanding = Vec::new();

        for step in &schedule {
            sink.set_writable(step.writable);
            sink.set_budget(Some(step.budget));
            prop_assert!(handler.on_writability_changed(&mut sink, step.writable).is_ok());
            outstanding.extend(sink.take_unacked());
            acknowledge(&handler, &mut outstanding, step.ack_count, step.ack_newest_first)?;
            ledger.observe()?;
        }

        sink.set_writable(true);
        sink.set_budget(None);
        let stalls: usize = scripts.iter().flatten().filter(|entry| entry.is_none()).count();
        for _ in 0..=stalls {
            prop_assert!(handler.resume_transfer(&mut sink).is_ok());
            outstanding.extend(sink.take_unacked());
            ledger.observe()?;
        }
        prop_assert_eq!(handler.pending_writes(), 0);
        let remaining = outstanding.len();
        acknowledge(&handler, &mut outstanding, remaining, false)?;
        ledger.observe()?;

        let expected: Vec<Bytes> = scripts
            .iter()
            .flatten()
            .flatten()
            .filter(|bytes| !bytes.is_empty())
            .map(|bytes| Bytes::from(bytes.clone()))
            .collect();
        prop_assert_eq!(sink.chunks(), expected);
        for outcome in &ledger.outcomes {
            prop_assert!(matches!(outcome, Some(Ok(()))));
        }
        for probe in &probes {
            prop_assert_eq!(probe.close_count(), 1);
        }
        prop_assert_eq!(handler.in_flight_transmissions(), 0);
    }
}
