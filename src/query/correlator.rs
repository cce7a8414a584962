//! 查询关联器
//!
//! 为每个发出的查询分配关联 id，登记等待槽，响应到达时填入结果。
//! 发出查询的线程与接收响应的线程通过 `Arc` 共享同一个关联器。

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::core::error::{BridgeResult, DispatchError, QueryError, QueryResult};
use crate::protocol::catalog::{Category, MessageKind};
use crate::protocol::envelope::{decode_response, Envelope, EnvelopeCategory};
use crate::protocol::marshal::Marshaller;
use crate::protocol::value::Record;
use crate::stats::{null_sink, SharedStats, StatEvent};
use crate::transport::queue::TransportQueue;

struct PendingSlot {
    kind: Arc<MessageKind>,
    issued_at: Instant,
    /// 容量为 1，结果只填一次
    tx: Sender<QueryResult<Record>>,
}

struct CorrelatorState {
    next_id: u32,
    pending: HashMap<u32, PendingSlot>,
    closed: bool,
}

/// 查询关联器
pub struct QueryCorrelator {
    state: Mutex<CorrelatorState>,
    marshaller: Marshaller,
    default_timeout: Duration,
    stats: SharedStats,
}

impl QueryCorrelator {
    pub fn new(default_timeout: Duration, marshaller: Marshaller) -> Self {
        Self {
            state: Mutex::new(CorrelatorState {
                next_id: 1,
                pending: HashMap::new(),
                closed: false,
            }),
            marshaller,
            default_timeout,
            stats: null_sink(),
        }
    }

    pub fn with_stats(mut self, stats: SharedStats) -> Self {
        self.stats = stats;
        self
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    fn lock(&self) -> MutexGuard<'_, CorrelatorState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 发出查询
    ///
    /// 先登记等待槽再发送，响应不会早于登记到达。
    pub fn issue(
        self: &Arc<Self>,
        outbound: &TransportQueue,
        kind: &Arc<MessageKind>,
        query: &Record,
    ) -> BridgeResult<PendingQuery> {
        if kind.category != Category::Query {
            return Err(DispatchError::CategoryMismatch {
                name: kind.name.clone(),
                expected: Category::Query.to_string(),
                actual: kind.category.to_string(),
            }
            .into());
        }
        let payload = self.marshaller.encode(query, &kind.schema)?;
        let (tx, rx) = bounded(1);

        let id = {
            let mut state = self.lock();
            if state.closed {
                return Err(QueryError::Failed("query correlator closed".to_string()).into());
            }
            let id = allocate_id(&mut state);
            state.pending.insert(
                id,
                PendingSlot {
                    kind: Arc::clone(kind),
                    issued_at: Instant::now(),
                    tx,
                },
            );
            id
        };

        if let Err(e) = outbound.send(Envelope::query(kind.type_id, id, payload)) {
            self.remove(id);
            return Err(e.into());
        }
        self.stats.record(StatEvent::Sent(EnvelopeCategory::Query));
        tracing::trace!(target: "bridge.query", query = %kind.name, correlation_id = id, "query issued");

        Ok(PendingQuery {
            id,
            name: kind.name.clone(),
            rx,
            correlator: Arc::clone(self),
            settled: false,
        })
    }

    /// 投递响应
    ///
    /// 无匹配或重复的响应记录日志后丢弃。
    pub fn deliver(&self, envelope: Envelope) {
        self.stats
            .record(StatEvent::Received(EnvelopeCategory::Response));
        let id = match (envelope.category(), envelope.correlation_id()) {
            (EnvelopeCategory::Response, Some(id)) => id,
            _ => {
                tracing::warn!(
                    target: "bridge.query",
                    type_id = envelope.type_id(),
                    "non-response envelope handed to correlator, discarded"
                );
                return;
            }
        };

        let slot = self.lock().pending.remove(&id);
        let slot = match slot {
            Some(slot) => slot,
            None => {
                tracing::warn!(
                    target: "bridge.query",
                    correlation_id = id,
                    type_id = envelope.type_id(),
                    "unmatched or duplicate response discarded"
                );
                self.stats.record(StatEvent::Dropped);
                return;
            }
        };

        let result = if slot.kind.type_id != envelope.type_id() {
            Err(QueryError::Failed(format!(
                "response type {} does not match query {}",
                envelope.type_id(),
                slot.kind.name
            )))
        } else {
            match decode_response(&self.marshaller, &slot.kind, envelope.payload()) {
                Ok(Ok(record)) => Ok(record),
                Ok(Err(reason)) => Err(QueryError::Failed(reason)),
                Err(e) => {
                    tracing::warn!(
                        target: "bridge.query",
                        query = %slot.kind.name,
                        error = %e,
                        "response payload could not be decoded"
                    );
                    Err(QueryError::Failed(e.to_string()))
                }
            }
        };

        tracing::trace!(
            target: "bridge.query",
            query = %slot.kind.name,
            correlation_id = id,
            elapsed_us = slot.issued_at.elapsed().as_micros() as u64,
            "response delivered"
        );
        // 等待方可能已经放弃
        let _ = slot.tx.send(result);
    }

    /// 关闭关联器，所有未完成的等待返回 `Failed`
    pub fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        let outstanding = state.pending.len();
        state.pending.clear();
        if outstanding > 0 {
            tracing::debug!(target: "bridge.query", outstanding, "pending queries failed on close");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn pending_count(&self) -> usize {
        self.lock().pending.len()
    }

    fn remove(&self, id: u32) -> bool {
        self.lock().pending.remove(&id).is_some()
    }
}

// 未完成的 id 不会被复用
fn allocate_id(state: &mut CorrelatorState) -> u32 {
    loop {
        let id = state.next_id;
        state.next_id = state.next_id.wrapping_add(1).max(1);
        if !state.pending.contains_key(&id) {
            return id;
        }
    }
}

/// 等待中的查询
///
/// 丢弃即取消，之后到达的响应被丢弃。
pub struct PendingQuery {
    id: u32,
    name: String,
    rx: Receiver<QueryResult<Record>>,
    correlator: Arc<QueryCorrelator>,
    settled: bool,
}

impl std::fmt::Debug for PendingQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingQuery")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish()
    }
}

impl PendingQuery {
    pub fn correlation_id(&self) -> u32 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 阻塞等待结果
    pub fn wait(mut self, timeout: Duration) -> QueryResult<Record> {
        let result = match self.rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                if self.correlator.remove(self.id) {
                    tracing::warn!(
                        target: "bridge.query",
                        query = %self.name,
                        correlation_id = self.id,
                        "query timed out"
                    );
                    self.correlator.stats.record(StatEvent::QueryTimedOut);
                    Err(QueryError::TimedOut(timeout))
                } else {
                    // 超时的同时响应已被取走
                    match self.rx.try_recv() {
                        Ok(result) => result,
                        Err(TryRecvError::Empty) => Err(QueryError::TimedOut(timeout)),
                        Err(TryRecvError::Disconnected) => Err(closed_failure()),
                    }
                }
            }
            Err(RecvTimeoutError::Disconnected) => Err(closed_failure()),
        };
        self.settled = true;
        result
    }

    /// 使用默认超时等待
    pub fn wait_default(self) -> QueryResult<Record> {
        let timeout = self.correlator.default_timeout;
        self.wait(timeout)
    }

    /// 放弃等待
    pub fn cancel(self) {}
}

impl Drop for PendingQuery {
    fn drop(&mut self) {
        if !self.settled && self.correlator.remove(self.id) {
            tracing::debug!(
                target: "bridge.query",
                query = %self.name,
                correlation_id = self.id,
                "query cancelled"
            );
        }
    }
}

fn closed_failure() -> QueryError {
    QueryError::Failed("bridge closed before the response arrived".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::envelope::{encode_response_failed, encode_response_ok};
    use crate::protocol::value::{Schema, TypeTag};
    use std::thread;

    fn kind() -> Arc<MessageKind> {
        Arc::new(MessageKind::query(
            40,
            "CountObjects",
            Schema::new(),
            Schema::new().field("count", TypeTag::Int),
        ))
    }

    fn setup() -> (Arc<QueryCorrelator>, TransportQueue) {
        let correlator = Arc::new(QueryCorrelator::new(
            Duration::from_secs(1),
            Marshaller::default(),
        ));
        (correlator, TransportQueue::new(16))
    }

    fn reply(query: &Envelope, count: i32) -> Envelope {
        let payload = encode_response_ok(
            &Marshaller::default(),
            &kind(),
            &Record::new().with("count", count),
        )
        .unwrap();
        Envelope::response(query.type_id(), query.correlation_id().unwrap(), payload)
    }

    #[test]
    fn test_issue_and_deliver() {
        let (correlator, queue) = setup();
        let pending = correlator.issue(&queue, &kind(), &Record::new()).unwrap();
        let sent = queue.try_receive().unwrap().unwrap();
        assert_eq!(sent.category(), EnvelopeCategory::Query);
        assert_eq!(sent.correlation_id(), Some(pending.correlation_id()));

        correlator.deliver(reply(&sent, 12));
        let result = pending.wait(Duration::from_secs(1)).unwrap();
        assert_eq!(result.int("count").unwrap(), 12);
        assert_eq!(correlator.pending_count(), 0);
    }

    #[test]
    fn test_remote_failure() {
        let (correlator, queue) = setup();
        let pending = correlator.issue(&queue, &kind(), &Record::new()).unwrap();
        let sent = queue.try_receive().unwrap().unwrap();
        let payload = encode_response_failed(&Marshaller::default(), "no map").unwrap();
        correlator.deliver(Envelope::response(40, sent.correlation_id().unwrap(), payload));

        assert_eq!(
            pending.wait(Duration::from_secs(1)),
            Err(QueryError::Failed("no map".to_string()))
        );
    }

    #[test]
    fn test_duplicate_and_unmatched_discarded() {
        let (correlator, queue) = setup();
        let pending = correlator.issue(&queue, &kind(), &Record::new()).unwrap();
        let sent = queue.try_receive().unwrap().unwrap();

        correlator.deliver(Envelope::response(40, 999, vec![0]));
        correlator.deliver(reply(&sent, 1));
        correlator.deliver(reply(&sent, 2));

        assert_eq!(
            pending.wait(Duration::from_secs(1)).unwrap().int("count"),
            Ok(1)
        );
    }

    #[test]
    fn test_timeout_discards_late_response() {
        let (correlator, queue) = setup();
        let pending = correlator.issue(&queue, &kind(), &Record::new()).unwrap();
        let sent = queue.try_receive().unwrap().unwrap();

        let err = pending.wait(Duration::from_millis(20)).unwrap_err();
        assert_eq!(err, QueryError::TimedOut(Duration::from_millis(20)));
        assert_eq!(correlator.pending_count(), 0);
        // 迟到的响应不会崩溃
        correlator.deliver(reply(&sent, 5));
    }

    #[test]
    fn test_cancel_on_drop() {
        let (correlator, queue) = setup();
        let pending = correlator.issue(&queue, &kind(), &Record::new()).unwrap();
        assert_eq!(correlator.pending_count(), 1);
        pending.cancel();
        assert_eq!(correlator.pending_count(), 0);
    }

    #[test]
    fn test_close_fails_waiters() {
        let (correlator, queue) = setup();
        let pending = correlator.issue(&queue, &kind(), &Record::new()).unwrap();
        let waiter = thread::spawn(move || pending.wait(Duration::from_secs(10)));

        thread::sleep(Duration::from_millis(30));
        correlator.close();
        assert!(matches!(
            waiter.join().unwrap(),
            Err(QueryError::Failed(_))
        ));
        assert!(correlator.issue(&queue, &kind(), &Record::new()).is_err());
    }

    #[test]
    fn test_ids_unique_while_outstanding() {
        let (correlator, queue) = setup();
        {
            let mut state = correlator.lock();
            state.next_id = u32::MAX;
        }
        let a = correlator.issue(&queue, &kind(), &Record::new()).unwrap();
        let b = correlator.issue(&queue, &kind(), &Record::new()).unwrap();
        assert_eq!(a.correlation_id(), u32::MAX);
        // 回绕后跳过 0
        assert_eq!(b.correlation_id(), 1);

        {
            let mut state = correlator.lock();
            state.next_id = u32::MAX;
        }
        let c = correlator.issue(&queue, &kind(), &Record::new()).unwrap();
        assert_eq!(c.correlation_id(), 2);
    }

    #[test]
    fn test_issue_on_closed_queue() {
        let (correlator, queue) = setup();
        queue.close();
        assert!(correlator.issue(&queue, &kind(), &Record::new()).is_err());
        assert_eq!(correlator.pending_count(), 0);
    }

    #[test]
    fn test_issue_rejects_non_query() {
        let (correlator, queue) = setup();
        let note = Arc::new(MessageKind::notification(1, "Init", Schema::new()));
        assert!(correlator.issue(&queue, &note, &Record::new()).is_err());
    }
}
