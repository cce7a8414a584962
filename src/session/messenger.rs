//! 发送端 API
//!
//! 通知与命令发出即返回，只有查询的 `wait` 会阻塞调用线程。

use std::sync::Arc;
use std::time::Duration;

use crate::core::error::{BridgeResult, DispatchError};
use crate::protocol::catalog::{control, Category, MessageCatalog, MessageKind};
use crate::protocol::envelope::Envelope;
use crate::protocol::marshal::Marshaller;
use crate::protocol::messages::{Handshake, HandshakeReply, Message, QueryMessage, RecordType};
use crate::protocol::value::Record;
use crate::query::{PendingQuery, QueryCorrelator};
use crate::stats::{null_sink, SharedStats, StatEvent};
use crate::transport::queue::TransportQueue;

/// 发送句柄，可克隆给多个调用方
#[derive(Clone)]
pub struct Messenger {
    catalog: Arc<MessageCatalog>,
    outbound: TransportQueue,
    correlator: Arc<QueryCorrelator>,
    marshaller: Marshaller,
    stats: SharedStats,
}

impl Messenger {
    pub fn new(
        catalog: Arc<MessageCatalog>,
        outbound: TransportQueue,
        correlator: Arc<QueryCorrelator>,
        marshaller: Marshaller,
    ) -> Self {
        Self {
            catalog,
            outbound,
            correlator,
            marshaller,
            stats: null_sink(),
        }
    }

    pub fn with_stats(mut self, stats: SharedStats) -> Self {
        self.stats = stats;
        self
    }

    fn kind(&self, type_id: u32, expected: Category) -> BridgeResult<Arc<MessageKind>> {
        let kind = Arc::clone(self.catalog.lookup(type_id)?);
        if kind.category != expected {
            return Err(DispatchError::CategoryMismatch {
                name: kind.name.clone(),
                expected: expected.to_string(),
                actual: kind.category.to_string(),
            }
            .into());
        }
        Ok(kind)
    }

    fn send_kind(&self, kind: &MessageKind, record: &Record) -> BridgeResult<()> {
        let payload = self.marshaller.encode(record, &kind.schema)?;
        let envelope = Envelope::for_kind(kind, payload);
        let category = envelope.category();
        self.outbound.send(envelope)?;
        self.stats.record(StatEvent::Sent(category));
        self.stats.record(StatEvent::QueueDepth(self.outbound.len()));
        tracing::trace!(target: "bridge.transport", message = %kind.name, "message sent");
        Ok(())
    }

    /// 发送通知
    pub fn post(&self, type_id: u32, record: &Record) -> BridgeResult<()> {
        let kind = self.kind(type_id, Category::Notification)?;
        self.send_kind(&kind, record)
    }

    /// 发送命令
    pub fn submit(&self, type_id: u32, record: &Record) -> BridgeResult<()> {
        let kind = self.kind(type_id, Category::Command)?;
        self.send_kind(&kind, record)
    }

    /// 发出查询，稍后等待结果
    pub fn issue(&self, type_id: u32, record: &Record) -> BridgeResult<PendingQuery> {
        let kind = self.kind(type_id, Category::Query)?;
        self.correlator.issue(&self.outbound, &kind, record)
    }

    /// 发出查询并等待，`timeout` 为空时使用默认超时
    pub fn query(
        &self,
        type_id: u32,
        record: &Record,
        timeout: Option<Duration>,
    ) -> BridgeResult<Record> {
        let pending = self.issue(type_id, record)?;
        let result = match timeout {
            Some(timeout) => pending.wait(timeout),
            None => pending.wait_default(),
        };
        Ok(result?)
    }

    /// 发送强类型通知或命令
    pub fn send<M: Message>(&self, message: &M) -> BridgeResult<()> {
        let kind = Arc::clone(self.catalog.lookup(M::TYPE_ID)?);
        if kind.category == Category::Query {
            return Err(DispatchError::CategoryMismatch {
                name: kind.name.clone(),
                expected: "Notification or Command".to_string(),
                actual: kind.category.to_string(),
            }
            .into());
        }
        self.send_kind(&kind, &message.to_record())
    }

    /// 强类型查询，使用默认超时
    pub fn request<Q: QueryMessage>(&self, query: &Q) -> BridgeResult<Q::Response> {
        let record = self.query(Q::TYPE_ID, &query.to_record(), None)?;
        Ok(Q::Response::from_record(&record)?)
    }

    pub fn request_timeout<Q: QueryMessage>(
        &self,
        query: &Q,
        timeout: Duration,
    ) -> BridgeResult<Q::Response> {
        let record = self.query(Q::TYPE_ID, &query.to_record(), Some(timeout))?;
        Ok(Q::Response::from_record(&record)?)
    }

    /// 请求对端撤销最近的命令
    pub fn undo(&self) -> BridgeResult<()> {
        self.post(control::UNDO, &Record::new())
    }

    pub fn redo(&self) -> BridgeResult<()> {
        self.post(control::REDO, &Record::new())
    }

    /// 结束当前合并段（例如松开鼠标）
    pub fn seal(&self) -> BridgeResult<()> {
        self.post(control::SEAL_COMMANDS, &Record::new())
    }

    /// 比较两端目录指纹，不一致时返回 `SchemaMismatch`
    pub fn handshake(&self) -> BridgeResult<HandshakeReply> {
        let reply = self.request(&Handshake {
            fingerprint: self.catalog.fingerprint(),
        })?;
        if !reply.accepted {
            return Err(DispatchError::SchemaMismatch(format!(
                "peer catalog fingerprint {} differs from {}",
                reply.fingerprint,
                self.catalog.fingerprint()
            ))
            .into());
        }
        Ok(reply)
    }

    pub fn catalog(&self) -> &Arc<MessageCatalog> {
        &self.catalog
    }

    pub fn correlator(&self) -> &Arc<QueryCorrelator> {
        &self.correlator
    }

    pub fn outbound(&self) -> &TransportQueue {
        &self.outbound
    }

    /// 查询是否已因连接关闭而不可用
    pub fn is_closed(&self) -> bool {
        self.outbound.is_closed() || self.correlator.is_closed()
    }
}
