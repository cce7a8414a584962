//! 消息分发器
//!
//! 接收端的唯一分发点：按 type id 查目录、解码负载、调用处理器；查询结果
//! 经反向队列原路返回。单个信封的失败只记录日志并丢弃，不会影响分发器本身。
//!
//! 分发器拥有本侧的状态 `S` 与命令队列，所有修改都发生在分发线程上。

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use crate::command::{ApplyOutcome, CommandHandler, CommandQueue};
use crate::config::BridgeConfig;
use crate::core::error::{
    CommandError, CommandResult, DispatchError, DispatchResult, HandlerError, TransportError,
};
use crate::protocol::catalog::{control, Category, MessageCatalog, MessageKind};
use crate::protocol::envelope::{
    encode_response_failed, encode_response_ok, Envelope, EnvelopeCategory,
};
use crate::protocol::marshal::Marshaller;
use crate::protocol::messages::{HandshakeReply, Message, QueryMessage, RecordType};
use crate::protocol::value::Record;
use crate::query::QueryCorrelator;
use crate::stats::{null_sink, SharedStats, StatEvent};
use crate::transport::queue::TransportQueue;

type NotificationFn<S> = Box<dyn FnMut(&mut S, &Record) -> Result<(), HandlerError> + Send>;
type QueryFn<S> = Box<dyn FnMut(&mut S, &Record) -> Result<Record, HandlerError> + Send>;

/// 消息分发器
pub struct Dispatcher<S> {
    catalog: Arc<MessageCatalog>,
    marshaller: Marshaller,
    state: S,
    notifications: HashMap<u32, NotificationFn<S>>,
    queries: HashMap<u32, QueryFn<S>>,
    commands: CommandQueue<S>,
    /// 处理成功后清空命令历史的通知
    history_resets: HashSet<u32>,
    /// 查询响应与命令拒绝通知的去向
    replies: Option<TransportQueue>,
    correlator: Option<Arc<QueryCorrelator>>,
    /// 处理器尚未注册时暂存的查询
    backlog: VecDeque<Envelope>,
    backlog_limit: usize,
    stats: SharedStats,
    /// 名为 `MessageTrace` 的通知的 type id
    trace_kind: Option<u32>,
    trace_messages: bool,
}

impl<S: Clone> Dispatcher<S> {
    pub fn new(catalog: Arc<MessageCatalog>, state: S, config: &BridgeConfig) -> Self {
        let trace_kind = catalog
            .lookup_name("MessageTrace")
            .ok()
            .filter(|kind| kind.category == Category::Notification)
            .map(|kind| kind.type_id);
        Self {
            catalog,
            marshaller: Marshaller::new(config.transport.max_payload_bytes),
            state,
            notifications: HashMap::new(),
            queries: HashMap::new(),
            commands: CommandQueue::new(config.commands.history_depth),
            history_resets: HashSet::new(),
            replies: None,
            correlator: None,
            backlog: VecDeque::new(),
            backlog_limit: config.dispatch.backlog_limit,
            stats: null_sink(),
            trace_kind,
            trace_messages: false,
        }
    }

    /// 设置反向队列
    pub fn with_replies(mut self, replies: TransportQueue) -> Self {
        self.replies = Some(replies);
        self
    }

    /// 挂接本侧的查询关联器，收到的 Response 交给它
    pub fn with_correlator(mut self, correlator: Arc<QueryCorrelator>) -> Self {
        self.correlator = Some(correlator);
        self
    }

    pub fn with_stats(mut self, stats: SharedStats) -> Self {
        self.stats = stats;
        self
    }

    fn kind_for(&self, type_id: u32, expected: Category) -> DispatchResult<Arc<MessageKind>> {
        let kind = Arc::clone(self.catalog.lookup(type_id)?);
        if kind.category != expected {
            return Err(DispatchError::CategoryMismatch {
                name: kind.name.clone(),
                expected: expected.to_string(),
                actual: kind.category.to_string(),
            });
        }
        Ok(kind)
    }

    fn ensure_not_builtin(type_id: u32) -> DispatchResult<()> {
        match type_id {
            control::HANDSHAKE | control::UNDO | control::REDO | control::SEAL_COMMANDS => {
                Err(DispatchError::DuplicateHandler(type_id))
            }
            _ => Ok(()),
        }
    }

    /// 注册通知处理器
    pub fn on_notification<F>(&mut self, type_id: u32, handler: F) -> DispatchResult<()>
    where
        F: FnMut(&mut S, &Record) -> Result<(), HandlerError> + Send + 'static,
    {
        self.kind_for(type_id, Category::Notification)?;
        Self::ensure_not_builtin(type_id)?;
        if self.notifications.contains_key(&type_id) {
            return Err(DispatchError::DuplicateHandler(type_id));
        }
        self.notifications.insert(type_id, Box::new(handler));
        Ok(())
    }

    /// 该通知处理成功后清空撤销与重做历史
    ///
    /// 用于整体替换状态的通知（生成或加载地图），旧条目的前像不再对应新状态。
    pub fn reset_history_on(&mut self, type_id: u32) -> DispatchResult<()> {
        self.kind_for(type_id, Category::Notification)?;
        Self::ensure_not_builtin(type_id)?;
        self.history_resets.insert(type_id);
        Ok(())
    }

    /// 注册查询处理器，并按到达顺序应答积压的同类查询
    pub fn on_query<F>(&mut self, type_id: u32, handler: F) -> DispatchResult<()>
    where
        F: FnMut(&mut S, &Record) -> Result<Record, HandlerError> + Send + 'static,
    {
        self.kind_for(type_id, Category::Query)?;
        Self::ensure_not_builtin(type_id)?;
        if self.queries.contains_key(&type_id) {
            return Err(DispatchError::DuplicateHandler(type_id));
        }
        self.queries.insert(type_id, Box::new(handler));
        self.drain_backlog(type_id);
        Ok(())
    }

    /// 注册命令处理器
    pub fn on_command(
        &mut self,
        type_id: u32,
        handler: Box<dyn CommandHandler<S>>,
    ) -> DispatchResult<()> {
        let kind = self.kind_for(type_id, Category::Command)?;
        self.commands.register(kind, handler).map_err(|e| match e {
            CommandError::DuplicateHandler(id) => DispatchError::DuplicateHandler(id),
            other => DispatchError::Command(other),
        })
    }

    pub fn on_notification_named<F>(&mut self, name: &str, handler: F) -> DispatchResult<()>
    where
        F: FnMut(&mut S, &Record) -> Result<(), HandlerError> + Send + 'static,
    {
        let id = self.catalog.id_of(name)?;
        self.on_notification(id, handler)
    }

    pub fn on_query_named<F>(&mut self, name: &str, handler: F) -> DispatchResult<()>
    where
        F: FnMut(&mut S, &Record) -> Result<Record, HandlerError> + Send + 'static,
    {
        let id = self.catalog.id_of(name)?;
        self.on_query(id, handler)
    }

    pub fn on_command_named(
        &mut self,
        name: &str,
        handler: Box<dyn CommandHandler<S>>,
    ) -> DispatchResult<()> {
        let id = self.catalog.id_of(name)?;
        self.on_command(id, handler)
    }

    /// 注册强类型通知处理器
    pub fn on_message<M, F>(&mut self, mut handler: F) -> DispatchResult<()>
    where
        M: Message + 'static,
        F: FnMut(&mut S, M) -> Result<(), HandlerError> + Send + 'static,
    {
        self.on_notification(M::TYPE_ID, move |state, record| {
            handler(state, M::from_record(record)?)
        })
    }

    /// 注册强类型查询处理器
    pub fn on_request<Q, F>(&mut self, mut handler: F) -> DispatchResult<()>
    where
        Q: QueryMessage + 'static,
        F: FnMut(&mut S, Q) -> Result<Q::Response, HandlerError> + Send + 'static,
    {
        self.on_query(Q::TYPE_ID, move |state, record| {
            Ok(handler(state, Q::from_record(record)?)?.to_record())
        })
    }

    /// 分发一个信封
    pub fn dispatch(&mut self, envelope: Envelope) -> DispatchResult<()> {
        self.stats.record(StatEvent::Received(envelope.category()));
        if self.trace_messages {
            tracing::info!(
                target: "bridge.dispatch",
                type_id = envelope.type_id(),
                category = ?envelope.category(),
                bytes = envelope.payload().len(),
                "message received"
            );
        } else {
            tracing::trace!(
                target: "bridge.dispatch",
                type_id = envelope.type_id(),
                category = ?envelope.category(),
                "message received"
            );
        }

        if envelope.category() == EnvelopeCategory::Response {
            return match &self.correlator {
                Some(correlator) => {
                    correlator.deliver(envelope);
                    Ok(())
                }
                None => {
                    self.stats.record(StatEvent::Dropped);
                    Err(DispatchError::NoHandler(envelope.type_id()))
                }
            };
        }

        let kind = match self.catalog.lookup(envelope.type_id()) {
            Ok(kind) => Arc::clone(kind),
            Err(e) => {
                self.stats.record(StatEvent::Dropped);
                return Err(e.into());
            }
        };
        if !envelope.category().carries(kind.category) {
            self.stats.record(StatEvent::Dropped);
            return Err(DispatchError::CategoryMismatch {
                name: kind.name.clone(),
                expected: kind.category.to_string(),
                actual: format!("{:?}", envelope.category()),
            });
        }

        match kind.category {
            Category::Notification => self.handle_notification(&kind, envelope),
            Category::Command => self.handle_command(&kind, envelope),
            Category::Query => self.handle_query(&kind, envelope),
        }
    }

    fn decode(&self, kind: &MessageKind, envelope: &Envelope) -> DispatchResult<Record> {
        self.marshaller
            .decode(envelope.payload(), &kind.schema)
            .map_err(|e| {
                self.stats.record(StatEvent::Dropped);
                DispatchError::from(e)
            })
    }

    fn handle_notification(&mut self, kind: &MessageKind, envelope: Envelope) -> DispatchResult<()> {
        let record = self.decode(kind, &envelope)?;
        match kind.type_id {
            control::UNDO => return self.undo().map(|_| ()).map_err(Into::into),
            control::REDO => return self.redo().map(|_| ()).map_err(Into::into),
            control::SEAL_COMMANDS => {
                self.seal();
                return Ok(());
            }
            _ => {}
        }

        let is_trace = self.trace_kind == Some(kind.type_id);
        if is_trace {
            if let Ok(enable) = record.boolean("enable") {
                self.trace_messages = enable;
                tracing::info!(target: "bridge.dispatch", enable, "message trace toggled");
            }
        }

        match self.notifications.get_mut(&kind.type_id) {
            Some(handler) => {
                handler(&mut self.state, &record)?;
                if self.history_resets.contains(&kind.type_id) {
                    self.commands.clear();
                    tracing::debug!(
                        target: "bridge.dispatch",
                        notification = %kind.name,
                        "command history cleared"
                    );
                }
                Ok(())
            }
            None if kind.type_id == control::COMMAND_REJECTED => {
                tracing::warn!(
                    target: "bridge.dispatch",
                    command = record.string("command").unwrap_or("?"),
                    reason = record.string("reason").unwrap_or("?"),
                    "edit could not be applied"
                );
                Ok(())
            }
            None if is_trace => Ok(()),
            None => {
                self.stats.record(StatEvent::Dropped);
                Err(DispatchError::NoHandler(kind.type_id))
            }
        }
    }

    fn handle_command(&mut self, kind: &MessageKind, envelope: Envelope) -> DispatchResult<()> {
        if !self.commands.has_handler(kind.type_id) {
            self.stats.record(StatEvent::Dropped);
            self.reject(&kind.name, "no handler registered")?;
            return Err(DispatchError::NoHandler(kind.type_id));
        }
        let record = match self.decode(kind, &envelope) {
            Ok(record) => record,
            Err(e) => {
                self.reject(&kind.name, &e.to_string())?;
                return Err(e);
            }
        };
        match self.apply(kind.type_id, record) {
            Ok(_) => Ok(()),
            Err(e) => {
                let reason = match &e {
                    CommandError::ApplyFailed { reason, .. } => reason.clone(),
                    other => other.to_string(),
                };
                self.reject(&kind.name, &reason)?;
                Err(e.into())
            }
        }
    }

    fn handle_query(&mut self, kind: &Arc<MessageKind>, envelope: Envelope) -> DispatchResult<()> {
        let correlation_id = match envelope.correlation_id() {
            Some(id) => id,
            None => {
                return Err(DispatchError::from(TransportError::Malformed(
                    "query without correlation id".to_string(),
                )))
            }
        };

        if kind.type_id != control::HANDSHAKE && !self.queries.contains_key(&kind.type_id) {
            if self.backlog.len() >= self.backlog_limit {
                self.stats.record(StatEvent::Dropped);
                self.reply_failed(kind, correlation_id, "query backlog full")?;
                return Err(DispatchError::BacklogFull(kind.type_id));
            }
            tracing::debug!(
                target: "bridge.dispatch",
                query = %kind.name,
                correlation_id,
                "no handler yet, query parked"
            );
            self.backlog.push_back(envelope);
            return Ok(());
        }

        let record = match self.decode(kind, &envelope) {
            Ok(record) => record,
            Err(e) => {
                self.reply_failed(kind, correlation_id, &e.to_string())?;
                return Err(e);
            }
        };

        let outcome = if kind.type_id == control::HANDSHAKE {
            Ok(self.handshake(&record))
        } else {
            match self.queries.get_mut(&kind.type_id) {
                Some(handler) => handler(&mut self.state, &record),
                None => Err(HandlerError::new("no handler registered")),
            }
        };

        match outcome {
            Ok(result) => match encode_response_ok(&self.marshaller, kind, &result) {
                Ok(payload) => self.send_reply(Envelope::response(kind.type_id, correlation_id, payload)),
                Err(e) => {
                    self.reply_failed(kind, correlation_id, &e.to_string())?;
                    Err(e.into())
                }
            },
            Err(e) => {
                self.reply_failed(kind, correlation_id, &e.0)?;
                Err(DispatchError::Handler(e))
            }
        }
    }

    fn handshake(&self, record: &Record) -> Record {
        let ours = self.catalog.fingerprint();
        let accepted = record.string("fingerprint").map_or(false, |theirs| theirs == ours);
        if !accepted {
            tracing::warn!(target: "bridge.dispatch", "peer catalog fingerprint does not match");
        }
        HandshakeReply {
            accepted,
            fingerprint: ours,
        }
        .to_record()
    }

    fn drain_backlog(&mut self, type_id: u32) {
        if self.backlog.is_empty() {
            return;
        }
        let (ready, parked): (VecDeque<Envelope>, VecDeque<Envelope>) = std::mem::take(&mut self.backlog)
            .into_iter()
            .partition(|env| env.type_id() == type_id);
        self.backlog = parked;
        for envelope in ready {
            if let Err(e) = self.dispatch(envelope) {
                log_failure(&e);
            }
        }
    }

    fn send_reply(&self, envelope: Envelope) -> DispatchResult<()> {
        match &self.replies {
            Some(queue) => {
                let category = envelope.category();
                queue.send(envelope)?;
                self.stats.record(StatEvent::Sent(category));
                self.stats.record(StatEvent::QueueDepth(queue.len()));
                Ok(())
            }
            None => {
                tracing::warn!(target: "bridge.dispatch", "no reply queue attached, reply dropped");
                Ok(())
            }
        }
    }

    fn reply_failed(&self, kind: &MessageKind, correlation_id: u32, reason: &str) -> DispatchResult<()> {
        let payload = encode_response_failed(&self.marshaller, reason)?;
        self.send_reply(Envelope::response(kind.type_id, correlation_id, payload))
    }

    // 通知对端命令被拒绝
    fn reject(&self, command: &str, reason: &str) -> DispatchResult<()> {
        self.stats.record(StatEvent::CommandRejected);
        let kind = self.catalog.lookup(control::COMMAND_REJECTED)?;
        let record = Record::new().with("command", command).with("reason", reason);
        let payload = self.marshaller.encode(&record, &kind.schema)?;
        self.send_reply(Envelope::notification(kind.type_id, payload))
    }

    /// 阻塞运行，直到入站队列关闭
    ///
    /// 返回处理的信封数量。退出时让挂接的关联器失败所有未完成的查询。
    pub fn run(&mut self, inbound: &TransportQueue) -> DispatchResult<usize> {
        let mut handled = 0;
        let result = loop {
            match inbound.receive() {
                Ok(envelope) => {
                    handled += 1;
                    if let Err(e) = self.dispatch(envelope) {
                        log_failure(&e);
                    }
                }
                Err(TransportError::QueueClosed) => break Ok(handled),
                Err(e) => break Err(e.into()),
            }
        };
        if let Some(correlator) = &self.correlator {
            correlator.close();
        }
        tracing::debug!(target: "bridge.dispatch", handled, "dispatcher stopped");
        result
    }

    /// 处理当前已到达的全部信封，不阻塞
    pub fn pump(&mut self, inbound: &TransportQueue) -> DispatchResult<usize> {
        let mut handled = 0;
        loop {
            match inbound.try_receive() {
                Ok(Some(envelope)) => {
                    handled += 1;
                    if let Err(e) = self.dispatch(envelope) {
                        log_failure(&e);
                    }
                }
                Ok(None) => return Ok(handled),
                Err(e) => {
                    if let Some(correlator) = &self.correlator {
                        correlator.close();
                    }
                    return Err(e.into());
                }
            }
        }
    }

    /// 在本地直接应用命令
    pub fn apply(&mut self, type_id: u32, fields: Record) -> CommandResult<ApplyOutcome> {
        let outcome = self.commands.apply(&mut self.state, type_id, fields)?;
        self.stats.record(if outcome.is_merged() {
            StatEvent::CommandMerged
        } else {
            StatEvent::CommandApplied
        });
        Ok(outcome)
    }

    pub fn apply_message<M: Message>(&mut self, message: &M) -> CommandResult<ApplyOutcome> {
        self.apply(M::TYPE_ID, message.to_record())
    }

    pub fn undo(&mut self) -> CommandResult<u64> {
        let sequence = self.commands.undo(&mut self.state)?;
        self.stats.record(StatEvent::Undo);
        Ok(sequence)
    }

    pub fn redo(&mut self) -> CommandResult<u64> {
        let sequence = self.commands.redo(&mut self.state)?;
        self.stats.record(StatEvent::Redo);
        Ok(sequence)
    }

    pub fn seal(&mut self) {
        self.commands.seal();
    }

    pub fn state(&self) -> &S {
        &self.state
    }

    /// 绕过命令日志直接修改状态
    pub fn state_mut(&mut self) -> &mut S {
        &mut self.state
    }

    pub fn into_state(self) -> S {
        self.state
    }

    pub fn commands(&self) -> &CommandQueue<S> {
        &self.commands
    }

    pub fn catalog(&self) -> &Arc<MessageCatalog> {
        &self.catalog
    }

    /// 在本地直接回答查询，不经过队列
    pub fn query_local<Q: QueryMessage>(&mut self, query: &Q) -> DispatchResult<Q::Response> {
        let kind = self.kind_for(Q::TYPE_ID, Category::Query)?;
        let handler = self
            .queries
            .get_mut(&Q::TYPE_ID)
            .ok_or(DispatchError::NoHandler(Q::TYPE_ID))?;
        let reply = handler(&mut self.state, &query.to_record())?;
        if !reply.matches(&kind.response) {
            return Err(DispatchError::SchemaMismatch(format!(
                "{} reply does not match {}",
                kind.name,
                kind.response.canonical()
            )));
        }
        Ok(Q::Response::from_record(&reply)?)
    }

    pub fn backlog_len(&self) -> usize {
        self.backlog.len()
    }

    pub fn is_tracing(&self) -> bool {
        self.trace_messages
    }
}

fn log_failure(err: &DispatchError) {
    match err {
        DispatchError::Command(CommandError::NothingToUndo)
        | DispatchError::Command(CommandError::NothingToRedo) => {
            tracing::debug!(target: "bridge.dispatch", error = %err, "control message ignored");
        }
        _ => {
            tracing::warn!(target: "bridge.dispatch", error = %err, "envelope dropped");
        }
    }
}
