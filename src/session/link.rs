//! 编辑器与模拟线程的连接
//!
//! `spawn_simulation` 在独立线程上运行模拟侧分发器，并返回编辑器侧的句柄。
//! 编辑器侧另有一个泵线程，负责接收查询响应与命令拒绝通知。

use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crate::config::BridgeConfig;
use crate::core::error::{BridgeError, BridgeResult, DispatchResult};
use crate::dispatch::Dispatcher;
use crate::protocol::catalog::{control, MessageCatalog};
use crate::protocol::marshal::Marshaller;
use crate::protocol::messages::HandshakeReply;
use crate::protocol::value::Record;
use crate::query::QueryCorrelator;
use crate::session::messenger::Messenger;
use crate::stats::BridgeStats;
use crate::transport::queue::{link, Endpoint};

/// 对端拒绝的一条命令
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRejection {
    pub command: String,
    pub reason: String,
}

impl CommandRejection {
    fn from_record(record: &Record) -> Self {
        Self {
            command: record.string("command").unwrap_or_default().to_string(),
            reason: record.string("reason").unwrap_or_default().to_string(),
        }
    }
}

type Rejections = Arc<Mutex<Vec<CommandRejection>>>;

/// 编辑器侧句柄
pub struct EditorLink {
    messenger: Messenger,
    endpoint: Endpoint,
    pump: Option<JoinHandle<()>>,
    rejections: Rejections,
    stats: Arc<BridgeStats>,
}

impl EditorLink {
    pub fn messenger(&self) -> &Messenger {
        &self.messenger
    }

    /// 与模拟侧比较目录指纹
    pub fn handshake(&self) -> BridgeResult<HandshakeReply> {
        self.messenger.handshake()
    }

    /// 目前收到的全部拒绝记录
    pub fn rejections(&self) -> Vec<CommandRejection> {
        self.rejections
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    /// 取出并清空拒绝记录
    pub fn take_rejections(&self) -> Vec<CommandRejection> {
        std::mem::take(&mut *self.rejections.lock().unwrap_or_else(|p| p.into_inner()))
    }

    pub fn stats(&self) -> &Arc<BridgeStats> {
        &self.stats
    }

    /// 关闭连接并等待泵线程退出
    ///
    /// 队列中尚未处理的信封会被丢弃。
    pub fn shutdown(mut self) -> BridgeResult<()> {
        self.endpoint.close();
        self.join_pump()
    }

    fn join_pump(&mut self) -> BridgeResult<()> {
        match self.pump.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| BridgeError::Thread("editor pump thread panicked".to_string())),
            None => Ok(()),
        }
    }
}

impl Drop for EditorLink {
    fn drop(&mut self) {
        self.endpoint.close();
        if let Err(e) = self.join_pump() {
            tracing::error!(target: "bridge.transport", error = %e, "failed to stop editor pump");
        }
    }
}

/// 模拟线程句柄
pub struct SimulationHandle<S> {
    thread: JoinHandle<BridgeResult<S>>,
    stats: Arc<BridgeStats>,
}

impl<S> SimulationHandle<S> {
    /// 等待模拟线程结束并取回最终状态
    pub fn join(self) -> BridgeResult<S> {
        self.thread
            .join()
            .map_err(|_| BridgeError::Thread("simulation thread panicked".to_string()))?
    }

    pub fn stats(&self) -> &Arc<BridgeStats> {
        &self.stats
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }
}

/// 启动模拟线程
///
/// `setup` 在模拟线程上、开始分发之前调用，用于注册处理器。它失败时连接
/// 随即关闭，错误由 `SimulationHandle::join` 返回。
pub fn spawn_simulation<S, F>(
    config: &BridgeConfig,
    catalog: Arc<MessageCatalog>,
    state: S,
    setup: F,
) -> BridgeResult<(EditorLink, SimulationHandle<S>)>
where
    S: Clone + Send + 'static,
    F: FnOnce(&mut Dispatcher<S>) -> DispatchResult<()> + Send + 'static,
{
    config.validate()?;
    let (editor, simulation) = link(config.transport.capacity);
    let marshaller = Marshaller::new(config.transport.max_payload_bytes);

    let editor_stats = BridgeStats::shared();
    let correlator = Arc::new(
        QueryCorrelator::new(config.default_timeout(), marshaller).with_stats(editor_stats.clone()),
    );
    let rejections: Rejections = Arc::new(Mutex::new(Vec::new()));

    let mut pump = Dispatcher::new(Arc::clone(&catalog), (), config)
        .with_correlator(Arc::clone(&correlator))
        .with_stats(editor_stats.clone());
    let sink = Arc::clone(&rejections);
    pump.on_notification(control::COMMAND_REJECTED, move |_, record| {
        let rejection = CommandRejection::from_record(record);
        tracing::warn!(
            target: "bridge.command",
            command = %rejection.command,
            reason = %rejection.reason,
            "command rejected by simulation"
        );
        sink.lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(rejection);
        Ok(())
    })?;

    let sim_stats = BridgeStats::shared();
    let sim_config = config.clone();
    let sim_catalog = Arc::clone(&catalog);
    let sim_sink = Arc::clone(&sim_stats);
    let sim_thread = thread::Builder::new()
        .name("bridge-simulation".to_string())
        .spawn(move || -> BridgeResult<S> {
            let mut dispatcher = Dispatcher::new(sim_catalog, state, &sim_config)
                .with_replies(simulation.outbound.clone())
                .with_stats(sim_sink);
            if let Err(e) = setup(&mut dispatcher) {
                tracing::error!(target: "bridge.dispatch", error = %e, "simulation setup failed");
                simulation.close();
                return Err(e.into());
            }
            tracing::info!(target: "bridge.dispatch", "simulation dispatcher started");
            let result = dispatcher.run(&simulation.inbound);
            simulation.close();
            result?;
            Ok(dispatcher.into_state())
        })
        .map_err(|e| BridgeError::Thread(format!("failed to spawn simulation thread: {}", e)))?;

    let inbound = editor.inbound.clone();
    let pump_thread = thread::Builder::new()
        .name("bridge-editor-pump".to_string())
        .spawn(move || {
            if let Err(e) = pump.run(&inbound) {
                tracing::error!(target: "bridge.dispatch", error = %e, "editor pump stopped");
            }
        });
    let pump_thread = match pump_thread {
        Ok(handle) => handle,
        Err(e) => {
            editor.close();
            return Err(BridgeError::Thread(format!(
                "failed to spawn editor pump thread: {}",
                e
            )));
        }
    };

    let messenger = Messenger::new(catalog, editor.outbound.clone(), correlator, marshaller)
        .with_stats(editor_stats.clone());

    Ok((
        EditorLink {
            messenger,
            endpoint: editor,
            pump: Some(pump_thread),
            rejections,
            stats: editor_stats,
        },
        SimulationHandle {
            thread: sim_thread,
            stats: sim_stats,
        },
    ))
}
