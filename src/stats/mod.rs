//! 统计埋点
//!
//! 桥接核心只向 sink 推送事件，从不读取。没有 sink 时行为完全一致。

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::protocol::envelope::EnvelopeCategory;

/// 统计事件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatEvent {
    Sent(EnvelopeCategory),
    Received(EnvelopeCategory),
    /// 发送后观察到的队列深度
    QueueDepth(usize),
    CommandApplied,
    CommandMerged,
    CommandRejected,
    Undo,
    Redo,
    /// 因未知类型、schema 不符或无处理器而丢弃的信封
    Dropped,
    QueryTimedOut,
}

/// 被动统计接收端
pub trait StatsSink: Send + Sync {
    fn record(&self, event: StatEvent);
}

/// 丢弃一切
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl StatsSink for NullSink {
    fn record(&self, _event: StatEvent) {}
}

pub type SharedStats = Arc<dyn StatsSink>;

pub fn null_sink() -> SharedStats {
    Arc::new(NullSink)
}

/// 原子计数器累加的统计
#[derive(Debug, Default)]
pub struct BridgeStats {
    sent: [AtomicU64; 4],
    received: [AtomicU64; 4],
    last_queue_depth: AtomicU64,
    max_queue_depth: AtomicU64,
    commands_applied: AtomicU64,
    commands_merged: AtomicU64,
    commands_rejected: AtomicU64,
    undos: AtomicU64,
    redos: AtomicU64,
    dropped: AtomicU64,
    queries_timed_out: AtomicU64,
}

/// 按类别的计数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CategoryCounts {
    pub notifications: u64,
    pub queries: u64,
    pub commands: u64,
    pub responses: u64,
}

impl CategoryCounts {
    pub fn total(&self) -> u64 {
        self.notifications + self.queries + self.commands + self.responses
    }
}

/// 某一时刻的统计快照
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub sent: CategoryCounts,
    pub received: CategoryCounts,
    pub last_queue_depth: u64,
    pub max_queue_depth: u64,
    pub commands_applied: u64,
    pub commands_merged: u64,
    pub commands_rejected: u64,
    pub undos: u64,
    pub redos: u64,
    pub dropped: u64,
    pub queries_timed_out: u64,
}

impl BridgeStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            sent: counts(&self.sent),
            received: counts(&self.received),
            last_queue_depth: self.last_queue_depth.load(Ordering::Relaxed),
            max_queue_depth: self.max_queue_depth.load(Ordering::Relaxed),
            commands_applied: self.commands_applied.load(Ordering::Relaxed),
            commands_merged: self.commands_merged.load(Ordering::Relaxed),
            commands_rejected: self.commands_rejected.load(Ordering::Relaxed),
            undos: self.undos.load(Ordering::Relaxed),
            redos: self.redos.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            queries_timed_out: self.queries_timed_out.load(Ordering::Relaxed),
        }
    }
}

fn counts(slots: &[AtomicU64; 4]) -> CategoryCounts {
    let at = |c: EnvelopeCategory| slots[c.as_byte() as usize].load(Ordering::Relaxed);
    CategoryCounts {
        notifications: at(EnvelopeCategory::Notification),
        queries: at(EnvelopeCategory::Query),
        commands: at(EnvelopeCategory::Command),
        responses: at(EnvelopeCategory::Response),
    }
}

impl StatsSink for BridgeStats {
    fn record(&self, event: StatEvent) {
        match event {
            StatEvent::Sent(c) => {
                self.sent[c.as_byte() as usize].fetch_add(1, Ordering::Relaxed);
            }
            StatEvent::Received(c) => {
                self.received[c.as_byte() as usize].fetch_add(1, Ordering::Relaxed);
            }
            StatEvent::QueueDepth(depth) => {
                let depth = depth as u64;
                self.last_queue_depth.store(depth, Ordering::Relaxed);
                self.max_queue_depth.fetch_max(depth, Ordering::Relaxed);
            }
            StatEvent::CommandApplied => {
                self.commands_applied.fetch_add(1, Ordering::Relaxed);
            }
            StatEvent::CommandMerged => {
                self.commands_merged.fetch_add(1, Ordering::Relaxed);
            }
            StatEvent::CommandRejected => {
                self.commands_rejected.fetch_add(1, Ordering::Relaxed);
            }
            StatEvent::Undo => {
                self.undos.fetch_add(1, Ordering::Relaxed);
            }
            StatEvent::Redo => {
                self.redos.fetch_add(1, Ordering::Relaxed);
            }
            StatEvent::Dropped => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            StatEvent::QueryTimedOut => {
                self.queries_timed_out.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let stats = BridgeStats::new();
        stats.record(StatEvent::Sent(EnvelopeCategory::Command));
        stats.record(StatEvent::Sent(EnvelopeCategory::Command));
        stats.record(StatEvent::Received(EnvelopeCategory::Response));
        stats.record(StatEvent::QueueDepth(5));
        stats.record(StatEvent::QueueDepth(2));
        stats.record(StatEvent::Undo);

        let snap = stats.snapshot();
        assert_eq!(snap.sent.commands, 2);
        assert_eq!(snap.sent.total(), 2);
        assert_eq!(snap.received.responses, 1);
        assert_eq!(snap.last_queue_depth, 2);
        assert_eq!(snap.max_queue_depth, 5);
        assert_eq!(snap.undos, 1);
    }

    #[test]
    fn test_snapshot_serializes() {
        let stats = BridgeStats::new();
        stats.record(StatEvent::Dropped);
        let json = serde_json::to_value(stats.snapshot()).unwrap();
        assert_eq!(json["dropped"], 1);
        assert_eq!(json["sent"]["queries"], 0);
    }

    #[test]
    fn test_null_sink_is_inert() {
        let sink = null_sink();
        sink.record(StatEvent::CommandApplied);
    }
}
