//! 有界、可关闭的信封队列
//!
//! 每个方向一条队列。满时 `send` 阻塞（背压），`close` 之后所有正在
//! 等待和之后的 `send`/`receive` 均返回 `QueueClosed`。

use crossbeam_channel::{bounded, select, Receiver, Sender, TryRecvError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::core::error::{TransportError, TransportResult};
use crate::protocol::envelope::Envelope;

struct QueueInner {
    data_tx: Sender<Envelope>,
    data_rx: Receiver<Envelope>,
    closed: AtomicBool,
    /// 释放该发送端即广播关闭
    close_tx: Mutex<Option<Sender<()>>>,
    close_rx: Receiver<()>,
    capacity: usize,
}

/// 单方向传输队列
///
/// 克隆得到的是同一条队列的另一个句柄。
#[derive(Clone)]
pub struct TransportQueue {
    inner: Arc<QueueInner>,
}

impl std::fmt::Debug for TransportQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportQueue")
            .field("capacity", &self.inner.capacity)
            .field("len", &self.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl TransportQueue {
    pub fn new(capacity: usize) -> Self {
        let (data_tx, data_rx) = bounded(capacity);
        let (close_tx, close_rx) = bounded(0);
        Self {
            inner: Arc::new(QueueInner {
                data_tx,
                data_rx,
                closed: AtomicBool::new(false),
                close_tx: Mutex::new(Some(close_tx)),
                close_rx,
                capacity,
            }),
        }
    }

    /// 发送信封，队列满时阻塞
    pub fn send(&self, envelope: Envelope) -> TransportResult<()> {
        if self.is_closed() {
            return Err(TransportError::QueueClosed);
        }
        let inner = &self.inner;
        select! {
            send(inner.data_tx, envelope) -> res => {
                res.map_err(|_| TransportError::QueueClosed)?;
                tracing::trace!(target: "bridge.transport", depth = self.len(), "envelope queued");
                Ok(())
            }
            recv(inner.close_rx) -> _ => Err(TransportError::QueueClosed),
        }
    }

    /// 阻塞接收，直到有信封或队列关闭
    pub fn receive(&self) -> TransportResult<Envelope> {
        if self.is_closed() {
            return Err(TransportError::QueueClosed);
        }
        let inner = &self.inner;
        select! {
            recv(inner.data_rx) -> msg => self.accept(msg.ok()),
            recv(inner.close_rx) -> _ => Err(TransportError::QueueClosed),
        }
    }

    /// 带超时的接收，超时返回 `Ok(None)`
    pub fn receive_timeout(&self, timeout: Duration) -> TransportResult<Option<Envelope>> {
        if self.is_closed() {
            return Err(TransportError::QueueClosed);
        }
        let inner = &self.inner;
        select! {
            recv(inner.data_rx) -> msg => self.accept(msg.ok()).map(Some),
            recv(inner.close_rx) -> _ => Err(TransportError::QueueClosed),
            default(timeout) => Ok(None),
        }
    }

    /// 非阻塞接收
    pub fn try_receive(&self) -> TransportResult<Option<Envelope>> {
        if self.is_closed() {
            return Err(TransportError::QueueClosed);
        }
        match self.inner.data_rx.try_recv() {
            Ok(envelope) => self.accept(Some(envelope)).map(Some),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(TransportError::QueueClosed),
        }
    }

    // 关闭与接收竞争时，以关闭为准
    fn accept(&self, envelope: Option<Envelope>) -> TransportResult<Envelope> {
        match envelope {
            Some(envelope) if !self.is_closed() => Ok(envelope),
            _ => Err(TransportError::QueueClosed),
        }
    }

    /// 关闭队列（幂等）
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut guard = self
            .inner
            .close_tx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.take();
        tracing::debug!(target: "bridge.transport", pending = self.len(), "queue closed");
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// 当前排队数量
    pub fn len(&self) -> usize {
        self.inner.data_rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.data_rx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }
}

/// 一侧持有的队列对
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub outbound: TransportQueue,
    pub inbound: TransportQueue,
}

impl Endpoint {
    /// 关闭两个方向
    pub fn close(&self) {
        self.outbound.close();
        self.inbound.close();
    }
}

/// 创建一对相连的端点
///
/// 第一个端点的 outbound 就是第二个端点的 inbound，反之亦然。
pub fn link(capacity: usize) -> (Endpoint, Endpoint) {
    let forward = TransportQueue::new(capacity);
    let backward = TransportQueue::new(capacity);
    let first = Endpoint {
        outbound: forward.clone(),
        inbound: backward.clone(),
    };
    let second = Endpoint {
        outbound: backward,
        inbound: forward,
    };
    (first, second)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::thread;
    use std::time::Instant;

    fn envelope(n: u32) -> Envelope {
        Envelope::notification(n, n.to_le_bytes().to_vec())
    }

    #[test]
    fn test_fifo_order() {
        let queue = TransportQueue::new(8);
        for n in 0..5 {
            queue.send(envelope(n)).unwrap();
        }
        assert_eq!(queue.len(), 5);
        for n in 0..5 {
            assert_eq!(queue.receive().unwrap().type_id(), n);
        }
        assert!(queue.is_empty());
    }

    #[test]
    fn test_close_unblocks_receiver() {
        let queue = TransportQueue::new(4);
        let reader = queue.clone();
        let handle = thread::spawn(move || {
            let start = Instant::now();
            let result = reader.receive();
            (result, start.elapsed())
        });

        thread::sleep(Duration::from_millis(50));
        queue.close();

        let (result, elapsed) = handle.join().unwrap();
        assert!(matches!(result, Err(TransportError::QueueClosed)));
        assert!(elapsed < Duration::from_secs(5));
    }

    #[test]
    fn test_close_unblocks_full_sender() {
        let queue = TransportQueue::new(1);
        queue.send(envelope(1)).unwrap();

        let writer = queue.clone();
        let handle = thread::spawn(move || writer.send(envelope(2)));

        thread::sleep(Duration::from_millis(50));
        queue.close();
        assert!(matches!(
            handle.join().unwrap(),
            Err(TransportError::QueueClosed)
        ));
    }

    #[test]
    fn test_close_is_idempotent() {
        let queue = TransportQueue::new(2);
        queue.send(envelope(1)).unwrap();
        queue.close();
        queue.close();
        assert!(queue.is_closed());
        assert!(matches!(queue.receive(), Err(TransportError::QueueClosed)));
        assert!(matches!(
            queue.send(envelope(2)),
            Err(TransportError::QueueClosed)
        ));
        assert!(matches!(queue.try_receive(), Err(TransportError::QueueClosed)));
    }

    #[test]
    fn test_receive_timeout_and_try_receive() {
        let queue = TransportQueue::new(2);
        assert_eq!(
            queue.receive_timeout(Duration::from_millis(10)).unwrap(),
            None
        );
        assert_eq!(queue.try_receive().unwrap(), None);

        queue.send(envelope(3)).unwrap();
        let got = queue
            .receive_timeout(Duration::from_millis(10))
            .unwrap()
            .unwrap();
        assert_eq!(got.type_id(), 3);
    }

    #[test]
    fn test_link_directions() {
        let (editor, game) = link(4);
        editor.outbound.send(envelope(1)).unwrap();
        game.outbound.send(envelope(2)).unwrap();
        assert_eq!(game.inbound.receive().unwrap().type_id(), 1);
        assert_eq!(editor.inbound.receive().unwrap().type_id(), 2);

        editor.close();
        assert!(game.inbound.is_closed());
        assert!(game.outbound.is_closed());
    }

    proptest! {
        #[test]
        fn prop_fifo_across_threads(n in 0usize..200) {
            let queue = TransportQueue::new(16);
            let writer = queue.clone();
            let producer = thread::spawn(move || {
                for i in 0..n {
                    writer.send(envelope(i as u32)).unwrap();
                }
            });
            let mut received = Vec::with_capacity(n);
            for _ in 0..n {
                received.push(queue.receive().unwrap().type_id());
            }
            producer.join().unwrap();
            let expected: Vec<u32> = (0..n as u32).collect();
            prop_assert_eq!(received, expected);
        }
    }
}
