//! Bounded work queues: the basic building block for every pipeline stage.
//!
//! Every inter-stage handoff is a bounded queue. `send` blocks the producer
//! while the queue is full (backpressure, not an error); `recv` blocks the
//! consumer while the queue is empty and returns `None` once the queue is
//! closed and drained. The adaptive batcher additionally needs a timed
//! receive, the only place a stage waits on wall-clock time.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time;

/// The consumer side of a queue has shut down; the item was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueClosed;

/// Create a bounded queue with the given capacity.
pub fn bounded<T>(capacity: usize) -> (QueueTx<T>, QueueRx<T>) {
    let (tx, rx) = mpsc::channel(capacity);
    (
        QueueTx { inner: tx },
        QueueRx { inner: Receiver::Bounded(rx) },
    )
}

/// Create an unbounded queue. Used only for the batcher input, which by
/// contract never blocks the submitting caller.
pub fn unbounded<T>() -> (UnboundedQueueTx<T>, QueueRx<T>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        UnboundedQueueTx { inner: tx },
        QueueRx { inner: Receiver::Unbounded(rx) },
    )
}

/// Producer half of a bounded queue.
#[derive(Debug)]
pub struct QueueTx<T> {
    inner: mpsc::Sender<T>,
}

impl<T> Clone for QueueTx<T> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<T> QueueTx<T> {
    /// Enqueue an item, blocking while the queue is full.
    pub async fn send(&self, item: T) -> Result<(), QueueClosed> {
        self.inner.send(item).await.map_err(|_| QueueClosed)
    }
}

/// Producer half of an unbounded queue. `send` never blocks.
#[derive(Debug)]
pub struct UnboundedQueueTx<T> {
    inner: mpsc::UnboundedSender<T>,
}

impl<T> Clone for UnboundedQueueTx<T> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<T> UnboundedQueueTx<T> {
    pub fn send(&self, item: T) -> Result<(), QueueClosed> {
        self.inner.send(item).map_err(|_| QueueClosed)
    }
}

/// Outcome of a timed receive.
#[derive(Debug, PartialEq, Eq)]
pub enum TimedRecv<T> {
    /// An item arrived within the window.
    Received(T),
    /// The window elapsed with the queue still empty.
    TimedOut,
    /// The queue is closed and drained.
    Closed,
}

/// Consumer half of a queue.
#[derive(Debug)]
pub struct QueueRx<T> {
    inner: Receiver<T>,
}

/// Either flavour of tokio receiver behind one interface.
#[derive(Debug)]
enum Receiver<T> {
    Bounded(mpsc::Receiver<T>),
    Unbounded(mpsc::UnboundedReceiver<T>),
}

impl<T> QueueRx<T> {
    /// Dequeue an item, blocking while the queue is empty. Returns `None`
    /// once every producer is gone and the queue is drained.
    pub async fn recv(&mut self) -> Option<T> {
        match &mut self.inner {
            Receiver::Bounded(rx) => rx.recv().await,
            Receiver::Unbounded(rx) => rx.recv().await,
        }
    }

    /// Dequeue with a time limit.
    pub async fn recv_timeout(&mut self, wait: Duration) -> TimedRecv<T> {
        match time::timeout(wait, self.recv()).await {
            Ok(Some(item)) => TimedRecv::Received(item),
            Ok(None) => TimedRecv::Closed,
            Err(_) => TimedRecv::TimedOut,
        }
    }
}
