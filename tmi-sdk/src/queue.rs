//! Paced, order-preserving delivery of outbound lines.
//!
//! One long-lived task pops the head entry, sleeps for the current rate-limit
//! interval (sampled fresh for every entry), and hands the line to a
//! [`LineSink`]. A sink that is not writable gives the line back and it is
//! requeued according to [`RequeuePolicy`]. There is no retry limit: an entry
//! waits for as long as the socket stays down.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{Notify, watch};

use crate::config::{QueueOptions, RequeuePolicy};
use crate::error::ClientError;

/// Destination for paced lines (the active socket).
pub trait LineSink: Send + Sync + 'static {
    /// Hand one line to the transport. Returns the line back if there is no
    /// writable socket right now.
    fn deliver(&self, line: String) -> Result<(), String>;
}

impl<T: LineSink + ?Sized> LineSink for Arc<T> {
    fn deliver(&self, line: String) -> Result<(), String> {
        (**self).deliver(line)
    }
}

struct Shared {
    entries: Mutex<VecDeque<String>>,
    notify: Notify,
    closed: AtomicBool,
    capacity: Option<usize>,
    requeue: RequeuePolicy,
}

/// Handle to the outbound queue. Clones share the same entries.
#[derive(Clone)]
pub struct OutboundQueue {
    shared: Arc<Shared>,
}

impl OutboundQueue {
    pub fn new(options: &QueueOptions) -> Self {
        Self {
            shared: Arc::new(Shared {
                entries: Mutex::new(VecDeque::new()),
                notify: Notify::new(),
                closed: AtomicBool::new(false),
                capacity: options.capacity,
                requeue: options.requeue,
            }),
        }
    }

    /// Append a line to the tail.
    pub fn enqueue(&self, line: impl Into<String>) -> Result<(), ClientError> {
        let line = line.into();
        {
            let mut entries = self.shared.entries.lock();
            if let Some(capacity) = self.shared.capacity
                && entries.len() >= capacity
            {
                return Err(ClientError::QueueFull { capacity });
            }
            entries.push_back(line);
        }
        self.shared.notify.notify_one();
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.shared.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop the delivery loop. Pending entries are kept but never sent.
    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::SeqCst);
        self.shared.notify.notify_one();
    }

    fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    // Requeues ignore the capacity bound so a failed delivery is never lost.
    fn requeue(&self, line: String) {
        {
            let mut entries = self.shared.entries.lock();
            match self.shared.requeue {
                RequeuePolicy::Tail => entries.push_back(line),
                RequeuePolicy::Head => entries.push_front(line),
            }
        }
        self.shared.notify.notify_one();
    }

    /// Put back lines that were handed to a socket which closed before
    /// writing them. Their relative order is kept under either policy.
    pub(crate) fn give_back(&self, lines: Vec<String>) {
        if lines.is_empty() {
            return;
        }
        {
            let mut entries = self.shared.entries.lock();
            match self.shared.requeue {
                RequeuePolicy::Tail => entries.extend(lines),
                RequeuePolicy::Head => {
                    for line in lines.into_iter().rev() {
                        entries.push_front(line);
                    }
                }
            }
        }
        self.shared.notify.notify_one();
    }

    async fn next(&self) -> Option<String> {
        loop {
            if self.is_closed() {
                return None;
            }
            if let Some(line) = self.shared.entries.lock().pop_front() {
                return Some(line);
            }
            self.shared.notify.notified().await;
        }
    }

    /// Delivery loop. Runs until [`close`](Self::close) is called.
    pub async fn run<S: LineSink>(self, sink: S, interval: watch::Receiver<Duration>) {
        while let Some(line) = self.next().await {
            let delay = *interval.borrow();
            tokio::time::sleep(delay).await;

            if self.is_closed() {
                self.shared.entries.lock().push_front(line);
                break;
            }

            match sink.deliver(line) {
                Ok(()) => {}
                Err(line) => {
                    tracing::debug!(line = %line, "Socket not writable, requeueing");
                    self.requeue(line);
                }
            }
        }
        tracing::debug!("Outbound queue stopped");
    }
}
