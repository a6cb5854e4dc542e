//! In-memory mail queue between SMTP sessions and the dispatcher
//!
//! ```text
//! ┌─────────┐  enqueue   ┌───────────┐  drain   ┌────────────┐
//! │ Session │ ─────────→ │ MailQueue │ ───────→ │ Dispatcher │
//! └─────────┘ (waits if  └───────────┘ (one at  └────────────┘
//!              full)                    a time)
//! ```
//!
//! The buffer is a bounded tokio channel, so it keeps FIFO order and
//! producers wait for free slots instead of failing. Draining goes through a
//! separate lock which the dispatcher keeps for a whole cycle, so two cycles
//! never overlap. Producers never wait on that lock, only on capacity.
//!
//! Nothing is persisted: whatever is still buffered when the process exits
//! is lost.

use crate::error::{BridgeError, Result};
use crate::mail::Mail;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{mpsc, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Bounded FIFO buffer of accepted mails
pub struct MailQueue {
    sender: mpsc::Sender<Mail>,
    receiver: Mutex<mpsc::Receiver<Mail>>,
    pending: AtomicUsize,
    capacity: usize,
    closed: CancellationToken,
}

impl MailQueue {
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        Self {
            sender,
            receiver: Mutex::new(receiver),
            pending: AtomicUsize::new(0),
            capacity: capacity.max(1),
            closed: CancellationToken::new(),
        }
    }

    /// Push a mail, waiting while the queue is full
    ///
    /// Fails with [`BridgeError::QueueClosed`] once [`close`](Self::close)
    /// has been called, including for producers already waiting.
    pub async fn enqueue(&self, mail: Mail) -> Result<()> {
        if self.closed.is_cancelled() {
            return Err(BridgeError::QueueClosed);
        }

        let permit = tokio::select! {
            biased;
            _ = self.closed.cancelled() => return Err(BridgeError::QueueClosed),
            permit = self.sender.reserve() => permit.map_err(|_| BridgeError::QueueClosed)?,
        };

        self.pending.fetch_add(1, Ordering::SeqCst);
        permit.send(mail);
        debug!("Mail enqueued, {} pending", self.len());
        Ok(())
    }

    /// Number of mails currently buffered
    pub fn len(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Refuse any further enqueue
    pub fn close(&self) {
        if !self.closed.is_cancelled() {
            info!("Closing mail queue with {} pending mails", self.len());
            self.closed.cancel();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Take the drain lock
    ///
    /// The returned guard yields the mails buffered at the time the lock was
    /// acquired. Only one guard exists at a time.
    pub async fn drain(&self) -> QueueDrain<'_> {
        let receiver = self.receiver.lock().await;
        QueueDrain {
            remaining: self.len(),
            receiver,
            pending: &self.pending,
        }
    }
}

/// Exclusive access to the queue for one dispatch cycle
pub struct QueueDrain<'a> {
    receiver: MutexGuard<'a, mpsc::Receiver<Mail>>,
    pending: &'a AtomicUsize,
    remaining: usize,
}

impl QueueDrain<'_> {
    /// Next buffered mail, freeing its slot for producers
    pub fn next_mail(&mut self) -> Option<Mail> {
        if self.remaining == 0 {
            return None;
        }

        match self.receiver.try_recv() {
            Ok(mail) => {
                self.remaining -= 1;
                self.pending.fetch_sub(1, Ordering::SeqCst);
                Some(mail)
            }
            Err(_) => {
                self.remaining = 0;
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::timeout;

    fn mail(from: &str) -> Mail {
        let mut mail = Mail::new(from);
        mail.add_recipient("rcpt@example.com");
        mail
    }

    #[tokio::test]
    async fn test_fifo_drain() {
        let queue = MailQueue::new(10);
        for i in 0..3 {
            queue.enqueue(mail(&format!("sender{}@example.com", i))).await.unwrap();
        }
        assert_eq!(queue.len(), 3);

        let mut drain = queue.drain().await;
        let order: Vec<String> = std::iter::from_fn(|| drain.next_mail())
            .map(|m| m.from)
            .collect();
        drop(drain);

        assert_eq!(
            order,
            vec!["sender0@example.com", "sender1@example.com", "sender2@example.com"]
        );
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_full_queue_blocks_until_drained() {
        let queue = Arc::new(MailQueue::new(1));
        queue.enqueue(mail("first@example.com")).await.unwrap();

        // No free slot: enqueue must wait rather than fail
        let blocked = timeout(
            Duration::from_millis(50),
            queue.enqueue(mail("second@example.com")),
        )
        .await;
        assert!(blocked.is_err());
        assert_eq!(queue.len(), 1);

        let producer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.enqueue(mail("third@example.com")).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!producer.is_finished());

        let mut drain = queue.drain().await;
        assert_eq!(drain.next_mail().unwrap().from, "first@example.com");
        drop(drain);

        timeout(Duration::from_secs(1), producer)
            .await
            .expect("producer should be released")
            .unwrap()
            .unwrap();
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_enqueue_after_close() {
        let queue = MailQueue::new(4);
        queue.close();
        assert!(queue.is_closed());
        assert!(matches!(
            queue.enqueue(mail("late@example.com")).await,
            Err(BridgeError::QueueClosed)
        ));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_close_releases_blocked_producer() {
        let queue = Arc::new(MailQueue::new(1));
        queue.enqueue(mail("first@example.com")).await.unwrap();

        let producer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.enqueue(mail("second@example.com")).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.close();

        let result = timeout(Duration::from_secs(1), producer).await.unwrap().unwrap();
        assert!(matches!(result, Err(BridgeError::QueueClosed)));
    }

    #[tokio::test]
    async fn test_drain_only_takes_snapshot() {
        let queue = MailQueue::new(10);
        queue.enqueue(mail("a@example.com")).await.unwrap();

        let mut drain = queue.drain().await;
        queue.enqueue(mail("b@example.com")).await.unwrap();
        assert_eq!(drain.next_mail().unwrap().from, "a@example.com");
        assert!(drain.next_mail().is_none());
        drop(drain);

        assert_eq!(queue.len(), 1);
    }
}
