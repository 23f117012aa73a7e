//! Bounded, closable FIFO of sessions.
//!
//! Two semaphores guard a plain `VecDeque`:
//!
//! ```text
//!   push: acquire `free`      → push_back  → add `available`
//!   pop:  acquire `available` → pop_front  → add `free`
//! ```
//!
//! Tokio semaphores are fair, so blocked pickers are served in arrival
//! order, and closing them wakes every waiter at once. The lock is only
//! held for the `push_back`/`pop_front` itself, never across an await.

use std::collections::VecDeque;

use parking_lot::Mutex;
use tokio::sync::Semaphore;
use warmpool_session::Session;

pub(crate) struct SessionQueue {
    items: Mutex<VecDeque<Session>>,
    /// One permit per queued session.
    available: Semaphore,
    /// One permit per free slot.
    free: Semaphore,
}

impl SessionQueue {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            available: Semaphore::new(0),
            free: Semaphore::new(capacity),
        }
    }

    /// Enqueues, waiting while the queue is full. Hands the session back
    /// if the queue is closed.
    pub(crate) async fn push(&self, session: Session) -> Result<(), Session> {
        match self.free.acquire().await {
            Ok(permit) => permit.forget(),
            Err(_) => return Err(session),
        }
        self.items.lock().push_back(session);
        self.available.add_permits(1);
        Ok(())
    }

    /// Dequeues, waiting while the queue is empty. `None` once closed.
    ///
    /// Cancel-safe: a session is only removed after the permit is won.
    pub(crate) async fn pop(&self) -> Option<Session> {
        self.available.acquire().await.ok()?.forget();
        self.take_front()
    }

    /// Dequeues without waiting.
    pub(crate) fn try_pop(&self) -> Option<Session> {
        self.available.try_acquire().ok()?.forget();
        self.take_front()
    }

    fn take_front(&self) -> Option<Session> {
        let session = self.items.lock().pop_front();
        if session.is_some() {
            self.free.add_permits(1);
        }
        session
    }

    /// Rejects further pushes and pops and wakes every waiter.
    ///
    /// Sessions still queued stay put until [`drain`](Self::drain).
    pub(crate) fn close(&self) {
        self.available.close();
        self.free.close();
    }

    /// Removes everything still queued. Meant for after [`close`](Self::close).
    pub(crate) fn drain(&self) -> Vec<Session> {
        self.items.lock().drain(..).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.available.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn session(token: &str) -> Session {
        Session::healthy(token.to_string(), Duration::from_secs(600))
    }

    #[tokio::test]
    async fn test_pop_returns_sessions_in_fifo_order() {
        let queue = SessionQueue::new(3);
        for t in ["a", "b", "c"] {
            queue.push(session(t)).await.unwrap();
        }

        assert_eq!(queue.len(), 3);
        for t in ["a", "b", "c"] {
            let s = queue.pop().await.unwrap();
            assert_eq!(s.token(), Some(t));
        }
        assert_eq!(queue.len(), 0);
    }

    #[tokio::test]
    async fn test_try_pop_on_empty_returns_none() {
        let queue = SessionQueue::new(2);
        assert!(queue.try_pop().is_none());

        queue.push(session("a")).await.unwrap();
        assert!(queue.try_pop().is_some());
        assert!(queue.try_pop().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_push_waits_while_full() {
        let queue = SessionQueue::new(1);
        queue.push(session("a")).await.unwrap();

        let blocked =
            tokio::time::timeout(Duration::from_secs(1), queue.push(session("b")))
                .await;
        assert!(blocked.is_err(), "push into a full queue should wait");
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pop_waits_while_empty() {
        let queue = SessionQueue::new(1);

        let blocked =
            tokio::time::timeout(Duration::from_secs(1), queue.pop()).await;
        assert!(blocked.is_err(), "pop from an empty queue should wait");

        // The cancelled pop must not have eaten a future item.
        queue.push(session("a")).await.unwrap();
        assert!(queue.pop().await.is_some());
    }

    #[tokio::test]
    async fn test_close_wakes_blocked_pop() {
        let queue = std::sync::Arc::new(SessionQueue::new(1));
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop().await })
        };
        tokio::task::yield_now().await;

        queue.close();

        let popped = waiter.await.unwrap();
        assert!(popped.is_none());
        assert!(queue.is_closed());
    }

    #[tokio::test]
    async fn test_push_after_close_hands_session_back() {
        let queue = SessionQueue::new(2);
        queue.close();

        let rejected = queue.push(session("a")).await;
        assert_eq!(rejected.unwrap_err().token(), Some("a"));
    }

    #[tokio::test]
    async fn test_drain_after_close_returns_leftovers() {
        let queue = SessionQueue::new(3);
        queue.push(session("a")).await.unwrap();
        queue.push(session("b")).await.unwrap();
        queue.close();

        assert!(queue.pop().await.is_none());
        let left = queue.drain();
        assert_eq!(left.len(), 2);
        assert_eq!(queue.len(), 0);
    }

    #[tokio::test]
    async fn test_zero_capacity_queue_closes_cleanly() {
        let queue = SessionQueue::new(0);
        assert!(!queue.is_closed());
        queue.close();
        assert!(queue.pop().await.is_none());
    }
}
