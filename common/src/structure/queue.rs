use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// Bounded blocking queue coupling the replication fetch loop (producer) to
/// the apply worker (consumer).
///
/// `push` blocks while the queue is full, `pop` blocks while it is empty;
/// both return early once the queue is closed. Strict FIFO order is the
/// property replication correctness rests on.
#[derive(Debug)]
pub struct BoundedQueue<T> {
    inner: Mutex<QueueState<T>>,
    not_full: Condvar,
    not_empty: Condvar,
    capacity: usize,
}

#[derive(Debug)]
struct QueueState<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// Outcome of a blocking push.
#[derive(Debug, PartialEq, Eq)]
pub enum PushOutcome {
    Pushed,
    /// The queue was closed while waiting for capacity; the item is handed
    /// back to the caller.
    Closed,
}

impl<T> BoundedQueue<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "queue capacity must be positive");
        BoundedQueue {
            inner: Mutex::new(QueueState {
                items: VecDeque::new(),
                closed: false,
            }),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
            capacity,
        }
    }

    /// Blocks while full. Returns the item on `Closed` so the caller can
    /// decide whether the loss matters.
    pub fn push(&self, item: T) -> Result<PushOutcome, T> {
        let mut state = self.inner.lock().unwrap();
        loop {
            if state.closed {
                return Err(item);
            }
            if state.items.len() < self.capacity {
                state.items.push_back(item);
                self.not_empty.notify_one();
                return Ok(PushOutcome::Pushed);
            }
            state = self.not_full.wait(state).unwrap();
        }
    }

    /// Blocks while empty. `None` means the queue is closed and drained.
    pub fn pop(&self) -> Option<T> {
        let mut state = self.inner.lock().unwrap();
        loop {
            if let Some(item) = state.items.pop_front() {
                self.not_full.notify_one();
                return Some(item);
            }
            if state.closed {
                return None;
            }
            state = self.not_empty.wait(state).unwrap();
        }
    }

    /// Like `pop` but gives up after `timeout`; used by loops that must poll
    /// a shutdown flag.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        let mut state = self.inner.lock().unwrap();
        loop {
            if let Some(item) = state.items.pop_front() {
                self.not_full.notify_one();
                return Some(item);
            }
            if state.closed {
                return None;
            }
            let (next, result) = self.not_empty.wait_timeout(state, timeout).unwrap();
            state = next;
            if result.timed_out() {
                return state.items.pop_front().map(|item| {
                    self.not_full.notify_one();
                    item
                });
            }
        }
    }

    /// Wakes every blocked producer and consumer. Items already queued stay
    /// poppable; new pushes are refused.
    pub fn close(&self) {
        let mut state = self.inner.lock().unwrap();
        state.closed = true;
        self.not_full.notify_all();
        self.not_empty.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().unwrap().closed
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use super::*;

    #[test]
    fn fifo_order() {
        let queue = BoundedQueue::with_capacity(8);
        for i in 0..5 {
            queue.push(i).unwrap();
        }
        for i in 0..5 {
            assert_eq!(queue.pop(), Some(i));
        }
        assert!(queue.is_empty());
    }

    #[test]
    fn push_blocks_until_pop() {
        let queue = Arc::new(BoundedQueue::with_capacity(1));
        queue.push(1u32).unwrap();

        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.push(2).unwrap())
        };

        thread::sleep(Duration::from_millis(50));
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.pop(), Some(1));

        assert_eq!(producer.join().unwrap(), PushOutcome::Pushed);
        assert_eq!(queue.pop(), Some(2));
    }

    #[test]
    fn close_wakes_blocked_consumer() {
        let queue: Arc<BoundedQueue<u32>> = Arc::new(BoundedQueue::with_capacity(1));

        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.pop())
        };

        thread::sleep(Duration::from_millis(50));
        queue.close();
        assert_eq!(consumer.join().unwrap(), None);
    }

    #[test]
    fn close_refuses_push_returns_item() {
        let queue = BoundedQueue::with_capacity(1);
        queue.close();
        assert_eq!(queue.push(7), Err(7));
    }

    #[test]
    fn close_drains_remaining_items() {
        let queue = BoundedQueue::with_capacity(4);
        queue.push("a").unwrap();
        queue.push("b").unwrap();
        queue.close();
        assert_eq!(queue.pop(), Some("a"));
        assert_eq!(queue.pop(), Some("b"));
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn pop_timeout_expires() {
        let queue: BoundedQueue<u32> = BoundedQueue::with_capacity(1);
        let started = std::time::Instant::now();
        assert_eq!(queue.pop_timeout(Duration::from_millis(30)), None);
        assert!(started.elapsed() >= Duration::from_millis(25));
    }
}
