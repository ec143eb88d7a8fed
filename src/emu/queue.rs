use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[derive(Debug)]
struct Slots<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// FIFO shared between threads. `push` never blocks; consumers wait with a timeout.
///
/// Once closed, pending items are handed back and later pushes are refused.
#[derive(Debug)]
pub struct CommandQueue<T> {
    slots: Mutex<Slots<T>>,
    ready: Condvar,
}

impl<T> Default for CommandQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> CommandQueue<T> {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(Slots {
                items: VecDeque::new(),
                closed: false,
            }),
            ready: Condvar::new(),
        }
    }

    // A panicking producer cannot leave the deque half-updated, so poisoning is ignored.
    fn lock(&self) -> MutexGuard<'_, Slots<T>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queues `item`, or gives it back if the queue is closed.
    pub fn push(&self, item: T) -> Result<(), T> {
        {
            let mut slots = self.lock();
            if slots.closed {
                return Err(item);
            }
            slots.items.push_back(item);
        }
        self.ready.notify_one();
        Ok(())
    }

    pub fn try_pop(&self) -> Option<T> {
        self.lock().items.pop_front()
    }

    /// Waits up to `timeout` for an item.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        let slots = self.lock();
        let (mut slots, _) = self
            .ready
            .wait_timeout_while(slots, timeout, |slots| slots.items.is_empty() && !slots.closed)
            .unwrap_or_else(PoisonError::into_inner);
        slots.items.pop_front()
    }

    /// Refuses further pushes and returns whatever was still queued.
    pub fn close(&self) -> Vec<T> {
        let drained = {
            let mut slots = self.lock();
            slots.closed = true;
            slots.items.drain(..).collect()
        };
        self.ready.notify_all();
        drained
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn test_fifo_order() {
        let queue = CommandQueue::new();
        for i in 0..5 {
            queue.push(i).unwrap();
        }
        assert_eq!(queue.len(), 5);
        let popped: Vec<_> = std::iter::from_fn(|| queue.try_pop()).collect();
        assert_eq!(popped, vec![0, 1, 2, 3, 4]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_pop_timeout_wakes_on_push() {
        let queue = Arc::new(CommandQueue::new());
        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.pop_timeout(Duration::from_secs(10)))
        };
        queue.push("hello").unwrap();
        assert_eq!(consumer.join().unwrap(), Some("hello"));
    }

    #[test]
    fn test_pop_timeout_on_empty_queue() {
        let queue: CommandQueue<u8> = CommandQueue::new();
        assert_eq!(queue.pop_timeout(Duration::from_millis(1)), None);
        queue.push(7).unwrap();
        assert_eq!(queue.pop_timeout(Duration::from_millis(1)), Some(7));
    }

    #[test]
    fn test_close_drains_and_refuses() {
        let queue = CommandQueue::new();
        queue.push(1).unwrap();
        queue.push(2).unwrap();
        assert_eq!(queue.close(), vec![1, 2]);
        assert!(queue.is_closed());
        assert_eq!(queue.push(3), Err(3));
        assert!(queue.is_empty());
        assert_eq!(queue.pop_timeout(Duration::from_secs(10)), None);
    }
}
