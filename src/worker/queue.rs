//! Thread-safe bounded-by-usage MPMC work queue (`worker::queue`). The
//! original's circular work buffer is `Rc`/`RefCell`-based and therefore
//! confined to one thread; this is the same shape — push/pop plus a
//! blocking wait for work — rebuilt on `Mutex`+`Condvar` so it can cross
//! thread boundaries.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

pub struct WorkQueue<T> {
    items: Mutex<VecDeque<T>>,
    has_work: Condvar,
}

impl<T> WorkQueue<T> {
    pub fn new() -> WorkQueue<T> {
        WorkQueue {
            items: Mutex::new(VecDeque::new()),
            has_work: Condvar::new(),
        }
    }

    pub fn push(&self, item: T) {
        self.items.lock().unwrap().push_back(item);
        self.has_work.notify_one();
    }

    /// Pops an item, blocking until one is available.
    pub fn pop(&self) -> T {
        let mut items = self.items.lock().unwrap();
        loop {
            if let Some(item) = items.pop_front() {
                return item;
            }
            items = self.has_work.wait(items).unwrap();
        }
    }

    /// Pops an item if one is immediately available, without blocking.
    pub fn try_pop(&self) -> Option<T> {
        self.items.lock().unwrap().pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn push_then_try_pop_round_trips() {
        let q: WorkQueue<i32> = WorkQueue::new();
        q.push(1);
        q.push(2);
        assert_eq!(q.try_pop(), Some(1));
        assert_eq!(q.try_pop(), Some(2));
        assert_eq!(q.try_pop(), None);
    }

    #[test]
    fn pop_blocks_until_pushed() {
        let q = Arc::new(WorkQueue::new());
        let q2 = q.clone();
        let handle = thread::spawn(move || q2.pop());
        thread::sleep(std::time::Duration::from_millis(20));
        q.push(42);
        assert_eq!(handle.join().unwrap(), 42);
    }

    #[test]
    fn many_producers_many_consumers_see_every_item() {
        let q = Arc::new(WorkQueue::new());
        for i in 0..50 {
            q.push(i);
        }
        let mut handles = Vec::new();
        for _ in 0..5 {
            let q = q.clone();
            handles.push(thread::spawn(move || {
                let mut popped = Vec::new();
                while let Some(item) = q.try_pop() {
                    popped.push(item);
                }
                popped
            }));
        }
        let mut all: Vec<i32> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
        all.sort();
        assert_eq!(all, (0..50).collect::<Vec<_>>());
    }
}
