//! Deferred continuations.
//!
//! Each thread owns a FIFO queue of continuations. Settling a promise or
//! registering a handler on a settled one only queues work here; the host
//! decides when the queue runs. Continuations queued while the queue is
//! running are picked up by the same run.
//!
//! The queue is drained from inside `Future::poll` (see [`crate::Waiter`]),
//! which rules out `futures::executor::LocalPool`: its run methods refuse to
//! start inside another executor.
use log::trace;
use std::{cell::RefCell, collections::VecDeque};

type Continuation = Box<dyn FnOnce()>;

thread_local! {
    static QUEUE: RefCell<VecDeque<Continuation>> = RefCell::new(VecDeque::new());
}

/// Queue `continuation` to run on a later turn.
pub fn defer<F>(continuation: F)
where
    F: FnOnce() + 'static,
{
    let queued = QUEUE.try_with(|queue| {
        let mut queue = queue.borrow_mut();
        queue.push_back(Box::new(continuation));
        queue.len()
    });
    match queued {
        Ok(len) => trace!("deferred continuation, {} queued", len),
        // The queue is gone and nothing will run again on this thread.
        Err(err) => trace!("dropping continuation during thread teardown: {}", err),
    }
}

/// Run the oldest queued continuation. Returns `false` if there was none.
pub fn run_once() -> bool {
    // The borrow ends before the continuation runs so it can queue more.
    let next = QUEUE.with(|queue| queue.borrow_mut().pop_front());
    match next {
        Some(continuation) => {
            continuation();
            true
        }
        None => false,
    }
}

/// Run continuations until the queue is empty, returning how many ran.
pub fn run_until_idle() -> usize {
    let mut ran = 0;
    while run_once() {
        ran += 1;
    }
    if ran > 0 {
        trace!("scheduler idle after {} continuations", ran);
    }
    ran
}

/// Number of continuations waiting to run.
pub fn pending() -> usize {
    QUEUE.with(|queue| queue.borrow().len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    #[test]
    fn test_runs_in_fifo_order() {
        let order = Rc::new(RefCell::new(vec![]));
        for i in 0..3 {
            let order = order.clone();
            defer(move || order.borrow_mut().push(i));
        }
        assert_eq!(pending(), 3);
        assert!(order.borrow().is_empty());
        assert_eq!(run_until_idle(), 3);
        assert_eq!(*order.borrow(), vec![0, 1, 2]);
    }

    #[test]
    fn test_continuations_queued_while_running_run_after() {
        let order = Rc::new(RefCell::new(vec![]));
        let outer = order.clone();
        defer(move || {
            let inner = outer.clone();
            defer(move || inner.borrow_mut().push("nested"));
            outer.borrow_mut().push("first");
        });
        let second = order.clone();
        defer(move || second.borrow_mut().push("second"));
        assert_eq!(run_until_idle(), 3);
        assert_eq!(*order.borrow(), vec!["first", "second", "nested"]);
    }

    #[test]
    fn test_run_once_on_empty_queue() {
        assert!(!run_once());
        assert_eq!(run_until_idle(), 0);
    }

    #[test]
    fn test_drained_from_inside_poll() {
        use futures::executor::block_on;
        use std::cell::Cell;

        let ran = Rc::new(Cell::new(false));
        let flag = ran.clone();
        defer(move || flag.set(true));
        let drained = block_on(async { run_until_idle() });
        assert_eq!(drained, 1);
        assert!(ran.get());
    }

    #[test]
    fn test_defer_during_teardown_is_dropped() {
        struct DeferOnDrop;

        impl Drop for DeferOnDrop {
            fn drop(&mut self) {
                defer(|| {});
            }
        }

        thread_local! {
            static LATE: RefCell<Option<DeferOnDrop>> = RefCell::new(None);
        }

        std::thread::spawn(|| {
            // Whichever order the destructors run in, defer must not panic.
            pending();
            LATE.with(|late| *late.borrow_mut() = Some(DeferOnDrop));
        })
        .join()
        .expect("The teardown thread has panicked");
    }
}
