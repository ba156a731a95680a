use crate::scheduler;
use log::{debug, warn};
use std::{
    any::Any,
    cell::{Cell, RefCell},
    fmt,
    mem,
    rc::Rc,
    task::Waker,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Status {
    Pending,
    Fulfilled,
    Rejected,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Pending => f.write_str("pending"),
            Status::Fulfilled => f.write_str("fulfilled"),
            Status::Rejected => f.write_str("rejected"),
        }
    }
}

/// Continuation registered by `then`; invoked once with the outcome.
pub(crate) type Reaction<T, E> = Box<dyn FnOnce(Result<T, E>)>;

pub(crate) type Shared<T, E> = Rc<RefCell<State<T, E>>>;

pub(crate) struct State<T, E> {
    status: Status,
    outcome: Option<Result<T, E>>,
    reactions: Vec<Reaction<T, E>>,
    /// Set by the first call through a public resolver.
    locked: bool,
    /// Every resolver is gone while still pending.
    abandoned: bool,
    wakers: Vec<Waker>,
}

impl<T, E> State<T, E> {
    pub(crate) fn new() -> Self {
        State {
            status: Status::Pending,
            outcome: None,
            reactions: vec![],
            locked: false,
            abandoned: false,
            wakers: vec![],
        }
    }

    pub(crate) fn status(&self) -> Status {
        self.status
    }

    /// Returns `true` for the first caller only.
    pub(crate) fn lock(&mut self) -> bool {
        !mem::replace(&mut self.locked, true)
    }

    pub(crate) fn is_abandoned(&self) -> bool {
        self.abandoned
    }

    pub(crate) fn watch(&mut self, waker: &Waker) {
        if !self.wakers.iter().any(|w| w.will_wake(waker)) {
            self.wakers.push(waker.clone());
        }
    }
}

/// Move `state` out of `Pending` and queue every registered reaction.
/// A no-op once the state has settled.
pub(crate) fn settle<T, E>(state: &Shared<T, E>, outcome: Result<T, E>)
where
    T: Clone + 'static,
    E: Clone + 'static,
{
    let reactions = {
        let mut state = state.borrow_mut();
        if state.status != Status::Pending {
            debug!("ignoring settlement of {} promise", state.status);
            return;
        }
        state.status = match outcome {
            Ok(_) => Status::Fulfilled,
            Err(_) => Status::Rejected,
        };
        state.outcome = Some(outcome.clone());
        debug!(
            "promise {} with {} reactions",
            state.status,
            state.reactions.len()
        );
        (mem::take(&mut state.reactions), mem::take(&mut state.wakers))
    };
    let (reactions, wakers) = reactions;
    for reaction in reactions {
        let outcome = outcome.clone();
        scheduler::defer(move || reaction(outcome));
    }
    // A waiter polled in the same task as this call has no other way to
    // learn that its reaction is now queued.
    for waker in wakers {
        waker.wake();
    }
}

/// Register `reaction`. If the state already settled, delivery is queued
/// right away; it still runs on a later turn.
pub(crate) fn subscribe<T, E>(state: &Shared<T, E>, reaction: Reaction<T, E>)
where
    T: Clone + 'static,
    E: Clone + 'static,
{
    let mut guard = state.borrow_mut();
    if let Some(outcome) = guard.outcome.clone() {
        drop(guard);
        scheduler::defer(move || reaction(outcome));
    } else if guard.abandoned {
        // Never fires. Dropped outside the borrow since it may own resolvers.
        drop(guard);
        bury(Box::new(reaction));
    } else {
        guard.reactions.push(reaction);
    }
}

/// Called when the last resolver of a pending state goes away.
pub(crate) fn abandon<T: 'static, E: 'static>(state: &Shared<T, E>) {
    let Ok(mut guard) = state.try_borrow_mut() else {
        return;
    };
    if guard.status != Status::Pending {
        return;
    }
    guard.abandoned = true;
    let reactions = mem::take(&mut guard.reactions);
    let wakers = mem::take(&mut guard.wakers);
    drop(guard);
    warn!(
        "promise abandoned while pending, dropping {} reactions",
        reactions.len()
    );
    for waker in wakers {
        waker.wake();
    }
    bury(Box::new(reactions));
}

thread_local! {
    static GRAVEYARD: RefCell<Vec<Box<dyn Any>>> = RefCell::new(vec![]);
    static BURYING: Cell<bool> = Cell::new(false);
}

/// Drop `dead` without recursing.
///
/// Dropping reactions can drop the resolvers of derived promises, which
/// abandons them in turn. Only the outermost call drops anything; nested
/// calls queue onto the graveyard, so a long chain unwinds in a loop.
fn bury(dead: Box<dyn Any>) {
    let queued = GRAVEYARD.try_with(|graveyard| graveyard.borrow_mut().push(dead));
    if queued.is_err() {
        // Thread teardown; the value was dropped with the closure.
        return;
    }
    // Nested call, or teardown: the outer loop or the graveyard's own
    // destructor drops it.
    if !matches!(BURYING.try_with(|burying| burying.replace(true)), Ok(false)) {
        return;
    }
    let mut buried = 0usize;
    while let Some(next) = GRAVEYARD.with(|graveyard| graveyard.borrow_mut().pop()) {
        drop(next);
        buried += 1;
    }
    BURYING.with(|burying| burying.set(false));
    debug!("dropped {} abandoned reaction lists", buried);
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::task::ArcWake;
    use std::sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    };

    fn shared() -> Shared<i32, String> {
        Rc::new(RefCell::new(State::new()))
    }

    #[test]
    fn test_settles_only_once() {
        let state = shared();
        let seen = Rc::new(RefCell::new(vec![]));
        let sink = seen.clone();
        subscribe(
            &state,
            Box::new(move |outcome: Result<i32, String>| sink.borrow_mut().push(outcome)),
        );
        settle(&state, Ok(1));
        settle(&state, Err("late".into()));
        settle(&state, Ok(2));
        assert_eq!(state.borrow().status(), Status::Fulfilled);
        assert!(seen.borrow().is_empty());
        scheduler::run_until_idle();
        assert_eq!(*seen.borrow(), vec![Ok(1)]);
    }

    #[test]
    fn test_late_subscriber_still_deferred() {
        let state = shared();
        settle(&state, Err("no".into()));
        let seen = Rc::new(Cell::new(false));
        let sink = seen.clone();
        subscribe(
            &state,
            Box::new(move |outcome: Result<i32, String>| {
                sink.set(outcome == Err("no".to_owned()))
            }),
        );
        assert!(!seen.get());
        scheduler::run_until_idle();
        assert!(seen.get());
    }

    #[test]
    fn test_reactions_fire_in_registration_order() {
        let state = shared();
        let order = Rc::new(RefCell::new(vec![]));
        for i in 0..3 {
            let order = order.clone();
            subscribe(&state, Box::new(move |_| order.borrow_mut().push(i)));
        }
        settle(&state, Ok(7));
        scheduler::run_until_idle();
        assert_eq!(*order.borrow(), vec![0, 1, 2]);
    }

    #[test]
    fn test_lock_is_first_come() {
        let state = shared();
        assert!(state.borrow_mut().lock());
        assert!(!state.borrow_mut().lock());
    }

    #[test]
    fn test_abandon_drops_reactions() {
        let state = shared();
        let fired = Rc::new(Cell::new(false));
        let sink = fired.clone();
        subscribe(&state, Box::new(move |_| sink.set(true)));
        abandon(&state);
        assert!(state.borrow().is_abandoned());
        settle(&state, Ok(1));
        scheduler::run_until_idle();
        // Settling after abandonment has no one left to notify.
        assert!(!fired.get());
    }

    struct Flag(AtomicBool);

    impl ArcWake for Flag {
        fn wake_by_ref(arc_self: &Arc<Self>) {
            arc_self.0.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_settle_wakes_watchers() {
        let state = shared();
        let flag = Arc::new(Flag(AtomicBool::new(false)));
        state.borrow_mut().watch(&futures::task::waker(flag.clone()));
        settle(&state, Ok(1));
        assert!(flag.0.load(Ordering::SeqCst));
        scheduler::run_until_idle();
    }

    #[test]
    fn test_abandon_long_chain_unwinds_iteratively() {
        let root = shared();
        let mut link = root.clone();
        for _ in 0..20_000 {
            let next = shared();
            let capability = Guard(next.clone());
            subscribe(&link, Box::new(move |_| drop(capability)));
            link = next;
        }
        drop(link);
        abandon(&root);
        assert!(root.borrow().is_abandoned());
    }

    /// Abandons its state when dropped, like a promise's last resolver.
    struct Guard(Shared<i32, String>);

    impl Drop for Guard {
        fn drop(&mut self) {
            abandon(&self.0)
        }
    }
}
