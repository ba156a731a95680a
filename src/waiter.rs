//! `std::future::Future` adapter for [`Promise`].
use crate::{scheduler, state, Error, Promise};
use std::{
    cell::RefCell,
    future::Future,
    pin::Pin,
    rc::Rc,
    task::{Context, Poll, Waker},
};

/// Resolves to the outcome of a [`Promise`].
///
/// Polling first drains the [`scheduler`], so any executor can drive it.
/// If the promise is abandoned (every resolver dropped before it settled)
/// the waiter yields `Err(Error::Abandoned.into())` instead of hanging.
///
/// # Examples
///
/// ```
/// use promise_out::Promise;
/// use futures::executor::block_on;
///
/// let promise: Promise<&str, String> = Promise::new(|resolve, _| resolve.resolve("🍓"));
/// assert_eq!(block_on(promise.waiter()), Ok("🍓"));
/// ```
#[derive(Debug)]
pub struct Waiter<T, E = Error> {
    promise: Promise<T, E>,
    slot: Rc<RefCell<Slot<T, E>>>,
}

#[derive(Debug)]
struct Slot<T, E> {
    outcome: Option<Result<T, E>>,
    waker: Option<Waker>,
}

impl<T, E> Promise<T, E>
where
    T: Clone + 'static,
    E: Clone + From<Error> + 'static,
{
    /// Subscribe a [`Waiter`] to this promise.
    pub fn waiter(&self) -> Waiter<T, E> {
        let slot = Rc::new(RefCell::new(Slot {
            outcome: None,
            waker: None,
        }));
        let sink = slot.clone();
        state::subscribe(
            &self.state,
            Box::new(move |outcome| {
                let mut slot = sink.borrow_mut();
                slot.outcome = Some(outcome);
                if let Some(waker) = slot.waker.take() {
                    waker.wake()
                }
            }),
        );
        Waiter {
            promise: self.clone(),
            slot,
        }
    }
}

impl<T, E> Future for Waiter<T, E>
where
    E: From<Error>,
{
    type Output = Result<T, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        scheduler::run_until_idle();
        let mut slot = self.slot.borrow_mut();
        if let Some(outcome) = slot.outcome.take() {
            return Poll::Ready(outcome);
        }
        let mut state = self.promise.state.borrow_mut();
        if state.is_abandoned() {
            return Poll::Ready(Err(E::from(Error::Abandoned)));
        }
        slot.waker = Some(cx.waker().clone());
        state.watch(cx.waker());
        Poll::Pending
    }
}
