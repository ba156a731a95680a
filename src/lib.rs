//! A single-threaded promise.
//!
//! A [`Promise`] starts out pending and settles exactly once, either
//! fulfilled with a value or rejected with a reason. Observers registered
//! with [`Promise::then`] (and its shorthands) never run synchronously: they
//! are queued on the thread-local [`scheduler`] and run when the host drains
//! it with [`scheduler::run_until_idle`], or when a [`Waiter`] is polled.
//!
//! # Examples
//!
//! ```
//! use promise_out::{scheduler, Promise};
//! use std::{cell::Cell, rc::Rc};
//!
//! let answer: Promise<i32, String> = Promise::new(|resolve, _reject| resolve.resolve(21));
//! let doubled = answer.and_then(|value: i32| Ok::<_, String>(value * 2));
//!
//! let seen = Rc::new(Cell::new(0));
//! let sink = seen.clone();
//! doubled.and_then(move |value: i32| {
//!     sink.set(value);
//!     Ok::<_, String>(())
//! });
//!
//! // Nothing has run yet.
//! assert_eq!(seen.get(), 0);
//! scheduler::run_until_idle();
//! assert_eq!(seen.get(), 42);
//! ```
//!
//! A rejected promise with no handler attached produces no observable
//! effect at all. Attach a [`Promise::catch`] wherever a failure matters.
mod combinators;
mod promise;
pub mod scheduler;
mod state;
mod waiter;

pub use promise::{IntoResolution, Promise, Reject, Resolution, Resolve};
pub use waiter::Waiter;

use thiserror::Error;

/// Reasons produced by the promise machinery itself.
///
/// Every reason type used with [`Promise`] must be constructible from this,
/// so that a panicking handler can be turned into a rejection.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("{0}")]
    Rejected(String),
    #[error("handler panicked: {0}")]
    Panicked(String),
    #[error("promise resolved with itself")]
    SelfResolution,
    #[error("promise abandoned before settling")]
    Abandoned,
}

impl From<&str> for Error {
    fn from(reason: &str) -> Self {
        Error::Rejected(reason.to_owned())
    }
}

impl From<String> for Error {
    fn from(reason: String) -> Self {
        Error::Rejected(reason)
    }
}

impl From<Error> for String {
    fn from(err: Error) -> Self {
        err.to_string()
    }
}

/// Callback handed to a [`Thenable`]; receives the eventual outcome.
pub type Settle<T, E> = Box<dyn FnOnce(Result<T, E>)>;

/// Anything a promise can adopt.
///
/// When a promise is resolved with a thenable it stays pending and takes on
/// whatever outcome the thenable eventually reports. [`Promise`] implements
/// this; other deferred values can too.
pub trait Thenable<T, E> {
    /// Report the outcome to `settle`, now or later. Calling it is optional:
    /// a thenable that drops `settle` leaves the adopting promise pending.
    fn on_settle(self: Box<Self>, settle: Settle<T, E>);
}
