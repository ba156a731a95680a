use crate::{
    scheduler,
    state::{self, Shared, State},
    Error, Settle, Thenable,
};
use log::{debug, warn};
use std::{
    any::Any,
    cell::RefCell,
    fmt,
    panic::{self, AssertUnwindSafe},
    rc::Rc,
};

/// A value that settles once, some time later.
///
/// Cloning a `Promise` clones the handle, not the value: every clone observes
/// the same settlement.
pub struct Promise<T, E = Error> {
    pub(crate) state: Shared<T, E>,
}

impl<T, E> Clone for Promise<T, E> {
    fn clone(&self) -> Self {
        Promise {
            state: self.state.clone(),
        }
    }
}

impl<T, E> fmt::Debug for Promise<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise")
            .field("status", &self.state.borrow().status())
            .finish()
    }
}

/// Owned by every resolver of one promise. When the last one is dropped
/// while the promise is still pending, the promise is abandoned.
struct Capability<T: 'static, E: 'static> {
    state: Shared<T, E>,
}

impl<T, E> Capability<T, E>
where
    T: Clone + 'static,
    E: Clone + From<Error> + 'static,
{
    fn lock(&self) -> bool {
        self.state.borrow_mut().lock()
    }

    fn settle(&self, outcome: Result<T, E>) {
        state::settle(&self.state, outcome)
    }
}

impl<T: 'static, E: 'static> Drop for Capability<T, E> {
    fn drop(&mut self) {
        state::abandon(&self.state)
    }
}

/// The success half of a promise's executor capabilities.
pub struct Resolve<T: 'static, E: 'static = Error> {
    capability: Rc<Capability<T, E>>,
}

/// The failure half of a promise's executor capabilities.
pub struct Reject<T: 'static, E: 'static = Error> {
    capability: Rc<Capability<T, E>>,
}

impl<T: 'static, E: 'static> Clone for Resolve<T, E> {
    fn clone(&self) -> Self {
        Resolve {
            capability: self.capability.clone(),
        }
    }
}

impl<T: 'static, E: 'static> Clone for Reject<T, E> {
    fn clone(&self) -> Self {
        Reject {
            capability: self.capability.clone(),
        }
    }
}

impl<T, E> Resolve<T, E>
where
    T: Clone + 'static,
    E: Clone + From<Error> + 'static,
{
    /// Fulfil the promise with `value`. Ignored if either this or the
    /// matching [`Reject`] was already used.
    pub fn resolve(&self, value: T) {
        self.resolve_with(Resolution::Value(value))
    }

    /// Resolve with anything that can become an outcome. A [`Promise`] or
    /// other [`Thenable`] is adopted: this promise stays pending and later
    /// takes on its outcome.
    pub fn resolve_with<R>(&self, resolution: R)
    where
        R: IntoResolution<Value = T, Reason = E>,
    {
        if !self.capability.lock() {
            debug!("ignoring resolve on an already resolved promise");
            return;
        }
        run_resolution(&self.capability, resolution.into_resolution())
    }
}

impl<T, E> Reject<T, E>
where
    T: Clone + 'static,
    E: Clone + From<Error> + 'static,
{
    /// Reject the promise with `reason`. Ignored if either this or the
    /// matching [`Resolve`] was already used.
    pub fn reject(&self, reason: E) {
        if !self.capability.lock() {
            debug!("ignoring reject on an already resolved promise");
            return;
        }
        self.capability.settle(Err(reason))
    }
}

/// What a promise is resolved with.
pub enum Resolution<T, E> {
    Value(T),
    Rejected(E),
    Promise(Promise<T, E>),
    Thenable(Box<dyn Thenable<T, E>>),
}

impl<T, E> Resolution<T, E> {
    pub fn thenable<H>(thenable: H) -> Self
    where
        H: Thenable<T, E> + 'static,
    {
        Resolution::Thenable(Box::new(thenable))
    }
}

/// Conversion into a [`Resolution`]. Handlers passed to [`Promise::then`]
/// return one of these: a `Result` settles the derived promise, a
/// `Promise` is adopted.
pub trait IntoResolution {
    type Value;
    type Reason;

    fn into_resolution(self) -> Resolution<Self::Value, Self::Reason>;
}

impl<T, E> IntoResolution for Resolution<T, E> {
    type Value = T;
    type Reason = E;

    fn into_resolution(self) -> Resolution<T, E> {
        self
    }
}

impl<T, E> IntoResolution for Result<T, E> {
    type Value = T;
    type Reason = E;

    fn into_resolution(self) -> Resolution<T, E> {
        match self {
            Ok(value) => Resolution::Value(value),
            Err(reason) => Resolution::Rejected(reason),
        }
    }
}

impl<T, E> IntoResolution for Promise<T, E> {
    type Value = T;
    type Reason = E;

    fn into_resolution(self) -> Resolution<T, E> {
        Resolution::Promise(self)
    }
}

impl<T, E> From<Promise<T, E>> for Resolution<T, E> {
    fn from(promise: Promise<T, E>) -> Self {
        Resolution::Promise(promise)
    }
}

impl<T, E> Thenable<T, E> for Promise<T, E>
where
    T: Clone + 'static,
    E: Clone + 'static,
{
    fn on_settle(self: Box<Self>, settle: Settle<T, E>) {
        state::subscribe(&self.state, settle)
    }
}

/// Settle through `capability`, adopting thenables on a later turn.
fn run_resolution<T, E>(capability: &Rc<Capability<T, E>>, resolution: Resolution<T, E>)
where
    T: Clone + 'static,
    E: Clone + From<Error> + 'static,
{
    match resolution {
        Resolution::Value(value) => capability.settle(Ok(value)),
        Resolution::Rejected(reason) => capability.settle(Err(reason)),
        Resolution::Promise(inner) if Rc::ptr_eq(&inner.state, &capability.state) => {
            capability.settle(Err(E::from(Error::SelfResolution)))
        }
        Resolution::Promise(inner) => adopt(capability.clone(), Box::new(inner)),
        Resolution::Thenable(thenable) => adopt(capability.clone(), thenable),
    }
}

fn adopt<T, E>(capability: Rc<Capability<T, E>>, thenable: Box<dyn Thenable<T, E>>)
where
    T: Clone + 'static,
    E: Clone + From<Error> + 'static,
{
    scheduler::defer(move || {
        let fallback = capability.clone();
        let subscribed = panic::catch_unwind(AssertUnwindSafe(move || {
            thenable.on_settle(Box::new(move |outcome| capability.settle(outcome)))
        }));
        if let Err(payload) = subscribed {
            fallback.settle(Err(E::from(Error::Panicked(panic_message(&*payload)))));
        }
    });
}

/// Run a handler, turning a panic into a rejection.
fn capture<U, E, F>(handler: F) -> Resolution<U, E>
where
    E: From<Error>,
    F: FnOnce() -> Resolution<U, E>,
{
    panic::catch_unwind(AssertUnwindSafe(handler)).unwrap_or_else(|payload| {
        let message = panic_message(&*payload);
        warn!("captured panic in promise handler: {}", message);
        Resolution::Rejected(E::from(Error::Panicked(message)))
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_owned()
    }
}

impl<T, E> Promise<T, E>
where
    T: Clone + 'static,
    E: Clone + From<Error> + 'static,
{
    /// Create a promise and run `executor` right away with its resolvers.
    ///
    /// A panic inside `executor` rejects the promise unless it was already
    /// resolved.
    pub fn new<F>(executor: F) -> Self
    where
        F: FnOnce(Resolve<T, E>, Reject<T, E>),
    {
        let (promise, capability) = Self::pending();
        let reject = Reject {
            capability: capability.clone(),
        };
        let resolve = Resolve {
            capability: capability.clone(),
        };
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(move || {
            executor(resolve, Reject { capability })
        })) {
            let message = panic_message(&*payload);
            warn!("captured panic in promise executor: {}", message);
            reject.reject(E::from(Error::Panicked(message)));
        }
        promise
    }

    fn pending() -> (Self, Rc<Capability<T, E>>) {
        let state = Rc::new(RefCell::new(State::new()));
        let capability = Rc::new(Capability {
            state: state.clone(),
        });
        (Promise { state }, capability)
    }

    /// Register both handlers and return the promise of their result.
    ///
    /// Exactly one handler runs, on a later turn, after this promise
    /// settles. Whatever it returns resolves the derived promise; returning
    /// a promise makes the derived promise follow it. A handler that panics
    /// rejects the derived promise with [`Error::Panicked`].
    pub fn then<U, F, G, R1, R2>(&self, on_fulfilled: F, on_rejected: G) -> Promise<U, E>
    where
        U: Clone + 'static,
        F: FnOnce(T) -> R1 + 'static,
        G: FnOnce(E) -> R2 + 'static,
        R1: IntoResolution<Value = U, Reason = E>,
        R2: IntoResolution<Value = U, Reason = E>,
    {
        self.chain(move |outcome| match outcome {
            Ok(value) => on_fulfilled(value).into_resolution(),
            Err(reason) => on_rejected(reason).into_resolution(),
        })
    }

    /// [`then`](Self::then) without a failure handler: a rejection passes
    /// through to the derived promise unchanged.
    pub fn and_then<U, F, R>(&self, on_fulfilled: F) -> Promise<U, E>
    where
        U: Clone + 'static,
        F: FnOnce(T) -> R + 'static,
        R: IntoResolution<Value = U, Reason = E>,
    {
        self.then(on_fulfilled, Resolution::Rejected)
    }

    /// [`then`](Self::then) without a success handler: a value passes
    /// through to the derived promise unchanged.
    pub fn catch<G, R>(&self, on_rejected: G) -> Promise<T, E>
    where
        G: FnOnce(E) -> R + 'static,
        R: IntoResolution<Value = T, Reason = E>,
    {
        self.then(Resolution::Value, on_rejected)
    }

    /// [`then`](Self::then) with neither handler. The derived promise
    /// settles exactly like this one.
    pub fn derive(&self) -> Promise<T, E> {
        self.then(Resolution::Value, Resolution::Rejected)
    }

    /// Run `callback` on either outcome, then pass the outcome through.
    pub fn finally<F>(&self, callback: F) -> Promise<T, E>
    where
        F: FnOnce() + 'static,
    {
        self.chain(move |outcome| {
            callback();
            outcome.into_resolution()
        })
    }

    fn chain<U, F>(&self, handler: F) -> Promise<U, E>
    where
        U: Clone + 'static,
        F: FnOnce(Result<T, E>) -> Resolution<U, E> + 'static,
    {
        let (derived, capability) = Promise::<U, E>::pending();
        state::subscribe(
            &self.state,
            Box::new(move |outcome| {
                let resolution = capture(move || handler(outcome));
                run_resolution(&capability, resolution)
            }),
        );
        derived
    }
}
