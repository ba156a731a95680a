//! `resolve`, `reject`, `all` and `race`.
//!
//! These only use the public surface: an executor plus `then` on each input.
use crate::{Error, Promise};
use log::debug;
use std::{cell::Cell, cell::RefCell, rc::Rc};

/// Per-call bookkeeping for [`Promise::all`].
struct Tally<T> {
    results: Vec<Option<T>>,
    remaining: usize,
}

impl<T> Tally<T> {
    fn new(len: usize) -> Self {
        Tally {
            results: (0..len).map(|_| None).collect(),
            remaining: len,
        }
    }

    /// Store `value`; returns every value, in input order, once the last
    /// slot fills.
    fn record(&mut self, index: usize, value: T) -> Option<Vec<T>> {
        if self.results[index].replace(value).is_none() {
            self.remaining -= 1;
        }
        if self.remaining > 0 {
            return None;
        }
        self.results.iter_mut().map(Option::take).collect()
    }
}

impl<T, E> Promise<T, E>
where
    T: Clone + 'static,
    E: Clone + From<Error> + 'static,
{
    /// A promise fulfilled with `value`. Handlers still run on a later turn.
    pub fn resolve(value: T) -> Self {
        Promise::new(move |resolve, _| resolve.resolve(value))
    }

    /// A promise rejected with `reason`.
    pub fn reject(reason: E) -> Self {
        Promise::new(move |_, reject| reject.reject(reason))
    }

    /// Fulfils with every value, in input order, once all inputs fulfil.
    /// Rejects with the first rejection; later outcomes are ignored.
    ///
    /// An empty input fulfils with an empty `Vec`. Pass a single promise as
    /// `[p]` or `Some(p)`.
    pub fn all<I>(promises: I) -> Promise<Vec<T>, E>
    where
        I: IntoIterator<Item = Promise<T, E>>,
    {
        let promises: Vec<_> = promises.into_iter().collect();
        Promise::new(move |resolve, reject| {
            if promises.is_empty() {
                resolve.resolve(vec![]);
                return;
            }
            let tally = Rc::new(RefCell::new(Tally::new(promises.len())));
            for (index, promise) in promises.iter().enumerate() {
                let tally = tally.clone();
                let resolve = resolve.clone();
                let reject = reject.clone();
                promise.then(
                    move |value| {
                        let done = tally.borrow_mut().record(index, value);
                        if let Some(values) = done {
                            resolve.resolve(values);
                        }
                        Ok::<_, E>(())
                    },
                    move |reason| {
                        debug!("all: input {} rejected", index);
                        reject.reject(reason);
                        Ok::<_, E>(())
                    },
                );
            }
        })
    }

    /// Settles like whichever input settles first.
    ///
    /// An empty input never settles.
    pub fn race<I>(promises: I) -> Promise<T, E>
    where
        I: IntoIterator<Item = Promise<T, E>>,
    {
        let promises: Vec<_> = promises.into_iter().collect();
        Promise::new(move |resolve, reject| {
            let completed = Rc::new(Cell::new(false));
            for promise in &promises {
                let on_value = completed.clone();
                let on_reason = completed.clone();
                let resolve = resolve.clone();
                let reject = reject.clone();
                promise.then(
                    move |value| {
                        if !on_value.replace(true) {
                            resolve.resolve(value);
                        }
                        Ok::<_, E>(())
                    },
                    move |reason| {
                        if !on_reason.replace(true) {
                            reject.reject(reason);
                        }
                        Ok::<_, E>(())
                    },
                );
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::Tally;

    #[test]
    fn test_tally_completes_in_input_order() {
        let mut tally = Tally::new(3);
        assert_eq!(tally.record(2, "c"), None);
        assert_eq!(tally.record(0, "a"), None);
        assert_eq!(tally.record(1, "b"), Some(vec!["a", "b", "c"]));
    }

    #[test]
    fn test_tally_ignores_repeat_index() {
        let mut tally = Tally::new(2);
        assert_eq!(tally.record(0, 1), None);
        assert_eq!(tally.record(0, 2), None);
        assert_eq!(tally.record(1, 3), Some(vec![2, 3]));
    }
}
