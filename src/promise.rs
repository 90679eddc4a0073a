use std::sync::Arc;

use log::warn;

use crate::shared::SharedState;
use crate::{Error, Failure, Future, Outcome};

/// The producer side of a promise/future pair.
///
/// A `Promise` is completed at most once: every completion method consumes
/// it. Dropping a promise that was never completed fails its future with
/// [`Error::BrokenPromise`] so that nobody waits forever.
///
/// # Examples
///
/// ```
/// use promise_future::Promise;
/// use std::thread;
///
/// let mut promise = Promise::<String>::new();
/// let future = promise.get_future().unwrap();
/// let producer = thread::spawn(move || promise.set_value("Hi".into()));
/// assert_eq!(future.get().unwrap(), "Hi");
/// producer.join().expect("The producer thread has panicked.");
/// ```
#[derive(Debug)]
pub struct Promise<T: 'static> {
    state: Option<Arc<SharedState<T>>>,
    future_retrieved: bool,
}

impl<T: 'static> Promise<T> {
    pub fn new() -> Self {
        Promise {
            state: Some(Arc::new(SharedState::new())),
            future_retrieved: false,
        }
    }

    /// A fresh promise together with its future.
    pub fn pair() -> (Self, Future<T>) {
        let state = Arc::new(SharedState::new());
        let future = Future::with_state(state.clone());
        (
            Promise {
                state: Some(state),
                future_retrieved: true,
            },
            future,
        )
    }

    /// Hands out the future bound to this promise. Only the first call
    /// succeeds, later ones fail with [`Error::FutureAlreadyRetrieved`].
    pub fn get_future(&mut self) -> Result<Future<T>, Error> {
        if self.future_retrieved {
            return Err(Error::FutureAlreadyRetrieved);
        }
        let state = self.state.as_ref().ok_or(Error::PromiseAlreadySatisfied)?;
        self.future_retrieved = true;
        Ok(Future::with_state(state.clone()))
    }

    pub fn set_value(self, value: T) {
        self.set_outcome(Outcome::Value(value))
    }

    pub fn set_failure(self, failure: impl Into<Failure>) {
        self.set_outcome(Outcome::Failure(failure.into()))
    }

    pub fn set_outcome(mut self, outcome: Outcome<T>) {
        if let Some(state) = self.state.take() {
            // A rejected completion is already reported by the shared state.
            let _ = state.complete(outcome);
        }
    }
}

impl<T: 'static> Default for Promise<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> Drop for Promise<T> {
    /// If this is an uncompleted promise, fail the future.
    fn drop(&mut self) {
        if let Some(state) = self.state.take() {
            if self.future_retrieved {
                warn!("promise dropped before completion, failing its future");
            }
            let _ = state.complete(Outcome::Failure(Error::BrokenPromise.into()));
        }
    }
}
