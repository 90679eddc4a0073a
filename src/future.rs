use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};

use crate::shared::SharedState;
use crate::{Error, Failure, Outcome, Promise};

/// The consumer side of a promise/future pair.
///
/// A `Future` is either bound to a shared state (valid) or not (invalid: built
/// with `Default`, moved out with `std::mem::take`, or consumed). It cannot be
/// cloned. `get` and every combinator consume the handle, so a shared state
/// only ever has one observer.
///
/// # Examples
///
/// ```
/// use promise_future::Promise;
///
/// let (promise, future) = Promise::<String>::pair();
/// let length = future.then(|s| s.len());
/// promise.set_value("Hello!".into());
/// assert_eq!(length.get().unwrap(), 6);
/// ```
#[derive(Debug)]
pub struct Future<T> {
    state: Option<Arc<SharedState<T>>>,
}

impl<T> Future<T> {
    pub(crate) fn with_state(state: Arc<SharedState<T>>) -> Self {
        Future { state: Some(state) }
    }

    /// A future that is already completed with `outcome`.
    pub fn ready(outcome: Outcome<T>) -> Self {
        Self::with_state(Arc::new(SharedState::with_outcome(outcome)))
    }

    pub fn valid(&self) -> bool {
        self.state.is_some()
    }

    /// Whether the outcome is available. Always `false` on an invalid future.
    pub fn is_completed(&self) -> bool {
        self.state.as_ref().is_some_and(|state| state.is_completed())
    }

    /// Blocks until the promise is completed.
    pub fn wait(&self) -> Result<(), Error> {
        self.state.as_ref().ok_or(Error::BadFuture)?.wait();
        Ok(())
    }

    /// Blocks until the promise is completed or `timeout` elapses, whichever
    /// comes first.
    pub fn wait_for(&self, timeout: Duration) -> Result<(), Error> {
        let state = self.state.as_ref().ok_or(Error::BadFuture)?;
        if state.wait_for(timeout) {
            Ok(())
        } else {
            debug!("future still pending after {:?}", timeout);
            Err(Error::FutureTimeout(timeout))
        }
    }

    /// Blocks until the promise is completed and returns its value, or the
    /// captured failure as [`Error::Failed`].
    pub fn get(mut self) -> Result<T, Error> {
        let state = self.state.take().ok_or(Error::BadFuture)?;
        state.wait();
        state.take_outcome()?.get().map_err(Error::Failed)
    }
}

impl<T: Send + 'static> Future<T> {
    /// Maps the value with `f`. A failure upstream skips `f` and is passed on
    /// as is; a panic inside `f` fails the returned future.
    pub fn then<U, F>(self, f: F) -> Future<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        self.try_then(move |value| Ok::<U, Failure>(f(value)))
    }

    /// Like [`Future::then`], but an `Err` returned by `f` fails the returned
    /// future.
    pub fn try_then<U, E, F>(self, f: F) -> Future<U>
    where
        U: Send + 'static,
        E: Into<Failure> + 'static,
        F: FnOnce(T) -> Result<U, E> + Send + 'static,
    {
        self.chain(move |outcome, promise| match outcome {
            Outcome::Value(value) => match catch_panic(move || f(value)) {
                Outcome::Value(result) => promise.set_outcome(result.into()),
                Outcome::Failure(failure) => promise.set_failure(failure),
            },
            Outcome::Failure(failure) => promise.set_failure(failure),
        })
    }

    /// Continues with the future returned by `f`. The returned future
    /// completes with whatever that inner future completes with.
    pub fn next<U, F>(self, f: F) -> Future<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> Future<U> + Send + 'static,
    {
        self.try_next(move |value| Ok::<Future<U>, Failure>(f(value)))
    }

    pub fn try_next<U, E, F>(self, f: F) -> Future<U>
    where
        U: Send + 'static,
        E: Into<Failure> + 'static,
        F: FnOnce(T) -> Result<Future<U>, E> + Send + 'static,
    {
        self.chain(move |outcome, promise| match outcome {
            Outcome::Value(value) => match catch_panic(move || f(value)) {
                Outcome::Value(Ok(inner)) => inner.forward(promise),
                Outcome::Value(Err(error)) => promise.set_failure(error),
                Outcome::Failure(failure) => promise.set_failure(failure),
            },
            Outcome::Failure(failure) => promise.set_failure(failure),
        })
    }

    /// Turns a failure back into a value. Values pass through untouched.
    pub fn recover<F>(self, f: F) -> Future<T>
    where
        F: FnOnce(Failure) -> T + Send + 'static,
    {
        self.chain(move |outcome, promise| match outcome {
            Outcome::Value(value) => promise.set_value(value),
            Outcome::Failure(failure) => promise.set_outcome(catch_panic(move || f(failure))),
        })
    }

    /// Observes the outcome, whichever it is, and ends the chain.
    ///
    /// `f` runs exactly once: right away if the outcome is already there,
    /// otherwise on the thread that completes the promise. Panics in `f` are
    /// not caught.
    pub fn finally<F>(self, f: F)
    where
        F: FnOnce(Outcome<T>) + Send + 'static,
    {
        match self.state {
            Some(state) => {
                if let Err(err) = state.register(Box::new(f)) {
                    warn!("finally observer dropped: {}", err);
                }
            }
            None => warn!("finally called on an invalid future"),
        }
    }

    fn chain<U, F>(self, relay: F) -> Future<U>
    where
        U: Send + 'static,
        F: FnOnce(Outcome<T>, Promise<U>) + Send + 'static,
    {
        let Some(state) = self.state else {
            warn!("combinator called on an invalid future");
            return Future::default();
        };
        let (promise, future) = Promise::pair();
        // On failure the relay and its promise are dropped, which breaks the
        // returned future instead of leaving it pending.
        if let Err(err) = state.register(Box::new(move |outcome| relay(outcome, promise))) {
            warn!("continuation dropped: {}", err);
        }
        future
    }

    fn forward(self, promise: Promise<T>) {
        match self.state {
            Some(state) => {
                if let Err(err) = state.register(Box::new(move |outcome| promise.set_outcome(outcome))) {
                    warn!("inner future could not be chained: {}", err);
                }
            }
            None => promise.set_failure(Error::BadFuture),
        }
    }
}

impl<T> Default for Future<T> {
    /// An invalid future.
    fn default() -> Self {
        Future { state: None }
    }
}

/// A future already completed with `value`.
pub fn make_future_success<T>(value: T) -> Future<T> {
    Future::ready(Outcome::Value(value))
}

/// A future already failed with `failure`.
pub fn make_future_failure<T>(failure: impl Into<Failure>) -> Future<T> {
    Future::ready(Outcome::Failure(failure.into()))
}

fn catch_panic<U>(f: impl FnOnce() -> U) -> Outcome<U> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => Outcome::Value(value),
        Err(payload) => {
            let message = panic_message(&*payload);
            warn!("continuation panicked: {}", message);
            Outcome::Failure(Error::Panicked(message).into())
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        String::from("unknown panic")
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc::channel;
    use std::time::Duration;

    use super::{make_future_failure, make_future_success, Future};
    use crate::{Error, Failure, Promise};

    #[test]
    fn test_invalid_future() {
        let future = Future::<u8>::default();
        assert!(!future.valid());
        assert!(!future.is_completed());
        assert!(matches!(future.wait(), Err(Error::BadFuture)));
        assert!(matches!(future.wait_for(Duration::from_secs(1)), Err(Error::BadFuture)));
        assert!(matches!(future.get(), Err(Error::BadFuture)));
    }

    #[test]
    fn test_combinators_on_invalid_future() {
        let mapped = Future::<u8>::default().then(|v| v + 1);
        assert!(!mapped.valid());
        let (tx, rx) = channel::<()>();
        Future::<u8>::default().finally(move |_| tx.send(()).unwrap());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_panic_in_then_fails_the_future() {
        let future = make_future_success(1u8).then(|_| -> u8 { panic!("kaboom") });
        let err = future.get().unwrap_err();
        match err.downcast_ref::<Error>() {
            Some(Error::Panicked(message)) => assert_eq!(message, "kaboom"),
            other => panic!("unexpected failure: {:?}", other),
        }
    }

    #[test]
    fn test_try_then_err_fails_the_future() {
        let future = make_future_success(2u8).try_then(|_| Err::<u8, _>(Failure::msg("odd")));
        assert_eq!(future.get().unwrap_err().to_string(), "odd");
    }

    #[test]
    fn test_next_with_invalid_inner_future() {
        let future = make_future_success(2u8).next(|_| Future::<u8>::default());
        let err = future.get().unwrap_err();
        assert!(matches!(err.downcast_ref::<Error>(), Some(Error::BadFuture)));
    }

    #[test]
    fn test_recover() {
        let recovered = make_future_failure::<u8>(Failure::msg("lost")).recover(|_| 3);
        assert_eq!(recovered.get().unwrap(), 3);
        let untouched = make_future_success(5u8).recover(|_| 3);
        assert_eq!(untouched.get().unwrap(), 5);
    }

    #[test]
    fn test_panic_in_recover_fails_the_future() {
        let future = make_future_failure::<u8>(Failure::msg("lost")).recover(|_| panic!("still lost"));
        let err = future.get().unwrap_err();
        match err.downcast_ref::<Error>() {
            Some(Error::Panicked(message)) => assert_eq!(message, "still lost"),
            other => panic!("unexpected failure: {:?}", other),
        }
    }

    #[test]
    fn test_get_inside_continuation_sees_nested_chain() {
        let (outer, future) = Promise::<u8>::pair();
        let (tx, rx) = channel();
        future.finally(move |outcome| {
            let (inner, inner_future) = Promise::<u8>::pair();
            let doubled = inner_future.then(|v| v * 2);
            inner.set_value(outcome.get().unwrap());
            tx.send(doubled.get().unwrap()).unwrap();
        });
        outer.set_value(21);
        assert_eq!(rx.try_recv().unwrap(), 42);
    }

    #[test]
    fn test_broken_chain_reports_broken_promise() {
        let (promise, future) = Promise::<u8>::pair();
        let mapped = future.then(|v| v * 2);
        drop(promise);
        let err = mapped.get().unwrap_err();
        assert!(matches!(err.downcast_ref::<Error>(), Some(Error::BrokenPromise)));
    }
}
