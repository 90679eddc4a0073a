//! One-shot promise/future pairs for threads.
//!
//! A [`Promise`] writes a single [`Outcome`] exactly once, a [`Future`]
//! retrieves it: blocking with [`Future::get`], [`Future::wait`] and
//! [`Future::wait_for`], or composing with [`Future::then`],
//! [`Future::next`] and [`Future::finally`]. Futures are move-only and every
//! combinator consumes its receiver, so each outcome has a single consumer.
//!
//! ```
//! use promise_future::{make_future_success, Promise};
//! use std::thread;
//!
//! let mut promise = Promise::<String>::new();
//! let length = promise
//!     .get_future()
//!     .unwrap()
//!     .next(|s| make_future_success(s.len()));
//! thread::spawn(move || promise.set_value("Hello!".into()));
//! assert_eq!(length.get().unwrap(), 6);
//! ```
use std::error::Error as StdError;
use std::time::Duration;

mod completion;
mod future;
mod outcome;
mod promise;
mod shared;

pub use completion::Completion;
pub use future::{make_future_failure, make_future_success, Future};
pub use outcome::{Failure, Outcome};
pub use promise::Promise;

#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// Returned directly by operations on an invalid future. When `next`
    /// chains to an invalid inner future it arrives as a failure instead.
    #[error("future is not bound to a promise")]
    BadFuture,
    #[error("future did not complete within {0:?}")]
    FutureTimeout(Duration),
    #[error("future already retrieved from this promise")]
    FutureAlreadyRetrieved,
    #[error("promise already satisfied")]
    PromiseAlreadySatisfied,
    #[error("a continuation is already registered")]
    ContinuationAlreadySet,
    #[error("outcome already retrieved")]
    OutcomeRetrieved,
    /// Delivered as a failure, so `get` reports it wrapped in
    /// [`Error::Failed`]; look for it with [`Error::downcast_ref`].
    ///
    /// ```
    /// use promise_future::{Error, Promise};
    ///
    /// let (promise, future) = Promise::<u8>::pair();
    /// drop(promise);
    /// let err = future.get().unwrap_err();
    /// assert!(matches!(err.downcast_ref::<Error>(), Some(Error::BrokenPromise)));
    /// ```
    #[error("promise dropped before completion")]
    BrokenPromise,
    /// Delivered as a failure, like [`Error::BrokenPromise`].
    #[error("continuation panicked: {0}")]
    Panicked(String),
    #[error("{0}")]
    Failed(Failure),
}

impl Error {
    /// The captured failure, if this is [`Error::Failed`].
    pub fn failure(&self) -> Option<&Failure> {
        match self {
            Error::Failed(failure) => Some(failure),
            _ => None,
        }
    }

    /// Looks inside the captured failure for an error of type `E`.
    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        self.failure().and_then(|failure| failure.downcast_ref::<E>())
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::FutureTimeout(_))
    }
}
