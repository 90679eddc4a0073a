use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

use log::{error, trace};
use parking_lot::{Condvar, Mutex};

use crate::{Error, Outcome};

/// Deferred work run once with the outcome of a shared state.
pub(crate) type Continuation<T> = Box<dyn FnOnce(Outcome<T>) + Send + 'static>;

/// The one-shot cell shared by a `Promise` and the `Future` descending from it.
///
/// The completion flag, the outcome slot and the continuation slot are all
/// guarded by `inner`. Waiters block on `completed` until the flag flips.
pub(crate) struct SharedState<T> {
    inner: Mutex<Inner<T>>,
    completed: Condvar,
}

struct Inner<T> {
    completed: bool,
    outcome: Option<Outcome<T>>,
    continuation: Option<Continuation<T>>,
}

type Job = Box<dyn FnOnce()>;

thread_local! {
    /// Continuations waiting for the outermost `dispatch` on this thread.
    static PENDING: RefCell<Option<VecDeque<Job>>> = const { RefCell::new(None) };
}

/// Runs `job` on the calling thread. A job dispatched while another one is
/// running here is queued instead, and the outermost call drains the queue,
/// so a chain of continuations never grows the stack.
fn dispatch(job: Job) {
    let first = PENDING.with(|pending| {
        let mut pending = pending.borrow_mut();
        match pending.as_mut() {
            Some(queue) => {
                queue.push_back(job);
                None
            }
            None => {
                *pending = Some(VecDeque::new());
                Some(job)
            }
        }
    });
    let Some(mut job) = first else {
        return;
    };

    let _drain = Drain;
    loop {
        job();
        match PENDING.with(|pending| pending.borrow_mut().as_mut().and_then(VecDeque::pop_front)) {
            Some(next) => job = next,
            None => break,
        }
    }
}

/// Runs continuations queued on this thread until `done` holds or the queue
/// is empty. A wait inside a continuation may depend on work that is still
/// queued behind it.
fn run_queued_until(done: impl Fn() -> bool) {
    while !done() {
        match PENDING.with(|pending| pending.borrow_mut().as_mut().and_then(VecDeque::pop_front)) {
            Some(job) => job(),
            None => break,
        }
    }
}

/// Closes the queue when the outermost dispatch returns or unwinds.
struct Drain;

impl Drop for Drain {
    fn drop(&mut self) {
        let leftover = PENDING.with(|pending| pending.borrow_mut().take());
        // Dropped outside the borrow: queued jobs own promises whose drop
        // dispatches again.
        drop(leftover);
    }
}

impl<T> SharedState<T> {
    pub fn new() -> Self {
        SharedState {
            inner: Mutex::new(Inner {
                completed: false,
                outcome: None,
                continuation: None,
            }),
            completed: Condvar::new(),
        }
    }

    pub fn with_outcome(outcome: Outcome<T>) -> Self {
        SharedState {
            inner: Mutex::new(Inner {
                completed: true,
                outcome: Some(outcome),
                continuation: None,
            }),
            completed: Condvar::new(),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.inner.lock().completed
    }

    pub fn wait(&self) {
        run_queued_until(|| self.is_completed());
        let mut inner = self.inner.lock();
        while !inner.completed {
            self.completed.wait(&mut inner);
        }
    }

    /// Returns whether the state completed before `timeout` elapsed.
    pub fn wait_for(&self, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        run_queued_until(|| self.is_completed());
        let mut inner = self.inner.lock();
        while !inner.completed {
            match deadline {
                Some(deadline) => {
                    if self.completed.wait_until(&mut inner, deadline).timed_out() {
                        return inner.completed;
                    }
                }
                // Too far in the future to represent: no deadline at all.
                None => self.completed.wait(&mut inner),
            }
        }
        true
    }

    /// Moves the outcome out. Only valid once the state completed.
    pub fn take_outcome(&self) -> Result<Outcome<T>, Error> {
        let mut inner = self.inner.lock();
        debug_assert!(inner.completed, "outcome taken before completion");
        inner.outcome.take().ok_or(Error::OutcomeRetrieved)
    }
}

impl<T: 'static> SharedState<T> {
    /// Writes the outcome. Wakes every waiter and, if a continuation is
    /// registered, runs it on this thread once the lock is released. Called
    /// from inside another continuation, it runs right after that one returns.
    pub fn complete(&self, outcome: Outcome<T>) -> Result<(), Error> {
        let mut inner = self.inner.lock();
        if inner.completed {
            error!("rejected completion of an already completed shared state");
            return Err(Error::PromiseAlreadySatisfied);
        }
        inner.completed = true;
        match inner.continuation.take() {
            None => {
                inner.outcome = Some(outcome);
                self.completed.notify_all();
                trace!("shared state completed, outcome stored");
            }
            Some(continuation) => {
                self.completed.notify_all();
                drop(inner);
                trace!("shared state completed, running continuation");
                dispatch(Box::new(move || continuation(outcome)));
            }
        }
        Ok(())
    }

    /// Stores `continuation`, or runs it right away on the calling thread
    /// when the state already completed.
    pub fn register(&self, continuation: Continuation<T>) -> Result<(), Error> {
        let mut inner = self.inner.lock();
        if inner.continuation.is_some() {
            return Err(Error::ContinuationAlreadySet);
        }
        if !inner.completed {
            inner.continuation = Some(continuation);
            return Ok(());
        }
        let outcome = inner.outcome.take().ok_or(Error::OutcomeRetrieved)?;
        drop(inner);

        trace!("shared state already completed, running continuation inline");
        continuation(outcome);
        Ok(())
    }
}

impl<T> fmt::Debug for SharedState<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("SharedState")
            .field("completed", &inner.completed)
            .field("has_outcome", &inner.outcome.is_some())
            .field("has_continuation", &inner.continuation.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{mpsc::channel, Arc};
    use std::thread;
    use std::time::Duration;

    use super::SharedState;
    use crate::{Error, Failure, Outcome};

    #[test]
    fn test_complete_then_take() {
        let state = SharedState::new();
        assert!(!state.is_completed());
        state.complete(Outcome::Value(1)).unwrap();
        assert!(state.is_completed());
        assert_eq!(state.take_outcome().unwrap().get().unwrap(), 1);
        assert!(matches!(state.take_outcome(), Err(Error::OutcomeRetrieved)));
    }

    #[test]
    fn test_second_completion_is_rejected() {
        let state = SharedState::new();
        state.complete(Outcome::Value("first")).unwrap();
        let second = state.complete(Outcome::Value("second"));
        assert!(matches!(second, Err(Error::PromiseAlreadySatisfied)));
        assert_eq!(state.take_outcome().unwrap().get().unwrap(), "first");
    }

    #[test]
    fn test_continuation_registered_before_completion() {
        let state = SharedState::new();
        let (tx, rx) = channel();
        state
            .register(Box::new(move |outcome: Outcome<u8>| {
                tx.send(outcome.get().unwrap()).unwrap();
            }))
            .unwrap();
        assert!(rx.try_recv().is_err());
        state.complete(Outcome::Value(9)).unwrap();
        assert_eq!(rx.try_recv().unwrap(), 9);
    }

    #[test]
    fn test_continuation_registered_after_completion() {
        let state = SharedState::with_outcome(Outcome::<u8>::Failure(Failure::msg("nope")));
        let (tx, rx) = channel();
        state
            .register(Box::new(move |outcome: Outcome<u8>| {
                tx.send(outcome.is_failure()).unwrap();
            }))
            .unwrap();
        assert!(rx.try_recv().unwrap());
    }

    #[test]
    fn test_second_continuation_is_rejected() {
        let state = SharedState::<u8>::new();
        state.register(Box::new(|_| {})).unwrap();
        let second = state.register(Box::new(|_| {}));
        assert!(matches!(second, Err(Error::ContinuationAlreadySet)));
    }

    #[test]
    fn test_wait_for_times_out() {
        let state = SharedState::<u8>::new();
        assert!(!state.wait_for(Duration::from_millis(10)));
    }

    #[test]
    fn test_wait_across_threads() {
        let state = Arc::new(SharedState::new());
        let producer = {
            let state = state.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                state.complete(Outcome::Value(42)).unwrap();
            })
        };
        state.wait();
        assert!(state.wait_for(Duration::from_millis(0)));
        assert_eq!(state.take_outcome().unwrap().get().unwrap(), 42);
        producer.join().expect("The producer thread has panicked");
    }
}
