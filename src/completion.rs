//! Awaiting a [`Future`](crate::Future) from async code.
use std::future::{Future as StdFuture, IntoFuture};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use parking_lot::Mutex;

use crate::{Error, Future};

/// The `std::future::Future` returned by `Future::into_future`.
///
/// # Examples
///
/// ```
/// use promise_future::Promise;
/// use futures::executor::block_on;
/// use std::thread;
///
/// let (promise, future) = Promise::<String>::pair();
/// let task1 = thread::spawn(move || block_on(async {
///     future.await.unwrap()
/// }));
/// promise.set_value("Hi".into());
/// assert_eq!(task1.join().expect("The task1 thread has panicked."), "Hi");
/// ```
#[derive(Debug)]
pub struct Completion<T> {
    slot: Arc<Mutex<Slot<T>>>,
}

#[derive(Debug)]
struct Slot<T> {
    value: Option<Result<T, Error>>,
    waker: Option<Waker>,
}

impl<T: Send + 'static> IntoFuture for Future<T> {
    type Output = Result<T, Error>;
    type IntoFuture = Completion<T>;

    fn into_future(self) -> Completion<T> {
        let slot = Arc::new(Mutex::new(Slot {
            value: None,
            waker: None,
        }));
        if !self.valid() {
            slot.lock().value = Some(Err(Error::BadFuture));
            return Completion { slot };
        }
        let observer = slot.clone();
        self.finally(move |outcome| {
            let mut slot = observer.lock();
            slot.value = Some(outcome.get().map_err(Error::Failed));
            let waker = slot.waker.take();
            drop(slot);
            if let Some(waker) = waker {
                waker.wake()
            }
        });
        Completion { slot }
    }
}

impl<T> StdFuture for Completion<T> {
    type Output = Result<T, Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut slot = self.slot.lock();
        match slot.value.take() {
            Some(value) => Poll::Ready(value),
            None => {
                slot.waker = Some(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}
