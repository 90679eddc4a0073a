use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

/// A captured error travelling through a future chain.
///
/// Anything implementing `std::error::Error` converts into a `Failure`, which
/// keeps the original value around so callers can inspect it later with
/// [`Failure::is`] and [`Failure::downcast_ref`].
///
/// # Examples
///
/// ```
/// use promise_future::Failure;
///
/// let failure = Failure::from(std::io::Error::other("disk on fire"));
/// assert!(failure.is::<std::io::Error>());
/// assert_eq!(failure.to_string(), "disk on fire");
/// ```
#[derive(Clone)]
pub struct Failure {
    inner: Arc<dyn StdError + Send + Sync + 'static>,
}

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct Message(String);

impl Failure {
    pub fn new<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Failure { inner: Arc::new(error) }
    }

    /// A failure carrying nothing but a human readable message.
    pub fn msg(message: impl fmt::Display) -> Self {
        Self::new(Message(message.to_string()))
    }

    pub fn is<E: StdError + 'static>(&self) -> bool {
        self.inner.is::<E>()
    }

    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        self.inner.downcast_ref::<E>()
    }

    /// The wrapped error, for walking its `source` chain.
    pub fn as_error(&self) -> &(dyn StdError + Send + Sync + 'static) {
        &*self.inner
    }
}

impl<E> From<E> for Failure
where
    E: StdError + Send + Sync + 'static,
{
    fn from(error: E) -> Self {
        Failure::new(error)
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.inner, f)
    }
}

impl fmt::Debug for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.inner, f)
    }
}

/// The result written into a promise: either a value or a [`Failure`].
///
/// `Outcome<()>` stands in for promises that only signal completion.
#[derive(Debug, Clone)]
pub enum Outcome<T> {
    Value(T),
    Failure(Failure),
}

impl<T> Outcome<T> {
    pub fn is_value(&self) -> bool {
        matches!(self, Outcome::Value(_))
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Failure(_))
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            Outcome::Value(value) => Some(value),
            Outcome::Failure(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&Failure> {
        match self {
            Outcome::Value(_) => None,
            Outcome::Failure(failure) => Some(failure),
        }
    }

    /// Unwraps the outcome into the value or the captured failure.
    pub fn get(self) -> Result<T, Failure> {
        match self {
            Outcome::Value(value) => Ok(value),
            Outcome::Failure(failure) => Err(failure),
        }
    }

    /// Same as [`Outcome::get`].
    pub fn into_result(self) -> Result<T, Failure> {
        self.get()
    }

    pub fn map<U, F>(self, f: F) -> Outcome<U>
    where
        F: FnOnce(T) -> U,
    {
        match self {
            Outcome::Value(value) => Outcome::Value(f(value)),
            Outcome::Failure(failure) => Outcome::Failure(failure),
        }
    }
}

impl<T, E> From<Result<T, E>> for Outcome<T>
where
    E: Into<Failure>,
{
    fn from(result: Result<T, E>) -> Self {
        match result {
            Ok(value) => Outcome::Value(value),
            Err(error) => Outcome::Failure(error.into()),
        }
    }
}

impl<T> From<Outcome<T>> for Result<T, Failure> {
    fn from(outcome: Outcome<T>) -> Self {
        outcome.get()
    }
}
