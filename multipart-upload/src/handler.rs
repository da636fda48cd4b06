//! Upload handlers and their composition.

use std::fmt;

use futures_core::future::LocalBoxFuture;

use crate::{MultipartError, Part};

/// Outcome of an upload handler for one part.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub enum Handled<V> {
    /// The handler produced a value for the part.
    Value(V),

    /// The handler declined the part; nothing is added to the form.
    Skip,
}

impl<V> Handled<V> {
    /// Returns true for [`Handled::Value`].
    pub fn is_value(&self) -> bool {
        matches!(self, Handled::Value(_))
    }

    /// Converts into an `Option`, mapping `Skip` to `None`.
    pub fn into_value(self) -> Option<V> {
        match self {
            Handled::Value(value) => Some(value),
            Handled::Skip => None,
        }
    }

    /// Maps the produced value, if any.
    pub fn map<U>(self, f: impl FnOnce(V) -> U) -> Handled<U> {
        match self {
            Handled::Value(value) => Handled::Value(f(value)),
            Handled::Skip => Handled::Skip,
        }
    }
}

impl<V> From<Option<V>> for Handled<V> {
    fn from(value: Option<V>) -> Self {
        value.map_or(Handled::Skip, Handled::Value)
    }
}

/// Converts a part into an application-level value.
///
/// A handler reads (some or all of) the part's body and returns [`Handled::Value`], or
/// [`Handled::Skip`] to leave the part out of the form. Any error it returns aborts parsing and
/// is handed back to the caller untouched.
///
/// Handlers receive the part by mutable reference. Unread bytes are discarded once the handler
/// returns.
pub trait UploadHandler<V, E = MultipartError> {
    /// Handles one part.
    fn handle<'a>(&'a self, part: &'a mut Part) -> LocalBoxFuture<'a, Result<Handled<V>, E>>;
}

impl<V, E, H> UploadHandler<V, E> for Box<H>
where
    H: UploadHandler<V, E> + ?Sized,
{
    fn handle<'a>(&'a self, part: &'a mut Part) -> LocalBoxFuture<'a, Result<Handled<V>, E>> {
        (**self).handle(part)
    }
}

impl<V, E, H> UploadHandler<V, E> for &H
where
    H: UploadHandler<V, E> + ?Sized,
{
    fn handle<'a>(&'a self, part: &'a mut Part) -> LocalBoxFuture<'a, Result<Handled<V>, E>> {
        (**self).handle(part)
    }
}

/// Upload handler built from a closure. See [`handler_fn`].
#[derive(Clone)]
pub struct HandlerFn<F> {
    f: F,
}

/// Creates an upload handler from a closure returning a boxed future.
///
/// ```
/// use futures_util::TryStreamExt as _;
/// use multipart_upload::{handler_fn, Handled, MultipartError};
///
/// let count_bytes = handler_fn(|part| {
///     Box::pin(async move {
///         let mut size = 0;
///         while let Some(chunk) = part.try_next().await? {
///             size += chunk.len();
///         }
///         Ok::<_, MultipartError>(Handled::Value(size))
///     })
/// });
/// # let _ = count_bytes;
/// ```
pub fn handler_fn<F, V, E>(f: F) -> HandlerFn<F>
where
    F: for<'a> Fn(&'a mut Part) -> LocalBoxFuture<'a, Result<Handled<V>, E>>,
{
    HandlerFn { f }
}

impl<F, V, E> UploadHandler<V, E> for HandlerFn<F>
where
    F: for<'a> Fn(&'a mut Part) -> LocalBoxFuture<'a, Result<Handled<V>, E>>,
{
    fn handle<'a>(&'a self, part: &'a mut Part) -> LocalBoxFuture<'a, Result<Handled<V>, E>> {
        (self.f)(part)
    }
}

impl<F> fmt::Debug for HandlerFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerFn").finish_non_exhaustive()
    }
}

/// Several upload handlers tried in order, first value wins.
///
/// For each part the handlers are invoked one after another:
///
/// - the first [`Handled::Value`] is returned and later handlers are not invoked;
/// - an error is returned immediately and later handlers are not invoked;
/// - if every handler skips, the composed handler skips.
///
/// All handlers see the same part. Body bytes read by an earlier handler are not replayed to
/// later ones.
pub struct ComposedHandler<V, E = MultipartError> {
    handlers: Vec<Box<dyn UploadHandler<V, E>>>,
}

impl<V, E> ComposedHandler<V, E> {
    /// Constructs an empty composition, which skips every part.
    pub fn new() -> Self {
        ComposedHandler {
            handlers: Vec::new(),
        }
    }

    /// Appends a handler to the end of the chain.
    pub fn with<H>(mut self, handler: H) -> Self
    where
        H: UploadHandler<V, E> + 'static,
    {
        self.handlers.push(Box::new(handler));
        self
    }

    /// Returns the number of handlers in the chain.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl<V, E> Default for ComposedHandler<V, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V, E> FromIterator<Box<dyn UploadHandler<V, E>>> for ComposedHandler<V, E> {
    fn from_iter<I: IntoIterator<Item = Box<dyn UploadHandler<V, E>>>>(iter: I) -> Self {
        ComposedHandler {
            handlers: iter.into_iter().collect(),
        }
    }
}

impl<V, E> fmt::Debug for ComposedHandler<V, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComposedHandler")
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

impl<V, E> UploadHandler<V, E> for ComposedHandler<V, E> {
    fn handle<'a>(&'a self, part: &'a mut Part) -> LocalBoxFuture<'a, Result<Handled<V>, E>> {
        Box::pin(async move {
            for handler in &self.handlers {
                if let Handled::Value(value) = handler.handle(part).await? {
                    return Ok(Handled::Value(value));
                }
            }

            Ok(Handled::Skip)
        })
    }
}

/// Combines upload handlers into one [`ComposedHandler`], tried in the given order.
pub fn compose<V, E, I>(handlers: I) -> ComposedHandler<V, E>
where
    I: IntoIterator<Item = Box<dyn UploadHandler<V, E>>>,
{
    handlers.into_iter().collect()
}

/// Combines upload handlers of different types into one [`ComposedHandler`].
///
/// ```
/// use multipart_upload::{compose, handlers::MemoryUploadHandler, ComposedHandler, FormValue};
///
/// let handler: ComposedHandler<FormValue> = compose![
///     MemoryUploadHandler::new().filter(|part| part.is_file()),
///     MemoryUploadHandler::new().max_part_size(1024),
/// ];
/// assert_eq!(handler.len(), 2);
/// ```
#[macro_export]
macro_rules! compose {
    ($($handler:expr),* $(,)?) => {
        $crate::ComposedHandler::new()$(.with($handler))*
    };
}
