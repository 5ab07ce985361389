//! Compute steps and type erasure.
//!
//! Routes decode to different value types, but the dispatcher needs one type
//! to drive. [`Endpoint::handle`](crate::Endpoint::handle) pairs the decoded
//! value with its handler and erases the pair into a [`Compute`]: a boxed
//! future resolving to an [`Output`].
//!
//! ```text
//! async fn create(todo: NewTodo) -> Result<Output, Failure> { … }   ← user writes this
//!        ↓ post(path("todos")).with(body()).handle(create)
//! Endpoint<NewTodo> → Endpoint<Compute>                            ← Handler blanket impl
//!        ↓ matched at request time
//! Box::pin(async { create(todo).await.into_output() })             ← one allocation
//! ```

use std::future::Future;
use std::pin::Pin;

use crate::output::{IntoOutput, Output};

/// The compute step of a matched route, not yet polled.
///
/// `Pin<Box<…>>` gives every handler's future one type, and lets the
/// dispatcher poll it in place: a future must not move after its first
/// poll. `Send + 'static` so the transport can drive it on any worker
/// thread.
pub type Compute = Pin<Box<dyn Future<Output = Output> + Send + 'static>>;

// ── Public Handler trait ──────────────────────────────────────────────────────

/// Implemented for every valid compute step.
///
/// You never implement this yourself. It is satisfied by any function or
/// closure of the shape
///
/// ```text
/// Fn(T) -> impl Future<Output = impl IntoOutput>
/// ```
///
/// The future may suspend on I/O; the request keeps its admission slot for
/// the whole time.
///
/// The trait is sealed: only the blanket impl below satisfies it, so the
/// accepted shapes can grow without breaking callers.
///
/// # Example
///
/// ```rust
/// use turnstile::decode::{path, segment};
/// use turnstile::endpoint::get;
/// use turnstile::{Failure, Output};
///
/// async fn show(id: u64) -> Result<Output, Failure> {
///     match id {
///         1 => Ok(Output::ok("first")),
///         _ => Err(Failure::not_found("no such item")),
///     }
/// }
///
/// // `show` is a `Handler<u64>` because the route decodes to `u64`.
/// let route = get(path("items").with(segment::<u64>())).handle(show);
/// # let _ = route;
/// ```
pub trait Handler<T>: private::Sealed<T> + Send + Sync + 'static {
    #[doc(hidden)]
    fn compute(&self, value: T) -> Compute;
}

/// Private, so no other crate can name `Sealed` and implement `Handler`.
mod private {
    pub trait Sealed<T> {}
}

// ── Blanket implementations ───────────────────────────────────────────────────

impl<F, Fut, T> private::Sealed<T> for F
where
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future + Send + 'static,
    Fut::Output: IntoOutput,
{
}

/// `Fn(T) -> Fut` covers named `async fn` items, closures returning an
/// `async` block, and any type implementing `Fn`.
impl<F, Fut, T> Handler<T> for F
where
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future + Send + 'static,
    Fut::Output: IntoOutput,
{
    fn compute(&self, value: T) -> Compute {
        // Calling the handler only builds its future; nothing runs until the
        // dispatcher polls the boxed result.
        let fut = self(value);
        Box::pin(async move { fut.await.into_output() })
    }
}
