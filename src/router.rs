//! Route table.
//!
//! A router is an ordered list of complete routes folded with
//! [`Endpoint::or`]: the first route that matches wins, and a route that
//! matched but failed to decode stops the search. There is no tree and no
//! registration syntax; a route is just an `Endpoint<Compute>`.

use crate::decode::DecodeResult;
use crate::endpoint::Endpoint;
use crate::handler::Compute;

/// The application router.
///
/// Build it once at startup and hand it to a
/// [`Dispatcher`](crate::Dispatcher). Each [`Router::route`] call returns
/// `self` so registrations chain naturally.
///
/// ```rust
/// use turnstile::decode::{path, segment};
/// use turnstile::endpoint::{delete, get};
/// use turnstile::{Output, Router};
///
/// let app = Router::new()
///     .route(get(path("users").with(segment::<u64>()))
///         .handle(|id: u64| async move { Output::ok(id) }))
///     .route(delete(path("users").with(segment::<u64>()))
///         .handle(|_: u64| async { Output::no_content() }));
/// # let _ = app.into_endpoint();
/// ```
#[derive(Debug, Clone, Default)]
pub struct Router {
    routes: Vec<Endpoint<Compute>>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a route. Earlier routes take precedence.
    pub fn route(mut self, endpoint: Endpoint<Compute>) -> Self {
        self.routes.push(endpoint);
        self
    }

    /// Appends every route of `other`, after this router's own.
    pub fn merge(mut self, other: Router) -> Self {
        self.routes.extend(other.routes);
        self
    }

    pub fn len(&self) -> usize { self.routes.len() }
    pub fn is_empty(&self) -> bool { self.routes.is_empty() }

    /// Folds the routes into one endpoint. An empty router matches nothing.
    pub fn into_endpoint(self) -> Endpoint<Compute> {
        self.routes
            .into_iter()
            .reduce(Endpoint::or)
            .unwrap_or_else(|| Endpoint::new(|_| DecodeResult::NotMatched))
    }
}

impl From<Router> for Endpoint<Compute> {
    fn from(router: Router) -> Self {
        router.into_endpoint()
    }
}
