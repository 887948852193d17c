//! Middleware and handler traits for HTTP request processing.
//!
//! ## Handler
//!
//! The `Handler` trait is the core abstraction for processing requests.
//! Plain `async fn(Request) -> Result<Response>` views are adapted with
//! [`handler_fn`].
//!
//! ## Middleware
//!
//! Middleware wraps handlers to add cross-cutting concerns:
//!
//! ```rust
//! use rango::core::middleware::{Handler, Middleware};
//! use rango::core::http::{Request, Response};
//! use rango::core::exception::Result;
//! use async_trait::async_trait;
//! use std::sync::Arc;
//!
//! struct TraceMiddleware;
//!
//! #[async_trait]
//! impl Middleware for TraceMiddleware {
//!     async fn process(&self, request: Request, next: Arc<dyn Handler>) -> Result<Response> {
//!         tracing::debug!("{} {}", request.method, request.uri);
//!         next.handle(request).await
//!     }
//! }
//! ```

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use crate::core::exception::Result;
use crate::core::http::{Request, Response};

/// Handler trait for processing requests.
#[async_trait]
pub trait Handler: Send + Sync {
	async fn handle(&self, request: Request) -> Result<Response>;
}

#[async_trait]
impl<T: Handler + ?Sized> Handler for Arc<T> {
	async fn handle(&self, request: Request) -> Result<Response> {
		(**self).handle(request).await
	}
}

/// Middleware trait for request/response processing.
#[async_trait]
pub trait Middleware: Send + Sync {
	/// Processes a request, calling `next` to continue down the chain
	async fn process(&self, request: Request, next: Arc<dyn Handler>) -> Result<Response>;
}

/// Adapter turning an async function into a [`Handler`]
pub struct FnHandler<F> {
	func: F,
}

/// Wrap an `async fn(Request) -> Result<Response>` as a handler
///
/// # Examples
///
/// ```
/// use rango::core::middleware::{handler_fn, Handler};
/// use rango::core::http::{Request, Response};
/// use rango::core::exception::Result;
///
/// async fn about(_req: Request) -> Result<Response> {
///     Ok(Response::ok().with_text("about"))
/// }
///
/// let handler = handler_fn(about);
/// # let _ = handler;
/// ```
pub fn handler_fn<F, Fut>(func: F) -> FnHandler<F>
where
	F: Fn(Request) -> Fut + Send + Sync + 'static,
	Fut: Future<Output = Result<Response>> + Send + 'static,
{
	FnHandler { func }
}

#[async_trait]
impl<F, Fut> Handler for FnHandler<F>
where
	F: Fn(Request) -> Fut + Send + Sync + 'static,
	Fut: Future<Output = Result<Response>> + Send + 'static,
{
	async fn handle(&self, request: Request) -> Result<Response> {
		(self.func)(request).await
	}
}

/// One link of a composed chain: a middleware and whatever follows it
struct Next {
	middleware: Arc<dyn Middleware>,
	next: Arc<dyn Handler>,
}

#[async_trait]
impl Handler for Next {
	async fn handle(&self, request: Request) -> Result<Response> {
		self.middleware.process(request, self.next.clone()).await
	}
}

/// Middleware chain - composes multiple middleware into a single handler.
///
/// Middleware run in the order they were added; the first one added sees
/// the request first and the response last.
pub struct MiddlewareChain {
	middlewares: Vec<Arc<dyn Middleware>>,
	handler: Arc<dyn Handler>,
}

impl MiddlewareChain {
	pub fn new(handler: Arc<dyn Handler>) -> Self {
		Self {
			middlewares: Vec::new(),
			handler,
		}
	}

	pub fn with_middleware(mut self, middleware: Arc<dyn Middleware>) -> Self {
		self.middlewares.push(middleware);
		self
	}

	/// Fold the middleware around the handler, innermost last
	pub fn build(self) -> Arc<dyn Handler> {
		self.middlewares
			.into_iter()
			.rev()
			.fold(self.handler, |next, middleware| {
				Arc::new(Next { middleware, next }) as Arc<dyn Handler>
			})
	}
}

/// Logs one line per request with status and latency
pub struct RequestLogMiddleware;

#[async_trait]
impl Middleware for RequestLogMiddleware {
	async fn process(&self, request: Request, next: Arc<dyn Handler>) -> Result<Response> {
		let method = request.method.clone();
		let path = request.full_path();
		let started = Instant::now();

		let result = next.handle(request).await;

		let elapsed_ms = started.elapsed().as_millis() as u64;
		match &result {
			Ok(response) => {
				tracing::info!(%method, %path, status = response.status.as_u16(), elapsed_ms, "request")
			}
			Err(error) => {
				tracing::info!(%method, %path, status = error.status_code().as_u16(), elapsed_ms, "request")
			}
		}
		result
	}
}
