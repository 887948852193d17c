//! CSRF (Cross-Site Request Forgery) protection
//!
//! The secret lives in the session under [`CSRF_SESSION_KEY`]. Every form
//! rendered for the client embeds it as `csrfmiddlewaretoken`, and unsafe
//! requests must echo it back in that field or in the `X-CSRFToken` header.

use async_trait::async_trait;
use rand::RngCore;
use std::fmt::Write;
use std::sync::Arc;

use crate::core::exception::{Error, Result};
use crate::core::http::{Request, Response};
use crate::core::middleware::{Handler, Middleware};
use crate::core::sessions::Session;

/// CSRF session key
pub const CSRF_SESSION_KEY: &str = "csrf_token";

/// Form field carrying the token
pub const CSRF_FORM_FIELD: &str = "csrfmiddlewaretoken";

pub const CSRF_HEADER: &str = "x-csrftoken";

pub const REASON_CSRF_FAILED: &str = "CSRF verification failed.";

const CSRF_SECRET_BYTES: usize = 32;

/// Constant-time byte comparison to prevent timing attacks on CSRF tokens.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
	if a.len() != b.len() {
		return false;
	}
	let mut result = 0u8;
	for (x, y) in a.iter().zip(b.iter()) {
		result |= x ^ y;
	}
	result == 0
}

/// Generate a new random secret, hex encoded
pub fn generate_token() -> String {
	let mut bytes = [0u8; CSRF_SECRET_BYTES];
	rand::thread_rng().fill_bytes(&mut bytes);
	bytes.iter().fold(String::with_capacity(CSRF_SECRET_BYTES * 2), |mut out, b| {
		let _ = write!(out, "{:02x}", b);
		out
	})
}

/// Return the session's token, creating it on first use
pub fn get_token(session: &Session) -> Result<String> {
	if let Some(token) = session.get::<String>(CSRF_SESSION_KEY) {
		return Ok(token);
	}
	let token = generate_token();
	session.insert(CSRF_SESSION_KEY, &token)?;
	Ok(token)
}

/// Replace the token, as on login
pub fn rotate_token(session: &Session) -> Result<String> {
	let token = generate_token();
	session.insert(CSRF_SESSION_KEY, &token)?;
	Ok(token)
}

/// Whether `provided` matches the session's token
pub fn check_token(session: &Session, provided: &str) -> bool {
	match session.get::<String>(CSRF_SESSION_KEY) {
		Some(expected) => constant_time_eq(provided.as_bytes(), expected.as_bytes()),
		None => false,
	}
}

/// Rejects unsafe requests without a valid token
///
/// Must run inside [`SessionMiddleware`](crate::core::sessions::SessionMiddleware).
pub struct CsrfMiddleware {
	enabled: bool,
}

impl CsrfMiddleware {
	pub fn new() -> Self {
		Self { enabled: true }
	}

	pub fn disabled() -> Self {
		Self { enabled: false }
	}

	fn provided_token(request: &Request) -> Option<String> {
		if let Some(token) = request.header(CSRF_HEADER) {
			return Some(token.to_string());
		}
		request
			.form_data()
			.ok()
			.and_then(|mut form| form.remove(CSRF_FORM_FIELD))
	}
}

impl Default for CsrfMiddleware {
	fn default() -> Self {
		Self::new()
	}
}

#[async_trait]
impl Middleware for CsrfMiddleware {
	async fn process(&self, request: Request, next: Arc<dyn Handler>) -> Result<Response> {
		if !self.enabled || request.is_safe_method() {
			return next.handle(request).await;
		}

		let session = request.session()?;
		let valid = Self::provided_token(&request)
			.map(|token| check_token(&session, &token))
			.unwrap_or(false);
		if !valid {
			tracing::warn!(path = %request.path(), method = %request.method, "CSRF verification failed");
			return Err(Error::Forbidden(REASON_CSRF_FAILED.to_string()));
		}

		next.handle(request).await
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::core::middleware::{MiddlewareChain, handler_fn};
	use hyper::Method;
	use rstest::rstest;

	async fn accept(_req: Request) -> Result<Response> {
		Ok(Response::ok().with_text("accepted"))
	}

	fn guarded(session: Session, enabled: bool) -> Arc<dyn Handler> {
		struct Install(Session);

		#[async_trait]
		impl Middleware for Install {
			async fn process(&self, mut request: Request, next: Arc<dyn Handler>) -> Result<Response> {
				request.extensions.insert(self.0.clone());
				next.handle(request).await
			}
		}

		let csrf = if enabled {
			CsrfMiddleware::new()
		} else {
			CsrfMiddleware::disabled()
		};
		MiddlewareChain::new(Arc::new(handler_fn(accept)))
			.with_middleware(Arc::new(Install(session)))
			.with_middleware(Arc::new(csrf))
			.build()
	}

	#[rstest]
	fn test_generated_tokens_are_hex_and_distinct() {
		let a = generate_token();
		let b = generate_token();

		assert_eq!(a.len(), 64);
		assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
		assert_ne!(a, b);
	}

	#[rstest]
	fn test_get_token_is_stable_until_rotated() {
		let session = Session::new();
		let first = get_token(&session).unwrap();

		assert_eq!(get_token(&session).unwrap(), first);
		assert_ne!(rotate_token(&session).unwrap(), first);
	}

	#[rstest]
	#[tokio::test]
	async fn test_get_requests_pass_without_token() {
		let handler = guarded(Session::new(), true);

		let response = handler
			.handle(Request::builder().build().unwrap())
			.await
			.unwrap();

		assert_eq!(response.body_text(), "accepted");
	}

	#[rstest]
	#[case(None)]
	#[case(Some("wrong"))]
	#[tokio::test]
	async fn test_post_without_valid_token_is_forbidden(#[case] token: Option<&str>) {
		let session = Session::new();
		get_token(&session).unwrap();
		let handler = guarded(session, true);
		let mut fields = vec![("name", "Python")];
		if let Some(token) = token {
			fields.push((CSRF_FORM_FIELD, token));
		}

		let result = handler
			.handle(
				Request::builder()
					.method(Method::POST)
					.form(&fields)
					.build()
					.unwrap(),
			)
			.await;

		match result {
			Err(Error::Forbidden(reason)) => assert_eq!(reason, REASON_CSRF_FAILED),
			_ => panic!("expected a CSRF rejection"),
		}
	}

	#[rstest]
	#[tokio::test]
	async fn test_post_with_form_token_passes() {
		let session = Session::new();
		let token = get_token(&session).unwrap();
		let handler = guarded(session, true);

		let response = handler
			.handle(
				Request::builder()
					.method(Method::POST)
					.form(&[(CSRF_FORM_FIELD, token.as_str())])
					.build()
					.unwrap(),
			)
			.await
			.unwrap();

		assert_eq!(response.body_text(), "accepted");
	}

	#[rstest]
	#[tokio::test]
	async fn test_post_with_header_token_passes() {
		let session = Session::new();
		let token = get_token(&session).unwrap();
		let handler = guarded(session, true);

		let response = handler
			.handle(
				Request::builder()
					.method(Method::POST)
					.header("X-CSRFToken", &token)
					.build()
					.unwrap(),
			)
			.await
			.unwrap();

		assert_eq!(response.body_text(), "accepted");
	}

	#[rstest]
	#[tokio::test]
	async fn test_disabled_middleware_accepts_anything() {
		let handler = guarded(Session::new(), false);

		let response = handler
			.handle(Request::builder().method(Method::POST).build().unwrap())
			.await
			.unwrap();

		assert_eq!(response.body_text(), "accepted");
	}
}
