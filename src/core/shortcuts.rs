//! View shortcuts: `render`, `redirect` and `get_object_or_404`

use serde_json::json;
use std::sync::Arc;
use tera::Context;

use crate::core::csrf;
use crate::core::exception::{Error, Result};
use crate::core::http::{Request, Response};
use crate::core::router::UrlReverser;
use crate::core::templates::TemplateEngine;

/// Render a template into an HTML response
///
/// Besides `context`, every template sees `user` (`is_authenticated`,
/// `username`) and, when a session is available, `csrf_token`.
pub fn render(request: &Request, template_name: &str, mut context: Context) -> Result<Response> {
	let engine = request
		.extensions
		.get::<Arc<TemplateEngine>>()
		.ok_or_else(|| Error::Internal("No template engine installed".to_string()))?;

	let user = request.user();
	context.insert(
		"user",
		&json!({
			"is_authenticated": user.is_authenticated(),
			"username": user.username(),
		}),
	);
	if let Ok(session) = request.session() {
		context.insert("csrf_token", &csrf::get_token(&session)?);
	}

	let html = engine.render(template_name, &context)?;
	Ok(Response::ok().with_html(html))
}

/// HTTP 302 to `location`
pub fn redirect(location: impl AsRef<str>) -> Response {
	Response::temporary_redirect(location)
}

/// Resolve a named route using the request's URL table
pub fn reverse(request: &Request, name: &str, params: &[(&str, &str)]) -> Result<String> {
	request
		.extensions
		.get::<Arc<UrlReverser>>()
		.ok_or_else(|| Error::Internal("No URL table installed".to_string()))?
		.reverse(name, params)
}

/// HTTP 302 to a named route
pub fn redirect_to_route(request: &Request, name: &str, params: &[(&str, &str)]) -> Result<Response> {
	Ok(redirect(reverse(request, name, params)?))
}

/// Unwrap a lookup or fail with 404
///
/// # Examples
///
/// ```
/// use rango::core::shortcuts::get_object_or_404;
///
/// assert_eq!(get_object_or_404(Some(7), "Page").unwrap(), 7);
/// assert!(get_object_or_404(None::<i64>, "Page").is_err());
/// ```
pub fn get_object_or_404<T>(found: Option<T>, what: &str) -> Result<T> {
	found.ok_or_else(|| Error::NotFound(format!("{} not found", what)))
}

/// Whether `url` is a path on this site, safe to redirect to after login
///
/// # Examples
///
/// ```
/// use rango::core::shortcuts::is_local_url;
///
/// assert!(is_local_url("/rango/add_category/"));
/// assert!(!is_local_url("//evil.example/"));
/// assert!(!is_local_url("https://evil.example/"));
/// ```
pub fn is_local_url(url: &str) -> bool {
	url.starts_with('/')
		&& !url.starts_with("//")
		&& !url.contains('\\')
		&& !url.chars().any(char::is_control)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::core::auth::{CurrentUser, User};
	use crate::core::middleware::handler_fn;
	use crate::core::router::Router;
	use crate::core::sessions::Session;
	use hyper::StatusCode;
	use rstest::{fixture, rstest};
	use tempfile::TempDir;

	async fn noop(_req: Request) -> Result<Response> {
		Ok(Response::ok())
	}

	#[fixture]
	fn request() -> Request {
		let app = Router::new()
			.with_namespace("rango")
			.path("/", handler_fn(noop), "index")
			.path("/about/", handler_fn(noop), "about");
		let urls = Arc::new(Router::new().include("/rango/", app).reverser());
		let dir = TempDir::new().unwrap();
		std::fs::write(
			dir.path().join("greeting.html"),
			"{% if user.is_authenticated %}hello {{ user.username }}{% endif %} <a href=\"{{ url(name=\"rango:about\") }}\">{{ visits }}</a>",
		)
		.unwrap();
		let engine = Arc::new(TemplateEngine::new(Some(dir.path()), urls.clone()).unwrap());

		let mut request = Request::builder().build().unwrap();
		request.extensions.insert(urls);
		request.extensions.insert(engine);
		request.extensions.insert(Session::new());
		request
	}

	#[rstest]
	fn test_render_adds_user_and_csrf_token(mut request: Request) {
		request.extensions.insert(CurrentUser::Authenticated(User {
			id: 1,
			username: "penny".to_string(),
			email: String::new(),
			password: String::new(),
			is_active: true,
			is_superuser: false,
			date_joined: chrono::Utc::now(),
			last_login: None,
		}));
		let mut context = Context::new();
		context.insert("visits", &1);

		let response = render(&request, "greeting.html", context).unwrap();

		assert_eq!(response.status, StatusCode::OK);
		assert_eq!(response.body_text(), "hello penny <a href=\"/rango/about/\">1</a>");
		let session = request.session().unwrap();
		assert!(session.get::<String>(csrf::CSRF_SESSION_KEY).is_some());
	}

	#[rstest]
	fn test_redirect_to_route(request: Request) {
		let response = redirect_to_route(&request, "rango:about", &[]).unwrap();

		assert_eq!(response.status, StatusCode::FOUND);
		assert_eq!(response.location(), Some("/rango/about/"));
	}

	#[rstest]
	fn test_render_without_engine_is_internal_error() {
		let request = Request::builder().build().unwrap();

		let result = render(&request, "rango/about.html", Context::new());

		assert!(matches!(result, Err(Error::Internal(_))));
	}

	#[rstest]
	#[case("/rango/", true)]
	#[case("/rango/?next=/", true)]
	#[case("", false)]
	#[case("rango/", false)]
	#[case("//example.com", false)]
	#[case("/\\example.com", false)]
	#[case("http://example.com/", false)]
	fn test_is_local_url(#[case] url: &str, #[case] expected: bool) {
		assert_eq!(is_local_url(url), expected);
	}
}
