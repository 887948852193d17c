//! URL routing and reverse resolution
//!
//! Patterns use `{name}` placeholders with an optional converter:
//! `{slug:slug}` matches `[-a-zA-Z0-9_]+`, `{id:int}` matches digits and
//! a bare `{name}` matches any non-empty segment. Routes can be grouped
//! under a namespace and mounted at a prefix, which makes their names
//! `namespace:name`, similar to Django's `include()`.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::core::exception::{Error, Result};
use crate::core::http::{Request, Response};
use crate::core::middleware::Handler;

/// Placeholder converters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Converter {
	Str,
	Slug,
	Int,
}

impl Converter {
	fn parse(name: &str) -> Result<Self> {
		match name {
			"str" => Ok(Converter::Str),
			"slug" => Ok(Converter::Slug),
			"int" => Ok(Converter::Int),
			other => Err(Error::Configuration(format!(
				"Unknown path converter '{}'",
				other
			))),
		}
	}

	fn accepts(&self, value: &str) -> bool {
		if value.is_empty() {
			return false;
		}
		match self {
			Converter::Str => true,
			Converter::Slug => value
				.chars()
				.all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'),
			Converter::Int => value.chars().all(|c| c.is_ascii_digit()),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
	Literal(String),
	Param { name: String, converter: Converter },
}

/// A compiled URL pattern such as `/rango/category/{slug:slug}/`
#[derive(Debug, Clone)]
pub struct PathPattern {
	raw: String,
	segments: Vec<Segment>,
	trailing_slash: bool,
}

impl PathPattern {
	/// Compile a pattern
	///
	/// # Examples
	///
	/// ```
	/// use rango::core::router::PathPattern;
	///
	/// let pattern = PathPattern::parse("/rango/category/{slug:slug}/").unwrap();
	/// let params = pattern.match_path("/rango/category/other-frameworks/").unwrap();
	/// assert_eq!(params.get("slug").unwrap(), "other-frameworks");
	/// assert!(pattern.match_path("/rango/category/a/b/").is_none());
	/// ```
	pub fn parse(raw: &str) -> Result<Self> {
		let mut segments = Vec::new();
		for part in raw.split('/').filter(|p| !p.is_empty()) {
			if let Some(inner) = part.strip_prefix('{').and_then(|p| p.strip_suffix('}')) {
				let (name, converter) = match inner.split_once(':') {
					Some((name, conv)) => (name, Converter::parse(conv)?),
					None => (inner, Converter::Str),
				};
				if name.is_empty() {
					return Err(Error::Configuration(format!(
						"Empty parameter name in pattern '{}'",
						raw
					)));
				}
				segments.push(Segment::Param {
					name: name.to_string(),
					converter,
				});
			} else {
				segments.push(Segment::Literal(part.to_string()));
			}
		}
		Ok(Self {
			raw: raw.to_string(),
			segments,
			trailing_slash: raw.ends_with('/') && raw.len() > 1,
		})
	}

	pub fn as_str(&self) -> &str {
		&self.raw
	}

	/// Match a request path, returning the captured parameters
	pub fn match_path(&self, path: &str) -> Option<HashMap<String, String>> {
		if path != "/" && path.ends_with('/') != self.trailing_slash {
			return None;
		}
		let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
		if parts.len() != self.segments.len() {
			return None;
		}

		let mut params = HashMap::new();
		for (segment, part) in self.segments.iter().zip(parts) {
			match segment {
				Segment::Literal(literal) if literal == part => {}
				Segment::Literal(_) => return None,
				Segment::Param { name, converter } => {
					if !converter.accepts(part) {
						return None;
					}
					params.insert(name.clone(), part.to_string());
				}
			}
		}
		Some(params)
	}

	/// Substitute parameters back into the pattern
	pub fn reverse(&self, params: &HashMap<String, String>) -> Result<String> {
		let mut path = String::from("/");
		for (index, segment) in self.segments.iter().enumerate() {
			match segment {
				Segment::Literal(literal) => path.push_str(literal),
				Segment::Param { name, converter } => {
					let value = params.get(name).ok_or_else(|| {
						Error::Internal(format!(
							"Missing parameter '{}' reversing '{}'",
							name, self.raw
						))
					})?;
					if !validate_reverse_param(value) || !converter.accepts(value) {
						return Err(Error::Internal(format!(
							"Invalid value '{}' for parameter '{}'",
							value, name
						)));
					}
					path.push_str(value);
				}
			}
			if index + 1 < self.segments.len() || self.trailing_slash {
				path.push('/');
			}
		}
		Ok(path)
	}

	fn prefixed(&self, prefix: &str) -> Result<Self> {
		let joined = format!(
			"{}/{}",
			prefix.trim_end_matches('/'),
			self.raw.trim_start_matches('/')
		);
		Self::parse(&joined)
	}
}

/// Reject parameter values that would change the shape of the URL
fn validate_reverse_param(value: &str) -> bool {
	!value.contains(['/', '?', '#', '%']) && !value.contains("..")
}

/// Route definition, similar to Django's URLPattern
#[derive(Clone)]
pub struct Route {
	pattern: PathPattern,
	handler: Arc<dyn Handler>,
	pub name: Option<String>,
}

impl Route {
	pub fn path(&self) -> &str {
		self.pattern.as_str()
	}
}

/// Ordered list of routes; the first match wins
#[derive(Clone, Default)]
pub struct Router {
	namespace: Option<String>,
	routes: Vec<Route>,
}

impl Router {
	pub fn new() -> Self {
		Self::default()
	}

	/// Prefix the names of every route in this router with `namespace:`
	pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
		self.namespace = Some(namespace.into());
		self
	}

	/// Register a named route
	///
	/// # Panics
	///
	/// Panics on a malformed pattern, which is a programming error in the
	/// URL table rather than a runtime condition.
	pub fn path<H>(mut self, pattern: &str, handler: H, name: &str) -> Self
	where
		H: Handler + 'static,
	{
		let pattern = PathPattern::parse(pattern)
			.unwrap_or_else(|e| panic!("invalid URL pattern '{}': {}", pattern, e));
		let name = match &self.namespace {
			Some(ns) => format!("{}:{}", ns, name),
			None => name.to_string(),
		};
		self.routes.push(Route {
			pattern,
			handler: Arc::new(handler),
			name: Some(name),
		});
		self
	}

	/// Mount every route of `other` below `prefix`
	pub fn include(mut self, prefix: &str, other: Router) -> Self {
		for route in other.routes {
			let pattern = route
				.pattern
				.prefixed(prefix)
				.unwrap_or_else(|e| panic!("invalid URL prefix '{}': {}", prefix, e));
			self.routes.push(Route { pattern, ..route });
		}
		self
	}

	pub fn routes(&self) -> &[Route] {
		&self.routes
	}

	/// Name-to-pattern table used for reverse resolution
	pub fn reverser(&self) -> UrlReverser {
		let mut patterns = HashMap::new();
		for route in &self.routes {
			if let Some(name) = &route.name {
				patterns
					.entry(name.clone())
					.or_insert_with(|| route.pattern.clone());
			}
		}
		UrlReverser { patterns }
	}

	fn resolve(&self, path: &str) -> Option<(&Route, HashMap<String, String>)> {
		self.routes
			.iter()
			.find_map(|route| route.pattern.match_path(path).map(|params| (route, params)))
	}
}

#[async_trait]
impl Handler for Router {
	async fn handle(&self, mut request: Request) -> Result<Response> {
		let path = request.path().to_string();
		if let Some((route, params)) = self.resolve(&path) {
			tracing::debug!(route = route.name.as_deref().unwrap_or(""), %path, "resolved");
			request.path_params = params;
			return route.handler.handle(request).await;
		}

		// APPEND_SLASH behaviour
		if !path.ends_with('/') && self.resolve(&format!("{}/", path)).is_some() {
			let mut location = format!("{}/", path);
			if let Some(query) = request.uri.query() {
				location.push('?');
				location.push_str(query);
			}
			return Ok(Response::permanent_redirect(location));
		}

		Err(Error::NotFound(format!("No URL matches '{}'", path)))
	}
}

/// Reverse URL resolution, Django's `reverse()`
#[derive(Debug, Clone, Default)]
pub struct UrlReverser {
	patterns: HashMap<String, PathPattern>,
}

impl UrlReverser {
	/// Build the URL for a named route
	///
	/// # Examples
	///
	/// ```
	/// use rango::core::router::{Router, UrlReverser};
	/// use rango::core::middleware::handler_fn;
	/// use rango::core::http::{Request, Response};
	///
	/// async fn show(_req: Request) -> rango::core::exception::Result<Response> {
	///     Ok(Response::ok())
	/// }
	///
	/// let app = Router::new().with_namespace("rango")
	///     .path("/category/{slug:slug}/", handler_fn(show), "show_category");
	/// let urls = Router::new().include("/rango/", app).reverser();
	///
	/// let url = urls.reverse("rango:show_category", &[("slug", "python")]).unwrap();
	/// assert_eq!(url, "/rango/category/python/");
	/// ```
	pub fn reverse(&self, name: &str, params: &[(&str, &str)]) -> Result<String> {
		let pattern = self
			.patterns
			.get(name)
			.ok_or_else(|| Error::Internal(format!("Reverse for '{}' not found", name)))?;
		let params: HashMap<String, String> = params
			.iter()
			.map(|(k, v)| (k.to_string(), v.to_string()))
			.collect();
		pattern.reverse(&params)
	}

	pub fn contains(&self, name: &str) -> bool {
		self.patterns.contains_key(name)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::core::middleware::handler_fn;
	use hyper::StatusCode;
	use rstest::{fixture, rstest};

	async fn echo(req: Request) -> Result<Response> {
		let mut params: Vec<_> = req
			.path_params
			.iter()
			.map(|(k, v)| format!("{}={}", k, v))
			.collect();
		params.sort();
		Ok(Response::ok().with_text(params.join(",")))
	}

	#[fixture]
	fn router() -> Router {
		let app = Router::new()
			.with_namespace("rango")
			.path("/", handler_fn(echo), "index")
			.path("/category/{slug:slug}/", handler_fn(echo), "show_category")
			.path("/page/{id:int}/", handler_fn(echo), "page");
		Router::new()
			.path("/", handler_fn(echo), "root")
			.include("/rango/", app)
	}

	#[rstest]
	#[case("/", true)]
	#[case("/rango/", true)]
	#[case("/rango/category/python/", true)]
	#[case("/rango/category/py thon/", false)]
	#[case("/rango/page/12/", true)]
	#[case("/rango/page/abc/", false)]
	#[case("/rango/unknown/", false)]
	fn test_resolve(router: Router, #[case] path: &str, #[case] matched: bool) {
		assert_eq!(router.resolve(path).is_some(), matched);
	}

	#[rstest]
	#[tokio::test]
	async fn test_dispatch_sets_path_params(router: Router) {
		let request = Request::builder()
			.uri("/rango/category/other-frameworks/")
			.build()
			.unwrap();

		let response = router.handle(request).await.unwrap();

		assert_eq!(response.body_text(), "slug=other-frameworks");
	}

	#[rstest]
	#[tokio::test]
	async fn test_missing_trailing_slash_redirects(router: Router) {
		let request = Request::builder()
			.uri("/rango/category/python?x=1")
			.build()
			.unwrap();

		let response = router.handle(request).await.unwrap();

		assert_eq!(response.status, StatusCode::MOVED_PERMANENTLY);
		assert_eq!(response.location(), Some("/rango/category/python/?x=1"));
	}

	#[rstest]
	#[tokio::test]
	async fn test_unknown_path_is_not_found(router: Router) {
		let request = Request::builder().uri("/nowhere/").build().unwrap();

		let result = router.handle(request).await;

		assert!(matches!(result, Err(Error::NotFound(_))));
	}

	#[rstest]
	fn test_reverse_namespaced(router: Router) {
		let urls = router.reverser();

		assert_eq!(urls.reverse("rango:index", &[]).unwrap(), "/rango/");
		assert_eq!(urls.reverse("root", &[]).unwrap(), "/");
		assert_eq!(
			urls.reverse("rango:page", &[("id", "7")]).unwrap(),
			"/rango/page/7/"
		);
	}

	#[rstest]
	#[case("../etc")]
	#[case("a/b")]
	#[case("a?b")]
	fn test_reverse_rejects_unsafe_values(router: Router, #[case] value: &str) {
		let urls = router.reverser();

		assert!(urls.reverse("rango:show_category", &[("slug", value)]).is_err());
	}

	#[rstest]
	fn test_reverse_unknown_name(router: Router) {
		assert!(router.reverser().reverse("rango:nope", &[]).is_err());
	}

	#[rstest]
	fn test_unknown_converter_is_rejected() {
		assert!(PathPattern::parse("/x/{id:uuid}/").is_err());
	}
}
