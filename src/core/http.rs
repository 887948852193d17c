//! HTTP request and response types
//!
//! Thin owned wrappers over the `hyper` primitives. The body is read fully
//! before a [`Request`] is built, which keeps handlers synchronous with
//! respect to form parsing.

use bytes::Bytes;
use http::Extensions;
use hyper::header::{self, HeaderMap, HeaderName, HeaderValue};
use hyper::{Method, StatusCode, Uri, Version};
use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use std::borrow::Cow;
use std::collections::HashMap;
use std::net::SocketAddr;

use crate::core::exception::{Error, Result};

/// HTTP Request representation
pub struct Request {
	pub method: Method,
	pub uri: Uri,
	pub version: Version,
	pub headers: HeaderMap,
	pub body: Bytes,
	/// Parameters captured by the URL pattern that matched this request
	pub path_params: HashMap<String, String>,
	pub remote_addr: Option<SocketAddr>,
	/// Typed per-request values installed by middleware
	pub extensions: Extensions,
}

impl Request {
	/// Create a new request from its parts
	pub fn new(method: Method, uri: Uri, version: Version, headers: HeaderMap, body: Bytes) -> Self {
		Self {
			method,
			uri,
			version,
			headers,
			body,
			path_params: HashMap::new(),
			remote_addr: None,
			extensions: Extensions::new(),
		}
	}

	/// Start building a request
	///
	/// # Examples
	///
	/// ```
	/// use rango::core::http::Request;
	/// use hyper::Method;
	///
	/// let request = Request::builder()
	///     .method(Method::POST)
	///     .uri("/rango/login/")
	///     .form(&[("username", "alice")])
	///     .build()
	///     .unwrap();
	/// assert_eq!(request.path(), "/rango/login/");
	/// assert_eq!(request.form_data().unwrap().get("username").unwrap(), "alice");
	/// ```
	pub fn builder() -> RequestBuilder {
		RequestBuilder::default()
	}

	pub fn path(&self) -> &str {
		self.uri.path()
	}

	/// Path plus query string, as sent by the client
	pub fn full_path(&self) -> String {
		self.uri
			.path_and_query()
			.map(|pq| pq.as_str().to_string())
			.unwrap_or_else(|| self.path().to_string())
	}

	pub fn is_post(&self) -> bool {
		self.method == Method::POST
	}

	/// Whether the method is one that must not change server state
	pub fn is_safe_method(&self) -> bool {
		matches!(
			self.method,
			Method::GET | Method::HEAD | Method::OPTIONS | Method::TRACE
		)
	}

	/// Decoded query string parameters
	///
	/// Repeated keys keep the last value.
	///
	/// # Examples
	///
	/// ```
	/// use rango::core::http::Request;
	///
	/// let request = Request::builder()
	///     .uri("/rango/suggest/?suggestion=Py%20th")
	///     .build()
	///     .unwrap();
	/// assert_eq!(request.query("suggestion").as_deref(), Some("Py th"));
	/// assert_eq!(request.query("missing"), None);
	/// ```
	pub fn query_params(&self) -> HashMap<String, String> {
		self.uri
			.query()
			.and_then(|q| serde_urlencoded::from_str::<Vec<(String, String)>>(q).ok())
			.map(|pairs| pairs.into_iter().collect())
			.unwrap_or_default()
	}

	pub fn query(&self, name: &str) -> Option<String> {
		self.query_params().remove(name)
	}

	/// Decode an `application/x-www-form-urlencoded` body
	pub fn form_data(&self) -> Result<HashMap<String, String>> {
		if self.body.is_empty() {
			return Ok(HashMap::new());
		}
		serde_urlencoded::from_bytes::<Vec<(String, String)>>(&self.body)
			.map(|pairs| pairs.into_iter().collect())
			.map_err(|e| Error::BadRequest(format!("Malformed form body: {}", e)))
	}

	pub fn path_param(&self, name: &str) -> Option<&str> {
		self.path_params.get(name).map(String::as_str)
	}

	pub fn header(&self, name: &str) -> Option<&str> {
		self.headers.get(name).and_then(|v| v.to_str().ok())
	}

	/// Look up a cookie sent by the client
	///
	/// # Examples
	///
	/// ```
	/// use rango::core::http::Request;
	///
	/// let request = Request::builder()
	///     .uri("/")
	///     .header("cookie", "theme=dark; sessionid=abc123")
	///     .build()
	///     .unwrap();
	/// assert_eq!(request.cookie("sessionid").as_deref(), Some("abc123"));
	/// assert_eq!(request.cookie("csrftoken"), None);
	/// ```
	pub fn cookie(&self, name: &str) -> Option<String> {
		self.headers
			.get_all(header::COOKIE)
			.iter()
			.filter_map(|value| value.to_str().ok())
			.flat_map(|value| value.split(';'))
			.filter_map(|pair| pair.trim().split_once('='))
			.find(|(key, _)| *key == name)
			.map(|(_, value)| value.to_string())
	}
}

/// Builder for [`Request`], mostly used by tests
#[derive(Default)]
pub struct RequestBuilder {
	method: Option<Method>,
	uri: Option<String>,
	headers: HeaderMap,
	body: Bytes,
	remote_addr: Option<SocketAddr>,
}

impl RequestBuilder {
	pub fn method(mut self, method: Method) -> Self {
		self.method = Some(method);
		self
	}

	pub fn uri(mut self, uri: impl Into<String>) -> Self {
		self.uri = Some(uri.into());
		self
	}

	pub fn header(mut self, name: &str, value: &str) -> Self {
		if let (Ok(name), Ok(value)) = (
			HeaderName::from_bytes(name.as_bytes()),
			HeaderValue::from_str(value),
		) {
			self.headers.append(name, value);
		}
		self
	}

	pub fn body(mut self, body: impl Into<Bytes>) -> Self {
		self.body = body.into();
		self
	}

	/// Encode `fields` as an urlencoded form body
	pub fn form(mut self, fields: &[(&str, &str)]) -> Self {
		let encoded = serde_urlencoded::to_string(fields).unwrap_or_default();
		self.headers.insert(
			header::CONTENT_TYPE,
			HeaderValue::from_static("application/x-www-form-urlencoded"),
		);
		self.body = Bytes::from(encoded);
		self
	}

	pub fn remote_addr(mut self, addr: SocketAddr) -> Self {
		self.remote_addr = Some(addr);
		self
	}

	pub fn build(self) -> Result<Request> {
		let uri: Uri = self
			.uri
			.unwrap_or_else(|| "/".to_string())
			.parse()
			.map_err(|e| Error::BadRequest(format!("Invalid URI: {}", e)))?;
		let mut request = Request::new(
			self.method.unwrap_or(Method::GET),
			uri,
			Version::HTTP_11,
			self.headers,
			self.body,
		);
		request.remote_addr = self.remote_addr;
		Ok(request)
	}
}

/// ASCII escaped by [`iri_to_uri`]; non-ASCII bytes are always escaped
const IRI_ESCAPE: &AsciiSet = &CONTROLS
	.add(b' ')
	.add(b'"')
	.add(b'<')
	.add(b'>')
	.add(b'\\')
	.add(b'^')
	.add(b'`')
	.add(b'{')
	.add(b'|')
	.add(b'}');

/// Convert an IRI to a URI usable in a header
///
/// Non-ASCII characters are UTF-8 percent-encoded. Existing escapes are
/// left alone, so encoding twice changes nothing.
///
/// # Examples
///
/// ```
/// use rango::core::http::iri_to_uri;
///
/// assert_eq!(iri_to_uri("http://example.com/café?q=a b"), "http://example.com/caf%C3%A9?q=a%20b");
/// assert_eq!(iri_to_uri("/rango/caf%C3%A9/"), "/rango/caf%C3%A9/");
/// ```
pub fn iri_to_uri(iri: &str) -> Cow<'_, str> {
	utf8_percent_encode(iri, IRI_ESCAPE).into()
}

/// HTTP Response representation
pub struct Response {
	pub status: StatusCode,
	pub headers: HeaderMap,
	pub body: Bytes,
}

impl Response {
	pub fn new(status: StatusCode) -> Self {
		Self {
			status,
			headers: HeaderMap::new(),
			body: Bytes::new(),
		}
	}

	pub fn ok() -> Self {
		Self::new(StatusCode::OK)
	}

	/// Create a Response with HTTP 301 Moved Permanently
	pub fn permanent_redirect(location: impl AsRef<str>) -> Self {
		Self::new(StatusCode::MOVED_PERMANENTLY).with_location(location.as_ref())
	}

	/// Create a Response with HTTP 302 Found
	///
	/// # Examples
	///
	/// ```
	/// use rango::core::http::Response;
	/// use hyper::StatusCode;
	///
	/// let response = Response::temporary_redirect("/rango/");
	/// assert_eq!(response.status, StatusCode::FOUND);
	/// assert_eq!(response.location(), Some("/rango/"));
	/// ```
	pub fn temporary_redirect(location: impl AsRef<str>) -> Self {
		Self::new(StatusCode::FOUND).with_location(location.as_ref())
	}

	pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
		self.body = body.into();
		self
	}

	/// Plain-text body with the matching content type
	pub fn with_text(self, text: impl Into<String>) -> Self {
		self.with_body(text.into())
			.with_header("content-type", "text/plain; charset=utf-8")
	}

	/// HTML body with the matching content type
	pub fn with_html(self, html: impl Into<String>) -> Self {
		self.with_body(html.into())
			.with_header("content-type", "text/html; charset=utf-8")
	}

	/// Set a header, replacing any existing value
	pub fn with_header(mut self, name: &str, value: &str) -> Self {
		if let (Ok(name), Ok(value)) = (
			HeaderName::from_bytes(name.as_bytes()),
			HeaderValue::from_str(value),
		) {
			self.headers.insert(name, value);
		}
		self
	}

	/// Append a header value, keeping existing ones (used for `Set-Cookie`)
	pub fn append_header(&mut self, name: HeaderName, value: &str) {
		if let Ok(value) = HeaderValue::from_str(value) {
			self.headers.append(name, value);
		}
	}

	/// Set `Location`, percent-encoding whatever a header cannot carry
	pub fn with_location(mut self, location: &str) -> Self {
		let value = HeaderValue::from_str(&iri_to_uri(location))
			.unwrap_or_else(|_| HeaderValue::from_static("/"));
		self.headers.insert(header::LOCATION, value);
		self
	}

	pub fn location(&self) -> Option<&str> {
		self.headers
			.get(header::LOCATION)
			.and_then(|v| v.to_str().ok())
	}

	/// Body decoded as UTF-8, lossily
	pub fn body_text(&self) -> String {
		String::from_utf8_lossy(&self.body).into_owned()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rstest::rstest;

	#[rstest]
	fn test_query_params_decoding() {
		let request = Request::builder()
			.uri("/rango/goto/?page_id=12&x=a+b")
			.build()
			.unwrap();

		let params = request.query_params();
		assert_eq!(params.get("page_id").unwrap(), "12");
		assert_eq!(params.get("x").unwrap(), "a b");
	}

	#[rstest]
	fn test_malformed_uri_is_bad_request() {
		let result = Request::builder().uri("not a uri").build();

		assert!(matches!(result, Err(Error::BadRequest(_))));
	}

	#[rstest]
	fn test_empty_form_body() {
		let request = Request::builder().method(Method::POST).build().unwrap();

		assert!(request.form_data().unwrap().is_empty());
	}

	#[rstest]
	fn test_full_path_keeps_query() {
		let request = Request::builder()
			.uri("/rango/add_category/?a=1")
			.build()
			.unwrap();

		assert_eq!(request.full_path(), "/rango/add_category/?a=1");
	}

	#[rstest]
	#[case(Method::GET, true)]
	#[case(Method::HEAD, true)]
	#[case(Method::POST, false)]
	#[case(Method::DELETE, false)]
	fn test_safe_methods(#[case] method: Method, #[case] safe: bool) {
		let request = Request::builder().method(method).build().unwrap();

		assert_eq!(request.is_safe_method(), safe);
	}

	#[rstest]
	fn test_append_header_keeps_previous_values() {
		let mut response = Response::ok();
		response.append_header(header::SET_COOKIE, "a=1");
		response.append_header(header::SET_COOKIE, "b=2");

		assert_eq!(response.headers.get_all(header::SET_COOKIE).iter().count(), 2);
	}

	#[rstest]
	fn test_with_text_sets_content_type() {
		let response = Response::ok().with_text("42");

		assert_eq!(response.body_text(), "42");
		assert_eq!(
			response.headers.get("content-type").unwrap(),
			"text/plain; charset=utf-8"
		);
	}
	#[rstest]
	#[case("http://example.com/café", "http://example.com/caf%C3%A9")]
	#[case("/rango/?next=/a b/", "/rango/?next=/a%20b/")]
	#[case("http://例え.jp/", "http://%E4%BE%8B%E3%81%88.jp/")]
	#[case("/rango/category/python/#top", "/rango/category/python/#top")]
	fn test_redirect_location_is_header_safe(#[case] target: &str, #[case] expected: &str) {
		let response = Response::temporary_redirect(target);

		assert_eq!(response.status, StatusCode::FOUND);
		assert_eq!(response.location(), Some(expected));
	}
}
