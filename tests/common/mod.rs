//! In-process test client driving the full middleware stack

#![allow(dead_code)]

use hyper::Method;
use hyper::header::SET_COOKIE;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;

use rango::apps::rango::populate::populate;
use rango::core::auth::{NewUser, User};
use rango::core::http::{Request, Response};
use rango::core::middleware::Handler;
use rango::core::server::finalize;
use rango::{Application, Settings};

static CSRF_INPUT_RE: Lazy<Regex> = Lazy::new(|| {
	Regex::new(r#"name="csrfmiddlewaretoken" value="([0-9a-f]+)""#)
		.expect("Invalid CSRF input regex pattern")
});

/// Keeps cookies between requests like a browser would
pub struct TestClient {
	app: Application,
	cookies: BTreeMap<String, String>,
}

impl TestClient {
	/// Client over a fresh in-memory database with CSRF checks off
	pub async fn new() -> Self {
		Self::with_settings(Settings::for_testing()).await
	}

	pub async fn with_settings(settings: Settings) -> Self {
		let app = Application::from_settings(settings).await.unwrap();
		app.migrate().await.unwrap();
		Self {
			app,
			cookies: BTreeMap::new(),
		}
	}

	/// Client over a database holding the demo data
	pub async fn populated() -> Self {
		let client = Self::new().await;
		populate(client.app.pool()).await.unwrap();
		client
	}

	pub fn app(&self) -> &Application {
		&self.app
	}

	pub fn cookie(&self, name: &str) -> Option<&str> {
		self.cookies.get(name).map(String::as_str)
	}

	pub async fn get(&mut self, uri: &str) -> Response {
		let request = Request::builder().uri(uri);
		self.send(request.method(Method::GET)).await
	}

	pub async fn post(&mut self, uri: &str, fields: &[(&str, &str)]) -> Response {
		let request = Request::builder().uri(uri).method(Method::POST).form(fields);
		self.send(request).await
	}

	async fn send(&mut self, builder: rango::core::http::RequestBuilder) -> Response {
		let builder = if self.cookies.is_empty() {
			builder
		} else {
			let header = self
				.cookies
				.iter()
				.map(|(name, value)| format!("{}={}", name, value))
				.collect::<Vec<_>>()
				.join("; ");
			builder.header("cookie", &header)
		};

		let response = finalize(self.app.handle(builder.build().unwrap()).await);
		self.store_cookies(&response);
		response
	}

	fn store_cookies(&mut self, response: &Response) {
		for value in response.headers.get_all(SET_COOKIE) {
			let Ok(value) = value.to_str() else { continue };
			let mut parts = value.split(';').map(str::trim);
			let Some((name, cookie)) = parts.next().and_then(|p| p.split_once('=')) else {
				continue;
			};
			let expired = parts.any(|p| p.eq_ignore_ascii_case("Max-Age=0"));
			if expired || cookie.is_empty() {
				self.cookies.remove(name);
			} else {
				self.cookies.insert(name.to_string(), cookie.to_string());
			}
		}
	}

	pub async fn create_user(&self, username: &str, password: &str) -> User {
		User::create(
			self.app.pool(),
			self.app.state().hasher.as_ref(),
			&NewUser {
				username,
				email: "",
				password,
				is_superuser: false,
			},
		)
		.await
		.unwrap()
	}

	/// Create a user and log in as them
	pub async fn login_as(&mut self, username: &str) -> User {
		let user = self.create_user(username, "s3cret-pass").await;
		let response = self
			.post(
				"/rango/login/",
				&[("username", username), ("password", "s3cret-pass")],
			)
			.await;
		assert_eq!(response.status, hyper::StatusCode::FOUND);
		user
	}
}

/// The CSRF token embedded in a rendered form
pub fn csrf_token(html: &str) -> Option<String> {
	CSRF_INPUT_RE
		.captures(html)
		.map(|captures| captures[1].to_string())
}
