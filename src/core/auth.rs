//! Users, password hashing and session authentication
//!
//! Users live in the `auth_user` table. Logging in stores the user's id in
//! the session under [`SESSION_KEY`]; [`AuthenticationMiddleware`] turns it
//! back into a [`CurrentUser`] on each request.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use std::sync::Arc;

use crate::core::csrf;
use crate::core::db::{Migration, is_unique_violation};
use crate::core::exception::{Error, Result};
use crate::core::http::{Request, Response};
use crate::core::middleware::{Handler, Middleware};
use crate::core::sessions::Session;

/// Session key holding the authenticated user's id
pub const SESSION_KEY: &str = "_auth_user_id";

pub const MIGRATIONS: &[Migration] = &[Migration {
	app_label: "auth",
	name: "0001_initial",
	sql: include_str!("../../migrations/auth/0001_initial.sql"),
}];

/// Password hasher trait
///
/// Implement this trait to create custom password hashing algorithms.
///
/// # Examples
///
/// ```
/// use rango::core::auth::{Argon2Hasher, PasswordHasher};
///
/// let hasher = Argon2Hasher::new();
/// let hash = hasher.hash("my_secure_password").unwrap();
///
/// assert!(hasher.verify("my_secure_password", &hash).unwrap());
/// assert!(!hasher.verify("wrong_password", &hash).unwrap());
/// ```
pub trait PasswordHasher: Send + Sync {
	/// Hashes a password
	fn hash(&self, password: &str) -> Result<String>;

	/// Verifies a password against a hash
	///
	/// `Ok(false)` means the password does not match; an error means the
	/// stored hash could not be parsed.
	fn verify(&self, password: &str, hash: &str) -> Result<bool>;
}

/// Argon2id password hasher
pub struct Argon2Hasher;

impl Argon2Hasher {
	pub fn new() -> Self {
		Self
	}
}

impl Default for Argon2Hasher {
	fn default() -> Self {
		Self::new()
	}
}

impl PasswordHasher for Argon2Hasher {
	fn hash(&self, password: &str) -> Result<String> {
		use argon2::{
			Argon2,
			password_hash::{PasswordHasher as _, SaltString},
		};
		use rand::RngCore;

		let mut salt_bytes = [0u8; 16];
		rand::thread_rng().fill_bytes(&mut salt_bytes);

		let salt = SaltString::encode_b64(&salt_bytes)
			.map_err(|e| Error::Authentication(e.to_string()))?;

		Argon2::default()
			.hash_password(password.as_bytes(), &salt)
			.map(|hash| hash.to_string())
			.map_err(|e| Error::Authentication(e.to_string()))
	}

	fn verify(&self, password: &str, hash: &str) -> Result<bool> {
		use argon2::{
			Argon2,
			password_hash::{PasswordHash, PasswordVerifier},
		};

		let parsed_hash =
			PasswordHash::new(hash).map_err(|e| Error::Authentication(e.to_string()))?;

		Ok(Argon2::default()
			.verify_password(password.as_bytes(), &parsed_hash)
			.is_ok())
	}
}

/// A row of `auth_user`
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct User {
	pub id: i64,
	pub username: String,
	pub email: String,
	#[serde(skip_serializing)]
	pub password: String,
	pub is_active: bool,
	pub is_superuser: bool,
	pub date_joined: DateTime<Utc>,
	pub last_login: Option<DateTime<Utc>>,
}

/// Fields needed to create a [`User`]
#[derive(Debug, Clone, Default)]
pub struct NewUser<'a> {
	pub username: &'a str,
	pub email: &'a str,
	pub password: &'a str,
	pub is_superuser: bool,
}

const USER_COLUMNS: &str =
	"id, username, email, password, is_active, is_superuser, date_joined, last_login";

impl User {
	/// Insert a new active user with a hashed password
	pub async fn create(
		pool: &SqlitePool,
		hasher: &dyn PasswordHasher,
		new_user: &NewUser<'_>,
	) -> Result<User> {
		let password = hasher.hash(new_user.password)?;
		let id = sqlx::query(
			"INSERT INTO auth_user (username, email, password, is_active, is_superuser, date_joined)
			VALUES (?, ?, ?, 1, ?, ?)",
		)
		.bind(new_user.username)
		.bind(new_user.email)
		.bind(password)
		.bind(new_user.is_superuser)
		.bind(Utc::now())
		.execute(pool)
		.await
		.map_err(|e| {
			if is_unique_violation(&e) {
				Error::BadRequest("A user with that username already exists.".to_string())
			} else {
				Error::Database(e)
			}
		})?
		.last_insert_rowid();

		tracing::info!(username = new_user.username, "user created");
		Self::get_by_id(pool, id)
			.await?
			.ok_or_else(|| Error::Internal(format!("User {} vanished after insert", id)))
	}

	pub async fn get_by_id(pool: &SqlitePool, id: i64) -> Result<Option<User>> {
		let query = format!("SELECT {} FROM auth_user WHERE id = ?", USER_COLUMNS);
		Ok(sqlx::query_as::<_, User>(&query)
			.bind(id)
			.fetch_optional(pool)
			.await?)
	}

	pub async fn get_by_username(pool: &SqlitePool, username: &str) -> Result<Option<User>> {
		let query = format!("SELECT {} FROM auth_user WHERE username = ?", USER_COLUMNS);
		Ok(sqlx::query_as::<_, User>(&query)
			.bind(username)
			.fetch_optional(pool)
			.await?)
	}

	pub async fn username_exists(pool: &SqlitePool, username: &str) -> Result<bool> {
		let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM auth_user WHERE username = ?")
			.bind(username)
			.fetch_one(pool)
			.await?;
		Ok(count > 0)
	}

	pub fn check_password(&self, hasher: &dyn PasswordHasher, raw: &str) -> Result<bool> {
		hasher.verify(raw, &self.password)
	}

	pub async fn set_active(&mut self, pool: &SqlitePool, active: bool) -> Result<()> {
		sqlx::query("UPDATE auth_user SET is_active = ? WHERE id = ?")
			.bind(active)
			.bind(self.id)
			.execute(pool)
			.await?;
		self.is_active = active;
		Ok(())
	}
}

/// The user making the current request
#[derive(Debug, Clone, Default)]
pub enum CurrentUser {
	#[default]
	Anonymous,
	Authenticated(User),
}

impl CurrentUser {
	pub fn is_authenticated(&self) -> bool {
		matches!(self, CurrentUser::Authenticated(_))
	}

	pub fn user(&self) -> Option<&User> {
		match self {
			CurrentUser::Authenticated(user) => Some(user),
			CurrentUser::Anonymous => None,
		}
	}

	/// Username, empty for anonymous users
	pub fn username(&self) -> &str {
		self.user().map(|u| u.username.as_str()).unwrap_or("")
	}
}

impl Request {
	/// The user installed by [`AuthenticationMiddleware`], anonymous otherwise
	pub fn user(&self) -> CurrentUser {
		self.extensions
			.get::<CurrentUser>()
			.cloned()
			.unwrap_or_default()
	}
}

/// Check credentials
///
/// Inactive users are returned too, so callers can tell a disabled account
/// from bad credentials.
pub async fn authenticate(
	pool: &SqlitePool,
	hasher: &dyn PasswordHasher,
	username: &str,
	password: &str,
) -> Result<Option<User>> {
	let Some(user) = User::get_by_username(pool, username).await? else {
		// Hash anyway so unknown usernames take as long as wrong passwords
		let _ = hasher.hash(password);
		return Ok(None);
	};
	match user.check_password(hasher, password) {
		Ok(true) => Ok(Some(user)),
		Ok(false) => Ok(None),
		Err(e) => {
			tracing::warn!(username, error = %e, "stored password hash is unusable");
			Ok(None)
		}
	}
}

/// Persist the user's id in a fresh session
///
/// Switching users discards the previous session data; logging in again as
/// the same user only changes the key. The CSRF token is rotated either way.
pub async fn login(pool: &SqlitePool, session: &Session, user: &User) -> Result<()> {
	match session.get::<i64>(SESSION_KEY) {
		Some(existing) if existing != user.id => session.flush(),
		_ => session.cycle_key(),
	}
	session.insert(SESSION_KEY, user.id)?;
	csrf::rotate_token(session)?;

	sqlx::query("UPDATE auth_user SET last_login = ? WHERE id = ?")
		.bind(Utc::now())
		.bind(user.id)
		.execute(pool)
		.await?;
	tracing::info!(username = %user.username, "user logged in");
	Ok(())
}

/// Remove the user's id and all other data from the session
pub fn logout(session: &Session) {
	session.flush();
}

/// Resolves the session's user id into a [`CurrentUser`]
///
/// Must run inside [`SessionMiddleware`](crate::core::sessions::SessionMiddleware).
pub struct AuthenticationMiddleware {
	pool: SqlitePool,
}

impl AuthenticationMiddleware {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}
}

#[async_trait]
impl Middleware for AuthenticationMiddleware {
	async fn process(&self, mut request: Request, next: Arc<dyn Handler>) -> Result<Response> {
		let session = request.session()?;
		let current = match session.get::<i64>(SESSION_KEY) {
			Some(id) => match User::get_by_id(&self.pool, id).await? {
				Some(user) if user.is_active => CurrentUser::Authenticated(user),
				_ => CurrentUser::Anonymous,
			},
			None => CurrentUser::Anonymous,
		};
		request.extensions.insert(current);
		next.handle(request).await
	}
}

/// Wraps a handler so anonymous users are sent to the login page
pub struct LoginRequired<H> {
	inner: H,
	login_url: String,
}

/// Django's `@login_required`
pub fn login_required<H: Handler>(inner: H, login_url: impl Into<String>) -> LoginRequired<H> {
	LoginRequired {
		inner,
		login_url: login_url.into(),
	}
}

/// `login_url?next=<path>` for the given request
pub fn redirect_to_login(request: &Request, login_url: &str) -> Response {
	let next = serde_urlencoded::to_string([("next", request.full_path())]).unwrap_or_default();
	let separator = if login_url.contains('?') { '&' } else { '?' };
	Response::temporary_redirect(format!("{}{}{}", login_url, separator, next))
}

#[async_trait]
impl<H: Handler> Handler for LoginRequired<H> {
	async fn handle(&self, request: Request) -> Result<Response> {
		if request.user().is_authenticated() {
			return self.inner.handle(request).await;
		}
		tracing::debug!(path = %request.path(), "anonymous user redirected to login");
		Ok(redirect_to_login(&request, &self.login_url))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::core::db::{connect, migrate};
	use crate::core::middleware::handler_fn;
	use hyper::StatusCode;
	use rstest::{fixture, rstest};

	#[fixture]
	async fn pool() -> SqlitePool {
		let pool = connect("sqlite::memory:").await.unwrap();
		migrate(&pool, MIGRATIONS).await.unwrap();
		pool
	}

	async fn create(pool: &SqlitePool, username: &str, password: &str) -> User {
		User::create(
			pool,
			&Argon2Hasher::new(),
			&NewUser {
				username,
				password,
				..Default::default()
			},
		)
		.await
		.unwrap()
	}

	async fn secret(_req: Request) -> Result<Response> {
		Ok(Response::ok().with_text("secret"))
	}

	#[rstest]
	fn test_hashes_are_salted() {
		let hasher = Argon2Hasher::new();

		let a = hasher.hash("password").unwrap();
		let b = hasher.hash("password").unwrap();

		assert_ne!(a, b);
		assert!(hasher.verify("password", &b).unwrap());
	}

	#[rstest]
	fn test_verify_rejects_garbage_hash() {
		assert!(Argon2Hasher::new().verify("password", "not-a-hash").is_err());
	}

	#[rstest]
	#[tokio::test]
	async fn test_authenticate(#[future] pool: SqlitePool) {
		let pool = pool.await;
		let hasher = Argon2Hasher::new();
		create(&pool, "leonard", "hofstadter").await;

		let ok = authenticate(&pool, &hasher, "leonard", "hofstadter").await.unwrap();
		let wrong = authenticate(&pool, &hasher, "leonard", "sheldon").await.unwrap();
		let unknown = authenticate(&pool, &hasher, "penny", "hofstadter").await.unwrap();

		assert_eq!(ok.unwrap().username, "leonard");
		assert!(wrong.is_none());
		assert!(unknown.is_none());
	}

	#[rstest]
	#[tokio::test]
	async fn test_authenticate_returns_inactive_users(#[future] pool: SqlitePool) {
		let pool = pool.await;
		let mut user = create(&pool, "howard", "wolowitz").await;
		user.set_active(&pool, false).await.unwrap();

		let found = authenticate(&pool, &Argon2Hasher::new(), "howard", "wolowitz")
			.await
			.unwrap()
			.unwrap();

		assert!(!found.is_active);
	}

	#[rstest]
	#[tokio::test]
	async fn test_duplicate_username_is_rejected(#[future] pool: SqlitePool) {
		let pool = pool.await;
		create(&pool, "raj", "koothrappali").await;

		let result = User::create(
			&pool,
			&Argon2Hasher::new(),
			&NewUser {
				username: "raj",
				password: "other",
				..Default::default()
			},
		)
		.await;

		assert!(matches!(result, Err(Error::BadRequest(_))));
		assert!(User::username_exists(&pool, "raj").await.unwrap());
	}

	#[rstest]
	#[tokio::test]
	async fn test_login_cycles_key_and_records_last_login(#[future] pool: SqlitePool) {
		let pool = pool.await;
		let user = create(&pool, "amy", "farrah-fowler").await;
		let session = Session::from_store("before-login", Default::default());
		session.insert("visits", 4).unwrap();

		login(&pool, &session, &user).await.unwrap();

		assert_eq!(session.session_key(), None);
		assert_eq!(session.get::<i64>(SESSION_KEY), Some(user.id));
		assert_eq!(session.get::<i64>("visits"), Some(4));
		let reloaded = User::get_by_id(&pool, user.id).await.unwrap().unwrap();
		assert!(reloaded.last_login.is_some());
	}

	#[rstest]
	#[tokio::test]
	async fn test_login_as_other_user_discards_session(#[future] pool: SqlitePool) {
		let pool = pool.await;
		let first = create(&pool, "bernadette", "rostenkowski").await;
		let second = create(&pool, "stuart", "bloom").await;
		let session = Session::new();
		login(&pool, &session, &first).await.unwrap();
		session.insert("visits", 2).unwrap();

		login(&pool, &session, &second).await.unwrap();

		assert_eq!(session.get::<i64>(SESSION_KEY), Some(second.id));
		assert_eq!(session.get::<i64>("visits"), None);
	}

	#[rstest]
	fn test_logout_flushes_session() {
		let session = Session::new();
		session.insert(SESSION_KEY, 1).unwrap();

		logout(&session);

		assert!(session.is_empty());
	}

	#[rstest]
	#[tokio::test]
	async fn test_login_required_redirects_anonymous() {
		let handler = login_required(handler_fn(secret), "/rango/login/");
		let request = Request::builder()
			.uri("/rango/add_category/")
			.build()
			.unwrap();

		let response = handler.handle(request).await.unwrap();

		assert_eq!(response.status, StatusCode::FOUND);
		assert_eq!(
			response.location(),
			Some("/rango/login/?next=%2Frango%2Fadd_category%2F")
		);
	}

	#[rstest]
	#[tokio::test]
	async fn test_login_required_admits_authenticated(#[future] pool: SqlitePool) {
		let pool = pool.await;
		let user = create(&pool, "sheldon", "cooper").await;
		let handler = login_required(handler_fn(secret), "/rango/login/");
		let mut request = Request::builder().build().unwrap();
		request.extensions.insert(CurrentUser::Authenticated(user));

		let response = handler.handle(request).await.unwrap();

		assert_eq!(response.body_text(), "secret");
	}
}
