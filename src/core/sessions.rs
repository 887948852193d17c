//! Server-side sessions
//!
//! A [`Session`] is a key/value map addressed by a random key that travels
//! in a cookie. Data lives in a [`SessionStore`]; the database store keeps
//! it in the `sessions` table so sessions survive restarts.
//!
//! [`SessionMiddleware`] loads the session before the handler runs and
//! persists it afterwards, but only when the handler changed it.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use hyper::header;
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::core::db::Migration;
use crate::core::exception::{Error, Result};
use crate::core::http::{Request, Response};
use crate::core::middleware::{Handler, Middleware};

/// Session payload as stored
pub type SessionData = HashMap<String, Value>;

pub const MIGRATIONS: &[Migration] = &[Migration {
	app_label: "sessions",
	name: "0001_initial",
	sql: include_str!("../../migrations/sessions/0001_initial.sql"),
}];

#[derive(Debug, Default)]
struct SessionState {
	key: Option<String>,
	data: SessionData,
	modified: bool,
	stale_keys: Vec<String>,
}

/// Handle to the current request's session
///
/// Cloning is cheap and every clone sees the same data, which is how the
/// middleware observes changes made by the handler.
///
/// # Examples
///
/// ```
/// use rango::core::sessions::Session;
///
/// let session = Session::new();
/// session.insert("visits", 3).unwrap();
/// assert_eq!(session.get::<i64>("visits"), Some(3));
/// assert!(session.is_modified());
/// ```
#[derive(Debug, Clone, Default)]
pub struct Session {
	inner: Arc<Mutex<SessionState>>,
}

impl Session {
	/// A fresh session without a key
	pub fn new() -> Self {
		Self::default()
	}

	/// Rebuild a session loaded from a store
	pub fn from_store(key: impl Into<String>, data: SessionData) -> Self {
		Self {
			inner: Arc::new(Mutex::new(SessionState {
				key: Some(key.into()),
				data,
				modified: false,
				stale_keys: Vec::new(),
			})),
		}
	}

	pub fn session_key(&self) -> Option<String> {
		self.inner.lock().key.clone()
	}

	/// Typed read; a value of the wrong type reads as `None`
	pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
		self.get_value(key)
			.and_then(|value| serde_json::from_value(value).ok())
	}

	pub fn get_value(&self, key: &str) -> Option<Value> {
		self.inner.lock().data.get(key).cloned()
	}

	pub fn insert<T: Serialize>(&self, key: impl Into<String>, value: T) -> Result<()> {
		let value = serde_json::to_value(value)?;
		let mut state = self.inner.lock();
		state.data.insert(key.into(), value);
		state.modified = true;
		Ok(())
	}

	pub fn contains_key(&self, key: &str) -> bool {
		self.inner.lock().data.contains_key(key)
	}

	pub fn is_empty(&self) -> bool {
		self.inner.lock().data.is_empty()
	}

	pub fn is_modified(&self) -> bool {
		self.inner.lock().modified
	}

	/// Remove all data and drop the key, as on logout
	pub fn flush(&self) {
		let mut state = self.inner.lock();
		state.data.clear();
		if let Some(old) = state.key.take() {
			state.stale_keys.push(old);
		}
		state.modified = true;
	}

	/// Keep the data but move it to a new key, as on login
	pub fn cycle_key(&self) {
		let mut state = self.inner.lock();
		if let Some(old) = state.key.take() {
			state.stale_keys.push(old);
		}
		state.modified = true;
	}

	fn snapshot(&self) -> SessionData {
		self.inner.lock().data.clone()
	}

	fn set_key(&self, key: String) {
		self.inner.lock().key = Some(key);
	}

	fn take_stale_keys(&self) -> Vec<String> {
		std::mem::take(&mut self.inner.lock().stale_keys)
	}
}

impl Request {
	/// The session installed by [`SessionMiddleware`]
	pub fn session(&self) -> Result<Session> {
		self.extensions
			.get::<Session>()
			.cloned()
			.ok_or_else(|| Error::Internal("SessionMiddleware is not installed".to_string()))
	}
}

/// Session store trait for different backends
#[async_trait]
pub trait SessionStore: Send + Sync {
	/// Load unexpired session data
	async fn load(&self, session_key: &str) -> Result<Option<SessionData>>;

	async fn save(
		&self,
		session_key: &str,
		data: &SessionData,
		expire_date: DateTime<Utc>,
	) -> Result<()>;

	async fn delete(&self, session_key: &str) -> Result<()>;

	async fn exists(&self, session_key: &str) -> Result<bool>;

	/// Delete expired sessions, returning how many were removed
	async fn clear_expired(&self) -> Result<u64>;

	fn create_session_key(&self) -> String {
		Uuid::new_v4().simple().to_string()
	}
}

/// In-memory session store for testing and development
#[derive(Default)]
pub struct InMemorySessionStore {
	sessions: Mutex<HashMap<String, (SessionData, DateTime<Utc>)>>,
}

impl InMemorySessionStore {
	pub fn new() -> Self {
		Self::default()
	}
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
	async fn load(&self, session_key: &str) -> Result<Option<SessionData>> {
		let sessions = self.sessions.lock();
		Ok(sessions
			.get(session_key)
			.filter(|(_, expires)| *expires > Utc::now())
			.map(|(data, _)| data.clone()))
	}

	async fn save(
		&self,
		session_key: &str,
		data: &SessionData,
		expire_date: DateTime<Utc>,
	) -> Result<()> {
		self.sessions
			.lock()
			.insert(session_key.to_string(), (data.clone(), expire_date));
		Ok(())
	}

	async fn delete(&self, session_key: &str) -> Result<()> {
		self.sessions.lock().remove(session_key);
		Ok(())
	}

	async fn exists(&self, session_key: &str) -> Result<bool> {
		Ok(self.sessions.lock().contains_key(session_key))
	}

	async fn clear_expired(&self) -> Result<u64> {
		let now = Utc::now();
		let mut sessions = self.sessions.lock();
		let before = sessions.len();
		sessions.retain(|_, (_, expires)| *expires > now);
		Ok((before - sessions.len()) as u64)
	}
}

/// Database-backed session storage using the `sessions` table
pub struct DatabaseSessionStore {
	pool: SqlitePool,
}

impl DatabaseSessionStore {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}
}

#[async_trait]
impl SessionStore for DatabaseSessionStore {
	async fn load(&self, session_key: &str) -> Result<Option<SessionData>> {
		let row: Option<String> = sqlx::query_scalar(
			"SELECT session_data FROM sessions WHERE session_key = ? AND expire_date > ?",
		)
		.bind(session_key)
		.bind(Utc::now())
		.fetch_optional(&self.pool)
		.await?;

		match row {
			Some(raw) => match serde_json::from_str(&raw) {
				Ok(data) => Ok(Some(data)),
				Err(e) => {
					tracing::warn!(error = %e, "discarding undecodable session");
					Ok(None)
				}
			},
			None => Ok(None),
		}
	}

	async fn save(
		&self,
		session_key: &str,
		data: &SessionData,
		expire_date: DateTime<Utc>,
	) -> Result<()> {
		let encoded = serde_json::to_string(data)?;
		sqlx::query(
			"INSERT INTO sessions (session_key, session_data, expire_date) VALUES (?, ?, ?)
			ON CONFLICT(session_key) DO UPDATE SET
				session_data = excluded.session_data,
				expire_date = excluded.expire_date",
		)
		.bind(session_key)
		.bind(encoded)
		.bind(expire_date)
		.execute(&self.pool)
		.await?;
		Ok(())
	}

	async fn delete(&self, session_key: &str) -> Result<()> {
		sqlx::query("DELETE FROM sessions WHERE session_key = ?")
			.bind(session_key)
			.execute(&self.pool)
			.await?;
		Ok(())
	}

	async fn exists(&self, session_key: &str) -> Result<bool> {
		let found: Option<String> =
			sqlx::query_scalar("SELECT session_key FROM sessions WHERE session_key = ?")
				.bind(session_key)
				.fetch_optional(&self.pool)
				.await?;
		Ok(found.is_some())
	}

	async fn clear_expired(&self) -> Result<u64> {
		let result = sqlx::query("DELETE FROM sessions WHERE expire_date <= ?")
			.bind(Utc::now())
			.execute(&self.pool)
			.await?;
		Ok(result.rows_affected())
	}
}

/// Loads and persists the session around each request
pub struct SessionMiddleware {
	store: Arc<dyn SessionStore>,
	cookie_name: String,
	cookie_age: i64,
}

impl SessionMiddleware {
	pub fn new(store: Arc<dyn SessionStore>, cookie_name: impl Into<String>, cookie_age: i64) -> Self {
		Self {
			store,
			cookie_name: cookie_name.into(),
			cookie_age,
		}
	}

	async fn new_session_key(&self) -> Result<String> {
		loop {
			let key = self.store.create_session_key();
			if !self.store.exists(&key).await? {
				return Ok(key);
			}
		}
	}

	fn cookie(&self, value: &str, max_age: i64) -> String {
		format!(
			"{}={}; Max-Age={}; Path=/; HttpOnly; SameSite=Lax",
			self.cookie_name, value, max_age
		)
	}
}

#[async_trait]
impl Middleware for SessionMiddleware {
	async fn process(&self, mut request: Request, next: Arc<dyn Handler>) -> Result<Response> {
		let cookie_key = request.cookie(&self.cookie_name);
		let session = match &cookie_key {
			Some(key) => match self.store.load(key).await? {
				Some(data) => Session::from_store(key.clone(), data),
				None => {
					tracing::debug!("session cookie refers to a missing or expired session");
					Session::new()
				}
			},
			None => Session::new(),
		};
		request.extensions.insert(session.clone());

		let mut response = next.handle(request).await?;

		for stale in session.take_stale_keys() {
			self.store.delete(&stale).await?;
		}

		if !session.is_modified() {
			return Ok(response);
		}

		if session.is_empty() {
			if cookie_key.is_some() {
				response.append_header(header::SET_COOKIE, &self.cookie("", 0));
			}
			return Ok(response);
		}

		let key = match session.session_key() {
			Some(key) => key,
			None => {
				let key = self.new_session_key().await?;
				session.set_key(key.clone());
				key
			}
		};
		let expire_date = Utc::now() + Duration::seconds(self.cookie_age);
		self.store.save(&key, &session.snapshot(), expire_date).await?;
		tracing::debug!("session saved");
		response.append_header(header::SET_COOKIE, &self.cookie(&key, self.cookie_age));

		Ok(response)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::core::db::{connect, migrate};
	use crate::core::middleware::{MiddlewareChain, handler_fn};
	use rstest::{fixture, rstest};

	async fn count_visits(req: Request) -> Result<Response> {
		let session = req.session()?;
		let visits = session.get::<i64>("visits").unwrap_or(0) + 1;
		session.insert("visits", visits)?;
		Ok(Response::ok().with_text(visits.to_string()))
	}

	async fn read_only(req: Request) -> Result<Response> {
		let session = req.session()?;
		Ok(Response::ok().with_text(session.is_empty().to_string()))
	}

	async fn flush(req: Request) -> Result<Response> {
		req.session()?.flush();
		Ok(Response::ok())
	}

	#[fixture]
	fn store() -> Arc<InMemorySessionStore> {
		Arc::new(InMemorySessionStore::new())
	}

	fn app<F, Fut>(store: Arc<InMemorySessionStore>, view: F) -> Arc<dyn Handler>
	where
		F: Fn(Request) -> Fut + Send + Sync + 'static,
		Fut: std::future::Future<Output = Result<Response>> + Send + 'static,
	{
		MiddlewareChain::new(Arc::new(handler_fn(view)))
			.with_middleware(Arc::new(SessionMiddleware::new(store, "sessionid", 3600)))
			.build()
	}

	fn set_cookie(response: &Response) -> Option<String> {
		response
			.headers
			.get(header::SET_COOKIE)
			.and_then(|v| v.to_str().ok())
			.map(str::to_string)
	}

	fn key_from_cookie(cookie: &str) -> String {
		cookie
			.split(';')
			.next()
			.and_then(|pair| pair.split_once('='))
			.map(|(_, v)| v.to_string())
			.unwrap()
	}

	#[rstest]
	fn test_cycle_key_keeps_data() {
		let session = Session::from_store("old", SessionData::new());
		session.insert("csrf_token", "abc").unwrap();

		session.cycle_key();

		assert_eq!(session.session_key(), None);
		assert_eq!(session.get::<String>("csrf_token").as_deref(), Some("abc"));
		assert_eq!(session.take_stale_keys(), vec!["old".to_string()]);
	}

	#[rstest]
	fn test_flush_clears_everything() {
		let session = Session::from_store("old", SessionData::new());
		session.insert("_auth_user_id", 1).unwrap();

		session.flush();

		assert!(session.is_empty());
		assert_eq!(session.session_key(), None);
	}

	#[rstest]
	fn test_wrong_type_reads_as_none() {
		let session = Session::new();
		session.insert("visits", "many").unwrap();

		assert_eq!(session.get::<i64>("visits"), None);
	}

	#[rstest]
	#[tokio::test]
	async fn test_untouched_session_sets_no_cookie(store: Arc<InMemorySessionStore>) {
		let handler = app(store, read_only);

		let response = handler
			.handle(Request::builder().build().unwrap())
			.await
			.unwrap();

		assert_eq!(response.body_text(), "true");
		assert!(set_cookie(&response).is_none());
	}

	#[rstest]
	#[tokio::test]
	async fn test_session_round_trip_through_cookie(store: Arc<InMemorySessionStore>) {
		let handler = app(store.clone(), count_visits);

		let first = handler
			.handle(Request::builder().build().unwrap())
			.await
			.unwrap();
		let cookie = set_cookie(&first).unwrap();
		assert!(cookie.contains("HttpOnly"));
		let key = key_from_cookie(&cookie);

		let second = handler
			.handle(
				Request::builder()
					.header("cookie", &format!("sessionid={}", key))
					.build()
					.unwrap(),
			)
			.await
			.unwrap();

		assert_eq!(first.body_text(), "1");
		assert_eq!(second.body_text(), "2");
		assert!(store.exists(&key).await.unwrap());
	}

	#[rstest]
	#[tokio::test]
	async fn test_flush_deletes_cookie_and_store_entry(store: Arc<InMemorySessionStore>) {
		let mut data = SessionData::new();
		data.insert("_auth_user_id".to_string(), serde_json::json!(1));
		store
			.save("existing", &data, Utc::now() + Duration::hours(1))
			.await
			.unwrap();
		let handler = app(store.clone(), flush);

		let response = handler
			.handle(
				Request::builder()
					.header("cookie", "sessionid=existing")
					.build()
					.unwrap(),
			)
			.await
			.unwrap();

		assert!(set_cookie(&response).unwrap().contains("Max-Age=0"));
		assert!(!store.exists("existing").await.unwrap());
	}

	#[rstest]
	#[tokio::test]
	async fn test_expired_sessions_are_ignored_and_cleared(store: Arc<InMemorySessionStore>) {
		store
			.save("old", &SessionData::new(), Utc::now() - Duration::seconds(1))
			.await
			.unwrap();

		assert!(store.load("old").await.unwrap().is_none());
		assert_eq!(store.clear_expired().await.unwrap(), 1);
	}

	#[fixture]
	async fn db_store() -> DatabaseSessionStore {
		let pool = connect("sqlite::memory:").await.unwrap();
		migrate(&pool, MIGRATIONS).await.unwrap();
		DatabaseSessionStore::new(pool)
	}

	#[rstest]
	#[tokio::test]
	async fn test_database_store_skips_and_clears_expired_rows(
		#[future] db_store: DatabaseSessionStore,
	) {
		let store = db_store.await;
		let mut data = SessionData::new();
		data.insert("visits".to_string(), Value::from(2));
		store
			.save("stale", &data, Utc::now() - Duration::seconds(5))
			.await
			.unwrap();
		store
			.save("fresh", &data, Utc::now() + Duration::hours(1))
			.await
			.unwrap();

		assert!(store.load("stale").await.unwrap().is_none());
		assert_eq!(store.load("fresh").await.unwrap(), Some(data));

		assert_eq!(store.clear_expired().await.unwrap(), 1);
		assert!(!store.exists("stale").await.unwrap());
		assert!(store.exists("fresh").await.unwrap());
		assert_eq!(store.clear_expired().await.unwrap(), 0);
	}

	#[rstest]
	#[tokio::test]
	async fn test_database_store_save_replaces_existing_row(
		#[future] db_store: DatabaseSessionStore,
	) {
		let store = db_store.await;
		let expires = Utc::now() + Duration::hours(1);
		store.save("key", &SessionData::new(), expires).await.unwrap();
		let mut data = SessionData::new();
		data.insert("user_id".to_string(), Value::from(7));

		store.save("key", &data, expires).await.unwrap();

		assert_eq!(store.load("key").await.unwrap(), Some(data));
	}
}
