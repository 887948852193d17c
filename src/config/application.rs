//! Application assembly
//!
//! [`Application`] owns everything a request needs: the database pool,
//! settings, template engine and URL table. It installs them into the
//! request extensions and then runs the middleware stack:
//!
//! 1. request logging
//! 2. sessions
//! 3. authentication
//! 4. CSRF protection
//! 5. URL dispatch

use async_trait::async_trait;
use sqlx::SqlitePool;
use std::sync::Arc;

use crate::apps::rango;
use crate::config::settings::Settings;
use crate::config::urls;
use crate::core::auth::{self, Argon2Hasher, AuthenticationMiddleware, PasswordHasher};
use crate::core::csrf::CsrfMiddleware;
use crate::core::db::{self, Migration};
use crate::core::exception::{Error, Result};
use crate::core::http::{Request, Response};
use crate::core::middleware::{Handler, MiddlewareChain, RequestLogMiddleware};
use crate::core::router::UrlReverser;
use crate::core::sessions::{self, DatabaseSessionStore, SessionMiddleware, SessionStore};
use crate::core::templates::TemplateEngine;

/// Every migration of the project, in dependency order
pub fn migrations() -> Vec<Migration> {
	[auth::MIGRATIONS, sessions::MIGRATIONS, rango::MIGRATIONS].concat()
}

/// Shared state available to every view
#[derive(Clone)]
pub struct AppState {
	pub pool: SqlitePool,
	pub settings: Arc<Settings>,
	pub hasher: Arc<dyn PasswordHasher>,
}

impl Request {
	/// The [`AppState`] installed by [`Application`]
	pub fn state(&self) -> Result<AppState> {
		self.extensions
			.get::<AppState>()
			.cloned()
			.ok_or_else(|| Error::Internal("Application state is not installed".to_string()))
	}
}

/// A (pattern, name) pair as listed by `manage showurls`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteInfo {
	pub pattern: String,
	pub name: String,
}

pub struct Application {
	state: AppState,
	templates: Arc<TemplateEngine>,
	urls: Arc<UrlReverser>,
	routes: Vec<RouteInfo>,
	handler: Arc<dyn Handler>,
}

impl Application {
	/// Open the configured database and build the application
	pub async fn from_settings(settings: Settings) -> Result<Self> {
		let pool = db::connect(&settings.database_url).await?;
		Self::new(settings, pool)
	}

	/// Build the application around an existing pool
	///
	/// Migrations are not applied; see [`Application::migrate`].
	pub fn new(settings: Settings, pool: SqlitePool) -> Result<Self> {
		settings.validate()?;

		let router = urls::url_patterns(&settings);
		let reverser = Arc::new(router.reverser());
		let routes = router
			.routes()
			.iter()
			.map(|route| RouteInfo {
				pattern: route.path().to_string(),
				name: route.name.clone().unwrap_or_default(),
			})
			.collect();
		let templates = Arc::new(TemplateEngine::new(
			settings.template_dir.as_deref(),
			reverser.clone(),
		)?);

		let store: Arc<dyn SessionStore> = Arc::new(DatabaseSessionStore::new(pool.clone()));
		let csrf = if settings.csrf_enabled {
			CsrfMiddleware::new()
		} else {
			CsrfMiddleware::disabled()
		};
		let handler = MiddlewareChain::new(Arc::new(router))
			.with_middleware(Arc::new(RequestLogMiddleware))
			.with_middleware(Arc::new(SessionMiddleware::new(
				store,
				settings.session_cookie_name.clone(),
				settings.session_cookie_age,
			)))
			.with_middleware(Arc::new(AuthenticationMiddleware::new(pool.clone())))
			.with_middleware(Arc::new(csrf))
			.build();

		Ok(Self {
			state: AppState {
				pool,
				settings: Arc::new(settings),
				hasher: Arc::new(Argon2Hasher::new()),
			},
			templates,
			urls: reverser,
			routes,
			handler,
		})
	}

	/// Apply pending migrations, returning the ones applied
	pub async fn migrate(&self) -> Result<Vec<String>> {
		db::migrate(&self.state.pool, &migrations()).await
	}

	pub fn state(&self) -> &AppState {
		&self.state
	}

	pub fn pool(&self) -> &SqlitePool {
		&self.state.pool
	}

	pub fn settings(&self) -> &Settings {
		&self.state.settings
	}

	pub fn routes(&self) -> &[RouteInfo] {
		&self.routes
	}

	pub fn urls(&self) -> &UrlReverser {
		&self.urls
	}
}

#[async_trait]
impl Handler for Application {
	async fn handle(&self, mut request: Request) -> Result<Response> {
		request.extensions.insert(self.state.clone());
		request.extensions.insert(self.templates.clone());
		request.extensions.insert(self.urls.clone());
		self.handler.handle(request).await
	}
}
