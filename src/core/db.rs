//! Database connection and schema migrations
//!
//! Migrations are plain SQL scripts identified by `app_label` and `name`.
//! Applied migrations are recorded in `rango_migrations`, so running
//! `migrate` twice is a no-op.

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;

use crate::core::exception::{Error, Result};

/// A single schema migration
#[derive(Debug, Clone, Copy)]
pub struct Migration {
	pub app_label: &'static str,
	pub name: &'static str,
	pub sql: &'static str,
}

impl Migration {
	pub fn id(&self) -> String {
		format!("{}.{}", self.app_label, self.name)
	}
}

/// Open a SQLite pool with foreign keys enforced
///
/// In-memory databases are limited to a single connection that is never
/// recycled, otherwise every new connection would see an empty database.
pub async fn connect(database_url: &str) -> Result<SqlitePool> {
	let options = SqliteConnectOptions::from_str(database_url)?
		.create_if_missing(true)
		.foreign_keys(true);

	let in_memory = database_url.contains(":memory:") || database_url.contains("mode=memory");
	let pool_options = if in_memory {
		SqlitePoolOptions::new()
			.max_connections(1)
			.idle_timeout(None)
			.max_lifetime(None)
	} else {
		SqlitePoolOptions::new().max_connections(8)
	};

	let pool = pool_options.connect_with(options).await?;
	tracing::debug!(database_url, "database pool opened");
	Ok(pool)
}

/// Apply every migration not yet recorded, in order
///
/// Returns the identifiers of the migrations applied by this call.
pub async fn migrate(pool: &SqlitePool, migrations: &[Migration]) -> Result<Vec<String>> {
	sqlx::query(
		"CREATE TABLE IF NOT EXISTS rango_migrations (
			id TEXT PRIMARY KEY NOT NULL,
			applied_at TEXT NOT NULL
		)",
	)
	.execute(pool)
	.await?;

	let mut applied = Vec::new();
	for migration in migrations {
		let id = migration.id();
		let exists: Option<String> =
			sqlx::query_scalar("SELECT id FROM rango_migrations WHERE id = ?")
				.bind(&id)
				.fetch_optional(pool)
				.await?;
		if exists.is_some() {
			tracing::debug!(migration = %id, "already applied");
			continue;
		}

		let mut tx = pool.begin().await?;
		sqlx::raw_sql(migration.sql)
			.execute(&mut *tx)
			.await
			.map_err(|e| Error::Migration(format!("{}: {}", id, e)))?;
		sqlx::query("INSERT INTO rango_migrations (id, applied_at) VALUES (?, ?)")
			.bind(&id)
			.bind(chrono::Utc::now().to_rfc3339())
			.execute(&mut *tx)
			.await?;
		tx.commit().await?;

		tracing::info!(migration = %id, "applied");
		applied.push(id);
	}
	Ok(applied)
}

/// Whether a database error is a UNIQUE constraint violation
pub fn is_unique_violation(error: &sqlx::Error) -> bool {
	matches!(error, sqlx::Error::Database(db) if db.is_unique_violation())
}
