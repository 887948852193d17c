//! Rango models: `Category`, `Page` and `UserProfile`

use serde::Serialize;
use sqlx::SqlitePool;

use crate::core::db::is_unique_violation;
use crate::core::exception::{Error, Result};
use crate::core::text::slugify;

pub const NAME_MAX_LENGTH: usize = 128;
pub const TITLE_MAX_LENGTH: usize = 128;
pub const URL_MAX_LENGTH: usize = 200;

pub const CATEGORY_EXISTS: &str = "Category with this Name already exists.";

/// A named group of pages
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, sqlx::FromRow)]
pub struct Category {
	pub id: i64,
	pub name: String,
	pub views: i64,
	pub likes: i64,
	pub slug: String,
}

impl Category {
	pub fn new(name: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			..Self::default()
		}
	}

	/// Insert or update; the slug is always recomputed from the name
	///
	/// A clash on name or slug is reported as [`Error::BadRequest`] with
	/// [`CATEGORY_EXISTS`].
	pub async fn save(&mut self, pool: &SqlitePool) -> Result<()> {
		self.slug = slugify(&self.name);

		let result = if self.id == 0 {
			sqlx::query_scalar::<_, i64>(
				"INSERT INTO rango_category (name, views, likes, slug) VALUES (?, ?, ?, ?) RETURNING id",
			)
			.bind(&self.name)
			.bind(self.views)
			.bind(self.likes)
			.bind(&self.slug)
			.fetch_one(pool)
			.await
			.map(|id| self.id = id)
		} else {
			sqlx::query("UPDATE rango_category SET name = ?, views = ?, likes = ?, slug = ? WHERE id = ?")
				.bind(&self.name)
				.bind(self.views)
				.bind(self.likes)
				.bind(&self.slug)
				.bind(self.id)
				.execute(pool)
				.await
				.map(|_| ())
		};

		result.map_err(|e| {
			if is_unique_violation(&e) {
				Error::BadRequest(CATEGORY_EXISTS.to_string())
			} else {
				Error::Database(e)
			}
		})
	}

	pub async fn get_by_slug(pool: &SqlitePool, slug: &str) -> Result<Option<Category>> {
		Ok(sqlx::query_as("SELECT * FROM rango_category WHERE slug = ?")
			.bind(slug)
			.fetch_optional(pool)
			.await?)
	}

	pub async fn get_by_id(pool: &SqlitePool, id: i64) -> Result<Option<Category>> {
		Ok(sqlx::query_as("SELECT * FROM rango_category WHERE id = ?")
			.bind(id)
			.fetch_optional(pool)
			.await?)
	}

	pub async fn get_by_name(pool: &SqlitePool, name: &str) -> Result<Option<Category>> {
		Ok(sqlx::query_as("SELECT * FROM rango_category WHERE name = ?")
			.bind(name)
			.fetch_optional(pool)
			.await?)
	}

	pub async fn all(pool: &SqlitePool) -> Result<Vec<Category>> {
		Ok(sqlx::query_as("SELECT * FROM rango_category ORDER BY name")
			.fetch_all(pool)
			.await?)
	}

	/// Most liked first, ties broken by name
	pub async fn top_by_likes(pool: &SqlitePool, n: i64) -> Result<Vec<Category>> {
		Ok(sqlx::query_as(
			"SELECT * FROM rango_category ORDER BY likes DESC, name ASC LIMIT ?",
		)
		.bind(n)
		.fetch_all(pool)
		.await?)
	}

	/// Case-insensitive name prefix search; an empty prefix matches everything
	pub async fn starting_with(pool: &SqlitePool, prefix: &str, max: i64) -> Result<Vec<Category>> {
		let pattern = format!("{}%", escape_like(prefix));
		Ok(sqlx::query_as(
			"SELECT * FROM rango_category WHERE name LIKE ? ESCAPE '\\' ORDER BY name LIMIT ?",
		)
		.bind(pattern)
		.bind(max)
		.fetch_all(pool)
		.await?)
	}

	/// Increment `likes` in the database and return the new count
	pub async fn add_like(&mut self, pool: &SqlitePool) -> Result<i64> {
		let likes: Option<i64> = sqlx::query_scalar(
			"UPDATE rango_category SET likes = likes + 1 WHERE id = ? RETURNING likes",
		)
		.bind(self.id)
		.fetch_optional(pool)
		.await?;

		self.likes = likes.ok_or_else(|| Error::NotFound(format!("Category {} not found", self.id)))?;
		Ok(self.likes)
	}

	/// Fetch by name, creating the category when missing
	///
	/// The flag is true when a row was created.
	pub async fn get_or_create(pool: &SqlitePool, name: &str) -> Result<(Category, bool)> {
		if let Some(existing) = Self::get_by_name(pool, name).await? {
			return Ok((existing, false));
		}
		let mut category = Category::new(name);
		category.save(pool).await?;
		Ok((category, true))
	}
}

/// `%` and `_` are wildcards in LIKE
fn escape_like(value: &str) -> String {
	let mut escaped = String::with_capacity(value.len());
	for ch in value.chars() {
		if matches!(ch, '%' | '_' | '\\') {
			escaped.push('\\');
		}
		escaped.push(ch);
	}
	escaped
}

/// A link filed under a category
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, sqlx::FromRow)]
pub struct Page {
	pub id: i64,
	pub category_id: i64,
	pub title: String,
	pub url: String,
	pub views: i64,
}

impl Page {
	pub fn new(category_id: i64, title: impl Into<String>, url: impl Into<String>) -> Self {
		Self {
			category_id,
			title: title.into(),
			url: url.into(),
			..Self::default()
		}
	}

	pub async fn save(&mut self, pool: &SqlitePool) -> Result<()> {
		if self.id == 0 {
			self.id = sqlx::query_scalar(
				"INSERT INTO rango_page (category_id, title, url, views) VALUES (?, ?, ?, ?) RETURNING id",
			)
			.bind(self.category_id)
			.bind(&self.title)
			.bind(&self.url)
			.bind(self.views)
			.fetch_one(pool)
			.await?;
		} else {
			sqlx::query("UPDATE rango_page SET category_id = ?, title = ?, url = ?, views = ? WHERE id = ?")
				.bind(self.category_id)
				.bind(&self.title)
				.bind(&self.url)
				.bind(self.views)
				.bind(self.id)
				.execute(pool)
				.await?;
		}
		Ok(())
	}

	pub async fn get_by_id(pool: &SqlitePool, id: i64) -> Result<Option<Page>> {
		Ok(sqlx::query_as("SELECT * FROM rango_page WHERE id = ?")
			.bind(id)
			.fetch_optional(pool)
			.await?)
	}

	/// Pages of one category, most viewed first
	pub async fn for_category(pool: &SqlitePool, category_id: i64) -> Result<Vec<Page>> {
		Ok(sqlx::query_as(
			"SELECT * FROM rango_page WHERE category_id = ? ORDER BY views DESC, title ASC",
		)
		.bind(category_id)
		.fetch_all(pool)
		.await?)
	}

	pub async fn top_by_views(pool: &SqlitePool, n: i64) -> Result<Vec<Page>> {
		Ok(sqlx::query_as(
			"SELECT * FROM rango_page ORDER BY views DESC, title ASC LIMIT ?",
		)
		.bind(n)
		.fetch_all(pool)
		.await?)
	}

	/// Increment `views` in the database and return the new count
	pub async fn record_view(&mut self, pool: &SqlitePool) -> Result<i64> {
		let views: Option<i64> = sqlx::query_scalar(
			"UPDATE rango_page SET views = views + 1 WHERE id = ? RETURNING views",
		)
		.bind(self.id)
		.fetch_optional(pool)
		.await?;

		self.views = views.ok_or_else(|| Error::NotFound(format!("Page {} not found", self.id)))?;
		Ok(self.views)
	}

	/// Fetch by category and title, creating the page when missing
	pub async fn get_or_create(
		pool: &SqlitePool,
		category_id: i64,
		title: &str,
		url: &str,
	) -> Result<(Page, bool)> {
		let existing: Option<Page> =
			sqlx::query_as("SELECT * FROM rango_page WHERE category_id = ? AND title = ?")
				.bind(category_id)
				.bind(title)
				.fetch_optional(pool)
				.await?;
		if let Some(page) = existing {
			return Ok((page, false));
		}
		let mut page = Page::new(category_id, title, url);
		page.save(pool).await?;
		Ok((page, true))
	}
}

/// Extra registration details for a user
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, sqlx::FromRow)]
pub struct UserProfile {
	pub id: i64,
	pub user_id: i64,
	pub website: String,
	/// Path of an uploaded picture, relative to the media root
	pub picture: Option<String>,
}

impl UserProfile {
	pub fn new(user_id: i64, website: impl Into<String>) -> Self {
		Self {
			user_id,
			website: website.into(),
			..Self::default()
		}
	}

	pub async fn save(&mut self, pool: &SqlitePool) -> Result<()> {
		if self.id == 0 {
			self.id = sqlx::query_scalar(
				"INSERT INTO rango_userprofile (user_id, website, picture) VALUES (?, ?, ?) RETURNING id",
			)
			.bind(self.user_id)
			.bind(&self.website)
			.bind(&self.picture)
			.fetch_one(pool)
			.await?;
		} else {
			sqlx::query("UPDATE rango_userprofile SET website = ?, picture = ? WHERE id = ?")
				.bind(&self.website)
				.bind(&self.picture)
				.bind(self.id)
				.execute(pool)
				.await?;
		}
		Ok(())
	}

	pub async fn for_user(pool: &SqlitePool, user_id: i64) -> Result<Option<UserProfile>> {
		Ok(sqlx::query_as("SELECT * FROM rango_userprofile WHERE user_id = ?")
			.bind(user_id)
			.fetch_optional(pool)
			.await?)
	}
}
