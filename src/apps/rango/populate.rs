//! Demo data for `manage populate`
//!
//! Running it twice leaves the database unchanged: categories are looked
//! up by name and pages by title within their category.

use sqlx::SqlitePool;

use crate::apps::rango::models::{Category, Page};
use crate::core::exception::Result;

pub struct PageSeed {
	pub title: &'static str,
	pub url: &'static str,
	pub views: i64,
}

pub struct CategorySeed {
	pub name: &'static str,
	pub views: i64,
	pub likes: i64,
	pub pages: &'static [PageSeed],
}

pub const SEED: &[CategorySeed] = &[
	CategorySeed {
		name: "Python",
		views: 128,
		likes: 64,
		pages: &[
			PageSeed {
				title: "Official Python Tutorial",
				url: "http://docs.python.org/3/tutorial/",
				views: 114,
			},
			PageSeed {
				title: "How to Think like a Computer Scientist",
				url: "http://www.greenteapress.com/thinkpython/",
				views: 53,
			},
			PageSeed {
				title: "Learn Python in 10 Minutes",
				url: "http://www.korokithakis.net/tutorials/python/",
				views: 20,
			},
		],
	},
	CategorySeed {
		name: "Django",
		views: 64,
		likes: 32,
		pages: &[
			PageSeed {
				title: "Official Django Tutorial",
				url: "https://docs.djangoproject.com/en/2.1/intro/tutorial01/",
				views: 32,
			},
			PageSeed {
				title: "Django Rocks",
				url: "http://www.djangorocks.com/",
				views: 12,
			},
			PageSeed {
				title: "How to Tango with Django",
				url: "http://www.tangowithdjango.com/",
				views: 1128,
			},
		],
	},
	CategorySeed {
		name: "Other Frameworks",
		views: 32,
		likes: 16,
		pages: &[
			PageSeed {
				title: "Bottle",
				url: "http://bottlepy.org/docs/dev/",
				views: 54,
			},
			PageSeed {
				title: "Flask",
				url: "http://flask.pocoo.org",
				views: 64,
			},
		],
	},
];

/// Outcome of a populate run
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PopulateSummary {
	pub categories_created: usize,
	pub pages_created: usize,
}

/// Create the demo categories and pages that do not exist yet
///
/// Counters are only set on rows created by this call.
pub async fn populate(pool: &SqlitePool) -> Result<PopulateSummary> {
	let mut summary = PopulateSummary::default();

	for seed in SEED {
		let (mut category, created) = Category::get_or_create(pool, seed.name).await?;
		if created {
			category.views = seed.views;
			category.likes = seed.likes;
			category.save(pool).await?;
			summary.categories_created += 1;
			tracing::info!(category = %category.name, "category created");
		}

		for page_seed in seed.pages {
			let (mut page, created) =
				Page::get_or_create(pool, category.id, page_seed.title, page_seed.url).await?;
			if created {
				page.views = page_seed.views;
				page.save(pool).await?;
				summary.pages_created += 1;
				tracing::info!(category = %category.name, page = %page.title, "page created");
			}
		}
	}

	Ok(summary)
}
