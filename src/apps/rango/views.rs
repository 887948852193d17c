//! Rango views
//!
//! Every view is a plain `async fn(Request) -> Result<Response>`. Shared
//! state comes from [`Request::state`], the session from
//! [`Request::session`] and the logged in user from [`Request::user`].

use chrono::{DateTime, Utc};
use serde_json::Value;
use tera::Context;

use crate::apps::rango::forms::{
	USERNAME_TAKEN, category_form, cleaned_string, page_form, user_form, user_profile_form,
};
use crate::apps::rango::models::{Category, Page, UserProfile};
use crate::core::auth::{self, NewUser, User};
use crate::core::exception::{Error, Result};
use crate::core::http::{Request, Response};
use crate::core::sessions::Session;
use crate::core::shortcuts::{
	get_object_or_404, is_local_url, redirect, redirect_to_route, render,
};

pub const BOLD_MESSAGE: &str = "Crunchy, creamy, cookie, candy, cupcake!";

pub const ACCOUNT_DISABLED: &str = "Your Rango account is disabled.";

pub const INVALID_LOGIN: &str = "Invalid login details supplied.";

/// Path parameter carrying a category slug
pub const SLUG_PARAM: &str = "category_name_slug";

const TOP_LISTING_SIZE: i64 = 5;
const MAX_SUGGESTIONS: i64 = 8;

/// Count visits, at most one per day, in the session
///
/// A missing `visits` counts as 1 and a missing or unreadable
/// `last_visit` as `now`. Returns the stored visit count.
pub fn visitor_cookie_handler(session: &Session, now: DateTime<Utc>) -> Result<i64> {
	let visits = session.get::<i64>("visits").unwrap_or(1);
	let last_visit = session
		.get::<String>("last_visit")
		.and_then(|raw| DateTime::parse_from_rfc3339(&raw).ok())
		.map(|time| time.with_timezone(&Utc))
		.unwrap_or(now);

	let (visits, last_visit) = if (now - last_visit).num_days() > 0 {
		(visits + 1, now)
	} else {
		(visits, last_visit)
	};

	session.insert("visits", visits)?;
	session.insert("last_visit", last_visit.to_rfc3339())?;
	Ok(visits)
}

/// Home page: most liked categories and most viewed pages
pub async fn index(request: Request) -> Result<Response> {
	let state = request.state()?;
	let categories = Category::top_by_likes(&state.pool, TOP_LISTING_SIZE).await?;
	let pages = Page::top_by_views(&state.pool, TOP_LISTING_SIZE).await?;
	let visits = visitor_cookie_handler(&request.session()?, Utc::now())?;

	let mut context = Context::new();
	context.insert("boldmessage", BOLD_MESSAGE);
	context.insert("categories", &categories);
	context.insert("pages", &pages);
	context.insert("visits", &visits);
	render(&request, "rango/index.html", context)
}

pub async fn about(request: Request) -> Result<Response> {
	let visits = visitor_cookie_handler(&request.session()?, Utc::now())?;

	let mut context = Context::new();
	context.insert("visits", &visits);
	render(&request, "rango/about.html", context)
}

/// One category and its pages
///
/// An unknown slug still renders the page, with `category` and `pages`
/// set to null.
pub async fn show_category(request: Request) -> Result<Response> {
	let state = request.state()?;
	let slug = request.path_param(SLUG_PARAM).unwrap_or_default();

	let mut context = Context::new();
	match Category::get_by_slug(&state.pool, slug).await? {
		Some(category) => {
			let pages = Page::for_category(&state.pool, category.id).await?;
			context.insert("category", &category);
			context.insert("pages", &pages);
		}
		None => {
			tracing::debug!(slug, "no category with this slug");
			context.insert("category", &Value::Null);
			context.insert("pages", &Value::Null);
		}
	}
	render(&request, "rango/category.html", context)
}

pub async fn add_category(request: Request) -> Result<Response> {
	let state = request.state()?;
	let mut form = category_form();

	if request.is_post() {
		form.bind_strings(&request.form_data()?);
		if form.is_valid() {
			let mut category = Category {
				views: form.cleaned_i64("views").unwrap_or_default(),
				likes: form.cleaned_i64("likes").unwrap_or_default(),
				..Category::new(cleaned_string(&form, "name"))
			};
			match category.save(&state.pool).await {
				Ok(()) => {
					tracing::info!(name = %category.name, slug = %category.slug, "category added");
					return redirect_to_route(&request, "rango:index", &[]);
				}
				Err(Error::BadRequest(message)) => form.add_error(None, message),
				Err(e) => return Err(e),
			}
		} else {
			tracing::debug!(errors = ?form.errors(), "category form rejected");
		}
	}

	let mut context = Context::new();
	context.insert("form", &form.to_context());
	render(&request, "rango/add_category.html", context)
}

pub async fn add_page(request: Request) -> Result<Response> {
	let state = request.state()?;
	let slug = request.path_param(SLUG_PARAM).unwrap_or_default();
	let Some(category) = Category::get_by_slug(&state.pool, slug).await? else {
		return redirect_to_route(&request, "rango:index", &[]);
	};
	let mut form = page_form();

	if request.is_post() {
		form.bind_strings(&request.form_data()?);
		if form.is_valid() {
			let mut page = Page::new(
				category.id,
				cleaned_string(&form, "title"),
				cleaned_string(&form, "url"),
			);
			page.save(&state.pool).await?;
			tracing::info!(category = %category.slug, title = %page.title, "page added");
			return redirect_to_route(
				&request,
				"rango:show_category",
				&[(SLUG_PARAM, category.slug.as_str())],
			);
		}
		tracing::debug!(errors = ?form.errors(), "page form rejected");
	}

	let mut context = Context::new();
	context.insert("form", &form.to_context());
	context.insert("category", &category);
	render(&request, "rango/add_page.html", context)
}

/// Sign up with a user form and a profile form posted together
pub async fn register(request: Request) -> Result<Response> {
	let state = request.state()?;
	let mut user_form = user_form();
	let mut profile_form = user_profile_form();
	let mut registered = false;

	if request.is_post() {
		let data = request.form_data()?;
		user_form.bind_strings(&data);
		profile_form.bind_strings(&data);

		// Validate both so every error is shown at once
		let user_valid = user_form.is_valid();
		let profile_valid = profile_form.is_valid();

		let username = cleaned_string(&user_form, "username");
		if user_valid && User::username_exists(&state.pool, &username).await? {
			user_form.add_error(Some("username"), USERNAME_TAKEN);
		}

		if user_valid && profile_valid && !user_form.has_errors() {
			let email = cleaned_string(&user_form, "email");
			let password = cleaned_string(&user_form, "password");
			let new_user = NewUser {
				username: &username,
				email: &email,
				password: &password,
				is_superuser: false,
			};
			match User::create(&state.pool, state.hasher.as_ref(), &new_user).await {
				Ok(user) => {
					let mut profile =
						UserProfile::new(user.id, cleaned_string(&profile_form, "website"));
					profile.save(&state.pool).await?;
					registered = true;
				}
				Err(Error::BadRequest(message)) => user_form.add_error(Some("username"), message),
				Err(e) => return Err(e),
			}
		} else {
			tracing::debug!(
				user_errors = ?user_form.errors(),
				profile_errors = ?profile_form.errors(),
				"registration rejected"
			);
		}
	}

	let mut context = Context::new();
	context.insert("user_form", &user_form.to_context());
	context.insert("profile_form", &profile_form.to_context());
	context.insert("registered", &registered);
	render(&request, "rango/register.html", context)
}

pub async fn user_login(request: Request) -> Result<Response> {
	if !request.is_post() {
		let mut context = Context::new();
		context.insert("next", &request.query("next").unwrap_or_default());
		return render(&request, "rango/login.html", context);
	}

	let state = request.state()?;
	let data = request.form_data()?;
	let username = data.get("username").map(String::as_str).unwrap_or_default();
	let password = data.get("password").map(String::as_str).unwrap_or_default();

	match auth::authenticate(&state.pool, state.hasher.as_ref(), username, password).await? {
		Some(user) if user.is_active => {
			auth::login(&state.pool, &request.session()?, &user).await?;
			let next = data
				.get("next")
				.cloned()
				.or_else(|| request.query("next"))
				.filter(|next| is_local_url(next));
			match next {
				Some(next) => Ok(redirect(next)),
				None => redirect_to_route(&request, "rango:index", &[]),
			}
		}
		Some(user) => {
			tracing::warn!(username = %user.username, "login attempt on a disabled account");
			Ok(Response::ok().with_text(ACCOUNT_DISABLED))
		}
		None => {
			tracing::warn!(username, "invalid login details supplied");
			Ok(Response::ok().with_text(INVALID_LOGIN))
		}
	}
}

pub async fn restricted(request: Request) -> Result<Response> {
	render(&request, "rango/restricted.html", Context::new())
}

pub async fn user_logout(request: Request) -> Result<Response> {
	let username = request.user().username().to_string();
	auth::logout(&request.session()?);
	tracing::info!(%username, "user logged out");
	redirect_to_route(&request, "rango:index", &[])
}

/// Count a view of `?page_id=` and send the visitor to the page's URL
pub async fn goto(request: Request) -> Result<Response> {
	let state = request.state()?;
	let page_id = request
		.query("page_id")
		.and_then(|raw| raw.trim().parse::<i64>().ok());

	let page = match page_id {
		Some(id) => Page::get_by_id(&state.pool, id).await?,
		None => None,
	};
	match page {
		Some(mut page) => {
			page.record_view(&state.pool).await?;
			Ok(redirect(&page.url))
		}
		None => redirect_to_route(&request, "rango:index", &[]),
	}
}

/// Add a like to `?category_id=` and answer with the new count
pub async fn like_category(request: Request) -> Result<Response> {
	let state = request.state()?;
	let raw = request
		.query("category_id")
		.ok_or_else(|| Error::BadRequest("Missing category_id".to_string()))?;
	let id = raw
		.trim()
		.parse::<i64>()
		.map_err(|_| Error::BadRequest(format!("Invalid category_id '{}'", raw)))?;

	let mut category = get_object_or_404(Category::get_by_id(&state.pool, id).await?, "Category")?;
	let likes = category.add_like(&state.pool).await?;
	Ok(Response::ok().with_text(likes.to_string()))
}

/// Categories whose name starts with `?suggestion=`, as an HTML fragment
pub async fn suggest_category(request: Request) -> Result<Response> {
	let state = request.state()?;
	let prefix = request.query("suggestion").unwrap_or_default();
	let categories = Category::starting_with(&state.pool, prefix.trim(), MAX_SUGGESTIONS).await?;

	let mut context = Context::new();
	context.insert("categories", &categories);
	render(&request, "rango/categories.html", context)
}
