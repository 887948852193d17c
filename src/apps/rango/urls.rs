//! URL patterns of the rango app, mounted at `/rango/`

use crate::core::auth::login_required;
use crate::core::middleware::handler_fn;
use crate::core::router::Router;

use super::views;

/// Route table; views that need a logged in user redirect to `login_url`
pub fn url_patterns(login_url: &str) -> Router {
	Router::new()
		.with_namespace("rango")
		.path("/", handler_fn(views::index), "index")
		.path("/about/", handler_fn(views::about), "about")
		.path(
			"/add_category/",
			login_required(handler_fn(views::add_category), login_url),
			"add_category",
		)
		.path(
			"/category/{category_name_slug:slug}/",
			handler_fn(views::show_category),
			"show_category",
		)
		.path(
			"/category/{category_name_slug:slug}/add_page/",
			login_required(handler_fn(views::add_page), login_url),
			"add_page",
		)
		.path("/register/", handler_fn(views::register), "register")
		.path("/login/", handler_fn(views::user_login), "login")
		.path(
			"/restricted/",
			login_required(handler_fn(views::restricted), login_url),
			"restricted",
		)
		.path(
			"/logout/",
			login_required(handler_fn(views::user_logout), login_url),
			"logout",
		)
		.path("/goto/", handler_fn(views::goto), "goto")
		.path(
			"/like_category/",
			login_required(handler_fn(views::like_category), login_url),
			"like_category",
		)
		.path("/suggest/", handler_fn(views::suggest_category), "suggest")
}
