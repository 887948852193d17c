//! URL configuration for the rango project
//!
//! The site root serves the rango index; everything else lives under
//! `/rango/`.

use crate::apps::rango;
use crate::config::settings::Settings;
use crate::core::middleware::handler_fn;
use crate::core::router::Router;

pub fn url_patterns(settings: &Settings) -> Router {
	Router::new()
		.path("/", handler_fn(rango::views::index), "index")
		.include("/rango/", rango::urls::url_patterns(&settings.login_url))
}
