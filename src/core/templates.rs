//! Tera template engine
//!
//! The application's templates are compiled into the binary. When a
//! template directory is configured, every `*.html` file below it is loaded
//! too and takes precedence over the built-in template of the same name.

use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tera::{Context, Tera};

use crate::core::exception::{Error, Result};
use crate::core::router::UrlReverser;

const BUILTIN_TEMPLATES: &[(&str, &str)] = &[
	("rango/base.html", include_str!("../../templates/rango/base.html")),
	("rango/index.html", include_str!("../../templates/rango/index.html")),
	("rango/about.html", include_str!("../../templates/rango/about.html")),
	("rango/category.html", include_str!("../../templates/rango/category.html")),
	("rango/add_category.html", include_str!("../../templates/rango/add_category.html")),
	("rango/add_page.html", include_str!("../../templates/rango/add_page.html")),
	("rango/register.html", include_str!("../../templates/rango/register.html")),
	("rango/login.html", include_str!("../../templates/rango/login.html")),
	("rango/restricted.html", include_str!("../../templates/rango/restricted.html")),
	("rango/categories.html", include_str!("../../templates/rango/categories.html")),
	("rango/form_fields.html", include_str!("../../templates/rango/form_fields.html")),
];

/// Compiled templates plus the `url()` function
pub struct TemplateEngine {
	tera: Tera,
}

impl TemplateEngine {
	/// Load the built-in templates, overridden by `template_dir` when given
	pub fn new(template_dir: Option<&Path>, urls: Arc<UrlReverser>) -> Result<Self> {
		let mut tera = match template_dir {
			Some(dir) if dir.is_dir() => {
				let glob = format!("{}/**/*.html", dir.display());
				let tera = Tera::parse(&glob)?;
				tracing::debug!(dir = %dir.display(), count = tera.get_template_names().count(), "templates loaded from disk");
				tera
			}
			Some(dir) => {
				tracing::warn!(dir = %dir.display(), "template directory does not exist, using built-in templates");
				Tera::default()
			}
			None => Tera::default(),
		};

		let overridden: Vec<String> = tera.get_template_names().map(str::to_string).collect();
		let builtin: Vec<(&str, &str)> = BUILTIN_TEMPLATES
			.iter()
			.filter(|(name, _)| !overridden.iter().any(|o| o == name))
			.copied()
			.collect();
		tera.add_raw_templates(builtin)?;
		tera.autoescape_on(vec![".html"]);
		tera.register_function("url", UrlFunction { urls });

		Ok(Self { tera })
	}

	/// Render a template to a string
	pub fn render(&self, template_name: &str, context: &Context) -> Result<String> {
		self.tera.render(template_name, context).map_err(|e| {
			tracing::error!(template = template_name, error = ?e, "template rendering failed");
			Error::Template(e)
		})
	}

	pub fn has_template(&self, template_name: &str) -> bool {
		self.tera.get_template_names().any(|name| name == template_name)
	}
}

/// `{{ url(name="rango:show_category", slug=category.slug) }}`
///
/// Every argument other than `name` becomes a route parameter.
struct UrlFunction {
	urls: Arc<UrlReverser>,
}

impl tera::Function for UrlFunction {
	fn call(&self, args: &HashMap<String, Value>) -> tera::Result<Value> {
		let name = args
			.get("name")
			.and_then(Value::as_str)
			.ok_or_else(|| tera::Error::msg("url() requires a `name` argument"))?;

		let params: Vec<(String, String)> = args
			.iter()
			.filter(|(key, _)| key.as_str() != "name")
			.map(|(key, value)| {
				let value = match value {
					Value::String(s) => s.clone(),
					other => other.to_string(),
				};
				(key.clone(), value)
			})
			.collect();
		let params: Vec<(&str, &str)> = params
			.iter()
			.map(|(k, v)| (k.as_str(), v.as_str()))
			.collect();

		self.urls
			.reverse(name, &params)
			.map(Value::String)
			.map_err(|e| tera::Error::msg(e.to_string()))
	}

	fn is_safe(&self) -> bool {
		true
	}
}
