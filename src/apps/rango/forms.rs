//! Rango forms
//!
//! Each constructor returns a [`Form`] with the fields and clean functions of
//! the corresponding Django model form. Checks that need the database, such
//! as username uniqueness, are done by the views with [`Form::add_error`].

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;

use crate::apps::rango::models::{NAME_MAX_LENGTH, TITLE_MAX_LENGTH, URL_MAX_LENGTH};
use crate::core::forms::{CharField, EmailField, Form, FormError, IntegerField, UrlField};
use crate::core::text::slugify;

pub const USERNAME_MAX_LENGTH: usize = 150;

pub const USERNAME_TAKEN: &str = "A user with that username already exists.";

pub const INVALID_USERNAME: &str = "Enter a valid username. This value may contain only letters, numbers, and @/./+/-/_ characters.";

pub const UNSLUGGABLE_NAME: &str = "Enter a name containing at least one letter or number.";

static USERNAME_RE: Lazy<Regex> =
	Lazy::new(|| Regex::new(r"^[\w.@+-]+$").expect("Invalid username regex pattern"));

/// Category name plus hidden `views` and `likes` counters
pub fn category_form() -> Form {
	let mut form = Form::new()
		.with_field(
			CharField::new("name")
				.required()
				.with_max_length(NAME_MAX_LENGTH)
				.with_help_text("Please enter the category name."),
		)
		.with_field(IntegerField::new("views").hidden(0))
		.with_field(IntegerField::new("likes").hidden(0));
	form.add_field_clean_function("name", |value| {
		match value.as_str() {
			Some(name) if slugify(name).is_empty() => {
				Err(FormError::Validation(UNSLUGGABLE_NAME.to_string()))
			}
			_ => Ok(value.clone()),
		}
	});
	form
}

/// Page title and URL plus a hidden `views` counter
///
/// URLs without a scheme get `http://` prepended.
pub fn page_form() -> Form {
	Form::new()
		.with_field(
			CharField::new("title")
				.required()
				.with_max_length(TITLE_MAX_LENGTH)
				.with_help_text("Please enter the title of the page."),
		)
		.with_field(
			UrlField::new("url")
				.required()
				.with_max_length(URL_MAX_LENGTH)
				.with_help_text("Please enter the URL of the page."),
		)
		.with_field(IntegerField::new("views").hidden(0))
}

/// Username, optional email and password
pub fn user_form() -> Form {
	let mut form = Form::new()
		.with_field(
			CharField::new("username")
				.required()
				.with_max_length(USERNAME_MAX_LENGTH)
				.with_help_text("Required. 150 characters or fewer. Letters, digits and @/./+/-/_ only."),
		)
		.with_field(EmailField::new("email").with_label("Email address"))
		.with_field(CharField::new("password").required().password());
	form.add_field_clean_function("username", |value| match value.as_str() {
		Some(username) if !USERNAME_RE.is_match(username) => {
			Err(FormError::Validation(INVALID_USERNAME.to_string()))
		}
		_ => Ok(value.clone()),
	});
	form
}

/// Profile details collected at registration
pub fn user_profile_form() -> Form {
	Form::new().with_field(
		UrlField::new("website")
			.with_max_length(URL_MAX_LENGTH)
			.with_label("Website"),
	)
}

/// Cleaned string value, empty when absent
pub fn cleaned_string(form: &Form, name: &str) -> String {
	form.cleaned_data()
		.get(name)
		.and_then(Value::as_str)
		.unwrap_or_default()
		.to_string()
}

/// Account details that passed [`user_form`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserDetails {
	pub username: String,
	pub email: String,
	pub password: String,
}

/// Validate account details given outside a request, e.g. on the command line
///
/// Errors come back as sorted `field: message` lines.
pub fn clean_user_details(
	username: &str,
	email: &str,
	password: &str,
) -> Result<UserDetails, Vec<String>> {
	let mut form = user_form();
	form.bind_strings(&HashMap::from([
		("username".to_string(), username.to_string()),
		("email".to_string(), email.to_string()),
		("password".to_string(), password.to_string()),
	]));
	if !form.is_valid() {
		let mut messages: Vec<String> = form
			.errors()
			.iter()
			.flat_map(|(field, errors)| errors.iter().map(move |e| format!("{}: {}", field, e)))
			.collect();
		messages.sort();
		return Err(messages);
	}
	Ok(UserDetails {
		username: cleaned_string(&form, "username"),
		email: cleaned_string(&form, "email"),
		password: cleaned_string(&form, "password"),
	})
}
