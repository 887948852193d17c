//! Django-style forms
//!
//! A [`Form`] owns a list of [`FormField`]s. Binding submitted data and
//! calling [`Form::is_valid`] cleans every field, runs the per-field and
//! form-level clean functions and collects messages per field. Validation
//! problems never surface as `Err`; they end up in [`Form::errors`].

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Value, json};
use std::collections::HashMap;

/// Special key for form-level (non-field-specific) errors.
///
/// In Django, this is `"__all__"`, but in Rust we use a single underscore
/// to follow Rust conventions for internal/private identifiers.
pub const ALL_FIELDS_KEY: &str = "_all";

pub const MSG_REQUIRED: &str = "This field is required.";
pub const MSG_INVALID_URL: &str = "Enter a valid URL.";
pub const MSG_INVALID_EMAIL: &str = "Enter a valid email address.";
pub const MSG_INVALID_INTEGER: &str = "Enter a whole number.";

static URL_RE: Lazy<Regex> = Lazy::new(|| {
	Regex::new(
		r"(?i)^(?:http|ftp)s?://(?:[^\s/?#@]+@)?(?:(?:[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?\.)+[a-z]{2,63}\.?|localhost|\d{1,3}(?:\.\d{1,3}){3}|\[[0-9a-f:]+\])(?::\d{1,5})?(?:[/?#]\S*)?$",
	)
	.expect("Invalid URL regex pattern")
});

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
	Regex::new(r"(?i)^[^\s@]+@(?:[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?\.)+[a-z]{2,63}$")
		.expect("Invalid email regex pattern")
});

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FieldError {
	#[error("This field is required.")]
	Required,
	#[error("{0}")]
	Validation(String),
}

pub type FieldResult<T> = Result<T, FieldError>;

#[derive(Debug, thiserror::Error)]
pub enum FormError {
	#[error("Field error in {field}: {error}")]
	Field { field: String, error: FieldError },
	#[error("{0}")]
	Validation(String),
}

pub type FormResult<T> = Result<T, FormError>;

type CleanFunction = Box<dyn Fn(&HashMap<String, Value>) -> FormResult<()> + Send + Sync>;
type FieldCleanFunction = Box<dyn Fn(&Value) -> FormResult<Value> + Send + Sync>;

/// How a field is rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Widget {
	TextInput,
	PasswordInput,
	EmailInput,
	UrlInput,
	NumberInput,
	HiddenInput,
}

impl Widget {
	/// The `type` attribute of the rendered `<input>`
	pub fn input_type(&self) -> &'static str {
		match self {
			Widget::TextInput => "text",
			Widget::PasswordInput => "password",
			Widget::EmailInput => "email",
			Widget::UrlInput => "url",
			Widget::NumberInput => "number",
			Widget::HiddenInput => "hidden",
		}
	}

	pub fn is_hidden(&self) -> bool {
		matches!(self, Widget::HiddenInput)
	}
}

/// A single form field
pub trait FormField: Send + Sync {
	fn name(&self) -> &str;
	fn label(&self) -> Option<&str>;
	fn required(&self) -> bool;
	fn help_text(&self) -> Option<&str>;
	fn widget(&self) -> &Widget;
	fn initial(&self) -> Option<&Value>;

	/// Validate and normalize a submitted value
	fn clean(&self, value: Option<&Value>) -> FieldResult<Value>;
}

/// Submitted text, trimmed, with JSON null and empty strings treated as absent
fn submitted_text(value: Option<&Value>) -> FieldResult<Option<String>> {
	match value {
		None | Some(Value::Null) => Ok(None),
		Some(Value::String(s)) => {
			let trimmed = s.trim();
			Ok((!trimmed.is_empty()).then(|| trimmed.to_string()))
		}
		Some(Value::Number(n)) => Ok(Some(n.to_string())),
		Some(_) => Err(FieldError::Validation("Value must be a string".to_string())),
	}
}

fn check_max_length(value: &str, max_length: Option<usize>) -> FieldResult<()> {
	let char_count = value.chars().count();
	match max_length {
		Some(max) if char_count > max => Err(FieldError::Validation(format!(
			"Ensure this value has at most {} characters (it has {}).",
			max, char_count
		))),
		_ => Ok(()),
	}
}

macro_rules! common_builders {
	() => {
		pub fn required(mut self) -> Self {
			self.required = true;
			self
		}

		pub fn with_label(mut self, label: impl Into<String>) -> Self {
			self.label = Some(label.into());
			self
		}

		pub fn with_help_text(mut self, help_text: impl Into<String>) -> Self {
			self.help_text = Some(help_text.into());
			self
		}

		pub fn with_widget(mut self, widget: Widget) -> Self {
			self.widget = widget;
			self
		}
	};
}

macro_rules! common_accessors {
	() => {
		fn name(&self) -> &str {
			&self.name
		}

		fn label(&self) -> Option<&str> {
			self.label.as_deref()
		}

		fn required(&self) -> bool {
			self.required
		}

		fn help_text(&self) -> Option<&str> {
			self.help_text.as_deref()
		}

		fn widget(&self) -> &Widget {
			&self.widget
		}

		fn initial(&self) -> Option<&Value> {
			self.initial.as_ref()
		}
	};
}

/// Character field with length validation
///
/// # Examples
///
/// ```
/// use rango::core::forms::{CharField, FormField};
/// use serde_json::json;
///
/// let field = CharField::new("name").required().with_max_length(5);
/// assert_eq!(field.clean(Some(&json!("  Flask "))).unwrap(), json!("Flask"));
/// assert!(field.clean(Some(&json!("Pyramid"))).is_err());
/// assert!(field.clean(None).is_err());
/// ```
#[derive(Debug, Clone)]
pub struct CharField {
	pub name: String,
	pub label: Option<String>,
	pub required: bool,
	pub help_text: Option<String>,
	pub widget: Widget,
	pub initial: Option<Value>,
	pub max_length: Option<usize>,
}

impl CharField {
	pub fn new(name: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			label: None,
			required: false,
			help_text: None,
			widget: Widget::TextInput,
			initial: None,
			max_length: None,
		}
	}

	common_builders!();

	pub fn with_max_length(mut self, max_length: usize) -> Self {
		self.max_length = Some(max_length);
		self
	}

	/// Render as a password input; submitted values are never echoed back
	pub fn password(self) -> Self {
		self.with_widget(Widget::PasswordInput)
	}
}

impl FormField for CharField {
	common_accessors!();

	fn clean(&self, value: Option<&Value>) -> FieldResult<Value> {
		let Some(text) = submitted_text(value)? else {
			if self.required {
				return Err(FieldError::Required);
			}
			return Ok(Value::String(String::new()));
		};
		check_max_length(&text, self.max_length)?;
		Ok(Value::String(text))
	}
}

/// URL field
///
/// A value without a scheme gets `http://` prepended before validation,
/// so `www.python.org` is accepted as `http://www.python.org`.
#[derive(Debug, Clone)]
pub struct UrlField {
	pub name: String,
	pub label: Option<String>,
	pub required: bool,
	pub help_text: Option<String>,
	pub widget: Widget,
	pub initial: Option<Value>,
	pub max_length: Option<usize>,
}

impl UrlField {
	pub fn new(name: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			label: None,
			required: false,
			help_text: None,
			widget: Widget::UrlInput,
			initial: None,
			max_length: None,
		}
	}

	common_builders!();

	pub fn with_max_length(mut self, max_length: usize) -> Self {
		self.max_length = Some(max_length);
		self
	}
}

/// Prepend `http://` unless the value already names http or https
pub fn assume_http_scheme(url: &str) -> String {
	let lower = url.to_ascii_lowercase();
	if lower.starts_with("http://") || lower.starts_with("https://") {
		url.to_string()
	} else {
		format!("http://{}", url)
	}
}

impl FormField for UrlField {
	common_accessors!();

	fn clean(&self, value: Option<&Value>) -> FieldResult<Value> {
		let Some(text) = submitted_text(value)? else {
			if self.required {
				return Err(FieldError::Required);
			}
			return Ok(Value::String(String::new()));
		};
		let url = assume_http_scheme(&text);
		check_max_length(&url, self.max_length)?;
		if !URL_RE.is_match(&url) {
			return Err(FieldError::Validation(MSG_INVALID_URL.to_string()));
		}
		Ok(Value::String(url))
	}
}

/// Email field
#[derive(Debug, Clone)]
pub struct EmailField {
	pub name: String,
	pub label: Option<String>,
	pub required: bool,
	pub help_text: Option<String>,
	pub widget: Widget,
	pub initial: Option<Value>,
	pub max_length: Option<usize>,
}

impl EmailField {
	pub fn new(name: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			label: None,
			required: false,
			help_text: None,
			widget: Widget::EmailInput,
			initial: None,
			max_length: Some(254),
		}
	}

	common_builders!();
}

impl FormField for EmailField {
	common_accessors!();

	fn clean(&self, value: Option<&Value>) -> FieldResult<Value> {
		let Some(text) = submitted_text(value)? else {
			if self.required {
				return Err(FieldError::Required);
			}
			return Ok(Value::String(String::new()));
		};
		check_max_length(&text, self.max_length)?;
		if !EMAIL_RE.is_match(&text) {
			return Err(FieldError::Validation(MSG_INVALID_EMAIL.to_string()));
		}
		Ok(Value::String(text))
	}
}

/// Integer field
///
/// An empty optional value cleans to the initial value, or null without one.
#[derive(Debug, Clone)]
pub struct IntegerField {
	pub name: String,
	pub label: Option<String>,
	pub required: bool,
	pub help_text: Option<String>,
	pub widget: Widget,
	pub initial: Option<Value>,
}

impl IntegerField {
	pub fn new(name: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			label: None,
			required: false,
			help_text: None,
			widget: Widget::NumberInput,
			initial: None,
		}
	}

	common_builders!();

	pub fn with_initial(mut self, initial: i64) -> Self {
		self.initial = Some(json!(initial));
		self
	}

	/// Hidden input with an initial value, like the counters on model forms
	pub fn hidden(self, initial: i64) -> Self {
		self.with_widget(Widget::HiddenInput).with_initial(initial)
	}
}

impl FormField for IntegerField {
	common_accessors!();

	fn clean(&self, value: Option<&Value>) -> FieldResult<Value> {
		let Some(text) = submitted_text(value)? else {
			if self.required {
				return Err(FieldError::Required);
			}
			return Ok(self.initial.clone().unwrap_or(Value::Null));
		};
		text.parse::<i64>()
			.map(|n| json!(n))
			.map_err(|_| FieldError::Validation(MSG_INVALID_INTEGER.to_string()))
	}
}

/// Form data structure
pub struct Form {
	fields: Vec<Box<dyn FormField>>,
	data: HashMap<String, Value>,
	errors: HashMap<String, Vec<String>>,
	is_bound: bool,
	clean_functions: Vec<CleanFunction>,
	field_clean_functions: HashMap<String, FieldCleanFunction>,
}

impl Default for Form {
	fn default() -> Self {
		Self::new()
	}
}

impl Form {
	/// Create a new empty form
	///
	/// # Examples
	///
	/// ```
	/// use rango::core::forms::Form;
	///
	/// let mut form = Form::new();
	/// assert!(!form.is_bound());
	/// assert!(!form.is_valid());
	/// ```
	pub fn new() -> Self {
		Self {
			fields: vec![],
			data: HashMap::new(),
			errors: HashMap::new(),
			is_bound: false,
			clean_functions: vec![],
			field_clean_functions: HashMap::new(),
		}
	}

	pub fn add_field(&mut self, field: Box<dyn FormField>) {
		self.fields.push(field);
	}

	pub fn with_field(mut self, field: impl FormField + 'static) -> Self {
		self.add_field(Box::new(field));
		self
	}

	/// Bind form data for validation
	pub fn bind(&mut self, data: HashMap<String, Value>) {
		self.data = data;
		self.is_bound = true;
	}

	/// Bind decoded urlencoded form data
	pub fn bind_strings(&mut self, data: &HashMap<String, String>) {
		self.bind(
			data.iter()
				.map(|(k, v)| (k.clone(), Value::String(v.clone())))
				.collect(),
		);
	}

	/// Validate the form and return true if all fields are valid
	///
	/// # Examples
	///
	/// ```
	/// use rango::core::forms::{CharField, Form};
	/// use std::collections::HashMap;
	///
	/// let mut form = Form::new().with_field(CharField::new("name").required());
	/// form.bind_strings(&HashMap::from([("name".to_string(), "Python".to_string())]));
	///
	/// assert!(form.is_valid());
	/// assert_eq!(form.cleaned_str("name"), Some("Python"));
	/// ```
	pub fn is_valid(&mut self) -> bool {
		if !self.is_bound {
			return false;
		}

		self.errors.clear();

		for field in &self.fields {
			let value = self.data.get(field.name());

			match field.clean(value) {
				Ok(mut cleaned) => {
					if let Some(field_clean) = self.field_clean_functions.get(field.name()) {
						match field_clean(&cleaned) {
							Ok(further_cleaned) => {
								cleaned = further_cleaned;
							}
							Err(e) => {
								self.errors
									.entry(field.name().to_string())
									.or_default()
									.push(form_error_message(e));
								continue;
							}
						}
					}
					self.data.insert(field.name().to_string(), cleaned);
				}
				Err(e) => {
					self.errors
						.entry(field.name().to_string())
						.or_default()
						.push(e.to_string());
				}
			}
		}

		for clean_fn in &self.clean_functions {
			if let Err(e) = clean_fn(&self.data) {
				match e {
					FormError::Field { field, error } => {
						self.errors
							.entry(field)
							.or_default()
							.push(error.to_string());
					}
					FormError::Validation(msg) => {
						self.errors
							.entry(ALL_FIELDS_KEY.to_string())
							.or_default()
							.push(msg);
					}
				}
			}
		}

		self.errors.is_empty()
	}

	pub fn cleaned_data(&self) -> &HashMap<String, Value> {
		&self.data
	}

	/// A cleaned string value
	pub fn cleaned_str(&self, name: &str) -> Option<&str> {
		self.data.get(name).and_then(Value::as_str)
	}

	/// A cleaned integer value
	pub fn cleaned_i64(&self, name: &str) -> Option<i64> {
		self.data.get(name).and_then(Value::as_i64)
	}

	pub fn errors(&self) -> &HashMap<String, Vec<String>> {
		&self.errors
	}

	/// Record an error found outside of `is_valid`, such as a uniqueness check
	///
	/// `field` of `None` records a non-field error.
	pub fn add_error(&mut self, field: Option<&str>, message: impl Into<String>) {
		self.errors
			.entry(field.unwrap_or(ALL_FIELDS_KEY).to_string())
			.or_default()
			.push(message.into());
	}

	pub fn has_errors(&self) -> bool {
		!self.errors.is_empty()
	}

	pub fn is_bound(&self) -> bool {
		self.is_bound
	}

	pub fn fields(&self) -> &[Box<dyn FormField>] {
		&self.fields
	}

	pub fn get_field(&self, name: &str) -> Option<&dyn FormField> {
		self.fields
			.iter()
			.find(|f| f.name() == name)
			.map(|f| f.as_ref())
	}

	/// Add a custom clean function for form validation
	pub fn add_clean_function<F>(&mut self, f: F)
	where
		F: Fn(&HashMap<String, Value>) -> FormResult<()> + Send + Sync + 'static,
	{
		self.clean_functions.push(Box::new(f));
	}

	/// Add a custom clean function for a specific field
	pub fn add_field_clean_function<F>(&mut self, field_name: &str, f: F)
	where
		F: Fn(&Value) -> FormResult<Value> + Send + Sync + 'static,
	{
		self.field_clean_functions
			.insert(field_name.to_string(), Box::new(f));
	}

	/// Template context describing every field, its current value and errors
	///
	/// Password inputs are always rendered empty.
	pub fn to_context(&self) -> Value {
		let fields: Vec<Value> = self
			.fields
			.iter()
			.map(|field| {
				let value = if *field.widget() == Widget::PasswordInput {
					String::new()
				} else {
					self.data
						.get(field.name())
						.filter(|_| self.is_bound)
						.or_else(|| field.initial())
						.map(display_value)
						.unwrap_or_default()
				};
				json!({
					"name": field.name(),
					"label": field.label().map(str::to_string).unwrap_or_else(|| default_label(field.name())),
					"help_text": field.help_text(),
					"input_type": field.widget().input_type(),
					"is_hidden": field.widget().is_hidden(),
					"required": field.required(),
					"value": value,
					"errors": self.errors.get(field.name()).cloned().unwrap_or_default(),
				})
			})
			.collect();

		json!({
			"fields": fields,
			"non_field_errors": self.errors.get(ALL_FIELDS_KEY).cloned().unwrap_or_default(),
			"has_errors": self.has_errors(),
		})
	}
}

fn form_error_message(error: FormError) -> String {
	match error {
		FormError::Field { error, .. } => error.to_string(),
		FormError::Validation(msg) => msg,
	}
}

fn display_value(value: &Value) -> String {
	match value {
		Value::String(s) => s.clone(),
		Value::Null => String::new(),
		other => other.to_string(),
	}
}

/// `website_url` becomes `Website url`
fn default_label(name: &str) -> String {
	let spaced = name.replace('_', " ");
	let mut chars = spaced.chars();
	match chars.next() {
		Some(first) => first.to_uppercase().chain(chars).collect(),
		None => String::new(),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rstest::rstest;

	fn strings(pairs: &[(&str, &str)]) -> HashMap<String, String> {
		pairs
			.iter()
			.map(|(k, v)| (k.to_string(), v.to_string()))
			.collect()
	}

	#[rstest]
	fn test_char_field_reports_lengths() {
		let field = CharField::new("name").required().with_max_length(3);

		let err = field.clean(Some(&json!("Django"))).unwrap_err();

		assert_eq!(
			err.to_string(),
			"Ensure this value has at most 3 characters (it has 6)."
		);
	}

	#[rstest]
	#[case(json!(""))]
	#[case(json!("   "))]
	#[case(Value::Null)]
	fn test_required_char_field_rejects_blank(#[case] value: Value) {
		let field = CharField::new("name").required();

		assert_eq!(field.clean(Some(&value)), Err(FieldError::Required));
	}

	#[rstest]
	#[case("www.python.org", Some("http://www.python.org"))]
	#[case("https://docs.djangoproject.com/en/2.1/", Some("https://docs.djangoproject.com/en/2.1/"))]
	#[case("HTTP://flask.pocoo.org", Some("HTTP://flask.pocoo.org"))]
	#[case("ftp.example.com/file", Some("http://ftp.example.com/file"))]
	#[case("http://localhost:8000/rango/", Some("http://localhost:8000/rango/"))]
	#[case("not a url", None)]
	#[case("http://", None)]
	fn test_url_field(#[case] input: &str, #[case] expected: Option<&str>) {
		let field = UrlField::new("url").required().with_max_length(200);

		let result = field.clean(Some(&json!(input)));

		match expected {
			Some(url) => assert_eq!(result.unwrap(), json!(url)),
			None => assert_eq!(
				result.unwrap_err(),
				FieldError::Validation(MSG_INVALID_URL.to_string())
			),
		}
	}

	#[rstest]
	#[case("leonard@caltech.edu", true)]
	#[case("", true)]
	#[case("leonard", false)]
	#[case("leonard@caltech", false)]
	fn test_optional_email_field(#[case] input: &str, #[case] valid: bool) {
		let field = EmailField::new("email");

		assert_eq!(field.clean(Some(&json!(input))).is_ok(), valid);
	}

	#[rstest]
	fn test_hidden_integer_defaults_to_initial() {
		let field = IntegerField::new("views").hidden(0);

		assert_eq!(field.clean(None).unwrap(), json!(0));
		assert_eq!(field.clean(Some(&json!("12"))).unwrap(), json!(12));
		assert_eq!(
			field.clean(Some(&json!("twelve"))).unwrap_err().to_string(),
			MSG_INVALID_INTEGER
		);
	}

	#[rstest]
	fn test_unbound_form_is_invalid() {
		let mut form = Form::new().with_field(CharField::new("name"));

		assert!(!form.is_valid());
		assert!(form.errors().is_empty());
	}

	#[rstest]
	fn test_errors_are_collected_per_field() {
		let mut form = Form::new()
			.with_field(CharField::new("title").required())
			.with_field(UrlField::new("url").required());
		form.bind_strings(&strings(&[("url", "bad url")]));

		assert!(!form.is_valid());
		assert_eq!(form.errors()["title"], vec![MSG_REQUIRED]);
		assert_eq!(form.errors()["url"], vec![MSG_INVALID_URL]);
	}

	#[rstest]
	fn test_clean_functions() {
		let mut form = Form::new().with_field(CharField::new("username").required());
		form.add_field_clean_function("username", |value| {
			if value.as_str().is_some_and(|s| s.contains(' ')) {
				Err(FormError::Validation("No spaces.".to_string()))
			} else {
				Ok(value.clone())
			}
		});
		form.add_clean_function(|_| Err(FormError::Validation("Nope.".to_string())));
		form.bind_strings(&strings(&[("username", "a b")]));

		assert!(!form.is_valid());
		assert_eq!(form.errors()["username"], vec!["No spaces."]);
		assert_eq!(form.errors()[ALL_FIELDS_KEY], vec!["Nope."]);
	}

	#[rstest]
	fn test_context_never_echoes_passwords() {
		let mut form = Form::new()
			.with_field(CharField::new("username").required())
			.with_field(CharField::new("password").required().password());
		form.bind_strings(&strings(&[("username", "penny"), ("password", "secret")]));
		form.is_valid();

		let context = form.to_context();

		assert_eq!(context["fields"][0]["value"], json!("penny"));
		assert_eq!(context["fields"][0]["label"], json!("Username"));
		assert_eq!(context["fields"][1]["value"], json!(""));
		assert_eq!(context["fields"][1]["input_type"], json!("password"));
	}

	#[rstest]
	fn test_add_error_marks_form_invalid_for_rendering() {
		let mut form = Form::new();

		form.add_error(None, "Category with this Name already exists.");

		assert!(form.has_errors());
		assert_eq!(
			form.to_context()["non_field_errors"],
			json!(["Category with this Name already exists."])
		);
	}
}
