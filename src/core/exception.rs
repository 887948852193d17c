//! Error types shared by every layer of the application.
//!
//! Handlers return [`Result`]; the server and test client turn any error
//! into a [`Response`] through `From<Error>`. Only client errors carry their
//! message to the browser. Server-side failures are logged and answered
//! with a generic body.

use hyper::StatusCode;

use crate::core::http::Response;

/// Application error
#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("Not found: {0}")]
	NotFound(String),
	#[error("Bad request: {0}")]
	BadRequest(String),
	#[error("Forbidden: {0}")]
	Forbidden(String),
	#[error("Payload too large: {0}")]
	PayloadTooLarge(String),
	#[error("Authentication error: {0}")]
	Authentication(String),
	#[error("Database error: {0}")]
	Database(#[from] sqlx::Error),
	#[error("Migration error: {0}")]
	Migration(String),
	#[error("Template error: {0}")]
	Template(#[from] tera::Error),
	#[error("Serialization error: {0}")]
	Serialization(#[from] serde_json::Error),
	#[error("Configuration error: {0}")]
	Configuration(String),
	#[error("Internal error: {0}")]
	Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
	/// HTTP status code reported for this error
	///
	/// # Examples
	///
	/// ```
	/// use rango::core::exception::Error;
	/// use hyper::StatusCode;
	///
	/// let error = Error::NotFound("category".to_string());
	/// assert_eq!(error.status_code(), StatusCode::NOT_FOUND);
	/// ```
	pub fn status_code(&self) -> StatusCode {
		match self {
			Error::NotFound(_) => StatusCode::NOT_FOUND,
			Error::BadRequest(_) => StatusCode::BAD_REQUEST,
			Error::Forbidden(_) => StatusCode::FORBIDDEN,
			Error::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
			Error::Authentication(_) => StatusCode::UNAUTHORIZED,
			Error::Database(_)
			| Error::Migration(_)
			| Error::Template(_)
			| Error::Serialization(_)
			| Error::Configuration(_)
			| Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
		}
	}

	/// Whether the error message may be shown to the client
	pub fn is_client_error(&self) -> bool {
		self.status_code().is_client_error()
	}
}

impl From<Error> for Response {
	fn from(error: Error) -> Self {
		let status = error.status_code();
		if error.is_client_error() {
			tracing::debug!(%status, error = %error, "request rejected");
			let message = match &error {
				Error::NotFound(msg)
				| Error::BadRequest(msg)
				| Error::Forbidden(msg)
				| Error::PayloadTooLarge(msg)
				| Error::Authentication(msg) => msg.clone(),
				other => other.to_string(),
			};
			Response::new(status).with_text(message)
		} else {
			tracing::error!(%status, error = %error, "request failed");
			Response::new(status).with_text("Internal server error")
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rstest::rstest;

	#[rstest]
	#[case(Error::NotFound("x".into()), StatusCode::NOT_FOUND)]
	#[case(Error::BadRequest("x".into()), StatusCode::BAD_REQUEST)]
	#[case(Error::Forbidden("x".into()), StatusCode::FORBIDDEN)]
	#[case(Error::PayloadTooLarge("x".into()), StatusCode::PAYLOAD_TOO_LARGE)]
	#[case(Error::Internal("x".into()), StatusCode::INTERNAL_SERVER_ERROR)]
	#[case(Error::Configuration("x".into()), StatusCode::INTERNAL_SERVER_ERROR)]
	fn test_status_code(#[case] error: Error, #[case] expected: StatusCode) {
		assert_eq!(error.status_code(), expected);
	}

	#[rstest]
	fn test_client_error_message_is_exposed() {
		let response: Response = Error::NotFound("No such category".to_string()).into();

		assert_eq!(response.status, StatusCode::NOT_FOUND);
		assert_eq!(response.body_text(), "No such category");
	}

	#[rstest]
	fn test_server_error_message_is_hidden() {
		let response: Response =
			Error::Internal("password=hunter2 connection refused".to_string()).into();

		assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
		let body = response.body_text();
		assert_eq!(body, "Internal server error");
		assert!(!body.contains("hunter2"));
	}
}
