//! Tracing subscriber setup

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Filter directive for a `-v` count, or `None` to use the configured level
pub fn verbosity_directive(verbosity: u8) -> Option<&'static str> {
	match verbosity {
		0 => None,
		1 => Some("rango=debug,info"),
		_ => Some("rango=trace,sqlx=debug,debug"),
	}
}

/// Install the global subscriber
///
/// `RUST_LOG` wins when set; otherwise `fallback` (the `log_level`
/// setting or a `-v` directive) is used.
pub fn init(fallback: &str) {
	let filter = EnvFilter::try_from_default_env()
		.or_else(|_| EnvFilter::try_new(fallback))
		.unwrap_or_else(|_| EnvFilter::new("info"));

	let _ = tracing_subscriber::registry()
		.with(filter)
		.with(tracing_subscriber::fmt::layer().with_target(true))
		.try_init();
}

#[cfg(test)]
mod tests {
	use super::*;
	use rstest::rstest;

	#[rstest]
	#[case(0, None)]
	#[case(1, Some("rango=debug,info"))]
	#[case(3, Some("rango=trace,sqlx=debug,debug"))]
	fn test_verbosity_directive(#[case] verbosity: u8, #[case] expected: Option<&str>) {
		assert_eq!(verbosity_directive(verbosity), expected);
	}

	#[rstest]
	fn test_init_twice_is_harmless() {
		init("info");
		init("debug");
	}
}
