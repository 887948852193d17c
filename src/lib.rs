//! # Rango
//!
//! A link directory web application: visitors browse categories of web
//! pages, registered users add categories and pages, and the site counts
//! likes per category and views per page.
//!
//! ## Layout
//!
//! - [`core`] - the framework layer: HTTP types, middleware, routing,
//!   sessions, authentication, CSRF, forms, templates and the server
//! - [`config`] - settings, the project URL table and [`Application`]
//!   assembly
//! - [`apps`] - the rango app itself: models, forms, views and URLs
//!
//! ## Running
//!
//! ```text
//! cargo run --bin manage -- migrate
//! cargo run --bin manage -- populate
//! cargo run --bin manage -- runserver
//! ```
//!
//! [`Application`]: config::application::Application

pub mod apps;
pub mod config;
pub mod core;

pub use crate::config::application::{AppState, Application};
pub use crate::config::settings::Settings;
pub use crate::core::exception::{Error, Result};
