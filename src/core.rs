//! Framework layer: HTTP types, middleware, routing, persistence, sessions,
//! authentication, forms and templates.
//!
//! Nothing in here knows about categories or pages; the application code in
//! [`crate::apps`] is built on top of it.

pub mod auth;
pub mod csrf;
pub mod db;
pub mod exception;
pub mod forms;
pub mod http;
pub mod logging;
pub mod middleware;
pub mod router;
pub mod server;
pub mod sessions;
pub mod shortcuts;
pub mod templates;
pub mod text;
