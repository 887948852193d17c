//! Project configuration: settings, URL table and application assembly

pub mod application;
pub mod settings;
pub mod urls;
