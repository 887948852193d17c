//! The rango app: categories of pages, likes, views and user profiles

use crate::core::db::Migration;

pub mod forms;
pub mod models;
pub mod populate;
pub mod urls;
pub mod views;

pub const MIGRATIONS: &[Migration] = &[Migration {
	app_label: "rango",
	name: "0001_initial",
	sql: include_str!("../../migrations/rango/0001_initial.sql"),
}];
