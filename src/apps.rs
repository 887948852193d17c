//! Installed applications

pub mod rango;
