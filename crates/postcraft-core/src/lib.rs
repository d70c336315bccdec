//! Core building blocks for Postcraft: configuration, wire types, and small helpers.

pub mod config;
pub mod types;
pub mod utils;
