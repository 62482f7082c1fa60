//! HTTP side of the share
//!
//! Serves the landing page, the one-time download and the kill switch.

pub mod pages;
pub mod server;

pub use server::{create_router, serve};
