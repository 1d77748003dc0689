mod camera;
mod coordinator;
mod cv_utils;
mod inference;

pub mod app;
pub mod base64;
pub mod config;

pub use app::start_app;
