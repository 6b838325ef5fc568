//! Cutview Frontend
//!
//! egui desktop host for the section viewer engine.

mod app;
pub mod config;
pub mod loader;
mod panels;
mod viewport;

pub use app::CutviewApp;
