pub mod api;
pub mod app;
pub(crate) mod cancel;
pub mod cli;
pub mod config;
pub mod controls;
pub mod error;
pub mod global;
pub mod media;
pub mod meeting;
pub mod presence;
pub mod text_io;
