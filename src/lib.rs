pub mod auth;
pub mod capture;
pub mod config;
pub mod db;
pub mod drive;
pub mod error;
pub mod gallery;
pub mod llm;
pub mod logging;
pub mod pipeline;
