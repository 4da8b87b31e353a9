pub mod app;
pub mod config;
pub mod csv;
pub mod domain;
pub mod error;
pub mod fetchers;
pub mod http;
pub mod output;
pub mod process;
pub mod store;
