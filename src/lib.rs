pub mod cache;
pub mod config;
pub mod domain;
pub mod download;
pub mod error;
pub mod fetch;
pub mod output;
pub mod retry;
pub mod species;
pub mod throttle;
pub mod xeno;
