pub mod catalog;
pub mod client;
pub mod config;
pub mod credentials;
pub mod download;
pub mod flag;
pub mod listing;
pub mod model;
pub mod runtime;
pub mod writeups;
