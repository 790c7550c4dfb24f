pub mod app;
pub mod cache;
pub mod config;
pub mod consolidate;
pub mod credentials;
pub mod domain;
pub mod error;
pub mod layout;
pub mod master;
pub mod object_store;
pub mod output;
pub mod progress;
pub mod reconcile;
pub mod sheet;
pub mod upstream;
