pub mod api;
pub mod config;
pub mod error;
pub mod gateway;
pub mod ledger;
pub mod models;
pub mod notifier;
pub mod reconcile;
pub mod schema;
pub mod service;
