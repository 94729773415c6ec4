pub mod aggregate;
pub mod archive;
pub mod compare;
pub mod config;
pub mod coordinators;
pub mod error;
pub mod export;
pub mod format;
pub mod loader;
pub mod models;
pub mod normalize;
pub mod notify;
pub mod pipeline;
pub mod reports;
pub mod schema;
