pub mod app;
pub mod channel;
pub mod config;
pub mod db;
pub mod error;
pub mod health;
pub mod http;
pub mod ingest;
pub mod model;
pub mod repost;
pub mod retry;
pub mod session;
pub mod telegram;
