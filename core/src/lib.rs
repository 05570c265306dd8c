pub mod auth;
pub mod db;
pub mod error;
pub mod models;
pub mod onboarding;
pub mod progress;
pub mod service;
pub mod session;
