pub mod analytics;
pub mod error;
pub mod extract;
pub mod proxy;
pub mod rest;
