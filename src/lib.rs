pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod server;
pub mod service;

pub use db::{Repositories, initialize_and_migrate};
pub use error::TapError;
