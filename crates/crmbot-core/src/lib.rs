pub mod error;
pub mod types;
pub mod config;
pub mod bus;
pub mod credential;
pub mod gateway;
pub mod upload;
pub mod proposal;
pub mod provider;
pub mod tool;
pub mod agent;
pub mod util;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
