pub mod account;
pub mod api;
pub mod config;
pub mod pipeline;
pub mod token;
pub mod utils;
pub mod v2ray;

pub use config::Settings;
pub use pipeline::Synchronizer;
