mod common;
mod database;
mod extension;
mod provider_config;

pub use common::*;
pub use database::*;
pub use extension::*;
pub use provider_config::*;
