pub mod config;
pub mod handler;
pub mod worker;

pub use config::*;
pub use handler::*;
pub use worker::*;
