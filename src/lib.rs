pub mod cli;
pub mod config;
pub mod errors;
pub mod patch;
pub mod server;
pub mod state;
pub mod utils;
