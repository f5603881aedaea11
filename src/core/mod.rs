pub mod commands;
pub mod error;
pub mod reader;
pub mod retry;
pub mod session;
pub mod transport;
pub mod utils;
