pub mod config;
pub mod ws;

pub use config::BridgeConfig;
pub use ws::BridgeServer;
