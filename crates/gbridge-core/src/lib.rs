pub mod config;
pub mod engine;
pub mod error;
pub mod upstream_client;

pub use config::{BridgeConfig, ConfigError, ConfigOverrides};
pub use engine::{BridgeEngine, FrameStream, Operation};
pub use error::ProxyError;
pub use upstream_client::{
    ChatBackend, ChunkStream, UpstreamClientConfig, UpstreamFailure, WreqChatBackend,
};
