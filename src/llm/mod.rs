//! Streaming report generation against an upstream model.

pub mod prompt;
pub mod provider;
pub mod relay;
pub mod transport;

pub use provider::{ModelSettings, ProviderKind};
pub use relay::ProtocolMarkers;
pub use transport::{spawn_generation, UpstreamClient};
