pub mod ack;
pub mod config;
pub mod crypto;
pub mod endpoint;
pub mod error;
pub mod logging;
pub mod queue;
pub mod reassembly;
pub mod session;
pub mod wire;

pub use endpoint::{Client, Server};
pub use error::{NetworkError, NetworkResult};
pub use queue::{ApplicationHandle, InboundEvent, OutboundCommand, Target};
