pub mod clock;
pub mod config;
pub mod event_log;
pub mod gossip;
pub mod id;
pub mod membership_list;
pub mod message;
pub mod network;
pub mod node;
pub mod probe;
pub mod sim;
pub mod swim;

pub type Heartbeat = u64;
/// Logical time, counted in protocol periods.
pub type Timestamp = u64;

pub use config::Config;
pub use id::MemberId;
pub use message::{DecodeError, Message};
pub use node::SwimNode;
