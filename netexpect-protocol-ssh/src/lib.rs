mod connect;
mod control_master;
mod handler;
mod known_hosts;
mod streamer;
mod transfer;
mod tunnel;

pub use connect::SshOptions;
pub use control_master::ControlMasterStream;
pub use handler::HostKeyVerification;
pub use known_hosts::{KnownHostValidationResult, KnownHosts};
pub use streamer::SshStreamer;
pub use tunnel::{Tunnel, TunnelTarget};
