mod negotiation;
mod streamer;

pub use negotiation::Negotiator;
pub use streamer::{TelnetOptions, TelnetStreamer, TelnetTls};
