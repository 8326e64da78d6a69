mod buffer;
mod device;
mod expect;
mod streamer;
mod trace;

pub use buffer::ReadBuffer;
pub use device::{CmdOpts, CmdResult, CmdStatus, Device, DeviceOptions, QuestionHandler};
pub use expect::{expect, ExpectError, ExpectMatch, ExpectSet};
pub use streamer::{AsyncStream, BoxedStream, RemoteDialer, Streamer};
pub use trace::Trace;

#[cfg(test)]
mod testutil;
