//! Upload-then-verify harness for object stores: writes a random object, reads it back block by
//! block over a stream that is cut between blocks, and checks each block byte for byte.

pub mod config;
pub mod context;
pub mod errors;
pub mod params;
pub mod payload;
pub mod verifier;

pub use config::{Backend, ConfigSource, VerifierConfig};
pub use context::{RunContext, RunOutcome, RunReport, RunState, Stores};
pub use errors::VerifyErr;
pub use payload::{ChunkLayout, Payload};
