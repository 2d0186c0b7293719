//! Live event distribution to open streaming connections.
//!
//! # Architecture
//!
//! - [`StreamClientRegistry`]: the single piece of shared mutable state, a
//!   table of connected clients guarded by one lock
//! - [`EventBroadcaster`]: iterate-and-prune fan-out over the registry
//! - [`client_event_stream`]: adapts a registered client into an SSE stream
//!   that deregisters itself when dropped

mod broadcaster;
mod registry;
mod sse;

pub use broadcaster::{BroadcastReport, EventBroadcaster};
pub use registry::{
    ClientHandle, ClientId, ClientInfo, ClientReceiver, ClientSink, NewClient, Owner,
    StreamClientRegistry,
};
pub use sse::{build_sse_response, client_event_stream};
