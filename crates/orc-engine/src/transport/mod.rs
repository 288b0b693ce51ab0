//! Transport layer (TCP).
//!
//! The pipeline owns the socket and frames bytes into whole OP messages; the
//! adapter turns frames into strings for the dispatcher and strings into bytes
//! for the socket.

pub mod adapter;
pub mod framing;
pub mod pipeline;

pub use adapter::{AdapterInbound, InboundConsumer, Outbound, ProtocolAdapter, TrafficSnapshot};
pub use pipeline::{Direction, PipelineEvent, PipelineEvents, TransportPipeline};
