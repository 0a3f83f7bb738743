//! Core types for resilient instrument communication.
//!
//! This crate holds everything the hardware and simulation crates agree on:
//!
//! - [`address`]: opaque endpoint addresses
//! - [`error`]: the transport error taxonomy and the retry-layer error
//! - [`transport`]: the [`Transport`](transport::Transport) trait and the
//!   reporting [`TransportAdapter`](transport::TransportAdapter)
//! - [`retry`]: retry policy, error classification and the retry engine
//! - [`events`]: communication events and sinks
//! - [`block`]: IEEE 488.2 definite-length block codec

pub mod address;
pub mod block;
pub mod error;
pub mod events;
pub mod retry;
pub mod transport;

pub use address::EndpointAddress;
pub use error::{CommError, TransportError, TransportErrorKind, TransportResult};
pub use events::{
    CommContext, CommEvent, CommEventKind, CommSink, EventOutcome, NullSink, RecordingSink,
    SharedSink, TeeSink, TracingSink,
};
pub use retry::{classify, ErrorClass, PolicyError, RetryEngine, RetryPolicy};
pub use transport::{expects_response, BoxedTransport, Transport, TransportAdapter, TransportKind};
