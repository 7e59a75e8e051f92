//! Services module - channels, reconciliation and export for set assembly.
//!
//! Everything here is independent of how the assembled collection is shown.
//! Results reach the store along one path:
//!
//! ```text
//! push session ─┐
//! stream reader ─┼─► Inbound ─► Multiplexer ─► normalize ─► StateManager::apply
//! bulk request ─┤
//! single item  ─┘
//! ```
//!
//! # Components
//!
//! - [`stream_decoder`]: splits a chunked streaming response into frames,
//!   carrying partial lines across chunk boundaries
//! - [`normalizer`]: turns push notifications, stream frames and bulk
//!   responses into [`SlotAssignment`](crate::models::SlotAssignment)s
//! - [`Multiplexer`]: the single writer that applies assignments, drops
//!   results of superseded runs and records diagnostics
//! - [`ConnectionManager`]: push channel lifecycle with bounded reconnect
//! - [`WebSocketTransport`] and [`GeneratorClient`]: the network collaborators
//! - [`Session`]: starts streaming, batched and single-item generation
//! - [`export`]: JSON, CSV and Cockatrice output
//!
//! # Usage Example
//!
//! ```ignore
//! use setforge::services::{GeneratorClient, Multiplexer, Session};
//!
//! let state = StateManager::new();
//! let (sink, _mux) = Multiplexer::new(state.clone(), highlight).spawn();
//! let session = Session::new(Arc::new(client), state, sink);
//!
//! session.load_skeleton(SetVariant::Full).await?;
//! let run = session.start_stream("sunken empire");
//! let progress = session.wait_for_run(run).await;
//! ```

pub mod connection;
pub mod export;
pub mod generator;
pub mod multiplexer;
pub mod normalizer;
pub mod push;
pub mod session;
pub mod stream_decoder;

pub use connection::{
    CloseReason, ConnectionHandle, ConnectionManager, PushSession, PushTransport, ReconnectPolicy,
    SessionEvent, TransportError,
};
pub use export::{ExportArtifact, ExportError, ExportFormat, ImportError, ImportedSet};
pub use generator::{Generator, GeneratorClient, GeneratorError, ItemRequest, SetRequest};
pub use multiplexer::{Inbound, Multiplexer, MultiplexerClosed, MultiplexerHandle};
pub use normalizer::{normalize, NormalizeError, Payload, PushMessage, StreamFrame};
pub use push::WebSocketTransport;
pub use session::Session;
pub use stream_decoder::{DecodeError, FrameDecoder};
