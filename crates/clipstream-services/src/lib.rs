//! clipstream-services: per-connection recording pipeline: session store,
//! temporary recordings, the stream multiplexer, the finalizer and the
//! connection driver.

pub mod connection;
pub mod finalizer;
pub mod live;
pub mod multiplexer;
pub mod recording;
pub mod session;

pub use connection::{CloseReason, ConnectionDriver, ConnectionSummary, TransportMessage};
pub use finalizer::{FfmpegFinalizer, FinalizeError, FinalizeRequest, Finalizer};
pub use live::{new_session_table, LiveSession, SessionTable};
pub use multiplexer::{MultiplexerOptions, StartOutcome, StreamMultiplexer};
pub use session::{Clip, Session, SessionRecord};
