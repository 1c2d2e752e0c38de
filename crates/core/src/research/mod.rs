//! # Research Stream
//!
//! Turns the upstream research event stream into normalized, reconciled
//! records for the client.
//!
//! ## Flow
//!
//! ```text
//! UpstreamClient → StreamProcessor → Reconciler ⟷ ResearchSession → EventSink
//! ```

pub mod channel;
pub mod events;
pub mod phase;
pub mod processor;
pub mod reconcile;
pub mod sink;
pub mod upstream;

pub use channel::{channel_for, classify, Channel, OutputEvent, OutputKind};
pub use events::{
    Analyst, EventBody, EventKind, InterviewStatus, InterviewUpdate, MessageRole, ProgressUpdate,
    ResearchEvent, SearchStatus, SearchUpdate, SectionUpdate, TextDelta, TextMarker,
};
pub use phase::{PhaseTransition, ResearchPhase};
pub use processor::{StreamProcessor, StreamStats};
pub use reconcile::{BatchScope, Reconciler};
pub use sink::EventSink;
pub use upstream::{ResearchRequest, UpstreamClient, UpstreamStream};
