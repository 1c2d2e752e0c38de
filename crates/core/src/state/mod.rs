//! Per-request session state.

pub mod session;

pub use session::{
    InterviewMessage, Progress, ResearchSession, ResearchSnapshot, SearchResult, SessionError,
    Upsert,
};
