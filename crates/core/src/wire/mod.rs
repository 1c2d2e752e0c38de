//! # Wire Protocol
//!
//! Turns the raw upstream byte stream into canonical research events.
//!
//! ```text
//! bytes → LineFramer → detect_line → normalize → ResearchEvent*
//! ```

pub mod detect;
pub mod framer;
pub mod normalize;

pub use detect::{detect_line, detect_value, RawToken, WireShape};
pub use framer::LineFramer;
pub use normalize::normalize;
