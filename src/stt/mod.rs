//! Speech-to-text model seam.

pub mod transcriber;

pub use transcriber::{MockTranscriber, Transcriber, Transcript};
