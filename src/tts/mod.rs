//! Text-to-speech model seam.

pub mod synthesizer;

pub use synthesizer::{AudioChunks, MockSynthesizer, Synthesizer};
