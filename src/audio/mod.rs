//! # Audio Input Handling
//!
//! Turns uploaded audio bytes into the 16 kHz mono f32 waveform the
//! inference kernel consumes.

pub mod decode;

pub use decode::{decode_upload, SAMPLE_RATE};
