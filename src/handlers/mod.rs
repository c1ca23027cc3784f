//! HTTP request handlers for the transcription API.

pub mod asr;
