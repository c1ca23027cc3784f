//! # Transcription Pipeline
//!
//! Everything between a decoded waveform and formatted output:
//!
//! - **types**: request options, engine options mapping, timed results
//! - **model**: the candle Whisper resource (load, infer, detect language)
//! - **lifecycle**: lazy load, exclusive access, idle eviction
//! - **postprocess**: language-specific timing correction
//! - **format**: txt/srt/vtt/tsv/json rendering
//! - **coordinator**: ties the stages together per request

pub mod coordinator;
pub mod format;
pub mod lifecycle;
pub mod model;
pub mod postprocess;
pub mod types;

pub use coordinator::{TranscriptionCoordinator, ENGINE_NAME};
pub use format::OutputFormat;
pub use lifecycle::{IdleEvictor, ModelLifecycleManager};
pub use types::{LanguageDetection, RequestOptions, Task, TranscriptionOutput};
