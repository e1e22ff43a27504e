//! Audio ingestion and sample-rate conversion for an FM multiplex (MPX) encoder.
//!
//! This crate pulls single-channel `f32` audio from a file or stdin, converts
//! it to the sample rate the downstream MPX encoder requires, and hands back
//! fixed-length frames on demand:
//! - [`source`]: narrow read abstraction over Symphonia decoding
//! - [`resample`]: streaming mono resampler (Rubato)
//! - [`session`]: rate negotiation, frame assembly, and session lifetime
//!
//! The pipeline is pull-based and single-threaded: the encoder calls
//! [`MpxInput::get_samples`] once per output frame on its own schedule.

pub mod config;
pub mod error;
pub mod resample;
pub mod session;
pub mod source;

pub use config::{IngestConfig, MPX_RATE_MAX, MPX_RATE_MIN};
pub use error::{Error, Result};
pub use session::MpxInput;
pub use source::{SampleSource, SourceId, SourceInfo, SymphoniaSource};
