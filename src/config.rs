//! Session tuning parameters and rate-band constants.

/// Lowest source sample rate accepted when the MPX rate is auto-negotiated.
///
/// The band exists for compatibility with the downstream multiplex format;
/// it is a fixed constant of that format, not a derived value.
pub const MPX_RATE_MIN: u32 = 176_400;

/// Highest source sample rate accepted when the MPX rate is auto-negotiated.
pub const MPX_RATE_MAX: u32 = 228_000;

/// Tuning parameters for source ingestion.
#[derive(Clone, Copy, Debug)]
pub struct IngestConfig {
    /// Maximum number of read calls per frame request.
    ///
    /// Pipes and other streaming sources may deliver data in smaller chunks
    /// than requested; the assembler keeps reading until the frame's input
    /// quota is met or this budget is spent. It is the only guard against
    /// unbounded blocking on a slow source.
    pub max_read_attempts: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_read_attempts: 5,
        }
    }
}
