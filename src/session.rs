//! MPX input session: rate negotiation, frame assembly, teardown.
//!
//! One [`MpxInput`] feeds one downstream multiplex encoder. The encoder
//! calls [`get_samples`](MpxInput::get_samples) once per output frame; every
//! call fills the caller's buffer completely, padding with silence when the
//! source runs dry. All buffers and converter state are owned by the
//! session, so teardown is scoped ownership rather than paired frees.

use crate::config::{IngestConfig, MPX_RATE_MAX, MPX_RATE_MIN};
use crate::error::{Error, Result};
use crate::resample::StreamResampler;
use crate::source::{SampleSource, SourceId, SymphoniaSource};

/// One active audio-ingestion session.
///
/// Created by [`open`](Self::open), driven by one
/// [`get_samples`](Self::get_samples) call per output frame, released by
/// [`close`](Self::close) or by dropping. Synchronous and single-threaded:
/// frame N's output depends on all prior frames' input, so calls cannot be
/// reordered or replayed.
pub struct MpxInput {
    source: Option<Box<dyn SampleSource>>,
    frame_len: usize,
    mpx_rate: u32,
    /// `source_rate / mpx_rate`, fixed at open; 1.0 means passthrough.
    ratio: f64,
    cfg: IngestConfig,
    /// Accumulates raw source samples across possibly-short reads.
    audio_buf: Vec<f32>,
    /// Resampler output that did not fit the previous frame.
    carry: Vec<f32>,
    /// Per-call resampler output, before splitting into frame and carry.
    scratch: Vec<f32>,
    resampler: Option<StreamResampler>,
}

impl MpxInput {
    /// Open a session over `source`, negotiating the MPX rate.
    ///
    /// - `source` `None` is an audio-less session (subcarrier-only); it
    ///   requires an explicit `target_rate` since there is no source rate to
    ///   derive one from.
    /// - `target_rate` `None` auto-negotiates: the source rate becomes the
    ///   MPX rate, but only inside [`MPX_RATE_MIN`]..=[`MPX_RATE_MAX`].
    ///   There is no resampler to bridge arbitrary rates automatically.
    /// - An explicit `target_rate` different from the source rate enables
    ///   resampling; exact equality selects passthrough.
    ///
    /// Failures leave nothing allocated behind.
    pub fn open(
        source: Option<SourceId>,
        frame_len: usize,
        target_rate: Option<u32>,
        cfg: IngestConfig,
    ) -> Result<Self> {
        let source: Option<Box<dyn SampleSource>> = match source {
            Some(SourceId::Path(path)) => Some(Box::new(SymphoniaSource::from_path(&path)?)),
            Some(SourceId::Stdin) => Some(Box::new(SymphoniaSource::from_stdin()?)),
            None => None,
        };

        Self::from_source(source, frame_len, target_rate, cfg)
    }

    /// Open a session over an already-constructed [`SampleSource`].
    pub fn from_source(
        source: Option<Box<dyn SampleSource>>,
        frame_len: usize,
        target_rate: Option<u32>,
        cfg: IngestConfig,
    ) -> Result<Self> {
        if frame_len == 0 {
            return Err(Error::Config("frame length must be nonzero".into()));
        }
        if target_rate == Some(0) {
            return Err(Error::Config("target MPX rate must be nonzero".into()));
        }

        let Some(source) = source else {
            let Some(mpx_rate) = target_rate else {
                return Err(Error::Config(
                    "audio-less session requires an explicit MPX rate".into(),
                ));
            };
            tracing::info!(mpx_hz = mpx_rate, "no audio source, frames will be silence");
            return Ok(Self {
                source: None,
                frame_len,
                mpx_rate,
                ratio: 1.0,
                cfg,
                audio_buf: Vec::new(),
                carry: Vec::new(),
                scratch: Vec::new(),
                resampler: None,
            });
        };

        let channels = source.channels();
        if channels > 1 {
            return Err(Error::Config(format!(
                "{channels} channels detected, multichannel audio is not supported"
            )));
        }

        let source_rate = source.sample_rate();
        let mpx_rate = match target_rate {
            Some(rate) => rate,
            None => {
                if !(MPX_RATE_MIN..=MPX_RATE_MAX).contains(&source_rate) {
                    return Err(Error::Config(format!(
                        "input sample rate {source_rate} Hz not supported without an explicit MPX rate"
                    )));
                }
                source_rate
            }
        };

        let info = source.info();
        tracing::info!(
            source_hz = source_rate,
            mpx_hz = mpx_rate,
            codec = info.codec.as_deref().unwrap_or("unknown"),
            bit_depth = info.bit_depth,
            "audio source opened"
        );

        if source_rate == mpx_rate {
            tracing::info!("mpx passthrough");
            return Ok(Self {
                source: Some(source),
                frame_len,
                mpx_rate,
                ratio: 1.0,
                cfg,
                audio_buf: vec![0.0; frame_len],
                carry: Vec::new(),
                scratch: Vec::new(),
                resampler: None,
            });
        }

        let ratio = source_rate as f64 / mpx_rate as f64;

        // Input quantum that yields roughly one output frame per conversion.
        let chunk_frames = ((frame_len as f64 * ratio).floor() as usize).max(1);
        let resampler = StreamResampler::new(source_rate, mpx_rate, chunk_frames)?;
        let scratch = vec![0.0; resampler.output_capacity_hint()];

        tracing::info!(ratio, chunk_frames, "mpx resampling");

        Ok(Self {
            source: Some(source),
            frame_len,
            mpx_rate,
            ratio,
            cfg,
            audio_buf: vec![0.0; chunk_frames],
            carry: Vec::with_capacity(frame_len / 5),
            scratch,
            resampler: Some(resampler),
        })
    }

    /// The negotiated MPX rate in Hz.
    pub fn mpx_rate(&self) -> u32 {
        self.mpx_rate
    }

    /// The resample ratio (`source_rate / mpx_rate`); 1.0 in passthrough
    /// and audio-less sessions.
    pub fn ratio(&self) -> f64 {
        self.ratio
    }

    /// Output frame length in samples, fixed for the session's lifetime.
    pub fn frame_len(&self) -> usize {
        self.frame_len
    }

    /// Fill `out` with the next frame of audio at the MPX rate.
    ///
    /// `out` must be exactly [`frame_len`](Self::frame_len) samples. On
    /// stream exhaustion, or when the source delivers less than requested
    /// even after the bounded read retries, the tail is silence; that is
    /// still success. Only a fatal read error fails the call.
    pub fn get_samples(&mut self, out: &mut [f32]) -> Result<()> {
        if out.len() != self.frame_len {
            return Err(Error::Config(format!(
                "output frame must be exactly {} samples, got {}",
                self.frame_len,
                out.len()
            )));
        }

        let Some(source) = self.source.as_mut() else {
            out.fill(0.0);
            return Ok(());
        };

        let mut attempts = self.cfg.max_read_attempts;
        let mut written = 0;

        match self.resampler.as_mut() {
            Some(resampler) => {
                // Converted samples spilled from the previous frame go first.
                if !self.carry.is_empty() {
                    let take = self.carry.len().min(out.len());
                    out[..take].copy_from_slice(&self.carry[..take]);
                    self.carry.drain(..take);
                    written = take;
                }

                while written < self.frame_len && attempts > 0 {
                    let mut filled = 0;
                    while filled < self.audio_buf.len() && attempts > 0 {
                        attempts -= 1;
                        let n = source.read(&mut self.audio_buf[filled..])?;
                        if n == 0 {
                            break;
                        }
                        filled += n;
                    }

                    if filled == 0 {
                        tracing::debug!("end of audio stream");
                        break;
                    }

                    let produced =
                        resampler.process(&self.audio_buf[..filled], &mut self.scratch)?;

                    let take = produced.min(self.frame_len - written);
                    out[written..written + take].copy_from_slice(&self.scratch[..take]);
                    written += take;
                    if take < produced {
                        self.carry.extend_from_slice(&self.scratch[take..produced]);
                    }
                }
            }
            None => {
                // Passthrough: accumulate source samples, then copy verbatim.
                while written < self.frame_len && attempts > 0 {
                    attempts -= 1;
                    let n = source.read(&mut self.audio_buf[written..self.frame_len])?;
                    if n == 0 {
                        break;
                    }
                    written += n;
                }
                out[..written].copy_from_slice(&self.audio_buf[..written]);
            }
        }

        if written < self.frame_len {
            tracing::trace!(missing = self.frame_len - written, "padding frame with silence");
            out[written..].fill(0.0);
        }

        Ok(())
    }

    /// Release the session.
    ///
    /// Buffers and converter state are dropped regardless of whether the
    /// source handle closes cleanly; the returned status is informational
    /// only and a failure never blocks the remaining releases.
    pub fn close(mut self) -> Result<()> {
        if let Some(source) = self.source.as_mut() {
            if let Err(e) = source.close() {
                tracing::warn!(error = %e, "audio source did not close cleanly");
                return Err(e);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::SourceInfo;
    use std::io;

    /// Scripted in-memory source: fixed rate/channels, optional cap on how
    /// many samples a single read may deliver.
    struct MockSource {
        rate: u32,
        channels: usize,
        samples: Vec<f32>,
        pos: usize,
        max_per_read: usize,
    }

    impl MockSource {
        fn new(rate: u32, samples: Vec<f32>) -> Self {
            Self {
                rate,
                channels: 1,
                samples,
                pos: 0,
                max_per_read: usize::MAX,
            }
        }

        fn with_max_per_read(mut self, max: usize) -> Self {
            self.max_per_read = max;
            self
        }

        fn with_channels(mut self, channels: usize) -> Self {
            self.channels = channels;
            self
        }
    }

    impl SampleSource for MockSource {
        fn sample_rate(&self) -> u32 {
            self.rate
        }

        fn channels(&self) -> usize {
            self.channels
        }

        fn info(&self) -> SourceInfo {
            SourceInfo::default()
        }

        fn read(&mut self, out: &mut [f32]) -> Result<usize> {
            let remaining = self.samples.len() - self.pos;
            let n = remaining.min(out.len()).min(self.max_per_read);
            out[..n].copy_from_slice(&self.samples[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }

    /// Source whose reads always fail.
    struct FailingSource;

    impl SampleSource for FailingSource {
        fn sample_rate(&self) -> u32 {
            192_000
        }

        fn channels(&self) -> usize {
            1
        }

        fn read(&mut self, _out: &mut [f32]) -> Result<usize> {
            Err(Error::Io(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "read failed",
            )))
        }
    }

    fn ramp(len: usize) -> Vec<f32> {
        (0..len).map(|i| i as f32 / len as f32).collect()
    }

    fn open_mock(source: MockSource, frame_len: usize, target: Option<u32>) -> Result<MpxInput> {
        MpxInput::from_source(
            Some(Box::new(source)),
            frame_len,
            target,
            IngestConfig::default(),
        )
    }

    #[test]
    fn passthrough_returns_source_samples_exactly() {
        let samples = ramp(1024);
        let src = MockSource::new(192_000, samples.clone());
        let mut session = open_mock(src, 512, None).unwrap();

        let mut frame = vec![0.0f32; 512];
        session.get_samples(&mut frame).unwrap();
        assert_eq!(frame, samples[..512]);

        session.get_samples(&mut frame).unwrap();
        assert_eq!(frame, samples[512..]);
    }

    #[test]
    fn frame_is_zero_padded_at_end_of_stream() {
        let samples = ramp(300);
        let src = MockSource::new(192_000, samples.clone());
        let mut session = open_mock(src, 512, None).unwrap();

        let mut frame = vec![1.0f32; 512];
        session.get_samples(&mut frame).unwrap();
        assert_eq!(frame[..300], samples[..]);
        assert!(frame[300..].iter().all(|&s| s == 0.0));
    }

    #[test]
    fn short_reads_accumulate_within_retry_budget() {
        let samples = ramp(512);
        let src = MockSource::new(192_000, samples.clone()).with_max_per_read(128);
        let mut session = open_mock(src, 512, None).unwrap();

        let mut frame = vec![0.0f32; 512];
        session.get_samples(&mut frame).unwrap();
        assert_eq!(frame, samples);
    }

    #[test]
    fn retry_budget_exhaustion_pads_with_silence() {
        let samples = vec![0.5f32; 512];
        let src = MockSource::new(192_000, samples).with_max_per_read(64);
        let mut session = open_mock(src, 512, None).unwrap();

        // 5 reads of 64 samples fill 320; the rest must be silence.
        let mut frame = vec![1.0f32; 512];
        session.get_samples(&mut frame).unwrap();
        assert!(frame[..320].iter().all(|&s| s == 0.5));
        assert!(frame[320..].iter().all(|&s| s == 0.0));
    }

    #[test]
    fn multichannel_source_is_rejected() {
        let src = MockSource::new(192_000, vec![0.0; 16]).with_channels(2);
        let err = open_mock(src, 512, None).err().unwrap();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn auto_rate_outside_band_is_rejected() {
        let src = MockSource::new(44_100, vec![0.0; 16]);
        let err = open_mock(src, 512, None).err().unwrap();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn auto_rate_inside_band_becomes_mpx_rate() {
        let src = MockSource::new(192_000, vec![0.0; 16]);
        let session = open_mock(src, 512, None).unwrap();
        assert_eq!(session.mpx_rate(), 192_000);
        assert_eq!(session.ratio(), 1.0);
    }

    #[test]
    fn explicit_target_fixes_the_ratio() {
        let src = MockSource::new(192_000, vec![0.0; 16]);
        let session = open_mock(src, 512, Some(228_000)).unwrap();
        assert_eq!(session.mpx_rate(), 228_000);
        assert_eq!(session.ratio(), 192_000.0 / 228_000.0);
    }

    #[test]
    fn equal_target_selects_passthrough() {
        let samples = ramp(512);
        let src = MockSource::new(192_000, samples.clone());
        let mut session = open_mock(src, 512, Some(192_000)).unwrap();
        assert_eq!(session.ratio(), 1.0);

        let mut frame = vec![0.0f32; 512];
        session.get_samples(&mut frame).unwrap();
        assert_eq!(frame, samples);
    }

    #[test]
    fn audio_less_session_produces_silence() {
        let mut session =
            MpxInput::from_source(None, 256, Some(228_000), IngestConfig::default()).unwrap();
        assert_eq!(session.mpx_rate(), 228_000);

        let mut frame = vec![1.0f32; 256];
        session.get_samples(&mut frame).unwrap();
        assert!(frame.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn audio_less_session_requires_a_rate() {
        let err = MpxInput::from_source(None, 256, None, IngestConfig::default())
            .err()
            .unwrap();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn zero_frame_length_is_rejected() {
        let err = MpxInput::from_source(None, 0, Some(228_000), IngestConfig::default())
            .err()
            .unwrap();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn wrong_output_length_is_rejected() {
        let src = MockSource::new(192_000, vec![0.0; 16]);
        let mut session = open_mock(src, 512, None).unwrap();
        let mut frame = vec![0.0f32; 256];
        assert!(matches!(
            session.get_samples(&mut frame),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn read_error_is_fatal_to_the_call() {
        let mut session = MpxInput::from_source(
            Some(Box::new(FailingSource)),
            512,
            None,
            IngestConfig::default(),
        )
        .unwrap();

        let mut frame = vec![0.0f32; 512];
        assert!(matches!(
            session.get_samples(&mut frame),
            Err(Error::Io(_))
        ));
    }

    #[test]
    fn close_without_resampler_is_safe() {
        let src = MockSource::new(192_000, vec![0.0; 16]);
        let session = open_mock(src, 512, None).unwrap();
        assert!(session.close().is_ok());
    }

    #[test]
    fn close_reports_source_failure_without_escalating() {
        /// Source whose handle refuses to close.
        struct StickySource;

        impl SampleSource for StickySource {
            fn sample_rate(&self) -> u32 {
                192_000
            }

            fn channels(&self) -> usize {
                1
            }

            fn read(&mut self, _out: &mut [f32]) -> Result<usize> {
                Ok(0)
            }

            fn close(&mut self) -> Result<()> {
                Err(Error::Io(io::Error::other("close failed")))
            }
        }

        let session = MpxInput::from_source(
            Some(Box::new(StickySource)),
            512,
            None,
            IngestConfig::default(),
        )
        .unwrap();

        // The status is informational; the session is released either way.
        assert!(session.close().is_err());
    }

    #[test]
    fn resampled_frames_keep_fixed_length_and_carry_over() {
        // 192 kHz -> 228 kHz upsampling over a constant signal.
        let src = MockSource::new(192_000, vec![0.5f32; 8192]);
        let mut session = open_mock(src, 1024, Some(228_000)).unwrap();

        let mut frame = vec![0.0f32; 1024];
        let mut saw_signal = false;
        for _ in 0..4 {
            session.get_samples(&mut frame).unwrap();
            if frame.iter().any(|&s| s > 0.4) {
                saw_signal = true;
            }
        }
        assert!(saw_signal);
    }

    #[test]
    fn resampled_stream_ends_in_silence() {
        let src = MockSource::new(228_000, vec![0.5f32; 2048]);
        let mut session = open_mock(src, 512, Some(192_000)).unwrap();

        // 2048 input samples make ~1724 output samples; by the sixth frame
        // the source and carry-over are long exhausted.
        let mut frame = vec![1.0f32; 512];
        for _ in 0..6 {
            session.get_samples(&mut frame).unwrap();
        }
        assert!(frame.iter().all(|&s| s == 0.0));
    }
}
