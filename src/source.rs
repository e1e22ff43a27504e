//! Sample sources backed by Symphonia.
//!
//! The session layer only sees [`SampleSource`]: a blocking read-up-to-N
//! operation plus the source's rate and channel layout. [`SymphoniaSource`]
//! implements it by probing the container, decoding packets to `f32`, and
//! serving samples out of a per-packet buffer so callers can read arbitrary
//! slice lengths.

use std::collections::VecDeque;
use std::fs::File;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CodecParameters, Decoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::{MediaSource, MediaSourceStream, ReadOnlySource};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::error::{Error, Result};

/// Identifies where audio comes from: the standard input stream or a file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceId {
    /// Read from the process's standard input (non-seekable).
    Stdin,
    /// Read from a file on the filesystem.
    Path(PathBuf),
}

/// Metadata captured while probing the source (best-effort).
#[derive(Clone, Debug, Default)]
pub struct SourceInfo {
    /// Codec name, when recognized.
    pub codec: Option<String>,
    /// Source bit depth, when the container reports one.
    pub bit_depth: Option<u16>,
}

/// A blocking, single-stream PCM sample source.
///
/// `read` fills as much of `out` as it can and returns the sample count;
/// `Ok(0)` means end of stream. Short reads are normal for streaming
/// sources and are not errors.
pub trait SampleSource: Send {
    /// Native sample rate of the source, in Hz.
    fn sample_rate(&self) -> u32;

    /// Number of interleaved channels the source carries.
    fn channels(&self) -> usize;

    /// Probe-time metadata, when the backend captured any.
    fn info(&self) -> SourceInfo {
        SourceInfo::default()
    }

    /// Read up to `out.len()` samples into `out`, returning how many were
    /// written. `Ok(0)` signals end of stream; `Err` is a fatal read error.
    fn read(&mut self, out: &mut [f32]) -> Result<usize>;

    /// Release the underlying handle. Failures are diagnostic only.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// [`SampleSource`] over any Symphonia-supported container/codec.
pub struct SymphoniaSource {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    rate: u32,
    channels: usize,
    info: SourceInfo,
    pending: VecDeque<f32>,
}

impl SymphoniaSource {
    /// Open a file on the filesystem, using its extension as a probe hint.
    pub fn from_path(path: &Path) -> Result<Self> {
        let file = File::open(path)?;

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        tracing::info!(path = %path.display(), "using audio file input");
        Self::from_media_source(Box::new(file), hint)
    }

    /// Open the process's standard input as a non-seekable stream.
    pub fn from_stdin() -> Result<Self> {
        tracing::info!("using stdin for audio input");
        Self::from_media_source(Box::new(ReadOnlySource::new(std::io::stdin())), Hint::new())
    }

    /// Probe an arbitrary [`MediaSource`] (seekable or not) and set up the
    /// default track's decoder.
    pub fn from_media_source(source: Box<dyn MediaSource>, hint: Hint) -> Result<Self> {
        let mss = MediaSourceStream::new(source, Default::default());

        let probed = symphonia::default::get_probe().format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )?;

        let format = probed.format;
        let track = format
            .default_track()
            .ok_or_else(|| Error::Decode("no default audio track".into()))?;
        let track_id = track.id;

        let channels = track
            .codec_params
            .channels
            .ok_or_else(|| Error::Decode("unknown channel count".into()))?
            .count();

        let rate = track
            .codec_params
            .sample_rate
            .ok_or_else(|| Error::Decode("unknown sample rate".into()))?;

        let codec_params = track.codec_params.clone();
        let info = SourceInfo {
            codec: codec_name_from_params(&codec_params),
            bit_depth: codec_params
                .bits_per_sample
                .or(codec_params.bits_per_coded_sample)
                .and_then(|v| u16::try_from(v).ok()),
        };

        let decoder =
            symphonia::default::get_codecs().make(&codec_params, &DecoderOptions::default())?;

        Ok(Self {
            format,
            decoder,
            track_id,
            rate,
            channels,
            info,
            pending: VecDeque::new(),
        })
    }

    /// Decode the next packet of our track into `pending`.
    ///
    /// Returns `false` on end of stream. Corrupt packets are skipped rather
    /// than treated as fatal; real I/O failures propagate.
    fn refill(&mut self) -> Result<bool> {
        loop {
            let packet = match self.format.next_packet() {
                Ok(p) => p,
                Err(SymphoniaError::IoError(e)) if e.kind() == ErrorKind::UnexpectedEof => {
                    return Ok(false);
                }
                Err(SymphoniaError::ResetRequired) => return Ok(false),
                Err(e) => return Err(e.into()),
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode(&packet) {
                Ok(d) => d,
                Err(e) => {
                    tracing::warn!(error = %e, "skipping undecodable packet");
                    continue;
                }
            };

            let mut sample_buf = SampleBuffer::<f32>::new(decoded.frames() as u64, *decoded.spec());
            sample_buf.copy_interleaved_ref(decoded);
            self.pending.extend(sample_buf.samples());

            return Ok(true);
        }
    }
}

impl SampleSource for SymphoniaSource {
    fn sample_rate(&self) -> u32 {
        self.rate
    }

    fn channels(&self) -> usize {
        self.channels
    }

    fn info(&self) -> SourceInfo {
        self.info.clone()
    }

    fn read(&mut self, out: &mut [f32]) -> Result<usize> {
        let mut written = 0;

        while written < out.len() {
            if self.pending.is_empty() && !self.refill()? {
                break;
            }

            while written < out.len() {
                match self.pending.pop_front() {
                    Some(s) => {
                        out[written] = s;
                        written += 1;
                    }
                    None => break,
                }
            }
        }

        Ok(written)
    }
}

/// Best-effort codec label for negotiation logs.
fn codec_name_from_params(params: &CodecParameters) -> Option<String> {
    use symphonia::core::codecs::*;
    let name = match params.codec {
        CODEC_TYPE_FLAC => "FLAC",
        CODEC_TYPE_MP3 => "MP3",
        CODEC_TYPE_AAC => "AAC",
        CODEC_TYPE_ALAC => "ALAC",
        CODEC_TYPE_VORBIS => "VORBIS",
        CODEC_TYPE_PCM_S16LE | CODEC_TYPE_PCM_S16BE => "PCM_S16",
        CODEC_TYPE_PCM_S24LE | CODEC_TYPE_PCM_S24BE => "PCM_S24",
        CODEC_TYPE_PCM_S32LE | CODEC_TYPE_PCM_S32BE => "PCM_S32",
        CODEC_TYPE_PCM_F32LE | CODEC_TYPE_PCM_F32BE => "PCM_F32",
        _ => return None,
    };
    Some(name.to_string())
}
