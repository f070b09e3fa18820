//! Audio file I/O
//!
//! Decodes any container symphonia understands into per-channel `f32`
//! buffers and writes processed buffers back out in the container named by
//! the destination extension.

use std::fs::File;
use std::io::BufWriter;
use std::num::{NonZeroU32, NonZeroU8};
use std::path::Path;

use hound::{WavSpec, WavWriter};
use mp3lame_encoder::{Builder, FlushNoGap, InterleavedPcm, MonoPcm};
use serde::{Deserialize, Serialize};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use vorbis_rs::{VorbisBitrateManagementStrategy, VorbisEncoderBuilder};

use crate::error::{DenoiseError, Result};

/// Frames handed to the Vorbis encoder per block.
const CHUNK_FRAMES: usize = 65536;

const OGG_QUALITY: f32 = 0.4;

/// Containers accepted as batch input and produced as output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    Wav,
    Mp3,
    Ogg,
    Flac,
}

impl AudioFormat {
    /// Lowercase extensions, without the dot
    pub fn supported_extensions() -> &'static [&'static str] {
        &["wav", "mp3", "ogg", "flac"]
    }

    /// Matches the path extension case-insensitively
    pub fn from_path(path: impl AsRef<Path>) -> Option<Self> {
        let ext = path.as_ref().extension()?.to_str()?.to_lowercase();
        match ext.as_str() {
            "wav" => Some(Self::Wav),
            "mp3" => Some(Self::Mp3),
            "ogg" => Some(Self::Ogg),
            "flac" => Some(Self::Flac),
            _ => None,
        }
    }
}

/// Fixed-point width used for lossless output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SampleWidth {
    /// 16-bit PCM
    Standard,
    /// 32-bit PCM
    High,
}

impl SampleWidth {
    pub fn from_preserve_flag(preserve_high_bit_depth: bool) -> Self {
        if preserve_high_bit_depth {
            SampleWidth::High
        } else {
            SampleWidth::Standard
        }
    }

    pub fn bits(self) -> u16 {
        match self {
            SampleWidth::Standard => 16,
            SampleWidth::High => 32,
        }
    }

    fn ffmpeg_sample_fmt(self) -> &'static str {
        match self {
            SampleWidth::Standard => "s16",
            SampleWidth::High => "s32",
        }
    }
}

/// Planar audio: one `Vec<f32>` per channel, all the same length.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    pub channels: Vec<Vec<f32>>,
    pub sample_rate: u32,
}

impl AudioBuffer {
    pub fn new(channels: Vec<Vec<f32>>, sample_rate: u32) -> Self {
        Self { channels, sample_rate }
    }

    /// Split interleaved samples into channels. A trailing partial frame is dropped.
    pub fn from_interleaved(samples: &[f32], channel_count: usize, sample_rate: u32) -> Self {
        let channel_count = channel_count.max(1);
        let frames = samples.len() / channel_count;
        let channels = (0..channel_count)
            .map(|ch| {
                samples
                    .iter()
                    .skip(ch)
                    .step_by(channel_count)
                    .take(frames)
                    .copied()
                    .collect()
            })
            .collect();
        Self { channels, sample_rate }
    }

    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    /// Frames per channel
    pub fn len(&self) -> usize {
        self.channels.first().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn to_interleaved(&self) -> Vec<f32> {
        let frames = self.len();
        let mut out = Vec::with_capacity(frames * self.num_channels());
        for i in 0..frames {
            for channel in &self.channels {
                out.push(channel[i]);
            }
        }
        out
    }

    /// Largest absolute sample value across all channels
    pub fn peak(&self) -> f32 {
        self.channels
            .iter()
            .flat_map(|c| c.iter())
            .fold(0.0f32, |acc, s| acc.max(s.abs()))
    }
}

/// Decode a whole file to planar `f32`
pub fn decode_file(path: &Path) -> Result<AudioBuffer> {
    let file = File::open(path)
        .map_err(|e| DenoiseError::Decode(format!("Failed to open source: {}", e)))?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    decode_stream(mss, &hint, path)
}

/// Decode everything readable from `mss`. A read failure other than a clean
/// end of stream fails the whole file rather than returning a truncated buffer.
fn decode_stream(mss: MediaSourceStream, hint: &Hint, origin: &Path) -> Result<AudioBuffer> {
    let format_opts = FormatOptions::default();
    let metadata_opts = MetadataOptions::default();
    let decoder_opts = DecoderOptions::default();

    let probed = symphonia::default::get_probe()
        .format(hint, mss, &format_opts, &metadata_opts)
        .map_err(|e| DenoiseError::Decode(format!("Failed to probe format: {}", e)))?;

    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| DenoiseError::Decode("No audio tracks found".to_string()))?;

    let track_id = track.id;
    let mut sample_rate = track.codec_params.sample_rate;
    let mut channels = track.codec_params.channels.map(|c| c.count());

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &decoder_opts)
        .map_err(|e| DenoiseError::Decode(format!("Failed to create decoder: {}", e)))?;

    let mut interleaved: Vec<f32> = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break
            }
            Err(SymphoniaError::DecodeError(e)) => {
                log::debug!("Skipping unreadable packet in {:?}: {}", origin, e);
                continue;
            }
            Err(e) => return Err(DenoiseError::Decode(format!("Error reading packet: {}", e))),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(e)) => {
                log::debug!("Skipping corrupt packet in {:?}: {}", origin, e);
                continue;
            }
            Err(e) => return Err(DenoiseError::Decode(format!("Failed to decode: {}", e))),
        };

        let spec = *decoded.spec();
        sample_rate.get_or_insert(spec.rate);
        channels.get_or_insert(spec.channels.count());

        let mut sample_buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        sample_buf.copy_interleaved_ref(decoded);
        interleaved.extend_from_slice(sample_buf.samples());
    }

    let sample_rate = sample_rate
        .ok_or_else(|| DenoiseError::Decode("Unknown sample rate".to_string()))?;
    let channels = channels
        .filter(|&c| c > 0)
        .ok_or_else(|| DenoiseError::Decode("Unknown channel layout".to_string()))?;

    if interleaved.is_empty() {
        return Err(DenoiseError::Decode("No audio decoded".to_string()));
    }

    Ok(AudioBuffer::from_interleaved(&interleaved, channels, sample_rate))
}

/// Write `buffer` in the container named by `path`'s extension
pub fn encode_file(path: &Path, buffer: &AudioBuffer, width: SampleWidth) -> Result<()> {
    if buffer.num_channels() == 0 {
        return Err(DenoiseError::Encode("Buffer has no channels".to_string()));
    }

    match AudioFormat::from_path(path) {
        Some(AudioFormat::Wav) => write_wav(path, buffer, width),
        Some(AudioFormat::Ogg) => write_ogg(path, buffer),
        Some(AudioFormat::Mp3) => write_mp3(path, buffer),
        Some(AudioFormat::Flac) => write_flac(path, buffer, width),
        None => Err(DenoiseError::Encode(format!(
            "Unsupported output format: {}",
            path.display()
        ))),
    }
}

fn to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16
}

fn to_i32(sample: f32) -> i32 {
    (sample.clamp(-1.0, 1.0) as f64 * i32::MAX as f64).round() as i32
}

fn write_wav(path: &Path, buffer: &AudioBuffer, width: SampleWidth) -> Result<()> {
    let channels = u16::try_from(buffer.num_channels())
        .map_err(|_| DenoiseError::Encode("Too many channels for WAV".to_string()))?;
    let spec = WavSpec {
        channels,
        sample_rate: buffer.sample_rate,
        bits_per_sample: width.bits(),
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = WavWriter::create(path, spec)
        .map_err(|e| DenoiseError::Encode(format!("Failed to create WAV file: {}", e)))?;

    for sample in buffer.to_interleaved() {
        let written = match width {
            SampleWidth::Standard => writer.write_sample(to_i16(sample)),
            SampleWidth::High => writer.write_sample(to_i32(sample)),
        };
        written.map_err(|e| DenoiseError::Encode(format!("Failed to write sample: {}", e)))?;
    }

    writer
        .finalize()
        .map_err(|e| DenoiseError::Encode(format!("Failed to finalize WAV: {}", e)))
}

fn write_ogg(path: &Path, buffer: &AudioBuffer) -> Result<()> {
    let output_file = BufWriter::new(
        File::create(path)
            .map_err(|e| DenoiseError::Encode(format!("Failed to create OGG file: {}", e)))?,
    );

    let sample_rate = NonZeroU32::new(buffer.sample_rate)
        .ok_or_else(|| DenoiseError::Encode("Sample rate must be non-zero".to_string()))?;
    let channels = u8::try_from(buffer.num_channels())
        .ok()
        .and_then(NonZeroU8::new)
        .ok_or_else(|| DenoiseError::Encode("Unsupported channel count for Vorbis".to_string()))?;

    let mut encoder = VorbisEncoderBuilder::new(sample_rate, channels, output_file)
        .map_err(|e| DenoiseError::Encode(format!("Vorbis builder error: {}", e)))?
        .bitrate_management_strategy(VorbisBitrateManagementStrategy::QualityVbr {
            target_quality: OGG_QUALITY,
        })
        .build()
        .map_err(|e| DenoiseError::Encode(format!("Vorbis build error: {}", e)))?;

    let total_frames = buffer.len();
    let mut pos = 0;
    while pos < total_frames {
        let end = (pos + CHUNK_FRAMES).min(total_frames);
        let planar: Vec<&[f32]> = buffer.channels.iter().map(|c| &c[pos..end]).collect();
        encoder
            .encode_audio_block(&planar)
            .map_err(|e| DenoiseError::Encode(format!("Vorbis encode error: {}", e)))?;
        pos = end;
    }

    encoder
        .finish()
        .map_err(|e| DenoiseError::Encode(format!("Vorbis finish error: {}", e)))?;
    Ok(())
}

fn write_mp3(path: &Path, buffer: &AudioBuffer) -> Result<()> {
    let channel_count = buffer.num_channels();
    if channel_count > 2 {
        return Err(DenoiseError::Encode(format!(
            "MP3 supports at most 2 channels, got {}",
            channel_count
        )));
    }

    let mut builder = Builder::new()
        .ok_or_else(|| DenoiseError::Encode("Failed to create MP3 encoder".to_string()))?;
    builder
        .set_num_channels(channel_count as u8)
        .map_err(|e| DenoiseError::Encode(format!("Failed to set channels: {:?}", e)))?;
    builder
        .set_sample_rate(buffer.sample_rate)
        .map_err(|e| DenoiseError::Encode(format!("Failed to set sample rate: {:?}", e)))?;
    builder
        .set_brate(mp3lame_encoder::Bitrate::Kbps192)
        .map_err(|e| DenoiseError::Encode(format!("Failed to set bitrate: {:?}", e)))?;
    builder
        .set_quality(mp3lame_encoder::Quality::Best)
        .map_err(|e| DenoiseError::Encode(format!("Failed to set quality: {:?}", e)))?;
    let mut encoder = builder
        .build()
        .map_err(|e| DenoiseError::Encode(format!("Failed to build encoder: {:?}", e)))?;

    let pcm: Vec<i16> = buffer.to_interleaved().into_iter().map(to_i16).collect();

    // LAME needs roughly 1.25x input + 7200 bytes
    let mut mp3_out: Vec<u8> = Vec::with_capacity(pcm.len() * 5 / 4 + 7200);

    let encoded = if channel_count == 1 {
        encoder.encode(MonoPcm(&pcm), mp3_out.spare_capacity_mut())
    } else {
        encoder.encode(InterleavedPcm(&pcm), mp3_out.spare_capacity_mut())
    }
    .map_err(|e| DenoiseError::Encode(format!("Failed to encode MP3: {:?}", e)))?;
    // SAFETY: the encoder initialised exactly `encoded` bytes of spare capacity.
    unsafe {
        mp3_out.set_len(encoded);
    }

    mp3_out.reserve(7200);
    let flushed = encoder
        .flush::<FlushNoGap>(mp3_out.spare_capacity_mut())
        .map_err(|e| DenoiseError::Encode(format!("Failed to flush encoder: {:?}", e)))?;
    // SAFETY: as above, `flushed` bytes past the current length were written.
    unsafe {
        mp3_out.set_len(mp3_out.len() + flushed);
    }

    std::fs::write(path, &mp3_out)
        .map_err(|e| DenoiseError::Encode(format!("Failed to write MP3 file: {}", e)))
}

/// FLAC goes through a staged WAV and an ffmpeg transcode.
fn write_flac(path: &Path, buffer: &AudioBuffer, width: SampleWidth) -> Result<()> {
    let temp_wav = std::env::temp_dir().join(format!("denoise_{}.wav", uuid::Uuid::new_v4()));
    write_wav(&temp_wav, buffer, width)?;

    let result = wav_to_flac(&temp_wav, path, width);
    let _ = std::fs::remove_file(&temp_wav);
    result
}

fn wav_to_flac(wav_path: &Path, flac_path: &Path, width: SampleWidth) -> Result<()> {
    let output = std::process::Command::new("ffmpeg")
        .arg("-y")
        .args(["-loglevel", "error"])
        .arg("-i")
        .arg(wav_path)
        .args(["-c:a", "flac", "-sample_fmt", width.ffmpeg_sample_fmt()])
        .arg(flac_path)
        .output()
        .map_err(|e| DenoiseError::Encode(format!("Failed to run ffmpeg (is it installed?): {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(DenoiseError::Encode(format!(
            "ffmpeg FLAC conversion failed: {}",
            stderr.trim()
        )));
    }

    Ok(())
}
