use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

pub fn wav_duration_seconds(path: &Path) -> Result<f64, hound::Error> {
    let reader = WavReader::open(path)?;
    let spec = reader.spec();
    let samples = reader.len();
    let frames = samples as f64 / spec.channels as f64;
    let duration = frames / spec.sample_rate as f64;
    Ok(duration)
}

/// Writes a raw little-endian 16-bit mono PCM stream into a WAV container,
/// one network chunk at a time.
pub struct PcmWavWriter {
    writer: WavWriter<BufWriter<File>>,
    // Chunks may split a sample; the odd byte waits for the next chunk.
    pending: Option<u8>,
}

impl PcmWavWriter {
    pub fn create(path: &Path, sample_rate: u32) -> Result<Self, hound::Error> {
        let spec = WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        Ok(Self {
            writer: WavWriter::create(path, spec)?,
            pending: None,
        })
    }

    pub fn write_chunk(&mut self, mut bytes: &[u8]) -> Result<(), hound::Error> {
        if bytes.is_empty() {
            return Ok(());
        }
        if let Some(lo) = self.pending.take() {
            self.writer.write_sample(i16::from_le_bytes([lo, bytes[0]]))?;
            bytes = &bytes[1..];
        }
        let mut pairs = bytes.chunks_exact(2);
        for pair in &mut pairs {
            self.writer.write_sample(i16::from_le_bytes([pair[0], pair[1]]))?;
        }
        if let [odd] = pairs.remainder() {
            self.pending = Some(*odd);
        }
        Ok(())
    }

    /// Flushes the header. A dangling half sample is dropped.
    pub fn finalize(self) -> Result<(), hound::Error> {
        self.writer.finalize()
    }
}
