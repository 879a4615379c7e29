//! PCM stream reader feeding loudness levels to the engine
//!
//! Reads signed 16-bit little-endian mono samples from a file, FIFO or
//! stdin. Capture itself is delegated to an external recorder, e.g.
//! `arecord -f S16_LE -c1 -r 48000 | avatar-overlay-daemon --mic -`.

use std::path::{Path, PathBuf};

use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, info, warn};

use super::meter::LoudnessMeter;
use crate::state::EngineHandle;

/// Turns a PCM byte stream into periodic loudness updates
pub struct PcmSampler {
    source: PathBuf,
    meter: LoudnessMeter,
    engine: EngineHandle,
}

impl PcmSampler {
    pub fn new(source: &Path, fft_size: usize, smoothing: f32, engine: EngineHandle) -> Self {
        Self {
            source: source.to_owned(),
            meter: LoudnessMeter::new(fft_size, smoothing),
            engine,
        }
    }

    /// Open the source and stream levels until it ends
    ///
    /// An unavailable source only disables the voice channel.
    pub async fn run(mut self) {
        if self.source == Path::new("-") {
            info!("microphone: reading PCM from stdin");
            self.pump(tokio::io::stdin()).await;
            return;
        }

        match tokio::fs::File::open(&self.source).await {
            Ok(file) => {
                info!(source = %self.source.display(), "microphone initialized");
                self.pump(file).await;
            }
            Err(e) => {
                warn!(
                    source = %self.source.display(),
                    error = %e,
                    "microphone unavailable, continuing without voice input"
                );
            }
        }
    }

    async fn pump<R: AsyncRead + Unpin>(&mut self, mut reader: R) {
        let block = self.meter.block_size();
        let mut bytes = vec![0u8; block * 2];
        let mut samples = vec![0f32; block];

        loop {
            match reader.read_exact(&mut bytes).await {
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    info!("microphone stream ended");
                    return;
                }
                Err(e) => {
                    warn!(error = %e, "microphone read failed");
                    return;
                }
            }

            decode_s16le(&bytes, &mut samples);
            let level = self.meter.process(&samples);

            if self.engine.set_level(level).await.is_err() {
                debug!("engine closed, stopping microphone sampler");
                return;
            }
        }
    }
}

/// Decode little-endian i16 pairs into `[-1, 1]` floats
pub fn decode_s16le(bytes: &[u8], out: &mut [f32]) {
    for (sample, pair) in out.iter_mut().zip(bytes.chunks_exact(2)) {
        let value = i16::from_le_bytes([pair[0], pair[1]]);
        *sample = value as f32 / i16::MAX as f32;
    }
}
