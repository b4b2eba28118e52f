use log::warn;
use crate::drivers::source::ChunkSource;
use crate::drivers::spectrum::{PowerSpectrum, SpectrumBuilder};
use crate::drivers::{AcqError, ChannelBufferSet, ChannelFrame, SampleDecoder};
/// Decoder plus channel windows: the single writer of decoded samples.
pub struct AcquisitionCore {
    decoder: SampleDecoder,
    buffers: ChannelBufferSet,
    dropped_batches: u64,
}
impl AcquisitionCore {
    pub fn new(decoder: SampleDecoder, buffers: ChannelBufferSet) -> Result<Self, AcqError> {
        decoder.mode().check_channel_count(buffers.channel_count())?;
        Ok(Self {
            decoder,
            buffers,
            dropped_batches: 0,
        })
    }
    pub fn decoder(&self) -> &SampleDecoder {
        &self.decoder
    }
    pub fn buffers(&self) -> &ChannelBufferSet {
        &self.buffers
    }
    pub fn buffers_mut(&mut self) -> &mut ChannelBufferSet {
        &mut self.buffers
    }
    pub fn dropped_batches(&self) -> u64 {
        self.dropped_batches
    }
    /// Decode and store one raw chunk. A chunk that cannot be decoded is
    /// logged and dropped; the windows are left untouched.
    pub fn ingest(&mut self, chunk: &[u8]) -> bool {
        let stored = self
            .decoder
            .decode(chunk)
            .and_then(|samples| self.buffers.update_data(&samples));
        match stored {
            Ok(()) => true,
            Err(err) => {
                self.dropped_batches += 1;
                warn!(
                    "dropping {}-byte batch ({} dropped so far): {err}",
                    chunk.len(),
                    self.dropped_batches
                );
                false
            }
        }
    }
    pub fn frame(&self) -> ChannelFrame {
        self.buffers.frame()
    }
}
/// High level pipeline that pulls chunks and exposes ready-to-plot frames.
pub struct DecodePipeline<S: ChunkSource> {
    source: S,
    core: AcquisitionCore,
}
impl<S: ChunkSource> DecodePipeline<S> {
    pub fn new(source: S, core: AcquisitionCore) -> Self {
        Self { source, core }
    }
    /// `Ok(None)` once the source is exhausted.
    pub fn pump_once(&mut self) -> Result<Option<ChannelFrame>, AcqError> {
        let Some(chunk) = self.source.next_chunk()? else {
            return Ok(None);
        };
        self.core.ingest(&chunk);
        Ok(Some(self.core.frame()))
    }
    /// Pump until the source runs dry, returning the number of chunks read.
    pub fn drain(&mut self) -> Result<usize, AcqError> {
        let mut chunks = 0;
        while let Some(chunk) = self.source.next_chunk()? {
            self.core.ingest(&chunk);
            chunks += 1;
        }
        Ok(chunks)
    }
    pub fn core(&self) -> &AcquisitionCore {
        &self.core
    }
    pub fn core_mut(&mut self) -> &mut AcquisitionCore {
        &mut self.core
    }
    pub fn source(&self) -> &S {
        &self.source
    }
    pub fn latest_frame(&self) -> ChannelFrame {
        self.core.frame()
    }
    pub fn latest_spectrum(&self) -> Result<PowerSpectrum, AcqError> {
        SpectrumBuilder::quarter_window().compute(&self.core.frame())
    }
}
