// src/drivers/mod.rs
// decode -> window -> filter/spectrum, no I/O besides offline files
pub mod buffer;
pub mod decoder;
pub mod error;
pub mod filter;
pub mod pipeline;
pub mod source;
pub mod spectrum;
pub use buffer::{window_capacity, ChannelBufferSet, ChannelFrame, SampleRing};
pub use decoder::{
    deinterleave, EncodingMode, SampleDecoder, DEFAULT_STANDARD_SCALE, LEGACY_STANDARD_SCALE,
};
pub use error::AcqError;
pub use filter::{FilterChain, FilterKind, FilterSection};
pub use pipeline::{AcquisitionCore, DecodePipeline};
pub use source::{ChunkSource, ManualSource, OfflineRecording};
pub use spectrum::{PowerSpectrum, SpectrumBuilder};
