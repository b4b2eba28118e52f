use thiserror::Error;
use crate::drivers::EncodingMode;
#[derive(Debug, Error)]
pub enum AcqError {
    #[error("{len} bytes is not a multiple of the {group}-byte {mode} sample group")]
    InvalidLength {
        mode: EncodingMode,
        len: usize,
        group: usize,
    },
    #[error("emit threshold of {threshold} bytes must be a non-zero multiple of {frame} bytes")]
    MisalignedThreshold { threshold: usize, frame: usize },
    #[error("sample rate must be greater than zero")]
    InvalidSampleRate,
    #[error("time range must be greater than zero")]
    InvalidTimeRange,
    #[error("a {sample_rate_hz} Hz x {time_range_s} s window holds no samples")]
    EmptyWindow {
        sample_rate_hz: f64,
        time_range_s: f64,
    },
    #[error("{value} is not one of the configured choices {allowed:?}")]
    NotOffered { value: f64, allowed: Vec<f64> },
    #[error("channel count must be at least one")]
    InvalidChannelCount,
    #[error("{mode} encoding carries exactly {expected} channels, got {actual}")]
    ChannelCountForMode {
        mode: EncodingMode,
        expected: usize,
        actual: usize,
    },
    #[error("batch of {len} samples does not split into {channels} channels")]
    ChannelMismatch { channels: usize, len: usize },
    #[error("invalid filter: {0}")]
    InvalidFilter(String),
    #[error("signal of {len} samples is too short, need at least {needed}")]
    SignalTooShort { len: usize, needed: usize },
    #[error("receive on port {port} failed: {source}")]
    Receive {
        port: u16,
        #[source]
        source: std::io::Error,
    },
    #[error("listener is no longer running")]
    ListenerClosed,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
