// src/config.rs
use std::fs;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use crate::drivers::{window_capacity, AcqError, EncodingMode, FilterKind, DEFAULT_STANDARD_SCALE};
use crate::listeners::ResetPolicy;
/// Everything the acquisition core needs from the front end.
///
/// Missing fields in a config file fall back to [`Default`], which mirrors
/// the stock client: a 2-channel standard board at `192.168.137.240`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    pub server_address: IpAddr,
    /// Local interface both sockets bind to.
    pub bind_address: IpAddr,
    pub msg_port: u16,
    /// Destination port for commands when the server does not listen on `msg_port`.
    pub server_msg_port: Option<u16>,
    pub data_port: u16,
    pub sample_rate_hz: f64,
    pub time_range_s: f64,
    pub channel_count: usize,
    pub encoding_mode: EncodingMode,
    /// Largest datagram read from the data socket (at least one byte is read).
    pub datagram_size: usize,
    /// Standard-mode calibration in µA per code unit.
    pub scale_ua_per_unit: f64,
    /// Batches emitted per full window.
    pub emit_divisor: usize,
    pub reset_policy: ResetPolicy,
    pub recv_buffer_bytes: usize,
    pub poll_interval_ms: u64,
    pub restart_on_failure: bool,
    pub sample_rates_hz: Vec<f64>,
    pub time_ranges_s: Vec<f64>,
    pub filters: Vec<FilterKind>,
}
impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            server_address: IpAddr::V4(Ipv4Addr::new(192, 168, 137, 240)),
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            msg_port: 8888,
            server_msg_port: None,
            data_port: 8889,
            sample_rate_hz: 20_000.0,
            time_range_s: 1.0,
            channel_count: 2,
            encoding_mode: EncodingMode::Standard,
            datagram_size: 32,
            scale_ua_per_unit: DEFAULT_STANDARD_SCALE,
            emit_divisor: 10,
            reset_policy: ResetPolicy::Discard,
            recv_buffer_bytes: 4 << 20,
            poll_interval_ms: 200,
            restart_on_failure: false,
            sample_rates_hz: vec![5e3, 10e3, 20e3, 30e3, 40e3, 50e3],
            time_ranges_s: vec![1.0, 10.0, 30.0, 60.0],
            filters: Vec::new(),
        }
    }
}
impl AcquisitionConfig {
    /// Defaults for the dual-channel packed ("zero") board.
    pub fn packed_triplet() -> Self {
        Self {
            encoding_mode: EncodingMode::PackedTriplet,
            channel_count: 2,
            ..Self::default()
        }
    }
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: Self = serde_json::from_str(&text)
            .with_context(|| format!("parsing config {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("validating config {}", path.display()))?;
        Ok(config)
    }
    pub fn validate(&self) -> Result<(), AcqError> {
        self.encoding_mode.check_channel_count(self.channel_count)?;
        window_capacity(self.sample_rate_hz, self.time_range_s)?;
        Self::offered(self.sample_rate_hz, &self.sample_rates_hz)?;
        Self::offered(self.time_range_s, &self.time_ranges_s)?;
        Ok(())
    }
    fn offered(value: f64, allowed: &[f64]) -> Result<(), AcqError> {
        if allowed.is_empty() || allowed.iter().any(|a| (a - value).abs() < 1e-9) {
            Ok(())
        } else {
            Err(AcqError::NotOffered {
                value,
                allowed: allowed.to_vec(),
            })
        }
    }
    pub fn check_sample_rate(&self, sample_rate_hz: f64) -> Result<(), AcqError> {
        Self::offered(sample_rate_hz, &self.sample_rates_hz)?;
        window_capacity(sample_rate_hz, self.time_range_s).map(|_| ())
    }
    pub fn check_time_range(&self, time_range_s: f64) -> Result<(), AcqError> {
        Self::offered(time_range_s, &self.time_ranges_s)?;
        window_capacity(self.sample_rate_hz, time_range_s).map(|_| ())
    }
    pub fn frame_bytes(&self) -> usize {
        self.encoding_mode.frame_bytes(self.channel_count)
    }
    /// Bytes per emitted batch: a whole number of frames, at least one.
    pub fn emit_threshold_bytes(&self) -> usize {
        let frames = (self.sample_rate_hz * self.time_range_s / self.emit_divisor.max(1) as f64)
            .floor() as usize;
        self.frame_bytes() * frames.max(1)
    }
    pub fn sample_period_us(&self) -> f64 {
        1e6 / self.sample_rate_hz
    }
    pub fn server_msg_addr(&self) -> SocketAddr {
        SocketAddr::new(
            self.server_address,
            self.server_msg_port.unwrap_or(self.msg_port),
        )
    }
    pub fn local_msg_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.msg_port)
    }
    pub fn local_data_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.data_port)
    }
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}
