use std::fmt;
use serde::{Deserialize, Serialize};
use crate::drivers::AcqError;
/// Calibration of the later board revision, in µA per code unit.
pub const DEFAULT_STANDARD_SCALE: f64 = 2.0;
/// Calibration of the first board revision, in µA per code unit.
pub const LEGACY_STANDARD_SCALE: f64 = 0.2;
const PACKED_FULL_SCALE: i32 = 0x7F_FFFF;
const PACKED_WRAP: i32 = 0x100_0000;
/// Raw byte layout produced by the acquisition hardware.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncodingMode {
    /// 16-bit offset-binary words, channels interleaved sample by sample.
    #[default]
    Standard,
    /// Six bytes carrying one 24-bit sample for each of two channels.
    PackedTriplet,
}
impl EncodingMode {
    /// Smallest decodable unit in bytes.
    pub fn group_bytes(self) -> usize {
        match self {
            EncodingMode::Standard => 2,
            EncodingMode::PackedTriplet => 6,
        }
    }
    pub fn samples_per_group(self) -> usize {
        match self {
            EncodingMode::Standard => 1,
            EncodingMode::PackedTriplet => 2,
        }
    }
    pub fn fixed_channel_count(self) -> Option<usize> {
        match self {
            EncodingMode::Standard => None,
            EncodingMode::PackedTriplet => Some(2),
        }
    }
    /// Bytes carrying one sample of every channel.
    pub fn frame_bytes(self, channel_count: usize) -> usize {
        match self {
            EncodingMode::Standard => self.group_bytes() * channel_count,
            EncodingMode::PackedTriplet => self.group_bytes(),
        }
    }
    pub fn check_channel_count(self, channel_count: usize) -> Result<(), AcqError> {
        if channel_count == 0 {
            return Err(AcqError::InvalidChannelCount);
        }
        match self.fixed_channel_count() {
            Some(expected) if expected != channel_count => Err(AcqError::ChannelCountForMode {
                mode: self,
                expected,
                actual: channel_count,
            }),
            _ => Ok(()),
        }
    }
}
impl fmt::Display for EncodingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncodingMode::Standard => f.write_str("standard"),
            EncodingMode::PackedTriplet => f.write_str("packed-triplet"),
        }
    }
}
/// Stateless bytes-to-amperes converter for one encoding mode.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SampleDecoder {
    mode: EncodingMode,
    scale_ua_per_unit: f64,
}
impl SampleDecoder {
    /// `scale_ua_per_unit` only applies to [`EncodingMode::Standard`].
    pub fn new(mode: EncodingMode, scale_ua_per_unit: f64) -> Self {
        Self {
            mode,
            scale_ua_per_unit,
        }
    }
    pub fn mode(&self) -> EncodingMode {
        self.mode
    }
    pub fn scale_ua_per_unit(&self) -> f64 {
        self.scale_ua_per_unit
    }
    pub fn decode(&self, bytes: &[u8]) -> Result<Vec<f64>, AcqError> {
        match self.mode {
            EncodingMode::Standard => decode_standard(bytes, self.scale_ua_per_unit),
            EncodingMode::PackedTriplet => decode_packed_triplet(bytes),
        }
    }
}
fn check_length(mode: EncodingMode, bytes: &[u8]) -> Result<(), AcqError> {
    let group = mode.group_bytes();
    if bytes.len() % group != 0 {
        return Err(AcqError::InvalidLength {
            mode,
            len: bytes.len(),
            group,
        });
    }
    Ok(())
}
/// Decode `msb, lsb` pairs into amperes.
pub fn decode_standard(bytes: &[u8], scale_ua_per_unit: f64) -> Result<Vec<f64>, AcqError> {
    check_length(EncodingMode::Standard, bytes)?;
    Ok(bytes
        .chunks_exact(2)
        .map(|pair| standard_current(pair[0], pair[1], scale_ua_per_unit))
        .collect())
}
fn standard_current(msb: u8, lsb: u8, scale_ua_per_unit: f64) -> f64 {
    let d = (u16::from(msb) << 8) | u16::from(lsb);
    // The hardware wraps through a signed 16-bit register before the unsigned read-out.
    let r = (i32::from(d) + 0x8000) as i16 as u16;
    let volts = f64::from(r) * 10.0 / 65536.0 - 5.0;
    volts * scale_ua_per_unit / 1e6
}
/// Decode `[msb2, msb1, lsw1_hi, lsw1_lo, lsw2_hi, lsw2_lo]` groups into
/// amperes, alternating channel 1 and channel 2.
pub fn decode_packed_triplet(bytes: &[u8]) -> Result<Vec<f64>, AcqError> {
    check_length(EncodingMode::PackedTriplet, bytes)?;
    let mut out = Vec::with_capacity(bytes.len() / 3);
    for group in bytes.chunks_exact(6) {
        let msb2 = u32::from(group[0]);
        let msb1 = u32::from(group[1]);
        let lsw1 = (u32::from(group[2]) << 8) | u32::from(group[3]);
        let lsw2 = (u32::from(group[4]) << 8) | u32::from(group[5]);
        out.push(packed_current((msb1 << 16) | lsw1));
        out.push(packed_current((msb2 << 16) | lsw2));
    }
    Ok(out)
}
fn packed_current(raw: u32) -> f64 {
    let mut p = raw as i32;
    if p >= PACKED_FULL_SCALE {
        p -= PACKED_WRAP;
    }
    5.0 / f64::from(PACKED_FULL_SCALE) * f64::from(p) / 500_000.0
}
/// Split an interleaved batch into one vector per channel.
pub fn deinterleave(samples: &[f64], channel_count: usize) -> Vec<Vec<f64>> {
    (0..channel_count)
        .map(|offset| {
            samples
                .iter()
                .skip(offset)
                .step_by(channel_count)
                .copied()
                .collect()
        })
        .collect()
}
