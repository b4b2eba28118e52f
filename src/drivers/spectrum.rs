use std::f64::consts::PI;
use rustfft::{num_complex::Complex64, FftPlanner};
use crate::drivers::{AcqError, ChannelFrame};
// Periodic flat-top window terms.
const FLATTOP: [f64; 5] = [
    0.215_578_95,
    0.416_631_58,
    0.277_263_158,
    0.083_578_947,
    0.006_947_368,
];
/// One-sided power spectrum for each channel.
#[derive(Clone, Debug)]
pub struct PowerSpectrum {
    pub sample_rate_hz: f64,
    pub frequencies_hz: Vec<f64>,
    pub power: Vec<Vec<f64>>, // channel -> bins, A^2
}
impl PowerSpectrum {
    /// Frequency of the strongest non-DC bin of `channel`.
    pub fn peak_frequency(&self, channel: usize) -> Option<f64> {
        let bins = self.power.get(channel)?;
        bins.iter()
            .enumerate()
            .skip(1)
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(k, _)| self.frequencies_hz[k])
    }
}
/// Welch estimator: averaged, half-overlapping flat-top periodograms.
pub struct SpectrumBuilder {
    segment_len: Option<usize>,
}
impl SpectrumBuilder {
    /// Segments a quarter of the frame long.
    pub fn quarter_window() -> Self {
        Self { segment_len: None }
    }
    pub fn with_segment_len(segment_len: usize) -> Self {
        Self {
            segment_len: Some(segment_len),
        }
    }
    pub fn compute(&self, frame: &ChannelFrame) -> Result<PowerSpectrum, AcqError> {
        let len = frame.samples_per_channel();
        let nperseg = self.segment_len.unwrap_or(len / 4).min(len);
        if nperseg < 2 {
            return Err(AcqError::SignalTooShort {
                len,
                needed: self.segment_len.unwrap_or(8),
            });
        }
        let step = nperseg - nperseg / 2;
        let window: Vec<f64> = (0..nperseg)
            .map(|n| {
                let x = 2.0 * PI * n as f64 / nperseg as f64;
                FLATTOP
                    .iter()
                    .enumerate()
                    .map(|(k, a)| {
                        let sign = if k % 2 == 0 { 1.0 } else { -1.0 };
                        sign * a * (k as f64 * x).cos()
                    })
                    .sum()
            })
            .collect();
        let window_sum: f64 = window.iter().sum();
        let scale = 1.0 / (window_sum * window_sum);
        let bins = nperseg / 2 + 1;
        let mut planner = FftPlanner::<f64>::new();
        let fft = planner.plan_fft_forward(nperseg);
        let frequencies_hz = (0..bins)
            .map(|k| k as f64 * frame.sample_rate_hz / nperseg as f64)
            .collect();
        let power = frame
            .samples
            .iter()
            .map(|channel| {
                let mut acc = vec![0.0; bins];
                let mut segments = 0usize;
                let mut start = 0;
                let mut buffer = vec![Complex64::new(0.0, 0.0); nperseg];
                while start + nperseg <= channel.len() {
                    let segment = &channel[start..start + nperseg];
                    let mean = segment.iter().sum::<f64>() / nperseg as f64;
                    for ((slot, v), w) in buffer.iter_mut().zip(segment).zip(&window) {
                        *slot = Complex64::new((v - mean) * w, 0.0);
                    }
                    fft.process(&mut buffer);
                    for (k, total) in acc.iter_mut().enumerate() {
                        *total += buffer[k].norm_sqr() * scale;
                    }
                    segments += 1;
                    start += step;
                }
                let last = if nperseg % 2 == 0 { bins - 1 } else { bins };
                for (k, total) in acc.iter_mut().enumerate() {
                    *total /= segments.max(1) as f64;
                    if k > 0 && k < last {
                        *total *= 2.0;
                    }
                }
                acc
            })
            .collect();
        Ok(PowerSpectrum {
            sample_rate_hz: frame.sample_rate_hz,
            frequencies_hz,
            power,
        })
    }
}
