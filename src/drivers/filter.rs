use std::f64::consts::PI;
use rustfft::num_complex::Complex64;
use serde::{Deserialize, Serialize};
use crate::drivers::AcqError;
const MAX_BANDPASS_ORDER: usize = 10;
/// Filter requested by the front end, designed against the live sample rate.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FilterKind {
    Notch { freq_hz: f64, q: f64 },
    Bandpass { low_hz: f64, high_hz: f64, order: usize },
}
/// One transfer function `b(z) / a(z)`, stored with `a[0] == 1` and both
/// polynomials padded to the same length.
#[derive(Clone, Debug, PartialEq)]
pub struct FilterSection {
    b: Vec<f64>,
    a: Vec<f64>,
}
impl FilterSection {
    pub fn new(mut b: Vec<f64>, mut a: Vec<f64>) -> Result<Self, AcqError> {
        if b.is_empty() || a.is_empty() {
            return Err(AcqError::InvalidFilter(
                "numerator and denominator must be non-empty".into(),
            ));
        }
        let a0 = a[0];
        if a0 == 0.0 || !a0.is_finite() {
            return Err(AcqError::InvalidFilter(
                "leading denominator coefficient must be finite and non-zero".into(),
            ));
        }
        if b.iter().chain(&a).any(|c| !c.is_finite()) {
            return Err(AcqError::InvalidFilter("coefficients must be finite".into()));
        }
        b.iter_mut().for_each(|c| *c /= a0);
        a.iter_mut().for_each(|c| *c /= a0);
        let n = b.len().max(a.len());
        b.resize(n, 0.0);
        a.resize(n, 0.0);
        Ok(Self { b, a })
    }
    pub fn b(&self) -> &[f64] {
        &self.b
    }
    pub fn a(&self) -> &[f64] {
        &self.a
    }
    /// Samples of odd extension added on each side before filtering.
    pub fn padlen(&self) -> usize {
        3 * self.b.len()
    }
    /// Magnitude of the frequency response at `freq_hz`.
    pub fn gain_at(&self, freq_hz: f64, sample_rate_hz: f64) -> f64 {
        let w = 2.0 * PI * freq_hz / sample_rate_hz;
        let eval = |coeffs: &[f64]| {
            coeffs
                .iter()
                .enumerate()
                .fold(Complex64::new(0.0, 0.0), |acc, (k, c)| {
                    acc + Complex64::from_polar(*c, -w * k as f64)
                })
        };
        (eval(&self.b) / eval(&self.a)).norm()
    }
    /// Direct-form II transposed pass over `x` starting from state `zi`.
    pub fn lfilter(&self, x: &[f64], mut zi: Vec<f64>) -> Vec<f64> {
        let order = self.b.len() - 1;
        zi.resize(order, 0.0);
        let mut out = Vec::with_capacity(x.len());
        for &xi in x {
            let yi = self.b[0] * xi + zi.first().copied().unwrap_or(0.0);
            for k in 0..order {
                let carry = if k + 1 < order { zi[k + 1] } else { 0.0 };
                zi[k] = self.b[k + 1] * xi + carry - self.a[k + 1] * yi;
            }
            out.push(yi);
        }
        out
    }
    /// Initial state giving the step-response steady state for a unit input.
    pub fn lfilter_zi(&self) -> Result<Vec<f64>, AcqError> {
        let order = self.b.len() - 1;
        if order == 0 {
            return Ok(Vec::new());
        }
        // (I - A^T) zi = b[1..] - a[1..] * b[0], A being the companion matrix of a
        let mut m = vec![vec![0.0; order]; order];
        for (i, row) in m.iter_mut().enumerate() {
            row[i] = 1.0;
            row[0] += self.a[i + 1];
            if i + 1 < order {
                row[i + 1] -= 1.0;
            }
        }
        let rhs: Vec<f64> = (1..=order)
            .map(|k| self.b[k] - self.a[k] * self.b[0])
            .collect();
        solve(m, rhs)
    }
    /// Forward-backward application with odd end extension.
    pub fn filtfilt(&self, x: &[f64]) -> Result<Vec<f64>, AcqError> {
        let padlen = self.padlen();
        if x.len() <= padlen {
            return Err(AcqError::SignalTooShort {
                len: x.len(),
                needed: padlen + 1,
            });
        }
        let zi = self.lfilter_zi()?;
        let ext = odd_extend(x, padlen);
        let scaled = |z: &[f64], by: f64| z.iter().map(|v| v * by).collect::<Vec<_>>();
        let mut y = self.lfilter(&ext, scaled(&zi, ext[0]));
        y.reverse();
        let mut y = self.lfilter(&y, scaled(&zi, y[0]));
        y.reverse();
        Ok(y[padlen..padlen + x.len()].to_vec())
    }
}
fn odd_extend(x: &[f64], padlen: usize) -> Vec<f64> {
    let n = x.len();
    let first = x[0];
    let last = x[n - 1];
    let mut ext = Vec::with_capacity(n + 2 * padlen);
    ext.extend((1..=padlen).rev().map(|i| 2.0 * first - x[i]));
    ext.extend_from_slice(x);
    ext.extend((1..=padlen).map(|i| 2.0 * last - x[n - 1 - i]));
    ext
}
/// Gaussian elimination with partial pivoting.
fn solve(mut m: Vec<Vec<f64>>, mut rhs: Vec<f64>) -> Result<Vec<f64>, AcqError> {
    let n = rhs.len();
    for col in 0..n {
        let pivot = (col..n)
            .max_by(|&i, &j| m[i][col].abs().total_cmp(&m[j][col].abs()))
            .unwrap_or(col);
        if m[pivot][col].abs() < 1e-12 {
            return Err(AcqError::InvalidFilter(
                "filter has no steady state (pole at z = 1)".into(),
            ));
        }
        m.swap(col, pivot);
        rhs.swap(col, pivot);
        for row in col + 1..n {
            let factor = m[row][col] / m[col][col];
            if factor == 0.0 {
                continue;
            }
            for k in col..n {
                m[row][k] -= factor * m[col][k];
            }
            rhs[row] -= factor * rhs[col];
        }
    }
    let mut out = vec![0.0; n];
    for row in (0..n).rev() {
        let tail: f64 = (row + 1..n).map(|k| m[row][k] * out[k]).sum();
        out[row] = (rhs[row] - tail) / m[row][row];
    }
    Ok(out)
}
/// Ordered cascade of sections, applied zero-phase.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FilterChain {
    sections: Vec<FilterSection>,
}
impl FilterChain {
    pub fn empty() -> Self {
        Self { sections: vec![] }
    }
    pub fn from_sections(sections: Vec<FilterSection>) -> Self {
        Self { sections }
    }
    /// Design every kind against `sample_rate_hz`; any invalid kind rejects the whole chain.
    pub fn from_kinds(sample_rate_hz: f64, kinds: &[FilterKind]) -> Result<Self, AcqError> {
        let sections = kinds
            .iter()
            .map(|kind| design(sample_rate_hz, *kind))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { sections })
    }
    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }
    pub fn len(&self) -> usize {
        self.sections.len()
    }
    pub fn sections(&self) -> &[FilterSection] {
        &self.sections
    }
    pub fn apply(&self, data: &[f64]) -> Result<Vec<f64>, AcqError> {
        let mut out = data.to_vec();
        for section in &self.sections {
            out = section.filtfilt(&out)?;
        }
        Ok(out)
    }
}
pub fn design(sample_rate_hz: f64, kind: FilterKind) -> Result<FilterSection, AcqError> {
    match kind {
        FilterKind::Notch { freq_hz, q } => notch(freq_hz, q, sample_rate_hz),
        FilterKind::Bandpass {
            low_hz,
            high_hz,
            order,
        } => butter_bandpass(order, low_hz, high_hz, sample_rate_hz),
    }
}
fn check_rate(sample_rate_hz: f64) -> Result<f64, AcqError> {
    if !(sample_rate_hz > 0.0) || !sample_rate_hz.is_finite() {
        return Err(AcqError::InvalidSampleRate);
    }
    Ok(sample_rate_hz / 2.0)
}
/// Second-order notch at `freq_hz` with quality factor `q`.
pub fn notch(freq_hz: f64, q: f64, sample_rate_hz: f64) -> Result<FilterSection, AcqError> {
    let nyquist = check_rate(sample_rate_hz)?;
    if !(freq_hz > 0.0 && freq_hz < nyquist) {
        return Err(AcqError::InvalidFilter(format!(
            "notch at {freq_hz} Hz must lie in (0, {nyquist}) Hz"
        )));
    }
    if !(q > 0.0) {
        return Err(AcqError::InvalidFilter(format!("notch Q must be positive, got {q}")));
    }
    let w0 = 2.0 * PI * freq_hz / sample_rate_hz;
    let beta = (w0 / q / 2.0).tan();
    let gain = 1.0 / (1.0 + beta);
    let cos_w0 = w0.cos();
    FilterSection::new(
        vec![gain, -2.0 * gain * cos_w0, gain],
        vec![1.0, -2.0 * gain * cos_w0, 2.0 * gain - 1.0],
    )
}
/// Digital Butterworth band-pass of `order`, edges at -3 dB.
pub fn butter_bandpass(
    order: usize,
    low_hz: f64,
    high_hz: f64,
    sample_rate_hz: f64,
) -> Result<FilterSection, AcqError> {
    let nyquist = check_rate(sample_rate_hz)?;
    if order == 0 || order > MAX_BANDPASS_ORDER {
        return Err(AcqError::InvalidFilter(format!(
            "band-pass order must be 1..={MAX_BANDPASS_ORDER}, got {order}"
        )));
    }
    if !(low_hz > 0.0 && low_hz < high_hz && high_hz < nyquist) {
        return Err(AcqError::InvalidFilter(format!(
            "band-pass edges must satisfy 0 < low < high < {nyquist} Hz, got {low_hz}..{high_hz}"
        )));
    }
    // Pre-warp the edges for a bilinear transform at a normalized rate of 2.
    let fs = 2.0;
    let warp = |f: f64| 2.0 * fs * (PI * (f / nyquist) / fs).tan();
    let (low, high) = (warp(low_hz), warp(high_hz));
    let bw = high - low;
    let wo = (low * high).sqrt();
    let n = order as f64;
    // Analog low-pass prototype, moved to band-pass.
    let mut poles = Vec::with_capacity(2 * order);
    for k in 0..order {
        let m = -n + 1.0 + 2.0 * k as f64;
        let p = -Complex64::from_polar(1.0, PI * m / (2.0 * n)) * (bw / 2.0);
        let root = (p * p - wo * wo).sqrt();
        poles.push(p + root);
        poles.push(p - root);
    }
    let analog_gain = bw.powi(order as i32);
    // Bilinear transform: `order` zeros at s = 0 map to z = 1, the ones at infinity to z = -1.
    let fs2 = Complex64::new(2.0 * fs, 0.0);
    let z_poles: Vec<Complex64> = poles.iter().map(|p| (fs2 + p) / (fs2 - p)).collect();
    let mut z_zeros = vec![Complex64::new(1.0, 0.0); order];
    z_zeros.extend(std::iter::repeat(Complex64::new(-1.0, 0.0)).take(order));
    let denom: Complex64 = poles.iter().map(|p| fs2 - p).product();
    let gain = analog_gain * (fs2.powi(order as i32) / denom).re;
    let b = poly(&z_zeros).into_iter().map(|c| gain * c.re).collect();
    let a = poly(&z_poles).into_iter().map(|c| c.re).collect();
    FilterSection::new(b, a)
}
/// Monic polynomial coefficients, highest power first.
fn poly(roots: &[Complex64]) -> Vec<Complex64> {
    let mut coeffs = vec![Complex64::new(1.0, 0.0)];
    for root in roots {
        let mut next = coeffs.clone();
        next.push(Complex64::new(0.0, 0.0));
        for k in 1..next.len() {
            next[k] -= root * coeffs[k - 1];
        }
        coeffs = next;
    }
    coeffs
}
