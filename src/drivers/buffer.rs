use log::debug;
use crate::drivers::{AcqError, FilterChain};
/// Snapshot of every channel window, ready to hand to a plot.
#[derive(Clone, Debug, PartialEq)]
pub struct ChannelFrame {
    pub sample_rate_hz: f64,
    pub samples: Vec<Vec<f64>>, // channels x samples
    /// RMS of the most recent batch per channel, not of the whole window.
    pub batch_rms: Vec<f64>,
    /// Samples appended per channel since the last clear or resize.
    pub ptr: u64,
}
impl ChannelFrame {
    pub fn duration_seconds(&self) -> f64 {
        self.samples
            .first()
            .map(|c| c.len() as f64 / self.sample_rate_hz)
            .unwrap_or(0.0)
    }
    pub fn samples_per_channel(&self) -> usize {
        self.samples.first().map(Vec::len).unwrap_or(0)
    }
}
/// Fixed-capacity ring of samples. `head` indexes the oldest element.
#[derive(Clone, Debug)]
pub struct SampleRing {
    slots: Box<[f64]>,
    head: usize,
    len: usize,
}
impl SampleRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![0.0; capacity].into_boxed_slice(),
            head: 0,
            len: 0,
        }
    }
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
    pub fn len(&self) -> usize {
        self.len
    }
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
    pub fn push(&mut self, value: f64) {
        let capacity = self.capacity();
        if capacity == 0 {
            return;
        }
        if self.len == capacity {
            self.slots[self.head] = value;
            self.head = (self.head + 1) % capacity;
        } else {
            self.slots[(self.head + self.len) % capacity] = value;
            self.len += 1;
        }
    }
    pub fn extend_from_slice(&mut self, values: &[f64]) {
        // Anything older than the last `capacity` values would be evicted anyway.
        let skip = values.len().saturating_sub(self.capacity());
        for &value in &values[skip..] {
            self.push(value);
        }
    }
    /// Oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = f64> + '_ {
        let capacity = self.capacity();
        (0..self.len).map(move |i| self.slots[(self.head + i) % capacity])
    }
    pub fn to_vec(&self) -> Vec<f64> {
        self.iter().collect()
    }
    /// Fresh ring of `capacity` holding the newest `min(len, capacity)` samples.
    pub fn resized(&self, capacity: usize) -> SampleRing {
        let mut ring = SampleRing::new(capacity);
        let keep = self.len.min(capacity);
        for value in self.iter().skip(self.len - keep) {
            ring.push(value);
        }
        ring
    }
    pub fn clear(&mut self) {
        self.head = 0;
        self.len = 0;
    }
}
/// Samples held by a `sample_rate_hz` x `time_range_s` window.
pub fn window_capacity(sample_rate_hz: f64, time_range_s: f64) -> Result<usize, AcqError> {
    if !(sample_rate_hz > 0.0) {
        return Err(AcqError::InvalidSampleRate);
    }
    if !(time_range_s > 0.0) {
        return Err(AcqError::InvalidTimeRange);
    }
    let capacity = (sample_rate_hz * time_range_s).floor() as usize;
    if capacity == 0 {
        return Err(AcqError::EmptyWindow {
            sample_rate_hz,
            time_range_s,
        });
    }
    Ok(capacity)
}
/// Rolling per-channel history fed by decoded, interleaved batches.
pub struct ChannelBufferSet {
    channels: Vec<SampleRing>,
    sample_rate_hz: f64,
    time_range_s: f64,
    capacity: usize,
    ptr: u64,
    filters: FilterChain,
    batch_rms: Vec<f64>,
}
impl ChannelBufferSet {
    pub fn new(
        channel_count: usize,
        sample_rate_hz: f64,
        time_range_s: f64,
    ) -> Result<Self, AcqError> {
        if channel_count == 0 {
            return Err(AcqError::InvalidChannelCount);
        }
        let capacity = window_capacity(sample_rate_hz, time_range_s)?;
        Ok(Self {
            channels: (0..channel_count).map(|_| SampleRing::new(capacity)).collect(),
            sample_rate_hz,
            time_range_s,
            capacity,
            ptr: 0,
            filters: FilterChain::empty(),
            batch_rms: vec![0.0; channel_count],
        })
    }
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
    pub fn capacity(&self) -> usize {
        self.capacity
    }
    pub fn sample_rate_hz(&self) -> f64 {
        self.sample_rate_hz
    }
    pub fn time_range_s(&self) -> f64 {
        self.time_range_s
    }
    pub fn ptr(&self) -> u64 {
        self.ptr
    }
    /// True once more samples have arrived than the window can hold.
    pub fn has_wrapped(&self) -> bool {
        self.ptr > self.capacity as u64
    }
    pub fn len(&self) -> usize {
        self.channels.first().map(SampleRing::len).unwrap_or(0)
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
    pub fn batch_rms(&self) -> &[f64] {
        &self.batch_rms
    }
    pub fn filters(&self) -> &FilterChain {
        &self.filters
    }
    /// Append an interleaved batch `[c0, c1, .., c0, c1, ..]`.
    pub fn update_data(&mut self, batch: &[f64]) -> Result<(), AcqError> {
        let n = self.channels.len();
        if batch.len() % n != 0 {
            return Err(AcqError::ChannelMismatch {
                channels: n,
                len: batch.len(),
            });
        }
        let per_channel = batch.len() / n;
        if per_channel == 0 {
            return Ok(());
        }
        let mut column = Vec::with_capacity(per_channel);
        for (offset, ring) in self.channels.iter_mut().enumerate() {
            column.clear();
            column.extend(batch.iter().skip(offset).step_by(n).copied());
            ring.extend_from_slice(&column);
            let sum_sq: f64 = column.iter().map(|v| v * v).sum();
            self.batch_rms[offset] = (sum_sq / per_channel as f64).sqrt();
        }
        self.ptr += per_channel as u64;
        Ok(())
    }
    /// Change the window length, keeping the newest samples in order.
    pub fn resize(&mut self, sample_rate_hz: f64, time_range_s: f64) -> Result<(), AcqError> {
        let capacity = window_capacity(sample_rate_hz, time_range_s)?;
        for ring in &mut self.channels {
            *ring = ring.resized(capacity);
        }
        debug!(
            "channel window resized {} -> {} samples",
            self.capacity, capacity
        );
        self.sample_rate_hz = sample_rate_hz;
        self.time_range_s = time_range_s;
        self.capacity = capacity;
        self.ptr = self.len() as u64;
        Ok(())
    }
    pub fn change_filters(&mut self, filters: FilterChain) {
        self.filters = filters;
    }
    /// Per-channel copies, zero-phase filtered when a chain is installed.
    /// The stored samples are never touched by filtering.
    pub fn get_data(&self) -> Vec<Vec<f64>> {
        self.channels
            .iter()
            .map(|ring| {
                let raw = ring.to_vec();
                if self.filters.is_empty() {
                    return raw;
                }
                match self.filters.apply(&raw) {
                    Ok(filtered) => filtered,
                    Err(err) => {
                        debug!("showing raw samples: {err}");
                        raw
                    }
                }
            })
            .collect()
    }
    pub fn frame(&self) -> ChannelFrame {
        ChannelFrame {
            sample_rate_hz: self.sample_rate_hz,
            samples: self.get_data(),
            batch_rms: self.batch_rms.clone(),
            ptr: self.ptr,
        }
    }
    pub fn clear(&mut self) {
        for ring in &mut self.channels {
            ring.clear();
        }
        self.batch_rms.iter_mut().for_each(|v| *v = 0.0);
        self.ptr = 0;
    }
}
#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::FilterKind;
    use rand::{rngs::StdRng, Rng, SeedableRng};
    fn interleave(channels: &[Vec<f64>]) -> Vec<f64> {
        let len = channels[0].len();
        (0..len)
            .flat_map(|i| channels.iter().map(move |c| c[i]))
            .collect()
    }
    #[test]
    fn ring_wraps_fifo() {
        let mut ring = SampleRing::new(3);
        ring.extend_from_slice(&[1.0, 2.0]);
        assert_eq!(ring.to_vec(), vec![1.0, 2.0]);
        ring.extend_from_slice(&[3.0, 4.0, 5.0]);
        assert_eq!(ring.to_vec(), vec![3.0, 4.0, 5.0]);
        ring.push(6.0);
        assert_eq!(ring.to_vec(), vec![4.0, 5.0, 6.0]);
    }
    #[test]
    fn resize_keeps_tail() {
        let mut ring = SampleRing::new(10);
        ring.extend_from_slice(&(1..=8).map(f64::from).collect::<Vec<_>>());
        assert_eq!(ring.resized(3).to_vec(), vec![6.0, 7.0, 8.0]);
        let grown = ring.resized(20);
        assert_eq!(grown.capacity(), 20);
        assert_eq!(grown.to_vec(), (1..=8).map(f64::from).collect::<Vec<_>>());
    }
    #[test]
    fn buffer_set_respects_capacity_under_random_batches() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut set = ChannelBufferSet::new(3, 100.0, 0.5).unwrap();
        let mut history: Vec<Vec<f64>> = vec![Vec::new(); 3];
        let mut next = 0.0;
        for _ in 0..60 {
            let per_channel = rng.gen_range(0..17);
            let mut columns = vec![Vec::new(); 3];
            for _ in 0..per_channel {
                for (ch, col) in columns.iter_mut().enumerate() {
                    col.push(next + ch as f64 * 0.1);
                }
                next += 1.0;
            }
            for (h, c) in history.iter_mut().zip(&columns) {
                h.extend_from_slice(c);
            }
            if per_channel > 0 {
                set.update_data(&interleave(&columns)).unwrap();
            }
            let data = set.get_data();
            for (ch, samples) in data.iter().enumerate() {
                assert!(samples.len() <= set.capacity());
                let start = history[ch].len().saturating_sub(set.capacity());
                assert_eq!(samples, &history[ch][start..]);
            }
        }
        assert!(set.has_wrapped());
    }
    #[test]
    fn resize_preserves_most_recent_samples() {
        let mut set = ChannelBufferSet::new(2, 10.0, 1.0).unwrap();
        let a: Vec<f64> = (0..8).map(f64::from).collect();
        let b: Vec<f64> = (100..108).map(f64::from).collect();
        set.update_data(&interleave(&[a, b])).unwrap();
        set.resize(5.0, 1.0).unwrap();
        assert_eq!(set.capacity(), 5);
        let data = set.get_data();
        assert_eq!(data[0], vec![3.0, 4.0, 5.0, 6.0, 7.0]);
        assert_eq!(data[1], vec![103.0, 104.0, 105.0, 106.0, 107.0]);
        assert_eq!(set.ptr(), 5);
    }
    #[test]
    fn batch_rms_tracks_latest_batch_only() {
        let mut set = ChannelBufferSet::new(2, 10.0, 1.0).unwrap();
        set.update_data(&[10.0, 1.0, 10.0, 1.0]).unwrap();
        set.update_data(&[3.0, 0.0, -4.0, 0.0]).unwrap();
        let rms = set.batch_rms();
        assert!((rms[0] - (12.5f64).sqrt()).abs() < 1e-12);
        assert_eq!(rms[1], 0.0);
    }
    #[test]
    fn mismatched_batch_is_rejected() {
        let mut set = ChannelBufferSet::new(2, 10.0, 1.0).unwrap();
        assert!(matches!(
            set.update_data(&[1.0, 2.0, 3.0]),
            Err(AcqError::ChannelMismatch { channels: 2, len: 3 })
        ));
        assert!(set.is_empty());
    }
    #[test]
    fn clear_resets_pointer() {
        let mut set = ChannelBufferSet::new(1, 4.0, 1.0).unwrap();
        set.update_data(&[1.0; 9]).unwrap();
        assert!(set.has_wrapped());
        set.clear();
        assert_eq!(set.ptr(), 0);
        assert!(set.is_empty());
        assert!(!set.has_wrapped());
    }
    #[test]
    fn empty_window_is_rejected() {
        assert!(matches!(
            ChannelBufferSet::new(2, 0.5, 1.0),
            Err(AcqError::EmptyWindow { .. })
        ));
        assert!(ChannelBufferSet::new(2, -1.0, 1.0).is_err());
        assert_eq!(window_capacity(20_000.0, 0.25).unwrap(), 5000);
    }
    #[test]
    fn filtering_never_mutates_stored_samples() {
        let fs = 1000.0;
        let mut set = ChannelBufferSet::new(1, fs, 1.0).unwrap();
        let signal: Vec<f64> = (0..1000)
            .map(|i| 1.0 + (2.0 * std::f64::consts::PI * 50.0 * i as f64 / fs).sin())
            .collect();
        set.update_data(&signal).unwrap();
        let chain = FilterChain::from_kinds(
            fs,
            &[FilterKind::Notch {
                freq_hz: 50.0,
                q: 30.0,
            }],
        )
        .unwrap();
        set.change_filters(chain);
        let filtered = set.get_data();
        assert_ne!(filtered[0], signal);
        set.change_filters(FilterChain::empty());
        assert_eq!(set.get_data()[0], signal);
    }
    #[test]
    fn short_window_falls_back_to_raw() {
        let mut set = ChannelBufferSet::new(1, 1000.0, 1.0).unwrap();
        set.change_filters(
            FilterChain::from_kinds(
                1000.0,
                &[FilterKind::Bandpass {
                    low_hz: 10.0,
                    high_hz: 100.0,
                    order: 2,
                }],
            )
            .unwrap(),
        );
        set.update_data(&[1.0, 2.0, 3.0]).unwrap();
        assert_eq!(set.get_data()[0], vec![1.0, 2.0, 3.0]);
    }
}
