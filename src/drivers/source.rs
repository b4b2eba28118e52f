use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use log::{info, warn};
use crate::drivers::{AcqError, EncodingMode};
/// Anything that can yield raw device byte chunks on demand.
pub trait ChunkSource {
    fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, AcqError>;
}
/// In-memory source useful for tests and deterministic playback.
pub struct ManualSource {
    queue: VecDeque<Vec<u8>>,
}
impl ManualSource {
    pub fn new(chunks: impl IntoIterator<Item = Vec<u8>>) -> Self {
        Self {
            queue: chunks.into_iter().collect(),
        }
    }
}
impl ChunkSource for ManualSource {
    fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, AcqError> {
        Ok(self.queue.pop_front())
    }
}
/// Flat binary file of raw device bytes, in the same layout as the live stream.
pub struct OfflineRecording {
    path: PathBuf,
    reader: BufReader<File>,
    mode: EncodingMode,
    frame_bytes: usize,
    len_bytes: u64,
    chunk_bytes: usize,
    position: u64,
}
impl OfflineRecording {
    /// Chunks handed out by [`ChunkSource::next_chunk`] hold `chunk_frames` frames.
    pub fn open(
        path: impl AsRef<Path>,
        mode: EncodingMode,
        channel_count: usize,
        chunk_frames: usize,
    ) -> Result<Self, AcqError> {
        mode.check_channel_count(channel_count)?;
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let len_bytes = file.metadata()?.len();
        let frame_bytes = mode.frame_bytes(channel_count);
        if len_bytes % frame_bytes as u64 != 0 {
            warn!(
                "{}: {} trailing bytes do not form a whole frame and will be skipped",
                path.display(),
                len_bytes % frame_bytes as u64
            );
        }
        info!(
            "opened {} ({} bytes, {} mode)",
            path.display(),
            len_bytes,
            mode
        );
        Ok(Self {
            path,
            reader: BufReader::new(file),
            mode,
            frame_bytes,
            len_bytes,
            chunk_bytes: frame_bytes * chunk_frames.max(1),
            position: 0,
        })
    }
    pub fn path(&self) -> &Path {
        &self.path
    }
    pub fn mode(&self) -> EncodingMode {
        self.mode
    }
    pub fn len_bytes(&self) -> u64 {
        self.len_bytes
    }
    /// Decodable groups in the file (`size / group bytes`).
    pub fn group_count(&self) -> u64 {
        self.len_bytes / self.mode.group_bytes() as u64
    }
    pub fn samples_per_channel(&self) -> u64 {
        self.len_bytes / self.frame_bytes as u64
    }
    pub fn duration_seconds(&self, sample_rate_hz: f64) -> f64 {
        self.samples_per_channel() as f64 / sample_rate_hz
    }
    /// Frame index the next chunk starts at.
    pub fn current_frame(&self) -> u64 {
        self.position / self.frame_bytes as u64
    }
    pub fn seek_frame(&mut self, frame: u64) -> Result<(), AcqError> {
        let frame = frame.min(self.samples_per_channel());
        self.position = frame * self.frame_bytes as u64;
        self.reader.seek(SeekFrom::Start(self.position))?;
        Ok(())
    }
}
impl ChunkSource for OfflineRecording {
    fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, AcqError> {
        let aligned_end = self.samples_per_channel() * self.frame_bytes as u64;
        let remaining = aligned_end.saturating_sub(self.position);
        if remaining == 0 {
            return Ok(None);
        }
        let want = remaining.min(self.chunk_bytes as u64) as usize;
        let mut chunk = vec![0u8; want];
        self.reader.read_exact(&mut chunk)?;
        self.position += want as u64;
        Ok(Some(chunk))
    }
}
