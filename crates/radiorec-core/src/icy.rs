//! ICY stream demultiplexer.
//!
//! Shoutcast/Icecast servers interleave a metadata block after every
//! `icy-metaint` audio bytes: one length byte (times 16) followed by that many
//! bytes of `StreamTitle='...';` text. The demuxer strips those blocks and
//! re-frames the remaining audio so only whole MPEG frames reach the output.

use crate::mpeg;

/// First frame sync byte.
pub const SYNC_FIRST: u8 = 0xFF;
/// Second sync byte accepted: MPEG-1 Layer III without CRC.
pub const SYNC_SECOND: u8 = 0xFB;
/// The metadata length byte counts 16-byte units.
pub const META_LENGTH_UNIT: usize = 16;

/// Output of [`IcyDemuxer::feed`].
#[derive(Debug, Clone, PartialEq)]
pub enum Demuxed {
    Frame(Vec<u8>),
    Metadata(String),
}

/// Byte-at-a-time MPEG frame synchronizer.
///
/// Positions 0..4 are the header; anything above is frame body. A mismatch on
/// the second sync byte drops back to position 0 without re-examining the
/// mismatching byte.
#[derive(Debug, Default)]
pub struct FrameSync {
    header: [u8; 4],
    pos: usize,
    frame: Vec<u8>,
    frame_len: usize,
}

impl FrameSync {
    pub fn new() -> Self {
        Self::default()
    }

    /// True while no header byte has been accepted.
    pub fn is_idle(&self) -> bool {
        self.pos == 0
    }

    pub fn push(&mut self, byte: u8) -> Option<Vec<u8>> {
        match self.pos {
            0 => {
                if byte == SYNC_FIRST {
                    self.header[0] = byte;
                    self.pos = 1;
                }
            }
            1 => {
                if byte == SYNC_SECOND {
                    self.header[1] = byte;
                    self.pos = 2;
                } else {
                    self.pos = 0;
                }
            }
            2 => {
                self.header[2] = byte;
                self.pos = 3;
            }
            3 => {
                self.header[3] = byte;
                match mpeg::frame_length(self.header) {
                    Some(len) => {
                        self.frame = Vec::with_capacity(len);
                        self.frame.extend_from_slice(&self.header);
                        self.frame_len = len;
                        self.pos = 4;
                    }
                    None => self.pos = 0,
                }
            }
            _ => {
                self.frame.push(byte);
                self.pos += 1;
                if self.frame.len() == self.frame_len {
                    self.pos = 0;
                    return Some(std::mem::take(&mut self.frame));
                }
            }
        }
        None
    }
}

#[derive(Debug)]
pub struct IcyDemuxer {
    meta_interval: usize,
    audio_count: usize,
    meta_len: usize,
    meta: Vec<u8>,
    sync: FrameSync,
    frames: u64,
    audio_bytes: u64,
    meta_blocks: u64,
}

impl IcyDemuxer {
    pub fn new(meta_interval: usize) -> Self {
        Self {
            meta_interval,
            audio_count: 0,
            meta_len: 0,
            meta: Vec::new(),
            sync: FrameSync::new(),
            frames: 0,
            audio_bytes: 0,
            meta_blocks: 0,
        }
    }

    pub fn meta_interval(&self) -> usize {
        self.meta_interval
    }

    /// Frames emitted so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Bytes of emitted frames so far.
    pub fn audio_bytes(&self) -> u64 {
        self.audio_bytes
    }

    /// Metadata blocks (including empty ones) consumed so far.
    pub fn meta_blocks(&self) -> u64 {
        self.meta_blocks
    }

    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Demuxed> {
        let mut out = Vec::new();
        for &byte in chunk {
            if self.audio_count < self.meta_interval {
                if let Some(frame) = self.sync.push(byte) {
                    self.frames += 1;
                    self.audio_bytes += frame.len() as u64;
                    out.push(Demuxed::Frame(frame));
                }
                self.audio_count += 1;
            } else if self.meta_len == 0 {
                self.meta_len = byte as usize * META_LENGTH_UNIT;
                if self.meta_len == 0 {
                    self.meta_blocks += 1;
                    self.audio_count = 0;
                }
            } else {
                self.meta.push(byte);
                if self.meta.len() == self.meta_len {
                    out.push(Demuxed::Metadata(decode_metadata(&self.meta)));
                    self.meta.clear();
                    self.meta_len = 0;
                    self.meta_blocks += 1;
                    self.audio_count = 0;
                }
            }
        }
        out
    }
}

/// Metadata text with the NUL padding removed.
pub fn decode_metadata(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw)
        .trim_matches(char::from(0))
        .trim()
        .to_string()
}

/// Extract the `StreamTitle` value from a metadata block.
pub fn stream_title(text: &str) -> Option<String> {
    for (open, close) in [("StreamTitle='", "';"), ("StreamTitle=\"", "\";")] {
        if let Some(start) = text.find(open) {
            let rest = &text[start + open.len()..];
            if let Some(end) = rest.find(close) {
                let title = rest[..end].trim();
                return if title.is_empty() {
                    None
                } else {
                    Some(title.to_string())
                };
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 128 kbit/s, 44.1 kHz, no padding: 417 bytes.
    const HEADER: [u8; 4] = [0xFF, 0xFB, 0x90, 0x64];
    const FRAME_LEN: usize = 417;

    fn frame(fill: u8) -> Vec<u8> {
        let mut f = HEADER.to_vec();
        f.resize(FRAME_LEN, fill);
        f
    }

    fn meta_block(text: &str) -> Vec<u8> {
        let units = text.len().div_ceil(META_LENGTH_UNIT);
        let mut block = vec![units as u8];
        block.extend_from_slice(text.as_bytes());
        block.resize(1 + units * META_LENGTH_UNIT, 0);
        block
    }

    /// Interleave `audio` with a metadata block every `interval` bytes.
    fn interleave(audio: &[u8], interval: usize, meta: impl Fn(usize) -> Vec<u8>) -> Vec<u8> {
        let mut out = Vec::new();
        for (i, chunk) in audio.chunks(interval).enumerate() {
            out.extend_from_slice(chunk);
            if chunk.len() == interval {
                out.extend(meta(i));
            }
        }
        out
    }

    fn frames_of(out: &[Demuxed]) -> Vec<Vec<u8>> {
        out.iter()
            .filter_map(|d| match d {
                Demuxed::Frame(f) => Some(f.clone()),
                _ => None,
            })
            .collect()
    }

    fn run(stream: &[u8], interval: usize, chunk: usize) -> (IcyDemuxer, Vec<Demuxed>) {
        let mut demux = IcyDemuxer::new(interval);
        let mut out = Vec::new();
        for c in stream.chunks(chunk) {
            out.extend(demux.feed(c));
        }
        (demux, out)
    }

    #[test]
    fn test_strips_metadata_and_keeps_frames_whole() {
        let audio: Vec<u8> = (0..20).flat_map(|i| frame(i as u8)).collect();
        let stream = interleave(&audio, 1000, |i| {
            if i % 2 == 0 {
                meta_block("StreamTitle='Artist - Song';")
            } else {
                vec![0]
            }
        });

        for chunk in [1, 7, 4096] {
            let (demux, out) = run(&stream, 1000, chunk);
            let frames = frames_of(&out);
            assert_eq!(frames.len(), 20, "chunk size {}", chunk);
            assert!(frames.iter().all(|f| f.len() == FRAME_LEN));
            assert_eq!(frames.concat(), audio);
            assert_eq!(demux.frames(), 20);
        }
    }

    #[test]
    fn test_reports_metadata_text() {
        let audio: Vec<u8> = (0..3).flat_map(|_| frame(0)).collect();
        let stream = interleave(&audio, 500, |_| meta_block("StreamTitle='Night Shift';"));
        let (_, out) = run(&stream, 500, 64);
        let titles: Vec<String> = out
            .iter()
            .filter_map(|d| match d {
                Demuxed::Metadata(m) => stream_title(m),
                _ => None,
            })
            .collect();
        assert_eq!(titles, vec!["Night Shift".to_string(), "Night Shift".to_string()]);
    }

    #[test]
    fn test_zero_length_metadata_consumes_nothing() {
        let audio: Vec<u8> = (0..4).flat_map(|_| frame(0x11)).collect();
        // Every block is empty, so each contributes exactly one byte.
        let stream = interleave(&audio, 100, |_| vec![0]);
        assert_eq!(stream.len(), audio.len() + audio.len() / 100);
        let (demux, out) = run(&stream, 100, 33);
        assert_eq!(frames_of(&out).concat(), audio);
        assert_eq!(demux.meta_blocks(), (audio.len() / 100) as u64);
    }

    #[test]
    fn test_sync_bytes_inside_payload_do_not_split_frames() {
        let mut f = HEADER.to_vec();
        while f.len() < FRAME_LEN {
            f.extend_from_slice(&[0xFF, 0xFB, 0x90, 0x64]);
        }
        f.truncate(FRAME_LEN);
        let audio = [f.clone(), f.clone(), f].concat();
        let (_, out) = run(&audio, 100_000, 50);
        let frames = frames_of(&out);
        assert_eq!(frames.len(), 3);
        assert!(frames.iter().all(|fr| fr.len() == FRAME_LEN));
    }

    #[test]
    fn test_failed_second_byte_restarts_from_zero_state() {
        // The second 0xFF is consumed as the failed second sync byte, so the
        // header it starts is never recognised.
        let mut stream = vec![0xFF];
        stream.extend(frame(0x22));
        stream.extend(frame(0x33));
        let (_, out) = run(&stream, 100_000, 4096);
        let frames = frames_of(&out);
        assert_eq!(frames, vec![frame(0x33)]);
    }

    #[test]
    fn test_garbage_before_first_frame_is_dropped() {
        let mut stream = vec![0x00, 0x12, 0xFF, 0x00, 0x34];
        stream.extend(frame(0x44));
        let (_, out) = run(&stream, 100_000, 3);
        assert_eq!(frames_of(&out), vec![frame(0x44)]);
    }

    #[test]
    fn test_undecodable_header_resyncs() {
        let mut stream = vec![0xFF, 0xFB, 0xF0, 0x00];
        stream.extend(frame(0x55));
        let (_, out) = run(&stream, 100_000, 4096);
        assert_eq!(frames_of(&out), vec![frame(0x55)]);
    }

    #[test]
    fn test_frame_spanning_metadata_is_completed() {
        let audio = [frame(0x01), frame(0x02)].concat();
        // Interval shorter than a frame: every frame straddles a block.
        let stream = interleave(&audio, 300, |_| meta_block("StreamTitle='x';"));
        let (_, out) = run(&stream, 300, 128);
        assert_eq!(frames_of(&out), vec![frame(0x01), frame(0x02)]);
    }

    #[test]
    fn test_hour_long_byte_accounting() {
        // 128 kbit/s for an hour is roughly 57.6 MB; scale the frame count down
        // but keep the shape: many blocks at 8192, a fixed-size block each time.
        let interval = 8192;
        let audio: Vec<u8> = (0..1000).flat_map(|i| frame((i % 200) as u8)).collect();
        let text = "StreamTitle='Hourly News';";
        let block_len = meta_block(text).len();
        let stream = interleave(&audio, interval, |_| meta_block(text));
        let blocks = audio.len() / interval;

        let (demux, out) = run(&stream, interval, 4096);
        let emitted: usize = frames_of(&out).iter().map(|f| f.len()).sum();
        assert_eq!(demux.meta_blocks(), blocks as u64);
        assert_eq!(emitted, stream.len() - blocks * block_len);
        assert_eq!(demux.audio_bytes(), emitted as u64);
    }

    #[test]
    fn test_stream_title_variants() {
        assert_eq!(stream_title("StreamTitle='A - B';StreamUrl='';"), Some("A - B".into()));
        assert_eq!(stream_title("StreamTitle=\"Quoted\";"), Some("Quoted".into()));
        assert_eq!(stream_title("StreamTitle='';"), None);
        assert_eq!(stream_title("nothing here"), None);
        assert_eq!(decode_metadata(b"StreamTitle='x';\0\0\0"), "StreamTitle='x';");
    }
}
