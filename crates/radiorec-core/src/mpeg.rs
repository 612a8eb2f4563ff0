//! MPEG audio frame header decoding.
//!
//! Only what the synchronizer needs: enough of the 4-byte header to know how
//! long the frame is. Lengths are trusted as decoded.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    Mpeg1,
    Mpeg2,
    Mpeg25,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layer {
    I,
    II,
    III,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub version: Version,
    pub layer: Layer,
    pub protected: bool,
    /// kbit/s
    pub bitrate: u32,
    pub sample_rate: u32,
    pub padding: bool,
}

const BITRATES_V1_L1: [u32; 16] = [0, 32, 64, 96, 128, 160, 192, 224, 256, 288, 320, 352, 384, 416, 448, 0];
const BITRATES_V1_L2: [u32; 16] = [0, 32, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320, 384, 0];
const BITRATES_V1_L3: [u32; 16] = [0, 32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320, 0];
const BITRATES_V2_L1: [u32; 16] = [0, 32, 48, 56, 64, 80, 96, 112, 128, 144, 160, 176, 192, 224, 256, 0];
const BITRATES_V2_L23: [u32; 16] = [0, 8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160, 0];

impl FrameHeader {
    /// Decode a header. `None` for a missing sync, reserved version/layer,
    /// free-format or bad bitrate, or reserved sample rate.
    pub fn parse(h: [u8; 4]) -> Option<Self> {
        if h[0] != 0xFF || h[1] & 0xE0 != 0xE0 {
            return None;
        }
        let version = match (h[1] >> 3) & 0b11 {
            0b00 => Version::Mpeg25,
            0b10 => Version::Mpeg2,
            0b11 => Version::Mpeg1,
            _ => return None,
        };
        let layer = match (h[1] >> 1) & 0b11 {
            0b01 => Layer::III,
            0b10 => Layer::II,
            0b11 => Layer::I,
            _ => return None,
        };
        let protected = h[1] & 0x01 == 0;

        let bitrate_idx = (h[2] >> 4) as usize;
        let table = match (version, layer) {
            (Version::Mpeg1, Layer::I) => &BITRATES_V1_L1,
            (Version::Mpeg1, Layer::II) => &BITRATES_V1_L2,
            (Version::Mpeg1, Layer::III) => &BITRATES_V1_L3,
            (_, Layer::I) => &BITRATES_V2_L1,
            (_, _) => &BITRATES_V2_L23,
        };
        let bitrate = table[bitrate_idx];
        if bitrate == 0 {
            return None;
        }

        let base_rate = match (h[2] >> 2) & 0b11 {
            0 => 44_100,
            1 => 48_000,
            2 => 32_000,
            _ => return None,
        };
        let sample_rate = match version {
            Version::Mpeg1 => base_rate,
            Version::Mpeg2 => base_rate / 2,
            Version::Mpeg25 => base_rate / 4,
        };

        Some(Self {
            version,
            layer,
            protected,
            bitrate,
            sample_rate,
            padding: h[2] & 0x02 != 0,
        })
    }

    /// Total frame length in bytes, header included.
    pub fn frame_length(&self) -> usize {
        let br = self.bitrate as usize * 1000;
        let sr = self.sample_rate as usize;
        let pad = self.padding as usize;
        match (self.layer, self.version) {
            (Layer::I, _) => (12 * br / sr + pad) * 4,
            (Layer::III, Version::Mpeg2 | Version::Mpeg25) => 72 * br / sr + pad,
            _ => 144 * br / sr + pad,
        }
    }
}

/// Frame length for a raw header, if it decodes.
pub fn frame_length(h: [u8; 4]) -> Option<usize> {
    FrameHeader::parse(h).map(|fh| fh.frame_length())
}
