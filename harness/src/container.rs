// container.rs - The "AU" container written around the encoded words
//
// Layout (all little-endian u16):
//   magic 0x5541, sample_rate, block_size 1600, channels 1,
//   frame_count, reserved 0, total_words
// followed by an 18-byte fixed trailer and total_words * 2 payload bytes.

use crate::error::{HarnessError, Result};

pub const MAGIC: u16 = 0x5541;
pub const BLOCK_SIZE: u16 = 1600;
pub const CHANNELS: u16 = 1;
pub const TRAILER: [u8; 18] = [
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x10, 0x00, 0xff,
    0xff, 0xff, 0xff,
];
pub const HEADER_LEN: usize = 7 * 2 + TRAILER.len();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerHeader {
    pub sample_rate: u16,
    pub frame_count: u16,
    pub total_words: u16,
}

fn narrow(field: &'static str, value: u64) -> Result<u16> {
    u16::try_from(value).map_err(|_| HarnessError::FieldOverflow { field, value })
}

impl ContainerHeader {
    /// Header for `frame_count` frames of `words_per_frame` words each
    pub fn new(sample_rate: u32, frame_count: u32, words_per_frame: u16) -> Result<Self> {
        Ok(Self {
            sample_rate: narrow("sample_rate", sample_rate as u64)?,
            frame_count: narrow("frame_count", frame_count as u64)?,
            total_words: narrow("total_words", frame_count as u64 * words_per_frame as u64)?,
        })
    }

    pub fn payload_len(&self) -> usize {
        self.total_words as usize * 2
    }

    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let fields = [
            MAGIC,
            self.sample_rate,
            BLOCK_SIZE,
            CHANNELS,
            self.frame_count,
            0,
            self.total_words,
        ];
        let mut out = [0u8; HEADER_LEN];
        for (i, field) in fields.iter().enumerate() {
            out[i * 2..i * 2 + 2].copy_from_slice(&field.to_le_bytes());
        }
        out[14..].copy_from_slice(&TRAILER);
        out
    }

    /// Parse and check the fixed fields of a container
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_LEN {
            return Err(HarnessError::Container(format!(
                "too short: {} bytes",
                data.len()
            )));
        }
        let field = |i: usize| u16::from_le_bytes([data[i * 2], data[i * 2 + 1]]);
        if field(0) != MAGIC || field(2) != BLOCK_SIZE || field(3) != CHANNELS || field(5) != 0 {
            return Err(HarnessError::Container("bad header".to_string()));
        }
        if data[14..HEADER_LEN] != TRAILER {
            return Err(HarnessError::Container("bad trailer".to_string()));
        }
        Ok(Self {
            sample_rate: field(1),
            frame_count: field(4),
            total_words: field(6),
        })
    }
}

/// Header followed by payload; the payload must match the header's word count
pub fn assemble(header: &ContainerHeader, payload: &[u8]) -> Result<Vec<u8>> {
    if payload.len() != header.payload_len() {
        return Err(HarnessError::PayloadMismatch {
            expected: header.total_words as usize,
            actual: payload.len() / 2,
        });
    }
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.extend_from_slice(&header.to_bytes());
    out.extend_from_slice(payload);
    Ok(out)
}
