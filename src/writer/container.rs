//! Native `.rclip` clip container.
//!
//! Layout (all integers little-endian):
//!
//! ```text
//! header   "RCLIP\0\0\x01" | width u32 | height u32 | fps f64 | bitrate u64
//! frame*   "FRM0" | offset_us u64 | len u32 | len bytes of RGB24
//! index    offset u64 per frame (file position of each "FRM0")
//! footer   index_pos u64 | frame_count u64 | sha256 [32] | "RCLIPEND"
//! ```
//!
//! The index and footer are written only by `close()`. A file without a valid
//! footer was never finalized and is refused by the reader. The digest covers
//! every frame payload in order and is checked when the reader reaches the end.

use anyhow::{anyhow, bail, Context, Result};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use super::{ClipWriter, WriterParams};
use crate::frame::Frame;

pub const EXTENSION: &str = "rclip";

const HEADER_MAGIC: &[u8; 8] = b"RCLIP\0\0\x01";
const FRAME_MAGIC: &[u8; 4] = b"FRM0";
const FOOTER_MAGIC: &[u8; 8] = b"RCLIPEND";
const HEADER_LEN: u64 = 8 + 4 + 4 + 8 + 8;
const FOOTER_LEN: u64 = 8 + 8 + 32 + 8;
const FRAME_RECORD_HEADER_LEN: u64 = 4 + 8 + 4;

/// Parameters stored in the container header.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ContainerHeader {
    pub width: u32,
    pub height: u32,
    pub frame_rate: f64,
    pub bitrate: u64,
}

// ----------------------------------------------------------------------------
// Writer
// ----------------------------------------------------------------------------

pub struct ContainerWriter {
    path: PathBuf,
    out: Option<BufWriter<File>>,
    header: ContainerHeader,
    position: u64,
    index: Vec<u64>,
    digest: Sha256,
    first_frame_at: Option<Instant>,
}

impl ContainerWriter {
    pub fn create(path: &Path, params: &WriterParams) -> Result<Self> {
        let file = File::create(path)
            .with_context(|| format!("create clip file {}", path.display()))?;
        let header = ContainerHeader {
            width: params.width,
            height: params.height,
            frame_rate: params.frame_rate,
            bitrate: params.bitrate,
        };
        let mut out = BufWriter::new(file);
        out.write_all(HEADER_MAGIC)?;
        out.write_all(&header.width.to_le_bytes())?;
        out.write_all(&header.height.to_le_bytes())?;
        out.write_all(&header.frame_rate.to_le_bytes())?;
        out.write_all(&header.bitrate.to_le_bytes())?;
        Ok(Self {
            path: path.to_path_buf(),
            out: Some(out),
            header,
            position: HEADER_LEN,
            index: Vec::new(),
            digest: Sha256::new(),
            first_frame_at: None,
        })
    }
}

impl ClipWriter for ContainerWriter {
    fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        let out = self
            .out
            .as_mut()
            .ok_or_else(|| anyhow!("clip writer already closed"))?;
        if frame.width != self.header.width || frame.height != self.header.height {
            bail!(
                "frame is {}x{}, clip was opened for {}x{}",
                frame.width,
                frame.height,
                self.header.width,
                self.header.height
            );
        }
        let first = *self.first_frame_at.get_or_insert(frame.captured_at);
        let offset_us = frame
            .captured_at
            .saturating_duration_since(first)
            .as_micros() as u64;
        let payload = frame.pixels();
        let len = u32::try_from(payload.len()).context("frame too large for container")?;

        out.write_all(FRAME_MAGIC)?;
        out.write_all(&offset_us.to_le_bytes())?;
        out.write_all(&len.to_le_bytes())?;
        out.write_all(payload)?;
        self.digest.update(payload);
        self.index.push(self.position);
        self.position += FRAME_RECORD_HEADER_LEN + u64::from(len);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        let Some(mut out) = self.out.take() else {
            return Ok(());
        };
        let index_pos = self.position;
        for offset in &self.index {
            out.write_all(&offset.to_le_bytes())?;
        }
        let digest: [u8; 32] = std::mem::take(&mut self.digest).finalize().into();
        out.write_all(&index_pos.to_le_bytes())?;
        out.write_all(&(self.index.len() as u64).to_le_bytes())?;
        out.write_all(&digest)?;
        out.write_all(FOOTER_MAGIC)?;
        let file = out
            .into_inner()
            .map_err(|e| anyhow!("flush clip {}: {}", self.path.display(), e.error()))?;
        file.sync_all()
            .with_context(|| format!("sync clip {}", self.path.display()))?;
        log::debug!(
            "ContainerWriter: finalized {} ({} frames)",
            self.path.display(),
            self.index.len()
        );
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Reader
// ----------------------------------------------------------------------------

/// Sequential reader over a finalized container.
pub struct ContainerReader {
    input: BufReader<File>,
    header: ContainerHeader,
    index_pos: u64,
    frame_count: u64,
    expected_digest: [u8; 32],
    digest: Sha256,
    position: u64,
    frames_read: u64,
}

/// One decoded record.
pub enum ContainerRecord {
    Frame { offset_us: u64, pixels: Vec<u8> },
    End,
}

impl ContainerReader {
    pub fn open(path: &Path) -> Result<Self> {
        let file =
            File::open(path).with_context(|| format!("open clip file {}", path.display()))?;
        let len = file.metadata()?.len();
        if len < HEADER_LEN + FOOTER_LEN {
            bail!("{} is too short to be a finalized clip", path.display());
        }
        let mut input = BufReader::new(file);

        let mut magic = [0u8; 8];
        input.read_exact(&mut magic)?;
        if &magic != HEADER_MAGIC {
            bail!("{} is not an rclip container", path.display());
        }
        let header = ContainerHeader {
            width: read_u32(&mut input)?,
            height: read_u32(&mut input)?,
            frame_rate: f64::from_le_bytes(read_array(&mut input)?),
            bitrate: read_u64(&mut input)?,
        };

        input.seek(SeekFrom::Start(len - FOOTER_LEN))?;
        let index_pos = read_u64(&mut input)?;
        let frame_count = read_u64(&mut input)?;
        let expected_digest: [u8; 32] = read_array(&mut input)?;
        let footer_magic: [u8; 8] = read_array(&mut input)?;
        if &footer_magic != FOOTER_MAGIC {
            bail!("{} was not finalized (missing trailer)", path.display());
        }
        let index_end = frame_count
            .checked_mul(8)
            .and_then(|index_len| index_pos.checked_add(index_len));
        if index_pos < HEADER_LEN || index_end != Some(len - FOOTER_LEN) {
            bail!("{} has a corrupt trailer", path.display());
        }

        input.seek(SeekFrom::Start(HEADER_LEN))?;
        Ok(Self {
            input,
            header,
            index_pos,
            frame_count,
            expected_digest,
            digest: Sha256::new(),
            position: HEADER_LEN,
            frames_read: 0,
        })
    }

    pub fn header(&self) -> &ContainerHeader {
        &self.header
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn next_record(&mut self) -> Result<ContainerRecord> {
        if self.position >= self.index_pos {
            if self.frames_read != self.frame_count {
                bail!(
                    "clip index lists {} frames, found {}",
                    self.frame_count,
                    self.frames_read
                );
            }
            let digest: [u8; 32] = std::mem::take(&mut self.digest).finalize().into();
            if digest != self.expected_digest {
                bail!("clip payload digest mismatch");
            }
            return Ok(ContainerRecord::End);
        }

        let magic: [u8; 4] = read_array(&mut self.input)?;
        if &magic != FRAME_MAGIC {
            bail!("bad frame record at byte {}", self.position);
        }
        let offset_us = read_u64(&mut self.input)?;
        let len = read_u32(&mut self.input)?;
        let end = self.position + FRAME_RECORD_HEADER_LEN + u64::from(len);
        if end > self.index_pos {
            bail!("frame record at byte {} overruns the index", self.position);
        }
        let mut pixels = vec![0u8; len as usize];
        self.input.read_exact(&mut pixels)?;
        self.digest.update(&pixels);
        self.position = end;
        self.frames_read += 1;
        Ok(ContainerRecord::Frame { offset_us, pixels })
    }
}

fn read_array<const N: usize>(input: &mut impl Read) -> Result<[u8; N]> {
    let mut buf = [0u8; N];
    input.read_exact(&mut buf)?;
    Ok(buf)
}

fn read_u32(input: &mut impl Read) -> Result<u32> {
    Ok(u32::from_le_bytes(read_array(input)?))
}

fn read_u64(input: &mut impl Read) -> Result<u64> {
    Ok(u64::from_le_bytes(read_array(input)?))
}
