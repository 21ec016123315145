//! Local clip source using FFmpeg.
//!
//! Decodes any container FFmpeg understands (MP4 clips written by the
//! `encode-ffmpeg` writer in particular) to RGB24 frames in-memory.

use anyhow::{anyhow, Context, Result};
use ffmpeg_next as ffmpeg;

use super::file::FileConfig;
use super::{Grab, GrabError};
use crate::frame::Frame;

pub(crate) struct FfmpegFileSource {
    config: FileConfig,
    input: Option<ffmpeg::format::context::Input>,
    stream_index: usize,
    decoder: ffmpeg::codec::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    native_fps: Option<f64>,
    frame_count: u64,
    draining: bool,
    finished: bool,
}

impl FfmpegFileSource {
    pub(crate) fn new(config: FileConfig) -> Result<Self> {
        ffmpeg::init().context("initialize ffmpeg")?;
        let input = ffmpeg::format::input(&config.path).with_context(|| {
            format!(
                "failed to open file input '{}' with ffmpeg",
                config.path.display()
            )
        })?;
        let input_stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| anyhow!("file has no video track"))?;
        let stream_index = input_stream.index();
        let rate = input_stream.avg_frame_rate();
        let native_fps = (rate.numerator() > 0 && rate.denominator() > 0)
            .then(|| f64::from(rate.numerator()) / f64::from(rate.denominator()));
        let context = ffmpeg::codec::context::Context::from_parameters(input_stream.parameters())
            .context("load video decoder parameters")?;
        let decoder = context
            .decoder()
            .video()
            .context("open ffmpeg video decoder")?;

        let scaler = ffmpeg::software::scaling::context::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            ffmpeg::util::format::pixel::Pixel::RGB24,
            decoder.width(),
            decoder.height(),
            ffmpeg::software::scaling::flag::Flags::BILINEAR,
        )
        .context("create ffmpeg scaler")?;

        Ok(Self {
            config,
            input: Some(input),
            stream_index,
            decoder,
            scaler,
            native_fps,
            frame_count: 0,
            draining: false,
            finished: false,
        })
    }

    pub(crate) fn connect(&mut self) -> Result<()> {
        log::info!(
            "FileSource: opened {} (ffmpeg, {}x{})",
            self.config.path.display(),
            self.decoder.width(),
            self.decoder.height()
        );
        Ok(())
    }

    pub(crate) fn grab(&mut self) -> Result<Grab, GrabError> {
        if self.finished {
            return Ok(Grab::EndOfStream);
        }
        loop {
            if let Some(frame) = self.receive_frame()? {
                self.frame_count += 1;
                return Ok(Grab::Frame(frame));
            }
            if self.draining {
                self.finished = true;
                return Ok(Grab::EndOfStream);
            }

            let input = self
                .input
                .as_mut()
                .ok_or_else(|| GrabError::Fatal("clip file is not open".into()))?;
            let mut packet = ffmpeg::Packet::empty();
            match packet.read(input) {
                Ok(()) => {
                    if packet.stream() != self.stream_index {
                        continue;
                    }
                    self.decoder
                        .send_packet(&packet)
                        .map_err(|e| GrabError::Transient(format!("decode packet: {e}")))?;
                }
                Err(ffmpeg::Error::Eof) => {
                    self.decoder
                        .send_eof()
                        .map_err(|e| GrabError::Fatal(format!("flush decoder: {e}")))?;
                    self.draining = true;
                }
                Err(err) => {
                    return Err(GrabError::Fatal(format!(
                        "{}: {err}",
                        self.config.path.display()
                    )))
                }
            }
        }
    }

    fn receive_frame(&mut self) -> Result<Option<Frame>, GrabError> {
        let mut decoded = ffmpeg::frame::Video::empty();
        if self.decoder.receive_frame(&mut decoded).is_err() {
            return Ok(None);
        }
        let mut rgb_frame = ffmpeg::frame::Video::empty();
        self.scaler
            .run(&decoded, &mut rgb_frame)
            .map_err(|e| GrabError::Transient(format!("scale frame to RGB: {e}")))?;
        let (pixels, width, height) =
            frame_to_pixels(&rgb_frame).map_err(|e| GrabError::Transient(format!("{e:#}")))?;
        Ok(Some(Frame::new(pixels, width, height)))
    }

    pub(crate) fn dimensions(&self) -> (u32, u32) {
        (self.decoder.width(), self.decoder.height())
    }

    pub(crate) fn native_frame_rate(&self) -> f64 {
        self.native_fps.unwrap_or(self.config.fallback_fps)
    }

    pub(crate) fn frames_read(&self) -> u64 {
        self.frame_count
    }

    pub(crate) fn close(&mut self) -> Result<()> {
        if self.input.take().is_some() {
            log::debug!(
                "FileSource: closed {} after {} frames",
                self.config.path.display(),
                self.frame_count
            );
        }
        Ok(())
    }
}

fn frame_to_pixels(frame: &ffmpeg::frame::Video) -> Result<(Vec<u8>, u32, u32)> {
    let width = frame.width();
    let height = frame.height();
    let row_bytes = (width as usize) * 3;
    let stride = frame.stride(0);
    let data = frame.data(0);

    if stride == row_bytes {
        let pixels = data
            .get(..row_bytes * height as usize)
            .context("ffmpeg frame is shorter than its dimensions")?;
        return Ok((pixels.to_vec(), width, height));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let end = start + row_bytes;
        pixels.extend_from_slice(
            data.get(start..end)
                .context("ffmpeg frame row is out of bounds")?,
        );
    }

    Ok((pixels, width, height))
}
