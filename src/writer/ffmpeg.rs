//! H.264/MP4 clip writer using FFmpeg.
//!
//! RGB24 frames are converted to YUV420P and encoded at the configured bitrate.
//! Presentation timestamps come from each frame's capture instant, so a source
//! that delivers slower than the nominal rate still plays back at wall-clock speed.

use anyhow::{anyhow, Context, Result};
use ffmpeg_next as ffmpeg;
use std::path::{Path, PathBuf};
use std::time::Instant;

use super::{ClipWriter, WriterParams};
use crate::frame::Frame;

pub(crate) struct FfmpegClipWriter {
    path: PathBuf,
    output: Option<ffmpeg::format::context::Output>,
    encoder: ffmpeg::encoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    stream_index: usize,
    encoder_time_base: ffmpeg::Rational,
    stream_time_base: ffmpeg::Rational,
    width: u32,
    height: u32,
    fps: i32,
    first_frame_at: Option<Instant>,
    last_pts: Option<i64>,
}

impl FfmpegClipWriter {
    pub(crate) fn create(path: &Path, params: &WriterParams) -> Result<Self> {
        ffmpeg::init().context("initialize ffmpeg")?;
        let mut output = ffmpeg::format::output(&path)
            .with_context(|| format!("create mp4 output {}", path.display()))?;
        let codec = ffmpeg::encoder::find(ffmpeg::codec::Id::H264)
            .ok_or_else(|| anyhow!("ffmpeg build has no H.264 encoder"))?;
        let global_header = output
            .format()
            .flags()
            .contains(ffmpeg::format::Flags::GLOBAL_HEADER);

        let fps = (params.frame_rate.round() as i32).max(1);
        let time_base = ffmpeg::Rational::new(1, fps);

        let mut stream = output.add_stream(codec).context("add video stream")?;
        let stream_index = stream.index();
        let mut encoder = ffmpeg::codec::context::Context::new_with_codec(codec)
            .encoder()
            .video()
            .context("create H.264 encoder")?;
        encoder.set_width(params.width);
        encoder.set_height(params.height);
        encoder.set_format(ffmpeg::format::Pixel::YUV420P);
        encoder.set_time_base(time_base);
        encoder.set_frame_rate(Some(ffmpeg::Rational::new(fps, 1)));
        encoder.set_bit_rate(params.bitrate as usize);
        if global_header {
            encoder.set_flags(ffmpeg::codec::Flags::GLOBAL_HEADER);
        }
        let encoder = encoder.open_as(codec).context("open H.264 encoder")?;
        stream.set_parameters(&encoder);
        stream.set_time_base(time_base);

        output.write_header().context("write mp4 header")?;
        let stream_time_base = output
            .stream(stream_index)
            .map(|s| s.time_base())
            .ok_or_else(|| anyhow!("mp4 stream disappeared after header"))?;

        let scaler = ffmpeg::software::scaling::Context::get(
            ffmpeg::format::Pixel::RGB24,
            params.width,
            params.height,
            ffmpeg::format::Pixel::YUV420P,
            params.width,
            params.height,
            ffmpeg::software::scaling::flag::Flags::BILINEAR,
        )
        .context("create ffmpeg scaler")?;

        Ok(Self {
            path: path.to_path_buf(),
            output: Some(output),
            encoder,
            scaler,
            stream_index,
            encoder_time_base: time_base,
            stream_time_base,
            width: params.width,
            height: params.height,
            fps,
            first_frame_at: None,
            last_pts: None,
        })
    }

    fn next_pts(&mut self, captured_at: Instant) -> i64 {
        let first = *self.first_frame_at.get_or_insert(captured_at);
        let elapsed = captured_at.saturating_duration_since(first).as_secs_f64();
        let pts = (elapsed * f64::from(self.fps)).round() as i64;
        let pts = match self.last_pts {
            Some(last) if pts <= last => last + 1,
            _ => pts,
        };
        self.last_pts = Some(pts);
        pts
    }

    fn drain_packets(&mut self) -> Result<()> {
        let output = self
            .output
            .as_mut()
            .ok_or_else(|| anyhow!("clip writer already closed"))?;
        let mut packet = ffmpeg::Packet::empty();
        while self.encoder.receive_packet(&mut packet).is_ok() {
            packet.set_stream(self.stream_index);
            packet.rescale_ts(self.encoder_time_base, self.stream_time_base);
            packet
                .write_interleaved(output)
                .context("write encoded packet")?;
        }
        Ok(())
    }
}

impl ClipWriter for FfmpegClipWriter {
    fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        if self.output.is_none() {
            anyhow::bail!("clip writer already closed");
        }
        if frame.width != self.width || frame.height != self.height || !frame.is_well_formed() {
            anyhow::bail!(
                "frame is {}x{} ({} bytes), clip expects {}x{} RGB24",
                frame.width,
                frame.height,
                frame.byte_len(),
                self.width,
                self.height
            );
        }

        let mut rgb = ffmpeg::frame::Video::new(ffmpeg::format::Pixel::RGB24, self.width, self.height);
        let row_bytes = self.width as usize * 3;
        let stride = rgb.stride(0);
        let plane = rgb.data_mut(0);
        for (row, src) in frame.pixels().chunks_exact(row_bytes).enumerate() {
            let start = row * stride;
            plane
                .get_mut(start..start + row_bytes)
                .context("ffmpeg frame row is out of bounds")?
                .copy_from_slice(src);
        }

        let mut yuv = ffmpeg::frame::Video::empty();
        self.scaler
            .run(&rgb, &mut yuv)
            .context("convert frame to YUV420P")?;
        yuv.set_pts(Some(self.next_pts(frame.captured_at)));
        self.encoder
            .send_frame(&yuv)
            .context("send frame to H.264 encoder")?;
        self.drain_packets()
    }

    fn close(&mut self) -> Result<()> {
        if self.output.is_none() {
            return Ok(());
        }
        self.encoder.send_eof().context("flush H.264 encoder")?;
        self.drain_packets()?;
        if let Some(mut output) = self.output.take() {
            output
                .write_trailer()
                .with_context(|| format!("finalize mp4 {}", self.path.display()))?;
        }
        log::debug!("FfmpegClipWriter: finalized {}", self.path.display());
        Ok(())
    }
}
