//! Sequential open, track, inpaint, write loop over the video stream.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use opencv::{
    core,
    prelude::*,
    videoio::{self, VideoCapture, VideoWriter},
};
use tracing::{debug, info};

use crate::render::{self, RenderOptions};
use crate::spots::SpotFile;
use crate::tracking::{self, TrackConfig};

const PROGRESS_INTERVAL: u64 = 100;
// Some containers report a non-positive FPS; fall back rather than fail.
const FALLBACK_FPS: f64 = 25.0;

pub struct RunOptions {
    pub video: PathBuf,
    pub output: Option<PathBuf>,
    pub track: TrackConfig,
    pub render: RenderOptions,
}

pub fn run(spot_file: &SpotFile, opts: &RunOptions) -> Result<()> {
    let video_path = opts
        .video
        .to_str()
        .context("Input video path is not valid UTF-8")?;
    let mut cap = VideoCapture::from_file(video_path, videoio::CAP_ANY)
        .with_context(|| format!("Failed to open input video {}", video_path))?;
    if !cap.is_opened()? {
        bail!("Cannot open input video {}", video_path);
    }

    let width = cap.get(videoio::CAP_PROP_FRAME_WIDTH)? as i32;
    let height = cap.get(videoio::CAP_PROP_FRAME_HEIGHT)? as i32;
    if width != spot_file.frame_width || height != spot_file.frame_height {
        bail!(
            "Video resolution {}x{} does not match spot file metadata {}x{}",
            width,
            height,
            spot_file.frame_width,
            spot_file.frame_height
        );
    }
    debug!(
        "Spots were marked on {} at frame {}",
        spot_file.video_path, spot_file.frame_index
    );

    cap.set(videoio::CAP_PROP_POS_FRAMES, spot_file.frame_index as f64)?;
    let mut reference = Mat::default();
    if !cap.read(&mut reference)? || reference.empty() {
        bail!(
            "Cannot read reference frame at index {}",
            spot_file.frame_index
        );
    }

    let mut tracks = tracking::build_templates(&reference, &spot_file.spots, width, height)?;
    if tracks.is_empty() {
        info!("No valid spot templates built, nothing to do");
        return Ok(());
    }
    info!("Tracking {} spots", tracks.len());

    // Rewind: the whole clip gets processed, including frames before the
    // reference.
    cap.set(videoio::CAP_PROP_POS_FRAMES, 0.0)?;

    let fps = cap.get(videoio::CAP_PROP_FPS)?;
    let fps = if fps > 0.0 { fps } else { FALLBACK_FPS };

    let output = opts
        .output
        .clone()
        .unwrap_or_else(|| default_output_path(&opts.video));
    let output_path = output
        .to_str()
        .context("Output video path is not valid UTF-8")?;
    let fourcc = VideoWriter::fourcc('m', 'p', '4', 'v')?;
    let mut writer = VideoWriter::new(
        output_path,
        fourcc,
        fps,
        core::Size::new(width, height),
        true,
    )?;
    if !writer.is_opened()? {
        bail!("Failed to open video writer for {}", output_path);
    }

    let mut frame = Mat::default();
    let mut frames_written: u64 = 0;
    loop {
        // A failed read is the normal end of the stream.
        if !cap.read(&mut frame)? || frame.empty() {
            break;
        }

        let edges = tracking::edge_frame(&frame)?;
        for track in tracks.iter_mut() {
            tracking::update(track, &edges, width, height, &opts.track)?;
        }

        let alive = tracks.iter().filter(|t| t.alive).count();
        if alive > 0 {
            let mask = render::stamp_mask(&tracks, width, height)?;
            let out = render::fill_spots(&frame, &mask, &tracks, &opts.render)?;
            writer.write(&out)?;
        } else {
            // Nothing left to fill: pass the frame through untouched.
            writer.write(&frame)?;
        }

        frames_written += 1;
        if frames_written % PROGRESS_INTERVAL == 0 {
            info!(
                "Processed {} frames (alive spots: {})",
                frames_written, alive
            );
        }
    }

    info!("Done, wrote {} cleaned frames to {}", frames_written, output_path);
    writer.release()?;
    cap.release()?;
    Ok(())
}

fn default_output_path(video: &Path) -> PathBuf {
    let stem = video
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    video.with_file_name(format!("{}_clean.mp4", stem))
}
