//! spotless: removes marked dirt/sensor spots from a video clip.
//!
//! Spot locations come from a JSON file written by the interactive marking
//! tool. Each spot is tracked across the clip with edge-based template
//! matching and filled with OpenCV inpainting, frame by frame.

mod pipeline;
mod render;
mod spots;
mod tracking;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, ValueEnum};

use pipeline::RunOptions;
use render::{InpaintMethod, RenderOptions};
use tracking::TrackConfig;

/// Remove tracked spots from a video using OpenCV inpainting.
#[derive(Parser, Debug)]
#[command(name = "spotless", version)]
struct Args {
    /// Path to the input video file.
    video: PathBuf,

    /// JSON file with spot definitions from the marking tool.
    spots_json: PathBuf,

    /// Output video file (default: <video>_clean.mp4).
    #[arg(long)]
    output: Option<PathBuf>,

    /// Darken factor for the inpainted area (0.0-1.0, 1.0 = no darken).
    #[arg(long, default_value_t = 1.0)]
    darken: f32,

    /// Maximum search radius in pixels around the last known center when
    /// tracking each spot in a single frame. Larger values follow faster
    /// motion and jitter but increase the risk of false matches. Does not
    /// limit total drift over the whole clip.
    #[arg(long, default_value_t = 6)]
    max_shift: i32,

    /// Minimum normalized correlation (0-1) required to update a spot's
    /// position in a frame. Below it the spot keeps its previous center for
    /// that frame. Lower values track through more noise but risk bad jumps;
    /// higher values are stricter but may freeze the spot.
    #[arg(long, default_value_t = 0.5)]
    match_threshold: f64,

    /// Inpainting radius (OpenCV inpaintRadius).
    #[arg(long, default_value_t = 3.0)]
    inpaint_radius: f64,

    /// Inpainting method.
    #[arg(long, value_enum, default_value_t = InpaintMethodArg::Telea)]
    inpaint_method: InpaintMethodArg,

    /// Kill a spot permanently once its center deviates from the marked
    /// position by more than this many pixels on either axis. Off by
    /// default: spots may drift freely within the per-frame search radius.
    #[arg(long)]
    max_drift: Option<i32>,

    /// Draw red circles around inpainted areas for debugging.
    #[arg(long)]
    debug: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum InpaintMethodArg {
    /// Fast-marching method (Telea).
    Telea,
    /// Navier-Stokes method.
    Ns,
}

impl From<InpaintMethodArg> for InpaintMethod {
    fn from(arg: InpaintMethodArg) -> Self {
        match arg {
            InpaintMethodArg::Telea => InpaintMethod::Telea,
            InpaintMethodArg::Ns => InpaintMethod::NavierStokes,
        }
    }
}

fn run_options(args: Args) -> RunOptions {
    RunOptions {
        video: args.video,
        output: args.output,
        track: TrackConfig {
            max_shift: args.max_shift.max(1),
            match_threshold: args.match_threshold.clamp(0.0, 1.0),
            max_drift: args.max_drift,
        },
        render: RenderOptions {
            inpaint_radius: args.inpaint_radius,
            method: args.inpaint_method.into(),
            darken: args.darken,
            debug: args.debug,
        },
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt().with_target(false).init();
    let args = Args::parse();

    let spot_file = spots::load(&args.spots_json)?;
    let opts = run_options(args);
    pipeline::run(&spot_file, &opts)
}
