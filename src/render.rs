//! Mask composition and spot fill-in for one frame.

use opencv::{core, imgproc, photo, prelude::*};

use crate::tracking::SpotTrack;

/// Inpainting algorithm handed to OpenCV.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InpaintMethod {
    /// Fast-marching fill (Telea).
    Telea,
    /// Navier-Stokes fluid-dynamics fill.
    NavierStokes,
}

impl InpaintMethod {
    fn flag(self) -> i32 {
        match self {
            InpaintMethod::Telea => photo::INPAINT_TELEA,
            InpaintMethod::NavierStokes => photo::INPAINT_NS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RenderOptions {
    pub inpaint_radius: f64,
    pub method: InpaintMethod,
    /// Factor applied to filled pixels; 1.0 leaves the fill untouched.
    pub darken: f32,
    /// Draw red outlines around filled areas for visual QA.
    pub debug: bool,
}

/// Stamps every alive spot as a filled disk into a frame-sized binary mask.
/// Overlapping disks union.
pub fn stamp_mask(tracks: &[SpotTrack], width: i32, height: i32) -> opencv::Result<Mat> {
    let mut mask = Mat::zeros(height, width, core::CV_8UC1)?.to_mat()?;
    for track in tracks.iter().filter(|t| t.alive) {
        imgproc::circle(
            &mut mask,
            track.last,
            track.radius,
            core::Scalar::all(255.0),
            -1, // filled
            imgproc::LINE_8,
            0,
        )?;
    }
    Ok(mask)
}

/// Inpaints the masked areas, then applies the optional darkening and debug
/// overlay. The overlay only touches the returned frame, never the mask or
/// any tracking state.
pub fn fill_spots(
    frame: &Mat,
    mask: &Mat,
    tracks: &[SpotTrack],
    opts: &RenderOptions,
) -> opencv::Result<Mat> {
    let mut out = Mat::default();
    photo::inpaint(frame, mask, &mut out, opts.inpaint_radius, opts.method.flag())?;

    if opts.darken < 1.0 {
        darken_masked(&mut out, mask, opts.darken)?;
    }

    if opts.debug {
        for track in tracks.iter().filter(|t| t.alive) {
            imgproc::circle(
                &mut out,
                track.last,
                track.radius,
                core::Scalar::new(0.0, 0.0, 255.0, 0.0), // red, BGR
                2,
                imgproc::LINE_8,
                0,
            )?;
        }
    }

    Ok(out)
}

fn darken_masked(frame: &mut Mat, mask: &Mat, factor: f32) -> opencv::Result<()> {
    for y in 0..frame.rows() {
        for x in 0..frame.cols() {
            if *mask.at_2d::<u8>(y, x)? == 0 {
                continue;
            }
            let px = frame.at_2d_mut::<core::Vec3b>(y, x)?;
            for c in 0..3 {
                px[c] = (px[c] as f32 * factor).round().clamp(0.0, 255.0) as u8;
            }
        }
    }
    Ok(())
}
