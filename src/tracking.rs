//! Per-spot template tracking.
//!
//! Templates are sampled once from the reference frame and matched against a
//! small search region around each spot's last known center in every
//! subsequent frame. Matching runs on a Laplacian edge response rather than
//! raw luminance, so exposure flicker and white-balance drift between frames
//! do not move the spots.

use opencv::{core, imgproc, prelude::*};
use tracing::warn;

use crate::spots::SpotDef;

/// Extra padding around the marked radius when cutting the template.
pub const TEMPLATE_MARGIN: i32 = 4;

#[derive(Debug, Clone)]
pub struct TrackConfig {
    /// Per-frame search radius in pixels around the previous center.
    pub max_shift: i32,
    /// Minimum normalized correlation required to accept a match.
    pub match_threshold: f64,
    /// Optional kill limit on total deviation from the marked center.
    pub max_drift: Option<i32>,
}

/// Mutable tracking state for one marked spot.
pub struct SpotTrack {
    pub radius: i32,
    pub(crate) template: Mat,
    pub(crate) templ_w: i32,
    pub(crate) templ_h: i32,
    pub(crate) origin: core::Point,
    pub last: core::Point,
    pub alive: bool,
}

/// Laplacian edge response of a grayscale image (3x3 kernel, `CV_8U`).
pub fn edge_response(gray: &Mat) -> opencv::Result<Mat> {
    let mut edges = Mat::default();
    imgproc::laplacian(gray, &mut edges, core::CV_8U, 3, 1.0, 0.0, core::BORDER_DEFAULT)?;
    Ok(edges)
}

/// Grayscale + edge response of a BGR frame, as fed to the matcher.
pub fn edge_frame(frame_bgr: &Mat) -> opencv::Result<Mat> {
    let mut gray = Mat::default();
    imgproc::cvt_color(
        frame_bgr,
        &mut gray,
        imgproc::COLOR_BGR2GRAY,
        0,
        core::AlgorithmHint::ALGO_HINT_DEFAULT,
    )?;
    edge_response(&gray)
}

/// Cuts one template per spot from the reference frame.
///
/// Spots whose clipped template region is empty are dropped with a warning
/// and never tracked. The returned tracks start alive, centered where they
/// were marked.
pub fn build_templates(
    reference: &Mat,
    spots: &[SpotDef],
    width: i32,
    height: i32,
) -> opencv::Result<Vec<SpotTrack>> {
    let edges = edge_frame(reference)?;

    let mut tracks = Vec::with_capacity(spots.len());
    for spot in spots {
        let half = spot.radius + TEMPLATE_MARGIN;
        let x1 = (spot.x - half).max(0);
        let y1 = (spot.y - half).max(0);
        let x2 = (spot.x + half).min(width);
        let y2 = (spot.y + half).min(height);

        if x2 <= x1 || y2 <= y1 {
            warn!("Empty template for spot at ({}, {}), skipping", spot.x, spot.y);
            continue;
        }

        let rect = core::Rect::new(x1, y1, x2 - x1, y2 - y1);
        let template = Mat::roi(&edges, rect)?.try_clone()?;

        tracks.push(SpotTrack {
            radius: spot.radius,
            template,
            templ_w: rect.width,
            templ_h: rect.height,
            origin: core::Point::new(spot.x, spot.y),
            last: core::Point::new(spot.x, spot.y),
            alive: true,
        });
    }

    Ok(tracks)
}

/// Relocates one spot in the current frame's edge image.
///
/// Degenerate geometry and weak matches both resolve to a hold: the previous
/// center is kept and the track stays alive. The accepted center is always
/// clamped into frame bounds.
pub fn update(
    track: &mut SpotTrack,
    edges: &Mat,
    width: i32,
    height: i32,
    cfg: &TrackConfig,
) -> opencv::Result<()> {
    if !track.alive {
        return Ok(());
    }

    let half_w = track.templ_w / 2;
    let half_h = track.templ_h / 2;

    // Search region: previous center ± (half template + max_shift), clipped.
    let x1 = (track.last.x - half_w - cfg.max_shift).max(0);
    let y1 = (track.last.y - half_h - cfg.max_shift).max(0);
    let x2 = (track.last.x + half_w + cfg.max_shift).min(width);
    let y2 = (track.last.y + half_h + cfg.max_shift).min(height);

    // Too small to contain the template: hold the previous center.
    if x2 - x1 < track.templ_w || y2 - y1 < track.templ_h {
        return Ok(());
    }

    let roi = Mat::roi(edges, core::Rect::new(x1, y1, x2 - x1, y2 - y1))?;
    let mut scores = Mat::default();
    imgproc::match_template(
        &roi,
        &track.template,
        &mut scores,
        imgproc::TM_CCOEFF_NORMED,
        &core::no_array(),
    )?;

    let mut best = 0f64;
    let mut best_at = core::Point::default();
    core::min_max_loc(
        &scores,
        None,
        Some(&mut best),
        None,
        Some(&mut best_at),
        &core::no_array(),
    )?;

    // Weak evidence: don't move the spot this frame.
    if best < cfg.match_threshold {
        return Ok(());
    }

    let cx = (x1 + best_at.x + half_w).clamp(0, width - 1);
    let cy = (y1 + best_at.y + half_h).clamp(0, height - 1);

    if let Some(limit) = cfg.max_drift {
        let dx = cx - track.origin.x;
        let dy = cy - track.origin.y;
        if dx.abs() > limit || dy.abs() > limit {
            warn!(
                "Killing spot marked at ({}, {}): drifted by ({}, {})",
                track.origin.x, track.origin.y, dx, dy
            );
            track.alive = false;
            return Ok(());
        }
    }

    track.last = core::Point::new(cx, cy);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const W: i32 = 200;
    const H: i32 = 200;

    fn cfg() -> TrackConfig {
        TrackConfig {
            max_shift: 6,
            match_threshold: 0.5,
            max_drift: None,
        }
    }

    fn noise(x: i32, y: i32, seed: u32) -> u8 {
        let mut h =
            (x as u32).wrapping_mul(0x9E37_79B1) ^ (y as u32).wrapping_mul(0x85EB_CA77) ^ seed;
        h ^= h >> 13;
        (h.wrapping_mul(0xC2B2_AE35) >> 24) as u8
    }

    /// Textured BGR frame; `dx` shifts the whole pattern right.
    fn noise_frame(dx: i32, seed: u32) -> Mat {
        let mut frame =
            Mat::new_rows_cols_with_default(H, W, core::CV_8UC3, core::Scalar::all(0.0)).unwrap();
        for y in 0..H {
            for x in 0..W {
                let v = noise(x - dx, y, seed);
                *frame.at_2d_mut::<core::Vec3b>(y, x).unwrap() = core::Vec3b::from([v, v, v]);
            }
        }
        frame
    }

    fn tracks_for(frame: &Mat, spots: &[SpotDef]) -> Vec<SpotTrack> {
        build_templates(frame, spots, W, H).unwrap()
    }

    fn spot(x: i32, y: i32) -> SpotDef {
        SpotDef { x, y, radius: 10 }
    }

    #[test]
    fn edge_response_is_flat_on_flat_input() {
        let gray =
            Mat::new_rows_cols_with_default(32, 32, core::CV_8UC1, core::Scalar::all(127.0))
                .unwrap();
        let edges = edge_response(&gray).unwrap();
        assert_eq!((edges.rows(), edges.cols()), (32, 32));
        assert_eq!(*edges.at_2d::<u8>(16, 16).unwrap(), 0);
    }

    #[test]
    fn template_is_radius_plus_margin_sized() {
        let frame = noise_frame(0, 1);
        let tracks = tracks_for(&frame, &[spot(100, 100)]);
        assert_eq!(tracks.len(), 1);
        assert_eq!((tracks[0].templ_w, tracks[0].templ_h), (28, 28));
        assert!(tracks[0].alive);
    }

    #[test]
    fn template_is_clipped_near_frame_edges() {
        let frame = noise_frame(0, 1);
        let tracks = tracks_for(&frame, &[spot(5, 100)]);
        // Box [-9, 19) clips to [0, 19).
        assert_eq!((tracks[0].templ_w, tracks[0].templ_h), (19, 28));
    }

    #[test]
    fn offscreen_spot_is_discarded() {
        let frame = noise_frame(0, 1);
        let tracks = tracks_for(&frame, &[SpotDef { x: -50, y: -50, radius: 10 }]);
        assert!(tracks.is_empty());
    }

    #[test]
    fn no_motion_keeps_center_at_origin() {
        let frame = noise_frame(0, 1);
        let mut tracks = tracks_for(&frame, &[spot(100, 100)]);
        let edges = edge_frame(&frame).unwrap();
        for _ in 0..5 {
            update(&mut tracks[0], &edges, W, H, &cfg()).unwrap();
        }
        assert_eq!(tracks[0].last, core::Point::new(100, 100));
    }

    #[test]
    fn follows_shift_within_search_radius() {
        let frame = noise_frame(0, 1);
        let mut tracks = tracks_for(&frame, &[spot(100, 100)]);
        let edges = edge_frame(&noise_frame(3, 1)).unwrap();
        update(&mut tracks[0], &edges, W, H, &cfg()).unwrap();
        assert!((tracks[0].last.x - 103).abs() <= 1);
        assert_eq!(tracks[0].last.y, 100);
        assert!(tracks[0].alive);
    }

    #[test]
    fn holds_when_shift_exceeds_search_radius() {
        let frame = noise_frame(0, 1);
        let mut tracks = tracks_for(&frame, &[spot(100, 100)]);
        // True match is 20 px away, outside the ±6 px search region.
        let edges = edge_frame(&noise_frame(20, 1)).unwrap();
        update(&mut tracks[0], &edges, W, H, &cfg()).unwrap();
        assert_eq!(tracks[0].last, core::Point::new(100, 100));
        assert!(tracks[0].alive);
    }

    #[test]
    fn holds_on_weak_match() {
        let frame = noise_frame(0, 1);
        let mut tracks = tracks_for(&frame, &[spot(100, 100)]);
        // Unrelated texture: nothing in the frame resembles the template.
        let edges = edge_frame(&noise_frame(0, 999)).unwrap();
        update(&mut tracks[0], &edges, W, H, &cfg()).unwrap();
        assert_eq!(tracks[0].last, core::Point::new(100, 100));
        assert!(tracks[0].alive);
    }

    #[test]
    fn holds_when_clipped_roi_is_smaller_than_template() {
        let frame = noise_frame(0, 1);
        let mut tracks = tracks_for(&frame, &[spot(100, 100)]);
        // Drifted next to the frame edge: the clipped search region can no
        // longer contain the 28 px template.
        tracks[0].last = core::Point::new(5, 100);
        let edges = edge_frame(&frame).unwrap();
        update(&mut tracks[0], &edges, W, H, &cfg()).unwrap();
        assert_eq!(tracks[0].last, core::Point::new(5, 100));
        assert!(tracks[0].alive);
    }

    #[test]
    fn tracks_are_independent() {
        let frame = noise_frame(0, 1);
        let shifted = edge_frame(&noise_frame(3, 1)).unwrap();

        let mut pair = tracks_for(&frame, &[spot(60, 60), spot(140, 140)]);
        for track in pair.iter_mut() {
            update(track, &shifted, W, H, &cfg()).unwrap();
        }

        let mut alone = tracks_for(&frame, &[spot(60, 60)]);
        update(&mut alone[0], &shifted, W, H, &cfg()).unwrap();

        assert_eq!(pair[0].last, alone[0].last);
        assert_eq!(pair[1].last, core::Point::new(143, 140));
    }

    #[test]
    fn drift_limit_kills_track_when_enabled() {
        let frame = noise_frame(0, 1);
        let mut tracks = tracks_for(&frame, &[spot(100, 100)]);
        let edges = edge_frame(&noise_frame(3, 1)).unwrap();

        let cfg = TrackConfig { max_drift: Some(2), ..cfg() };
        update(&mut tracks[0], &edges, W, H, &cfg).unwrap();
        assert!(!tracks[0].alive);
        assert_eq!(tracks[0].last, core::Point::new(100, 100));

        // A dead track never comes back.
        update(&mut tracks[0], &edges, W, H, &cfg).unwrap();
        assert!(!tracks[0].alive);
    }
}
