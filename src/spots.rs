//! Spot-definition file produced by the interactive marking tool.

use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

/// One marked blemish: integer pixel center and disk radius.
#[derive(Debug, Clone, Deserialize)]
pub struct SpotDef {
    pub x: i32,
    pub y: i32,
    pub radius: i32,
}

/// On-disk JSON contract with the marking tool.
#[derive(Debug, Deserialize)]
pub struct SpotFile {
    /// Video the spots were marked on (informational).
    pub video_path: String,
    /// Frame the spots were drawn on; templates are sampled here.
    #[serde(default)]
    pub frame_index: i64,
    pub frame_width: i32,
    pub frame_height: i32,
    pub spots: Vec<SpotDef>,
}

pub fn load(path: &Path) -> Result<SpotFile> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read spot file {}", path.display()))?;
    parse(&raw).with_context(|| format!("Invalid spot file {}", path.display()))
}

fn parse(raw: &str) -> Result<SpotFile> {
    let file: SpotFile = serde_json::from_str(raw)?;
    for spot in &file.spots {
        if spot.radius <= 0 {
            bail!(
                "Spot at ({}, {}) has non-positive radius {}",
                spot.x,
                spot.y,
                spot.radius
            );
        }
    }
    Ok(file)
}
