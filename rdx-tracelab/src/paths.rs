//! The library of hand-authored paths a subject traces.
//!
//! A path file holds one point per line as three whitespace-separated numbers.
//! Anything after `#` is a comment; lines that do not yield exactly three
//! numbers are skipped without complaint.

use crate::common::Vec3;
use crate::error::{Result, TracelabError};
use rand::Rng;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

const COMMENT: char = '#';
const EXTENSION: &str = "txt";

/// Parses the points of a path file.
pub fn parse_points(text: &str) -> Vec<Vec3> {
    text.lines().filter_map(parse_line).collect()
}

fn parse_line(line: &str) -> Option<Vec3> {
    let content = line.split(COMMENT).next()?;
    let mut fields = content.split_whitespace().map(str::parse::<f64>);
    let point = [fields.next()?.ok()?, fields.next()?.ok()?, fields.next()?.ok()?];
    match fields.next() {
        None => Some(point),
        Some(_) => None,
    }
}

/// Per-axis scale followed by a translation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PathTransform {
    pub scale: Vec3,
    pub translate: Vec3,
}

impl PathTransform {
    pub const IDENTITY: PathTransform = PathTransform {
        scale: [1.0, 1.0, 1.0],
        translate: [0.0, 0.0, 0.0],
    };

    pub fn apply(&self, point: Vec3) -> Vec3 {
        [
            self.scale[0] * point[0] + self.translate[0],
            self.scale[1] * point[1] + self.translate[1],
            self.scale[2] * point[2] + self.translate[2],
        ]
    }
}

/// Starts the path at a uniformly random point and reverses it half the time.
pub fn randomize_phase<R: Rng + ?Sized>(points: &mut [Vec3], rng: &mut R) {
    if points.is_empty() {
        return;
    }
    let start = rng.random_range(0..points.len());
    points.rotate_left(start);
    if rng.random_bool(0.5) {
        points.reverse();
    }
}

/// A directory of `.txt` path files.
#[derive(Debug, Clone)]
pub struct PathLibrary {
    dir: PathBuf,
}

impl PathLibrary {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Names (without extension) of the paths whose name begins with `prefix`, sorted.
    pub fn names_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let entries = fs::read_dir(&self.dir).map_err(|e| TracelabError::io(&self.dir, e))?;
        let mut names = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| TracelabError::io(&self.dir, e))?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
                if stem.starts_with(prefix) {
                    names.push(stem.to_string());
                }
            }
        }
        names.sort();
        if names.is_empty() {
            return Err(TracelabError::NoPaths {
                prefix: prefix.to_string(),
                dir: self.dir.clone(),
            });
        }
        Ok(names)
    }

    pub fn file_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.{EXTENSION}"))
    }

    /// Reads a path, transforms every point, and randomizes its phase.
    pub fn load<R: Rng + ?Sized>(
        &self,
        name: &str,
        transform: &PathTransform,
        rng: &mut R,
    ) -> Result<Vec<Vec3>> {
        let file = self.file_for(name);
        let text = fs::read_to_string(&file).map_err(|e| TracelabError::io(&file, e))?;
        let mut points: Vec<Vec3> = parse_points(&text)
            .into_iter()
            .map(|p| transform.apply(p))
            .collect();
        if points.is_empty() {
            return Err(TracelabError::EmptyPath(name.to_string()));
        }
        randomize_phase(&mut points, rng);
        debug!("Loaded path '{}' with {} points.", name, points.len());
        Ok(points)
    }
}
