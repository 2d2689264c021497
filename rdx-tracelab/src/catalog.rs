//! Reads a recorded session tree back into typed metadata.
//!
//! The session layout is `{root}/block{idx}-{weight}-{speed}-{hand}-{paths}/`
//! with one `{stamp}-{name}-{side}-speed_{speed}.csv` per trial. Entries that
//! do not follow the layout are skipped.

use crate::common::{distance_squared, Side, Vec3};
use crate::config::BlockConfig;
use crate::error::{Result, TracelabError};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// One trial file found in a block directory.
#[derive(Debug, Clone, PartialEq)]
pub struct TrialEntry {
    pub path: PathBuf,
    pub stamp: String,
    pub name: String,
    pub side: Side,
    pub speed: f64,
}

/// One block directory of a session.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockEntry {
    pub index: usize,
    pub config: BlockConfig,
    pub dir: PathBuf,
    pub trials: Vec<TrialEntry>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionCatalog {
    pub root: PathBuf,
    /// Blocks ordered by index.
    pub blocks: Vec<BlockEntry>,
}

impl SessionCatalog {
    pub fn trial_count(&self) -> usize {
        self.blocks.iter().map(|b| b.trials.len()).sum()
    }
}

/// Parses a block directory name into its index and configuration.
pub fn parse_block_dir(name: &str) -> Option<(usize, BlockConfig)> {
    let rest = name.strip_prefix("block")?;
    let parts: Vec<&str> = rest.split('-').collect();
    let [index, weight, speed, hand, paths] = parts.as_slice() else {
        return None;
    };
    let config = BlockConfig::new(
        speed.parse().ok()?,
        weight.parse().ok()?,
        hand.parse().ok()?,
        paths.parse().ok()?,
    );
    Some((index.parse().ok()?, config))
}

/// Parses a trial file name. The trial name itself may contain dashes.
pub fn parse_trial_file(file_name: &str) -> Option<(String, String, Side, f64)> {
    let stem = file_name.strip_suffix(".csv")?;
    let (stamp, rest) = stem.split_once('-')?;
    let mut tail = rest.rsplitn(3, '-');
    let speed = tail.next()?.strip_prefix("speed_")?.parse().ok()?;
    let side = match tail.next()? {
        "left" => Side::Left,
        "right" => Side::Right,
        _ => return None,
    };
    let name = tail.next()?;
    Some((stamp.to_string(), name.to_string(), side, speed))
}

/// Lists the blocks and trials of a recorded session.
pub fn scan_session(root: &Path) -> Result<SessionCatalog> {
    let mut blocks = Vec::new();
    for entry in read_dir_sorted(root)? {
        let Some((index, config)) = entry
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(parse_block_dir)
        else {
            debug!("skipping {}", entry.display());
            continue;
        };
        if !entry.is_dir() {
            continue;
        }
        let mut trials = Vec::new();
        for file in read_dir_sorted(&entry)? {
            let parsed = file
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(parse_trial_file);
            match parsed {
                Some((stamp, name, side, speed)) => trials.push(TrialEntry {
                    path: file,
                    stamp,
                    name,
                    side,
                    speed,
                }),
                None => debug!("skipping {}", file.display()),
            }
        }
        blocks.push(BlockEntry {
            index,
            config,
            dir: entry,
            trials,
        });
    }
    blocks.sort_by_key(|b| b.index);
    Ok(SessionCatalog {
        root: root.to_path_buf(),
        blocks,
    })
}

fn read_dir_sorted(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| TracelabError::io(dir, e))? {
        paths.push(entry.map_err(|e| TracelabError::io(dir, e))?.path());
    }
    paths.sort();
    Ok(paths)
}

/// A trial CSV loaded for replay.
#[derive(Debug, Clone)]
pub struct RecordedTrial {
    pub path: PathBuf,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<f64>>,
}

impl RecordedTrial {
    pub fn frame_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Elapsed time between the first and last frame, in seconds.
    pub fn duration(&self) -> f64 {
        let Some(elapsed) = self.column("elapsed_time") else {
            return 0.0;
        };
        match (self.rows.first(), self.rows.last()) {
            (Some(first), Some(last)) => last[elapsed] - first[elapsed],
            _ => 0.0,
        }
    }

    fn point(&self, row: &[f64], prefix: &str) -> Option<Vec3> {
        let x = self.column(&format!("{prefix}_x"))?;
        Some([*row.get(x)?, *row.get(x + 1)?, *row.get(x + 2)?])
    }

    /// Mean distance between the target and the tracing finger over all frames.
    pub fn mean_tracking_error(&self) -> Option<f64> {
        if self.rows.is_empty() {
            return None;
        }
        let mut total = 0.0;
        for row in &self.rows {
            let target = self.point(row, "target")?;
            let finger = self.point(row, "finger")?;
            total += distance_squared(target, finger).sqrt();
        }
        Some(total / self.rows.len() as f64)
    }
}

/// Loads a trial CSV, checking that every row has the header's width.
pub fn read_trial(path: &Path) -> Result<RecordedTrial> {
    let text = fs::read_to_string(path).map_err(|e| TracelabError::io(path, e))?;
    let malformed = |reason: String| TracelabError::MalformedRecording {
        path: path.to_path_buf(),
        reason,
    };
    let mut lines = text.lines().filter(|l| !l.trim().is_empty());
    let header = lines.next().ok_or_else(|| malformed("no header".into()))?;
    let columns: Vec<String> = header.split(',').map(|c| c.trim().to_string()).collect();

    let mut rows = Vec::new();
    for (number, line) in lines.enumerate() {
        let row = line
            .split(',')
            .map(|field| field.trim().parse::<f64>())
            .collect::<std::result::Result<Vec<f64>, _>>()
            .map_err(|e| malformed(format!("row {}: {e}", number + 1)))?;
        if row.len() != columns.len() {
            return Err(malformed(format!(
                "row {} has {} fields, header has {}",
                number + 1,
                row.len(),
                columns.len()
            )));
        }
        rows.push(row);
    }
    Ok(RecordedTrial {
        path: path.to_path_buf(),
        columns,
        rows,
    })
}
