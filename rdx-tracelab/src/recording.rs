//! Per-frame trial recording and its CSV output.
//!
//! A trial's columns are fixed when its recorder is created, from the marker
//! ids known at that moment. Every row must match that width; markers that
//! vanish later are written as [`MarkerSample::MISSING`] so the file stays
//! rectangular.

use crate::common::{MarkerId, Vec3};
use crate::error::{Result, TracelabError};
use crate::rig::MarkerSample;
use chrono::{DateTime, TimeZone};
use std::collections::BTreeMap;
use std::fmt::Display;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Columns that precede the per-marker quadruples.
pub const BASE_COLUMNS: [&str; 11] = [
    "frame",
    "elapsed_time",
    "target_x",
    "target_y",
    "target_z",
    "finger_x",
    "finger_y",
    "finger_z",
    "head_x",
    "head_y",
    "head_z",
];

/// The header of a trial file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowSchema {
    columns: Vec<String>,
}

impl RowSchema {
    /// Builds the header for the given markers, in the given order.
    pub fn new<I, D>(marker_ids: I) -> Self
    where
        I: IntoIterator<Item = D>,
        D: Display,
    {
        let mut columns: Vec<String> = BASE_COLUMNS.iter().map(|c| c.to_string()).collect();
        for id in marker_ids {
            columns.extend(["x", "y", "z", "c"].iter().map(|axis| format!("{id}_{axis}")));
        }
        Self { columns }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }
}

/// One sampled frame of a trial.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameRow {
    pub frame: usize,
    pub elapsed: f64,
    /// Target, effector and head positions, then x, y, z, c per marker.
    pub values: Vec<f64>,
}

impl FrameRow {
    pub fn new(
        frame: usize,
        elapsed: f64,
        target: Vec3,
        effector: Vec3,
        head: Vec3,
        markers: impl IntoIterator<Item = MarkerSample>,
    ) -> Self {
        let mut values = Vec::with_capacity(9);
        values.extend_from_slice(&target);
        values.extend_from_slice(&effector);
        values.extend_from_slice(&head);
        for marker in markers {
            values.extend_from_slice(&marker.position);
            values.push(marker.confidence);
        }
        Self {
            frame,
            elapsed,
            values,
        }
    }

    pub fn width(&self) -> usize {
        2 + self.values.len()
    }

    fn to_csv_line(&self) -> String {
        let mut fields = Vec::with_capacity(self.width());
        fields.push(self.frame.to_string());
        fields.push(self.elapsed.to_string());
        fields.extend(self.values.iter().map(|v| v.to_string()));
        fields.join(",")
    }
}

/// Accumulates a trial's rows during its run phase.
#[derive(Debug, Clone)]
pub struct TrialRecorder {
    marker_ids: Vec<MarkerId>,
    schema: RowSchema,
    rows: Vec<FrameRow>,
}

impl TrialRecorder {
    pub fn new(marker_ids: Vec<MarkerId>) -> Self {
        let schema = RowSchema::new(&marker_ids);
        Self {
            marker_ids,
            schema,
            rows: Vec::new(),
        }
    }

    pub fn schema(&self) -> &RowSchema {
        &self.schema
    }

    pub fn rows(&self) -> &[FrameRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Appends a row, rejecting it if its width differs from the header's.
    pub fn push(&mut self, row: FrameRow) -> Result<()> {
        if row.width() != self.schema.width() {
            return Err(TracelabError::RowWidth {
                expected: self.schema.width(),
                got: row.width(),
            });
        }
        self.rows.push(row);
        Ok(())
    }

    /// Builds and appends a row from a marker snapshot, in header order.
    pub fn record(
        &mut self,
        frame: usize,
        elapsed: f64,
        target: Vec3,
        effector: Vec3,
        head: Vec3,
        markers: &BTreeMap<MarkerId, MarkerSample>,
    ) -> Result<()> {
        let samples = self
            .marker_ids
            .iter()
            .map(|id| markers.get(id).copied().unwrap_or(MarkerSample::MISSING));
        let row = FrameRow::new(frame, elapsed, target, effector, head, samples);
        self.push(row)
    }

    /// Writes the header and every row as newline-terminated CSV lines.
    pub fn write_csv(&self, path: &Path) -> Result<()> {
        let file = File::create(path).map_err(|e| TracelabError::io(path, e))?;
        let mut out = BufWriter::new(file);
        let write = |out: &mut BufWriter<File>, line: &str| {
            out.write_all(line.as_bytes())
                .and_then(|_| out.write_all(b"\n"))
                .map_err(|e| TracelabError::io(path, e))
        };
        write(&mut out, &self.schema.columns().join(","))?;
        for row in &self.rows {
            write(&mut out, &row.to_csv_line())?;
        }
        out.flush().map_err(|e| TracelabError::io(path, e))
    }
}

/// Second-resolution stamp used in session and trial names.
pub fn timestamp<Tz: TimeZone>(at: &DateTime<Tz>) -> String
where
    Tz::Offset: Display,
{
    at.format("%Y%m%d%H%M%S").to_string()
}

/// Name of a trial's output file.
pub fn trial_file_name(stamp: &str, trial: &str, side: &str, speed: f64) -> String {
    format!("{stamp}-{trial}-{side}-speed_{speed:.3}.csv")
}
