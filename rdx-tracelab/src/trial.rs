//! A single path-tracing measurement.
//!
//! Setup shows the path and previews the target's motion over its last few
//! points. Run waits until the subject touches the target, fixes the tracing
//! hand, then walks the target along the path while recording one row per
//! waypoint. Teardown writes the rows, draws the trace, and clears the visuals.

use crate::common::{distance_squared, Side, TaskKind, Vec3, VisualId};
use crate::components::task::{Lifecycle, Task};
use crate::engine::LabEngine;
use crate::error::Result;
use crate::events::SessionEvent;
use crate::recording::{timestamp, trial_file_name, TrialRecorder};
use crate::rig::{Color, Cue};
use crate::session::SessionContext;
use async_trait::async_trait;
use chrono::Local;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Number of steps over which the target accelerates to its nominal speed.
const RAMP_STEPS: usize = 10;

/// Fraction of the nominal speed used at `step`: 0.1, 0.2, … then 1.0 from step 9 on.
pub fn ramp_factor(step: usize) -> f64 {
    ((step + 1) as f64 / RAMP_STEPS as f64).min(1.0)
}

/// The effector closer to the target; ties go to the right hand.
pub fn closer_effector(target: Vec3, left: Vec3, right: Vec3) -> Side {
    if distance_squared(left, target) < distance_squared(right, target) {
        Side::Left
    } else {
        Side::Right
    }
}

pub struct Trial {
    lifecycle: Lifecycle,
    ctx: Arc<SessionContext>,
    output_dir: PathBuf,
    name: String,
    vertices: Vec<Vec3>,
    speed: f64,
    recorder: TrialRecorder,
    trace: Vec<Vec3>,
    tracer: Option<Side>,
    path_visual: Option<VisualId>,
    output: Option<PathBuf>,
}

impl Trial {
    /// Creates a trial writing into `output_dir`. The row header is fixed here
    /// from the markers the rig currently tracks.
    pub fn new(
        ctx: Arc<SessionContext>,
        output_dir: PathBuf,
        name: impl Into<String>,
        vertices: Vec<Vec3>,
        speed: f64,
    ) -> Self {
        let recorder = TrialRecorder::new(ctx.rig.marker_ids());
        Self {
            lifecycle: Lifecycle::new(),
            ctx,
            output_dir,
            name: name.into(),
            vertices,
            speed,
            recorder,
            trace: Vec::new(),
            tracer: None,
            path_visual: None,
            output: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn vertices(&self) -> &[Vec3] {
        &self.vertices
    }

    /// The hand chosen when the target was first touched.
    pub fn tracer(&self) -> Option<Side> {
        self.tracer
    }

    pub fn trace(&self) -> &[Vec3] {
        &self.trace
    }

    pub fn recorder(&self) -> &TrialRecorder {
        &self.recorder
    }

    /// Where the rows were written, once teardown has run.
    pub fn output(&self) -> Option<&Path> {
        self.output.as_deref()
    }

    async fn wait_for_target(&self, engine: &LabEngine) -> Result<()> {
        match &self.ctx.target_signal {
            Some(signal) => {
                engine.wait_for_signal(signal).await;
                Ok(())
            }
            None => engine.wait_for_key(' ').await,
        }
    }

    fn write_records(&mut self) -> Result<PathBuf> {
        let side = self.tracer.map(Side::as_str).unwrap_or("none");
        let file_name = trial_file_name(&timestamp(&Local::now()), &self.name, side, self.speed);
        let path = self.output_dir.join(file_name);
        self.recorder.write_csv(&path)?;
        info!("trial output {}", path.display());
        Ok(path)
    }
}

#[async_trait]
impl Task for Trial {
    fn kind(&self) -> TaskKind {
        TaskKind::Trial
    }

    fn label(&self) -> String {
        self.name.clone()
    }

    fn lifecycle(&mut self) -> &mut Lifecycle {
        &mut self.lifecycle
    }

    async fn setup(&mut self, engine: &LabEngine) -> Result<()> {
        let scene = &self.ctx.scene;
        scene.play_cue(Cue::TrialStart);
        self.path_visual = Some(scene.add_polyline(&self.vertices, Color::BLACK));

        engine.wait(self.ctx.timing.trial_settle()).await;

        // replay the last few points to show the target's direction and speed.
        let preview_from = self
            .vertices
            .len()
            .saturating_sub(self.ctx.timing.preview_points);
        if let Some(first) = self.vertices.get(preview_from) {
            scene.set_target_position(*first);
        }
        for vertex in &self.vertices[preview_from..] {
            scene.move_target_to(*vertex, self.speed).await;
        }
        if let Some(start) = self.vertices.first() {
            scene.set_target_position(*start);
        }
        Ok(())
    }

    async fn run(&mut self, engine: &LabEngine) -> Result<()> {
        self.wait_for_target(engine).await?;

        let ctx = self.ctx.clone();
        let target = ctx.scene.target_position();
        let side = closer_effector(
            target,
            ctx.rig.effector(Side::Left),
            ctx.rig.effector(Side::Right),
        );
        self.tracer = Some(side);
        debug!("trial '{}' traced with the {} hand", self.name, side);
        engine.emit_session(SessionEvent::TracerSelected {
            trial: self.name.clone(),
            side,
        });

        let start = engine.now();
        for (step, vertex) in self.vertices.iter().enumerate() {
            ctx.scene
                .move_target_to(*vertex, ramp_factor(step) * self.speed)
                .await;

            let effector = ctx.rig.effector(side);
            self.trace.push(effector);
            self.recorder.record(
                step,
                start.elapsed().as_secs_f64(),
                ctx.scene.target_position(),
                effector,
                ctx.rig.head_position(),
                &ctx.rig.markers(),
            )?;
        }
        Ok(())
    }

    async fn teardown(&mut self, engine: &LabEngine) -> Result<()> {
        let path = self.write_records()?;
        engine.emit_session(SessionEvent::TrialSaved {
            path: path.clone(),
            rows: self.recorder.len(),
        });
        self.output = Some(path);

        let color = self.tracer.map(Color::for_side).unwrap_or(Color::WHITE);
        let trace_visual = self.ctx.scene.add_polyline(&self.trace, color);
        engine.wait(self.ctx.timing.trial_display()).await;

        if let Some(path_visual) = self.path_visual.take() {
            self.ctx.scene.remove_visual(path_visual);
        }
        self.ctx.scene.remove_visual(trace_visual);
        Ok(())
    }

    async fn abort(&mut self, _engine: &LabEngine) {
        if let Some(path_visual) = self.path_visual.take() {
            self.ctx.scene.remove_visual(path_visual);
        }
    }
}
