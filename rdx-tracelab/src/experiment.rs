//! The top-level session: a fixed, ordered list of blocks.
//!
//! Setup prepares the rig and the output tree and arms the proximity sensor
//! around the target. Run drives the blocks one after another. Teardown
//! removes the sensor and environment and copies the session into the archive.

use crate::block::Block;
use crate::common::{distance_squared, ListenerId, Side, TaskKind, VisualId};
use crate::components::task::{run_sequence, Lifecycle, Task};
use crate::components::watcher::Callback;
use crate::config::TracelabConfig;
use crate::engine::LabEngine;
use crate::error::{Result, TracelabError};
use crate::events::SessionEvent;
use crate::rig::{Color, Cue, MotionCapture, Scene};
use crate::session::{archive_session, session_dir, ArchiveOutcome, SessionContext};
use crate::signal::Signal;
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

pub struct Experiment {
    lifecycle: Lifecycle,
    config: TracelabConfig,
    ctx: Arc<SessionContext>,
    rng: StdRng,
    output: Option<PathBuf>,
    environment: Option<VisualId>,
    proximity: Option<ListenerId>,
    archive: Option<ArchiveOutcome>,
}

impl Experiment {
    /// Builds a session over the given collaborators.
    ///
    /// The configuration is validated again here; a session never starts with
    /// an invalid one.
    pub fn new(
        config: TracelabConfig,
        scene: Arc<dyn Scene>,
        rig: Arc<dyn MotionCapture>,
    ) -> Result<Self> {
        config.validate()?;
        let rng = match config.session.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        let target_signal = config.rig.use_target_signal.then(Signal::new);
        let ctx = Arc::new(SessionContext {
            scene,
            rig,
            target_signal,
            timing: config.timing.clone(),
        });
        Ok(Self {
            lifecycle: Lifecycle::new(),
            config,
            ctx,
            rng,
            output: None,
            environment: None,
            proximity: None,
            archive: None,
        })
    }

    pub fn config(&self) -> &TracelabConfig {
        &self.config
    }

    pub fn context(&self) -> &Arc<SessionContext> {
        &self.ctx
    }

    /// The session's output root, once setup has created it.
    pub fn output(&self) -> Option<&Path> {
        self.output.as_deref()
    }

    /// What the archive step did, once teardown has run.
    pub fn archive(&self) -> Option<&ArchiveOutcome> {
        self.archive.as_ref()
    }

    /// Lazily builds the configured blocks in their declared order.
    ///
    /// Each block gets its own generator seeded from the session's, so a seeded
    /// session replays the same paths and speeds.
    pub fn generate_blocks(&mut self) -> Result<impl Iterator<Item = Result<Block>> + Send + '_> {
        let output = self
            .output
            .clone()
            .ok_or_else(|| TracelabError::NotReady("experiment".into()))?;
        let Experiment {
            config, ctx, rng, ..
        } = self;
        let config: &TracelabConfig = config;
        Ok(config
            .blocks
            .iter()
            .enumerate()
            .map(move |(index, block)| {
                let block_rng = StdRng::seed_from_u64(rng.random());
                Block::new(ctx.clone(), config, index, block.clone(), &output, block_rng)
            }))
    }

    async fn arm_proximity(&mut self, engine: &LabEngine) {
        let radius = self.config.rig.proximity_radius();
        let id = arm_proximity_sensor(engine, &self.ctx, radius).await;
        debug!("proximity sensor armed, radius {:.3}", radius);
        self.proximity = Some(id);
    }

    /// Disarms the proximity sensor and removes the environment.
    async fn clear_scene(&mut self, engine: &LabEngine) {
        if let Some(id) = self.proximity.take() {
            engine.remove_conditional(id).await;
        }
        if let Some(environment) = self.environment.take() {
            self.ctx.scene.remove_visual(environment);
        }
    }
}

/// Watches both effectors against a sphere of `radius` around the target.
///
/// Entering the sphere plays the contact cue, turns the target blue and fires
/// the context's target signal. Leaving it turns the target white again.
pub async fn arm_proximity_sensor(
    engine: &LabEngine,
    ctx: &SessionContext,
    radius: f64,
) -> ListenerId {
    let radius_sq = radius.powi(2);
    let (scene, rig) = (ctx.scene.clone(), ctx.rig.clone());
    let touching = move || {
        let target = scene.target_position();
        [Side::Left, Side::Right]
            .into_iter()
            .any(|side| distance_squared(rig.effector(side), target) <= radius_sq)
    };

    let (scene, signal) = (ctx.scene.clone(), ctx.target_signal.clone());
    let on_enter = move || {
        scene.play_cue(Cue::Contact);
        scene.set_target_color(Color::BLUE);
        if let Some(signal) = &signal {
            signal.send();
        }
    };
    let scene = ctx.scene.clone();
    let on_exit: Callback = Box::new(move || scene.set_target_color(Color::WHITE));

    engine.on_conditional(touching, on_enter, Some(on_exit)).await
}

#[async_trait]
impl Task for Experiment {
    fn kind(&self) -> TaskKind {
        TaskKind::Experiment
    }

    fn label(&self) -> String {
        self.output
            .as_deref()
            .and_then(Path::file_name)
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "experiment".to_string())
    }

    fn lifecycle(&mut self) -> &mut Lifecycle {
        &mut self.lifecycle
    }

    async fn setup(&mut self, engine: &LabEngine) -> Result<()> {
        self.ctx.rig.start()?;
        engine.wait(self.config.timing.experiment_settle()).await;
        if self.config.rig.use_hmd {
            self.ctx.rig.reset_head();
        }

        let output = session_dir(&self.config.session.output_root, &mut self.rng);
        fs::create_dir_all(&output).map_err(|e| TracelabError::io(&output, e))?;
        info!("session output {}", output.display());
        engine.emit_session(SessionEvent::OutputCreated {
            root: output.clone(),
        });
        self.output = Some(output);

        self.environment = Some(self.ctx.scene.add_environment(&self.config.session.environment));
        self.arm_proximity(engine).await;
        Ok(())
    }

    async fn run(&mut self, engine: &LabEngine) -> Result<()> {
        let blocks = self.generate_blocks()?;
        let ran = run_sequence(blocks, engine).await?;
        info!("session finished {} blocks", ran);
        Ok(())
    }

    async fn teardown(&mut self, engine: &LabEngine) -> Result<()> {
        self.clear_scene(engine).await;

        if let (Some(output), Some(archive_root)) =
            (&self.output, &self.config.session.archive_root)
        {
            let outcome = archive_session(output, archive_root)?;
            engine.emit_session(match &outcome {
                ArchiveOutcome::Copied(destination) => SessionEvent::Archived {
                    destination: destination.clone(),
                },
                ArchiveOutcome::AlreadyArchived(destination) => SessionEvent::AlreadyArchived {
                    destination: destination.clone(),
                },
            });
            self.archive = Some(outcome);
        }

        self.ctx.rig.stop();
        Ok(())
    }

    async fn abort(&mut self, engine: &LabEngine) {
        self.clear_scene(engine).await;
        self.ctx.rig.stop();
        info!("session aborted, nothing archived");
    }
}
