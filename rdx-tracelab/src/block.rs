//! An ordered group of trials sharing one configuration.

use crate::common::{TaskKind, Vec3};
use crate::components::task::{run_sequence, Lifecycle, Task};
use crate::config::{BlockConfig, PathSelection, SpeedConfig, TracelabConfig};
use crate::engine::LabEngine;
use crate::error::{Result, TracelabError};
use crate::events::SessionEvent;
use crate::paths::{PathLibrary, PathTransform};
use crate::rig::Cue;
use crate::session::SessionContext;
use crate::trial::Trial;
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::Rng;
use rand_distr::{Distribution, Normal};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Name of a block's output directory.
pub fn block_dir_name(index: usize, config: &BlockConfig) -> String {
    format!(
        "block{}-{}-{}-{}-{}",
        index, config.weight, config.speed, config.hand, config.paths
    )
}

/// Per-trial speed draw: normal around the block's mean, clamped at a floor.
#[derive(Debug, Clone, Copy)]
pub struct SpeedDraw {
    normal: Normal<f64>,
    floor: f64,
}

impl SpeedDraw {
    pub fn new(mean: f64, std: f64, floor: f64) -> Result<Self> {
        Ok(Self {
            normal: Normal::new(mean, std)?,
            floor,
        })
    }

    pub fn for_block(speed: &SpeedConfig, block: &BlockConfig) -> Result<Self> {
        Self::new(speed.mean(block.speed), speed.std, speed.floor)
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        let drawn = self.normal.sample(rng);
        if drawn < self.floor {
            warn!("speed draw {:.3} below floor, using {:.3}", drawn, self.floor);
            self.floor
        } else {
            drawn
        }
    }
}

pub struct Block {
    lifecycle: Lifecycle,
    ctx: Arc<SessionContext>,
    index: usize,
    config: BlockConfig,
    output_dir: PathBuf,
    library: PathLibrary,
    transform: PathTransform,
    path_names: Vec<String>,
    speed: SpeedDraw,
    rng: StdRng,
}

impl Block {
    /// Prepares block `index` of a session writing under `session_output`.
    ///
    /// Path names are picked here, one per trial slot; the path files themselves
    /// are read lazily as trials are generated.
    pub fn new(
        ctx: Arc<SessionContext>,
        settings: &TracelabConfig,
        index: usize,
        config: BlockConfig,
        session_output: &Path,
        mut rng: StdRng,
    ) -> Result<Self> {
        let library = PathLibrary::new(&settings.paths.library);
        let trials = settings.trials_for(&config);
        let path_names = match config.paths {
            PathSelection::Random => {
                let candidates = library.names_with_prefix(&settings.paths.prefix)?;
                (0..trials)
                    .map(|_| candidates[rng.random_range(0..candidates.len())].clone())
                    .collect()
            }
            PathSelection::Square => vec![settings.paths.square.clone(); trials],
        };
        let speed = SpeedDraw::for_block(&settings.speed, &config)?;
        info!(
            "NEW BLOCK {}: {} {} {} {} ({} trials)",
            index, config.weight, config.speed, config.hand, config.paths, trials
        );
        Ok(Self {
            lifecycle: Lifecycle::new(),
            ctx,
            index,
            output_dir: session_output.join(block_dir_name(index, &config)),
            config,
            library,
            transform: PathTransform {
                scale: settings.paths.scale,
                translate: settings.paths.translate,
            },
            path_names,
            speed,
            rng,
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn config(&self) -> &BlockConfig {
        &self.config
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Path names of the trial slots, in run order.
    pub fn path_names(&self) -> &[String] {
        &self.path_names
    }

    /// Lazily builds one trial per slot. Each trial draws its speed, then
    /// loads and randomizes its path.
    pub fn generate_trials(&mut self) -> impl Iterator<Item = Result<Trial>> + Send + '_ {
        let Block {
            ctx,
            output_dir,
            library,
            transform,
            path_names,
            speed,
            rng,
            ..
        } = self;
        path_names.iter().map(move |name| {
            let speed = speed.sample(&mut *rng);
            let vertices: Vec<Vec3> = library.load(name, transform, &mut *rng)?;
            Ok(Trial::new(
                ctx.clone(),
                output_dir.clone(),
                name.clone(),
                vertices,
                speed,
            ))
        })
    }
}

#[async_trait]
impl Task for Block {
    fn kind(&self) -> TaskKind {
        TaskKind::Block
    }

    fn label(&self) -> String {
        block_dir_name(self.index, &self.config)
    }

    fn lifecycle(&mut self) -> &mut Lifecycle {
        &mut self.lifecycle
    }

    async fn setup(&mut self, engine: &LabEngine) -> Result<()> {
        fs::create_dir_all(&self.output_dir)
            .map_err(|e| TracelabError::io(&self.output_dir, e))?;
        engine.emit_session(SessionEvent::BlockReady {
            index: self.index,
            dir: self.output_dir.clone(),
        });
        self.ctx.scene.play_cue(Cue::BlockStart);
        info!("block {} ready, press space to start", self.index);
        engine.wait_for_key(' ').await
    }

    async fn run(&mut self, engine: &LabEngine) -> Result<()> {
        let ran = run_sequence(self.generate_trials(), engine).await?;
        info!("block {} finished {} trials", self.index, ran);
        Ok(())
    }
}
