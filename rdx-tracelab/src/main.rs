use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracelab::catalog::{read_trial, scan_session};
use tracelab::prelude::*;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    // 2. Load the session configuration (optional TOML path as first argument).
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = TracelabConfig::load(config_path.as_deref())
        .context("loading the session configuration")?;

    // 3. Create the engine and start its dispatcher.
    let engine = LabEngine::new(config.clock.resolution.clone());
    let dispatcher = engine.start();
    spawn_event_listeners(&engine);

    // 4. Wire the simulated collaborators and let the autopilot play the subject.
    let scene = Arc::new(SimScene::new());
    let rig = Arc::new(SimRig::new(config.rig.motion.profile()).with_scene(scene.clone()));
    let autopilot = Autopilot::spawn(&engine, rig.clone(), Side::Right);

    // 5. Run the whole session.
    let mut experiment = Experiment::new(config, scene, rig)?;
    let outcome = workflow(&mut experiment, &engine).await;

    autopilot.stop();
    engine.shutdown();
    dispatcher.await?;
    outcome?;

    // 6. Summarise what was recorded.
    if let Some(root) = experiment.output() {
        summarise(root)?;
    }
    Ok(())
}

/// Logs every lifecycle and session event.
fn spawn_event_listeners(engine: &LabEngine) {
    let mut lifecycle_rx = engine.subscribe_lifecycle_events();
    tokio::spawn(async move {
        while let Ok(event) = lifecycle_rx.recv().await {
            info!("[LIFECYCLE] {} '{}' {:?}", event.kind, event.label, event.stage);
        }
    });

    let mut session_rx = engine.subscribe_session_events();
    tokio::spawn(async move {
        while let Ok(event) = session_rx.recv().await {
            info!("[SESSION] {:?}", event);
        }
    });
}

fn summarise(root: &std::path::Path) -> Result<()> {
    let catalog = scan_session(root)?;
    info!("{} blocks, {} trials under {}", catalog.blocks.len(), catalog.trial_count(), root.display());
    for block in &catalog.blocks {
        for trial in &block.trials {
            match read_trial(&trial.path) {
                Ok(recorded) => info!(
                    "block {} trial {} ({}, {:.3} m/s): {} frames, {:.2}s, mean error {:.4}",
                    block.index,
                    trial.name,
                    trial.side,
                    trial.speed,
                    recorded.frame_count(),
                    recorded.duration(),
                    recorded.mean_tracking_error().unwrap_or(f64::NAN),
                ),
                Err(err) => warn!("{}", err),
            }
        }
    }
    Ok(())
}
