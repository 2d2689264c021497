use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::{tempdir, TempDir};
use tracelab::catalog::{read_trial, scan_session};
use tracelab::config::{Handedness, MotionSource, PathSelection, SpeedClass, Weight};
use tracelab::prelude::*;
use tracelab::rig::Cue;
use tracelab::session::{archive_session, ArchiveOutcome};

// Every point keeps well clear of the resting hands, so only a deliberate
// reach ever touches the target.
const LOOP: &str = "\
# a small loop in front of the subject
-0.20 1.30 0.00
-0.10 1.45 0.00
 0.00 1.50 0.00   # apex
 0.10 1.45 0.00
 0.20 1.30 0.00
 0.00 1.15 0.00
";

const SQUARE: &str = "\
-0.2 1.1 0
 0.2 1.1 0
 0.2 1.5 0
-0.2 1.5 0
";

struct Lab {
    _work: TempDir,
    config: TracelabConfig,
}

fn lab() -> Lab {
    let work = tempdir().unwrap();
    let library = work.path().join("paths");
    fs::create_dir(&library).unwrap();
    fs::write(library.join("1001.txt"), LOOP).unwrap();
    fs::write(library.join("1002.txt"), LOOP).unwrap();
    fs::write(library.join("square.txt"), SQUARE).unwrap();

    let mut config = TracelabConfig::default();
    config.session.output_root = work.path().join("out");
    config.session.archive_root = Some(work.path().join("archive"));
    config.session.seed = Some(7);
    config.rig.motion = MotionSource::Glove;
    config.paths.library = library;
    config.paths.scale = [1.0, 1.0, 1.0];
    config.paths.translate = [0.0, 0.0, 0.0];
    config.timing.experiment_settle_secs = 0.5;
    config.timing.trial_display_secs = 0.5;
    config.trials_per_block = 2;
    config.blocks = vec![
        BlockConfig::new(SpeedClass::Slow, Weight::Unweighted, Handedness::Dominant, PathSelection::Random),
        BlockConfig::new(SpeedClass::Fast, Weight::Weighted, Handedness::Dominant, PathSelection::Square),
    ];
    Lab {
        _work: work,
        config,
    }
}

struct Run {
    outcome: Result<()>,
    experiment: Experiment,
    scene: Arc<SimScene>,
    rig: Arc<SimRig>,
    lifecycle: Vec<LifecycleEvent>,
    system: Vec<SystemEvent>,
    periodic_left: usize,
    conditionals_left: usize,
}

async fn run_session(config: TracelabConfig) -> Run {
    run_session_with(config, |_| {}).await
}

/// Runs a whole session; `prepare` sees the engine before the workflow starts.
async fn run_session_with(config: TracelabConfig, prepare: impl FnOnce(&LabEngine)) -> Run {
    let engine = LabEngine::new(config.clock.resolution.clone());
    let dispatcher = engine.start();
    let mut lifecycle_rx = engine.subscribe_lifecycle_events();
    let mut system_rx = engine.subscribe_system_events();
    prepare(&engine);

    let scene = Arc::new(SimScene::new());
    let rig = Arc::new(SimRig::new(config.rig.motion.profile()).with_scene(scene.clone()));
    let autopilot = Autopilot::spawn(&engine, rig.clone(), Side::Left);

    let mut experiment = Experiment::new(config, scene.clone(), rig.clone()).unwrap();
    let outcome = workflow(&mut experiment, &engine).await;
    let periodic_left = engine.periodic_count().await;
    let conditionals_left = engine.conditional_count().await;

    autopilot.stop();
    engine.shutdown();
    dispatcher.await.unwrap();

    let mut lifecycle = Vec::new();
    while let Ok(event) = lifecycle_rx.try_recv() {
        lifecycle.push(event);
    }
    let mut system = Vec::new();
    while let Ok(event) = system_rx.try_recv() {
        system.push(event);
    }
    Run {
        outcome,
        experiment,
        scene,
        rig,
        lifecycle,
        system,
        periodic_left,
        conditionals_left,
    }
}

fn files_under(dir: &Path) -> Vec<String> {
    let mut names = Vec::new();
    for entry in fs::read_dir(dir).unwrap() {
        let path = entry.unwrap().path();
        if path.is_dir() {
            names.extend(files_under(&path));
        } else {
            names.push(path.file_name().unwrap().to_string_lossy().into_owned());
        }
    }
    names.sort();
    names
}

#[tokio::test(start_paused = true)]
async fn full_session_records_every_trial_and_archives_once() {
    let lab = lab();
    let run = run_session(lab.config.clone()).await;
    run.outcome.unwrap();

    let root = run.experiment.output().unwrap().to_path_buf();
    let catalog = scan_session(&root).unwrap();
    assert_eq!(catalog.blocks.len(), 2);
    assert_eq!(
        catalog.blocks[0].dir.file_name().unwrap(),
        "block0-UNWEIGHTED-SLOW-DOMINANT-RANDOM"
    );
    assert_eq!(
        catalog.blocks[1].dir.file_name().unwrap(),
        "block1-WEIGHTED-FAST-DOMINANT-SQUARE"
    );
    for block in &catalog.blocks {
        assert_eq!(block.trials.len(), 2);
    }

    // glove profile: 4 markers after the 11 base columns
    let width = 11 + 4 * 4;
    for block in &catalog.blocks {
        for trial in &block.trials {
            assert_eq!(trial.side, Side::Left, "{}", trial.name);
            let recorded = read_trial(&trial.path).unwrap();
            assert_eq!(recorded.columns.len(), width);
            let expected_frames = if block.index == 0 { 6 } else { 4 };
            assert_eq!(recorded.frame_count(), expected_frames);
            assert!(recorded.rows.iter().all(|row| row.len() == width));
            // the reaching hand rides on the target
            assert!(recorded.mean_tracking_error().unwrap() < 1e-9);
        }
    }
    assert!(catalog.blocks[1].trials.iter().all(|t| t.name == "square"));

    let archived = lab.config.session.archive_root.clone().unwrap().join(root.file_name().unwrap());
    assert_eq!(run.experiment.archive(), Some(&ArchiveOutcome::Copied(archived.clone())));
    assert_eq!(files_under(&archived), files_under(&root));
    assert!(matches!(
        archive_session(&root, lab.config.session.archive_root.as_deref().unwrap()).unwrap(),
        ArchiveOutcome::AlreadyArchived(_)
    ));

    assert!(run.scene.visuals().is_empty());
    let cues = run.scene.cues();
    assert_eq!(cues.iter().filter(|c| **c == Cue::BlockStart).count(), 2);
    assert_eq!(cues.iter().filter(|c| **c == Cue::TrialStart).count(), 4);
    assert!(cues.iter().filter(|c| **c == Cue::Contact).count() >= 4);
    assert!(!run.rig.is_running());
    assert_eq!(run.rig.head_resets(), 1);
    assert_eq!(run.periodic_left, 0);
    assert_eq!(run.conditionals_left, 0);
}

#[tokio::test(start_paused = true)]
async fn lifecycle_events_nest_and_never_overlap() {
    let lab = lab();
    let run = run_session(lab.config.clone()).await;
    run.outcome.unwrap();

    let events = &run.lifecycle;
    assert_eq!(events.len(), 2 * (1 + 2 + 4));
    assert!(events.first().unwrap().is(TaskKind::Experiment, Stage::PreRun));
    assert!(events.last().unwrap().is(TaskKind::Experiment, Stage::PostRun));

    for kind in [TaskKind::Block, TaskKind::Trial] {
        let stages: Vec<Stage> = events.iter().filter(|e| e.kind == kind).map(|e| e.stage).collect();
        for pair in stages.chunks(2) {
            assert_eq!(pair, [Stage::PreRun, Stage::PostRun], "{kind} runs overlapped");
        }
    }

    // each task's pair shares one id, and no id is reused
    let mut ids: Vec<_> = events.iter().filter(|e| e.stage == Stage::PreRun).map(|e| e.task).collect();
    for event in events.iter().filter(|e| e.stage == Stage::PostRun) {
        assert!(ids.contains(&event.task));
    }
    let count = ids.len();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), count);

    // every trial runs inside a block's run phase
    let mut open_block = false;
    for event in events {
        match (event.kind, event.stage) {
            (TaskKind::Block, Stage::PreRun) => open_block = true,
            (TaskKind::Block, Stage::PostRun) => open_block = false,
            (TaskKind::Trial, _) => assert!(open_block),
            _ => {}
        }
    }
}

#[tokio::test(start_paused = true)]
async fn key_presses_replace_the_target_signal_when_it_is_disabled() {
    let lab = lab();
    let mut config = lab.config.clone();
    config.rig.use_target_signal = false;
    config.session.archive_root = None;
    let run = run_session(config).await;
    run.outcome.unwrap();

    assert!(!run.system.iter().any(|e| matches!(e, SystemEvent::AwaitingSignal)));
    let key_waits = run
        .system
        .iter()
        .filter(|e| matches!(e, SystemEvent::AwaitingKey { key: ' ' }))
        .count();
    // one per block setup and one per trial
    assert_eq!(key_waits, 2 + 4);
    assert_eq!(run.experiment.archive(), None);

    let catalog = scan_session(run.experiment.output().unwrap()).unwrap();
    assert_eq!(catalog.trial_count(), 4);
}

#[tokio::test(start_paused = true)]
async fn an_empty_path_aborts_the_session() {
    let lab = lab();
    fs::write(lab.config.paths.library.join("square.txt"), "# nothing here\n").unwrap();
    let run = run_session(lab.config.clone()).await;

    let err = run.outcome.unwrap_err();
    assert!(matches!(err, TracelabError::EmptyPath(ref name) if name == "square"));

    // the first block completed, the second never reached its run phase's end
    let trial_posts = run
        .lifecycle
        .iter()
        .filter(|e| e.is(TaskKind::Trial, Stage::PostRun))
        .count();
    assert_eq!(trial_posts, 2);
    assert!(!run.lifecycle.iter().any(|e| e.is(TaskKind::Experiment, Stage::PostRun)));
    assert_eq!(run.experiment.archive(), None);
    assert_eq!(run.periodic_left, 0);

    // the aborted session still releases the rig and the scene
    assert_eq!(run.conditionals_left, 0);
    assert!(run.scene.visuals().is_empty());
    assert!(!run.rig.is_running());
}

#[tokio::test(start_paused = true)]
async fn a_failed_trial_write_aborts_the_session() {
    let lab = lab();
    let output_root = lab.config.session.output_root.clone();
    let run = run_session_with(lab.config.clone(), move |engine| {
        // pull the block directory out from under the first trial
        let mut lifecycle_rx = engine.subscribe_lifecycle_events();
        tokio::spawn(async move {
            while let Ok(event) = lifecycle_rx.recv().await {
                if event.is(TaskKind::Trial, Stage::PreRun) {
                    for session in fs::read_dir(&output_root).unwrap() {
                        for block in fs::read_dir(session.unwrap().path()).unwrap() {
                            fs::remove_dir_all(block.unwrap().path()).unwrap();
                        }
                    }
                    return;
                }
            }
        });
    })
    .await;

    let err = run.outcome.unwrap_err();
    assert!(matches!(err, TracelabError::Io { .. }), "{err}");
    let trial_posts = run
        .lifecycle
        .iter()
        .filter(|e| e.is(TaskKind::Trial, Stage::PostRun))
        .count();
    assert_eq!(trial_posts, 1);
    assert!(!run.lifecycle.iter().any(|e| e.is(TaskKind::Block, Stage::PostRun)));
    assert!(!run.lifecycle.iter().any(|e| e.is(TaskKind::Experiment, Stage::PostRun)));
    assert_eq!(run.experiment.archive(), None);
    assert!(run.scene.visuals().is_empty());
    assert!(!run.rig.is_running());
}

#[tokio::test(start_paused = true)]
async fn without_the_hmd_the_head_pose_is_left_alone() {
    let lab = lab();
    let mut config = lab.config.clone();
    config.rig.use_hmd = false;
    config.session.archive_root = None;
    let run = run_session(config).await;
    run.outcome.unwrap();
    assert_eq!(run.rig.head_resets(), 0);
}

#[test]
fn config_file_describes_a_session() {
    let lab = lab();
    let text = format!(
        r#"
trials_per_block = 3

[session]
output_root = '{out}'
seed = 11

[rig]
motion = "glove"
hmd = "oculus"

[paths]
library = '{lib}'

[[blocks]]
speed = "slow"
weight = "unweighted"
hand = "dominant"
paths = "random"

[[blocks]]
speed = "fast"
weight = "weighted"
hand = "nondominant"
paths = "square"
trials = 1
"#,
        out = lab.config.session.output_root.display(),
        lib = lab.config.paths.library.display(),
    );
    let config = TracelabConfig::from_toml_str(&text).unwrap();
    assert_eq!(config.blocks.len(), 2);
    assert_eq!(config.trials_for(&config.blocks[0]), 3);
    assert_eq!(config.trials_for(&config.blocks[1]), 1);
    assert_eq!(config.rig.motion, MotionSource::Glove);
    assert_eq!(config.session.seed, Some(11));
    // untouched sections keep their defaults
    assert_eq!(config.timing.preview_points, 10);
    assert_eq!(config.session.environment, "dojo.osgb");
}
