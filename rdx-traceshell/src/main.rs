use anyhow::Result;
use colored::Colorize;
use rustyline::highlight::Highlighter;
use rustyline::Editor;
use rustyline_derive::{Completer, Helper, Hinter, Validator};
use std::borrow::Cow;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracelab::catalog::{read_trial, scan_session};
use tracelab::prelude::*;
use tracelab::{ENGINE_NAME, VERSION as LIB_VERSION};
use tracing::info;
use tracing_subscriber::EnvFilter;

const SHELL_VERSION: &str = env!("CARGO_PKG_VERSION");

/// A custom helper struct for rustyline that enables syntax highlighting.
#[derive(Completer, Helper, Hinter, Validator)]
struct MyHighlighter;

impl Highlighter for MyHighlighter {
    fn highlight<'l>(&self, line: &'l str, _pos: usize) -> Cow<'l, str> {
        if let Some((command, rest)) = line.split_once(' ') {
            let colored_command = command.yellow().bold();
            let colored_rest = rest.yellow();
            Cow::Owned(format!("{} {}", colored_command, colored_rest))
        } else {
            Cow::Owned(line.yellow().bold().to_string())
        }
    }
    fn highlight_char(&self, _line: &str, _pos: usize, _forced: bool) -> bool {
        true
    }
}

fn print_banner() {
    if env::var("QUIET_MODE").is_ok() {
        return;
    }
    println!("{}", "  t r a c e s h e l l".cyan().bold());
    let version_string = format!(
        "          Shell   v{:<8} Library   v{:<8}",
        SHELL_VERSION, LIB_VERSION
    );
    println!("{}", "-".repeat(64).dimmed());
    println!("{}", version_string);
    println!(
        "{}",
        "    Distributed under the MIT OR Apache-2.0 license.".dimmed()
    );
    println!("{}", "-".repeat(64).dimmed());
}

/// Prints the prompts an operator has to answer, and the session milestones.
fn spawn_event_listeners(engine: &LabEngine) {
    let mut system_rx = engine.subscribe_system_events();
    tokio::spawn(async move {
        while let Ok(event) = system_rx.recv().await {
            match event {
                SystemEvent::AwaitingKey { key: ' ' } => {
                    println!("\n<-- [WAITING] press 'space' to continue\n>> ")
                }
                SystemEvent::AwaitingKey { key } => {
                    println!("\n<-- [WAITING] press 'key {}' to continue\n>> ", key)
                }
                SystemEvent::AwaitingSignal => {
                    println!("\n<-- [WAITING] 'touch left' or 'touch right' the target\n>> ")
                }
                _ => {}
            }
        }
    });

    let mut session_rx = engine.subscribe_session_events();
    tokio::spawn(async move {
        while let Ok(event) = session_rx.recv().await {
            println!("\n<-- [SESSION] {:?}\n>> ", event);
        }
    });
}

fn parse_side(arg: Option<&&str>) -> Option<Side> {
    match arg.copied() {
        Some("left") | Some("l") => Some(Side::Left),
        Some("right") | Some("r") => Some(Side::Right),
        _ => None,
    }
}

fn print_catalog(root: &Path) {
    let catalog = match scan_session(root) {
        Ok(catalog) => catalog,
        Err(e) => {
            println!("Error: {}", e);
            return;
        }
    };
    println!("{} blocks, {} trials", catalog.blocks.len(), catalog.trial_count());
    for block in &catalog.blocks {
        let c = &block.config;
        println!("  block {}: {} {} {} {}", block.index, c.weight, c.speed, c.hand, c.paths);
        for trial in &block.trials {
            let detail = match read_trial(&trial.path) {
                Ok(recorded) => format!(
                    "{} frames, {:.2}s, mean error {:.4}",
                    recorded.frame_count(),
                    recorded.duration(),
                    recorded.mean_tracking_error().unwrap_or(f64::NAN)
                ),
                Err(e) => e.to_string().red().to_string(),
            };
            println!(
                "    {} {:>5} {:.3} m/s  {}",
                trial.name, trial.side.as_str(), trial.speed, detail
            );
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    print_banner();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let config_path = env::args().nth(1).map(PathBuf::from);
    let config = TracelabConfig::load(config_path.as_deref())?;

    let engine = LabEngine::new(config.clock.resolution.clone());
    let dispatcher = engine.start();
    spawn_event_listeners(&engine);

    let scene = Arc::new(SimScene::new());
    let rig = Arc::new(SimRig::new(config.rig.motion.profile()).with_scene(scene.clone()));
    let mut experiment = Experiment::new(config, scene, rig.clone())?;

    info!("Starting a session on {}...", ENGINE_NAME.cyan());
    let session_engine = engine.clone();
    let session = tokio::spawn(async move {
        match workflow(&mut experiment, &session_engine).await {
            Ok(()) => println!("\n<-- [DONE] session finished\n>> "),
            Err(e) => eprintln!("\nSession stopped with an error: {}", e),
        }
        experiment.output().map(Path::to_path_buf)
    });

    tokio::time::sleep(Duration::from_millis(100)).await;

    let mut autopilot: Option<Autopilot> = None;
    let mut rl = Editor::new()?;
    let helper = MyHighlighter {};
    rl.set_helper(Some(helper));

    println!("{} is running. Type 'help' for commands or 'exit' to quit.", ENGINE_NAME.cyan());

    loop {
        let prompt = format!("{}", ">> ".cyan().bold());
        let readline = rl.readline(&prompt);
        match readline {
            Ok(line) => {
                rl.add_history_entry(line.as_str())?;
                let args = line.split_whitespace().collect::<Vec<_>>();

                if let Some(command) = args.first() {
                    match *command {
                        "space" => engine.press_key(' '),
                        "key" => match args.get(1).and_then(|k| k.chars().next()) {
                            Some(key) => engine.press_key(key),
                            None => println!("Usage: key <CHAR>"),
                        },
                        "touch" => match parse_side(args.get(1)) {
                            Some(side) => rig.reach(side),
                            None => println!("Usage: touch left|right"),
                        },
                        "release" => match parse_side(args.get(1)) {
                            Some(side) => rig.release(side),
                            None => rig.release_both(),
                        },
                        "reset" => {
                            rig.reset_head();
                            println!("--> Head pose reset ({} so far).", rig.head_resets());
                        }
                        "auto" => match args.get(1).copied() {
                            Some("off") => {
                                if let Some(pilot) = autopilot.take() {
                                    pilot.stop();
                                }
                                println!("--> Autopilot off.");
                            }
                            _ => {
                                let side = parse_side(args.get(1)).unwrap_or(Side::Right);
                                if let Some(pilot) = autopilot.replace(Autopilot::spawn(&engine, rig.clone(), side)) {
                                    pilot.stop();
                                }
                                println!("--> Autopilot on, tracing with the {} hand.", side);
                            }
                        },
                        "status" => {
                            let tasks = engine.active_tasks().await;
                            if tasks.is_empty() {
                                println!("No active tasks.");
                            }
                            for task in tasks {
                                println!(
                                    "  {:<10} {:<48} {:?} ({:.1}s)",
                                    task.kind.to_string(),
                                    task.label,
                                    task.state,
                                    task.started.elapsed().as_secs_f64()
                                );
                            }
                        }
                        "catalog" => match args.get(1) {
                            Some(dir) => print_catalog(Path::new(dir)),
                            None => println!("Usage: catalog <SESSION_DIR>"),
                        },
                        "help" => {
                            println!("Available commands:");
                            println!("  space                 - Presses the space key.");
                            println!("  key <C>               - Presses key C.");
                            println!("  touch left|right      - Puts that hand on the target.");
                            println!("  release [left|right]  - Moves a hand (or both) back to rest.");
                            println!("  reset                 - Resets the head reference pose.");
                            println!("  auto [left|right|off] - Lets the autopilot answer every wait.");
                            println!("  status                - Lists the running experiment, block and trial.");
                            println!("  catalog <DIR>         - Summarises a recorded session.");
                            println!("  exit                  - Quits the shell.");
                        }
                        "exit" => break,
                        _ => println!("Unknown command: '{}'. Type 'help'.", line),
                    }
                }
            }
            Err(_) => {
                println!("Exiting traceshell...");
                break;
            }
        }
    }

    if let Some(pilot) = autopilot {
        pilot.stop();
    }
    if session.is_finished() {
        if let Ok(Some(root)) = session.await {
            println!("Session output: {}", root.display());
        }
    } else {
        session.abort();
    }
    engine.shutdown();
    dispatcher.await?;
    Ok(())
}
