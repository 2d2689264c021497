//! In-process stand-ins for the renderer and the motion-capture rig.
//!
//! `SimScene` and `SimRig` implement the collaborator traits without any
//! hardware, and `Autopilot` plays the subject and the operator: it presses
//! the keys the workflow waits for and reaches for the target when a trial
//! waits for contact. Together they let a whole session run headless, in real
//! or paused tokio time.

use crate::common::{distance_squared, MarkerId, Side, TaskKind, Vec3, VisualId};
use crate::config::MotionProfile;
use crate::engine::LabEngine;
use crate::error::Result;
use crate::events::{Stage, SystemEvent};
use crate::rig::{Color, Cue, MarkerSample, MotionCapture, Scene};
use async_trait::async_trait;
use slotmap::SlotMap;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Where the simulated target starts.
pub const TARGET_HOME: Vec3 = [0.0, 1.3, 0.0];
/// Where the simulated head sits.
pub const HEAD_HOME: Vec3 = [0.0, 1.7, 0.4];

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Something drawn in a [`SimScene`].
#[derive(Debug, Clone, PartialEq)]
pub enum SimVisual {
    Polyline { points: Vec<Vec3>, color: Color },
    Environment(String),
}

struct SceneState {
    target: Vec3,
    target_color: Color,
    visuals: SlotMap<VisualId, SimVisual>,
    cues: Vec<Cue>,
}

/// A scene that keeps its state in memory.
pub struct SimScene {
    state: Mutex<SceneState>,
}

impl Default for SimScene {
    fn default() -> Self {
        Self::new()
    }
}

impl SimScene {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SceneState {
                target: TARGET_HOME,
                target_color: Color::WHITE,
                visuals: SlotMap::with_key(),
                cues: Vec::new(),
            }),
        }
    }

    pub fn target_color(&self) -> Color {
        lock(&self.state).target_color
    }

    /// Every visual currently shown.
    pub fn visuals(&self) -> Vec<SimVisual> {
        lock(&self.state).visuals.values().cloned().collect()
    }

    /// Cues played so far, in order.
    pub fn cues(&self) -> Vec<Cue> {
        lock(&self.state).cues.clone()
    }
}

#[async_trait]
impl Scene for SimScene {
    fn target_position(&self) -> Vec3 {
        lock(&self.state).target
    }

    fn set_target_position(&self, position: Vec3) {
        lock(&self.state).target = position;
    }

    /// Non-positive speeds jump straight to `position`.
    async fn move_target_to(&self, position: Vec3, speed: f64) {
        let from = self.target_position();
        let distance = distance_squared(from, position).sqrt();
        if speed > 0.0 && distance > 0.0 {
            let travel = Duration::try_from_secs_f64(distance / speed).unwrap_or(Duration::ZERO);
            tokio::time::sleep(travel).await;
        }
        self.set_target_position(position);
    }

    fn set_target_color(&self, color: Color) {
        lock(&self.state).target_color = color;
    }

    fn add_polyline(&self, points: &[Vec3], color: Color) -> VisualId {
        lock(&self.state).visuals.insert(SimVisual::Polyline {
            points: points.to_vec(),
            color,
        })
    }

    fn add_environment(&self, model: &str) -> VisualId {
        lock(&self.state)
            .visuals
            .insert(SimVisual::Environment(model.to_string()))
    }

    fn remove_visual(&self, id: VisualId) {
        lock(&self.state).visuals.remove(id);
    }

    fn play_cue(&self, cue: Cue) {
        trace!("cue {:?}", cue);
        lock(&self.state).cues.push(cue);
    }
}

#[derive(Debug, Clone, Copy)]
enum Hand {
    Resting(Vec3),
    Reaching,
}

struct RigState {
    running: bool,
    left: Hand,
    right: Hand,
    head_resets: usize,
    occluded: BTreeSet<MarkerId>,
}

/// A rig whose effectors rest beside the body or follow the target.
pub struct SimRig {
    profile: MotionProfile,
    scene: Option<Arc<dyn Scene>>,
    state: Mutex<RigState>,
}

impl SimRig {
    pub const LEFT_REST: Vec3 = [-0.3, 1.0, 0.3];
    pub const RIGHT_REST: Vec3 = [0.3, 1.0, 0.3];

    pub fn new(profile: MotionProfile) -> Self {
        Self {
            profile,
            scene: None,
            state: Mutex::new(RigState {
                running: false,
                left: Hand::Resting(Self::LEFT_REST),
                right: Hand::Resting(Self::RIGHT_REST),
                head_resets: 0,
                occluded: BTreeSet::new(),
            }),
        }
    }

    /// Lets reaching effectors follow `scene`'s target.
    pub fn with_scene(mut self, scene: Arc<dyn Scene>) -> Self {
        self.scene = Some(scene);
        self
    }

    pub fn profile(&self) -> &MotionProfile {
        &self.profile
    }

    pub fn is_running(&self) -> bool {
        lock(&self.state).running
    }

    /// Puts an effector on the target until released.
    pub fn reach(&self, side: Side) {
        debug!("{} hand reaches for the target", side);
        *Self::hand_mut(&mut lock(&self.state), side) = Hand::Reaching;
    }

    /// Moves an effector back to its resting position.
    pub fn release(&self, side: Side) {
        let rest = match side {
            Side::Left => Self::LEFT_REST,
            Side::Right => Self::RIGHT_REST,
        };
        *Self::hand_mut(&mut lock(&self.state), side) = Hand::Resting(rest);
    }

    pub fn release_both(&self) {
        self.release(Side::Left);
        self.release(Side::Right);
    }

    /// Places an effector at a fixed position.
    pub fn place(&self, side: Side, position: Vec3) {
        *Self::hand_mut(&mut lock(&self.state), side) = Hand::Resting(position);
    }

    /// Hides a marker from the next snapshots; toggles back when called again.
    pub fn toggle_occlusion(&self, marker: MarkerId) -> bool {
        let mut state = lock(&self.state);
        if state.occluded.remove(&marker) {
            false
        } else {
            state.occluded.insert(marker)
        }
    }

    pub fn head_resets(&self) -> usize {
        lock(&self.state).head_resets
    }

    fn hand_mut(state: &mut RigState, side: Side) -> &mut Hand {
        match side {
            Side::Left => &mut state.left,
            Side::Right => &mut state.right,
        }
    }

    fn resolve(&self, hand: Hand) -> Vec3 {
        match (hand, &self.scene) {
            (Hand::Resting(at), _) => at,
            (Hand::Reaching, Some(scene)) => scene.target_position(),
            (Hand::Reaching, None) => TARGET_HOME,
        }
    }

    fn body_marker(index: usize) -> Vec3 {
        let spread = index as f64 * 0.01;
        [HEAD_HOME[0] + spread, HEAD_HOME[1] - 0.5 - spread, HEAD_HOME[2]]
    }
}

impl MotionCapture for SimRig {
    fn start(&self) -> Result<()> {
        lock(&self.state).running = true;
        debug!("sim rig streaming {} markers", self.profile.markers.len());
        Ok(())
    }

    fn stop(&self) {
        lock(&self.state).running = false;
    }

    fn markers(&self) -> BTreeMap<MarkerId, MarkerSample> {
        let state = lock(&self.state);
        let left = self.resolve(state.left);
        let right = self.resolve(state.right);
        self.profile
            .markers
            .iter()
            .enumerate()
            .filter(|(_, id)| !state.occluded.contains(id))
            .map(|(index, id)| {
                let sample = if !state.running {
                    MarkerSample::MISSING
                } else if *id == self.profile.left_finger {
                    MarkerSample { position: left, confidence: 1.0 }
                } else if *id == self.profile.right_finger {
                    MarkerSample { position: right, confidence: 1.0 }
                } else {
                    MarkerSample { position: Self::body_marker(index), confidence: 1.0 }
                };
                (*id, sample)
            })
            .collect()
    }

    fn marker_ids(&self) -> Vec<MarkerId> {
        self.profile.markers.clone()
    }

    fn head_position(&self) -> Vec3 {
        HEAD_HOME
    }

    fn reset_head(&self) {
        lock(&self.state).head_resets += 1;
    }

    fn effector(&self, side: Side) -> Vec3 {
        let state = lock(&self.state);
        match side {
            Side::Left => self.resolve(state.left),
            Side::Right => self.resolve(state.right),
        }
    }
}

/// Answers every suspension point of a running session.
///
/// Key waits are answered with the awaited key. Target waits make `hand`
/// reach for the target; it lets go again when the trial posts `POST_RUN`.
pub struct Autopilot {
    handle: JoinHandle<()>,
}

impl Autopilot {
    pub fn spawn(engine: &LabEngine, rig: Arc<SimRig>, hand: Side) -> Self {
        let mut system_rx = engine.subscribe_system_events();
        let mut lifecycle_rx = engine.subscribe_lifecycle_events();
        let engine = engine.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = system_rx.recv() => match event {
                        Ok(SystemEvent::AwaitingKey { key }) => engine.press_key(key),
                        Ok(SystemEvent::AwaitingSignal) => rig.reach(hand),
                        Ok(_) => {}
                        Err(RecvError::Lagged(n)) => debug!("autopilot skipped {} system events", n),
                        Err(RecvError::Closed) => break,
                    },
                    event = lifecycle_rx.recv() => match event {
                        Ok(event) if event.is(TaskKind::Trial, Stage::PostRun) => rig.release(hand),
                        Ok(_) => {}
                        Err(RecvError::Lagged(n)) => debug!("autopilot skipped {} lifecycle events", n),
                        Err(RecvError::Closed) => break,
                    },
                }
            }
        });
        Self { handle }
    }

    pub fn stop(self) {
        self.handle.abort();
    }
}
