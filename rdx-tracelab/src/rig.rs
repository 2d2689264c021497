//! Narrow interfaces to the two external collaborators of a session.
//!
//! The run-phase core never talks to a renderer or a motion-capture SDK
//! directly. It consumes a [`Scene`] (target placement and motion, line
//! visuals, cues) and a [`MotionCapture`] source (marker samples, head pose,
//! fingertip effectors). `crate::sim` provides in-process versions of both.

use crate::common::{MarkerId, Side, Vec3, VisualId};
use crate::error::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;

/// A live sample of one motion-capture marker.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarkerSample {
    pub position: Vec3,
    /// Tracking confidence; values `<= 0` mean the marker is not visible.
    pub confidence: f64,
}

impl MarkerSample {
    /// Stand-in recorded for a marker that produced no sample.
    pub const MISSING: MarkerSample = MarkerSample {
        position: [0.0, 0.0, 0.0],
        confidence: -1.0,
    };
}

/// An RGB colour with components in `0.0..=1.0`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Color(pub f64, pub f64, pub f64);

impl Color {
    pub const BLACK: Color = Color(0.0, 0.0, 0.0);
    pub const WHITE: Color = Color(1.0, 1.0, 1.0);
    pub const RED: Color = Color(1.0, 0.0, 0.0);
    pub const GREEN: Color = Color(0.0, 1.0, 0.0);
    pub const BLUE: Color = Color(0.0, 0.0, 1.0);

    /// Colour of the trace drawn for a tracing hand.
    pub fn for_side(side: Side) -> Color {
        match side {
            Side::Left => Color::RED,
            Side::Right => Color::GREEN,
        }
    }
}

/// Audible cues played at notable moments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cue {
    /// A trial is about to show its path.
    TrialStart,
    /// A block is ready and waits for the operator.
    BlockStart,
    /// An effector touched the target.
    Contact,
}

/// The rendering collaborator.
#[async_trait]
pub trait Scene: Send + Sync {
    fn target_position(&self) -> Vec3;

    fn set_target_position(&self, position: Vec3);

    /// Moves the target in a straight line to `position` at `speed` m/s and
    /// resolves once it arrives.
    async fn move_target_to(&self, position: Vec3, speed: f64);

    fn set_target_color(&self, color: Color);

    /// Draws a closed line through `points`.
    fn add_polyline(&self, points: &[Vec3], color: Color) -> VisualId;

    /// Loads a named environment model.
    fn add_environment(&self, model: &str) -> VisualId;

    /// Removes a visual. Unknown ids are ignored.
    fn remove_visual(&self, id: VisualId);

    fn play_cue(&self, cue: Cue);
}

/// The motion-capture collaborator.
pub trait MotionCapture: Send + Sync {
    /// Starts the background sampling thread.
    fn start(&self) -> Result<()>;

    fn stop(&self);

    /// Latest sample of every tracked marker, ordered by marker id.
    fn markers(&self) -> BTreeMap<MarkerId, MarkerSample>;

    /// Ids of every tracked marker, in column order.
    fn marker_ids(&self) -> Vec<MarkerId> {
        self.markers().into_keys().collect()
    }

    fn head_position(&self) -> Vec3;

    /// Makes the current head pose the reference pose.
    fn reset_head(&self);

    /// Current position of a fingertip effector.
    fn effector(&self, side: Side) -> Vec3;
}
