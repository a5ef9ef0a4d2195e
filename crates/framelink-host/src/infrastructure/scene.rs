//! In-memory scene used by the stand-alone host.
//!
//! Holds a pose per camera and per actor.  An embedding render host replaces
//! this with a [`SceneRig`] that moves its real scene objects.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use framelink_core::{Rotation, TransformKind, Vector3};
use tracing::debug;

use crate::application::command_handlers::SceneRig;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Pose {
    pub location: Vector3,
    pub rotation: Rotation,
}

#[derive(Default)]
pub struct InMemoryScene {
    objects: Mutex<BTreeMap<(Kind, String), Pose>>,
}

/// `TransformKind` has no `Ord`; the map needs one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Kind {
    Camera,
    Actor,
}

impl From<TransformKind> for Kind {
    fn from(kind: TransformKind) -> Self {
        match kind {
            TransformKind::Camera => Kind::Camera,
            TransformKind::Actor => Kind::Actor,
        }
    }
}

impl InMemoryScene {
    pub fn new() -> Self {
        Self::default()
    }

    /// A scene with one camera per id, all at the origin.
    pub fn with_cameras<'a>(ids: impl IntoIterator<Item = &'a str>) -> Self {
        let scene = Self::new();
        for id in ids {
            scene.add(TransformKind::Camera, id);
        }
        scene
    }

    fn objects(&self) -> MutexGuard<'_, BTreeMap<(Kind, String), Pose>> {
        self.objects.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add(&self, kind: TransformKind, id: &str) {
        self.objects().entry((kind.into(), id.to_string())).or_default();
    }

    pub fn pose(&self, kind: TransformKind, id: &str) -> Option<Pose> {
        self.objects().get(&(kind.into(), id.to_string())).copied()
    }
}

impl SceneRig for InMemoryScene {
    fn ids(&self, kind: TransformKind) -> Vec<String> {
        let kind = Kind::from(kind);
        self.objects()
            .keys()
            .filter(|(k, _)| *k == kind)
            .map(|(_, id)| id.clone())
            .collect()
    }

    fn set_pose(
        &self,
        kind: TransformKind,
        id: &str,
        location: Vector3,
        rotation: Rotation,
    ) -> Result<(), String> {
        let mut objects = self.objects();
        let pose = objects
            .get_mut(&(kind.into(), id.to_string()))
            .ok_or_else(|| format!("no {kind:?} named `{id}`"))?;
        *pose = Pose { location, rotation };
        debug!(?kind, id, x = location.x, y = location.y, z = location.z, "pose updated");
        Ok(())
    }
}
