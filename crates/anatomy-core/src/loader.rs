//! On-demand streaming of authored model parts, grouped into layers

use glam::Mat4;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{AssetError, ViewerError};
use crate::geometry::MeshData;
use crate::model::{Layer, LayerId, Part, PartId};
use crate::raycast::{Surface, SurfaceOwner};

/// A decoded part asset. `H` is the renderer's handle type (a Bevy
/// `Handle<Gltf>` in the app, `()` in headless use).
#[derive(Debug, Clone)]
pub struct PartAsset<H> {
    pub handle: H,
    /// Triangles in part-local space, used for picking
    pub meshes: Vec<Arc<MeshData>>,
}

/// Lifecycle of a single part
#[derive(Debug, Clone, PartialEq)]
pub enum PartState {
    Unloaded,
    Loading { ticket: u64 },
    Loaded,
    Failed(AssetError),
}

/// Ask the asset source to fetch and decode one part
#[derive(Debug, Clone, PartialEq)]
pub struct LoadRequest {
    pub part_id: PartId,
    pub source: String,
    pub generation: u64,
    pub ticket: u64,
}

/// Outcome of a [`LoadRequest`]
#[derive(Debug)]
pub struct LoadCompletion<H> {
    pub part_id: PartId,
    pub generation: u64,
    pub ticket: u64,
    pub result: Result<PartAsset<H>, AssetError>,
}

impl LoadRequest {
    pub fn complete<H>(&self, result: Result<PartAsset<H>, AssetError>) -> LoadCompletion<H> {
        LoadCompletion {
            part_id: self.part_id.clone(),
            generation: self.generation,
            ticket: self.ticket,
            result,
        }
    }
}

/// Aggregate load state of one layer's parts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerState {
    Hidden,
    Visible,
    Loading { pending: usize, total: usize },
    PartiallyFailed { failed: usize, total: usize },
}

#[derive(Debug)]
struct PartEntry {
    part: Part,
    state: PartState,
}

/// Streams parts and tracks which are shown.
///
/// Decoded assets live in an arena keyed by part id; visibility is a
/// separate membership set. Hiding a part only removes it from the set,
/// so showing it again never re-fetches.
#[derive(Debug)]
pub struct PartLoader<H> {
    generation: u64,
    next_ticket: u64,
    order: Vec<PartId>,
    parts: HashMap<PartId, PartEntry>,
    layers: Vec<Layer>,
    members: HashMap<LayerId, Vec<PartId>>,
    /// Every layer a part belongs to, by its own layer id or a member list
    owners: HashMap<PartId, Vec<LayerId>>,
    layer_visible: HashMap<LayerId, bool>,
    arena: HashMap<PartId, PartAsset<H>>,
    visible: HashSet<PartId>,
    pickable: Vec<Surface>,
    load_calls: usize,
    pickable_rebuilds: usize,
    disposed: bool,
}

impl<H> Default for PartLoader<H> {
    fn default() -> Self {
        Self {
            generation: 0,
            next_ticket: 0,
            order: Vec::new(),
            parts: HashMap::new(),
            layers: Vec::new(),
            members: HashMap::new(),
            owners: HashMap::new(),
            layer_visible: HashMap::new(),
            arena: HashMap::new(),
            visible: HashSet::new(),
            pickable: Vec::new(),
            load_calls: 0,
            pickable_rebuilds: 0,
            disposed: false,
        }
    }
}

impl<H> PartLoader<H> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record part and layer metadata. No geometry is requested.
    ///
    /// Parts whose layer is not configured get an implicit, visible layer.
    pub fn initialize(&mut self, parts: Vec<Part>, layers: Vec<Layer>) {
        self.reset();
        self.generation += 1;
        self.disposed = false;

        let mut layers = layers;
        for part in &parts {
            if !layers.iter().any(|l| l.id == part.layer_id) {
                layers.push(Layer {
                    id: part.layer_id.clone(),
                    label: part.layer_id.to_string(),
                    part_ids: Vec::new(),
                    default_visible: true,
                });
            }
        }

        for layer in &layers {
            let mut seen = HashSet::new();
            let ids: Vec<PartId> = parts
                .iter()
                .filter(|p| p.layer_id == layer.id || layer.part_ids.contains(&p.id))
                .filter(|p| seen.insert(p.id.clone()))
                .map(|p| p.id.clone())
                .collect();
            for id in &ids {
                self.owners.entry(id.clone()).or_default().push(layer.id.clone());
            }
            self.members.insert(layer.id.clone(), ids);
            self.layer_visible.insert(layer.id.clone(), layer.default_visible);
        }

        for part in parts {
            if self.parts.contains_key(&part.id) {
                warn!(part = %part.id, "Duplicate part id in part list, keeping the first");
                continue;
            }
            self.order.push(part.id.clone());
            self.parts.insert(
                part.id.clone(),
                PartEntry {
                    part,
                    state: PartState::Unloaded,
                },
            );
        }
        self.layers = layers;

        info!(
            parts = self.order.len(),
            layers = self.layers.len(),
            generation = self.generation,
            "Part loader initialized"
        );
    }

    /// Request every part that is visible by default.
    ///
    /// A part starts visible when the part itself and at least one of its
    /// layers are default-visible.
    pub fn load_all_visible(&mut self) -> Vec<LoadRequest> {
        if self.disposed {
            return Vec::new();
        }
        let wanted: Vec<PartId> = self
            .order
            .iter()
            .filter(|id| {
                self.parts
                    .get(*id)
                    .is_some_and(|entry| entry.part.default_visible && self.any_owner_visible(id))
            })
            .cloned()
            .collect();

        let mut requests = Vec::new();
        for id in wanted {
            self.visible.insert(id.clone());
            requests.extend(self.request_if_needed(&id));
        }
        self.rebuild_pickable();
        requests
    }

    /// Show or hide every part of a layer.
    ///
    /// This is the only way layer visibility changes. Showing loads parts
    /// that were never fetched; hiding keeps decoded assets cached. A part
    /// shared with another layer stays shown while that layer is on.
    pub fn set_layer_visible(
        &mut self,
        layer: &LayerId,
        visible: bool,
    ) -> Result<Vec<LoadRequest>, ViewerError> {
        if self.disposed {
            return Err(ViewerError::NotMounted);
        }
        let members = self
            .members
            .get(layer)
            .cloned()
            .ok_or_else(|| ViewerError::UnknownLayer(layer.clone()))?;
        self.layer_visible.insert(layer.clone(), visible);

        let mut requests = Vec::new();
        for id in members {
            if visible {
                self.visible.insert(id.clone());
                requests.extend(self.request_if_needed(&id));
            } else if !self.any_owner_visible(&id) {
                self.visible.remove(&id);
            }
        }
        self.rebuild_pickable();
        debug!(layer = %layer, visible, requests = requests.len(), "Layer visibility set");
        Ok(requests)
    }

    /// Apply a load result. Stale or cancelled completions are ignored.
    pub fn finish(&mut self, completion: LoadCompletion<H>) -> bool {
        if self.disposed || completion.generation != self.generation {
            debug!(
                part = %completion.part_id,
                generation = completion.generation,
                "Dropping part load from a previous generation"
            );
            return false;
        }
        let Some(entry) = self.parts.get_mut(&completion.part_id) else {
            return false;
        };
        if entry.state != (PartState::Loading { ticket: completion.ticket }) {
            debug!(part = %completion.part_id, "Dropping superseded part load");
            return false;
        }

        match completion.result {
            Ok(asset) => {
                entry.state = PartState::Loaded;
                info!(
                    part = %completion.part_id,
                    meshes = asset.meshes.len(),
                    "Part loaded"
                );
                self.arena.insert(completion.part_id, asset);
            }
            Err(err) => {
                warn!(part = %completion.part_id, error = %err, "Part failed to load");
                entry.state = PartState::Failed(err);
            }
        }
        self.rebuild_pickable();
        true
    }

    /// Re-issue the load of a failed part
    pub fn retry(&mut self, part_id: &PartId) -> Result<Option<LoadRequest>, ViewerError> {
        if self.disposed {
            return Err(ViewerError::NotMounted);
        }
        let entry = self
            .parts
            .get_mut(part_id)
            .ok_or_else(|| ViewerError::UnknownPart(part_id.clone()))?;
        if !matches!(entry.state, PartState::Failed(_)) {
            return Ok(None);
        }
        entry.state = PartState::Unloaded;
        if self.visible.contains(part_id) {
            Ok(self.request_if_needed(part_id))
        } else {
            Ok(None)
        }
    }

    fn any_owner_visible(&self, id: &PartId) -> bool {
        self.owners.get(id).is_some_and(|layers| {
            layers
                .iter()
                .any(|layer| self.layer_visible.get(layer).copied().unwrap_or(false))
        })
    }

    fn request_if_needed(&mut self, id: &PartId) -> Option<LoadRequest> {
        let entry = self.parts.get_mut(id)?;
        if entry.state != PartState::Unloaded {
            return None;
        }
        self.next_ticket += 1;
        self.load_calls += 1;
        entry.state = PartState::Loading {
            ticket: self.next_ticket,
        };
        Some(LoadRequest {
            part_id: id.clone(),
            source: entry.part.source.clone(),
            generation: self.generation,
            ticket: self.next_ticket,
        })
    }

    fn rebuild_pickable(&mut self) {
        let mut surfaces = Vec::new();
        for id in &self.order {
            if !self.visible.contains(id) {
                continue;
            }
            let (Some(entry), Some(asset)) = (self.parts.get(id), self.arena.get(id)) else {
                continue;
            };
            let transform = entry.part.transform.to_mat4();
            surfaces.extend(
                asset
                    .meshes
                    .iter()
                    .map(|mesh| Surface::new(SurfaceOwner::Part(id.clone()), mesh.clone(), transform)),
            );
        }
        self.pickable = surfaces;
        self.pickable_rebuilds += 1;
    }

    /// Pickable surfaces of every visible, loaded part
    pub fn get_all_meshes(&self) -> &[Surface] {
        &self.pickable
    }

    /// Parts that are both visible and loaded, with their transforms
    pub fn attached(&self) -> impl Iterator<Item = (&PartId, Mat4)> {
        self.order.iter().filter_map(move |id| {
            let entry = self.parts.get(id)?;
            (self.visible.contains(id) && self.arena.contains_key(id))
                .then(|| (id, entry.part.transform.to_mat4()))
        })
    }

    pub fn asset(&self, id: &PartId) -> Option<&PartAsset<H>> {
        self.arena.get(id)
    }

    pub fn part(&self, id: &PartId) -> Option<&Part> {
        self.parts.get(id).map(|e| &e.part)
    }

    pub fn state(&self, id: &PartId) -> Option<&PartState> {
        self.parts.get(id).map(|e| &e.state)
    }

    pub fn is_visible(&self, id: &PartId) -> bool {
        self.visible.contains(id)
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn members(&self, layer: &LayerId) -> &[PartId] {
        self.members.get(layer).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_layer_visible(&self, layer: &LayerId) -> bool {
        self.layer_visible.get(layer).copied().unwrap_or(false)
    }

    /// Actual state of a layer derived from its parts
    pub fn layer_state(&self, layer: &LayerId) -> LayerState {
        if !self.is_layer_visible(layer) {
            return LayerState::Hidden;
        }
        let members = self.members(layer);
        let total = members.len();
        let mut pending = 0;
        let mut failed = 0;
        for id in members {
            match self.state(id) {
                Some(PartState::Loading { .. }) => pending += 1,
                Some(PartState::Failed(_)) => failed += 1,
                _ => {}
            }
        }
        if pending > 0 {
            LayerState::Loading { pending, total }
        } else if failed > 0 {
            LayerState::PartiallyFailed { failed, total }
        } else {
            LayerState::Visible
        }
    }

    pub fn failed_parts(&self) -> impl Iterator<Item = (&PartId, &AssetError)> {
        self.order.iter().filter_map(move |id| match self.state(id) {
            Some(PartState::Failed(err)) => Some((id, err)),
            _ => None,
        })
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Load requests issued since creation
    pub fn load_calls(&self) -> usize {
        self.load_calls
    }

    /// Times the pickable list has been recomputed
    pub fn pickable_rebuilds(&self) -> usize {
        self.pickable_rebuilds
    }

    pub fn has_parts(&self) -> bool {
        !self.order.is_empty()
    }

    fn reset(&mut self) {
        self.order.clear();
        self.parts.clear();
        self.layers.clear();
        self.members.clear();
        self.owners.clear();
        self.layer_visible.clear();
        self.arena.clear();
        self.visible.clear();
        self.pickable.clear();
    }

    /// Cancel in-flight loads and release every decoded asset
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        let released = self.arena.len();
        self.reset();
        self.disposed = true;
        self.generation += 1;
        info!(released, "Part loader disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }
}
