use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

use super::{AssetSource, ConfigStore, NoteStore, PinStore, StoreDocument};
use crate::error::{AssetError, StoreError};
use crate::geometry::MeshData;
use crate::loader::PartAsset;
use crate::model::{
    Layer, LayerId, Model, ModelId, Note, NoteDraft, NoteId, Part, Pin, PinDraft, PinId, PinPatch,
    UserId,
};

/// Store operations that can have a failure injected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    FetchPins,
    CreatePin,
    UpdatePin,
    DeletePin,
    FetchNotes,
    CreateNote,
    DeleteNote,
    FetchModel,
    ReadLayers,
    ReadParts,
    WriteLayer,
}

/// In-process backend over a [`StoreDocument`].
///
/// Failures can be queued per operation with [`MemoryBackend::fail_next`];
/// each queued error is returned once, in order.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    doc: Mutex<StoreDocument>,
    faults: Mutex<HashMap<StoreOp, Vec<StoreError>>>,
    calls: Mutex<HashMap<StoreOp, usize>>,
}

impl MemoryBackend {
    pub fn new(doc: StoreDocument) -> Self {
        Self {
            doc: Mutex::new(doc),
            ..Default::default()
        }
    }

    pub fn demo() -> Self {
        Self::new(StoreDocument::demo())
    }

    /// Make the next call of `op` fail with `err`
    pub fn fail_next(&self, op: StoreOp, err: StoreError) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.entry(op).or_default().push(err);
        }
    }

    /// Number of times `op` has been invoked, failed or not
    pub fn calls(&self, op: StoreOp) -> usize {
        self.calls
            .lock()
            .map(|calls| calls.get(&op).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    /// Copy of the current document
    pub fn snapshot(&self) -> Result<StoreDocument, StoreError> {
        Ok(self.doc()?.clone())
    }

    fn doc(&self) -> Result<MutexGuard<'_, StoreDocument>, StoreError> {
        self.doc
            .lock()
            .map_err(|_| StoreError::Io("memory store lock poisoned".to_string()))
    }

    /// Count the call and pop an injected failure, if any
    fn enter(&self, op: StoreOp) -> Result<(), StoreError> {
        if let Ok(mut calls) = self.calls.lock() {
            *calls.entry(op).or_default() += 1;
        }
        let mut faults = self
            .faults
            .lock()
            .map_err(|_| StoreError::Io("memory store lock poisoned".to_string()))?;
        match faults.get_mut(&op) {
            Some(queue) if !queue.is_empty() => {
                let err = queue.remove(0);
                debug!(?op, error = %err, "Injected store failure");
                Err(err)
            }
            _ => Ok(()),
        }
    }
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
impl PinStore for MemoryBackend {
    async fn fetch_pins(&self, model: &ModelId) -> Result<Vec<Pin>, StoreError> {
        self.enter(StoreOp::FetchPins)?;
        Ok(self.doc()?.pins_for(model))
    }

    async fn create_pin(&self, model: &ModelId, draft: PinDraft) -> Result<Pin, StoreError> {
        self.enter(StoreOp::CreatePin)?;
        self.doc()?.insert_pin(model, draft)
    }

    async fn update_pin(&self, id: &PinId, patch: PinPatch) -> Result<Pin, StoreError> {
        self.enter(StoreOp::UpdatePin)?;
        self.doc()?.replace_pin(id, patch)
    }

    async fn delete_pin(&self, id: &PinId) -> Result<(), StoreError> {
        self.enter(StoreOp::DeletePin)?;
        self.doc()?.remove_pin(id)
    }
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
impl NoteStore for MemoryBackend {
    async fn fetch_notes(&self, model: &ModelId, owner: &UserId) -> Result<Vec<Note>, StoreError> {
        self.enter(StoreOp::FetchNotes)?;
        Ok(self.doc()?.notes_for(model, owner))
    }

    async fn create_note(&self, model: &ModelId, draft: NoteDraft) -> Result<Note, StoreError> {
        self.enter(StoreOp::CreateNote)?;
        self.doc()?.insert_note(model, draft)
    }

    async fn delete_note(&self, id: &NoteId) -> Result<(), StoreError> {
        self.enter(StoreOp::DeleteNote)?;
        self.doc()?.remove_note(id)
    }
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
impl ConfigStore for MemoryBackend {
    async fn fetch_model(&self, model: &ModelId) -> Result<Model, StoreError> {
        self.enter(StoreOp::FetchModel)?;
        Ok(self.doc()?.model(model)?.clone())
    }

    async fn read_layer_config(&self, model: &ModelId) -> Result<Vec<Layer>, StoreError> {
        self.enter(StoreOp::ReadLayers)?;
        self.doc()?.layer_config(model)
    }

    async fn read_part_list(&self, model: &ModelId) -> Result<Vec<Part>, StoreError> {
        self.enter(StoreOp::ReadParts)?;
        self.doc()?.part_list(model)
    }

    async fn write_layer_visibility(
        &self,
        model: &ModelId,
        layer: &LayerId,
        visible: bool,
    ) -> Result<(), StoreError> {
        self.enter(StoreOp::WriteLayer)?;
        self.doc()?.set_layer_visibility(model, layer, visible)
    }
}

/// Headless asset source: every registered source decodes to a mesh.
///
/// Sources listed with [`MemoryAssets::fail`] return a fetch error.
#[derive(Debug, Default)]
pub struct MemoryAssets {
    meshes: HashMap<String, Arc<MeshData>>,
    fallback: Option<Arc<MeshData>>,
    failing: Mutex<HashSet<String>>,
    loads: AtomicUsize,
}

impl MemoryAssets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode any unregistered source to `mesh`
    pub fn with_default_mesh(mut self, mesh: MeshData) -> Self {
        self.fallback = Some(Arc::new(mesh));
        self
    }

    pub fn insert(&mut self, source: impl Into<String>, mesh: MeshData) {
        self.meshes.insert(source.into(), Arc::new(mesh));
    }

    pub fn fail(&self, source: impl Into<String>) {
        if let Ok(mut failing) = self.failing.lock() {
            failing.insert(source.into());
        }
    }

    pub fn heal(&self, source: &str) {
        if let Ok(mut failing) = self.failing.lock() {
            failing.remove(source);
        }
    }

    /// Load attempts served so far
    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
impl AssetSource for MemoryAssets {
    type Handle = ();

    async fn load_part(&self, source: &str) -> Result<PartAsset<()>, AssetError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failing
            .lock()
            .map(|f| f.contains(source))
            .unwrap_or(false);
        if failing {
            return Err(AssetError::Fetch {
                source_ref: source.to_string(),
                reason: "unavailable".to_string(),
            });
        }
        let mesh = self
            .meshes
            .get(source)
            .or(self.fallback.as_ref())
            .cloned()
            .ok_or_else(|| AssetError::Fetch {
                source_ref: source.to_string(),
                reason: "not found".to_string(),
            })?;
        if mesh.is_empty() {
            return Err(AssetError::Empty(source.to_string()));
        }
        Ok(PartAsset {
            handle: (),
            meshes: vec![mesh],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::sphere;
    use crate::model::PinContent;
    use glam::Vec3;

    #[tokio::test]
    async fn test_injected_failure_is_one_shot() {
        let backend = MemoryBackend::demo();
        let heart = ModelId::new("heart-3d");
        backend.fail_next(StoreOp::FetchPins, StoreError::Timeout);
        assert_eq!(backend.fetch_pins(&heart).await, Err(StoreError::Timeout));
        assert_eq!(backend.fetch_pins(&heart).await, Ok(vec![]));
        assert_eq!(backend.calls(StoreOp::FetchPins), 2);
    }

    #[tokio::test]
    async fn test_pin_crud() {
        let backend = MemoryBackend::demo();
        let heart = ModelId::new("heart-3d");
        let draft = PinContent {
            label: "Apex".to_string(),
            ..PinContent::default()
        }
        .at(Vec3::new(0.1, -1.0, 0.3));
        let pin = backend.create_pin(&heart, draft).await.unwrap();

        let mut patch = PinPatch::from(&pin);
        patch.label = "Cardiac apex".to_string();
        let updated = backend.update_pin(&pin.id, patch).await.unwrap();
        assert_eq!(updated.label, "Cardiac apex");

        backend.delete_pin(&pin.id).await.unwrap();
        assert!(matches!(
            backend.delete_pin(&pin.id).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_layer_write_is_read_back() {
        let backend = MemoryBackend::demo();
        let arm = ModelId::new("arm");
        backend
            .write_layer_visibility(&arm, &LayerId::new("muscles"), true)
            .await
            .unwrap();
        let layers = backend.read_layer_config(&arm).await.unwrap();
        assert!(layers.iter().all(|l| l.default_visible));
    }

    #[tokio::test]
    async fn test_memory_assets() {
        let assets = MemoryAssets::new().with_default_mesh(sphere(1.0, 8, 4));
        assert!(assets.load_part("arm/bicep.glb").await.is_ok());
        assets.fail("arm/tricep.glb");
        assert!(assets.load_part("arm/tricep.glb").await.is_err());
        assert_eq!(assets.loads(), 2);
    }
}
