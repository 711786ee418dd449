use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

use super::{ConfigStore, NoteStore, PinStore, StoreDocument};
use crate::error::StoreError;
use crate::model::{
    Layer, LayerId, Model, ModelId, Note, NoteDraft, NoteId, Part, Pin, PinDraft, PinId, PinPatch,
    UserId,
};

/// Backend persisted as a single JSON document on disk.
///
/// The whole document is rewritten after every successful mutation.
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    doc: Mutex<StoreDocument>,
}

impl FileBackend {
    /// Open `path`, or seed it with `seed` when it does not exist yet
    pub fn open_or_seed(path: impl AsRef<Path>, seed: StoreDocument) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let doc = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            let doc: StoreDocument = serde_json::from_str(&content)?;
            info!(
                path = %path.display(),
                models = doc.models.len(),
                pins = doc.pins.len(),
                "Loaded data file"
            );
            doc
        } else {
            info!(path = %path.display(), "Data file not found, seeding");
            save(&path, &seed)?;
            seed
        };
        Ok(Self {
            path,
            doc: Mutex::new(doc),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn doc(&self) -> Result<MutexGuard<'_, StoreDocument>, StoreError> {
        self.doc
            .lock()
            .map_err(|_| StoreError::Io("data file lock poisoned".to_string()))
    }

    /// Run a mutation and persist the document if it succeeded
    fn mutate<T>(
        &self,
        f: impl FnOnce(&mut StoreDocument) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut doc = self.doc()?;
        let mut next = doc.clone();
        let value = f(&mut next)?;
        save(&self.path, &next)?;
        *doc = next;
        Ok(value)
    }
}

fn save(path: &Path, doc: &StoreDocument) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let content = serde_json::to_string_pretty(doc)?;
    std::fs::write(path, content)?;
    debug!(path = %path.display(), "Saved data file");
    Ok(())
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
impl PinStore for FileBackend {
    async fn fetch_pins(&self, model: &ModelId) -> Result<Vec<Pin>, StoreError> {
        Ok(self.doc()?.pins_for(model))
    }

    async fn create_pin(&self, model: &ModelId, draft: PinDraft) -> Result<Pin, StoreError> {
        self.mutate(|doc| doc.insert_pin(model, draft))
    }

    async fn update_pin(&self, id: &PinId, patch: PinPatch) -> Result<Pin, StoreError> {
        self.mutate(|doc| doc.replace_pin(id, patch))
    }

    async fn delete_pin(&self, id: &PinId) -> Result<(), StoreError> {
        self.mutate(|doc| doc.remove_pin(id))
    }
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
impl NoteStore for FileBackend {
    async fn fetch_notes(&self, model: &ModelId, owner: &UserId) -> Result<Vec<Note>, StoreError> {
        Ok(self.doc()?.notes_for(model, owner))
    }

    async fn create_note(&self, model: &ModelId, draft: NoteDraft) -> Result<Note, StoreError> {
        self.mutate(|doc| doc.insert_note(model, draft))
    }

    async fn delete_note(&self, id: &NoteId) -> Result<(), StoreError> {
        self.mutate(|doc| doc.remove_note(id))
    }
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
impl ConfigStore for FileBackend {
    async fn fetch_model(&self, model: &ModelId) -> Result<Model, StoreError> {
        Ok(self.doc()?.model(model)?.clone())
    }

    async fn read_layer_config(&self, model: &ModelId) -> Result<Vec<Layer>, StoreError> {
        self.doc()?.layer_config(model)
    }

    async fn read_part_list(&self, model: &ModelId) -> Result<Vec<Part>, StoreError> {
        self.doc()?.part_list(model)
    }

    async fn write_layer_visibility(
        &self,
        model: &ModelId,
        layer: &LayerId,
        visible: bool,
    ) -> Result<(), StoreError> {
        self.mutate(|doc| doc.set_layer_visibility(model, layer, visible))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PinContent;
    use glam::Vec3;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_seeds_missing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data/viewer.json");
        let backend = FileBackend::open_or_seed(&path, StoreDocument::demo()).unwrap();
        assert!(path.exists());
        assert_eq!(
            backend.fetch_model(&ModelId::new("arm")).await.unwrap().parts.len(),
            6
        );
    }

    #[tokio::test]
    async fn test_mutations_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("viewer.json");
        let heart = ModelId::new("heart-3d");
        {
            let backend = FileBackend::open_or_seed(&path, StoreDocument::demo()).unwrap();
            let draft = PinContent {
                label: "Apex".to_string(),
                ..PinContent::default()
            }
            .at(Vec3::new(0.0, -1.0, 0.2));
            backend.create_pin(&heart, draft).await.unwrap();
            backend
                .write_layer_visibility(&ModelId::new("arm"), &LayerId::new("muscles"), true)
                .await
                .unwrap();
        }
        let reopened = FileBackend::open_or_seed(&path, StoreDocument::new()).unwrap();
        let pins = reopened.fetch_pins(&heart).await.unwrap();
        assert_eq!(pins.len(), 1);
        assert_eq!(pins[0].label, "Apex");
        let layers = reopened.read_layer_config(&ModelId::new("arm")).await.unwrap();
        assert!(layers.iter().all(|l| l.default_visible));
    }

    #[tokio::test]
    async fn test_failed_mutation_leaves_document_untouched() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("viewer.json");
        let backend = FileBackend::open_or_seed(&path, StoreDocument::demo()).unwrap();
        let before = std::fs::read_to_string(&path).unwrap();
        assert!(backend.delete_pin(&PinId::new("nope")).await.is_err());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), before);
    }
}
