//! Persistence and asset collaborators consumed by the viewer.
//!
//! The viewer never awaits these directly; requests are executed by a
//! driver (see [`crate::driver`]) and their results fed back as completions.

mod document;
mod file;
mod memory;

pub use document::StoreDocument;
pub use file::FileBackend;
pub use memory::{MemoryAssets, MemoryBackend, StoreOp};

use async_trait::async_trait;

use crate::error::{AssetError, StoreError};
use crate::loader::PartAsset;
use crate::model::{
    Layer, LayerId, Model, ModelId, Note, NoteDraft, NoteId, Part, Pin, PinDraft, PinId, PinPatch,
    UserId,
};

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
pub trait PinStore {
    async fn fetch_pins(&self, model: &ModelId) -> Result<Vec<Pin>, StoreError>;

    async fn create_pin(&self, model: &ModelId, draft: PinDraft) -> Result<Pin, StoreError>;

    /// Replace every editable field of a pin
    async fn update_pin(&self, id: &PinId, patch: PinPatch) -> Result<Pin, StoreError>;

    async fn delete_pin(&self, id: &PinId) -> Result<(), StoreError>;
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
pub trait NoteStore {
    /// Notes of one owner for a model; never returns other users' notes
    async fn fetch_notes(&self, model: &ModelId, owner: &UserId) -> Result<Vec<Note>, StoreError>;

    async fn create_note(&self, model: &ModelId, draft: NoteDraft) -> Result<Note, StoreError>;

    async fn delete_note(&self, id: &NoteId) -> Result<(), StoreError>;
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
pub trait ConfigStore {
    async fn fetch_model(&self, model: &ModelId) -> Result<Model, StoreError>;

    /// Layers with their persisted visibility applied
    async fn read_layer_config(&self, model: &ModelId) -> Result<Vec<Layer>, StoreError>;

    async fn read_part_list(&self, model: &ModelId) -> Result<Vec<Part>, StoreError>;

    async fn write_layer_visibility(
        &self,
        model: &ModelId,
        layer: &LayerId,
        visible: bool,
    ) -> Result<(), StoreError>;
}

/// Resolves a part's source reference to decoded geometry
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
pub trait AssetSource {
    type Handle;

    async fn load_part(&self, source: &str) -> Result<PartAsset<Self::Handle>, AssetError>;
}

/// Everything the viewer persists through
pub trait Backend: PinStore + NoteStore + ConfigStore {}

impl<T: PinStore + NoteStore + ConfigStore + ?Sized> Backend for T {}
