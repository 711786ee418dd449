//! Anatomy Core - Scene, picking and annotation logic for the anatomy viewer
//!
//! This crate holds everything the viewer does that does not need a GPU:
//! - Camera math, orbit controls and ray picking against triangle meshes
//! - A scene graph with frame subscribers for projecting 3D anchors to 2D
//! - On-demand part streaming grouped into toggleable layers
//! - Shared pins (professor-authored) and private student notes
//! - Procedural fallback geometry when a model has no authored parts
//! - Persistence traits with in-memory and JSON-file backends
//!
//! The renderer (`anatomy-viewer`) drives a [`Viewer`] and executes the
//! requests it queues.

pub mod camera;
pub mod config;
pub mod controls;
pub mod driver;
pub mod editor;
pub mod error;
pub mod geometry;
pub mod layers;
pub mod loader;
pub mod model;
pub mod notes;
pub mod pins;
pub mod procedural;
pub mod raycast;
pub mod scene;
pub mod store;
mod sync;
pub mod viewer;

pub use camera::{CameraMatrices, PerspectiveCamera, Viewport};
pub use config::{load_config, ViewerConfig};
pub use controls::OrbitControls;
pub use error::{AssetError, ConfigError, NoteError, PinError, StoreError, ViewerError};
pub use geometry::MeshData;
pub use loader::{LayerState, PartAsset, PartLoader};
pub use model::{
    Access, EditGrant, Layer, LayerId, Model, ModelId, Note, NoteId, Part, PartId, Pin,
    PinContent, PinId, ProjectedPoint, Role, UserId, ViewMode,
};
pub use raycast::{Hit, Ray, Surface, SurfaceOwner};
pub use scene::{FrameContext, FrameSubscriber, RenderSurface, SceneGraph};
pub use store::{AssetSource, Backend, FileBackend, MemoryAssets, MemoryBackend};
pub use viewer::{Completion, Request, Stamped, Viewer};
