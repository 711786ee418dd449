//! Mounted viewer session: lifecycle, request/completion plumbing and input routing
//!
//! Nothing here awaits. Every asynchronous call is queued as a [`Request`]
//! stamped with the mount epoch; the embedder executes it and hands the
//! result back through [`Viewer::apply`]. Results from an older epoch are
//! dropped.

use glam::{Vec2, Vec3};
use tracing::{debug, info, warn};

use crate::camera::Viewport;
use crate::config::ViewerConfig;
use crate::controls::OrbitControls;
use crate::editor::PinEditor;
use crate::error::{NoteError, PinError, StoreError, ViewerError};
use crate::layers::{LayerPanel, LayerRow, LayerWrite};
use crate::loader::{LoadCompletion, LoadRequest, PartLoader};
use crate::model::{
    Access, Layer, LayerId, Model, ModelId, NoteId, Part, PartId, PinContent, PinId, ViewMode,
};
use crate::notes::{NoteRequest, NoteResponse, StudentNotes};
use crate::pins::{PinRequest, PinResponse, PinSystem};
use crate::procedural::build_fallback;
use crate::raycast::{cast, Hit, Surface};
use crate::scene::{FrameSubscriber, NodeId, RenderSurface, SceneHost};

/// Camera position used when the model record cannot be fetched
pub const FALLBACK_CAMERA_POSITION: Vec3 = Vec3::new(0.0, 1.0, 6.0);

/// A value tagged with the mount epoch it belongs to
#[derive(Debug, Clone, PartialEq)]
pub struct Stamped<T> {
    pub epoch: u64,
    pub body: T,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StoreRequest {
    FetchModel(ModelId),
    ReadLayers(ModelId),
    ReadParts(ModelId),
    WriteLayer(ModelId, LayerWrite),
    Pins(PinRequest),
    Notes(NoteRequest),
}

#[derive(Debug, Clone, PartialEq)]
pub enum StoreResponse {
    Model(Result<Model, StoreError>),
    Layers(Result<Vec<Layer>, StoreError>),
    Parts(Result<Vec<Part>, StoreError>),
    LayerWritten(LayerWrite, Result<(), StoreError>),
    Pins(PinResponse),
    Notes(NoteResponse),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Store(StoreRequest),
    LoadPart(LoadRequest),
}

#[derive(Debug)]
pub enum Completion<H> {
    Store(StoreResponse),
    Part(LoadCompletion<H>),
}

/// State owned by one mount
#[derive(Debug)]
pub struct Session<H> {
    pub model_id: ModelId,
    model: Option<Model>,
    parts: Option<Vec<Part>>,
    layer_config: Option<Vec<Layer>>,
    ready: bool,
    viewport: Viewport,
    pub host: SceneHost,
    pub loader: PartLoader<H>,
    pub pins: PinSystem,
    pub notes: StudentNotes,
    pub layers: LayerPanel,
    pub editor: Option<PinEditor>,
    fallback: Option<NodeId>,
    last_hit: Option<Hit>,
}

impl<H> Session<H> {
    pub fn model(&self) -> Option<&Model> {
        self.model.as_ref()
    }

    /// True once the model is fetched and parts (or the fallback) are set up
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn uses_fallback(&self) -> bool {
        self.fallback.is_some()
    }

    pub fn last_hit(&self) -> Option<&Hit> {
        self.last_hit.as_ref()
    }

    /// Every surface a click can hit: loaded parts plus fallback shapes
    pub fn pickable(&self) -> Vec<Surface> {
        let mut surfaces = self.loader.get_all_meshes().to_vec();
        if let Some(graph) = self.host.graph() {
            surfaces.extend(graph.pickable_surfaces());
        }
        surfaces
    }

    fn sync_parts(&mut self) {
        if let Some(graph) = self.host.graph_mut() {
            graph.sync_parts(self.loader.attached());
        }
    }
}

/// The embeddable viewer: `mount`, `unmount`, `set_mode`
#[derive(Debug)]
pub struct Viewer<H> {
    config: ViewerConfig,
    access: Access,
    mode: ViewMode,
    epoch: u64,
    session: Option<Session<H>>,
    outbox: Vec<Stamped<Request>>,
    clock: f64,
    dropped: usize,
}

impl<H> Viewer<H> {
    pub fn new(config: ViewerConfig, access: Access) -> Self {
        Self {
            config,
            access,
            mode: ViewMode::View,
            epoch: 0,
            session: None,
            outbox: Vec::new(),
            clock: 0.0,
            dropped: 0,
        }
    }

    pub fn config(&self) -> &ViewerConfig {
        &self.config
    }

    pub fn access(&self) -> &Access {
        &self.access
    }

    pub fn mode(&self) -> ViewMode {
        self.mode
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn session(&self) -> Option<&Session<H>> {
        self.session.as_ref()
    }

    pub fn session_mut(&mut self) -> Option<&mut Session<H>> {
        self.session.as_mut()
    }

    pub fn is_mounted(&self) -> bool {
        self.session.is_some()
    }

    /// Completions discarded because their epoch was stale
    pub fn dropped_completions(&self) -> usize {
        self.dropped
    }

    fn queue(&mut self, request: Request) {
        self.outbox.push(Stamped {
            epoch: self.epoch,
            body: request,
        });
    }

    fn queue_store(&mut self, request: StoreRequest) {
        self.queue(Request::Store(request));
    }

    fn queue_loads(&mut self, loads: Vec<LoadRequest>) {
        for load in loads {
            self.queue(Request::LoadPart(load));
        }
    }

    /// Drain the requests issued since the last call
    pub fn take_requests(&mut self) -> Vec<Stamped<Request>> {
        std::mem::take(&mut self.outbox)
    }

    pub fn has_requests(&self) -> bool {
        !self.outbox.is_empty()
    }

    /// Start showing `model_id` in a container of the given size
    pub fn mount(
        &mut self,
        viewport: Viewport,
        model_id: ModelId,
        mode: ViewMode,
    ) -> Result<(), ViewerError> {
        if let Some(session) = &self.session {
            return Err(ViewerError::AlreadyMounted(session.model_id.to_string()));
        }
        let grant = self.access.edit_grant();
        if mode == ViewMode::Edit && grant.is_none() {
            return Err(ViewerError::EditNotPermitted);
        }

        self.epoch += 1;
        let mut pins = PinSystem::new(model_id.clone(), grant);
        pins.set_mode(mode)?;
        let notes = StudentNotes::new(model_id.clone(), self.access.user_id.clone());
        let editor = grant.map(|g| PinEditor::new(g, self.config.editor.fly_distance));

        let mut session = Session {
            model_id: model_id.clone(),
            model: None,
            parts: None,
            layer_config: None,
            ready: false,
            viewport,
            host: SceneHost::new(),
            loader: PartLoader::new(),
            pins,
            notes,
            layers: LayerPanel::new(self.config.persistence.clone()),
            editor,
            fallback: None,
            last_hit: None,
        };
        let fetch_pins = session.pins.request_fetch();
        let fetch_notes = session.notes.request_fetch();
        self.session = Some(session);
        self.mode = mode;

        self.queue_store(StoreRequest::FetchModel(model_id.clone()));
        self.queue_store(StoreRequest::ReadParts(model_id.clone()));
        self.queue_store(StoreRequest::ReadLayers(model_id.clone()));
        self.queue_store(StoreRequest::Pins(fetch_pins));
        self.queue_store(StoreRequest::Notes(fetch_notes));

        info!(
            model = %model_id,
            mode = ?mode,
            user = %self.access.user_id,
            epoch = self.epoch,
            "Viewer mounted"
        );
        Ok(())
    }

    /// Tear down the session. In-flight results of this mount are ignored.
    pub fn unmount(&mut self, surface: Option<&mut dyn RenderSurface>) {
        let Some(mut session) = self.session.take() else {
            debug!("Unmount without a mounted model");
            return;
        };
        session.host.dispose(surface);
        session.loader.dispose();
        self.epoch += 1;
        self.outbox.clear();
        info!(model = %session.model_id, "Viewer unmounted");
    }

    /// Switch between viewing and editing. Editing needs an edit grant.
    pub fn set_mode(&mut self, mode: ViewMode) -> Result<(), ViewerError> {
        if mode == ViewMode::Edit && self.access.edit_grant().is_none() {
            return Err(ViewerError::EditNotPermitted);
        }
        if let Some(session) = self.session.as_mut() {
            session.pins.set_mode(mode)?;
        }
        self.mode = mode;
        Ok(())
    }

    /// Apply the result of a request. Returns false when it was dropped.
    pub fn apply(&mut self, completion: Stamped<Completion<H>>) -> bool {
        if completion.epoch != self.epoch || self.session.is_none() {
            self.dropped += 1;
            debug!(
                epoch = completion.epoch,
                current = self.epoch,
                "Dropping completion from a previous mount"
            );
            return false;
        }
        match completion.body {
            Completion::Part(done) => {
                let Some(session) = self.session.as_mut() else {
                    return false;
                };
                let applied = session.loader.finish(done);
                session.sync_parts();
                applied
            }
            Completion::Store(response) => {
                self.apply_store(response);
                true
            }
        }
    }

    fn apply_store(&mut self, response: StoreResponse) {
        let now = self.clock;
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let mut follow_up = Vec::new();
        match response {
            StoreResponse::Model(result) => {
                let model = result.unwrap_or_else(|err| {
                    warn!(model = %session.model_id, error = %err, "Model fetch failed, using defaults");
                    Model {
                        id: session.model_id.clone(),
                        name: session.model_id.to_string(),
                        camera_position: FALLBACK_CAMERA_POSITION,
                        parts: Vec::new(),
                    }
                });
                if let Err(err) = session.host.initialize(session.viewport, &model, &self.config) {
                    warn!(model = %model.id, error = %err, "Scene initialization failed");
                }
                session.model = Some(model);
            }
            StoreResponse::Parts(result) => {
                session.parts = Some(result.unwrap_or_else(|err| {
                    warn!(model = %session.model_id, error = %err, "Part list unavailable");
                    Vec::new()
                }));
            }
            StoreResponse::Layers(result) => {
                session.layer_config = Some(result.unwrap_or_else(|err| {
                    warn!(model = %session.model_id, error = %err, "Layer configuration unavailable");
                    Vec::new()
                }));
            }
            StoreResponse::LayerWritten(write, result) => {
                if let Some(next) = session.layers.write_finished(&write, result, now) {
                    follow_up.push(Request::Store(StoreRequest::WriteLayer(
                        session.model_id.clone(),
                        next,
                    )));
                }
            }
            StoreResponse::Pins(response) => {
                if let Some(editor) = session.editor.as_mut() {
                    editor.apply(&response);
                }
                if let Some(next) = session.pins.apply(response) {
                    follow_up.push(Request::Store(StoreRequest::Pins(next)));
                }
            }
            StoreResponse::Notes(response) => {
                if let Some(next) = session.notes.apply(response) {
                    follow_up.push(Request::Store(StoreRequest::Notes(next)));
                }
            }
        }
        follow_up.extend(Self::finish_bootstrap(session).into_iter().map(Request::LoadPart));
        for request in follow_up {
            self.queue(request);
        }
    }

    /// Once model, part list and layers are known, set up parts or the fallback
    fn finish_bootstrap(session: &mut Session<H>) -> Vec<LoadRequest> {
        if session.ready || !session.host.is_running() {
            return Vec::new();
        }
        let (Some(_), Some(_)) = (&session.parts, &session.layer_config) else {
            return Vec::new();
        };
        session.ready = true;

        let mut parts = session.parts.take().unwrap_or_default();
        if parts.is_empty() {
            parts = session
                .model
                .as_ref()
                .map(|m| m.parts.clone())
                .unwrap_or_default();
        }
        let layers = session.layer_config.take().unwrap_or_default();

        if parts.is_empty() {
            if let Some(graph) = session.host.graph_mut() {
                let root = graph.root();
                session.fallback = Some(build_fallback(&session.model_id, graph, root));
            }
            return Vec::new();
        }

        session.loader.initialize(parts, layers);
        let loads = session.loader.load_all_visible();
        session.sync_parts();
        loads
    }

    /// Advance the clock, issue due retries and render one frame
    pub fn tick(&mut self, dt: f32, surface: &mut dyn RenderSurface) -> bool {
        self.clock += dt as f64;
        let now = self.clock;
        let Some(session) = self.session.as_mut() else {
            return false;
        };
        let model_id = session.model_id.clone();
        let due = session.layers.due_writes(now);

        let Session {
            host, pins, notes, ..
        } = session;
        let mut subscribers: [&mut dyn FrameSubscriber; 2] = [pins, notes];
        let rendered = host.tick(dt, surface, &mut subscribers);

        for write in due {
            self.queue_store(StoreRequest::WriteLayer(model_id.clone(), write));
        }
        rendered
    }

    pub fn resize(&mut self, width: f32, height: f32, surface: Option<&mut dyn RenderSurface>) {
        if let Some(session) = self.session.as_mut() {
            session.viewport = Viewport::new(width, height);
            session.host.resize(width, height, surface);
        }
    }

    pub fn controls_mut(&mut self) -> Option<&mut OrbitControls> {
        self.session.as_mut()?.host.controls_mut()
    }

    /// Ray-cast a click at a container pixel.
    ///
    /// In edit mode a hit becomes the pin candidate, otherwise the anchor
    /// for the next spatial note. A miss changes nothing.
    pub fn click(&mut self, pixel: Vec2) -> Option<Hit> {
        let session = self.session.as_mut()?;
        let ray = session.host.pick_ray(pixel)?;
        let hit = cast(&ray, &session.pickable());
        match &hit {
            Some(hit) => {
                debug!(owner = %hit.owner, distance = hit.distance, "Pick hit");
                match self.mode {
                    ViewMode::Edit => {
                        session.pins.place(Some(hit.point));
                    }
                    ViewMode::View => {
                        session.notes.place(Some(hit.point));
                    }
                }
                session.last_hit = Some(hit.clone());
            }
            None => debug!(x = pixel.x, y = pixel.y, "Pick missed"),
        }
        hit
    }

    fn mounted(&mut self) -> Result<&mut Session<H>, ViewerError> {
        self.session.as_mut().ok_or(ViewerError::NotMounted)
    }

    pub fn submit_pin(&mut self, content: PinContent) -> Result<(), PinError> {
        let session = self.session.as_mut().ok_or(PinError::ReadOnly)?;
        let request = session.pins.submit(content)?;
        self.queue_store(StoreRequest::Pins(request));
        Ok(())
    }

    pub fn refresh_pins(&mut self) -> Result<(), ViewerError> {
        let request = self.mounted()?.pins.request_fetch();
        self.queue_store(StoreRequest::Pins(request));
        Ok(())
    }

    pub fn begin_edit(&mut self, id: &PinId) -> Result<(), PinError> {
        let session = self.session.as_mut().ok_or(PinError::UnknownPin(id.clone()))?;
        let Session { editor, pins, .. } = session;
        editor.as_mut().ok_or(PinError::ReadOnly)?.begin_edit(pins, id)
    }

    pub fn commit_edit(&mut self) -> Result<(), PinError> {
        let session = self.session.as_mut().ok_or(PinError::NotEditing)?;
        let Session { editor, pins, .. } = session;
        let request = editor.as_mut().ok_or(PinError::ReadOnly)?.commit(pins)?;
        self.queue_store(StoreRequest::Pins(request));
        Ok(())
    }

    pub fn delete_pin(&mut self, id: &PinId) -> Result<(), PinError> {
        let session = self.session.as_mut().ok_or(PinError::UnknownPin(id.clone()))?;
        let Session { editor, pins, .. } = session;
        let request = editor.as_mut().ok_or(PinError::ReadOnly)?.delete(pins, id)?;
        self.queue_store(StoreRequest::Pins(request));
        Ok(())
    }

    pub fn fly_to_pin(&mut self, id: &PinId) -> Result<(), PinError> {
        let session = self.session.as_mut().ok_or(PinError::UnknownPin(id.clone()))?;
        let Session {
            editor, pins, host, ..
        } = session;
        let editor = editor.as_ref().ok_or(PinError::ReadOnly)?;
        match host.controls_mut() {
            Some(controls) => editor.fly_to(pins, id, controls),
            None => Ok(()),
        }
    }

    pub fn create_note(&mut self, body: &str, spatial: bool) -> Result<(), NoteError> {
        let session = self.session.as_mut().ok_or(NoteError::NoCandidate)?;
        let request = session.notes.create(body, spatial)?;
        self.queue_store(StoreRequest::Notes(request));
        Ok(())
    }

    pub fn retry_note(&mut self, slot: u64) -> bool {
        let Some(request) = self.session.as_mut().and_then(|s| s.notes.retry_draft(slot)) else {
            return false;
        };
        self.queue_store(StoreRequest::Notes(request));
        true
    }

    pub fn delete_note(&mut self, id: &NoteId) -> Result<(), NoteError> {
        let session = self.session.as_mut().ok_or(NoteError::UnknownNote(id.clone()))?;
        let request = session.notes.delete(id)?;
        self.queue_store(StoreRequest::Notes(request));
        Ok(())
    }

    pub fn refresh_notes(&mut self) -> Result<(), ViewerError> {
        let request = self.mounted()?.notes.request_fetch();
        self.queue_store(StoreRequest::Notes(request));
        Ok(())
    }

    /// Toggle a layer through the loader and persist it in the background
    pub fn toggle_layer(&mut self, layer: &LayerId, visible: bool) -> Result<(), ViewerError> {
        let session = self.mounted()?;
        let Session {
            layers, loader, ..
        } = &mut *session;
        let (loads, write) = layers.toggle(loader, layer, visible)?;
        session.sync_parts();
        let model_id = session.model_id.clone();
        self.queue_loads(loads);
        if let Some(write) = write {
            self.queue_store(StoreRequest::WriteLayer(model_id, write));
        }
        Ok(())
    }

    pub fn retry_layer_save(&mut self, layer: &LayerId) -> Result<(), ViewerError> {
        let session = self.mounted()?;
        let model_id = session.model_id.clone();
        if let Some(write) = session.layers.retry_unsaved(layer) {
            self.queue_store(StoreRequest::WriteLayer(model_id, write));
        }
        Ok(())
    }

    pub fn retry_part(&mut self, part: &PartId) -> Result<(), ViewerError> {
        if let Some(load) = self.mounted()?.loader.retry(part)? {
            self.queue(Request::LoadPart(load));
        }
        Ok(())
    }

    pub fn layer_rows(&self) -> Vec<LayerRow> {
        self.session
            .as_ref()
            .map(|s| s.layers.rows(&s.loader))
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{execute, settle};
    use crate::error::AssetError;
    use crate::geometry::sphere;
    use crate::loader::LayerState;
    use crate::model::Role;
    use crate::raycast::SurfaceOwner;
    use crate::scene::tests::RecordingSurface;
    use crate::store::{MemoryAssets, MemoryBackend, PinStore, StoreOp};
    use approx::assert_relative_eq;

    fn config() -> ViewerConfig {
        let mut config = ViewerConfig::default();
        config.controls.auto_rotate = false;
        config
    }

    fn professor() -> Viewer<()> {
        Viewer::new(config(), Access::new("prof-1", Role::Professor))
    }

    fn student() -> Viewer<()> {
        Viewer::new(config(), Access::new("student-1", Role::Student))
    }

    fn assets() -> MemoryAssets {
        MemoryAssets::new().with_default_mesh(sphere(0.3, 12, 8))
    }

    fn viewport() -> Viewport {
        Viewport::new(800.0, 600.0)
    }

    /// Pixel under the center of a fallback shape
    fn pixel_of(viewer: &Viewer<()>, name: &str) -> Vec2 {
        let session = viewer.session().unwrap();
        let surface = session
            .pickable()
            .into_iter()
            .find(|s| s.owner == SurfaceOwner::Fallback(name.to_string()))
            .unwrap();
        let center = surface.transform.transform_point3(Vec3::ZERO);
        let p = session.host.matrices().unwrap().project(center, viewport());
        Vec2::new(p.x, p.y)
    }

    #[tokio::test]
    async fn test_student_cannot_mount_in_edit_mode() {
        let mut viewer = student();
        assert_eq!(
            viewer.mount(viewport(), "heart-3d".into(), ViewMode::Edit),
            Err(ViewerError::EditNotPermitted)
        );
        assert!(!viewer.is_mounted());
        assert_eq!(viewer.set_mode(ViewMode::Edit), Err(ViewerError::EditNotPermitted));
    }

    #[tokio::test]
    async fn test_heart_pin_placement_and_reprojection() {
        let backend = MemoryBackend::demo();
        let assets = assets();
        let mut viewer = professor();
        viewer
            .mount(viewport(), "heart-3d".into(), ViewMode::Edit)
            .unwrap();
        settle(&mut viewer, &backend, &assets).await;
        assert!(viewer.session().unwrap().uses_fallback());

        let pixel = pixel_of(&viewer, "left-ventricle");
        let hit = viewer.click(pixel).unwrap();
        assert_eq!(hit.owner, SurfaceOwner::Fallback("left-ventricle".to_string()));

        viewer
            .submit_pin(PinContent {
                label: "Left ventricle".to_string(),
                pin_type: "chamber".to_string(),
                ..PinContent::default()
            })
            .unwrap();
        settle(&mut viewer, &backend, &assets).await;

        let pins = viewer.session().unwrap().pins.pins().to_vec();
        assert_eq!(pins.len(), 1);
        assert_eq!(pins[0].pin_type, "chamber");
        assert!(pins[0].position.distance(hit.point) < 1e-4);

        // The store holds the same pin
        let stored = backend.fetch_pins(&"heart-3d".into()).await.unwrap();
        assert_eq!(stored[0].label, "Left ventricle");
        assert!(stored[0].position.distance(hit.point) < 1e-4);

        // View mode after an orbit rotation
        viewer.set_mode(ViewMode::View).unwrap();
        viewer.controls_mut().unwrap().rotate(Vec2::new(120.0, -40.0));
        let mut surface = RecordingSurface::default();
        assert!(viewer.tick(1.0 / 60.0, &mut surface));

        let session = viewer.session().unwrap();
        let frame = session.host.last_frame().unwrap();
        let expected = frame.matrices.project(pins[0].position, frame.viewport);
        let marker = session.pins.projection(&pins[0].id).unwrap();
        assert_relative_eq!(marker.x, expected.x, epsilon = 1e-3);
        assert_relative_eq!(marker.y, expected.y, epsilon = 1e-3);
        assert!(marker.visible);
        assert!((marker.x - pixel.x).abs() > 1.0);
    }

    #[tokio::test]
    async fn test_view_mode_click_does_not_place_pins() {
        let backend = MemoryBackend::demo();
        let assets = assets();
        let mut viewer = professor();
        viewer
            .mount(viewport(), "heart-3d".into(), ViewMode::View)
            .unwrap();
        settle(&mut viewer, &backend, &assets).await;
        let pixel = pixel_of(&viewer, "left-ventricle");
        assert!(viewer.click(pixel).is_some());
        let session = viewer.session().unwrap();
        assert!(session.pins.candidate().is_none());
        assert!(session.notes.candidate().is_some());
    }

    #[tokio::test]
    async fn test_click_on_empty_space_is_a_no_op() {
        let backend = MemoryBackend::demo();
        let assets = assets();
        let mut viewer = professor();
        viewer
            .mount(viewport(), "heart-3d".into(), ViewMode::Edit)
            .unwrap();
        settle(&mut viewer, &backend, &assets).await;
        assert!(viewer.click(Vec2::new(2.0, 2.0)).is_none());
        assert!(viewer.session().unwrap().pins.candidate().is_none());
    }

    #[tokio::test]
    async fn test_muscles_layer_loads_once() {
        let backend = MemoryBackend::demo();
        let assets = assets();
        let mut viewer = student();
        viewer.mount(viewport(), "arm".into(), ViewMode::View).unwrap();
        settle(&mut viewer, &backend, &assets).await;
        assert_eq!(assets.loads(), 3, "only bones are visible by default");

        let muscles = LayerId::new("muscles");
        viewer.toggle_layer(&muscles, true).unwrap();
        settle(&mut viewer, &backend, &assets).await;
        assert_eq!(assets.loads(), 6);
        assert_eq!(
            viewer.session().unwrap().loader.layer_state(&muscles),
            LayerState::Visible
        );

        viewer.toggle_layer(&muscles, false).unwrap();
        settle(&mut viewer, &backend, &assets).await;
        viewer.toggle_layer(&muscles, true).unwrap();
        settle(&mut viewer, &backend, &assets).await;
        assert_eq!(assets.loads(), 6);
        assert_eq!(viewer.session().unwrap().loader.load_calls(), 6);
        assert_eq!(backend.calls(StoreOp::WriteLayer), 3);

        let graph = viewer.session().unwrap().host.graph().unwrap();
        assert_eq!(graph.attached_parts().count(), 6);
    }

    #[tokio::test]
    async fn test_one_failing_part_does_not_block_siblings() {
        let backend = MemoryBackend::demo();
        let assets = assets();
        assets.fail("arm/tricep.glb");
        let mut viewer = student();
        viewer.mount(viewport(), "arm".into(), ViewMode::View).unwrap();
        settle(&mut viewer, &backend, &assets).await;

        let muscles = LayerId::new("muscles");
        viewer.toggle_layer(&muscles, true).unwrap();
        settle(&mut viewer, &backend, &assets).await;

        let rows = viewer.layer_rows();
        let row = rows.iter().find(|r| r.id == muscles).unwrap();
        assert_eq!(row.state, LayerState::PartiallyFailed { failed: 1, total: 3 });
        assert_eq!(row.failed_parts, vec![PartId::new("tricep")]);
        let session = viewer.session().unwrap();
        assert!(session.loader.asset(&"bicep".into()).is_some());
        assert!(session.loader.asset(&"deltoid".into()).is_some());
        assert!(session
            .pickable()
            .iter()
            .all(|s| s.owner != SurfaceOwner::Part("tricep".into())));

        assets.heal("arm/tricep.glb");
        viewer.retry_part(&"tricep".into()).unwrap();
        settle(&mut viewer, &backend, &assets).await;
        assert_eq!(
            viewer.session().unwrap().loader.layer_state(&muscles),
            LayerState::Visible
        );
    }

    #[tokio::test]
    async fn test_unmount_during_in_flight_work_is_safe() {
        let backend = MemoryBackend::demo();
        let assets = assets();
        let mut viewer = student();
        viewer.mount(viewport(), "arm".into(), ViewMode::View).unwrap();
        settle(&mut viewer, &backend, &assets).await;
        viewer.toggle_layer(&"muscles".into(), true).unwrap();
        viewer.refresh_pins().unwrap();
        let in_flight = viewer.take_requests();
        assert!(!in_flight.is_empty());

        let mut surface = RecordingSurface::default();
        viewer.unmount(Some(&mut surface));
        viewer.unmount(Some(&mut surface));
        assert_eq!(surface.detached, 1);

        for request in in_flight {
            let completion = execute(&backend, &assets, request).await;
            assert!(!viewer.apply(completion));
        }
        assert!(viewer.session().is_none());
        assert!(!viewer.has_requests());
        assert!(!viewer.tick(0.016, &mut surface));
    }

    #[tokio::test]
    async fn test_remount_ignores_previous_mount_results() {
        let backend = MemoryBackend::demo();
        let assets = assets();
        let mut viewer = professor();
        viewer
            .mount(viewport(), "heart-3d".into(), ViewMode::View)
            .unwrap();
        let stale = viewer.take_requests();
        viewer.unmount(None);
        viewer.mount(viewport(), "arm".into(), ViewMode::View).unwrap();
        for request in stale {
            let completion = execute(&backend, &assets, request).await;
            assert!(!viewer.apply(completion));
        }
        settle(&mut viewer, &backend, &assets).await;
        let session = viewer.session().unwrap();
        assert_eq!(session.model().unwrap().id, ModelId::new("arm"));
        assert!(!session.uses_fallback());
    }

    #[tokio::test]
    async fn test_pin_fetch_failure_offers_retry() {
        let backend = MemoryBackend::demo();
        let assets = assets();
        backend.fail_next(StoreOp::FetchPins, StoreError::Unreachable("offline".into()));
        let mut viewer = student();
        viewer
            .mount(viewport(), "heart-3d".into(), ViewMode::View)
            .unwrap();
        settle(&mut viewer, &backend, &assets).await;
        assert!(matches!(
            viewer.session().unwrap().pins.fetch_state(),
            crate::pins::FetchState::Failed(_)
        ));
        viewer.refresh_pins().unwrap();
        settle(&mut viewer, &backend, &assets).await;
        assert_eq!(
            viewer.session().unwrap().pins.fetch_state(),
            &crate::pins::FetchState::Ready
        );
    }

    #[tokio::test]
    async fn test_model_fetch_failure_degrades_to_fallback() {
        let backend = MemoryBackend::demo();
        let assets = assets();
        backend.fail_next(StoreOp::FetchModel, StoreError::Timeout);
        let mut viewer = student();
        viewer
            .mount(viewport(), "heart-3d".into(), ViewMode::View)
            .unwrap();
        settle(&mut viewer, &backend, &assets).await;
        let session = viewer.session().unwrap();
        assert!(session.is_ready());
        assert_eq!(
            session.host.camera().unwrap().position,
            FALLBACK_CAMERA_POSITION
        );
    }

    #[tokio::test]
    async fn test_layer_write_retries_until_saved() {
        let backend = MemoryBackend::demo();
        let assets = assets();
        backend.fail_next(StoreOp::WriteLayer, StoreError::Timeout);
        let mut viewer = student();
        viewer.mount(viewport(), "arm".into(), ViewMode::View).unwrap();
        settle(&mut viewer, &backend, &assets).await;

        let muscles = LayerId::new("muscles");
        viewer.toggle_layer(&muscles, true).unwrap();
        settle(&mut viewer, &backend, &assets).await;
        assert!(matches!(
            viewer.session().unwrap().layers.save_state(&muscles),
            crate::layers::SaveState::Retrying { attempt: 2, .. }
        ));

        let mut surface = RecordingSurface::default();
        viewer.tick(1.5, &mut surface);
        settle(&mut viewer, &backend, &assets).await;
        assert_eq!(
            viewer.session().unwrap().layers.save_state(&muscles),
            crate::layers::SaveState::Saved
        );
        let layers = backend.snapshot().unwrap().layer_config(&"arm".into()).unwrap();
        assert!(layers.iter().find(|l| l.id == muscles).unwrap().default_visible);
    }

    #[tokio::test]
    async fn test_student_notes_flow() {
        let backend = MemoryBackend::demo();
        let assets = assets();
        let mut viewer = student();
        viewer
            .mount(viewport(), "heart-3d".into(), ViewMode::View)
            .unwrap();
        settle(&mut viewer, &backend, &assets).await;

        viewer.create_note("Ask about the mitral valve", false).unwrap();
        let pixel = pixel_of(&viewer, "right-ventricle");
        viewer.click(pixel).unwrap();
        viewer.create_note("Thinner wall here", true).unwrap();

        backend.fail_next(
            StoreOp::CreateNote,
            StoreError::Rejected {
                status: 500,
                message: "db".into(),
            },
        );
        settle(&mut viewer, &backend, &assets).await;
        let session = viewer.session().unwrap();
        assert_eq!(session.notes.notes().len(), 1);
        let slot = session.notes.pending_drafts()[0].slot;

        assert!(viewer.retry_note(slot));
        settle(&mut viewer, &backend, &assets).await;
        let session = viewer.session().unwrap();
        assert_eq!(session.notes.spatial_notes().count(), 1);
        assert_eq!(session.notes.text_notes().count(), 1);
        assert!(session.notes.pending_drafts().is_empty());
    }

    #[tokio::test]
    async fn test_professor_edits_and_deletes_pin() {
        let backend = MemoryBackend::demo();
        let assets = assets();
        let mut viewer = professor();
        viewer
            .mount(viewport(), "heart-3d".into(), ViewMode::Edit)
            .unwrap();
        settle(&mut viewer, &backend, &assets).await;
        viewer.click(pixel_of(&viewer, "aorta")).unwrap();
        viewer
            .submit_pin(PinContent {
                label: "Aorta".to_string(),
                ..PinContent::default()
            })
            .unwrap();
        settle(&mut viewer, &backend, &assets).await;
        let id = viewer.session().unwrap().pins.pins()[0].id.clone();

        viewer.begin_edit(&id).unwrap();
        if let Some(editor) = viewer.session_mut().unwrap().editor.as_mut() {
            editor.buffer_mut().unwrap().description = "Ascending aorta".to_string();
        }
        viewer.commit_edit().unwrap();
        settle(&mut viewer, &backend, &assets).await;
        let session = viewer.session().unwrap();
        assert_eq!(session.pins.get(&id).unwrap().description, "Ascending aorta");
        assert!(session.editor.as_ref().unwrap().editing().is_none());

        viewer.fly_to_pin(&id).unwrap();
        backend.fail_next(StoreOp::DeletePin, StoreError::Timeout);
        viewer.delete_pin(&id).unwrap();
        settle(&mut viewer, &backend, &assets).await;
        // Ambiguous failure refetched the confirmed set
        assert_eq!(viewer.session().unwrap().pins.pins().len(), 1);

        viewer.delete_pin(&id).unwrap();
        settle(&mut viewer, &backend, &assets).await;
        assert!(viewer.session().unwrap().pins.pins().is_empty());
    }

    #[tokio::test]
    async fn test_asset_error_kind_is_kept() {
        let backend = MemoryBackend::demo();
        let assets = MemoryAssets::new();
        let mut viewer = student();
        viewer.mount(viewport(), "arm".into(), ViewMode::View).unwrap();
        settle(&mut viewer, &backend, &assets).await;
        let session = viewer.session().unwrap();
        let failed: Vec<_> = session.loader.failed_parts().collect();
        assert_eq!(failed.len(), 3);
        assert!(matches!(failed[0].1, AssetError::Fetch { .. }));
    }
}
