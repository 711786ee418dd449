//! Pin placement, viewing and synchronization with the pin store

use glam::Vec3;
use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::error::{PinError, StoreError, ViewerError};
use crate::model::{
    EditGrant, ModelId, Pin, PinContent, PinDraft, PinId, PinPatch, ProjectedPoint, ViewMode,
};
use crate::scene::{FrameContext, FrameSubscriber};
use crate::sync::{Change, FetchJournal};

/// A pin store call to be executed by the driver
#[derive(Debug, Clone, PartialEq)]
pub enum PinRequest {
    /// The ticket orders the fetch against confirmed mutations
    Fetch(ModelId, u64),
    Create(ModelId, PinDraft),
    Update(PinId, PinPatch),
    Delete(PinId),
}

/// Result of a [`PinRequest`]
#[derive(Debug, Clone, PartialEq)]
pub enum PinResponse {
    Fetched(u64, Result<Vec<Pin>, StoreError>),
    Created(Result<Pin, StoreError>),
    Updated(PinId, Result<Pin, StoreError>),
    Deleted(PinId, Result<(), StoreError>),
}

/// Progress of the most recent fetch
#[derive(Debug, Clone, PartialEq, Default)]
pub enum FetchState {
    #[default]
    Idle,
    Loading,
    Ready,
    /// The fetch failed; the set is empty until a retry succeeds
    Failed(StoreError),
}

/// The confirmed pin set of one model plus its per-frame projections
#[derive(Debug)]
pub struct PinSystem {
    model_id: ModelId,
    mode: ViewMode,
    grant: Option<EditGrant>,
    pins: Vec<Pin>,
    fetch: FetchState,
    journal: FetchJournal<Pin, PinId>,
    candidate: Option<Vec3>,
    creating: bool,
    open: Option<PinId>,
    projected: HashMap<PinId, ProjectedPoint>,
    last_error: Option<PinError>,
}

impl PinSystem {
    pub fn new(model_id: ModelId, grant: Option<EditGrant>) -> Self {
        Self {
            model_id,
            mode: ViewMode::View,
            grant,
            pins: Vec::new(),
            fetch: FetchState::Idle,
            journal: FetchJournal::default(),
            candidate: None,
            creating: false,
            open: None,
            projected: HashMap::new(),
            last_error: None,
        }
    }

    pub fn mode(&self) -> ViewMode {
        self.mode
    }

    /// Switch modes. Edit mode needs the grant this system was built with.
    pub fn set_mode(&mut self, mode: ViewMode) -> Result<(), ViewerError> {
        if mode == ViewMode::Edit && self.grant.is_none() {
            return Err(ViewerError::EditNotPermitted);
        }
        if mode == ViewMode::View {
            self.candidate = None;
        }
        self.mode = mode;
        Ok(())
    }

    pub fn request_fetch(&mut self) -> PinRequest {
        self.fetch = FetchState::Loading;
        PinRequest::Fetch(self.model_id.clone(), self.journal.issue())
    }

    /// Record a ray-cast hit as the placement candidate.
    ///
    /// Only edit mode places; a miss leaves any previous candidate as is.
    pub fn place(&mut self, hit: Option<Vec3>) -> Option<Vec3> {
        if self.mode != ViewMode::Edit {
            return None;
        }
        let point = hit?;
        debug!(x = point.x, y = point.y, z = point.z, "Pin candidate");
        self.candidate = Some(point);
        self.candidate
    }

    pub fn candidate(&self) -> Option<Vec3> {
        self.candidate
    }

    pub fn clear_candidate(&mut self) {
        self.candidate = None;
    }

    /// Create a pin at the candidate. It joins the set once the store confirms.
    pub fn submit(&mut self, content: PinContent) -> Result<PinRequest, PinError> {
        if self.mode != ViewMode::Edit {
            return Err(PinError::ReadOnly);
        }
        let position = self.candidate.ok_or(PinError::NoCandidate)?;
        if content.label.trim().is_empty() {
            return Err(PinError::EmptyLabel);
        }
        self.creating = true;
        self.last_error = None;
        Ok(PinRequest::Create(self.model_id.clone(), content.at(position)))
    }

    pub fn is_creating(&self) -> bool {
        self.creating
    }

    pub fn update(
        &mut self,
        _grant: &EditGrant,
        id: &PinId,
        patch: PinPatch,
    ) -> Result<PinRequest, PinError> {
        if self.get(id).is_none() {
            return Err(PinError::UnknownPin(id.clone()));
        }
        if patch.label.trim().is_empty() {
            return Err(PinError::EmptyLabel);
        }
        Ok(PinRequest::Update(id.clone(), patch))
    }

    pub fn delete(&mut self, _grant: &EditGrant, id: &PinId) -> Result<PinRequest, PinError> {
        if self.get(id).is_none() {
            return Err(PinError::UnknownPin(id.clone()));
        }
        Ok(PinRequest::Delete(id.clone()))
    }

    /// Apply a store result.
    ///
    /// Definitive rejections keep the confirmed set. Ambiguous failures
    /// return a fetch request, since the store may have applied the change.
    /// A fetch never drops a mutation confirmed after it was issued.
    pub fn apply(&mut self, response: PinResponse) -> Option<PinRequest> {
        let failure = match response {
            PinResponse::Fetched(ticket, Ok(pins)) => {
                if self.journal.settle(ticket, pins, &mut self.pins, |p| &p.id) {
                    info!(model = %self.model_id, pins = self.pins.len(), "Pins fetched");
                    if self.journal.is_latest(ticket) {
                        self.fetch = FetchState::Ready;
                    }
                    self.prune();
                }
                return None;
            }
            PinResponse::Fetched(ticket, Err(err)) => {
                if self.journal.fail(ticket, &mut self.pins, |p| &p.id) {
                    warn!(model = %self.model_id, error = %err, "Pin fetch failed");
                    self.prune();
                    self.fetch = FetchState::Failed(err);
                }
                return None;
            }
            PinResponse::Created(Ok(pin)) => {
                info!(pin = %pin.id, label = %pin.label, "Pin created");
                self.creating = false;
                self.candidate = None;
                self.journal.record(Change::Upsert(pin.clone()));
                self.pins.push(pin);
                return None;
            }
            PinResponse::Created(Err(err)) => {
                self.creating = false;
                err
            }
            PinResponse::Updated(id, Ok(pin)) => {
                self.journal.record(Change::Upsert(pin.clone()));
                match self.pins.iter_mut().find(|p| p.id == id) {
                    Some(existing) => *existing = pin,
                    None => self.pins.push(pin),
                }
                return None;
            }
            PinResponse::Updated(_, Err(err)) => err,
            PinResponse::Deleted(id, Ok(()))
            | PinResponse::Deleted(id, Err(StoreError::NotFound(_))) => {
                // NotFound means it is already gone on the store side
                self.pins.retain(|p| p.id != id);
                self.journal.record(Change::Remove(id));
                self.prune();
                return None;
            }
            PinResponse::Deleted(_, Err(err)) => err,
        };

        warn!(model = %self.model_id, error = %failure, "Pin mutation failed");
        let refetch = failure.is_ambiguous();
        self.last_error = Some(PinError::Store(failure));
        refetch.then(|| self.request_fetch())
    }

    /// Drop tooltip and projections of pins no longer in the set
    fn prune(&mut self) {
        let pins = &self.pins;
        self.projected.retain(|id, _| pins.iter().any(|p| &p.id == id));
        if let Some(open) = &self.open {
            if !pins.iter().any(|p| &p.id == open) {
                self.open = None;
            }
        }
    }

    /// Open a pin's tooltip, or close it if it is already open
    pub fn toggle_tooltip(&mut self, id: &PinId) {
        if self.open.as_ref() == Some(id) {
            self.open = None;
        } else if self.get(id).is_some() {
            self.open = Some(id.clone());
        }
    }

    pub fn close_tooltip(&mut self) {
        self.open = None;
    }

    pub fn open_tooltip(&self) -> Option<&Pin> {
        self.open.as_ref().and_then(|id| self.get(id))
    }

    pub fn pins(&self) -> &[Pin] {
        &self.pins
    }

    pub fn get(&self, id: &PinId) -> Option<&Pin> {
        self.pins.iter().find(|p| &p.id == id)
    }

    pub fn fetch_state(&self) -> &FetchState {
        &self.fetch
    }

    pub fn last_error(&self) -> Option<&PinError> {
        self.last_error.as_ref()
    }

    pub fn projection(&self, id: &PinId) -> Option<ProjectedPoint> {
        self.projected.get(id).copied()
    }

    /// Pins with their latest projection, in set order
    pub fn markers(&self) -> impl Iterator<Item = (&Pin, ProjectedPoint)> {
        self.pins
            .iter()
            .filter_map(|p| self.projected.get(&p.id).map(|pp| (p, *pp)))
    }
}

impl FrameSubscriber for PinSystem {
    fn on_frame(&mut self, frame: &FrameContext) {
        self.projected = self
            .pins
            .iter()
            .map(|p| (p.id.clone(), frame.matrices.project(p.position, frame.viewport)))
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{PerspectiveCamera, Viewport};
    use crate::model::{Access, PinScope, Role};

    fn grant() -> EditGrant {
        Access::new("prof", Role::Professor).edit_grant().unwrap()
    }

    fn pin(id: &str, position: Vec3) -> Pin {
        Pin {
            id: PinId::new(id),
            model_id: ModelId::new("heart-3d"),
            position,
            label: id.to_string(),
            description: String::new(),
            color: "#ff0000".to_string(),
            pin_type: "structure".to_string(),
            scope: PinScope::Shared,
        }
    }

    fn ticket(request: PinRequest) -> u64 {
        match request {
            PinRequest::Fetch(_, ticket) => ticket,
            other => panic!("expected fetch request, got {:?}", other),
        }
    }

    fn loaded(grant: Option<EditGrant>) -> PinSystem {
        let mut pins = PinSystem::new(ModelId::new("heart-3d"), grant);
        let ticket = ticket(pins.request_fetch());
        pins.apply(PinResponse::Fetched(
            ticket,
            Ok(vec![
                pin("apex", Vec3::new(0.0, -1.0, 0.0)),
                pin("aorta", Vec3::new(0.0, 1.2, 0.0)),
            ]),
        ));
        pins
    }

    fn content(label: &str) -> PinContent {
        PinContent {
            label: label.to_string(),
            pin_type: "landmark".to_string(),
            ..PinContent::default()
        }
    }

    #[test]
    fn test_edit_mode_requires_grant() {
        let mut pins = PinSystem::new(ModelId::new("heart-3d"), None);
        assert_eq!(pins.set_mode(ViewMode::Edit), Err(ViewerError::EditNotPermitted));
        assert_eq!(pins.mode(), ViewMode::View);
    }

    #[test]
    fn test_view_mode_never_places() {
        let mut pins = loaded(Some(grant()));
        assert!(pins.place(Some(Vec3::ONE)).is_none());
        assert_eq!(pins.submit(content("x")), Err(PinError::ReadOnly));
    }

    #[test]
    fn test_miss_is_a_no_op() {
        let mut pins = loaded(Some(grant()));
        pins.set_mode(ViewMode::Edit).unwrap();
        pins.place(Some(Vec3::X));
        assert!(pins.place(None).is_none());
        assert_eq!(pins.candidate(), Some(Vec3::X));
    }

    #[test]
    fn test_pin_joins_set_only_after_confirmation() {
        let mut pins = loaded(Some(grant()));
        pins.set_mode(ViewMode::Edit).unwrap();
        assert_eq!(pins.submit(content("Apex")), Err(PinError::NoCandidate));
        pins.place(Some(Vec3::new(0.3, -0.2, 0.8)));
        assert_eq!(pins.submit(content("  ")), Err(PinError::EmptyLabel));

        let request = pins.submit(content("Left ventricle")).unwrap();
        let PinRequest::Create(_, draft) = request else {
            panic!("expected create request");
        };
        assert_eq!(draft.position, Vec3::new(0.3, -0.2, 0.8));
        assert_eq!(pins.pins().len(), 2);

        let mut created = pin("lv", draft.position);
        created.pin_type = draft.pin_type;
        pins.apply(PinResponse::Created(Ok(created)));
        assert_eq!(pins.pins().len(), 3);
        assert!(pins.candidate().is_none());
    }

    #[test]
    fn test_rejected_create_keeps_candidate() {
        let mut pins = loaded(Some(grant()));
        pins.set_mode(ViewMode::Edit).unwrap();
        pins.place(Some(Vec3::Y));
        pins.submit(content("Apex")).unwrap();
        let follow_up = pins.apply(PinResponse::Created(Err(StoreError::Rejected {
            status: 422,
            message: "bad".to_string(),
        })));
        assert!(follow_up.is_none());
        assert_eq!(pins.candidate(), Some(Vec3::Y));
        assert_eq!(pins.pins().len(), 2);
        assert!(pins.last_error().is_some());
    }

    #[test]
    fn test_fetch_failure_empties_set() {
        let mut pins = loaded(None);
        let ticket = ticket(pins.request_fetch());
        pins.apply(PinResponse::Fetched(
            ticket,
            Err(StoreError::Unreachable("offline".into())),
        ));
        assert!(pins.pins().is_empty());
        assert!(matches!(pins.fetch_state(), FetchState::Failed(_)));
    }

    #[test]
    fn test_rejected_update_keeps_confirmed_copy() {
        let grant = grant();
        let mut pins = loaded(Some(grant));
        let id = PinId::new("apex");
        let mut patch = PinPatch::from(pins.get(&id).unwrap());
        patch.label = "Renamed".to_string();
        pins.update(&grant, &id, patch).unwrap();
        let follow_up = pins.apply(PinResponse::Updated(
            id.clone(),
            Err(StoreError::Rejected {
                status: 409,
                message: "conflict".to_string(),
            }),
        ));
        assert!(follow_up.is_none());
        assert_eq!(pins.get(&id).unwrap().label, "apex");
    }

    #[test]
    fn test_ambiguous_delete_triggers_refetch() {
        let grant = grant();
        let mut pins = loaded(Some(grant));
        let id = PinId::new("apex");
        pins.delete(&grant, &id).unwrap();
        let follow_up = pins.apply(PinResponse::Deleted(id.clone(), Err(StoreError::Timeout)));
        assert!(matches!(follow_up, Some(PinRequest::Fetch(model, _)) if model.as_str() == "heart-3d"));
        assert!(pins.get(&id).is_some());
        assert_eq!(pins.fetch_state(), &FetchState::Loading);
    }

    #[test]
    fn test_late_fetch_keeps_pins_confirmed_after_it() {
        let mut pins = PinSystem::new(ModelId::new("heart-3d"), Some(grant()));
        pins.set_mode(ViewMode::Edit).unwrap();
        let mount_fetch = ticket(pins.request_fetch());

        pins.place(Some(Vec3::new(0.3, -0.2, 0.8)));
        pins.submit(content("Left ventricle")).unwrap();
        pins.apply(PinResponse::Created(Ok(pin("lv", Vec3::new(0.3, -0.2, 0.8)))));

        // Served before the create landed
        pins.apply(PinResponse::Fetched(
            mount_fetch,
            Ok(vec![pin("apex", Vec3::new(0.0, -1.0, 0.0))]),
        ));
        let ids: Vec<_> = pins.pins().iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["apex", "lv"]);
        assert_eq!(pins.fetch_state(), &FetchState::Ready);

        // A later fetch already reflects the pin and needs no replay
        let refresh = ticket(pins.request_fetch());
        pins.apply(PinResponse::Fetched(
            refresh,
            Ok(vec![pin("apex", Vec3::ZERO), pin("lv", Vec3::ONE)]),
        ));
        assert_eq!(pins.pins().len(), 2);
    }

    #[test]
    fn test_late_fetch_does_not_restore_deleted_pin() {
        let grant = grant();
        let mut pins = loaded(Some(grant));
        let refresh = ticket(pins.request_fetch());
        let apex = PinId::new("apex");
        pins.delete(&grant, &apex).unwrap();
        pins.apply(PinResponse::Deleted(apex.clone(), Ok(())));
        pins.apply(PinResponse::Fetched(
            refresh,
            Ok(vec![pin("apex", Vec3::ZERO), pin("aorta", Vec3::Y)]),
        ));
        assert!(pins.get(&apex).is_none());
        assert_eq!(pins.pins().len(), 1);
    }

    #[test]
    fn test_superseded_fetch_is_ignored() {
        let mut pins = loaded(None);
        let older = ticket(pins.request_fetch());
        let newer = ticket(pins.request_fetch());
        pins.apply(PinResponse::Fetched(newer, Ok(vec![pin("apex", Vec3::ZERO)])));
        pins.apply(PinResponse::Fetched(older, Err(StoreError::Timeout)));
        assert_eq!(pins.pins().len(), 1);
        assert_eq!(pins.fetch_state(), &FetchState::Ready);
    }

    #[test]
    fn test_single_open_tooltip() {
        let mut pins = loaded(None);
        let apex = PinId::new("apex");
        let aorta = PinId::new("aorta");
        pins.toggle_tooltip(&apex);
        pins.toggle_tooltip(&aorta);
        assert_eq!(pins.open_tooltip().unwrap().id, aorta);
        pins.toggle_tooltip(&aorta);
        assert!(pins.open_tooltip().is_none());
    }

    #[test]
    fn test_deleted_pin_closes_its_tooltip() {
        let grant = grant();
        let mut pins = loaded(Some(grant));
        let apex = PinId::new("apex");
        pins.toggle_tooltip(&apex);
        pins.apply(PinResponse::Deleted(apex, Ok(())));
        assert!(pins.open_tooltip().is_none());
    }

    #[test]
    fn test_frame_projects_every_pin() {
        let mut pins = loaded(None);
        let mut camera = PerspectiveCamera::new(
            Vec3::new(0.0, 0.0, 6.0),
            Vec3::ZERO,
            45f32.to_radians(),
            0.1,
            100.0,
        );
        camera.aspect = 4.0 / 3.0;
        let frame = FrameContext {
            frame: 1,
            dt: 0.016,
            matrices: camera.matrices(),
            viewport: Viewport::new(800.0, 600.0),
        };
        pins.on_frame(&frame);
        let markers: Vec<_> = pins.markers().collect();
        assert_eq!(markers.len(), 2);
        let apex = pins.projection(&PinId::new("apex")).unwrap();
        assert!(apex.visible);
        assert!(apex.y > 300.0);
    }
}
