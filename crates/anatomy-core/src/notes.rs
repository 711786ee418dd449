//! Private student notes, spatial or text-only

use glam::Vec3;
use std::collections::HashMap;
use tracing::{info, warn};

use crate::error::{NoteError, StoreError};
use crate::model::{ModelId, Note, NoteDraft, NoteId, ProjectedPoint, UserId};
use crate::pins::FetchState;
use crate::scene::{FrameContext, FrameSubscriber};
use crate::sync::{Change, FetchJournal};

/// Anchors closer than this are the same point after a store round trip
const ANCHOR_EPSILON: f32 = 1e-4;

#[derive(Debug, Clone, PartialEq)]
pub enum NoteRequest {
    Fetch(ModelId, UserId, u64),
    /// `slot` identifies the draft so a failure can be kept for retry
    Create { model: ModelId, draft: NoteDraft, slot: u64 },
    Delete(NoteId),
}

#[derive(Debug, Clone, PartialEq)]
pub enum NoteResponse {
    Fetched(u64, Result<Vec<Note>, StoreError>),
    Created(u64, Result<Note, StoreError>),
    Deleted(NoteId, Result<(), StoreError>),
}

/// A draft whose create call has not succeeded yet
#[derive(Debug, Clone, PartialEq)]
pub struct PendingDraft {
    pub slot: u64,
    pub draft: NoteDraft,
    pub in_flight: bool,
    pub error: Option<StoreError>,
}

impl PendingDraft {
    /// The last create failed in a way that may still have stored the note
    pub fn maybe_stored(&self) -> bool {
        !self.in_flight && self.error.as_ref().is_some_and(StoreError::is_ambiguous)
    }

    fn matches(&self, note: &Note) -> bool {
        note.owner == self.draft.owner
            && note.body == self.draft.body
            && match (note.anchor, self.draft.anchor) {
                (Some(a), Some(b)) => a.abs_diff_eq(b, ANCHOR_EPSILON),
                (None, None) => true,
                _ => false,
            }
    }
}

/// Notes of the viewing student for one model
#[derive(Debug)]
pub struct StudentNotes {
    model_id: ModelId,
    owner: UserId,
    notes: Vec<Note>,
    fetch: FetchState,
    journal: FetchJournal<Note, NoteId>,
    candidate: Option<Vec3>,
    drafts: Vec<PendingDraft>,
    next_slot: u64,
    open: Option<NoteId>,
    projected: HashMap<NoteId, ProjectedPoint>,
}

impl StudentNotes {
    pub fn new(model_id: ModelId, owner: UserId) -> Self {
        Self {
            model_id,
            owner,
            notes: Vec::new(),
            fetch: FetchState::Idle,
            journal: FetchJournal::default(),
            candidate: None,
            drafts: Vec::new(),
            next_slot: 0,
            open: None,
            projected: HashMap::new(),
        }
    }

    pub fn owner(&self) -> &UserId {
        &self.owner
    }

    pub fn request_fetch(&mut self) -> NoteRequest {
        self.fetch = FetchState::Loading;
        NoteRequest::Fetch(self.model_id.clone(), self.owner.clone(), self.journal.issue())
    }

    /// Record a ray-cast hit as the anchor for the next spatial note
    pub fn place(&mut self, hit: Option<Vec3>) -> Option<Vec3> {
        let point = hit?;
        self.candidate = Some(point);
        self.candidate
    }

    pub fn candidate(&self) -> Option<Vec3> {
        self.candidate
    }

    pub fn clear_candidate(&mut self) {
        self.candidate = None;
    }

    /// Create a note; anchored at the candidate when `spatial` is set
    pub fn create(&mut self, body: &str, spatial: bool) -> Result<NoteRequest, NoteError> {
        let body = body.trim();
        if body.is_empty() {
            return Err(NoteError::EmptyBody);
        }
        let anchor = if spatial {
            Some(self.candidate.ok_or(NoteError::NoCandidate)?)
        } else {
            None
        };
        let draft = NoteDraft {
            owner: self.owner.clone(),
            anchor,
            body: body.to_string(),
        };
        self.next_slot += 1;
        self.drafts.push(PendingDraft {
            slot: self.next_slot,
            draft: draft.clone(),
            in_flight: true,
            error: None,
        });
        if spatial {
            self.candidate = None;
        }
        Ok(NoteRequest::Create {
            model: self.model_id.clone(),
            draft,
            slot: self.next_slot,
        })
    }

    /// Re-send a failed draft
    pub fn retry_draft(&mut self, slot: u64) -> Option<NoteRequest> {
        let pending = self
            .drafts
            .iter_mut()
            .find(|d| d.slot == slot && !d.in_flight)?;
        pending.in_flight = true;
        pending.error = None;
        Some(NoteRequest::Create {
            model: self.model_id.clone(),
            draft: pending.draft.clone(),
            slot,
        })
    }

    /// Give up on a failed draft
    pub fn discard_draft(&mut self, slot: u64) {
        self.drafts.retain(|d| d.slot != slot || d.in_flight);
    }

    pub fn delete(&mut self, id: &NoteId) -> Result<NoteRequest, NoteError> {
        if self.get(id).is_none() {
            return Err(NoteError::UnknownNote(id.clone()));
        }
        Ok(NoteRequest::Delete(id.clone()))
    }

    pub fn apply(&mut self, response: NoteResponse) -> Option<NoteRequest> {
        match response {
            NoteResponse::Fetched(ticket, Ok(notes)) => {
                let owner = &self.owner;
                let known: Vec<NoteId> = self.notes.iter().map(|n| n.id.clone()).collect();
                let own = notes.into_iter().filter(|n| &n.owner == owner).collect();
                if self.journal.settle(ticket, own, &mut self.notes, |n| &n.id) {
                    if self.journal.is_latest(ticket) {
                        self.fetch = FetchState::Ready;
                    }
                    self.reconcile_drafts(&known);
                    self.prune();
                    info!(model = %self.model_id, notes = self.notes.len(), "Notes fetched");
                }
                None
            }
            NoteResponse::Fetched(ticket, Err(err)) => {
                if self.journal.fail(ticket, &mut self.notes, |n| &n.id) {
                    warn!(model = %self.model_id, error = %err, "Note fetch failed");
                    self.prune();
                    self.fetch = FetchState::Failed(err);
                }
                None
            }
            NoteResponse::Created(slot, Ok(note)) => {
                self.drafts.retain(|d| d.slot != slot);
                self.journal.record(Change::Upsert(note.clone()));
                self.notes.push(note);
                None
            }
            NoteResponse::Created(slot, Err(err)) => {
                warn!(slot, error = %err, "Note create failed, keeping draft");
                let refetch = err.is_ambiguous();
                if let Some(pending) = self.drafts.iter_mut().find(|d| d.slot == slot) {
                    pending.in_flight = false;
                    pending.error = Some(err);
                }
                refetch.then(|| self.request_fetch())
            }
            NoteResponse::Deleted(id, Ok(())) | NoteResponse::Deleted(id, Err(StoreError::NotFound(_))) => {
                self.notes.retain(|n| n.id != id);
                self.journal.record(Change::Remove(id));
                self.prune();
                None
            }
            NoteResponse::Deleted(id, Err(err)) => {
                warn!(note = %id, error = %err, "Note delete failed");
                err.is_ambiguous().then(|| self.request_fetch())
            }
        }
    }

    /// Drop failed drafts whose note turned up in a fetch.
    ///
    /// Only notes new since the previous set count, and each note settles at
    /// most one draft, so a student can still keep two identical notes.
    fn reconcile_drafts(&mut self, known: &[NoteId]) {
        let mut fresh: Vec<&Note> = self.notes.iter().filter(|n| !known.contains(&n.id)).collect();
        self.drafts.retain(|draft| {
            if !draft.maybe_stored() {
                return true;
            }
            match fresh.iter().position(|note| draft.matches(note)) {
                Some(i) => {
                    let note = fresh.swap_remove(i);
                    info!(slot = draft.slot, note = %note.id, "Failed note create was stored");
                    false
                }
                None => true,
            }
        });
    }

    fn prune(&mut self) {
        let notes = &self.notes;
        self.projected.retain(|id, _| notes.iter().any(|n| &n.id == id));
        if let Some(open) = &self.open {
            if !notes.iter().any(|n| &n.id == open) {
                self.open = None;
            }
        }
    }

    pub fn toggle_tooltip(&mut self, id: &NoteId) {
        if self.open.as_ref() == Some(id) {
            self.open = None;
        } else if self.get(id).is_some_and(|n| n.anchor.is_some()) {
            self.open = Some(id.clone());
        }
    }

    pub fn open_tooltip(&self) -> Option<&Note> {
        self.open.as_ref().and_then(|id| self.get(id))
    }

    pub fn get(&self, id: &NoteId) -> Option<&Note> {
        self.notes.iter().find(|n| &n.id == id)
    }

    pub fn notes(&self) -> &[Note] {
        &self.notes
    }

    /// Notes anchored in the scene
    pub fn spatial_notes(&self) -> impl Iterator<Item = &Note> {
        self.notes.iter().filter(|n| n.anchor.is_some())
    }

    /// Notes without an anchor, shown in the always-visible list
    pub fn text_notes(&self) -> impl Iterator<Item = &Note> {
        self.notes.iter().filter(|n| n.anchor.is_none())
    }

    pub fn pending_drafts(&self) -> &[PendingDraft] {
        &self.drafts
    }

    pub fn fetch_state(&self) -> &FetchState {
        &self.fetch
    }

    pub fn projection(&self, id: &NoteId) -> Option<ProjectedPoint> {
        self.projected.get(id).copied()
    }

    pub fn markers(&self) -> impl Iterator<Item = (&Note, ProjectedPoint)> {
        self.spatial_notes()
            .filter_map(|n| self.projected.get(&n.id).map(|p| (n, *p)))
    }
}

impl FrameSubscriber for StudentNotes {
    fn on_frame(&mut self, frame: &FrameContext) {
        self.projected = self
            .notes
            .iter()
            .filter_map(|n| {
                let anchor = n.anchor?;
                Some((n.id.clone(), frame.matrices.project(anchor, frame.viewport)))
            })
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn notes() -> StudentNotes {
        StudentNotes::new(ModelId::new("heart-3d"), UserId::new("ana"))
    }

    fn note(id: &str, owner: &str, anchor: Option<Vec3>) -> Note {
        Note {
            id: NoteId::new(id),
            model_id: ModelId::new("heart-3d"),
            owner: UserId::new(owner),
            anchor,
            body: "remember".to_string(),
            created_at: Utc::now(),
        }
    }

    fn ticket(request: NoteRequest) -> u64 {
        match request {
            NoteRequest::Fetch(_, _, ticket) => ticket,
            other => panic!("expected fetch request, got {:?}", other),
        }
    }

    fn created(request: NoteRequest) -> u64 {
        match request {
            NoteRequest::Create { slot, .. } => slot,
            other => panic!("expected create request, got {:?}", other),
        }
    }

    #[test]
    fn test_fetch_keeps_only_own_notes() {
        let mut notes = notes();
        let ticket = ticket(notes.request_fetch());
        notes.apply(NoteResponse::Fetched(ticket, Ok(vec![
            note("a", "ana", Some(Vec3::ZERO)),
            note("b", "ben", None),
            note("c", "ana", None),
        ])));
        assert_eq!(notes.notes().len(), 2);
        assert_eq!(notes.spatial_notes().count(), 1);
        assert_eq!(notes.text_notes().count(), 1);
    }

    #[test]
    fn test_spatial_note_needs_candidate() {
        let mut notes = notes();
        assert_eq!(notes.create("valve", true), Err(NoteError::NoCandidate));
        assert_eq!(notes.create("   ", false), Err(NoteError::EmptyBody));
        notes.place(Some(Vec3::Y));
        let NoteRequest::Create { draft, .. } = notes.create("valve", true).unwrap() else {
            panic!("expected create request");
        };
        assert_eq!(draft.anchor, Some(Vec3::Y));
        assert_eq!(draft.owner, UserId::new("ana"));
    }

    #[test]
    fn test_failed_create_keeps_draft_for_retry() {
        let mut notes = notes();
        let NoteRequest::Create { slot, .. } = notes.create("review chambers", false).unwrap() else {
            panic!("expected create request");
        };
        notes.apply(NoteResponse::Created(
            slot,
            Err(StoreError::Rejected {
                status: 500,
                message: "db".to_string(),
            }),
        ));
        assert_eq!(notes.pending_drafts().len(), 1);
        assert!(notes.pending_drafts()[0].error.is_some());

        let retry = notes.retry_draft(slot).unwrap();
        assert!(matches!(retry, NoteRequest::Create { slot: s, .. } if s == slot));
        notes.apply(NoteResponse::Created(slot, Ok(note("n1", "ana", None))));
        assert!(notes.pending_drafts().is_empty());
        assert_eq!(notes.text_notes().count(), 1);
    }

    #[test]
    fn test_in_flight_draft_is_not_retried() {
        let mut notes = notes();
        let NoteRequest::Create { slot, .. } = notes.create("x", false).unwrap() else {
            panic!("expected create request");
        };
        assert!(notes.retry_draft(slot).is_none());
    }

    #[test]
    fn test_text_notes_have_no_tooltip() {
        let mut notes = notes();
        let ticket = ticket(notes.request_fetch());
        notes.apply(NoteResponse::Fetched(ticket, Ok(vec![note("t", "ana", None)])));
        notes.toggle_tooltip(&NoteId::new("t"));
        assert!(notes.open_tooltip().is_none());
    }

    #[test]
    fn test_ambiguous_create_settled_by_refetch() {
        let mut notes = notes();
        let mount = ticket(notes.request_fetch());
        notes.apply(NoteResponse::Fetched(mount, Ok(Vec::new())));

        notes.place(Some(Vec3::new(0.1, 0.2, 0.3)));
        let slot = created(notes.create("valve", true).unwrap());
        let refetch = notes.apply(NoteResponse::Created(slot, Err(StoreError::Timeout)));
        let refetch = ticket(refetch.unwrap());
        assert!(notes.pending_drafts()[0].maybe_stored());

        let mut stored = note("n1", "ana", Some(Vec3::new(0.1, 0.2, 0.3)));
        stored.body = "valve".to_string();
        notes.apply(NoteResponse::Fetched(refetch, Ok(vec![stored])));
        assert_eq!(notes.notes().len(), 1);
        assert!(notes.pending_drafts().is_empty());
        assert!(notes.retry_draft(slot).is_none());
    }

    #[test]
    fn test_ambiguous_create_kept_when_note_is_missing() {
        let mut notes = notes();
        let mount = ticket(notes.request_fetch());
        let mut existing = note("old", "ana", None);
        existing.body = "valve".to_string();
        notes.apply(NoteResponse::Fetched(mount, Ok(vec![existing.clone()])));

        // Same body as a note the student already had
        let slot = created(notes.create("valve", false).unwrap());
        let refetch = notes.apply(NoteResponse::Created(slot, Err(StoreError::Timeout)));
        notes.apply(NoteResponse::Fetched(ticket(refetch.unwrap()), Ok(vec![existing])));
        assert_eq!(notes.pending_drafts().len(), 1);
        assert!(notes.retry_draft(slot).is_some());
    }

    #[test]
    fn test_late_fetch_keeps_note_created_after_it() {
        let mut notes = notes();
        let mount = ticket(notes.request_fetch());
        let slot = created(notes.create("review chambers", false).unwrap());
        notes.apply(NoteResponse::Created(slot, Ok(note("n1", "ana", None))));
        notes.apply(NoteResponse::Fetched(mount, Ok(Vec::new())));
        assert_eq!(notes.text_notes().count(), 1);
        assert_eq!(notes.fetch_state(), &FetchState::Ready);
    }
}
