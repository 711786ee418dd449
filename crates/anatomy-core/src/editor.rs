//! Professor-only pin list with inline editing

use crate::controls::OrbitControls;
use crate::error::PinError;
use crate::model::{EditGrant, Pin, PinId, PinPatch};
use crate::pins::{PinRequest, PinResponse, PinSystem};

/// Pin editing panel state. Holds no geometry; every mutation goes
/// through the [`PinSystem`].
#[derive(Debug)]
pub struct PinEditor {
    grant: EditGrant,
    editing: Option<(PinId, PinPatch)>,
    /// An update of the edited pin is waiting on the store
    saving: bool,
    fly_distance: f32,
}

impl PinEditor {
    pub fn new(grant: EditGrant, fly_distance: f32) -> Self {
        Self {
            grant,
            editing: None,
            saving: false,
            fly_distance,
        }
    }

    /// Pins listed by the panel
    pub fn entries<'a>(&self, pins: &'a PinSystem) -> &'a [Pin] {
        pins.pins()
    }

    /// Load a pin's current fields into the edit buffer
    pub fn begin_edit(&mut self, pins: &PinSystem, id: &PinId) -> Result<(), PinError> {
        let pin = pins.get(id).ok_or_else(|| PinError::UnknownPin(id.clone()))?;
        self.editing = Some((id.clone(), PinPatch::from(pin)));
        self.saving = false;
        Ok(())
    }

    pub fn editing(&self) -> Option<&PinId> {
        self.editing.as_ref().map(|(id, _)| id)
    }

    pub fn buffer(&self) -> Option<&PinPatch> {
        self.editing.as_ref().map(|(_, patch)| patch)
    }

    pub fn buffer_mut(&mut self) -> Option<&mut PinPatch> {
        self.editing.as_mut().map(|(_, patch)| patch)
    }

    pub fn is_saving(&self) -> bool {
        self.saving
    }

    pub fn cancel(&mut self) {
        self.editing = None;
        self.saving = false;
    }

    /// Submit the edit buffer as a full replacement of the pin.
    ///
    /// The buffer stays until the store confirms the update, so a rejected
    /// save can be corrected and sent again.
    pub fn commit(&mut self, pins: &mut PinSystem) -> Result<PinRequest, PinError> {
        let Some((id, patch)) = self.editing.as_ref() else {
            return Err(PinError::NotEditing);
        };
        let request = pins.update(&self.grant, id, patch.clone())?;
        self.saving = true;
        Ok(request)
    }

    /// Close the edit once the store has the edited pin, or reopen the
    /// buffer for another attempt when it refused it
    pub fn apply(&mut self, response: &PinResponse) {
        let Some(editing) = self.editing().cloned() else {
            return;
        };
        match response {
            PinResponse::Updated(id, Ok(_)) if *id == editing && self.saving => self.cancel(),
            PinResponse::Updated(id, Err(_)) if *id == editing => self.saving = false,
            PinResponse::Deleted(id, Ok(())) if *id == editing => self.cancel(),
            _ => {}
        }
    }

    pub fn delete(&mut self, pins: &mut PinSystem, id: &PinId) -> Result<PinRequest, PinError> {
        let request = pins.delete(&self.grant, id)?;
        if self.editing() == Some(id) {
            self.cancel();
        }
        Ok(request)
    }

    /// Retarget the orbit controls onto a pin
    pub fn fly_to(
        &self,
        pins: &PinSystem,
        id: &PinId,
        controls: &mut OrbitControls,
    ) -> Result<(), PinError> {
        let pin = pins.get(id).ok_or_else(|| PinError::UnknownPin(id.clone()))?;
        controls.fly_to(pin.position, self.fly_distance);
        Ok(())
    }
}
