use chrono::Utc;
use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::StoreError;
use crate::model::{
    Layer, LayerId, Model, ModelId, Note, NoteDraft, NoteId, Part, PartTransform, Pin, PinDraft,
    PinId, PinPatch, UserId,
};

/// Everything a backend stores, as one serializable document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreDocument {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub models: Vec<Model>,
    /// Layer configuration keyed by model id
    #[serde(default)]
    pub layers: HashMap<ModelId, Vec<Layer>>,
    /// Persisted layer toggles: model id -> layer id -> visible
    #[serde(default)]
    pub layer_visibility: HashMap<ModelId, HashMap<LayerId, bool>>,
    #[serde(default)]
    pub pins: Vec<Pin>,
    #[serde(default)]
    pub notes: Vec<Note>,
}

fn default_version() -> String {
    "1.0".to_string()
}

impl StoreDocument {
    pub fn new() -> Self {
        Self {
            version: default_version(),
            ..Default::default()
        }
    }

    /// Seed content: a procedural heart and a two-layer arm with authored parts
    pub fn demo() -> Self {
        let mut doc = Self::new();
        doc.models.push(Model {
            id: ModelId::new("heart-3d"),
            name: "Heart".to_string(),
            camera_position: Vec3::new(0.0, 0.5, 6.0),
            parts: Vec::new(),
        });

        let bones = LayerId::new("bones");
        let muscles = LayerId::new("muscles");
        let part = |id: &str, layer: &LayerId, visible: bool, y: f32| Part {
            id: id.into(),
            source: format!("arm/{}.glb", id),
            layer_id: layer.clone(),
            default_visible: visible,
            transform: PartTransform {
                translation: Vec3::new(0.0, y, 0.0),
                rotation: Quat::IDENTITY,
                scale: Vec3::ONE,
            },
        };
        let parts = vec![
            part("humerus", &bones, true, 1.1),
            part("radius", &bones, true, -0.95),
            part("ulna", &bones, true, -0.95),
            part("bicep", &muscles, true, 1.0),
            part("tricep", &muscles, true, 1.1),
            part("deltoid", &muscles, true, 2.1),
        ];
        let arm = ModelId::new("arm");
        doc.layers.insert(
            arm.clone(),
            vec![
                Layer {
                    id: bones.clone(),
                    label: "Bones".to_string(),
                    part_ids: vec!["humerus".into(), "radius".into(), "ulna".into()],
                    default_visible: true,
                },
                Layer {
                    id: muscles.clone(),
                    label: "Muscles".to_string(),
                    part_ids: vec!["bicep".into(), "tricep".into(), "deltoid".into()],
                    default_visible: false,
                },
            ],
        );
        doc.models.push(Model {
            id: arm,
            name: "Upper limb".to_string(),
            camera_position: Vec3::new(0.0, 1.0, 7.0),
            parts,
        });
        doc
    }

    pub fn model(&self, id: &ModelId) -> Result<&Model, StoreError> {
        self.models
            .iter()
            .find(|m| &m.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("model {}", id)))
    }

    pub fn part_list(&self, id: &ModelId) -> Result<Vec<Part>, StoreError> {
        Ok(self.model(id)?.parts.clone())
    }

    pub fn layer_config(&self, id: &ModelId) -> Result<Vec<Layer>, StoreError> {
        self.model(id)?;
        let mut layers = self.layers.get(id).cloned().unwrap_or_default();
        if let Some(saved) = self.layer_visibility.get(id) {
            for layer in &mut layers {
                if let Some(visible) = saved.get(&layer.id) {
                    layer.default_visible = *visible;
                }
            }
        }
        Ok(layers)
    }

    pub fn set_layer_visibility(
        &mut self,
        model: &ModelId,
        layer: &LayerId,
        visible: bool,
    ) -> Result<(), StoreError> {
        self.model(model)?;
        self.layer_visibility
            .entry(model.clone())
            .or_default()
            .insert(layer.clone(), visible);
        Ok(())
    }

    pub fn pins_for(&self, model: &ModelId) -> Vec<Pin> {
        self.pins
            .iter()
            .filter(|p| &p.model_id == model)
            .cloned()
            .collect()
    }

    pub fn insert_pin(&mut self, model: &ModelId, draft: PinDraft) -> Result<Pin, StoreError> {
        self.model(model)?;
        if draft.label.trim().is_empty() {
            return Err(StoreError::Rejected {
                status: 422,
                message: "label is required".to_string(),
            });
        }
        let pin = Pin {
            id: PinId::new(Uuid::new_v4().to_string()),
            model_id: model.clone(),
            position: draft.position,
            label: draft.label,
            description: draft.description,
            color: draft.color,
            pin_type: draft.pin_type,
            scope: draft.scope,
        };
        self.pins.push(pin.clone());
        Ok(pin)
    }

    pub fn replace_pin(&mut self, id: &PinId, patch: PinPatch) -> Result<Pin, StoreError> {
        let pin = self
            .pins
            .iter_mut()
            .find(|p| &p.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("pin {}", id)))?;
        pin.apply_patch(patch);
        Ok(pin.clone())
    }

    pub fn remove_pin(&mut self, id: &PinId) -> Result<(), StoreError> {
        let before = self.pins.len();
        self.pins.retain(|p| &p.id != id);
        if self.pins.len() == before {
            return Err(StoreError::NotFound(format!("pin {}", id)));
        }
        Ok(())
    }

    pub fn notes_for(&self, model: &ModelId, owner: &UserId) -> Vec<Note> {
        self.notes
            .iter()
            .filter(|n| &n.model_id == model && &n.owner == owner)
            .cloned()
            .collect()
    }

    pub fn insert_note(&mut self, model: &ModelId, draft: NoteDraft) -> Result<Note, StoreError> {
        self.model(model)?;
        let note = Note {
            id: NoteId::new(Uuid::new_v4().to_string()),
            model_id: model.clone(),
            owner: draft.owner,
            anchor: draft.anchor,
            body: draft.body,
            created_at: Utc::now(),
        };
        self.notes.push(note.clone());
        Ok(note)
    }

    pub fn remove_note(&mut self, id: &NoteId) -> Result<(), StoreError> {
        let before = self.notes.len();
        self.notes.retain(|n| &n.id != id);
        if self.notes.len() == before {
            return Err(StoreError::NotFound(format!("note {}", id)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PinContent;

    #[test]
    fn test_layer_visibility_overrides_default() {
        let mut doc = StoreDocument::demo();
        let arm = ModelId::new("arm");
        let muscles = LayerId::new("muscles");
        assert!(!doc.layer_config(&arm).unwrap()[1].default_visible);
        doc.set_layer_visibility(&arm, &muscles, true).unwrap();
        assert!(doc.layer_config(&arm).unwrap()[1].default_visible);
    }

    #[test]
    fn test_pins_are_scoped_to_model() {
        let mut doc = StoreDocument::demo();
        let heart = ModelId::new("heart-3d");
        let content = PinContent {
            label: "Apex".to_string(),
            ..PinContent::default()
        };
        doc.insert_pin(&heart, content.at(Vec3::ZERO)).unwrap();
        assert_eq!(doc.pins_for(&heart).len(), 1);
        assert!(doc.pins_for(&ModelId::new("arm")).is_empty());
    }

    #[test]
    fn test_notes_are_scoped_to_owner() {
        let mut doc = StoreDocument::demo();
        let heart = ModelId::new("heart-3d");
        let draft = |owner: &str| NoteDraft {
            owner: UserId::new(owner),
            anchor: None,
            body: "review".to_string(),
        };
        doc.insert_note(&heart, draft("ana")).unwrap();
        doc.insert_note(&heart, draft("ben")).unwrap();
        assert_eq!(doc.notes_for(&heart, &UserId::new("ana")).len(), 1);
    }

    #[test]
    fn test_unknown_model_is_not_found() {
        let doc = StoreDocument::new();
        assert!(matches!(
            doc.model(&ModelId::new("missing")),
            Err(StoreError::NotFound(_))
        ));
    }
}
