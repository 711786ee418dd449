//! Viewer data model: models, parts, layers, pins, notes and access control

use chrono::{DateTime, Utc};
use glam::{Mat4, Quat, Vec3};
use serde::{Deserialize, Serialize};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

string_id!(
    /// Identifier of an anatomical model (e.g. "heart-3d")
    ModelId
);
string_id!(
    /// Identifier of one loadable part of a model
    PartId
);
string_id!(
    /// Identifier of a named group of parts
    LayerId
);
string_id!(
    /// Identifier of a persisted pin, assigned by the pin store
    PinId
);
string_id!(
    /// Identifier of a persisted note, assigned by the note store
    NoteId
);
string_id!(
    /// Identifier of the signed-in user
    UserId
);

/// An anatomical model as authored by content creators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Model {
    pub id: ModelId,
    pub name: String,
    /// Default camera position in model space
    pub camera_position: Vec3,
    /// Authored parts; empty means the procedural fallback is used
    #[serde(default)]
    pub parts: Vec<Part>,
}

/// Placement of a part inside the model
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PartTransform {
    #[serde(default)]
    pub translation: Vec3,
    #[serde(default = "identity_rotation")]
    pub rotation: Quat,
    #[serde(default = "unit_scale")]
    pub scale: Vec3,
}

fn identity_rotation() -> Quat {
    Quat::IDENTITY
}

fn unit_scale() -> Vec3 {
    Vec3::ONE
}

impl Default for PartTransform {
    fn default() -> Self {
        Self {
            translation: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
        }
    }
}

impl PartTransform {
    pub fn to_mat4(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.translation)
    }
}

/// One externally authored, separately loadable piece of a model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Part {
    pub id: PartId,
    /// Asset reference, resolved by the asset source (path or URL)
    pub source: String,
    pub layer_id: LayerId,
    #[serde(default = "default_true")]
    pub default_visible: bool,
    #[serde(default)]
    pub transform: PartTransform,
}

fn default_true() -> bool {
    true
}

/// A named group of parts toggled together
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Layer {
    pub id: LayerId,
    pub label: String,
    #[serde(default)]
    pub part_ids: Vec<PartId>,
    #[serde(default = "default_true")]
    pub default_visible: bool,
}

/// Who can see a pin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PinScope {
    /// Authored by a professor and shared with their students
    #[default]
    Shared,
    /// Visible to every viewer of the model
    Global,
}

/// A persisted spatial annotation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pin {
    pub id: PinId,
    pub model_id: ModelId,
    /// Position in model space
    pub position: Vec3,
    pub label: String,
    #[serde(default)]
    pub description: String,
    /// Display color as "#rrggbb"
    pub color: String,
    /// Semantic tag (e.g. "structure", "landmark", "pathology")
    pub pin_type: String,
    #[serde(default)]
    pub scope: PinScope,
}

/// Fields submitted when creating a pin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PinDraft {
    pub position: Vec3,
    pub label: String,
    pub description: String,
    pub color: String,
    pub pin_type: String,
    pub scope: PinScope,
}

/// Caller-supplied pin content, without a position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PinContent {
    pub label: String,
    pub description: String,
    pub color: String,
    pub pin_type: String,
    pub scope: PinScope,
}

impl Default for PinContent {
    fn default() -> Self {
        Self {
            label: String::new(),
            description: String::new(),
            color: DEFAULT_PIN_COLOR.to_string(),
            pin_type: "structure".to_string(),
            scope: PinScope::Shared,
        }
    }
}

impl PinContent {
    pub fn at(self, position: Vec3) -> PinDraft {
        PinDraft {
            position,
            label: self.label,
            description: self.description,
            color: self.color,
            pin_type: self.pin_type,
            scope: self.scope,
        }
    }
}

/// Full replacement of a pin's editable fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PinPatch {
    pub position: Vec3,
    pub label: String,
    pub description: String,
    pub color: String,
    pub pin_type: String,
    pub scope: PinScope,
}

impl From<&Pin> for PinPatch {
    fn from(pin: &Pin) -> Self {
        Self {
            position: pin.position,
            label: pin.label.clone(),
            description: pin.description.clone(),
            color: pin.color.clone(),
            pin_type: pin.pin_type.clone(),
            scope: pin.scope,
        }
    }
}

impl Pin {
    pub fn apply_patch(&mut self, patch: PinPatch) {
        self.position = patch.position;
        self.label = patch.label;
        self.description = patch.description;
        self.color = patch.color;
        self.pin_type = patch.pin_type;
        self.scope = patch.scope;
    }
}

/// Fallback marker color for pins without a parseable color
pub const DEFAULT_PIN_COLOR: &str = "#e53935";

/// Parse "#rrggbb" (or "rrggbb") into linear-agnostic 0..1 components
pub fn parse_hex_color(s: &str) -> Option<[f32; 3]> {
    let hex = s.trim().trim_start_matches('#');
    if hex.len() != 6 || !hex.is_ascii() {
        return None;
    }
    let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
    Some([
        channel(0)? as f32 / 255.0,
        channel(2)? as f32 / 255.0,
        channel(4)? as f32 / 255.0,
    ])
}

/// A private student note, optionally anchored in the scene
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub id: NoteId,
    pub model_id: ModelId,
    pub owner: UserId,
    /// Anchor in model space; `None` for text-only notes
    pub anchor: Option<Vec3>,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

/// Fields submitted when creating a note
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoteDraft {
    pub owner: UserId,
    pub anchor: Option<Vec3>,
    pub body: String,
}

/// A 3D point projected into the container's pixel space for one frame
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ProjectedPoint {
    pub x: f32,
    pub y: f32,
    /// False when the point is behind the camera or beyond the far plane
    pub visible: bool,
}

/// Whether the viewer accepts new pin placements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewMode {
    #[default]
    View,
    Edit,
}

impl std::str::FromStr for ViewMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "view" => Ok(ViewMode::View),
            "edit" => Ok(ViewMode::Edit),
            other => Err(format!("unknown view mode '{}'", other)),
        }
    }
}

/// Role of the signed-in user, supplied by the embedding application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Student,
    Professor,
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "student" => Ok(Role::Student),
            "professor" => Ok(Role::Professor),
            other => Err(format!("unknown role '{}'", other)),
        }
    }
}

/// Identity of the viewing user as asserted by the embedding application
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Access {
    pub user_id: UserId,
    pub role: Role,
}

impl Access {
    pub fn new(user_id: impl Into<String>, role: Role) -> Self {
        Self {
            user_id: UserId::new(user_id),
            role,
        }
    }

    /// Capability to author pins; only professors receive one
    pub fn edit_grant(&self) -> Option<EditGrant> {
        match self.role {
            Role::Professor => Some(EditGrant { _private: () }),
            Role::Student => None,
        }
    }
}

/// Proof that the holder may enter edit mode and author pins.
///
/// Can only be obtained from [`Access::edit_grant`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EditGrant {
    _private: (),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hex_color() {
        assert_eq!(parse_hex_color("#ff0000"), Some([1.0, 0.0, 0.0]));
        assert_eq!(parse_hex_color("00ff00"), Some([0.0, 1.0, 0.0]));
        assert_eq!(parse_hex_color("#fff"), None);
        assert_eq!(parse_hex_color("#zzzzzz"), None);
    }

    #[test]
    fn test_only_professors_get_edit_grant() {
        assert!(Access::new("prof", Role::Professor).edit_grant().is_some());
        assert!(Access::new("stud", Role::Student).edit_grant().is_none());
    }

    #[test]
    fn test_part_deserializes_with_defaults() {
        let json = r#"{"id":"bicep","source":"models/arm/bicep.glb","layer_id":"muscles"}"#;
        let part: Part = serde_json::from_str(json).unwrap();
        assert!(part.default_visible);
        assert_eq!(part.transform, PartTransform::default());
    }

    #[test]
    fn test_view_mode_from_str() {
        assert_eq!("EDIT".parse::<ViewMode>(), Ok(ViewMode::Edit));
        assert!("draw".parse::<ViewMode>().is_err());
    }
}
