//! Procedural placeholder anatomy for models without authored parts

use glam::{Mat4, Quat, Vec2, Vec3};
use std::sync::Arc;
use tracing::info;

use crate::geometry::{capsule, ellipsoid, extrude, lathe, sphere, MeshData};
use crate::model::ModelId;
use crate::raycast::SurfaceOwner;
use crate::scene::{Material, NodeId, NodeKind, SceneGraph};

/// Anatomical tissue class, which decides shape and color
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartKind {
    Bone,
    Muscle,
    Cartilage,
    Organ,
}

impl PartKind {
    pub fn material(&self) -> Material {
        match self {
            PartKind::Bone => Material::new([0.93, 0.89, 0.80]),
            PartKind::Muscle => Material::new([0.72, 0.22, 0.20]),
            PartKind::Cartilage => Material {
                opacity: 0.85,
                ..Material::new([0.70, 0.82, 0.88])
            },
            PartKind::Organ => Material::new([0.62, 0.12, 0.16]),
        }
    }
}

/// Shape primitive with its tessellation parameters
#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    /// Long bone: shaft flaring into rounded ends
    LongBone { length: f32, shaft_radius: f32, head_radius: f32 },
    /// Fusiform muscle belly
    Belly { length: f32, radius: f32 },
    Sphere { radius: f32 },
    Ellipsoid { radii: Vec3 },
    Capsule { radius: f32, length: f32 },
    /// Flat plate extruded from an outline
    Plate { outline: Vec<Vec2>, depth: f32 },
}

impl Shape {
    pub fn tessellate(&self) -> MeshData {
        match self {
            Shape::LongBone {
                length,
                shaft_radius,
                head_radius,
            } => lathe(&long_bone_profile(*length, *shaft_radius, *head_radius), 24),
            Shape::Belly { length, radius } => lathe(&belly_profile(*length, *radius), 24),
            Shape::Sphere { radius } => sphere(*radius, 24, 16),
            Shape::Ellipsoid { radii } => ellipsoid(*radii, 24, 16),
            Shape::Capsule { radius, length } => capsule(*radius, *length, 16, 6),
            Shape::Plate { outline, depth } => extrude(outline, *depth),
        }
    }
}

fn long_bone_profile(length: f32, shaft: f32, head: f32) -> Vec<Vec2> {
    let half = length * 0.5;
    vec![
        Vec2::new(0.0, -half),
        Vec2::new(head * 0.8, -half + head * 0.2),
        Vec2::new(head, -half + head * 0.8),
        Vec2::new(shaft * 1.2, -half + head * 2.0),
        Vec2::new(shaft, -half * 0.4),
        Vec2::new(shaft, half * 0.4),
        Vec2::new(shaft * 1.2, half - head * 2.0),
        Vec2::new(head, half - head * 0.8),
        Vec2::new(head * 0.8, half - head * 0.2),
        Vec2::new(0.0, half),
    ]
}

fn belly_profile(length: f32, radius: f32) -> Vec<Vec2> {
    let half = length * 0.5;
    (0..=12)
        .map(|i| {
            let t = i as f32 / 12.0;
            let r = radius * (t * std::f32::consts::PI).sin().powf(0.7);
            Vec2::new(r, -half + t * length)
        })
        .collect()
}

fn rounded_outline(half_width: f32, half_height: f32, points: usize) -> Vec<Vec2> {
    (0..points)
        .map(|i| {
            let a = i as f32 / points as f32 * std::f32::consts::TAU;
            Vec2::new(half_width * a.cos(), half_height * a.sin())
        })
        .collect()
}

/// One named shape of the placeholder library
#[derive(Debug, Clone, PartialEq)]
pub struct ShapeSpec {
    pub name: &'static str,
    pub kind: PartKind,
    pub shape: Shape,
    pub translation: Vec3,
    pub rotation: Quat,
}

impl ShapeSpec {
    fn new(name: &'static str, kind: PartKind, shape: Shape, translation: Vec3) -> Self {
        Self {
            name,
            kind,
            shape,
            translation,
            rotation: Quat::IDENTITY,
        }
    }

    fn rotated(mut self, rotation: Quat) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn transform(&self) -> Mat4 {
        Mat4::from_rotation_translation(self.rotation, self.translation)
    }
}

fn heart() -> Vec<ShapeSpec> {
    use PartKind::Organ;
    vec![
        ShapeSpec::new(
            "left-ventricle",
            Organ,
            Shape::Ellipsoid {
                radii: Vec3::new(0.55, 0.8, 0.55),
            },
            Vec3::new(0.35, -0.3, 0.25),
        )
        .rotated(Quat::from_rotation_z(0.35)),
        ShapeSpec::new(
            "right-ventricle",
            Organ,
            Shape::Ellipsoid {
                radii: Vec3::new(0.45, 0.7, 0.45),
            },
            Vec3::new(-0.45, -0.2, 0.3),
        )
        .rotated(Quat::from_rotation_z(-0.3)),
        ShapeSpec::new(
            "left-atrium",
            Organ,
            Shape::Sphere { radius: 0.38 },
            Vec3::new(0.4, 0.6, -0.2),
        ),
        ShapeSpec::new(
            "right-atrium",
            Organ,
            Shape::Sphere { radius: 0.4 },
            Vec3::new(-0.5, 0.55, -0.1),
        ),
        ShapeSpec::new(
            "aorta",
            Organ,
            Shape::Capsule {
                radius: 0.16,
                length: 0.9,
            },
            Vec3::new(0.05, 1.15, -0.25),
        ),
        ShapeSpec::new(
            "pulmonary-trunk",
            Organ,
            Shape::Capsule {
                radius: 0.14,
                length: 0.6,
            },
            Vec3::new(-0.2, 1.0, 0.05),
        )
        .rotated(Quat::from_rotation_z(0.5)),
    ]
}

fn arm() -> Vec<ShapeSpec> {
    use PartKind::*;
    vec![
        ShapeSpec::new(
            "humerus",
            Bone,
            Shape::LongBone {
                length: 2.2,
                shaft_radius: 0.09,
                head_radius: 0.2,
            },
            Vec3::new(0.0, 1.1, 0.0),
        ),
        ShapeSpec::new(
            "radius",
            Bone,
            Shape::LongBone {
                length: 1.8,
                shaft_radius: 0.06,
                head_radius: 0.12,
            },
            Vec3::new(0.12, -0.95, 0.05),
        ),
        ShapeSpec::new(
            "ulna",
            Bone,
            Shape::LongBone {
                length: 1.9,
                shaft_radius: 0.06,
                head_radius: 0.13,
            },
            Vec3::new(-0.12, -0.95, -0.05),
        ),
        ShapeSpec::new(
            "bicep",
            Muscle,
            Shape::Belly {
                length: 1.6,
                radius: 0.28,
            },
            Vec3::new(0.0, 1.0, 0.22),
        ),
        ShapeSpec::new(
            "tricep",
            Muscle,
            Shape::Belly {
                length: 1.8,
                radius: 0.3,
            },
            Vec3::new(0.0, 1.1, -0.24),
        ),
        ShapeSpec::new(
            "deltoid",
            Muscle,
            Shape::Ellipsoid {
                radii: Vec3::new(0.38, 0.45, 0.36),
            },
            Vec3::new(0.0, 2.1, 0.0),
        ),
        ShapeSpec::new(
            "elbow-cartilage",
            Cartilage,
            Shape::Plate {
                outline: rounded_outline(0.22, 0.1, 16),
                depth: 0.2,
            },
            Vec3::new(0.0, 0.0, 0.0),
        )
        .rotated(Quat::from_rotation_x(std::f32::consts::FRAC_PI_2)),
    ]
}

/// Short spinal segment, used for any model without a dedicated layout
fn spine_segment() -> Vec<ShapeSpec> {
    use PartKind::*;
    let mut shapes = Vec::new();
    for (i, name) in ["vertebra-1", "vertebra-2", "vertebra-3"].into_iter().enumerate() {
        let y = i as f32 * 0.7 - 0.7;
        shapes.push(
            ShapeSpec::new(
                name,
                Bone,
                Shape::Plate {
                    outline: rounded_outline(0.45, 0.35, 20),
                    depth: 0.4,
                },
                Vec3::new(0.0, y, 0.0),
            )
            .rotated(Quat::from_rotation_x(std::f32::consts::FRAC_PI_2)),
        );
    }
    for (i, name) in ["disc-1", "disc-2"].into_iter().enumerate() {
        let y = i as f32 * 0.7 - 0.35;
        shapes.push(
            ShapeSpec::new(
                name,
                Cartilage,
                Shape::Plate {
                    outline: rounded_outline(0.42, 0.32, 20),
                    depth: 0.22,
                },
                Vec3::new(0.0, y, 0.0),
            )
            .rotated(Quat::from_rotation_x(std::f32::consts::FRAC_PI_2)),
        );
    }
    shapes.push(ShapeSpec::new(
        "erector-spinae",
        Muscle,
        Shape::Belly {
            length: 2.0,
            radius: 0.18,
        },
        Vec3::new(0.0, 0.0, -0.55),
    ));
    shapes
}

/// Shape layout chosen for a model id
pub fn layout_for(model_id: &ModelId) -> Vec<ShapeSpec> {
    let id = model_id.as_str().to_ascii_lowercase();
    if id.contains("heart") {
        heart()
    } else if id.contains("arm") || id.contains("limb") {
        arm()
    } else {
        spine_segment()
    }
}

/// Add the placeholder anatomy for `model_id` under `parent`.
///
/// Deterministic for a given id. Every mesh is pickable and owned by
/// `SurfaceOwner::Fallback(shape name)`. Returns the group node.
pub fn build_fallback(model_id: &ModelId, graph: &mut SceneGraph, parent: NodeId) -> NodeId {
    let group = graph.add(parent, "procedural", NodeKind::Group, Mat4::IDENTITY);
    let layout = layout_for(model_id);
    let count = layout.len();
    for spec in layout {
        let mesh = Arc::new(spec.shape.tessellate());
        graph.add(
            group,
            spec.name,
            NodeKind::Mesh {
                mesh,
                material: spec.kind.material(),
                pickable: Some(SurfaceOwner::Fallback(spec.name.to_string())),
            },
            spec.transform(),
        );
    }
    info!(model = %model_id, shapes = count, "Built procedural fallback");
    group
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_is_deterministic() {
        let id = ModelId::new("heart-3d");
        let mut a = SceneGraph::new();
        let mut b = SceneGraph::new();
        let (root_a, root_b) = (a.root(), b.root());
        build_fallback(&id, &mut a, root_a);
        build_fallback(&id, &mut b, root_b);
        let names = |g: &SceneGraph| g.iter().map(|(_, n)| n.name.clone()).collect::<Vec<_>>();
        assert_eq!(names(&a), names(&b));
        assert_eq!(a.pickable_surfaces().len(), 6);
    }

    #[test]
    fn test_heart_has_left_ventricle() {
        let mut graph = SceneGraph::new();
        let root = graph.root();
        build_fallback(&ModelId::new("heart-3d"), &mut graph, root);
        assert!(graph
            .pickable_surfaces()
            .iter()
            .any(|s| s.owner == SurfaceOwner::Fallback("left-ventricle".to_string())));
    }

    #[test]
    fn test_every_shape_tessellates() {
        for id in ["heart-3d", "arm", "lumbar"] {
            for spec in layout_for(&ModelId::new(id)) {
                let mesh = spec.shape.tessellate();
                assert!(!mesh.is_empty(), "{} in {}", spec.name, id);
                assert_eq!(mesh.normals.len(), mesh.positions.len());
            }
        }
    }

    #[test]
    fn test_fallback_covers_all_tissue_kinds() {
        let kinds: Vec<PartKind> = arm().iter().map(|s| s.kind).collect();
        for kind in [PartKind::Bone, PartKind::Muscle, PartKind::Cartilage] {
            assert!(kinds.contains(&kind));
        }
        assert!(heart().iter().all(|s| s.kind == PartKind::Organ));
    }
}
