//! Ray casting against pickable surfaces

use glam::{Mat4, Vec3};
use std::sync::Arc;

use crate::geometry::{Aabb, MeshData};
use crate::model::PartId;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ray {
    pub origin: Vec3,
    /// Unit direction
    pub direction: Vec3,
}

impl Ray {
    pub fn new(origin: Vec3, direction: Vec3) -> Self {
        Self {
            origin,
            direction: direction.try_normalize().unwrap_or(Vec3::NEG_Z),
        }
    }

    pub fn at(&self, t: f32) -> Vec3 {
        self.origin + self.direction * t
    }

    /// Slab test; returns the entry distance if the box is hit in front of the origin
    pub fn intersect_aabb(&self, aabb: &Aabb) -> Option<f32> {
        let inv = self.direction.recip();
        let t1 = (aabb.min - self.origin) * inv;
        let t2 = (aabb.max - self.origin) * inv;
        let t_near = t1.min(t2).max_element();
        let t_far = t1.max(t2).min_element();
        if t_far < 0.0 || t_near > t_far {
            None
        } else {
            Some(t_near.max(0.0))
        }
    }

    /// Möller–Trumbore ray/triangle intersection, double-sided
    pub fn intersect_triangle(&self, v0: Vec3, v1: Vec3, v2: Vec3) -> Option<f32> {
        const EPSILON: f32 = 1e-8;

        let edge1 = v1 - v0;
        let edge2 = v2 - v0;
        let h = self.direction.cross(edge2);
        let a = edge1.dot(h);
        if a.abs() < EPSILON {
            return None;
        }

        let f = 1.0 / a;
        let s = self.origin - v0;
        let u = f * s.dot(h);
        if !(0.0..=1.0).contains(&u) {
            return None;
        }

        let q = s.cross(edge1);
        let v = f * self.direction.dot(q);
        if v < 0.0 || u + v > 1.0 {
            return None;
        }

        let t = f * edge2.dot(q);
        (t > EPSILON).then_some(t)
    }
}

/// What a pickable surface belongs to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SurfaceOwner {
    /// An authored part streamed by the part loader
    Part(PartId),
    /// A procedurally generated placeholder shape
    Fallback(String),
}

impl std::fmt::Display for SurfaceOwner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SurfaceOwner::Part(id) => write!(f, "part:{}", id),
            SurfaceOwner::Fallback(name) => write!(f, "fallback:{}", name),
        }
    }
}

/// A mesh placed in model space that rays can hit
#[derive(Debug, Clone)]
pub struct Surface {
    pub owner: SurfaceOwner,
    pub mesh: Arc<MeshData>,
    pub transform: Mat4,
    bounds: Option<Aabb>,
}

impl Surface {
    pub fn new(owner: SurfaceOwner, mesh: Arc<MeshData>, transform: Mat4) -> Self {
        let bounds = mesh.bounds().map(|b| b.transformed(&transform));
        Self {
            owner,
            mesh,
            transform,
            bounds,
        }
    }

    pub fn bounds(&self) -> Option<Aabb> {
        self.bounds
    }

    /// Nearest hit distance along the ray, in model-space units
    pub fn intersect(&self, ray: &Ray) -> Option<f32> {
        let bounds = self.bounds?;
        ray.intersect_aabb(&bounds)?;

        self.mesh
            .triangles()
            .filter_map(|[a, b, c]| {
                ray.intersect_triangle(
                    self.transform.transform_point3(a),
                    self.transform.transform_point3(b),
                    self.transform.transform_point3(c),
                )
            })
            .min_by(|a, b| a.total_cmp(b))
    }
}

/// Result of a successful pick
#[derive(Debug, Clone, PartialEq)]
pub struct Hit {
    pub point: Vec3,
    pub distance: f32,
    pub owner: SurfaceOwner,
}

/// Nearest intersection of `ray` with any of `surfaces`
pub fn cast(ray: &Ray, surfaces: &[Surface]) -> Option<Hit> {
    let mut nearest: Option<(f32, &Surface)> = None;
    for surface in surfaces {
        // Skip surfaces whose bounds start beyond the current best hit
        if let (Some((best, _)), Some(bounds)) = (nearest, surface.bounds()) {
            match ray.intersect_aabb(&bounds) {
                Some(entry) if entry <= best => {}
                _ => continue,
            }
        }
        if let Some(t) = surface.intersect(ray) {
            if nearest.map_or(true, |(best, _)| t < best) {
                nearest = Some((t, surface));
            }
        }
    }
    nearest.map(|(distance, surface)| Hit {
        point: ray.at(distance),
        distance,
        owner: surface.owner.clone(),
    })
}
