//! Triangle mesh data and primitive tessellation

use glam::{Mat4, Vec2, Vec3};
use std::f32::consts::{PI, TAU};

/// Indexed triangle mesh in local space
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MeshData {
    pub positions: Vec<[f32; 3]>,
    pub normals: Vec<[f32; 3]>,
    pub indices: Vec<u32>,
}

/// Axis-aligned bounding box
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub fn from_points(points: impl IntoIterator<Item = Vec3>) -> Option<Self> {
        let mut iter = points.into_iter();
        let first = iter.next()?;
        let (min, max) = iter.fold((first, first), |(min, max), p| (min.min(p), max.max(p)));
        Some(Self { min, max })
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Bounding box of this box after an affine transform
    pub fn transformed(&self, transform: &Mat4) -> Self {
        let corners = (0..8).map(|i| {
            let corner = Vec3::new(
                if i & 1 == 0 { self.min.x } else { self.max.x },
                if i & 2 == 0 { self.min.y } else { self.max.y },
                if i & 4 == 0 { self.min.z } else { self.max.z },
            );
            transform.transform_point3(corner)
        });
        // Eight corners always yield a box
        Self::from_points(corners).unwrap_or(*self)
    }
}

impl MeshData {
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Iterate triangles as vertex triples in local space
    pub fn triangles(&self) -> impl Iterator<Item = [Vec3; 3]> + '_ {
        self.indices.chunks_exact(3).filter_map(move |tri| {
            let fetch = |i: u32| self.positions.get(i as usize).copied().map(Vec3::from);
            Some([fetch(tri[0])?, fetch(tri[1])?, fetch(tri[2])?])
        })
    }

    pub fn bounds(&self) -> Option<Aabb> {
        Aabb::from_points(self.positions.iter().copied().map(Vec3::from))
    }

    /// Recompute smooth vertex normals from face normals
    pub fn compute_normals(&mut self) {
        let mut normals = vec![Vec3::ZERO; self.positions.len()];
        for tri in self.indices.chunks_exact(3) {
            let [a, b, c] = [tri[0], tri[1], tri[2]].map(|i| i as usize);
            if a >= normals.len() || b >= normals.len() || c >= normals.len() {
                continue;
            }
            let pa = Vec3::from(self.positions[a]);
            let face = (Vec3::from(self.positions[b]) - pa).cross(Vec3::from(self.positions[c]) - pa);
            normals[a] += face;
            normals[b] += face;
            normals[c] += face;
        }
        self.normals = normals
            .into_iter()
            .map(|n| n.try_normalize().unwrap_or(Vec3::Y).to_array())
            .collect();
    }

    /// Merge another mesh into this one, transforming its vertices
    pub fn append(&mut self, other: &MeshData, transform: Mat4) {
        let offset = self.positions.len() as u32;
        self.positions.extend(
            other
                .positions
                .iter()
                .map(|p| transform.transform_point3(Vec3::from(*p)).to_array()),
        );
        self.normals.extend(other.normals.iter().map(|n| {
            transform
                .transform_vector3(Vec3::from(*n))
                .try_normalize()
                .unwrap_or(Vec3::Y)
                .to_array()
        }));
        self.indices.extend(other.indices.iter().map(|i| i + offset));
    }
}

/// Revolve a 2D profile (x = radius, y = height) around the Y axis.
///
/// Profile points with zero radius collapse into poles.
pub fn lathe(profile: &[Vec2], segments: u32) -> MeshData {
    let segments = segments.max(3);
    let mut mesh = MeshData::default();
    if profile.len() < 2 {
        return mesh;
    }

    for i in 0..=segments {
        let angle = i as f32 / segments as f32 * TAU;
        let (sin, cos) = angle.sin_cos();
        for p in profile {
            mesh.positions.push([p.x * sin, p.y, p.x * cos]);
        }
    }

    let rows = profile.len() as u32;
    for i in 0..segments {
        for j in 0..rows - 1 {
            let a = i * rows + j;
            let b = (i + 1) * rows + j;
            let c = b + 1;
            let d = a + 1;
            mesh.indices.extend_from_slice(&[a, b, d, b, c, d]);
        }
    }

    mesh.compute_normals();
    mesh
}

/// UV sphere centered at the origin
pub fn sphere(radius: f32, segments: u32, rings: u32) -> MeshData {
    let rings = rings.max(2);
    let profile: Vec<Vec2> = (0..=rings)
        .map(|i| {
            let phi = i as f32 / rings as f32 * PI;
            Vec2::new(radius * phi.sin(), -radius * phi.cos())
        })
        .collect();
    lathe(&profile, segments)
}

/// Ellipsoid produced by scaling a unit sphere
pub fn ellipsoid(radii: Vec3, segments: u32, rings: u32) -> MeshData {
    let unit = sphere(1.0, segments, rings);
    let mut mesh = MeshData::default();
    mesh.append(&unit, Mat4::from_scale(radii));
    mesh.compute_normals();
    mesh
}

/// Capsule along the Y axis; `length` is the cylindrical section only
pub fn capsule(radius: f32, length: f32, segments: u32, cap_rings: u32) -> MeshData {
    let cap_rings = cap_rings.max(2);
    let half = length * 0.5;
    let mut profile = Vec::with_capacity(cap_rings as usize * 2 + 2);
    for i in 0..=cap_rings {
        let phi = i as f32 / cap_rings as f32 * PI * 0.5;
        profile.push(Vec2::new(radius * phi.sin(), -half - radius * phi.cos()));
    }
    for i in 0..=cap_rings {
        let phi = PI * 0.5 + i as f32 / cap_rings as f32 * PI * 0.5;
        profile.push(Vec2::new(radius * phi.sin(), half - radius * phi.cos()));
    }
    lathe(&profile, segments)
}

/// Extrude a closed, counter-clockwise outline in the XY plane along +Z.
///
/// Caps are triangulated as a fan, so the outline must be star-shaped
/// around its centroid.
pub fn extrude(outline: &[Vec2], depth: f32) -> MeshData {
    let mut mesh = MeshData::default();
    let n = outline.len() as u32;
    if n < 3 {
        return mesh;
    }
    let centroid = outline.iter().copied().sum::<Vec2>() / n as f32;
    let half = depth * 0.5;

    // Side walls: two rings of vertices
    for z in [-half, half] {
        for p in outline {
            mesh.positions.push([p.x, p.y, z]);
        }
    }
    for i in 0..n {
        let j = (i + 1) % n;
        let (a, b, c, d) = (i, j, n + j, n + i);
        mesh.indices.extend_from_slice(&[a, b, c, a, c, d]);
    }

    // Caps around their centroids
    let back_center = mesh.positions.len() as u32;
    mesh.positions.push([centroid.x, centroid.y, -half]);
    let front_center = back_center + 1;
    mesh.positions.push([centroid.x, centroid.y, half]);
    for i in 0..n {
        let j = (i + 1) % n;
        mesh.indices.extend_from_slice(&[back_center, j, i]);
        mesh.indices.extend_from_slice(&[front_center, n + i, n + j]);
    }

    mesh.compute_normals();
    mesh
}
