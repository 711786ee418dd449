//! Perspective camera, viewport and screen/world conversions

use glam::{Mat4, Vec2, Vec3, Vec4Swizzles};

use crate::model::ProjectedPoint;
use crate::raycast::Ray;

/// Pixel size of the render container
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Viewport {
    pub width: f32,
    pub height: f32,
}

impl Viewport {
    pub fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }

    /// A zero-sized container cannot produce a meaningful aspect ratio
    pub fn is_degenerate(&self) -> bool {
        !(self.width > 0.0 && self.height > 0.0)
    }

    pub fn aspect(&self) -> f32 {
        if self.is_degenerate() {
            1.0
        } else {
            self.width / self.height
        }
    }

    pub fn contains(&self, x: f32, y: f32) -> bool {
        x >= 0.0 && y >= 0.0 && x <= self.width && y <= self.height
    }

    /// Convert a pixel position (origin top-left) to normalized device coordinates
    pub fn to_ndc(&self, pixel: Vec2) -> Option<Vec2> {
        if self.is_degenerate() {
            return None;
        }
        Some(Vec2::new(
            pixel.x / self.width * 2.0 - 1.0,
            -(pixel.y / self.height * 2.0 - 1.0),
        ))
    }
}

/// Perspective camera with GL-style clip space (NDC depth in [-1, 1])
#[derive(Debug, Clone, PartialEq)]
pub struct PerspectiveCamera {
    pub position: Vec3,
    pub target: Vec3,
    pub up: Vec3,
    /// Vertical field of view in radians
    pub fov_y: f32,
    pub near: f32,
    pub far: f32,
    pub aspect: f32,
}

impl PerspectiveCamera {
    pub fn new(position: Vec3, target: Vec3, fov_y: f32, near: f32, far: f32) -> Self {
        Self {
            position,
            target,
            up: Vec3::Y,
            fov_y,
            near,
            far,
            aspect: 1.0,
        }
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, self.target, self.up)
    }

    pub fn projection_matrix(&self) -> Mat4 {
        Mat4::perspective_rh_gl(self.fov_y, self.aspect, self.near, self.far)
    }

    pub fn view_projection(&self) -> Mat4 {
        self.projection_matrix() * self.view_matrix()
    }

    /// Snapshot of the matrices used for one frame
    pub fn matrices(&self) -> CameraMatrices {
        let view = self.view_matrix();
        let projection = self.projection_matrix();
        CameraMatrices {
            position: self.position,
            view,
            projection,
            view_projection: projection * view,
            inverse_view_projection: (projection * view).inverse(),
        }
    }
}

/// Resolved camera matrices for a single frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraMatrices {
    pub position: Vec3,
    pub view: Mat4,
    pub projection: Mat4,
    pub view_projection: Mat4,
    pub inverse_view_projection: Mat4,
}

impl CameraMatrices {
    /// Project a model-space point to container pixels.
    ///
    /// `screen = (ndc.xy * 0.5 + 0.5) * viewport` with the y axis flipped so
    /// that the origin is the container's top-left corner. Points whose NDC
    /// depth is >= 1 (behind the camera or past the far plane) are marked
    /// not visible.
    pub fn project(&self, point: Vec3, viewport: Viewport) -> ProjectedPoint {
        let clip = self.view_projection * point.extend(1.0);
        if clip.w <= f32::EPSILON {
            // On or behind the camera plane; the perspective divide would flip signs
            return ProjectedPoint {
                x: 0.0,
                y: 0.0,
                visible: false,
            };
        }
        let ndc = clip.xyz() / clip.w;
        ProjectedPoint {
            x: (ndc.x * 0.5 + 0.5) * viewport.width,
            y: (-ndc.y * 0.5 + 0.5) * viewport.height,
            visible: ndc.z < 1.0,
        }
    }

    /// Ray from the camera through a point given in normalized device coordinates
    pub fn ray_from_ndc(&self, ndc: Vec2) -> Ray {
        let near = self
            .inverse_view_projection
            .project_point3(Vec3::new(ndc.x, ndc.y, -1.0));
        let far = self
            .inverse_view_projection
            .project_point3(Vec3::new(ndc.x, ndc.y, 1.0));
        Ray::new(near, far - near)
    }
}
