//! Scene graph, lighting and the per-frame host loop

use glam::{Mat4, Vec2, Vec3};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::camera::{CameraMatrices, PerspectiveCamera, Viewport};
use crate::config::{GridConfig, ViewerConfig};
use crate::controls::OrbitControls;
use crate::error::ViewerError;
use crate::geometry::MeshData;
use crate::model::{Model, PartId};
use crate::raycast::{Ray, Surface, SurfaceOwner};

/// Index of a node inside a [`SceneGraph`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

/// Surface appearance of a mesh node
#[derive(Debug, Clone, PartialEq)]
pub struct Material {
    pub base_color: [f32; 3],
    pub roughness: f32,
    pub opacity: f32,
}

impl Material {
    pub fn new(base_color: [f32; 3]) -> Self {
        Self {
            base_color,
            roughness: 0.6,
            opacity: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Light {
    Directional {
        /// Direction the light travels in
        direction: Vec3,
        illuminance: f32,
        color: [f32; 3],
    },
    Ambient {
        brightness: f32,
        color: [f32; 3],
    },
}

/// Three directional lights plus one ambient term
pub fn lighting_rig() -> [Light; 4] {
    [
        // Key light from upper front right
        Light::Directional {
            direction: Vec3::new(-0.5, -1.0, -0.6).normalize(),
            illuminance: 8000.0,
            color: [1.0, 0.97, 0.92],
        },
        // Fill from the left
        Light::Directional {
            direction: Vec3::new(0.8, -0.3, -0.4).normalize(),
            illuminance: 3000.0,
            color: [0.9, 0.93, 1.0],
        },
        // Rim from behind
        Light::Directional {
            direction: Vec3::new(0.0, -0.4, 1.0).normalize(),
            illuminance: 2500.0,
            color: [1.0, 1.0, 1.0],
        },
        Light::Ambient {
            brightness: 300.0,
            color: [1.0, 1.0, 1.0],
        },
    ]
}

#[derive(Debug, Clone)]
pub enum NodeKind {
    Group,
    Mesh {
        mesh: Arc<MeshData>,
        material: Material,
        /// Set when rays may hit this mesh
        pickable: Option<SurfaceOwner>,
    },
    /// Reference to a part owned by the part loader
    Part(PartId),
    Light(Light),
    Grid(GridConfig),
}

#[derive(Debug, Clone)]
pub struct SceneNode {
    pub name: String,
    pub kind: NodeKind,
    /// Transform relative to the parent node
    pub transform: Mat4,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
}

/// Geometry and material counts released by [`SceneGraph::dispose`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DisposeStats {
    pub nodes: usize,
    pub geometries: usize,
    pub materials: usize,
}

/// Arena-backed scene graph. Removed slots are left empty so ids stay stable.
#[derive(Debug, Clone)]
pub struct SceneGraph {
    nodes: Vec<Option<SceneNode>>,
    root: NodeId,
    part_nodes: HashMap<PartId, NodeId>,
    /// Bumped on every structural change so renderers can resync lazily
    revision: u64,
}

impl Default for SceneGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl SceneGraph {
    pub fn new() -> Self {
        let root = SceneNode {
            name: "root".to_string(),
            kind: NodeKind::Group,
            transform: Mat4::IDENTITY,
            parent: None,
            children: Vec::new(),
        };
        Self {
            nodes: vec![Some(root)],
            root: NodeId(0),
            part_nodes: HashMap::new(),
            revision: 0,
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn get(&self, id: NodeId) -> Option<&SceneNode> {
        self.nodes.get(id.0).and_then(Option::as_ref)
    }

    /// Attach a new node under `parent`; falls back to the root for stale parents
    pub fn add(&mut self, parent: NodeId, name: impl Into<String>, kind: NodeKind, transform: Mat4) -> NodeId {
        let parent = if self.get(parent).is_some() {
            parent
        } else {
            self.root
        };
        let id = NodeId(self.nodes.len());
        self.nodes.push(Some(SceneNode {
            name: name.into(),
            kind,
            transform,
            parent: Some(parent),
            children: Vec::new(),
        }));
        if let Some(Some(p)) = self.nodes.get_mut(parent.0) {
            p.children.push(id);
        }
        self.revision += 1;
        id
    }

    /// Detach and drop a node with its whole subtree. The root cannot be removed.
    pub fn remove(&mut self, id: NodeId) -> usize {
        if id == self.root || self.get(id).is_none() {
            return 0;
        }
        if let Some(parent) = self.get(id).and_then(|n| n.parent) {
            if let Some(Some(p)) = self.nodes.get_mut(parent.0) {
                p.children.retain(|c| *c != id);
            }
        }
        let mut removed = 0;
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            if let Some(node) = self.nodes.get_mut(next.0).and_then(Option::take) {
                if let NodeKind::Part(part_id) = &node.kind {
                    self.part_nodes.remove(part_id);
                }
                stack.extend(node.children);
                removed += 1;
            }
        }
        self.revision += 1;
        removed
    }

    /// Live nodes in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &SceneNode)> {
        self.nodes
            .iter()
            .enumerate()
            .filter_map(|(i, n)| n.as_ref().map(|n| (NodeId(i), n)))
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() <= 1
    }

    /// Model-space transform of a node (product of its ancestors' transforms)
    pub fn world_transform(&self, id: NodeId) -> Mat4 {
        let mut transform = Mat4::IDENTITY;
        let mut current = Some(id);
        while let Some(node) = current.and_then(|c| self.get(c)) {
            transform = node.transform * transform;
            current = node.parent;
        }
        transform
    }

    /// Pickable mesh nodes as ray-cast surfaces
    pub fn pickable_surfaces(&self) -> Vec<Surface> {
        self.iter()
            .filter_map(|(id, node)| match &node.kind {
                NodeKind::Mesh {
                    mesh,
                    pickable: Some(owner),
                    ..
                } => Some(Surface::new(owner.clone(), mesh.clone(), self.world_transform(id))),
                _ => None,
            })
            .collect()
    }

    /// Parts currently attached to the graph
    pub fn attached_parts(&self) -> impl Iterator<Item = &PartId> {
        self.part_nodes.keys()
    }

    /// Make the set of attached part nodes match `parts` exactly
    pub fn sync_parts<'a>(&mut self, parts: impl IntoIterator<Item = (&'a PartId, Mat4)>) {
        let wanted: HashMap<PartId, Mat4> =
            parts.into_iter().map(|(id, t)| (id.clone(), t)).collect();

        let stale: Vec<NodeId> = self
            .part_nodes
            .iter()
            .filter(|(id, _)| !wanted.contains_key(*id))
            .map(|(_, node)| *node)
            .collect();
        for node in stale {
            self.remove(node);
        }

        let mut added: Vec<(PartId, Mat4)> = wanted
            .into_iter()
            .filter(|(id, _)| !self.part_nodes.contains_key(id))
            .collect();
        added.sort_by(|a, b| a.0.cmp(&b.0));
        for (id, transform) in added {
            let node = self.add(self.root, id.as_str(), NodeKind::Part(id.clone()), transform);
            self.part_nodes.insert(id, node);
        }
    }

    /// Drop every node and count the released resources
    pub fn dispose(&mut self) -> DisposeStats {
        let mut stats = DisposeStats::default();
        for node in self.nodes.drain(..).flatten() {
            stats.nodes += 1;
            if let NodeKind::Mesh { .. } = node.kind {
                stats.geometries += 1;
                stats.materials += 1;
            }
        }
        self.part_nodes.clear();
        self.revision += 1;
        stats
    }
}

impl GridConfig {
    /// Line segments of the ground grid on the XZ plane at `y`
    pub fn lines(&self, y: f32) -> Vec<(Vec3, Vec3)> {
        let n = self.half_extent as i32;
        let extent = n as f32 * self.spacing;
        (-n..=n)
            .flat_map(|i| {
                let offset = i as f32 * self.spacing;
                [
                    (Vec3::new(offset, y, -extent), Vec3::new(offset, y, extent)),
                    (Vec3::new(-extent, y, offset), Vec3::new(extent, y, offset)),
                ]
            })
            .collect()
    }
}

/// Everything a subscriber needs from one rendered frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameContext {
    pub frame: u64,
    pub dt: f32,
    pub matrices: CameraMatrices,
    pub viewport: Viewport,
}

/// Receives the resolved camera after each rendered frame
pub trait FrameSubscriber {
    fn on_frame(&mut self, frame: &FrameContext);
}

/// Whatever draws the scene (a GPU canvas, a test recorder)
pub trait RenderSurface {
    fn render(&mut self, scene: &SceneGraph, camera: &PerspectiveCamera, frame: &FrameContext);

    fn resize(&mut self, _viewport: Viewport) {}

    /// Release the drawing target; called once on dispose
    fn detach(&mut self) {}
}

/// Owns the scene graph, camera and controls, and drives the frame loop.
///
/// Every field is optional so that dispose works after a partial initialize.
#[derive(Debug, Default)]
pub struct SceneHost {
    graph: Option<SceneGraph>,
    camera: Option<PerspectiveCamera>,
    controls: Option<OrbitControls>,
    viewport: Viewport,
    frame: u64,
    last_frame: Option<FrameContext>,
    disposed: bool,
}

impl SceneHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the camera, controls, lights and grid for `model` in `viewport`
    pub fn initialize(
        &mut self,
        viewport: Viewport,
        model: &Model,
        config: &ViewerConfig,
    ) -> Result<(), ViewerError> {
        if self.disposed {
            return Err(ViewerError::NotMounted);
        }
        if !model.camera_position.is_finite() {
            return Err(ViewerError::InvalidCamera(model.id.to_string()));
        }

        self.viewport = viewport;
        if viewport.is_degenerate() {
            warn!(
                width = viewport.width,
                height = viewport.height,
                "Container has no size yet, using placeholder aspect"
            );
        }

        let mut graph = SceneGraph::new();
        let root = graph.root();
        for (i, light) in lighting_rig().into_iter().enumerate() {
            graph.add(root, format!("light-{}", i), NodeKind::Light(light), Mat4::IDENTITY);
        }
        if config.grid.show {
            graph.add(root, "grid", NodeKind::Grid(config.grid.clone()), Mat4::IDENTITY);
        }
        self.graph = Some(graph);

        let cam_config = &config.camera;
        let mut camera = PerspectiveCamera::new(
            model.camera_position,
            cam_config.look_at,
            cam_config.fov_degrees.to_radians(),
            cam_config.near,
            cam_config.far,
        );
        camera.aspect = viewport.aspect();
        self.camera = Some(camera);

        self.controls = Some(OrbitControls::new(
            model.camera_position,
            cam_config.look_at,
            &config.controls,
        ));

        info!(model = %model.id, "Scene initialized");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        !self.disposed && self.graph.is_some() && self.camera.is_some()
    }

    /// Advance controls, render, then hand the frame to each subscriber in order.
    ///
    /// Returns false without doing anything once disposed or before initialize.
    pub fn tick(
        &mut self,
        dt: f32,
        surface: &mut dyn RenderSurface,
        subscribers: &mut [&mut dyn FrameSubscriber],
    ) -> bool {
        if !self.is_running() {
            return false;
        }
        let (Some(graph), Some(camera)) = (self.graph.as_ref(), self.camera.as_mut()) else {
            return false;
        };

        if let Some(controls) = self.controls.as_mut() {
            if controls.update(dt) {
                camera.position = controls.position();
                camera.target = controls.target;
            }
        }

        self.frame += 1;
        let frame = FrameContext {
            frame: self.frame,
            dt,
            matrices: camera.matrices(),
            viewport: self.viewport,
        };
        surface.render(graph, camera, &frame);
        for subscriber in subscribers.iter_mut() {
            subscriber.on_frame(&frame);
        }
        self.last_frame = Some(frame);
        true
    }

    /// Update aspect and viewport; repeated calls with the same size do nothing
    pub fn resize(&mut self, width: f32, height: f32, surface: Option<&mut dyn RenderSurface>) {
        let viewport = Viewport::new(width, height);
        if self.disposed || viewport == self.viewport {
            return;
        }
        self.viewport = viewport;
        if let Some(camera) = self.camera.as_mut() {
            camera.aspect = viewport.aspect();
        }
        if let Some(surface) = surface {
            surface.resize(viewport);
        }
        debug!(width, height, "Viewport resized");
    }

    /// Stop the loop and release everything. Only the first call has an effect.
    pub fn dispose(&mut self, surface: Option<&mut dyn RenderSurface>) -> Option<DisposeStats> {
        if self.disposed {
            debug!("Scene host already disposed");
            return None;
        }
        self.disposed = true;
        if let Some(controls) = self.controls.as_mut() {
            controls.dispose();
        }
        let stats = self.graph.as_mut().map(SceneGraph::dispose).unwrap_or_default();
        self.graph = None;
        self.camera = None;
        self.last_frame = None;
        if let Some(surface) = surface {
            surface.detach();
        }
        info!(
            geometries = stats.geometries,
            materials = stats.materials,
            "Scene disposed"
        );
        Some(stats)
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn graph(&self) -> Option<&SceneGraph> {
        self.graph.as_ref()
    }

    pub fn graph_mut(&mut self) -> Option<&mut SceneGraph> {
        self.graph.as_mut()
    }

    pub fn camera(&self) -> Option<&PerspectiveCamera> {
        self.camera.as_ref()
    }

    pub fn controls(&self) -> Option<&OrbitControls> {
        self.controls.as_ref()
    }

    pub fn controls_mut(&mut self) -> Option<&mut OrbitControls> {
        self.controls.as_mut()
    }

    pub fn last_frame(&self) -> Option<&FrameContext> {
        self.last_frame.as_ref()
    }

    /// Camera matrices for the current pose (not necessarily rendered yet)
    pub fn matrices(&self) -> Option<CameraMatrices> {
        self.camera.as_ref().map(PerspectiveCamera::matrices)
    }

    /// Camera ray through a pixel of the container
    pub fn pick_ray(&self, pixel: Vec2) -> Option<Ray> {
        let ndc = self.viewport.to_ndc(pixel)?;
        Some(self.matrices()?.ray_from_ndc(ndc))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::geometry::sphere;
    use crate::model::ModelId;

    /// Records the order of render calls for assertions
    #[derive(Default)]
    pub(crate) struct RecordingSurface {
        pub frames: Vec<u64>,
        pub resizes: usize,
        pub detached: usize,
        pub log: Vec<&'static str>,
    }

    impl RenderSurface for RecordingSurface {
        fn render(&mut self, _scene: &SceneGraph, _camera: &PerspectiveCamera, frame: &FrameContext) {
            self.frames.push(frame.frame);
            self.log.push("render");
        }

        fn resize(&mut self, _viewport: Viewport) {
            self.resizes += 1;
        }

        fn detach(&mut self) {
            self.detached += 1;
        }
    }

    struct CountingSubscriber {
        seen: Vec<u64>,
    }

    impl FrameSubscriber for CountingSubscriber {
        fn on_frame(&mut self, frame: &FrameContext) {
            self.seen.push(frame.frame);
        }
    }

    fn model() -> Model {
        Model {
            id: ModelId::new("test"),
            name: "Test".to_string(),
            camera_position: Vec3::new(0.0, 0.0, 5.0),
            parts: Vec::new(),
        }
    }

    fn host() -> SceneHost {
        let mut host = SceneHost::new();
        host.initialize(Viewport::new(800.0, 600.0), &model(), &ViewerConfig::default())
            .unwrap();
        host
    }

    #[test]
    fn test_initialize_adds_lights_and_grid() {
        let host = host();
        let graph = host.graph().unwrap();
        let lights: Vec<_> = graph
            .iter()
            .filter_map(|(_, n)| match &n.kind {
                NodeKind::Light(l) => Some(l.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(lights.len(), 4);
        assert_eq!(
            lights
                .iter()
                .filter(|l| matches!(l, Light::Directional { .. }))
                .count(),
            3
        );
        assert!(graph.iter().any(|(_, n)| matches!(n.kind, NodeKind::Grid(_))));
        assert!(graph.pickable_surfaces().is_empty());
    }

    #[test]
    fn test_tick_renders_before_subscribers() {
        let mut host = host();
        let mut surface = RecordingSurface::default();
        let mut a = CountingSubscriber { seen: vec![] };
        let mut b = CountingSubscriber { seen: vec![] };
        for _ in 0..2 {
            let mut subscribers: [&mut dyn FrameSubscriber; 2] = [&mut a, &mut b];
            assert!(host.tick(0.016, &mut surface, &mut subscribers));
        }
        assert_eq!(surface.frames, vec![1, 2]);
        assert_eq!(a.seen, vec![1, 2]);
        assert_eq!(b.seen, vec![1, 2]);
    }

    #[test]
    fn test_dispose_is_exactly_once() {
        let mut host = host();
        host.graph_mut().unwrap().add(
            NodeId(0),
            "ball",
            NodeKind::Mesh {
                mesh: Arc::new(sphere(1.0, 8, 4)),
                material: Material::new([1.0, 0.0, 0.0]),
                pickable: None,
            },
            Mat4::IDENTITY,
        );
        let mut surface = RecordingSurface::default();
        let stats = host.dispose(Some(&mut surface)).unwrap();
        assert_eq!(stats.geometries, 1);
        assert_eq!(stats.materials, 1);
        assert!(host.dispose(Some(&mut surface)).is_none());
        assert_eq!(surface.detached, 1);
        assert!(!host.tick(0.016, &mut surface, &mut []));
        assert!(surface.frames.is_empty());
    }

    #[test]
    fn test_dispose_tolerates_uninitialized_host() {
        let mut host = SceneHost::new();
        assert_eq!(host.dispose(None), Some(DisposeStats::default()));
        assert!(host.dispose(None).is_none());
    }

    #[test]
    fn test_zero_size_container_is_not_fatal() {
        let mut host = SceneHost::new();
        host.initialize(Viewport::new(0.0, 0.0), &model(), &ViewerConfig::default())
            .unwrap();
        assert!(host.viewport().is_degenerate());
        assert_eq!(host.camera().unwrap().aspect, 1.0);
        let mut surface = RecordingSurface::default();
        host.resize(1024.0, 512.0, Some(&mut surface));
        assert_eq!(host.camera().unwrap().aspect, 2.0);
    }

    #[test]
    fn test_resize_is_idempotent() {
        let mut host = host();
        let mut surface = RecordingSurface::default();
        host.resize(640.0, 480.0, Some(&mut surface));
        host.resize(640.0, 480.0, Some(&mut surface));
        assert_eq!(surface.resizes, 1);
    }

    #[test]
    fn test_invalid_camera_rejected() {
        let mut bad = model();
        bad.camera_position = Vec3::new(f32::NAN, 0.0, 1.0);
        let mut host = SceneHost::new();
        assert!(matches!(
            host.initialize(Viewport::new(10.0, 10.0), &bad, &ViewerConfig::default()),
            Err(ViewerError::InvalidCamera(_))
        ));
    }

    #[test]
    fn test_sync_parts_attaches_and_detaches() {
        let mut graph = SceneGraph::new();
        let bicep = PartId::new("bicep");
        let tricep = PartId::new("tricep");
        graph.sync_parts([(&bicep, Mat4::IDENTITY), (&tricep, Mat4::IDENTITY)]);
        assert_eq!(graph.attached_parts().count(), 2);
        graph.sync_parts([(&tricep, Mat4::IDENTITY)]);
        let attached: Vec<_> = graph.attached_parts().collect();
        assert_eq!(attached, vec![&tricep]);
        assert_eq!(graph.len(), 2);
    }

    #[test]
    fn test_world_transform_composes_parents() {
        let mut graph = SceneGraph::new();
        let group = graph.add(
            graph.root(),
            "group",
            NodeKind::Group,
            Mat4::from_translation(Vec3::X),
        );
        let child = graph.add(group, "child", NodeKind::Group, Mat4::from_translation(Vec3::Y));
        let p = graph.world_transform(child).transform_point3(Vec3::ZERO);
        assert_eq!(p, Vec3::new(1.0, 1.0, 0.0));
        assert_eq!(graph.remove(group), 2);
        assert!(graph.get(child).is_none());
    }

    #[test]
    fn test_grid_lines() {
        let grid = GridConfig {
            half_extent: 2,
            ..GridConfig::default()
        };
        assert_eq!(grid.lines(0.0).len(), 10);
    }
}
