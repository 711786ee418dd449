//! 3D scene mirroring and camera input
//!
//! The viewer's scene host renders into [`FrameCapture`]; whenever the scene
//! graph changes its nodes are respawned as Bevy entities. Pointer input
//! drives the orbit controls, and short clicks are handed to picking.

use anatomy_core::camera::PerspectiveCamera;
use anatomy_core::config::GridConfig;
use anatomy_core::geometry::MeshData;
use anatomy_core::scene::{FrameContext, Light, Material, NodeKind, RenderSurface, SceneGraph};
use bevy::asset::RenderAssetUsages;
use bevy::input::mouse::{MouseMotion, MouseScrollUnit, MouseWheel};
use bevy::mesh::{Indices, PrimitiveTopology};
use bevy::prelude::*;
use bevy_egui::EguiContexts;
use std::sync::Arc;
use tracing::debug;

use crate::app::{ViewerSet, ViewerState};

/// Pointer travel below which a press-release counts as a click, in pixels
const CLICK_SLOP: f32 = 5.0;

/// Touch travel below which a touch counts as a tap, in pixels
const TAP_SLOP: f32 = 10.0;

/// Pixel-unit wheel deltas per line step
const PIXELS_PER_LINE: f32 = 100.0;

pub struct ScenePlugin;

impl Plugin for ScenePlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<FrameCapture>()
            .init_resource::<PointerState>()
            .add_systems(Startup, setup_camera)
            .add_systems(
                Update,
                (
                    handle_pointer.in_set(ViewerSet::Input),
                    drive_frame.in_set(ViewerSet::Frame),
                    sync_scene_nodes.in_set(ViewerSet::Sync),
                ),
            );
    }
}

/// Marker component for the main camera
#[derive(Component)]
pub struct MainCamera;

/// Marks an entity spawned from a scene graph node
#[derive(Component)]
pub struct SceneNodeEntity;

/// What one scene graph node turns into
#[derive(Debug, Clone)]
pub enum DrawItem {
    Mesh {
        name: String,
        mesh: Arc<MeshData>,
        material: Material,
        transform: Mat4,
    },
    Directional {
        direction: Vec3,
        illuminance: f32,
        color: [f32; 3],
    },
    Ambient {
        brightness: f32,
        color: [f32; 3],
    },
    Grid(GridConfig),
}

/// Render target handed to the scene host each frame.
///
/// Keeps the camera of the last frame and, when the graph revision moved,
/// a fresh snapshot of the nodes to mirror.
#[derive(Resource, Default)]
pub struct FrameCapture {
    camera: Option<PerspectiveCamera>,
    revision: Option<u64>,
    pending: Option<Vec<DrawItem>>,
    detached: bool,
}

impl FrameCapture {
    pub fn camera(&self) -> Option<&PerspectiveCamera> {
        self.camera.as_ref()
    }

    fn take_pending(&mut self) -> Option<Vec<DrawItem>> {
        self.pending.take()
    }

    fn take_detached(&mut self) -> bool {
        std::mem::take(&mut self.detached)
    }
}

impl RenderSurface for FrameCapture {
    fn render(&mut self, scene: &SceneGraph, camera: &PerspectiveCamera, _frame: &FrameContext) {
        self.camera = Some(camera.clone());
        if self.revision != Some(scene.revision()) {
            self.revision = Some(scene.revision());
            self.pending = Some(snapshot(scene));
        }
    }

    fn detach(&mut self) {
        self.camera = None;
        self.revision = None;
        self.pending = None;
        self.detached = true;
    }
}

/// Flatten the graph into drawable items with world transforms
fn snapshot(scene: &SceneGraph) -> Vec<DrawItem> {
    scene
        .iter()
        .filter_map(|(id, node)| match &node.kind {
            NodeKind::Mesh { mesh, material, .. } => Some(DrawItem::Mesh {
                name: node.name.clone(),
                mesh: mesh.clone(),
                material: material.clone(),
                transform: scene.world_transform(id),
            }),
            NodeKind::Light(Light::Directional {
                direction,
                illuminance,
                color,
            }) => Some(DrawItem::Directional {
                direction: *direction,
                illuminance: *illuminance,
                color: *color,
            }),
            NodeKind::Light(Light::Ambient { brightness, color }) => Some(DrawItem::Ambient {
                brightness: *brightness,
                color: *color,
            }),
            NodeKind::Grid(grid) => Some(DrawItem::Grid(grid.clone())),
            // Parts are spawned from their glTF scenes
            NodeKind::Group | NodeKind::Part(_) => None,
        })
        .collect()
}

fn setup_camera(mut commands: Commands) {
    commands.spawn((
        Camera3d::default(),
        Projection::Perspective(PerspectiveProjection::default()),
        Transform::from_xyz(0.0, 1.0, 6.0).looking_at(Vec3::ZERO, Vec3::Y),
        MainCamera,
    ));
}

/// Press and touch tracking for click and tap detection
#[derive(Resource, Default)]
struct PointerState {
    /// Where the left button went down
    press: Option<Vec2>,
    /// Distance moved since the press
    travel: f32,
    /// Position where touch started
    touch_start: Option<Vec2>,
    /// Whether this touch has moved significantly (is a drag, not a tap)
    touch_dragging: bool,
}

/// Orbit, pan and zoom the camera; short clicks and taps pick
#[allow(clippy::too_many_arguments)]
fn handle_pointer(
    mut state: ResMut<ViewerState>,
    mut pointer: ResMut<PointerState>,
    mut mouse_motion: MessageReader<MouseMotion>,
    mut mouse_wheel: MessageReader<MouseWheel>,
    mouse_button: Res<ButtonInput<MouseButton>>,
    touch_input: Res<Touches>,
    windows: Query<&Window>,
    mut contexts: EguiContexts,
) {
    // Check if egui wants the mouse - if so, don't process camera controls
    let egui_wants_pointer = contexts
        .ctx_mut()
        .map(|ctx| ctx.wants_pointer_input())
        .unwrap_or(false);

    let total_motion: Vec2 = mouse_motion.read().map(|m| m.delta).sum();
    let scroll: f32 = mouse_wheel
        .read()
        .map(|w| match w.unit {
            MouseScrollUnit::Line => w.y,
            MouseScrollUnit::Pixel => w.y / PIXELS_PER_LINE,
        })
        .sum();

    if egui_wants_pointer {
        pointer.press = None;
        pointer.touch_start = None;
        return;
    }
    let cursor = windows.single().ok().and_then(Window::cursor_position);
    let mut click: Option<Vec2> = None;

    if mouse_button.just_pressed(MouseButton::Left) {
        pointer.press = cursor;
        pointer.travel = 0.0;
    } else if mouse_button.pressed(MouseButton::Left) {
        pointer.travel += total_motion.length();
    }
    if mouse_button.just_released(MouseButton::Left) {
        if let Some(start) = pointer.press.take() {
            if pointer.travel < CLICK_SLOP {
                click = Some(start);
            }
        }
    }

    // Touch tap: released without moving past the slop
    if let Some(touch) = touch_input.iter().next() {
        if touch_input.just_pressed(touch.id()) {
            pointer.touch_start = Some(touch.position());
            pointer.touch_dragging = false;
        } else if let Some(start) = pointer.touch_start {
            if touch.position().distance(start) > TAP_SLOP {
                pointer.touch_dragging = true;
            }
        }
    }
    for touch in touch_input.iter_just_released() {
        if !pointer.touch_dragging {
            if let Some(start) = pointer.touch_start {
                click = Some(start);
            }
        }
        pointer.touch_start = None;
        pointer.touch_dragging = false;
        debug!(id = touch.id(), "Touch released");
    }

    if let Some(controls) = state.viewer.controls_mut() {
        if mouse_button.pressed(MouseButton::Left) {
            controls.rotate(total_motion);
        }
        if mouse_button.pressed(MouseButton::Right) {
            controls.pan(total_motion);
        }
        if scroll != 0.0 {
            controls.zoom(scroll);
        }

        let touches: Vec<_> = touch_input.iter().collect();
        match touches.as_slice() {
            [touch] => {
                if touch.delta() != Vec2::ZERO {
                    controls.rotate(touch.delta());
                }
            }
            // Pinch to zoom
            [t1, t2] => {
                let curr_dist = t1.position().distance(t2.position());
                let prev_dist =
                    (t1.position() - t1.delta()).distance(t2.position() - t2.delta());
                controls.zoom_by_factor(prev_dist / curr_dist.max(1.0));
            }
            _ => {}
        }
    }

    if let Some(pixel) = click {
        state.viewer.click(pixel);
    }
}

/// Tick the viewer and pose the Bevy camera from the frame it rendered
fn drive_frame(
    time: Res<Time>,
    windows: Query<&Window>,
    mut state: ResMut<ViewerState>,
    mut capture: ResMut<FrameCapture>,
    mut camera_query: Query<(&mut Transform, &mut Projection), With<MainCamera>>,
) {
    if let Ok(window) = windows.single() {
        let surface: &mut dyn RenderSurface = &mut *capture;
        state
            .viewer
            .resize(window.width(), window.height(), Some(surface));
    }

    let surface: &mut dyn RenderSurface = &mut *capture;
    if !state.viewer.tick(time.delta_secs(), surface) {
        return;
    }
    let (Some(camera), Ok((mut transform, mut projection))) =
        (capture.camera(), camera_query.single_mut())
    else {
        return;
    };

    *transform = Transform::from_translation(camera.position).looking_at(camera.target, camera.up);
    *projection = Projection::Perspective(PerspectiveProjection {
        fov: camera.fov_y,
        near: camera.near,
        far: camera.far,
        ..default()
    });
}

/// Respawn scene graph nodes after the graph changed
fn sync_scene_nodes(
    mut commands: Commands,
    mut capture: ResMut<FrameCapture>,
    existing: Query<Entity, With<SceneNodeEntity>>,
    mut meshes: ResMut<Assets<Mesh>>,
    mut materials: ResMut<Assets<StandardMaterial>>,
) {
    let detached = capture.take_detached();
    let pending = capture.take_pending();
    if !detached && pending.is_none() {
        return;
    }
    for entity in existing.iter() {
        commands.entity(entity).despawn();
    }
    let Some(items) = pending else {
        return;
    };

    debug!(items = items.len(), "Mirroring scene graph");
    for item in items {
        match item {
            DrawItem::Mesh {
                name,
                mesh,
                material,
                transform,
            } => {
                commands.spawn((
                    Mesh3d(meshes.add(to_bevy_mesh(&mesh))),
                    MeshMaterial3d(materials.add(to_bevy_material(&material))),
                    Transform::from_matrix(transform),
                    Name::new(name),
                    SceneNodeEntity,
                ));
            }
            DrawItem::Directional {
                direction,
                illuminance,
                color,
            } => {
                commands.spawn((
                    DirectionalLight {
                        illuminance,
                        color: Color::srgb(color[0], color[1], color[2]),
                        shadows_enabled: false,
                        ..default()
                    },
                    Transform::default().looking_to(direction, Vec3::Y),
                    SceneNodeEntity,
                ));
            }
            DrawItem::Ambient { brightness, color } => {
                commands.insert_resource(AmbientLight {
                    color: Color::srgb(color[0], color[1], color[2]),
                    brightness,
                    ..default()
                });
            }
            DrawItem::Grid(grid) => {
                commands.spawn((
                    Mesh3d(meshes.add(grid_mesh(&grid))),
                    MeshMaterial3d(materials.add(StandardMaterial {
                        base_color: Color::srgba(0.5, 0.5, 0.55, grid.alpha),
                        unlit: true,
                        alpha_mode: AlphaMode::Blend,
                        ..default()
                    })),
                    Transform::default(),
                    Name::new("grid"),
                    SceneNodeEntity,
                ));
            }
        }
    }
}

/// Upload-ready Bevy mesh from core triangle data
pub fn to_bevy_mesh(data: &MeshData) -> Mesh {
    let mut normals = data.normals.clone();
    if normals.len() != data.positions.len() {
        let mut copy = data.clone();
        copy.compute_normals();
        normals = copy.normals;
    }
    Mesh::new(PrimitiveTopology::TriangleList, RenderAssetUsages::default())
        .with_inserted_attribute(Mesh::ATTRIBUTE_POSITION, data.positions.clone())
        .with_inserted_attribute(Mesh::ATTRIBUTE_NORMAL, normals)
        .with_inserted_indices(Indices::U32(data.indices.clone()))
}

fn to_bevy_material(material: &Material) -> StandardMaterial {
    let [r, g, b] = material.base_color;
    StandardMaterial {
        base_color: Color::srgba(r, g, b, material.opacity),
        perceptual_roughness: material.roughness,
        alpha_mode: if material.opacity < 1.0 {
            AlphaMode::Blend
        } else {
            AlphaMode::Opaque
        },
        ..default()
    }
}

fn grid_mesh(grid: &GridConfig) -> Mesh {
    let positions: Vec<[f32; 3]> = grid
        .lines(0.0)
        .into_iter()
        .flat_map(|(a, b)| [a.to_array(), b.to_array()])
        .collect();
    Mesh::new(PrimitiveTopology::LineList, RenderAssetUsages::default())
        .with_inserted_attribute(Mesh::ATTRIBUTE_POSITION, positions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anatomy_core::camera::Viewport;
    use anatomy_core::geometry::sphere;
    use anatomy_core::scene::lighting_rig;

    fn graph() -> SceneGraph {
        let mut graph = SceneGraph::new();
        let root = graph.root();
        for (i, light) in lighting_rig().into_iter().enumerate() {
            graph.add(root, format!("light-{}", i), NodeKind::Light(light), Mat4::IDENTITY);
        }
        graph.add(
            root,
            "ventricle",
            NodeKind::Mesh {
                mesh: Arc::new(sphere(1.0, 8, 6)),
                material: Material::new([0.8, 0.2, 0.2]),
                pickable: None,
            },
            Mat4::from_translation(Vec3::X),
        );
        graph
    }

    fn frame() -> FrameContext {
        let camera = PerspectiveCamera::new(Vec3::Z * 5.0, Vec3::ZERO, 0.8, 0.1, 100.0);
        FrameContext {
            frame: 1,
            dt: 0.016,
            matrices: camera.matrices(),
            viewport: Viewport::new(800.0, 600.0),
        }
    }

    #[test]
    fn test_capture_snapshots_only_on_revision_change() {
        let graph = graph();
        let camera = PerspectiveCamera::new(Vec3::Z * 5.0, Vec3::ZERO, 0.8, 0.1, 100.0);
        let mut capture = FrameCapture::default();

        capture.render(&graph, &camera, &frame());
        let items = capture.take_pending().unwrap();
        assert_eq!(items.len(), 5);
        assert!(items
            .iter()
            .any(|i| matches!(i, DrawItem::Mesh { transform, .. } if transform.w_axis.x == 1.0)));

        capture.render(&graph, &camera, &frame());
        assert!(capture.take_pending().is_none());
        assert!(capture.camera().is_some());
    }

    #[test]
    fn test_detach_forgets_the_graph() {
        let graph = graph();
        let camera = PerspectiveCamera::new(Vec3::Z * 5.0, Vec3::ZERO, 0.8, 0.1, 100.0);
        let mut capture = FrameCapture::default();
        capture.render(&graph, &camera, &frame());
        capture.detach();

        assert!(capture.take_detached());
        assert!(capture.camera().is_none());
        capture.render(&graph, &camera, &frame());
        assert!(capture.take_pending().is_some());
    }

    #[test]
    fn test_bevy_mesh_keeps_triangles() {
        let data = sphere(1.0, 8, 6);
        let mesh = to_bevy_mesh(&data);
        assert_eq!(mesh.count_vertices(), data.positions.len());
        assert_eq!(mesh.indices().map(|i| i.len()), Some(data.indices.len()));
    }

    #[test]
    fn test_grid_mesh_has_two_points_per_line() {
        let grid = GridConfig::default();
        let mesh = grid_mesh(&grid);
        assert_eq!(mesh.count_vertices(), grid.lines(0.0).len() * 2);
    }
}
