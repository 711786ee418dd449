//! glTF part streaming
//!
//! Part loads go through the asset server. Once a glTF is in, its triangles
//! are copied out for picking and the result is handed to the viewer; the
//! scene itself is spawned as a child entity while the part is visible.

use anatomy_core::error::AssetError;
use anatomy_core::geometry::MeshData;
use anatomy_core::loader::{LoadRequest, PartAsset};
use anatomy_core::model::PartId;
use anatomy_core::viewer::{Completion, Stamped};
use bevy::asset::{AssetLoadError, LoadState};
use bevy::gltf::{Gltf, GltfMesh, GltfNode};
use bevy::mesh::{Indices, PrimitiveTopology, VertexAttributeValues};
use bevy::prelude::*;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::app::{ViewerSet, ViewerState};

/// A glTF load the viewer is waiting on
struct PendingPart {
    epoch: u64,
    request: LoadRequest,
    path: String,
    handle: Handle<Gltf>,
}

/// Part loads in flight
#[derive(Resource, Default)]
pub struct PartLoads {
    pending: Vec<PendingPart>,
}

impl PartLoads {
    pub fn begin(&mut self, asset_server: &AssetServer, epoch: u64, request: LoadRequest, path: String) {
        debug!(part = %request.part_id, path = %path, "Loading part");
        let handle = asset_server.load::<Gltf>(path.clone());
        self.pending.push(PendingPart {
            epoch,
            request,
            path,
            handle,
        });
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }
}

/// Marks the root entity of a spawned part
#[derive(Component)]
pub struct PartEntity {
    pub part_id: PartId,
    pub epoch: u64,
}

/// Spawned part roots by part id
#[derive(Resource, Default)]
struct PartEntities {
    epoch: u64,
    entities: HashMap<PartId, Entity>,
}

pub struct PartsPlugin;

impl Plugin for PartsPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<PartLoads>()
            .init_resource::<PartEntities>()
            .add_systems(
                Update,
                (
                    poll_part_loads.in_set(ViewerSet::Apply),
                    sync_part_entities.in_set(ViewerSet::Sync),
                ),
            );
    }
}

/// Hand finished glTF loads to the viewer
fn poll_part_loads(
    mut loads: ResMut<PartLoads>,
    mut state: ResMut<ViewerState>,
    asset_server: Res<AssetServer>,
    gltfs: Res<Assets<Gltf>>,
    gltf_nodes: Res<Assets<GltfNode>>,
    gltf_meshes: Res<Assets<GltfMesh>>,
    meshes: Res<Assets<Mesh>>,
) {
    let mut finished = Vec::new();
    loads.pending.retain(|pending| {
        let result = match asset_server.get_load_state(pending.handle.id()) {
            Some(LoadState::Loaded) => match gltfs.get(&pending.handle) {
                Some(gltf) => {
                    collect_meshes(gltf, &gltf_nodes, &gltf_meshes, &meshes).map_or_else(
                        || Err(AssetError::Empty(pending.path.clone())),
                        |mesh| {
                            Ok(PartAsset {
                                handle: pending.handle.clone(),
                                meshes: vec![Arc::new(mesh)],
                            })
                        },
                    )
                }
                None => return true,
            },
            Some(LoadState::Failed(err)) => Err(asset_error(&pending.path, &err)),
            _ => return true,
        };
        finished.push(Stamped {
            epoch: pending.epoch,
            body: Completion::Part(pending.request.complete(result)),
        });
        false
    });

    for completion in finished {
        state.viewer.apply(completion);
    }
}

fn asset_error(path: &str, err: &AssetLoadError) -> AssetError {
    match err {
        AssetLoadError::AssetReaderError(e) => AssetError::Fetch {
            source_ref: path.to_string(),
            reason: e.to_string(),
        },
        other => AssetError::Decode {
            source_ref: path.to_string(),
            reason: other.to_string(),
        },
    }
}

/// All triangles of a glTF in part-local space.
///
/// Walks the node hierarchy so node transforms are applied; files without
/// nodes fall back to their raw meshes. `None` when nothing is renderable.
fn collect_meshes(
    gltf: &Gltf,
    nodes: &Assets<GltfNode>,
    gltf_meshes: &Assets<GltfMesh>,
    meshes: &Assets<Mesh>,
) -> Option<MeshData> {
    let mut out = MeshData::default();

    let children: HashSet<AssetId<GltfNode>> = gltf
        .nodes
        .iter()
        .filter_map(|h| nodes.get(h))
        .flat_map(|node| node.children.iter().map(|c| c.id()))
        .collect();
    let roots = gltf.nodes.iter().filter(|h| !children.contains(&h.id()));
    for root in roots {
        append_node(root, Mat4::IDENTITY, nodes, gltf_meshes, meshes, &mut out, 0);
    }

    if out.is_empty() {
        for handle in &gltf.meshes {
            append_gltf_mesh(handle, Mat4::IDENTITY, gltf_meshes, meshes, &mut out);
        }
    }
    (!out.is_empty()).then_some(out)
}

fn append_node(
    handle: &Handle<GltfNode>,
    parent: Mat4,
    nodes: &Assets<GltfNode>,
    gltf_meshes: &Assets<GltfMesh>,
    meshes: &Assets<Mesh>,
    out: &mut MeshData,
    depth: usize,
) {
    // Guard against cyclic hierarchies in malformed files
    if depth > 64 {
        return;
    }
    let Some(node) = nodes.get(handle) else {
        return;
    };
    let world = parent * node.transform.to_matrix();
    if let Some(mesh) = &node.mesh {
        append_gltf_mesh(mesh, world, gltf_meshes, meshes, out);
    }
    for child in &node.children {
        append_node(child, world, nodes, gltf_meshes, meshes, out, depth + 1);
    }
}

fn append_gltf_mesh(
    handle: &Handle<GltfMesh>,
    transform: Mat4,
    gltf_meshes: &Assets<GltfMesh>,
    meshes: &Assets<Mesh>,
    out: &mut MeshData,
) {
    let Some(gltf_mesh) = gltf_meshes.get(handle) else {
        return;
    };
    for primitive in &gltf_mesh.primitives {
        if let Some(data) = meshes.get(&primitive.mesh).and_then(extract_mesh) {
            out.append(&data, transform);
        }
    }
}

/// Copy the triangles of a Bevy mesh
pub fn extract_mesh(mesh: &Mesh) -> Option<MeshData> {
    if mesh.primitive_topology() != PrimitiveTopology::TriangleList {
        return None;
    }
    let Some(VertexAttributeValues::Float32x3(positions)) = mesh.attribute(Mesh::ATTRIBUTE_POSITION)
    else {
        return None;
    };
    let indices: Vec<u32> = match mesh.indices() {
        Some(Indices::U16(indices)) => indices.iter().map(|&i| i as u32).collect(),
        Some(Indices::U32(indices)) => indices.clone(),
        None => (0..positions.len() as u32).collect(),
    };
    let normals = match mesh.attribute(Mesh::ATTRIBUTE_NORMAL) {
        Some(VertexAttributeValues::Float32x3(normals)) if normals.len() == positions.len() => {
            normals.clone()
        }
        _ => Vec::new(),
    };

    let mut data = MeshData {
        positions: positions.clone(),
        normals,
        indices,
    };
    if data.normals.is_empty() {
        data.compute_normals();
    }
    (!data.is_empty()).then_some(data)
}

/// Spawn loaded parts, hide the ones whose layer is off, drop the ones the
/// loader no longer holds
fn sync_part_entities(
    mut commands: Commands,
    state: Res<ViewerState>,
    mut spawned: ResMut<PartEntities>,
    gltfs: Res<Assets<Gltf>>,
    mut parts: Query<(&PartEntity, &mut Visibility)>,
) {
    let epoch = state.viewer.epoch();
    if spawned.epoch != epoch {
        for (_, entity) in spawned.entities.drain() {
            if let Ok((part, _)) = parts.get(entity) {
                debug!(part = %part.part_id, epoch = part.epoch, "Despawning part from previous mount");
            }
            commands.entity(entity).despawn();
        }
        spawned.epoch = epoch;
    }

    let Some(session) = state.viewer.session() else {
        return;
    };
    let loader = &session.loader;

    spawned.entities.retain(|id, entity| {
        if loader.asset(id).is_none() {
            commands.entity(*entity).despawn();
            return false;
        }
        if let Ok((_, mut vis)) = parts.get_mut(*entity) {
            let wanted = if loader.is_visible(id) {
                Visibility::Inherited
            } else {
                Visibility::Hidden
            };
            vis.set_if_neq(wanted);
        }
        true
    });

    for (id, transform) in loader.attached() {
        if spawned.entities.contains_key(id) {
            continue;
        }
        let Some(asset) = loader.asset(id) else {
            continue;
        };
        let Some(gltf) = gltfs.get(&asset.handle) else {
            continue;
        };
        let Some(scene) = gltf
            .default_scene
            .clone()
            .or_else(|| gltf.scenes.first().cloned())
        else {
            warn!(part = %id, "Part has no scene to show");
            continue;
        };
        let entity = commands
            .spawn((
                SceneRoot(scene),
                Transform::from_matrix(transform),
                Visibility::Inherited,
                PartEntity {
                    part_id: id.clone(),
                    epoch,
                },
                Name::new(format!("part:{}", id)),
            ))
            .id();
        info!(part = %id, "Part spawned");
        spawned.entities.insert(id.clone(), entity);
    }
}
