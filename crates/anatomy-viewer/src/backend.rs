//! Store access for the Bevy app
//!
//! Requests queued by the viewer are spawned as tasks; their results land in
//! a shared queue that is drained once per frame.

use anatomy_core::config::ViewerConfig;
use anatomy_core::driver::execute_store;
use anatomy_core::store::Backend;
use anatomy_core::viewer::{Completion, Request, Stamped, StoreRequest, StoreResponse};
use bevy::prelude::*;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

use crate::app::{ViewerSet, ViewerState};
use crate::parts::PartLoads;

/// The annotation and layer store every request goes to
#[derive(Resource, Clone)]
pub struct StoreHandle(pub Arc<dyn Backend + Send + Sync>);

/// Store results waiting to be applied on the main thread
#[derive(Resource, Default, Clone)]
pub struct PendingStore(pub Arc<Mutex<Vec<Stamped<StoreResponse>>>>);

/// Open the store for this platform.
///
/// The web build talks to the annotation service over HTTP. Native builds
/// use the configured JSON data file, or in-memory demo content without one.
#[cfg(target_arch = "wasm32")]
pub fn open_store(config: &ViewerConfig) -> anyhow::Result<StoreHandle> {
    let backend = crate::http::HttpBackend::new(&config.backend.http_url);
    tracing::info!(url = %config.backend.http_url, "Using HTTP store");
    Ok(StoreHandle(Arc::new(backend)))
}

#[cfg(not(target_arch = "wasm32"))]
pub fn open_store(config: &ViewerConfig) -> anyhow::Result<StoreHandle> {
    use anatomy_core::store::{FileBackend, MemoryBackend, StoreDocument};
    use anyhow::Context;

    match &config.backend.data_file {
        Some(path) => {
            let backend = FileBackend::open_or_seed(path, StoreDocument::demo())
                .with_context(|| format!("failed to open data file {}", path))?;
            Ok(StoreHandle(Arc::new(backend)))
        }
        None => {
            tracing::info!("No data file configured, using in-memory demo store");
            Ok(StoreHandle(Arc::new(MemoryBackend::demo())))
        }
    }
}

pub struct BackendPlugin {
    pub store: StoreHandle,
}

impl Plugin for BackendPlugin {
    fn build(&self, app: &mut App) {
        app.insert_resource(self.store.clone())
            .init_resource::<PendingStore>()
            .add_systems(
                Update,
                (
                    apply_store_completions.in_set(ViewerSet::Apply),
                    dispatch_requests.in_set(ViewerSet::Dispatch),
                ),
            );
    }
}

/// Hand every queued request to the store or the asset server
fn dispatch_requests(
    mut state: ResMut<ViewerState>,
    store: Res<StoreHandle>,
    pending: Res<PendingStore>,
    asset_server: Res<AssetServer>,
    mut loads: ResMut<PartLoads>,
) {
    let requests = state.viewer.take_requests();
    if requests.is_empty() {
        return;
    }
    for request in requests {
        let epoch = request.epoch;
        match request.body {
            Request::Store(body) => spawn_store(&store, &pending, Stamped { epoch, body }),
            Request::LoadPart(load) => {
                let path = state.viewer.config().resolve_asset_path(&load.source);
                loads.begin(&asset_server, epoch, load, path);
            }
        }
    }
}

#[cfg(target_arch = "wasm32")]
fn spawn_store(store: &StoreHandle, pending: &PendingStore, request: Stamped<StoreRequest>) {
    let store = store.0.clone();
    let queue = pending.0.clone();
    wasm_bindgen_futures::spawn_local(async move {
        let body = execute_store(store.as_ref(), request.body).await;
        push(&queue, request.epoch, body);
    });
}

#[cfg(not(target_arch = "wasm32"))]
fn spawn_store(store: &StoreHandle, pending: &PendingStore, request: Stamped<StoreRequest>) {
    let store = store.0.clone();
    let queue = pending.0.clone();
    bevy::tasks::IoTaskPool::get()
        .spawn(async move {
            let body = execute_store(store.as_ref(), request.body).await;
            push(&queue, request.epoch, body);
        })
        .detach();
}

fn push(queue: &Mutex<Vec<Stamped<StoreResponse>>>, epoch: u64, body: StoreResponse) {
    match queue.lock() {
        Ok(mut queue) => queue.push(Stamped { epoch, body }),
        Err(_) => warn!(epoch, "Store result queue poisoned, dropping result"),
    }
}

/// Apply finished store calls in arrival order
fn apply_store_completions(mut state: ResMut<ViewerState>, pending: Res<PendingStore>) {
    let results = match pending.0.lock() {
        Ok(mut queue) => std::mem::take(&mut *queue),
        Err(_) => return,
    };
    for result in results {
        let epoch = result.epoch;
        if !state.viewer.apply(Stamped {
            epoch,
            body: Completion::Store(result.body),
        }) {
            debug!(epoch, "Store result ignored");
        }
    }
}
