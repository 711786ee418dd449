//! Executes viewer requests against a backend and an asset source

use tracing::trace;

use crate::notes::{NoteRequest, NoteResponse};
use crate::pins::{PinRequest, PinResponse};
use crate::store::{AssetSource, Backend};
use crate::viewer::{Completion, Request, Stamped, StoreRequest, StoreResponse, Viewer};

/// Run one store request to completion
pub async fn execute_store<S>(store: &S, request: StoreRequest) -> StoreResponse
where
    S: Backend + ?Sized,
{
    match request {
        StoreRequest::FetchModel(model) => StoreResponse::Model(store.fetch_model(&model).await),
        StoreRequest::ReadLayers(model) => {
            StoreResponse::Layers(store.read_layer_config(&model).await)
        }
        StoreRequest::ReadParts(model) => StoreResponse::Parts(store.read_part_list(&model).await),
        StoreRequest::WriteLayer(model, write) => {
            let result = store
                .write_layer_visibility(&model, &write.layer, write.visible)
                .await;
            StoreResponse::LayerWritten(write, result)
        }
        StoreRequest::Pins(request) => StoreResponse::Pins(match request {
            PinRequest::Fetch(model, ticket) => {
                PinResponse::Fetched(ticket, store.fetch_pins(&model).await)
            }
            PinRequest::Create(model, draft) => {
                PinResponse::Created(store.create_pin(&model, draft).await)
            }
            PinRequest::Update(id, patch) => {
                let result = store.update_pin(&id, patch).await;
                PinResponse::Updated(id, result)
            }
            PinRequest::Delete(id) => {
                let result = store.delete_pin(&id).await;
                PinResponse::Deleted(id, result)
            }
        }),
        StoreRequest::Notes(request) => StoreResponse::Notes(match request {
            NoteRequest::Fetch(model, owner, ticket) => {
                NoteResponse::Fetched(ticket, store.fetch_notes(&model, &owner).await)
            }
            NoteRequest::Create { model, draft, slot } => {
                NoteResponse::Created(slot, store.create_note(&model, draft).await)
            }
            NoteRequest::Delete(id) => {
                let result = store.delete_note(&id).await;
                NoteResponse::Deleted(id, result)
            }
        }),
    }
}

/// Run any request, keeping its epoch stamp
pub async fn execute<S, A>(
    store: &S,
    assets: &A,
    request: Stamped<Request>,
) -> Stamped<Completion<A::Handle>>
where
    S: Backend + ?Sized,
    A: AssetSource + ?Sized,
{
    let body = match request.body {
        Request::Store(request) => Completion::Store(execute_store(store, request).await),
        Request::LoadPart(load) => {
            let result = assets.load_part(&load.source).await;
            Completion::Part(load.complete(result))
        }
    };
    Stamped {
        epoch: request.epoch,
        body,
    }
}

/// Execute requests in issue order until the viewer has nothing left to ask.
///
/// Returns the number of requests executed. Used by headless embedders and
/// tests; the app spawns each request on its own task instead.
pub async fn settle<S, A>(viewer: &mut Viewer<A::Handle>, store: &S, assets: &A) -> usize
where
    S: Backend + ?Sized,
    A: AssetSource + ?Sized,
{
    let mut executed = 0;
    loop {
        let batch = viewer.take_requests();
        if batch.is_empty() {
            return executed;
        }
        for request in batch {
            trace!(epoch = request.epoch, "Executing request");
            let completion = execute(store, assets, request).await;
            viewer.apply(completion);
            executed += 1;
        }
    }
}
