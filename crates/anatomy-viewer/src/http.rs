//! HTTP store used by the web build
//!
//! Talks JSON to the annotation service at `base_url`:
//! - `GET|POST /api/models/{id}/pins`, `PUT|DELETE /api/pins/{id}`
//! - `GET|POST /api/models/{id}/notes?owner=`, `DELETE /api/notes/{id}`
//! - `GET /api/models/{id}`, `GET /api/models/{id}/parts`
//! - `GET /api/models/{id}/layers`, `PUT /api/models/{id}/layers/{layer}`

use anatomy_core::error::StoreError;
use anatomy_core::model::{
    Layer, LayerId, Model, ModelId, Note, NoteDraft, NoteId, Part, Pin, PinDraft, PinId, PinPatch,
    UserId,
};
use anatomy_core::store::{ConfigStore, NoteStore, PinStore};
use async_trait::async_trait;
use gloo_net::http::{Request, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;

#[derive(Debug, Clone)]
pub struct HttpBackend {
    base_url: String,
}

impl HttpBackend {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/{}", self.base_url, path)
    }
}

async fn send(request: RequestBuilder) -> Result<Response, StoreError> {
    let response = request
        .send()
        .await
        .map_err(|e| StoreError::Unreachable(e.to_string()))?;
    check(response).await
}

async fn send_json<B: Serialize>(request: RequestBuilder, body: &B) -> Result<Response, StoreError> {
    let request = request
        .json(body)
        .map_err(|e| StoreError::Decode(e.to_string()))?;
    let response = request
        .send()
        .await
        .map_err(|e| StoreError::Unreachable(e.to_string()))?;
    check(response).await
}

async fn check(response: Response) -> Result<Response, StoreError> {
    if response.ok() {
        return Ok(response);
    }
    let status = response.status();
    let message = response.text().await.unwrap_or_default();
    Err(match status {
        404 => StoreError::NotFound(message),
        408 | 504 => StoreError::Timeout,
        _ => StoreError::Rejected { status, message },
    })
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, StoreError> {
    let text = response
        .text()
        .await
        .map_err(|e| StoreError::Decode(e.to_string()))?;
    serde_json::from_str(&text).map_err(|e| StoreError::Decode(e.to_string()))
}

#[derive(Serialize)]
struct LayerVisibility {
    visible: bool,
}

#[async_trait(?Send)]
impl PinStore for HttpBackend {
    async fn fetch_pins(&self, model: &ModelId) -> Result<Vec<Pin>, StoreError> {
        let url = self.url(&format!("models/{}/pins", model));
        decode(send(Request::get(&url)).await?).await
    }

    async fn create_pin(&self, model: &ModelId, draft: PinDraft) -> Result<Pin, StoreError> {
        let url = self.url(&format!("models/{}/pins", model));
        decode(send_json(Request::post(&url), &draft).await?).await
    }

    async fn update_pin(&self, id: &PinId, patch: PinPatch) -> Result<Pin, StoreError> {
        let url = self.url(&format!("pins/{}", id));
        decode(send_json(Request::put(&url), &patch).await?).await
    }

    async fn delete_pin(&self, id: &PinId) -> Result<(), StoreError> {
        let url = self.url(&format!("pins/{}", id));
        send(Request::delete(&url)).await.map(|_| ())
    }
}

#[async_trait(?Send)]
impl NoteStore for HttpBackend {
    async fn fetch_notes(&self, model: &ModelId, owner: &UserId) -> Result<Vec<Note>, StoreError> {
        let url = self.url(&format!("models/{}/notes", model));
        let request = Request::get(&url).query([("owner", owner.as_str())]);
        decode(send(request).await?).await
    }

    async fn create_note(&self, model: &ModelId, draft: NoteDraft) -> Result<Note, StoreError> {
        let url = self.url(&format!("models/{}/notes", model));
        decode(send_json(Request::post(&url), &draft).await?).await
    }

    async fn delete_note(&self, id: &NoteId) -> Result<(), StoreError> {
        let url = self.url(&format!("notes/{}", id));
        send(Request::delete(&url)).await.map(|_| ())
    }
}

#[async_trait(?Send)]
impl ConfigStore for HttpBackend {
    async fn fetch_model(&self, model: &ModelId) -> Result<Model, StoreError> {
        let url = self.url(&format!("models/{}", model));
        decode(send(Request::get(&url)).await?).await
    }

    async fn read_layer_config(&self, model: &ModelId) -> Result<Vec<Layer>, StoreError> {
        let url = self.url(&format!("models/{}/layers", model));
        decode(send(Request::get(&url)).await?).await
    }

    async fn read_part_list(&self, model: &ModelId) -> Result<Vec<Part>, StoreError> {
        let url = self.url(&format!("models/{}/parts", model));
        decode(send(Request::get(&url)).await?).await
    }

    async fn write_layer_visibility(
        &self,
        model: &ModelId,
        layer: &LayerId,
        visible: bool,
    ) -> Result<(), StoreError> {
        let url = self.url(&format!("models/{}/layers/{}", model, layer));
        send_json(Request::put(&url), &LayerVisibility { visible })
            .await
            .map(|_| ())
    }
}
