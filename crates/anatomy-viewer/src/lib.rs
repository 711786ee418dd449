//! Anatomy Viewer - WebGPU-powered 3D anatomy viewer
//!
//! Bevy frontend over `anatomy-core`: renders the scene graph and streamed
//! glTF parts, feeds pointer input to the orbit controls and picking, and
//! draws the layer, pin and note panels with egui.

mod app;
mod backend;
#[cfg(target_arch = "wasm32")]
mod http;
mod parts;
mod scene;
mod ui;

pub use app::{run, LaunchOptions, DEFAULT_MODEL};
pub use backend::{open_store, StoreHandle};

#[cfg(target_arch = "wasm32")]
use wasm_bindgen::prelude::*;

/// Entry point for WASM module
#[cfg(target_arch = "wasm32")]
#[wasm_bindgen(start)]
pub fn main() {
    // Set panic hook for better error messages
    console_error_panic_hook::set_once();

    // Filter out wgpu noise
    tracing_wasm::set_as_global_default_with_config(
        tracing_wasm::WASMLayerConfigBuilder::new()
            .set_max_level(tracing::Level::INFO)
            .build(),
    );

    let launch = LaunchOptions::from_browser();
    match open_store(&launch.config) {
        Ok(store) => {
            run(launch, store);
        }
        Err(e) => tracing::error!("Failed to open store: {:#}", e),
    }
}
