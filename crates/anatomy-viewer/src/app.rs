//! Bevy application setup

use anatomy_core::camera::Viewport;
use anatomy_core::config::ViewerConfig;
use anatomy_core::error::ViewerError;
use anatomy_core::model::{Access, ModelId, Role, ViewMode};
use anatomy_core::scene::RenderSurface;
use anatomy_core::viewer::Viewer;
use bevy::gltf::Gltf;
use bevy::prelude::*;
use bevy_egui::EguiPlugin;
use bevy_picking::DefaultPickingPlugins;
use tracing::{error, info, warn};

use crate::backend::{BackendPlugin, StoreHandle};
use crate::parts::PartsPlugin;
use crate::scene::{FrameCapture, ScenePlugin};
use crate::ui::UiPlugin;

/// Model shown when none is requested
pub const DEFAULT_MODEL: &str = "heart-3d";

/// Who is viewing what, resolved from the command line or the page URL
#[derive(Debug, Clone)]
pub struct LaunchOptions {
    pub config: ViewerConfig,
    pub model: ModelId,
    pub mode: ViewMode,
    pub access: Access,
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self {
            config: ViewerConfig::default(),
            model: ModelId::new(DEFAULT_MODEL),
            mode: ViewMode::View,
            access: Access::new("anonymous", Role::Student),
        }
    }
}

impl LaunchOptions {
    /// Apply `?model=&mode=&role=&user=&backend=` from a URL query string.
    ///
    /// Unparseable values are logged and ignored.
    pub fn apply_query(mut self, search: &str) -> Self {
        if let Some(model) = parse_query_param(search, "model") {
            self.model = ModelId::new(model);
        }
        if let Some(mode) = parse_query_param(search, "mode") {
            match mode.parse() {
                Ok(mode) => self.mode = mode,
                Err(e) => warn!("Ignoring mode parameter: {}", e),
            }
        }
        if let Some(role) = parse_query_param(search, "role") {
            match role.parse() {
                Ok(role) => self.access.role = role,
                Err(e) => warn!("Ignoring role parameter: {}", e),
            }
        }
        if let Some(user) = parse_query_param(search, "user") {
            self.access = Access::new(user, self.access.role);
        }
        if let Some(backend) = parse_query_param(search, "backend") {
            info!("Using backend from URL parameter: {}", backend);
            self.config.backend.http_url = backend_url(&backend);
        }
        self
    }

    /// Launch options from the page URL, with a same-origin backend fallback
    #[cfg(target_arch = "wasm32")]
    pub fn from_browser() -> Self {
        let mut launch = Self::default();
        let Some(window) = web_sys::window() else {
            return launch;
        };
        let location = window.location();

        if launch.config.backend.http_url.is_empty() {
            let host = location
                .host()
                .unwrap_or_else(|_| "localhost:8080".to_string());
            let is_https = location.protocol().unwrap_or_default() == "https:";
            launch.config.backend.http_url =
                format!("{}://{}", if is_https { "https" } else { "http" }, host);
        }

        match location.search() {
            Ok(search) => launch.apply_query(&search),
            Err(_) => launch,
        }
    }
}

/// Parse a query parameter from a search string
pub(crate) fn parse_query_param(search: &str, param: &str) -> Option<String> {
    let search = search.trim_start_matches('?');
    for pair in search.split('&') {
        let mut parts = pair.splitn(2, '=');
        if let (Some(key), Some(value)) = (parts.next(), parts.next()) {
            if key == param && !value.is_empty() {
                return Some(
                    value
                        .replace("%3A", ":")
                        .replace("%2F", "/")
                        .replace("%20", " ")
                        .replace('+', " "),
                );
            }
        }
    }
    None
}

/// Backend base URL from an address that may lack a scheme
fn backend_url(addr: &str) -> String {
    let addr = addr.trim_end_matches('/');
    if addr.starts_with("https://") || addr.starts_with("http://") {
        addr.to_string()
    } else {
        format!("http://{}", addr)
    }
}

/// The mounted viewer. Parts are held as glTF handles.
#[derive(Resource)]
pub struct ViewerState {
    pub viewer: Viewer<Handle<Gltf>>,
    pending_mount: Option<(ModelId, ViewMode)>,
}

impl ViewerState {
    pub fn new(viewer: Viewer<Handle<Gltf>>, model: ModelId, mode: ViewMode) -> Self {
        Self {
            viewer,
            pending_mount: Some((model, mode)),
        }
    }
}

/// Per-frame ordering of the viewer systems
#[derive(SystemSet, Debug, Clone, PartialEq, Eq, Hash)]
pub enum ViewerSet {
    /// Mount once the window has a size
    Mount,
    /// Feed finished store calls and part loads back into the viewer
    Apply,
    /// Pointer input to controls and picking
    Input,
    /// Tick the scene host and pose the Bevy camera
    Frame,
    /// Hand queued requests to the store and the asset server
    Dispatch,
    /// Mirror the scene graph and loaded parts into entities
    Sync,
}

/// Mount the requested model as soon as the window reports a usable size
fn mount_viewer(mut state: ResMut<ViewerState>, windows: Query<&Window>) {
    let Some((model, mode)) = state.pending_mount.clone() else {
        return;
    };
    let Ok(window) = windows.single() else {
        return;
    };
    let viewport = Viewport::new(window.width(), window.height());
    if viewport.is_degenerate() {
        return;
    }
    state.pending_mount = None;

    match state.viewer.mount(viewport, model.clone(), mode) {
        Ok(()) => {}
        Err(ViewerError::EditNotPermitted) => {
            warn!(model = %model, "Edit mode requires a professor role, mounting read-only");
            if let Err(e) = state.viewer.mount(viewport, model, ViewMode::View) {
                error!("Failed to mount viewer: {}", e);
            }
        }
        Err(e) => error!(model = %model, "Failed to mount viewer: {}", e),
    }
}

/// Tear the session down when the app exits
fn unmount_on_exit(
    mut exits: MessageReader<AppExit>,
    mut state: ResMut<ViewerState>,
    mut capture: ResMut<FrameCapture>,
) {
    if exits.read().next().is_some() {
        let surface: &mut dyn RenderSurface = &mut *capture;
        state.viewer.unmount(Some(surface));
    }
}

/// Run the Bevy application
pub fn run(launch: LaunchOptions, store: StoreHandle) -> AppExit {
    let LaunchOptions {
        config,
        model,
        mode,
        access,
    } = launch;
    info!(
        model = %model,
        mode = ?mode,
        user = %access.user_id,
        role = ?access.role,
        "Starting anatomy viewer"
    );
    let viewer = Viewer::new(config, access);

    App::new()
        .insert_resource(ClearColor(Color::srgb(0.08, 0.09, 0.12)))
        .add_plugins(
            DefaultPlugins
                .set(WindowPlugin {
                    primary_window: Some(Window {
                        title: "Anatomy Viewer".to_string(),
                        canvas: Some("#anatomy-canvas".to_string()),
                        fit_canvas_to_parent: true,
                        prevent_default_event_handling: false,
                        ..default()
                    }),
                    ..default()
                })
                .set(AssetPlugin {
                    // Part sources are resolved against the configured base path
                    file_path: "".to_string(),
                    meta_check: bevy::asset::AssetMetaCheck::Never,
                    ..default()
                }),
        )
        // Must be added BEFORE EguiPlugin so it can detect PickingPlugin
        .add_plugins(DefaultPickingPlugins)
        .add_plugins(EguiPlugin::default())
        .insert_resource(ViewerState::new(viewer, model, mode))
        .configure_sets(
            Update,
            (
                ViewerSet::Mount,
                ViewerSet::Apply,
                ViewerSet::Input,
                ViewerSet::Frame,
                ViewerSet::Dispatch,
                ViewerSet::Sync,
            )
                .chain(),
        )
        .add_systems(Update, mount_viewer.in_set(ViewerSet::Mount))
        .add_plugins(BackendPlugin { store })
        .add_plugins(ScenePlugin)
        .add_plugins(PartsPlugin)
        .add_plugins(UiPlugin)
        .add_systems(Last, unmount_on_exit)
        .run()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_query_param() {
        let search = "?model=arm&mode=edit&backend=http%3A%2F%2Flocalhost%3A9000";
        assert_eq!(parse_query_param(search, "model"), Some("arm".to_string()));
        assert_eq!(
            parse_query_param(search, "backend"),
            Some("http://localhost:9000".to_string())
        );
        assert_eq!(parse_query_param(search, "role"), None);
        assert_eq!(parse_query_param("?model=", "model"), None);
    }

    #[test]
    fn test_apply_query() {
        let launch = LaunchOptions::default()
            .apply_query("?model=arm&mode=edit&role=professor&user=prof-7&backend=10.0.0.2:8080");
        assert_eq!(launch.model, ModelId::new("arm"));
        assert_eq!(launch.mode, ViewMode::Edit);
        assert_eq!(launch.access.role, Role::Professor);
        assert_eq!(launch.access.user_id.as_str(), "prof-7");
        assert_eq!(launch.config.backend.http_url, "http://10.0.0.2:8080");
    }

    #[test]
    fn test_bad_query_values_are_ignored() {
        let launch = LaunchOptions::default().apply_query("?mode=fly&role=dean");
        assert_eq!(launch.mode, ViewMode::View);
        assert_eq!(launch.access.role, Role::Student);
    }

    #[test]
    fn test_backend_url() {
        assert_eq!(backend_url("example.org/"), "http://example.org");
        assert_eq!(backend_url("https://example.org"), "https://example.org");
    }
}
