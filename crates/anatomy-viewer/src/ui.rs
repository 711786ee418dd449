//! UI overlays using bevy_egui

use anatomy_core::layers::LayerRow;
use anatomy_core::model::{
    parse_hex_color, LayerId, NoteId, PartId, PinContent, PinId, PinPatch, PinScope,
    ProjectedPoint, ViewMode, DEFAULT_PIN_COLOR,
};
use anatomy_core::pins::FetchState;
use anatomy_core::viewer::Viewer;
use bevy::gltf::Gltf;
use bevy::prelude::*;
use bevy_egui::{egui, EguiContexts, EguiPrimaryContextPass};
use tracing::{debug, warn};

use crate::app::ViewerState;
use crate::parts::PartLoads;

/// Marker dot radius in points
const MARKER_RADIUS: f32 = 6.0;

pub struct UiPlugin;

impl Plugin for UiPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<UiForms>()
            // Main UI system runs in EguiPrimaryContextPass for proper input handling (bevy_egui 0.38+)
            .add_systems(EguiPrimaryContextPass, ui_system);
    }
}

/// Text the user is typing, kept across frames
#[derive(Resource)]
pub struct UiForms {
    pin: PinContent,
    edit: Option<PinPatch>,
    note_body: String,
    note_spatial: bool,
    error: Option<String>,
}

impl Default for UiForms {
    fn default() -> Self {
        Self {
            pin: PinContent::default(),
            edit: None,
            note_body: String::new(),
            note_spatial: true,
            error: None,
        }
    }
}

/// Something the user clicked this frame, applied after drawing
#[derive(Debug, Clone)]
enum UiAction {
    SetMode(ViewMode),
    ToggleLayer(LayerId, bool),
    RetryLayerSave(LayerId),
    RetryPart(PartId),
    SubmitPin,
    CancelPlacement,
    RefreshPins,
    BeginEdit(PinId),
    CommitEdit,
    CancelEdit,
    DeletePin(PinId),
    FlyTo(PinId),
    CreateNote,
    RetryNote(u64),
    DiscardNote(u64),
    DeleteNote(NoteId),
    RefreshNotes,
    TogglePin(PinId),
    ToggleNote(NoteId),
    DismissError,
}

fn ui_system(
    mut contexts: EguiContexts,
    mut state: ResMut<ViewerState>,
    mut forms: ResMut<UiForms>,
    loads: Res<PartLoads>,
) {
    // Get the egui context - early return if not available
    let Ok(ctx) = contexts.ctx_mut() else { return };

    let mut actions = Vec::new();
    let viewer = &state.viewer;

    top_bar(ctx, viewer, loads.len(), &forms, &mut actions);
    if viewer.session().is_some() {
        layers_panel(ctx, &viewer.layer_rows(), &mut actions);
        match viewer.mode() {
            ViewMode::Edit => pins_panel(ctx, viewer, &mut forms, &mut actions),
            ViewMode::View => notes_panel(ctx, viewer, &mut forms, &mut actions),
        }
        markers(ctx, viewer, &mut actions);
    }

    for action in actions {
        apply_action(&mut state.viewer, &mut forms, action);
    }
}

fn top_bar(
    ctx: &egui::Context,
    viewer: &Viewer<Handle<Gltf>>,
    loading: usize,
    forms: &UiForms,
    actions: &mut Vec<UiAction>,
) {
    egui::TopBottomPanel::top("top_bar").show(ctx, |ui| {
        ui.horizontal(|ui| {
            let session = viewer.session();
            let title = session
                .and_then(|s| s.model())
                .map(|m| m.name.clone())
                .or_else(|| session.map(|s| s.model_id.to_string()))
                .unwrap_or_else(|| "No model".to_string());
            ui.heading(title);

            if let Some(session) = session {
                if !session.is_ready() {
                    ui.spinner();
                } else if session.uses_fallback() {
                    ui.label(egui::RichText::new("procedural preview").color(egui::Color32::GRAY));
                }
            }
            if loading > 0 {
                ui.label(
                    egui::RichText::new(format!("loading {} part(s)", loading))
                        .color(egui::Color32::GRAY),
                );
            }

            ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                ui.label(
                    egui::RichText::new(format!(
                        "{} ({:?})",
                        viewer.access().user_id,
                        viewer.access().role
                    ))
                    .color(egui::Color32::GRAY),
                );
                if viewer.access().edit_grant().is_some() {
                    ui.separator();
                    let mode = viewer.mode();
                    if ui.selectable_label(mode == ViewMode::Edit, "Edit").clicked() {
                        actions.push(UiAction::SetMode(ViewMode::Edit));
                    }
                    if ui.selectable_label(mode == ViewMode::View, "View").clicked() {
                        actions.push(UiAction::SetMode(ViewMode::View));
                    }
                }
            });
        });

        if let Some(error) = &forms.error {
            ui.horizontal(|ui| {
                ui.colored_label(egui::Color32::from_rgb(230, 120, 100), error);
                if ui.small_button("✕").clicked() {
                    actions.push(UiAction::DismissError);
                }
            });
        }
    });
}

fn layers_panel(ctx: &egui::Context, rows: &[LayerRow], actions: &mut Vec<UiAction>) {
    egui::SidePanel::left("layers_panel")
        .default_width(220.0)
        .show(ctx, |ui| {
            ui.heading("Layers");
            ui.separator();

            if rows.is_empty() {
                ui.label(egui::RichText::new("No layers").color(egui::Color32::GRAY));
            }

            for row in rows {
                let mut toggled = row.toggled;
                ui.horizontal(|ui| {
                    if ui.checkbox(&mut toggled, &row.label).changed() {
                        actions.push(UiAction::ToggleLayer(row.id.clone(), toggled));
                    }
                    ui.label(
                        egui::RichText::new(row.status_text())
                            .small()
                            .color(egui::Color32::GRAY),
                    );
                });

                for part in &row.failed_parts {
                    ui.horizontal(|ui| {
                        ui.add_space(16.0);
                        ui.colored_label(egui::Color32::from_rgb(200, 100, 100), part.as_str());
                        if ui.small_button("Retry").clicked() {
                            actions.push(UiAction::RetryPart(part.clone()));
                        }
                    });
                }

                if row.is_unsaved() {
                    ui.horizontal(|ui| {
                        ui.add_space(16.0);
                        ui.colored_label(egui::Color32::YELLOW, "not saved");
                        if ui.small_button("Save again").clicked() {
                            actions.push(UiAction::RetryLayerSave(row.id.clone()));
                        }
                    });
                }
            }
        });
}

/// Professor tools: place new pins and manage existing ones
fn pins_panel(
    ctx: &egui::Context,
    viewer: &Viewer<Handle<Gltf>>,
    forms: &mut UiForms,
    actions: &mut Vec<UiAction>,
) {
    let Some(session) = viewer.session() else {
        return;
    };
    let pins = &session.pins;

    egui::SidePanel::right("pins_panel")
        .default_width(280.0)
        .show(ctx, |ui| {
            ui.heading("Pins");
            ui.separator();

            match pins.candidate() {
                Some(at) => {
                    ui.label(format!("New pin at ({:.2}, {:.2}, {:.2})", at.x, at.y, at.z));
                    pin_form(ui, &mut forms.pin);
                    ui.horizontal(|ui| {
                        let ready = !forms.pin.label.trim().is_empty() && !pins.is_creating();
                        if ui.add_enabled(ready, egui::Button::new("Add pin")).clicked() {
                            actions.push(UiAction::SubmitPin);
                        }
                        if ui.button("Cancel").clicked() {
                            actions.push(UiAction::CancelPlacement);
                        }
                        if pins.is_creating() {
                            ui.spinner();
                        }
                    });
                }
                None => {
                    ui.label(
                        egui::RichText::new("Click the model to place a pin")
                            .color(egui::Color32::GRAY),
                    );
                }
            }

            ui.separator();
            fetch_status(ui, pins.fetch_state(), "pins", || {
                actions.push(UiAction::RefreshPins)
            });

            let Some(editor) = session.editor.as_ref() else {
                return;
            };
            if editor.editing().is_none() {
                forms.edit = None;
            }
            egui::ScrollArea::vertical().show(ui, |ui| {
                for pin in editor.entries(pins) {
                    let editing = editor.editing() == Some(&pin.id);
                    ui.horizontal(|ui| {
                        marker_swatch(ui, &pin.color);
                        ui.label(&pin.label);
                        ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                            if ui.small_button("Delete").clicked() {
                                actions.push(UiAction::DeletePin(pin.id.clone()));
                            }
                            if !editing && ui.small_button("Edit").clicked() {
                                actions.push(UiAction::BeginEdit(pin.id.clone()));
                            }
                            if ui.small_button("Go").clicked() {
                                actions.push(UiAction::FlyTo(pin.id.clone()));
                            }
                        });
                    });

                    if editing {
                        if let Some(patch) = forms.edit.as_mut() {
                            ui.indent(("edit", pin.id.as_str()), |ui| {
                                patch_form(ui, patch);
                                ui.horizontal(|ui| {
                                    if editor.is_saving() {
                                        ui.spinner();
                                    } else if ui.button("Save").clicked() {
                                        actions.push(UiAction::CommitEdit);
                                    }
                                    if ui.button("Cancel").clicked() {
                                        actions.push(UiAction::CancelEdit);
                                    }
                                });
                            });
                        }
                    }
                }
            });
        });
}

fn pin_form(ui: &mut egui::Ui, content: &mut PinContent) {
    egui::Grid::new("pin_form").num_columns(2).show(ui, |ui| {
        ui.label("Label");
        ui.text_edit_singleline(&mut content.label);
        ui.end_row();

        ui.label("Description");
        ui.text_edit_multiline(&mut content.description);
        ui.end_row();

        ui.label("Type");
        ui.text_edit_singleline(&mut content.pin_type);
        ui.end_row();

        ui.label("Color");
        color_picker(ui, &mut content.color);
        ui.end_row();

        ui.label("Scope");
        scope_picker(ui, "pin_scope", &mut content.scope);
        ui.end_row();
    });
}

fn patch_form(ui: &mut egui::Ui, patch: &mut PinPatch) {
    egui::Grid::new("patch_form").num_columns(2).show(ui, |ui| {
        ui.label("Label");
        ui.text_edit_singleline(&mut patch.label);
        ui.end_row();

        ui.label("Description");
        ui.text_edit_multiline(&mut patch.description);
        ui.end_row();

        ui.label("Type");
        ui.text_edit_singleline(&mut patch.pin_type);
        ui.end_row();

        ui.label("Color");
        color_picker(ui, &mut patch.color);
        ui.end_row();

        ui.label("Scope");
        scope_picker(ui, "patch_scope", &mut patch.scope);
        ui.end_row();
    });
}

fn color_picker(ui: &mut egui::Ui, hex: &mut String) {
    let mut rgb = srgb_bytes(hex);
    if ui.color_edit_button_srgb(&mut rgb).changed() {
        *hex = hex_color(rgb);
    }
}

fn scope_picker(ui: &mut egui::Ui, id: &str, scope: &mut PinScope) {
    egui::ComboBox::from_id_salt(id)
        .selected_text(match scope {
            PinScope::Shared => "My students",
            PinScope::Global => "Everyone",
        })
        .show_ui(ui, |ui| {
            ui.selectable_value(scope, PinScope::Shared, "My students");
            ui.selectable_value(scope, PinScope::Global, "Everyone");
        });
}

/// Student tools: private notes, optionally anchored to a picked point
fn notes_panel(
    ctx: &egui::Context,
    viewer: &Viewer<Handle<Gltf>>,
    forms: &mut UiForms,
    actions: &mut Vec<UiAction>,
) {
    let Some(session) = viewer.session() else {
        return;
    };
    let notes = &session.notes;

    egui::SidePanel::right("notes_panel")
        .default_width(280.0)
        .show(ctx, |ui| {
            ui.heading("My notes");
            ui.separator();

            ui.text_edit_multiline(&mut forms.note_body);
            ui.horizontal(|ui| {
                let anchored = notes.candidate().is_some();
                ui.add_enabled(
                    anchored,
                    egui::Checkbox::new(&mut forms.note_spatial, "Pin to clicked point"),
                );
                let ready = !forms.note_body.trim().is_empty();
                if ui.add_enabled(ready, egui::Button::new("Save")).clicked() {
                    actions.push(UiAction::CreateNote);
                }
            });
            if notes.candidate().is_none() {
                ui.label(
                    egui::RichText::new("Click the model to anchor a note")
                        .small()
                        .color(egui::Color32::GRAY),
                );
            }

            for draft in notes.pending_drafts() {
                ui.horizontal(|ui| {
                    ui.label(egui::RichText::new(&draft.draft.body).italics());
                    if draft.in_flight {
                        ui.spinner();
                    } else {
                        if ui.small_button("Retry").clicked() {
                            actions.push(UiAction::RetryNote(draft.slot));
                        }
                        if ui.small_button("Discard").clicked() {
                            actions.push(UiAction::DiscardNote(draft.slot));
                        }
                    }
                });
                if let Some(err) = &draft.error {
                    ui.colored_label(egui::Color32::from_rgb(200, 100, 100), err.to_string());
                }
            }

            ui.separator();
            fetch_status(ui, notes.fetch_state(), "notes", || {
                actions.push(UiAction::RefreshNotes)
            });
            fetch_status(ui, session.pins.fetch_state(), "pins", || {
                actions.push(UiAction::RefreshPins)
            });

            egui::ScrollArea::vertical().show(ui, |ui| {
                for note in notes.notes() {
                    ui.horizontal(|ui| {
                        if note.anchor.is_some() {
                            ui.label("📍");
                        }
                        ui.label(&note.body);
                        ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                            if ui.small_button("✕").clicked() {
                                actions.push(UiAction::DeleteNote(note.id.clone()));
                            }
                        });
                    });
                    ui.label(
                        egui::RichText::new(note.created_at.format("%Y-%m-%d %H:%M").to_string())
                            .small()
                            .color(egui::Color32::GRAY),
                    );
                }
            });
        });
}

fn fetch_status(ui: &mut egui::Ui, fetch: &FetchState, what: &str, mut retry: impl FnMut()) {
    match fetch {
        FetchState::Loading => {
            ui.horizontal(|ui| {
                ui.spinner();
                ui.label(format!("Loading {}", what));
            });
        }
        FetchState::Failed(err) => {
            ui.horizontal(|ui| {
                ui.colored_label(
                    egui::Color32::from_rgb(200, 100, 100),
                    format!("Could not load {}: {}", what, err),
                );
                if ui.small_button("Retry").clicked() {
                    retry();
                }
            });
        }
        FetchState::Idle | FetchState::Ready => {}
    }
}

/// Pin and note dots at their projected positions, with tooltips
fn markers(ctx: &egui::Context, viewer: &Viewer<Handle<Gltf>>, actions: &mut Vec<UiAction>) {
    let Some(session) = viewer.session() else {
        return;
    };

    for (pin, at) in session.pins.markers() {
        if !at.visible {
            continue;
        }
        if marker(ctx, egui::Id::new(("pin", pin.id.as_str())), at, color32(&pin.color))
            .on_hover_text(&pin.label)
            .clicked()
        {
            actions.push(UiAction::TogglePin(pin.id.clone()));
        }
    }
    for (note, at) in session.notes.markers() {
        if !at.visible {
            continue;
        }
        if marker(
            ctx,
            egui::Id::new(("note", note.id.as_str())),
            at,
            egui::Color32::from_rgb(120, 200, 255),
        )
        .clicked()
        {
            actions.push(UiAction::ToggleNote(note.id.clone()));
        }
    }

    if let Some(pin) = session.pins.open_tooltip() {
        if let Some(at) = session.pins.projection(&pin.id).filter(|p| p.visible) {
            tooltip(ctx, "pin_tooltip", at, |ui| {
                ui.strong(&pin.label);
                ui.label(egui::RichText::new(&pin.pin_type).small().color(egui::Color32::GRAY));
                if !pin.description.is_empty() {
                    ui.label(&pin.description);
                }
            });
        }
    }
    if let Some(note) = session.notes.open_tooltip() {
        if let Some(at) = session.notes.projection(&note.id).filter(|p| p.visible) {
            tooltip(ctx, "note_tooltip", at, |ui| {
                ui.label(&note.body);
            });
        }
    }
}

fn marker(ctx: &egui::Context, id: egui::Id, at: ProjectedPoint, color: egui::Color32) -> egui::Response {
    let size = egui::vec2(MARKER_RADIUS * 2.0, MARKER_RADIUS * 2.0);
    egui::Area::new(id)
        .fixed_pos(egui::pos2(at.x - MARKER_RADIUS, at.y - MARKER_RADIUS))
        .order(egui::Order::Middle)
        .show(ctx, |ui| {
            let (rect, response) = ui.allocate_exact_size(size, egui::Sense::click());
            let painter = ui.painter();
            painter.circle_filled(rect.center(), MARKER_RADIUS, color);
            painter.circle_stroke(
                rect.center(),
                MARKER_RADIUS,
                egui::Stroke::new(1.5, egui::Color32::WHITE),
            );
            response
        })
        .inner
}

fn tooltip(ctx: &egui::Context, id: &str, at: ProjectedPoint, body: impl FnOnce(&mut egui::Ui)) {
    egui::Area::new(egui::Id::new(id))
        .fixed_pos(egui::pos2(at.x + MARKER_RADIUS * 2.0, at.y - MARKER_RADIUS))
        .order(egui::Order::Foreground)
        .show(ctx, |ui| {
            egui::Frame::popup(ui.style()).show(ui, |ui| {
                ui.set_max_width(240.0);
                body(ui);
            });
        });
}

fn marker_swatch(ui: &mut egui::Ui, hex: &str) {
    let (rect, _) = ui.allocate_exact_size(egui::vec2(10.0, 10.0), egui::Sense::hover());
    ui.painter().circle_filled(rect.center(), 5.0, color32(hex));
}

fn apply_action(viewer: &mut Viewer<Handle<Gltf>>, forms: &mut UiForms, action: UiAction) {
    debug!(?action, "UI action");
    let result: Result<(), String> = match action {
        UiAction::SetMode(mode) => viewer.set_mode(mode).map_err(|e| e.to_string()),
        UiAction::ToggleLayer(layer, visible) => {
            viewer.toggle_layer(&layer, visible).map_err(|e| e.to_string())
        }
        UiAction::RetryLayerSave(layer) => {
            viewer.retry_layer_save(&layer).map_err(|e| e.to_string())
        }
        UiAction::RetryPart(part) => viewer.retry_part(&part).map_err(|e| e.to_string()),
        UiAction::SubmitPin => match viewer.submit_pin(forms.pin.clone()) {
            Ok(()) => {
                forms.pin.label.clear();
                forms.pin.description.clear();
                Ok(())
            }
            Err(e) => Err(e.to_string()),
        },
        UiAction::CancelPlacement => {
            if let Some(session) = viewer.session_mut() {
                session.pins.clear_candidate();
            }
            Ok(())
        }
        UiAction::RefreshPins => viewer.refresh_pins().map_err(|e| e.to_string()),
        UiAction::BeginEdit(id) => match viewer.begin_edit(&id) {
            Ok(()) => {
                forms.edit = viewer
                    .session()
                    .and_then(|s| s.editor.as_ref())
                    .and_then(|e| e.buffer())
                    .cloned();
                Ok(())
            }
            Err(e) => Err(e.to_string()),
        },
        UiAction::CommitEdit => {
            if let (Some(patch), Some(session)) = (forms.edit.clone(), viewer.session_mut()) {
                if let Some(buffer) = session.editor.as_mut().and_then(|e| e.buffer_mut()) {
                    *buffer = patch;
                }
            }
            viewer.commit_edit().map_err(|e| e.to_string())
        }
        UiAction::CancelEdit => {
            forms.edit = None;
            if let Some(editor) = viewer.session_mut().and_then(|s| s.editor.as_mut()) {
                editor.cancel();
            }
            Ok(())
        }
        UiAction::DeletePin(id) => viewer.delete_pin(&id).map_err(|e| e.to_string()),
        UiAction::FlyTo(id) => viewer.fly_to_pin(&id).map_err(|e| e.to_string()),
        UiAction::CreateNote => {
            let anchored = viewer
                .session()
                .is_some_and(|s| s.notes.candidate().is_some());
            match viewer.create_note(&forms.note_body, forms.note_spatial && anchored) {
                Ok(()) => {
                    forms.note_body.clear();
                    Ok(())
                }
                Err(e) => Err(e.to_string()),
            }
        }
        UiAction::RetryNote(slot) => {
            viewer.retry_note(slot);
            Ok(())
        }
        UiAction::DiscardNote(slot) => {
            if let Some(session) = viewer.session_mut() {
                session.notes.discard_draft(slot);
            }
            Ok(())
        }
        UiAction::DeleteNote(id) => viewer.delete_note(&id).map_err(|e| e.to_string()),
        UiAction::RefreshNotes => viewer.refresh_notes().map_err(|e| e.to_string()),
        UiAction::TogglePin(id) => {
            if let Some(session) = viewer.session_mut() {
                session.pins.toggle_tooltip(&id);
            }
            Ok(())
        }
        UiAction::ToggleNote(id) => {
            if let Some(session) = viewer.session_mut() {
                session.notes.toggle_tooltip(&id);
            }
            Ok(())
        }
        UiAction::DismissError => {
            forms.error = None;
            Ok(())
        }
    };

    match result {
        Ok(()) => {}
        Err(message) => {
            warn!("{}", message);
            forms.error = Some(message);
        }
    }
}

/// sRGB bytes of a "#rrggbb" color, or the default pin color
fn srgb_bytes(hex: &str) -> [u8; 3] {
    let rgb = parse_hex_color(hex)
        .or_else(|| parse_hex_color(DEFAULT_PIN_COLOR))
        .unwrap_or([1.0, 1.0, 1.0]);
    rgb.map(|c| (c.clamp(0.0, 1.0) * 255.0).round() as u8)
}

fn hex_color(rgb: [u8; 3]) -> String {
    format!("#{:02x}{:02x}{:02x}", rgb[0], rgb[1], rgb[2])
}

fn color32(hex: &str) -> egui::Color32 {
    let [r, g, b] = srgb_bytes(hex);
    egui::Color32::from_rgb(r, g, b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anatomy_core::config::ViewerConfig;
    use anatomy_core::model::{Access, Role};

    #[test]
    fn test_hex_color_bytes() {
        assert_eq!(srgb_bytes("#ff8000"), [255, 128, 0]);
        assert_eq!(hex_color([255, 128, 0]), "#ff8000");
        assert_eq!(srgb_bytes("not a color"), srgb_bytes(DEFAULT_PIN_COLOR));
    }

    #[test]
    fn test_failed_action_surfaces_error() {
        let mut viewer = Viewer::new(
            ViewerConfig::default(),
            Access::new("student-1", Role::Student),
        );
        let mut forms = UiForms::default();

        apply_action(&mut viewer, &mut forms, UiAction::SetMode(ViewMode::Edit));
        assert!(forms.error.is_some());
        assert_eq!(viewer.mode(), ViewMode::View);

        apply_action(&mut viewer, &mut forms, UiAction::DismissError);
        assert!(forms.error.is_none());
    }

    #[test]
    fn test_submit_without_candidate_keeps_form() {
        let mut viewer = Viewer::new(
            ViewerConfig::default(),
            Access::new("prof-1", Role::Professor),
        );
        let mut forms = UiForms::default();
        forms.pin.label = "Aorta".to_string();

        apply_action(&mut viewer, &mut forms, UiAction::SubmitPin);

        assert_eq!(forms.pin.label, "Aorta");
        assert!(forms.error.is_some());
    }
}
