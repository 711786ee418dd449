//! Layer toggles and background persistence of their visibility

use std::collections::HashMap;
use tracing::{debug, warn};

use crate::config::PersistenceConfig;
use crate::error::{StoreError, ViewerError};
use crate::loader::{LayerState, LoadRequest, PartLoader};
use crate::model::{LayerId, PartId};

/// Persist one layer's visibility
#[derive(Debug, Clone, PartialEq)]
pub struct LayerWrite {
    pub layer: LayerId,
    pub visible: bool,
    /// 1-based attempt number
    pub attempt: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SaveState {
    Saved,
    InFlight { visible: bool, attempt: u32 },
    /// Waiting for the backoff delay before the next attempt
    Retrying { visible: bool, attempt: u32, due: f64 },
    /// Every attempt failed; the toggle is only applied locally
    Unsaved { visible: bool },
}

#[derive(Debug, Clone)]
struct LayerSave {
    state: SaveState,
    /// Latest toggle made while a write was in flight
    queued: Option<bool>,
}

/// One row of the layer panel, reflecting the loader's actual state
#[derive(Debug, Clone, PartialEq)]
pub struct LayerRow {
    pub id: LayerId,
    pub label: String,
    pub toggled: bool,
    pub state: LayerState,
    pub failed_parts: Vec<PartId>,
    pub save: SaveState,
}

impl LayerRow {
    pub fn is_unsaved(&self) -> bool {
        matches!(self.save, SaveState::Unsaved { .. })
    }

    pub fn status_text(&self) -> String {
        match self.state {
            LayerState::Hidden => "hidden".to_string(),
            LayerState::Visible => "visible".to_string(),
            LayerState::Loading { pending, total } => {
                format!("loading {}/{}", total - pending, total)
            }
            LayerState::PartiallyFailed { failed, total } => {
                format!("{} of {} parts failed", failed, total)
            }
        }
    }
}

/// Layer panel: toggles go through the loader, writes are coalesced per
/// layer (latest wins) and retried with exponential backoff.
#[derive(Debug)]
pub struct LayerPanel {
    policy: PersistenceConfig,
    saves: HashMap<LayerId, LayerSave>,
}

impl LayerPanel {
    pub fn new(policy: PersistenceConfig) -> Self {
        Self {
            policy,
            saves: HashMap::new(),
        }
    }

    pub fn rows<H>(&self, loader: &PartLoader<H>) -> Vec<LayerRow> {
        loader
            .layers()
            .iter()
            .map(|layer| {
                let failed_parts = loader
                    .failed_parts()
                    .filter(|(id, _)| loader.members(&layer.id).contains(*id))
                    .map(|(id, _)| id.clone())
                    .collect();
                LayerRow {
                    id: layer.id.clone(),
                    label: layer.label.clone(),
                    toggled: loader.is_layer_visible(&layer.id),
                    state: loader.layer_state(&layer.id),
                    failed_parts,
                    save: self.save_state(&layer.id),
                }
            })
            .collect()
    }

    pub fn save_state(&self, layer: &LayerId) -> SaveState {
        self.saves
            .get(layer)
            .map(|s| s.state)
            .unwrap_or(SaveState::Saved)
    }

    /// Apply a toggle to the loader and schedule its persistence
    pub fn toggle<H>(
        &mut self,
        loader: &mut PartLoader<H>,
        layer: &LayerId,
        visible: bool,
    ) -> Result<(Vec<LoadRequest>, Option<LayerWrite>), ViewerError> {
        let loads = loader.set_layer_visible(layer, visible)?;
        Ok((loads, self.schedule(layer, visible)))
    }

    fn schedule(&mut self, layer: &LayerId, visible: bool) -> Option<LayerWrite> {
        let save = self.saves.entry(layer.clone()).or_insert(LayerSave {
            state: SaveState::Saved,
            queued: None,
        });
        if let SaveState::InFlight { .. } = save.state {
            debug!(layer = %layer, visible, "Write in flight, queueing latest toggle");
            save.queued = Some(visible);
            return None;
        }
        save.queued = None;
        save.state = SaveState::InFlight {
            visible,
            attempt: 1,
        };
        Some(LayerWrite {
            layer: layer.clone(),
            visible,
            attempt: 1,
        })
    }

    /// Record the result of a write; may return the next write to issue
    pub fn write_finished(
        &mut self,
        write: &LayerWrite,
        result: Result<(), StoreError>,
        now: f64,
    ) -> Option<LayerWrite> {
        let save = self.saves.get_mut(&write.layer)?;
        let in_flight = matches!(
            save.state,
            SaveState::InFlight { visible, attempt }
                if visible == write.visible && attempt == write.attempt
        );
        if !in_flight {
            debug!(layer = %write.layer, "Ignoring result of superseded layer write");
            return None;
        }

        if let Some(latest) = save.queued.take() {
            if result.is_err() || latest != write.visible {
                save.state = SaveState::InFlight {
                    visible: latest,
                    attempt: 1,
                };
                return Some(LayerWrite {
                    layer: write.layer.clone(),
                    visible: latest,
                    attempt: 1,
                });
            }
        }

        match result {
            Ok(()) => {
                save.state = SaveState::Saved;
                None
            }
            Err(err) if write.attempt < self.policy.max_attempts => {
                let delay = self.policy.backoff(write.attempt);
                warn!(
                    layer = %write.layer,
                    attempt = write.attempt,
                    delay,
                    error = %err,
                    "Layer visibility write failed, retrying"
                );
                save.state = SaveState::Retrying {
                    visible: write.visible,
                    attempt: write.attempt + 1,
                    due: now + delay,
                };
                None
            }
            Err(err) => {
                warn!(
                    layer = %write.layer,
                    attempts = write.attempt,
                    error = %err,
                    "Giving up on layer visibility write"
                );
                save.state = SaveState::Unsaved {
                    visible: write.visible,
                };
                None
            }
        }
    }

    /// Writes whose backoff delay has elapsed
    pub fn due_writes(&mut self, now: f64) -> Vec<LayerWrite> {
        let mut writes = Vec::new();
        for (layer, save) in self.saves.iter_mut() {
            if let SaveState::Retrying {
                visible,
                attempt,
                due,
            } = save.state
            {
                if due <= now {
                    save.state = SaveState::InFlight { visible, attempt };
                    writes.push(LayerWrite {
                        layer: layer.clone(),
                        visible,
                        attempt,
                    });
                }
            }
        }
        writes.sort_by(|a, b| a.layer.cmp(&b.layer));
        writes
    }

    /// Start over on a layer whose writes were abandoned
    pub fn retry_unsaved(&mut self, layer: &LayerId) -> Option<LayerWrite> {
        match self.saves.get(layer)?.state {
            SaveState::Unsaved { visible } => self.schedule(layer, visible),
            _ => None,
        }
    }

    pub fn has_pending(&self) -> bool {
        self.saves
            .values()
            .any(|s| !matches!(s.state, SaveState::Saved | SaveState::Unsaved { .. }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Layer, Part, PartTransform};

    fn loader() -> PartLoader<()> {
        let mut loader = PartLoader::new();
        let part = |id: &str| Part {
            id: id.into(),
            source: format!("arm/{}.glb", id),
            layer_id: "muscles".into(),
            default_visible: true,
            transform: PartTransform::default(),
        };
        loader.initialize(
            vec![part("bicep"), part("tricep"), part("deltoid")],
            vec![Layer {
                id: "muscles".into(),
                label: "Muscles".to_string(),
                part_ids: Vec::new(),
                default_visible: false,
            }],
        );
        loader
    }

    fn panel() -> LayerPanel {
        LayerPanel::new(PersistenceConfig {
            max_attempts: 3,
            initial_backoff_secs: 1.0,
            backoff_factor: 2.0,
        })
    }

    #[test]
    fn test_toggle_loads_and_persists() {
        let mut loader = loader();
        let mut panel = panel();
        let muscles = LayerId::new("muscles");
        let (loads, write) = panel.toggle(&mut loader, &muscles, true).unwrap();
        assert_eq!(loads.len(), 3);
        let write = write.unwrap();
        assert_eq!(write.attempt, 1);
        let rows = panel.rows(&loader);
        assert!(rows[0].toggled);
        assert_eq!(rows[0].status_text(), "loading 0/3");
        assert!(panel.write_finished(&write, Ok(()), 0.0).is_none());
        assert_eq!(panel.save_state(&muscles), SaveState::Saved);
    }

    #[test]
    fn test_toggles_coalesce_latest_wins() {
        let mut loader = loader();
        let mut panel = panel();
        let muscles = LayerId::new("muscles");
        let (_, first) = panel.toggle(&mut loader, &muscles, true).unwrap();
        let (_, second) = panel.toggle(&mut loader, &muscles, false).unwrap();
        let (_, third) = panel.toggle(&mut loader, &muscles, true).unwrap();
        assert!(second.is_none() && third.is_none());
        // Latest value equals what was written, nothing more to send
        assert!(panel.write_finished(&first.unwrap(), Ok(()), 0.0).is_none());

        let (_, first) = panel.toggle(&mut loader, &muscles, false).unwrap();
        panel.toggle(&mut loader, &muscles, true).unwrap();
        panel.toggle(&mut loader, &muscles, false).unwrap();
        let next = panel.write_finished(&first.unwrap(), Ok(()), 0.0);
        assert!(next.is_none());
    }

    #[test]
    fn test_queued_toggle_sent_after_write() {
        let mut loader = loader();
        let mut panel = panel();
        let muscles = LayerId::new("muscles");
        let (_, first) = panel.toggle(&mut loader, &muscles, true).unwrap();
        panel.toggle(&mut loader, &muscles, false).unwrap();
        let next = panel.write_finished(&first.unwrap(), Ok(()), 0.0).unwrap();
        assert!(!next.visible);
        assert_eq!(next.attempt, 1);
    }

    #[test]
    fn test_failed_write_backs_off_then_gives_up() {
        let mut loader = loader();
        let mut panel = panel();
        let muscles = LayerId::new("muscles");
        let (_, write) = panel.toggle(&mut loader, &muscles, true).unwrap();
        let mut write = write.unwrap();
        let mut now = 0.0;
        for attempt in 1..3 {
            assert!(panel.write_finished(&write, Err(StoreError::Timeout), now).is_none());
            assert!(panel.due_writes(now).is_empty());
            now += panel.policy.backoff(attempt);
            let due = panel.due_writes(now);
            assert_eq!(due.len(), 1);
            write = due[0].clone();
            assert_eq!(write.attempt, attempt + 1);
        }
        panel.write_finished(&write, Err(StoreError::Timeout), now);
        assert_eq!(
            panel.save_state(&muscles),
            SaveState::Unsaved { visible: true }
        );
        assert!(panel.rows(&loader)[0].is_unsaved());
        // Local toggle stays applied
        assert!(loader.is_layer_visible(&muscles));

        let again = panel.retry_unsaved(&muscles).unwrap();
        assert_eq!(again.attempt, 1);
    }

    #[test]
    fn test_unknown_layer_does_not_persist() {
        let mut loader = loader();
        let mut panel = panel();
        assert!(panel.toggle(&mut loader, &LayerId::new("nerves"), true).is_err());
        assert!(!panel.has_pending());
    }
}
