use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tower_lsp::lsp_types::Url;
use tracing::warn;

use crate::schema::DocKind;

pub const SETTINGS_SECTION: &str = "abilityLsp";

const DEFAULT_DEBOUNCE_MS: u64 = 300;
const DEFAULT_ENERGY_BEAM_DIRECTORY: &str = "energy_beams";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub docs_root: Option<PathBuf>,
    pub abilities_path: Option<PathBuf>,
    pub conditions_path: Option<PathBuf>,
    pub energy_renderers_path: Option<PathBuf>,
    pub energy_beam_directory: String,
    pub reload_debounce_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            docs_root: None,
            abilities_path: None,
            conditions_path: None,
            energy_renderers_path: None,
            energy_beam_directory: DEFAULT_ENERGY_BEAM_DIRECTORY.to_string(),
            reload_debounce_ms: DEFAULT_DEBOUNCE_MS,
        }
    }
}

impl Settings {
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        let section = value.get(SETTINGS_SECTION).unwrap_or(value);
        if !section.is_object() {
            return None;
        }
        match serde_json::from_value(section.clone()) {
            Ok(settings) => Some(settings),
            Err(err) => {
                warn!(error = %err, "ignoring malformed settings");
                None
            }
        }
    }

    pub fn override_path(&self, kind: DocKind) -> Option<&Path> {
        match kind {
            DocKind::Ability => self.abilities_path.as_deref(),
            DocKind::Condition => self.conditions_path.as_deref(),
            DocKind::EnergyRenderer => self.energy_renderers_path.as_deref(),
        }
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.reload_debounce_ms)
    }

    pub fn resolved_docs_root(&self, workspace_roots: &[PathBuf]) -> Option<PathBuf> {
        let root = workspace_roots.first();
        match (&self.docs_root, root) {
            (Some(dir), _) if dir.is_absolute() => Some(dir.clone()),
            (Some(dir), Some(root)) => Some(root.join(dir)),
            (Some(dir), None) => Some(dir.clone()),
            (None, Some(root)) => {
                let docs = root.join("docs");
                if docs.is_dir() {
                    Some(docs)
                } else {
                    Some(root.clone())
                }
            }
            (None, None) => None,
        }
    }

    pub fn is_energy_beam_document(&self, uri: &Url) -> bool {
        let Ok(path) = uri.to_file_path() else {
            return uri
                .path_segments()
                .map(|segments| {
                    let segments: Vec<_> = segments.collect();
                    let parents = &segments[..segments.len().saturating_sub(1)];
                    parents.iter().any(|s| *s == self.energy_beam_directory)
                })
                .unwrap_or(false);
        };
        path.parent()
            .map(|parent| {
                parent
                    .components()
                    .any(|c| c.as_os_str() == self.energy_beam_directory.as_str())
            })
            .unwrap_or(false)
    }
}
