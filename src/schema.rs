use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::json;
use tracing::{debug, warn};

use crate::snippet::build_snippet_from_example;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocKind {
    Ability,
    Condition,
    EnergyRenderer,
}

impl DocKind {
    pub const ALL: [DocKind; 3] = [DocKind::Ability, DocKind::Condition, DocKind::EnergyRenderer];

    pub fn label(self) -> &'static str {
        match self {
            DocKind::Ability => "ability",
            DocKind::Condition => "condition",
            DocKind::EnergyRenderer => "energy renderer",
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            DocKind::Ability => "Ability",
            DocKind::Condition => "Condition",
            DocKind::EnergyRenderer => "Energy Renderer",
        }
    }

    pub fn default_file_names(self) -> &'static [&'static str] {
        match self {
            DocKind::Ability => &["abilities.html"],
            DocKind::Condition => &["conditions.html"],
            DocKind::EnergyRenderer => &["energy_renderers.html", "energy-renderers.html"],
        }
    }

    fn fallback_id(self) -> &'static str {
        match self {
            DocKind::Ability => "custom:ability",
            DocKind::Condition => "custom:condition",
            DocKind::EnergyRenderer => "custom:energy_renderer",
        }
    }
}

impl fmt::Display for DocKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldDef {
    pub name: String,
    pub field_type: Option<String>,
    pub description: Option<String>,
    pub required: Option<bool>,
    pub fallback: Option<String>,
}

impl FieldDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct EntityRecord {
    pub id: String,
    pub name: String,
    pub snippet: String,
    pub example: String,
    pub description: Option<String>,
    pub source: String,
    fields: Vec<FieldDef>,
    field_index: HashMap<String, usize>,
}

impl EntityRecord {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        snippet: impl Into<String>,
        example: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            snippet: snippet.into(),
            example: example.into(),
            description: None,
            source: source.into(),
            fields: Vec::new(),
            field_index: HashMap::new(),
        }
    }

    pub fn with_description(mut self, description: Option<String>) -> Self {
        self.description = description;
        self
    }

    pub fn with_fields(mut self, fields: Vec<FieldDef>) -> Self {
        let mut field_index = HashMap::with_capacity(fields.len());
        for (index, field) in fields.iter().enumerate() {
            field_index.entry(field.name.clone()).or_insert(index);
        }
        self.fields = fields;
        self.field_index = field_index;
        self
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.field_index.get(name).map(|&index| &self.fields[index])
    }

    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    pub fn has_fields(&self) -> bool {
        !self.fields.is_empty()
    }
}

#[derive(Debug)]
pub struct SchemaSnapshot {
    kind: DocKind,
    generation: u64,
    entries: Vec<EntityRecord>,
    by_id: HashMap<String, usize>,
    source: Option<PathBuf>,
    is_fallback: bool,
}

impl SchemaSnapshot {
    fn build(
        kind: DocKind,
        generation: u64,
        records: Vec<EntityRecord>,
        source: Option<PathBuf>,
        is_fallback: bool,
    ) -> Self {
        let mut entries: Vec<EntityRecord> = Vec::with_capacity(records.len());
        let mut by_id = HashMap::with_capacity(records.len());
        for record in records {
            match by_id.get(&record.id) {
                Some(&index) => {
                    warn!(%kind, id = %record.id, "duplicate schema entry; keeping the last one");
                    entries[index] = record;
                }
                None => {
                    by_id.insert(record.id.clone(), entries.len());
                    entries.push(record);
                }
            }
        }
        Self {
            kind,
            generation,
            entries,
            by_id,
            source,
            is_fallback,
        }
    }

    fn fallback(kind: DocKind) -> Self {
        Self::build(kind, 0, vec![fallback_record(kind)], None, true)
    }

    pub fn kind(&self) -> DocKind {
        self.kind
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn entries(&self) -> &[EntityRecord] {
        &self.entries
    }

    pub fn get(&self, id: &str) -> Option<&EntityRecord> {
        self.by_id.get(id).map(|&index| &self.entries[index])
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    pub fn is_fallback(&self) -> bool {
        self.is_fallback
    }
}

fn fallback_record(kind: DocKind) -> EntityRecord {
    let id = kind.fallback_id();
    let example = json!({ "type": id });
    let snippet = build_snippet_from_example(kind, &example);
    let pretty = serde_json::to_string_pretty(&example).unwrap_or_default();
    EntityRecord::new(id, format!("Custom {}", kind.label()), snippet, pretty, "built-in")
        .with_description(Some(format!(
            "Placeholder {} used until documentation is loaded.",
            kind.label()
        )))
}

#[derive(Debug, Clone)]
pub struct SchemaView {
    pub abilities: Arc<SchemaSnapshot>,
    pub conditions: Arc<SchemaSnapshot>,
    pub energy_renderers: Arc<SchemaSnapshot>,
}

impl SchemaView {
    pub fn get(&self, kind: DocKind) -> &SchemaSnapshot {
        match kind {
            DocKind::Ability => &self.abilities,
            DocKind::Condition => &self.conditions,
            DocKind::EnergyRenderer => &self.energy_renderers,
        }
    }

    pub fn record(&self, kind: DocKind, id: &str) -> Option<&EntityRecord> {
        self.get(kind).get(id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReloadTicket {
    kind: DocKind,
    generation: u64,
}

impl ReloadTicket {
    pub fn kind(&self) -> DocKind {
        self.kind
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

#[derive(Debug)]
struct Slot {
    snapshot: RwLock<Arc<SchemaSnapshot>>,
    issued: AtomicU64,
}

impl Slot {
    fn new(kind: DocKind) -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(SchemaSnapshot::fallback(kind))),
            issued: AtomicU64::new(0),
        }
    }
}

#[derive(Debug)]
pub struct SchemaRegistry {
    abilities: Slot,
    conditions: Slot,
    energy_renderers: Slot,
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self {
            abilities: Slot::new(DocKind::Ability),
            conditions: Slot::new(DocKind::Condition),
            energy_renderers: Slot::new(DocKind::EnergyRenderer),
        }
    }

    fn slot(&self, kind: DocKind) -> &Slot {
        match kind {
            DocKind::Ability => &self.abilities,
            DocKind::Condition => &self.conditions,
            DocKind::EnergyRenderer => &self.energy_renderers,
        }
    }

    pub fn current(&self, kind: DocKind) -> Arc<SchemaSnapshot> {
        self.slot(kind).snapshot.read().clone()
    }

    pub fn view(&self) -> SchemaView {
        SchemaView {
            abilities: self.current(DocKind::Ability),
            conditions: self.current(DocKind::Condition),
            energy_renderers: self.current(DocKind::EnergyRenderer),
        }
    }

    pub fn begin_reload(&self, kind: DocKind) -> ReloadTicket {
        let generation = self.slot(kind).issued.fetch_add(1, Ordering::SeqCst) + 1;
        ReloadTicket { kind, generation }
    }

    /// Installs `entries` for the ticket's kind. Returns `false` when a newer
    /// generation has already been published.
    pub fn publish(
        &self,
        ticket: ReloadTicket,
        entries: Vec<EntityRecord>,
        source: Option<PathBuf>,
    ) -> bool {
        let slot = self.slot(ticket.kind);
        let mut current = slot.snapshot.write();
        if ticket.generation < current.generation {
            debug!(
                kind = %ticket.kind,
                generation = ticket.generation,
                published = current.generation,
                "discarding stale schema reload"
            );
            return false;
        }
        *current = Arc::new(SchemaSnapshot::build(
            ticket.kind,
            ticket.generation,
            entries,
            source,
            false,
        ));
        true
    }

    pub fn replace(&self, kind: DocKind, entries: Vec<EntityRecord>) {
        let ticket = self.begin_reload(kind);
        self.publish(ticket, entries, None);
    }

    pub fn fail(&self, ticket: ReloadTicket) -> Arc<SchemaSnapshot> {
        let current = self.current(ticket.kind);
        if current.is_fallback() {
            debug!(kind = %ticket.kind, "schema unavailable; using built-in fallback");
        } else {
            debug!(
                kind = %ticket.kind,
                generation = current.generation(),
                "schema reload failed; keeping previous snapshot"
            );
        }
        current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, name: &str) -> EntityRecord {
        EntityRecord::new(id, name, "{}", "{}", "abilities.html")
    }

    #[test]
    fn starts_with_fallback_snapshots() {
        let registry = SchemaRegistry::new();
        for kind in DocKind::ALL {
            let snapshot = registry.current(kind);
            assert!(snapshot.is_fallback());
            assert_eq!(snapshot.len(), 1);
            assert_eq!(snapshot.entries()[0].id, kind.fallback_id());
        }
    }

    #[test]
    fn dedupes_by_id_keeping_first_position_and_last_value() {
        let registry = SchemaRegistry::new();
        registry.replace(
            DocKind::Ability,
            vec![record("a:one", "first"), record("a:two", "two"), record("a:one", "second")],
        );
        let snapshot = registry.current(DocKind::Ability);
        let ids: Vec<_> = snapshot.entries().iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a:one", "a:two"]);
        assert_eq!(snapshot.get("a:one").map(|r| r.name.as_str()), Some("second"));
        assert!(!snapshot.is_fallback());
    }

    #[test]
    fn stale_reload_results_are_discarded() {
        let registry = SchemaRegistry::new();
        let older = registry.begin_reload(DocKind::Condition);
        let newer = registry.begin_reload(DocKind::Condition);

        assert!(registry.publish(newer, vec![record("c:new", "new")], None));
        assert!(!registry.publish(older, vec![record("c:old", "old")], None));

        let snapshot = registry.current(DocKind::Condition);
        assert!(snapshot.get("c:new").is_some());
        assert!(snapshot.get("c:old").is_none());
        assert_eq!(snapshot.generation(), newer.generation());
    }

    #[test]
    fn failure_keeps_previous_snapshot_and_leaves_other_kinds_alone() {
        let registry = SchemaRegistry::new();
        registry.replace(DocKind::Ability, vec![record("a:dash", "Dash")]);

        let ticket = registry.begin_reload(DocKind::Ability);
        let kept = registry.fail(ticket);
        assert!(kept.get("a:dash").is_some());
        assert!(registry.current(DocKind::Condition).is_fallback());
    }

    #[test]
    fn field_index_follows_fields() {
        let record = record("a:dash", "Dash")
            .with_fields(vec![FieldDef::new("cooldown"), FieldDef::new("range")]);
        assert_eq!(record.field("range").map(|f| f.name.as_str()), Some("range"));
        assert!(record.field("speed").is_none());
        assert_eq!(record.fields().len(), 2);
    }
}
