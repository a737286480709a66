use std::path::{Path, PathBuf};

use scraper::{ElementRef, Html};
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::Settings;
use crate::error::SchemaError;
use crate::schema::{DocKind, EntityRecord, FieldDef};
use crate::snippet::{build_snippet_from_example, escape_snippet_text};
use crate::watcher::WatchTarget;

const SEARCH_DEPTH: usize = 4;

const NAME_HEADERS: &[&str] = &["setting", "property", "field", "name", "key"];
const TYPE_HEADERS: &[&str] = &["type"];
const DESCRIPTION_HEADERS: &[&str] = &["description", "details"];
const REQUIRED_HEADERS: &[&str] = &["required"];
const FALLBACK_HEADERS: &[&str] = &["default", "fallback"];

pub fn is_namespaced_id(id: &str) -> bool {
    match id.split_once(':') {
        Some((namespace, path)) => {
            !namespace.is_empty() && !path.is_empty() && !id.chars().any(char::is_whitespace)
        }
        None => false,
    }
}

pub fn load(kind: DocKind, path: &Path) -> Vec<EntityRecord> {
    match try_load(kind, path) {
        Ok(records) => records,
        Err(err) => {
            warn!(%kind, error = %err, "failed to load schema");
            Vec::new()
        }
    }
}

pub fn try_load(kind: DocKind, path: &Path) -> Result<Vec<EntityRecord>, SchemaError> {
    let html = std::fs::read_to_string(path).map_err(|source| SchemaError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let label = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    let records = parse_document(kind, &html, &label);
    if records.is_empty() {
        return Err(SchemaError::NoEntries {
            kind,
            path: path.to_path_buf(),
        });
    }
    info!(%kind, count = records.len(), source = %label, "loaded schema");
    Ok(records)
}

/// Extracts every entity block of `html`. Duplicate ids are kept here and
/// resolved when the snapshot is built.
pub fn parse_document(kind: DocKind, html: &str, source_label: &str) -> Vec<EntityRecord> {
    let document = Html::parse_document(html);
    let anchors: Vec<ElementRef> = document
        .root_element()
        .descendants()
        .filter_map(ElementRef::wrap)
        .filter(is_anchor)
        .collect();

    anchors
        .into_iter()
        .filter_map(|anchor| {
            let block = Block::new(anchor);
            let record = block.record(kind, source_label)?;
            debug!(%kind, id = %record.id, fields = record.fields().len(), "parsed entity block");
            Some(record)
        })
        .collect()
}

fn is_anchor(element: &ElementRef) -> bool {
    element.value().attr("id").is_some_and(is_namespaced_id)
}

fn has_anchor_inside(element: ElementRef) -> bool {
    element
        .descendants()
        .filter_map(ElementRef::wrap)
        .any(|el| is_anchor(&el))
}

fn tag<'a>(element: &ElementRef<'a>) -> &'a str {
    element.value().name()
}

fn is_heading(element: &ElementRef) -> bool {
    matches!(tag(element), "h1" | "h2" | "h3" | "h4" | "h5" | "h6")
}

fn collapsed_text(element: ElementRef) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

fn raw_text(element: ElementRef) -> String {
    element.text().collect::<String>().trim().to_string()
}

fn non_empty(text: String) -> Option<String> {
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

struct Block<'a> {
    anchor: ElementRef<'a>,
    elements: Vec<ElementRef<'a>>,
    sectioned: bool,
}

impl<'a> Block<'a> {
    fn new(anchor: ElementRef<'a>) -> Self {
        let sectioned = anchor
            .descendants()
            .filter_map(ElementRef::wrap)
            .any(|el| matches!(tag(&el), "pre" | "code" | "table"));

        let mut elements = vec![anchor];
        if !sectioned {
            for sibling in anchor.next_siblings().filter_map(ElementRef::wrap) {
                if has_anchor_inside(sibling) {
                    break;
                }
                elements.push(sibling);
            }
        }

        Self {
            anchor,
            elements,
            sectioned,
        }
    }

    fn descendants(&self) -> impl Iterator<Item = ElementRef<'a>> + '_ {
        self.elements
            .iter()
            .flat_map(|element| element.descendants().filter_map(ElementRef::wrap))
    }

    fn record(&self, kind: DocKind, source_label: &str) -> Option<EntityRecord> {
        let id = self.anchor.value().attr("id")?.to_string();
        let name = self.name().unwrap_or_else(|| id.clone());
        let description = self
            .descendants()
            .find(|el| tag(el) == "p")
            .map(collapsed_text)
            .and_then(non_empty);

        let candidates = self.example_candidates();
        let parsed = candidates
            .iter()
            .find_map(|text| serde_json::from_str::<Value>(text).ok());

        let (example, snippet, value) = match (parsed, candidates.first()) {
            (Some(value), _) => {
                let pretty = serde_json::to_string_pretty(&value).unwrap_or_default();
                (pretty, build_snippet_from_example(kind, &value), Some(value))
            }
            (None, Some(raw)) => {
                warn!(%kind, %id, "example is not valid JSON; using it verbatim");
                (raw.clone(), escape_snippet_text(raw), None)
            }
            (None, None) => {
                let value = json!({ "type": id });
                let pretty = serde_json::to_string_pretty(&value).unwrap_or_default();
                (pretty, build_snippet_from_example(kind, &value), Some(value))
            }
        };

        let fields = self
            .field_table()
            .filter(|fields| !fields.is_empty())
            .or_else(|| value.as_ref().map(synthesize_fields))
            .unwrap_or_default();

        Some(
            EntityRecord::new(id, name, snippet, example, source_label)
                .with_description(description)
                .with_fields(fields),
        )
    }

    fn name(&self) -> Option<String> {
        let heading = if is_heading(&self.anchor) {
            Some(self.anchor)
        } else {
            self.descendants().find(is_heading)
        };
        heading
            .map(collapsed_text)
            .and_then(non_empty)
            .or_else(|| {
                if self.sectioned {
                    None
                } else {
                    non_empty(collapsed_text(self.anchor))
                }
            })
            .or_else(|| {
                self.anchor
                    .value()
                    .attr("data-name")
                    .map(|name| name.trim().to_string())
                    .and_then(non_empty)
            })
    }

    fn example_candidates(&self) -> Vec<String> {
        let samples: Vec<ElementRef> = self
            .descendants()
            .filter(|el| matches!(tag(el), "pre" | "code"))
            .filter(|el| {
                !el.ancestors()
                    .filter_map(ElementRef::wrap)
                    .any(|ancestor| is_heading(&ancestor) || tag(&ancestor) == "table")
            })
            .collect();

        let in_pre = |el: &ElementRef| {
            el.parent()
                .and_then(ElementRef::wrap)
                .is_some_and(|parent| tag(&parent) == "pre")
        };

        let pre_code = samples.iter().filter(|el| tag(el) == "code" && in_pre(*el));
        let pre = samples.iter().filter(|el| tag(el) == "pre");
        let code = samples.iter().filter(|el| tag(el) == "code" && !in_pre(*el));

        pre_code
            .chain(pre)
            .chain(code)
            .map(|el| raw_text(*el))
            .filter(|text| !text.is_empty())
            .collect()
    }

    fn field_table(&self) -> Option<Vec<FieldDef>> {
        self.descendants()
            .filter(|el| tag(el) == "table")
            .find_map(parse_table)
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
struct Columns {
    name: Option<usize>,
    field_type: Option<usize>,
    description: Option<usize>,
    required: Option<usize>,
    fallback: Option<usize>,
}

impl Columns {
    fn from_headers(headers: &[String]) -> Self {
        let mut columns = Columns::default();
        let mut taken = Vec::new();

        // Exact header matches claim their column before substring matches.
        for exact in [true, false] {
            for (slot, synonyms) in [
                (&mut columns.field_type, TYPE_HEADERS),
                (&mut columns.required, REQUIRED_HEADERS),
                (&mut columns.fallback, FALLBACK_HEADERS),
                (&mut columns.description, DESCRIPTION_HEADERS),
                (&mut columns.name, NAME_HEADERS),
            ] {
                if slot.is_some() {
                    continue;
                }
                let found = headers.iter().enumerate().position(|(index, header)| {
                    !taken.contains(&index)
                        && synonyms.iter().any(|synonym| {
                            if exact {
                                header == synonym
                            } else {
                                header.contains(synonym)
                            }
                        })
                });
                if let Some(index) = found {
                    *slot = Some(index);
                    taken.push(index);
                }
            }
        }
        columns
    }
}

fn row_cells(row: ElementRef) -> Vec<String> {
    row.children()
        .filter_map(ElementRef::wrap)
        .filter(|cell| matches!(tag(cell), "td" | "th"))
        .map(collapsed_text)
        .collect()
}

fn parse_table(table: ElementRef) -> Option<Vec<FieldDef>> {
    let rows: Vec<ElementRef> = table
        .descendants()
        .filter_map(ElementRef::wrap)
        .filter(|el| tag(el) == "tr")
        .collect();
    let (header, body) = rows.split_first()?;

    let headers: Vec<String> = row_cells(*header)
        .into_iter()
        .map(|cell| cell.to_lowercase())
        .collect();
    let columns = Columns::from_headers(&headers);
    let name_column = columns.name?;

    let cell = |cells: &[String], column: Option<usize>| {
        column
            .and_then(|index| cells.get(index))
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty())
    };

    let mut fields = Vec::new();
    for row in body {
        let cells = row_cells(*row);
        let Some(name) = cell(&cells, Some(name_column)) else {
            continue;
        };
        let mut field = FieldDef::new(name.trim_matches('"'));
        field.field_type = cell(&cells, columns.field_type);
        field.description = cell(&cells, columns.description);
        field.required = cell(&cells, columns.required).and_then(|text| parse_required(&text));
        field.fallback = cell(&cells, columns.fallback).filter(|text| !is_dash(text));
        fields.push(field);
    }
    Some(fields)
}

fn parse_required(text: &str) -> Option<bool> {
    match text.trim().to_lowercase().as_str() {
        "yes" | "true" | "required" | "✓" | "✔" => Some(true),
        "no" | "false" | "optional" => Some(false),
        _ => None,
    }
}

fn is_dash(text: &str) -> bool {
    matches!(text, "-" | "–" | "—")
}

fn synthesize_fields(example: &Value) -> Vec<FieldDef> {
    let object = match example {
        Value::Object(map) => Some(map),
        Value::Array(items) => items.first().and_then(Value::as_object),
        _ => None,
    };
    let Some(object) = object else {
        return Vec::new();
    };

    object
        .iter()
        .map(|(key, value)| {
            let mut field = FieldDef::new(key.clone());
            field.field_type = Some(value_type_name(value).to_string());
            field.required = Some(true);
            field
        })
        .collect()
}

fn value_type_name(value: &Value) -> &'static str {
    match value {
        Value::String(_) => "string",
        Value::Number(_) => "number",
        Value::Bool(_) => "boolean",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
        Value::Null => "null",
    }
}

pub fn resolve_source(
    kind: DocKind,
    settings: &Settings,
    workspace_roots: &[PathBuf],
) -> Option<PathBuf> {
    let docs_root = settings.resolved_docs_root(workspace_roots);

    if let Some(path) = settings.override_path(kind) {
        return Some(match &docs_root {
            Some(root) if path.is_relative() => root.join(path),
            _ => path.to_path_buf(),
        });
    }

    let docs_root = docs_root?;
    let names = kind.default_file_names();
    if let Some(found) = names
        .iter()
        .map(|name| docs_root.join(name))
        .find(|candidate| candidate.is_file())
    {
        return Some(found);
    }

    WalkDir::new(&docs_root)
        .max_depth(SEARCH_DEPTH)
        .follow_links(false)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .find(|entry| {
            entry
                .file_name()
                .to_str()
                .is_some_and(|name| names.contains(&name))
        })
        .map(|entry| entry.into_path())
}

pub fn try_resolve_source(
    kind: DocKind,
    settings: &Settings,
    workspace_roots: &[PathBuf],
) -> Result<PathBuf, SchemaError> {
    resolve_source(kind, settings, workspace_roots).ok_or(SchemaError::NotFound { kind })
}

pub fn watch_target(
    kind: DocKind,
    settings: &Settings,
    workspace_roots: &[PathBuf],
) -> Option<WatchTarget> {
    match resolve_source(kind, settings, workspace_roots) {
        Some(path) if path.is_file() => Some(WatchTarget::File(path)),
        Some(path) => path
            .parent()
            .filter(|parent| parent.is_dir())
            .map(|parent| WatchTarget::Folder(parent.to_path_buf())),
        None => settings
            .resolved_docs_root(workspace_roots)
            .filter(|root| root.is_dir())
            .map(WatchTarget::Folder),
    }
}
