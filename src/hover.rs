use tower_lsp::lsp_types::{Hover, HoverContents, MarkupContent, MarkupKind};

use crate::context::{hover_context, HoverContext, BODY_PART_SLOTS};
use crate::schema::{DocKind, EntityRecord, FieldDef, SchemaView};
use crate::text::Document;

pub fn hover(
    document: &Document,
    offset: usize,
    view: &SchemaView,
    energy_document: bool,
) -> Option<Hover> {
    let tree = document.tree()?;
    let context = hover_context(tree, offset, energy_document)?;

    let (value, range) = match context {
        HoverContext::Entity { kind, id, range } => {
            (format_entity_hover(kind, &id, view.record(kind, &id)), range)
        }
        HoverContext::Field {
            kind,
            type_id,
            field,
            range,
        } => {
            let record = view.record(kind, &type_id)?;
            (format_field_hover(record, record.field(&field)?), range)
        }
        HoverContext::BodyPart { range } => (format_body_part_hover(), range),
    };

    Some(Hover {
        contents: HoverContents::Markup(MarkupContent {
            kind: MarkupKind::Markdown,
            value,
        }),
        range: Some(document.span_range(range.start, range.end)),
    })
}

pub(crate) fn sanitize_markdown(value: &str) -> String {
    value.trim().replace('|', "\\|").replace('\n', "<br>")
}

fn code(value: &str) -> String {
    format!("`{}`", value.trim().replace('`', "'"))
}

pub(crate) fn format_entity_hover(
    kind: DocKind,
    id: &str,
    record: Option<&EntityRecord>,
) -> String {
    let mut lines = vec![format!("**{}:** {}", kind.title(), code(id))];
    let Some(record) = record else {
        lines.push(format!("- Not documented in the loaded {} schema", kind.label()));
        return lines.join("\n");
    };

    lines.push(format!("- Name: {}", sanitize_markdown(&record.name)));
    lines.push(format!(
        "- Description: {}",
        record
            .description
            .as_deref()
            .map(sanitize_markdown)
            .unwrap_or_else(|| "(missing)".to_string())
    ));
    lines.push(format!(
        "- Fields: {}",
        if record.fields().is_empty() {
            "(none)".to_string()
        } else {
            record
                .fields()
                .iter()
                .map(|field| code(&field.name))
                .collect::<Vec<_>>()
                .join(", ")
        }
    ));
    lines.push(format!("- Source: {}", sanitize_markdown(&record.source)));
    if !record.example.is_empty() {
        lines.push(String::new());
        lines.push(format!("```json\n{}\n```", record.example));
    }
    lines.join("\n")
}

pub(crate) fn format_field_hover(record: &EntityRecord, field: &FieldDef) -> String {
    let mut lines = vec![format!(
        "**Field:** {} of {}",
        code(&field.name),
        sanitize_markdown(&record.name)
    )];
    lines.push(format!(
        "- Type: {}",
        field
            .field_type
            .as_deref()
            .map(sanitize_markdown)
            .unwrap_or_else(|| "(unspecified)".to_string())
    ));
    lines.push(format!(
        "- Required: {}",
        match field.required {
            Some(true) => "yes",
            Some(false) => "no",
            None => "(unknown)",
        }
    ));
    if let Some(fallback) = field.fallback.as_deref() {
        lines.push(format!("- Default: {}", code(fallback)));
    }
    if let Some(description) = field.description.as_deref() {
        lines.push(format!("- Description: {}", sanitize_markdown(description)));
    }
    lines.join("\n")
}

fn format_body_part_hover() -> String {
    let mut lines = vec!["**Body part:** where the energy renderer attaches".to_string()];
    lines.extend(BODY_PART_SLOTS.iter().map(|slot| format!("- {}", code(slot))));
    lines.join("\n")
}
