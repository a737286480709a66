use tower_lsp::lsp_types::{
    CompletionItem, CompletionItemKind, CompletionTextEdit, Documentation, InsertTextFormat,
    MarkupContent, MarkupKind, TextEdit,
};

use crate::context::{
    entity_slot, field_completion_context, type_value_context, EntitySlot, FieldContext,
    SlotContext, TypeValueContext,
};
use crate::hover::{format_entity_hover, format_field_hover};
use crate::schema::SchemaView;
use crate::snippet::{field_insert_text, keyed_entry_snippet, reindent_for_array, reindent_for_map};
use crate::syntax::JsonTree;
use crate::text::Document;

pub fn completions(
    document: &Document,
    offset: usize,
    view: &SchemaView,
    energy_document: bool,
) -> Option<Vec<CompletionItem>> {
    let tree = document.tree()?;

    let items = if let Some(context) = type_value_context(tree, offset, energy_document) {
        type_items(document, view, &context)
    } else if let Some(context) = entity_slot(tree, offset, energy_document) {
        entry_items(document, tree, offset, view, context)
    } else if let Some(context) = field_completion_context(tree, offset, view, energy_document) {
        field_items(document, &context)
    } else {
        return None;
    };

    if items.is_empty() {
        None
    } else {
        Some(items)
    }
}

fn markdown(value: String) -> Documentation {
    Documentation::MarkupContent(MarkupContent {
        kind: MarkupKind::Markdown,
        value,
    })
}

fn type_items(
    document: &Document,
    view: &SchemaView,
    context: &TypeValueContext,
) -> Vec<CompletionItem> {
    let range = document.span_range(context.replace.start, context.replace.end);
    view.get(context.kind)
        .entries()
        .iter()
        .map(|record| CompletionItem {
            label: record.id.clone(),
            kind: Some(CompletionItemKind::CONSTANT),
            detail: Some(format!("{}: {}", context.kind.title(), record.name)),
            documentation: Some(markdown(format_entity_hover(
                context.kind,
                &record.id,
                Some(record),
            ))),
            filter_text: Some(format!("\"{}\"", record.id)),
            text_edit: Some(CompletionTextEdit::Edit(TextEdit {
                range,
                new_text: serde_json::Value::String(record.id.clone()).to_string(),
            })),
            ..Default::default()
        })
        .collect()
}

fn entry_items(
    document: &Document,
    tree: &JsonTree,
    offset: usize,
    view: &SchemaView,
    context: SlotContext,
) -> Vec<CompletionItem> {
    let text = document.text();
    let range = document.span_range(offset, offset);
    let kind = context.kind;

    view.get(kind)
        .entries()
        .iter()
        .map(|record| {
            let new_text = match context.slot {
                EntitySlot::MapKey => {
                    reindent_for_map(text, offset, &keyed_entry_snippet(kind, record))
                }
                EntitySlot::MapValue => reindent_for_map(text, offset, &record.snippet),
                EntitySlot::ArrayElement { array } => {
                    let node = tree.node(array);
                    let close = node.closed.then(|| node.end - 1);
                    reindent_for_array(text, offset, node.start, close, &record.snippet)
                }
            };
            CompletionItem {
                label: record.id.clone(),
                kind: Some(CompletionItemKind::SNIPPET),
                detail: Some(format!("{}: {}", kind.title(), record.name)),
                documentation: Some(markdown(format_entity_hover(kind, &record.id, Some(record)))),
                insert_text_format: Some(InsertTextFormat::SNIPPET),
                text_edit: Some(CompletionTextEdit::Edit(TextEdit { range, new_text })),
                ..Default::default()
            }
        })
        .collect()
}

fn field_items(document: &Document, context: &FieldContext) -> Vec<CompletionItem> {
    let range = document.span_range(context.replace.start, context.replace.end);
    context
        .record
        .fields()
        .iter()
        .enumerate()
        .filter(|(_, field)| !context.existing.contains(&field.name))
        .map(|(index, field)| {
            // Required fields sort ahead of the rest, schema order otherwise.
            let rank = if field.required == Some(true) { 0 } else { 1 };
            CompletionItem {
                label: field.name.clone(),
                kind: Some(CompletionItemKind::FIELD),
                detail: field.field_type.clone(),
                documentation: Some(markdown(format_field_hover(context.record, field))),
                sort_text: Some(format!("{rank}{index:04}")),
                filter_text: Some(format!("\"{}\"", field.name)),
                insert_text_format: Some(InsertTextFormat::SNIPPET),
                text_edit: Some(CompletionTextEdit::Edit(TextEdit {
                    range,
                    new_text: field_insert_text(field),
                })),
                ..Default::default()
            }
        })
        .collect()
}
