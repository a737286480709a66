use std::collections::HashSet;
use std::ops::Range;

use crate::schema::{DocKind, EntityRecord, SchemaView};
use crate::syntax::{JsonTree, NodeId, NodeKind, PathSegment};

pub const ABILITIES: &str = "abilities";
pub const TYPE: &str = "type";
pub const CONDITIONS: &str = "conditions";
pub const BODY_PART: &str = "body_part";

pub const BODY_PART_SLOTS: [&str; 6] = [
    "head",
    "body",
    "right_arm",
    "left_arm",
    "right_leg",
    "left_leg",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HoverContext {
    Entity {
        kind: DocKind,
        id: String,
        range: Range<usize>,
    },
    Field {
        kind: DocKind,
        type_id: String,
        field: String,
        range: Range<usize>,
    },
    BodyPart {
        range: Range<usize>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntitySlot {
    MapKey,
    MapValue,
    ArrayElement { array: NodeId },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotContext {
    pub kind: DocKind,
    pub slot: EntitySlot,
}

#[derive(Debug, Clone)]
pub struct FieldContext<'v> {
    pub kind: DocKind,
    pub record: &'v EntityRecord,
    pub replace: Range<usize>,
    /// Keys already present in the entry, minus the one being edited.
    pub existing: HashSet<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeValueContext {
    pub kind: DocKind,
    pub replace: Range<usize>,
}

fn key_is(segment: &PathSegment, name: &str) -> bool {
    segment.key() == Some(name)
}

pub fn entry_kind(tree: &JsonTree, object: NodeId, energy_document: bool) -> Option<DocKind> {
    if tree.kind(object) != NodeKind::Object {
        return None;
    }
    let root_is_array = tree.kind(tree.root()) == NodeKind::Array;
    let path = tree.segments_to(object);
    match path.as_slice() {
        [abilities, PathSegment::Key(_)] if !root_is_array && key_is(abilities, ABILITIES) => {
            Some(DocKind::Ability)
        }
        [abilities, PathSegment::Key(_), conditions, list, PathSegment::Index(_)]
            if !root_is_array
                && key_is(abilities, ABILITIES)
                && key_is(conditions, CONDITIONS)
                && (key_is(list, "enabling") || key_is(list, "unlocking")) =>
        {
            Some(DocKind::Condition)
        }
        [PathSegment::Index(_)] if root_is_array && energy_document => {
            Some(DocKind::EnergyRenderer)
        }
        _ => None,
    }
}

pub fn entries(tree: &JsonTree, energy_document: bool) -> Vec<(DocKind, NodeId)> {
    tree.objects()
        .filter_map(|object| Some((entry_kind(tree, object, energy_document)?, object)))
        .collect()
}

fn is_abilities_map(tree: &JsonTree, object: NodeId) -> bool {
    tree.kind(object) == NodeKind::Object
        && tree.kind(tree.root()) == NodeKind::Object
        && matches!(
            tree.segments_to(object).as_slice(),
            [abilities] if key_is(abilities, ABILITIES)
        )
}

fn span(tree: &JsonTree, id: NodeId) -> Range<usize> {
    let (start, end) = tree.span(id);
    start..end
}

fn within(range: &Range<usize>, offset: usize) -> bool {
    range.start <= offset && offset <= range.end
}

pub fn hover_context(
    tree: &JsonTree,
    offset: usize,
    energy_document: bool,
) -> Option<HoverContext> {
    let node = tree.node_at_offset(offset)?;
    let mut current = tree.enclosing_property(node);

    while let Some(property) = current {
        let object = tree.parent(property)?;
        if let Some(kind) = entry_kind(tree, object, energy_document) {
            return member_hover(tree, kind, object, property, offset);
        }
        current = tree
            .parent(object)
            .and_then(|parent| tree.enclosing_property(parent));
    }
    None
}

fn member_hover(
    tree: &JsonTree,
    kind: DocKind,
    object: NodeId,
    property: NodeId,
    offset: usize,
) -> Option<HoverContext> {
    let name = tree.property_name(property)?;
    let key = span(tree, tree.property_key(property)?);
    let value = tree.property_value(property);

    if name == TYPE {
        let value = value?;
        let id = tree.string_value(value)?;
        let range = span(tree, value);
        return within(&range, offset).then(|| HoverContext::Entity {
            kind,
            id: id.to_string(),
            range,
        });
    }

    let type_id = tree.property_string(object, TYPE)?;
    let range = match value.map(|value| span(tree, value)) {
        Some(value) if !within(&key, offset) => value,
        _ => key,
    };

    if kind == DocKind::EnergyRenderer && name == BODY_PART {
        return Some(HoverContext::BodyPart { range });
    }
    Some(HoverContext::Field {
        kind,
        type_id: type_id.to_string(),
        field: name.to_string(),
        range,
    })
}

pub fn entity_slot(tree: &JsonTree, offset: usize, energy_document: bool) -> Option<SlotContext> {
    let node = tree.node_at_offset(offset)?;
    let ability = |slot| {
        Some(SlotContext {
            kind: DocKind::Ability,
            slot,
        })
    };

    match tree.kind(node) {
        NodeKind::Object if is_abilities_map(tree, node) => {
            let location = tree.location(offset);
            if location.at_property_key {
                let typing_key = location.path.last().and_then(PathSegment::key) != Some("");
                return if typing_key {
                    None
                } else {
                    ability(EntitySlot::MapKey)
                };
            }
            let previous = location.previous?;
            let awaiting_value = tree.kind(previous) == NodeKind::Property
                && tree.node(previous).colon.is_some()
                && tree.property_value(previous).is_none();
            if awaiting_value {
                ability(EntitySlot::MapValue)
            } else if is_complete_property(tree, previous) {
                ability(EntitySlot::MapKey)
            } else {
                None
            }
        }
        NodeKind::Property => {
            let object = tree.parent(node)?;
            let colon = tree.node(node).colon?;
            if offset > colon
                && tree.property_value(node).is_none()
                && is_abilities_map(tree, object)
            {
                ability(EntitySlot::MapValue)
            } else {
                None
            }
        }
        NodeKind::Array => {
            let root_is_array = tree.kind(tree.root()) == NodeKind::Array;
            if node == tree.root() {
                return (root_is_array && energy_document).then_some(SlotContext {
                    kind: DocKind::EnergyRenderer,
                    slot: EntitySlot::ArrayElement { array: node },
                });
            }
            let path = tree.segments_to(node);
            let condition_list = !root_is_array
                && matches!(
                    path.as_slice(),
                    [abilities, PathSegment::Key(_), conditions, list]
                        if key_is(abilities, ABILITIES)
                            && key_is(conditions, CONDITIONS)
                            && (key_is(list, "enabling") || key_is(list, "unlocking"))
                );
            condition_list.then_some(SlotContext {
                kind: DocKind::Condition,
                slot: EntitySlot::ArrayElement { array: node },
            })
        }
        _ => None,
    }
}

pub fn field_completion_context<'v>(
    tree: &JsonTree,
    offset: usize,
    view: &'v SchemaView,
    energy_document: bool,
) -> Option<FieldContext<'v>> {
    let node = tree.node_at_offset(offset)?;

    // The entry object and the property whose key is being edited.
    let (object, editing) = match tree.kind(node) {
        NodeKind::String if tree.is_property_key(node) => {
            let property = tree.parent(node)?;
            (tree.parent(property)?, Some(property))
        }
        NodeKind::Property => match tree.node(node).colon {
            Some(colon) if offset > colon => return None,
            _ => (tree.parent(node)?, Some(node)),
        },
        NodeKind::Object => {
            let location = tree.location(offset);
            if !location.at_property_key {
                // Next key on a new line after a member with no comma yet.
                let after_member = location
                    .previous
                    .is_some_and(|previous| is_complete_property(tree, previous));
                return if after_member {
                    field_context(tree, node, None, offset, view, energy_document)
                } else {
                    None
                };
            }
            let editing = match location.path.last().and_then(PathSegment::key) {
                Some(name) if !name.is_empty() => location.previous,
                _ => None,
            };
            (node, editing)
        }
        _ => return None,
    };
    field_context(tree, object, editing, offset, view, energy_document)
}

fn field_context<'v>(
    tree: &JsonTree,
    object: NodeId,
    editing: Option<NodeId>,
    offset: usize,
    view: &'v SchemaView,
    energy_document: bool,
) -> Option<FieldContext<'v>> {
    let kind = entry_kind(tree, object, energy_document)?;
    let type_id = tree.property_string(object, TYPE)?;
    let record = view.record(kind, type_id)?;
    if !record.has_fields() {
        return None;
    }

    let replace = match editing.and_then(|property| tree.property_key(property)) {
        Some(key) => span(tree, key),
        None => widen_over_quotes(tree.text(), offset),
    };

    let existing = tree
        .properties(object)
        .filter(|&property| Some(property) != editing)
        .filter_map(|property| tree.property_name(property))
        .map(str::to_string)
        .collect();

    Some(FieldContext {
        kind,
        record,
        replace,
        existing,
    })
}

fn is_complete_property(tree: &JsonTree, node: NodeId) -> bool {
    tree.kind(node) == NodeKind::Property
        && tree.node(node).colon.is_some()
        && tree.property_value(node).is_some()
}

fn widen_over_quotes(text: &str, offset: usize) -> Range<usize> {
    let bytes = text.as_bytes();
    let start = if offset > 0 && bytes.get(offset - 1) == Some(&b'"') {
        offset - 1
    } else {
        offset
    };
    let end = if bytes.get(offset) == Some(&b'"') {
        offset + 1
    } else {
        offset
    };
    start..end
}

pub fn type_value_context(
    tree: &JsonTree,
    offset: usize,
    energy_document: bool,
) -> Option<TypeValueContext> {
    let node = tree.node_at_offset(offset)?;
    let (property, replace) = match tree.kind(node) {
        NodeKind::String if !tree.is_property_key(node) => {
            let property = tree.parent(node)?;
            (property, span(tree, node))
        }
        NodeKind::Property => {
            let colon = tree.node(node).colon?;
            if offset <= colon || tree.property_value(node).is_some() {
                return None;
            }
            (node, offset..offset)
        }
        NodeKind::Object => {
            let location = tree.location(offset);
            let previous = location.previous?;
            if location.at_property_key
                || tree.node(previous).colon.is_none()
                || tree.property_value(previous).is_some()
            {
                return None;
            }
            (previous, offset..offset)
        }
        _ => return None,
    };

    if tree.kind(property) != NodeKind::Property || tree.property_name(property) != Some(TYPE) {
        return None;
    }
    let kind = entry_kind(tree, tree.parent(property)?, energy_document)?;
    Some(TypeValueContext { kind, replace })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldDef, SchemaRegistry};

    fn cursor(source: &str) -> (JsonTree, usize) {
        let offset = source.find('|').expect("cursor marker");
        let mut text = source.to_string();
        text.remove(offset);
        (JsonTree::parse(&text).expect("parse"), offset)
    }

    fn registry() -> SchemaRegistry {
        let registry = SchemaRegistry::new();
        let dash = EntityRecord::new("mod:dash", "Dash", "{}", "{}", "abilities.html").with_fields(
            vec![FieldDef::new("distance"), FieldDef::new("cooldown"), FieldDef::new("sound")],
        );
        let plain = EntityRecord::new("mod:plain", "Plain", "{}", "{}", "abilities.html");
        registry.replace(DocKind::Ability, vec![dash, plain]);
        registry
    }

    #[test]
    fn hover_on_ability_type_value() {
        let (tree, offset) = cursor(r#"{"abilities": {"dash": {"type": "mod:d|ash"}}}"#);
        match hover_context(&tree, offset, false) {
            Some(HoverContext::Entity { kind, id, range }) => {
                assert_eq!(kind, DocKind::Ability);
                assert_eq!(id, "mod:dash");
                assert_eq!(&tree.text()[range], "\"mod:dash\"");
            }
            other => panic!("unexpected context: {other:?}"),
        }
    }

    #[test]
    fn hover_on_field_key_and_condition_type() {
        let (tree, offset) = cursor(
            r#"{"abilities": {"dash": {"type": "mod:dash", "dist|ance": 4,
                "conditions": {"enabling": [{"type": "mod:sneaking"}]}}}}"#,
        );
        assert_eq!(
            hover_context(&tree, offset, false),
            Some(HoverContext::Field {
                kind: DocKind::Ability,
                type_id: "mod:dash".to_string(),
                field: "distance".to_string(),
                range: {
                    let start = tree.text().find("\"distance\"").unwrap();
                    start..start + "\"distance\"".len()
                },
            })
        );

        let (tree, offset) = cursor(
            r#"{"abilities": {"dash": {"type": "mod:dash",
                "conditions": {"enabling": [{"type": "mod:sne|aking"}]}}}}"#,
        );
        assert!(matches!(
            hover_context(&tree, offset, false),
            Some(HoverContext::Entity { kind: DocKind::Condition, ref id, .. }) if id == "mod:sneaking"
        ));
    }

    #[test]
    fn energy_renderers_only_in_energy_documents() {
        let source = r#"[{"type": "mod:be|am", "body_part": "head"}]"#;
        let (tree, offset) = cursor(source);
        assert!(matches!(
            hover_context(&tree, offset, true),
            Some(HoverContext::Entity { kind: DocKind::EnergyRenderer, .. })
        ));
        assert_eq!(hover_context(&tree, offset, false), None);

        let (tree, offset) = cursor(r#"[{"type": "mod:beam", "body_p|art": "head"}]"#);
        assert!(matches!(
            hover_context(&tree, offset, true),
            Some(HoverContext::BodyPart { .. })
        ));
    }

    #[test]
    fn slots_in_abilities_map() {
        let (tree, offset) = cursor("{\"abilities\": {\n  |\n}}");
        assert_eq!(
            entity_slot(&tree, offset, false).map(|ctx| ctx.slot),
            Some(EntitySlot::MapKey)
        );

        let (tree, offset) = cursor("{\"abilities\": {\n  \"dash\": |\n}}");
        assert_eq!(
            entity_slot(&tree, offset, false).map(|ctx| ctx.slot),
            Some(EntitySlot::MapValue)
        );

        let (tree, offset) =
            cursor("{\"abilities\": {\n  \"dash\": {\"type\": \"mod:dash\"}\n  |\n}}");
        assert_eq!(
            entity_slot(&tree, offset, false).map(|ctx| ctx.slot),
            Some(EntitySlot::MapKey)
        );

        let (tree, offset) = cursor("{\"abilities\": {\n  \"da|sh\": {}\n}}");
        assert_eq!(entity_slot(&tree, offset, false), None);
    }

    #[test]
    fn slots_in_condition_lists_and_energy_arrays() {
        let (tree, offset) =
            cursor(r#"{"abilities": {"dash": {"type": "mod:dash", "conditions": {"unlocking": [|]}}}}"#);
        let slot = entity_slot(&tree, offset, false).unwrap();
        assert_eq!(slot.kind, DocKind::Condition);
        assert!(matches!(slot.slot, EntitySlot::ArrayElement { .. }));

        let (tree, offset) = cursor("[\n  {\"type\": \"mod:beam\"},\n  |\n]");
        let slot = entity_slot(&tree, offset, true).unwrap();
        assert_eq!(slot.kind, DocKind::EnergyRenderer);
        assert_eq!(entity_slot(&tree, offset, false), None);

        // Inside an existing entry is not an element slot.
        let (tree, offset) = cursor("[\n  {\"type\": \"mod:beam\", |}\n]");
        assert_eq!(entity_slot(&tree, offset, true), None);
    }

    #[test]
    fn field_completion_skips_present_keys() {
        let registry = registry();
        let view = registry.view();
        let (tree, offset) = cursor(
            "{\"abilities\": {\"dash\": {\n  \"type\": \"mod:dash\",\n  \"cooldown\": 3,\n  |\n}}}",
        );
        let context = field_completion_context(&tree, offset, &view, false).unwrap();
        assert_eq!(context.kind, DocKind::Ability);
        assert_eq!(context.record.id, "mod:dash");
        assert_eq!(context.replace, offset..offset);
        assert!(context.existing.contains("cooldown"));
        assert!(context.existing.contains("type"));
        assert!(!context.existing.contains("distance"));
    }

    #[test]
    fn field_completion_after_member_without_comma() {
        let registry = registry();
        let view = registry.view();
        let (tree, offset) =
            cursor("{\"abilities\": {\"dash\": {\n  \"type\": \"mod:dash\"\n  |\n}}}");
        let context = field_completion_context(&tree, offset, &view, false).unwrap();
        assert_eq!(context.replace, offset..offset);
        assert!(context.existing.contains("type"));

        let (tree, offset) = cursor(
            "{\"abilities\": {\"dash\": {\n  \"type\": \"mod:dash\",\n  \"cooldown\": 3\n  |\n}}}",
        );
        let context = field_completion_context(&tree, offset, &view, false).unwrap();
        assert!(context.existing.contains("cooldown"));
        assert_eq!(type_value_context(&tree, offset, false), None);
    }

    #[test]
    fn field_completion_replaces_edited_key() {
        let registry = registry();
        let view = registry.view();
        let (tree, offset) =
            cursor(r#"{"abilities": {"dash": {"type": "mod:dash", "cool|down": 3}}}"#);
        let context = field_completion_context(&tree, offset, &view, false).unwrap();
        assert_eq!(&tree.text()[context.replace.clone()], "\"cooldown\"");
        assert!(!context.existing.contains("cooldown"));
    }

    #[test]
    fn field_completion_needs_documented_fields() {
        let registry = registry();
        let view = registry.view();
        let (tree, offset) = cursor(r#"{"abilities": {"p": {"type": "mod:plain", |}}}"#);
        assert!(field_completion_context(&tree, offset, &view, false).is_none());

        let (tree, offset) = cursor(r#"{"abilities": {"dash": {"type": "mod:dash", "cooldown": |}}}"#);
        assert!(field_completion_context(&tree, offset, &view, false).is_none());
    }

    #[test]
    fn type_value_positions() {
        let (tree, offset) = cursor(r#"{"abilities": {"dash": {"type": "mo|d"}}}"#);
        let context = type_value_context(&tree, offset, false).unwrap();
        assert_eq!(context.kind, DocKind::Ability);
        assert_eq!(&tree.text()[context.replace], "\"mod\"");

        let (tree, offset) = cursor(r#"{"abilities": {"dash": {"cooldown": "fa|st"}}}"#);
        assert_eq!(type_value_context(&tree, offset, false), None);
    }
}
