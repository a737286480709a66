use tower_lsp::lsp_types::{Diagnostic, DiagnosticSeverity, Range};

use crate::context::{entries, CONDITIONS, TYPE};
use crate::schema::{DocKind, SchemaSnapshot, SchemaView};
use crate::syntax::{JsonTree, NodeId};
use crate::text::Document;

pub const SOURCE: &str = "ability-lsp";

pub fn diagnostics(
    document: &Document,
    view: &SchemaView,
    energy_document: bool,
) -> Vec<Diagnostic> {
    let Some(tree) = document.tree() else {
        return Vec::new();
    };

    let mut diagnostics = Vec::new();
    for (kind, object) in entries(tree, energy_document) {
        match kind {
            DocKind::Ability => {
                check_ability(document, tree, object, &view.abilities, &mut diagnostics)
            }
            DocKind::Condition | DocKind::EnergyRenderer => {}
        }
    }
    diagnostics
}

fn check_ability(
    document: &Document,
    tree: &JsonTree,
    object: NodeId,
    abilities: &SchemaSnapshot,
    out: &mut Vec<Diagnostic>,
) {
    let Some(type_value) = tree
        .find_property(object, TYPE)
        .and_then(|property| tree.property_value(property))
    else {
        return;
    };
    let Some(type_id) = tree.string_value(type_value) else {
        return;
    };

    let Some(record) = abilities.get(type_id) else {
        if !abilities.is_fallback() {
            out.push(error(
                node_range(document, tree, type_value),
                format!("Unknown ability type '{type_id}'"),
            ));
        }
        return;
    };
    if !record.has_fields() {
        return;
    }

    for property in tree.properties(object) {
        // Keys still being typed have no colon yet.
        if tree.node(property).colon.is_none() {
            continue;
        }
        let (Some(key), Some(name)) = (tree.property_key(property), tree.property_name(property))
        else {
            continue;
        };
        if name == TYPE || name == CONDITIONS || record.field(name).is_some() {
            continue;
        }
        out.push(error(
            node_range(document, tree, key),
            format!("Field '{name}' is not defined for ability type '{type_id}'"),
        ));
    }
}

fn node_range(document: &Document, tree: &JsonTree, node: NodeId) -> Range {
    let (start, end) = tree.span(node);
    document.span_range(start, end)
}

fn error(range: Range, message: String) -> Diagnostic {
    Diagnostic {
        range,
        severity: Some(DiagnosticSeverity::ERROR),
        code: None,
        code_description: None,
        source: Some(SOURCE.to_string()),
        message,
        related_information: None,
        tags: None,
        data: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{EntityRecord, FieldDef, SchemaRegistry};
    use tower_lsp::lsp_types::Position;

    fn registry() -> SchemaRegistry {
        let registry = SchemaRegistry::new();
        let known = EntityRecord::new("known_id", "Known", "{}", "{}", "abilities.html")
            .with_fields(vec![FieldDef::new("distance")]);
        let bare = EntityRecord::new("mod:bare", "Bare", "{}", "{}", "abilities.html");
        registry.replace(DocKind::Ability, vec![known, bare]);
        registry
    }

    fn check(text: &str, registry: &SchemaRegistry) -> Vec<Diagnostic> {
        diagnostics(&Document::new(text.to_string()), &registry.view(), false)
    }

    fn range_of(text: &str, needle: &str) -> Range {
        let start = text.find(needle).unwrap();
        let document = Document::new(text.to_string());
        document.span_range(start, start + needle.len())
    }

    #[test]
    fn reports_undefined_field_once() {
        let text = r#"{"abilities": {"a": {"type": "known_id", "bogus_field": 1, "distance": 2, "conditions": {}}}}"#;
        let diagnostics = check(text, &registry());
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].range, range_of(text, "\"bogus_field\""));
        assert_eq!(diagnostics[0].severity, Some(DiagnosticSeverity::ERROR));
        assert_eq!(diagnostics[0].source.as_deref(), Some("ability-lsp"));
        assert!(diagnostics[0].message.contains("bogus_field"));
    }

    #[test]
    fn reports_unknown_type_without_field_errors() {
        let text = r#"{"abilities": {"a": {"type": "unknown:id", "bogus": 1}}}"#;
        let diagnostics = check(text, &registry());
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].message.starts_with("Unknown ability type"));
        assert_eq!(diagnostics[0].range, range_of(text, "\"unknown:id\""));
    }

    #[test]
    fn entities_without_fields_are_not_field_checked() {
        let text = r#"{"abilities": {"a": {"type": "mod:bare", "anything": 1}}}"#;
        assert!(check(text, &registry()).is_empty());
    }

    #[test]
    fn fallback_schema_suppresses_unknown_types() {
        let text = r#"{"abilities": {"a": {"type": "unknown:id"}}}"#;
        assert!(check(text, &SchemaRegistry::new()).is_empty());
    }

    #[test]
    fn multiline_ranges_use_positions() {
        let text = "{\n  \"abilities\": {\n    \"a\": {\n      \"type\": \"nope:x\"\n    }\n  }\n}";
        let diagnostics = check(text, &registry());
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(
            diagnostics[0].range.start,
            Position {
                line: 3,
                character: 14
            }
        );
    }

    #[test]
    fn unparseable_documents_produce_nothing() {
        assert!(check("   ", &registry()).is_empty());
    }
}
