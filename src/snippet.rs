use serde_json::{Map, Value};

use crate::schema::{DocKind, EntityRecord, FieldDef};

const CONDITIONS: &str = "conditions";
const CONDITION_LISTS: [&str; 2] = ["enabling", "unlocking"];
const BODY_PART: &str = "body_part";
const DEFAULT_BODY_PART: &str = "head";

pub fn ensure_ability_conditions(example: &Map<String, Value>) -> Map<String, Value> {
    let mut out = example.clone();
    match out.get_mut(CONDITIONS) {
        Some(Value::Object(conditions)) => {
            for list in CONDITION_LISTS {
                if !conditions.contains_key(list) {
                    conditions.insert(list.to_string(), Value::Array(Vec::new()));
                }
            }
        }
        Some(_) => {}
        None => {
            let conditions = CONDITION_LISTS
                .iter()
                .map(|list| (list.to_string(), Value::Array(Vec::new())))
                .collect();
            out.insert(CONDITIONS.to_string(), Value::Object(conditions));
        }
    }
    out
}

pub fn ensure_energy_renderer_body_part(example: &Map<String, Value>) -> Map<String, Value> {
    if example.contains_key(BODY_PART) {
        return example.clone();
    }

    let body_part = Value::String(DEFAULT_BODY_PART.to_string());
    if !example.contains_key("type") {
        let mut out = example.clone();
        out.insert(BODY_PART.to_string(), body_part);
        return out;
    }

    let mut out = Map::with_capacity(example.len() + 1);
    for (key, value) in example {
        out.insert(key.clone(), value.clone());
        if key == "type" {
            out.insert(BODY_PART.to_string(), body_part.clone());
        }
    }
    out
}

pub fn augment_example(kind: DocKind, example: &Value) -> Value {
    match example {
        Value::Object(map) => Value::Object(match kind {
            DocKind::Ability => ensure_ability_conditions(map),
            DocKind::EnergyRenderer => ensure_energy_renderer_body_part(map),
            DocKind::Condition => map.clone(),
        }),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| match item {
                    Value::Object(_) => augment_example(kind, item),
                    other => other.clone(),
                })
                .collect(),
        ),
        other => other.clone(),
    }
}

pub fn build_snippet_from_example(kind: DocKind, example: &Value) -> String {
    let mut renderer = Renderer::starting_at(1);
    renderer.value(&augment_example(kind, example), 0);
    renderer.out
}

pub fn keyed_entry_snippet(kind: DocKind, record: &EntityRecord) -> String {
    let key = record
        .id
        .split_once(':')
        .map(|(_, path)| path)
        .unwrap_or(record.id.as_str());
    let key = json_string_body(key);

    let body = match serde_json::from_str::<Value>(&record.example) {
        Ok(example) => {
            let mut renderer = Renderer::starting_at(2);
            renderer.value(&augment_example(kind, &example), 0);
            renderer.out
        }
        Err(_) => escape_snippet_text(&record.example),
    };
    format!("\"${{1:{}}}\": {body}", escape_snippet_text(&key))
}

pub fn escape_snippet_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        if matches!(ch, '\\' | '$' | '{' | '}') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

struct Renderer {
    out: String,
    next: usize,
}

impl Renderer {
    fn starting_at(next: usize) -> Self {
        Self {
            out: String::new(),
            next,
        }
    }

    fn placeholder(&mut self, default: &str) {
        self.out.push_str(&format!("${{{}:{}}}", self.next, escape_snippet_text(default)));
        self.next += 1;
    }

    fn indent(&mut self, depth: usize) {
        for _ in 0..depth {
            self.out.push_str("  ");
        }
    }

    fn value(&mut self, value: &Value, depth: usize) {
        match value {
            Value::Object(map) if map.is_empty() => self.out.push_str("{}"),
            Value::Object(map) => {
                self.out.push_str("{\n");
                let last = map.len() - 1;
                for (index, (key, item)) in map.iter().enumerate() {
                    self.indent(depth + 1);
                    self.out.push('"');
                    self.out.push_str(&escape_snippet_text(&json_string_body(key)));
                    self.out.push_str("\": ");
                    self.value(item, depth + 1);
                    if index != last {
                        self.out.push(',');
                    }
                    self.out.push('\n');
                }
                self.indent(depth);
                self.out.push('}');
            }
            Value::Array(items) if items.is_empty() => self.out.push_str("[]"),
            Value::Array(items) => {
                self.out.push_str("[\n");
                let last = items.len() - 1;
                for (index, item) in items.iter().enumerate() {
                    self.indent(depth + 1);
                    self.value(item, depth + 1);
                    if index != last {
                        self.out.push(',');
                    }
                    self.out.push('\n');
                }
                self.indent(depth);
                self.out.push(']');
            }
            Value::String(text) => {
                self.out.push('"');
                self.placeholder(&json_string_body(text));
                self.out.push('"');
            }
            other => self.placeholder(&other.to_string()),
        }
    }
}

fn json_string_body(text: &str) -> String {
    let quoted = Value::String(text.to_string()).to_string();
    quoted[1..quoted.len() - 1].to_string()
}

pub fn field_insert_text(field: &FieldDef) -> String {
    let name = escape_snippet_text(&json_string_body(&field.name));
    format!("\"{name}\": {}", field_default(field))
}

fn field_default(field: &FieldDef) -> String {
    if let Some(fallback) = field.fallback.as_deref() {
        return match serde_json::from_str::<Value>(fallback) {
            Ok(Value::String(text)) => {
                format!("\"${{1:{}}}\"", escape_snippet_text(&json_string_body(&text)))
            }
            Ok(value) => format!("${{1:{}}}", escape_snippet_text(&value.to_string())),
            Err(_) => format!("\"${{1:{}}}\"", escape_snippet_text(&json_string_body(fallback))),
        };
    }

    let hint = field
        .field_type
        .as_deref()
        .unwrap_or_default()
        .to_ascii_lowercase();
    default_for_type_hint(&hint).to_string()
}

fn default_for_type_hint(hint: &str) -> &'static str {
    const NUMERIC: [&str; 8] = [
        "int", "float", "number", "amount", "cost", "range", "cooldown", "duration",
    ];
    const LIST: [&str; 5] = ["list", "array", "vec", "command", "conditions"];
    const OBJECT: [&str; 4] = ["object", "component", "description", "compound"];

    let has = |needles: &[&str]| needles.iter().any(|needle| hint.contains(needle));
    if hint.contains("bool") {
        "${1:false}"
    } else if has(&NUMERIC) {
        "${1:0}"
    } else if has(&LIST) {
        "[$1]"
    } else if has(&OBJECT) {
        "{$1}"
    } else {
        "\"$1\""
    }
}

/// Indent unit used by `text`: a tab when tab-indented lines dominate,
/// otherwise the narrowest positive space indentation, two spaces by default.
pub fn detect_indent_unit(text: &str) -> String {
    let mut tab_lines = 0usize;
    let mut space_lines = 0usize;
    let mut narrowest: Option<usize> = None;

    for line in text.lines() {
        if line.trim().is_empty() {
            continue;
        }
        if line.starts_with('\t') {
            tab_lines += 1;
            continue;
        }
        let width = line.len() - line.trim_start_matches(' ').len();
        if width > 0 {
            space_lines += 1;
            narrowest = Some(narrowest.map_or(width, |current| current.min(width)));
        }
    }

    if tab_lines > space_lines {
        "\t".to_string()
    } else {
        " ".repeat(narrowest.unwrap_or(2))
    }
}

fn line_start(text: &str, offset: usize) -> usize {
    text[..offset].rfind('\n').map_or(0, |newline| newline + 1)
}

fn leading_whitespace(line: &str) -> &str {
    let trimmed = line.trim_start_matches([' ', '\t']);
    &line[..line.len() - trimmed.len()]
}

fn line_indent(text: &str, offset: usize) -> &str {
    leading_whitespace(&text[line_start(text, offset)..])
}

pub fn reindent_for_array(
    text: &str,
    offset: usize,
    open_bracket: usize,
    close_bracket: Option<usize>,
    snippet: &str,
) -> String {
    let unit = detect_indent_unit(text);
    let array_indent = line_indent(text, open_bracket);
    let cursor_line = line_start(text, offset);
    let before_cursor = &text[cursor_line..offset];

    let preceding = text[..offset].trim_end();
    let last = preceding
        .char_indices()
        .last()
        .filter(|&(index, _)| index >= cursor_line);

    match last {
        Some((index, '[')) if index == open_bracket => {
            let base = format!("{array_indent}{unit}");
            let mut out = format!("\n{base}{}", reindent_lines(snippet, &base, &unit));
            let closes_on_line = close_bracket
                .filter(|&close| close >= offset)
                .is_some_and(|close| !text[offset..close].contains('\n'));
            if closes_on_line {
                out.push('\n');
                out.push_str(array_indent);
            }
            out
        }
        Some((_, '}')) => {
            let base = leading_whitespace(before_cursor);
            format!(",\n{base}{}", reindent_lines(snippet, base, &unit))
        }
        Some((index, ',')) if preceding[..index].trim_end().ends_with('}') => {
            let base = leading_whitespace(before_cursor);
            format!("\n{base}{}", reindent_lines(snippet, base, &unit))
        }
        _ if !before_cursor.is_empty() && before_cursor.trim().is_empty() => {
            reindent_lines(snippet, before_cursor, &unit)
        }
        _ => {
            let base = format!("{array_indent}{unit}");
            let body = reindent_lines(snippet, &base, &unit);
            if before_cursor.is_empty() {
                format!("{base}{body}")
            } else {
                body
            }
        }
    }
}

pub fn reindent_for_map(text: &str, offset: usize, snippet: &str) -> String {
    let unit = detect_indent_unit(text);
    reindent_lines(snippet, line_indent(text, offset), &unit)
}

pub fn reindent_lines(snippet: &str, base: &str, unit: &str) -> String {
    let own_unit = snippet
        .lines()
        .skip(1)
        .map(leading_whitespace)
        .find(|indent| !indent.is_empty())
        .map_or(2, str::len);

    let mut out = String::with_capacity(snippet.len());
    for (index, line) in snippet.split('\n').enumerate() {
        if index == 0 {
            out.push_str(line);
            continue;
        }
        out.push('\n');
        let indent = leading_whitespace(line);
        let rest = &line[indent.len()..];
        if rest.is_empty() {
            continue;
        }
        out.push_str(base);
        for _ in 0..indent.len() / own_unit {
            out.push_str(unit);
        }
        out.push_str(rest);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn expand(snippet: &str) -> String {
        let mut out = String::new();
        let mut chars = snippet.chars().peekable();
        let mut open = 0usize;
        while let Some(ch) = chars.next() {
            match ch {
                '\\' => {
                    if let Some(next) = chars.next() {
                        out.push(next);
                    }
                }
                '$' if chars.peek() == Some(&'{') => {
                    chars.next();
                    while chars.next_if(|c| c.is_ascii_digit()).is_some() {}
                    chars.next_if_eq(&':');
                    open += 1;
                }
                '$' => while chars.next_if(|c| c.is_ascii_digit()).is_some() {},
                '}' if open > 0 => open -= 1,
                other => out.push(other),
            }
        }
        out
    }

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn ability_snippet_expands_to_example_with_conditions() {
        let example = json!({ "type": "mod:dash", "cooldown": 20, "label": "go ${now}" });
        let snippet = build_snippet_from_example(DocKind::Ability, &example);
        assert!(snippet.contains("${1:mod:dash}"));
        assert!(snippet.contains("${2:20}"));

        let expanded: Value = serde_json::from_str(&expand(&snippet)).unwrap();
        assert_eq!(
            expanded,
            json!({
                "type": "mod:dash",
                "cooldown": 20,
                "label": "go ${now}",
                "conditions": { "enabling": [], "unlocking": [] }
            })
        );
    }

    #[test]
    fn completes_partial_conditions_without_dropping_entries() {
        let example = object(json!({
            "type": "mod:dash",
            "conditions": { "enabling": [{ "type": "mod:sneaking" }] }
        }));
        let out = ensure_ability_conditions(&example);
        assert_eq!(
            out["conditions"],
            json!({ "enabling": [{ "type": "mod:sneaking" }], "unlocking": [] })
        );

        let odd = object(json!({ "type": "mod:dash", "conditions": "none" }));
        assert_eq!(ensure_ability_conditions(&odd)["conditions"], json!("none"));
    }

    #[test]
    fn body_part_follows_type() {
        let example = object(json!({ "type": "mod:beam", "color": "red" }));
        let out = ensure_energy_renderer_body_part(&example);
        let keys: Vec<_> = out.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["type", "body_part", "color"]);
        assert_eq!(out["body_part"], json!("head"));

        let untyped = object(json!({ "color": "red" }));
        let keys: Vec<_> = ensure_energy_renderer_body_part(&untyped)
            .keys()
            .cloned()
            .collect();
        assert_eq!(keys, vec!["color", "body_part"]);
    }

    #[test]
    fn augmentation_is_idempotent() {
        let ability = object(json!({ "type": "mod:dash", "conditions": { "unlocking": [] } }));
        let once = ensure_ability_conditions(&ability);
        assert_eq!(ensure_ability_conditions(&once), once);

        let renderer = object(json!({ "type": "mod:beam", "body_part": "body" }));
        let once = ensure_energy_renderer_body_part(&renderer);
        assert_eq!(once, renderer);
        assert_eq!(ensure_energy_renderer_body_part(&once), once);
    }

    #[test]
    fn arrays_augment_each_object_element() {
        let example = json!([{ "type": "mod:beam" }, 3]);
        let snippet = build_snippet_from_example(DocKind::EnergyRenderer, &example);
        let expanded: Value = serde_json::from_str(&expand(&snippet)).unwrap();
        assert_eq!(expanded, json!([{ "type": "mod:beam", "body_part": "head" }, 3]));
    }

    #[test]
    fn keyed_snippet_starts_with_key_placeholder() {
        let record = EntityRecord::new(
            "mod:dash",
            "Dash",
            "",
            "{\n  \"type\": \"mod:dash\"\n}",
            "abilities.html",
        );
        let snippet = keyed_entry_snippet(DocKind::Ability, &record);
        assert!(snippet.starts_with("\"${1:dash}\": {"));
        assert!(snippet.contains("\"${2:mod:dash}\""));
    }

    #[test]
    fn field_defaults_follow_fallback_then_type_hint() {
        let mut field = FieldDef::new("cooldown");
        field.field_type = Some("Integer".to_string());
        assert_eq!(field_insert_text(&field), "\"cooldown\": ${1:0}");

        field.fallback = Some("\"fast\"".to_string());
        assert_eq!(field_insert_text(&field), "\"cooldown\": \"${1:fast}\"");

        field.fallback = Some("not json".to_string());
        assert_eq!(field_insert_text(&field), "\"cooldown\": \"${1:not json}\"");

        let mut flag = FieldDef::new("hidden");
        flag.field_type = Some("boolean".to_string());
        assert_eq!(field_insert_text(&flag), "\"hidden\": ${1:false}");

        let mut list = FieldDef::new("commands");
        list.field_type = Some("list of commands".to_string());
        assert_eq!(field_insert_text(&list), "\"commands\": [$1]");

        assert_eq!(field_insert_text(&FieldDef::new("name")), "\"name\": \"$1\"");
    }

    #[test]
    fn detects_indent_units() {
        assert_eq!(detect_indent_unit("{\n    \"a\": {\n        \"b\": 1\n    }\n}"), "    ");
        assert_eq!(detect_indent_unit("{\n\t\"a\": 1,\n\t\"b\": 2\n}"), "\t");
        assert_eq!(detect_indent_unit("{}"), "  ");
    }

    #[test]
    fn reindents_after_open_bracket_on_same_line() {
        let text = "{\n  \"abilities\": {\n    \"dash\": {\n      \"conditions\": {\n        \"enabling\": []\n      }\n    }\n  }\n}";
        let open = text.find('[').unwrap();
        let offset = open + 1;
        let snippet = "{\n  \"type\": \"${1:mod:sneaking}\"\n}";

        let out = reindent_for_array(text, offset, open, Some(offset), snippet);
        assert_eq!(
            out,
            format!(
                "\n{pad}{{\n{inner}\"type\": \"${{1:mod:sneaking}}\"\n{pad}}}\n{array}",
                pad = " ".repeat(10),
                inner = " ".repeat(12),
                array = " ".repeat(8)
            )
        );
    }

    #[test]
    fn open_bracket_with_close_on_later_line_adds_no_trailing_line() {
        let text = "{\n  \"enabling\": [\n  ]\n}";
        let open = text.find('[').unwrap();
        let close = text.find(']').unwrap();
        let snippet = "{\n  \"type\": \"${1:mod:sneaking}\"\n}";

        let out = reindent_for_array(text, open + 1, open, Some(close), snippet);
        assert_eq!(
            out,
            "\n    {\n      \"type\": \"${1:mod:sneaking}\"\n    }"
        );
        assert_eq!(reindent_for_array(text, open + 1, open, None, snippet), out);
    }

    #[test]
    fn separates_from_previous_item_with_comma() {
        let text = "[\n  {\"type\": \"mod:beam\"}\n]";
        let offset = text.find('}').unwrap() + 1;
        let out = reindent_for_array(text, offset, 0, text.rfind(']'), "{\n  \"a\": 1\n}");
        assert_eq!(out, ",\n  {\n    \"a\": 1\n  }");

        let text = "[\n  {\"type\": \"mod:beam\"},\n]";
        let offset = text.find(',').unwrap() + 1;
        let out = reindent_for_array(text, offset, 0, text.rfind(']'), "{}");
        assert_eq!(out, "\n  {}");
    }

    #[test]
    fn reuses_indentation_of_blank_line() {
        let text = "[\n    \n]";
        let offset = text.find("    ").unwrap() + 4;
        let out = reindent_for_array(text, offset, 0, text.rfind(']'), "{\n  \"a\": 1\n}");
        assert_eq!(out, "{\n      \"a\": 1\n    }");
    }
}
