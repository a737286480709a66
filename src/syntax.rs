use tree_sitter::{Node, Parser};

pub type NodeId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Object,
    Array,
    Property,
    String,
    Number,
    Boolean,
    Null,
}

#[derive(Debug, Clone)]
pub struct JsonNode {
    pub kind: NodeKind,
    /// Byte span, end exclusive.
    pub start: usize,
    pub end: usize,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    /// Containers only: the closing bracket was present.
    pub closed: bool,
    /// Properties only: byte offset of the `:` separator.
    pub colon: Option<usize>,
    value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

impl PathSegment {
    pub fn key(&self) -> Option<&str> {
        match self {
            PathSegment::Key(name) => Some(name),
            PathSegment::Index(_) => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Location {
    /// Keys and indices from the root to the value slot holding the offset.
    /// When the offset sits on a property key, the last segment is that key
    /// (empty when no key has been typed yet).
    pub path: Vec<PathSegment>,
    pub at_property_key: bool,
    pub previous: Option<NodeId>,
}

#[derive(Debug)]
pub struct JsonTree {
    text: String,
    nodes: Vec<JsonNode>,
    root: NodeId,
}

impl JsonTree {
    pub fn parse(text: &str) -> Option<Self> {
        let mut parser = Parser::new();
        parser
            .set_language(&tree_sitter_json::LANGUAGE.into())
            .ok()?;
        let tree = parser.parse(text, None)?;

        let mut builder = Builder {
            text,
            nodes: Vec::new(),
        };
        let mut stream = Stream::of(tree.root_node(), text.len());
        let root = builder.top_level(&mut stream)?;

        Some(Self {
            text: text.to_string(),
            nodes: builder.nodes,
            root,
        })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> &JsonNode {
        &self.nodes[id]
    }

    pub fn kind(&self, id: NodeId) -> NodeKind {
        self.nodes[id].kind
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id].parent
    }

    pub fn span(&self, id: NodeId) -> (usize, usize) {
        (self.nodes[id].start, self.nodes[id].end)
    }

    pub fn slice(&self, id: NodeId) -> &str {
        let (start, end) = self.span(id);
        &self.text[start..end.min(self.text.len())]
    }

    pub fn objects(&self) -> impl Iterator<Item = NodeId> + '_ {
        (0..self.nodes.len()).filter(|&id| self.nodes[id].kind == NodeKind::Object)
    }

    pub fn string_value(&self, id: NodeId) -> Option<&str> {
        match self.nodes[id].kind {
            NodeKind::String => self.nodes[id].value.as_deref(),
            _ => None,
        }
    }

    pub fn property_key(&self, property: NodeId) -> Option<NodeId> {
        match self.nodes[property].kind {
            NodeKind::Property => self.nodes[property].children.first().copied(),
            _ => None,
        }
    }

    pub fn property_value(&self, property: NodeId) -> Option<NodeId> {
        match self.nodes[property].kind {
            NodeKind::Property => self.nodes[property].children.get(1).copied(),
            _ => None,
        }
    }

    pub fn property_name(&self, property: NodeId) -> Option<&str> {
        self.property_key(property)
            .and_then(|key| self.string_value(key))
    }

    pub fn properties(&self, object: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes[object]
            .children
            .iter()
            .copied()
            .filter(|&child| self.nodes[child].kind == NodeKind::Property)
    }

    pub fn find_property(&self, object: NodeId, name: &str) -> Option<NodeId> {
        self.properties(object)
            .find(|&prop| self.property_name(prop) == Some(name))
    }

    pub fn property_string(&self, object: NodeId, name: &str) -> Option<&str> {
        let prop = self.find_property(object, name)?;
        self.string_value(self.property_value(prop)?)
    }

    pub fn is_property_key(&self, id: NodeId) -> bool {
        self.nodes[id]
            .parent
            .and_then(|parent| self.property_key(parent))
            == Some(id)
    }

    pub fn elements(&self, array: NodeId) -> &[NodeId] {
        match self.nodes[array].kind {
            NodeKind::Array => &self.nodes[array].children,
            _ => &[],
        }
    }

    pub fn enclosing_property(&self, id: NodeId) -> Option<NodeId> {
        let mut current = Some(id);
        while let Some(node) = current {
            if self.nodes[node].kind == NodeKind::Property {
                return Some(node);
            }
            current = self.nodes[node].parent;
        }
        None
    }

    /// Innermost node containing `offset`. Leaves and properties contain both
    /// of their ends; a closed container contains the offsets between its
    /// brackets. Between touching siblings the right one wins.
    pub fn node_at_offset(&self, offset: usize) -> Option<NodeId> {
        if !self.contains(self.root, offset) {
            return None;
        }
        let mut current = self.root;
        loop {
            let next = self.nodes[current]
                .children
                .iter()
                .rev()
                .copied()
                .find(|&child| self.contains(child, offset));
            match next {
                Some(child) => current = child,
                None => return Some(current),
            }
        }
    }

    fn contains(&self, id: NodeId, offset: usize) -> bool {
        let node = &self.nodes[id];
        match node.kind {
            NodeKind::Object | NodeKind::Array => {
                node.start < offset && (offset < node.end || (!node.closed && offset <= node.end))
            }
            _ => node.start <= offset && offset <= node.end,
        }
    }

    pub fn segments_to(&self, id: NodeId) -> Vec<PathSegment> {
        let mut segments = Vec::new();
        let mut current = id;
        while let Some(parent) = self.nodes[current].parent {
            match self.nodes[parent].kind {
                NodeKind::Property => {
                    if let Some(name) = self.property_name(parent) {
                        segments.push(PathSegment::Key(name.to_string()));
                    }
                }
                NodeKind::Array => {
                    let index = self.nodes[parent]
                        .children
                        .iter()
                        .position(|&child| child == current)
                        .unwrap_or(0);
                    segments.push(PathSegment::Index(index));
                }
                _ => {}
            }
            current = parent;
        }
        segments.reverse();
        segments
    }

    pub fn location(&self, offset: usize) -> Location {
        let Some(id) = self.node_at_offset(offset) else {
            return Location::default();
        };

        match self.nodes[id].kind {
            NodeKind::Object => self.object_location(id, offset),
            NodeKind::Array => self.array_location(id, offset),
            NodeKind::Property => {
                let mut path = self.segments_to(id);
                path.push(PathSegment::Key(
                    self.property_name(id).unwrap_or_default().to_string(),
                ));
                let at_property_key = match self.nodes[id].colon {
                    Some(colon) => offset <= colon,
                    None => true,
                };
                Location {
                    path,
                    at_property_key,
                    previous: None,
                }
            }
            _ => Location {
                path: self.segments_to(id),
                at_property_key: self.is_property_key(id),
                previous: None,
            },
        }
    }

    fn object_location(&self, object: NodeId, offset: usize) -> Location {
        let previous = self.previous_member(object, offset);
        let gap_start = previous
            .map(|prev| self.nodes[prev].end)
            .unwrap_or(self.nodes[object].start + 1)
            .min(offset);
        let after_comma = self.text[gap_start..offset].contains(',');

        let mut path = self.segments_to(object);
        let at_property_key = match previous {
            Some(prev) if !after_comma && self.nodes[prev].kind == NodeKind::Property => {
                path.push(PathSegment::Key(
                    self.property_name(prev).unwrap_or_default().to_string(),
                ));
                // A key without a colon is still being typed.
                self.nodes[prev].colon.is_none()
            }
            _ => {
                path.push(PathSegment::Key(String::new()));
                true
            }
        };

        Location {
            path,
            at_property_key,
            previous,
        }
    }

    fn array_location(&self, array: NodeId, offset: usize) -> Location {
        let children = &self.nodes[array].children;
        let before = children
            .iter()
            .filter(|&&child| self.nodes[child].end <= offset)
            .count();
        let previous = before.checked_sub(1).map(|i| children[i]);
        let index = match previous {
            Some(prev) if !self.text[self.nodes[prev].end.min(offset)..offset].contains(',') => {
                before - 1
            }
            _ => before,
        };

        let mut path = self.segments_to(array);
        path.push(PathSegment::Index(index));
        Location {
            path,
            at_property_key: false,
            previous,
        }
    }

    pub fn previous_member(&self, container: NodeId, offset: usize) -> Option<NodeId> {
        self.nodes[container]
            .children
            .iter()
            .copied()
            .filter(|&child| self.nodes[child].end <= offset)
            .last()
    }
}

struct Stream<'t> {
    items: Vec<Node<'t>>,
    pos: usize,
    limit: usize,
}

impl<'t> Stream<'t> {
    fn of(node: Node<'t>, limit: usize) -> Self {
        let mut items = Vec::new();
        flatten(node, &mut items);
        Self {
            items,
            pos: 0,
            limit,
        }
    }

    fn peek(&self) -> Option<Node<'t>> {
        self.items.get(self.pos).copied()
    }

    fn peek_kind(&self, ahead: usize) -> Option<&'static str> {
        self.items.get(self.pos + ahead).map(|node| node.kind())
    }

    fn bump(&mut self) {
        if self.pos < self.items.len() {
            self.pos += 1;
        }
    }
}

fn flatten<'t>(node: Node<'t>, out: &mut Vec<Node<'t>>) {
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if child.is_missing() {
            continue;
        }
        if child.is_error() {
            flatten(child, out);
        } else if !child.is_extra() {
            out.push(child);
        }
    }
}

struct Builder<'s> {
    text: &'s str,
    nodes: Vec<JsonNode>,
}

impl Builder<'_> {
    fn push(&mut self, kind: NodeKind, node: Node, parent: Option<NodeId>) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(JsonNode {
            kind,
            start: node.start_byte(),
            end: node.end_byte(),
            parent,
            children: Vec::new(),
            closed: false,
            colon: None,
            value: None,
        });
        if let Some(parent) = parent {
            self.nodes[parent].children.push(id);
        }
        id
    }

    fn top_level(&mut self, stream: &mut Stream) -> Option<NodeId> {
        let mut root = None;
        while stream.peek().is_some() {
            if root.is_none() {
                root = self.value(stream, None);
                if root.is_some() {
                    continue;
                }
            }
            stream.bump();
        }
        root
    }

    fn value(&mut self, stream: &mut Stream, parent: Option<NodeId>) -> Option<NodeId> {
        let node = stream.peek()?;
        let kind = match node.kind() {
            "object" | "{" => NodeKind::Object,
            "array" | "[" => NodeKind::Array,
            "string" | "\"" => NodeKind::String,
            "number" => NodeKind::Number,
            "true" | "false" => NodeKind::Boolean,
            "null" => NodeKind::Null,
            _ => return None,
        };
        stream.bump();

        let id = self.push(kind, node, parent);
        match node.kind() {
            "object" => {
                let mut inner = Stream::of(node, node.end_byte());
                if inner.peek_kind(0) == Some("{") {
                    inner.bump();
                }
                self.members(&mut inner, id);
            }
            "array" => {
                let mut inner = Stream::of(node, node.end_byte());
                if inner.peek_kind(0) == Some("[") {
                    inner.bump();
                }
                self.elements(&mut inner, id);
            }
            "{" => self.members(stream, id),
            "[" => self.elements(stream, id),
            "string" => {
                let raw = &self.text[node.byte_range()];
                self.nodes[id].value = Some(decode_string(raw));
            }
            "\"" => self.loose_string(stream, id),
            _ => {}
        }
        Some(id)
    }

    fn loose_string(&mut self, stream: &mut Stream, id: NodeId) {
        let mut end = self.nodes[id].end;
        while let Some(next) = stream.peek() {
            if next.start_byte() != end {
                break;
            }
            match next.kind() {
                "string_content" | "escape_sequence" => {
                    end = next.end_byte();
                    stream.bump();
                }
                "\"" => {
                    end = next.end_byte();
                    stream.bump();
                    break;
                }
                _ => break,
            }
        }
        let raw = &self.text[self.nodes[id].start..end];
        self.nodes[id].end = end;
        self.nodes[id].value = Some(decode_string(raw));
    }

    fn members(&mut self, stream: &mut Stream, object: NodeId) {
        while let Some(node) = stream.peek() {
            match node.kind() {
                "}" => {
                    stream.bump();
                    self.close(object, node.end_byte());
                    return;
                }
                "]" => break,
                "pair" => {
                    stream.bump();
                    self.pair(node, object);
                }
                "string" | "\"" => self.property(stream, object),
                _ => {
                    if self.value(stream, Some(object)).is_none() {
                        stream.bump();
                    }
                }
            }
        }
        self.nodes[object].end = stream.limit;
    }

    fn elements(&mut self, stream: &mut Stream, array: NodeId) {
        while let Some(node) = stream.peek() {
            match node.kind() {
                "]" => {
                    stream.bump();
                    self.close(array, node.end_byte());
                    return;
                }
                "}" => break,
                _ => {
                    if self.value(stream, Some(array)).is_none() {
                        stream.bump();
                    }
                }
            }
        }
        self.nodes[array].end = stream.limit;
    }

    fn close(&mut self, container: NodeId, end: usize) {
        self.nodes[container].end = end;
        self.nodes[container].closed = true;
    }

    fn pair(&mut self, node: Node, object: NodeId) {
        let mut inner = Stream::of(node, node.end_byte());
        if inner.peek_kind(0) == Some("string") {
            self.property(&mut inner, object);
            return;
        }
        while inner.peek().is_some() {
            if self.value(&mut inner, Some(object)).is_none() {
                inner.bump();
            }
        }
    }

    fn property(&mut self, stream: &mut Stream, object: NodeId) {
        let Some(head) = stream.peek() else {
            return;
        };
        let property = self.push(NodeKind::Property, head, Some(object));
        let Some(key) = self.value(stream, Some(property)) else {
            return;
        };
        self.nodes[property].end = self.nodes[key].end;

        let Some(colon) = stream.peek().filter(|node| node.kind() == ":") else {
            return;
        };
        stream.bump();
        self.nodes[property].colon = Some(colon.start_byte());
        self.nodes[property].end = colon.end_byte();

        // A string followed by its own colon is the next key, not this value.
        let next_is_key = stream.peek_kind(0) == Some("string") && stream.peek_kind(1) == Some(":");
        if next_is_key {
            return;
        }
        if let Some(value) = self.value(stream, Some(property)) {
            self.nodes[property].end = self.nodes[value].end;
        }
    }
}

fn decode_string(raw: &str) -> String {
    serde_json::from_str::<String>(raw).unwrap_or_else(|_| {
        let inner = raw.strip_prefix('"').unwrap_or(raw);
        inner.strip_suffix('"').unwrap_or(inner).to_string()
    })
}
