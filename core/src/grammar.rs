//! Grammar nodes and the completion engine.
//!
//! A grammar is a tree of seven node kinds describing the command language
//! one peer accepts. Peers advertise grammars as JSON (see the envelope
//! accepted by [`Grammar::from_value`]); the shell composes all advertised
//! grammars into one tree and drives it with a [`TokenStream`] to produce
//! completion candidates.
//!
//! # Representation
//!
//! Nodes live in an arena ([`Grammar::nodes`]) and refer to each other by
//! [`NodeId`] index. Grammars may be recursive through explicit
//! [`NodeKind::Reference`] nodes, whose resolved back-pointer is likewise
//! an arena index; no traversal follows that edge unless it is completing,
//! so enumeration and serialization terminate on cyclic grammars.
//!
//! # Completion contract
//!
//! Every node consumes tokens from the stream and/or emits candidate
//! strings:
//!
//! - `Keyword` consumes one token. Complete tokens must match a keyword
//!   exactly (else [`GrammarError::UnexpectedToken`]) and delegate to its
//!   child; partial tokens emit every keyword matching the lowercased
//!   prefix.
//! - `Sequence` delegates to each child in order until the stream is
//!   exhausted.
//! - `Repeat` loops over its body; configured end literals are offered as
//!   candidates on partial tokens and terminate the loop on a match (the
//!   literal is consumed unless `peek_end`).
//! - `String` and `Number` consume one token; a complete token with an `id`
//!   is recorded as a captured parameter. `String` emits its options on
//!   partial tokens; `Number` never emits candidates.
//! - `Reference` forwards to the resolved node, or does nothing if
//!   unresolved.
//! - `Empty` matches the empty input.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};
use thiserror::Error;

use crate::token::TokenStream;

/// Nesting bound for untrusted grammar JSON and for completion descent.
const MAX_DEPTH: usize = 128;

#[derive(Debug, Error)]
pub enum GrammarError {
    /// A `Keyword` node met a complete token outside its keyword map.
    /// Never fatal; frontends translate this into "no candidates".
    #[error("unexpected token, expected one of {expected}")]
    UnexpectedToken { expected: String },

    /// The JSON envelope did not describe a valid node.
    #[error("malformed grammar node: {reason}")]
    Malformed { reason: String },

    /// A degenerate grammar (reference loop that consumes no input)
    /// exceeded the completion descent bound.
    #[error("grammar recursion limit exceeded")]
    RecursionLimit,
}

fn malformed(reason: impl Into<String>) -> GrammarError {
    GrammarError::Malformed {
        reason: reason.into(),
    }
}

/// Arena index of a node within one [`Grammar`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub u32);

impl NodeId {
    fn offset(self, by: u32) -> Self {
        Self(self.0 + by)
    }
}

/// Producer of completion options evaluated at completion time, with
/// access to the parameters captured so far on the stream. Local grammars
/// only; serialized as `options: null`.
pub trait OptionProvider: Send + Sync {
    fn options(&self, stream: &TokenStream) -> BTreeSet<String>;
}

/// Cloneable, debug-opaque handle around a dynamic option producer.
#[derive(Clone)]
pub struct DynOptions(pub Arc<dyn OptionProvider>);

impl fmt::Debug for DynOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DynOptions(..)")
    }
}

#[derive(Debug, Clone)]
pub enum NodeKind {
    /// Literal keyword alternatives, each delegating to a child node.
    Keyword { stmts: BTreeMap<String, NodeId> },
    /// Children matched in order.
    Sequence { stmts: Vec<NodeId> },
    /// Body matched zero or more times until an end literal appears.
    Repeat {
        stmt: NodeId,
        end: Option<Vec<String>>,
        peek_end: bool,
    },
    /// One free-form token, optionally completed from a static option set
    /// or a dynamic producer.
    Str {
        options: Option<BTreeSet<String>>,
        provider: Option<DynOptions>,
    },
    /// One numeric token. Bounds are advisory grammar metadata; completion
    /// neither validates nor completes numbers.
    Number {
        integer: bool,
        min: Option<f64>,
        max: Option<f64>,
    },
    /// Forwards to the node whose `id` equals `target` once resolved.
    Reference {
        target: String,
        resolved: Option<NodeId>,
    },
    /// Matches the empty input.
    Empty,
}

/// One grammar node: an optional `id` (unique within one advertised
/// grammar) plus the kind-specific payload.
#[derive(Debug, Clone)]
pub struct Node {
    pub id: Option<String>,
    pub kind: NodeKind,
}

impl Node {
    pub fn empty() -> Self {
        Self {
            id: None,
            kind: NodeKind::Empty,
        }
    }

    pub fn keyword<K: Into<String>>(stmts: impl IntoIterator<Item = (K, NodeId)>) -> Self {
        Self {
            id: None,
            kind: NodeKind::Keyword {
                stmts: stmts.into_iter().map(|(k, v)| (k.into(), v)).collect(),
            },
        }
    }

    pub fn sequence(stmts: Vec<NodeId>) -> Self {
        Self {
            id: None,
            kind: NodeKind::Sequence { stmts },
        }
    }

    pub fn repeat(stmt: NodeId, end: Option<Vec<String>>, peek_end: bool) -> Self {
        Self {
            id: None,
            kind: NodeKind::Repeat {
                stmt,
                end,
                peek_end,
            },
        }
    }

    pub fn string(options: Option<BTreeSet<String>>) -> Self {
        Self {
            id: None,
            kind: NodeKind::Str {
                options,
                provider: None,
            },
        }
    }

    pub fn string_dynamic(provider: Arc<dyn OptionProvider>) -> Self {
        Self {
            id: None,
            kind: NodeKind::Str {
                options: None,
                provider: Some(DynOptions(provider)),
            },
        }
    }

    pub fn number(integer: bool, min: Option<f64>, max: Option<f64>) -> Self {
        Self {
            id: None,
            kind: NodeKind::Number { integer, min, max },
        }
    }

    pub fn reference(target: impl Into<String>) -> Self {
        Self {
            id: None,
            kind: NodeKind::Reference {
                target: target.into(),
                resolved: None,
            },
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

/// An arena-backed grammar tree with a designated root.
#[derive(Debug, Clone)]
pub struct Grammar {
    nodes: Vec<Node>,
    root: NodeId,
}

impl Grammar {
    /// A grammar whose root is an empty `Keyword`, the shape the composer
    /// merges advertised grammars into.
    pub fn keyword_root() -> Self {
        Self {
            nodes: vec![Node::keyword::<String>([])],
            root: NodeId(0),
        }
    }

    /// Build a grammar by allocating nodes bottom-up and designating the
    /// root last.
    pub fn build(f: impl FnOnce(&mut Self) -> NodeId) -> Self {
        let mut g = Self {
            nodes: Vec::new(),
            root: NodeId(0),
        };
        g.root = f(&mut g);
        g
    }

    pub fn alloc(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0 as usize)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id.0 as usize)
    }

    /// Copy every node of `other` into this arena, remapping child and
    /// back-pointer indices. Returns the index offset; `other`'s node `n`
    /// now lives at `n + offset`. Copying wholesale (rather than only the
    /// reachable subtree) keeps intra-grammar references valid even when
    /// they point outside the subtree being grafted.
    pub fn import(&mut self, other: &Grammar) -> u32 {
        let offset = self.nodes.len() as u32;
        for node in &other.nodes {
            let mut node = node.clone();
            match &mut node.kind {
                NodeKind::Keyword { stmts } => {
                    for child in stmts.values_mut() {
                        *child = child.offset(offset);
                    }
                }
                NodeKind::Sequence { stmts } => {
                    for child in stmts.iter_mut() {
                        *child = child.offset(offset);
                    }
                }
                NodeKind::Repeat { stmt, .. } => *stmt = stmt.offset(offset),
                NodeKind::Reference { resolved, .. } => {
                    if let Some(r) = resolved {
                        *r = r.offset(offset);
                    }
                }
                NodeKind::Str { .. } | NodeKind::Number { .. } | NodeKind::Empty => {}
            }
            self.nodes.push(node);
        }
        offset
    }

    /// Depth-first enumeration of the nodes reachable from `from` without
    /// following reference back-pointers. Shared nodes are visited once.
    pub fn walk(&self, from: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        let mut stack = vec![from];
        let mut seen: HashSet<NodeId> = HashSet::new();
        std::iter::from_fn(move || {
            loop {
                let id = stack.pop()?;
                if !seen.insert(id) {
                    continue;
                }
                match self.node(id).map(|n| &n.kind) {
                    Some(NodeKind::Keyword { stmts }) => stack.extend(stmts.values().copied()),
                    Some(NodeKind::Sequence { stmts }) => stack.extend(stmts.iter().copied()),
                    Some(NodeKind::Repeat { stmt, .. }) => stack.push(*stmt),
                    _ => {}
                }
                return Some(id);
            }
        })
    }

    /// Resolve every `Reference` reachable from the root against the `id`s
    /// of nodes in the same grammar. Unresolved references are logged and
    /// left dangling (they then behave as `Empty`); the missing targets are
    /// also returned.
    pub fn resolve_references(&mut self) -> Vec<String> {
        let reachable: Vec<NodeId> = self.walk(self.root).collect();

        let mut by_id: HashMap<String, NodeId> = HashMap::new();
        for &id in &reachable {
            if let Some(name) = self.node(id).and_then(|n| n.id.clone()) {
                by_id.insert(name, id);
            }
        }

        let mut missing = Vec::new();
        for &id in &reachable {
            let target = match self.node(id).map(|n| &n.kind) {
                Some(NodeKind::Reference { target, .. }) => target.clone(),
                _ => continue,
            };
            match by_id.get(&target) {
                Some(&found) => {
                    if let Some(Node {
                        kind: NodeKind::Reference { resolved, .. },
                        ..
                    }) = self.node_mut(id)
                    {
                        *resolved = Some(found);
                    }
                }
                None => {
                    tracing::warn!("missing node reference in idl: {target}");
                    missing.push(target);
                }
            }
        }
        missing
    }

    /// Run the completion contract from the root, returning candidates in
    /// emission order (frontends sort before display).
    pub fn complete(&self, toks: &mut TokenStream) -> Result<Vec<String>, GrammarError> {
        let mut out = Vec::new();
        self.complete_node(self.root, toks, &mut out, 0)?;
        Ok(out)
    }

    fn complete_node(
        &self,
        id: NodeId,
        toks: &mut TokenStream,
        out: &mut Vec<String>,
        depth: usize,
    ) -> Result<(), GrammarError> {
        if depth > MAX_DEPTH {
            return Err(GrammarError::RecursionLimit);
        }
        let node = match self.node(id) {
            Some(node) => node,
            None => return Ok(()),
        };
        match &node.kind {
            NodeKind::Keyword { stmts } => {
                let tok = toks.next();
                match tok.cursor {
                    None => {
                        let child = stmts.get(&tok.text).ok_or_else(|| {
                            let expected: Vec<&str> = stmts.keys().map(String::as_str).collect();
                            GrammarError::UnexpectedToken {
                                expected: expected.join(", "),
                            }
                        })?;
                        self.complete_node(*child, toks, out, depth + 1)?;
                    }
                    Some(_) => {
                        let prefix = tok.prefix();
                        for kw in stmts.keys() {
                            if kw.to_lowercase().starts_with(&prefix) {
                                out.push(kw.clone());
                            }
                        }
                    }
                }
            }
            NodeKind::Sequence { stmts } => {
                for &stmt in stmts {
                    self.complete_node(stmt, toks, out, depth + 1)?;
                    if toks.eof() {
                        break;
                    }
                }
            }
            NodeKind::Repeat {
                stmt,
                end,
                peek_end,
            } => loop {
                if let Some(end) = end {
                    let tok = toks.peek();
                    if tok.cursor.is_some() {
                        let prefix = tok.prefix();
                        let mut sorted: Vec<&String> = end.iter().collect();
                        sorted.sort();
                        for lit in sorted {
                            if lit.to_lowercase().starts_with(&prefix) {
                                out.push(lit.clone());
                            }
                        }
                    }
                    if end.iter().any(|lit| *lit == tok.text) {
                        if !peek_end {
                            toks.next();
                        }
                        break;
                    }
                }
                self.complete_node(*stmt, toks, out, depth + 1)?;
                if toks.eof() {
                    break;
                }
            },
            NodeKind::Str { options, provider } => {
                let tok = toks.next();
                match tok.cursor {
                    None => {
                        if let Some(param) = &node.id {
                            toks.set_param(param.clone(), tok.text);
                        }
                    }
                    Some(_) => {
                        let opts = match (options, provider) {
                            (Some(options), _) => options.clone(),
                            (None, Some(provider)) => provider.0.options(toks),
                            (None, None) => BTreeSet::new(),
                        };
                        let prefix = tok.prefix();
                        for opt in opts {
                            if opt.to_lowercase().starts_with(&prefix) {
                                out.push(opt);
                            }
                        }
                    }
                }
            }
            NodeKind::Number { .. } => {
                let tok = toks.next();
                if tok.cursor.is_none() {
                    if let Some(param) = &node.id {
                        toks.set_param(param.clone(), tok.text);
                    }
                }
            }
            NodeKind::Reference { resolved, .. } => {
                if let Some(resolved) = resolved {
                    self.complete_node(*resolved, toks, out, depth + 1)?;
                }
            }
            NodeKind::Empty => {}
        }
        Ok(())
    }

    /// Serialize the tree below the root into the JSON envelope. A node
    /// already on the active serialization path is emitted as `null`, so
    /// cyclic grammars produce finite output.
    pub fn to_value(&self) -> Value {
        let mut busy = HashSet::new();
        self.value_of(self.root, &mut busy)
    }

    fn value_of(&self, id: NodeId, busy: &mut HashSet<NodeId>) -> Value {
        if !busy.insert(id) {
            return Value::Null;
        }
        let node = match self.node(id) {
            Some(node) => node,
            None => return Value::Null,
        };
        let value = match &node.kind {
            NodeKind::Keyword { stmts } => {
                let mut map = Map::new();
                map.insert("type".into(), "keyword".into());
                let mut inner = Map::new();
                for (kw, &child) in stmts {
                    inner.insert(kw.clone(), self.value_of(child, busy));
                }
                map.insert("stmts".into(), Value::Object(inner));
                if let Some(name) = &node.id {
                    map.insert("id".into(), name.clone().into());
                }
                Value::Object(map)
            }
            NodeKind::Sequence { stmts } => {
                let mut map = Map::new();
                map.insert("type".into(), "sequence".into());
                map.insert(
                    "stmts".into(),
                    Value::Array(stmts.iter().map(|&c| self.value_of(c, busy)).collect()),
                );
                if let Some(name) = &node.id {
                    map.insert("id".into(), name.clone().into());
                }
                Value::Object(map)
            }
            NodeKind::Repeat {
                stmt,
                end,
                peek_end,
            } => {
                let mut map = Map::new();
                map.insert("type".into(), "repeat".into());
                map.insert("stmt".into(), self.value_of(*stmt, busy));
                map.insert(
                    "end".into(),
                    match end {
                        Some(end) => Value::Array(end.iter().cloned().map(Value::from).collect()),
                        None => Value::Null,
                    },
                );
                map.insert("peekEnd".into(), (*peek_end).into());
                if let Some(name) = &node.id {
                    map.insert("id".into(), name.clone().into());
                }
                Value::Object(map)
            }
            NodeKind::Str { options, .. } => {
                let mut map = Map::new();
                map.insert("type".into(), "string".into());
                map.insert(
                    "id".into(),
                    node.id.clone().map(Value::from).unwrap_or(Value::Null),
                );
                map.insert(
                    "options".into(),
                    match options {
                        Some(options) => {
                            Value::Array(options.iter().cloned().map(Value::from).collect())
                        }
                        None => Value::Null,
                    },
                );
                Value::Object(map)
            }
            NodeKind::Number { integer, min, max } => {
                let mut map = Map::new();
                map.insert("type".into(), "number".into());
                map.insert(
                    "id".into(),
                    node.id.clone().map(Value::from).unwrap_or(Value::Null),
                );
                map.insert("integer".into(), (*integer).into());
                map.insert(
                    "min".into(),
                    (*min).map(Value::from).unwrap_or(Value::Null),
                );
                map.insert(
                    "max".into(),
                    (*max).map(Value::from).unwrap_or(Value::Null),
                );
                Value::Object(map)
            }
            NodeKind::Reference { target, .. } => {
                let mut map = Map::new();
                map.insert("type".into(), "reference".into());
                map.insert("ref".into(), target.clone().into());
                Value::Object(map)
            }
            NodeKind::Empty => Value::Null,
        };
        busy.remove(&id);
        value
    }

    /// Parse the JSON envelope into a fresh grammar. `null` denotes
    /// `Empty`; `Repeat.end` accepts a single string or a list of strings.
    pub fn from_value(value: &Value) -> Result<Self, GrammarError> {
        let mut g = Self {
            nodes: Vec::new(),
            root: NodeId(0),
        };
        g.root = g.parse_node(value, 0)?;
        Ok(g)
    }

    pub fn from_json(payload: &str) -> Result<Self, GrammarError> {
        let value: Value =
            serde_json::from_str(payload).map_err(|e| malformed(e.to_string()))?;
        Self::from_value(&value)
    }

    pub fn to_json(&self) -> String {
        self.to_value().to_string()
    }

    fn parse_node(&mut self, value: &Value, depth: usize) -> Result<NodeId, GrammarError> {
        if depth > MAX_DEPTH {
            return Err(malformed("nesting too deep"));
        }
        if value.is_null() {
            return Ok(self.alloc(Node::empty()));
        }
        let obj = value
            .as_object()
            .ok_or_else(|| malformed("node must be an object or null"))?;
        let id = obj.get("id").and_then(Value::as_str).map(String::from);
        let kind = obj
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| malformed("missing type tag"))?;

        let node = match kind {
            "keyword" => {
                let stmts = obj
                    .get("stmts")
                    .and_then(Value::as_object)
                    .ok_or_else(|| malformed("keyword requires a stmts object"))?;
                let mut parsed = BTreeMap::new();
                for (kw, child) in stmts {
                    parsed.insert(kw.clone(), self.parse_node(child, depth + 1)?);
                }
                Node {
                    id,
                    kind: NodeKind::Keyword { stmts: parsed },
                }
            }
            "sequence" => {
                let stmts = obj
                    .get("stmts")
                    .and_then(Value::as_array)
                    .ok_or_else(|| malformed("sequence requires a stmts array"))?;
                let mut parsed = Vec::with_capacity(stmts.len());
                for child in stmts {
                    parsed.push(self.parse_node(child, depth + 1)?);
                }
                Node {
                    id,
                    kind: NodeKind::Sequence { stmts: parsed },
                }
            }
            "repeat" => {
                let stmt = obj
                    .get("stmt")
                    .ok_or_else(|| malformed("repeat requires a stmt"))?;
                let stmt = self.parse_node(stmt, depth + 1)?;
                let end = match obj.get("end") {
                    None | Some(Value::Null) => None,
                    Some(Value::String(lit)) => Some(vec![lit.clone()]),
                    Some(Value::Array(lits)) => {
                        let mut parsed = Vec::with_capacity(lits.len());
                        for lit in lits {
                            parsed.push(
                                lit.as_str()
                                    .ok_or_else(|| malformed("end literals must be strings"))?
                                    .to_string(),
                            );
                        }
                        Some(parsed)
                    }
                    Some(_) => return Err(malformed("end must be a string or a list")),
                };
                let peek_end = obj.get("peekEnd").and_then(Value::as_bool).unwrap_or(false);
                Node {
                    id,
                    kind: NodeKind::Repeat {
                        stmt,
                        end,
                        peek_end,
                    },
                }
            }
            "string" => {
                let options = match obj.get("options") {
                    None | Some(Value::Null) => None,
                    Some(Value::Array(opts)) => {
                        let mut parsed = BTreeSet::new();
                        for opt in opts {
                            parsed.insert(
                                opt.as_str()
                                    .ok_or_else(|| malformed("options must be strings"))?
                                    .to_string(),
                            );
                        }
                        Some(parsed)
                    }
                    Some(_) => return Err(malformed("options must be a list or null")),
                };
                Node {
                    id,
                    kind: NodeKind::Str {
                        options,
                        provider: None,
                    },
                }
            }
            "number" => Node {
                id,
                kind: NodeKind::Number {
                    integer: obj.get("integer").and_then(Value::as_bool).unwrap_or(false),
                    min: obj.get("min").and_then(Value::as_f64),
                    max: obj.get("max").and_then(Value::as_f64),
                },
            },
            "reference" => {
                let target = obj
                    .get("ref")
                    .and_then(Value::as_str)
                    .ok_or_else(|| malformed("reference requires a ref"))?;
                Node::reference(target)
            }
            "empty" => Node { id, kind: NodeKind::Empty },
            other => return Err(malformed(format!("unknown node type {other:?}"))),
        };
        Ok(self.alloc(node))
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn import_remaps_indices() {
        let inner = Grammar::build(|g| {
            let e = g.alloc(Node::empty());
            g.alloc(Node::keyword([("on", e)]))
        });
        let mut outer = Grammar::keyword_root();
        let offset = outer.import(&inner);
        assert_eq!(offset, 1);
        let root = inner.root().offset(offset);
        match &outer.node(root).map(|n| &n.kind) {
            Some(NodeKind::Keyword { stmts }) => {
                assert_eq!(stmts["on"], NodeId(1));
            }
            other => panic!("unexpected kind: {other:?}"),
        }
    }

    #[test]
    fn walk_visits_shared_nodes_once() {
        let g = Grammar::build(|g| {
            let e = g.alloc(Node::empty());
            g.alloc(Node::keyword([("a", e), ("b", e)]))
        });
        assert_eq!(g.walk(g.root()).count(), 2);
    }

    #[test]
    fn self_referential_completion_is_bounded() {
        let mut g = Grammar::build(|g| {
            let r = g.alloc(Node::reference("loop"));
            g.alloc(Node::sequence(vec![r]).with_id("loop"))
        });
        assert!(g.resolve_references().is_empty());
        let mut toks = crate::token::TokenStream::new("x", 1);
        assert!(matches!(
            g.complete(&mut toks),
            Err(GrammarError::RecursionLimit)
        ));
    }
}
