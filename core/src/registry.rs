//! IDL registry and the composed command language.
//!
//! The registry maps topics to the IDLs announced on them. Every upsert
//! invalidates the composed [`Language`]: a single `Keyword`-rooted grammar
//! merging every registered IDL, plus a prefix trie mirroring the grammar's
//! keyword spine with routing metadata attached at each routable node.
//! Composition always rebuilds from scratch over the full registry, so no
//! grammar node is ever mutated while a reader might hold it.

use std::collections::BTreeMap;

use tracing::debug;

use crate::grammar::{Grammar, Node, NodeId, NodeKind};
use crate::idl::Idl;

/// Routing metadata attached to a prefix-trie node. A trie node carrying a
/// `Route` is *routable*: a command whose keyword path reaches it can be
/// dispatched to `topic`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub topic: String,
    /// Whether the payload starts at the matched keyword itself (flat
    /// IDLs) or right after it.
    pub include_head: bool,
    pub ad_hoc_channels: bool,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub result: Option<String>,
}

impl Route {
    fn for_idl(idl: &Idl, include_head: bool) -> Self {
        Self {
            topic: idl.topic.clone(),
            include_head,
            ad_hoc_channels: idl.ad_hoc_channels,
            stdout: idl.stdout.clone(),
            stderr: idl.stderr.clone(),
            result: idl.result.clone(),
        }
    }
}

/// One node of the prefix trie paralleling the composite grammar's keyword
/// spine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrefixNode {
    pub children: BTreeMap<String, PrefixNode>,
    pub route: Option<Route>,
}

impl PrefixNode {
    fn descend(&mut self, key: &str) -> &mut PrefixNode {
        self.children.entry(key.to_string()).or_default()
    }
}

/// All IDLs currently known, keyed by topic. Entries are inserted or
/// replaced by announcements and never implicitly removed.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    idls: BTreeMap<String, Idl>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&mut self, idl: Idl) {
        self.idls.insert(idl.topic.clone(), idl);
    }

    pub fn get(&self, topic: &str) -> Option<&Idl> {
        self.idls.get(topic)
    }

    pub fn len(&self) -> usize {
        self.idls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.idls.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Idl> {
        self.idls.values()
    }
}

/// The composed command language: completion grammar plus routing trie.
#[derive(Debug, Clone)]
pub struct Language {
    pub grammar: Grammar,
    pub routes: PrefixNode,
}

impl Default for Language {
    fn default() -> Self {
        Self {
            grammar: Grammar::keyword_root(),
            routes: PrefixNode::default(),
        }
    }
}

impl Language {
    /// Rebuild the composite grammar and prefix trie over the full
    /// registry.
    ///
    /// Flat IDLs merge their top-level keywords straight into the root;
    /// nested IDLs get a keyword spine along their topic segments with the
    /// completion tree attached under the last segment. IDLs whose spine
    /// would pass through an existing non-`Keyword` node are skipped.
    /// Registered topics are visited in ascending order, so on a keyword
    /// collision the lexicographically greatest topic wins.
    pub fn compose(registry: &Registry) -> Self {
        let mut grammar = Grammar::keyword_root();
        let mut routes = PrefixNode::default();

        for idl in registry.iter() {
            if idl.flat {
                Self::merge_flat(&mut grammar, &mut routes, idl);
            } else {
                Self::merge_nested(&mut grammar, &mut routes, idl);
            }
        }

        Self { grammar, routes }
    }

    fn merge_flat(grammar: &mut Grammar, routes: &mut PrefixNode, idl: &Idl) {
        let src_root = idl.completion.root();
        let stmts = match idl.completion.node(src_root).map(|n| &n.kind) {
            Some(NodeKind::Keyword { stmts }) => stmts.clone(),
            _ => {
                debug!(topic = %idl.topic, "skipping flat idl without keyword root");
                return;
            }
        };
        let offset = grammar.import(&idl.completion);
        for (kw, child) in stmts {
            let child = NodeId(child.0 + offset);
            if let Some(Node {
                kind: NodeKind::Keyword { stmts },
                ..
            }) = grammar.node_mut(grammar.root())
            {
                stmts.insert(kw.clone(), child);
            }
            routes.descend(&kw).route = Some(Route::for_idl(idl, true));
        }
    }

    fn merge_nested(grammar: &mut Grammar, routes: &mut PrefixNode, idl: &Idl) {
        let segments: Vec<&str> = idl.topic.split('/').collect();
        let (last, spine) = match segments.split_last() {
            Some(split) => split,
            None => return,
        };

        let mut cursor = grammar.root();
        for segment in spine {
            let existing = match grammar.node(cursor).map(|n| &n.kind) {
                Some(NodeKind::Keyword { stmts }) => stmts.get(*segment).copied(),
                _ => {
                    debug!(topic = %idl.topic, "skipping idl blocked by non-keyword spine node");
                    return;
                }
            };
            cursor = match existing {
                Some(child) => child,
                None => {
                    let child = grammar.alloc(Node::keyword::<String>([]));
                    if let Some(Node {
                        kind: NodeKind::Keyword { stmts },
                        ..
                    }) = grammar.node_mut(cursor)
                    {
                        stmts.insert(segment.to_string(), child);
                    }
                    child
                }
            };
        }
        if !matches!(
            grammar.node(cursor).map(|n| &n.kind),
            Some(NodeKind::Keyword { .. })
        ) {
            debug!(topic = %idl.topic, "skipping idl blocked by non-keyword spine node");
            return;
        }

        let offset = grammar.import(&idl.completion);
        let attached = NodeId(idl.completion.root().0 + offset);
        if let Some(Node {
            kind: NodeKind::Keyword { stmts },
            ..
        }) = grammar.node_mut(cursor)
        {
            stmts.insert(last.to_string(), attached);
        }

        let mut trie = routes;
        for segment in spine {
            trie = trie.descend(segment);
        }
        trie.descend(last).route = Some(Route::for_idl(idl, false));
    }
}
