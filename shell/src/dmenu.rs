//! Textual menu-tree export of all leaf commands.
//!
//! Walks the composed grammar's keyword spine and emits, for every leaf
//! whose command line decodes to a routable dispatch, a `mosquitto_pub`
//! invocation reproducing it. Nested keyword groups are bracketed with
//! `:push`/`:pop` markers for menu frontends.

use std::collections::HashSet;

use unicorn_core::{Language, NodeId, NodeKind, decode_command};

pub fn render(language: &Language, host: &str) -> String {
    let mut visited = HashSet::new();
    walk(
        language,
        language.grammar.root(),
        &mut visited,
        &mut Vec::new(),
        host,
    )
}

fn walk(
    language: &Language,
    id: NodeId,
    visited: &mut HashSet<NodeId>,
    cmdline: &mut Vec<String>,
    host: &str,
) -> String {
    // Each node renders once; recursive grammars terminate here.
    if !visited.insert(id) {
        return String::new();
    }
    let node = match language.grammar.node(id) {
        Some(node) => node,
        None => return String::new(),
    };
    match &node.kind {
        NodeKind::Empty => {
            let line = match shlex::try_join(cmdline.iter().map(String::as_str)) {
                Ok(line) => line,
                Err(_) => return String::new(),
            };
            match decode_command(&line, &language.routes) {
                Some(dispatch) => {
                    let invocation = shlex::try_join([
                        "mosquitto_pub",
                        "-h",
                        host,
                        "-t",
                        &dispatch.topic,
                        "-m",
                        &dispatch.payload,
                    ]);
                    match invocation {
                        Ok(invocation) => format!(":output {invocation}\n"),
                        Err(_) => String::new(),
                    }
                }
                None => String::new(),
            }
        }
        NodeKind::Keyword { stmts } => {
            let mut out = String::new();
            for (keyword, &child) in stmts {
                cmdline.push(keyword.clone());
                let sub = walk(language, child, visited, cmdline, host);
                cmdline.pop();
                if !sub.is_empty() {
                    out.push_str(keyword);
                    out.push('\n');
                    out.push_str(&sub);
                }
            }
            if !out.is_empty() && !cmdline.is_empty() {
                format!(":push\n{out}:pop\n")
            } else {
                out
            }
        }
        // Free-form arguments cannot be enumerated into a static menu.
        _ => String::new(),
    }
}
