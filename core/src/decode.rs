//! Mapping a command line to a bus dispatch.
//!
//! The decoder walks the prefix trie along the line's shell words and
//! remembers every routable node it passes; the longest one wins. The
//! payload is the remainder of the raw line, starting either at the
//! matched keyword (`include_head`) or right after it, with surrounding
//! whitespace trimmed.

use uuid::Uuid;

use crate::registry::{PrefixNode, Route};
use crate::token::Scanner;

/// A decoded command ready to publish.
#[derive(Debug, Clone)]
pub struct Dispatch {
    pub route: Route,
    /// Publish topic; the route's topic plus the ad-hoc suffix, if any.
    pub topic: String,
    pub payload: String,
    /// `"/<uuid>"` when the route uses ad-hoc channels, else empty. The
    /// same suffix must be appended to the route's response topics.
    pub suffix: String,
}

/// Decode `line` against the routing trie. Returns `None` when no routable
/// prefix matches.
pub fn decode_command(line: &str, routes: &PrefixNode) -> Option<Dispatch> {
    let mut node = routes;
    let mut longest: Option<(usize, usize, &Route)> = None;

    for word in Scanner::new(line) {
        node = match node.children.get(&word.text) {
            Some(child) => child,
            None => break,
        };
        if let Some(route) = &node.route {
            longest = Some((word.start, word.end, route));
        }
    }

    let (before, after, route) = longest?;
    let cut = if route.include_head { before } else { after };
    let payload = line[cut..].trim().to_string();

    let (topic, suffix) = if route.ad_hoc_channels {
        let suffix = format!("/{}", Uuid::new_v4());
        (format!("{}{}", route.topic, suffix), suffix)
    } else {
        (route.topic.clone(), String::new())
    };

    Some(Dispatch {
        route: route.clone(),
        topic,
        payload,
        suffix,
    })
}
