//! Key tree bookkeeping for [`super::MemoryStore`]

use super::{Entry, State};
use crate::models::{Action, Node, WatchEvent};
use std::collections::BTreeMap;

pub(crate) fn is_under(key: &str, dir: &str) -> bool {
    let dir = dir.trim_end_matches('/');
    key.len() > dir.len() && key.starts_with(dir) && key.as_bytes()[dir.len()] == b'/'
}

pub(crate) fn leaf(key: &str, entry: &Entry) -> Node {
    Node {
        key: key.to_string(),
        value: Some(entry.value.clone()),
        created_index: entry.created_index,
        modified_index: entry.modified_index,
        ttl: entry.ttl.and_then(|ttl| i64::try_from(ttl).ok()),
        ..Default::default()
    }
}

/// Direct children of `dir`; deeper keys collapse into directory nodes.
pub(crate) fn children(state: &State, dir: &str) -> Vec<Node> {
    let base = dir.trim_end_matches('/');
    let mut nodes: BTreeMap<String, Node> = BTreeMap::new();

    for (key, entry) in state.entries.iter().filter(|(key, _)| is_under(key, base)) {
        let rest = &key[base.len() + 1..];
        match rest.split_once('/') {
            None => {
                nodes.insert(key.clone(), leaf(key, entry));
            }
            Some((child, _)) => {
                let child_key = format!("{}/{}", base, child);
                nodes.entry(child_key.clone()).or_insert_with(|| Node {
                    key: child_key,
                    dir: true,
                    ..Default::default()
                });
            }
        }
    }

    nodes.into_values().collect()
}

pub(crate) fn write(state: &mut State, key: &str, value: &str, ttl: Option<u64>, action: Action) -> WatchEvent {
    state.index += 1;
    let index = state.index;
    let created_index = match state.entries.get(key) {
        Some(existing) if action != Action::Create => existing.created_index,
        _ => index,
    };
    let entry = Entry {
        value: value.to_string(),
        created_index,
        modified_index: index,
        ttl,
    };
    let event = WatchEvent {
        action,
        node: leaf(key, &entry),
    };
    state.entries.insert(key.to_string(), entry);
    state.history.push(event.clone());
    event
}

pub(crate) fn remove(state: &mut State, key: &str, action: Action) -> Option<WatchEvent> {
    let entry = state.entries.remove(key)?;
    state.index += 1;
    let event = WatchEvent {
        action,
        node: Node {
            key: key.to_string(),
            created_index: entry.created_index,
            modified_index: state.index,
            ..Default::default()
        },
    };
    state.history.push(event.clone());
    Some(event)
}

pub(crate) fn first_event(state: &State, key: &str, wait_index: u64) -> Option<WatchEvent> {
    state
        .history
        .iter()
        .find(|event| event.node.key == key && event.index() >= wait_index)
        .cloned()
}
