//! Reassembles complete tool invocations from streamed fragments.

use std::collections::HashMap;

use serde_json::json;
use tracing::warn;

use rankpilot_core::conversation::ToolInvocation;

/// Rebuilds tool invocations from start / argument-fragment / end chunks.
///
/// Entries are keyed by the vendor-issued id, with positional lookup for
/// vendors that omit ids on fragments. Fragments append in arrival order and
/// are never interleaved across ids. An entry becomes immutable once its end
/// signal is observed; entries still open when the stream ends are finalized
/// rather than dropped.
#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    entries: Vec<Entry>,
    by_id: HashMap<String, usize>,
}

#[derive(Debug)]
struct Entry {
    id: String,
    name: String,
    raw: String,
    parsed: Option<serde_json::Value>,
}

impl ToolCallAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Open a new entry for a call id.
    pub fn start(&mut self, id: &str, name: &str) {
        if self.by_id.contains_key(id) {
            warn!(id, "Duplicate tool call id, ignoring start");
            return;
        }
        self.by_id.insert(id.to_string(), self.entries.len());
        self.entries.push(Entry {
            id: id.to_string(),
            name: name.to_string(),
            raw: String::new(),
            parsed: None,
        });
    }

    /// Append an argument fragment by vendor id.
    pub fn append(&mut self, id: &str, fragment: &str) {
        match self.by_id.get(id).copied() {
            Some(slot) => self.append_slot(slot, fragment),
            None => warn!(id, "Argument fragment for unknown tool call"),
        }
    }

    /// Append by response position, for fragments that carry no id.
    pub fn append_at(&mut self, position: usize, fragment: &str) {
        if position < self.entries.len() {
            self.append_slot(position, fragment);
        } else {
            warn!(position, "Argument fragment for unknown position");
        }
    }

    /// Seal an entry: parse the concatenated fragments as the argument
    /// object. Unparseable arguments degrade to an empty object — a degraded
    /// tool call beats losing the round.
    pub fn finish(&mut self, id: &str) {
        if let Some(slot) = self.by_id.get(id).copied() {
            self.finish_slot(slot);
        }
    }

    /// Finalize any still-open entries and return all invocations in start
    /// order.
    pub fn finish_all(&mut self) -> Vec<ToolInvocation> {
        for slot in 0..self.entries.len() {
            self.finish_slot(slot);
        }
        self.entries
            .iter()
            .map(|e| ToolInvocation {
                id: e.id.clone(),
                name: e.name.clone(),
                arguments: e.parsed.clone().unwrap_or_else(|| json!({})),
            })
            .collect()
    }

    fn append_slot(&mut self, slot: usize, fragment: &str) {
        let entry = &mut self.entries[slot];
        if entry.parsed.is_some() {
            warn!(id = %entry.id, "Argument fragment after finalization, dropping");
            return;
        }
        entry.raw.push_str(fragment);
    }

    fn finish_slot(&mut self, slot: usize) {
        let entry = &mut self.entries[slot];
        if entry.parsed.is_some() {
            return;
        }
        entry.parsed = Some(parse_arguments(&entry.id, &entry.name, &entry.raw));
    }
}

fn parse_arguments(id: &str, name: &str, raw: &str) -> serde_json::Value {
    if raw.trim().is_empty() {
        return json!({});
    }
    match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(e) => {
            warn!(id, tool = name, %e, "Unparseable tool arguments, degrading to empty object");
            json!({})
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concatenates_fragments_in_arrival_order() {
        let mut acc = ToolCallAccumulator::new();
        acc.start("call_1", "gsc_query");
        acc.append("call_1", "{\"type\":");
        acc.append("call_1", "\"declining\"");
        acc.append("call_1", "}");
        acc.finish("call_1");

        let calls = acc.finish_all();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].arguments, json!({"type": "declining"}));
    }

    #[test]
    fn fragments_never_interleave_across_ids() {
        let mut acc = ToolCallAccumulator::new();
        acc.start("a", "gsc_query");
        acc.start("b", "crawl_page");
        acc.append("a", "{\"type\":");
        acc.append("b", "{\"url\":");
        acc.append("a", "\"top\"}");
        acc.append("b", "\"https://example.com\"}");

        let calls = acc.finish_all();
        assert_eq!(calls[0].arguments, json!({"type": "top"}));
        assert_eq!(calls[1].arguments, json!({"url": "https://example.com"}));
    }

    #[test]
    fn parse_failure_degrades_to_empty_object() {
        let mut acc = ToolCallAccumulator::new();
        acc.start("call_1", "gsc_query");
        acc.append("call_1", "{broken json");
        acc.finish("call_1");

        let calls = acc.finish_all();
        assert_eq!(calls[0].arguments, json!({}));
    }

    #[test]
    fn no_fragments_yields_empty_object() {
        let mut acc = ToolCallAccumulator::new();
        acc.start("call_1", "list_pages");

        let calls = acc.finish_all();
        assert_eq!(calls[0].arguments, json!({}));
    }

    #[test]
    fn open_entries_finalize_on_stream_end() {
        // No explicit finish: the stream ended with the call still open
        let mut acc = ToolCallAccumulator::new();
        acc.start("call_1", "gsc_query");
        acc.append("call_1", "{\"type\":\"top\"}");

        let calls = acc.finish_all();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].arguments, json!({"type": "top"}));
    }

    #[test]
    fn fragments_after_finalization_are_dropped() {
        let mut acc = ToolCallAccumulator::new();
        acc.start("call_1", "gsc_query");
        acc.append("call_1", "{\"type\":\"top\"}");
        acc.finish("call_1");
        acc.append("call_1", "garbage");

        let calls = acc.finish_all();
        assert_eq!(calls[0].arguments, json!({"type": "top"}));
    }

    #[test]
    fn position_lookup_reaches_the_same_entry() {
        let mut acc = ToolCallAccumulator::new();
        acc.start("call_1", "gsc_query");
        acc.append_at(0, "{\"type\":\"top\"}");

        let calls = acc.finish_all();
        assert_eq!(calls[0].arguments, json!({"type": "top"}));
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let mut acc = ToolCallAccumulator::new();
        acc.append("ghost", "{}");
        acc.append_at(3, "{}");
        assert!(acc.is_empty());
    }
}
