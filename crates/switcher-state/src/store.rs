//! Nested keyed state store (C3).
//!
//! Backed by a `serde_json::Value` tree. Paths are dot-separated; an index
//! segment addresses a keyed child the same way the descriptor loader's
//! reindexed containers are keyed (by the string form of their `index`/`id`
//! attribute), e.g. `"MixEffectBlocks.0.Program.input"`.

use serde_json::{Map, Value};

/// The switcher's process-wide nested state tree.
///
/// Carries no protocol knowledge of its own; the command registry (C4)
/// assigns meaning to the paths it reads and writes.
#[derive(Debug, Clone, Default)]
pub struct StateStore {
    root: Value,
}

impl StateStore {
    /// Wrap an already-built tree (typically the output of the descriptor
    /// loader).
    #[must_use]
    pub fn new(root: Value) -> Self {
        Self { root }
    }

    /// An empty store with an object root.
    #[must_use]
    pub fn empty() -> Self {
        Self { root: Value::Object(Map::new()) }
    }

    /// Build a dotted path addressing `MixEffectBlocks[me].<rest>`.
    #[must_use]
    pub fn me_path(me: u8, rest: &str) -> String {
        format!("MixEffectBlocks.{me}.{rest}")
    }

    /// Read the value at `path`, or `None` if any segment is missing.
    #[must_use]
    pub fn get<'a>(&'a self, path: &str) -> Option<&'a Value> {
        let mut cur = &self.root;
        for segment in path.split('.') {
            cur = cur.as_object()?.get(segment)?;
        }
        Some(cur)
    }

    /// Read a string value at `path`.
    #[must_use]
    pub fn get_str(&self, path: &str) -> Option<&str> {
        self.get(path)?.as_str()
    }

    /// Read a decimal-numeric-string value at `path` and parse it.
    #[must_use]
    pub fn get_u32(&self, path: &str) -> Option<u32> {
        self.get_str(path)?.parse().ok()
    }

    /// Number of entries in the object at `path` (used for input counts).
    #[must_use]
    pub fn count(&self, path: &str) -> usize {
        self.get(path).and_then(Value::as_object).map_or(0, Map::len)
    }

    /// Configured mix-effect block indices, ascending, parsed from the
    /// string keys `load_descriptor` (C10) re-indexed `MixEffectBlocks` by.
    #[must_use]
    pub fn me_indices(&self) -> Vec<u8> {
        let mut indices: Vec<u8> = self
            .get("MixEffectBlocks")
            .and_then(Value::as_object)
            .map(|blocks| blocks.keys().filter_map(|key| key.parse().ok()).collect())
            .unwrap_or_default();
        indices.sort_unstable();
        indices
    }

    /// Set `path` to `value`, creating intermediate objects as needed.
    pub fn set(&mut self, path: &str, value: Value) {
        let segments: Vec<&str> = path.split('.').collect();
        let Some((last, parents)) = segments.split_last() else { return };

        let mut cur = &mut self.root;
        for segment in parents {
            if !cur.is_object() {
                *cur = Value::Object(Map::new());
            }
            let map = cur.as_object_mut().expect("just normalized to an object");
            cur = map.entry((*segment).to_string()).or_insert_with(|| Value::Object(Map::new()));
        }
        if !cur.is_object() {
            *cur = Value::Object(Map::new());
        }
        cur.as_object_mut().expect("just normalized to an object").insert((*last).to_string(), value);
    }

    /// Convenience wrapper storing a decimal-numeric string, the shape used
    /// for `Program.input`, `Preview.input`, and `transitionPosition`.
    pub fn set_numeric_str(&mut self, path: &str, value: impl std::fmt::Display) {
        self.set(path, Value::String(value.to_string()));
    }
}
