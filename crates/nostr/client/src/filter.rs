//! Subscription filters.

use nostr::Event;
use nostr::tag_parsing::any_tag_value;
use serde_json::{Map, Value, json};
use std::collections::{BTreeMap, BTreeSet};

/// Query a subscription registers with a relay.
///
/// A constraint left unset matches every event. A constraint set to an empty
/// collection matches no event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    pub kinds: Option<BTreeSet<u16>>,
    pub since: Option<u64>,
    pub tags: BTreeMap<char, BTreeSet<String>>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a kind to the `kinds` constraint.
    pub fn kind(mut self, kind: u16) -> Self {
        self.kinds.get_or_insert_with(BTreeSet::new).insert(kind);
        self
    }

    /// Replace the `kinds` constraint.
    pub fn kinds(mut self, kinds: impl IntoIterator<Item = u16>) -> Self {
        self.kinds = Some(kinds.into_iter().collect());
        self
    }

    pub fn since(mut self, since: u64) -> Self {
        self.since = Some(since);
        self
    }

    /// Constrain a single-letter tag (`#p`, `#s`, ...) to `values`.
    pub fn tag<I, S>(mut self, name: char, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags
            .insert(name, values.into_iter().map(Into::into).collect());
        self
    }

    /// Whether `event` satisfies every constraint.
    pub fn matches(&self, event: &Event) -> bool {
        if let Some(kinds) = &self.kinds
            && !kinds.contains(&event.kind)
        {
            return false;
        }
        if let Some(since) = self.since
            && event.created_at < since
        {
            return false;
        }
        self.tags.iter().all(|(name, accepted)| {
            let name = name.to_string();
            any_tag_value(&event.tags, &name, |value| accepted.contains(value))
        })
    }

    /// NIP-01 wire form: `{"kinds":[..],"since":n,"#p":[..]}`.
    pub fn to_value(&self) -> Value {
        let mut object = Map::new();
        if let Some(kinds) = &self.kinds {
            object.insert("kinds".to_string(), json!(kinds));
        }
        if let Some(since) = self.since {
            object.insert("since".to_string(), json!(since));
        }
        for (name, values) in &self.tags {
            object.insert(format!("#{name}"), json!(values));
        }
        Value::Object(object)
    }
}
