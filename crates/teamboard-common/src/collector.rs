use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Kind of data a collector produces, and the key a component uses to
/// group the collector items it displays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectorType {
    ScopeOwner,
    Feature,
    Scm,
    Build,
    Test,
}

impl CollectorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ScopeOwner => "scope_owner",
            Self::Feature => "feature",
            Self::Scm => "scm",
            Self::Build => "build",
            Self::Test => "test",
        }
    }
}

impl std::fmt::Display for CollectorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CollectorType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scope_owner" => Ok(Self::ScopeOwner),
            "feature" => Ok(Self::Feature),
            "scm" => Ok(Self::Scm),
            "build" => Ok(Self::Build),
            "test" => Ok(Self::Test),
            _ => Err(format!("Invalid collector type: {}", s)),
        }
    }
}

/// A registered polling source (one per collector task).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Collector {
    pub id: String,
    pub name: String,
    pub collector_type: CollectorType,
    pub enabled: bool,
    pub online: bool,
    /// Epoch millis of the last successful collection run, 0 if never.
    pub last_executed: i64,
    #[serde(default)]
    pub options: Map<String, Value>,
}

impl Collector {
    /// Fresh, enabled and online collector record with a new id.
    pub fn new(name: &str, collector_type: CollectorType) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            collector_type,
            enabled: true,
            online: true,
            last_executed: 0,
            options: Map::new(),
        }
    }
}

/// One thing a collector tracks: a team board, a repo branch, a build job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectorItem {
    pub id: String,
    pub collector_id: String,
    pub description: Option<String>,
    pub nice_name: Option<String>,
    pub enabled: bool,
    pub pushed: bool,
    /// Epoch millis of the last time this item was polled, 0 if never.
    pub last_updated: i64,
    #[serde(default)]
    pub options: Map<String, Value>,
}

impl CollectorItem {
    pub fn new(collector_id: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            collector_id: collector_id.to_string(),
            description: None,
            nice_name: None,
            enabled: true,
            pushed: false,
            last_updated: 0,
            options: Map::new(),
        }
    }

    /// String option value, if present.
    pub fn option_str(&self, key: &str) -> Option<&str> {
        self.options.get(key).and_then(Value::as_str)
    }

    pub fn set_option(&mut self, key: &str, value: impl Into<Value>) {
        self.options.insert(key.to_string(), value.into());
    }
}

/// A dashboard widget and the collector items it is wired to.
///
/// Each list keeps the stored order. An entry is `None` when the component
/// still references a collector item that no longer exists.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Component {
    pub id: String,
    pub name: String,
    pub owner: Option<String>,
    #[serde(default)]
    pub collector_items: BTreeMap<CollectorType, Vec<Option<CollectorItem>>>,
}

impl Component {
    pub fn new(name: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            owner: None,
            collector_items: BTreeMap::new(),
        }
    }

    pub fn add_collector_item(&mut self, collector_type: CollectorType, item: CollectorItem) {
        self.collector_items
            .entry(collector_type)
            .or_default()
            .push(Some(item));
    }

    /// First item linked under `collector_type`.
    ///
    /// `None` when the component has no items at all, no list for that type,
    /// an empty list, or a dangling first entry.
    pub fn first_item(&self, collector_type: CollectorType) -> Option<&CollectorItem> {
        self.collector_items
            .get(&collector_type)
            .and_then(|items| items.first())
            .and_then(Option::as_ref)
    }

    /// The team/board link used by the feature queries.
    pub fn scope_owner(&self) -> Option<&CollectorItem> {
        self.first_item(CollectorType::ScopeOwner)
    }

    /// Every non-dangling item linked under `collector_type`.
    pub fn items_of(&self, collector_type: CollectorType) -> impl Iterator<Item = &CollectorItem> {
        self.collector_items
            .get(&collector_type)
            .into_iter()
            .flatten()
            .filter_map(Option::as_ref)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collector_type_parses_its_own_strings() {
        for t in [
            CollectorType::ScopeOwner,
            CollectorType::Feature,
            CollectorType::Scm,
            CollectorType::Build,
            CollectorType::Test,
        ] {
            assert_eq!(t.as_str().parse::<CollectorType>().unwrap(), t);
        }
        assert!("ScopeOwner".parse::<CollectorType>().is_err());
    }

    #[test]
    fn scope_owner_is_none_without_items() {
        let component = Component::new("widget");
        assert!(component.scope_owner().is_none());
    }

    #[test]
    fn scope_owner_is_none_for_empty_list() {
        let mut component = Component::new("widget");
        component
            .collector_items
            .insert(CollectorType::ScopeOwner, Vec::new());
        assert!(component.scope_owner().is_none());
    }

    #[test]
    fn scope_owner_is_none_for_dangling_first_entry() {
        let mut component = Component::new("widget");
        let item = CollectorItem::new("c1");
        component
            .collector_items
            .insert(CollectorType::ScopeOwner, vec![None, Some(item)]);
        assert!(component.scope_owner().is_none());
    }

    #[test]
    fn scope_owner_returns_first_item() {
        let mut component = Component::new("widget");
        let first = CollectorItem::new("c1");
        let second = CollectorItem::new("c2");
        component.add_collector_item(CollectorType::ScopeOwner, first.clone());
        component.add_collector_item(CollectorType::ScopeOwner, second);
        assert_eq!(component.scope_owner(), Some(&first));
    }

    #[test]
    fn items_of_skips_dangling_entries() {
        let mut component = Component::new("widget");
        let item = CollectorItem::new("c1");
        component
            .collector_items
            .insert(CollectorType::Scm, vec![None, Some(item.clone())]);
        let items: Vec<_> = component.items_of(CollectorType::Scm).collect();
        assert_eq!(items, vec![&item]);
        assert_eq!(component.items_of(CollectorType::Test).count(), 0);
    }

    #[test]
    fn option_str_reads_string_options_only() {
        let mut item = CollectorItem::new("c1");
        item.set_option("url", "https://gitlab.example.com/team/app.git");
        item.set_option("depth", 3);
        assert_eq!(
            item.option_str("url"),
            Some("https://gitlab.example.com/team/app.git")
        );
        assert_eq!(item.option_str("depth"), None);
        assert_eq!(item.option_str("missing"), None);
    }
}
