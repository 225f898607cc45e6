//! query.rs
//! Child lookup criteria for `NodeRegistry::find_child` / `find_children`.

use super::kind::NodeTypeId;
use crate::value::Value;
use regex::Regex;

/// Builder describing which descendants match. An empty query matches the
/// first child of any type, searched recursively.
#[derive(Debug, Clone)]
pub struct ChildQuery {
    pub(crate) type_id: NodeTypeId,
    pub(crate) name: Option<String>,
    pub(crate) pattern: Option<Regex>,
    pub(crate) properties: Vec<(String, Value)>,
    pub(crate) recursive: bool,
}

impl Default for ChildQuery {
    fn default() -> Self {
        Self {
            type_id: NodeTypeId::NODE,
            name: None,
            pattern: None,
            properties: Vec::new(),
            recursive: true,
        }
    }
}

impl ChildQuery {
    pub fn new() -> Self { Self::default() }

    pub fn of_type(mut self, id: NodeTypeId) -> Self {
        self.type_id = id;
        self
    }

    /// Exact name filter. An empty name is a wildcard.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.name = (!name.is_empty()).then_some(name);
        self
    }

    /// Whole-name regular expression filter.
    pub fn matching(mut self, pattern: &str) -> Result<Self, regex::Error> {
        self.pattern = Some(Regex::new(&format!("^(?:{})$", pattern))?);
        Ok(self)
    }

    /// Every added property must compare equal on the candidate.
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.push((key.into(), value.into()));
        self
    }

    pub fn direct_only(mut self) -> Self {
        self.recursive = false;
        self
    }

    pub(crate) fn accepts_name(&self, name: &str) -> bool {
        if let Some(expected) = &self.name {
            if expected != name { return false; }
        }
        self.pattern.as_ref().map_or(true, |re| re.is_match(name))
    }
}
