//! Typed filter for partial policy loads.
//!
//! # Purpose
//! Lets callers load only the rules relevant to one tenant or subject instead of
//! the whole rule table.
//!
//! # Key invariants
//! - Matching is positional per section and an empty value is a wildcard.
//! - Rules whose `ptype` is neither `p*` nor `g*` are never filtered out.
//! - An enforcer loaded through a filter holds a partial rule set; saving the
//!   whole policy back from it is refused by the engine.
use casbin::Filter;

/// Owned filter for partial policy loads.
///
/// Values are positional: `p[i]` must equal field `v{i}` of a `p`-type rule and
/// `g[i]` field `v{i}` of a `g`-type rule. An empty string matches anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicyFilter {
    pub p: Vec<String>,
    pub g: Vec<String>,
}

impl PolicyFilter {
    /// A filter that matches every rule.
    pub fn new() -> Self {
        Self::default()
    }

    /// Positional values for `p`-type rules (`v0`, `v1`, ...).
    pub fn with_policy<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.p = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Positional values for `g`-type rules.
    pub fn with_grouping<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.g = fields.into_iter().map(Into::into).collect();
        self
    }

    /// True when every value is a wildcard, so the filter keeps all rules.
    pub fn is_empty(&self) -> bool {
        self.p.iter().chain(&self.g).all(String::is_empty)
    }

    /// Borrowed view in the shape the engine's filtered load expects.
    pub fn as_casbin(&self) -> Filter<'_> {
        Filter {
            p: self.p.iter().map(String::as_str).collect(),
            g: self.g.iter().map(String::as_str).collect(),
        }
    }
}

impl From<Filter<'_>> for PolicyFilter {
    fn from(filter: Filter<'_>) -> Self {
        Self {
            p: filter.p.into_iter().map(str::to_string).collect(),
            g: filter.g.into_iter().map(str::to_string).collect(),
        }
    }
}
