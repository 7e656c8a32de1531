//! Topics: slash-separated message addresses
//!
//! A topic is a nonempty ordered sequence of nonempty path components.
//! Subscriptions match by component-wise prefix. Each data store derives
//! two topics from its name: `<name>/master` carries commands from clones
//! to the master, `<name>/clone` carries commands from the master to its
//! clones.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Separator between topic components.
pub const SEP: char = '/';

/// Last component of a store's master-bound topic.
pub const MASTER_SUFFIX: &str = "master";

/// Last component of a store's clone-bound topic.
pub const CLONE_SUFFIX: &str = "clone";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TopicError {
    #[error("topic must have at least one component")]
    Empty,

    #[error("topic component must be nonempty")]
    EmptyComponent,
}

/// A validated topic.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Topic {
    components: Vec<String>,
}

impl Topic {
    /// Build a topic from pre-split components.
    pub fn from_components<I, S>(components: I) -> Result<Self, TopicError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let components: Vec<String> = components.into_iter().map(Into::into).collect();
        if components.is_empty() {
            return Err(TopicError::Empty);
        }
        if components.iter().any(|c| c.is_empty() || c.contains(SEP)) {
            return Err(TopicError::EmptyComponent);
        }
        Ok(Self { components })
    }

    pub fn components(&self) -> &[String] {
        &self.components
    }

    /// Append one component, yielding a derived topic.
    pub fn join(&self, component: &str) -> Result<Self, TopicError> {
        let mut components = self.components.clone();
        components.push(component.to_string());
        Self::from_components(components)
    }

    /// The master-bound topic for a store name.
    pub fn master_for(store: &str) -> Result<Self, TopicError> {
        Self::from_str(store)?.join(MASTER_SUFFIX)
    }

    /// The clone-bound topic for a store name.
    pub fn clones_for(store: &str) -> Result<Self, TopicError> {
        Self::from_str(store)?.join(CLONE_SUFFIX)
    }

    /// Component-wise prefix test: does `self` fall under `filter`?
    pub fn starts_with(&self, filter: &Topic) -> bool {
        filter.components.len() <= self.components.len()
            && self.components[..filter.components.len()] == filter.components[..]
    }
}

impl FromStr for Topic {
    type Err = TopicError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // A leading slash is tolerated; empty inner components are not.
        let trimmed = s.strip_prefix(SEP).unwrap_or(s);
        if trimmed.is_empty() {
            return Err(TopicError::Empty);
        }
        Self::from_components(trimmed.split(SEP))
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.components.join("/"))
    }
}

impl fmt::Debug for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Topic({})", self)
    }
}
