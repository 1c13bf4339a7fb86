//! Durable component addressing.
//!
//! A locator names a component by network, section key, and position within
//! the section. Unlike arena handles it survives serialization, so
//! persisted trees and cross-tree references use locators.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FittingLocator {
    pub network: String,
    pub section_key: String,
    /// Zero-based position, counted from the trunk end outward.
    pub index_in_section: usize,
}

impl FittingLocator {
    pub fn new(network: impl Into<String>, section_key: impl Into<String>) -> Self {
        Self {
            network: network.into(),
            section_key: section_key.into(),
            index_in_section: 0,
        }
    }

    /// Copy network and section from `other`, keeping our index.
    pub fn match_section(&mut self, other: &FittingLocator) {
        self.network = other.network.clone();
        self.section_key = other.section_key.clone();
    }

    pub fn is_in_same_section(&self, other: &FittingLocator) -> bool {
        self.network == other.network && self.section_key == other.section_key
    }
}

impl fmt::Display for FittingLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}[{}]",
            self.network, self.section_key, self.index_in_section
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn match_section_keeps_index() {
        let mut a = FittingLocator::new("net", "0,1");
        a.index_in_section = 4;
        let b = FittingLocator::new("other", "0");
        a.match_section(&b);
        assert_eq!(a.network, "other");
        assert_eq!(a.section_key, "0");
        assert_eq!(a.index_in_section, 4);
        assert!(a.is_in_same_section(&b));
    }
}
