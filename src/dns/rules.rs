//! Rewrite rules: exact and `*.suffix` domain patterns mapped to IPv4 answers.

use crate::config::RecordConfig;
use crate::dns::wire::parse_ip;
use crate::error::DnsError;
use std::collections::HashMap;

/// Immutable set of rewrite rules.
///
/// Exact patterns live in a hash map. Wildcards are kept in insertion order
/// and the first matching wildcard wins. A repeated pattern keeps its original
/// position and takes the last address written for it.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    exact: HashMap<String, u32>,
    wildcards: Vec<(String, u32)>,
    case_insensitive: bool,
}

impl RuleSet {
    pub fn new(case_insensitive: bool) -> Self {
        RuleSet {
            exact: HashMap::new(),
            wildcards: Vec::new(),
            case_insensitive,
        }
    }

    /// Build from configured records, parsing each address with [`parse_ip`]
    pub fn from_records(records: &[RecordConfig], case_insensitive: bool) -> Result<Self, DnsError> {
        let mut rules = RuleSet::new(case_insensitive);
        for record in records {
            rules.insert(&record.domain, parse_ip(&record.ip)?);
        }
        Ok(rules)
    }

    /// Add a pattern. Only used while building the set.
    pub fn insert(&mut self, pattern: &str, addr: u32) {
        let pattern = self.normalize(pattern);

        match pattern.strip_prefix("*.") {
            Some(suffix) => {
                if let Some(slot) = self.wildcards.iter_mut().find(|(s, _)| s == suffix) {
                    slot.1 = addr;
                } else {
                    self.wildcards.push((suffix.to_string(), addr));
                }
            }
            None => {
                self.exact.insert(pattern, addr);
            }
        }
    }

    /// Look up the answer for a query name.
    ///
    /// A wildcard `*.suffix` matches names strictly longer than `suffix` that
    /// end with it, so `suffix` alone never matches its own wildcard.
    pub fn lookup(&self, name: &str) -> Option<u32> {
        let name = self.normalize(name);

        if let Some(addr) = self.exact.get(&name) {
            return Some(*addr);
        }

        self.wildcards
            .iter()
            .find(|(suffix, _)| name.len() > suffix.len() && name.ends_with(suffix.as_str()))
            .map(|(_, addr)| *addr)
    }

    /// Number of distinct patterns
    pub fn len(&self) -> usize {
        self.exact.len() + self.wildcards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn normalize(&self, name: &str) -> String {
        let name = name.trim_end_matches('.');
        if self.case_insensitive {
            name.to_ascii_lowercase()
        } else {
            name.to_string()
        }
    }
}
