//! Static system-service ACL rules.

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};

use crate::routing::topic::topic_matches;

use super::decision::Access;

/// Permission a static rule grants on matching topics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RulePermission {
    Read,
    Write,
    ReadWrite,
    Deny,
}

impl RulePermission {
    pub fn grants(&self, access: Access) -> bool {
        match self {
            RulePermission::Read => access == Access::Subscribe,
            RulePermission::Write => access == Access::Publish,
            RulePermission::ReadWrite => true,
            RulePermission::Deny => false,
        }
    }
}

/// One `(prefix, filter, permission)` row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemRule {
    /// Matched against the start of the caller's username or client id.
    pub prefix: String,
    pub filter: String,
    pub permission: RulePermission,
}

impl SystemRule {
    pub fn new(prefix: &str, filter: &str, permission: RulePermission) -> Self {
        Self {
            prefix: prefix.to_string(),
            filter: filter.to_string(),
            permission,
        }
    }

    pub fn applies_to(&self, identifiers: &[&str], topic: &str) -> bool {
        identifiers.iter().any(|id| id.starts_with(&self.prefix)) && topic_matches(&self.filter, topic)
    }
}

lazy_static! {
    static ref DEFAULT_SYSTEM_RULES: Vec<SystemRule> = vec![
        SystemRule::new("ares-server", "ares4/#", RulePermission::ReadWrite),
        SystemRule::new("ares-server", "ares/#", RulePermission::ReadWrite),
        SystemRule::new("ares-bridge", "ares4/+/telemetry/#", RulePermission::Read),
        SystemRule::new("ares-bridge", "ares4/+/images/#", RulePermission::Read),
        SystemRule::new("ares-monitor", "$SYS/#", RulePermission::Read),
    ];
}

/// The built-in system-service table.
pub fn default_system_rules() -> Vec<SystemRule> {
    DEFAULT_SYSTEM_RULES.clone()
}

/// First rule applying to the caller and topic, in table order.
pub fn find_system_rule<'a>(
    rules: &'a [SystemRule],
    identifiers: &[&str],
    topic: &str,
) -> Option<&'a SystemRule> {
    rules.iter().find(|rule| rule.applies_to(identifiers, topic))
}
