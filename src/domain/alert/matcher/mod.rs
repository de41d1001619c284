//! Node-to-alert matching.
//!
//! Two engines implement [`NodeMatcher`]:
//! - [`label_matcher::LabelMatcherTemplate`]: a template rendered per node into
//!   a comma-separated list of label matchers (`=`, `!=`, `=~`, `!~`), OR'd.
//! - [`expression::MatchExpression`]: a boolean expression over the alert's
//!   labels and the node identity.
//!
//! Both see the same two variables, `FullName` and `ShortName`.

pub mod expression;
pub mod label_matcher;

use serde::Serialize;

use crate::domain::alert::alert_record::Labels;
use crate::errors::MatchError;

/// Identity variables available to match expressions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct NodeIdentity {
    pub full_name: String,
    pub short_name: String,
}

impl NodeIdentity {
    pub fn new(full_name: &str) -> Self {
        let short_name = full_name.split('.').next().unwrap_or(full_name);
        Self {
            full_name: full_name.to_string(),
            short_name: short_name.to_string(),
        }
    }
}

/// A matcher bound to one node, tested against each cached alert.
pub trait LabelPredicate: Send + Sync {
    fn test(&self, labels: &Labels) -> Result<bool, MatchError>;
}

/// Decides which alerts apply to which node.
pub trait NodeMatcher: Send + Sync {
    /// Binds the matcher to a node. Per-node work (template rendering, regex
    /// compilation) happens once here rather than once per alert.
    fn bind<'a>(&'a self, node: &NodeIdentity) -> Result<Box<dyn LabelPredicate + 'a>, MatchError>;
}
