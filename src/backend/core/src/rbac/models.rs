//! RBAC data models: policy rules, grouping relations, persisted rows and decisions.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Result, WardenError};

// ═══════════════════════════════════════════════════════════════════════════════
// Well-known names
// ═══════════════════════════════════════════════════════════════════════════════

/// Domain used for resources that do not belong to any tenant.
pub const GLOBAL_DOMAIN: &str = "main";

/// Role granted to a subject the first time it is provisioned in a domain.
pub const DEFAULT_ROLE: &str = "reader";

/// Placeholder role marking an invited but not yet accepted subject.
pub const INVITE_ROLE: &str = "invite";

// ═══════════════════════════════════════════════════════════════════════════════
// Policy Rule
// ═══════════════════════════════════════════════════════════════════════════════

/// A granted permission: members of `role` may perform `action` on objects
/// matching `object` inside `domain`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PolicyRule {
    pub role: String,
    pub domain: String,
    /// Path pattern, interpreted by the model's object matcher.
    pub object: String,
    /// HTTP-style verb, compared exactly.
    pub action: String,
}

impl PolicyRule {
    pub fn new(
        role: impl Into<String>,
        domain: impl Into<String>,
        object: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            role: role.into(),
            domain: domain.into(),
            object: object.into(),
            action: action.into(),
        }
    }
}

impl fmt::Display for PolicyRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "p, {}, {}, {}, {}",
            self.role, self.domain, self.object, self.action
        )
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Grouping Relation
// ═══════════════════════════════════════════════════════════════════════════════

/// A "member of" edge in one domain's role graph. `member` is either a
/// subject or another role.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Grouping {
    pub member: String,
    pub role: String,
    pub domain: String,
}

impl Grouping {
    pub fn new(
        member: impl Into<String>,
        role: impl Into<String>,
        domain: impl Into<String>,
    ) -> Self {
        Self {
            member: member.into(),
            role: role.into(),
            domain: domain.into(),
        }
    }
}

impl fmt::Display for Grouping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "g, {}, {}, {}", self.member, self.role, self.domain)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Persisted rows
// ═══════════════════════════════════════════════════════════════════════════════

/// One persisted row of the rule store: either a `p` or a `g` line.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "ptype", rename_all = "lowercase")]
pub enum RuleLine {
    #[serde(rename = "p")]
    Policy(PolicyRule),
    #[serde(rename = "g")]
    Grouping(Grouping),
}

impl RuleLine {
    /// Row discriminator as stored (`"p"` or `"g"`).
    pub fn ptype(&self) -> &'static str {
        match self {
            Self::Policy(_) => "p",
            Self::Grouping(_) => "g",
        }
    }

    /// The four value columns `v0..v3`; grouping rows leave `v3` empty.
    pub fn values(&self) -> [&str; 4] {
        match self {
            Self::Policy(p) => [&p.role, &p.domain, &p.object, &p.action],
            Self::Grouping(g) => [&g.member, &g.role, &g.domain, ""],
        }
    }

    /// Rebuild a row from its columns.
    pub fn from_columns(ptype: &str, values: &[&str]) -> Result<Self> {
        let field = |i: usize| values.get(i).map(|v| v.trim()).unwrap_or("");
        let non_empty = |n: usize| (0..n).all(|i| !field(i).is_empty());

        match ptype.trim() {
            "p" if non_empty(4) => Ok(Self::Policy(PolicyRule::new(
                field(0),
                field(1),
                field(2),
                field(3),
            ))),
            "g" if non_empty(3) => Ok(Self::Grouping(Grouping::new(
                field(0),
                field(1),
                field(2),
            ))),
            other => Err(WardenError::store_corrupted(format!(
                "unrecognised rule row: ptype={other:?} values={values:?}"
            ))),
        }
    }

    /// Columns as written to a CSV row: the ptype followed by the values.
    /// Grouping rows have no trailing empty column.
    pub fn columns(&self) -> Vec<&str> {
        let mut columns = vec![self.ptype()];
        match self {
            Self::Policy(p) => columns.extend([&*p.role, &*p.domain, &*p.object, &*p.action]),
            Self::Grouping(g) => columns.extend([&*g.member, &*g.role, &*g.domain]),
        }
        columns
    }

    /// Reject values a row cannot hold: empty fields, surrounding
    /// whitespace, or control characters.
    pub fn validate(&self) -> Result<()> {
        let names: &[&str] = match self {
            Self::Policy(_) => &["role", "domain", "object", "action"],
            Self::Grouping(_) => &["member", "role", "domain"],
        };
        for (what, value) in names.iter().zip(self.values()) {
            if value.is_empty() {
                return Err(WardenError::validation(format!("{what} must not be empty")));
            }
            if value.trim() != value {
                return Err(WardenError::validation(format!(
                    "{what} must not start or end with whitespace"
                )));
            }
            if value.chars().any(char::is_control) {
                return Err(WardenError::validation(format!(
                    "{what} must not contain control characters"
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Display for RuleLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Policy(p) => p.fmt(f),
            Self::Grouping(g) => g.fmt(f),
        }
    }
}

impl From<PolicyRule> for RuleLine {
    fn from(rule: PolicyRule) -> Self {
        Self::Policy(rule)
    }
}

impl From<Grouping> for RuleLine {
    fn from(grouping: Grouping) -> Self {
        Self::Grouping(grouping)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Decision
// ═══════════════════════════════════════════════════════════════════════════════

/// Result of an enforcement check. A deny is an expected outcome, not an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "lowercase")]
pub enum Decision {
    /// Allowed by the given rule.
    Allow { rule: PolicyRule },
    /// Denied, with a reason.
    Deny { reason: String },
}

impl Decision {
    pub fn deny(reason: impl Into<String>) -> Self {
        Self::Deny {
            reason: reason.into(),
        }
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow { .. })
    }

    pub fn is_denied(&self) -> bool {
        matches!(self, Self::Deny { .. })
    }

    /// The rule that granted access, if any.
    pub fn matched_rule(&self) -> Option<&PolicyRule> {
        match self {
            Self::Allow { rule } => Some(rule),
            Self::Deny { .. } => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Allow { .. } => "allow",
            Self::Deny { .. } => "deny",
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
