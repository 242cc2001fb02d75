//! Policy model text and object matching.
//!
//! The grammar is fixed: requests and policies are `(sub, dom, obj, act)`,
//! groupings are `(member, role, domain)`. The only thing a model text may
//! choose is the function used to match `r.obj` against `p.obj`.

use dashmap::DashMap;
use regex::Regex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{Result, WardenError};

/// The model used when no model file is configured.
pub const DEFAULT_MODEL: &str = r#"
[request_definition]
r = sub, dom, obj, act

[policy_definition]
p = sub, dom, obj, act

[role_definition]
g = _, _, _

[policy_effect]
e = some(where (p.eft == allow))

[matchers]
m = g(r.sub, p.sub, r.dom) && r.dom == p.dom && keyMatch2(r.obj, p.obj) && r.act == p.act
"#;

const FIELDS: &str = "sub,dom,obj,act";
const ROLE_FIELDS: &str = "_,_,_";
const EFFECT: &str = "some(where(p.eft==allow))";

// ═══════════════════════════════════════════════════════════════════════════════
// Match functions
// ═══════════════════════════════════════════════════════════════════════════════

/// How a request object is compared to a policy object pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchFunction {
    /// `r.obj == p.obj`
    Exact,
    /// `keyMatch`: a trailing `*` matches any suffix.
    KeyMatch,
    /// `keyMatch2`: `*` matches anything, `:name` matches one path segment.
    KeyMatch2,
    /// `globMatch`: `*` and `?` stay within a segment, `**` crosses segments.
    Glob,
}

impl MatchFunction {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::KeyMatch => "keyMatch",
            Self::KeyMatch2 => "keyMatch2",
            Self::Glob => "globMatch",
        }
    }
}

/// Matches request objects against policy patterns, caching compiled patterns.
#[derive(Debug, Clone)]
pub struct ObjectMatcher {
    function: MatchFunction,
    compiled: Arc<DashMap<String, Option<Regex>>>,
}

impl ObjectMatcher {
    pub fn new(function: MatchFunction) -> Self {
        Self {
            function,
            compiled: Arc::new(DashMap::new()),
        }
    }

    pub fn function(&self) -> MatchFunction {
        self.function
    }

    /// Does `object` (from the request) match `pattern` (from a policy rule)?
    pub fn matches(&self, object: &str, pattern: &str) -> bool {
        match self.function {
            MatchFunction::Exact => object == pattern,
            MatchFunction::KeyMatch => key_match(object, pattern),
            MatchFunction::KeyMatch2 | MatchFunction::Glob => {
                if !pattern.contains(['*', ':', '?']) {
                    return object == pattern;
                }
                self.regex_for(pattern)
                    .map(|re| re.is_match(object))
                    .unwrap_or(false)
            }
        }
    }

    fn regex_for(&self, pattern: &str) -> Option<Regex> {
        if let Some(cached) = self.compiled.get(pattern) {
            return cached.clone();
        }
        let source = match self.function {
            MatchFunction::Glob => glob_to_regex(pattern),
            _ => key_match2_to_regex(pattern),
        };
        let compiled = match Regex::new(&source) {
            Ok(re) => Some(re),
            Err(e) => {
                warn!(pattern = pattern, error = %e, "Policy object pattern never matches");
                None
            }
        };
        self.compiled.insert(pattern.to_string(), compiled.clone());
        compiled
    }
}

fn key_match(object: &str, pattern: &str) -> bool {
    match pattern.find('*') {
        None => object == pattern,
        Some(i) => object.get(..i).map_or(object == &pattern[..i], |head| head == &pattern[..i]),
    }
}

fn key_match2_to_regex(pattern: &str) -> String {
    let mut out = String::from("^");
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => out.push_str(".*"),
            ':' if out.ends_with('/') => {
                while chars.peek().map_or(false, |n| *n != '/') {
                    chars.next();
                }
                out.push_str("[^/]+");
            }
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }
    out.push('$');
    out
}

fn glob_to_regex(pattern: &str) -> String {
    let mut out = String::from("^");
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' if chars.peek() == Some(&'*') => {
                chars.next();
                out.push_str(".*");
            }
            '*' => out.push_str("[^/]*"),
            '?' => out.push_str("[^/]"),
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }
    out.push('$');
    out
}

// ═══════════════════════════════════════════════════════════════════════════════
// Policy Model
// ═══════════════════════════════════════════════════════════════════════════════

/// A validated policy model.
#[derive(Debug, Clone)]
pub struct PolicyModel {
    matcher: ObjectMatcher,
    text: String,
}

impl PolicyModel {
    /// The built-in domain RBAC model with `keyMatch2` object matching.
    pub fn default_model() -> Self {
        Self {
            matcher: ObjectMatcher::new(MatchFunction::KeyMatch2),
            text: DEFAULT_MODEL.trim().to_string(),
        }
    }

    /// Load and validate a model file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            WardenError::invalid_model(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::parse(&text)
    }

    /// Parse and validate model text.
    pub fn parse(text: &str) -> Result<Self> {
        let sections = parse_sections(text)?;

        let entry = |section: &str, key: &str| -> Result<String> {
            sections
                .get(section)
                .and_then(|s| s.get(key))
                .map(|v| compact(v))
                .ok_or_else(|| WardenError::invalid_model(format!("missing {key} in [{section}]")))
        };

        let request = entry("request_definition", "r")?;
        if request != FIELDS {
            return Err(WardenError::invalid_model(format!(
                "request definition must be `sub, dom, obj, act`, found `{request}`"
            )));
        }
        let policy = entry("policy_definition", "p")?;
        if policy != FIELDS {
            return Err(WardenError::invalid_model(format!(
                "policy definition must be `sub, dom, obj, act`, found `{policy}`"
            )));
        }
        let role = entry("role_definition", "g")?;
        if role != ROLE_FIELDS {
            return Err(WardenError::invalid_model(format!(
                "role definition must be `_, _, _`, found `{role}`"
            )));
        }
        let effect = entry("policy_effect", "e")?;
        if effect != EFFECT {
            return Err(WardenError::invalid_model(format!(
                "unsupported policy effect `{effect}`"
            )));
        }
        let matcher = entry("matchers", "m")?;
        let function = parse_matcher(&matcher)?;

        debug!(object_matcher = function.name(), "Policy model loaded");

        Ok(Self {
            matcher: ObjectMatcher::new(function),
            text: text.trim().to_string(),
        })
    }

    pub fn object_matcher(&self) -> &ObjectMatcher {
        &self.matcher
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

impl Default for PolicyModel {
    fn default() -> Self {
        Self::default_model()
    }
}

fn compact(value: &str) -> String {
    value.chars().filter(|c| !c.is_whitespace()).collect()
}

fn parse_sections(text: &str) -> Result<HashMap<String, HashMap<String, String>>> {
    let mut sections: HashMap<String, HashMap<String, String>> = HashMap::new();
    let mut current: Option<String> = None;

    for (lineno, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            current = Some(name.trim().to_string());
            continue;
        }
        let section = current.as_ref().ok_or_else(|| {
            WardenError::invalid_model(format!("line {}: entry outside a section", lineno + 1))
        })?;
        let (key, value) = line.split_once('=').ok_or_else(|| {
            WardenError::invalid_model(format!("line {}: expected `key = value`", lineno + 1))
        })?;
        sections
            .entry(section.clone())
            .or_default()
            .insert(key.trim().to_string(), value.trim().to_string());
    }

    Ok(sections)
}

fn parse_matcher(matcher: &str) -> Result<MatchFunction> {
    let mut clauses: Vec<&str> = matcher.split("&&").collect();
    clauses.sort_unstable();

    let mut function = None;
    let mut expected = vec!["g(r.sub,p.sub,r.dom)", "r.act==p.act", "r.dom==p.dom"];
    for clause in clauses {
        if let Some(pos) = expected.iter().position(|c| *c == clause) {
            expected.remove(pos);
            continue;
        }
        let candidate = match clause {
            "r.obj==p.obj" => MatchFunction::Exact,
            "keyMatch(r.obj,p.obj)" => MatchFunction::KeyMatch,
            "keyMatch2(r.obj,p.obj)" => MatchFunction::KeyMatch2,
            "globMatch(r.obj,p.obj)" => MatchFunction::Glob,
            other => {
                return Err(WardenError::invalid_model(format!(
                    "unsupported matcher clause `{other}`"
                )))
            }
        };
        if function.replace(candidate).is_some() {
            return Err(WardenError::invalid_model("matcher compares r.obj more than once"));
        }
    }

    if !expected.is_empty() {
        return Err(WardenError::invalid_model(format!(
            "matcher is missing required clauses: {}",
            expected.join(", ")
        )));
    }
    function.ok_or_else(|| WardenError::invalid_model("matcher never compares r.obj"))
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn test_default_model_uses_key_match2() {
        let model = PolicyModel::parse(DEFAULT_MODEL).unwrap();
        assert_eq!(model.object_matcher().function(), MatchFunction::KeyMatch2);
    }

    #[test]
    fn test_key_match() {
        let m = ObjectMatcher::new(MatchFunction::KeyMatch);
        assert!(m.matches("/orgs/get/org42", "/orgs/get/org42"));
        assert!(m.matches("/orgs/get/org42", "/orgs/*"));
        assert!(m.matches("/orgs", "/orgs*"));
        assert!(!m.matches("/repos/get", "/orgs/*"));
    }

    #[test]
    fn test_key_match2() {
        let m = ObjectMatcher::new(MatchFunction::KeyMatch2);
        assert!(m.matches("/orgs/get/org42", "/orgs/get/:id"));
        assert!(!m.matches("/orgs/get/org42/extra", "/orgs/get/:id"));
        assert!(m.matches("/orgs/get/org42/extra", "/orgs/*"));
        assert!(!m.matches("/orgsXget", "/orgs.get"));
        assert!(m.matches("/orgs/get/org42", "/orgs/get/org42"));
    }

    #[test]
    fn test_glob_match() {
        let m = ObjectMatcher::new(MatchFunction::Glob);
        assert!(m.matches("/orgs/get", "/orgs/*"));
        assert!(!m.matches("/orgs/get/org42", "/orgs/*"));
        assert!(m.matches("/orgs/get/org42", "/orgs/**"));
        assert!(m.matches("/orgs/a", "/orgs/?"));
    }

    #[test]
    fn test_exact_match() {
        let text = DEFAULT_MODEL.replace("keyMatch2(r.obj, p.obj)", "r.obj == p.obj");
        let model = PolicyModel::parse(&text).unwrap();
        assert!(model.object_matcher().matches("/orgs/*", "/orgs/*"));
        assert!(!model.object_matcher().matches("/orgs/get", "/orgs/*"));
    }

    #[test]
    fn test_rejects_wrong_request_shape() {
        let text = DEFAULT_MODEL.replace("r = sub, dom, obj, act", "r = sub, obj, act");
        let err = PolicyModel::parse(&text).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidModel);
    }

    #[test]
    fn test_rejects_missing_domain_clause() {
        let text = DEFAULT_MODEL.replace(" && r.dom == p.dom", "");
        assert!(PolicyModel::parse(&text).is_err());
    }

    #[test]
    fn test_rejects_unknown_function() {
        let text = DEFAULT_MODEL.replace("keyMatch2", "regexMatch");
        assert!(PolicyModel::parse(&text).is_err());
    }
}
