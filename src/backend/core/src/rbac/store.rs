//! The policy store: the single owner of rules and role relations.
//!
//! Reads are served from an in-memory index. Every mutation is persisted
//! through the [`PolicyAdapter`] before the index changes, and mutations are
//! serialized so conditional operations can check and write atomically.

use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

use super::adapter::PolicyAdapter;
use super::models::{Grouping, PolicyRule, RuleLine};
use crate::error::{Result, WardenError};
use crate::observability::metrics;

// ═══════════════════════════════════════════════════════════════════════════════
// Index
// ═══════════════════════════════════════════════════════════════════════════════

/// Per-domain view of rules and the role graph.
#[derive(Debug, Default, Clone)]
struct DomainIndex {
    /// Rules keyed by role.
    policies: HashMap<String, Vec<PolicyRule>>,
    /// Grouping edges: member -> roles it belongs to.
    edges: HashMap<String, BTreeSet<String>>,
}

#[derive(Debug, Default, Clone)]
struct Index {
    domains: HashMap<String, DomainIndex>,
}

impl Index {
    fn build(lines: Vec<RuleLine>) -> Self {
        let mut index = Self::default();
        for line in lines {
            index.apply_add(&line);
        }
        index
    }

    fn contains(&self, line: &RuleLine) -> bool {
        match line {
            RuleLine::Policy(p) => self
                .domains
                .get(&p.domain)
                .and_then(|d| d.policies.get(&p.role))
                .map_or(false, |rules| rules.contains(p)),
            RuleLine::Grouping(g) => self
                .domains
                .get(&g.domain)
                .and_then(|d| d.edges.get(&g.member))
                .map_or(false, |roles| roles.contains(&g.role)),
        }
    }

    fn apply_add(&mut self, line: &RuleLine) {
        match line {
            RuleLine::Policy(p) => {
                let rules = self
                    .domains
                    .entry(p.domain.clone())
                    .or_default()
                    .policies
                    .entry(p.role.clone())
                    .or_default();
                if !rules.contains(p) {
                    rules.push(p.clone());
                }
            }
            RuleLine::Grouping(g) => {
                self.domains
                    .entry(g.domain.clone())
                    .or_default()
                    .edges
                    .entry(g.member.clone())
                    .or_default()
                    .insert(g.role.clone());
            }
        }
    }

    fn apply_remove(&mut self, line: &RuleLine) {
        match line {
            RuleLine::Policy(p) => {
                if let Some(rules) = self
                    .domains
                    .get_mut(&p.domain)
                    .and_then(|d| d.policies.get_mut(&p.role))
                {
                    rules.retain(|r| r != p);
                }
            }
            RuleLine::Grouping(g) => {
                if let Some(roles) = self
                    .domains
                    .get_mut(&g.domain)
                    .and_then(|d| d.edges.get_mut(&g.member))
                {
                    roles.remove(&g.role);
                }
            }
        }
    }

    fn direct_roles(&self, member: &str, domain: &str) -> BTreeSet<String> {
        self.domains
            .get(domain)
            .and_then(|d| d.edges.get(member))
            .cloned()
            .unwrap_or_default()
    }

    /// Breadth-first walk of `domain`'s role graph. The visited set makes
    /// cycles terminate; the starting member is never reported as its own role.
    fn reachable_roles(&self, member: &str, domain: &str) -> BTreeSet<String> {
        let Some(index) = self.domains.get(domain) else {
            return BTreeSet::new();
        };

        let mut visited: HashSet<&str> = HashSet::from([member]);
        let mut roles = BTreeSet::new();
        let mut queue: VecDeque<&str> = VecDeque::from([member]);

        while let Some(current) = queue.pop_front() {
            let Some(parents) = index.edges.get(current) else {
                continue;
            };
            for role in parents {
                if visited.insert(role.as_str()) {
                    roles.insert(role.clone());
                    queue.push_back(role.as_str());
                }
            }
        }
        roles
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Conditional outcomes
// ═══════════════════════════════════════════════════════════════════════════════

/// Outcome of [`PolicyStore::add_grouping_if_roleless`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardedAdd {
    /// The member had no role in the domain and the grouping was persisted.
    Added,
    /// The member already held these direct roles; nothing was written.
    Existing(BTreeSet<String>),
}

/// Outcome of [`PolicyStore::replace_groupings`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplaceOutcome {
    /// The previous role set was swapped for the new role.
    Replaced { previous: BTreeSet<String> },
    /// The member already held exactly the new role.
    Unchanged,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Policy Store
// ═══════════════════════════════════════════════════════════════════════════════

/// Durable, domain-scoped store of policy rules and grouping relations.
///
/// Cheap to clone; clones share the same index and adapter.
#[derive(Clone)]
pub struct PolicyStore {
    adapter: Arc<dyn PolicyAdapter>,
    index: Arc<RwLock<Index>>,
    /// Serializes persisted mutations and reloads.
    writes: Arc<Mutex<()>>,
}

impl std::fmt::Debug for PolicyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyStore")
            .field("adapter", &self.adapter.name())
            .finish()
    }
}

impl PolicyStore {
    /// Load every row from the adapter. Fails if the backing store is unreachable.
    pub async fn open(adapter: Arc<dyn PolicyAdapter>) -> Result<Self> {
        let lines = adapter.load_lines().await?;
        info!(adapter = adapter.name(), rows = lines.len(), "Policy store loaded");
        Ok(Self {
            adapter,
            index: Arc::new(RwLock::new(Index::build(lines))),
            writes: Arc::new(Mutex::new(())),
        })
    }

    /// Name of the backing adapter.
    pub fn backend(&self) -> &'static str {
        self.adapter.name()
    }

    /// Reload the whole index from the adapter, picking up writes made by
    /// other processes sharing the same backing store.
    pub async fn refresh(&self) -> Result<()> {
        let _guard = self.writes.lock().await;
        let lines = self.adapter.load_lines().await?;
        let rows = lines.len();
        *self.index.write() = Index::build(lines);
        debug!(rows, "Policy store refreshed");
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Mutations
    // ─────────────────────────────────────────────────────────────────────────

    /// Add a policy rule. Returns `false` if it already existed.
    pub async fn add_policy(&self, rule: PolicyRule) -> Result<bool> {
        self.add_line(RuleLine::Policy(rule), "add_policy").await
    }

    /// Remove a policy rule. Returns `false` if it did not exist.
    pub async fn remove_policy(&self, rule: PolicyRule) -> Result<bool> {
        self.remove_line(RuleLine::Policy(rule), "remove_policy").await
    }

    /// Add a grouping relation. Returns `false` if it already existed.
    pub async fn add_grouping(&self, grouping: Grouping) -> Result<bool> {
        self.add_line(RuleLine::Grouping(grouping), "add_grouping").await
    }

    /// Remove a grouping relation. Returns `false` if it did not exist.
    pub async fn remove_grouping(&self, grouping: Grouping) -> Result<bool> {
        self.remove_line(RuleLine::Grouping(grouping), "remove_grouping")
            .await
    }

    /// Add `grouping` only if its member holds no direct role in the domain.
    ///
    /// The check and the write happen under the store's mutation lock, so
    /// concurrent callers record at most one grouping.
    #[instrument(
        skip(self, grouping),
        fields(subject = %grouping.member, domain = %grouping.domain, role = %grouping.role)
    )]
    pub async fn add_grouping_if_roleless(&self, grouping: Grouping) -> Result<GuardedAdd> {
        let (member, domain) = (grouping.member.clone(), grouping.domain.clone());
        let line = RuleLine::Grouping(grouping);
        line.validate()?;
        let _guard = self.writes.lock().await;

        let existing = self.index.read().direct_roles(&member, &domain);
        if !existing.is_empty() {
            debug!(roles = ?existing, "Member already has roles; nothing written");
            return Ok(GuardedAdd::Existing(existing));
        }

        self.adapter.append_line(&line).await?;
        self.index.write().apply_add(&line);
        metrics::record_store_mutation("add_grouping");
        debug!("Grouping persisted");
        Ok(GuardedAdd::Added)
    }

    /// Atomically replace every direct role `member` holds in `domain` with
    /// `new_role`.
    ///
    /// With `expected` set, the replacement only happens if the current direct
    /// role set equals it; otherwise the call fails with `RoleConflict`. A
    /// member that already holds exactly `{new_role}` is left untouched.
    #[instrument(skip(self, expected), fields(subject = %member, domain = %domain, role = %new_role))]
    pub async fn replace_groupings(
        &self,
        member: &str,
        domain: &str,
        expected: Option<&BTreeSet<String>>,
        new_role: &str,
    ) -> Result<ReplaceOutcome> {
        let add = [RuleLine::Grouping(Grouping::new(member, new_role, domain))];
        add[0].validate()?;
        let _guard = self.writes.lock().await;

        let current = self.index.read().direct_roles(member, domain);
        if current.len() == 1 && current.contains(new_role) {
            debug!("Member already holds only the target role");
            return Ok(ReplaceOutcome::Unchanged);
        }
        if let Some(expected) = expected {
            if &current != expected {
                let current: Vec<String> = current.into_iter().collect();
                return Err(WardenError::role_conflict(member, domain, &current));
            }
        }

        let remove: Vec<RuleLine> = current
            .iter()
            .map(|role| RuleLine::Grouping(Grouping::new(member, role, domain)))
            .collect();

        self.adapter.replace_lines(&remove, &add).await?;
        {
            let mut index = self.index.write();
            for line in &remove {
                index.apply_remove(line);
            }
            index.apply_add(&add[0]);
        }
        metrics::record_store_mutation("replace_groupings");
        debug!(previous = ?current, "Role set replaced");
        Ok(ReplaceOutcome::Replaced { previous: current })
    }

    async fn add_line(&self, line: RuleLine, op: &'static str) -> Result<bool> {
        line.validate()?;
        let _guard = self.writes.lock().await;
        if self.index.read().contains(&line) {
            return Ok(false);
        }
        self.adapter.append_line(&line).await?;
        self.index.write().apply_add(&line);
        metrics::record_store_mutation(op);
        debug!(rule = %line, op, "Rule persisted");
        Ok(true)
    }

    async fn remove_line(&self, line: RuleLine, op: &'static str) -> Result<bool> {
        let _guard = self.writes.lock().await;
        if !self.index.read().contains(&line) {
            return Ok(false);
        }
        self.adapter.remove_line(&line).await?;
        self.index.write().apply_remove(&line);
        metrics::record_store_mutation(op);
        debug!(rule = %line, op, "Rule removed");
        Ok(true)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Reads
    // ─────────────────────────────────────────────────────────────────────────

    /// Every role reachable from `subject` in `domain`, through any number
    /// of grouping edges of that domain only.
    pub fn roles_of(&self, subject: &str, domain: &str) -> BTreeSet<String> {
        self.index.read().reachable_roles(subject, domain)
    }

    /// Roles `subject` is directly grouped into in `domain`.
    pub fn direct_roles(&self, subject: &str, domain: &str) -> BTreeSet<String> {
        self.index.read().direct_roles(subject, domain)
    }

    /// First rule in `domain` granted to one of `roles` that satisfies `pred`.
    pub fn find_policy<F>(&self, domain: &str, roles: &BTreeSet<String>, pred: F) -> Option<PolicyRule>
    where
        F: Fn(&PolicyRule) -> bool,
    {
        let index = self.index.read();
        let domain_index = index.domains.get(domain)?;
        roles
            .iter()
            .filter_map(|role| domain_index.policies.get(role))
            .flatten()
            .find(|rule| pred(rule))
            .cloned()
    }

    /// All policy rules of `domain`, sorted.
    pub fn policies_in(&self, domain: &str) -> Vec<PolicyRule> {
        let index = self.index.read();
        let mut rules: Vec<PolicyRule> = index
            .domains
            .get(domain)
            .map(|d| d.policies.values().flatten().cloned().collect())
            .unwrap_or_default();
        rules.sort();
        rules
    }

    /// All grouping relations of `domain`, sorted.
    pub fn groupings_in(&self, domain: &str) -> Vec<Grouping> {
        let index = self.index.read();
        let mut groupings: Vec<Grouping> = index
            .domains
            .get(domain)
            .map(|d| {
                d.edges
                    .iter()
                    .flat_map(|(member, roles)| {
                        roles.iter().map(move |role| Grouping::new(member, role, domain))
                    })
                    .collect()
            })
            .unwrap_or_default();
        groupings.sort();
        groupings
    }

    /// Domains with at least one rule or relation, sorted.
    pub fn domains(&self) -> Vec<String> {
        let index = self.index.read();
        let mut domains: Vec<String> = index
            .domains
            .iter()
            .filter(|(_, d)| {
                d.policies.values().any(|r| !r.is_empty()) || d.edges.values().any(|r| !r.is_empty())
            })
            .map(|(name, _)| name.clone())
            .collect();
        domains.sort();
        domains
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
