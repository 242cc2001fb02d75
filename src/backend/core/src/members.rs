//! Tenant member list.
//!
//! The member list lives outside the policy store (it is the tenant's
//! profile data). Adds are set-like: a member already listed is not
//! duplicated.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::Result;

/// A listed member of a tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    pub role: String,
}

#[async_trait]
pub trait MemberRegistry: Send + Sync {
    /// Add `member` to `domain`. Returns `false` if an identical entry
    /// was already present.
    async fn add_member(&self, domain: &str, member: Member) -> Result<bool>;

    async fn members(&self, domain: &str) -> Result<Vec<Member>>;
}

/// Registry kept in process memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryMemberRegistry {
    tenants: Arc<DashMap<String, Vec<Member>>>,
}

impl InMemoryMemberRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MemberRegistry for InMemoryMemberRegistry {
    async fn add_member(&self, domain: &str, member: Member) -> Result<bool> {
        let mut entry = self.tenants.entry(domain.to_string()).or_default();
        if entry.contains(&member) {
            return Ok(false);
        }
        entry.push(member);
        Ok(true)
    }

    async fn members(&self, domain: &str) -> Result<Vec<Member>> {
        Ok(self
            .tenants
            .get(domain)
            .map(|m| m.value().clone())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_add_is_set_like() {
        let registry = InMemoryMemberRegistry::new();
        let member = Member {
            id: "u2".into(),
            email: Some("a@b.com".into()),
            name: None,
            role: "reader".into(),
        };

        assert!(registry.add_member("org42", member.clone()).await.unwrap());
        assert!(!registry.add_member("org42", member).await.unwrap());
        assert_eq!(registry.members("org42").await.unwrap().len(), 1);
        assert!(registry.members("org7").await.unwrap().is_empty());
    }
}
