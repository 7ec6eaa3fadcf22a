//! Per-domain cache policies.
//!
//! Each domain carries a priority, a TTL, an optional byte bound and the
//! names of the events that invalidate it. The table is read-only once a
//! coordinator owns it.

use std::time::Duration;

use serde::Serialize;

use super::events::InvalidationEvent;
use super::keys::CacheDomain;

const MINUTE: u64 = 60;
const HOUR: u64 = 60 * MINUTE;
const DAY: u64 = 24 * HOUR;
const MIB: u64 = 1024 * 1024;

/// Eviction priority. Low-priority domains are dropped first under pressure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CachePolicy {
    pub priority: Priority,
    pub ttl: Duration,
    pub max_size_bytes: Option<u64>,
    pub invalidation_rules: Vec<String>,
}

impl CachePolicy {
    pub fn new(priority: Priority, ttl: Duration) -> Self {
        Self {
            priority,
            ttl,
            max_size_bytes: None,
            invalidation_rules: Vec::new(),
        }
    }

    pub fn with_max_size(mut self, bytes: u64) -> Self {
        self.max_size_bytes = Some(bytes);
        self
    }

    pub fn with_rules<I, S>(mut self, rules: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.invalidation_rules = rules.into_iter().map(Into::into).collect();
        self
    }

    /// Whether `event` is one of this policy's invalidation rules.
    pub fn matches(&self, event: &InvalidationEvent) -> bool {
        self.invalidation_rules
            .iter()
            .any(|rule| rule == event.as_str())
    }
}

/// Domain → policy mapping, iterated in declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyTable {
    policies: Vec<(CacheDomain, CachePolicy)>,
}

impl PolicyTable {
    pub fn empty() -> Self {
        Self {
            policies: Vec::new(),
        }
    }

    /// Insert or replace the policy for `domain`.
    pub fn with_policy(mut self, domain: CacheDomain, policy: CachePolicy) -> Self {
        match self.policies.iter_mut().find(|(d, _)| *d == domain) {
            Some(slot) => slot.1 = policy,
            None => self.policies.push((domain, policy)),
        }
        self
    }

    pub fn policy_for(&self, domain: CacheDomain) -> Option<&CachePolicy> {
        self.policies
            .iter()
            .find(|(d, _)| *d == domain)
            .map(|(_, policy)| policy)
    }

    /// Domains whose rules list `event`.
    pub fn domains_for_event(&self, event: &InvalidationEvent) -> Vec<CacheDomain> {
        self.policies
            .iter()
            .filter(|(_, policy)| policy.matches(event))
            .map(|(domain, _)| *domain)
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (CacheDomain, &CachePolicy)> {
        self.policies.iter().map(|(domain, policy)| (*domain, policy))
    }
}

impl Default for PolicyTable {
    fn default() -> Self {
        Self::empty()
            .with_policy(
                CacheDomain::Menu,
                CachePolicy::new(Priority::High, Duration::from_secs(DAY))
                    .with_max_size(2 * MIB)
                    .with_rules([
                        "menu_update",
                        "item_update",
                        "category_update",
                        "restaurant_update",
                    ]),
            )
            .with_policy(
                CacheDomain::Restaurant,
                CachePolicy::new(Priority::High, Duration::from_secs(DAY))
                    .with_rules(["restaurant_update"]),
            )
            .with_policy(
                CacheDomain::Categories,
                CachePolicy::new(Priority::High, Duration::from_secs(DAY))
                    .with_max_size(MIB)
                    .with_rules(["menu_update", "category_update", "restaurant_update"]),
            )
            .with_policy(
                CacheDomain::Toppings,
                CachePolicy::new(Priority::Medium, Duration::from_secs(DAY))
                    .with_rules(["topping_update", "restaurant_update"]),
            )
            .with_policy(
                CacheDomain::Images,
                CachePolicy::new(Priority::Low, Duration::from_secs(7 * DAY))
                    .with_max_size(5 * MIB)
                    .with_rules(["image_update", "restaurant_update"]),
            )
            .with_policy(
                CacheDomain::Auth,
                CachePolicy::new(Priority::Medium, Duration::from_secs(HOUR))
                    .with_rules(["auth_update", "logout"]),
            )
            .with_policy(
                CacheDomain::Default,
                CachePolicy::new(Priority::Low, Duration::from_secs(30 * MINUTE)),
            )
    }
}
