//! Cache key definitions.
//!
//! A physical storage key is
//! `NAMESPACE_PREFIX + <restaurant segment> + "_" + <domain key>`.
//!
//! The restaurant segment escapes `%` and `_`, so the first `_` after the
//! prefix always separates tenant from domain key and one tenant's keys can
//! never fall inside another tenant's prefix. Changing `NAMESPACE_PREFIX`
//! orphans every previously persisted entry, which is how the envelope format
//! is versioned.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Process-wide prefix applied to every physical key.
pub const NAMESPACE_PREFIX: &str = "kiosk_cache_v1_";

const TENANT_SEPARATOR: char = '_';

/// Identifies the restaurant (tenant) that owns a cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RestaurantId(String);

impl RestaurantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Escaped form used inside physical keys.
    pub fn storage_segment(&self) -> String {
        let mut out = String::with_capacity(self.0.len());
        for ch in self.0.chars() {
            match ch {
                '%' => out.push_str("%25"),
                '_' => out.push_str("%5F"),
                other => out.push(other),
            }
        }
        out
    }

    /// Inverse of [`RestaurantId::storage_segment`].
    pub fn from_storage_segment(segment: &str) -> Option<Self> {
        let mut out = String::with_capacity(segment.len());
        let mut chars = segment.chars();
        while let Some(ch) = chars.next() {
            if ch != '%' {
                out.push(ch);
                continue;
            }
            let code: String = chars.by_ref().take(2).collect();
            match code.as_str() {
                "25" => out.push('%'),
                "5F" => out.push('_'),
                _ => return None,
            }
        }
        Some(Self(out))
    }
}

impl fmt::Display for RestaurantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RestaurantId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for RestaurantId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Named category of cached data sharing one policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheDomain {
    Menu,
    Restaurant,
    Categories,
    Toppings,
    Images,
    Auth,
    Default,
}

impl CacheDomain {
    pub const ALL: [CacheDomain; 7] = [
        CacheDomain::Menu,
        CacheDomain::Restaurant,
        CacheDomain::Categories,
        CacheDomain::Toppings,
        CacheDomain::Images,
        CacheDomain::Auth,
        CacheDomain::Default,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CacheDomain::Menu => "menu",
            CacheDomain::Restaurant => "restaurant",
            CacheDomain::Categories => "categories",
            CacheDomain::Toppings => "toppings",
            CacheDomain::Images => "images",
            CacheDomain::Auth => "auth",
            CacheDomain::Default => "default",
        }
    }

    /// Domain whose tag leads `raw`, if any.
    fn leading(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|domain| {
            let tag = domain.as_str();
            raw == tag
                || raw
                    .strip_prefix(tag)
                    .is_some_and(|rest| rest.starts_with(TENANT_SEPARATOR))
        })
    }
}

impl fmt::Display for CacheDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Key within a restaurant namespace, tagged with its domain.
///
/// The string form is `<domain>` or `<domain>_<suffix>`; the tag is fixed at
/// construction and is what policy lookup uses.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DomainKey {
    domain: CacheDomain,
    key: String,
}

impl DomainKey {
    /// The domain-wide key, e.g. `categories`.
    pub fn root(domain: CacheDomain) -> Self {
        Self {
            domain,
            key: domain.as_str().to_string(),
        }
    }

    /// A key inside `domain`, e.g. `menu_item_42` for `(Menu, "item_42")`.
    pub fn new(domain: CacheDomain, suffix: impl AsRef<str>) -> Self {
        let suffix = suffix.as_ref();
        if suffix.is_empty() {
            return Self::root(domain);
        }
        Self {
            domain,
            key: format!("{}{TENANT_SEPARATOR}{suffix}", domain.as_str()),
        }
    }

    /// Interpret a raw key string by its leading domain tag.
    ///
    /// Keys without a recognised tag belong to [`CacheDomain::Default`] and
    /// keep their text unchanged.
    pub fn parse(raw: &str) -> Self {
        let domain = CacheDomain::leading(raw).unwrap_or(CacheDomain::Default);
        Self {
            domain,
            key: raw.to_string(),
        }
    }

    pub fn restaurant() -> Self {
        Self::root(CacheDomain::Restaurant)
    }

    pub fn restaurant_slug() -> Self {
        Self::new(CacheDomain::Restaurant, "slug")
    }

    pub fn categories() -> Self {
        Self::root(CacheDomain::Categories)
    }

    pub fn category(id: &str) -> Self {
        Self::new(CacheDomain::Categories, id)
    }

    pub fn menu_item(id: &str) -> Self {
        Self::new(CacheDomain::Menu, format!("item_{id}"))
    }

    pub fn toppings() -> Self {
        Self::root(CacheDomain::Toppings)
    }

    pub fn topping_category(id: &str) -> Self {
        Self::new(CacheDomain::Toppings, format!("category_{id}"))
    }

    pub fn image(id: &str) -> Self {
        Self::new(CacheDomain::Images, id)
    }

    pub fn auth(name: &str) -> Self {
        Self::new(CacheDomain::Auth, name)
    }

    pub fn domain(&self) -> CacheDomain {
        self.domain
    }

    pub fn as_str(&self) -> &str {
        &self.key
    }

    /// Keys carrying a `temp` or `temporary` segment are evicted first under
    /// memory pressure.
    pub fn is_temporary(&self) -> bool {
        self.key
            .split(TENANT_SEPARATOR)
            .any(|segment| segment == "temp" || segment == "temporary")
    }

    /// Logical group used for redundancy detection.
    ///
    /// Trailing timestamp-like (ten or more digits) and version-like
    /// (`v<digits>`) segments are stripped, so `menu_1700000000000` and
    /// `menu_1700000300000` share the group `menu`. Short numeric ids such as
    /// `menu_item_42` are left alone.
    pub fn group_key(&self) -> &str {
        let mut end = self.key.len();
        loop {
            let head = &self.key[..end];
            let Some(split) = head.rfind(TENANT_SEPARATOR) else {
                break;
            };
            if !is_versioned_segment(&head[split + 1..]) {
                break;
            }
            end = split;
        }
        &self.key[..end]
    }
}

fn is_versioned_segment(segment: &str) -> bool {
    let timestamp_like = segment.len() >= 10 && segment.bytes().all(|b| b.is_ascii_digit());
    let version_like = segment.len() >= 2
        && segment.starts_with('v')
        && segment[1..].bytes().all(|b| b.is_ascii_digit());
    timestamp_like || version_like
}

impl fmt::Display for DomainKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

/// Fully qualified key as written to the durable store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StorageKey {
    restaurant: RestaurantId,
    key: DomainKey,
}

impl StorageKey {
    pub fn new(restaurant: &RestaurantId, key: &DomainKey) -> Self {
        Self {
            restaurant: restaurant.clone(),
            key: key.clone(),
        }
    }

    pub fn restaurant(&self) -> &RestaurantId {
        &self.restaurant
    }

    pub fn key(&self) -> &DomainKey {
        &self.key
    }

    pub fn encode(&self) -> String {
        let mut encoded = Self::tenant_prefix(&self.restaurant);
        encoded.push_str(self.key.as_str());
        encoded
    }

    /// Parse a physical key. Returns `None` for keys outside the namespace.
    pub fn decode(raw: &str) -> Option<Self> {
        let rest = raw.strip_prefix(NAMESPACE_PREFIX)?;
        let (segment, key) = rest.split_once(TENANT_SEPARATOR)?;
        if key.is_empty() {
            return None;
        }
        Some(Self {
            restaurant: RestaurantId::from_storage_segment(segment)?,
            key: DomainKey::parse(key),
        })
    }

    /// Prefix shared by every physical key of one restaurant.
    pub fn tenant_prefix(restaurant: &RestaurantId) -> String {
        format!(
            "{NAMESPACE_PREFIX}{}{TENANT_SEPARATOR}",
            restaurant.storage_segment()
        )
    }
}
