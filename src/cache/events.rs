//! Invalidation events.
//!
//! Mutations raise a named event; the coordinator clears every domain whose
//! policy lists that name. Unknown names are carried as [`InvalidationEvent::Other`]
//! so new rules can be added to a policy table without touching this enum.

use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use uuid::Uuid;

use super::keys::CacheDomain;

/// Named mutation that may invalidate cached domains.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum InvalidationEvent {
    MenuUpdate,
    CategoryUpdate,
    ItemUpdate,
    RestaurantUpdate,
    ToppingUpdate,
    ImageUpdate,
    AuthUpdate,
    Logout,
    Other(String),
}

impl InvalidationEvent {
    pub fn as_str(&self) -> &str {
        match self {
            Self::MenuUpdate => "menu_update",
            Self::CategoryUpdate => "category_update",
            Self::ItemUpdate => "item_update",
            Self::RestaurantUpdate => "restaurant_update",
            Self::ToppingUpdate => "topping_update",
            Self::ImageUpdate => "image_update",
            Self::AuthUpdate => "auth_update",
            Self::Logout => "logout",
            Self::Other(name) => name,
        }
    }
}

impl fmt::Display for InvalidationEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InvalidationEvent {
    type Err = Infallible;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(match value {
            "menu_update" => Self::MenuUpdate,
            "category_update" => Self::CategoryUpdate,
            "item_update" => Self::ItemUpdate,
            "restaurant_update" => Self::RestaurantUpdate,
            "topping_update" => Self::ToppingUpdate,
            "image_update" => Self::ImageUpdate,
            "auth_update" => Self::AuthUpdate,
            "logout" => Self::Logout,
            other => Self::Other(other.to_string()),
        })
    }
}

impl Serialize for InvalidationEvent {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Single-entity keys to remove alongside any rule-driven domain clears.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvalidationMetadata {
    /// Removes `menu_item_<id>`.
    pub item_id: Option<String>,
    /// Removes `categories_<id>`.
    pub category_id: Option<String>,
}

/// What one `invalidate` call removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvalidationOutcome {
    pub event_id: Uuid,
    pub event: InvalidationEvent,
    pub cleared_domains: Vec<CacheDomain>,
    pub removed_entries: usize,
}
