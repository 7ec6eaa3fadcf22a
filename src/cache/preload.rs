//! Startup preloader.
//!
//! Fills the restaurant, menu and topping caches when a kiosk view starts so
//! the first screen renders from cache. Fetch failures degrade to empty
//! results per entity; a failed preload never blocks rendering.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::domain::entities::{MenuCategory, Restaurant, ToppingCategory};

use super::collaborators::{RefreshError, Refresher};
use super::gate::CacheContext;
use super::keys::{CacheDomain, DomainKey, RestaurantId};
use super::service::CacheService;

#[derive(Debug, Error)]
pub enum DataSourceError {
    #[error("data source request failed: {0}")]
    Request(String),
    #[error("data source returned malformed data: {0}")]
    Malformed(String),
}

/// Read-only restaurant data. Implementations must not cache.
#[async_trait]
pub trait DataSource: Send + Sync {
    async fn restaurant_by_slug(&self, slug: &str) -> Result<Option<Restaurant>, DataSourceError>;

    async fn restaurant(&self, id: &RestaurantId) -> Result<Option<Restaurant>, DataSourceError>;

    async fn menu_categories(
        &self,
        id: &RestaurantId,
    ) -> Result<Option<Vec<MenuCategory>>, DataSourceError>;

    async fn topping_categories(
        &self,
        id: &RestaurantId,
    ) -> Result<Option<Vec<ToppingCategory>>, DataSourceError>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PreloadReport {
    pub skipped: bool,
    pub restaurant: Option<RestaurantId>,
    pub menu_categories: usize,
    pub menu_items: usize,
    pub topping_categories: usize,
    pub entries_written: usize,
    pub failures: Vec<String>,
}

#[derive(Debug, Default, Clone, Copy)]
struct Written {
    groups: usize,
    members: usize,
    entries: usize,
}

pub struct Preloader {
    service: Arc<CacheService>,
    source: Arc<dyn DataSource>,
}

impl Preloader {
    pub fn new(service: Arc<CacheService>, source: Arc<dyn DataSource>) -> Self {
        Self { service, source }
    }

    /// Preload everything a kiosk keyed by `slug` shows first.
    ///
    /// Skipped when kiosk caching or `preload_on_kiosk_init` is off.
    pub async fn preload_kiosk(&self, slug: &str) -> PreloadReport {
        if !self.service.gate().should_preload() {
            info!(slug, "Kiosk preload skipped: disabled by configuration");
            return PreloadReport {
                skipped: true,
                ..PreloadReport::default()
            };
        }

        let mut report = PreloadReport::default();
        let restaurant = match self.source.restaurant_by_slug(slug).await {
            Ok(Some(restaurant)) => restaurant,
            Ok(None) => {
                warn!(slug, "Kiosk preload: restaurant not found");
                report.failures.push(format!("restaurant `{slug}` not found"));
                return report;
            }
            Err(error) => {
                warn!(slug, error = %error, "Kiosk preload: restaurant fetch failed");
                report.failures.push(error.to_string());
                return report;
            }
        };

        let id = RestaurantId::new(restaurant.id.clone());
        report.entries_written += self.write_restaurant(&restaurant);
        self.populate_collections(&id, &mut report).await;
        report.restaurant = Some(id);

        info!(
            slug,
            restaurant = ?report.restaurant,
            menu_categories = report.menu_categories,
            menu_items = report.menu_items,
            topping_categories = report.topping_categories,
            entries_written = report.entries_written,
            failures = report.failures.len(),
            "Kiosk preload finished"
        );
        report
    }

    /// Refetch everything cached for `id`, ignoring the preload flag.
    pub async fn reload(&self, id: &RestaurantId) -> PreloadReport {
        let mut report = PreloadReport {
            restaurant: Some(id.clone()),
            ..PreloadReport::default()
        };

        match self.refresh_restaurant(id).await {
            Ok(written) => report.entries_written += written,
            Err(error) => {
                warn!(restaurant = %id, error = %error, "Reload: restaurant fetch failed");
                report.failures.push(error.to_string());
            }
        }
        self.populate_collections(id, &mut report).await;

        info!(
            restaurant = %id,
            entries_written = report.entries_written,
            failures = report.failures.len(),
            "Restaurant cache reloaded"
        );
        report
    }

    async fn populate_collections(&self, id: &RestaurantId, report: &mut PreloadReport) {
        let (menu, toppings) =
            futures::join!(self.refresh_menu(id), self.refresh_toppings(id));

        match menu {
            Ok(written) => {
                report.menu_categories = written.groups;
                report.menu_items = written.members;
                report.entries_written += written.entries;
            }
            Err(error) => {
                warn!(restaurant = %id, error = %error, "Preload: menu fetch failed");
                report.failures.push(error.to_string());
            }
        }
        match toppings {
            Ok(written) => {
                report.topping_categories = written.groups;
                report.entries_written += written.entries;
            }
            Err(error) => {
                warn!(restaurant = %id, error = %error, "Preload: topping fetch failed");
                report.failures.push(error.to_string());
            }
        }
    }

    fn write_restaurant(&self, restaurant: &Restaurant) -> usize {
        let by_slug = self.put(
            &DomainKey::restaurant_slug(),
            restaurant,
            &RestaurantId::new(restaurant.slug.clone()),
        );
        let by_id = self.put(
            &DomainKey::restaurant(),
            restaurant,
            &RestaurantId::new(restaurant.id.clone()),
        );
        usize::from(by_slug) + usize::from(by_id)
    }

    async fn refresh_restaurant(&self, id: &RestaurantId) -> Result<usize, DataSourceError> {
        Ok(self
            .source
            .restaurant(id)
            .await?
            .map_or(0, |restaurant| self.write_restaurant(&restaurant)))
    }

    async fn refresh_restaurant_by_slug(&self, slug: &str) -> Result<usize, DataSourceError> {
        Ok(self
            .source
            .restaurant_by_slug(slug)
            .await?
            .map_or(0, |restaurant| self.write_restaurant(&restaurant)))
    }

    async fn refresh_menu(&self, id: &RestaurantId) -> Result<Written, DataSourceError> {
        let categories = self.source.menu_categories(id).await?.unwrap_or_default();
        let mut written = Written {
            groups: categories.len(),
            ..Written::default()
        };

        written.entries += usize::from(self.put(&DomainKey::categories(), &categories, id));
        for category in &categories {
            written.entries += usize::from(self.put(&DomainKey::category(&category.id), category, id));
            for item in &category.items {
                written.members += 1;
                written.entries += usize::from(self.put(&DomainKey::menu_item(&item.id), item, id));
            }
        }
        Ok(written)
    }

    async fn refresh_toppings(&self, id: &RestaurantId) -> Result<Written, DataSourceError> {
        let categories = self.source.topping_categories(id).await?.unwrap_or_default();
        let mut written = Written {
            groups: categories.len(),
            ..Written::default()
        };

        written.entries += usize::from(self.put(&DomainKey::toppings(), &categories, id));
        for category in &categories {
            written.members += category.toppings.len();
            written.entries +=
                usize::from(self.put(&DomainKey::topping_category(&category.id), category, id));
        }
        Ok(written)
    }

    fn put<T: Serialize>(&self, key: &DomainKey, data: &T, id: &RestaurantId) -> bool {
        self.service.set(key, data, id, CacheContext::Kiosk)
    }
}

#[async_trait]
impl Refresher for Preloader {
    async fn refresh(
        &self,
        key: &DomainKey,
        restaurant: &RestaurantId,
    ) -> Result<(), RefreshError> {
        match key.domain() {
            CacheDomain::Restaurant if *key == DomainKey::restaurant_slug() => {
                self.refresh_restaurant_by_slug(restaurant.as_str()).await?;
            }
            CacheDomain::Restaurant => {
                self.refresh_restaurant(restaurant).await?;
            }
            CacheDomain::Menu | CacheDomain::Categories => {
                self.refresh_menu(restaurant).await?;
            }
            CacheDomain::Toppings => {
                self.refresh_toppings(restaurant).await?;
            }
            CacheDomain::Images | CacheDomain::Auth | CacheDomain::Default => {
                return Err(RefreshError::Unsupported(key.to_string()));
            }
        }
        Ok(())
    }
}
