//! JSON fixture data source.
//!
//! Stands in for the restaurant backend on the command line and in tests.
//! The file holds every record up front:
//!
//! ```json
//! {
//!   "restaurants": [{"id": "rest-1", "slug": "harbor-grill", "name": "Harbor Grill"}],
//!   "menus": {"rest-1": [{"id": "c1", "name": "Burgers", "items": []}]},
//!   "toppings": {"rest-1": [{"id": "t1", "name": "Sauces", "toppings": []}]}
//! }
//! ```

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::cache::{DataSource, DataSourceError, RestaurantId};
use crate::domain::entities::{MenuCategory, Restaurant, ToppingCategory};

use super::error::InfraError;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FixtureData {
    pub restaurants: Vec<Restaurant>,
    pub menus: HashMap<String, Vec<MenuCategory>>,
    pub toppings: HashMap<String, Vec<ToppingCategory>>,
}

#[derive(Debug, Clone, Default)]
pub struct JsonFixtureSource {
    data: FixtureData,
}

impl JsonFixtureSource {
    pub fn new(data: FixtureData) -> Self {
        Self { data }
    }

    pub async fn load(path: &Path) -> Result<Self, InfraError> {
        let raw = tokio::fs::read_to_string(path).await?;
        let data: FixtureData = serde_json::from_str(&raw)
            .map_err(|err| InfraError::fixture(format!("{}: {err}", path.display())))?;
        debug!(
            path = %path.display(),
            restaurants = data.restaurants.len(),
            "Fixture data loaded"
        );
        Ok(Self::new(data))
    }
}

#[async_trait]
impl DataSource for JsonFixtureSource {
    async fn restaurant_by_slug(&self, slug: &str) -> Result<Option<Restaurant>, DataSourceError> {
        Ok(self
            .data
            .restaurants
            .iter()
            .find(|restaurant| restaurant.slug == slug)
            .cloned())
    }

    async fn restaurant(&self, id: &RestaurantId) -> Result<Option<Restaurant>, DataSourceError> {
        Ok(self
            .data
            .restaurants
            .iter()
            .find(|restaurant| restaurant.id == id.as_str())
            .cloned())
    }

    async fn menu_categories(
        &self,
        id: &RestaurantId,
    ) -> Result<Option<Vec<MenuCategory>>, DataSourceError> {
        Ok(self.data.menus.get(id.as_str()).cloned())
    }

    async fn topping_categories(
        &self,
        id: &RestaurantId,
    ) -> Result<Option<Vec<ToppingCategory>>, DataSourceError> {
        Ok(self.data.toppings.get(id.as_str()).cloned())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    const SAMPLE: &str = r#"{
        "restaurants": [{"id": "rest-1", "slug": "harbor-grill", "name": "Harbor Grill"}],
        "menus": {"rest-1": [{"id": "c1", "name": "Burgers", "items": [{"id": "i1", "name": "Classic"}]}]}
    }"#;

    #[tokio::test]
    async fn loads_and_serves_records() {
        let mut file = NamedTempFile::new().expect("temp file");
        file.write_all(SAMPLE.as_bytes()).expect("write fixture");

        let source = JsonFixtureSource::load(file.path()).await.expect("load");
        let restaurant = source
            .restaurant_by_slug("harbor-grill")
            .await
            .expect("lookup")
            .expect("present");
        assert_eq!(restaurant.id, "rest-1");

        let id = RestaurantId::new("rest-1");
        let menu = source.menu_categories(&id).await.expect("menu").expect("present");
        assert_eq!(menu[0].items.len(), 1);
        assert!(source.topping_categories(&id).await.expect("toppings").is_none());
    }

    #[tokio::test]
    async fn malformed_file_is_a_fixture_error() {
        let mut file = NamedTempFile::new().expect("temp file");
        file.write_all(b"{\"restaurants\": 3}").expect("write fixture");

        let err = JsonFixtureSource::load(file.path()).await.expect_err("malformed");
        assert!(matches!(err, InfraError::Fixture { .. }));
    }
}
