use futures::future::try_join_all;
use std::sync::Arc;
use std::time::Duration;

use super::{check_status, read_json, Draft, Product, ProductCache};
use crate::error::Result;
use crate::http_client::ApiClient;

/// Client for `/projects/{id}/products` with a per-project list cache
pub struct ProductsApi {
    client: Arc<ApiClient>,
    cache: ProductCache,
}

impl ProductsApi {
    pub fn new(client: Arc<ApiClient>) -> Self {
        Self {
            client,
            cache: ProductCache::default(),
        }
    }

    pub fn with_ttl(client: Arc<ApiClient>, ttl: Duration) -> Self {
        Self {
            client,
            cache: ProductCache::new(ttl),
        }
    }

    /// Products of one project, from cache unless stale or `force`
    pub async fn list(&self, project_id: &str, force: bool) -> Result<Vec<Product>> {
        if !force {
            if let Some(products) = self.cache.get(project_id) {
                tracing::debug!("Using cached products for project {}", project_id);
                return Ok(products);
            }
        }

        let response = self.client.get(&products_path(project_id)).await?;
        let mut products: Vec<Product> = read_json(
            response,
            &format!("Failed to fetch products for project {}", project_id),
        )
        .await?;

        for product in &mut products {
            product.project_id = Some(project_id.to_string());
        }

        self.cache.put(project_id, products.clone());
        Ok(products)
    }

    /// Products of several projects fetched concurrently, in project order.
    /// Fails as a whole when any project fails
    pub async fn list_many(&self, project_ids: &[String]) -> Result<Vec<Product>> {
        if project_ids.is_empty() {
            return Ok(Vec::new());
        }

        tracing::debug!("Fetching products for {} projects", project_ids.len());

        let lists = try_join_all(project_ids.iter().map(|id| self.list(id, false))).await?;
        Ok(lists.into_iter().flatten().collect())
    }

    pub async fn get(&self, project_id: &str, product_id: &str) -> Result<Product> {
        let response = self
            .client
            .get(&product_path(project_id, product_id))
            .await?;
        read_json(response, "Failed to fetch product").await
    }

    pub async fn create(&self, project_id: &str, draft: &Draft) -> Result<Product> {
        let response = self
            .client
            .post_json(&products_path(project_id), draft)
            .await?;
        let product: Product = read_json(response, "Failed to create product").await?;

        self.cache.invalidate(project_id);
        tracing::info!("Created product {} in project {}", product.id, project_id);
        Ok(product)
    }

    pub async fn update(&self, project_id: &str, product_id: &str, draft: &Draft) -> Result<Product> {
        let response = self
            .client
            .put_json(&product_path(project_id, product_id), draft)
            .await?;
        let product: Product = read_json(response, "Failed to update product").await?;

        self.cache.invalidate(project_id);
        tracing::info!("Updated product {} in project {}", product_id, project_id);
        Ok(product)
    }

    pub async fn delete(&self, project_id: &str, product_id: &str) -> Result<()> {
        let response = self
            .client
            .delete(&product_path(project_id, product_id))
            .await?;
        check_status(response, "Failed to delete product").await?;

        self.cache.invalidate(project_id);
        tracing::info!("Deleted product {} from project {}", product_id, project_id);
        Ok(())
    }

    pub fn clear_project_cache(&self, project_id: &str) {
        self.cache.invalidate(project_id);
    }

    pub fn clear_all(&self) {
        self.cache.clear();
    }

    pub fn cache(&self) -> &ProductCache {
        &self.cache
    }
}

fn products_path(project_id: &str) -> String {
    format!("projects/{}/products", project_id)
}

fn product_path(project_id: &str, product_id: &str) -> String {
    format!("projects/{}/products/{}", project_id, product_id)
}
