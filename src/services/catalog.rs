use crate::{
    entities::{
        service_category, service_offering, ServiceCategory, ServiceCategoryModel,
        ServiceOffering, ServiceOfferingModel,
    },
    errors::ServiceError,
};
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder};
use std::sync::Arc;
use tracing::instrument;

/// Read model over the service catalog customers browse before checkout.
#[derive(Clone)]
pub struct CatalogService {
    db: Arc<DatabaseConnection>,
}

impl CatalogService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Lists every service category, alphabetically.
    #[instrument(skip(self))]
    pub async fn list_categories(&self) -> Result<Vec<ServiceCategoryModel>, ServiceError> {
        let categories = ServiceCategory::find()
            .order_by_asc(service_category::Column::Name)
            .all(&*self.db)
            .await?;

        Ok(categories)
    }

    /// Lists service offerings, optionally restricted to one category.
    #[instrument(skip(self))]
    pub async fn list_services(
        &self,
        category: Option<String>,
    ) -> Result<Vec<ServiceOfferingModel>, ServiceError> {
        let mut query = ServiceOffering::find().order_by_asc(service_offering::Column::Name);

        if let Some(category) = category {
            query = query.filter(service_offering::Column::CategoryName.eq(category));
        }

        let services = query.all(&*self.db).await?;
        Ok(services)
    }

    /// Fetches a single offering by its unique name.
    #[instrument(skip(self))]
    pub async fn get_service(&self, name: &str) -> Result<ServiceOfferingModel, ServiceError> {
        ServiceOffering::find()
            .filter(service_offering::Column::Name.eq(name))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Service {} not found", name)))
    }
}
