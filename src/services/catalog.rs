use async_trait::async_trait;
use rust_decimal::Decimal;
use sea_orm::{DatabaseConnection, EntityTrait};
use std::sync::Arc;
use uuid::Uuid;

use crate::entities::course::{self, CourseStatus};
use crate::errors::ServiceError;

/// Read-only view of the course catalog used for pricing
#[async_trait]
pub trait CourseCatalog: Send + Sync {
    /// Current persisted price; `NotFound` when the course does not exist
    async fn get_course_price(&self, course_id: Uuid) -> Result<Decimal, ServiceError>;

    async fn course_exists_and_published(&self, course_id: Uuid) -> Result<bool, ServiceError>;

    async fn course_title(&self, course_id: Uuid) -> Result<Option<String>, ServiceError>;
}

#[derive(Clone)]
pub struct DbCourseCatalog {
    db: Arc<DatabaseConnection>,
}

impl DbCourseCatalog {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    async fn find(&self, course_id: Uuid) -> Result<Option<course::Model>, ServiceError> {
        course::Entity::find_by_id(course_id)
            .one(&*self.db)
            .await
            .map_err(ServiceError::db_error)
    }
}

#[async_trait]
impl CourseCatalog for DbCourseCatalog {
    async fn get_course_price(&self, course_id: Uuid) -> Result<Decimal, ServiceError> {
        self.find(course_id)
            .await?
            .map(|c| c.price)
            .ok_or_else(|| ServiceError::NotFound(format!("Course {} not found", course_id)))
    }

    async fn course_exists_and_published(&self, course_id: Uuid) -> Result<bool, ServiceError> {
        Ok(self
            .find(course_id)
            .await?
            .map(|c| c.status == CourseStatus::Published)
            .unwrap_or(false))
    }

    async fn course_title(&self, course_id: Uuid) -> Result<Option<String>, ServiceError> {
        Ok(self.find(course_id).await?.map(|c| c.title))
    }
}
