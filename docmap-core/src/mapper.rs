//! The mapper: connections, model metadata and the per-model service cache.

use std::{
    any::{Any, TypeId},
    collections::HashMap,
    sync::Arc,
};

use mea::rwlock::RwLock;
use tracing::debug;

use crate::{
    driver::StoreDriver,
    error::{MapperError, MapperResult},
    model::{DEFAULT_CONNECTION, Model},
    registry::{ConnectionRegistry, MetadataRegistry},
    service::RecordService,
};

type ServiceMap = HashMap<TypeId, Arc<dyn Any + Send + Sync>>;

/// Entry point of the mapping engine.
///
/// A mapper is created at startup, given its connections, and shut down explicitly. Services are
/// created on first request and shared afterwards.
///
/// # Example
///
/// ```ignore
/// use docmap::{Mapper, memory::MemoryDriver};
///
/// let mapper = Mapper::with_driver(Arc::new(MemoryDriver::new())).await;
/// let logs = mapper.service::<Log>().await?;
/// // ...
/// mapper.shutdown().await?;
/// ```
#[derive(Debug, Default)]
pub struct Mapper {
    connections: ConnectionRegistry,
    models: Arc<MetadataRegistry>,
    services: RwLock<ServiceMap>,
}

impl Mapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// A mapper whose default connection is `driver`.
    pub async fn with_driver(driver: Arc<dyn StoreDriver>) -> Self {
        let mapper = Self::new();
        mapper.connections.open(DEFAULT_CONNECTION, driver).await;
        mapper
    }

    pub fn connections(&self) -> &ConnectionRegistry {
        &self.connections
    }

    pub fn models(&self) -> &Arc<MetadataRegistry> {
        &self.models
    }

    /// Compiles and registers the metadata of `M` without creating its service, so references
    /// to `M` can be resolved.
    pub fn register<M: Model>(&self) -> MapperResult<()> {
        self.models.register::<M>().map(|_| ())
    }

    /// The service of `M`, created on the model's connection on first request.
    ///
    /// # Errors
    ///
    /// [`MapperError::Initialization`] when the model's connection is not open, and
    /// [`MapperError::Mapping`] when its schema does not compile.
    pub async fn service<M: Model>(&self) -> MapperResult<Arc<RecordService<M>>> {
        let key = TypeId::of::<M>();

        if let Some(service) = self.services.read().await.get(&key).cloned() {
            return downcast(service);
        }

        let mut services = self.services.write().await;
        if let Some(service) = services.get(&key).cloned() {
            return downcast(service);
        }

        let driver = self.connections.get(M::connection_name()).await?;
        let service = Arc::new(RecordService::<M>::new(driver, Arc::clone(&self.models))?);
        debug!(
            model = M::model_name(),
            connection = M::connection_name(),
            "created record service"
        );

        services.insert(key, Arc::clone(&service) as Arc<dyn Any + Send + Sync>);
        Ok(service)
    }

    /// Drops every service and closes every connection.
    pub async fn shutdown(&self) -> MapperResult<()> {
        self.services.write().await.clear();
        self.connections.close_all().await
    }
}

fn downcast<M: Model>(service: Arc<dyn Any + Send + Sync>) -> MapperResult<Arc<RecordService<M>>> {
    service.downcast::<RecordService<M>>().map_err(|_| {
        MapperError::InvalidState(format!("service cache holds a foreign entry for `{}`", M::model_name()))
    })
}
