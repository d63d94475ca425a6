//! Connection and model metadata registries.
//!
//! Both registries are plain objects owned by a [`Mapper`](crate::mapper::Mapper) and handed to
//! every service it creates; nothing here is process-global.

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, PoisonError, RwLock as StdRwLock},
};

use mea::rwlock::RwLock;
use tracing::{debug, info};

use crate::{
    driver::StoreDriver,
    error::{MapperError, MapperResult},
    model::Model,
    schema::ModelMeta,
};

/// Named store connections with an explicit open/close lifecycle.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<String, Arc<dyn StoreDriver>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an opened driver under `name`, replacing and returning any previous one.
    pub async fn open(
        &self,
        name: impl Into<String>,
        driver: Arc<dyn StoreDriver>,
    ) -> Option<Arc<dyn StoreDriver>> {
        let name = name.into();
        info!(connection = %name, "opening connection");
        self.connections.write().await.insert(name, driver)
    }

    pub async fn get(&self, name: &str) -> MapperResult<Arc<dyn StoreDriver>> {
        self.connections
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| MapperError::Initialization(format!("connection `{name}` is not open")))
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.connections.read().await.contains_key(name)
    }

    pub async fn names(&self) -> Vec<String> {
        self.connections.read().await.keys().cloned().collect()
    }

    /// Shuts down and forgets the named connection. Returns `false` if it was not open.
    pub async fn close(&self, name: &str) -> MapperResult<bool> {
        let driver = self.connections.write().await.remove(name);
        match driver {
            Some(driver) => {
                info!(connection = %name, "closing connection");
                driver.shutdown().await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Shuts down every connection. All connections are removed even if one fails to shut down;
    /// the first failure is returned.
    pub async fn close_all(&self) -> MapperResult<()> {
        let drained: Vec<_> = self.connections.write().await.drain().collect();
        let mut first_error = None;

        for (name, driver) in drained {
            info!(connection = %name, "closing connection");
            if let Err(err) = driver.shutdown().await {
                first_error.get_or_insert(err);
            }
        }

        first_error.map_or(Ok(()), Err)
    }
}

/// Compiled model metadata keyed by model name.
///
/// Lookups are synchronous because the type coercer resolves reference targets while building a
/// payload.
#[derive(Debug, Default)]
pub struct MetadataRegistry {
    models: StdRwLock<HashMap<String, Arc<ModelMeta>>>,
}

impl MetadataRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compiles and registers the metadata of `M`. Registering a model again returns the
    /// metadata compiled the first time.
    pub fn register<M: Model>(&self) -> MapperResult<Arc<ModelMeta>> {
        if let Some(meta) = self.get(M::model_name()) {
            return Ok(meta);
        }

        let meta = Arc::new(ModelMeta::compile(M::model_name(), M::schema())?);
        Ok(self.insert(meta))
    }

    /// Registers precompiled metadata unless the model is already known, and returns the
    /// registered entry.
    pub fn insert(&self, meta: Arc<ModelMeta>) -> Arc<ModelMeta> {
        let mut models = self.models.write().unwrap_or_else(PoisonError::into_inner);
        let entry = models
            .entry(meta.model().to_string())
            .or_insert_with(|| {
                debug!(model = meta.model(), collection = meta.collection(), "registered model");
                meta
            });
        Arc::clone(entry)
    }

    pub fn get(&self, model: &str) -> Option<Arc<ModelMeta>> {
        self.models
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(model)
            .cloned()
    }

    /// Like [`get`](Self::get), failing with a mapping error for unknown models.
    pub fn require(&self, model: &str) -> MapperResult<Arc<ModelMeta>> {
        self.get(model)
            .ok_or_else(|| MapperError::Mapping(format!("`{model}` is not a mapped model")))
    }

    /// Whether `model` is `target` or declares it as a direct or indirect parent.
    pub fn is_a(&self, model: &str, target: &str) -> bool {
        let mut seen = HashSet::new();
        let mut pending = vec![model.to_string()];

        while let Some(current) = pending.pop() {
            if current == target {
                return true;
            }
            if !seen.insert(current.clone()) {
                continue;
            }
            if let Some(meta) = self.get(&current) {
                pending.extend(meta.parents().iter().cloned());
            }
        }

        false
    }
}
