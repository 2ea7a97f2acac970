//! Blob storage seam.
//!
//! The pipeline talks to storage only through [`BlobStorage`], which knows
//! five verbs: get, put, copy, delete, exists (plus list, used for
//! inspection). [`ObjectStoreStorage`] implements it on top of
//! [`object_store`], holding one store per container: Azure Blob in
//! production, [`InMemory`] in tests.
//!
//! A copy is a server-side `copy` when both keys live in the same container.
//! An `ObjectStore` handle is bound to a single container, so a copy between
//! containers streams the source into a multipart upload instead: chunks are
//! forwarded as they arrive and the object is never buffered whole. Either
//! way `copy` returns only after the destination object is committed.

use crate::config::{Location, StorageSettings};
use crate::error::{JobError, StorageError};
use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use object_store::azure::MicrosoftAzureBuilder;
use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::{
    Attribute, GetResult, ObjectStore, PutMultipartOpts, PutOptions, PutPayload, WriteMultipart,
};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Part size of the multipart upload behind a cross-container copy.
const COPY_CHUNK_SIZE: usize = 8 * 1024 * 1024;

/// Parts of one copy in flight at once.
const COPY_MAX_CONCURRENCY: usize = 4;

/// Endpoint reported by stores that have no public URL.
const MEMORY_ENDPOINT: &str = "memory://local";

/// Fully-qualified object address: container plus key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectRef {
    pub container: String,
    pub key: String,
}

impl ObjectRef {
    pub fn new(container: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            container: container.into(),
            key: key.into(),
        }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.container, self.key)
    }
}

impl Location {
    /// Address of the logical name `name` in this location.
    pub fn object(&self, name: &str) -> ObjectRef {
        ObjectRef::new(self.container.clone(), self.key(name))
    }
}

/// Operations the job needs from the blob service.
#[async_trait]
pub trait BlobStorage: Send + Sync {
    /// Base URL that objects are addressed under, e.g.
    /// `https://acct.blob.core.windows.net`.
    fn endpoint(&self) -> &str;

    /// Download the whole object.
    async fn get(&self, object: &ObjectRef) -> StorageResult<Bytes>;

    /// Create or overwrite an object.
    async fn put(
        &self,
        object: &ObjectRef,
        data: Bytes,
        content_type: Option<&str>,
    ) -> StorageResult<()>;

    /// Copy `from` to `to`, returning once the copy is complete.
    async fn copy(&self, from: &ObjectRef, to: &ObjectRef) -> StorageResult<()>;

    /// Delete an object. Deleting a missing object is an error.
    async fn delete(&self, object: &ObjectRef) -> StorageResult<()>;

    /// Whether the object exists.
    async fn exists(&self, object: &ObjectRef) -> StorageResult<bool>;

    /// Keys in `container` under `prefix` (all keys when empty), sorted.
    async fn list(&self, container: &str, prefix: &str) -> StorageResult<Vec<String>>;
}

/// [`BlobStorage`] backed by one [`ObjectStore`] per container.
#[derive(Clone)]
pub struct ObjectStoreStorage {
    stores: HashMap<String, Arc<dyn ObjectStore>>,
    endpoint: String,
    copy_chunk_size: usize,
}

impl Default for ObjectStoreStorage {
    fn default() -> Self {
        Self {
            stores: HashMap::new(),
            endpoint: MEMORY_ENDPOINT.to_string(),
            copy_chunk_size: COPY_CHUNK_SIZE,
        }
    }
}

impl ObjectStoreStorage {
    /// An empty registry; add containers with [`with_store`](Self::with_store).
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the base URL reported by [`BlobStorage::endpoint`].
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    /// Register `store` as the backend for `container`.
    pub fn with_store(mut self, container: impl Into<String>, store: Arc<dyn ObjectStore>) -> Self {
        self.stores.insert(container.into(), store);
        self
    }

    /// Fresh in-memory stores for each container.
    pub fn in_memory<'a>(containers: impl IntoIterator<Item = &'a str>) -> Self {
        containers.into_iter().fold(Self::new(), |acc, c| {
            acc.with_store(c, Arc::new(InMemory::new()) as Arc<dyn ObjectStore>)
        })
    }

    /// Azure Blob stores for each container of one storage account.
    pub fn azure<'a>(
        settings: &StorageSettings,
        containers: impl IntoIterator<Item = &'a str>,
    ) -> Result<Self, JobError> {
        let mut storage = Self::new().with_endpoint(settings.blob_endpoint());
        for container in containers {
            let mut builder = MicrosoftAzureBuilder::new()
                .with_account(&settings.account_name)
                .with_container_name(container);

            if let Some(ref key) = settings.account_key {
                builder = builder.with_access_key(key);
            }

            if let Some(ref sas) = settings.sas_token {
                let pairs: Vec<(String, String)> = sas
                    .split('&')
                    .filter(|pair| !pair.is_empty())
                    .map(|pair| match pair.split_once('=') {
                        Some((k, v)) => (k.to_string(), v.to_string()),
                        None => (pair.to_string(), String::new()),
                    })
                    .collect();
                builder = builder.with_sas_authorization(pairs);
            }

            if let Some(ref endpoint) = settings.blob_endpoint {
                builder = builder
                    .with_endpoint(endpoint.clone())
                    .with_allow_http(endpoint.starts_with("http://"));
            }

            let store = builder.build().map_err(|e| {
                JobError::InvalidConfig(format!("azure store for '{container}': {e}"))
            })?;
            storage = storage.with_store(container, Arc::new(store) as Arc<dyn ObjectStore>);
        }

        tracing::info!(
            account = %settings.account_name,
            endpoint = %storage.endpoint,
            containers = storage.stores.len(),
            "Storage backend initialized"
        );

        Ok(storage)
    }

    fn store(&self, container: &str) -> StorageResult<&Arc<dyn ObjectStore>> {
        self.stores
            .get(container)
            .ok_or_else(|| StorageError::UnknownContainer(container.to_string()))
    }
}

impl fmt::Debug for ObjectStoreStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut containers: Vec<&String> = self.stores.keys().collect();
        containers.sort();
        f.debug_struct("ObjectStoreStorage")
            .field("endpoint", &self.endpoint)
            .field("containers", &containers)
            .finish()
    }
}

/// Forward every chunk of `source` into `writer`, returning the bytes copied.
async fn forward_chunks(writer: &mut WriteMultipart, source: GetResult) -> object_store::Result<usize> {
    let mut chunks = source.into_stream();
    let mut size = 0;
    while let Some(chunk) = chunks.try_next().await? {
        writer.wait_for_capacity(COPY_MAX_CONCURRENCY).await?;
        writer.write(&chunk);
        size += chunk.len();
    }
    Ok(size)
}

#[async_trait]
impl BlobStorage for ObjectStoreStorage {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn get(&self, object: &ObjectRef) -> StorageResult<Bytes> {
        let store = self.store(&object.container)?;
        let data = store.get(&Path::from(object.key.as_str())).await?.bytes().await?;
        debug!(object = %object, size = data.len(), "Object read");
        Ok(data)
    }

    async fn put(
        &self,
        object: &ObjectRef,
        data: Bytes,
        content_type: Option<&str>,
    ) -> StorageResult<()> {
        let store = self.store(&object.container)?;
        let size = data.len();
        let mut opts = PutOptions::default();
        if let Some(ct) = content_type {
            opts.attributes
                .insert(Attribute::ContentType, ct.to_string().into());
        }
        store
            .put_opts(&Path::from(object.key.as_str()), PutPayload::from(data), opts)
            .await?;
        debug!(object = %object, size, "Object written");
        Ok(())
    }

    async fn copy(&self, from: &ObjectRef, to: &ObjectRef) -> StorageResult<()> {
        let src = self.store(&from.container)?;
        if from.container == to.container {
            src.copy(
                &Path::from(from.key.as_str()),
                &Path::from(to.key.as_str()),
            )
            .await?;
            debug!(from = %from, to = %to, "Server-side copy complete");
            return Ok(());
        }

        let dst = self.store(&to.container)?;
        let source = src.get(&Path::from(from.key.as_str())).await?;
        let opts = PutMultipartOpts {
            attributes: source.attributes.clone(),
            ..Default::default()
        };
        let upload = dst
            .put_multipart_opts(&Path::from(to.key.as_str()), opts)
            .await?;
        let mut writer = WriteMultipart::new_with_chunk_size(upload, self.copy_chunk_size);

        let size = match forward_chunks(&mut writer, source).await {
            Ok(size) => size,
            Err(e) => {
                if let Err(abort) = writer.abort().await {
                    warn!(to = %to, error = %abort, "Failed to abort partial copy");
                }
                return Err(e.into());
            }
        };
        writer.finish().await?;
        debug!(from = %from, to = %to, size, "Streamed cross-container copy complete");
        Ok(())
    }

    async fn delete(&self, object: &ObjectRef) -> StorageResult<()> {
        let store = self.store(&object.container)?;
        let path = Path::from(object.key.as_str());
        // Some backends treat deleting a missing key as success; the job
        // relies on a missing source surfacing as NotFound.
        store.head(&path).await?;
        store.delete(&path).await?;
        debug!(object = %object, "Object deleted");
        Ok(())
    }

    async fn exists(&self, object: &ObjectRef) -> StorageResult<bool> {
        let store = self.store(&object.container)?;
        match store.head(&Path::from(object.key.as_str())).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, container: &str, prefix: &str) -> StorageResult<Vec<String>> {
        let store = self.store(container)?;
        let prefix = if prefix.is_empty() {
            None
        } else {
            Some(Path::from(prefix))
        };
        let entries: Vec<_> = store.list(prefix.as_ref()).try_collect().await?;
        let mut keys: Vec<String> = entries
            .into_iter()
            .map(|meta| meta.location.to_string())
            .collect();
        keys.sort();
        Ok(keys)
    }
}
