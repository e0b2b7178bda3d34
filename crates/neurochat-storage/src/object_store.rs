// External object storage
//
// Tools store generated artifacts (plots, exports) under keys of the form
// `<user_id>/<uuid>` with `{category, thread_id}` metadata. Deleting a thread
// purges the matching objects after the database commit; the two halves are
// non-atomic by design, and the DB half always goes first so a storage-side
// leak is the only possible inconsistency.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

/// Object deletion batch limit of the storage backends
const DELETE_BATCH_SIZE: usize = 1000;

/// Metadata attached to stored objects
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObjectMetadata {
    pub category: String,
    pub thread_id: Option<Uuid>,
}

/// Seam over the platform's object storage service
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn put_object(
        &self,
        key: &str,
        content_type: &str,
        metadata: ObjectMetadata,
        body: Vec<u8>,
    ) -> Result<()>;

    /// Keys under a prefix
    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>>;

    async fn get_metadata(&self, key: &str) -> Result<Option<ObjectMetadata>>;

    /// Delete a batch of keys (at most 1000 per call)
    async fn delete_objects(&self, keys: &[String]) -> Result<()>;
}

/// Store content for a user, returning the generated object identifier
pub async fn save_to_storage(
    storage: &dyn ObjectStorage,
    user_id: Uuid,
    content_type: &str,
    category: &str,
    body: Vec<u8>,
    thread_id: Option<Uuid>,
) -> Result<String> {
    let identifier = Uuid::new_v4().to_string();
    let key = format!("{user_id}/{identifier}");

    storage
        .put_object(
            &key,
            content_type,
            ObjectMetadata {
                category: category.to_string(),
                thread_id,
            },
            body,
        )
        .await?;

    Ok(identifier)
}

/// Delete every object of `user_id` whose metadata ties it to `thread_id`,
/// in batches of up to 1000 keys. Failures are the caller's to log; the
/// thread row is already gone by the time this runs.
pub async fn purge_thread_objects(
    storage: &dyn ObjectStorage,
    user_id: Uuid,
    thread_id: Uuid,
) -> Result<usize> {
    let keys = storage.list_keys(&format!("{user_id}/")).await?;

    let mut to_delete = Vec::new();
    for key in keys {
        let metadata = storage.get_metadata(&key).await?;
        if metadata.and_then(|m| m.thread_id) == Some(thread_id) {
            to_delete.push(key);
        }
    }

    let deleted = to_delete.len();
    for batch in to_delete.chunks(DELETE_BATCH_SIZE) {
        storage.delete_objects(batch).await?;
    }

    tracing::info!(%user_id, %thread_id, deleted, "Purged thread objects");
    Ok(deleted)
}

/// In-memory storage used in tests and storage-less deployments
#[derive(Default)]
pub struct MemoryStorage {
    objects: Mutex<HashMap<String, (ObjectMetadata, Vec<u8>)>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.objects.lock().map(|o| o.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ObjectStorage for MemoryStorage {
    async fn put_object(
        &self,
        key: &str,
        _content_type: &str,
        metadata: ObjectMetadata,
        body: Vec<u8>,
    ) -> Result<()> {
        if let Ok(mut objects) = self.objects.lock() {
            objects.insert(key.to_string(), (metadata, body));
        }
        Ok(())
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>> {
        let objects = self
            .objects
            .lock()
            .map_err(|_| anyhow::anyhow!("storage lock poisoned"))?;
        let mut keys: Vec<String> = objects
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn get_metadata(&self, key: &str) -> Result<Option<ObjectMetadata>> {
        let objects = self
            .objects
            .lock()
            .map_err(|_| anyhow::anyhow!("storage lock poisoned"))?;
        Ok(objects.get(key).map(|(metadata, _)| metadata.clone()))
    }

    async fn delete_objects(&self, keys: &[String]) -> Result<()> {
        anyhow::ensure!(
            keys.len() <= DELETE_BATCH_SIZE,
            "delete batch exceeds {DELETE_BATCH_SIZE} keys"
        );
        if let Ok(mut objects) = self.objects.lock() {
            for key in keys {
                objects.remove(key);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_save_generates_user_scoped_key() {
        let storage = MemoryStorage::new();
        let user_id = Uuid::now_v7();
        let thread_id = Uuid::now_v7();

        let id = save_to_storage(
            &storage,
            user_id,
            "application/json",
            "json",
            b"{}".to_vec(),
            Some(thread_id),
        )
        .await
        .unwrap();

        let keys = storage.list_keys(&format!("{user_id}/")).await.unwrap();
        assert_eq!(keys, vec![format!("{user_id}/{id}")]);
        let metadata = storage.get_metadata(&keys[0]).await.unwrap().unwrap();
        assert_eq!(metadata.thread_id, Some(thread_id));
        assert_eq!(metadata.category, "json");
    }

    #[tokio::test]
    async fn test_purge_only_touches_matching_thread() {
        let storage = MemoryStorage::new();
        let user_id = Uuid::now_v7();
        let thread_a = Uuid::now_v7();
        let thread_b = Uuid::now_v7();
        let other_user = Uuid::now_v7();

        for _ in 0..3 {
            save_to_storage(&storage, user_id, "image/png", "image", vec![1], Some(thread_a))
                .await
                .unwrap();
        }
        save_to_storage(&storage, user_id, "image/png", "image", vec![2], Some(thread_b))
            .await
            .unwrap();
        save_to_storage(&storage, other_user, "image/png", "image", vec![3], Some(thread_a))
            .await
            .unwrap();

        let deleted = purge_thread_objects(&storage, user_id, thread_a).await.unwrap();

        assert_eq!(deleted, 3);
        assert_eq!(storage.len(), 2);
        // The other user's object survived even with the same thread id
        let survivors = storage.list_keys(&format!("{other_user}/")).await.unwrap();
        assert_eq!(survivors.len(), 1);
    }
}
