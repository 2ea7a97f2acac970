//! Relocation of the source into the archive location.
//!
//! Copy first, confirm the archive object exists, then delete the source.
//! [`BlobStorage::copy`] returns only once the archive object is committed, so
//! the existence check sees the finished copy, not a pending one.
//! A failure at any point leaves the source in the input location; only a
//! failed delete can leave the object in both places.

use crate::config::Locations;
use crate::error::{JobError, StorageError};
use crate::output::SourceRef;
use crate::storage::BlobStorage;
use tracing::{error, info, warn};

/// Copy `source` from the input to the archive location.
///
/// Returns the archive object key once the copy is confirmed.
pub async fn archive_source(
    storage: &dyn BlobStorage,
    locations: &Locations,
    source: &SourceRef,
) -> Result<String, JobError> {
    let from = locations.input.object(&source.name);
    let to = locations.archive.object(&source.name);
    let failed = |e: StorageError| JobError::ArchiveCopyError {
        name: source.name.clone(),
        source: e,
    };

    let source_url = source.url(storage.endpoint(), &locations.input);
    info!(from = %from, to = %to, source_url = %source_url, "Archive copy started");
    if let Err(e) = storage.copy(&from, &to).await {
        error!(from = %from, to = %to, error = %e, "Archive copy failed");
        return Err(failed(e));
    }

    match storage.exists(&to).await {
        Ok(true) => {}
        Ok(false) => {
            error!(to = %to, "Archive copy reported success but the object is missing");
            return Err(failed(StorageError::not_found(to.to_string())));
        }
        Err(e) => return Err(failed(e)),
    }

    info!(to = %to, "Archive copy complete");
    Ok(to.key)
}

/// Delete `source` from the input location. Only call after
/// [`archive_source`] succeeded.
pub async fn delete_source(
    storage: &dyn BlobStorage,
    locations: &Locations,
    source: &SourceRef,
) -> Result<(), JobError> {
    let object = locations.input.object(&source.name);
    storage.delete(&object).await.map_err(|e| {
        warn!(
            source = %object,
            error = %e,
            "Source delete failed; object now exists in input and archive"
        );
        JobError::SourceCleanupError {
            name: source.name.clone(),
            source: e,
        }
    })?;
    info!(source = %object, "Source deleted from input location");
    Ok(())
}
