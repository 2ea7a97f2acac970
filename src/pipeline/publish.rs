//! Output publishing: one object per page under the output location.
//!
//! Names are a pure function of the source name and page index, so a rerun
//! for the same source overwrites the same objects. Page bytes are read back
//! from the scratch file, so only the page being uploaded is held in memory.

use crate::config::Location;
use crate::error::JobError;
use crate::output::{output_object_name, PageImage, SourceRef};
use crate::storage::BlobStorage;
use bytes::Bytes;
use tracing::{debug, error, info};

/// Content type written on every page object.
pub const TIFF_CONTENT_TYPE: &str = "image/tiff";

/// Upload `page` of `source` to `output`. Returns the object key written.
pub async fn publish_page(
    storage: &dyn BlobStorage,
    output: &Location,
    source: &SourceRef,
    page: &PageImage,
) -> Result<String, JobError> {
    let name = output_object_name(&source.name, page.index);
    let object = output.object(&name);

    let data = tokio::fs::read(&page.scratch)
        .await
        .map_err(|e| JobError::workspace(&page.scratch, e))?;

    debug!(
        page = page.index,
        output = %object,
        bytes = data.len(),
        "Uploading page"
    );

    storage
        .put(&object, Bytes::from(data), Some(TIFF_CONTENT_TYPE))
        .await
        .map_err(|e| {
            error!(page = page.index, output = %object, error = %e, "Page upload failed");
            JobError::UploadError {
                object: object.to_string(),
                source: e,
            }
        })?;

    info!(page = page.index, output = %object, "Page published");
    Ok(object.key)
}
