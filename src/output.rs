//! Data model: source references, page images, and job reports.
//!
//! Output names are derived purely from the source's logical name and the
//! page index, so the same source always maps to the same set of output
//! objects. A redelivered invocation overwrites rather than duplicates.

use crate::config::Location;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

/// Reference to the object that triggered an invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    /// Logical name relative to the input location, e.g. `invoice.pdf`.
    pub name: String,
    /// Byte length reported by the trigger, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<u64>,
}

impl SourceRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            length: None,
        }
    }

    pub fn with_length(mut self, length: u64) -> Self {
        self.length = Some(length);
        self
    }

    /// Build a reference from a trigger path, which storage events report as
    /// `{container}/{name}`. The container prefix is stripped when present.
    pub fn from_trigger_path(path: &str, input_container: &str) -> Self {
        let path = path.trim_start_matches('/');
        let name = path
            .strip_prefix(input_container)
            .and_then(|rest| rest.strip_prefix('/'))
            .unwrap_or(path);
        Self::new(name)
    }

    /// Logical name with the final extension removed.
    pub fn stem(&self) -> &str {
        source_stem(&self.name)
    }

    /// URL of this object in `location` under the given blob endpoint.
    pub fn url(&self, blob_endpoint: &str, location: &Location) -> String {
        format!(
            "{}/{}/{}",
            blob_endpoint.trim_end_matches('/'),
            location.container,
            location.key(self.name.trim_start_matches('/'))
        )
    }
}

impl fmt::Display for SourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Strip the final extension from the last path segment of `name`.
///
/// Directory components are kept. Leading dots of the segment never start an
/// extension, so `..pdf` and `.hidden` are their own stems.
pub fn source_stem(name: &str) -> &str {
    let segment_start = name.rfind('/').map(|i| i + 1).unwrap_or(0);
    let segment = &name[segment_start..];
    let body_start = segment_start + (segment.len() - segment.trim_start_matches('.').len());
    match name[body_start..].rfind('.') {
        Some(dot) => &name[..body_start + dot],
        None => name,
    }
}

/// Name of the output object for page `index` (1-based) of `source_name`.
pub fn output_object_name(source_name: &str, index: usize) -> String {
    format!("{}_page_{}.tiff", source_stem(source_name), index)
}

/// One rendered and encoded page.
#[derive(Debug, Clone)]
pub struct PageImage {
    /// 1-based page index.
    pub index: usize,
    /// Pixel width.
    pub width: u32,
    /// Pixel height.
    pub height: u32,
    /// Resolution tagged into the image, in DPI.
    pub dpi: u32,
    /// Size of the encoded TIFF in bytes.
    pub bytes: u64,
    /// Scratch file holding the encoded TIFF; publishing uploads from here.
    pub scratch: PathBuf,
}

/// Result of a successful invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobReport {
    /// Unique id of this invocation.
    pub invocation_id: Uuid,
    /// Logical name of the source.
    pub source: String,
    /// Bytes staged from the input location.
    pub source_bytes: u64,
    /// Output object names in page order.
    pub outputs: Vec<String>,
    /// Archive object key.
    pub archive: String,
    /// Scratch files removed during cleanup.
    pub scratch_files_removed: usize,
    /// Wall-clock duration of the whole invocation.
    pub total_duration_ms: u64,
    /// Time spent rendering and encoding.
    pub render_duration_ms: u64,
    /// Time spent uploading pages.
    pub publish_duration_ms: u64,
}

impl JobReport {
    /// Number of pages published.
    pub fn page_count(&self) -> usize {
        self.outputs.len()
    }
}
