//! Configuration types for the conversion job.
//!
//! Every job knob lives in [`JobConfig`], built via [`JobConfigBuilder`].
//! The storage connection is kept apart in [`StorageSettings`] because it
//! carries credentials and is only needed to construct a
//! [`crate::storage::BlobStorage`], never by the pipeline itself.
//!
//! All of it is static for the lifetime of the process: locations are not
//! negotiated at runtime and nothing here changes between invocations.

use crate::error::JobError;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Container used for incoming PDFs when none is configured.
pub const DEFAULT_INPUT_CONTAINER: &str = "docurefattachmenttest";
/// Container receiving page images when none is configured.
pub const DEFAULT_OUTPUT_CONTAINER: &str = "docurefattachmenttesttif";
/// Container receiving archived sources when none is configured.
pub const DEFAULT_ARCHIVE_CONTAINER: &str = "docurefattachmenttestarchive";

/// Output resolution for rendered pages.
pub const DEFAULT_DPI: u32 = 300;

/// One storage location: a container plus an optional key prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    /// Container (bucket) name.
    pub container: String,
    /// Key prefix inside the container, without leading or trailing `/`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
}

impl Location {
    pub fn new(container: impl Into<String>) -> Self {
        Self {
            container: container.into(),
            prefix: None,
        }
    }

    /// Sets the key prefix. Surrounding slashes are trimmed; an empty prefix
    /// clears it.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        let trimmed = prefix.trim_matches('/');
        self.prefix = if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        };
        self
    }

    /// Full object key for a logical name in this location.
    pub fn key(&self, name: &str) -> String {
        let name = name.trim_start_matches('/');
        match &self.prefix {
            Some(prefix) => format!("{prefix}/{name}"),
            None => name.to_string(),
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.prefix {
            Some(prefix) => write!(f, "{}/{}", self.container, prefix),
            None => f.write_str(&self.container),
        }
    }
}

/// The three locations the job moves data between.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Locations {
    /// Where source PDFs arrive.
    pub input: Location,
    /// Where page images are published.
    pub output: Location,
    /// Where processed sources are relocated.
    pub archive: Location,
}

impl Default for Locations {
    fn default() -> Self {
        Self {
            input: Location::new(DEFAULT_INPUT_CONTAINER),
            output: Location::new(DEFAULT_OUTPUT_CONTAINER),
            archive: Location::new(DEFAULT_ARCHIVE_CONTAINER),
        }
    }
}

impl Locations {
    /// Containers referenced by these locations, deduplicated, in
    /// input/output/archive order.
    pub fn containers(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::with_capacity(3);
        for c in [
            self.input.container.as_str(),
            self.output.container.as_str(),
            self.archive.container.as_str(),
        ] {
            if !out.contains(&c) {
                out.push(c);
            }
        }
        out
    }

    fn validate(&self) -> Result<(), JobError> {
        for (role, loc) in [
            ("input", &self.input),
            ("output", &self.output),
            ("archive", &self.archive),
        ] {
            if loc.container.trim().is_empty() {
                return Err(JobError::InvalidConfig(format!(
                    "{role} container must not be empty"
                )));
            }
        }
        if self.input == self.archive {
            return Err(JobError::InvalidConfig(format!(
                "input and archive locations are both '{}'; archiving would delete the only copy",
                self.input
            )));
        }
        Ok(())
    }
}

/// Configuration for a conversion job.
///
/// Built via [`JobConfig::builder()`] or [`JobConfig::default()`].
///
/// # Example
/// ```rust
/// use pdf2tiff::{JobConfig, Location, Locations};
///
/// let config = JobConfig::builder()
///     .locations(Locations {
///         input: Location::new("incoming"),
///         output: Location::new("pages"),
///         archive: Location::new("archive"),
///     })
///     .timeout_secs(300)
///     .build()
///     .unwrap();
/// assert_eq!(config.dpi, 300);
/// ```
#[derive(Clone)]
pub struct JobConfig {
    /// Target rendering resolution. Default: 300.
    ///
    /// PDF user space is 72 units per inch, so pages are rendered at a scale
    /// factor of `dpi / 72` and the resulting TIFFs are tagged with this DPI.
    pub dpi: u32,

    /// Input, output and archive locations.
    pub locations: Locations,

    /// Directory under which each invocation creates its private scratch
    /// directory. Default: the system temp dir.
    pub scratch_root: Option<PathBuf>,

    /// Per-invocation time budget. Default: none.
    ///
    /// On expiry the current step is abandoned, scratch files are removed and
    /// [`JobError::Timeout`] is returned.
    pub timeout: Option<Duration>,

    /// Maximum concurrent invocations when processing a batch. Default: 4.
    pub concurrency: usize,

    /// Explicit pdfium library path. Default: `PDFIUM_LIB_PATH`, then the
    /// system library search path.
    pub pdfium_library: Option<PathBuf>,

    /// Optional observer for state transitions.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            dpi: DEFAULT_DPI,
            locations: Locations::default(),
            scratch_root: None,
            timeout: None,
            concurrency: 4,
            pdfium_library: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for JobConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobConfig")
            .field("dpi", &self.dpi)
            .field("locations", &self.locations)
            .field("scratch_root", &self.scratch_root)
            .field("timeout", &self.timeout)
            .field("concurrency", &self.concurrency)
            .field("pdfium_library", &self.pdfium_library)
            .field(
                "progress_callback",
                &self
                    .progress_callback
                    .as_ref()
                    .map(|_| "<dyn JobProgressCallback>"),
            )
            .finish()
    }
}

impl JobConfig {
    /// Create a new builder for `JobConfig`.
    pub fn builder() -> JobConfigBuilder {
        JobConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`JobConfig`].
pub struct JobConfigBuilder {
    config: JobConfig,
}

impl fmt::Debug for JobConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobConfigBuilder")
            .field("config", &self.config)
            .finish()
    }
}

impl JobConfigBuilder {
    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi;
        self
    }

    pub fn locations(mut self, locations: Locations) -> Self {
        self.config.locations = locations;
        self
    }

    pub fn input(mut self, location: Location) -> Self {
        self.config.locations.input = location;
        self
    }

    pub fn output(mut self, location: Location) -> Self {
        self.config.locations.output = location;
        self
    }

    pub fn archive(mut self, location: Location) -> Self {
        self.config.locations.archive = location;
        self
    }

    pub fn scratch_root(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.scratch_root = Some(dir.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = Some(timeout);
        self
    }

    pub fn timeout_secs(self, secs: u64) -> Self {
        self.timeout(Duration::from_secs(secs))
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn pdfium_library(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pdfium_library = Some(path.into());
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<JobConfig, JobError> {
        let c = &self.config;
        if c.dpi < 72 || c.dpi > 1200 {
            return Err(JobError::InvalidConfig(format!(
                "DPI must be 72–1200, got {}",
                c.dpi
            )));
        }
        if c.timeout == Some(Duration::ZERO) {
            return Err(JobError::InvalidConfig("Timeout must be > 0".into()));
        }
        c.locations.validate()?;
        Ok(self.config)
    }
}

// ── Storage settings ─────────────────────────────────────────────────────

/// Account name and key of the local storage emulator (Azurite).
const DEV_ACCOUNT_NAME: &str = "devstoreaccount1";
const DEV_ACCOUNT_KEY: &str =
    "Eby8vdM02xNOcqFlqUwJPLlmEtlCDXJ1OUzFT50uSRZ6IFsuFq2UVErCz4I6tq/K1SZFPTOtr/KBHBeksoGMGw==";
const DEV_BLOB_ENDPOINT: &str = "http://127.0.0.1:10000/devstoreaccount1";

/// Connection settings for the storage account.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageSettings {
    /// Storage account name.
    pub account_name: String,
    /// Shared account key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_key: Option<String>,
    /// Shared Access Signature token (without the leading `?`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sas_token: Option<String>,
    /// Explicit blob endpoint (Azurite, sovereign clouds).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blob_endpoint: Option<String>,
}

impl fmt::Debug for StorageSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageSettings")
            .field("account_name", &self.account_name)
            .field("account_key", &self.account_key.as_ref().map(|_| "<redacted>"))
            .field("sas_token", &self.sas_token.as_ref().map(|_| "<redacted>"))
            .field("blob_endpoint", &self.blob_endpoint)
            .finish()
    }
}

impl StorageSettings {
    /// Parse an Azure storage connection string.
    ///
    /// Recognises `AccountName`, `AccountKey`, `SharedAccessSignature`,
    /// `BlobEndpoint`, `DefaultEndpointsProtocol`, `EndpointSuffix` and
    /// `UseDevelopmentStorage=true`. Keys are case-insensitive; values may
    /// themselves contain `=` (base64 keys do).
    pub fn from_connection_string(conn: &str) -> Result<Self, JobError> {
        let mut account_name = None;
        let mut account_key = None;
        let mut sas_token = None;
        let mut blob_endpoint = None;
        let mut protocol = None;
        let mut suffix = None;
        let mut dev = false;

        for part in conn.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            let (key, value) = part.split_once('=').ok_or_else(|| {
                JobError::InvalidConfig(format!("malformed connection string segment '{part}'"))
            })?;
            match key.trim().to_ascii_lowercase().as_str() {
                "accountname" => account_name = Some(value.to_string()),
                "accountkey" => account_key = Some(value.to_string()),
                "sharedaccesssignature" => {
                    sas_token = Some(value.trim_start_matches('?').to_string())
                }
                "blobendpoint" => blob_endpoint = Some(value.trim_end_matches('/').to_string()),
                "defaultendpointsprotocol" => protocol = Some(value.to_string()),
                "endpointsuffix" => suffix = Some(value.to_string()),
                "usedevelopmentstorage" => dev = value.eq_ignore_ascii_case("true"),
                _ => {}
            }
        }

        if dev {
            return Ok(Self {
                account_name: DEV_ACCOUNT_NAME.to_string(),
                account_key: Some(DEV_ACCOUNT_KEY.to_string()),
                sas_token: None,
                blob_endpoint: Some(blob_endpoint.unwrap_or_else(|| DEV_BLOB_ENDPOINT.into())),
            });
        }

        let account_name = account_name.ok_or_else(|| {
            JobError::InvalidConfig("connection string has no AccountName".into())
        })?;
        if account_key.is_none() && sas_token.is_none() {
            return Err(JobError::InvalidConfig(
                "connection string has neither AccountKey nor SharedAccessSignature".into(),
            ));
        }

        // Only materialise an endpoint when it differs from the public cloud
        // default; object_store derives that one from the account name.
        let blob_endpoint = blob_endpoint.or_else(|| match suffix.as_deref() {
            Some(s) if s != "core.windows.net" => Some(format!(
                "{}://{}.blob.{}",
                protocol.as_deref().unwrap_or("https"),
                account_name,
                s
            )),
            _ => None,
        });

        Ok(Self {
            account_name,
            account_key,
            sas_token,
            blob_endpoint,
        })
    }

    /// Read and parse a connection string from the named environment variable.
    pub fn from_env(var: &str) -> Result<Self, JobError> {
        let conn = std::env::var(var).map_err(|_| {
            JobError::InvalidConfig(format!("environment variable {var} is not set"))
        })?;
        Self::from_connection_string(&conn)
    }

    /// Base URL of the blob service.
    pub fn blob_endpoint(&self) -> String {
        self.blob_endpoint
            .clone()
            .unwrap_or_else(|| format!("https://{}.blob.core.windows.net", self.account_name))
    }
}
