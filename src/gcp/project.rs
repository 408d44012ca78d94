//! Google Cloud project discovery.
//!
//! Trace ids in Cloud Logging are fully qualified by project
//! (`projects/<id>/traces/<trace>`). The project is looked up once, when the
//! sink is built; a lookup failure is not an error for logging purposes, the
//! sink just falls back to [`UNKNOWN_PROJECT`].

use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use http::StatusCode;
use http_body_util::{BodyExt, Empty};
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use serde::Deserialize;
use tokio::runtime;
use tokio::time;

use crate::error::Error;

/// Placeholder project used when discovery fails.
pub const UNKNOWN_PROJECT: &str = "unknown";

/// Environment variables naming the project, checked in order.
const PROJECT_ENV_VARS: &[&str] = &[
    "GOOGLE_CLOUD_PROJECT",
    "GCLOUD_PROJECT",
    "GCP_PROJECT",
    "CLOUDSDK_CORE_PROJECT",
];

const CREDENTIALS_ENV_VAR: &str = "GOOGLE_APPLICATION_CREDENTIALS";
const WELL_KNOWN_FILE: &str = "application_default_credentials.json";

/// Overrides the metadata server address (`host[:port]`).
pub const METADATA_HOST_ENV_VAR: &str = "GCE_METADATA_HOST";
const METADATA_IP: &str = "169.254.169.254";
const PROJECT_ID_PATH: &str = "/computeMetadata/v1/project/project-id";
const METADATA_TIMEOUT: Duration = Duration::from_millis(500);

/// Finds the project the process runs in.
pub trait ProjectResolver: Send + Sync {
    fn resolve(&self) -> Result<String, Error>;
}

/// A project id known up front.
#[derive(Clone, Debug)]
pub struct StaticProject(pub String);

impl ProjectResolver for StaticProject {
    fn resolve(&self) -> Result<String, Error> {
        if self.0.is_empty() {
            return Err(Error::NoProject);
        }
        Ok(self.0.clone())
    }
}

// ── MetadataServer ────────────────────────────────────────────────────────────

/// Asks the GCE metadata server, which answers on Compute Engine, Cloud Run,
/// GKE and App Engine.
///
/// [`resolve`](ProjectResolver::resolve) blocks the calling thread for at
/// most the timeout; the request runs on its own thread and runtime, so it is
/// safe to call from inside an async context.
#[derive(Clone, Debug)]
pub struct MetadataServer {
    host: String,
    timeout: Duration,
}

impl MetadataServer {
    /// `GCE_METADATA_HOST` if set, the link-local metadata address otherwise.
    pub fn new() -> Self {
        let host = std::env::var(METADATA_HOST_ENV_VAR)
            .ok()
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| METADATA_IP.to_owned());
        Self::with_host(host)
    }

    pub fn with_host(host: impl Into<String>) -> Self {
        Self { host: host.into(), timeout: METADATA_TIMEOUT }
    }

    /// How long to wait for an answer. Defaults to 500ms.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn fetch(&self) -> Result<String, Error> {
        let client = Client::builder(TokioExecutor::new()).build_http::<Empty<Bytes>>();
        let request = http::Request::get(format!("http://{}{PROJECT_ID_PATH}", self.host))
            .header("metadata-flavor", "Google")
            .body(Empty::new())
            .map_err(|e| Error::Metadata(e.to_string()))?;

        let response = client
            .request(request)
            .await
            .map_err(|e| Error::Metadata(e.to_string()))?;
        if response.status() != StatusCode::OK {
            return Err(Error::Metadata(format!("status {}", response.status())));
        }

        let body = response
            .into_body()
            .collect()
            .await
            .map_err(|e| Error::Metadata(e.to_string()))?
            .to_bytes();
        let id = std::str::from_utf8(&body)
            .map_err(|e| Error::Metadata(e.to_string()))?
            .trim();
        if id.is_empty() {
            return Err(Error::NoProject);
        }
        Ok(id.to_owned())
    }
}

impl Default for MetadataServer {
    fn default() -> Self { Self::new() }
}

impl ProjectResolver for MetadataServer {
    fn resolve(&self) -> Result<String, Error> {
        thread::scope(|s| {
            s.spawn(|| -> Result<String, Error> {
                let rt = runtime::Builder::new_current_thread().enable_all().build()?;
                let result = rt.block_on(async {
                    time::timeout(self.timeout, self.fetch())
                        .await
                        .map_err(|_| Error::Metadata(format!("no answer within {:?}", self.timeout)))?
                });
                rt.shutdown_background();
                result
            })
            .join()
            .unwrap_or_else(|_| Err(Error::Metadata("lookup thread panicked".to_owned())))
        })
    }
}

// ── DefaultCredentials ────────────────────────────────────────────────────────

type Lookup = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Application-default-credentials style discovery:
///
/// 1. `GOOGLE_CLOUD_PROJECT`, `GCLOUD_PROJECT`, `GCP_PROJECT`,
///    `CLOUDSDK_CORE_PROJECT`
/// 2. `project_id` of the service-account file named by
///    `GOOGLE_APPLICATION_CREDENTIALS`
/// 3. gcloud's `application_default_credentials.json` (`quota_project_id`)
/// 4. the [`MetadataServer`] at `GCE_METADATA_HOST` or the link-local address
pub struct DefaultCredentials {
    lookup: Lookup,
    metadata: Option<MetadataServer>,
}

#[derive(Deserialize)]
struct CredentialsFile {
    project_id: Option<String>,
    quota_project_id: Option<String>,
}

impl DefaultCredentials {
    /// Reads the process environment.
    pub fn new() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads variables through `lookup` instead of the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String> + Send + Sync + 'static) -> Self {
        let mut creds = Self { lookup: Box::new(lookup), metadata: None };
        let host = creds
            .var(METADATA_HOST_ENV_VAR)
            .unwrap_or_else(|| METADATA_IP.to_owned());
        creds.metadata = Some(MetadataServer::with_host(host));
        creds
    }

    /// Stops after the local sources; nothing goes over the network.
    pub fn without_metadata_server(mut self) -> Self {
        self.metadata = None;
        self
    }

    /// Replaces the metadata server step.
    pub fn metadata_server(mut self, server: MetadataServer) -> Self {
        self.metadata = Some(server);
        self
    }

    fn var(&self, key: &str) -> Option<String> {
        (self.lookup)(key).filter(|v| !v.is_empty())
    }

    fn well_known_file(&self) -> Option<PathBuf> {
        let dir = match self.var("CLOUDSDK_CONFIG") {
            Some(dir) => PathBuf::from(dir),
            None if cfg!(windows) => PathBuf::from(self.var("APPDATA")?).join("gcloud"),
            None => PathBuf::from(self.var("HOME")?).join(".config").join("gcloud"),
        };
        Some(dir.join(WELL_KNOWN_FILE))
    }
}

impl Default for DefaultCredentials {
    fn default() -> Self { Self::new() }
}

impl ProjectResolver for DefaultCredentials {
    fn resolve(&self) -> Result<String, Error> {
        if let Some(id) = PROJECT_ENV_VARS.iter().find_map(|key| self.var(key)) {
            return Ok(id);
        }

        if let Some(path) = self.var(CREDENTIALS_ENV_VAR) {
            return project_from_file(Path::new(&path));
        }

        if let Some(path) = self.well_known_file().filter(|p| p.is_file()) {
            return project_from_file(&path);
        }

        match &self.metadata {
            Some(server) => server.resolve(),
            None => Err(Error::NoProject),
        }
    }
}

fn project_from_file(path: &Path) -> Result<String, Error> {
    let bytes = fs::read(path)
        .map_err(|e| Error::Credentials(format!("{}: {e}", path.display())))?;
    let file: CredentialsFile = serde_json::from_slice(&bytes)?;
    file.project_id
        .filter(|id| !id.is_empty())
        .or(file.quota_project_id.filter(|id| !id.is_empty()))
        .ok_or(Error::NoProject)
}
