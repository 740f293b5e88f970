// ABOUTME: Config source client that fetches the desired set of workers.
// ABOUTME: HTTP and file sources; failures are logged and read as an empty desired set.

use crate::error::FetchError;
use async_trait::async_trait;
use fleet_core::{FileSourceConfig, HttpSourceConfig, LaunchSpec, SourceConfig, WorkerIdentity};
use reqwest::header::ACCEPT;
use reqwest::{Client, Method};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

/// Record fields that may carry the worker identity, in priority order.
const IDENTITY_KEYS: &[&str] = &["identity", "id", "agent_id", "agentId"];

/// Longest error body kept from a failed response.
const MAX_ERROR_BODY: usize = 200;

#[async_trait]
pub trait ConfigSource: Send + Sync {
    /// Fetch the desired set, surfacing why it failed.
    async fn try_fetch(&self) -> Result<Vec<LaunchSpec>, FetchError>;

    /// Short description for log lines (URL or path).
    fn describe(&self) -> String;

    /// Fetch the desired set. Never fails: any error is logged and an empty
    /// set is returned, which the reconciler treats like "nothing desired".
    async fn fetch_desired(&self) -> Vec<LaunchSpec> {
        match self.try_fetch().await {
            Ok(specs) => {
                tracing::debug!(source = %self.describe(), count = specs.len(), "Fetched desired workers");
                specs
            }
            Err(e) => {
                tracing::warn!(
                    source = %self.describe(),
                    error = %e,
                    "Failed to fetch desired workers, treating as empty"
                );
                Vec::new()
            }
        }
    }
}

/// Build the configured source.
pub fn from_config(config: &SourceConfig) -> Result<Box<dyn ConfigSource>, FetchError> {
    Ok(match config {
        SourceConfig::Http(http) => Box::new(HttpSource::new(http)?),
        SourceConfig::File(file) => Box::new(FileSource::new(file)),
    })
}

/// Remote source: one authenticated request per fetch.
pub struct HttpSource {
    client: Client,
    method: Method,
    endpoint: String,
    token: Option<String>,
}

impl HttpSource {
    pub fn new(config: &HttpSourceConfig) -> Result<Self, FetchError> {
        let method = Method::from_bytes(config.method.trim().to_ascii_uppercase().as_bytes())
            .map_err(|_| FetchError::Method(config.method.clone()))?;

        let timeout = config.timeout();
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(10)))
            .build()?;

        Ok(Self {
            client,
            method,
            endpoint: config.endpoint(),
            token: config.bearer_token().map(str::to_string),
        })
    }
}

#[async_trait]
impl ConfigSource for HttpSource {
    async fn try_fetch(&self) -> Result<Vec<LaunchSpec>, FetchError> {
        let mut request = self
            .client
            .request(self.method.clone(), &self.endpoint)
            .header(ACCEPT, "application/json");
        if let Some(ref token) = self.token {
            request = request.bearer_auth(token);
        }

        let resp = request.send().await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let mut body = resp.text().await.unwrap_or_default();
            truncate_at_char_boundary(&mut body, MAX_ERROR_BODY);
            return Err(FetchError::Status { status, body });
        }

        let bytes = resp.bytes().await?;
        let body: DesiredBody = serde_json::from_slice(&bytes)?;
        specs_from_records(body.into_records())
    }

    fn describe(&self) -> String {
        format!("{} {}", self.method, self.endpoint)
    }
}

/// Local source: a TOML file with `[[workers]]` tables, re-read every fetch.
pub struct FileSource {
    path: PathBuf,
}

#[derive(Deserialize)]
struct WorkersFile {
    #[serde(default)]
    workers: Vec<Value>,
}

impl FileSource {
    pub fn new(config: &FileSourceConfig) -> Self {
        Self {
            path: config.path_expanded(),
        }
    }
}

#[async_trait]
impl ConfigSource for FileSource {
    async fn try_fetch(&self) -> Result<Vec<LaunchSpec>, FetchError> {
        let content =
            tokio::fs::read_to_string(&self.path)
                .await
                .map_err(|source| FetchError::Read {
                    path: self.path.clone(),
                    source,
                })?;
        let file: WorkersFile = toml::from_str(&content).map_err(|source| FetchError::Parse {
            path: self.path.clone(),
            source,
        })?;
        specs_from_records(file.workers)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Accepted response shapes: a bare array, or an object wrapping one.
#[derive(Deserialize)]
#[serde(untagged)]
enum DesiredBody {
    List(Vec<Value>),
    Wrapped {
        #[serde(alias = "agents")]
        workers: Vec<Value>,
    },
}

impl DesiredBody {
    fn into_records(self) -> Vec<Value> {
        match self {
            DesiredBody::List(records) => records,
            DesiredBody::Wrapped { workers } => workers,
        }
    }
}

/// Convert raw records into launch specs.
///
/// Every record must be an object. Records without a usable identity are
/// skipped; for duplicate identities the first record wins. Scalar fields
/// other than the identity become launch params.
pub fn specs_from_records(records: Vec<Value>) -> Result<Vec<LaunchSpec>, FetchError> {
    let mut seen = HashSet::new();
    let mut specs = Vec::with_capacity(records.len());

    for (index, record) in records.into_iter().enumerate() {
        let Value::Object(mut fields) = record else {
            return Err(FetchError::Record(format!("record {} is not an object", index)));
        };

        // Every alias is consumed so none of them leaks into the params
        let mut identity = None;
        for key in IDENTITY_KEYS {
            let candidate = fields
                .remove(*key)
                .and_then(scalar_to_string)
                .and_then(|raw| WorkerIdentity::new(raw).ok());
            if identity.is_none() {
                identity = candidate;
            }
        }
        let Some(identity) = identity else {
            tracing::warn!(index, "Skipping worker record without an identity");
            continue;
        };

        if !seen.insert(identity.clone()) {
            tracing::warn!(identity = %identity, "Duplicate worker record, keeping the first");
            continue;
        }

        let mut spec = LaunchSpec::new(identity);
        for (key, value) in fields {
            if let Some(value) = scalar_to_string(value) {
                spec.params.insert(key, value);
            }
        }
        specs.push(spec);
    }

    Ok(specs)
}

fn scalar_to_string(value: Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

fn truncate_at_char_boundary(s: &mut String, max: usize) {
    if s.len() <= max {
        return;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s.truncate(end);
}
