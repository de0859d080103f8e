//! Where the locality mapping comes from.

use std::path::PathBuf;

use futures::FutureExt;
use futures::future::BoxFuture;
use thiserror::Error;
use wreq::{Client, header};

use crate::types::Dataset;

/// Failure to obtain or accept the locality dataset
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Failed to load locality mapping from {url} ({status})")]
    Http { url: String, status: u16 },
    #[error("Failed to reach {url}: {message}")]
    Transport { url: String, message: String },
    #[error("Failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Malformed locality mapping: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid locality mapping: {0}")]
    Invalid(String),
}

/// Something that can produce the dataset on demand.
///
/// The returned future must own everything it needs so it can be shared
/// by every caller waiting on the same load.
pub trait DatasetSource: Send + Sync {
    fn fetch(&self) -> BoxFuture<'static, Result<Dataset, LoadError>>;

    /// Human readable location for logs
    fn describe(&self) -> String;
}

/// Dataset served as a static JSON asset
#[derive(Clone)]
pub struct HttpSource {
    client: Client,
    url: String,
}

impl HttpSource {
    pub fn new(client: Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

impl DatasetSource for HttpSource {
    fn fetch(&self) -> BoxFuture<'static, Result<Dataset, LoadError>> {
        let client = self.client.clone();
        let url = self.url.clone();
        async move {
            let transport = |e: wreq::Error| LoadError::Transport {
                url: url.clone(),
                message: e.to_string(),
            };

            let response = client
                .get(&url)
                .header(header::ACCEPT, "application/json")
                .send()
                .await
                .map_err(transport)?;

            let status = response.status();
            if !status.is_success() {
                return Err(LoadError::Http {
                    url: url.clone(),
                    status: status.as_u16(),
                });
            }

            let body = response.bytes().await.map_err(transport)?;
            Ok(serde_json::from_slice(&body)?)
        }
        .boxed()
    }

    fn describe(&self) -> String {
        self.url.clone()
    }
}

/// Dataset stored on local disk
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl DatasetSource for FileSource {
    fn fetch(&self) -> BoxFuture<'static, Result<Dataset, LoadError>> {
        let path = self.path.clone();
        async move {
            let body = tokio::fs::read(&path)
                .await
                .map_err(|source| LoadError::Io {
                    path: path.clone(),
                    source,
                })?;
            Ok(serde_json::from_slice(&body)?)
        }
        .boxed()
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Fixed in-memory dataset, mostly for tests and embedding
#[derive(Debug, Clone)]
pub struct StaticSource {
    dataset: Dataset,
}

impl StaticSource {
    pub fn new(dataset: Dataset) -> Self {
        Self { dataset }
    }

    pub fn from_json(json: &str) -> Result<Self, LoadError> {
        Ok(Self::new(serde_json::from_str(json)?))
    }
}

impl DatasetSource for StaticSource {
    fn fetch(&self) -> BoxFuture<'static, Result<Dataset, LoadError>> {
        futures::future::ready(Ok(self.dataset.clone())).boxed()
    }

    fn describe(&self) -> String {
        format!("<static: {} localities>", self.dataset.localities.len())
    }
}

/// Pick an HTTP or file source from a configured location string.
pub fn source_for_location(client: &Client, location: &str) -> Box<dyn DatasetSource> {
    if location.starts_with("http://") || location.starts_with("https://") {
        Box::new(HttpSource::new(client.clone(), location))
    } else {
        Box::new(FileSource::new(location))
    }
}
