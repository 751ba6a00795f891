use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::info;
use url::Url;

use crate::backend::{local, memory, s3};
use crate::bucket::Bucket;
use crate::error::{Error, Result};

type Opener = Arc<dyn Fn(Url) -> BoxFuture<'static, Result<Bucket>> + Send + Sync>;

/// URL scheme to bucket constructor table.
///
/// Each backend module contributes its entry through its own `register`
/// function; crates outside this one add schemes the same way.
#[derive(Clone)]
pub struct Registry {
    openers: BTreeMap<String, Opener>,
}

impl Registry {
    /// A registry that knows no schemes at all.
    pub fn empty() -> Self {
        Self {
            openers: BTreeMap::new(),
        }
    }

    pub fn register<F, Fut>(&mut self, scheme: &str, opener: F)
    where
        F: Fn(Url) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Bucket>> + Send + 'static,
    {
        let opener: Opener =
            Arc::new(move |url| -> BoxFuture<'static, Result<Bucket>> { Box::pin(opener(url)) });
        self.openers.insert(scheme.to_ascii_lowercase(), opener);
    }

    pub fn schemes(&self) -> Vec<&str> {
        self.openers.keys().map(String::as_str).collect()
    }

    pub async fn open(&self, url: &str) -> Result<Bucket> {
        let parsed = Url::parse(url)
            .map_err(|e| Error::InvalidArgument(format!("invalid bucket url {url:?}: {e}")))?;
        let scheme = parsed.scheme().to_string();
        let opener = self.openers.get(&scheme).ok_or_else(|| {
            Error::InvalidArgument(format!(
                "unknown bucket scheme {scheme:?} (supported: {})",
                self.schemes().join(", ")
            ))
        })?;

        let bucket = opener(parsed).await?;
        info!(scheme = %scheme, "bucket opened");
        Ok(bucket)
    }
}

impl Default for Registry {
    /// The built-in backends: `mem`, `file` and `s3`.
    fn default() -> Self {
        let mut registry = Self::empty();
        memory::register(&mut registry);
        local::register(&mut registry);
        s3::register(&mut registry);
        registry
    }
}

/// Open a bucket with the built-in backends.
pub async fn open_bucket(url: &str) -> Result<Bucket> {
    Registry::default().open(url).await
}

/// First value of a query parameter on a bucket URL.
pub fn query_param(url: &Url, name: &str) -> Option<String> {
    url.query_pairs()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
        .filter(|v| !v.is_empty())
}
