//! Price lookup for dynamically priced services.
//!
//! Services normally carry a static price in their descriptor. When
//! `dynamic_price` is set, the gateway asks a [`Pricer`] for the price of the
//! concrete resource path at challenge time instead.

use serde::Deserialize;
use url::Url;

use crate::{Error, Result};

/// Price lookup capability.
#[async_trait::async_trait]
pub trait Pricer: Send + Sync {
    /// Price associated with the resource at `path`.
    async fn get_price(&self, path: &str) -> Result<i64>;
}

/// Pricer that charges the same price for every resource.
pub struct DefaultPricer {
    price: i64,
}

impl DefaultPricer {
    /// Create a pricer that answers `price` for every path.
    #[must_use]
    pub fn new(price: i64) -> Self {
        Self { price }
    }
}

#[async_trait::async_trait]
impl Pricer for DefaultPricer {
    async fn get_price(&self, _path: &str) -> Result<i64> {
        Ok(self.price)
    }
}

#[derive(Debug, Deserialize)]
struct PriceResponse {
    price: i64,
}

/// Pricer backed by a remote HTTP price server.
///
/// Queries `GET <base>/price?path=<path>` and expects a JSON body of the form
/// `{"price": <integer>}`.
pub struct RemotePricer {
    client: reqwest::Client,
    base_url: Url,
}

impl RemotePricer {
    /// Create a pricer querying the server at `base_url`.
    pub fn new(base_url: &str) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| Error::Config(format!("invalid pricer url {base_url:?}: {e}")))?;
        Ok(Self {
            client: reqwest::Client::new(),
            base_url,
        })
    }
}

#[async_trait::async_trait]
impl Pricer for RemotePricer {
    async fn get_price(&self, path: &str) -> Result<i64> {
        let mut url = self
            .base_url
            .join("price")
            .map_err(|e| Error::Price(format!("invalid price url: {e}")))?;
        url.query_pairs_mut().append_pair("path", path);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::Price(format!("price server unreachable: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Price(format!("price server returned {status}")));
        }

        let body: PriceResponse = response
            .json()
            .await
            .map_err(|e| Error::Price(format!("invalid price response: {e}")))?;

        Ok(body.price)
    }
}
