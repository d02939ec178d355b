use std::time::Duration;

use pyaz_types::{JoinRequest, LeaderRecord, PyazError, Result};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

fn disc_err(e: reqwest::Error) -> PyazError {
    PyazError::Discovery(e.to_string())
}

/// HTTP client for the discovery registry, used by nodes to look up the
/// leader, announce themselves, and drain the join queue.
#[derive(Clone)]
pub struct DiscoveryClient {
    base_url: String,
    http: reqwest::Client,
}

impl DiscoveryClient {
    /// `base_url` is the registry's base URL, e.g. `http://127.0.0.1:7000`.
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(disc_err)?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(DiscoveryClient { base_url, http })
    }

    /// The current leader, or `None` when the registry has no fresh record.
    pub async fn get_leader(&self) -> Result<Option<LeaderRecord>> {
        let resp = self
            .http
            .get(format!("{}/leader", self.base_url))
            .send()
            .await
            .map_err(disc_err)?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(PyazError::Discovery(format!("GET /leader: {}", resp.status())));
        }
        Ok(Some(resp.json().await.map_err(disc_err)?))
    }

    pub async fn put_leader(&self, record: &LeaderRecord) -> Result<()> {
        let resp = self
            .http
            .put(format!("{}/leader", self.base_url))
            .json(record)
            .send()
            .await
            .map_err(disc_err)?;
        ok_status(resp, "PUT /leader")
    }

    pub async fn post_join(&self, id: &str, addr: &str) -> Result<()> {
        let request = JoinRequest { id: id.into(), addr: addr.into(), started_at: 0 };
        let resp = self
            .http
            .post(format!("{}/join-requests", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(disc_err)?;
        ok_status(resp, "POST /join-requests")
    }

    pub async fn list_joins(&self) -> Result<Vec<JoinRequest>> {
        let resp = self
            .http
            .get(format!("{}/join-requests", self.base_url))
            .send()
            .await
            .map_err(disc_err)?;
        if !resp.status().is_success() {
            return Err(PyazError::Discovery(format!(
                "GET /join-requests: {}",
                resp.status()
            )));
        }
        resp.json().await.map_err(disc_err)
    }

    pub async fn delete_join(&self, id: &str) -> Result<()> {
        let resp = self
            .http
            .delete(format!("{}/join-requests", self.base_url))
            .query(&[("id", id)])
            .send()
            .await
            .map_err(disc_err)?;
        ok_status(resp, "DELETE /join-requests")
    }
}

fn ok_status(resp: reqwest::Response, what: &str) -> Result<()> {
    if resp.status().is_success() {
        Ok(())
    } else {
        Err(PyazError::Discovery(format!("{what}: {}", resp.status())))
    }
}
