//! Upstream sites API: signup, paginated listing, and the keyed upsert of
//! the collected records.
//!
//! Blocking reqwest client (no Tokio runtime required).

use std::time::Duration;

use serde::Deserialize;
use serde_json::{Map, Value as JsonValue};

use crate::entity::Site;
use crate::error::IngestError;
use crate::model::RecordSet;
use crate::normalize::ColumnNormalizer;
use crate::reconcile::{CommitMode, ReconcileReport, UpsertReconciler};
use crate::store::Store;

pub type SiteRecord = Map<String, JsonValue>;

/// One page of `/get_list_of_sites`.
#[derive(Debug, Clone, Deserialize)]
pub struct SitesPage {
    #[serde(default)]
    pub data: Vec<SiteRecord>,
    #[serde(default)]
    pub total: usize,
}

#[derive(Debug, Deserialize)]
struct SignupResponse {
    access_token: Option<String>,
}

pub struct SitesClient {
    http: reqwest::blocking::Client,
    base_url: String,
    token: Option<String>,
}

impl SitesClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, IngestError> {
        if base_url.trim().is_empty() {
            return Err(IngestError::Config(
                "sites.base_url is not set (config or SITES_API_URL)".into(),
            ));
        }
        let http = reqwest::blocking::Client::builder()
            .user_agent(format!("rawsync/{}", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| IngestError::Upstream(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: None,
        })
    }

    /// Register and keep the returned bearer token. `password` is sent in the
    /// body and as the `password` query parameter the API expects.
    pub fn signup(&mut self, fullname: &str, email: &str, password: &str) -> Result<String, IngestError> {
        let url = format!("{}/user/signup", self.base_url);
        let response = self
            .http
            .post(&url)
            .query(&[("password", password)])
            .json(&serde_json::json!({
                "fullname": fullname,
                "email": email,
                "password": password,
            }))
            .send()
            .map_err(|e| IngestError::Upstream(format!("signup failed: {e}")))?;
        let response = check_status(response, "signup")?;

        let body: SignupResponse = response
            .json()
            .map_err(|e| IngestError::Upstream(format!("signup: unreadable response: {e}")))?;
        let token = body
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| IngestError::Upstream("signup: response has no access_token".into()))?;
        log::info!("signed up to sites API as {email}");
        self.token = Some(token.clone());
        Ok(token)
    }

    pub fn list_page(&self, page: usize, limit: usize) -> Result<SitesPage, IngestError> {
        let token = self.token.as_deref().ok_or_else(|| {
            IngestError::Upstream("not authenticated: call signup first".into())
        })?;
        let url = format!("{}/get_list_of_sites", self.base_url);
        let response = self
            .http
            .get(&url)
            .query(&[("page", page), ("limit", limit)])
            .header("accept", "application/json")
            .bearer_auth(token)
            .send()
            .map_err(|e| IngestError::Upstream(format!("failed to fetch sites: {e}")))?;
        let response = check_status(response, "list sites")?;
        response
            .json()
            .map_err(|e| IngestError::Upstream(format!("list sites: unreadable page {page}: {e}")))
    }

    /// Page from 0 until the collected count reaches the first page's
    /// `total`, or a page comes back empty.
    pub fn fetch_all(&self, batch_size: usize) -> Result<Vec<SiteRecord>, IngestError> {
        let mut all = Vec::new();
        let mut total = None;
        let mut page = 0;
        loop {
            let response = self.list_page(page, batch_size)?;
            let total = *total.get_or_insert(response.total);
            let received = response.data.len();
            all.extend(response.data);
            log::debug!("sites page {page}: {received} records ({}/{total})", all.len());

            if all.len() >= total || received == 0 {
                break;
            }
            page += 1;
        }
        log::info!("fetched {} sites", all.len());
        Ok(all)
    }
}

fn check_status(
    response: reqwest::blocking::Response,
    what: &str,
) -> Result<reqwest::blocking::Response, IngestError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().unwrap_or_default();
        return Err(IngestError::Upstream(format!(
            "{what}: HTTP {}: {body}",
            status.as_u16()
        )));
    }
    Ok(response)
}

/// Normalize the fetched records with the `site` rules and upsert them by
/// `source_id`.
pub fn collect_sites<S: Store>(
    records: &[SiteRecord],
    normalizer: &ColumnNormalizer,
    store: &mut S,
    mode: CommitMode,
) -> Result<ReconcileReport, IngestError> {
    let set = RecordSet::from_json_objects(records);
    let set = normalizer.normalize(&set, "site")?;
    UpsertReconciler::new(store, mode).reconcile::<Site>(&set)
}
