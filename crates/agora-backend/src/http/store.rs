//! Record store over the backend's filtered REST endpoints.
//!
//! Rows travel as plain JSON arrays. A read that matches nothing is an
//! empty array and maps to `Ok(None)` / an empty vector — the "no row"
//! case is decided here, structurally, and never leaves this module as an
//! error.

use async_trait::async_trait;
use serde::Deserialize;

use agora_core::{Listing, Profile, ProfileId, UserId};

use crate::StoreResult;
use crate::error::StoreError;
use crate::store::RecordStore;

use super::HttpBackend;

/// Error body shape the record endpoints produce.
#[derive(Debug, Default, Deserialize)]
struct StoreErrorBody {
    message: Option<String>,
    #[serde(default)]
    details: Option<String>,
}

impl StoreErrorBody {
    fn message(&self) -> String {
        self.message
            .clone()
            .or_else(|| self.details.clone())
            .unwrap_or_else(|| "no error detail".to_string())
    }
}

impl HttpBackend {
    /// Maps a non-2xx record response to an error, consuming the body.
    async fn store_failure(response: reqwest::Response) -> StoreError {
        let status = response.status().as_u16();
        let body: StoreErrorBody = response.json().await.unwrap_or_default();

        match status {
            401 | 403 => StoreError::not_authorized(body.message()),
            409 => StoreError::conflict(body.message()),
            408 => StoreError::network("request timed out"),
            status if (500..600).contains(&status) => StoreError::server(status, body.message()),
            _ => StoreError::protocol(format!("unexpected status {status}: {}", body.message())),
        }
    }

    fn store_transport_error(e: reqwest::Error) -> StoreError {
        StoreError::network(e.to_string())
    }

    /// Issues a filtered GET and decodes the row array.
    async fn select<T: serde::de::DeserializeOwned>(
        &self,
        table: &str,
        query: &[(&str, String)],
    ) -> StoreResult<Vec<T>> {
        let mut url = self.endpoint(&["rest", "v1", table]);
        {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query {
                pairs.append_pair(key, value);
            }
        }

        let response = self
            .client
            .get(url)
            .header("apikey", &self.config.api_key)
            .bearer_auth(self.record_bearer().await)
            .send()
            .await
            .map_err(Self::store_transport_error)?;

        if !response.status().is_success() {
            return Err(Self::store_failure(response).await);
        }

        response
            .json()
            .await
            .map_err(|e| StoreError::protocol(format!("malformed row payload: {e}")))
    }

    /// Issues a write returning the stored representation and decodes the
    /// single affected row.
    async fn write_returning(
        &self,
        request: reqwest::RequestBuilder,
        context: &str,
    ) -> StoreResult<Profile> {
        let response = request
            .header("apikey", &self.config.api_key)
            .bearer_auth(self.record_bearer().await)
            .header("prefer", "return=representation")
            .send()
            .await
            .map_err(Self::store_transport_error)?;

        if !response.status().is_success() {
            return Err(Self::store_failure(response).await);
        }

        let mut rows: Vec<Profile> = response
            .json()
            .await
            .map_err(|e| StoreError::protocol(format!("malformed row payload: {e}")))?;

        match rows.len() {
            1 => Ok(rows.remove(0)),
            0 => Err(StoreError::conflict(format!("{context} matched no row"))),
            n => Err(StoreError::protocol(format!("{context} affected {n} rows"))),
        }
    }
}

#[async_trait]
impl RecordStore for HttpBackend {
    async fn fetch_profile(&self, owner_id: &UserId) -> StoreResult<Option<Profile>> {
        let mut rows: Vec<Profile> = self
            .select(
                "profiles",
                &[
                    ("owner_id", format!("eq.{owner_id}")),
                    ("limit", "2".to_string()),
                ],
            )
            .await?;

        match rows.len() {
            0 => {
                tracing::debug!(owner = %owner_id, "no profile row");
                Ok(None)
            }
            1 => Ok(Some(rows.remove(0))),
            _ => Err(StoreError::protocol(format!(
                "multiple profile rows for owner {owner_id}"
            ))),
        }
    }

    async fn fetch_listings(&self, profile_id: &ProfileId) -> StoreResult<Vec<Listing>> {
        self.select(
            "listings",
            &[
                ("profile_id", format!("eq.{profile_id}")),
                ("order", "created_at.asc".to_string()),
            ],
        )
        .await
    }

    async fn insert_profile(&self, profile: &Profile) -> StoreResult<Profile> {
        let request = self
            .client
            .post(self.endpoint(&["rest", "v1", "profiles"]))
            .json(profile);
        let stored = self.write_returning(request, "insert").await?;
        tracing::info!(profile = %stored.id, owner = %stored.owner_id, "profile created");
        Ok(stored)
    }

    async fn update_profile(&self, profile: &Profile) -> StoreResult<Profile> {
        let mut url = self.endpoint(&["rest", "v1", "profiles"]);
        url.query_pairs_mut()
            .append_pair("id", &format!("eq.{}", profile.id));

        let request = self.client.patch(url).json(profile);
        let stored = self.write_returning(request, "update").await?;
        tracing::debug!(profile = %stored.id, "profile updated");
        Ok(stored)
    }

    async fn delete_profile(&self, profile_id: &ProfileId) -> StoreResult<()> {
        let mut url = self.endpoint(&["rest", "v1", "profiles"]);
        url.query_pairs_mut()
            .append_pair("id", &format!("eq.{profile_id}"));

        let response = self
            .client
            .delete(url)
            .header("apikey", &self.config.api_key)
            .bearer_auth(self.record_bearer().await)
            .send()
            .await
            .map_err(Self::store_transport_error)?;

        if !response.status().is_success() {
            return Err(Self::store_failure(response).await);
        }
        tracing::info!(profile = %profile_id, "profile deleted");
        Ok(())
    }
}
