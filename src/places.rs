use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::error::{ApiError, ApiResult};

const TEXT_SEARCH_URL: &str = "https://maps.googleapis.com/maps/api/place/textsearch/json";
const DETAILS_URL: &str = "https://maps.googleapis.com/maps/api/place/details/json";
const DETAIL_FIELDS: &str = "name,formatted_address,formatted_phone_number,international_phone_number,website,geometry,address_components,type";

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct AddressComponent {
    #[serde(default)]
    pub long_name: String,
    #[serde(default)]
    pub short_name: String,
    #[serde(default)]
    pub types: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Geometry {
    pub location: Option<LatLng>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PlaceDetails {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub formatted_address: String,
    #[serde(default)]
    pub international_phone_number: String,
    #[serde(default)]
    pub website: String,
    #[serde(default)]
    pub geometry: Geometry,
    #[serde(default)]
    pub address_components: Vec<AddressComponent>,
    #[serde(default)]
    pub types: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct SearchCandidate {
    place_id: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    status: String,
    #[serde(default)]
    results: Vec<SearchCandidate>,
}

#[derive(Debug, Deserialize)]
struct DetailsResponse {
    status: String,
    result: Option<PlaceDetails>,
}

/// Places directory seam. `Ok(None)` means the service answered but had
/// nothing for the query.
#[async_trait]
pub trait PlaceLookup: Send + Sync {
    /// Best match's place id for a free-text query.
    async fn search(&self, query: &str) -> ApiResult<Option<String>>;

    async fn details(&self, place_id: &str) -> ApiResult<Option<PlaceDetails>>;
}

pub struct GooglePlaces {
    http: Client,
    api_key: String,
}

impl GooglePlaces {
    pub fn new(api_key: impl Into<String>) -> Self {
        GooglePlaces {
            http: Client::new(),
            api_key: api_key.into(),
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        params: &[(&str, &str)],
    ) -> ApiResult<T> {
        let resp = self
            .http
            .get(url)
            .query(params)
            .query(&[("key", self.api_key.as_str())])
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ApiError::Status {
                status: status.as_u16(),
                body,
            });
        }

        resp.json::<T>()
            .await
            .map_err(|e| ApiError::Parse(e.to_string()))
    }
}

/// `ZERO_RESULTS`/`NOT_FOUND` are answers, any other non-OK status is an error.
fn check_status(status: &str) -> ApiResult<bool> {
    match status {
        "OK" => Ok(true),
        "ZERO_RESULTS" | "NOT_FOUND" => Ok(false),
        other => Err(ApiError::Api(other.to_string())),
    }
}

#[async_trait]
impl PlaceLookup for GooglePlaces {
    async fn search(&self, query: &str) -> ApiResult<Option<String>> {
        let resp: SearchResponse = self.get_json(TEXT_SEARCH_URL, &[("query", query)]).await?;
        if !check_status(&resp.status)? {
            debug!("No results found for: {}", query);
            return Ok(None);
        }
        Ok(resp.results.into_iter().next().map(|c| c.place_id))
    }

    async fn details(&self, place_id: &str) -> ApiResult<Option<PlaceDetails>> {
        let resp: DetailsResponse = self
            .get_json(DETAILS_URL, &[("place_id", place_id), ("fields", DETAIL_FIELDS)])
            .await?;
        if !check_status(&resp.status)? {
            return Ok(None);
        }
        Ok(resp.result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn details_payload_parses_with_missing_fields() {
        let raw = r#"{
            "status": "OK",
            "result": {
                "name": "CLSC de Verdun",
                "formatted_address": "400 Rue de l'Église, Verdun, QC H4G 2M4, Canada",
                "geometry": { "location": { "lat": 45.46, "lng": -73.57 } },
                "address_components": [
                    { "long_name": "Montréal", "short_name": "Montréal", "types": ["locality", "political"] }
                ],
                "types": ["health", "point_of_interest"]
            }
        }"#;
        let resp: DetailsResponse = serde_json::from_str(raw).unwrap();
        let d = resp.result.unwrap();
        assert_eq!(d.name, "CLSC de Verdun");
        assert!(d.website.is_empty());
        assert_eq!(d.geometry.location.unwrap().lat, 45.46);
        assert_eq!(d.address_components[0].types[0], "locality");
    }

    #[test]
    fn search_status_handling() {
        assert!(check_status("OK").unwrap());
        assert!(!check_status("ZERO_RESULTS").unwrap());
        let err = check_status("OVER_QUERY_LIMIT").unwrap_err();
        assert!(err.is_retryable());
        assert!(!check_status("REQUEST_DENIED").unwrap_err().is_retryable());
    }

    #[test]
    fn empty_search_payload() {
        let resp: SearchResponse =
            serde_json::from_str(r#"{"status":"ZERO_RESULTS","results":[]}"#).unwrap();
        assert!(resp.results.is_empty());
    }
}
