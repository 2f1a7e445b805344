//! Google Places Text Search (v1) provider.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use url::Url;

use leadgen_fetcher::{RateLimitedFetcher, target_key};
use leadgen_shared::{BusinessRecord, LeadGenError, PolitenessConfig, Result};

use crate::provider::{MapSearchProvider, PageCursor, ProviderPage, SearchRequest, non_blank, read_json};

pub const PLACES_BASE_URL: &str = "https://places.googleapis.com";

/// The API caps `pageSize` at 20.
const MAX_PAGE_SIZE: u32 = 20;

const FIELD_MASK: &str = "places.displayName,places.formattedAddress,places.nationalPhoneNumber,\
places.websiteUri,places.rating,places.userRatingCount,nextPageToken";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TextSearchBody<'a> {
    text_query: &'a str,
    page_size: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    page_token: Option<&'a str>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TextSearchResponse {
    #[serde(default)]
    places: Vec<Place>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LocalizedText {
    text: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Place {
    #[serde(default)]
    display_name: Option<LocalizedText>,
    #[serde(default)]
    formatted_address: Option<String>,
    #[serde(default)]
    national_phone_number: Option<String>,
    #[serde(default)]
    website_uri: Option<String>,
    #[serde(default)]
    rating: Option<f64>,
    #[serde(default)]
    user_rating_count: Option<u32>,
}

impl Place {
    fn into_record(self) -> Option<BusinessRecord> {
        let name = non_blank(self.display_name.map(|d| d.text))?;
        Some(BusinessRecord {
            name,
            address: non_blank(self.formatted_address).unwrap_or_default(),
            phone: non_blank(self.national_phone_number),
            website: non_blank(self.website_uri),
            rating: self.rating,
            review_count: self.user_rating_count,
        })
    }
}

pub struct PlacesTextSearchProvider {
    fetcher: Arc<RateLimitedFetcher>,
    politeness: PolitenessConfig,
    endpoint: String,
    target: String,
    api_key: String,
}

impl PlacesTextSearchProvider {
    pub fn new(
        fetcher: Arc<RateLimitedFetcher>,
        politeness: PolitenessConfig,
        api_key: String,
        base_url: Option<&str>,
    ) -> Result<Self> {
        let base = base_url.unwrap_or(PLACES_BASE_URL).trim_end_matches('/');
        let parsed = Url::parse(base)
            .map_err(|e| LeadGenError::config(format!("invalid Places base URL {base}: {e}")))?;

        Ok(Self {
            fetcher,
            politeness,
            endpoint: format!("{base}/v1/places:searchText"),
            target: target_key(&parsed),
            api_key,
        })
    }
}

#[async_trait]
impl MapSearchProvider for PlacesTextSearchProvider {
    fn name(&self) -> &str {
        "places"
    }

    async fn search_page(
        &self,
        request: &SearchRequest,
        cursor: Option<&PageCursor>,
    ) -> Result<ProviderPage> {
        let page_token = match cursor {
            None => None,
            Some(PageCursor::Token(token)) => Some(token.as_str()),
            Some(PageCursor::Offset { .. } | PageCursor::Run { .. }) => {
                return Err(LeadGenError::validation(
                    "Places provider can only resume from a page token",
                ));
            }
        };

        let body = TextSearchBody {
            text_query: &request.phrase,
            page_size: request.page_size.clamp(1, MAX_PAGE_SIZE),
            page_token,
        };

        let builder = self
            .fetcher
            .client()
            .post(&self.endpoint)
            .header("X-Goog-Api-Key", &self.api_key)
            .header("X-Goog-FieldMask", FIELD_MASK)
            .json(&body);
        let response = self.fetcher.send(&self.target, builder, &self.politeness).await?;
        let parsed: TextSearchResponse = read_json(&self.target, response).await?;

        Ok(ProviderPage {
            records: parsed.places.into_iter().filter_map(Place::into_record).collect(),
            next: non_blank(parsed.next_page_token).map(PageCursor::Token),
        })
    }
}
