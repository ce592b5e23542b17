//! バックエンドHTTPクライアント
//!
//! `/search` はNDJSONのストリーミング応答。本文はチャンクのまま返し、
//! デコードは [`itinerary_common::pump`] に任せる。

use crate::config::Config;
use crate::error::{AppError, Result};
use futures::{Stream, StreamExt};
use crate::program::ProgramBackend;
use itinerary_common::api::{
    ApiResponse, AuthStatus, DeleteProgramRequest, PlaceDetails, SaveCityCacheResponse,
    UpdateProgramRequest,
};
use itinerary_common::{CitySnapshot, Endpoints, ItineraryPayload, ProgramDetails, SearchRequest};
use reqwest::header::{HeaderMap, HeaderValue, COOKIE};
use serde::de::DeserializeOwned;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    endpoints: Endpoints,
}

impl ApiClient {
    pub fn new(config: &Config) -> Result<Self> {
        // ストリームは長く続くので接続だけにタイムアウトをかける
        let mut headers = HeaderMap::new();
        if let Some(cookie) = config.session_cookie.as_deref().filter(|c| !c.trim().is_empty()) {
            let value = HeaderValue::from_str(cookie.trim())
                .map_err(|_| AppError::Config("セッションCookieが不正です".into()))?;
            headers.insert(COOKIE, value);
        }
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.timeout_seconds))
            .default_headers(headers)
            .build()?;
        Ok(Self {
            http,
            endpoints: Endpoints::new(&config.base_url()),
        })
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    /// 検索を開始し、応答本文のチャンク列を返す
    pub async fn open_search(
        &self,
        request: &SearchRequest,
    ) -> Result<impl Stream<Item = reqwest::Result<Vec<u8>>>> {
        log::debug!("POST {} ({} 件の履歴)", self.endpoints.search(), request.history.len());
        let response = self
            .http
            .post(self.endpoints.search())
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::ServerStatus(status.as_u16()));
        }
        Ok(response.bytes_stream().map(|chunk| chunk.map(|bytes| bytes.to_vec())))
    }

    pub async fn save_city_cache(&self, snapshot: &CitySnapshot) -> Result<SaveCityCacheResponse> {
        log::debug!("POST {} ({})", self.endpoints.save_city_cache(), snapshot.city);
        self.post_json(self.endpoints.save_city_cache(), snapshot).await
    }

    pub async fn place_details(&self, place_id: &str) -> Result<PlaceDetails> {
        self.get_json(self.endpoints.place_details(place_id)).await
    }

    async fn get_json<T: DeserializeOwned>(&self, url: String) -> Result<T> {
        let response = self.http.get(url).send().await?;
        read_json(response).await
    }

    async fn post_json<B, T>(&self, url: String, body: &B) -> Result<T>
    where
        B: serde::Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self.http.post(url).json(body).send().await?;
        read_json(response).await
    }
}

async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let status = response.status();
    if !status.is_success() {
        return Err(AppError::ServerStatus(status.as_u16()));
    }
    Ok(response.json().await?)
}

impl ProgramBackend for ApiClient {
    async fn auth_status(&self) -> Result<AuthStatus> {
        self.get_json(self.endpoints.auth_status()).await
    }

    async fn save_itinerary(&self, payload: &ItineraryPayload) -> Result<ApiResponse> {
        log::debug!("POST {} ({} 件)", self.endpoints.save_itinerary(), payload.num_locali);
        self.post_json(self.endpoints.save_itinerary(), payload).await
    }

    async fn update_program(&self, request: &UpdateProgramRequest) -> Result<ApiResponse> {
        log::debug!("POST {} ({})", self.endpoints.update_program(), request.program_id);
        self.post_json(self.endpoints.update_program(), request).await
    }

    async fn program_details(&self, program_id: &str) -> Result<ProgramDetails> {
        self.get_json(self.endpoints.program_details(program_id)).await
    }

    async fn delete_program(&self, program_id: &str) -> Result<ApiResponse> {
        let request = DeleteProgramRequest {
            program_id: program_id.to_string(),
        };
        self.post_json(self.endpoints.delete_program(), &request).await
    }

    async fn place_details(&self, place_id: &str) -> Result<PlaceDetails> {
        ApiClient::place_details(self, place_id).await
    }

    fn login_url(&self) -> String {
        self.endpoints.login_for_autosave()
    }
}
