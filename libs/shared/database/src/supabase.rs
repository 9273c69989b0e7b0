use reqwest::{
    header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_RANGE, CONTENT_TYPE},
    Client, Method,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, error};

use shared_config::AppConfig;

use crate::error::DbError;
use crate::query::PostgrestQuery;

pub struct SupabaseClient {
    client: Client,
    base_url: String,
    anon_key: String,
}

impl SupabaseClient {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.supabase_url.trim_end_matches('/').to_string(),
            anon_key: config.supabase_anon_key.clone(),
        }
    }

    fn get_headers(&self, auth_token: Option<&str>) -> Result<HeaderMap, DbError> {
        let mut headers = HeaderMap::new();

        headers.insert(
            "apikey",
            HeaderValue::from_str(&self.anon_key)
                .map_err(|_| DbError::Header("anon key is not a valid header value".to_string()))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        if let Some(token) = auth_token {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {}", token))
                    .map_err(|_| DbError::Header("bearer token is not a valid header value".to_string()))?,
            );
        }

        Ok(headers)
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        auth_token: Option<&str>,
        body: Option<Value>,
        extra_headers: Option<HeaderMap>,
    ) -> Result<String, DbError> {
        let url = format!("{}{}", self.base_url, path);
        debug!("Making {} request to {}", method, url);

        let mut headers = self.get_headers(auth_token)?;
        if let Some(extra) = extra_headers {
            headers.extend(extra);
        }

        let mut req = self.client.request(method, &url).headers(headers);

        if let Some(body_data) = body {
            req = req.json(&body_data);
        }

        let response = req.send().await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            error!("API error ({}): {}", status, text);
            return Err(DbError::from_response(status, &text));
        }

        Ok(text)
    }

    pub async fn request<T>(
        &self,
        method: Method,
        path: &str,
        auth_token: Option<&str>,
        body: Option<Value>,
    ) -> Result<T, DbError>
    where
        T: DeserializeOwned,
    {
        self.request_with_headers(method, path, auth_token, body, None)
            .await
    }

    pub async fn request_with_headers<T>(
        &self,
        method: Method,
        path: &str,
        auth_token: Option<&str>,
        body: Option<Value>,
        extra_headers: Option<HeaderMap>,
    ) -> Result<T, DbError>
    where
        T: DeserializeOwned,
    {
        let text = self
            .send(method, path, auth_token, body, extra_headers)
            .await?;
        let data = serde_json::from_str::<T>(&text)?;
        Ok(data)
    }

    fn table_path(table: &str, query: &PostgrestQuery) -> String {
        if query.is_empty() {
            format!("/rest/v1/{}", table)
        } else {
            format!("/rest/v1/{}?{}", table, query)
        }
    }

    fn representation() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("Prefer", HeaderValue::from_static("return=representation"));
        headers
    }

    /// `GET /rest/v1/{table}?{query}`
    pub async fn select<T>(
        &self,
        table: &str,
        query: &PostgrestQuery,
        auth_token: Option<&str>,
    ) -> Result<Vec<T>, DbError>
    where
        T: DeserializeOwned,
    {
        self.request(Method::GET, &Self::table_path(table, query), auth_token, None)
            .await
    }

    /// Like `select` but the first row is required.
    pub async fn select_one<T>(
        &self,
        table: &str,
        query: &PostgrestQuery,
        auth_token: Option<&str>,
    ) -> Result<T, DbError>
    where
        T: DeserializeOwned,
    {
        let rows: Vec<T> = self.select(table, &query.clone().limit(1), auth_token).await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| DbError::NotFound(format!("no matching row in {}", table)))
    }

    /// Exact number of rows matching `query`. Only headers come back, so the
    /// server's max-rows cap does not apply.
    pub async fn count(
        &self,
        table: &str,
        query: &PostgrestQuery,
        auth_token: Option<&str>,
    ) -> Result<usize, DbError> {
        let url = format!("{}{}", self.base_url, Self::table_path(table, query));
        debug!("Counting rows at {}", url);

        let mut headers = self.get_headers(auth_token)?;
        headers.insert("Prefer", HeaderValue::from_static("count=exact"));

        let response = self.client.head(&url).headers(headers).send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await?;
            error!("API error ({}): {}", status, text);
            return Err(DbError::from_response(status, &text));
        }

        response
            .headers()
            .get(CONTENT_RANGE)
            .and_then(|value| value.to_str().ok())
            .and_then(content_range_total)
            .ok_or_else(|| DbError::Header(format!("count of {} returned no Content-Range total", table)))
    }

    /// Insert one row and return it as stored.
    pub async fn insert<T>(
        &self,
        table: &str,
        row: Value,
        auth_token: Option<&str>,
    ) -> Result<T, DbError>
    where
        T: DeserializeOwned,
    {
        let rows: Vec<T> = self
            .request_with_headers(
                Method::POST,
                &format!("/rest/v1/{}", table),
                auth_token,
                Some(row),
                Some(Self::representation()),
            )
            .await?;

        rows.into_iter().next().ok_or_else(|| DbError::Api {
            status: 500,
            message: format!("insert into {} returned no rows", table),
        })
    }

    /// Insert several rows at once.
    pub async fn insert_many<T>(
        &self,
        table: &str,
        rows: Vec<Value>,
        auth_token: Option<&str>,
    ) -> Result<Vec<T>, DbError>
    where
        T: DeserializeOwned,
    {
        self.request_with_headers(
            Method::POST,
            &format!("/rest/v1/{}", table),
            auth_token,
            Some(Value::Array(rows)),
            Some(Self::representation()),
        )
        .await
    }

    /// `PATCH` every row matching `filter`. An empty result means nothing matched,
    /// which callers treat as a lost race when the filter pins the current status.
    pub async fn update<T>(
        &self,
        table: &str,
        filter: &PostgrestQuery,
        changes: Value,
        auth_token: Option<&str>,
    ) -> Result<Vec<T>, DbError>
    where
        T: DeserializeOwned,
    {
        self.request_with_headers(
            Method::PATCH,
            &Self::table_path(table, filter),
            auth_token,
            Some(changes),
            Some(Self::representation()),
        )
        .await
    }

    pub async fn delete(
        &self,
        table: &str,
        filter: &PostgrestQuery,
        auth_token: Option<&str>,
    ) -> Result<(), DbError> {
        self.send(
            Method::DELETE,
            &Self::table_path(table, filter),
            auth_token,
            None,
            None,
        )
        .await?;
        Ok(())
    }

    pub async fn get_user_profile(&self, auth_token: &str) -> Result<Value, DbError> {
        self.request::<Value>(Method::GET, "/auth/v1/user", Some(auth_token), None)
            .await
    }

    pub fn get_base_url(&self) -> &str {
        &self.base_url
    }
}

/// Total from a PostgREST `Content-Range` such as `0-24/3573` or `*/0`.
fn content_range_total(value: &str) -> Option<usize> {
    value.rsplit_once('/')?.1.trim().parse().ok()
}
