//! Client for a remote key-value service over REST.
//!
//! Expected endpoints, relative to the namespace base URL:
//!
//! | Operation | Request                                   |
//! |-----------|-------------------------------------------|
//! | get       | `GET    values/{key}` (404 = absent)      |
//! | put       | `PUT    values/{key}` with a JSON body    |
//! | delete    | `DELETE values/{key}` (404 = absent)      |
//! | list      | `GET    keys?prefix=..&limit=..&cursor=..` |
//!
//! One list call fetches one page; `result_info.cursor` is handed back to the
//! caller as the page cursor and an empty cursor ends the listing. The
//! service has no versioning, so only unconditional puts are supported;
//! concurrent writers to the same key can overwrite each other.

use std::time::Duration;

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;

use crate::{KeyPage, KvStore, PutCondition, PutOutcome, StoreError, Versioned};

/// Everything except unreserved characters is encoded, so `:` and `/` in
/// keys stay inside one path segment.
const KEY_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    result: Vec<ListedKey>,
    #[serde(default)]
    result_info: Option<ResultInfo>,
}

#[derive(Debug, Deserialize)]
struct ListedKey {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ResultInfo {
    #[serde(default)]
    cursor: Option<String>,
}

#[derive(Debug, Clone)]
pub struct HttpKvStore {
    client: Client,
    base_url: Url,
    api_token: Option<String>,
}

impl HttpKvStore {
    /// # Errors
    ///
    /// Returns [`StoreError::Http`] if the HTTP client cannot be built, or
    /// [`StoreError::InvalidConfig`] if `base_url` does not parse.
    pub fn new(
        base_url: &str,
        api_token: Option<String>,
        timeout_secs: u64,
    ) -> Result<Self, StoreError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .connect_timeout(Duration::from_secs(5))
            .user_agent("pingmap/0.1 (cell-store)")
            .build()?;

        // Exactly one trailing slash, so joins append instead of replacing
        // the last path segment.
        let normalised = format!("{}/", base_url.trim_end_matches('/'));
        let base_url = Url::parse(&normalised)
            .map_err(|e| StoreError::InvalidConfig(format!("invalid base URL '{base_url}': {e}")))?;

        Ok(Self {
            client,
            base_url,
            api_token,
        })
    }

    fn value_url(&self, key: &str) -> Result<Url, StoreError> {
        let encoded = utf8_percent_encode(key, KEY_ENCODE_SET).to_string();
        self.base_url
            .join(&format!("values/{encoded}"))
            .map_err(|e| StoreError::InvalidConfig(format!("cannot build URL for key {key:?}: {e}")))
    }

    fn keys_url(
        &self,
        prefix: &str,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<Url, StoreError> {
        let mut url = self
            .base_url
            .join("keys")
            .map_err(|e| StoreError::InvalidConfig(format!("cannot build keys URL: {e}")))?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("prefix", prefix);
            pairs.append_pair("limit", &limit.to_string());
            if let Some(cursor) = cursor {
                pairs.append_pair("cursor", cursor);
            }
        }
        Ok(url)
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Cheap reachability probe: a one-page list of an unused prefix.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the service is unreachable or rejects the call.
    pub async fn ping(&self) -> Result<(), StoreError> {
        let url = self.keys_url("__health:", None, 1)?;
        let response = self.authorized(self.client.get(url)).send().await?;
        check_status(response.status(), "list keys (health)")?;
        Ok(())
    }
}

fn check_status(status: StatusCode, context: &str) -> Result<(), StoreError> {
    if status.is_success() {
        Ok(())
    } else {
        Err(StoreError::UnexpectedStatus {
            status: status.as_u16(),
            context: context.to_string(),
        })
    }
}

impl KvStore for HttpKvStore {
    async fn get(&self, key: &str) -> Result<Option<Versioned>, StoreError> {
        let url = self.value_url(key)?;
        let response = self.authorized(self.client.get(url)).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        check_status(response.status(), &format!("get {key}"))?;

        let body = response.text().await?;
        let value = serde_json::from_str(&body).map_err(|e| StoreError::Serialization {
            context: format!("get {key}"),
            source: e,
        })?;
        Ok(Some(Versioned {
            value,
            version: None,
        }))
    }

    async fn put(
        &self,
        key: &str,
        value: &serde_json::Value,
        condition: PutCondition,
    ) -> Result<PutOutcome, StoreError> {
        if condition != PutCondition::Any {
            return Err(StoreError::ConditionalWriteUnsupported("http"));
        }
        let url = self.value_url(key)?;
        let response = self
            .authorized(self.client.put(url))
            .json(value)
            .send()
            .await?;
        check_status(response.status(), &format!("put {key}"))?;
        Ok(PutOutcome::Written)
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let url = self.value_url(key)?;
        let response = self.authorized(self.client.delete(url)).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        check_status(response.status(), &format!("delete {key}"))?;
        Ok(true)
    }

    async fn list_page(
        &self,
        prefix: &str,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<KeyPage, StoreError> {
        let context = format!("list {prefix}");
        let url = self.keys_url(prefix, cursor, limit)?;
        let response = self.authorized(self.client.get(url)).send().await?;
        check_status(response.status(), &context)?;

        let body = response.text().await?;
        let page: ListResponse =
            serde_json::from_str(&body).map_err(|e| StoreError::Serialization {
                context: context.clone(),
                source: e,
            })?;
        if page.result.len() > limit {
            return Err(StoreError::MalformedResponse {
                context,
                reason: format!("{} keys returned for limit {limit}", page.result.len()),
            });
        }

        let mut keys: Vec<String> = page
            .result
            .into_iter()
            .map(|k| k.name)
            .filter(|name| name.starts_with(prefix))
            .collect();
        keys.sort();
        keys.dedup();

        let cursor = page
            .result_info
            .and_then(|info| info.cursor)
            .filter(|c| !c.is_empty());
        Ok(KeyPage { keys, cursor })
    }

    fn supports_conditional_writes(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(base: &str) -> HttpKvStore {
        HttpKvStore::new(base, None, 5).expect("store")
    }

    #[test]
    fn value_url_encodes_key_as_one_segment() {
        let s = store("https://kv.example.com/ns/pings");
        let url = s.value_url("cell:dr5ru6j").unwrap();
        assert_eq!(
            url.as_str(),
            "https://kv.example.com/ns/pings/values/cell%3Adr5ru6j"
        );
        let url = s.value_url("a/b c").unwrap();
        assert_eq!(url.as_str(), "https://kv.example.com/ns/pings/values/a%2Fb%20c");
    }

    #[test]
    fn base_url_trailing_slash_is_normalised() {
        let a = store("https://kv.example.com/ns/");
        let b = store("https://kv.example.com/ns");
        assert_eq!(a.value_url("k").unwrap(), b.value_url("k").unwrap());
    }

    #[test]
    fn keys_url_carries_prefix_and_cursor() {
        let s = store("https://kv.example.com/ns");
        let url = s.keys_url("cell:", Some("abc"), 50).unwrap();
        assert_eq!(
            url.as_str(),
            "https://kv.example.com/ns/keys?prefix=cell%3A&limit=50&cursor=abc"
        );
    }

    #[test]
    fn invalid_base_url_is_config_error() {
        assert!(matches!(
            HttpKvStore::new("not a url", None, 5),
            Err(StoreError::InvalidConfig(_))
        ));
    }
}
