//! Azure Blob Storage binding
//!
//! Implements the store trait over the Blob service REST API. The
//! named-container binding authenticates with the account key (or a
//! SAS) parsed from a connection string; the default-identity binding
//! carries a bearer token from the ambient credential. Uploads are
//! staged as blocks so payloads stream through without ever being
//! held in memory whole.

use crate::error::{CacheError, CacheResult};
use crate::store::credentials::AzureCredentials;
use crate::store::{BlobStore, ByteStream};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bytes::{Bytes, BytesMut};
use chrono::Utc;
use futures_util::{StreamExt, TryStreamExt};
use reqwest::{Method, Response, StatusCode};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use tracing::debug;
use url::Url;

const API_VERSION: &str = "2021-08-06";

/// Staged block size for uploads; bounds memory while streaming
const UPLOAD_BLOCK_SIZE: usize = 4 * 1024 * 1024;

enum Auth {
    SharedKey { account: String, key: Vec<u8> },
    Sas(String),
    Bearer(String),
}

/// Blob container client backed by the Azure Storage REST API
pub struct AzureBlobStore {
    http: reqwest::Client,
    container_url: Url,
    container: String,
    auth: Auth,
}

impl AzureBlobStore {
    /// Named-container binding: parse a storage account connection
    /// string. Supports account-key and SAS credentials.
    pub fn from_connection_string(conn: &str, container: &str) -> CacheResult<Self> {
        let fields: HashMap<&str, &str> = conn
            .split(';')
            .filter(|part| !part.trim().is_empty())
            .filter_map(|part| part.split_once('='))
            .collect();

        let account = fields.get("AccountName").copied().unwrap_or_default();

        let endpoint = if let Some(endpoint) = fields.get("BlobEndpoint") {
            (*endpoint).to_string()
        } else if !account.is_empty() {
            let protocol = fields
                .get("DefaultEndpointsProtocol")
                .copied()
                .unwrap_or("https");
            let suffix = fields
                .get("EndpointSuffix")
                .copied()
                .unwrap_or("core.windows.net");
            format!("{protocol}://{account}.blob.{suffix}")
        } else {
            return Err(CacheError::InvalidConnectionString(
                "no AccountName or BlobEndpoint".to_string(),
            ));
        };

        let auth = if let Some(key) = fields.get("AccountKey") {
            if account.is_empty() {
                return Err(CacheError::InvalidConnectionString(
                    "AccountKey requires AccountName".to_string(),
                ));
            }
            let key = BASE64.decode(key.trim()).map_err(|e| {
                CacheError::InvalidConnectionString(format!("invalid AccountKey: {e}"))
            })?;
            Auth::SharedKey {
                account: account.to_string(),
                key,
            }
        } else if let Some(sas) = fields.get("SharedAccessSignature") {
            Auth::Sas(sas.trim_start_matches('?').to_string())
        } else {
            return Err(CacheError::InvalidConnectionString(
                "no AccountKey or SharedAccessSignature".to_string(),
            ));
        };

        Self::build(&endpoint, container, auth)
    }

    /// Default-identity binding: ambient credential plus service URL.
    pub async fn with_default_credential(
        url: &str,
        container: &str,
        client_id: Option<&str>,
    ) -> CacheResult<Self> {
        let token = AzureCredentials::access_token(client_id).await?;
        Self::build(url, container, Auth::Bearer(token))
    }

    fn build(endpoint: &str, container: &str, auth: Auth) -> CacheResult<Self> {
        let mut container_url = Url::parse(endpoint)
            .map_err(|e| CacheError::StoreConnect(format!("invalid endpoint '{endpoint}': {e}")))?;
        container_url
            .path_segments_mut()
            .map_err(|_| CacheError::StoreConnect(format!("invalid endpoint '{endpoint}'")))?
            .pop_if_empty()
            .push(container);

        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| CacheError::StoreConnect(e.to_string()))?;

        Ok(Self {
            http,
            container_url,
            container: container.to_string(),
            auth,
        })
    }

    /// Check that the container itself exists
    pub async fn container_exists(&self) -> CacheResult<bool> {
        let query = [query_pair("restype", "container")];
        let response = self
            .request(Method::HEAD, None, &query, vec![], None)
            .await?;
        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(CacheError::StoreStatus {
                context: format!("HEAD {}", self.container),
                status: status.as_u16(),
            }),
        }
    }

    fn object_url(&self, blob: Option<&str>, query: &[(String, String)]) -> CacheResult<Url> {
        let mut url = self.container_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| CacheError::StoreConnect("endpoint is not a base URL".to_string()))?;
            if let Some(blob) = blob {
                // Keys are used verbatim; '/' keeps its hierarchy meaning.
                segments.extend(blob.split('/'));
            }
        }
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (name, value) in query {
                pairs.append_pair(name, value);
            }
        }
        if let Auth::Sas(sas) = &self.auth {
            let combined = match url.query() {
                Some(existing) if !existing.is_empty() => format!("{existing}&{sas}"),
                _ => sas.clone(),
            };
            url.set_query(Some(&combined));
        }
        Ok(url)
    }

    async fn request(
        &self,
        method: Method,
        blob: Option<&str>,
        query: &[(String, String)],
        ms_headers: Vec<(String, String)>,
        body: Option<Bytes>,
    ) -> CacheResult<Response> {
        let url = self.object_url(blob, query)?;
        let content_length = body.as_ref().map(Bytes::len).unwrap_or(0);

        let mut headers = ms_headers;
        headers.push((
            "x-ms-date".to_string(),
            Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string(),
        ));
        headers.push(("x-ms-version".to_string(), API_VERSION.to_string()));

        let mut request = self.http.request(method.clone(), url);
        for (name, value) in &headers {
            request = request.header(name.as_str(), value.as_str());
        }

        match &self.auth {
            Auth::Bearer(token) => request = request.bearer_auth(token),
            Auth::SharedKey { account, key } => {
                let string_to_sign = string_to_sign(
                    &method,
                    content_length,
                    &headers,
                    &canonicalized_resource(account, &self.container, blob, query),
                );
                let signature = BASE64.encode(hmac_sha256(key, string_to_sign.as_bytes()));
                let authorization = format!("SharedKey {account}:{signature}");
                request = request.header("Authorization", authorization);
            }
            Auth::Sas(_) => {}
        }

        // Azure requires an explicit zero Content-Length on bodyless writes.
        request = match body {
            Some(body) => request.body(body),
            None if matches!(method, Method::PUT | Method::DELETE) => request.body(Bytes::new()),
            None => request,
        };

        let context = format!("{method} {}", blob.unwrap_or(&self.container));
        debug!(request = %context, "Blob store request");
        request
            .send()
            .await
            .map_err(|e| CacheError::store_request(context, e))
    }

    async fn put_block(&self, key: &str, index: usize, data: Bytes) -> CacheResult<String> {
        let id = block_id(index);
        let query = [query_pair("comp", "block"), ("blockid".to_string(), id.clone())];
        let response = self
            .request(Method::PUT, Some(key), &query, vec![], Some(data))
            .await?;

        if response.status() != StatusCode::CREATED {
            return Err(CacheError::Upload {
                key: key.to_string(),
                code: response.status().to_string(),
            });
        }
        Ok(id)
    }

    async fn put_block_list(&self, key: &str, block_ids: &[String]) -> CacheResult<()> {
        let mut xml = String::from(r#"<?xml version="1.0" encoding="utf-8"?><BlockList>"#);
        for id in block_ids {
            xml.push_str("<Latest>");
            xml.push_str(id);
            xml.push_str("</Latest>");
        }
        xml.push_str("</BlockList>");

        let query = [query_pair("comp", "blocklist")];
        let response = self
            .request(Method::PUT, Some(key), &query, vec![], Some(Bytes::from(xml)))
            .await?;

        if response.status() != StatusCode::CREATED {
            return Err(CacheError::Upload {
                key: key.to_string(),
                code: response.status().to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl BlobStore for AzureBlobStore {
    async fn exists(&self, key: &str) -> CacheResult<bool> {
        let response = self
            .request(Method::HEAD, Some(key), &[], vec![], None)
            .await?;
        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(CacheError::StoreStatus {
                context: format!("HEAD {key}"),
                status: status.as_u16(),
            }),
        }
    }

    async fn get_metadata(&self, key: &str) -> CacheResult<HashMap<String, String>> {
        let response = self
            .request(Method::HEAD, Some(key), &[], vec![], None)
            .await?;
        if response.status() != StatusCode::OK {
            return Err(CacheError::StoreStatus {
                context: format!("HEAD {key}"),
                status: response.status().as_u16(),
            });
        }
        Ok(metadata_from_headers(response.headers()))
    }

    async fn set_metadata(&self, key: &str, metadata: HashMap<String, String>) -> CacheResult<()> {
        let query = [query_pair("comp", "metadata")];
        let headers = metadata
            .into_iter()
            .map(|(name, value)| (format!("x-ms-meta-{name}"), value))
            .collect();

        let response = self
            .request(Method::PUT, Some(key), &query, headers, None)
            .await?;
        if response.status() != StatusCode::OK {
            return Err(CacheError::StoreStatus {
                context: format!("PUT {key}?comp=metadata"),
                status: response.status().as_u16(),
            });
        }
        Ok(())
    }

    async fn delete_if_exists(&self, key: &str) -> CacheResult<()> {
        let headers = vec![("x-ms-delete-snapshots".to_string(), "include".to_string())];
        let response = self
            .request(Method::DELETE, Some(key), &[], headers, None)
            .await?;
        match response.status() {
            StatusCode::ACCEPTED | StatusCode::NOT_FOUND => Ok(()),
            status => Err(CacheError::StoreStatus {
                context: format!("DELETE {key}"),
                status: status.as_u16(),
            }),
        }
    }

    async fn upload_stream(&self, key: &str, mut body: ByteStream) -> CacheResult<()> {
        let mut buffer = BytesMut::new();
        let mut block_ids = Vec::new();

        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| CacheError::Upload {
                key: key.to_string(),
                code: format!("source stream failed: {e}"),
            })?;
            buffer.extend_from_slice(&chunk);

            while buffer.len() >= UPLOAD_BLOCK_SIZE {
                let block = buffer.split_to(UPLOAD_BLOCK_SIZE).freeze();
                let id = self.put_block(key, block_ids.len(), block).await?;
                block_ids.push(id);
            }
        }

        if !buffer.is_empty() {
            let block = buffer.split().freeze();
            let id = self.put_block(key, block_ids.len(), block).await?;
            block_ids.push(id);
        }

        debug!(key, blocks = block_ids.len(), "Committing block list");
        self.put_block_list(key, &block_ids).await
    }

    async fn download_stream(&self, key: &str) -> CacheResult<ByteStream> {
        let response = self
            .request(Method::GET, Some(key), &[], vec![], None)
            .await?;
        if response.status() != StatusCode::OK {
            return Err(CacheError::Download {
                key: key.to_string(),
                code: response.status().to_string(),
            });
        }
        Ok(Box::pin(
            response.bytes_stream().map_err(std::io::Error::other),
        ))
    }
}

fn query_pair(name: &str, value: &str) -> (String, String) {
    (name.to_string(), value.to_string())
}

/// Zero-padded so every id in a block list has equal length
fn block_id(index: usize) -> String {
    BASE64.encode(format!("{index:08}"))
}

fn metadata_from_headers(headers: &reqwest::header::HeaderMap) -> HashMap<String, String> {
    let mut metadata = HashMap::new();
    for (name, value) in headers {
        if let Some(meta_key) = name.as_str().strip_prefix("x-ms-meta-") {
            if let Ok(value) = value.to_str() {
                metadata.insert(meta_key.to_string(), value.to_string());
            }
        }
    }
    metadata
}

fn canonicalized_resource(
    account: &str,
    container: &str,
    blob: Option<&str>,
    query: &[(String, String)],
) -> String {
    let mut resource = format!("/{account}/{container}");
    if let Some(blob) = blob {
        resource.push('/');
        resource.push_str(blob);
    }

    let mut sorted: Vec<&(String, String)> = query.iter().collect();
    sorted.sort();
    for (name, value) in sorted {
        resource.push('\n');
        resource.push_str(&name.to_ascii_lowercase());
        resource.push(':');
        resource.push_str(value);
    }
    resource
}

fn string_to_sign(
    method: &Method,
    content_length: usize,
    ms_headers: &[(String, String)],
    canonical_resource: &str,
) -> String {
    let mut headers: Vec<(String, String)> = ms_headers
        .iter()
        .map(|(name, value)| (name.to_ascii_lowercase(), value.clone()))
        .collect();
    headers.sort();

    let canonical_headers: String = headers
        .iter()
        .map(|(name, value)| format!("{name}:{value}\n"))
        .collect();

    let content_length = if content_length == 0 {
        String::new()
    } else {
        content_length.to_string()
    };

    // VERB, then the eleven standard headers (only Content-Length is
    // ever populated here), then canonicalized x-ms headers + resource.
    format!("{method}\n\n\n{content_length}\n\n\n\n\n\n\n\n\n{canonical_headers}{canonical_resource}")
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> [u8; 32] {
    const HMAC_BLOCK: usize = 64;
    const IPAD: u8 = 0x36;
    const OPAD: u8 = 0x5C;

    let key = if key.len() > HMAC_BLOCK {
        Sha256::digest(key).to_vec()
    } else {
        key.to_vec()
    };

    let mut key_padded = [0u8; HMAC_BLOCK];
    key_padded[..key.len()].copy_from_slice(&key);

    let mut ipad_key = [0u8; HMAC_BLOCK];
    let mut opad_key = [0u8; HMAC_BLOCK];
    for i in 0..HMAC_BLOCK {
        ipad_key[i] = key_padded[i] ^ IPAD;
        opad_key[i] = key_padded[i] ^ OPAD;
    }

    let mut inner = Sha256::new();
    inner.update(ipad_key);
    inner.update(data);
    let inner_hash = inner.finalize();

    let mut outer = Sha256::new();
    outer.update(opad_key);
    outer.update(inner_hash);
    outer.finalize().into()
}
