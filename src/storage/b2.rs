//! Backblaze B2 backend over the native B2 HTTP API

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Client as ReqwestClient, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, instrument};

use super::{ObjectMeta, PersistReceipt, StorageBackend, StorageConfig, StorageError, StoreUri, object_key};

/// Public B2 API endpoint used for account authorization
pub const DEFAULT_B2_ENDPOINT: &str = "https://api.backblazeb2.com";

/// Default timeout for B2 requests in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 300;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthorizeResponse {
    account_id: String,
    authorization_token: String,
    api_url: String,
    download_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BucketInfo {
    bucket_id: String,
    bucket_name: String,
}

#[derive(Debug, Deserialize)]
struct ListBucketsResponse {
    buckets: Vec<BucketInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadUrlResponse {
    upload_url: String,
    authorization_token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadResponse {
    file_name: String,
    content_length: u64,
}

/// A B2 bucket, authorized once at construction and shared by all uploads.
///
/// Each upload is a single `b2_upload_file` call, which B2 commits
/// atomically.
#[derive(Clone)]
pub struct B2Store {
    client: ReqwestClient,
    api_url: String,
    download_url: String,
    authorization_token: String,
    bucket_id: String,
    bucket_name: String,
    prefix: Option<String>,
}

impl std::fmt::Debug for B2Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("B2Store")
            .field("api_url", &self.api_url)
            .field("bucket_name", &self.bucket_name)
            .field("prefix", &self.prefix)
            .finish()
    }
}

impl B2Store {
    /// Authorize the account and resolve the bucket named in `uri`.
    ///
    /// Every failure is reported as [`StorageError::Init`].
    #[instrument(skip(config), fields(bucket = %uri.bucket))]
    pub async fn connect(uri: &StoreUri, config: &StorageConfig) -> Result<Self, StorageError> {
        let key_id = config
            .b2_key_id
            .as_deref()
            .ok_or_else(|| StorageError::Init("B2 key id is not configured".to_string()))?;
        let application_key = config
            .b2_application_key
            .as_deref()
            .ok_or_else(|| StorageError::Init("B2 application key is not configured".to_string()))?;

        let client = ReqwestClient::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .map_err(|e| StorageError::Init(format!("Failed to create HTTP client: {}", e)))?;

        let url = format!(
            "{}/b2api/v2/b2_authorize_account",
            config.b2_endpoint.trim_end_matches('/')
        );
        let auth: AuthorizeResponse = async {
            let response = client.get(url).basic_auth(key_id, Some(application_key)).send().await?;
            check(response).await?.json().await.map_err(StorageError::from)
        }
        .await
        .map_err(|e| StorageError::Init(format!("B2 authorization failed: {}", e)))?;

        let buckets: ListBucketsResponse = async {
            let response = client
                .post(format!("{}/b2api/v2/b2_list_buckets", auth.api_url))
                .header(AUTHORIZATION, &auth.authorization_token)
                .json(&json!({ "accountId": auth.account_id, "bucketName": uri.bucket }))
                .send()
                .await?;
            check(response).await?.json().await.map_err(StorageError::from)
        }
        .await
        .map_err(|e| StorageError::Init(format!("B2 bucket lookup failed: {}", e)))?;

        let bucket = buckets
            .buckets
            .into_iter()
            .find(|b| b.bucket_name == uri.bucket)
            .ok_or_else(|| StorageError::Init(format!("B2 bucket {} not found", uri.bucket)))?;

        debug!("Authorized B2 bucket {} ({})", bucket.bucket_name, bucket.bucket_id);
        Ok(Self {
            client,
            api_url: auth.api_url,
            download_url: auth.download_url,
            authorization_token: auth.authorization_token,
            bucket_id: bucket.bucket_id,
            bucket_name: bucket.bucket_name,
            prefix: uri.prefix.clone(),
        })
    }

    async fn upload_url(&self) -> Result<UploadUrlResponse, StorageError> {
        let response = self
            .client
            .post(format!("{}/b2api/v2/b2_get_upload_url", self.api_url))
            .header(AUTHORIZATION, &self.authorization_token)
            .json(&json!({ "bucketId": self.bucket_id }))
            .send()
            .await?;
        Ok(check(response).await?.json().await?)
    }
}

#[async_trait]
impl StorageBackend for B2Store {
    #[instrument(skip(self, bytes), fields(size = bytes.len()))]
    async fn persist(&self, path: &str, bytes: Vec<u8>) -> Result<PersistReceipt, StorageError> {
        let key = object_key(self.prefix.as_deref(), path);
        let target = self.upload_url().await?;

        let response = self
            .client
            .post(&target.upload_url)
            .header(AUTHORIZATION, &target.authorization_token)
            .header("X-Bz-File-Name", encode_file_name(&key))
            .header(CONTENT_TYPE, "b2/x-auto")
            .header("X-Bz-Content-Sha1", "do_not_verify")
            .body(bytes)
            .send()
            .await?;
        let uploaded: UploadResponse = check(response).await?.json().await?;

        debug!("Uploaded {} ({} bytes)", uploaded.file_name, uploaded.content_length);
        Ok(PersistReceipt {
            key,
            byte_size: uploaded.content_length,
        })
    }

    #[instrument(skip(self))]
    async fn stat(&self, path: &str) -> Result<Option<ObjectMeta>, StorageError> {
        let key = object_key(self.prefix.as_deref(), path);
        let response = self
            .client
            .head(format!(
                "{}/file/{}/{}",
                self.download_url,
                self.bucket_name,
                encode_file_name(&key)
            ))
            .header(AUTHORIZATION, &self.authorization_token)
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = check(response).await?;
        let byte_size = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse().ok())
            .unwrap_or(0);

        Ok(Some(ObjectMeta { key, byte_size }))
    }
}

async fn check(response: Response) -> Result<Response, StorageError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    Err(StorageError::Api {
        status: status.as_u16(),
        message,
    })
}

/// Percent-encode a file name the way B2 expects, keeping `/` separators
fn encode_file_name(name: &str) -> String {
    name.split('/')
        .map(urlencoding::encode)
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server, ServerGuard};

    fn config(server: &ServerGuard) -> StorageConfig {
        StorageConfig {
            b2_endpoint: server.url(),
            b2_key_id: Some("key-id".to_string()),
            b2_application_key: Some("app-key".to_string()),
        }
    }

    async fn mock_authorization(server: &mut ServerGuard) {
        let body = json!({
            "accountId": "acc",
            "authorizationToken": "token",
            "apiUrl": server.url(),
            "downloadUrl": server.url(),
        });
        server
            .mock("GET", "/b2api/v2/b2_authorize_account")
            .match_header("authorization", Matcher::Regex("^Basic ".to_string()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(body.to_string())
            .create_async()
            .await;
        server
            .mock("POST", "/b2api/v2/b2_list_buckets")
            .match_header("authorization", "token")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"buckets":[{"bucketId":"b-1","bucketName":"archive"}]}"#)
            .create_async()
            .await;
    }

    #[test]
    fn test_encode_file_name() {
        assert_eq!(encode_file_name("items/posts/1-2-3.jl.gz"), "items/posts/1-2-3.jl.gz");
        assert_eq!(encode_file_name("a b+c"), "a%20b%2Bc");
        assert_eq!(encode_file_name("圖"), "%E5%9C%96");
        assert_eq!(encode_file_name("a/b c/d"), "a/b%20c/d");
    }

    #[tokio::test]
    async fn test_persist_uploads_with_prefix() {
        let mut server = Server::new_async().await;
        mock_authorization(&mut server).await;
        let upload_url = format!("{}/upload", server.url());
        server
            .mock("POST", "/b2api/v2/b2_get_upload_url")
            .match_body(Matcher::PartialJson(json!({ "bucketId": "b-1" })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({ "uploadUrl": upload_url, "authorizationToken": "upload-token" }).to_string())
            .create_async()
            .await;
        let upload = server
            .mock("POST", "/upload")
            .match_header("authorization", "upload-token")
            .match_header("x-bz-file-name", "files/full/a.jpg")
            .match_body("bytes")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"fileId":"f-1","fileName":"files/full/a.jpg","contentLength":5}"#)
            .expect(1)
            .create_async()
            .await;

        let uri = StoreUri::parse("b2://archive/files").unwrap();
        let store = B2Store::connect(&uri, &config(&server)).await.unwrap();
        let receipt = store.persist("full/a.jpg", b"bytes".to_vec()).await.unwrap();

        assert_eq!(receipt.key, "files/full/a.jpg");
        assert_eq!(receipt.byte_size, 5);
        upload.assert_async().await;
    }

    #[tokio::test]
    async fn test_stat() {
        let mut server = Server::new_async().await;
        mock_authorization(&mut server).await;
        server
            .mock("HEAD", "/file/archive/full/a.jpg")
            .with_status(200)
            .create_async()
            .await;
        server
            .mock("HEAD", "/file/archive/full/missing.jpg")
            .with_status(404)
            .create_async()
            .await;

        let uri = StoreUri::parse("b2://archive").unwrap();
        let store = B2Store::connect(&uri, &config(&server)).await.unwrap();

        let meta = store.stat("full/a.jpg").await.unwrap().unwrap();
        assert_eq!(meta.key, "full/a.jpg");
        assert_eq!(store.stat("full/missing.jpg").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_rejected_credentials_fail_at_connect() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/b2api/v2/b2_authorize_account")
            .with_status(401)
            .with_body(r#"{"code":"unauthorized"}"#)
            .create_async()
            .await;

        let uri = StoreUri::parse("b2://archive").unwrap();
        match B2Store::connect(&uri, &config(&server)).await {
            Err(StorageError::Init(message)) => assert!(message.contains("401")),
            other => panic!("Expected Init error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_bucket_fails_at_connect() {
        let mut server = Server::new_async().await;
        mock_authorization(&mut server).await;

        let uri = StoreUri::parse("b2://other").unwrap();
        assert!(matches!(
            B2Store::connect(&uri, &config(&server)).await,
            Err(StorageError::Init(_))
        ));
    }
}
