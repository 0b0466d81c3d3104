use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Response, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::Instrument;

use super::{endpoints, ByteStream, JobApi};
use crate::config::{ClientConfig, HttpConfig};
use crate::error::ApiError;
use crate::model::{
    AlignJob, AlignRequest, AlignTool, FileRecord, HealthResponse, PagedResponse, SubmitResponse,
    TaskStatus, Upload, UploadResponse,
};
use crate::sanitize::{redact_path, redact_url, truncate_body};

/// Listing bodies come either paged or as a bare array.
#[derive(Deserialize)]
#[serde(untagged)]
enum JobListing {
    Paged(PagedResponse<AlignJob>),
    Bare(Vec<AlignJob>),
}

/// [`JobApi`] over HTTP.
#[derive(Debug, Clone)]
pub struct HttpJobApi {
    client: Client,
    base: Url,
    request_timeout: Duration,
}

impl HttpJobApi {
    pub fn new(base_url: &str, http: &HttpConfig) -> Result<Self, ApiError> {
        let base = Url::parse(base_url.trim()).map_err(|e| {
            ApiError::ClientBuild(format!("invalid base URL '{}': {}", redact_url(base_url), e))
        })?;
        if base.cannot_be_a_base() {
            return Err(ApiError::ClientBuild(format!(
                "base URL '{}' cannot carry paths",
                redact_url(base_url)
            )));
        }

        // No client-wide timeout: the push stream stays open indefinitely.
        let client = Client::builder()
            .connect_timeout(Duration::from_millis(http.connect_timeout_ms))
            .build()
            .map_err(|e| ApiError::ClientBuild(e.to_string()))?;

        Ok(Self {
            client,
            base,
            request_timeout: Duration::from_millis(http.request_timeout_ms),
        })
    }

    pub fn from_config(config: &ClientConfig) -> Result<Self, ApiError> {
        Self::new(&config.api_url, &config.http)
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    /// Sends `request` and maps transport failures and non-2xx answers.
    async fn send(&self, endpoint: &'static str, request: RequestBuilder) -> Result<Response, ApiError> {
        let span = tracing::debug_span!("api.request", endpoint);
        async move {
            let response = request.send().await.map_err(|source| ApiError::Request {
                endpoint: endpoint.to_string(),
                source,
            })?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                log::debug!("{} answered HTTP {}", endpoint, status.as_u16());
                return Err(ApiError::Status {
                    endpoint: endpoint.to_string(),
                    status: status.as_u16(),
                    body: truncate_body(&body),
                });
            }
            Ok(response)
        }
        .instrument(span)
        .await
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        endpoint: &'static str,
        url: Url,
    ) -> Result<T, ApiError> {
        let request = self.client.get(url).timeout(self.request_timeout);
        let response = self.send(endpoint, request).await?;
        decode_json(endpoint, response).await
    }

    async fn get_bytes(&self, endpoint: &'static str, url: Url) -> Result<Vec<u8>, ApiError> {
        let request = self.client.get(url).timeout(self.request_timeout);
        let response = self.send(endpoint, request).await?;
        let bytes = response.bytes().await.map_err(|source| ApiError::Request {
            endpoint: endpoint.to_string(),
            source,
        })?;
        Ok(bytes.to_vec())
    }
}

async fn decode_json<T: DeserializeOwned>(
    endpoint: &'static str,
    response: Response,
) -> Result<T, ApiError> {
    let body = response.text().await.map_err(|source| ApiError::Request {
        endpoint: endpoint.to_string(),
        source,
    })?;
    serde_json::from_str(&body).map_err(|e| ApiError::Decode {
        endpoint: endpoint.to_string(),
        message: e.to_string(),
    })
}

#[async_trait]
impl JobApi for HttpJobApi {
    async fn health(&self) -> Result<HealthResponse, ApiError> {
        self.get_json(endpoints::HEALTH, self.url(&["health"])).await
    }

    async fn upload_file(&self, path: &Path) -> Result<UploadResponse, ApiError> {
        let endpoint = endpoints::FILE_UPLOAD;
        let data = tokio::fs::read(path)
            .await
            .map_err(|source| ApiError::ReadUpload {
                path: path.to_path_buf(),
                source,
            })?;
        let file_name = redact_path(path);
        let mime = mime_guess::from_path(path).first_or_octet_stream();
        log::info!("Uploading {} ({} bytes)", file_name, data.len());

        let part = Part::bytes(data)
            .file_name(file_name)
            .mime_str(mime.as_ref())
            .map_err(|source| ApiError::Request {
                endpoint: endpoint.to_string(),
                source,
            })?;
        let form = Form::new().part("file", part);

        let request = self
            .client
            .post(self.url(&["file", "upload"]))
            .timeout(self.request_timeout)
            .multipart(form);
        let response = self.send(endpoint, request).await?;
        decode_json(endpoint, response).await
    }

    async fn list_files(&self) -> Result<Vec<FileRecord>, ApiError> {
        self.get_json(endpoints::FILE_LIST, self.url(&["file", "list"]))
            .await
    }

    async fn download_file(&self, file_id: &str) -> Result<Vec<u8>, ApiError> {
        self.get_bytes(
            endpoints::FILE_DOWNLOAD,
            self.url(&["file", "download", file_id]),
        )
        .await
    }

    async fn start_alignment(
        &self,
        file_id: &str,
        request: &AlignRequest,
    ) -> Result<SubmitResponse, ApiError> {
        let endpoint = endpoints::ALIGN_START;
        let http_request = self
            .client
            .post(self.url(&["align", file_id]))
            .timeout(self.request_timeout)
            .json(request);
        let response = self.send(endpoint, http_request).await?;
        decode_json(endpoint, response).await
    }

    async fn list_jobs(&self, page: u32, size: usize) -> Result<PagedResponse<AlignJob>, ApiError> {
        let mut url = self.url(&["align", "jobs"]);
        url.query_pairs_mut()
            .append_pair("page", &page.to_string())
            .append_pair("size", &size.to_string());

        let listing: JobListing = self.get_json(endpoints::ALIGN_JOBS, url).await?;
        Ok(match listing {
            JobListing::Paged(paged) => paged,
            JobListing::Bare(jobs) => PagedResponse::single_page(jobs, page, size as u32),
        })
    }

    async fn open_stream(&self) -> Result<ByteStream, ApiError> {
        let endpoint = endpoints::ALIGN_STREAM;
        let request = self
            .client
            .get(self.url(&["align", "stream"]))
            .header(reqwest::header::ACCEPT, "text/event-stream");
        let response = self.send(endpoint, request).await?;

        let stream = response.bytes_stream().map(move |chunk| {
            chunk
                .map(|bytes| bytes.to_vec())
                .map_err(|source| ApiError::Request {
                    endpoint: endpoint.to_string(),
                    source,
                })
        });
        Ok(stream.boxed())
    }

    async fn task_status(&self, task_id: &str) -> Result<TaskStatus, ApiError> {
        self.get_json(endpoints::TASK_STATUS, self.url(&["status", task_id]))
            .await
    }

    async fn result_file(&self, filename: &str) -> Result<Vec<u8>, ApiError> {
        self.get_bytes(
            endpoints::RESULT_FILE,
            self.url(&["analysis", "results", filename]),
        )
        .await
    }

    async fn list_uploads(&self) -> Result<Vec<Upload>, ApiError> {
        self.get_json(endpoints::UPLOADS, self.url(&["uploads"]))
            .await
    }

    async fn start_analysis(
        &self,
        tool: AlignTool,
        upload_id: i64,
    ) -> Result<SubmitResponse, ApiError> {
        let endpoint = endpoints::ANALYSIS_START;
        let request = self
            .client
            .post(self.url(&["analysis", tool.as_str(), &upload_id.to_string()]))
            .timeout(self.request_timeout);
        let response = self.send(endpoint, request).await?;
        decode_json(endpoint, response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api(base: &str) -> HttpJobApi {
        HttpJobApi::new(base, &HttpConfig::default()).unwrap()
    }

    #[test]
    fn test_url_joins_segments() {
        let api = api("http://localhost:8080");
        assert_eq!(
            api.url(&["status", "abc"]).as_str(),
            "http://localhost:8080/status/abc"
        );
    }

    #[test]
    fn test_url_keeps_base_path() {
        let api = api("http://gateway/api/");
        assert_eq!(
            api.url(&["align", "jobs"]).as_str(),
            "http://gateway/api/align/jobs"
        );
    }

    #[test]
    fn test_url_escapes_segments() {
        let api = api("http://localhost:8080");
        assert_eq!(
            api.url(&["analysis", "results", "a b/../c.fasta"]).as_str(),
            "http://localhost:8080/analysis/results/a%20b%2F..%2Fc.fasta"
        );
    }

    #[test]
    fn test_invalid_base_url() {
        let err = HttpJobApi::new("not a url", &HttpConfig::default()).unwrap_err();
        assert!(matches!(err, ApiError::ClientBuild(_)));
    }

    #[test]
    fn test_bare_listing_decodes() {
        let json = r#"[{"taskId":"t1","createdAt":"2024-05-01T10:00:00",
            "updatedAt":"2024-05-01T10:00:00","status":"PENDING"}]"#;
        let listing: JobListing = serde_json::from_str(json).unwrap();
        assert!(matches!(listing, JobListing::Bare(ref jobs) if jobs.len() == 1));
    }
}
