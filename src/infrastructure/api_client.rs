use crate::domain::token::Token;
use crate::infrastructure::error::InfraError;
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Method, StatusCode};
use url::Url;

/// Multipart field name the upload endpoint reads files from.
pub const FILES_FIELD: &str = "files";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePart {
    pub file_name: String,
    pub bytes: Vec<u8>,
    pub mime: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Empty,
    Json(serde_json::Value),
    Multipart(Vec<FilePart>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    /// Path segments below the api base url, unescaped.
    pub segments: Vec<String>,
    pub query: Vec<(String, String)>,
    pub body: RequestBody,
    /// Hand the 2xx body back untouched, whatever its content type.
    pub raw_response: bool,
}

impl ApiRequest {
    pub fn new<I, S>(method: Method, segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: ToString,
    {
        Self {
            method,
            segments: segments.into_iter().map(|segment| segment.to_string()).collect(),
            query: Vec::new(),
            body: RequestBody::Empty,
            raw_response: false,
        }
    }

    pub fn get<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: ToString,
    {
        Self::new(Method::GET, segments)
    }

    pub fn post<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: ToString,
    {
        Self::new(Method::POST, segments)
    }

    pub fn put<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: ToString,
    {
        Self::new(Method::PUT, segments)
    }

    pub fn delete<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: ToString,
    {
        Self::new(Method::DELETE, segments)
    }

    pub fn query(mut self, key: &str, value: impl Into<String>) -> Self {
        self.query.push((key.to_string(), value.into()));
        self
    }

    pub fn json<T: serde::Serialize>(mut self, body: &T) -> Result<Self, InfraError> {
        self.body = RequestBody::Json(serde_json::to_value(body)?);
        Ok(self)
    }

    pub fn multipart(mut self, files: Vec<FilePart>) -> Result<Self, InfraError> {
        if files.is_empty() {
            return Err(InfraError::Validation("no file selected".to_string()));
        }
        self.body = RequestBody::Multipart(files);
        Ok(self)
    }

    pub fn raw(mut self) -> Self {
        self.raw_response = true;
        self
    }

    pub fn path(&self) -> String {
        self.segments.join("/")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ApiResponse {
    Json(serde_json::Value),
    Blob(Bytes),
}

impl ApiResponse {
    pub fn into_json<T: serde::de::DeserializeOwned>(self) -> Result<T, InfraError> {
        match self {
            Self::Json(value) => Ok(serde_json::from_value(value)?),
            Self::Blob(bytes) if bytes.is_empty() => Ok(serde_json::from_value(serde_json::Value::Null)?),
            Self::Blob(bytes) => Ok(serde_json::from_slice(&bytes)?),
        }
    }

    pub fn into_bytes(self) -> Result<Bytes, InfraError> {
        match self {
            Self::Blob(bytes) => Ok(bytes),
            Self::Json(value) => Ok(Bytes::from(serde_json::to_vec(&value)?)),
        }
    }
}

#[async_trait]
pub trait ApiTransport: Send + Sync {
    /// Sends `request` with the bearer token. Without a token nothing is sent
    /// and the call fails with `Unauthenticated`.
    async fn send(&self, request: ApiRequest, token: Option<&Token>) -> Result<ApiResponse, InfraError>;
}

#[derive(Debug, Clone)]
pub struct ReqwestApiTransport {
    client: Client,
    base_url: Url,
}

impl ReqwestApiTransport {
    pub fn new(base_url: Url) -> Self {
        Self {
            client: Client::new(),
            base_url,
        }
    }

    pub fn endpoint(&self, segments: &[String]) -> Result<Url, InfraError> {
        let mut url = self.base_url.clone();
        {
            let mut path = url.path_segments_mut().map_err(|_| {
                InfraError::InvalidConfig("api base url cannot be a base".to_string())
            })?;
            path.pop_if_empty();
            for segment in segments {
                path.push(segment);
            }
        }
        Ok(url)
    }

    pub fn build_request(
        &self,
        request: ApiRequest,
        token: Option<&Token>,
    ) -> Result<reqwest::Request, InfraError> {
        let Some(token) = token else {
            return Err(InfraError::Unauthenticated);
        };

        let endpoint = self.endpoint(&request.segments)?;
        let mut builder = self
            .client
            .request(request.method, endpoint)
            .bearer_auth(token.as_str());
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        builder = match request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(value) => builder.json(&value),
            RequestBody::Multipart(files) => builder.multipart(multipart_form(files)?),
        };
        builder
            .build()
            .map_err(|error| InfraError::Network(format!("failed building request: {error}")))
    }
}

fn multipart_form(files: Vec<FilePart>) -> Result<reqwest::multipart::Form, InfraError> {
    let mut form = reqwest::multipart::Form::new();
    for file in files {
        let mut part = reqwest::multipart::Part::bytes(file.bytes).file_name(file.file_name);
        if let Some(mime) = file.mime.as_deref() {
            part = part
                .mime_str(mime)
                .map_err(|error| InfraError::Validation(format!("invalid mime type '{mime}': {error}")))?;
        }
        form = form.part(FILES_FIELD, part);
    }
    Ok(form)
}

fn is_json_content(content_type: Option<&str>) -> bool {
    content_type
        .map(|value| value.to_ascii_lowercase())
        .is_some_and(|value| value.starts_with("application/json") || value.contains("+json"))
}

/// Non-2xx turns into `Http` with the body text verbatim; JSON bodies are
/// parsed, everything else is handed back as bytes.
pub fn interpret_response(
    status: StatusCode,
    content_type: Option<&str>,
    body: Bytes,
) -> Result<ApiResponse, InfraError> {
    if !status.is_success() {
        let text = String::from_utf8_lossy(&body).into_owned();
        return Err(InfraError::http(status, text));
    }
    if is_json_content(content_type) {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(ApiResponse::Json(serde_json::Value::Null));
        }
        return Ok(ApiResponse::Json(serde_json::from_slice(&body)?));
    }
    Ok(ApiResponse::Blob(body))
}

/// Like [`interpret_response`] for downloads: a 2xx body is returned as-is.
pub fn interpret_raw_response(status: StatusCode, body: Bytes) -> Result<ApiResponse, InfraError> {
    if !status.is_success() {
        let text = String::from_utf8_lossy(&body).into_owned();
        return Err(InfraError::http(status, text));
    }
    Ok(ApiResponse::Blob(body))
}

#[async_trait]
impl ApiTransport for ReqwestApiTransport {
    async fn send(&self, request: ApiRequest, token: Option<&Token>) -> Result<ApiResponse, InfraError> {
        let method = request.method.clone();
        let path = request.path();
        let raw = request.raw_response;
        let built = self.build_request(request, token)?;

        let response = self.client.execute(built).await.map_err(|error| {
            InfraError::Network(format!("network error on {method} {path}: {error}"))
        })?;

        let status = response.status();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(ToOwned::to_owned);
        let body = response.bytes().await.map_err(|error| {
            InfraError::Network(format!("failed reading response for {method} {path}: {error}"))
        })?;

        tracing::debug!(%method, %path, status = status.as_u16(), "api request completed");
        if raw {
            return interpret_raw_response(status, body);
        }
        interpret_response(status, content_type.as_deref(), body)
    }
}
