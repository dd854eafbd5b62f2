//! HTTP transport seam.
//!
//! The client builds [`HttpRequest`] values and hands them to a
//! [`Transport`]. [`ReqwestTransport`] sends them over the network;
//! [`crate::mock::MockTransport`] answers them from a script in tests.
//! Redirects are never followed: TAP answers a job submission with
//! `303 See Other` and the client needs the `Location` header.

use std::path::PathBuf;
use std::time::Duration;

use reqwest::blocking::{multipart, Client};
use reqwest::header;
use reqwest::redirect::Policy;
use tracing::{debug, trace};

use crate::error::TapResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// File content sent as a multipart part.
#[derive(Debug, Clone, PartialEq)]
pub enum FileContent {
    Path(PathBuf),
    Bytes(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FilePart {
    /// Form field name
    pub field: String,
    pub file_name: String,
    pub content: FileContent,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    /// Query string for GET, form fields for POST
    pub params: Vec<(String, String)>,
    /// Multipart file parts; a POST with files is sent as multipart
    pub files: Vec<FilePart>,
    pub cookie: Option<String>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::Get, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::Post, url)
    }

    fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            params: Vec::new(),
            files: Vec::new(),
            cookie: None,
        }
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    pub fn params<I, K, V>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.params
            .extend(params.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn file(mut self, part: FilePart) -> Self {
        self.files.push(part);
        self
    }

    pub fn cookie(mut self, cookie: Option<String>) -> Self {
        self.cookie = cookie;
        self
    }

    /// Value of a parameter, matched case-insensitively.
    pub fn param_value(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    pub fn is_multipart(&self) -> bool {
        !self.files.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    /// Header names are stored lowercase
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_ascii_lowercase(), value.into()));
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        let name = name.to_ascii_lowercase();
        self.headers
            .iter()
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn set_cookies(&self) -> impl Iterator<Item = &str> {
        self.headers
            .iter()
            .filter(|(k, _)| k == "set-cookie")
            .map(|(_, v)| v.as_str())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_redirect(&self) -> bool {
        (300..400).contains(&self.status)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Something that can execute an HTTP request.
pub trait Transport: Send {
    fn execute(&self, request: &HttpRequest) -> TapResult<HttpResponse>;
}

/// Blocking reqwest transport.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(user_agent: &str, timeout: Option<Duration>) -> TapResult<Self> {
        let mut builder = Client::builder()
            .user_agent(user_agent)
            .redirect(Policy::none());
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            client: builder.build()?,
        })
    }

    fn multipart_form(request: &HttpRequest) -> TapResult<multipart::Form> {
        let mut form = multipart::Form::new();
        for (key, value) in &request.params {
            form = form.text(key.clone(), value.clone());
        }
        for file in &request.files {
            let bytes = match &file.content {
                FileContent::Path(path) => std::fs::read(path)?,
                FileContent::Bytes(bytes) => bytes.clone(),
            };
            let part = multipart::Part::bytes(bytes).file_name(file.file_name.clone());
            form = form.part(file.field.clone(), part);
        }
        Ok(form)
    }
}

impl Transport for ReqwestTransport {
    fn execute(&self, request: &HttpRequest) -> TapResult<HttpResponse> {
        debug!(method = ?request.method, url = %request.url, "sending request");
        let mut builder = match request.method {
            Method::Get => self.client.get(&request.url).query(&request.params),
            Method::Post if request.is_multipart() => self
                .client
                .post(&request.url)
                .multipart(Self::multipart_form(request)?),
            Method::Post => self.client.post(&request.url).form(&request.params),
        };
        if let Some(cookie) = &request.cookie {
            builder = builder.header(header::COOKIE, cookie);
        }

        let response = builder.send()?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();
        let body = response.bytes()?.to_vec();
        debug!(status, bytes = body.len(), "response received");
        trace!(body = %String::from_utf8_lossy(&body[..body.len().min(2048)]));

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builder() {
        let request = HttpRequest::post("http://x/tap/sync")
            .param("REQUEST", "doQuery")
            .params([("LANG", "ADQL"), ("FORMAT", "csv")])
            .cookie(Some("JSESSIONID=abc".into()));
        assert_eq!(request.param_value("format"), Some("csv"));
        assert_eq!(request.params.len(), 3);
        assert!(!request.is_multipart());
    }

    #[test]
    fn test_response_headers_are_case_insensitive() {
        let response = HttpResponse::new(303, "")
            .with_header("Location", "http://x/tap/async/1")
            .with_header("Set-Cookie", "JSESSIONID=1; Path=/")
            .with_header("Set-Cookie", "other=2");
        assert!(response.is_redirect());
        assert_eq!(response.header("location"), Some("http://x/tap/async/1"));
        assert_eq!(response.set_cookies().count(), 2);
    }
}
