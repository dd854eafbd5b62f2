//! Query request assembly.
//!
//! A [`QueryRequest`] carries the ADQL text and the per-query options. The
//! client turns it into the TAP form
//! (`REQUEST=doQuery&LANG=ADQL&FORMAT=...&QUERY=...`) and, when a local
//! table is uploaded with the query, into a multipart request whose
//! `UPLOAD` parameter points at the attached part (`name,param:name`).

use std::path::PathBuf;

use votable::{OutputFormat, Table};

use crate::error::{TapError, TapResult};
use crate::http::{FileContent, FilePart, HttpRequest};

/// Where an uploaded table comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum UploadSource {
    /// A VOTable the service fetches itself
    Url(String),
    /// A local file sent with the request
    File(PathBuf),
    /// An in-memory table, sent as VOTable
    Table(Table),
}

impl UploadSource {
    /// Multipart part carrying the table, `None` for URL sources.
    pub(crate) fn file_part(&self, field: &str) -> TapResult<Option<FilePart>> {
        Ok(match self {
            UploadSource::Url(_) => None,
            UploadSource::File(path) => {
                if !path.is_file() {
                    return Err(TapError::InvalidInput(format!(
                        "upload file {} does not exist",
                        path.display()
                    )));
                }
                let file_name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| format!("{field}.vot"));
                Some(FilePart {
                    field: field.to_string(),
                    file_name,
                    content: FileContent::Path(path.clone()),
                })
            }
            UploadSource::Table(table) => Some(FilePart {
                field: field.to_string(),
                file_name: format!("{field}.vot"),
                content: FileContent::Bytes(table.to_votable().into_bytes()),
            }),
        })
    }
}

/// A table uploaded together with a query, referenced in ADQL as
/// `TAP_UPLOAD.<name>`.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryUpload {
    pub name: String,
    pub source: UploadSource,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    pub query: String,
    /// Result format; the service default when unset
    pub format: Option<OutputFormat>,
    /// Row limit for this query, overriding the configured one
    pub max_rec: Option<u64>,
    pub upload: Option<QueryUpload>,
    /// Additional service specific parameters
    pub extra: Vec<(String, String)>,
}

impl QueryRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            format: None,
            max_rec: None,
            upload: None,
            extra: Vec::new(),
        }
    }

    pub fn format(mut self, format: OutputFormat) -> Self {
        self.format = Some(format);
        self
    }

    pub fn max_rec(mut self, max_rec: u64) -> Self {
        self.max_rec = Some(max_rec);
        self
    }

    pub fn upload(mut self, name: impl Into<String>, source: UploadSource) -> Self {
        self.upload = Some(QueryUpload {
            name: name.into(),
            source,
        });
        self
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.push((key.into(), value.into()));
        self
    }

    /// Local validation, done before anything is sent.
    pub fn validate(&self) -> TapResult<()> {
        if self.query.trim().is_empty() {
            return Err(TapError::InvalidInput("query is empty".into()));
        }
        if let Some(upload) = &self.upload {
            if !is_identifier(&upload.name) {
                return Err(TapError::InvalidInput(format!(
                    "upload table name '{}' is not a valid ADQL identifier",
                    upload.name
                )));
            }
        }
        Ok(())
    }

    /// Build the HTTP request for `url` (the `/sync` or `/async` resource).
    ///
    /// `max_rec` is the limit in effect after combining the request with the
    /// client configuration. Asynchronous submissions get `PHASE=RUN` so the
    /// job starts right away.
    pub(crate) fn build(
        &self,
        url: &str,
        format: OutputFormat,
        max_rec: Option<u64>,
        asynchronous: bool,
    ) -> TapResult<HttpRequest> {
        self.validate()?;

        let mut request = HttpRequest::post(url)
            .param("REQUEST", "doQuery")
            .param("LANG", "ADQL")
            .param("FORMAT", format.as_str())
            .param("QUERY", self.query.trim());
        if let Some(max_rec) = max_rec {
            request = request.param("MAXREC", max_rec.to_string());
        }
        if asynchronous {
            request = request.param("PHASE", "RUN");
        }
        if let Some(upload) = &self.upload {
            match &upload.source {
                UploadSource::Url(source_url) => {
                    request = request.param("UPLOAD", format!("{},{source_url}", upload.name));
                }
                source => {
                    request =
                        request.param("UPLOAD", format!("{0},param:{0}", upload.name));
                    if let Some(part) = source.file_part(&upload.name)? {
                        request = request.file(part);
                    }
                }
            }
        }
        Ok(request.params(self.extra.iter().cloned()))
    }
}

/// ADQL regular identifier: a letter followed by letters, digits or `_`.
pub(crate) fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
