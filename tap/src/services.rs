//! Endpoint tables for the archives the client knows about.
//!
//! Every archive is the same generic client with a different
//! [`ServiceConfig`]. Plain TAP services only have the `/sync`, `/async` and
//! `/tables` resources under their base URL; TAP+ services (the ESA archives)
//! add login, user-table and sharing endpoints next to it.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoEnumIterator};
use votable::OutputFormat;

use crate::error::{TapError, TapResult};

/// What to do when a query comes back with zero rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmptyResultPolicy {
    /// Log a warning and return the empty table
    #[default]
    Warn,
    /// Fail with [`TapError::EmptyResult`]
    Error,
}

/// Endpoints and capabilities of one TAP service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Human readable name used in logs and errors
    pub name: String,
    /// TAP base URL; `/sync`, `/async` and `/tables` hang off it
    pub tap_url: String,
    #[serde(default)]
    pub login_url: Option<String>,
    #[serde(default)]
    pub logout_url: Option<String>,
    /// TAP+ user table upload servlet
    #[serde(default)]
    pub upload_url: Option<String>,
    /// TAP+ table edit/rename servlet
    #[serde(default)]
    pub table_tool_url: Option<String>,
    /// TAP+ group and sharing servlet
    #[serde(default)]
    pub share_url: Option<String>,
    /// Result formats the service can produce
    #[serde(default = "default_formats")]
    pub formats: Vec<OutputFormat>,
    #[serde(default)]
    pub default_format: OutputFormat,
    /// Hard row cap the service applies to synchronous queries
    #[serde(default)]
    pub sync_row_cap: Option<u64>,
    #[serde(default)]
    pub empty_result: EmptyResultPolicy,
}

fn default_formats() -> Vec<OutputFormat> {
    vec![OutputFormat::Votable, OutputFormat::Csv]
}

impl ServiceConfig {
    /// A plain TAP service at `tap_url`.
    pub fn custom(name: impl Into<String>, tap_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tap_url: tap_url.into().trim_end_matches('/').to_string(),
            login_url: None,
            logout_url: None,
            upload_url: None,
            table_tool_url: None,
            share_url: None,
            formats: default_formats(),
            default_format: OutputFormat::Votable,
            sync_row_cap: None,
            empty_result: EmptyResultPolicy::Warn,
        }
    }

    /// A TAP+ service. `server_url` is the servlet root (e.g.
    /// `https://gea.esac.esa.int/tap-server`) and `tap_context` the path of
    /// the TAP resource under it.
    pub fn tap_plus(name: impl Into<String>, server_url: &str, tap_context: &str) -> Self {
        let server = server_url.trim_end_matches('/');
        let mut config = Self::custom(name, format!("{server}/{tap_context}"));
        config.login_url = Some(format!("{server}/login"));
        config.logout_url = Some(format!("{server}/logout"));
        config.upload_url = Some(format!("{server}/{tap_context}/Upload"));
        config.table_tool_url = Some(format!("{server}/{tap_context}/TableTool"));
        config.share_url = Some(format!("{server}/{tap_context}/share"));
        config.formats = OutputFormat::ALL.to_vec();
        config
    }

    pub fn sync_url(&self) -> String {
        format!("{}/sync", self.tap_url)
    }

    pub fn async_url(&self) -> String {
        format!("{}/async", self.tap_url)
    }

    pub fn job_url(&self, job_id: &str) -> String {
        format!("{}/async/{job_id}", self.tap_url)
    }

    pub fn tables_url(&self) -> String {
        format!("{}/tables", self.tap_url)
    }

    pub fn supports(&self, format: OutputFormat) -> bool {
        self.formats.contains(&format)
    }

    /// Reject a format the service does not produce.
    pub fn require_format(&self, format: OutputFormat) -> TapResult<()> {
        if self.supports(format) {
            Ok(())
        } else {
            Err(TapError::UnsupportedFormat {
                format,
                service: self.name.clone(),
            })
        }
    }

    /// Return an optional endpoint or fail with [`TapError::Unsupported`].
    pub fn require_endpoint<'a>(
        &self,
        endpoint: &'a Option<String>,
        operation: &'static str,
    ) -> TapResult<&'a str> {
        endpoint.as_deref().ok_or_else(|| TapError::Unsupported {
            operation,
            service: self.name.clone(),
        })
    }
}

/// Archives with a built-in endpoint table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum Archive {
    /// ESA Gaia archive (TAP+)
    Gaia,
    /// ESA Hubble Science Archive (TAP+)
    EsaHubble,
    /// ESA JWST Science Archive (TAP+)
    EsaJwst,
    /// NASA/IPAC Infrared Science Archive
    Irsa,
    /// CDS SIMBAD
    Simbad,
    /// NASA HEASARC
    Heasarc,
}

impl Archive {
    pub fn all() -> impl Iterator<Item = Archive> {
        Archive::iter()
    }

    pub fn config(&self) -> ServiceConfig {
        match self {
            Archive::Gaia => {
                let mut config =
                    ServiceConfig::tap_plus("Gaia", "https://gea.esac.esa.int/tap-server", "tap");
                config.sync_row_cap = Some(2000);
                config
            }
            Archive::EsaHubble => {
                ServiceConfig::tap_plus("ESA Hubble", "https://hst.esac.esa.int/tap-server", "tap")
            }
            Archive::EsaJwst => {
                let mut config =
                    ServiceConfig::tap_plus("ESA JWST", "https://jwst.esac.esa.int/server", "tap");
                config.sync_row_cap = Some(2000);
                config
            }
            Archive::Irsa => {
                let mut config =
                    ServiceConfig::custom("IRSA", "https://irsa.ipac.caltech.edu/TAP");
                config.formats = vec![OutputFormat::Votable, OutputFormat::Csv, OutputFormat::Fits];
                config
            }
            Archive::Simbad => {
                let mut config = ServiceConfig::custom(
                    "SIMBAD",
                    "https://simbad.cds.unistra.fr/simbad/sim-tap",
                );
                config.formats = vec![
                    OutputFormat::Votable,
                    OutputFormat::Csv,
                    OutputFormat::Json,
                    OutputFormat::Fits,
                ];
                config
            }
            Archive::Heasarc => {
                let mut config =
                    ServiceConfig::custom("HEASARC", "https://heasarc.gsfc.nasa.gov/xamin/vo/tap");
                config.formats = vec![OutputFormat::Votable, OutputFormat::Csv, OutputFormat::Fits];
                config
            }
        }
    }
}
