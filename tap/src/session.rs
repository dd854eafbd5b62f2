//! Cookie-based login for TAP+ services.
//!
//! A successful login leaves a session cookie in the client; every later
//! request carries it until [`TapClient::logout`]. Responses are never taken
//! from the cache while a session is active.

use std::fmt;
use std::path::Path;

use tracing::{info, warn};

use crate::client::TapClient;
use crate::error::{TapError, TapResult};
use crate::http::HttpRequest;

/// Session cookie set by the login servlet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCookie {
    pub name: String,
    pub value: String,
}

impl SessionCookie {
    /// Cookie names TAP+ servers use for the session.
    pub const NAMES: [&'static str; 2] = ["JSESSIONID", "SESSION"];

    /// Extract a session cookie from a `Set-Cookie` header value.
    pub fn from_set_cookie(header: &str) -> Option<Self> {
        let pair = header.split(';').next()?.trim();
        let (name, value) = pair.split_once('=')?;
        let name = name.trim();
        if !Self::NAMES.iter().any(|n| n.eq_ignore_ascii_case(name)) || value.is_empty() {
            return None;
        }
        Some(Self {
            name: name.to_string(),
            value: value.trim().to_string(),
        })
    }

    /// Value for the `Cookie` request header.
    pub fn header_value(&self) -> String {
        format!("{}={}", self.name, self.value)
    }
}

/// User name and password. The password never shows up in `Debug` output.
#[derive(Clone)]
pub struct Credentials {
    pub user: String,
    password: String,
}

impl Credentials {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }

    /// Read credentials from a file: user on the first line, password on
    /// the second.
    pub fn from_file(path: &Path) -> TapResult<Self> {
        let text = std::fs::read_to_string(path)?;
        let mut lines = text.lines().map(str::trim);
        let user = lines.next().filter(|l| !l.is_empty());
        let password = lines.next().filter(|l| !l.is_empty());
        match (user, password) {
            (Some(user), Some(password)) => Ok(Self::new(user, password)),
            _ => Err(TapError::InvalidInput(format!(
                "{} must hold the user name on the first line and the password on the second",
                path.display()
            ))),
        }
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"***")
            .finish()
    }
}

/// An authenticated session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub user: String,
    pub cookie: SessionCookie,
}

impl TapClient {
    pub fn login(&mut self, user: &str, password: &str) -> TapResult<()> {
        self.login_with_credentials(&Credentials::new(user, password))
    }

    pub fn login_with_credentials(&mut self, credentials: &Credentials) -> TapResult<()> {
        let service = self.service();
        let url = service
            .require_endpoint(&service.login_url, "login")?
            .to_string();

        // A new login replaces any previous session.
        self.session = None;
        let request = HttpRequest::post(url)
            .param("username", credentials.user.as_str())
            .param("password", credentials.password());
        let response = self.transport.execute(&request)?;

        if matches!(response.status, 401 | 403) {
            return Err(TapError::AuthenticationFailed(format!(
                "{} rejected the credentials of '{}'",
                self.service().name,
                credentials.user
            )));
        }
        if !response.is_success() && !response.is_redirect() {
            return Err(TapError::AuthenticationFailed(format!(
                "login returned status {}: {}",
                response.status,
                response.text().trim()
            )));
        }

        let cookie = response
            .set_cookies()
            .find_map(SessionCookie::from_set_cookie)
            .ok_or_else(|| {
                TapError::AuthenticationFailed("login response carried no session cookie".into())
            })?;
        info!("Logged in to {} as {}", self.service().name, credentials.user);
        self.session = Some(Session {
            user: credentials.user.clone(),
            cookie,
        });
        Ok(())
    }

    /// End the session. The local session is dropped even when the logout
    /// request fails.
    pub fn logout(&mut self) -> TapResult<()> {
        let Some(session) = self.session.take() else {
            return Ok(());
        };
        let Some(url) = self.service().logout_url.clone() else {
            return Ok(());
        };
        let request = HttpRequest::post(url).cookie(Some(session.cookie.header_value()));
        let response = self.transport.execute(&request)?;
        if !response.is_success() && !response.is_redirect() {
            warn!(
                "Logout of {} returned status {}",
                session.user, response.status
            );
        }
        info!("Logged out {}", session.user);
        Ok(())
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn is_logged_in(&self) -> bool {
        self.session.is_some()
    }

    pub(crate) fn require_session(&self, operation: &'static str) -> TapResult<&Session> {
        self.session
            .as_ref()
            .ok_or(TapError::AuthenticationRequired { operation })
    }
}
