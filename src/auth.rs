//! Application-default credential discovery and access-token minting.
//!
//! [`acquire`] walks the usual discovery chain (key file named by
//! `GOOGLE_APPLICATION_CREDENTIALS`, the gcloud well-known file, the compute
//! metadata server, then a pre-minted `BQB_ACCESS_TOKEN`) and resolves the
//! project the session bills against. The returned [`Credentials`] mint and
//! cache bearer tokens on demand; callers never see expiry.

use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::{debug, info};

/// Scope requested when the caller does not supply any.
pub const DEFAULT_SCOPE: &str = "https://www.googleapis.com/auth/bigquery";

const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const DEFAULT_METADATA_HOST: &str = "metadata.google.internal";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Tokens this close to expiry are refreshed before use.
const EXPIRY_SKEW_SECS: u64 = 60;

/// Off-GCE the metadata host does not resolve; keep the probe short.
const METADATA_PROBE_TIMEOUT_MS: u64 = 500;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error(
        "no application default credentials found; set GOOGLE_APPLICATION_CREDENTIALS or run `gcloud auth application-default login`"
    )]
    NoCredentials,

    #[error("could not determine a project id; set GOOGLE_CLOUD_PROJECT")]
    NoProject,

    #[error("failed to read credentials file {path}: {source}")]
    ReadKey {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed credentials file {path}: {source}")]
    ParseKey {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("unsupported credentials type '{0}'")]
    UnsupportedType(String),

    #[error("failed to sign token assertion: {0}")]
    Sign(#[from] jsonwebtoken::errors::Error),

    #[error("token request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("token endpoint returned {status}: {body}")]
    TokenEndpoint { status: u16, body: String },
}

/// Service-account JSON key (the fields we use).
#[derive(Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default)]
    pub private_key_id: Option<String>,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub token_uri: Option<String>,
}

/// Refresh-token credentials written by `gcloud auth application-default login`.
#[derive(Clone, Deserialize)]
pub struct AuthorizedUser {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
    #[serde(default)]
    pub quota_project_id: Option<String>,
    #[serde(default)]
    pub token_uri: Option<String>,
}

#[derive(Deserialize)]
struct KeyFileKind {
    #[serde(rename = "type")]
    kind: String,
}

/// Where bearer tokens come from.
#[derive(Clone)]
pub enum CredentialSource {
    ServiceAccount(ServiceAccountKey),
    AuthorizedUser(AuthorizedUser),
    Metadata { host: String },
    Static(String),
}

impl fmt::Debug for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ServiceAccount(key) => f
                .debug_struct("ServiceAccount")
                .field("client_email", &key.client_email)
                .field("private_key_id", &key.private_key_id)
                .finish_non_exhaustive(),
            Self::AuthorizedUser(user) => f
                .debug_struct("AuthorizedUser")
                .field("client_id", &user.client_id)
                .finish_non_exhaustive(),
            Self::Metadata { host } => f.debug_struct("Metadata").field("host", host).finish(),
            Self::Static(_) => f.write_str("Static(<redacted>)"),
        }
    }
}

impl CredentialSource {
    fn label(&self) -> &'static str {
        match self {
            Self::ServiceAccount(_) => "service_account",
            Self::AuthorizedUser(_) => "authorized_user",
            Self::Metadata { .. } => "metadata",
            Self::Static(_) => "static",
        }
    }

    fn embedded_project(&self) -> Option<String> {
        match self {
            Self::ServiceAccount(key) => key.project_id.clone(),
            Self::AuthorizedUser(user) => user.quota_project_id.clone(),
            _ => None,
        }
    }
}

#[derive(Clone)]
struct CachedToken {
    value: String,
    expires_at: u64,
}

/// Opaque credential bundle. Tokens are minted lazily and cached.
pub struct Credentials {
    source: CredentialSource,
    scopes: Vec<String>,
    http: reqwest::blocking::Client,
    cached: RefCell<Option<CachedToken>>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("source", &self.source)
            .field("scopes", &self.scopes)
            .finish_non_exhaustive()
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: String,
    aud: &'a str,
    iat: u64,
    exp: u64,
}

impl Credentials {
    pub fn new(source: CredentialSource, scopes: Vec<String>) -> Self {
        Self {
            source,
            scopes,
            http: reqwest::blocking::Client::new(),
            cached: RefCell::new(None),
        }
    }

    /// Credentials that always present `token`. Useful for pre-minted tokens.
    pub fn from_static_token(token: impl Into<String>) -> Self {
        Self::new(CredentialSource::Static(token.into()), default_scopes())
    }

    /// A bearer token valid for at least the next minute.
    pub fn access_token(&self) -> Result<String, AuthError> {
        if let CredentialSource::Static(token) = &self.source {
            return Ok(token.clone());
        }
        let now = now_unix();
        if let Some(tok) = self.cached.borrow().as_ref()
            && tok.expires_at > now + EXPIRY_SKEW_SECS
        {
            return Ok(tok.value.clone());
        }
        let fresh = self.mint(now)?;
        let value = fresh.value.clone();
        *self.cached.borrow_mut() = Some(fresh);
        Ok(value)
    }

    fn mint(&self, now: u64) -> Result<CachedToken, AuthError> {
        debug!(source = self.source.label(), "minting access token");
        let response = match &self.source {
            CredentialSource::ServiceAccount(key) => {
                let token_uri = key.token_uri.as_deref().unwrap_or(DEFAULT_TOKEN_URI);
                let assertion = self.sign_assertion(key, token_uri, now)?;
                self.http
                    .post(token_uri)
                    .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
                    .send()?
            }
            CredentialSource::AuthorizedUser(user) => {
                let token_uri = user.token_uri.as_deref().unwrap_or(DEFAULT_TOKEN_URI);
                self.http
                    .post(token_uri)
                    .form(&[
                        ("grant_type", "refresh_token"),
                        ("client_id", user.client_id.as_str()),
                        ("client_secret", user.client_secret.as_str()),
                        ("refresh_token", user.refresh_token.as_str()),
                    ])
                    .send()?
            }
            CredentialSource::Metadata { host } => {
                let url = format!(
                    "http://{host}/computeMetadata/v1/instance/service-accounts/default/token?scopes={}",
                    urlencoding::encode(&self.scopes.join(","))
                );
                self.http.get(url).header("Metadata-Flavor", "Google").send()?
            }
            CredentialSource::Static(token) => {
                return Ok(CachedToken {
                    value: token.clone(),
                    expires_at: u64::MAX,
                });
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(AuthError::TokenEndpoint {
                status: status.as_u16(),
                body,
            });
        }
        let token: TokenResponse = response.json()?;
        Ok(CachedToken {
            value: token.access_token,
            expires_at: now + token.expires_in.unwrap_or(3600),
        })
    }

    fn sign_assertion(
        &self,
        key: &ServiceAccountKey,
        audience: &str,
        now: u64,
    ) -> Result<String, AuthError> {
        let claims = AssertionClaims {
            iss: &key.client_email,
            scope: self.scopes.join(" "),
            aud: audience,
            iat: now,
            exp: now + 3600,
        };
        let mut header = Header::new(Algorithm::RS256);
        header.kid = key.private_key_id.clone();
        let signing_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())?;
        Ok(jsonwebtoken::encode(&header, &claims, &signing_key)?)
    }
}

pub fn default_scopes() -> Vec<String> {
    vec![DEFAULT_SCOPE.to_string()]
}

/// Discover ambient credentials and the project they bill against.
///
/// Fails with [`AuthError::NoCredentials`] when nothing in the discovery
/// chain yields a credential source. That condition is terminal for the
/// session; there is no retry.
pub fn acquire(scopes: Option<&[&str]>) -> Result<(Credentials, String), AuthError> {
    let scopes: Vec<String> = match scopes {
        Some(s) if !s.is_empty() => s.iter().map(|s| (*s).to_string()).collect(),
        _ => default_scopes(),
    };

    let source = discover_source()?.ok_or(AuthError::NoCredentials)?;
    info!(source = source.label(), "using application default credentials");

    let project = match env_project() {
        Some(p) => p,
        None => match source.embedded_project() {
            Some(p) => p,
            None => match &source {
                CredentialSource::Metadata { host } => metadata_project(host)?,
                _ => return Err(AuthError::NoProject),
            },
        },
    };
    debug!(%project, "resolved project id");

    Ok((Credentials::new(source, scopes), project))
}

fn discover_source() -> Result<Option<CredentialSource>, AuthError> {
    if let Ok(path) = dotenvy::var("GOOGLE_APPLICATION_CREDENTIALS")
        && !path.trim().is_empty()
    {
        return load_key_file(Path::new(&path)).map(Some);
    }

    if let Some(path) = well_known_file()
        && path.is_file()
    {
        return load_key_file(&path).map(Some);
    }

    let host = dotenvy::var("GCE_METADATA_HOST").unwrap_or_else(|_| DEFAULT_METADATA_HOST.into());
    if metadata_available(&host) {
        return Ok(Some(CredentialSource::Metadata { host }));
    }

    if let Ok(token) = dotenvy::var("BQB_ACCESS_TOKEN")
        && !token.trim().is_empty()
    {
        return Ok(Some(CredentialSource::Static(token.trim().to_string())));
    }

    Ok(None)
}

/// Parse a JSON key file into a credential source.
pub fn load_key_file(path: &Path) -> Result<CredentialSource, AuthError> {
    let raw = std::fs::read_to_string(path).map_err(|source| AuthError::ReadKey {
        path: path.to_path_buf(),
        source,
    })?;
    let parse_err = |source| AuthError::ParseKey {
        path: path.to_path_buf(),
        source,
    };
    let kind: KeyFileKind = serde_json::from_str(&raw).map_err(parse_err)?;
    match kind.kind.as_str() {
        "service_account" => Ok(CredentialSource::ServiceAccount(
            serde_json::from_str(&raw).map_err(parse_err)?,
        )),
        "authorized_user" => Ok(CredentialSource::AuthorizedUser(
            serde_json::from_str(&raw).map_err(parse_err)?,
        )),
        other => Err(AuthError::UnsupportedType(other.to_string())),
    }
}

fn well_known_file() -> Option<PathBuf> {
    if let Ok(dir) = dotenvy::var("CLOUDSDK_CONFIG") {
        return Some(PathBuf::from(dir).join("application_default_credentials.json"));
    }
    directories::BaseDirs::new().map(|dirs| {
        dirs.config_dir()
            .join("gcloud")
            .join("application_default_credentials.json")
    })
}

fn env_project() -> Option<String> {
    ["GOOGLE_CLOUD_PROJECT", "GCLOUD_PROJECT"]
        .iter()
        .filter_map(|k| dotenvy::var(k).ok())
        .map(|v| v.trim().to_string())
        .find(|v| !v.is_empty())
}

fn metadata_client() -> Option<reqwest::blocking::Client> {
    reqwest::blocking::Client::builder()
        .timeout(Duration::from_millis(METADATA_PROBE_TIMEOUT_MS))
        .build()
        .ok()
}

fn metadata_available(host: &str) -> bool {
    let Some(client) = metadata_client() else {
        return false;
    };
    match client
        .get(format!("http://{host}/computeMetadata/v1/"))
        .header("Metadata-Flavor", "Google")
        .send()
    {
        Ok(resp) => resp
            .headers()
            .get("Metadata-Flavor")
            .is_some_and(|v| v == "Google"),
        Err(e) => {
            debug!("metadata server not reachable: {e}");
            false
        }
    }
}

fn metadata_project(host: &str) -> Result<String, AuthError> {
    let client = metadata_client().ok_or(AuthError::NoProject)?;
    let resp = client
        .get(format!("http://{host}/computeMetadata/v1/project/project-id"))
        .header("Metadata-Flavor", "Google")
        .send()?;
    if !resp.status().is_success() {
        return Err(AuthError::NoProject);
    }
    let project = resp.text()?.trim().to_string();
    if project.is_empty() {
        Err(AuthError::NoProject)
    } else {
        Ok(project)
    }
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
