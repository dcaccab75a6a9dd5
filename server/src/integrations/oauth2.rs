use std::{collections::HashMap, net::IpAddr, time::Duration};

use anyhow::Context;
use chrono::{DateTime, Utc};
use oauth2::{
    basic::{BasicClient, BasicTokenResponse},
    AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, RedirectUrl, RefreshToken,
    RequestTokenError, Scope, TokenResponse, TokenUrl,
};
use secrecy::{ExposeSecret, Secret, SecretString};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    time::timeout,
};
use tracing::{info, warn};
use url::Url;

use crate::{configuration::TickTickSettings, credentials::Credentials, error::AdapterError};

/// Scopes requested during authorization.
pub static OAUTH_SCOPES: &[&str] = &["tasks:read", "tasks:write"];

/// Fixed path of the single callback route.
pub static CALLBACK_PATH: &str = "/callback";

static SUCCESS_PAGE: &str = "<html><body><h1>Authorization successful</h1>\
<p>You can close this window and return to the terminal.</p></body></html>";
static FAILURE_PAGE: &str = "<html><body><h1>Authorization failed</h1>\
<p>Check the terminal output, then restart the authorization flow.</p></body></html>";

/// Runs the OAuth2 authorization-code exchange against the provider's
/// endpoints: one flow per credential lifetime, plus the refresh grant.
pub struct AuthorizationService {
    client_id: String,
    client_secret: SecretString,
    auth_url: Url,
    token_url: Url,
    listen_address: IpAddr,
    listen_port: u16,
}

/// A flow that has generated its anti-forgery token and bound its callback
/// listener, awaiting exactly one redirect. Dropped on completion, success
/// or failure alike.
pub struct PendingAuthorization {
    pub authorization_url: Url,
    pub redirect_uri: String,
    csrf_state: CsrfToken,
    listener: TcpListener,
}

/// Tokens returned by a code or refresh exchange.
pub struct TokenSet {
    pub access_token: SecretString,
    pub refresh_token: Option<SecretString>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl TokenSet {
    /// Update a credential set in place. The refresh token is only replaced
    /// when the provider rotated it.
    pub fn apply_to(&self, credentials: &mut Credentials) {
        credentials.access_token = Some(self.access_token.clone());
        if let Some(refresh_token) = &self.refresh_token {
            credentials.refresh_token = Some(refresh_token.clone());
        }
        credentials.expires_at = self.expires_at;
    }
}

impl AuthorizationService {
    /// Endpoint overrides stored alongside the credentials take precedence
    /// over the configured defaults.
    pub fn new(credentials: &Credentials, settings: &TickTickSettings) -> Self {
        AuthorizationService {
            client_id: credentials.client_id.clone(),
            client_secret: credentials.client_secret.clone(),
            auth_url: credentials
                .auth_url
                .clone()
                .unwrap_or_else(|| settings.auth_url.clone()),
            token_url: credentials
                .token_url
                .clone()
                .unwrap_or_else(|| settings.token_url.clone()),
            listen_address: settings.listen_address,
            listen_port: settings.listen_port,
        }
    }

    /// Start an authorization flow: bind the loopback callback listener,
    /// generate the anti-forgery token and build the authorization URL for
    /// the caller to open in a browser.
    pub async fn start(&self) -> Result<PendingAuthorization, AdapterError> {
        if !self.listen_address.is_loopback() {
            return Err(AdapterError::Authorization(format!(
                "refusing to bind the authorization callback listener to non-loopback address {}",
                self.listen_address
            )));
        }

        let listener = TcpListener::bind((self.listen_address, self.listen_port))
            .await
            .context("Cannot bind authorization callback listener")?;
        let local_addr = listener
            .local_addr()
            .context("Cannot resolve authorization callback listener address")?;
        let redirect_uri = format!("http://{local_addr}{CALLBACK_PATH}");

        let client = BasicClient::new(ClientId::new(self.client_id.clone()))
            .set_client_secret(ClientSecret::new(
                self.client_secret.expose_secret().clone(),
            ))
            .set_auth_uri(AuthUrl::from_url(self.auth_url.clone()))
            .set_redirect_uri(
                RedirectUrl::new(redirect_uri.clone()).context("Cannot build redirect URI")?,
            );
        let (authorization_url, csrf_state) = client
            .authorize_url(CsrfToken::new_random)
            .add_scopes(
                OAUTH_SCOPES
                    .iter()
                    .map(|scope| Scope::new((*scope).to_string())),
            )
            .url();

        info!(%redirect_uri, "awaiting authorization callback");
        Ok(PendingAuthorization {
            authorization_url,
            redirect_uri,
            csrf_state,
            listener,
        })
    }

    /// Wait for the single inbound redirect, bounded by `wait`. Returns the
    /// authorization code once the anti-forgery token has been verified.
    pub async fn wait_for_callback(
        &self,
        pending: PendingAuthorization,
        wait: Duration,
    ) -> Result<String, AdapterError> {
        let PendingAuthorization {
            csrf_state,
            listener,
            ..
        } = pending;

        let (mut stream, _) = timeout(wait, listener.accept())
            .await
            .map_err(|_| {
                AdapterError::Authorization(format!(
                    "timed out after {}s waiting for the authorization callback",
                    wait.as_secs()
                ))
            })?
            .context("Cannot accept authorization callback connection")?;

        let request_head = read_request_head(&mut stream).await?;
        let params = parse_callback_params(&request_head)?;

        if let Some(error) = params.get("error") {
            respond(&mut stream, "400 Bad Request", FAILURE_PAGE).await;
            return Err(AdapterError::Authorization(format!(
                "authorization denied by provider: {error}"
            )));
        }

        if params.get("state").map(String::as_str) != Some(csrf_state.secret()) {
            respond(&mut stream, "400 Bad Request", FAILURE_PAGE).await;
            return Err(AdapterError::Authorization(
                "callback state does not match the token generated for this flow".to_string(),
            ));
        }

        let Some(code) = params.get("code") else {
            respond(&mut stream, "400 Bad Request", FAILURE_PAGE).await;
            return Err(AdapterError::Authorization(
                "callback carries no authorization code".to_string(),
            ));
        };

        respond(&mut stream, "200 OK", SUCCESS_PAGE).await;
        Ok(code.clone())
    }

    /// Exchange the authorization code for tokens, authenticating with the
    /// client id and secret over HTTP Basic auth.
    pub async fn exchange_code(
        &self,
        code: String,
        redirect_uri: &str,
    ) -> Result<TokenSet, AdapterError> {
        let client = BasicClient::new(ClientId::new(self.client_id.clone()))
            .set_client_secret(ClientSecret::new(
                self.client_secret.expose_secret().clone(),
            ))
            .set_token_uri(TokenUrl::from_url(self.token_url.clone()))
            .set_redirect_uri(
                RedirectUrl::new(redirect_uri.to_string())
                    .context("Cannot build redirect URI")?,
            );

        let response = client
            .exchange_code(AuthorizationCode::new(code))
            .request_async(&oauth_http_client()?)
            .await
            .map_err(|error| match error {
                RequestTokenError::ServerResponse(response) => {
                    AdapterError::TokenExchange(response.to_string())
                }
                error => AdapterError::TokenExchange(error.to_string()),
            })?;

        Ok(into_token_set(response))
    }

    /// Obtain a new access token from the stored refresh token. A provider
    /// rejection means the caller must run a full re-authorization.
    pub async fn refresh(&self, credentials: &Credentials) -> Result<TokenSet, AdapterError> {
        let Some(refresh_token) = &credentials.refresh_token else {
            return Err(AdapterError::Refresh(
                "no refresh token is stored; a full re-authorization is required".to_string(),
            ));
        };

        let client = BasicClient::new(ClientId::new(self.client_id.clone()))
            .set_client_secret(ClientSecret::new(
                self.client_secret.expose_secret().clone(),
            ))
            .set_token_uri(TokenUrl::from_url(self.token_url.clone()));

        let response = client
            .exchange_refresh_token(&RefreshToken::new(
                refresh_token.expose_secret().clone(),
            ))
            .request_async(&oauth_http_client()?)
            .await
            .map_err(|error| match error {
                RequestTokenError::ServerResponse(response) => {
                    AdapterError::Refresh(response.to_string())
                }
                error => AdapterError::Refresh(error.to_string()),
            })?;

        info!("access token refreshed");
        Ok(into_token_set(response))
    }
}

fn oauth_http_client() -> Result<oauth2::reqwest::Client, AdapterError> {
    // Following redirects on the token endpoint would leak credentials.
    Ok(oauth2::reqwest::ClientBuilder::new()
        .redirect(oauth2::reqwest::redirect::Policy::none())
        .build()
        .context("Cannot build OAuth2 HTTP client")?)
}

fn into_token_set(response: BasicTokenResponse) -> TokenSet {
    TokenSet {
        access_token: Secret::new(response.access_token().secret().clone()),
        refresh_token: response
            .refresh_token()
            .map(|token| Secret::new(token.secret().clone())),
        expires_at: response
            .expires_in()
            .and_then(|duration| chrono::Duration::from_std(duration).ok())
            .map(|duration| Utc::now() + duration),
    }
}

async fn read_request_head(stream: &mut TcpStream) -> Result<String, AdapterError> {
    let mut buffer = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];
    loop {
        let read = stream
            .read(&mut chunk)
            .await
            .context("Cannot read authorization callback request")?;
        if read == 0 {
            break;
        }
        buffer.extend_from_slice(&chunk[..read]);
        if buffer.windows(4).any(|window| window == b"\r\n\r\n") || buffer.len() > 16 * 1024 {
            break;
        }
    }
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

fn parse_callback_params(request_head: &str) -> Result<HashMap<String, String>, AdapterError> {
    let request_line = request_head.lines().next().unwrap_or_default();
    let target = request_line
        .split_whitespace()
        .nth(1)
        .ok_or_else(|| {
            AdapterError::Authorization("malformed authorization callback request".to_string())
        })?;
    if !target.starts_with(CALLBACK_PATH) {
        return Err(AdapterError::Authorization(format!(
            "unexpected authorization callback path `{}`",
            target.split('?').next().unwrap_or(target)
        )));
    }

    let url = Url::parse(&format!("http://localhost{target}"))
        .context("Cannot parse authorization callback query")?;
    Ok(url
        .query_pairs()
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect())
}

async fn respond(stream: &mut TcpStream, status: &str, body: &str) {
    let response = format!(
        "HTTP/1.1 {status}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    if let Err(error) = stream.write_all(response.as_bytes()).await {
        warn!("failed to answer authorization callback: {error}");
    }
    let _ = stream.flush().await;
}
