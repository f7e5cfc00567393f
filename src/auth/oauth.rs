use anyhow::{Result, anyhow};
use oauth2::TokenResponse;
use oauth2::basic::BasicClient;
use oauth2::reqwest::http_client;
use oauth2::{
    AuthUrl, AuthorizationCode, ClientId, ClientSecret, PkceCodeChallenge, RedirectUrl,
    RefreshToken, RequestTokenError, Scope, TokenUrl,
};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::{Duration, Instant};
use tiny_http::{Response, Server};
use url::Url;

use crate::auth::token_store;
use crate::error::AuthError;
use crate::retry::{RetryPolicy, backoff_delay};

const AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Read + send is all the digest needs.
pub const SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/gmail.readonly",
    "https://www.googleapis.com/auth/gmail.send",
];

/// Tokens returned by the oauth flows (in-memory)
pub struct Tokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: Option<u64>,
}

fn build_client(client_id: &str, client_secret: Option<&str>) -> Result<BasicClient, AuthError> {
    let client_id = ClientId::new(client_id.to_string());
    let client_secret = client_secret.map(|s| ClientSecret::new(s.to_string()));
    let auth_url = AuthUrl::new(AUTH_URL.to_string())?;
    let token_url = TokenUrl::new(TOKEN_URL.to_string())?;
    Ok(BasicClient::new(
        client_id,
        client_secret,
        auth_url,
        Some(token_url),
    ))
}

/// Exchange a refresh token for a new access token. Transport failures get
/// one retry with backoff; a rejected grant (revoked/invalid token) does not.
pub fn refresh_access_token(
    client_id: &str,
    client_secret: Option<&str>,
    refresh_token: &str,
    retry: &RetryPolicy,
) -> Result<Tokens, AuthError> {
    let oauth_client = build_client(client_id, client_secret)?;
    let rt = RefreshToken::new(refresh_token.to_string());

    let mut attempt = 1u32;
    loop {
        match oauth_client.exchange_refresh_token(&rt).request(http_client) {
            Ok(token) => {
                return Ok(Tokens {
                    access_token: token.access_token().secret().to_string(),
                    refresh_token: token.refresh_token().map(|r| r.secret().to_string()),
                    expires_in: token.expires_in().map(|d| d.as_secs()),
                });
            }
            Err(RequestTokenError::Request(e)) => {
                if attempt < 2 {
                    let delay = backoff_delay(attempt, retry, None);
                    log::warn!("token endpoint unreachable ({e}); retrying in {delay:?}");
                    std::thread::sleep(delay);
                    attempt += 1;
                    continue;
                }
                return Err(AuthError::Endpoint(e.to_string()));
            }
            Err(e) => return Err(AuthError::RefreshRejected(e.to_string())),
        }
    }
}

/// Perform Authorization Code + PKCE flow. Opens system browser and captures
/// the code via a tiny loopback server. This is operator-facing provisioning
/// (`gmail_digest auth`); the scheduled pipeline never calls it.
pub fn perform_consent_flow(
    client_id: &str,
    client_secret: Option<&str>,
    redirect_uri: &str,
    user_email: &str,
) -> Result<Tokens> {
    let oauth_client = build_client(client_id, client_secret)?
        .set_redirect_uri(RedirectUrl::new(redirect_uri.to_string())?);

    // Parse redirect_uri so bind address matches exactly
    let redirect = Url::parse(redirect_uri)
        .map_err(|e| anyhow!("Invalid redirect_uri '{redirect_uri}': {e}"))?;

    let host = redirect
        .host_str()
        .ok_or_else(|| anyhow!("redirect_uri missing host: {redirect_uri}"))?;

    let port = redirect
        .port_or_known_default()
        .ok_or_else(|| anyhow!("redirect_uri missing/unknown port: {redirect_uri}"))?;

    // For local loopback flows, prefer binding explicitly to loopback.
    let bind_ip: IpAddr = match host {
        "localhost" | "127.0.0.1" => IpAddr::V4(Ipv4Addr::LOCALHOST),
        other => other.parse::<IpAddr>().map_err(|_| {
            anyhow!("redirect_uri host must be localhost/127.0.0.1 or an IP: {other}")
        })?,
    };

    let bind_addr = SocketAddr::new(bind_ip, port);

    // Start listening before opening the browser so the redirect can't race us
    let server = Server::http(bind_addr)
        .map_err(|e| anyhow!("Failed to bind OAuth callback server on {bind_addr}: {e:?}"))?;

    let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();

    let mut auth_request = oauth_client
        .authorize_url(oauth2::CsrfToken::new_random)
        .set_pkce_challenge(pkce_challenge);
    for scope in SCOPES {
        auth_request = auth_request.add_scope(Scope::new(scope.to_string()));
    }
    let (auth_url, _csrf_token) = auth_request.url();

    println!("Open this URL in your browser:\n{auth_url}");
    // best-effort: don't fail if browser can't be opened
    if let Err(e) = open::that(auth_url.as_str()) {
        eprintln!("Warning: could not open browser automatically: {e}");
    }

    // Wait for callback
    let mut code_opt: Option<String> = None;
    let wait_until = Instant::now() + Duration::from_secs(120);

    while Instant::now() < wait_until {
        let Ok(maybe_request) = server.recv_timeout(Duration::from_millis(500)) else {
            continue;
        };

        let Some(request) = maybe_request else {
            continue;
        };

        // request.url() is a path+query like "/callback?code=...&state=..."
        let full = format!("http://{}:{}{}", host, port, request.url());

        match Url::parse(&full) {
            Ok(parsed) => {
                for (k, v) in parsed.query_pairs() {
                    if k == "code" {
                        code_opt = Some(v.into_owned());
                    }
                }

                if code_opt.is_some() {
                    let _ = request.respond(Response::from_string(
                        "Authorization received. You can close this tab.",
                    ));
                    break;
                } else {
                    let _ = request.respond(Response::from_string(
                        "No code found in redirect. You can close this tab.",
                    ));
                }
            }
            Err(_) => {
                let _ = request.respond(Response::from_string("Bad redirect"));
            }
        }
    }

    let code = code_opt.ok_or_else(|| anyhow!("No code received within timeout"))?;

    // Exchange code for tokens
    let token = match oauth_client
        .exchange_code(AuthorizationCode::new(code))
        .set_pkce_verifier(pkce_verifier)
        .request(http_client)
    {
        Ok(tok) => tok,
        Err(err) => {
            eprintln!("Token exchange failed: {:#?}", err);
            return Err(anyhow!("Token exchange failed: see stderr for details"));
        }
    };

    let access = token.access_token().secret().to_string();
    let refresh = token.refresh_token().map(|r| r.secret().to_string());
    let expires = token.expires_in().map(|d| d.as_secs());

    if let Some(ref_token) = &refresh
        && let Err(e) = token_store::save_refresh_token(user_email, ref_token)
    {
        eprintln!("Warning: could not store refresh token in keyring: {e}");
    }

    Ok(Tokens {
        access_token: access,
        refresh_token: refresh,
        expires_in: expires,
    })
}
