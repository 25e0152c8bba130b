//! OIDC bearer-token verification with GA4GH passport support.
//!
//! The verifier is initialised once per personality from the OIDC discovery
//! document; initialisation failure is fatal. Verification outcomes are
//! cached per raw token in a bounded LRU with a short TTL, so a burst of
//! requests with the same bearer performs no network I/O.
//!
//! When the configuration declares required visas, the token must carry a
//! `ga4gh_passport_v1` claim whose visas cover every required shape; a visa
//! only counts after its signature was verified against the JWKS referenced
//! by its `jku` header.

use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::str::FromStr as _;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use anyhow::{Context as _, Result, anyhow};
use jsonwebtoken::jwk::{Jwk, JwkSet};
use jsonwebtoken::{Algorithm, DecodingKey, TokenData, Validation, decode, decode_header};
use serde::Deserialize;

const CACHE_CAPACITY: usize = 1000;
const CACHE_TTL: Duration = Duration::from_secs(60);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
const BACKOFF_DELAY: Duration = Duration::from_secs(10);
const FETCH_TRIES: u32 = 5;

/// JWT validation results cached per raw token, with expiry checking so a
/// stale outcome is re-validated instead of returned.
struct ResultCache {
    entries: Mutex<lru::LruCache<String, (bool, Instant)>>,
    ttl: Duration,
}

impl ResultCache {
    fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(lru::LruCache::new(capacity)),
            ttl,
        }
    }

    fn get(&self, token: &str) -> Option<bool> {
        let mut entries = self.entries.lock().ok()?;
        let (valid, stored_at) = *entries.get(token)?;
        if stored_at.elapsed() <= self.ttl {
            return Some(valid);
        }
        entries.pop(token);
        None
    }

    fn put(&self, token: &str, valid: bool) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.put(token.to_owned(), (valid, Instant::now()));
        }
    }
}

#[derive(Debug, Deserialize)]
struct DiscoveryDocument {
    jwks_uri: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenClaims {
    sub: Option<String>,
    #[allow(dead_code)]
    exp: Option<i64>,
    iat: Option<i64>,
    ga4gh_passport_v1: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct VisaClaims {
    sub: Option<String>,
    #[allow(dead_code)]
    exp: Option<i64>,
    iat: Option<i64>,
    ga4gh_visa_v1: Option<serde_json::Value>,
}

pub struct OidcVerifier {
    issuer: String,
    required_visas: Vec<BTreeMap<String, String>>,
    http: reqwest::Client,
    key: DecodingKey,
    algorithm: Algorithm,
    cache: ResultCache,
}

impl OidcVerifier {
    /// Fetches the OIDC discovery document and the signing JWK. Retries up
    /// to five times with a ten-second back-off; a final failure is returned
    /// to the caller and treated as fatal.
    pub async fn init(
        issuer: &str,
        client_id: &str,
        required_visas: Option<Vec<BTreeMap<String, String>>>,
    ) -> Result<Self> {
        let issuer = issuer.trim_end_matches('/').to_owned();
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to create the OIDC HTTP client")?;

        let well_known_url = format!("{issuer}/.well-known/openid-configuration");
        let discovery: DiscoveryDocument = retry_json_fetch(&http, &well_known_url)
            .await
            .with_context(|| format!("Unable to fetch OIDC configuration from {well_known_url}"))?;

        let jwks_uri = discovery
            .jwks_uri
            .ok_or_else(|| anyhow!("OIDC configuration did not expose 'jwks_uri'"))?;

        let jwk = fetch_first_jwk(&http, &jwks_uri).await?;
        let key = DecodingKey::from_jwk(&jwk)
            .map_err(|e| anyhow!("The JWKS signing key is unusable: {e}"))?;
        let algorithm = jwk_algorithm(&jwk);

        tracing::info!("OIDC verifier is ready for issuer [{issuer}] (client: {client_id})");

        Ok(Self {
            issuer,
            required_visas: required_visas.unwrap_or_default(),
            http,
            key,
            algorithm,
            cache: ResultCache::new(CACHE_CAPACITY, CACHE_TTL),
        })
    }

    /// Verifies a bearer token, consulting the result cache first.
    pub async fn verify(&self, token: &str) -> bool {
        // We expect JWT values to be longer than 100 characters:
        if token.len() <= 100 {
            tracing::debug!("Received an invalid Bearer token: [{token}]");
            return false;
        }

        if let Some(cached) = self.cache.get(token) {
            tracing::debug!("Using a cached JWT validation result: [{cached}]");
            return cached;
        }

        let mut validation = Validation::new(self.algorithm);
        validation.validate_aud = false;
        validation.validate_exp = true;
        validation.set_required_spec_claims(&["exp"]);

        let data: TokenData<TokenClaims> = match decode(token, &self.key, &validation) {
            Ok(data) => data,
            Err(e) => {
                tracing::debug!("JWT decoding failed: [{e}]");
                self.cache.put(token, false);
                return false;
            }
        };

        if !issued_at_is_valid(data.claims.iat) {
            tracing::debug!("This JWT carries an invalid 'iat' claim");
            self.cache.put(token, false);
            return false;
        }

        let Some(sub) = data.claims.sub.filter(|sub| !sub.is_empty()) else {
            tracing::debug!("This JWT does not include 'sub'");
            self.cache.put(token, false);
            return false;
        };

        let valid = self.check_passport(&sub, data.claims.ga4gh_passport_v1.as_deref()).await;
        tracing::info!("Validation outcome for the JWT token [sub={sub}]: {valid}.");

        self.cache.put(token, valid);
        valid
    }

    // ------------------------------------------------------
    // GA4GH Passport checking
    // ------------------------------------------------------

    async fn check_passport(&self, sub: &str, passport_claim: Option<&[String]>) -> bool {
        if self.required_visas.is_empty() {
            // Skip passport checking if there are no required visas configured.
            tracing::debug!("Skipping passport validation (visas not required).");
            return true;
        }

        let Some(visas) = passport_claim.filter(|visas| !visas.is_empty()) else {
            tracing::warn!("ga4gh_passport_v1 claim is empty for subject [{sub}]");
            return false;
        };

        self.check_visas(sub, visas).await
    }

    async fn check_visas(&self, subject: &str, visa_jwts: &[String]) -> bool {
        let mut expected_visas = self.required_visas.clone();
        for visa_jwt in visa_jwts {
            self.check_visa(subject, visa_jwt, &mut expected_visas).await;
            if expected_visas.is_empty() {
                return true;
            }
        }
        tracing::info!("User [{subject}] does not have the required GA4GH Visas.");
        false
    }

    async fn check_visa(
        &self,
        subject: &str,
        visa_jwt: &str,
        expected_visas: &mut Vec<BTreeMap<String, String>>,
    ) {
        let Ok(visa_header) = decode_header(visa_jwt) else {
            return;
        };

        let Ok(data) = decode_unverified(visa_jwt) else {
            return;
        };
        if !issued_at_is_valid(data.claims.iat) {
            return;
        }

        // Also verify the subject of the Visa:
        if data.claims.sub.as_deref() != Some(subject) {
            tracing::warn!(
                "GA4GH Visa subject [{:?}] is not the same as in the JWT [{subject}]",
                data.claims.sub
            );
            return;
        }

        let Some(visa_obj) = data.claims.ga4gh_visa_v1.as_ref() else {
            return;
        };
        let matched = match_visa_claims(visa_obj, expected_visas);
        if matched.is_empty() {
            return;
        }

        if self
            .verify_visa_signature(subject, visa_jwt, visa_header.jku.as_deref(), visa_obj)
            .await
        {
            // Strike every matched shape (walk indices back to front):
            for index in matched.into_iter().rev() {
                expected_visas.remove(index);
            }
        }
    }

    async fn verify_visa_signature(
        &self,
        subject: &str,
        visa_jwt: &str,
        jku: Option<&str>,
        visa_obj: &serde_json::Value,
    ) -> bool {
        let source = visa_obj.get("source").and_then(|v| v.as_str()).unwrap_or("?");
        let asserted = visa_obj.get("asserted").map(|v| v.to_string()).unwrap_or_default();
        let by = visa_obj.get("by").and_then(|v| v.as_str()).unwrap_or("?");
        let msg_has_visa = format!(
            "Subject '{subject}' has the required visa from [{source}] issued at {asserted} by '{by}'"
        );

        let Some(jku) = jku else {
            tracing::warn!("{msg_has_visa} but no 'jku' in header for verification.");
            return false;
        };

        let visa_jwk = match fetch_first_jwk(&self.http, jku).await {
            Ok(jwk) => jwk,
            Err(e) => {
                tracing::warn!("{msg_has_visa} but its JWKS could not be fetched: {e:#}");
                return false;
            }
        };

        let key = match DecodingKey::from_jwk(&visa_jwk) {
            Ok(key) => key,
            Err(e) => {
                tracing::warn!("{msg_has_visa} but its JWK is unusable: {e}");
                return false;
            }
        };

        let mut validation = Validation::new(jwk_algorithm(&visa_jwk));
        validation.validate_aud = false;
        validation.validate_exp = false;
        validation.set_required_spec_claims::<&str>(&[]);

        match decode::<VisaClaims>(visa_jwt, &key, &validation) {
            Ok(_) => {
                tracing::info!("{msg_has_visa}.");
                true
            }
            Err(e) => {
                tracing::warn!("{msg_has_visa} but JWT signature could not be verified: {e}");
                false
            }
        }
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }
}

/// Decodes a visa without signature verification (expiry is still checked).
fn decode_unverified(visa_jwt: &str) -> Result<TokenData<VisaClaims>> {
    let mut validation = Validation::new(Algorithm::RS256);
    validation.insecure_disable_signature_validation();
    validation.validate_aud = false;
    validation.validate_exp = true;
    validation.set_required_spec_claims(&["exp"]);
    decode(visa_jwt, &DecodingKey::from_secret(&[]), &validation).map_err(Into::into)
}

/// Indices of the required shapes fully covered by the visa claim
/// (equality on every listed key).
fn match_visa_claims(
    visa_obj: &serde_json::Value,
    expected_visas: &[BTreeMap<String, String>],
) -> Vec<usize> {
    let Some(visa_map) = visa_obj.as_object() else {
        tracing::warn!("Visa is not an object: {visa_obj}");
        return Vec::new();
    };

    expected_visas
        .iter()
        .enumerate()
        .filter(|(_, shape)| {
            shape.iter().all(|(claim, value)| {
                visa_map.get(claim).and_then(|v| v.as_str()) == Some(value.as_str())
            })
        })
        .map(|(index, _)| index)
        .collect()
}

fn issued_at_is_valid(iat: Option<i64>) -> bool {
    let now = chrono::Utc::now().timestamp();
    match iat {
        Some(iat) => iat <= now + 60,
        None => false,
    }
}

fn jwk_algorithm(jwk: &Jwk) -> Algorithm {
    jwk.common
        .key_algorithm
        .and_then(|ka| Algorithm::from_str(&ka.to_string()).ok())
        .unwrap_or(Algorithm::RS256)
}

async fn fetch_first_jwk(http: &reqwest::Client, jwks_uri: &str) -> Result<Jwk> {
    let jwks: JwkSet = retry_json_fetch(http, jwks_uri)
        .await
        .with_context(|| format!("Unable to fetch JWKS from [{jwks_uri}]"))?;
    jwks.keys
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("JWKS from [{jwks_uri}] has no keys."))
}

async fn retry_json_fetch<T: serde::de::DeserializeOwned>(
    http: &reqwest::Client,
    url: &str,
) -> Result<T> {
    tracing::info!("Fetching JSON from [{url}]");
    let mut last_error = anyhow!("no attempts made");

    for attempt in 1..=FETCH_TRIES {
        match http.get(url).send().await {
            Ok(response) if response.status().is_success() => match response.json::<T>().await {
                Ok(parsed) => return Ok(parsed),
                Err(e) => {
                    tracing::warn!("Attempt {attempt} failed: {e}");
                    last_error = e.into();
                }
            },
            Ok(response) => {
                tracing::warn!("Attempt {attempt} failed: HTTP {}", response.status());
                last_error = anyhow!("HTTP {}", response.status());
            }
            Err(e) => {
                tracing::warn!("Attempt {attempt} failed: {e}");
                last_error = e.into();
            }
        }

        if attempt < FETCH_TRIES {
            tokio::time::sleep(BACKOFF_DELAY).await;
        }
    }

    Err(last_error)
}
