//! Cache key derivation.
//!
//! Keys have the shape `<prefix><path>[?<sorted query>][:auth:<digest>]`.
//! Requests that differ only in query parameter order, or only in excluded
//! parameters, map to the same key.

use axum::{
    extract::OriginalUri,
    http::{HeaderMap, Method, Request, header::AUTHORIZATION},
};
use sha2::{Digest, Sha256};
use url::form_urlencoded;

use super::config::CacheConfig;

/// Bytes of the credential digest kept in a key.
const CREDENTIAL_DIGEST_BYTES: usize = 16;

/// The parts of an inbound request the cache layer looks at.
#[derive(Debug, Clone, Default)]
pub struct RequestDescriptor {
    pub method: Method,
    /// Original request path, before any router nesting stripped a prefix.
    pub path: String,
    pub query: Vec<(String, String)>,
    /// Second token of the `Authorization` header, if any.
    pub credential: Option<String>,
    /// Matched route parameters (e.g. `id` for `/items/{id}`).
    pub params: Vec<(String, String)>,
}

impl RequestDescriptor {
    pub fn from_request<B>(request: &Request<B>) -> Self {
        let uri = request
            .extensions()
            .get::<OriginalUri>()
            .map(|original| &original.0)
            .unwrap_or_else(|| request.uri());

        Self {
            method: request.method().clone(),
            path: uri.path().to_string(),
            query: parse_query(uri.query()),
            credential: bearer_credential(request.headers()),
            params: Vec::new(),
        }
    }

    /// Describe a GET for `target`, which may carry a query string.
    pub fn from_target(target: &str) -> Self {
        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (target, None),
        };

        Self {
            method: Method::GET,
            path: path.to_string(),
            query: parse_query(query),
            ..Default::default()
        }
    }

    pub fn with_params<I, K, V>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.params = params
            .into_iter()
            .map(|(name, value)| (name.into(), value.into()))
            .collect();
        self
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

/// Derives cache keys from request descriptors. Pure; performs no I/O.
#[derive(Debug, Clone)]
pub struct KeyBuilder {
    prefix: String,
    excluded_params: Vec<String>,
    vary_on_credential: bool,
}

impl KeyBuilder {
    pub fn new(prefix: impl Into<String>, excluded_params: Vec<String>) -> Self {
        Self {
            prefix: prefix.into(),
            excluded_params,
            vary_on_credential: false,
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.prefix.clone(), config.excluded_params.clone())
    }

    pub fn with_excluded_params(mut self, excluded_params: Vec<String>) -> Self {
        self.excluded_params = excluded_params;
        self
    }

    /// Append a digest of the request credential so entries never leak
    /// across callers.
    pub fn vary_on_credential(mut self, vary: bool) -> Self {
        self.vary_on_credential = vary;
        self
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn build(&self, request: &RequestDescriptor) -> String {
        let mut key = format!("{}{}", self.prefix, request.path);

        let mut pairs: Vec<(&str, &str)> = request
            .query
            .iter()
            .filter(|(name, _)| !self.excluded_params.iter().any(|excluded| excluded == name))
            .map(|(name, value)| (name.as_str(), value.as_str()))
            .collect();

        if !pairs.is_empty() {
            pairs.sort();
            let mut serializer = form_urlencoded::Serializer::new(String::new());
            for (name, value) in pairs {
                serializer.append_pair(name, value);
            }
            key.push('?');
            key.push_str(&serializer.finish());
        }

        if self.vary_on_credential
            && let Some(credential) = request.credential.as_deref()
        {
            key.push_str(":auth:");
            key.push_str(&credential_digest(credential));
        }

        key
    }
}

fn parse_query(query: Option<&str>) -> Vec<(String, String)> {
    match query {
        Some(query) if !query.is_empty() => form_urlencoded::parse(query.as_bytes())
            .into_owned()
            .collect(),
        _ => Vec::new(),
    }
}

fn bearer_credential(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (_, credential) = value.trim().split_once(' ')?;
    let credential = credential.trim();
    (!credential.is_empty()).then(|| credential.to_string())
}

fn credential_digest(credential: &str) -> String {
    let digest = Sha256::digest(credential.as_bytes());
    hex::encode(&digest[..CREDENTIAL_DIGEST_BYTES])
}
