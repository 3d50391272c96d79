//! OAuth 1.0a request signing (HMAC-SHA1).
//!
//! Covers what the bridge needs: signing a consumer-only request for the
//! request-token bootstrap, and signing user-stream requests with an access
//! token.

use std::collections::{BTreeMap, HashMap};
use std::time::{SystemTime, UNIX_EPOCH};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use hmac::{Hmac, Mac};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use sha1::Sha1;
use url::Url;

use crate::errors::OAuthError;
use crate::http::HttpMethod;

/// Everything except the RFC 3986 unreserved set.
const OAUTH_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

const SIGNATURE_METHOD: &str = "HMAC-SHA1";
const OAUTH_VERSION: &str = "1.0";

pub fn percent_encode(s: &str) -> String {
    utf8_percent_encode(s, OAUTH_ENCODE_SET).to_string()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Consumer {
    pub key: String,
    pub secret: String,
}

impl Consumer {
    pub fn new(key: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            secret: secret.into(),
        }
    }
}

/// A request or access token with its secret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub key: String,
    pub secret: String,
}

impl Token {
    pub fn new(key: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            secret: secret.into(),
        }
    }
}

/// A request being prepared for signing.
///
/// Query parameters of the target URL are folded into the parameter set, so
/// [`OAuthRequest::to_url`] reproduces them alongside the `oauth_*` values.
#[derive(Debug, Clone)]
pub struct OAuthRequest {
    method: HttpMethod,
    normalized_url: String,
    params: BTreeMap<String, String>,
}

impl OAuthRequest {
    pub fn new(
        consumer: &Consumer,
        token: Option<&Token>,
        method: HttpMethod,
        url: &str,
        extra_params: &[(&str, &str)],
    ) -> Result<Self, OAuthError> {
        let parsed = Url::parse(url)?;
        let host = parsed
            .host_str()
            .ok_or_else(|| OAuthError::Signature(format!("URL has no host: {}", url)))?;
        let normalized_url = match parsed.port() {
            Some(port) => format!("{}://{}:{}{}", parsed.scheme(), host, port, parsed.path()),
            None => format!("{}://{}{}", parsed.scheme(), host, parsed.path()),
        };

        let mut params = BTreeMap::new();
        for (k, v) in parsed.query_pairs() {
            params.insert(k.into_owned(), v.into_owned());
        }
        for (k, v) in extra_params {
            params.insert((*k).to_string(), (*v).to_string());
        }

        params.insert("oauth_version".to_string(), OAUTH_VERSION.to_string());
        params.insert("oauth_nonce".to_string(), generate_nonce());
        params.insert("oauth_timestamp".to_string(), timestamp());
        params.insert("oauth_consumer_key".to_string(), consumer.key.clone());
        if let Some(token) = token {
            params.insert("oauth_token".to_string(), token.key.clone());
        }

        Ok(Self {
            method,
            normalized_url,
            params,
        })
    }

    /// Pin the nonce and timestamp, for reproducible signatures.
    pub fn with_nonce_and_timestamp(mut self, nonce: &str, timestamp: u64) -> Self {
        self.params
            .insert("oauth_nonce".to_string(), nonce.to_string());
        self.params
            .insert("oauth_timestamp".to_string(), timestamp.to_string());
        self
    }

    pub fn method(&self) -> HttpMethod {
        self.method
    }

    /// Scheme, host, non-default port and path. No query.
    pub fn normalized_url(&self) -> &str {
        &self.normalized_url
    }

    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(|v| v.as_str())
    }

    pub fn parameters(&self) -> &BTreeMap<String, String> {
        &self.params
    }

    fn normalized_parameters(&self) -> String {
        let mut pairs: Vec<(String, String)> = self
            .params
            .iter()
            .filter(|(k, _)| k.as_str() != "oauth_signature")
            .map(|(k, v)| (percent_encode(k), percent_encode(v)))
            .collect();
        pairs.sort();
        pairs
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&")
    }

    pub fn signature_base_string(&self) -> String {
        format!(
            "{}&{}&{}",
            self.method.as_str(),
            percent_encode(&self.normalized_url),
            percent_encode(&self.normalized_parameters())
        )
    }

    /// Compute and attach `oauth_signature`.
    pub fn sign_hmac_sha1(
        &mut self,
        consumer: &Consumer,
        token: Option<&Token>,
    ) -> Result<(), OAuthError> {
        self.params.insert(
            "oauth_signature_method".to_string(),
            SIGNATURE_METHOD.to_string(),
        );

        let signing_key = format!(
            "{}&{}",
            percent_encode(&consumer.secret),
            percent_encode(token.map_or("", |t| t.secret.as_str()))
        );

        let mut mac = Hmac::<Sha1>::new_from_slice(signing_key.as_bytes())
            .map_err(|e| OAuthError::Signature(e.to_string()))?;
        mac.update(self.signature_base_string().as_bytes());
        let signature = BASE64.encode(mac.finalize().into_bytes());

        self.params.insert("oauth_signature".to_string(), signature);
        Ok(())
    }

    /// All parameters, form-encoded in sorted order.
    pub fn to_postdata(&self) -> String {
        let mut pairs: Vec<(String, String)> = self
            .params
            .iter()
            .map(|(k, v)| (percent_encode(k), percent_encode(v)))
            .collect();
        pairs.sort();
        pairs
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&")
    }

    /// The request as a single GET-able URL.
    pub fn to_url(&self) -> String {
        format!("{}?{}", self.normalized_url, self.to_postdata())
    }

    /// Value for the `Authorization` header, carrying only `oauth_*` parameters.
    pub fn to_header(&self) -> String {
        let parts: Vec<String> = self
            .params
            .iter()
            .filter(|(k, _)| k.starts_with("oauth_"))
            .map(|(k, v)| format!("{}=\"{}\"", percent_encode(k), percent_encode(v)))
            .collect();
        format!("OAuth {}", parts.join(", "))
    }
}

/// Parse a form-encoded token response such as
/// `oauth_token=...&oauth_token_secret=...`.
pub fn parse_token_response(body: &str) -> Result<Token, OAuthError> {
    let params: HashMap<String, String> = serde_urlencoded::from_str(body.trim())
        .map_err(|e| OAuthError::InvalidTokenResponse(e.to_string()))?;

    let key = params
        .get("oauth_token")
        .filter(|token| !token.is_empty())
        .ok_or_else(|| OAuthError::InvalidTokenResponse("missing oauth_token".to_string()))?;

    Ok(Token::new(
        key.clone(),
        params
            .get("oauth_token_secret")
            .cloned()
            .unwrap_or_default(),
    ))
}

fn generate_nonce() -> String {
    let bytes: [u8; 16] = rand::random();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn timestamp() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn documented_request() -> (Consumer, Token, OAuthRequest) {
        let consumer = Consumer::new(
            "xvz1evFS4wEEPTGEFPHBog",
            "kAcSOqF21Fu85e7zjz7ZN2U4ZRhfV3WpwPAoE3Z7kBw",
        );
        let token = Token::new(
            "370773112-GmHxMAgYyLbNEtIKZeRNFsMKPR9EyMZeS9weJAEb",
            "LswwdoUaIvS8ltyTt5jkRh4J50vUPVVHtR2YPi5kE",
        );
        let request = OAuthRequest::new(
            &consumer,
            Some(&token),
            HttpMethod::POST,
            "https://api.twitter.com/1/statuses/update.json?include_entities=true",
            &[("status", "Hello Ladies + Gentlemen, a signed OAuth request!")],
        )
        .unwrap()
        .with_nonce_and_timestamp("kYjzVBB8Y0ZFabxSWbWovY3uYSQ2pTgmZeNu2VS4cg", 1318622958);
        (consumer, token, request)
    }

    #[test]
    fn test_percent_encode() {
        assert_eq!(percent_encode("hello world"), "hello%20world");
        assert_eq!(percent_encode("foo=bar&baz"), "foo%3Dbar%26baz");
        assert_eq!(percent_encode("test-value_123.txt~"), "test-value_123.txt~");
        assert_eq!(percent_encode("☃"), "%E2%98%83");
    }

    #[test]
    fn test_documented_signature() {
        let (consumer, token, mut request) = documented_request();
        request.sign_hmac_sha1(&consumer, Some(&token)).unwrap();

        assert_eq!(
            request.signature_base_string(),
            "POST&https%3A%2F%2Fapi.twitter.com%2F1%2Fstatuses%2Fupdate.json&include_entities%3Dtrue%26oauth_consumer_key%3Dxvz1evFS4wEEPTGEFPHBog%26oauth_nonce%3DkYjzVBB8Y0ZFabxSWbWovY3uYSQ2pTgmZeNu2VS4cg%26oauth_signature_method%3DHMAC-SHA1%26oauth_timestamp%3D1318622958%26oauth_token%3D370773112-GmHxMAgYyLbNEtIKZeRNFsMKPR9EyMZeS9weJAEb%26oauth_version%3D1.0%26status%3DHello%2520Ladies%2520%252B%2520Gentlemen%252C%2520a%2520signed%2520OAuth%2520request%2521"
        );
        assert_eq!(
            request.parameter("oauth_signature"),
            Some("tnnArxj06cWHq44gCs1OSKk/jLY=")
        );
    }

    #[test]
    fn test_header_only_carries_oauth_params() {
        let (consumer, token, mut request) = documented_request();
        request.sign_hmac_sha1(&consumer, Some(&token)).unwrap();
        let header = request.to_header();

        assert!(header.starts_with("OAuth "));
        assert!(header.contains("oauth_signature=\"tnnArxj06cWHq44gCs1OSKk%2FjLY%3D\""));
        assert!(!header.contains("status="));
        assert!(!header.contains("include_entities"));
    }

    #[test]
    fn test_consumer_only_url_keeps_query() {
        let consumer = Consumer::new("key", "secret");
        let mut request = OAuthRequest::new(
            &consumer,
            None,
            HttpMethod::GET,
            "http://example.net:8080/api/oauth/request_token?oauth_callback=oob",
            &[],
        )
        .unwrap();
        request.sign_hmac_sha1(&consumer, None).unwrap();

        assert_eq!(
            request.normalized_url(),
            "http://example.net:8080/api/oauth/request_token"
        );
        assert_eq!(request.parameter("oauth_token"), None);
        let url = request.to_url();
        assert!(url.starts_with("http://example.net:8080/api/oauth/request_token?"));
        assert!(url.contains("oauth_callback=oob"));
        assert!(url.contains("oauth_signature="));
    }

    #[test]
    fn test_default_port_dropped_from_normalized_url() {
        let consumer = Consumer::new("key", "secret");
        let request = OAuthRequest::new(
            &consumer,
            None,
            HttpMethod::GET,
            "HTTPS://Example.COM:443/r",
            &[],
        )
        .unwrap();
        assert_eq!(request.normalized_url(), "https://example.com/r");
    }

    #[test]
    fn test_nonces_differ() {
        let consumer = Consumer::new("key", "secret");
        let a = OAuthRequest::new(&consumer, None, HttpMethod::GET, "http://x.org/", &[]).unwrap();
        let b = OAuthRequest::new(&consumer, None, HttpMethod::GET, "http://x.org/", &[]).unwrap();
        assert_ne!(a.parameter("oauth_nonce"), b.parameter("oauth_nonce"));
        assert_eq!(a.parameter("oauth_nonce").map(str::len), Some(32));
    }

    #[test]
    fn test_parse_token_response() {
        let token =
            parse_token_response("oauth_token=abc&oauth_token_secret=s3cr%2Bt&oauth_callback_confirmed=true")
                .unwrap();
        assert_eq!(token, Token::new("abc", "s3cr+t"));

        assert!(matches!(
            parse_token_response("Invalid consumer key"),
            Err(OAuthError::InvalidTokenResponse(_))
        ));
        assert!(parse_token_response("").is_err());
    }
}
