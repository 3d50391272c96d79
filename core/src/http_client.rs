use std::sync::Arc;

use once_cell::sync::OnceCell;
use reqwest::redirect::Policy;
use tracing::{debug, info};

use crate::config::Settings;
use crate::constants::*;
use crate::errors::{ClientError, ConfigError, TransportError, TransportErrorKind};
use crate::http::{ClientConfig, Headers, HttpMethod, Response};

/// `"<ProductName>/<Version> (<Codename>)"`
pub fn default_user_agent() -> String {
    format!("{}/{} ({})", PRODUCT_NAME, PRODUCT_VERSION, PRODUCT_CODENAME)
}

/// Capability interface every transport backend implements.
///
/// Each verb is a required method, so a backend that compiles handles all of
/// them. Methods outside this set go through [`HttpClient::request`] and fail
/// with [`ClientError::Unimplemented`].
pub trait HttpClient: Send + Sync {
    fn head(&self, url: &str, headers: &Headers) -> Result<Response, ClientError>;

    fn get(&self, url: &str, headers: &Headers) -> Result<Response, ClientError>;

    fn post(&self, url: &str, headers: &Headers, body: &[u8]) -> Result<Response, ClientError>;

    fn put(&self, url: &str, headers: &Headers, body: &[u8]) -> Result<Response, ClientError>;

    fn delete(&self, url: &str, headers: &Headers) -> Result<Response, ClientError>;

    /// Name this backend is selected by in `[http] client`.
    fn backend_name(&self) -> &'static str;

    /// Sent on every request that does not carry its own `User-Agent`.
    fn user_agent(&self) -> String;

    /// Dispatch on a method value. Bodies are ignored for methods that do not carry one.
    fn request(
        &self,
        method: HttpMethod,
        url: &str,
        headers: &Headers,
        body: &[u8],
    ) -> Result<Response, ClientError> {
        match method {
            HttpMethod::HEAD => self.head(url, headers),
            HttpMethod::GET => self.get(url, headers),
            HttpMethod::POST => self.post(url, headers, body),
            HttpMethod::PUT => self.put(url, headers, body),
            HttpMethod::DELETE => self.delete(url, headers),
            HttpMethod::PATCH | HttpMethod::OPTIONS => Err(ClientError::Unimplemented {
                method: method.as_str().to_string(),
            }),
        }
    }
}

/// Backend selected by the `curl` name, served by reqwest's blocking client.
pub struct ReqwestBackend {
    client: reqwest::blocking::Client,
    config: ClientConfig,
    user_agent: String,
}

impl ReqwestBackend {
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let redirect = if config.follow_redirects {
            Policy::limited(MAX_REDIRECTS)
        } else {
            Policy::none()
        };

        #[allow(unused_mut)]
        let mut builder = reqwest::blocking::Client::builder()
            .redirect(redirect)
            .connect_timeout(config.connect_timeout())
            .timeout(config.request_timeout())
            .danger_accept_invalid_certs(!config.verify_tls_peer);

        #[cfg(feature = "native-tls")]
        {
            builder = builder.danger_accept_invalid_hostnames(!config.verify_tls_host);
        }

        let client = builder.build().map_err(TransportError::from)?;

        Ok(Self {
            client,
            config,
            user_agent: default_user_agent(),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn send(
        &self,
        method: HttpMethod,
        url: &str,
        headers: &Headers,
        body: Option<&[u8]>,
    ) -> Result<Response, ClientError> {
        let mut request_builder = self.client.request(reqwest::Method::from(method), url);

        // Caller-supplied User-Agent wins.
        if !headers.contains("user-agent") {
            request_builder =
                request_builder.header(reqwest::header::USER_AGENT, self.user_agent.as_str());
        }
        for (name, value) in headers.iter() {
            request_builder = request_builder.header(name, value);
        }
        if let Some(body) = body {
            request_builder = request_builder.body(body.to_vec());
        }

        let response = request_builder
            .send()
            .map_err(|e| TransportError::from(e).with_url(url))?;

        let status = response.status().as_u16();
        let response_headers = Headers::from(response.headers());
        let body = response.bytes().map_err(|e| {
            let mut err = TransportError::from(e).with_url(url);
            err.kind = TransportErrorKind::MalformedResponse;
            err
        })?;

        debug!(
            "{} {} -> {} ({} bytes)",
            method.as_str(),
            url,
            status,
            body.len()
        );

        Ok(Response::new(status, response_headers, body.to_vec()))
    }
}

impl HttpClient for ReqwestBackend {
    fn head(&self, url: &str, headers: &Headers) -> Result<Response, ClientError> {
        self.send(HttpMethod::HEAD, url, headers, None)
    }

    fn get(&self, url: &str, headers: &Headers) -> Result<Response, ClientError> {
        self.send(HttpMethod::GET, url, headers, None)
    }

    fn post(&self, url: &str, headers: &Headers, body: &[u8]) -> Result<Response, ClientError> {
        self.send(HttpMethod::POST, url, headers, Some(body))
    }

    fn put(&self, url: &str, headers: &Headers, body: &[u8]) -> Result<Response, ClientError> {
        self.send(HttpMethod::PUT, url, headers, Some(body))
    }

    fn delete(&self, url: &str, headers: &Headers) -> Result<Response, ClientError> {
        self.send(HttpMethod::DELETE, url, headers, None)
    }

    fn backend_name(&self) -> &'static str {
        CURL_BACKEND
    }

    fn user_agent(&self) -> String {
        self.user_agent.clone()
    }
}

/// Build the backend registered under `name`.
pub fn build_backend(name: &str, config: &ClientConfig) -> Result<Arc<dyn HttpClient>, ClientError> {
    match name {
        CURL_BACKEND => Ok(Arc::new(ReqwestBackend::new(config.clone())?)),
        other => Err(ConfigError::UnknownBackend(other.to_string()).into()),
    }
}

/// Selects and lazily builds the transport backend named in the settings.
///
/// Owned by the program's composition root and passed to whoever needs a
/// client. Every successful [`HttpClientFactory::start`] call returns the same
/// instance; a failed call caches nothing.
pub struct HttpClientFactory {
    settings: Settings,
    config: ClientConfig,
    client: OnceCell<Arc<dyn HttpClient>>,
}

impl HttpClientFactory {
    /// Transport options are read from the `[http]` section of `settings`.
    pub fn new(settings: Settings) -> Result<Self, ConfigError> {
        let config = ClientConfig::from_settings(&settings)?;
        Ok(Self::with_config(settings, config))
    }

    pub fn with_config(settings: Settings, config: ClientConfig) -> Self {
        Self {
            settings,
            config,
            client: OnceCell::new(),
        }
    }

    pub fn start(&self) -> Result<Arc<dyn HttpClient>, ClientError> {
        self.client
            .get_or_try_init(|| {
                let name = self.settings.http_backend();
                let client = build_backend(name, &self.config)?;
                info!("HTTP client backend '{}' started", name);
                Ok::<_, ClientError>(client)
            })
            .map(Arc::clone)
    }

    pub fn is_started(&self) -> bool {
        self.client.get().is_some()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct RecordingBackend;

    impl HttpClient for RecordingBackend {
        fn head(&self, url: &str, _headers: &Headers) -> Result<Response, ClientError> {
            Ok(Response::new(200, Headers::new().with("x-verb", "HEAD"), url.into()))
        }

        fn get(&self, url: &str, _headers: &Headers) -> Result<Response, ClientError> {
            Ok(Response::new(200, Headers::new().with("x-verb", "GET"), url.into()))
        }

        fn post(&self, _url: &str, _headers: &Headers, body: &[u8]) -> Result<Response, ClientError> {
            Ok(Response::new(201, Headers::new().with("x-verb", "POST"), body.to_vec()))
        }

        fn put(&self, _url: &str, _headers: &Headers, body: &[u8]) -> Result<Response, ClientError> {
            Ok(Response::new(200, Headers::new().with("x-verb", "PUT"), body.to_vec()))
        }

        fn delete(&self, _url: &str, _headers: &Headers) -> Result<Response, ClientError> {
            Ok(Response::new(204, Headers::new().with("x-verb", "DELETE"), Vec::new()))
        }

        fn backend_name(&self) -> &'static str {
            "recording"
        }

        fn user_agent(&self) -> String {
            default_user_agent()
        }
    }

    #[test]
    fn test_request_dispatches_to_verbs() {
        let backend = RecordingBackend;
        let headers = Headers::new();

        let response = backend
            .request(HttpMethod::POST, "http://x/", &headers, b"payload")
            .unwrap();
        assert_eq!(response.status(), 201);
        assert_eq!(response.header("X-Verb"), Some("POST"));
        assert_eq!(response.body(), b"payload");

        let response = backend
            .request(HttpMethod::DELETE, "http://x/", &headers, b"ignored")
            .unwrap();
        assert_eq!(response.header("x-verb"), Some("DELETE"));
    }

    #[test]
    fn test_request_rejects_methods_without_capability() {
        let backend = RecordingBackend;
        let err = backend
            .request(HttpMethod::PATCH, "http://x/", &Headers::new(), b"")
            .unwrap_err();
        assert!(matches!(err, ClientError::Unimplemented { ref method } if method == "PATCH"));
    }

    #[test]
    fn test_default_user_agent_format() {
        let ua = default_user_agent();
        assert_eq!(
            ua,
            format!("StatusNet/{} ({})", PRODUCT_VERSION, PRODUCT_CODENAME)
        );
        assert_eq!(RecordingBackend.user_agent(), ua);
    }

    #[test]
    fn test_build_backend_unknown_name() {
        let result = build_backend("fsockopen", &ClientConfig::default());
        assert!(matches!(
            result,
            Err(ClientError::Config(ConfigError::UnknownBackend(ref name))) if name == "fsockopen"
        ));
    }
}
