use std::io::Write;
use std::path::PathBuf;

use clap::Parser;
use statusnet_bridge_core::config::ROOT_SECTION;
use statusnet_bridge_core::oauth::parse_token_response;
use statusnet_bridge_core::{
    ClientConfig, Consumer, Headers, HttpClient, HttpClientFactory, HttpMethod, OAuthRequest, Settings,
    CURL_BACKEND, HTTP_CLIENT_KEY, HTTP_SECTION,
};
use tracing::{debug, warn};

/// Keys `getrequesttoken` needs, checked in this order.
pub const REQUIRED_KEYS: [&str; 5] = [
    "consumer_key",
    "consumer_secret",
    "apiroot",
    "request_token_url",
    "authorize_url",
];

const REQUEST_TIMEOUT_MS: u64 = 120_000;

#[derive(Parser, Debug)]
#[command(name = "getrequesttoken")]
#[command(about = "Fetch an OAuth request token and print the URL to authorize it")]
#[command(version)]
pub struct Cli {
    /// Ini file holding the consumer credentials and endpoints.
    #[arg(long, default_value = "oauth.ini")]
    pub ini: PathBuf,

    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// Load the ini file and run the request. A file that cannot be read is
/// treated as empty, so the missing-key message names what to add.
pub fn run<W: Write>(cli: &Cli, out: &mut W) -> anyhow::Result<i32> {
    let settings = match Settings::from_file(&cli.ini) {
        Ok(settings) => settings,
        Err(e) => {
            warn!("{}", e);
            Settings::new()
        }
    };
    request_token(&settings, out)
}

/// Returns the process exit code.
pub fn request_token<W: Write>(ini: &Settings, out: &mut W) -> anyhow::Result<i32> {
    let mut values = Vec::with_capacity(REQUIRED_KEYS.len());
    for key in REQUIRED_KEYS {
        match ini.get_nonempty(ROOT_SECTION, key) {
            Some(value) => values.push(value),
            None => {
                writeln!(out, "You forgot to specify a {key} in your oauth.ini file.")?;
                return Ok(1);
            }
        }
    }
    let [consumer_key, consumer_secret, apiroot, request_token_url, authorize_url] = values[..]
    else {
        return Ok(1);
    };

    let consumer = Consumer::new(consumer_key, consumer_secret);
    let endpoint = format!("{apiroot}{request_token_url}");

    let request = OAuthRequest::new(&consumer, None, HttpMethod::GET, &endpoint, &[])
        .and_then(|mut request| {
            request.sign_hmac_sha1(&consumer, None)?;
            Ok(request)
        });
    let request = match request {
        Ok(request) => request,
        Err(e) => {
            writeln!(out, "{e}")?;
            return Ok(1);
        }
    };
    debug!("Signed request token URL: {}", request.to_url());

    let mut transport = Settings::new();
    transport.set(HTTP_SECTION, HTTP_CLIENT_KEY, CURL_BACKEND);
    let config = ClientConfig::default()
        .with_follow_redirects(true)
        .with_connect_timeout_ms(REQUEST_TIMEOUT_MS)
        .with_request_timeout_ms(REQUEST_TIMEOUT_MS)
        .with_tls_verification(false, false);
    let factory = HttpClientFactory::with_config(transport, config);

    let response = factory
        .start()
        .and_then(|client| client.get(&request.to_url(), &Headers::new()));
    let response = match response {
        Ok(response) => response,
        Err(e) => {
            writeln!(out, "{e}")?;
            writeln!(out, "{request:#?}")?;
            return Ok(1);
        }
    };

    let body = response.text();
    let token = match parse_token_response(&body) {
        Ok(token) => token,
        Err(e) => {
            debug!("{}", e);
            writeln!(out, "Error: {body}")?;
            return Ok(1);
        }
    };

    let authorize = format!("{apiroot}{authorize_url}?oauth_token={}", token.key);
    writeln!(out)?;
    writeln!(out, "Success!")?;
    writeln!(out)?;
    writeln!(out, "Request token        : {}", token.key)?;
    writeln!(out, "Request token secret : {}", token.secret)?;
    writeln!(out, "Authorize URL        : {authorize}")?;
    writeln!(out)?;
    writeln!(
        out,
        "Now paste the Authorize URL into your browser and authorize the request token."
    )?;
    Ok(0)
}
