use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use clap::Parser;
use statusnet_bridge_tools::{request_token, streamtest};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Write `content` to a per-test file in the temp dir.
fn ini_file(name: &str, content: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!(
        "statusnet-bridge-{}-{}.ini",
        std::process::id(),
        name
    ));
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(content.as_bytes()).unwrap();
    path
}

fn request_token_output(ini: PathBuf) -> (i32, String) {
    let cli = request_token::Cli::parse_from([
        "getrequesttoken",
        "--ini",
        ini.to_str().unwrap(),
    ]);
    let mut out: Vec<u8> = Vec::new();
    let code = request_token::run(&cli, &mut out).unwrap();
    (code, String::from_utf8(out).unwrap())
}

#[test]
fn test_getrequesttoken_missing_consumer_secret() {
    let ini = ini_file(
        "missing-secret",
        "consumer_key = ck\napiroot = http://example.com/api\nrequest_token_url = /oauth/request_token\nauthorize_url = /oauth/authorize\n",
    );
    let (code, text) = request_token_output(ini);

    assert_eq!(code, 1);
    assert_eq!(
        text,
        "You forgot to specify a consumer_secret in your oauth.ini file.\n"
    );
}

#[test]
fn test_getrequesttoken_unreadable_ini_reports_first_key() {
    let (code, text) = request_token_output(PathBuf::from("/nonexistent/oauth.ini"));
    assert_eq!(code, 1);
    assert_eq!(
        text,
        "You forgot to specify a consumer_key in your oauth.ini file.\n"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_getrequesttoken_success() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/oauth/request_token"))
        .and(query_param("oauth_callback", "oob"))
        .and(query_param("oauth_consumer_key", "ck"))
        .and(query_param("oauth_signature_method", "HMAC-SHA1"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("oauth_token=rt-key&oauth_token_secret=rt-secret"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let apiroot = format!("{}/api", server.uri());
    let ini = ini_file(
        "success",
        &format!(
            "consumer_key = ck\nconsumer_secret = cs\napiroot = {apiroot}\nrequest_token_url = /oauth/request_token?oauth_callback=oob\nauthorize_url = /oauth/authorize\n"
        ),
    );

    let (code, text) = tokio::task::spawn_blocking(move || request_token_output(ini))
        .await
        .unwrap();

    assert_eq!(code, 0, "output: {text}");
    let expected = format!(
        "\nSuccess!\n\n\
         Request token        : rt-key\n\
         Request token secret : rt-secret\n\
         Authorize URL        : {apiroot}/oauth/authorize?oauth_token=rt-key\n\
         \nNow paste the Authorize URL into your browser and authorize the request token.\n"
    );
    assert_eq!(text, expected);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_getrequesttoken_rejected_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/oauth/request_token"))
        .respond_with(ResponseTemplate::new(401).set_body_string("Invalid consumer"))
        .mount(&server)
        .await;

    let ini = ini_file(
        "rejected",
        &format!(
            "consumer_key = ck\nconsumer_secret = cs\napiroot = {}\nrequest_token_url = /oauth/request_token\nauthorize_url = /oauth/authorize\n",
            server.uri()
        ),
    );

    let (code, text) = tokio::task::spawn_blocking(move || request_token_output(ini))
        .await
        .unwrap();

    assert_eq!(code, 1);
    assert_eq!(text, "Error: Invalid consumer\n");
}

fn streamtest_output(args: &[&str]) -> (i32, String) {
    let cli = streamtest::Cli::parse_from(args);
    let out = Arc::new(Mutex::new(Vec::<u8>::new()));
    let code = streamtest::run(&cli, out.clone()).unwrap();
    let text = String::from_utf8(out.lock().unwrap().clone()).unwrap();
    (code, text)
}

#[test]
fn test_streamtest_without_nick_prints_help() {
    let (code, text) = streamtest_output(&["streamtest"]);
    assert_eq!(code, 0);
    assert!(text.contains("--nick"), "help was: {text}");
}

#[test]
fn test_streamtest_unknown_user() {
    let config = ini_file(
        "streamtest-unknown",
        "[twitter]\nconsumer_key = ck\nconsumer_secret = cs\n",
    );
    let (code, text) = streamtest_output(&[
        "streamtest",
        "-n",
        "alice",
        "--config",
        config.to_str().unwrap(),
    ]);

    assert_eq!(code, 1);
    assert_eq!(text, "No Twitter config for this user.\n");
}

#[test]
fn test_streamtest_user_without_tokens() {
    let config = ini_file(
        "streamtest-no-tokens",
        "[twitter]\nconsumer_key = ck\nconsumer_secret = cs\n\n[user:alice]\ntoken_secret = ts\n",
    );
    let (code, text) = streamtest_output(&[
        "streamtest",
        "--nick",
        "alice",
        "--config",
        config.to_str().unwrap(),
    ]);

    assert_eq!(code, 1);
    assert_eq!(text, "No Twitter OAuth credentials for this user.\n");
}
