use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread;

use anyhow::{anyhow, Context};
use clap::{CommandFactory, Parser};
use statusnet_bridge_core::streaming::SocialEvent;
use statusnet_bridge_core::{
    Consumer, EventName, EventPayload, HandlerError, IoMaster, MasterConfig, ReconnectPolicy,
    Settings, ShutdownHandle, StreamManager, Token, TwitterStreamReader, USER_STREAM_URL,
};
use tracing::{info, warn};

pub const MASTER_ID: &str = "TwitterStream";
pub const TWITTER_SECTION: &str = "twitter";

#[derive(Parser, Debug)]
#[command(name = "streamtest")]
#[command(about = "Attempts a User Stream connection to Twitter as the given user, dumping data as it comes")]
#[command(version)]
pub struct Cli {
    #[arg(short = 'n', long = "nick")]
    pub nick: Option<String>,

    /// Bridge configuration with the consumer and per-user credentials.
    #[arg(long, default_value = "statusnet.ini")]
    pub config: PathBuf,

    #[arg(long, default_value = "info")]
    pub log_level: String,
}

fn user_section(nick: &str) -> String {
    format!("user:{nick}")
}

/// Build the reader for `nick` from the bridge configuration.
pub fn reader_for_user(settings: &Settings, nick: &str) -> anyhow::Result<TwitterStreamReader> {
    let section = user_section(nick);
    if !settings.has_section(&section) {
        return Err(anyhow!("No Twitter config for this user."));
    }
    let (Some(key), Some(secret)) = (
        settings.get_nonempty(&section, "token"),
        settings.get_nonempty(&section, "token_secret"),
    ) else {
        return Err(anyhow!("No Twitter OAuth credentials for this user."));
    };

    let consumer = Consumer::new(
        settings.require(TWITTER_SECTION, "consumer_key")?,
        settings.require(TWITTER_SECTION, "consumer_secret")?,
    );
    let url = settings
        .get_nonempty(TWITTER_SECTION, "stream_url")
        .unwrap_or(USER_STREAM_URL);

    TwitterStreamReader::new(consumer, Token::new(key, secret), url)
        .with_context(|| format!("Cannot open user stream {url}"))
}

fn screen_name(event: &SocialEvent) -> (&str, &str) {
    (&event.source.screen_name, &event.target.screen_name)
}

fn target_text(event: &SocialEvent) -> &str {
    event
        .target_object
        .as_ref()
        .map_or("", |status| status.text.as_str())
}

/// The line printed for a payload, or `None` for payloads that are not printed.
pub fn describe(payload: &EventPayload) -> Option<String> {
    let line = match payload {
        EventPayload::Friends(ids) => {
            let ids: Vec<String> = ids.iter().map(u64::to_string).collect();
            format!("Friend list: {}", ids.join(", "))
        }
        EventPayload::Favorite(event) => {
            let (source, target) = screen_name(event);
            format!("{source} favorited {target}'s notice: {}", target_text(event))
        }
        EventPayload::Unfavorite(event) => {
            let (source, target) = screen_name(event);
            format!("{source} unfavorited {target}'s notice: {}", target_text(event))
        }
        EventPayload::Follow(event) => {
            let (source, target) = screen_name(event);
            format!("{source} friended {target}")
        }
        EventPayload::Unfollow(event) => {
            let (source, target) = screen_name(event);
            format!("{source} unfriended {target}")
        }
        EventPayload::Delete(deletion) => {
            format!("Deleted status notification: {}", deletion.status.id)
        }
        EventPayload::ScrubGeo(scrub) => format!(
            "Req to scrub geo data for user id {} up to status ID {}",
            scrub.user_id, scrub.up_to_status_id
        ),
        EventPayload::Status(status) => format!(
            "Received status update from {}: {}",
            status.user.screen_name, status.text
        ),
        EventPayload::DirectMessage(message) => format!(
            "Direct message from {} to {}: {}",
            message.sender.screen_name, message.recipient.screen_name, message.text
        ),
        EventPayload::Raw(_) | EventPayload::Other { .. } => return None,
    };
    Some(line)
}

/// Hook the dumping handlers onto `reader`. Raw messages go to the log, the
/// rest is written to `out`.
pub fn register_printers<W>(reader: &mut TwitterStreamReader, out: Arc<Mutex<W>>)
where
    W: Write + Send + 'static,
{
    reader.on(EventName::RAW, |payload: &EventPayload| {
        if let EventPayload::Raw(message) = payload {
            info!("{}", message);
        }
        Ok(())
    });

    for name in [
        EventName::FRIENDS,
        EventName::FAVORITE,
        EventName::UNFAVORITE,
        EventName::FOLLOW,
        EventName::UNFOLLOW,
        EventName::DELETE,
        EventName::SCRUB_GEO,
        EventName::STATUS,
        EventName::DIRECT_MESSAGE,
    ] {
        let out = out.clone();
        reader.on(name, move |payload: &EventPayload| {
            let Some(line) = describe(payload) else {
                return Ok(());
            };
            let mut out = out
                .lock()
                .map_err(|_| HandlerError::new("output lock poisoned"))?;
            writeln!(out, "{line}")
                .and_then(|()| out.flush())
                .map_err(|e| HandlerError::new(e.to_string()))
        });
    }
}

/// Resolves once `signal` reports a delivery. A listener that fails to
/// install never resolves, so it cannot be mistaken for a shutdown request.
async fn signal_or_pending<F>(name: &str, signal: F)
where
    F: std::future::Future<Output = std::io::Result<()>>,
{
    if let Err(e) = signal.await {
        warn!("Cannot listen for {}: {}", name, e);
        std::future::pending::<()>().await;
    }
}

async fn wait_for_signal() {
    let ctrl_c = signal_or_pending("Ctrl+C", tokio::signal::ctrl_c());
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = terminate.recv() => {}
                }
            }
            Err(e) => {
                warn!("Cannot listen for SIGTERM: {}", e);
                ctrl_c.await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await;
    }
}

/// Shut the master down on Ctrl+C or SIGTERM.
fn spawn_signal_listener(handle: ShutdownHandle) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to create signal runtime")?;
    thread::Builder::new()
        .name("signals".to_string())
        .spawn(move || {
            runtime.block_on(async {
                wait_for_signal().await;
                info!("Shutdown signal received");
                handle.shutdown();
            })
        })
        .context("Failed to spawn signal listener")?;
    Ok(())
}

/// Returns the process exit code.
pub fn run<W: Write + Send + 'static>(cli: &Cli, out: Arc<Mutex<W>>) -> anyhow::Result<i32> {
    let Some(nick) = cli.nick.as_deref() else {
        let help = Cli::command().render_help();
        let mut out = out.lock().map_err(|_| anyhow!("output lock poisoned"))?;
        writeln!(out, "{help}")?;
        return Ok(0);
    };

    let settings = Settings::from_file(&cli.config)?.with_env_overrides();
    let mut reader = match reader_for_user(&settings, nick) {
        Ok(reader) => reader,
        Err(e) => {
            let mut out = out.lock().map_err(|_| anyhow!("output lock poisoned"))?;
            writeln!(out, "{e:#}")?;
            return Ok(1);
        }
    };
    register_printers(&mut reader, out);

    info!(user = nick, url = %reader.url(), "Opening user stream");
    let config = MasterConfig::default().with_reconnect(ReconnectPolicy::default());
    let mut master = IoMaster::new(MASTER_ID, config);
    master.instantiate(StreamManager::new(MASTER_ID, reader))?;
    spawn_signal_listener(master.shutdown_handle())?;
    master.init()?;
    master.service()?;
    info!("Stream test finished");
    Ok(0)
}
