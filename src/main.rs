use std::io::{self, Write};
use std::sync::Arc;
use std::time::Instant;

use dotenvy::dotenv;
use oxide_courier::auth::AuthStore;
use oxide_courier::bot::{get_user_id_safe, handle_command, BotState, Command};
use oxide_courier::config::{AccountTier, Settings, SHELL_CONFIRM_TTL};
use oxide_courier::media::{media_http_client, HttpFetcher, HttpResolver, MediaCache, MediaPipeline};
use oxide_courier::shell::PendingCommands;
use oxide_courier::worker::{WorkerRegistry, WorkerSupervisor};
use regex::Regex;
use teloxide::dispatching::UpdateHandler;
use teloxide::prelude::*;
use tracing::{error, info, warn};
use tracing_subscriber::{prelude::*, EnvFilter};

/// Patterns masked out of every log line
struct Redactor {
    rules: Vec<(Regex, &'static str)>,
}

impl Redactor {
    fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            rules: vec![
                (
                    Regex::new(r"(https?://[^/]+/(?:file/)?bot)[0-9]+:[A-Za-z0-9_-]+")?,
                    "$1[TELEGRAM_TOKEN]",
                ),
                (Regex::new(r"[0-9]{8,10}:[A-Za-z0-9_-]{35}")?, "[TELEGRAM_TOKEN]"),
                (Regex::new(r"TELEGRAM_TOKEN=[^\s&]+")?, "TELEGRAM_TOKEN=[MASKED]"),
            ],
        })
    }

    fn redact(&self, input: &str) -> String {
        self.rules
            .iter()
            .fold(input.to_string(), |acc, (re, replacement)| {
                re.replace_all(&acc, *replacement).into_owned()
            })
    }
}

struct RedactingWriter<W: Write> {
    inner: W,
    redactor: Arc<Redactor>,
}

impl<W: Write> Write for RedactingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let redacted = self.redactor.redact(&String::from_utf8_lossy(buf));
        self.inner.write_all(redacted.as_bytes())?;
        // Report the caller's length; the redacted text may differ in size.
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

struct RedactingMakeWriter {
    redactor: Arc<Redactor>,
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for RedactingMakeWriter {
    type Writer = RedactingWriter<io::Stderr>;

    fn make_writer(&'a self) -> Self::Writer {
        RedactingWriter {
            inner: io::stderr(),
            redactor: Arc::clone(&self.redactor),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    let redactor = Arc::new(Redactor::new().map_err(|e| {
        eprintln!("Failed to compile redaction patterns: {e}");
        e
    })?);
    init_logging(redactor);

    info!("Starting Oxide Courier...");

    let settings = init_settings();

    let mut bot = Bot::new(settings.telegram_token.clone());
    if let Some(url) = &settings.bot_api_url {
        bot = bot.set_api_url(reqwest::Url::parse(url)?);
        info!(api_url = %url, "Using custom Bot API server");
    }

    let tier = detect_tier(&bot, &settings).await;
    info!(?tier, limit = tier.max_file_size(), "Upload ceiling selected");

    let cache = MediaCache::new(settings.cache_dir.clone());
    cache.init().await?;
    let client = media_http_client()?;
    let pipeline = MediaPipeline::new(
        cache,
        Arc::new(HttpResolver::new(client.clone(), settings.media_api_base.clone())),
        Arc::new(HttpFetcher::new(client)),
        tier.max_file_size(),
    );

    tokio::fs::create_dir_all(&settings.workers_dir).await?;
    let registry = WorkerRegistry::load(settings.registry_file.clone()).await?;
    let supervisor = WorkerSupervisor::new(
        settings.workers_dir.clone(),
        settings.worker_interpreter.clone(),
        registry,
    );

    let auth = AuthStore::load(
        settings.auth_file.clone(),
        settings.sudo_user,
        settings.allowed_users(),
    )
    .await?;

    let state = Arc::new(BotState {
        settings: Arc::clone(&settings),
        auth,
        pipeline,
        supervisor,
        pending_shell: PendingCommands::new(SHELL_CONFIRM_TTL),
        started_at: Instant::now(),
    });

    info!("Bot is running...");

    Dispatcher::builder(bot, setup_handler())
        .dependencies(dptree::deps![Arc::clone(&state)])
        .default_handler(|_| async {})
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    let stopped = state.supervisor.shutdown().await;
    info!(stopped, "Bot stopped");
    Ok(())
}

fn init_logging(redactor: Arc<Redactor>) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(RedactingMakeWriter { redactor }))
        .init();
}

fn init_settings() -> Arc<Settings> {
    match Settings::new() {
        Ok(s) => {
            info!("Configuration loaded successfully.");
            Arc::new(s)
        }
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    }
}

async fn detect_tier(bot: &Bot, settings: &Settings) -> AccountTier {
    if let Some(tier) = settings.account_tier {
        return tier;
    }
    match bot.get_me().await {
        Ok(me) if me.is_premium => AccountTier::Premium,
        Ok(_) => AccountTier::Standard,
        Err(e) => {
            warn!(error = %e, "Could not detect account tier, assuming standard");
            AccountTier::Standard
        }
    }
}

fn setup_handler() -> UpdateHandler<teloxide::RequestError> {
    Update::filter_message()
        .filter_async(|msg: Message, state: Arc<BotState>| async move {
            state.auth.is_authorized(get_user_id_safe(&msg)).await
        })
        .filter_command::<Command>()
        .endpoint(command_endpoint)
}

async fn command_endpoint(
    bot: Bot,
    msg: Message,
    cmd: Command,
    state: Arc<BotState>,
) -> Result<(), teloxide::RequestError> {
    if let Err(e) = handle_command(bot, msg, cmd, state).await {
        error!("Command error: {}", e);
    }
    respond(())
}
