use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Local, Utc};
use clap::{Args, Parser, Subcommand};
use nostr::Event;
use nostr_client::{ClientError, EventHandler, HandlerResult, MessageContent};
use serde_json::json;
use tracing::{error, info, warn};

use crate::config::MessagingConfig;
use crate::identity::SenderIdentity;
use crate::message::{DEFAULT_SUBJECT, Payload, subject_of};
use crate::publish::MessagePublisher;
use crate::subscribe::{SubscribeOptions, subscribe_messages};

#[derive(Parser, Debug)]
#[command(name = "dephy-messaging")]
#[command(about = "Publish and subscribe to DePHY messages")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Sign and publish one message to the configured recipient
    Publish(PublishArgs),
    /// Print messages addressed to a recipient until interrupted
    Subscribe(SubscribeArgs),
    /// Subscribe, publish two messages and disconnect
    Demo(DemoArgs),
}

#[derive(Args, Debug)]
pub struct PublishArgs {
    /// Message body; JSON is sent as structured content. Defaults to a test message
    pub content: Option<String>,
    #[arg(long, short = 's', default_value = DEFAULT_SUBJECT)]
    pub subject: String,
    /// Send the content verbatim even if it parses as JSON
    #[arg(long)]
    pub raw: bool,
}

#[derive(Args, Debug)]
pub struct SubscribeArgs {
    /// Only receive messages with this subject
    #[arg(long, short = 's')]
    pub subject: Option<String>,
    /// Unix timestamp to start from; defaults to now
    #[arg(long)]
    pub since: Option<u64>,
    /// Recipient public key (hex or npub); defaults to RECIPIENT_PUBLIC_KEY
    #[arg(long)]
    pub recipient: Option<String>,
}

#[derive(Args, Debug)]
pub struct DemoArgs {
    /// Seconds to wait for delivery after each publish
    #[arg(long, default_value_t = 5)]
    pub wait_secs: u64,
    /// Subject of the published messages
    #[arg(long, short = 's', default_value = DEFAULT_SUBJECT)]
    pub subject: String,
}

pub async fn run(cli: Cli) -> Result<()> {
    let config = MessagingConfig::from_env().context("failed to load configuration")?;
    match cli.command {
        Command::Publish(args) => publish(&config, args).await,
        Command::Subscribe(args) => subscribe(&config, args).await,
        Command::Demo(args) => demo(&config, args).await,
    }
}

async fn publish(config: &MessagingConfig, args: PublishArgs) -> Result<()> {
    let identity = Arc::new(SenderIdentity::from_config(config)?);
    let publisher = MessagePublisher::new(config, identity)?;
    let payload = match args.content {
        Some(content) if args.raw => Payload::RawText(content),
        Some(content) => Payload::detect(&content),
        None => Payload::Structured(json!({
            "type": "test",
            "message": "Hello DePHY Messaging Layer!",
            "timestamp": Utc::now().to_rfc3339(),
        })),
    };

    let published = publisher
        .publish(payload, &args.subject)
        .await
        .context("failed to publish message")?;
    info!(id = %published.event.id, "published");
    Ok(())
}

async fn subscribe(config: &MessagingConfig, args: SubscribeArgs) -> Result<()> {
    let options = SubscribeOptions {
        recipient: args.recipient,
        since: args.since,
        subject: args.subject,
    };
    let subscription = subscribe_messages(config, Arc::new(ConsoleHandler), options)
        .await
        .context("failed to subscribe")?;
    info!("listening for messages; press Ctrl-C to stop");

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for Ctrl-C")?;
            info!("disconnecting");
            subscription.close().await?;
            Ok(())
        }
        () = subscription.closed() => {
            bail!("relay ended the subscription")
        }
    }
}

async fn demo(config: &MessagingConfig, args: DemoArgs) -> Result<()> {
    let identity = Arc::new(SenderIdentity::from_config(config)?);
    let recipient = config.recipient()?.to_string();
    info!(
        sender = %identity.public_key_hex(),
        recipient = %recipient,
        relay = %config.relay_url,
        "DePHY messaging demo"
    );

    info!("[1] starting subscription");
    let subscription =
        subscribe_messages(config, Arc::new(ConsoleHandler), SubscribeOptions::default())
            .await
            .context("failed to subscribe")?;

    let publisher = MessagePublisher::new(config, Arc::clone(&identity))?;
    let wait = Duration::from_secs(args.wait_secs);

    info!("[2] publishing greeting");
    let greeting = json!({
        "type": "greeting",
        "text": "Hello, DePHY messaging layer!",
        "timestamp": Utc::now().to_rfc3339(),
        "from": identity.public_key_hex(),
    });
    match publisher.publish(greeting, &args.subject).await {
        Ok(published) => {
            info!(id = %published.event.id, "greeting published");

            info!("[3] waiting for delivery");
            tokio::time::sleep(wait).await;

            info!("[4] publishing update");
            let update = json!({
                "type": "update",
                "text": "This is an update message",
                "timestamp": Utc::now().to_rfc3339(),
                "counter": 42,
            });
            if let Err(err) = publisher.publish(update, &args.subject).await {
                warn!("update was not published: {err}");
            }

            info!("[5] waiting for delivery");
            tokio::time::sleep(wait).await;
        }
        Err(err) => error!("greeting was not published: {err}"),
    }

    info!("[6] disconnecting");
    subscription.close().await?;
    info!("demo finished");
    Ok(())
}

/// Logs every received message.
struct ConsoleHandler;

impl EventHandler for ConsoleHandler {
    fn on_event(&self, event: &Event, content: &MessageContent) -> HandlerResult {
        let received_at = i64::try_from(event.created_at)
            .ok()
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .map(|time| time.with_timezone(&Local).to_string())
            .unwrap_or_else(|| event.created_at.to_string());
        info!(
            sender = %event.pubkey,
            time = %received_at,
            subject = subject_of(event).unwrap_or(DEFAULT_SUBJECT),
            "new message:\n{content}"
        );
        Ok(())
    }

    fn on_eose(&self) {
        info!("stored messages delivered; waiting for new ones");
    }

    fn on_error(&self, error: &ClientError) {
        warn!("subscription error: {error}");
    }
}
