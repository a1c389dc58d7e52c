//! Discord host: maps gateway events to turns and replies in the originating channel.

use std::error::Error as StdError;
use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, error, info};
use poise::{
    Framework, FrameworkOptions,
    serenity_prelude::{
        ChannelId, ClientBuilder, Context, CreateMessage, FullEvent, GatewayIntents,
        Message as SerenityMessage, MessageId, Reaction, UserId,
    },
};
use strum::Display;

use crate::config::Config;
use crate::dispatcher::{ReplyChannel, TurnDispatcher};
use crate::error::Result;
use crate::qna::QnaMakerClient;
use crate::telemetry::{AppInsightsSink, LogSink, TelemetrySink};
use crate::types::InboundMessage;

type EventResult = std::result::Result<(), Box<dyn StdError + Send + Sync>>;

pub struct Data {
    dispatcher: TurnDispatcher,
    announce_events: bool,
}

/// Gateway events forwarded as non-message turns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
enum GatewayEvent {
    ReactionAdd,
    ReactionRemove,
}

/// A turn extracted from a gateway event, with where to answer it.
#[derive(Debug, Clone, PartialEq, Eq)]
struct DiscordTurn {
    message: InboundMessage,
    channel_id: ChannelId,
    reply_to: Option<MessageId>,
}

struct DiscordReply<'a> {
    ctx: &'a Context,
    channel_id: ChannelId,
    reply_to: Option<MessageId>,
}

#[async_trait]
impl ReplyChannel for DiscordReply<'_> {
    async fn send_reply(&self, text: &str) -> Result<()> {
        let mut message = CreateMessage::new().content(text);
        if let Some(message_id) = self.reply_to {
            message = message.reference_message((self.channel_id, message_id));
        }

        self.channel_id
            .send_message(&self.ctx.http, message)
            .await?;

        info!("Replied in channel {}: {}", self.channel_id, text);
        Ok(())
    }
}

/// Run the Discord bot.
pub async fn run() -> Result<()> {
    info!("Initializing bot");
    let config = Config::from_env()?;

    debug!("Building HTTP client");
    let http_client = reqwest::Client::builder()
        .timeout(config.qna.timeout)
        .build()?;

    debug!("Initializing QnA client");
    let answers = QnaMakerClient::new(http_client.clone(), &config.qna)?;

    let telemetry: Arc<dyn TelemetrySink> = match &config.telemetry.instrumentation_key {
        Some(key) => {
            debug!("Initializing Application Insights telemetry");
            Arc::new(AppInsightsSink::new(
                http_client,
                &config.telemetry.endpoint,
                key.clone(),
            )?)
        }
        None => {
            info!("No instrumentation key configured, telemetry goes to the log");
            Arc::new(LogSink)
        }
    };

    let dispatcher = TurnDispatcher::new(Arc::new(answers), telemetry);
    let announce_events = config.announce_events;

    debug!("Setting up gateway intents");
    let intents = GatewayIntents::non_privileged() | GatewayIntents::MESSAGE_CONTENT;

    debug!("Building framework");
    let framework = Framework::builder()
        .options(FrameworkOptions {
            event_handler: |ctx, event, _framework, data| Box::pin(event_handler(ctx, event, data)),
            ..Default::default()
        })
        .setup(move |_ctx, _ready, _framework| {
            Box::pin(async move {
                info!("Bot is ready and connected to Discord");
                Ok(Data {
                    dispatcher,
                    announce_events,
                })
            })
        })
        .build();

    debug!("Creating Discord client");
    let mut client = ClientBuilder::new(config.discord_token, intents)
        .framework(framework)
        .await?;

    info!("Starting Discord client");

    tokio::select! {
        result = client.start() => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received, shutting down...");
        }
    }

    Ok(())
}

async fn event_handler(ctx: &Context, event: &FullEvent, data: &Data) -> EventResult {
    let bot_user_id = ctx.cache.current_user().id;
    let Some(turn) = turn_from_event(event, bot_user_id, data.announce_events) else {
        return Ok(());
    };

    info!(
        "Handling {} turn in channel {}",
        turn.message.kind, turn.channel_id
    );

    if let Err(e) = turn.channel_id.broadcast_typing(&ctx.http).await {
        debug!("Failed to broadcast typing indicator: {e}");
    }

    let reply = DiscordReply {
        ctx,
        channel_id: turn.channel_id,
        reply_to: turn.reply_to,
    };

    if let Err(e) = data.dispatcher.handle_turn(&turn.message, &reply).await {
        error!("Error handling turn in channel {}: {}", turn.channel_id, e);
        reply.send_reply(&e.user_message()).await?;
    }

    Ok(())
}

fn turn_from_event(event: &FullEvent, bot_user_id: UserId, announce_events: bool) -> Option<DiscordTurn> {
    match event {
        FullEvent::Message { new_message } => message_turn(new_message, bot_user_id),
        FullEvent::ReactionAdd { add_reaction } if announce_events => {
            reaction_turn(add_reaction, bot_user_id, GatewayEvent::ReactionAdd)
        }
        FullEvent::ReactionRemove { removed_reaction } if announce_events => {
            reaction_turn(removed_reaction, bot_user_id, GatewayEvent::ReactionRemove)
        }
        _ => None,
    }
}

/// Messages become turns when they come from a person and address the bot (mention or DM).
fn message_turn(message: &SerenityMessage, bot_user_id: UserId) -> Option<DiscordTurn> {
    if message.author.bot {
        return None;
    }

    let is_direct = message.guild_id.is_none();
    if !is_direct && !message.mentions_user_id(bot_user_id) {
        return None;
    }

    debug!(
        "Received message from {} in channel {}: {}",
        message.author.tag(),
        message.channel_id,
        message.content
    );

    Some(DiscordTurn {
        message: InboundMessage::message(strip_mention(&message.content, bot_user_id)),
        channel_id: message.channel_id,
        reply_to: Some(message.id),
    })
}

fn reaction_turn(reaction: &Reaction, bot_user_id: UserId, kind: GatewayEvent) -> Option<DiscordTurn> {
    event_turn(
        reaction.user_id,
        bot_user_id,
        kind,
        reaction.channel_id,
        reaction.message_id,
    )
}

fn event_turn(
    actor: Option<UserId>,
    bot_user_id: UserId,
    kind: GatewayEvent,
    channel_id: ChannelId,
    message_id: MessageId,
) -> Option<DiscordTurn> {
    if actor == Some(bot_user_id) {
        return None;
    }

    Some(DiscordTurn {
        message: InboundMessage::event(kind.to_string()),
        channel_id,
        reply_to: Some(message_id),
    })
}

/// Removes the bot's mention tokens (`<@id>` and `<@!id>`) from message text.
fn strip_mention(content: &str, bot_user_id: UserId) -> String {
    content
        .replace(&format!("<@{bot_user_id}>"), "")
        .replace(&format!("<@!{bot_user_id}>"), "")
        .trim()
        .to_string()
}
