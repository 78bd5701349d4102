pub mod commands;
pub mod config;
pub mod error;
pub mod state;

use std::sync::Arc;

use poise::serenity_prelude::{FullEvent, GatewayIntents};
use serenity::builder::CreateMessage;
use serenity::client::{Client, Context};
use serenity::http::Http;
use serenity::model::channel::Reaction;
use tracing::{debug, error, info, warn};

use crate::commands::giveaway::collaborators::{Collaborators, SystemClock};
use crate::commands::giveaway::discord::{reaction_type, DiscordGateway};
use crate::commands::giveaway::eligibility::Eligibility;
use crate::commands::giveaway::formatters::DefaultGiveawayFormatter;
use crate::commands::giveaway::manager::GiveawayManager;
use crate::commands::giveaway::metrics::ApiMetrics;
use crate::commands::giveaway::models::GiveawayKey;
use crate::commands::giveaway::profile::ProfileBook;
use crate::commands::giveaway::settings::SettingsBook;
use crate::commands::giveaway::storage::JsonFileStore;
use crate::commands::giveaway::strategies::WeightedTicketStrategy;
use crate::commands::{giveaway, gprofile, gset, UserData};
use crate::config::Config;
use crate::error::{Error, Result};

async fn on_error(error: poise::FrameworkError<'_, UserData, Error>) {
    match error {
        poise::FrameworkError::CommandCheckFailed {
            error: Some(error),
            ctx,
            ..
        } => {
            let reply = poise::CreateReply::default()
                .content(error.to_string())
                .ephemeral(true);
            if let Err(err) = ctx.send(reply).await {
                error!("Can't report the failed check: {}", err.to_string());
            }
        }
        poise::FrameworkError::Command { error, ctx, .. } => {
            warn!(
                "Command '{}' failed: {}",
                ctx.command().qualified_name,
                error.to_string()
            );
            let reply = poise::CreateReply::default()
                .content(error.to_string())
                .ephemeral(true);
            if let Err(err) = ctx.send(reply).await {
                error!("Can't report the command error: {}", err.to_string());
            }
        }
        other => {
            if let Err(err) = poise::builtins::on_error(other).await {
                error!("Error while handling error: {}", err.to_string());
            }
        }
    }
}

async fn event_handler(ctx: &Context, event: &FullEvent, data: &UserData) -> Result<()> {
    match event {
        FullEvent::Ready { data_about_bot } => {
            info!("{} is connected!", data_about_bot.user.name);
        }
        FullEvent::ReactionAdd { add_reaction } => {
            on_reaction_add(ctx, add_reaction, data).await?;
        }
        _ => {}
    }
    Ok(())
}

// Takes back the entry of users who don't meet the giveaway requirements.
async fn on_reaction_add(ctx: &Context, reaction: &Reaction, data: &UserData) -> Result<()> {
    let (Some(guild_id), Some(user_id)) = (reaction.guild_id, reaction.user_id) else {
        return Ok(());
    };
    if user_id == ctx.cache.current_user().id {
        return Ok(());
    }

    let settings = data.settings.settings(guild_id);
    if reaction.emoji != reaction_type(&settings.emoji) {
        return Ok(());
    }

    let key = GiveawayKey::new(guild_id, reaction.message_id);
    let reason = match data.manager.check_entry(&key, user_id).await {
        Ok(Eligibility::Eligible) => return Ok(()),
        Ok(Eligibility::Ineligible(reason)) => reason,
        Err(Error::NotFound) | Err(Error::NotActive) => return Ok(()),
        Err(err) => return Err(err),
    };

    info!("User {} can't enter giveaway {}: {:?}", user_id.get(), key, reason);
    reaction.delete(ctx).await?;
    if !reason.is_silent() {
        let message = CreateMessage::new().content(reason.to_string());
        if let Err(err) = user_id.direct_message(ctx, message).await {
            debug!("Can't send a message to user {}: {}", user_id.get(), err.to_string());
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let config = Config::from_env().expect("Cannot read the bot configuration");
    let store = JsonFileStore::open(&config.store_path)
        .await
        .expect("Cannot open the giveaway storage");
    let metrics = ApiMetrics::open(config.amari_token.clone(), &config.ledger_path)
        .await
        .expect("Cannot open the metrics ledger");
    let settings = SettingsBook::open(&config.settings_path)
        .await
        .expect("Cannot open the giveaway settings");
    let profiles = ProfileBook::open(&config.profiles_path)
        .await
        .expect("Cannot open the member profiles");
    let (metrics, settings, profiles) = (Arc::new(metrics), Arc::new(settings), Arc::new(profiles));

    let http = Arc::new(Http::new(&config.discord_token));
    let gateway = Arc::new(DiscordGateway::new(
        http,
        settings.clone(),
        Arc::new(DefaultGiveawayFormatter::new()),
    ));
    let collaborators = Collaborators {
        display: gateway.clone(),
        entrants: gateway.clone(),
        members: gateway.clone(),
        metrics: metrics.clone(),
        notifier: gateway,
        settings: settings.clone(),
        clock: Arc::new(SystemClock),
    };
    let manager = GiveawayManager::new(
        Arc::new(store),
        collaborators,
        Arc::new(WeightedTicketStrategy::new()),
    );

    let user_data = UserData {
        manager: manager.clone(),
        settings,
        profiles,
        metrics,
    };
    let framework = poise::Framework::<UserData, Error>::builder()
        .options(poise::FrameworkOptions {
            commands: vec![giveaway(), gset(), gprofile()],
            on_error: |error| Box::pin(on_error(error)),
            pre_command: |ctx| {
                Box::pin(async move {
                    info!(
                        "Got command '{}' by user '{}'",
                        ctx.command().qualified_name,
                        ctx.author().name
                    );
                })
            },
            event_handler: |ctx, event, _framework, data| {
                Box::pin(event_handler(ctx, event, data))
            },
            ..Default::default()
        })
        .setup(|ctx, _ready, framework| {
            Box::pin(async move {
                poise::builtins::register_globally(ctx, &framework.options().commands).await?;
                let recovered = user_data.manager.recover().await?;
                info!("Resumed {} giveaway(s)", recovered);
                Ok(user_data)
            })
        })
        .build();

    let intents = GatewayIntents::non_privileged();
    let mut client = Client::builder(&config.discord_token, intents)
        .framework(framework)
        .await
        .expect("Cannot create a Discord client");

    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("Can't listen for the shutdown signal: {}", err.to_string());
        }
        shard_manager.shutdown_all().await;
    });

    if let Err(why) = client.start().await {
        error!("Client error: {:?}", why);
    }
    manager.shutdown().await;
}
