use serenity::builder::{CreateAllowedMentions, CreateMessage};
use serenity::model::guild::Role;
use serenity::model::id::{GuildId, MessageId, UserId};
use serenity::model::user::User;
use tracing::{info, warn};

use crate::commands::context::Context;
use crate::commands::giveaway::formatters::display_time;
use crate::commands::giveaway::models::{
    GiveawayKey, GuildSettings, MetricKind, NewGiveaway, RequirementSet,
};
use crate::commands::giveaway::settings::Template;
use crate::commands::giveaway::util::{parse_duration, parse_message_reference};
use crate::error::{Error, Result};

// Keeps the listings under the Discord message size limit.
const MAX_LISTED_GIVEAWAYS: usize = 20;

fn guild_of(ctx: &Context<'_>) -> Result<GuildId> {
    ctx.guild_id()
        .ok_or_else(|| Error::Giveaway("This command only works in a server.".to_string()))
}

// Resolves a message id or link into the giveaway key of the current guild.
fn giveaway_key(ctx: &Context<'_>, message: &str) -> Result<GiveawayKey> {
    let guild_id = guild_of(ctx)?;
    let reference = parse_message_reference(message)?;
    if let Some(linked_guild) = reference.guild_id {
        if linked_guild != guild_id {
            let message = "That giveaway belongs to another server.".to_string();
            return Err(Error::Giveaway(message));
        }
    }
    Ok(GiveawayKey::new(guild_id, reference.message_id))
}

// Members with Manage Server, a giveaway manager role, or bot owners.
async fn is_manager(ctx: Context<'_>) -> Result<bool> {
    let guild_id = guild_of(&ctx)?;
    let member = ctx
        .author_member()
        .await
        .ok_or_else(|| Error::Giveaway("Can't read your server roles.".to_string()))?;
    let manage_guild = member
        .permissions
        .map(|permissions| permissions.manage_guild())
        .unwrap_or(false)
        || ctx.framework().options().owners.contains(&ctx.author().id);

    let settings = ctx.data().settings.settings(guild_id);
    match settings.is_manager(manage_guild, &member.roles) {
        true => Ok(true),
        false => Err(Error::Giveaway(
            "You need the Manage Server permission or a giveaway manager role.".to_string(),
        )),
    }
}

// Posts the ping role mention with the text. Returns false when there was
// nothing to post.
async fn send_ping(ctx: Context<'_>, settings: &GuildSettings, text: Option<&str>) -> Result<bool> {
    let Some(content) = settings.ping_message(text) else {
        return Ok(false);
    };

    let mentions = CreateAllowedMentions::new().roles(settings.ping_role);
    let message = CreateMessage::new()
        .content(content)
        .allowed_mentions(mentions);
    ctx.channel_id().send_message(ctx.http(), message).await?;
    Ok(true)
}

async fn reply(ctx: Context<'_>, text: impl Into<String>) -> Result<()> {
    let reply = poise::CreateReply::default()
        .content(text)
        .ephemeral(true);
    ctx.send(reply).await?;
    Ok(())
}

/// Giveaway management
#[poise::command(
    slash_command,
    guild_only,
    subcommands("start", "end", "cancel", "reroll", "ping", "list", "clearended", "running"),
    subcommand_required
)]
pub async fn giveaway(_: Context<'_>) -> Result<()> {
    Ok(())
}

/// Start a new giveaway in this channel
#[poise::command(slash_command, guild_only, check = "is_manager")]
pub async fn start(
    ctx: Context<'_>,
    #[description = "How long it runs, e.g. 1d12h or 90s"] time: String,
    #[description = "Number of winners"] winners: u32,
    #[description = "What is given away"] title: String,
    #[description = "Who donated the prize"] donor: Option<User>,
    #[description = "Role required to enter"] required_role: Option<Role>,
    #[description = "Minimum MEE6 level"] mee6_level: Option<u64>,
    #[description = "Minimum Amari level"] amari_level: Option<u64>,
    #[description = "Minimum weekly Amari points"] weekly_amari: Option<u64>,
    #[description = "Minimum days in this server"] join_days: Option<u64>,
    #[description = "Minimum number of invites"] invites: Option<u64>,
    #[description = "Minimum shared coins"] shared_coins: Option<u64>,
    #[description = "Id of a server entrants must join"] required_server: Option<String>,
    #[description = "Mention the ping role of this server"] ping: Option<bool>,
) -> Result<()> {
    let guild_id = guild_of(&ctx)?;
    let duration = parse_duration(&time)?;
    let required_guild_id = match required_server {
        Some(raw) => match raw.trim().parse::<u64>() {
            Ok(id) if id > 0 => Some(GuildId::new(id)),
            _ => return Err(Error::Giveaway(format!("`{}` is not a server id.", raw))),
        },
        None => None,
    };

    let settings = ctx.data().settings.settings(guild_id);
    let requirements = RequirementSet {
        role_ids: settings
            .required_role(required_role.map(|role| role.id))
            .into_iter()
            .collect(),
        min_mee6_level: mee6_level,
        min_amari_level: amari_level,
        min_weekly_amari: weekly_amari,
        min_join_days: join_days,
        min_invites: invites,
        min_shared_currency: shared_coins,
        required_guild_id,
    };

    // The giveaway is identified by its message, so it's posted first.
    let header = settings
        .start_header
        .replace("{giveawayEmoji}", &settings.emoji);
    let message = ctx
        .channel_id()
        .send_message(ctx.http(), CreateMessage::new().content(header))
        .await?;

    let request = NewGiveaway {
        guild_id,
        message_id: message.id,
        channel_id: ctx.channel_id(),
        host_id: ctx.author().id,
        donor_id: donor.map(|user| user.id),
        title,
        winner_count: winners,
        duration,
        requirements,
    };
    let record = match ctx.data().manager.create(request).await {
        Ok(record) => record,
        Err(err) => {
            if let Err(delete_err) = message.delete(ctx.http()).await {
                warn!("Can't delete the giveaway message: {}", delete_err.to_string());
            }
            return Err(err);
        }
    };

    let profiles = &ctx.data().profiles;
    let hosted = profiles.record_hosted(guild_id, ctx.author().id);
    if let Err(err) = profiles.save().await {
        warn!("Can't save the member profiles: {}", err.to_string());
    }
    info!(
        "User {} started giveaway {} ({} hosted)",
        ctx.author().id.get(),
        record.key(),
        hosted
    );
    if ping.unwrap_or(false) {
        send_ping(ctx, &settings, None).await?;
    }
    reply(ctx, format!("The giveaway has started: {}", record.jump_url())).await
}

/// End a giveaway right away and pick the winners
#[poise::command(slash_command, guild_only, check = "is_manager")]
pub async fn end(
    ctx: Context<'_>,
    #[description = "Giveaway message id or link"] message: String,
) -> Result<()> {
    let key = giveaway_key(&ctx, &message)?;
    let record = ctx.data().manager.end(&key).await?;
    reply(
        ctx,
        format!("Ended with {} winner(s): {}", record.winners.len(), record.jump_url()),
    )
    .await
}

/// Cancel a giveaway without picking any winners
#[poise::command(slash_command, guild_only, check = "is_manager")]
pub async fn cancel(
    ctx: Context<'_>,
    #[description = "Giveaway message id or link"] message: String,
) -> Result<()> {
    let key = giveaway_key(&ctx, &message)?;
    let record = ctx.data().manager.cancel(&key, ctx.author().id).await?;
    reply(ctx, format!("Cancelled the **{}** giveaway.", record.title)).await
}

/// Pick new winners for an ended giveaway
#[poise::command(slash_command, guild_only, check = "is_manager")]
pub async fn reroll(
    ctx: Context<'_>,
    #[description = "Giveaway message id or link"] message: String,
    #[description = "Number of winners to pick"] winners: Option<u32>,
) -> Result<()> {
    let key = giveaway_key(&ctx, &message)?;
    let record = ctx
        .data()
        .manager
        .reroll(&key, winners.unwrap_or(1))
        .await?;
    reply(
        ctx,
        format!("Rerolled with {} winner(s): {}", record.winners.len(), record.jump_url()),
    )
    .await
}

/// Mention the ping role of this server with an optional message
#[poise::command(slash_command, guild_only, check = "is_manager")]
pub async fn ping(
    ctx: Context<'_>,
    #[description = "Text to send with the mention"] message: Option<String>,
) -> Result<()> {
    let guild_id = guild_of(&ctx)?;
    let settings = ctx.data().settings.settings(guild_id);
    match send_ping(ctx, &settings, message.as_deref()).await? {
        true => reply(ctx, "Sent.").await,
        false => reply(ctx, "There is no ping role and no message to send.").await,
    }
}

/// List the running giveaways of this server
#[poise::command(slash_command, guild_only)]
pub async fn list(
    ctx: Context<'_>,
    #[description = "Only show giveaways you can enter"] can_join: Option<bool>,
) -> Result<()> {
    let guild_id = guild_of(&ctx)?;
    let records = ctx
        .data()
        .manager
        .list_for(guild_id, ctx.author().id, can_join.unwrap_or(false))
        .await?;

    if records.is_empty() {
        return reply(ctx, "There are no giveaways to show.").await;
    }

    let lines = records
        .iter()
        .take(MAX_LISTED_GIVEAWAYS)
        .map(|record| {
            format!(
                "[{}]({}) ends <t:{}:R>",
                record.title,
                record.jump_url(),
                record.end_at.timestamp()
            )
        })
        .collect::<Vec<String>>();
    reply(ctx, lines.join("\n")).await
}

/// Forget the finished giveaways of this server
#[poise::command(slash_command, guild_only, check = "is_manager")]
pub async fn clearended(
    ctx: Context<'_>,
    #[description = "Space separated message ids to keep"] keep: Option<String>,
) -> Result<()> {
    let guild_id = guild_of(&ctx)?;
    let keep = keep
        .unwrap_or_default()
        .split_whitespace()
        .map(|raw| parse_message_reference(raw).map(|reference| reference.message_id))
        .collect::<Result<Vec<MessageId>>>()?;

    let purged = ctx.data().manager.clear_ended(guild_id, &keep).await?;
    reply(ctx, format!("Removed {} finished giveaway(s).", purged)).await
}

/// Show the giveaway tasks running in this bot
#[poise::command(slash_command, owners_only)]
pub async fn running(ctx: Context<'_>) -> Result<()> {
    let tasks = ctx.data().manager.running();
    if tasks.is_empty() {
        return reply(ctx, "No giveaway is running.").await;
    }

    let now = chrono::Utc::now();
    let lines = tasks
        .iter()
        .take(MAX_LISTED_GIVEAWAYS)
        .map(|task| {
            let uptime = (now - task.started_at).to_std().unwrap_or_default();
            let urgency = task
                .last_urgency
                .map(|urgency| format!("{:?}", urgency))
                .unwrap_or_else(|| "-".to_string());
            let refreshed = task
                .last_refresh
                .map(|at| format!("<t:{}:R>", at.timestamp()))
                .unwrap_or_else(|| "never".to_string());
            format!(
                "`{}` up {}, refreshed {}, {}",
                task.key,
                display_time(uptime),
                refreshed,
                urgency
            )
        })
        .collect::<Vec<String>>();
    reply(
        ctx,
        format!("{} running:\n{}", tasks.len(), lines.join("\n")),
    )
    .await
}

/// Giveaway settings of this server
#[poise::command(
    slash_command,
    guild_only,
    required_permissions = "MANAGE_GUILD",
    subcommands(
        "manager",
        "pingrole",
        "defaultrole",
        "multiplier",
        "bypass",
        "blacklist",
        "emoji",
        "template",
        "dmwinners",
        "dmhost",
        "invites",
        "coins",
        "deny",
        "allow"
    ),
    subcommand_required
)]
pub async fn gset(_: Context<'_>) -> Result<()> {
    Ok(())
}

/// Role that can manage giveaways without the Manage Server permission
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_GUILD")]
pub async fn manager(
    ctx: Context<'_>,
    #[description = "Role to change"] role: Role,
    #[description = "Remove the role instead"] remove: Option<bool>,
) -> Result<()> {
    let guild_id = guild_of(&ctx)?;
    let settings = &ctx.data().settings;
    let changed = match remove.unwrap_or(false) {
        true => settings.remove_manager_role(guild_id, role.id),
        false => settings.add_manager_role(guild_id, role.id),
    };

    match changed {
        true => {
            settings.save().await?;
            reply(ctx, "Giveaway manager roles updated.").await
        }
        false => reply(ctx, "Nothing to change.").await,
    }
}

/// Role mentioned by `/giveaway ping`. Leave it out to stop pinging.
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_GUILD")]
pub async fn pingrole(ctx: Context<'_>, role: Option<Role>) -> Result<()> {
    let guild_id = guild_of(&ctx)?;
    let settings = &ctx.data().settings;
    let role_id = role.map(|role| role.id);
    settings.set_ping_role(guild_id, role_id);
    settings.save().await?;

    match role_id {
        Some(role_id) => reply(ctx, format!("Pings now go to <@&{}>.", role_id.get())).await,
        None => reply(ctx, "Pings won't mention a role anymore.").await,
    }
}

/// Role required by giveaways that don't name one. Leave it out to clear it.
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_GUILD")]
pub async fn defaultrole(ctx: Context<'_>, role: Option<Role>) -> Result<()> {
    let guild_id = guild_of(&ctx)?;
    let settings = &ctx.data().settings;
    let role_id = role.map(|role| role.id);
    settings.set_default_role(guild_id, role_id);
    settings.save().await?;

    match role_id {
        Some(role_id) => {
            reply(ctx, format!("Giveaways now require <@&{}> by default.", role_id.get())).await
        }
        None => reply(ctx, "Giveaways have no default requirement anymore.").await,
    }
}

/// Extra entries for a role. They add up, they don't multiply. 0 removes it.
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_GUILD")]
pub async fn multiplier(
    ctx: Context<'_>,
    #[description = "Role to give extra entries"] role: Role,
    #[description = "Extra entries, at most 500"] value: u32,
) -> Result<()> {
    let guild_id = guild_of(&ctx)?;
    ctx.data().settings.set_multiplier(guild_id, role.id, value)?;
    ctx.data().settings.save().await?;
    reply(ctx, format!("<@&{}> now adds {} entries.", role.id.get(), value)).await
}

/// Role that skips every giveaway requirement
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_GUILD")]
pub async fn bypass(
    ctx: Context<'_>,
    #[description = "Role to change"] role: Role,
    #[description = "Remove the role instead"] remove: Option<bool>,
) -> Result<()> {
    let guild_id = guild_of(&ctx)?;
    let settings = &ctx.data().settings;
    let changed = match remove.unwrap_or(false) {
        true => settings.remove_bypass_role(guild_id, role.id),
        false => settings.add_bypass_role(guild_id, role.id),
    };

    match changed {
        true => {
            settings.save().await?;
            reply(ctx, "Bypass roles updated.").await
        }
        false => reply(ctx, "Nothing to change.").await,
    }
}

/// Role that can't enter any giveaway
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_GUILD")]
pub async fn blacklist(
    ctx: Context<'_>,
    #[description = "Role to change"] role: Role,
    #[description = "Remove the role instead"] remove: Option<bool>,
) -> Result<()> {
    let guild_id = guild_of(&ctx)?;
    let settings = &ctx.data().settings;
    let changed = match remove.unwrap_or(false) {
        true => settings.remove_blacklist_role(guild_id, role.id),
        false => settings.add_blacklist_role(guild_id, role.id),
    };

    match changed {
        true => {
            settings.save().await?;
            reply(ctx, "Blacklisted roles updated.").await
        }
        false => reply(ctx, "Nothing to change.").await,
    }
}

/// Reaction used to enter giveaways
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_GUILD")]
pub async fn emoji(
    ctx: Context<'_>,
    #[description = "Unicode or custom emoji"] emoji: String,
) -> Result<()> {
    let guild_id = guild_of(&ctx)?;
    ctx.data().settings.set_emoji(guild_id, &emoji)?;
    ctx.data().settings.save().await?;
    reply(ctx, format!("Giveaways now use {}", emoji.trim())).await
}

/// Change one of the giveaway messages
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_GUILD")]
pub async fn template(
    ctx: Context<'_>,
    #[description = "Message to change"] kind: Template,
    #[description = "Text with {prize}, {winners}, {host}, {guild}, {url} or {emoji}"]
    text: String,
) -> Result<()> {
    let guild_id = guild_of(&ctx)?;
    ctx.data().settings.set_template(guild_id, kind, &text)?;
    ctx.data().settings.save().await?;
    reply(ctx, "Message updated.").await
}

/// Send a private message to the winners
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_GUILD")]
pub async fn dmwinners(ctx: Context<'_>, enabled: bool) -> Result<()> {
    let guild_id = guild_of(&ctx)?;
    ctx.data().settings.set_dm_winners(guild_id, enabled);
    ctx.data().settings.save().await?;
    reply(ctx, format!("Winner messages enabled: {}", enabled)).await
}

/// Send a private message to the host when a giveaway ends
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_GUILD")]
pub async fn dmhost(ctx: Context<'_>, enabled: bool) -> Result<()> {
    let guild_id = guild_of(&ctx)?;
    ctx.data().settings.set_dm_host(guild_id, enabled);
    ctx.data().settings.save().await?;
    reply(ctx, format!("Host messages enabled: {}", enabled)).await
}

/// Set the invite count of a member used by the invite requirement
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_GUILD")]
pub async fn invites(ctx: Context<'_>, user: User, count: u64) -> Result<()> {
    let guild_id = guild_of(&ctx)?;
    let metrics = &ctx.data().metrics;
    metrics.record(guild_id, user.id, MetricKind::Invites, count);
    metrics.save().await?;
    reply(ctx, format!("{} has {} invite(s).", user.name, count)).await
}

/// Set the shared coin balance of a member used by the coin requirement
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_GUILD")]
pub async fn coins(ctx: Context<'_>, user: User, amount: u64) -> Result<()> {
    let guild_id = guild_of(&ctx)?;
    let metrics = &ctx.data().metrics;
    metrics.record(guild_id, user.id, MetricKind::SharedCurrency, amount);
    metrics.save().await?;
    reply(ctx, format!("{} has {} shared coin(s).", user.name, amount)).await
}

/// Ban a user from giveaways on every server
#[poise::command(slash_command, owners_only)]
pub async fn deny(ctx: Context<'_>, user: User) -> Result<()> {
    let settings = &ctx.data().settings;
    match settings.deny_user(user.id) {
        true => {
            settings.save().await?;
            reply(ctx, format!("{} can't enter giveaways anymore.", user.name)).await
        }
        false => reply(ctx, "Nothing to change.").await,
    }
}

/// Lift a giveaway ban
#[poise::command(slash_command, owners_only)]
pub async fn allow(ctx: Context<'_>, user: User) -> Result<()> {
    let settings = &ctx.data().settings;
    match settings.allow_user(user.id) {
        true => {
            settings.save().await?;
            reply(ctx, format!("{} can enter giveaways again.", user.name)).await
        }
        false => reply(ctx, "Nothing to change.").await,
    }
}

/// Hosting and donation history of members
#[poise::command(
    slash_command,
    guild_only,
    subcommands("show", "note", "donate", "donorrole", "top"),
    subcommand_required
)]
pub async fn gprofile(_: Context<'_>) -> Result<()> {
    Ok(())
}

/// Show the giveaway profile of a member
#[poise::command(slash_command, guild_only)]
pub async fn show(ctx: Context<'_>, user: Option<User>) -> Result<()> {
    let guild_id = guild_of(&ctx)?;
    let user = user.as_ref().unwrap_or_else(|| ctx.author());
    let profile = ctx.data().profiles.profile(guild_id, user.id);

    let mut text = format!(
        "**{}**\nHosted: {}\nDonated: {}",
        user.name, profile.hosted, profile.donated
    );
    if !profile.notes.is_empty() {
        let notes = profile
            .notes
            .iter()
            .enumerate()
            .map(|(index, note)| format!("{}. {}", index + 1, note))
            .collect::<Vec<String>>();
        text = format!("{}\nNotes:\n{}", text, notes.join("\n"));
    }
    reply(ctx, text).await
}

/// Add a note to a member's profile
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_GUILD")]
pub async fn note(ctx: Context<'_>, user: User, text: String) -> Result<()> {
    let guild_id = guild_of(&ctx)?;
    let profiles = &ctx.data().profiles;
    let count = profiles.add_note(guild_id, user.id, &text)?;
    profiles.save().await?;
    reply(ctx, format!("{} now has {} note(s).", user.name, count)).await
}

/// Add to the donation total of a member and update their donor roles
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_GUILD")]
pub async fn donate(ctx: Context<'_>, user: User, amount: u64) -> Result<()> {
    let guild_id = guild_of(&ctx)?;
    let profiles = &ctx.data().profiles;
    let total = profiles.add_donation(guild_id, user.id, amount);
    profiles.save().await?;

    sync_donor_roles(ctx, guild_id, user.id, total).await?;
    reply(ctx, format!("{} has donated {} in total.", user.name, total)).await
}

async fn sync_donor_roles(
    ctx: Context<'_>,
    guild_id: GuildId,
    user_id: UserId,
    donated: u64,
) -> Result<()> {
    if ctx.data().profiles.donor_roles(guild_id).is_empty() {
        return Ok(());
    }

    let member = guild_id.member(ctx.http(), user_id).await?;
    let held = member.roles.iter().copied().collect();
    let changes = ctx
        .data()
        .profiles
        .donor_role_changes(guild_id, donated, &held);
    if changes.is_empty() {
        return Ok(());
    }

    for role_id in changes.add {
        if let Err(err) = member.add_role(ctx.http(), role_id).await {
            warn!("Can't add donor role {}: {}", role_id.get(), err.to_string());
        }
    }
    for role_id in changes.remove {
        if let Err(err) = member.remove_role(ctx.http(), role_id).await {
            warn!("Can't remove donor role {}: {}", role_id.get(), err.to_string());
        }
    }
    Ok(())
}

/// Role granted once a member donated enough. Leave the amount out to remove it.
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_GUILD")]
pub async fn donorrole(ctx: Context<'_>, role: Role, amount: Option<u64>) -> Result<()> {
    let guild_id = guild_of(&ctx)?;
    let profiles = &ctx.data().profiles;

    match amount {
        Some(amount) => {
            profiles.set_donor_role(guild_id, role.id, amount);
            profiles.save().await?;
            reply(ctx, format!("<@&{}> now needs {} donated.", role.id.get(), amount)).await
        }
        None => match profiles.remove_donor_role(guild_id, role.id) {
            true => {
                profiles.save().await?;
                reply(ctx, "Donor role removed.").await
            }
            false => reply(ctx, "Nothing to change.").await,
        },
    }
}

/// Biggest donors of this server
#[poise::command(slash_command, guild_only)]
pub async fn top(ctx: Context<'_>) -> Result<()> {
    let guild_id = guild_of(&ctx)?;
    let donors = ctx.data().profiles.top_donors(guild_id, 10);
    if donors.is_empty() {
        return reply(ctx, "Nobody has donated yet.").await;
    }

    let lines = donors
        .iter()
        .enumerate()
        .map(|(index, (user_id, donated))| {
            format!("{}. <@{}>: {}", index + 1, user_id.get(), donated)
        })
        .collect::<Vec<String>>();
    reply(ctx, lines.join("\n")).await
}
