// Text of the giveaway embeds and messages
use std::time::Duration;

use serenity::model::id::UserId;

use crate::commands::giveaway::formatters::base::GiveawayFormatter;
use crate::commands::giveaway::models::{GiveawayRecord, GuildSettings};

const TIME_INTERVALS: [(&str, u64); 5] = [
    ("week", 604_800),
    ("day", 86_400),
    ("hour", 3_600),
    ("minute", 60),
    ("second", 1),
];

// Pretty-print for the time left, e.g. "1 day 2 hours 5 seconds".
pub fn display_time(duration: Duration) -> String {
    let mut seconds = duration.as_secs_f64().round() as u64;
    let mut parts = Vec::new();

    for (name, amount) in TIME_INTERVALS {
        let count = seconds / amount;
        seconds %= amount;
        match count {
            0 => continue,
            1 => parts.push(format!("1 {}", name)),
            _ => parts.push(format!("{} {}s", count, name)),
        }
    }

    match parts.is_empty() {
        true => "0 seconds".to_string(),
        false => parts.join(" "),
    }
}

// Joins the mentions as "a, b and c".
pub fn mention_list(users: &[UserId]) -> String {
    let mentions = users
        .iter()
        .map(|user_id| format!("<@{}>", user_id.get()))
        .collect::<Vec<String>>();

    match mentions.split_last() {
        None => "None".to_string(),
        Some((last, [])) => last.clone(),
        Some((last, rest)) => format!("{} and {}", rest.join(", "), last),
    }
}

// Substitutes the `{placeholder}` values in a user-defined template.
pub fn fill_template(template: &str, values: &[(&str, &str)]) -> String {
    values
        .iter()
        .fold(template.to_string(), |text, (name, value)| {
            text.replace(&format!("{{{}}}", name), value)
        })
}

pub struct DefaultGiveawayFormatter;

impl DefaultGiveawayFormatter {
    pub fn new() -> Self {
        DefaultGiveawayFormatter {}
    }
}

impl GiveawayFormatter for DefaultGiveawayFormatter {
    fn running_description(
        &self,
        record: &GiveawayRecord,
        remaining: Duration,
        settings: &GuildSettings,
    ) -> String {
        let description =
            fill_template(&settings.description, &[("emoji", settings.emoji.as_str())]);
        format!(
            "{}\nTime Left: **{}**\nHost: <@{}>",
            description,
            display_time(remaining),
            record.host_id.get()
        )
    }

    fn ended_description(&self, record: &GiveawayRecord) -> String {
        format!(
            "Winner(s): {}\nHost: <@{}>",
            mention_list(&record.winners),
            record.host_id.get()
        )
    }

    fn requirements(&self, record: &GiveawayRecord, settings: &GuildSettings) -> Option<String> {
        let requirements = &record.requirements;
        let mut lines = Vec::new();

        if !requirements.role_ids.is_empty() {
            let roles = requirements
                .role_ids
                .iter()
                .map(|role_id| format!("<@&{}>", role_id.get()))
                .collect::<Vec<String>>();
            lines.push(format!("Roles: {}", roles.join(", ")));
        }
        if let Some(level) = requirements.min_mee6_level {
            lines.push(format!("Minimum MEE6 Level: {}", level));
        }
        if let Some(level) = requirements.min_amari_level {
            lines.push(format!("Minimum Amari Level: {}", level));
        }
        if let Some(points) = requirements.min_weekly_amari {
            lines.push(format!("Minimum Weekly Amari: {}", points));
        }
        if let Some(days) = requirements.min_join_days {
            lines.push(format!("Minimum days in server: {}", days));
        }
        if let Some(guild_id) = requirements.required_guild_id {
            lines.push(format!("Must join the server `{}`", guild_id.get()));
        }
        if let Some(invites) = requirements.min_invites {
            lines.push(format!("Minimum number of invites: {}", invites));
        }
        if let Some(coins) = requirements.min_shared_currency {
            lines.push(format!("Minimum shared coins in server: {}", coins));
        }
        if !lines.is_empty() && !settings.bypass_roles.is_empty() {
            let roles = settings
                .bypass_roles
                .iter()
                .map(|role_id| format!("<@&{}>", role_id.get()))
                .collect::<Vec<String>>();
            lines.push(format!("Bypass Role(s): {}", roles.join(", ")));
        }

        match lines.is_empty() {
            true => None,
            false => Some(lines.join("\n")),
        }
    }

    fn result_message(&self, record: &GiveawayRecord, winners: &[UserId]) -> String {
        match winners.is_empty() {
            true => format!(
                "There were no valid entries for the **{}** giveaway\n{}",
                record.title,
                record.jump_url()
            ),
            false => format!(
                "The winners for the **{}** giveaway are\n{}\n{}",
                record.title,
                mention_list(winners),
                record.jump_url()
            ),
        }
    }

    fn host_message(
        &self,
        record: &GiveawayRecord,
        winners: &[UserId],
        settings: &GuildSettings,
        guild_name: &str,
    ) -> String {
        let url = record.jump_url();
        let winners = mention_list(winners);
        fill_template(
            &settings.host_message,
            &[
                ("prize", record.title.as_str()),
                ("winners", winners.as_str()),
                ("guild", guild_name),
                ("url", url.as_str()),
            ],
        )
    }

    fn win_message(
        &self,
        record: &GiveawayRecord,
        settings: &GuildSettings,
        guild_name: &str,
    ) -> String {
        let url = record.jump_url();
        let host = format!("<@{}>", record.host_id.get());
        fill_template(
            &settings.win_message,
            &[
                ("prize", record.title.as_str()),
                ("host", host.as_str()),
                ("guild", guild_name),
                ("url", url.as_str()),
            ],
        )
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::Utc;
    use serenity::model::id::{GuildId, RoleId, UserId};

    use crate::commands::giveaway::formatters::{
        display_time, fill_template, mention_list, DefaultGiveawayFormatter, GiveawayFormatter,
    };
    use crate::commands::giveaway::models::{
        GiveawayRecord, GiveawayStatus, GuildSettings, NewGiveaway,
    };
    use crate::commands::giveaway::testing::get_request;

    fn get_record_with_requirements() -> GiveawayRecord {
        let mut request: NewGiveaway = get_request(1, 10, Duration::from_secs(60));
        request.requirements.role_ids.insert(RoleId::new(5));
        request.requirements.min_mee6_level = Some(3);
        request.requirements.required_guild_id = Some(GuildId::new(2));
        GiveawayRecord::create(request, Utc::now()).unwrap()
    }

    #[test]
    fn test_display_time() {
        assert_eq!(display_time(Duration::from_secs(0)), "0 seconds");
        assert_eq!(display_time(Duration::from_secs(1)), "1 second");
        assert_eq!(display_time(Duration::from_secs(61)), "1 minute 1 second");
        assert_eq!(
            display_time(Duration::from_secs(694_925)),
            "1 week 1 day 1 hour 2 minutes 5 seconds"
        );
        assert_eq!(display_time(Duration::from_millis(1500)), "2 seconds");
    }

    #[test]
    fn test_mention_list() {
        assert_eq!(mention_list(&[]), "None");
        assert_eq!(mention_list(&[UserId::new(1)]), "<@1>");
        assert_eq!(
            mention_list(&[UserId::new(1), UserId::new(2), UserId::new(3)]),
            "<@1>, <@2> and <@3>"
        );
    }

    #[test]
    fn test_fill_template_keeps_unknown_placeholders() {
        let text = fill_template("{prize} in {guild} by {nobody}", &[("prize", "Nitro")]);

        assert_eq!(text, "Nitro in {guild} by {nobody}");
    }

    #[test]
    fn test_requirement_lines() {
        let formatter = DefaultGiveawayFormatter::new();
        let mut settings = GuildSettings::default();
        settings.bypass_roles.insert(RoleId::new(9));

        let text = formatter
            .requirements(&get_record_with_requirements(), &settings)
            .unwrap();
        assert_eq!(
            text,
            "Roles: <@&5>\nMinimum MEE6 Level: 3\nMust join the server `2`\nBypass Role(s): <@&9>"
        );

        let plain = GiveawayRecord::create(
            get_request(1, 11, Duration::from_secs(60)),
            Utc::now(),
        )
        .unwrap();
        assert_eq!(formatter.requirements(&plain, &settings), None);
    }

    #[test]
    fn test_result_and_private_messages() {
        let formatter = DefaultGiveawayFormatter::new();
        let settings = GuildSettings::default();
        let mut record = get_record_with_requirements();
        record.settle(GiveawayStatus::Ended, vec![UserId::new(7)], Utc::now());

        assert_eq!(
            formatter.result_message(&record, &[]),
            "There were no valid entries for the **Nitro** giveaway\n\
             https://discord.com/channels/1/100/10"
        );
        assert_eq!(
            formatter.win_message(&record, &settings, "Guild"),
            "You won the giveaway for [Nitro](https://discord.com/channels/1/100/10) in Guild!"
        );
        assert_eq!(
            formatter.ended_description(&record),
            "Winner(s): <@7>\nHost: <@1000>"
        );
    }
}
