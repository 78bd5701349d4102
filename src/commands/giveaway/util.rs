use std::time::Duration;

use lazy_static::lazy_static;
use regex::Regex;
use serenity::model::id::{ChannelId, GuildId, MessageId};

use crate::error::{Error, Result};

lazy_static! {
    static ref DURATION_REGEX: Regex = Regex::new(
        r"(?i)^(?:(?P<weeks>\d+)w)?(?:(?P<days>\d+)d)?(?:(?P<hours>\d+)h)?(?:(?P<minutes>\d+)m)?(?:(?P<seconds>\d+)s)?$"
    )
    .unwrap();
    static ref MESSAGE_LINK_REGEX: Regex = Regex::new(
        r"^https?://(?:(?:ptb|canary)\.)?discord(?:app)?\.com/channels/(?P<guild>\d+)/(?P<channel>\d+)/(?P<message>\d+)/?$"
    )
    .unwrap();
}

const DURATION_UNITS: [(&str, u64); 5] = [
    ("weeks", 604_800),
    ("days", 86_400),
    ("hours", 3_600),
    ("minutes", 60),
    ("seconds", 1),
];

// Parses durations like `1w2d`, `3h30m`, `45s` or a bare number of seconds.
pub fn parse_duration(text: &str) -> Result<Duration> {
    let text = text
        .chars()
        .filter(|symbol| !symbol.is_whitespace())
        .collect::<String>();
    let invalid = || {
        let message = format!(
            "Can't understand the time `{}`. Use something like `1d12h` or `90s`.",
            text
        );
        Error::Config(message)
    };

    if text.is_empty() {
        return Err(invalid());
    }
    if let Ok(seconds) = text.parse::<u64>() {
        return Ok(Duration::from_secs(seconds));
    }

    let captures = DURATION_REGEX.captures(&text).ok_or_else(invalid)?;
    let mut total: u64 = 0;
    for (name, amount) in DURATION_UNITS {
        if let Some(value) = captures.name(name) {
            let value = value.as_str().parse::<u64>().map_err(|_| invalid())?;
            total = value
                .checked_mul(amount)
                .and_then(|seconds| total.checked_add(seconds))
                .ok_or_else(invalid)?;
        }
    }
    Ok(Duration::from_secs(total))
}

#[readonly::make]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MessageReference {
    pub guild_id: Option<GuildId>,
    pub channel_id: Option<ChannelId>,
    pub message_id: MessageId,
}

// Accepts either a message id or a link to the message.
pub fn parse_message_reference(text: &str) -> Result<MessageReference> {
    let text = text.trim();
    let invalid = || Error::Giveaway(format!("`{}` is not a message id or link.", text));

    if let Ok(message_id) = text.parse::<u64>() {
        return match message_id {
            0 => Err(invalid()),
            _ => Ok(MessageReference {
                guild_id: None,
                channel_id: None,
                message_id: MessageId::new(message_id),
            }),
        };
    }

    let captures = MESSAGE_LINK_REGEX.captures(text).ok_or_else(invalid)?;
    let parse_id = |name: &str| -> Result<u64> {
        captures
            .name(name)
            .and_then(|value| value.as_str().parse::<u64>().ok())
            .filter(|value| *value > 0)
            .ok_or_else(invalid)
    };

    Ok(MessageReference {
        guild_id: Some(GuildId::new(parse_id("guild")?)),
        channel_id: Some(ChannelId::new(parse_id("channel")?)),
        message_id: MessageId::new(parse_id("message")?),
    })
}
