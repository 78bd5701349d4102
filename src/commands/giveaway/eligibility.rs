use std::fmt;

use chrono::{DateTime, Utc};
use serenity::model::id::{GuildId, RoleId};
use tracing::warn;

use crate::commands::giveaway::collaborators::{MemberDirectory, MetricsSource};
use crate::commands::giveaway::models::{
    GuildSettings, MemberInfo, MetricKind, ParticipantSnapshot, RequirementSet,
};

// Level and score checks, in the order they are reported.
const SCORE_CHECKS: [MetricKind; 4] = [
    MetricKind::Mee6Level,
    MetricKind::AmariLevel,
    MetricKind::AmariWeekly,
    MetricKind::SharedCurrency,
];

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Eligibility {
    Eligible,
    Ineligible(IneligibleReason),
}

impl Eligibility {
    pub fn is_eligible(&self) -> bool {
        matches!(self, Eligibility::Eligible)
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum IneligibleReason {
    // On the global deny-list. Never explained to the user.
    Denied,
    BlacklistedRole(RoleId),
    MissingRole(RoleId),
    BelowThreshold {
        kind: MetricKind,
        required: u64,
        current: u64,
    },
    Tenure {
        required_days: u64,
        current_days: u64,
    },
    MissingGuild(GuildId),
}

impl IneligibleReason {
    pub fn is_silent(&self) -> bool {
        matches!(self, IneligibleReason::Denied)
    }

    // How much is missing for the numeric checks.
    pub fn shortfall(&self) -> Option<u64> {
        match self {
            IneligibleReason::BelowThreshold {
                required, current, ..
            } => Some(required.saturating_sub(*current)),
            IneligibleReason::Tenure {
                required_days,
                current_days,
            } => Some(required_days.saturating_sub(*current_days)),
            _ => None,
        }
    }
}

impl fmt::Display for IneligibleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shortfall = self.shortfall().unwrap_or(0);
        match self {
            IneligibleReason::Denied => write!(f, "You can't enter this giveaway"),
            IneligibleReason::BlacklistedRole(role_id) => write!(
                f,
                "You have the <@&{}> role which has prevented you from entering this giveaway",
                role_id.get()
            ),
            IneligibleReason::MissingRole(role_id) => write!(
                f,
                "You do not have the <@&{}> role which is required for this giveaway",
                role_id.get()
            ),
            IneligibleReason::BelowThreshold { kind, .. } => match kind {
                MetricKind::SharedCurrency => write!(
                    f,
                    "You need to share {} more coins in this server to join this giveaway",
                    shortfall
                ),
                MetricKind::Invites => write!(
                    f,
                    "You need to have {} more invites to join this giveaway",
                    shortfall
                ),
                _ => write!(
                    f,
                    "You need {} more {} to enter this giveaway",
                    shortfall,
                    kind.as_str()
                ),
            },
            IneligibleReason::Tenure { .. } => write!(
                f,
                "You need to be in the server for {} more days to enter this giveaway",
                shortfall
            ),
            IneligibleReason::MissingGuild(guild_id) => write!(
                f,
                "You need to join the server {} to enter this giveaway",
                guild_id.get()
            ),
        }
    }
}

// Decides whether the participant may take part in the giveaway. The first
// failing check is reported, later checks are not evaluated.
pub fn evaluate(
    participant: &ParticipantSnapshot,
    requirements: &RequirementSet,
    settings: &GuildSettings,
) -> Eligibility {
    if settings.denied_users.contains(&participant.user_id) {
        return Eligibility::Ineligible(IneligibleReason::Denied);
    }

    if settings
        .bypass_roles
        .iter()
        .any(|role_id| participant.roles.contains(role_id))
    {
        return Eligibility::Eligible;
    }

    if let Some(role_id) = settings
        .blacklist_roles
        .iter()
        .find(|role_id| participant.roles.contains(role_id))
    {
        return Eligibility::Ineligible(IneligibleReason::BlacklistedRole(*role_id));
    }

    if let Some(first_required) = requirements.role_ids.iter().next() {
        let holds_any = requirements
            .role_ids
            .iter()
            .any(|role_id| participant.roles.contains(role_id));
        if !holds_any {
            return Eligibility::Ineligible(IneligibleReason::MissingRole(*first_required));
        }
    }

    for kind in SCORE_CHECKS {
        if let Some(reason) = check_threshold(participant, requirements, kind) {
            return Eligibility::Ineligible(reason);
        }
    }

    if let Some(required_days) = requirements.min_join_days {
        let current_days = participant.tenure_days();
        if current_days < required_days {
            return Eligibility::Ineligible(IneligibleReason::Tenure {
                required_days,
                current_days,
            });
        }
    }

    if let Some(reason) = check_threshold(participant, requirements, MetricKind::Invites) {
        return Eligibility::Ineligible(reason);
    }

    if let Some(guild_id) = requirements.required_guild_id {
        if participant.in_required_guild != Some(true) {
            return Eligibility::Ineligible(IneligibleReason::MissingGuild(guild_id));
        }
    }

    Eligibility::Eligible
}

fn check_threshold(
    participant: &ParticipantSnapshot,
    requirements: &RequirementSet,
    kind: MetricKind,
) -> Option<IneligibleReason> {
    let required = requirements.threshold(kind)?;
    let current = participant.metric(kind);
    match current >= required {
        true => None,
        false => Some(IneligibleReason::BelowThreshold {
            kind,
            required,
            current,
        }),
    }
}

// Builds the snapshot a single evaluation works on. Only the metrics the
// requirements enforce are fetched; failed lookups are left out and so count
// as zero.
pub async fn collect_snapshot(
    guild_id: GuildId,
    member: &MemberInfo,
    requirements: &RequirementSet,
    settings: &GuildSettings,
    metrics: &dyn MetricsSource,
    members: &dyn MemberDirectory,
    now: DateTime<Utc>,
) -> ParticipantSnapshot {
    let mut snapshot = ParticipantSnapshot::new(member.user_id, now);
    snapshot.roles = member.roles.clone();
    snapshot.joined_at = member.joined_at;

    // Nothing else is looked at for these users.
    let denied = settings.denied_users.contains(&member.user_id);
    let bypass = settings
        .bypass_roles
        .iter()
        .any(|role_id| member.roles.contains(role_id));
    if denied || bypass {
        return snapshot;
    }

    for kind in MetricKind::ALL {
        if requirements.threshold(kind).is_none() {
            continue;
        }

        match metrics.metric(guild_id, member.user_id, kind).await {
            Ok(value) => {
                snapshot.metrics.insert(kind, value);
            }
            Err(err) => warn!(
                "Can't fetch {} of user {}: {}",
                kind.as_str(),
                member.user_id.get(),
                err.to_string()
            ),
        }
    }

    if let Some(required_guild) = requirements.required_guild_id {
        snapshot.in_required_guild = match members.is_member(required_guild, member.user_id).await
        {
            Ok(is_member) => Some(is_member),
            Err(err) => {
                warn!(
                    "Can't check membership of user {} in guild {}: {}",
                    member.user_id.get(),
                    required_guild.get(),
                    err.to_string()
                );
                None
            }
        };
    }

    snapshot
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use chrono::{Duration, Utc};
    use serenity::model::id::{GuildId, RoleId, UserId};

    use crate::commands::giveaway::eligibility::{
        collect_snapshot, evaluate, Eligibility, IneligibleReason,
    };
    use crate::commands::giveaway::models::{
        GuildSettings, MemberInfo, MetricKind, ParticipantSnapshot, RequirementSet,
    };
    use crate::commands::giveaway::testing::{FakeMembers, FakeMetrics};

    fn get_participant(roles: &[u64]) -> ParticipantSnapshot {
        let mut snapshot = ParticipantSnapshot::new(UserId::new(1), Utc::now());
        snapshot.roles = roles.iter().map(|id| RoleId::new(*id)).collect();
        snapshot
    }

    fn get_strict_requirements() -> RequirementSet {
        RequirementSet {
            role_ids: [RoleId::new(50)].into_iter().collect(),
            min_mee6_level: Some(10),
            min_amari_level: Some(10),
            min_weekly_amari: Some(100),
            min_join_days: Some(30),
            min_invites: Some(5),
            min_shared_currency: Some(1000),
            required_guild_id: Some(GuildId::new(99)),
        }
    }

    #[test]
    fn test_empty_requirements_are_always_eligible() {
        let settings = GuildSettings::default();
        let participant = get_participant(&[]);

        let result = evaluate(&participant, &RequirementSet::default(), &settings);
        assert_eq!(result, Eligibility::Eligible);
    }

    #[test]
    fn test_denied_user_is_rejected_silently_even_with_bypass_role() {
        let mut settings = GuildSettings::default();
        settings.denied_users.insert(UserId::new(1));
        settings.bypass_roles.insert(RoleId::new(2));
        let participant = get_participant(&[2]);

        let result = evaluate(&participant, &RequirementSet::default(), &settings);
        assert_eq!(result, Eligibility::Ineligible(IneligibleReason::Denied));
        assert_eq!(IneligibleReason::Denied.is_silent(), true);
    }

    #[test]
    fn test_bypass_role_skips_every_requirement() {
        let mut settings = GuildSettings::default();
        settings.bypass_roles.insert(RoleId::new(2));
        settings.blacklist_roles.insert(RoleId::new(3));
        let participant = get_participant(&[2, 3]);

        let result = evaluate(&participant, &get_strict_requirements(), &settings);
        assert_eq!(result, Eligibility::Eligible);
    }

    #[test]
    fn test_blacklisted_role_is_reported_before_missing_role() {
        let mut settings = GuildSettings::default();
        settings.blacklist_roles.insert(RoleId::new(3));
        let participant = get_participant(&[3]);

        let result = evaluate(&participant, &get_strict_requirements(), &settings);
        assert_eq!(
            result,
            Eligibility::Ineligible(IneligibleReason::BlacklistedRole(RoleId::new(3)))
        );
    }

    #[test]
    fn test_any_of_required_roles_is_enough() {
        let settings = GuildSettings::default();
        let requirements = RequirementSet {
            role_ids: [RoleId::new(50), RoleId::new(51)].into_iter().collect(),
            ..RequirementSet::default()
        };

        let with_one = evaluate(&get_participant(&[51]), &requirements, &settings);
        let with_none = evaluate(&get_participant(&[7]), &requirements, &settings);
        assert_eq!(with_one, Eligibility::Eligible);
        assert_eq!(
            with_none,
            Eligibility::Ineligible(IneligibleReason::MissingRole(RoleId::new(50)))
        );
    }

    #[test]
    fn test_first_failing_metric_is_reported() {
        let settings = GuildSettings::default();
        let mut participant = get_participant(&[50]);
        participant.metrics.insert(MetricKind::Mee6Level, 12);
        participant.metrics.insert(MetricKind::AmariLevel, 4);

        let result = evaluate(&participant, &get_strict_requirements(), &settings);
        let expected = IneligibleReason::BelowThreshold {
            kind: MetricKind::AmariLevel,
            required: 10,
            current: 4,
        };
        assert_eq!(expected.shortfall(), Some(6));
        assert_eq!(result, Eligibility::Ineligible(expected));
    }

    #[test]
    fn test_missing_metric_counts_as_zero() {
        let settings = GuildSettings::default();
        let requirements = RequirementSet {
            min_shared_currency: Some(500),
            ..RequirementSet::default()
        };

        let result = evaluate(&get_participant(&[]), &requirements, &settings);
        assert_eq!(
            result,
            Eligibility::Ineligible(IneligibleReason::BelowThreshold {
                kind: MetricKind::SharedCurrency,
                required: 500,
                current: 0,
            })
        );
    }

    #[test]
    fn test_tenure_is_checked_before_invites() {
        let settings = GuildSettings::default();
        let requirements = RequirementSet {
            min_join_days: Some(30),
            min_invites: Some(5),
            ..RequirementSet::default()
        };
        let mut participant = get_participant(&[]);
        participant.joined_at = Some(participant.taken_at - Duration::days(10));

        let result = evaluate(&participant, &requirements, &settings);
        assert_eq!(
            result,
            Eligibility::Ineligible(IneligibleReason::Tenure {
                required_days: 30,
                current_days: 10,
            })
        );

        participant.joined_at = Some(participant.taken_at - Duration::days(40));
        let result = evaluate(&participant, &requirements, &settings);
        assert_eq!(
            result,
            Eligibility::Ineligible(IneligibleReason::BelowThreshold {
                kind: MetricKind::Invites,
                required: 5,
                current: 0,
            })
        );
    }

    #[test]
    fn test_thresholds_pass_when_equal() {
        let settings = GuildSettings::default();
        let mut participant = get_participant(&[50]);
        participant.joined_at = Some(participant.taken_at - Duration::days(30));
        participant.metrics.insert(MetricKind::Mee6Level, 10);
        participant.metrics.insert(MetricKind::AmariLevel, 10);
        participant.metrics.insert(MetricKind::AmariWeekly, 100);
        participant.metrics.insert(MetricKind::SharedCurrency, 1000);
        participant.metrics.insert(MetricKind::Invites, 5);
        participant.in_required_guild = Some(true);

        let result = evaluate(&participant, &get_strict_requirements(), &settings);
        assert_eq!(result, Eligibility::Eligible);
    }

    #[test]
    fn test_required_guild_is_checked_last() {
        let settings = GuildSettings::default();
        let requirements = RequirementSet {
            required_guild_id: Some(GuildId::new(99)),
            ..RequirementSet::default()
        };
        let mut participant = get_participant(&[]);

        let unknown = evaluate(&participant, &requirements, &settings);
        participant.in_required_guild = Some(false);
        let outside = evaluate(&participant, &requirements, &settings);
        let expected = Eligibility::Ineligible(IneligibleReason::MissingGuild(GuildId::new(99)));
        assert_eq!(unknown, expected);
        assert_eq!(outside, expected);
    }

    #[test]
    fn test_reason_messages() {
        let reason = IneligibleReason::BelowThreshold {
            kind: MetricKind::Mee6Level,
            required: 10,
            current: 7,
        };
        assert_eq!(
            reason.to_string(),
            "You need 3 more MEE6 level to enter this giveaway".to_string()
        );

        let reason = IneligibleReason::Tenure {
            required_days: 5,
            current_days: 1,
        };
        assert_eq!(
            reason.to_string(),
            "You need to be in the server for 4 more days to enter this giveaway".to_string()
        );
    }

    #[tokio::test]
    async fn test_collect_snapshot_fetches_only_enforced_metrics() {
        let metrics = FakeMetrics::new();
        metrics.set(UserId::new(1), MetricKind::AmariLevel, 8);
        metrics.set(UserId::new(1), MetricKind::Invites, 3);
        metrics.fail(MetricKind::Mee6Level);
        let members = FakeMembers::new();
        let member = MemberInfo {
            user_id: UserId::new(1),
            roles: HashSet::new(),
            joined_at: None,
            bot: false,
        };
        let requirements = RequirementSet {
            min_mee6_level: Some(5),
            min_amari_level: Some(5),
            ..RequirementSet::default()
        };

        let snapshot = collect_snapshot(
            GuildId::new(1),
            &member,
            &requirements,
            &GuildSettings::default(),
            &metrics,
            &members,
            Utc::now(),
        )
        .await;

        assert_eq!(snapshot.metrics.get(&MetricKind::AmariLevel), Some(&8));
        assert_eq!(snapshot.metrics.get(&MetricKind::Invites), None);
        // Unavailable lookups are left out instead of failing the evaluation.
        assert_eq!(snapshot.metrics.get(&MetricKind::Mee6Level), None);
        assert_eq!(metrics.calls(), 2);
    }

    #[tokio::test]
    async fn test_collect_snapshot_checks_required_guild() {
        let metrics = FakeMetrics::new();
        let members = FakeMembers::new();
        members.join(GuildId::new(99), UserId::new(1));
        let member = MemberInfo {
            user_id: UserId::new(1),
            roles: HashSet::new(),
            joined_at: None,
            bot: false,
        };
        let requirements = RequirementSet {
            required_guild_id: Some(GuildId::new(99)),
            ..RequirementSet::default()
        };

        let snapshot = collect_snapshot(
            GuildId::new(1),
            &member,
            &requirements,
            &GuildSettings::default(),
            &metrics,
            &members,
            Utc::now(),
        )
        .await;

        assert_eq!(snapshot.in_required_guild, Some(true));
        assert_eq!(
            evaluate(&snapshot, &requirements, &GuildSettings::default()),
            Eligibility::Eligible
        );
    }
}
