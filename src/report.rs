use crate::sessions::SessionState;
use chrono::{DateTime, Utc};
use poise::serenity_prelude as serenity;
use serenity::builder::CreateEmbed;
use std::fmt::{Display, Formatter};
use std::time::Duration;

/// Embed colour for statistics replies
pub const STATS_COLOR: u32 = 0x5865F2;

/// Voice statistics of one member or guild, ready for display
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatsReport {
    /// Display name of the member or guild
    pub name: String,
    /// Length of the session in progress, if one is
    pub current: Option<Duration>,
    pub longest: Duration,
    pub average: Duration,
    pub total: u64,
}

impl StatsReport {
    /// Build a report from stored state.
    ///
    /// `live` says whether the scope is in voice right now; a running state
    /// only counts as a current session when it is.
    #[must_use]
    pub fn from_state(
        name: impl Into<String>,
        state: &SessionState,
        live: bool,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            name: name.into(),
            current: if live { state.current_length(now) } else { None },
            longest: state.longest_session,
            average: state.average_duration(),
            total: state.total_sessions,
        }
    }

    /// Embed fields as (name, value, inline)
    #[must_use]
    pub fn fields(&self) -> Vec<(String, String, bool)> {
        let prefix = format!("{}'s ", self.name);
        let mut fields = Vec::with_capacity(4);
        if let Some(current) = self.current {
            fields.push((
                format!("{prefix}Current Session Length"),
                format_duration(current),
                true,
            ));
        }
        fields.push((
            format!("{prefix}Longest Session"),
            format_duration(self.longest),
            true,
        ));
        fields.push((
            format!("{prefix}Average Session Length"),
            format_duration(self.average),
            true,
        ));
        fields.push((format!("{prefix}Total Sessions"), self.total.to_string(), true));
        fields
    }
}

impl Display for StatsReport {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: {} sessions, longest {}, average {}",
            self.name,
            self.total,
            format_duration(self.longest),
            format_duration(self.average)
        )
    }
}

/// Format a duration as `H:MM:SS`, dropping fractions of a second
#[must_use]
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    format!("{}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}

/// Create an embed for displaying voice statistics
#[must_use]
pub fn create_stats_embed(reports: &[StatsReport]) -> CreateEmbed {
    let embed = CreateEmbed::new()
        .title("Voice Stats")
        .color(STATS_COLOR)
        .timestamp(serenity::Timestamp::now());

    if reports.iter().all(|report| report.total == 0 && report.current.is_none()) {
        return embed.description("No voice sessions recorded yet");
    }

    embed.fields(reports.iter().flat_map(StatsReport::fields))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::ZERO), "0:00:00");
        assert_eq!(format_duration(Duration::from_secs(59)), "0:00:59");
        assert_eq!(format_duration(Duration::from_secs(3725)), "1:02:05");
        assert_eq!(format_duration(Duration::from_secs(90_000)), "25:00:00");
        assert_eq!(format_duration(Duration::from_millis(1_999)), "0:00:01");
    }

    #[test]
    fn test_report_from_running_state() {
        let mut state = SessionState::default();
        state.start(at(0));
        state.end(at(600));
        state.start(at(1000));

        let report = StatsReport::from_state("alex", &state, true, at(1090));
        assert_eq!(report.current, Some(Duration::from_secs(90)));
        assert_eq!(report.longest, Duration::from_secs(600));
        assert_eq!(report.total, 1);

        let fields = report.fields();
        assert_eq!(fields.len(), 4);
        assert_eq!(fields[0].0, "alex's Current Session Length");
        assert_eq!(fields[0].1, "0:01:30");
        assert_eq!(fields[3], ("alex's Total Sessions".to_string(), "1".to_string(), true));
    }

    #[test]
    fn test_report_hides_current_when_not_live() {
        let mut state = SessionState::default();
        state.start(at(0));

        let report = StatsReport::from_state("guild", &state, false, at(50));
        assert_eq!(report.current, None);
        assert_eq!(report.fields().len(), 3);
    }

    #[test]
    fn test_report_display() {
        let report = StatsReport {
            name: "alex".to_string(),
            current: None,
            longest: Duration::from_secs(120),
            average: Duration::from_secs(60),
            total: 2,
        };
        assert_eq!(report.to_string(), "alex: 2 sessions, longest 0:02:00, average 0:01:00");
    }

    #[test]
    fn test_create_stats_embed_builds() {
        let report = StatsReport::from_state("alex", &SessionState::default(), false, at(0));
        let _embed = create_stats_embed(&[report]);
    }
}
