//! Recurring session schedule.
//!
//! Weekdays are numbered from Sunday: 0=Sunday, 1=Monday, ..., 6=Saturday.

use chrono::{DateTime, Datelike, Duration, NaiveDateTime, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::Tz;
use movieclub_common::config::ScheduleConfig;
use movieclub_common::{AppError, AppResult};
use movieclub_db::UnitOfWork;
use movieclub_db::entities::schedule;
use movieclub_db::repositories::ScheduleRepository;
use sea_orm::{ConnectionTrait, Set};
use serde::Deserialize;
use tracing::info;
use validator::Validate;

/// A validated weekly rule: weekday, local time of day and timezone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleRule {
    weekday: Weekday,
    time: NaiveTime,
    tz: Tz,
}

impl ScheduleRule {
    /// Build a rule from raw fields.
    pub fn new(weekday: i16, hour: i16, minute: i16, timezone: &str) -> AppResult<Self> {
        let tz: Tz = timezone
            .parse()
            .map_err(|_| AppError::Validation(format!("Invalid timezone: {timezone}")))?;

        let weekday = match weekday {
            0 => Weekday::Sun,
            1 => Weekday::Mon,
            2 => Weekday::Tue,
            3 => Weekday::Wed,
            4 => Weekday::Thu,
            5 => Weekday::Fri,
            6 => Weekday::Sat,
            other => {
                return Err(AppError::Validation(format!(
                    "Weekday must be 0 (Sunday) to 6 (Saturday), got {other}"
                )));
            }
        };

        let time = u32::try_from(hour)
            .ok()
            .zip(u32::try_from(minute).ok())
            .and_then(|(h, m)| NaiveTime::from_hms_opt(h, m, 0))
            .ok_or_else(|| AppError::Validation(format!("Invalid time of day: {hour}:{minute}")))?;

        Ok(Self { weekday, time, tz })
    }

    /// First moment strictly after `now` that falls on the rule's weekday and local time.
    #[must_use]
    pub fn next_occurrence(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let now_local = now.with_timezone(&self.tz);

        let days_until = (i64::from(self.weekday.num_days_from_sunday())
            - i64::from(now_local.weekday().num_days_from_sunday())
            + 7)
            % 7;

        let today = now_local.date_naive();
        let candidate = self.resolve(today.and_time(self.time) + Duration::days(days_until));

        // Today already matches but the time has passed
        if candidate > now {
            candidate
        } else {
            self.resolve(today.and_time(self.time) + Duration::days(days_until + 7))
        }
    }

    /// Map a local wall-clock time to UTC. Ambiguous times take the earlier instant and
    /// times inside a DST gap move forward by an hour.
    fn resolve(&self, local: NaiveDateTime) -> DateTime<Utc> {
        self.tz
            .from_local_datetime(&local)
            .earliest()
            .or_else(|| {
                self.tz
                    .from_local_datetime(&(local + Duration::hours(1)))
                    .earliest()
            })
            .map_or_else(
                || Utc.from_utc_datetime(&local),
                |t| t.with_timezone(&Utc),
            )
    }
}

impl TryFrom<&schedule::Model> for ScheduleRule {
    type Error = AppError;

    fn try_from(model: &schedule::Model) -> AppResult<Self> {
        Self::new(model.weekday, model.hour, model.minute, &model.timezone)
    }
}

impl TryFrom<&ScheduleConfig> for ScheduleRule {
    type Error = AppError;

    fn try_from(config: &ScheduleConfig) -> AppResult<Self> {
        Self::new(config.weekday, config.hour, config.minute, &config.timezone)
    }
}

/// Next session slot as a unix timestamp, strictly greater than `now`.
///
/// Fails only when a field is out of range or the timezone is unknown.
pub fn next_occurrence(
    weekday: i16,
    hour: i16,
    minute: i16,
    timezone: &str,
    now: DateTime<Utc>,
) -> AppResult<i64> {
    Ok(ScheduleRule::new(weekday, hour, minute, timezone)?
        .next_occurrence(now)
        .timestamp())
}

/// Input for replacing the active schedule.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ScheduleInput {
    #[validate(range(min = 0, max = 6))]
    pub weekday: i16,
    #[validate(range(min = 0, max = 23))]
    pub hour: i16,
    #[validate(range(min = 0, max = 59))]
    pub minute: i16,
    #[validate(length(min = 1, max = 64))]
    pub timezone: String,
}

/// Schedule service.
#[derive(Clone)]
pub struct ScheduleService {
    uow: UnitOfWork,
    schedule_repo: ScheduleRepository,
    fallback: ScheduleConfig,
}

impl ScheduleService {
    /// Create a new schedule service.
    #[must_use]
    pub const fn new(uow: UnitOfWork, fallback: ScheduleConfig) -> Self {
        Self {
            uow,
            schedule_repo: ScheduleRepository::new(),
            fallback,
        }
    }

    /// The active schedule row, if one has been configured.
    pub async fn active_schedule(&self) -> AppResult<Option<schedule::Model>> {
        self.schedule_repo.find_active(self.uow.connection()).await
    }

    /// Replace the active schedule.
    ///
    /// The old row is deactivated and the new one inserted in one transaction.
    pub async fn replace_schedule(&self, input: ScheduleInput) -> AppResult<schedule::Model> {
        input.validate()?;
        ScheduleRule::new(input.weekday, input.hour, input.minute, &input.timezone)?;

        let txn = self.uow.begin().await?;
        let replaced = self.schedule_repo.deactivate_all(&txn).await?;
        let model = self
            .schedule_repo
            .create(
                &txn,
                schedule::ActiveModel {
                    weekday: Set(input.weekday),
                    hour: Set(input.hour),
                    minute: Set(input.minute),
                    timezone: Set(input.timezone),
                    is_active: Set(true),
                    created_at: Set(Utc::now().fixed_offset()),
                    ..Default::default()
                },
            )
            .await?;
        UnitOfWork::commit(txn).await?;

        info!(
            schedule_id = model.id,
            weekday = model.weekday,
            hour = model.hour,
            minute = model.minute,
            timezone = %model.timezone,
            replaced,
            "Replaced session schedule"
        );
        Ok(model)
    }

    /// The rule in effect: the active schedule row, or the configured fallback.
    pub async fn current_rule<C: ConnectionTrait>(&self, conn: &C) -> AppResult<ScheduleRule> {
        match self.schedule_repo.find_active(conn).await? {
            Some(model) => ScheduleRule::try_from(&model),
            None => ScheduleRule::try_from(&self.fallback),
        }
    }

    /// Deadline for a session created at `now`.
    pub async fn next_deadline<C: ConnectionTrait>(
        &self,
        conn: &C,
        now: DateTime<Utc>,
    ) -> AppResult<i64> {
        Ok(self.current_rule(conn).await?.next_occurrence(now).timestamp())
    }
}
