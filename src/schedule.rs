use std::collections::HashMap;
use std::str::FromStr;

use chrono::{Datelike, Duration, NaiveTime, Utc, Weekday};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::model::{PollId, Timestamp};

/// One pending closure timer per poll. Firing timers send the poll id on
/// the trigger channel; scheduling an id again replaces its timer.
pub struct ClosureScheduler {
    triggers: mpsc::UnboundedSender<PollId>,
    timers: HashMap<PollId, JoinHandle<()>>,
}

impl ClosureScheduler {
    pub fn new() -> (ClosureScheduler, mpsc::UnboundedReceiver<PollId>) {
        let (triggers, receiver) = mpsc::unbounded_channel();
        let scheduler = ClosureScheduler {
            triggers,
            timers: HashMap::new(),
        };
        (scheduler, receiver)
    }

    pub fn schedule(&mut self, id: PollId, at: Timestamp) {
        self.cancel(id);
        let delay = (at - Utc::now()).to_std().unwrap_or_default();
        let triggers = self.triggers.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if triggers.send(id).is_err() {
                debug!("Closure trigger for poll {} dropped, manager is gone", id);
            }
        });
        self.timers.insert(id, handle);
    }

    /// Returns whether a timer was pending for `id`.
    pub fn cancel(&mut self, id: PollId) -> bool {
        match self.timers.remove(&id) {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn is_scheduled(&self, id: PollId) -> bool {
        self.timers.contains_key(&id)
    }
}

impl Drop for ClosureScheduler {
    fn drop(&mut self) {
        for (_, handle) in self.timers.drain() {
            handle.abort();
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct ParseScheduleError(pub String);

/// A weekly slot in UTC, written as `"mon 17:00"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeeklySchedule {
    pub weekday: Weekday,
    pub time: NaiveTime,
}

impl FromStr for WeeklySchedule {
    type Err = ParseScheduleError;

    fn from_str(s: &str) -> Result<WeeklySchedule, ParseScheduleError> {
        let invalid = || ParseScheduleError(s.to_owned());
        let (day, time) = s.trim().split_once(' ').ok_or_else(invalid)?;
        let weekday = day.parse::<Weekday>().map_err(|_| invalid())?;
        let time = NaiveTime::parse_from_str(time.trim(), "%H:%M").map_err(|_| invalid())?;
        Ok(WeeklySchedule { weekday, time })
    }
}

impl WeeklySchedule {
    /// First occurrence strictly after `now`.
    pub fn next_after(&self, now: Timestamp) -> Timestamp {
        let days_ahead = (7 + self.weekday.num_days_from_monday() as i64
            - now.weekday().num_days_from_monday() as i64) % 7;
        let candidate = (now.date_naive() + Duration::days(days_ahead))
            .and_time(self.time)
            .and_utc();
        if candidate > now {
            candidate
        } else {
            candidate + Duration::days(7)
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn parse_schedule() {
        let schedule: WeeklySchedule = "mon 17:00".parse().expect("should parse");
        assert_eq!(Weekday::Mon, schedule.weekday);
        assert_eq!(NaiveTime::from_hms_opt(17, 0, 0).unwrap(), schedule.time);

        assert!("someday 17:00".parse::<WeeklySchedule>().is_err());
        assert!("mon".parse::<WeeklySchedule>().is_err());
        assert!("mon 25:00".parse::<WeeklySchedule>().is_err());
    }

    #[test]
    fn next_occurrence() {
        let schedule: WeeklySchedule = "mon 17:00".parse().unwrap();

        // 2026-10-19 is a Monday.
        let before = Utc.with_ymd_and_hms(2026, 10, 19, 9, 0, 0).unwrap();
        assert_eq!(Utc.with_ymd_and_hms(2026, 10, 19, 17, 0, 0).unwrap(), schedule.next_after(before));

        let exactly = Utc.with_ymd_and_hms(2026, 10, 19, 17, 0, 0).unwrap();
        assert_eq!(Utc.with_ymd_and_hms(2026, 10, 26, 17, 0, 0).unwrap(), schedule.next_after(exactly));

        let wednesday = Utc.with_ymd_and_hms(2026, 10, 21, 8, 30, 0).unwrap();
        assert_eq!(Utc.with_ymd_and_hms(2026, 10, 26, 17, 0, 0).unwrap(), schedule.next_after(wednesday));
    }

    #[tokio::test(start_paused = true)]
    async fn timer_fires_once() {
        let (mut scheduler, mut triggers) = ClosureScheduler::new();
        scheduler.schedule(PollId(1), Utc::now() + Duration::minutes(10));

        assert_eq!(Some(PollId(1)), triggers.recv().await);
        assert!(triggers.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn rescheduling_replaces_timer() {
        let (mut scheduler, mut triggers) = ClosureScheduler::new();
        scheduler.schedule(PollId(1), Utc::now() + Duration::minutes(10));
        scheduler.schedule(PollId(1), Utc::now() + Duration::minutes(20));
        scheduler.schedule(PollId(2), Utc::now() + Duration::minutes(30));

        assert_eq!(Some(PollId(1)), triggers.recv().await);
        assert_eq!(Some(PollId(2)), triggers.recv().await);
        assert!(triggers.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_timer_never_fires() {
        let (mut scheduler, mut triggers) = ClosureScheduler::new();
        scheduler.schedule(PollId(1), Utc::now() + Duration::minutes(10));

        assert!(scheduler.cancel(PollId(1)));
        assert!(!scheduler.is_scheduled(PollId(1)));
        assert!(!scheduler.cancel(PollId(1)));

        tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
        assert!(triggers.try_recv().is_err());
    }
}
