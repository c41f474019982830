//! Feed scheduler: daily dosing by valve pulse trains.
//!
//! At each configured feed time every valve in Auto starts a pulse train.
//! The countdown to the next feed is taken from the RTC once and then run
//! on the monotonic clock, so it keeps working if the RTC alarm is busy
//! with sampling.

use core::time::Duration;

use log::{info, warn};

use crate::app::ports::RealTimeClock;
use crate::config::TimeList;
use crate::time::{Deadline, Instant, TimeOfDay};

pub struct FeedScheduler {
    times: TimeList,
    next: Option<(TimeOfDay, Deadline)>,
    rtc_unset_logged: bool,
}

impl FeedScheduler {
    pub fn new(times: TimeList) -> Self {
        Self {
            times,
            next: None,
            rtc_unset_logged: false,
        }
    }

    /// Replace the feed times; the countdown restarts.
    pub fn set_times(&mut self, times: TimeList) {
        if times != self.times {
            self.times = times;
            self.next = None;
        }
    }

    /// Recompute the countdown on the next tick, e.g. after the wall clock
    /// was set.
    pub fn rearm(&mut self) {
        self.next = None;
    }

    /// Returns `true` on the tick a feed is due.
    pub fn tick(&mut self, now: Instant, rtc: &impl RealTimeClock) -> bool {
        match self.next {
            None => {
                self.arm(now, rtc);
                false
            }
            Some((at, deadline)) if deadline.is_elapsed(now) => {
                info!("Feed: {at} feed due");
                self.arm(now, rtc);
                true
            }
            Some(_) => false,
        }
    }

    fn arm(&mut self, now: Instant, rtc: &impl RealTimeClock) {
        let Some(tod) = rtc.time_of_day() else {
            if !self.rtc_unset_logged {
                warn!("Feed: RTC not set, feeds suspended");
                self.rtc_unset_logged = true;
            }
            return;
        };
        self.rtc_unset_logged = false;
        self.next = TimeOfDay::next_after(&self.times, tod)
            .map(|(at, wait)| (at, Deadline::after(now, wait)));
        if let Some((at, wait)) = self.next.map(|(at, d)| (at, d.remaining(now))) {
            info!("Feed: next feed at {at} (in {}s)", wait.as_secs());
        }
    }

    pub fn next_feed(&self) -> Option<TimeOfDay> {
        self.next.map(|(at, _)| at)
    }

    /// Time left until the next feed.
    pub fn countdown(&self, now: Instant) -> Option<Duration> {
        self.next.map(|(_, d)| d.remaining(now))
    }
}
