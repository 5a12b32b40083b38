//! Moderator-aware send interval.
//!
//! The interval is never set directly: it is recomputed from the moderator
//! status map after every observation and published through a
//! [`watch`](tokio::sync::watch) channel that the outbound queue samples.

use std::collections::BTreeMap;
use std::time::Duration;

use tokio::sync::watch;

use crate::bus::Subscription;
use crate::config::RateLimits;
use crate::event::Event;

/// Interval for a moderator status map. An empty map counts as moderated
/// everywhere.
pub fn interval_for(status: &BTreeMap<String, bool>, limits: &RateLimits) -> Duration {
    if status.values().all(|moderated| *moderated) {
        limits.fast
    } else {
        limits.slow
    }
}

/// Owner of the moderator status map.
#[derive(Debug)]
pub struct RateLimitPolicy {
    username: String,
    limits: RateLimits,
    status: BTreeMap<String, bool>,
}

impl RateLimitPolicy {
    pub fn new(username: &str, limits: RateLimits) -> Self {
        Self {
            username: username.to_lowercase(),
            limits,
            status: BTreeMap::new(),
        }
    }

    pub fn interval(&self) -> Duration {
        interval_for(&self.status, &self.limits)
    }

    pub fn status(&self) -> &BTreeMap<String, bool> {
        &self.status
    }

    /// Feed one event. Returns the recomputed interval if the event was
    /// relevant to our moderator status.
    ///
    /// `USERSTATE` counts as well: Twitch sends our JOIN before the
    /// USERSTATE that carries the moderator badge for that channel.
    pub fn observe(&mut self, event: &Event) -> Option<Duration> {
        match event {
            Event::Join { channel, is_self: true, userstate: Some(userstate), .. } => {
                self.status.insert(channel.clone(), userstate.moderator);
            }
            Event::UserState { channel, userstate } => {
                self.status.insert(channel.clone(), userstate.moderator);
            }
            Event::Mod { channel, username } if self.is_me(username) => {
                self.status.insert(channel.clone(), true);
            }
            Event::Unmod { channel, username } if self.is_me(username) => {
                self.status.insert(channel.clone(), false);
            }
            Event::Part { channel, is_self: true, .. } => {
                self.status.remove(channel);
            }
            _ => return None,
        }

        if let Some((channel, _)) = self.status.iter().find(|(_, moderated)| !**moderated) {
            tracing::debug!(channel = %channel, "Not moderated in channel");
        }
        let interval = self.interval();
        tracing::debug!(interval_ms = interval.as_millis() as u64, "Rate limit recomputed");
        Some(interval)
    }

    fn is_me(&self, username: &str) -> bool {
        username.eq_ignore_ascii_case(&self.username)
    }

    /// Consume `events`, publishing every recomputed interval to
    /// `interval_tx`. Ends when the bus or every interval reader is gone.
    pub async fn run(mut self, mut events: Subscription, interval_tx: watch::Sender<Duration>) {
        while let Some(envelope) = events.recv().await {
            if let Some(interval) = self.observe(&envelope.event) {
                interval_tx.send_if_modified(|current| {
                    let changed = *current != interval;
                    *current = interval;
                    changed
                });
            }
            if interval_tx.is_closed() {
                break;
            }
        }
    }
}
