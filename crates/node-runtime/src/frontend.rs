//! # Interactive Front-End
//!
//! Reads one command per line:
//!
//! | Input    | Effect                                              |
//! |----------|-----------------------------------------------------|
//! | `mutual` | bid, hold the critical section for a while, release |
//! | `exit`   | stop reading                                        |
//! | anything | local event (clock tick)                            |
//!
//! A `mutual` command blocks the prompt until the section is released.

use crate::config::TimingConfig;
use ra_mutual_exclusion::{ExclusionService, MutexResult, PeerConnector};
use rand::Rng;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, info};

/// A parsed input line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Enter the critical section.
    Mutual,
    /// Quit.
    Exit,
    /// Anything else: a local event.
    Tick,
}

impl Command {
    /// Parse one input line. Surrounding whitespace is ignored.
    pub fn parse(line: &str) -> Self {
        match line.trim() {
            "mutual" => Command::Mutual,
            "exit" => Command::Exit,
            _ => Command::Tick,
        }
    }
}

/// Drives one peer's service from user input.
pub struct Frontend<C: PeerConnector> {
    service: ExclusionService<C>,
    timing: TimingConfig,
}

impl<C: PeerConnector> Frontend<C> {
    /// Create a front-end.
    pub fn new(service: ExclusionService<C>, timing: TimingConfig) -> Self {
        Self { service, timing }
    }

    /// Process lines until `exit` or end of input.
    pub async fn run<R>(&self, input: R) -> anyhow::Result<()>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = input.lines();
        loop {
            info!(
                lamport_time = self.service.status().clock,
                "Insert 'mutual' to enter the critical section, 'exit' to quit, \
                 or anything else to increment time"
            );

            let Some(line) = lines.next_line().await? else {
                info!("Input closed");
                break;
            };

            match Command::parse(&line) {
                Command::Exit => break,
                Command::Tick => {
                    let now = self.service.local_event();
                    debug!(lamport_time = now, "Local event");
                }
                Command::Mutual => {
                    self.mutual().await?;
                }
            }
        }
        Ok(())
    }

    /// Bid, hold the section for a random duration, release.
    ///
    /// Returns the number of deferred requests answered on release.
    pub async fn mutual(&self) -> MutexResult<usize> {
        let section = self.service.acquire().await?;

        let hold = self.hold_duration();
        info!(
            bid_timestamp = section.bid_timestamp(),
            hold_ms = hold.as_millis() as u64,
            "Inside critical section"
        );
        tokio::time::sleep(hold).await;

        section.release()
    }

    fn hold_duration(&self) -> Duration {
        let (min, max) = self.timing.critical_section_range();
        if min >= max {
            return min;
        }
        rand::thread_rng().gen_range(min..=max)
    }
}
