/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Timer driving the periodic rotation.
//!
//! At most one timer task is live at a time: starting a scheduler that is
//! already running cancels the previous task first, so a frequency change
//! never leaves two rotations ticking concurrently.

use std::time::Duration;

use crossbeam_channel::Sender;
use log::debug;
use tokio::task::JoinHandle;

use super::OpenTrigger;

pub struct RotationScheduler {
    task: Option<JoinHandle<()>>,
}

impl RotationScheduler {
    pub fn new() -> Self {
        Self { task: None }
    }

    /// Start (or restart) the rotation timer. The first tick fires one full
    /// period from now. Must be called from within a tokio runtime.
    pub fn start(&mut self, every: Duration, triggers: Sender<OpenTrigger>) {
        self.stop();
        debug!("Starting rotation timer every {}ms", every.as_millis());
        let task = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + every;
            let mut ticks = tokio::time::interval_at(start, every);
            loop {
                ticks.tick().await;
                if triggers.send(OpenTrigger::TimerTick).is_err() {
                    break;
                }
            }
        });
        self.task = Some(task);
    }

    /// Cancel the live timer, if any.
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            debug!("Rotation timer cancelled");
        }
    }

    pub fn is_running(&self) -> bool {
        self.task
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }
}

impl Default for RotationScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for RotationScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn settle() {
        // Let the spawned timer task observe the advanced clock.
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_arrive_once_per_period() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut timer = RotationScheduler::new();
        timer.start(Duration::from_secs(30), tx);

        settle().await;
        assert!(rx.try_recv().is_err());

        tokio::time::advance(Duration::from_secs(30)).await;
        settle().await;
        assert_eq!(rx.try_recv(), Ok(OpenTrigger::TimerTick));
        assert!(rx.try_recv().is_err());

        tokio::time::advance(Duration::from_secs(30)).await;
        settle().await;
        assert_eq!(rx.try_recv(), Ok(OpenTrigger::TimerTick));

        timer.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_cancels_previous_timer() {
        let (old_tx, old_rx) = crossbeam_channel::unbounded();
        let (new_tx, new_rx) = crossbeam_channel::unbounded();
        let mut timer = RotationScheduler::new();

        timer.start(Duration::from_secs(10), old_tx);
        settle().await;
        timer.start(Duration::from_secs(20), new_tx);
        settle().await;

        tokio::time::advance(Duration::from_secs(40)).await;
        settle().await;

        // The first timer was aborted before it ever ticked.
        assert!(old_rx.try_recv().is_err());
        assert!(new_rx.try_recv().is_ok());
        assert!(timer.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_ends_ticks() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut timer = RotationScheduler::new();
        timer.start(Duration::from_secs(5), tx);
        timer.stop();
        assert!(!timer.is_running());

        tokio::time::advance(Duration::from_secs(60)).await;
        settle().await;
        assert!(rx.try_recv().is_err());
    }
}
