//! Background liveness and refresh tasks.

use crate::error::AppError;
use crate::session::Session;
use chrono::Duration;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info};

/// Message types for a scheduled task.
#[derive(Debug)]
pub enum TaskMessage {
    /// Run the task body now, outside the schedule.
    RunNow,
    /// Signal to stop the task.
    Stop,
}

/// A periodic task that can be triggered early or cancelled.
pub struct ScheduledTask {
    name: &'static str,
    command_tx: mpsc::Sender<TaskMessage>,
    handle: Option<JoinHandle<()>>,
}

impl ScheduledTask {
    /// Spawn `tick` every `period`. The first run happens one period after start.
    ///
    /// The task ends when `tick` resolves to `false`.
    pub fn spawn<F, Fut>(name: &'static str, period: std::time::Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        let (command_tx, mut rx) = mpsc::channel::<TaskMessage>(10);

        let handle = tokio::spawn(async move {
            info!("{} task scheduled every {:?}", name, period);

            let mut interval = time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // Skip the first immediate tick
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        debug!("{} tick", name);
                        if !tick().await {
                            info!("{} task finished", name);
                            break;
                        }
                    }
                    msg = rx.recv() => {
                        match msg {
                            Some(TaskMessage::RunNow) => {
                                debug!("{} run requested", name);
                                if !tick().await {
                                    info!("{} task finished", name);
                                    break;
                                }
                            }
                            Some(TaskMessage::Stop) | None => {
                                info!("{} task stopped", name);
                                break;
                            }
                        }
                    }
                }
            }
        });

        Self {
            name,
            command_tx,
            handle: Some(handle),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Request an immediate run.
    pub async fn run_now(&self) -> Result<(), AppError> {
        self.command_tx
            .send(TaskMessage::RunNow)
            .await
            .map_err(|_| AppError::TaskStopped(self.name.to_string()))
    }

    /// Check if the task loop is still alive.
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop the task and wait for the loop to exit.
    pub async fn stop(mut self) {
        let _ = self.command_tx.send(TaskMessage::Stop).await;
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

/// The two session background tasks.
pub struct BackgroundTasks {
    liveness: ScheduledTask,
    refresh: ScheduledTask,
}

impl BackgroundTasks {
    /// Start the liveness check and the refresh trigger for `session`.
    ///
    /// Each task ends on its first tick after the session ends.
    pub fn start(session: Arc<Session>) -> Self {
        let liveness_period = session.config().liveness_interval();
        let refresh_period = session.config().refresh_interval();

        let liveness_session = Arc::clone(&session);
        let liveness = ScheduledTask::spawn("Liveness check", liveness_period, move || {
            let session = Arc::clone(&liveness_session);
            async move { session.check_liveness() }
        });

        let refresh = ScheduledTask::spawn("Token refresh", refresh_period, move || {
            let session = Arc::clone(&session);
            async move { session.refresh().await.is_some() }
        });

        Self { liveness, refresh }
    }

    /// Request an immediate token refresh.
    pub async fn refresh_now(&self) -> Result<(), AppError> {
        self.refresh.run_now().await
    }

    /// Both tasks are still scheduled.
    pub fn is_running(&self) -> bool {
        self.liveness.is_running() && self.refresh.is_running()
    }

    /// At least one task is still scheduled.
    pub fn any_running(&self) -> bool {
        self.liveness.is_running() || self.refresh.is_running()
    }

    /// Cancel both tasks.
    pub async fn stop(self) {
        let Self { liveness, refresh } = self;
        tokio::join!(liveness.stop(), refresh.stop());
        info!("Background tasks stopped");
    }
}

/// Format duration as human-readable string (e.g., "45 min", "1 hour").
pub fn format_duration(duration: Duration) -> String {
    let total_minutes = duration.num_minutes();

    if total_minutes < 1 {
        "< 1 min".to_string()
    } else if total_minutes < 60 {
        format!("{} min", total_minutes)
    } else {
        let hours = total_minutes / 60;
        let mins = total_minutes % 60;
        if mins == 0 {
            format!("{} hour{}", hours, if hours == 1 { "" } else { "s" })
        } else {
            format!("{}h {}m", hours, mins)
        }
    }
}
