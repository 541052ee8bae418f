//! Exponential-backoff reconnection for the server connection.
//!
//! When the connection drops unexpectedly, the connection manager runs
//! [`reconnect_loop`], which waits, retries, and grows the delay until a
//! connection succeeds, the attempts run out, or the
//! [`CancellationToken`] is triggered.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::ReconnectConfig;
use crate::connection::ConnectionManager;

/// How a reconnect loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectOutcome {
    Reconnected { attempts: u32 },
    Exhausted { attempts: u32 },
    Cancelled,
}

/// Calculate the next backoff delay from the current delay and config.
///
/// The result is clamped to [`ReconnectConfig::max_delay`].
pub fn next_delay(current: Duration, config: &ReconnectConfig) -> Duration {
    let next_ms = (current.as_millis() as f64 * config.multiplier) as u64;
    Duration::from_millis(next_ms).min(config.max_delay)
}

/// Retry the connection with exponential backoff.
///
/// Each attempt waits first, then connects. Gives up after
/// `config.max_attempts` failures.
pub async fn reconnect_loop(
    manager: &ConnectionManager,
    config: &ReconnectConfig,
    cancel: &CancellationToken,
) -> ReconnectOutcome {
    let mut delay = config.initial_delay.min(config.max_delay);

    for attempt in 1..=config.max_attempts {
        tracing::info!(
            attempt,
            delay_ms = delay.as_millis() as u64,
            "Reconnecting to server",
        );

        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Reconnect cancelled");
                return ReconnectOutcome::Cancelled;
            }
            _ = tokio::time::sleep(delay) => {}
        }

        tokio::select! {
            _ = cancel.cancelled() => return ReconnectOutcome::Cancelled,
            result = manager.open() => match result {
                Ok(()) => {
                    tracing::info!(attempt, "Reconnected to server");
                    return ReconnectOutcome::Reconnected { attempts: attempt };
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Reconnect attempt {attempt} failed");
                }
            }
        }

        delay = next_delay(delay, config);
    }

    ReconnectOutcome::Exhausted {
        attempts: config.max_attempts,
    }
}
