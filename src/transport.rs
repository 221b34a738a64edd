use std::fmt::{self, Display, Formatter};
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;

pub mod mqtt;

/// Broker link lifecycle. `Disconnected` is both the initial state of a
/// disabled deployment and the terminal state after shutdown.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl Display for LinkState {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            LinkState::Disconnected => f.write_str("disconnected"),
            LinkState::Connecting => f.write_str("connecting"),
            LinkState::Connected => f.write_str("connected"),
            LinkState::Reconnecting => f.write_str("reconnecting"),
        }
    }
}

/// Sleeps for a duration but aborts early if the shutdown token fires.
/// Returns `true` if shutdown occurred during the wait.
pub async fn sleep_with_shutdown(duration: Duration, shutdown: &CancellationToken) -> bool {
    tokio::select! {
        _ = shutdown.cancelled() => true,
        _ = sleep(duration) => false,
    }
}
