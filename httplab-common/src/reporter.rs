use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Call `tick` every `interval` until `token` is cancelled, passing the time
/// since the reporter started. The reporter only reads shared state; it owns
/// nothing the workers depend on.
pub async fn run_periodic<F>(interval: Duration, token: CancellationToken, mut tick: F)
where
    F: FnMut(Duration),
{
    let started = Instant::now();
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await; // consume the immediate first tick
    loop {
        tokio::select! {
            _ = token.cancelled() => return,
            _ = ticker.tick() => tick(started.elapsed()),
        }
    }
}
