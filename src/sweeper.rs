use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// Run `tick` every `every` until `shutdown` is notified.
///
/// The `Notified` future is registered once, before the first tick, so a
/// `notify_waiters` issued while `tick` is running is still observed.
pub(crate) fn spawn_periodic(
    name: &'static str,
    every: Duration,
    shutdown: Arc<Notify>,
    mut tick: impl FnMut() + Send + 'static,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let stopped = shutdown.notified();
        tokio::pin!(stopped);
        stopped.as_mut().enable();

        let mut interval = tokio::time::interval(every);
        loop {
            tokio::select! {
                biased;
                _ = &mut stopped => {
                    tracing::info!("{}: stopped", name);
                    return;
                }
                _ = interval.tick() => tick(),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_notify_during_tick_stops_loop() {
        let shutdown = Arc::new(Notify::new());
        let ticks = Arc::new(AtomicU32::new(0));

        let handle = spawn_periodic("test", Duration::from_secs(3600), shutdown.clone(), {
            let shutdown = shutdown.clone();
            let ticks = ticks.clone();
            move || {
                ticks.fetch_add(1, Ordering::SeqCst);
                shutdown.notify_waiters();
            }
        });

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("loop missed the shutdown signal")
            .unwrap();
        assert_eq!(ticks.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_notify_between_ticks_stops_loop() {
        let shutdown = Arc::new(Notify::new());
        let ticks = Arc::new(AtomicU32::new(0));
        let handle = spawn_periodic("test", Duration::from_millis(5), shutdown.clone(), {
            let ticks = ticks.clone();
            move || {
                ticks.fetch_add(1, Ordering::SeqCst);
            }
        });

        while ticks.load(Ordering::SeqCst) < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        shutdown.notify_waiters();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("loop missed the shutdown signal")
            .unwrap();
    }
}
