use std::future::Future;
use std::time::Duration;

use diskherd_core::{DiskStatus, HerdError, Result};
use tokio::time::{Instant, sleep};

use crate::service::DiskService;

/// Poll at a fixed interval until `poll` yields a value, bounded by
/// `timeout`. This is the only suspension primitive; every status and
/// phase wait goes through it.
pub async fn poll_until<T, F, Fut>(
    operation: &str,
    interval: Duration,
    timeout: Duration,
    mut poll: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(value) = poll().await? {
            return Ok(value);
        }
        if Instant::now() >= deadline {
            return Err(HerdError::TimeoutExceeded {
                operation: operation.to_string(),
                timeout,
            });
        }
        sleep(interval).await;
    }
}

/// Poll until `condition` reports true, bounded by `timeout`.
pub async fn wait_until<F, Fut>(
    operation: &str,
    interval: Duration,
    timeout: Duration,
    mut condition: F,
) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    poll_until(operation, interval, timeout, || {
        let fut = condition();
        async move { Ok(fut.await?.then_some(())) }
    })
    .await
}

/// Wait for a disk to settle into `ok` after a create, move or attach.
pub async fn wait_for_disk_status<S>(
    service: &S,
    disk_id: &str,
    interval: Duration,
    timeout: Duration,
) -> Result<()>
where
    S: DiskService + ?Sized,
{
    let operation = format!("disk {disk_id} to report ok");
    wait_until(&operation, interval, timeout, || {
        let service = service;
        let disk_id = disk_id;
        async move {
            let disk = service.disk_lookup(disk_id).await?;
            Ok(disk.is_some_and(|d| d.status == DiskStatus::Ok))
        }
    })
    .await
}
