/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0.  If a copy of the MPL was not distributed with this
 * file, you can obtain one at https://mozilla.org/MPL/2.0/.
 */

/*
 * Periodic health probing.  One task per cluster and one for storage run
 * their checks concurrently on a fixed cadence, each check bounded by
 * the probing timeout, and replace the relevant health snapshot in one
 * step.  Probe failures only ever flip the snapshot; they never escape
 * into request handlers.
 */

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
#[allow(unused_imports)]
use slog::{debug, error, info, o, warn, Logger};
use tokio::time::Instant;

use clusteromat_types::config::ServiceAccount;
use clusteromat_types::health::{ServiceHealth, ServiceType};

use crate::cmd::fs::TrueCommand;
use crate::sched::SchedulerClient;
use crate::{Central, ClusterHandle};

async fn run_check<F>(
    service_type: ServiceType,
    timeout: Duration,
    check: F,
) -> ServiceHealth
where
    F: std::future::Future<Output = crate::error::Result<()>>,
{
    let start = Instant::now();
    match tokio::time::timeout(timeout, check).await {
        Ok(Ok(())) => ServiceHealth::healthy(
            service_type,
            start.elapsed().as_secs_f64(),
        ),
        Ok(Err(e)) => ServiceHealth::unhealthy(service_type, &e.to_string()),
        Err(_) => ServiceHealth::unhealthy(
            service_type,
            &format!("health check timed out after {:?}", timeout),
        ),
    }
}

/**
 * The REST backend answers its own ping endpoint; the CLI backends run
 * their scheduler tools over SSH, so a trivial true on the login node
 * establishes the same reachability without a scheduler RPC.
 */
async fn scheduler_check(
    log: &Logger,
    cluster: &ClusterHandle,
    sa: &ServiceAccount,
) -> crate::error::Result<()> {
    match &cluster.scheduler {
        SchedulerClient::SlurmRest(_) => cluster
            .scheduler
            .ping(&sa.client_id, sa.secret.value())
            .await
            .map(|_| ()),
        SchedulerClient::SlurmCli(_) | SchedulerClient::PbsCli(_) => {
            let cmd = TrueCommand { directory: None };
            let session = cluster
                .pool
                .acquire(&sa.client_id, sa.secret.value())
                .await?;
            session.execute(log, &cmd, None).await
        }
    }
}

async fn filesystem_check(
    log: &Logger,
    cluster: &ClusterHandle,
    sa: &ServiceAccount,
    path: &str,
) -> crate::error::Result<()> {
    let cmd = TrueCommand { directory: Some(path.to_string()) };
    let session =
        cluster.pool.acquire(&sa.client_id, sa.secret.value()).await?;
    session.execute(log, &cmd, None).await
}

async fn ssh_check(
    cluster: &ClusterHandle,
    sa: &ServiceAccount,
) -> crate::error::Result<()> {
    cluster.pool.acquire(&sa.client_id, sa.secret.value()).await.map(|_| ())
}

/**
 * One probe cycle for one cluster: scheduler, every filesystem mount,
 * and SSH, all in parallel.
 */
pub async fn probe_cluster(log: &Logger, cluster: &ClusterHandle) {
    let timeout = Duration::from_secs(cluster.config.probing.timeout);

    let Some(sa) = cluster.config.service_account.as_ref() else {
        cluster.set_health(vec![ServiceHealth::unhealthy(
            ServiceType::Exception,
            "no service account configured for probing",
        )]);
        return;
    };

    type CheckFuture<'a> = std::pin::Pin<
        Box<dyn std::future::Future<Output = ServiceHealth> + Send + 'a>,
    >;

    let mut checks: Vec<CheckFuture> = Vec::new();
    checks.push(Box::pin(run_check(
        ServiceType::Scheduler,
        timeout,
        scheduler_check(log, cluster, sa),
    )));
    for fs in cluster.config.file_systems.iter() {
        let path = fs.path.clone();
        checks.push(Box::pin(async move {
            run_check(
                ServiceType::Filesystem,
                timeout,
                filesystem_check(log, cluster, sa, &path),
            )
            .await
            .with_path(&path)
        }));
    }
    checks.push(Box::pin(run_check(
        ServiceType::Ssh,
        timeout,
        ssh_check(cluster, sa),
    )));

    let results = join_all(checks).await;
    for r in results.iter().filter(|r| !r.healthy) {
        warn!(log, "health check failed";
            "system" => &cluster.config.name,
            "service" => r.service_type.to_string(),
            "message" => r.message.clone().unwrap_or_default());
    }
    cluster.set_health(results);
}

/**
 * One probe cycle for the storage backend.
 */
pub async fn probe_storage(log: &Logger, c: &Central) {
    let Some(storage) = c.config.storage.as_ref() else {
        return;
    };
    let Some(probing) = storage.probing.as_ref() else {
        return;
    };
    let Some(s3) = c.s3_private.as_ref() else {
        return;
    };
    let timeout = Duration::from_secs(probing.timeout);

    let result = run_check(ServiceType::S3, timeout, async {
        s3.list_buckets().send().await.map(|_| ()).map_err(|e| {
            crate::error::Error::Internal(format!("list buckets: {}", e))
        })
    })
    .await;

    if !result.healthy {
        warn!(log, "storage health check failed";
            "storage" => &storage.name,
            "message" => result.message.clone().unwrap_or_default());
    }
    c.set_storage_health(vec![result]);
}

/**
 * Forever-task probing one cluster at its configured interval.
 */
pub async fn cluster_probe_task(log: Logger, c: Arc<Central>, index: usize) {
    let cluster = Arc::clone(&c.clusters[index]);
    let mut interval = tokio::time::interval(Duration::from_secs(
        cluster.config.probing.interval,
    ));
    interval
        .set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        interval.tick().await;
        probe_cluster(&log, &cluster).await;
    }
}

/**
 * Forever-task probing the storage backend.
 */
pub async fn storage_probe_task(log: Logger, c: Arc<Central>) {
    let Some(interval_secs) = c
        .config
        .storage
        .as_ref()
        .and_then(|s| s.probing.as_ref())
        .map(|p| p.interval)
    else {
        /*
         * No storage probing configured; park forever so the supervisor
         * does not read this as a crash.
         */
        futures::future::pending::<()>().await;
        unreachable!();
    };

    let mut interval =
        tokio::time::interval(Duration::from_secs(interval_secs));
    interval
        .set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        interval.tick().await;
        probe_storage(&log, &c).await;
    }
}

/**
 * Forever-task sweeping idle SSH sessions out of every pool.
 */
pub async fn pool_prune_task(log: Logger, c: Arc<Central>) {
    let mut interval = tokio::time::interval(Duration::from_secs(5));
    interval
        .set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        interval.tick().await;
        for cluster in c.clusters.iter() {
            cluster.pool.prune().await;
        }
        debug!(log, "pruned SSH pools");
    }
}
