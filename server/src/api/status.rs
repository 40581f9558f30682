/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0.  If a copy of the MPL was not distributed with this
 * file, you can obtain one at https://mozilla.org/MPL/2.0/.
 */

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use clusteromat_types::config::HpcCluster;
use clusteromat_types::sched::{Node, Partition, Reservation};

use super::prelude::*;
use super::{mediate, SystemPath};
use crate::cmd::fs::{IdCommand, UserInfo};

#[derive(Serialize, JsonSchema)]
pub(crate) struct SystemsResponse {
    systems: Vec<HpcCluster>,
}

#[endpoint {
    method = GET,
    path = "/status/systems",
}]
pub(crate) async fn systems_get(
    rqctx: RequestContext<Arc<Central>>,
) -> DSResult<HttpResponseOk<SystemsResponse>> {
    let c = rqctx.context();

    let systems =
        c.clusters.iter().map(|cluster| cluster.record()).collect();
    Ok(HttpResponseOk(SystemsResponse { systems }))
}

#[derive(Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LivenessResponse {
    last_update: Option<DateTime<Utc>>,
    healthcheck_runs: HashMap<String, Option<DateTime<Utc>>>,
}

#[endpoint {
    method = GET,
    path = "/status/liveness",
}]
pub(crate) async fn liveness_get(
    rqctx: RequestContext<Arc<Central>>,
) -> DSResult<HttpResponseOk<LivenessResponse>> {
    let c = rqctx.context();

    let mut healthcheck_runs = HashMap::new();
    let mut last_update = None;
    for cluster in c.clusters.iter() {
        let newest = cluster
            .snapshot()
            .iter()
            .flat_map(|snapshot| snapshot.iter())
            .filter_map(|health| health.last_checked)
            .max();
        if newest > last_update {
            last_update = newest;
        }
        healthcheck_runs.insert(cluster.config.name.clone(), newest);
    }

    Ok(HttpResponseOk(LivenessResponse { last_update, healthcheck_runs }))
}

#[derive(Deserialize, JsonSchema)]
pub(crate) struct UserInfoQuery {
    system: String,
}

#[derive(Serialize, JsonSchema)]
pub(crate) struct UserInfoResponse {
    output: UserInfo,
}

#[endpoint {
    method = GET,
    path = "/status/userinfo",
}]
pub(crate) async fn userinfo_get(
    rqctx: RequestContext<Arc<Central>>,
    query: TypedQuery<UserInfoQuery>,
) -> DSResult<HttpResponseOk<UserInfoResponse>> {
    let log = &rqctx.log;
    let q = query.into_inner();

    let (cluster, user) =
        mediate(&rqctx, &q.system, ServiceType::Ssh).await?;

    let session =
        cluster.pool.acquire(&user.username, &user.token).await.or_http()?;
    let output = session.execute(log, &IdCommand, None).await.or_http()?;

    Ok(HttpResponseOk(UserInfoResponse { output }))
}

#[derive(Serialize, JsonSchema)]
pub(crate) struct NodesResponse {
    nodes: Vec<Node>,
}

#[endpoint {
    method = GET,
    path = "/status/systems/{system}/nodes",
}]
pub(crate) async fn nodes_get(
    rqctx: RequestContext<Arc<Central>>,
    path: TypedPath<SystemPath>,
) -> DSResult<HttpResponseOk<NodesResponse>> {
    let p = path.into_inner();
    let (cluster, user) =
        mediate(&rqctx, &p.system, ServiceType::Scheduler).await?;

    let nodes = cluster
        .scheduler
        .get_nodes(&user.username, &user.token)
        .await
        .or_http()?;
    Ok(HttpResponseOk(NodesResponse { nodes }))
}

#[derive(Serialize, JsonSchema)]
pub(crate) struct PartitionsResponse {
    partitions: Vec<Partition>,
}

#[endpoint {
    method = GET,
    path = "/status/systems/{system}/partitions",
}]
pub(crate) async fn partitions_get(
    rqctx: RequestContext<Arc<Central>>,
    path: TypedPath<SystemPath>,
) -> DSResult<HttpResponseOk<PartitionsResponse>> {
    let p = path.into_inner();
    let (cluster, user) =
        mediate(&rqctx, &p.system, ServiceType::Scheduler).await?;

    let partitions = cluster
        .scheduler
        .get_partitions(&user.username, &user.token)
        .await
        .or_http()?;
    Ok(HttpResponseOk(PartitionsResponse { partitions }))
}

#[derive(Serialize, JsonSchema)]
pub(crate) struct ReservationsResponse {
    reservations: Vec<Reservation>,
}

#[endpoint {
    method = GET,
    path = "/status/systems/{system}/reservations",
}]
pub(crate) async fn reservations_get(
    rqctx: RequestContext<Arc<Central>>,
    path: TypedPath<SystemPath>,
) -> DSResult<HttpResponseOk<ReservationsResponse>> {
    let p = path.into_inner();
    let (cluster, user) =
        mediate(&rqctx, &p.system, ServiceType::Scheduler).await?;

    let reservations = cluster
        .scheduler
        .get_reservations(&user.username, &user.token)
        .await
        .or_http()?;
    Ok(HttpResponseOk(ReservationsResponse { reservations }))
}
