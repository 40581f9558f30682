/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0.  If a copy of the MPL was not distributed with this
 * file, you can obtain one at https://mozilla.org/MPL/2.0/.
 */

/*
 * Transfer staging endpoints: everything here turns into a scheduler job
 * plus method-specific directives for the client; no file bytes ever
 * cross the gateway.
 */

use clusteromat_types::transfer::{
    TransferDirectives, TransferJob, TransferOperation,
};

use super::mediate;
use super::prelude::*;
use super::SystemPath;
use crate::transfer::{self, s3, streamer, wormhole};

#[derive(Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TransferRequest {
    path: String,
    #[serde(default)]
    account: Option<String>,
    transfer_directives: TransferDirectives,
}

#[endpoint {
    method = POST,
    path = "/filesystem/{system}/transfer/upload",
}]
pub(crate) async fn transfer_upload(
    rqctx: RequestContext<Arc<Central>>,
    path: TypedPath<SystemPath>,
    body: TypedBody<TransferRequest>,
) -> DSResult<HttpResponseCreated<TransferOperation>> {
    let log = &rqctx.log;
    let c = rqctx.context();
    let p = path.into_inner();
    let b = body.into_inner();

    let (cluster, user) =
        mediate(&rqctx, &p.system, ServiceType::Filesystem).await?;
    let env = c.transfer_env(log, &cluster).or_http()?;
    let account = b.account.as_deref();

    let op = match &b.transfer_directives {
        TransferDirectives::S3 { file_size, .. } => {
            c.require_storage_healthy().or_http()?;
            let Some(file_size) = file_size else {
                return Err(Error::BadRequest(
                    "s3 uploads require a fileSize in the transfer \
                    directives"
                        .into(),
                )
                .into());
            };
            s3::upload(
                &env,
                &user.username,
                &user.token,
                account,
                &b.path,
                *file_size,
            )
            .await
            .or_http()?
        }
        TransferDirectives::Wormhole { wormhole_code } => {
            wormhole::upload(
                &env,
                &user.username,
                &user.token,
                account,
                &b.path,
                wormhole_code.as_deref(),
            )
            .await
            .or_http()?
        }
        TransferDirectives::Streamer { .. } => {
            streamer::upload(
                &env,
                &user.username,
                &user.token,
                account,
                &b.path,
            )
            .await
            .or_http()?
        }
    };

    Ok(HttpResponseCreated(op))
}

#[endpoint {
    method = POST,
    path = "/filesystem/{system}/transfer/download",
}]
pub(crate) async fn transfer_download(
    rqctx: RequestContext<Arc<Central>>,
    path: TypedPath<SystemPath>,
    body: TypedBody<TransferRequest>,
) -> DSResult<HttpResponseCreated<TransferOperation>> {
    let log = &rqctx.log;
    let c = rqctx.context();
    let p = path.into_inner();
    let b = body.into_inner();

    let (cluster, user) =
        mediate(&rqctx, &p.system, ServiceType::Filesystem).await?;
    let env = c.transfer_env(log, &cluster).or_http()?;
    let account = b.account.as_deref();

    let op = match &b.transfer_directives {
        TransferDirectives::S3 { .. } => {
            c.require_storage_healthy().or_http()?;
            s3::download(&env, &user.username, &user.token, account, &b.path)
                .await
                .or_http()?
        }
        TransferDirectives::Wormhole { .. } => {
            wormhole::download(
                &env,
                &user.username,
                &user.token,
                account,
                &b.path,
            )
            .await
            .or_http()?
        }
        TransferDirectives::Streamer { .. } => {
            streamer::download(
                &env,
                &user.username,
                &user.token,
                account,
                &b.path,
            )
            .await
            .or_http()?
        }
    };

    Ok(HttpResponseCreated(op))
}

#[derive(Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SourceTargetRequest {
    path: String,
    target_path: String,
    #[serde(default)]
    account: Option<String>,
}

#[derive(Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TransferJobResponse {
    transfer_job: TransferJob,
}

#[endpoint {
    method = POST,
    path = "/filesystem/{system}/transfer/cp",
}]
pub(crate) async fn transfer_cp(
    rqctx: RequestContext<Arc<Central>>,
    path: TypedPath<SystemPath>,
    body: TypedBody<SourceTargetRequest>,
) -> DSResult<HttpResponseCreated<TransferJobResponse>> {
    let log = &rqctx.log;
    let c = rqctx.context();
    let p = path.into_inner();
    let b = body.into_inner();

    let (cluster, user) =
        mediate(&rqctx, &p.system, ServiceType::Filesystem).await?;
    let env = c.transfer_env(log, &cluster).or_http()?;

    let transfer_job = transfer::copy_job(
        &env,
        &user.username,
        &user.token,
        b.account.as_deref(),
        &b.path,
        &b.target_path,
    )
    .await
    .or_http()?;

    Ok(HttpResponseCreated(TransferJobResponse { transfer_job }))
}

#[endpoint {
    method = POST,
    path = "/filesystem/{system}/transfer/mv",
}]
pub(crate) async fn transfer_mv(
    rqctx: RequestContext<Arc<Central>>,
    path: TypedPath<SystemPath>,
    body: TypedBody<SourceTargetRequest>,
) -> DSResult<HttpResponseCreated<TransferJobResponse>> {
    let log = &rqctx.log;
    let c = rqctx.context();
    let p = path.into_inner();
    let b = body.into_inner();

    let (cluster, user) =
        mediate(&rqctx, &p.system, ServiceType::Filesystem).await?;
    let env = c.transfer_env(log, &cluster).or_http()?;

    let transfer_job = transfer::move_job(
        &env,
        &user.username,
        &user.token,
        b.account.as_deref(),
        &b.path,
        &b.target_path,
    )
    .await
    .or_http()?;

    Ok(HttpResponseCreated(TransferJobResponse { transfer_job }))
}

#[derive(Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TransferRmQuery {
    path: String,
    #[serde(default)]
    account: Option<String>,
}

#[endpoint {
    method = DELETE,
    path = "/filesystem/{system}/transfer/rm",
}]
pub(crate) async fn transfer_rm(
    rqctx: RequestContext<Arc<Central>>,
    path: TypedPath<SystemPath>,
    query: TypedQuery<TransferRmQuery>,
) -> DSResult<HttpResponseOk<TransferJobResponse>> {
    let log = &rqctx.log;
    let c = rqctx.context();
    let p = path.into_inner();
    let q = query.into_inner();

    let (cluster, user) =
        mediate(&rqctx, &p.system, ServiceType::Filesystem).await?;
    let env = c.transfer_env(log, &cluster).or_http()?;

    let transfer_job = transfer::delete_job(
        &env,
        &user.username,
        &user.token,
        q.account.as_deref(),
        &q.path,
    )
    .await
    .or_http()?;

    Ok(HttpResponseOk(TransferJobResponse { transfer_job }))
}

#[derive(Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TransferCompressRequest {
    path: String,
    target_path: String,
    #[serde(default)]
    match_pattern: Option<String>,
    #[serde(default)]
    dereference: bool,
    #[serde(default)]
    account: Option<String>,
}

#[endpoint {
    method = POST,
    path = "/filesystem/{system}/transfer/compress",
}]
pub(crate) async fn transfer_compress(
    rqctx: RequestContext<Arc<Central>>,
    path: TypedPath<SystemPath>,
    body: TypedBody<TransferCompressRequest>,
) -> DSResult<HttpResponseCreated<TransferJobResponse>> {
    let log = &rqctx.log;
    let c = rqctx.context();
    let p = path.into_inner();
    let b = body.into_inner();

    let (cluster, user) =
        mediate(&rqctx, &p.system, ServiceType::Filesystem).await?;
    let env = c.transfer_env(log, &cluster).or_http()?;

    let transfer_job = transfer::compress_job(
        &env,
        &user.username,
        &user.token,
        b.account.as_deref(),
        &b.path,
        &b.target_path,
        b.match_pattern.as_deref(),
        b.dereference,
    )
    .await
    .or_http()?;

    Ok(HttpResponseCreated(TransferJobResponse { transfer_job }))
}

#[endpoint {
    method = POST,
    path = "/filesystem/{system}/transfer/extract",
}]
pub(crate) async fn transfer_extract(
    rqctx: RequestContext<Arc<Central>>,
    path: TypedPath<SystemPath>,
    body: TypedBody<SourceTargetRequest>,
) -> DSResult<HttpResponseCreated<TransferJobResponse>> {
    let log = &rqctx.log;
    let c = rqctx.context();
    let p = path.into_inner();
    let b = body.into_inner();

    let (cluster, user) =
        mediate(&rqctx, &p.system, ServiceType::Filesystem).await?;
    let env = c.transfer_env(log, &cluster).or_http()?;

    let transfer_job = transfer::extract_job(
        &env,
        &user.username,
        &user.token,
        b.account.as_deref(),
        &b.path,
        &b.target_path,
    )
    .await
    .or_http()?;

    Ok(HttpResponseCreated(TransferJobResponse { transfer_job }))
}
