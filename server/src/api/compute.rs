/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0.  If a copy of the MPL was not distributed with this
 * file, you can obtain one at https://mozilla.org/MPL/2.0/.
 */

use std::time::Duration;

use dropshot::{channel, WebsocketChannelResult, WebsocketConnection};
use futures::{SinkExt, StreamExt};
use russh::ChannelMsg;
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use clusteromat_types::sched::{Job, JobDescription, JobMetadata};

use super::prelude::*;
use super::mediate;

#[derive(Deserialize, JsonSchema)]
pub(crate) struct JobsPath {
    system: String,
}

#[derive(Deserialize, JsonSchema)]
pub(crate) struct JobPath {
    system: String,
    job_id: String,
}

impl JobPath {
    fn job_id(&self) -> crate::error::Result<&str> {
        if self.job_id.is_empty()
            || !self.job_id.chars().all(|c| c.is_ascii_alphanumeric())
        {
            return Err(Error::BadRequest(format!(
                "invalid job id {:?}",
                self.job_id,
            )));
        }
        Ok(&self.job_id)
    }
}

#[derive(Deserialize, JsonSchema)]
pub(crate) struct JobSubmitRequest {
    job: JobDescription,
}

#[derive(Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub(crate) struct JobSubmitResponse {
    job_id: u64,
}

#[endpoint {
    method = POST,
    path = "/compute/{system}/jobs",
}]
pub(crate) async fn job_submit(
    rqctx: RequestContext<Arc<Central>>,
    path: TypedPath<JobsPath>,
    body: TypedBody<JobSubmitRequest>,
) -> DSResult<HttpResponseCreated<JobSubmitResponse>> {
    let log = &rqctx.log;
    let p = path.into_inner();
    let b = body.into_inner();

    let (cluster, user) =
        mediate(&rqctx, &p.system, ServiceType::Scheduler).await?;

    let job_id = cluster
        .scheduler
        .submit_job(&b.job, &user.username, &user.token)
        .await
        .or_http()?;
    info!(log, "job submitted"; "user" => &user.username,
        "system" => &p.system, "job_id" => job_id);

    Ok(HttpResponseCreated(JobSubmitResponse { job_id }))
}

#[derive(Deserialize, JsonSchema)]
pub(crate) struct JobsQuery {
    #[serde(default)]
    allusers: bool,
}

#[derive(Serialize, JsonSchema)]
pub(crate) struct JobsResponse {
    jobs: Vec<Job>,
}

#[endpoint {
    method = GET,
    path = "/compute/{system}/jobs",
}]
pub(crate) async fn jobs_get(
    rqctx: RequestContext<Arc<Central>>,
    path: TypedPath<JobsPath>,
    query: TypedQuery<JobsQuery>,
) -> DSResult<HttpResponseOk<JobsResponse>> {
    let p = path.into_inner();
    let q = query.into_inner();

    let (cluster, user) =
        mediate(&rqctx, &p.system, ServiceType::Scheduler).await?;

    let jobs = cluster
        .scheduler
        .get_jobs(&user.username, &user.token, q.allusers)
        .await
        .or_http()?;
    Ok(HttpResponseOk(JobsResponse { jobs }))
}

#[endpoint {
    method = GET,
    path = "/compute/{system}/jobs/{job_id}",
}]
pub(crate) async fn job_get(
    rqctx: RequestContext<Arc<Central>>,
    path: TypedPath<JobPath>,
) -> DSResult<HttpResponseOk<JobsResponse>> {
    let p = path.into_inner();
    let (cluster, user) =
        mediate(&rqctx, &p.system, ServiceType::Scheduler).await?;

    let jobs = cluster
        .scheduler
        .get_job(p.job_id().or_http()?, &user.username, &user.token)
        .await
        .or_http()?;
    if jobs.is_empty() {
        return Err(Error::NotFound("job not found".into()).into());
    }
    Ok(HttpResponseOk(JobsResponse { jobs }))
}

#[derive(Serialize, JsonSchema)]
pub(crate) struct JobMetadataResponse {
    jobs: Vec<JobMetadata>,
}

#[endpoint {
    method = GET,
    path = "/compute/{system}/jobs/{job_id}/metadata",
}]
pub(crate) async fn job_metadata_get(
    rqctx: RequestContext<Arc<Central>>,
    path: TypedPath<JobPath>,
) -> DSResult<HttpResponseOk<JobMetadataResponse>> {
    let p = path.into_inner();
    let (cluster, user) =
        mediate(&rqctx, &p.system, ServiceType::Scheduler).await?;

    let jobs = cluster
        .scheduler
        .get_job_metadata(p.job_id().or_http()?, &user.username, &user.token)
        .await
        .or_http()?;
    if jobs.is_empty() {
        return Err(Error::NotFound("job not found".into()).into());
    }
    Ok(HttpResponseOk(JobMetadataResponse { jobs }))
}

#[endpoint {
    method = DELETE,
    path = "/compute/{system}/jobs/{job_id}",
}]
pub(crate) async fn job_cancel(
    rqctx: RequestContext<Arc<Central>>,
    path: TypedPath<JobPath>,
) -> DSResult<HttpResponseDeleted> {
    let log = &rqctx.log;
    let p = path.into_inner();
    let (cluster, user) =
        mediate(&rqctx, &p.system, ServiceType::Scheduler).await?;

    cluster
        .scheduler
        .cancel_job(p.job_id().or_http()?, &user.username, &user.token)
        .await
        .or_http()?;
    info!(log, "job cancelled"; "user" => &user.username,
        "system" => &p.system, "job_id" => &p.job_id);

    Ok(HttpResponseDeleted())
}

#[derive(Deserialize, JsonSchema)]
pub(crate) struct AttachQuery {
    entrypoint: String,
    token: String,
}

/**
 * Interactive attach: a websocket bridged to a long-lived process on the
 * user's SSH session.  Text frames flow to the remote stdin; remote
 * stdout and stderr come back as text frames; a keep-alive tick stamps
 * the pooled session so the pruner leaves it alone for the duration.
 */
#[channel {
    protocol = WEBSOCKETS,
    path = "/compute/{system}/jobs/{job_id}/attach",
}]
pub(crate) async fn job_attach(
    rqctx: RequestContext<Arc<Central>>,
    path: TypedPath<JobPath>,
    query: TypedQuery<AttachQuery>,
    upgraded: WebsocketConnection,
) -> WebsocketChannelResult {
    let log = rqctx.log.clone();
    let c = rqctx.context();
    let p = path.into_inner();
    let q = query.into_inner();

    /*
     * Browsers cannot set an Authorization header on websocket upgrade
     * requests, so the token arrives as a query parameter here.
     */
    let cluster = c.cluster(&p.system)?;
    cluster.require_service(ServiceType::Scheduler)?;
    let user = c.user_from_token(&q.token)?;

    /*
     * Job id 0 attaches to a plain login shell command rather than a
     * running allocation.
     */
    let job_id = match p.job_id()? {
        "0" => None,
        id => Some(id.to_string()),
    };

    let command =
        cluster.scheduler.attach_command(job_id.as_deref(), &q.entrypoint)?;

    let mut ws = WebSocketStream::from_raw_socket(
        upgraded.into_inner(),
        Role::Server,
        None,
    )
    .await;

    let session = cluster.pool.acquire(&user.username, &user.token).await?;
    let mut channel = session.open_attached(&command).await?;

    info!(log, "attach started"; "user" => &user.username,
        "system" => &p.system, "job_id" => &p.job_id);

    let mut keepalive = tokio::time::interval(Duration::from_secs(5));
    keepalive.tick().await;

    loop {
        tokio::select! {
            msg = channel.wait() => match msg {
                Some(ChannelMsg::Data { data })
                | Some(ChannelMsg::ExtendedData { data, ext: 1 }) => {
                    let text = String::from_utf8_lossy(&data).into_owned();
                    if ws.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Some(ChannelMsg::ExitStatus { exit_status }) => {
                    debug!(log, "attached process exited";
                        "exit_status" => exit_status);
                }
                Some(ChannelMsg::Close) | Some(ChannelMsg::Eof) | None => {
                    break;
                }
                Some(_) => (),
            },
            frame = ws.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if channel.data(text.as_bytes()).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Binary(data))) => {
                    if channel.data(&data[..]).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => (),
            },
            _ = keepalive.tick() => {
                session.touch();
            },
        }
    }

    /*
     * Whichever side finished first, make sure the remote process does
     * not outlive the bridge.
     */
    let _ = channel.signal(russh::Sig::INT).await;
    let _ = channel.close().await;
    let _ = ws.close(None).await;
    info!(log, "attach finished"; "user" => &user.username,
        "job_id" => &p.job_id);

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn job_id_validation() {
        let ok = JobPath { system: "cA".into(), job_id: "12345".into() };
        assert_eq!(ok.job_id().unwrap(), "12345");

        for bad in ["", "12 45", "12345;rm", "../etc", "12345\n"] {
            let p = JobPath { system: "cA".into(), job_id: bad.into() };
            assert!(p.job_id().is_err(), "job id {:?}", bad);
        }
    }
}
