/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0.  If a copy of the MPL was not distributed with this
 * file, you can obtain one at https://mozilla.org/MPL/2.0/.
 */

/*
 * Direct filesystem operations: each endpoint renders one command (or a
 * mutate-then-list chain) on the caller's pooled SSH session.  File
 * content above the ops size limit is refused here; bulk data belongs
 * to the transfer endpoints.
 */

use hyper::header::{CONTENT_LENGTH, CONTENT_TYPE};

use super::mediate;
use super::prelude::*;
use super::SystemPath;
use crate::cmd::fs::{
    Base64DecodeCommand, Base64EncodeCommand, ChecksumCommand, ChmodCommand,
    ChownCommand, FileChecksum, FileEntry, FileStat, FileTypeCommand,
    HeadCommand, LsCommand, MkdirCommand, RmCommand, StatCommand,
    SymlinkCommand, TailCommand, TarCommand, TarCompression, TarOperation,
    ViewCommand,
};

#[derive(Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LsQuery {
    path: String,
    #[serde(default)]
    show_hidden: bool,
    #[serde(default)]
    numeric_uid: bool,
    #[serde(default)]
    recursive: bool,
    #[serde(default)]
    dereference: bool,
}

#[derive(Serialize, JsonSchema)]
pub(crate) struct LsResponse {
    output: Vec<FileEntry>,
}

#[endpoint {
    method = GET,
    path = "/filesystem/{system}/ops/ls",
}]
pub(crate) async fn ops_ls(
    rqctx: RequestContext<Arc<Central>>,
    path: TypedPath<SystemPath>,
    query: TypedQuery<LsQuery>,
) -> DSResult<HttpResponseOk<LsResponse>> {
    let log = &rqctx.log;
    let p = path.into_inner();
    let q = query.into_inner();

    let (cluster, user) =
        mediate(&rqctx, &p.system, ServiceType::Filesystem).await?;

    let ls = LsCommand {
        path: q.path,
        show_hidden: q.show_hidden,
        numeric_uid: q.numeric_uid,
        recursive: q.recursive,
        dereference: q.dereference,
    };
    let session =
        cluster.pool.acquire(&user.username, &user.token).await.or_http()?;
    let output = session.execute(log, &ls, None).await.or_http()?;

    Ok(HttpResponseOk(LsResponse { output }))
}

#[derive(Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub(crate) struct FileContent {
    content: String,
    content_type: String,
    start_position: i64,
    end_position: i64,
}

#[derive(Serialize, JsonSchema)]
pub(crate) struct FileContentResponse {
    output: FileContent,
}

#[derive(Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub(crate) struct HeadQuery {
    path: String,
    #[serde(default)]
    bytes: Option<u64>,
    #[serde(default)]
    lines: Option<u64>,
    #[serde(default)]
    skip_trailing: bool,
}

#[endpoint {
    method = GET,
    path = "/filesystem/{system}/ops/head",
}]
pub(crate) async fn ops_head(
    rqctx: RequestContext<Arc<Central>>,
    path: TypedPath<SystemPath>,
    query: TypedQuery<HeadQuery>,
) -> DSResult<HttpResponseOk<FileContentResponse>> {
    let log = &rqctx.log;
    let p = path.into_inner();
    let q = query.into_inner();

    if q.bytes.is_some() && q.lines.is_some() {
        return Err(Error::BadRequest(
            "only one of bytes and lines can be specified".into(),
        )
        .into());
    }

    let (cluster, user) =
        mediate(&rqctx, &p.system, ServiceType::Filesystem).await?;

    let head = HeadCommand {
        path: q.path,
        bytes: q.bytes,
        lines: q.lines,
        skip_trailing: q.skip_trailing,
    };
    let session =
        cluster.pool.acquire(&user.username, &user.token).await.or_http()?;
    let content = session.execute(log, &head, None).await.or_http()?;

    /*
     * head defaults to the first ten lines.
     */
    let n = q.bytes.or(q.lines).unwrap_or(10) as i64;
    let end_position = if q.skip_trailing { -n } else { n };

    Ok(HttpResponseOk(FileContentResponse {
        output: FileContent {
            content,
            content_type: if q.bytes.is_some() { "bytes" } else { "lines" }
                .to_string(),
            start_position: 0,
            end_position,
        },
    }))
}

#[derive(Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TailQuery {
    path: String,
    #[serde(default)]
    bytes: Option<u64>,
    #[serde(default)]
    lines: Option<u64>,
    #[serde(default)]
    skip_heading: bool,
}

#[endpoint {
    method = GET,
    path = "/filesystem/{system}/ops/tail",
}]
pub(crate) async fn ops_tail(
    rqctx: RequestContext<Arc<Central>>,
    path: TypedPath<SystemPath>,
    query: TypedQuery<TailQuery>,
) -> DSResult<HttpResponseOk<FileContentResponse>> {
    let log = &rqctx.log;
    let p = path.into_inner();
    let q = query.into_inner();

    if q.bytes.is_some() && q.lines.is_some() {
        return Err(Error::BadRequest(
            "only one of bytes and lines can be specified".into(),
        )
        .into());
    }

    let (cluster, user) =
        mediate(&rqctx, &p.system, ServiceType::Filesystem).await?;

    let tail = TailCommand {
        path: q.path,
        bytes: q.bytes,
        lines: q.lines,
        skip_heading: q.skip_heading,
    };
    let session =
        cluster.pool.acquire(&user.username, &user.token).await.or_http()?;
    let content = session.execute(log, &tail, None).await.or_http()?;

    let n = q.bytes.or(q.lines).unwrap_or(10) as i64;
    let start_position = if q.skip_heading { n } else { -n };

    Ok(HttpResponseOk(FileContentResponse {
        output: FileContent {
            content,
            content_type: if q.bytes.is_some() { "bytes" } else { "lines" }
                .to_string(),
            start_position,
            end_position: -1,
        },
    }))
}

#[derive(Deserialize, JsonSchema)]
pub(crate) struct ViewQuery {
    path: String,
    #[serde(default)]
    size: Option<u64>,
    #[serde(default)]
    offset: Option<u64>,
}

#[derive(Serialize, JsonSchema)]
pub(crate) struct ViewResponse {
    output: String,
}

#[endpoint {
    method = GET,
    path = "/filesystem/{system}/ops/view",
}]
pub(crate) async fn ops_view(
    rqctx: RequestContext<Arc<Central>>,
    path: TypedPath<SystemPath>,
    query: TypedQuery<ViewQuery>,
) -> DSResult<HttpResponseOk<ViewResponse>> {
    let log = &rqctx.log;
    let p = path.into_inner();
    let q = query.into_inner();

    let c = rqctx.context();
    let max = c.max_ops_file_size();
    let size = q.size.unwrap_or(max);
    let offset = q.offset.unwrap_or(0);

    if size == 0 {
        return Err(Error::BadRequest(
            "size must be an integer greater than 0".into(),
        )
        .into());
    }
    if size > max {
        return Err(Error::BadRequest(format!(
            "size must be at most {} bytes",
            max,
        ))
        .into());
    }

    let (cluster, user) =
        mediate(&rqctx, &p.system, ServiceType::Filesystem).await?;

    let view = ViewCommand { path: q.path, size, offset };
    let session =
        cluster.pool.acquire(&user.username, &user.token).await.or_http()?;
    let output = session.execute(log, &view, None).await.or_http()?;

    Ok(HttpResponseOk(ViewResponse { output }))
}

#[derive(Deserialize, JsonSchema)]
pub(crate) struct PathQuery {
    path: String,
}

#[derive(Serialize, JsonSchema)]
pub(crate) struct ChecksumResponse {
    output: FileChecksum,
}

#[endpoint {
    method = GET,
    path = "/filesystem/{system}/ops/checksum",
}]
pub(crate) async fn ops_checksum(
    rqctx: RequestContext<Arc<Central>>,
    path: TypedPath<SystemPath>,
    query: TypedQuery<PathQuery>,
) -> DSResult<HttpResponseOk<ChecksumResponse>> {
    let log = &rqctx.log;
    let p = path.into_inner();
    let q = query.into_inner();

    let (cluster, user) =
        mediate(&rqctx, &p.system, ServiceType::Filesystem).await?;

    let checksum = ChecksumCommand { path: q.path };
    let session =
        cluster.pool.acquire(&user.username, &user.token).await.or_http()?;
    let output = session.execute(log, &checksum, None).await.or_http()?;

    Ok(HttpResponseOk(ChecksumResponse { output }))
}

#[derive(Serialize, JsonSchema)]
pub(crate) struct FileTypeResponse {
    output: String,
}

#[endpoint {
    method = GET,
    path = "/filesystem/{system}/ops/file",
}]
pub(crate) async fn ops_file(
    rqctx: RequestContext<Arc<Central>>,
    path: TypedPath<SystemPath>,
    query: TypedQuery<PathQuery>,
) -> DSResult<HttpResponseOk<FileTypeResponse>> {
    let log = &rqctx.log;
    let p = path.into_inner();
    let q = query.into_inner();

    let (cluster, user) =
        mediate(&rqctx, &p.system, ServiceType::Filesystem).await?;

    let file = FileTypeCommand { path: q.path };
    let session =
        cluster.pool.acquire(&user.username, &user.token).await.or_http()?;
    let output = session.execute(log, &file, None).await.or_http()?;

    Ok(HttpResponseOk(FileTypeResponse { output }))
}

#[derive(Deserialize, JsonSchema)]
pub(crate) struct StatQuery {
    path: String,
    #[serde(default)]
    dereference: bool,
}

#[derive(Serialize, JsonSchema)]
pub(crate) struct StatResponse {
    output: FileStat,
}

#[endpoint {
    method = GET,
    path = "/filesystem/{system}/ops/stat",
}]
pub(crate) async fn ops_stat(
    rqctx: RequestContext<Arc<Central>>,
    path: TypedPath<SystemPath>,
    query: TypedQuery<StatQuery>,
) -> DSResult<HttpResponseOk<StatResponse>> {
    let log = &rqctx.log;
    let p = path.into_inner();
    let q = query.into_inner();

    let (cluster, user) =
        mediate(&rqctx, &p.system, ServiceType::Filesystem).await?;

    let stat = StatCommand { path: q.path, dereference: q.dereference };
    let session =
        cluster.pool.acquire(&user.username, &user.token).await.or_http()?;
    let output = session.execute(log, &stat, None).await.or_http()?;

    Ok(HttpResponseOk(StatResponse { output }))
}

#[endpoint {
    method = DELETE,
    path = "/filesystem/{system}/ops/rm",
}]
pub(crate) async fn ops_rm(
    rqctx: RequestContext<Arc<Central>>,
    path: TypedPath<SystemPath>,
    query: TypedQuery<PathQuery>,
) -> DSResult<HttpResponseDeleted> {
    let log = &rqctx.log;
    let p = path.into_inner();
    let q = query.into_inner();

    let (cluster, user) =
        mediate(&rqctx, &p.system, ServiceType::Filesystem).await?;

    let rm = RmCommand { path: q.path };
    let session =
        cluster.pool.acquire(&user.username, &user.token).await.or_http()?;
    session.execute(log, &rm, None).await.or_http()?;

    Ok(HttpResponseDeleted())
}

#[derive(Deserialize, JsonSchema)]
pub(crate) struct MkdirRequest {
    path: String,
    #[serde(default)]
    parent: bool,
}

#[derive(Serialize, JsonSchema)]
pub(crate) struct FileEntryResponse {
    output: FileEntry,
}

#[endpoint {
    method = POST,
    path = "/filesystem/{system}/ops/mkdir",
}]
pub(crate) async fn ops_mkdir(
    rqctx: RequestContext<Arc<Central>>,
    path: TypedPath<SystemPath>,
    body: TypedBody<MkdirRequest>,
) -> DSResult<HttpResponseCreated<FileEntryResponse>> {
    let log = &rqctx.log;
    let p = path.into_inner();
    let b = body.into_inner();

    let (cluster, user) =
        mediate(&rqctx, &p.system, ServiceType::Filesystem).await?;

    let mkdir = MkdirCommand { path: b.path, parent: b.parent };
    let session =
        cluster.pool.acquire(&user.username, &user.token).await.or_http()?;
    let output = session.execute(log, &mkdir, None).await.or_http()?;

    Ok(HttpResponseCreated(FileEntryResponse { output }))
}

#[derive(Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SymlinkRequest {
    path: String,
    link_path: String,
}

#[endpoint {
    method = POST,
    path = "/filesystem/{system}/ops/symlink",
}]
pub(crate) async fn ops_symlink(
    rqctx: RequestContext<Arc<Central>>,
    path: TypedPath<SystemPath>,
    body: TypedBody<SymlinkRequest>,
) -> DSResult<HttpResponseCreated<FileEntryResponse>> {
    let log = &rqctx.log;
    let p = path.into_inner();
    let b = body.into_inner();

    let (cluster, user) =
        mediate(&rqctx, &p.system, ServiceType::Filesystem).await?;

    let symlink = SymlinkCommand { path: b.path, link_path: b.link_path };
    let session =
        cluster.pool.acquire(&user.username, &user.token).await.or_http()?;
    let output = session.execute(log, &symlink, None).await.or_http()?;

    Ok(HttpResponseCreated(FileEntryResponse { output }))
}

#[derive(Deserialize, JsonSchema)]
pub(crate) struct ChmodRequest {
    path: String,
    mode: String,
}

#[endpoint {
    method = PUT,
    path = "/filesystem/{system}/ops/chmod",
}]
pub(crate) async fn ops_chmod(
    rqctx: RequestContext<Arc<Central>>,
    path: TypedPath<SystemPath>,
    body: TypedBody<ChmodRequest>,
) -> DSResult<HttpResponseOk<FileEntryResponse>> {
    let log = &rqctx.log;
    let p = path.into_inner();
    let b = body.into_inner();

    let (cluster, user) =
        mediate(&rqctx, &p.system, ServiceType::Filesystem).await?;

    let chmod = ChmodCommand { path: b.path, mode: b.mode };
    let session =
        cluster.pool.acquire(&user.username, &user.token).await.or_http()?;
    let output = session.execute(log, &chmod, None).await.or_http()?;

    Ok(HttpResponseOk(FileEntryResponse { output }))
}

#[derive(Deserialize, JsonSchema)]
pub(crate) struct ChownRequest {
    path: String,
    owner: String,
    group: String,
}

#[endpoint {
    method = PUT,
    path = "/filesystem/{system}/ops/chown",
}]
pub(crate) async fn ops_chown(
    rqctx: RequestContext<Arc<Central>>,
    path: TypedPath<SystemPath>,
    body: TypedBody<ChownRequest>,
) -> DSResult<HttpResponseOk<FileEntryResponse>> {
    let log = &rqctx.log;
    let p = path.into_inner();
    let b = body.into_inner();

    let (cluster, user) =
        mediate(&rqctx, &p.system, ServiceType::Filesystem).await?;

    let chown =
        ChownCommand { path: b.path, owner: b.owner, group: b.group };
    let session =
        cluster.pool.acquire(&user.username, &user.token).await.or_http()?;
    let output = session.execute(log, &chown, None).await.or_http()?;

    Ok(HttpResponseOk(FileEntryResponse { output }))
}

#[endpoint {
    method = GET,
    path = "/filesystem/{system}/ops/download",
}]
pub(crate) async fn ops_download(
    rqctx: RequestContext<Arc<Central>>,
    path: TypedPath<SystemPath>,
    query: TypedQuery<PathQuery>,
) -> DSResult<Response<Body>> {
    let log = &rqctx.log;
    let c = rqctx.context();
    let p = path.into_inner();
    let q = query.into_inner();

    let (cluster, user) =
        mediate(&rqctx, &p.system, ServiceType::Filesystem).await?;

    let session =
        cluster.pool.acquire(&user.username, &user.token).await.or_http()?;

    /*
     * Content above the ops size limit must travel through a transfer
     * job; check before pulling anything over the channel.
     */
    let stat = StatCommand { path: q.path.clone(), dereference: true };
    let st = session.execute(log, &stat, None).await.or_http()?;
    let max = c.max_ops_file_size();
    if st.size > max {
        return Err(Error::PayloadTooLarge(format!(
            "file is {} bytes; the limit for direct download is {} bytes",
            st.size, max,
        ))
        .into());
    }

    let encode = Base64EncodeCommand { path: q.path };
    let encoded = session.execute(log, &encode, None).await.or_http()?;
    let data = base64::decode(encoded.as_bytes()).map_err(|e| {
        HttpError::for_internal_error(format!(
            "remote base64 output did not decode: {}",
            e,
        ))
    })?;

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, "application/octet-stream")
        .header(CONTENT_LENGTH, data.len())
        .body(data.into())?)
}

#[endpoint {
    method = POST,
    path = "/filesystem/{system}/ops/upload",
}]
pub(crate) async fn ops_upload(
    rqctx: RequestContext<Arc<Central>>,
    path: TypedPath<SystemPath>,
    query: TypedQuery<PathQuery>,
    body: UntypedBody,
) -> DSResult<HttpResponseUpdatedNoContent> {
    let log = &rqctx.log;
    let c = rqctx.context();
    let p = path.into_inner();
    let q = query.into_inner();

    let max = c.max_ops_file_size();
    if body.as_bytes().len() as u64 > max {
        return Err(Error::PayloadTooLarge(format!(
            "uploads through this endpoint are limited to {} bytes",
            max,
        ))
        .into());
    }

    let (cluster, user) =
        mediate(&rqctx, &p.system, ServiceType::Filesystem).await?;

    /*
     * The body goes over the channel base64-encoded on stdin, decoded
     * into place on the remote side.
     */
    let decode = Base64DecodeCommand { path: q.path };
    let encoded = base64::encode(body.as_bytes());
    let session =
        cluster.pool.acquire(&user.username, &user.token).await.or_http()?;
    session
        .execute(log, &decode, Some(encoded.as_bytes()))
        .await
        .or_http()?;

    Ok(HttpResponseUpdatedNoContent())
}

#[derive(Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CompressRequest {
    path: String,
    target_path: String,
    #[serde(default)]
    match_pattern: Option<String>,
    #[serde(default)]
    dereference: bool,
    #[serde(default = "default_compression")]
    compression: TarCompression,
}

fn default_compression() -> TarCompression {
    TarCompression::Gzip
}

#[endpoint {
    method = POST,
    path = "/filesystem/{system}/ops/compress",
}]
pub(crate) async fn ops_compress(
    rqctx: RequestContext<Arc<Central>>,
    path: TypedPath<SystemPath>,
    body: TypedBody<CompressRequest>,
) -> DSResult<HttpResponseUpdatedNoContent> {
    let log = &rqctx.log;
    let p = path.into_inner();
    let b = body.into_inner();

    let (cluster, user) =
        mediate(&rqctx, &p.system, ServiceType::Filesystem).await?;

    let tar = TarCommand {
        source_path: b.path,
        target_path: b.target_path,
        compression: b.compression,
        operation: TarOperation::Compress {
            match_pattern: b.match_pattern,
            dereference: b.dereference,
        },
    };
    let session =
        cluster.pool.acquire(&user.username, &user.token).await.or_http()?;
    session.execute(log, &tar, None).await.or_http()?;

    Ok(HttpResponseUpdatedNoContent())
}

#[derive(Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ExtractRequest {
    path: String,
    target_path: String,
    #[serde(default = "default_compression")]
    compression: TarCompression,
}

#[endpoint {
    method = POST,
    path = "/filesystem/{system}/ops/extract",
}]
pub(crate) async fn ops_extract(
    rqctx: RequestContext<Arc<Central>>,
    path: TypedPath<SystemPath>,
    body: TypedBody<ExtractRequest>,
) -> DSResult<HttpResponseUpdatedNoContent> {
    let log = &rqctx.log;
    let p = path.into_inner();
    let b = body.into_inner();

    let (cluster, user) =
        mediate(&rqctx, &p.system, ServiceType::Filesystem).await?;

    let tar = TarCommand {
        source_path: b.path,
        target_path: b.target_path,
        compression: b.compression,
        operation: TarOperation::Extract,
    };
    let session =
        cluster.pool.acquire(&user.username, &user.token).await.or_http()?;
    session.execute(log, &tar, None).await.or_http()?;

    Ok(HttpResponseUpdatedNoContent())
}
