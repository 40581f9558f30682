/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0.  If a copy of the MPL was not distributed with this
 * file, you can obtain one at https://mozilla.org/MPL/2.0/.
 */

/*
 * The S3 staging method.  Uploads hand the caller presigned multipart
 * URLs against the public endpoint while a scheduler job pulls the
 * staged object down over the private endpoint; downloads run the same
 * machinery in reverse.
 */

use std::time::{Duration, SystemTime};

use aws_sdk_s3::operation::create_bucket::CreateBucketError;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::types::{
    BucketLifecycleConfiguration, ExpirationStatus, LifecycleExpiration,
    LifecycleRule, LifecycleRuleFilter,
};
use aws_sigv4::http_request::{
    sign, SignableBody, SignableRequest, SignatureLocation, SigningSettings,
};
use aws_sigv4::SigningParams;
use rusty_ulid::Ulid;
#[allow(unused_imports)]
use slog::{debug, error, info, o, warn, Logger};

use clusteromat_types::transfer::{TransferDirectives, TransferOperation};

use crate::cmd::fs::StatCommand;
use crate::error::{Error, Result};
use crate::transfer::{
    format_directives, render_template, JobScaffold, TransferEnv,
};

/**
 * ceil(size / max_part_size): the number of multipart upload parts, and
 * so the number of presigned part URLs to mint.
 */
pub fn part_count(size: u64, max_part_size: u64) -> u64 {
    if size == 0 {
        return 1;
    }
    (size + max_part_size - 1) / max_part_size
}

/**
 * The bucket parameter for signing; a configured tenant is prepended as
 * "{tenant}:{bucket}".
 */
pub fn bucket_param(tenant: Option<&str>, bucket: &str) -> String {
    match tenant {
        Some(tenant) => format!("{}:{}", tenant, bucket),
        None => bucket.to_string(),
    }
}

fn s3fail(what: &str, e: impl std::fmt::Display) -> Error {
    Error::Internal(format!("storage {}: {}", what, e))
}

/**
 * Make sure the user's staging bucket exists.  A bucket we already own
 * is fine; any other failure is surfaced.  The expiry lifecycle rule is
 * applied only when the bucket is first created.
 */
async fn ensure_bucket(env: &TransferEnv<'_>, username: &str) -> Result<()> {
    let res = env
        .s3_private
        .create_bucket()
        .bucket(username)
        .send()
        .await;

    match res {
        Ok(_) => {
            let days = env.storage.bucket_lifecycle_configuration.days;
            let rule = LifecycleRule::builder()
                .id("ExpireObjects")
                .filter(LifecycleRuleFilter::Prefix(String::new()))
                .status(ExpirationStatus::Enabled)
                .expiration(
                    LifecycleExpiration::builder().days(days).build(),
                )
                .build();
            env.s3_private
                .put_bucket_lifecycle_configuration()
                .bucket(username)
                .lifecycle_configuration(
                    BucketLifecycleConfiguration::builder()
                        .rules(rule)
                        .build(),
                )
                .send()
                .await
                .map_err(|e| s3fail("bucket lifecycle", e))?;
            Ok(())
        }
        Err(e) => {
            let svc: CreateBucketError = e.into_service_error();
            if svc.is_bucket_already_owned_by_you() {
                Ok(())
            } else {
                Err(s3fail("bucket creation", svc))
            }
        }
    }
}

async fn presign_get(
    client: &aws_sdk_s3::Client,
    bucket: &str,
    key: &str,
    ttl: u64,
) -> Result<String> {
    let cfg = PresigningConfig::builder()
        .expires_in(Duration::from_secs(ttl))
        .build()
        .map_err(|e| s3fail("presigning configuration", e))?;
    Ok(client
        .get_object()
        .bucket(bucket)
        .key(key)
        .presigned(cfg)
        .await
        .map_err(|e| s3fail("GET presigning", e))?
        .uri()
        .to_string())
}

async fn presign_head(
    client: &aws_sdk_s3::Client,
    bucket: &str,
    key: &str,
    ttl: u64,
) -> Result<String> {
    let cfg = PresigningConfig::builder()
        .expires_in(Duration::from_secs(ttl))
        .build()
        .map_err(|e| s3fail("presigning configuration", e))?;
    Ok(client
        .head_object()
        .bucket(bucket)
        .key(key)
        .presigned(cfg)
        .await
        .map_err(|e| s3fail("HEAD presigning", e))?
        .uri()
        .to_string())
}

async fn presign_upload_part(
    client: &aws_sdk_s3::Client,
    bucket: &str,
    key: &str,
    upload_id: &str,
    part_number: i32,
    ttl: u64,
) -> Result<String> {
    let cfg = PresigningConfig::builder()
        .expires_in(Duration::from_secs(ttl))
        .build()
        .map_err(|e| s3fail("presigning configuration", e))?;
    Ok(client
        .upload_part()
        .bucket(bucket)
        .key(key)
        .upload_id(upload_id)
        .part_number(part_number)
        .presigned(cfg)
        .await
        .map_err(|e| s3fail("part presigning", e))?
        .uri()
        .to_string())
}

/**
 * CompleteMultipartUpload has no SDK presigner, so the POST URL is
 * query-signed directly.
 */
fn presign_complete(
    env: &TransferEnv<'_>,
    endpoint: &str,
    bucket: &str,
    key: &str,
    upload_id: &str,
) -> Result<String> {
    let mut settings = SigningSettings::default();
    settings.signature_location = SignatureLocation::QueryParams;
    settings.expires_in = Some(Duration::from_secs(env.storage.ttl));

    let params = SigningParams::builder()
        .access_key(env.storage.access_key_id.value())
        .secret_key(env.storage.secret_access_key.value())
        .region(&env.storage.region)
        .service_name("s3")
        .time(SystemTime::now())
        .settings(settings)
        .build()
        .map_err(|e| s3fail("signing parameters", e))?;

    let url = format!(
        "{}/{}/{}?uploadId={}",
        endpoint.trim_end_matches('/'),
        bucket,
        key,
        upload_id,
    );

    let method = http::Method::POST;
    let uri = url
        .parse::<http::Uri>()
        .map_err(|e| s3fail("completion URL", e))?;
    let headers = http::HeaderMap::new();
    let signable = SignableRequest::new(
        &method,
        &uri,
        &headers,
        SignableBody::UnsignedPayload,
    );

    let (instructions, _signature) = sign(signable, &params)
        .map_err(|e| s3fail("completion URL signing", e))?
        .into_parts();

    let mut request = http::Request::builder()
        .method(http::Method::POST)
        .uri(&url)
        .body(())
        .map_err(|e| s3fail("completion URL", e))?;
    instructions.apply_to_request(&mut request);

    Ok(request.uri().to_string())
}

/**
 * Stage an inbound transfer: mint public multipart upload URLs for the
 * caller and submit the job that will pull the finished object down to
 * the target path.
 */
pub async fn upload(
    env: &TransferEnv<'_>,
    username: &str,
    access_token: &str,
    account: Option<&str>,
    target_path: &str,
    file_size: u64,
) -> Result<TransferOperation> {
    let file_name =
        target_path.rsplit('/').next().unwrap_or(target_path);
    let object_name = format!("{}/{}", Ulid::generate(), file_name);
    let bucket = bucket_param(env.storage.tenant.as_deref(), username);
    let ttl = env.storage.ttl;
    let max_part_size = env.storage.multipart.max_part_size;

    ensure_bucket(env, username).await?;

    let upload_id = env
        .s3_private
        .create_multipart_upload()
        .bucket(username)
        .key(&object_name)
        .send()
        .await
        .map_err(|e| s3fail("multipart creation", e))?
        .upload_id()
        .map(str::to_string)
        .ok_or_else(|| {
            Error::Internal("multipart creation returned no upload id".into())
        })?;

    let mut parts_upload_urls = Vec::new();
    for part_number in 1..=part_count(file_size, max_part_size) {
        parts_upload_urls.push(
            presign_upload_part(
                env.s3_public,
                &bucket,
                &object_name,
                &upload_id,
                part_number as i32,
                ttl,
            )
            .await?,
        );
    }

    let complete_upload_url = presign_complete(
        env,
        &env.storage.public_url,
        &bucket,
        &object_name,
        &upload_id,
    )?;

    /*
     * The downloader job inside the cluster uses the private endpoint.
     */
    let download_url =
        presign_get(env.s3_private, &bucket, &object_name, ttl).await?;
    let download_head_url =
        presign_head(env.s3_private, &bucket, &object_name, ttl).await?;

    let script = render_template(
        include_str!("scripts/job_s3_downloader.sh"),
        &[
            ("sbatch_directives",
                format_directives(
                    &env.cluster.datatransfer_jobs_directives,
                    account,
                )?),
            ("download_head_url", download_head_url),
            ("download_url", download_url),
            ("target_path", target_path.to_string()),
        ],
    );

    let scaffold = JobScaffold::new(
        &env.user_work_dir(username)?,
        "IngressFileTransfer",
        account,
        script,
    );
    let transfer_job = scaffold.submit(env, username, access_token).await?;

    Ok(TransferOperation {
        transfer_job,
        transfer_directives: TransferDirectives::S3 {
            file_size: None,
            download_url: None,
            parts_upload_urls: Some(parts_upload_urls),
            complete_upload_url: Some(complete_upload_url),
            max_part_size: Some(max_part_size),
        },
    })
}

/**
 * Stage an outbound transfer: the job pushes the source file into the
 * staging bucket part by part over the private endpoint, and the caller
 * gets one public GET URL to collect the object.
 */
pub async fn download(
    env: &TransferEnv<'_>,
    username: &str,
    access_token: &str,
    account: Option<&str>,
    source_path: &str,
) -> Result<TransferOperation> {
    /*
     * The job needs one part URL per max_part_size chunk of the source,
     * so stat it first as the caller.
     */
    let stat = StatCommand { path: source_path.to_string(), dereference: true };
    let stat_out = {
        let session = env.pool.acquire(username, access_token).await?;
        session.execute(env.log, &stat, None).await?
    };

    let file_name = source_path.rsplit('/').next().unwrap_or(source_path);
    let object_name = format!("{}_{}", file_name, Ulid::generate());
    let bucket = bucket_param(env.storage.tenant.as_deref(), username);
    let ttl = env.storage.ttl;
    let max_part_size = env.storage.multipart.max_part_size;

    ensure_bucket(env, username).await?;

    let upload_id = env
        .s3_private
        .create_multipart_upload()
        .bucket(username)
        .key(&object_name)
        .send()
        .await
        .map_err(|e| s3fail("multipart creation", e))?
        .upload_id()
        .map(str::to_string)
        .ok_or_else(|| {
            Error::Internal("multipart creation returned no upload id".into())
        })?;

    let mut part_urls = Vec::new();
    for part_number in 1..=part_count(stat_out.size, max_part_size) {
        part_urls.push(
            presign_upload_part(
                env.s3_private,
                &bucket,
                &object_name,
                &upload_id,
                part_number as i32,
                ttl,
            )
            .await?,
        );
    }

    let complete_url = presign_complete(
        env,
        env.storage.private_url.value(),
        &bucket,
        &object_name,
        &upload_id,
    )?;

    let parts_list = part_urls
        .iter()
        .map(|u| format!("\"{}\"", u))
        .collect::<Vec<_>>()
        .join(" ");

    let script = render_template(
        include_str!("scripts/job_s3_uploader.sh"),
        &[
            ("sbatch_directives",
                format_directives(
                    &env.cluster.datatransfer_jobs_directives,
                    account,
                )?),
            ("max_part_size", max_part_size.to_string()),
            ("use_split",
                if env.storage.multipart.use_split { "true" } else { "false" }
                    .to_string()),
            ("tmp_folder",
                format!(
                    "{}/{}",
                    env.storage.multipart.tmp_folder,
                    Ulid::generate(),
                )),
            ("parallel_runs", env.storage.multipart.parallel_runs.to_string()),
            ("parts_urls", parts_list),
            ("num_parts", part_urls.len().to_string()),
            ("input_file", source_path.to_string()),
            ("complete_url", complete_url),
        ],
    );

    let scaffold = JobScaffold::new(
        &env.user_work_dir(username)?,
        "OutgressFileTransfer",
        account,
        script,
    );
    let transfer_job = scaffold.submit(env, username, access_token).await?;

    let download_url =
        presign_get(env.s3_public, &bucket, &object_name, ttl).await?;

    Ok(TransferOperation {
        transfer_job,
        transfer_directives: TransferDirectives::S3 {
            file_size: None,
            download_url: Some(download_url),
            parts_upload_urls: None,
            complete_upload_url: None,
            max_part_size: None,
        },
    })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn part_counts() {
        const GIB2: u64 = 2 * 1024 * 1024 * 1024;
        assert_eq!(part_count(5_000_000_000, GIB2), 3);
        assert_eq!(part_count(GIB2, GIB2), 1);
        assert_eq!(part_count(GIB2 + 1, GIB2), 2);
        assert_eq!(part_count(1, GIB2), 1);
        assert_eq!(part_count(0, GIB2), 1);
    }

    #[test]
    fn tenant_prefixes_every_bucket() {
        assert_eq!(bucket_param(Some("acme"), "alice"), "acme:alice");
        assert_eq!(bucket_param(None, "alice"), "alice");
    }
}
