/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0.  If a copy of the MPL was not distributed with this
 * file, you can obtain one at https://mozilla.org/MPL/2.0/.
 */

/*
 * Bulk data movement.  Payloads above the ops size limit never flow
 * through the gateway process: each transfer method renders a script
 * from a template, wraps it into a scheduler job owned by the caller,
 * and returns directives the client must act on (presigned URLs, a
 * wormhole code, streamer coordinates).
 */

use std::sync::Arc;

use rusty_ulid::Ulid;
#[allow(unused_imports)]
use slog::{debug, error, info, o, warn, Logger};

use clusteromat_types::config::{HpcCluster, StorageConfig};
use clusteromat_types::sched::JobDescription;
use clusteromat_types::transfer::{TransferJob, TransferJobLogs};

use crate::error::{Error, Result};
use crate::sched::SchedulerClient;
use crate::ssh::SshPool;

pub mod s3;
pub mod streamer;
pub mod wormhole;

/**
 * Everything a transfer method needs to stage one operation for one
 * cluster.
 */
pub struct TransferEnv<'a> {
    pub log: &'a Logger,
    pub cluster: &'a HpcCluster,
    pub scheduler: &'a SchedulerClient,
    pub storage: &'a StorageConfig,
    pub s3_private: &'a aws_sdk_s3::Client,
    pub s3_public: &'a aws_sdk_s3::Client,
    pub pool: &'a Arc<SshPool>,
}

impl TransferEnv<'_> {
    /**
     * Per-user staging directory under the cluster's designated work
     * filesystem.
     */
    pub fn user_work_dir(&self, username: &str) -> Result<String> {
        let Some(work_dir) = self.cluster.default_work_dir() else {
            return Err(Error::BadRequest(format!(
                "system {:?} has no filesystem marked as the default \
                work directory",
                self.cluster.name,
            )));
        };
        Ok(format!("{}/{}", work_dir, username))
    }
}

/**
 * A transfer job under construction: the job description submitted to
 * the scheduler plus the log locations reported back to the caller.
 */
pub struct JobScaffold {
    pub description: JobDescription,
    pub working_directory: String,
    pub logs: TransferJobLogs,
}

impl JobScaffold {
    pub fn new(
        working_directory: &str,
        job_name: &str,
        account: Option<&str>,
        script: String,
    ) -> JobScaffold {
        let id = Ulid::generate();
        let logs = TransferJobLogs {
            output_log: format!(
                "{}/.xfer_{}.log",
                working_directory, id,
            ),
            error_log: format!(
                "{}/.xfer_{}_error.log",
                working_directory, id,
            ),
        };

        JobScaffold {
            description: JobDescription {
                name: Some(job_name.to_string()),
                account: account.map(str::to_string),
                working_directory: working_directory.to_string(),
                standard_input: Some("/dev/null".to_string()),
                standard_output: Some(logs.output_log.clone()),
                standard_error: Some(logs.error_log.clone()),
                environment: Some(std::collections::BTreeMap::from([(
                    "PATH".to_string(),
                    "/bin:/usr/bin/:/usr/local/bin/".to_string(),
                )])),
                constraints: None,
                script: Some(script),
                script_path: None,
            },
            working_directory: working_directory.to_string(),
            logs,
        }
    }

    pub async fn submit(
        self,
        env: &TransferEnv<'_>,
        username: &str,
        access_token: &str,
    ) -> Result<TransferJob> {
        let job_id = env
            .scheduler
            .submit_job(&self.description, username, access_token)
            .await?;
        info!(env.log, "submitted transfer job";
            "job_id" => job_id, "user" => username,
            "system" => &env.cluster.name);

        Ok(TransferJob {
            job_id,
            system: env.cluster.name.clone(),
            working_directory: self.working_directory,
            logs: self.logs,
        })
    }
}

/**
 * Fill "{{ key }}" placeholders in a script template.  Unknown keys are
 * left in place so a broken template is visible in the submitted script
 * rather than silently blanked.
 */
pub fn render_template(template: &str, params: &[(&str, String)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find("}}") {
            Some(end) => {
                let key = after[..end].trim();
                match params.iter().find(|(k, _)| *k == key) {
                    Some((_, value)) => out.push_str(value),
                    None => {
                        out.push_str(&rest[start..start + 2 + end + 2]);
                    }
                }
                rest = &after[end + 2..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

/**
 * Join the cluster's transfer-job scheduler directives; an "{account}"
 * placeholder makes the request's account parameter mandatory.
 */
pub fn format_directives(
    directives: &[String],
    account: Option<&str>,
) -> Result<String> {
    let joined = directives.join("\n");
    if joined.contains("{account}") {
        let Some(account) = account else {
            return Err(Error::BadRequest(
                "account parameter is required on this system".into(),
            ));
        };
        return Ok(joined.replace("{account}", account));
    }
    Ok(joined)
}

/*
 * Server-side filesystem operations that run as scheduler jobs: the same
 * scaffold pattern as the real transfers, with short coreutils scripts.
 */

pub async fn copy_job(
    env: &TransferEnv<'_>,
    username: &str,
    access_token: &str,
    account: Option<&str>,
    source_path: &str,
    target_path: &str,
) -> Result<TransferJob> {
    let script = render_template(
        include_str!("scripts/job_copy.sh"),
        &[
            ("sbatch_directives",
                format_directives(
                    &env.cluster.datatransfer_jobs_directives,
                    account,
                )?),
            ("source_path", source_path.to_string()),
            ("target_path", target_path.to_string()),
        ],
    );
    let scaffold = JobScaffold::new(
        &env.user_work_dir(username)?,
        "CopyFiles",
        account,
        script,
    );
    scaffold.submit(env, username, access_token).await
}

pub async fn move_job(
    env: &TransferEnv<'_>,
    username: &str,
    access_token: &str,
    account: Option<&str>,
    source_path: &str,
    target_path: &str,
) -> Result<TransferJob> {
    let script = render_template(
        include_str!("scripts/job_move.sh"),
        &[
            ("sbatch_directives",
                format_directives(
                    &env.cluster.datatransfer_jobs_directives,
                    account,
                )?),
            ("source_path", source_path.to_string()),
            ("target_path", target_path.to_string()),
        ],
    );
    let scaffold = JobScaffold::new(
        &env.user_work_dir(username)?,
        "MoveFiles",
        account,
        script,
    );
    scaffold.submit(env, username, access_token).await
}

pub async fn delete_job(
    env: &TransferEnv<'_>,
    username: &str,
    access_token: &str,
    account: Option<&str>,
    path: &str,
) -> Result<TransferJob> {
    let script = render_template(
        include_str!("scripts/job_delete.sh"),
        &[
            ("sbatch_directives",
                format_directives(
                    &env.cluster.datatransfer_jobs_directives,
                    account,
                )?),
            ("path", path.to_string()),
        ],
    );
    let scaffold = JobScaffold::new(
        &env.user_work_dir(username)?,
        "DeleteFiles",
        account,
        script,
    );
    scaffold.submit(env, username, access_token).await
}

pub async fn compress_job(
    env: &TransferEnv<'_>,
    username: &str,
    access_token: &str,
    account: Option<&str>,
    source_path: &str,
    target_path: &str,
    match_pattern: Option<&str>,
    dereference: bool,
) -> Result<TransferJob> {
    let script = render_template(
        include_str!("scripts/job_compress.sh"),
        &[
            ("sbatch_directives",
                format_directives(
                    &env.cluster.datatransfer_jobs_directives,
                    account,
                )?),
            ("source_path", source_path.to_string()),
            ("target_path", target_path.to_string()),
            ("match_pattern", match_pattern.unwrap_or("").to_string()),
            ("dereference",
                if dereference { "--dereference" } else { "" }.to_string()),
        ],
    );
    let scaffold = JobScaffold::new(
        &env.user_work_dir(username)?,
        "CompressFiles",
        account,
        script,
    );
    scaffold.submit(env, username, access_token).await
}

pub async fn extract_job(
    env: &TransferEnv<'_>,
    username: &str,
    access_token: &str,
    account: Option<&str>,
    source_path: &str,
    target_path: &str,
) -> Result<TransferJob> {
    let script = render_template(
        include_str!("scripts/job_extract.sh"),
        &[
            ("sbatch_directives",
                format_directives(
                    &env.cluster.datatransfer_jobs_directives,
                    account,
                )?),
            ("source_path", source_path.to_string()),
            ("target_path", target_path.to_string()),
        ],
    );
    let scaffold = JobScaffold::new(
        &env.user_work_dir(username)?,
        "ExtractFiles",
        account,
        script,
    );
    scaffold.submit(env, username, access_token).await
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn template_rendering() {
        let t = "#!/bin/bash\n{{ sbatch_directives }}\ncp -r \
            '{{source_path}}' '{{ target_path }}'\n";
        let out = render_template(
            t,
            &[
                ("sbatch_directives", "#SBATCH -p xfer".to_string()),
                ("source_path", "/u/a/src".to_string()),
                ("target_path", "/u/a/dst".to_string()),
            ],
        );
        assert_eq!(
            out,
            "#!/bin/bash\n#SBATCH -p xfer\ncp -r '/u/a/src' '/u/a/dst'\n",
        );
    }

    #[test]
    fn template_unknown_keys_left_alone() {
        let out = render_template("a {{ mystery }} b", &[]);
        assert_eq!(out, "a {{ mystery }} b");
    }

    #[test]
    fn directives_account_templating() {
        let directives = vec![
            "#SBATCH --partition=xfer".to_string(),
            "#SBATCH --account={account}".to_string(),
        ];

        let out = format_directives(&directives, Some("proj1")).unwrap();
        assert_eq!(
            out,
            "#SBATCH --partition=xfer\n#SBATCH --account=proj1",
        );

        let err = format_directives(&directives, None).unwrap_err();
        assert_eq!(err.status_code().as_u16(), 400);

        let plain = vec!["#SBATCH --partition=xfer".to_string()];
        assert_eq!(
            format_directives(&plain, None).unwrap(),
            "#SBATCH --partition=xfer",
        );
    }

    #[test]
    fn scaffold_names_logs_in_workdir() {
        let s = JobScaffold::new(
            "/scratch/a",
            "IngressFileTransfer",
            None,
            "#!/bin/bash\ntrue\n".to_string(),
        );
        assert!(s.logs.output_log.starts_with("/scratch/a/.xfer_"));
        assert!(s.logs.error_log.ends_with("_error.log"));
        assert_eq!(s.description.standard_input.as_deref(), Some("/dev/null"));
        assert_eq!(
            s.description.name.as_deref(),
            Some("IngressFileTransfer"),
        );
        assert!(s.description.validate().is_ok());
    }
}
