/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0.  If a copy of the MPL was not distributed with this
 * file, you can obtain one at https://mozilla.org/MPL/2.0/.
 */

/*
 * Scheduler abstraction.  Three backends produce one normalized model:
 * the SLURM REST API, SLURM command line tools over the user's SSH
 * session, and PBS command line tools over the user's SSH session.
 */

use serde_json::Value;
#[allow(unused_imports)]
use slog::{debug, error, info, o, warn, Logger};

use clusteromat_types::sched::{
    Job, JobDescription, JobMetadata, JobStatus, JobTask, JobTime, Node,
    Partition, Reservation, SchedPing,
};

use crate::error::{Error, Result};

pub mod pbs_cli;
pub mod slurm_cli;
pub mod slurm_rest;

pub use pbs_cli::PbsCliClient;
pub use slurm_cli::SlurmCliClient;
pub use slurm_rest::SlurmRestClient;

pub enum SchedulerClient {
    SlurmRest(SlurmRestClient),
    SlurmCli(SlurmCliClient),
    PbsCli(PbsCliClient),
}

impl SchedulerClient {
    pub async fn submit_job(
        &self,
        job: &JobDescription,
        username: &str,
        access_token: &str,
    ) -> Result<u64> {
        job.validate().map_err(Error::BadRequest)?;
        match self {
            SchedulerClient::SlurmRest(c) => {
                c.submit_job(job, username, access_token).await
            }
            SchedulerClient::SlurmCli(c) => {
                c.submit_job(job, username, access_token).await
            }
            SchedulerClient::PbsCli(c) => {
                c.submit_job(job, username, access_token).await
            }
        }
    }

    pub async fn get_job(
        &self,
        job_id: &str,
        username: &str,
        access_token: &str,
    ) -> Result<Vec<Job>> {
        match self {
            SchedulerClient::SlurmRest(c) => {
                c.get_job(job_id, username, access_token).await
            }
            SchedulerClient::SlurmCli(c) => {
                c.get_job(job_id, username, access_token).await
            }
            SchedulerClient::PbsCli(c) => {
                c.get_job(Some(job_id), username, access_token).await
            }
        }
    }

    pub async fn get_jobs(
        &self,
        username: &str,
        access_token: &str,
        allusers: bool,
    ) -> Result<Vec<Job>> {
        match self {
            SchedulerClient::SlurmRest(c) => {
                c.get_jobs(username, access_token, allusers).await
            }
            SchedulerClient::SlurmCli(c) => {
                c.get_jobs(username, access_token, allusers).await
            }
            SchedulerClient::PbsCli(c) => {
                c.get_jobs(username, access_token, allusers).await
            }
        }
    }

    pub async fn get_job_metadata(
        &self,
        job_id: &str,
        username: &str,
        access_token: &str,
    ) -> Result<Vec<JobMetadata>> {
        match self {
            SchedulerClient::SlurmRest(c) => {
                c.get_job_metadata(job_id, username, access_token).await
            }
            SchedulerClient::SlurmCli(c) => {
                c.get_job_metadata(job_id, username, access_token).await
            }
            SchedulerClient::PbsCli(c) => {
                c.get_job_metadata(job_id, username, access_token).await
            }
        }
    }

    pub async fn cancel_job(
        &self,
        job_id: &str,
        username: &str,
        access_token: &str,
    ) -> Result<()> {
        match self {
            SchedulerClient::SlurmRest(c) => {
                c.cancel_job(job_id, username, access_token).await
            }
            SchedulerClient::SlurmCli(c) => {
                c.cancel_job(job_id, username, access_token).await
            }
            SchedulerClient::PbsCli(c) => {
                c.cancel_job(job_id, username, access_token).await
            }
        }
    }

    pub async fn get_nodes(
        &self,
        username: &str,
        access_token: &str,
    ) -> Result<Vec<Node>> {
        match self {
            SchedulerClient::SlurmRest(c) => {
                c.get_nodes(username, access_token).await
            }
            SchedulerClient::SlurmCli(c) => {
                c.get_nodes(username, access_token).await
            }
            SchedulerClient::PbsCli(c) => {
                c.get_nodes(username, access_token).await
            }
        }
    }

    pub async fn get_partitions(
        &self,
        username: &str,
        access_token: &str,
    ) -> Result<Vec<Partition>> {
        match self {
            SchedulerClient::SlurmRest(c) => {
                c.get_partitions(username, access_token).await
            }
            SchedulerClient::SlurmCli(c) => {
                c.get_partitions(username, access_token).await
            }
            SchedulerClient::PbsCli(c) => {
                c.get_partitions(username, access_token).await
            }
        }
    }

    pub async fn get_reservations(
        &self,
        username: &str,
        access_token: &str,
    ) -> Result<Vec<Reservation>> {
        match self {
            SchedulerClient::SlurmRest(c) => {
                c.get_reservations(username, access_token).await
            }
            SchedulerClient::SlurmCli(c) => {
                c.get_reservations(username, access_token).await
            }
            SchedulerClient::PbsCli(c) => {
                c.get_reservations(username, access_token).await
            }
        }
    }

    pub async fn ping(
        &self,
        username: &str,
        access_token: &str,
    ) -> Result<Vec<SchedPing>> {
        match self {
            SchedulerClient::SlurmRest(c) => {
                c.ping(username, access_token).await
            }
            SchedulerClient::SlurmCli(c) => c.ping(username, access_token).await,
            SchedulerClient::PbsCli(c) => c.ping(username, access_token).await,
        }
    }

    /**
     * The rendered command line for an interactive attach to a running
     * job, to be run on a dedicated long-lived channel over the user's
     * SSH session.  Only the SLURM CLI backend supports this.
     */
    pub fn attach_command(
        &self,
        job_id: Option<&str>,
        entrypoint: &str,
    ) -> Result<String> {
        match self {
            SchedulerClient::SlurmRest(_) => Err(Error::NotImplemented(
                "interactive attach is not supported through the SLURM \
                REST API"
                    .into(),
            )),
            SchedulerClient::SlurmCli(_) => Ok(match job_id {
                Some(job_id) => format!(
                    "srun --overlap --jobid={} {}",
                    job_id, entrypoint,
                ),
                None => entrypoint.to_string(),
            }),
            SchedulerClient::PbsCli(_) => Err(Error::NotImplemented(
                "interactive attach is not supported for PBS".into(),
            )),
        }
    }
}

/**
 * Compare a dotted scheduler API version against a gate.
 */
pub fn version_at_least(version: &str, gate: (u64, u64, u64)) -> bool {
    let mut parts = version.split('.').map(|p| p.parse::<u64>().unwrap_or(0));
    let v = (
        parts.next().unwrap_or(0),
        parts.next().unwrap_or(0),
        parts.next().unwrap_or(0),
    );
    v >= gate
}

/*
 * slurmdbd wraps many numbers as {"set": bool, "infinite": bool,
 * "number": N} depending on the version; these helpers accept both the
 * wrapped and the plain form.
 */
pub(crate) fn opt_i64(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_i64(),
        Value::Object(o) => {
            if o.get("set").and_then(Value::as_bool) == Some(false) {
                return None;
            }
            o.get("number").and_then(Value::as_i64)
        }
        _ => None,
    }
}

pub(crate) fn opt_u64(v: &Value) -> Option<u64> {
    opt_i64(v).and_then(|n| n.try_into().ok())
}

pub(crate) fn opt_str(v: &Value) -> Option<String> {
    v.as_str().map(str::to_string)
}

/**
 * A state may be a plain string or an array of flags; the first element
 * is the normalized state tag.
 */
pub(crate) fn first_state(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.to_string()),
        Value::Array(a) => a.first().and_then(Value::as_str).map(str::to_string),
        _ => None,
    }
}

fn parse_exit_code(v: &Value) -> (Option<i64>, Option<i64>) {
    let exit_code = v
        .get("return_code")
        .map(opt_i64)
        .unwrap_or_else(|| opt_i64(v));
    let signal = v
        .get("signal")
        .and_then(|s| s.get("id"))
        .map(opt_i64)
        .unwrap_or(None);
    (exit_code, signal)
}

fn parse_slurm_time(v: &Value) -> JobTime {
    JobTime {
        submission: v.get("submission").and_then(opt_i64),
        start: v.get("start").and_then(opt_i64),
        end: v.get("end").and_then(opt_i64),
        elapsed: v.get("elapsed").and_then(opt_i64),
        suspended: v.get("suspended").and_then(opt_i64),
        limit: v.get("limit").and_then(opt_i64),
    }
}

/**
 * Normalize one job record in the slurmdbd shape, as produced both by
 * the slurmdb REST endpoints and by sacct --json.
 */
pub(crate) fn parse_slurmdb_job(raw: &Value) -> Result<Job> {
    let job_id = raw.get("job_id").and_then(opt_u64).ok_or_else(|| {
        Error::Scheduler(format!("job record without job_id: {}", raw))
    })?;

    let (exit_code, interrupt_signal) = raw
        .get("exit_code")
        .map(parse_exit_code)
        .unwrap_or((None, None));

    let status = JobStatus {
        state: raw
            .get("state")
            .and_then(|s| s.get("current"))
            .and_then(first_state)
            .unwrap_or_else(|| "UNKNOWN".to_string()),
        state_reason: raw
            .get("state")
            .and_then(|s| s.get("reason"))
            .and_then(opt_str),
        exit_code,
        interrupt_signal,
    };

    let tasks = raw.get("steps").and_then(Value::as_array).map(|steps| {
        steps
            .iter()
            .filter_map(|raw_step| {
                let step = raw_step.get("step")?;
                let (exit_code, interrupt_signal) = raw_step
                    .get("exit_code")
                    .map(parse_exit_code)
                    .unwrap_or((None, None));
                Some(JobTask {
                    id: step
                        .get("id")
                        .map(|id| match id {
                            Value::String(s) => s.to_string(),
                            other => other.to_string(),
                        })
                        .unwrap_or_default(),
                    name: step
                        .get("name")
                        .and_then(opt_str)
                        .unwrap_or_default(),
                    status: JobStatus {
                        state: raw_step
                            .get("state")
                            .and_then(first_state)
                            .unwrap_or_else(|| "UNKNOWN".to_string()),
                        state_reason: None,
                        exit_code,
                        interrupt_signal,
                    },
                    time: raw_step
                        .get("time")
                        .map(parse_slurm_time)
                        .unwrap_or_default(),
                })
            })
            .collect::<Vec<_>>()
    });

    Ok(Job {
        job_id,
        name: raw.get("name").and_then(opt_str).unwrap_or_default(),
        status,
        time: raw.get("time").map(parse_slurm_time).unwrap_or_default(),
        tasks,
        account: raw.get("account").and_then(opt_str),
        allocation_nodes: raw.get("allocation_nodes").and_then(opt_u64),
        cluster: raw.get("cluster").and_then(opt_str),
        group: raw.get("group").and_then(opt_str),
        nodes: raw.get("nodes").and_then(opt_str),
        partition: raw.get("partition").and_then(opt_str),
        kill_request_user: raw.get("kill_request_user").and_then(opt_str),
        user: raw.get("user").and_then(opt_str),
        working_directory: raw.get("working_directory").and_then(opt_str),
        priority: raw.get("priority").and_then(opt_i64),
    })
}

/**
 * Normalize one active job record in the squeue/scontrol shape.
 */
pub(crate) fn parse_squeue_job(raw: &Value) -> Result<Job> {
    let job_id = raw.get("job_id").and_then(opt_u64).ok_or_else(|| {
        Error::Scheduler(format!("job record without job_id: {}", raw))
    })?;

    let status = JobStatus {
        state: raw
            .get("job_state")
            .and_then(first_state)
            .unwrap_or_else(|| "UNKNOWN".to_string()),
        state_reason: raw.get("state_reason").and_then(opt_str),
        exit_code: raw.get("exit_code").and_then(opt_i64),
        interrupt_signal: None,
    };

    Ok(Job {
        job_id,
        name: raw.get("name").and_then(opt_str).unwrap_or_default(),
        status,
        time: JobTime {
            submission: raw.get("submit_time").and_then(opt_i64),
            start: raw.get("start_time").and_then(opt_i64),
            end: raw.get("end_time").and_then(opt_i64),
            elapsed: None,
            suspended: None,
            limit: raw.get("time_limit").and_then(opt_i64),
        },
        tasks: None,
        account: raw.get("account").and_then(opt_str),
        allocation_nodes: raw.get("node_count").and_then(opt_u64),
        cluster: raw.get("cluster").and_then(opt_str),
        group: raw.get("group_name").and_then(opt_str),
        nodes: raw.get("nodes").and_then(opt_str),
        partition: raw.get("partition").and_then(opt_str),
        kill_request_user: None,
        user: raw.get("user_name").and_then(opt_str),
        working_directory: raw
            .get("current_working_directory")
            .and_then(opt_str),
        priority: raw.get("priority").and_then(opt_i64),
    })
}

pub(crate) fn parse_slurm_partition(raw: &Value) -> Result<Partition> {
    let name = raw.get("name").and_then(opt_str).ok_or_else(|| {
        Error::Scheduler(format!("partition record without name: {}", raw))
    })?;

    let state = raw
        .get("partition")
        .and_then(|p| p.get("state"))
        .or_else(|| raw.get("state"))
        .map(|v| match v {
            Value::Array(a) => a
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect::<Vec<_>>(),
            Value::String(s) => vec![s.to_string()],
            _ => Vec::new(),
        })
        .unwrap_or_default();

    Ok(Partition {
        name,
        cpus: raw
            .get("cpus")
            .and_then(|c| c.get("total").map(opt_u64).unwrap_or_else(|| opt_u64(c))),
        total_nodes: raw
            .get("nodes")
            .and_then(|n| n.get("total").map(opt_u64).unwrap_or_else(|| opt_u64(n))),
        partition: state,
    })
}

pub(crate) fn parse_slurm_reservation(raw: &Value) -> Result<Reservation> {
    let name = raw.get("name").and_then(opt_str).ok_or_else(|| {
        Error::Scheduler(format!("reservation record without name: {}", raw))
    })?;

    Ok(Reservation {
        name,
        node_list: raw.get("node_list").and_then(opt_str).unwrap_or_default(),
        start_time: raw.get("start_time").and_then(opt_i64).unwrap_or(0),
        end_time: raw.get("end_time").and_then(opt_i64).unwrap_or(0),
        features: raw.get("features").and_then(opt_str).filter(|f| {
            !f.is_empty()
        }),
    })
}

pub(crate) fn parse_slurm_ping(raw: &Value) -> SchedPing {
    SchedPing {
        hostname: raw.get("hostname").and_then(opt_str),
        pinged: raw.get("pinged").and_then(opt_str),
        latency: raw.get("latency").and_then(opt_i64),
        mode: raw.get("mode").and_then(opt_str),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn version_gates() {
        assert!(version_at_least("0.0.39", (0, 0, 39)));
        assert!(version_at_least("0.0.40", (0, 0, 39)));
        assert!(version_at_least("0.0.41", (0, 0, 41)));
        assert!(!version_at_least("0.0.38", (0, 0, 39)));
        assert!(!version_at_least("0.0.40", (0, 0, 41)));
        assert!(version_at_least("1.0.0", (0, 0, 41)));
    }

    #[test]
    fn wrapped_numbers() {
        assert_eq!(opt_i64(&json!(7)), Some(7));
        assert_eq!(
            opt_i64(&json!({"set": true, "infinite": false, "number": 30})),
            Some(30),
        );
        assert_eq!(
            opt_i64(&json!({"set": false, "infinite": false, "number": 0})),
            None,
        );
        assert_eq!(opt_i64(&json!("x")), None);
    }

    #[test]
    fn slurmdb_job_normalization() {
        let raw = json!({
            "job_id": 12345,
            "name": "X",
            "account": "proj1",
            "allocation_nodes": 2,
            "cluster": "cA",
            "group": "staff",
            "nodes": "nid[001-002]",
            "partition": "normal",
            "priority": {"set": true, "number": 100},
            "state": {"current": ["COMPLETED"], "reason": "None"},
            "exit_code": {
                "return_code": {"number": 0},
                "signal": {"id": {"number": 9}},
            },
            "time": {
                "elapsed": 30,
                "submission": 1747223500,
                "start": {"set": true, "number": 1747223522},
                "end": 1747223552,
                "suspended": 0,
                "limit": {"set": true, "number": 600},
            },
            "user": "a",
            "working_directory": "/u/a",
            "steps": [{
                "step": {"id": "12345.batch", "name": "batch"},
                "state": ["COMPLETED"],
                "exit_code": {"return_code": {"number": 0}},
                "time": {"elapsed": 30},
            }],
        });

        let job = parse_slurmdb_job(&raw).unwrap();
        assert_eq!(job.job_id, 12345);
        assert_eq!(job.status.state, "COMPLETED");
        assert_eq!(job.status.exit_code, Some(0));
        assert_eq!(job.status.interrupt_signal, Some(9));
        assert_eq!(job.time.start, Some(1747223522));
        assert_eq!(job.time.limit, Some(600));
        assert_eq!(job.priority, Some(100));
        let tasks = job.tasks.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].name, "batch");
        assert_eq!(tasks[0].status.state, "COMPLETED");
    }

    #[test]
    fn squeue_job_normalization() {
        let raw = json!({
            "job_id": 77,
            "name": "interactive",
            "job_state": "RUNNING",
            "state_reason": "None",
            "account": "proj1",
            "partition": "debug",
            "user_name": "a",
            "nodes": "nid001",
            "node_count": {"set": true, "number": 1},
            "current_working_directory": "/u/a",
            "submit_time": {"set": true, "number": 1747223500},
            "start_time": 1747223501,
            "time_limit": {"set": true, "infinite": false, "number": 30},
        });

        let job = parse_squeue_job(&raw).unwrap();
        assert_eq!(job.job_id, 77);
        assert_eq!(job.status.state, "RUNNING");
        assert_eq!(job.user.as_deref(), Some("a"));
        assert_eq!(job.time.submission, Some(1747223500));
        assert_eq!(job.time.limit, Some(30));
    }

    #[test]
    fn partition_normalization() {
        let raw = json!({
            "name": "normal",
            "cpus": {"total": 256},
            "nodes": {"total": 4},
            "partition": {"state": ["UP"]},
        });
        let p = parse_slurm_partition(&raw).unwrap();
        assert_eq!(p.name, "normal");
        assert_eq!(p.cpus, Some(256));
        assert_eq!(p.total_nodes, Some(4));
        assert_eq!(p.partition, vec!["UP".to_string()]);
    }
}
