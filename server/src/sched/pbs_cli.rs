/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0.  If a copy of the MPL was not distributed with this
 * file, you can obtain one at https://mozilla.org/MPL/2.0/.
 */

/*
 * PBS over the user's SSH session.  PBS reports times as "HH:MM:SS"
 * durations and ctime-style timestamps, memory as strings like "16gb",
 * and execution hosts as chunk expressions; all of that is normalized
 * here before anything leaves the client.
 */

use std::sync::Arc;

use chrono::NaiveDateTime;
use serde_json::Value;
#[allow(unused_imports)]
use slog::{debug, error, info, o, warn, Logger};

use clusteromat_types::sched::{
    Job, JobDescription, JobMetadata, JobStatus, JobTime, Node, Partition,
    Reservation, SchedPing,
};

use super::opt_u64;
use crate::cmd::{shq, ShellCommand};
use crate::error::{Error, Result};
use crate::ssh::SshPool;

const PBS_BIN: &str = "/opt/pbs/bin";

pub struct PbsCliClient {
    log: Logger,
    pool: Arc<SshPool>,
}

impl PbsCliClient {
    pub fn new(log: Logger, pool: Arc<SshPool>) -> PbsCliClient {
        PbsCliClient { log, pool }
    }

    async fn exec<C: ShellCommand>(
        &self,
        username: &str,
        access_token: &str,
        command: &C,
        stdin: Option<&[u8]>,
    ) -> Result<C::Output> {
        let session = self.pool.acquire(username, access_token).await?;
        let res = session.execute(&self.log, command, stdin).await;
        if let Err(Error::SshConnection(_)) = &res {
            drop(session);
            self.pool.evict(username).await;
        }
        res
    }

    pub async fn submit_job(
        &self,
        job: &JobDescription,
        username: &str,
        access_token: &str,
    ) -> Result<u64> {
        let qsub = QsubCommand::from_description(job);
        let stdin = job.script.as_deref().map(str::as_bytes);
        self.exec(username, access_token, &qsub, stdin).await
    }

    pub async fn get_job(
        &self,
        job_id: Option<&str>,
        username: &str,
        access_token: &str,
    ) -> Result<Vec<Job>> {
        let qstat = QstatJobsCommand {
            job_ids: job_id.map(|id| vec![id.to_string()]).unwrap_or_default(),
        };
        self.exec(username, access_token, &qstat, None).await
    }

    pub async fn get_jobs(
        &self,
        username: &str,
        access_token: &str,
        allusers: bool,
    ) -> Result<Vec<Job>> {
        let jobs = self.get_job(None, username, access_token).await?;
        Ok(jobs
            .into_iter()
            .filter(|job| {
                allusers || job.user.as_deref() == Some(username)
            })
            .collect())
    }

    pub async fn get_job_metadata(
        &self,
        job_id: &str,
        username: &str,
        access_token: &str,
    ) -> Result<Vec<JobMetadata>> {
        let qstat = QstatMetadataCommand { job_id: job_id.to_string() };
        self.exec(username, access_token, &qstat, None).await
    }

    pub async fn cancel_job(
        &self,
        job_id: &str,
        username: &str,
        access_token: &str,
    ) -> Result<()> {
        let qdel = QdelCommand { job_id: job_id.to_string() };
        self.exec(username, access_token, &qdel, None).await
    }

    pub async fn get_nodes(
        &self,
        username: &str,
        access_token: &str,
    ) -> Result<Vec<Node>> {
        self.exec(username, access_token, &PbsnodesCommand, None).await
    }

    pub async fn get_partitions(
        &self,
        username: &str,
        access_token: &str,
    ) -> Result<Vec<Partition>> {
        self.exec(username, access_token, &PbsQueuesCommand, None).await
    }

    pub async fn get_reservations(
        &self,
        _username: &str,
        _access_token: &str,
    ) -> Result<Vec<Reservation>> {
        Err(Error::NotImplemented(
            "reservation listing is not supported for PBS".into(),
        ))
    }

    pub async fn ping(
        &self,
        username: &str,
        access_token: &str,
    ) -> Result<Vec<SchedPing>> {
        self.exec(username, access_token, &PbsPingCommand, None).await
    }
}

fn pbs_exit_error(tool: &str, stderr: &str, exit_status: u32) -> Error {
    Error::Scheduler(format!(
        "unexpected {} response; exit_status:{} stderr:{}",
        tool,
        exit_status,
        stderr.trim(),
    ))
}

/**
 * "HH:MM:SS" to whole seconds.
 */
pub(crate) fn parse_pbs_duration(s: &str) -> Option<i64> {
    let mut it = s.split(':');
    let h = it.next()?.parse::<i64>().ok()?;
    let m = it.next()?.parse::<i64>().ok()?;
    let sec = it.next()?.parse::<i64>().ok()?;
    if it.next().is_some() {
        return None;
    }
    Some(h * 3600 + m * 60 + sec)
}

/**
 * ctime-style "Wed May 14 11:52:02 2025" to UNIX seconds.
 */
pub(crate) fn parse_pbs_timestamp(s: &str) -> Option<i64> {
    NaiveDateTime::parse_from_str(s, "%a %b %d %H:%M:%S %Y")
        .ok()
        .map(|dt| dt.and_utc().timestamp())
}

/**
 * PBS memory strings use decimal suffixes: "16gb" is sixteen billion
 * bytes.  Plain integers are kilobyte-free raw byte counts already.
 */
pub(crate) fn parse_pbs_memory(s: &str) -> Option<u64> {
    let s = s.trim().to_lowercase();
    for (suffix, zeros) in
        [("kb", 3), ("mb", 6), ("gb", 9), ("tb", 12), ("pb", 15)]
    {
        if let Some(n) = s.strip_suffix(suffix) {
            let n = n.trim().parse::<u64>().ok()?;
            return Some(n * 10u64.pow(zeros));
        }
    }
    s.strip_suffix('b')
        .unwrap_or(&s)
        .trim()
        .parse::<u64>()
        .ok()
}

/**
 * Expand an exec_host expression like "nid[001-004]/0+nid005/0" into a
 * comma-joined hostname list, preserving zero padding.
 */
pub(crate) fn expand_exec_host(s: &str) -> String {
    let mut hosts = Vec::new();
    for chunk in s.split('+') {
        let host = chunk.split('/').next().unwrap_or(chunk);
        if let Some((prefix, range)) =
            host.split_once('[').and_then(|(p, rest)| {
                rest.strip_suffix(']').map(|r| (p, r))
            })
        {
            if let Some((start, end)) = range.split_once('-') {
                let width = start.len();
                if let (Ok(a), Ok(b)) =
                    (start.parse::<u64>(), end.parse::<u64>())
                {
                    for i in a..=b {
                        hosts.push(format!(
                            "{}{:0width$}",
                            prefix,
                            i,
                            width = width
                        ));
                    }
                    continue;
                }
            }
            hosts.push(host.to_string());
        } else {
            hosts.push(host.to_string());
        }
    }
    hosts.join(",")
}

/**
 * Strip a leading "cluster:" component from a PBS path such as
 * "pbs:/home/user/job.o1".
 */
fn strip_pbs_host(path: &str) -> String {
    match path.split_once(':') {
        Some((host, rest)) if !host.contains('/') => rest.to_string(),
        _ => path.to_string(),
    }
}

fn jstr(v: &Value, key: &str) -> Option<String> {
    v.get(key).and_then(Value::as_str).map(str::to_string)
}

fn parse_pbs_job(full_id: &str, raw: &Value) -> Result<Job> {
    let job_id = full_id
        .split('.')
        .next()
        .and_then(|id| id.parse::<u64>().ok())
        .ok_or_else(|| {
            Error::Scheduler(format!("unparsable PBS job id: {:?}", full_id))
        })?;

    let (user, cluster) = match jstr(raw, "Job_Owner") {
        Some(owner) => match owner.split_once('@') {
            Some((u, c)) => (Some(u.to_string()), Some(c.to_string())),
            None => (Some(owner), None),
        },
        None => (None, None),
    };

    let resources = raw.get("Resource_List");
    let used = raw.get("resources_used");

    let status = JobStatus {
        state: jstr(raw, "job_state").unwrap_or_else(|| "UNKNOWN".into()),
        state_reason: jstr(raw, "comment"),
        exit_code: raw
            .get("Exit_status")
            .and_then(|v| match v {
                Value::Number(n) => n.as_i64(),
                Value::String(s) => s.parse().ok(),
                _ => None,
            })
            .or(Some(0)),
        interrupt_signal: None,
    };

    let time = JobTime {
        submission: jstr(raw, "qtime")
            .as_deref()
            .and_then(parse_pbs_timestamp),
        start: jstr(raw, "stime").as_deref().and_then(parse_pbs_timestamp),
        end: None,
        elapsed: used
            .and_then(|u| u.get("walltime"))
            .and_then(Value::as_str)
            .and_then(parse_pbs_duration),
        suspended: None,
        limit: resources
            .and_then(|r| r.get("walltime"))
            .and_then(Value::as_str)
            .and_then(parse_pbs_duration),
    };

    let nodes = jstr(raw, "exec_host")
        .map(|eh| expand_exec_host(&eh))
        .or_else(|| {
            resources
                .and_then(|r| r.get("nodes"))
                .and_then(Value::as_str)
                .map(str::to_string)
        });

    Ok(Job {
        job_id,
        name: jstr(raw, "Job_Name").unwrap_or_default(),
        status,
        time,
        tasks: None,
        account: jstr(raw, "project"),
        allocation_nodes: resources
            .and_then(|r| r.get("nodect"))
            .and_then(opt_u64),
        cluster,
        group: jstr(raw, "egroup"),
        nodes,
        partition: jstr(raw, "queue"),
        kill_request_user: None,
        user,
        working_directory: raw
            .get("Variable_List")
            .and_then(|vl| vl.get("PBS_O_WORKDIR"))
            .and_then(Value::as_str)
            .map(str::to_string),
        priority: raw.get("Priority").and_then(|v| match v {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }),
    })
}

fn parse_qstat_jobs(stdout: &str) -> Result<Vec<Job>> {
    let v: Value = serde_json::from_str(stdout).map_err(|e| {
        Error::Scheduler(format!("qstat produced unparsable JSON: {}", e))
    })?;

    let Some(jobs) = v.get("Jobs").and_then(Value::as_object) else {
        return Ok(Vec::new());
    };

    jobs.iter().map(|(full_id, raw)| parse_pbs_job(full_id, raw)).collect()
}

pub struct QsubCommand {
    name: Option<String>,
    account: Option<String>,
    standard_output: Option<String>,
    standard_error: Option<String>,
    environment: Option<std::collections::BTreeMap<String, String>>,
    script_path: Option<String>,
}

impl QsubCommand {
    pub fn from_description(job: &JobDescription) -> QsubCommand {
        QsubCommand {
            name: job.name.clone(),
            account: job.account.clone(),
            standard_output: job.standard_output.clone(),
            standard_error: job.standard_error.clone(),
            environment: job.environment.clone(),
            script_path: job.script_path.clone(),
        }
    }
}

impl ShellCommand for QsubCommand {
    type Output = u64;

    fn render(&self) -> String {
        let mut cmd = vec![format!("{}/qsub", PBS_BIN)];

        match &self.environment {
            Some(env) if !env.is_empty() => {
                let vars = env
                    .iter()
                    .map(|(k, v)| format!("{}={}", k, v))
                    .collect::<Vec<_>>()
                    .join(",");
                cmd.push(format!("-v {}", shq(&vars)));
            }
            _ => cmd.push("-V".to_string()),
        }
        if let Some(name) = &self.name {
            cmd.push(format!("-N {}", shq(name)));
        }
        if let Some(account) = &self.account {
            cmd.push(format!("-P {}", shq(account)));
        }
        if let Some(v) = &self.standard_error {
            cmd.push(format!("-e {}", shq(v)));
        }
        if let Some(v) = &self.standard_output {
            cmd.push(format!("-o {}", shq(v)));
        }
        if let Some(path) = &self.script_path {
            cmd.push(shq(path));
        }
        cmd.join(" ")
    }

    fn parse(
        &self,
        stdout: &str,
        stderr: &str,
        exit_status: u32,
    ) -> Result<u64> {
        if exit_status != 0 {
            return Err(pbs_exit_error("qsub", stderr, exit_status));
        }

        /*
         * qsub prints the full job identifier, e.g. "1234.pbs-server".
         */
        let digits = stdout
            .trim()
            .chars()
            .take_while(|c| c.is_ascii_digit())
            .collect::<String>();
        digits.parse::<u64>().map_err(|_| {
            Error::Scheduler(format!("no job id in qsub output: {:?}", stdout))
        })
    }
}

pub struct QstatJobsCommand {
    pub job_ids: Vec<String>,
}

impl ShellCommand for QstatJobsCommand {
    type Output = Vec<Job>;

    fn render(&self) -> String {
        let mut cmd = vec![
            format!("{}/qstat", PBS_BIN),
            "-F".to_string(),
            "json".to_string(),
            "-f".to_string(),
            "-x".to_string(),
        ];
        cmd.extend(self.job_ids.iter().map(|id| shq(id)));
        cmd.join(" ")
    }

    fn parse(
        &self,
        stdout: &str,
        stderr: &str,
        exit_status: u32,
    ) -> Result<Vec<Job>> {
        if exit_status != 0 {
            if stderr.contains("Unknown Job Id") {
                return Ok(Vec::new());
            }
            return Err(pbs_exit_error("qstat", stderr, exit_status));
        }
        parse_qstat_jobs(stdout)
    }
}

pub struct QstatMetadataCommand {
    pub job_id: String,
}

impl ShellCommand for QstatMetadataCommand {
    type Output = Vec<JobMetadata>;

    fn render(&self) -> String {
        format!(
            "{}/qstat -F json -f -x {}",
            PBS_BIN,
            shq(&self.job_id),
        )
    }

    fn parse(
        &self,
        stdout: &str,
        stderr: &str,
        exit_status: u32,
    ) -> Result<Vec<JobMetadata>> {
        if exit_status != 0 {
            if stderr.contains("Unknown Job Id") {
                return Ok(Vec::new());
            }
            return Err(pbs_exit_error("qstat", stderr, exit_status));
        }

        let v: Value = serde_json::from_str(stdout).map_err(|e| {
            Error::Scheduler(format!("qstat produced unparsable JSON: {}", e))
        })?;

        let Some(jobs) = v.get("Jobs").and_then(Value::as_object) else {
            return Ok(Vec::new());
        };

        Ok(jobs
            .iter()
            .filter_map(|(full_id, raw)| {
                let job_id = full_id.split('.').next()?.to_string();
                Some(JobMetadata {
                    job_id,
                    script: None,
                    standard_input: None,
                    standard_output: jstr(raw, "Error_Path")
                        .map(|p| strip_pbs_host(&p)),
                    standard_error: jstr(raw, "Output_Path")
                        .map(|p| strip_pbs_host(&p)),
                })
            })
            .collect())
    }
}

pub struct QdelCommand {
    pub job_id: String,
}

impl ShellCommand for QdelCommand {
    type Output = ();

    fn render(&self) -> String {
        format!("{}/qdel {}", PBS_BIN, shq(&self.job_id))
    }

    fn parse(
        &self,
        _stdout: &str,
        stderr: &str,
        exit_status: u32,
    ) -> Result<()> {
        if exit_status != 0 {
            if stderr.contains("Unknown Job Id") {
                return Err(Error::NotFound("job not found".into()));
            }
            return Err(pbs_exit_error("qdel", stderr, exit_status));
        }
        Ok(())
    }
}

pub struct PbsnodesCommand;

impl ShellCommand for PbsnodesCommand {
    type Output = Vec<Node>;

    fn render(&self) -> String {
        format!("{}/pbsnodes -a -F json", PBS_BIN)
    }

    fn parse(
        &self,
        stdout: &str,
        stderr: &str,
        exit_status: u32,
    ) -> Result<Vec<Node>> {
        if exit_status != 0 {
            return Err(pbs_exit_error("pbsnodes", stderr, exit_status));
        }

        let v: Value = serde_json::from_str(stdout).map_err(|e| {
            Error::Scheduler(format!(
                "pbsnodes produced unparsable JSON: {}",
                e,
            ))
        })?;

        let Some(nodes) = v.get("nodes").and_then(Value::as_object) else {
            return Ok(Vec::new());
        };

        Ok(nodes
            .iter()
            .map(|(name, raw)| {
                let avail = raw.get("resources_available");
                let assigned = raw.get("resources_assigned");
                Node {
                    name: name.to_string(),
                    sockets: None,
                    cores: None,
                    threads: None,
                    cpus: raw.get("pcpus").and_then(opt_u64),
                    cpu_load: None,
                    free_memory: avail
                        .and_then(|a| a.get("mem"))
                        .and_then(Value::as_str)
                        .and_then(parse_pbs_memory),
                    features: None,
                    address: None,
                    hostname: avail
                        .and_then(|a| a.get("host"))
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    state: jstr(raw, "state")
                        .map(|s| {
                            s.split(',').map(str::to_string).collect()
                        })
                        .unwrap_or_default(),
                    partitions: None,
                    weight: None,
                    alloc_memory: assigned
                        .and_then(|a| a.get("mem"))
                        .and_then(Value::as_str)
                        .and_then(parse_pbs_memory),
                    alloc_cpus: assigned
                        .and_then(|a| a.get("ncpus"))
                        .and_then(opt_u64),
                    idle_cpus: avail
                        .and_then(|a| a.get("ncpus"))
                        .and_then(opt_u64),
                }
            })
            .collect())
    }
}

pub struct PbsQueuesCommand;

impl ShellCommand for PbsQueuesCommand {
    type Output = Vec<Partition>;

    fn render(&self) -> String {
        format!("{}/qstat -Q -F json", PBS_BIN)
    }

    fn parse(
        &self,
        stdout: &str,
        stderr: &str,
        exit_status: u32,
    ) -> Result<Vec<Partition>> {
        if exit_status != 0 {
            return Err(pbs_exit_error("qstat", stderr, exit_status));
        }

        let v: Value = serde_json::from_str(stdout).map_err(|e| {
            Error::Scheduler(format!("qstat produced unparsable JSON: {}", e))
        })?;

        let Some(queues) = v.get("Queue").and_then(Value::as_object) else {
            return Ok(Vec::new());
        };

        Ok(queues
            .iter()
            .map(|(name, raw)| {
                let started = raw
                    .get("started")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                Partition {
                    name: name.to_string(),
                    cpus: None,
                    total_nodes: None,
                    partition: vec![
                        if started { "UP" } else { "DOWN" }.to_string()
                    ],
                }
            })
            .collect())
    }
}

pub struct PbsPingCommand;

impl ShellCommand for PbsPingCommand {
    type Output = Vec<SchedPing>;

    fn render(&self) -> String {
        format!("{}/qstat -Bf", PBS_BIN)
    }

    fn parse(
        &self,
        stdout: &str,
        stderr: &str,
        exit_status: u32,
    ) -> Result<Vec<SchedPing>> {
        if exit_status != 0 {
            return Err(pbs_exit_error("qstat", stderr, exit_status));
        }

        let mut pings: Vec<SchedPing> = Vec::new();
        for line in stdout.lines() {
            if let Some(host) = line.strip_prefix("Server:") {
                pings.push(SchedPing {
                    hostname: Some(host.trim().to_string()),
                    pinged: None,
                    latency: None,
                    mode: None,
                });
            } else if let Some((key, val)) = line.trim().split_once('=') {
                if key.trim() == "server_state" {
                    if let Some(last) = pings.last_mut() {
                        last.pinged = Some(
                            if val.trim() == "Active" { "UP" } else { "DOWN" }
                                .to_string(),
                        );
                    }
                }
            }
        }
        Ok(pings)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn duration_parsing() {
        assert_eq!(parse_pbs_duration("01:02:03"), Some(3723));
        assert_eq!(parse_pbs_duration("00:00:30"), Some(30));
        assert_eq!(parse_pbs_duration("100:00:00"), Some(360000));
        assert_eq!(parse_pbs_duration("nope"), None);
        assert_eq!(parse_pbs_duration("1:2"), None);
    }

    #[test]
    fn timestamp_parsing() {
        assert_eq!(
            parse_pbs_timestamp("Wed May 14 11:52:02 2025"),
            Some(1747223522),
        );
        assert_eq!(parse_pbs_timestamp("not a date"), None);
    }

    #[test]
    fn memory_parsing() {
        assert_eq!(parse_pbs_memory("16gb"), Some(16_000_000_000));
        assert_eq!(parse_pbs_memory("512kb"), Some(512_000));
        assert_eq!(parse_pbs_memory("2tb"), Some(2_000_000_000_000));
        assert_eq!(parse_pbs_memory("1024"), Some(1024));
        assert_eq!(parse_pbs_memory("16 GB"), Some(16_000_000_000));
        assert_eq!(parse_pbs_memory("wat"), None);
    }

    #[test]
    fn exec_host_expansion() {
        assert_eq!(
            expand_exec_host("nid[001-004]/0+nid005/0"),
            "nid001,nid002,nid003,nid004,nid005",
        );
        assert_eq!(expand_exec_host("node1/0"), "node1");
        assert_eq!(expand_exec_host("node1/0*2+node2/0"), "node1,node2");
    }

    #[test]
    fn qsub_render_and_parse() {
        let job: JobDescription = serde_json::from_value(json!({
            "name": "hello",
            "workingDirectory": "/home/a",
            "standardOutput": "/home/a/o.log",
            "standardError": "/home/a/e.log",
            "env": { "PATH": "/bin" },
            "script": "#!/bin/bash\necho hi",
        }))
        .unwrap();
        let qsub = QsubCommand::from_description(&job);
        assert_eq!(
            qsub.render(),
            "/opt/pbs/bin/qsub -v 'PATH=/bin' -N 'hello' \
            -e '/home/a/e.log' -o '/home/a/o.log'",
        );

        assert_eq!(qsub.parse("1234.pbs-server\n", "", 0).unwrap(), 1234);
        assert!(qsub.parse("garbage", "", 0).is_err());
        assert!(qsub.parse("", "qsub: would exceed limit", 1).is_err());
    }

    #[test]
    fn qstat_job_normalization() {
        let stdout = json!({
            "Jobs": {
                "1234.pbs-server": {
                    "Job_Name": "hello_pbs",
                    "Job_Owner": "fireuser@pbs-server",
                    "job_state": "F",
                    "Exit_status": 0,
                    "queue": "workq",
                    "project": "proj9",
                    "Priority": 0,
                    "qtime": "Wed May 14 11:50:00 2025",
                    "stime": "Wed May 14 11:52:02 2025",
                    "exec_host": "nid[001-002]/0+nid005/0",
                    "resources_used": { "walltime": "00:01:40" },
                    "Resource_List": {
                        "nodect": 3,
                        "walltime": "01:00:00",
                        "nodes": "3",
                    },
                    "Variable_List": {
                        "PBS_O_WORKDIR": "/home/fireuser/test_dir",
                    },
                },
            },
        })
        .to_string();

        let cmd = QstatJobsCommand { job_ids: vec!["1234".into()] };
        let jobs = cmd.parse(&stdout, "", 0).unwrap();
        assert_eq!(jobs.len(), 1);
        let job = &jobs[0];
        assert_eq!(job.job_id, 1234);
        assert_eq!(job.user.as_deref(), Some("fireuser"));
        assert_eq!(job.cluster.as_deref(), Some("pbs-server"));
        assert_eq!(job.partition.as_deref(), Some("workq"));
        assert_eq!(job.account.as_deref(), Some("proj9"));
        assert_eq!(job.allocation_nodes, Some(3));
        assert_eq!(
            job.nodes.as_deref(),
            Some("nid001,nid002,nid005"),
        );
        assert_eq!(job.time.start, Some(1747223522));
        assert_eq!(job.time.elapsed, Some(100));
        assert_eq!(job.time.limit, Some(3600));
        assert_eq!(
            job.working_directory.as_deref(),
            Some("/home/fireuser/test_dir"),
        );
    }

    #[test]
    fn qstat_metadata_paths() {
        let stdout = json!({
            "Jobs": {
                "1.pbs": {
                    "Output_Path": "pbs:/home/fireuser/hello.o1",
                    "Error_Path": "pbs:/home/fireuser/hello.e1",
                },
            },
        })
        .to_string();

        let cmd = QstatMetadataCommand { job_id: "1".into() };
        let meta = cmd.parse(&stdout, "", 0).unwrap();
        assert_eq!(meta.len(), 1);
        assert_eq!(
            meta[0].standard_output.as_deref(),
            Some("/home/fireuser/hello.e1"),
        );
        assert_eq!(
            meta[0].standard_error.as_deref(),
            Some("/home/fireuser/hello.o1"),
        );
    }

    #[test]
    fn ping_parse() {
        let stdout = "Server: pbs-server\n\
            \tserver_state = Active\n\
            \tserver_host = pbs-server.example\n";
        let pings = PbsPingCommand.parse(stdout, "", 0).unwrap();
        assert_eq!(pings.len(), 1);
        assert_eq!(pings[0].hostname.as_deref(), Some("pbs-server"));
        assert_eq!(pings[0].pinged.as_deref(), Some("UP"));
    }

    #[test]
    fn queues_to_partitions() {
        let stdout = json!({
            "Queue": {
                "workq": { "queue_type": "Execution", "enabled": true,
                    "started": true },
                "hold": { "queue_type": "Execution", "enabled": true,
                    "started": false },
            },
        })
        .to_string();

        let parts = PbsQueuesCommand.parse(&stdout, "", 0).unwrap();
        assert_eq!(parts.len(), 2);
        let workq = parts.iter().find(|p| p.name == "workq").unwrap();
        assert_eq!(workq.partition, vec!["UP".to_string()]);
        let hold = parts.iter().find(|p| p.name == "hold").unwrap();
        assert_eq!(hold.partition, vec!["DOWN".to_string()]);
    }
}
