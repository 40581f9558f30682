/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0.  If a copy of the MPL was not distributed with this
 * file, you can obtain one at https://mozilla.org/MPL/2.0/.
 */

/*
 * SLURM over the user's SSH session: each operation is a command object
 * executed on the login node as the caller, parsing the JSON the SLURM
 * tools emit into the normalized model.
 */

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
#[allow(unused_imports)]
use slog::{debug, error, info, o, warn, Logger};

use clusteromat_types::sched::{
    Job, JobDescription, JobMetadata, Node, Partition, Reservation, SchedPing,
};

use super::{
    first_state, opt_i64, opt_str, opt_u64, parse_slurm_partition,
    parse_slurm_ping, parse_slurm_reservation, parse_slurmdb_job,
    parse_squeue_job,
};
use crate::cmd::{shq, ShellCommand};
use crate::error::{Error, Result};
use crate::ssh::SshPool;

pub struct SlurmCliClient {
    log: Logger,
    pool: Arc<SshPool>,
}

impl SlurmCliClient {
    pub fn new(log: Logger, pool: Arc<SshPool>) -> SlurmCliClient {
        SlurmCliClient { log, pool }
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
        let sbatch = SbatchCommand::from_description(job);
        let stdin = job.script.as_deref().map(str::as_bytes);
        self.exec(username, access_token, &sbatch, stdin).await
    }

    pub async fn get_job(
        &self,
        job_id: &str,
        username: &str,
        access_token: &str,
    ) -> Result<Vec<Job>> {
        let sacct = SacctJobsCommand { job_id: Some(job_id.to_string()) };
        let jobs = self.exec(username, access_token, &sacct, None).await?;
        if !jobs.is_empty() {
            return Ok(jobs);
        }

        /*
         * Jobs the accounting database has not seen yet may still be
         * visible in the active queue.
         */
        let squeue = SqueueCommand { job_id: Some(job_id.to_string()) };
        self.exec(username, access_token, &squeue, None).await
    }

    pub async fn get_jobs(
        &self,
        username: &str,
        access_token: &str,
        allusers: bool,
    ) -> Result<Vec<Job>> {
        let sacct = SacctJobsCommand { job_id: None };
        let squeue = SqueueCommand { job_id: None };

        let mut by_id = BTreeMap::new();
        for job in self.exec(username, access_token, &sacct, None).await? {
            by_id.insert(job.job_id, job);
        }
        /*
         * The active queue has fresher state for running jobs.
         */
        for job in self.exec(username, access_token, &squeue, None).await? {
            by_id.insert(job.job_id, job);
        }

        Ok(by_id
            .into_values()
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
        let meta = ScontrolJobMetadataCommand { job_id: job_id.to_string() };
        let mut jobs = self.exec(username, access_token, &meta, None).await?;

        let script_cmd = SacctScriptCommand { job_id: job_id.to_string() };
        let script =
            match self.exec(username, access_token, &script_cmd, None).await {
                Ok(script) => script,
                Err(e) => {
                    debug!(self.log, "batch script fetch failed";
                        "job_id" => job_id, "error" => %e);
                    None
                }
            };

        for job in jobs.iter_mut() {
            job.script = script.clone();
        }
        Ok(jobs)
    }

    pub async fn cancel_job(
        &self,
        job_id: &str,
        username: &str,
        access_token: &str,
    ) -> Result<()> {
        let scancel = ScancelCommand { job_id: job_id.to_string() };
        self.exec(username, access_token, &scancel, None).await
    }

    pub async fn get_nodes(
        &self,
        username: &str,
        access_token: &str,
    ) -> Result<Vec<Node>> {
        self.exec(username, access_token, &SinfoCommand, None).await
    }

    pub async fn get_partitions(
        &self,
        username: &str,
        access_token: &str,
    ) -> Result<Vec<Partition>> {
        self.exec(username, access_token, &ScontrolPartitionsCommand, None)
            .await
    }

    pub async fn get_reservations(
        &self,
        username: &str,
        access_token: &str,
    ) -> Result<Vec<Reservation>> {
        self.exec(username, access_token, &ScontrolReservationsCommand, None)
            .await
    }

    pub async fn ping(
        &self,
        username: &str,
        access_token: &str,
    ) -> Result<Vec<SchedPing>> {
        self.exec(username, access_token, &ScontrolPingCommand, None).await
    }
}

fn scheduler_exit_error(tool: &str, stderr: &str, exit_status: u32) -> Error {
    Error::Scheduler(format!(
        "unexpected {} response; exit_status:{} stderr:{}",
        tool,
        exit_status,
        stderr.trim(),
    ))
}

fn parse_json(tool: &str, stdout: &str) -> Result<Value> {
    serde_json::from_str(stdout).map_err(|e| {
        Error::Scheduler(format!("{} produced unparsable JSON: {}", tool, e))
    })
}

pub struct SbatchCommand {
    name: Option<String>,
    account: Option<String>,
    chdir: String,
    standard_input: Option<String>,
    standard_output: Option<String>,
    standard_error: Option<String>,
    constraints: Option<String>,
    environment: Option<BTreeMap<String, String>>,
    script_path: Option<String>,
}

impl SbatchCommand {
    pub fn from_description(job: &JobDescription) -> SbatchCommand {
        SbatchCommand {
            name: job.name.clone(),
            account: job.account.clone(),
            chdir: job.working_directory.clone(),
            standard_input: job.standard_input.clone(),
            standard_output: job.standard_output.clone(),
            standard_error: job.standard_error.clone(),
            constraints: job.constraints.clone(),
            environment: job.environment.clone(),
            script_path: job.script_path.clone(),
        }
    }
}

impl ShellCommand for SbatchCommand {
    type Output = u64;

    fn render(&self) -> String {
        let mut cmd = vec!["sbatch".to_string(), "--parsable".to_string()];
        cmd.push(format!("--chdir={}", shq(&self.chdir)));
        if let Some(name) = &self.name {
            cmd.push(format!("--job-name={}", shq(name)));
        }
        if let Some(account) = &self.account {
            cmd.push(format!("--account={}", shq(account)));
        }
        if let Some(v) = &self.standard_input {
            cmd.push(format!("--input={}", shq(v)));
        }
        if let Some(v) = &self.standard_output {
            cmd.push(format!("--output={}", shq(v)));
        }
        if let Some(v) = &self.standard_error {
            cmd.push(format!("--error={}", shq(v)));
        }
        if let Some(v) = &self.constraints {
            cmd.push(format!("--constraint={}", shq(v)));
        }
        if let Some(env) = &self.environment {
            let vars = env
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join(",");
            cmd.push(format!("--export={}", shq(&vars)));
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
            return Err(scheduler_exit_error("sbatch", stderr, exit_status));
        }

        /*
         * --parsable prints "jobid" or "jobid;cluster"; fall back to
         * scanning for the first integer in case the site wraps sbatch.
         */
        stdout
            .split_whitespace()
            .filter_map(|tok| {
                tok.split(';').next().and_then(|t| t.parse::<u64>().ok())
            })
            .next()
            .ok_or_else(|| {
                Error::Scheduler(format!(
                    "no job id in sbatch output: {:?}",
                    stdout,
                ))
            })
    }
}

pub struct SacctJobsCommand {
    pub job_id: Option<String>,
}

impl ShellCommand for SacctJobsCommand {
    type Output = Vec<Job>;

    fn render(&self) -> String {
        match &self.job_id {
            Some(id) => format!("sacct --json --jobs={}", shq(id)),
            None => "sacct --json".to_string(),
        }
    }

    fn parse(
        &self,
        stdout: &str,
        stderr: &str,
        exit_status: u32,
    ) -> Result<Vec<Job>> {
        if exit_status != 0 {
            return Err(scheduler_exit_error("sacct", stderr, exit_status));
        }

        let v = parse_json("sacct", stdout)?;
        v.get("jobs")
            .and_then(Value::as_array)
            .map(|jobs| jobs.iter().map(parse_slurmdb_job).collect())
            .unwrap_or_else(|| Ok(Vec::new()))
    }
}

pub struct SqueueCommand {
    pub job_id: Option<String>,
}

impl ShellCommand for SqueueCommand {
    type Output = Vec<Job>;

    fn render(&self) -> String {
        match &self.job_id {
            Some(id) => format!("squeue --json --jobs={}", shq(id)),
            None => "squeue --json".to_string(),
        }
    }

    fn parse(
        &self,
        stdout: &str,
        stderr: &str,
        exit_status: u32,
    ) -> Result<Vec<Job>> {
        if exit_status != 0 {
            if stderr.contains("Invalid job id specified") {
                return Ok(Vec::new());
            }
            return Err(scheduler_exit_error("squeue", stderr, exit_status));
        }

        let v = parse_json("squeue", stdout)?;
        v.get("jobs")
            .and_then(Value::as_array)
            .map(|jobs| jobs.iter().map(parse_squeue_job).collect())
            .unwrap_or_else(|| Ok(Vec::new()))
    }
}

pub struct SacctScriptCommand {
    pub job_id: String,
}

impl ShellCommand for SacctScriptCommand {
    type Output = Option<String>;

    fn render(&self) -> String {
        format!("sacct --batch-script --jobs={}", shq(&self.job_id))
    }

    fn parse(
        &self,
        stdout: &str,
        stderr: &str,
        exit_status: u32,
    ) -> Result<Option<String>> {
        if exit_status != 0 {
            return Err(scheduler_exit_error("sacct", stderr, exit_status));
        }

        /*
         * The script follows a "Batch Script for <id>" banner and a rule
         * of dashes.
         */
        let mut lines = stdout.lines().peekable();
        while let Some(line) = lines.peek() {
            if line.starts_with("Batch Script")
                || line.chars().all(|c| c == '-') && !line.is_empty()
            {
                lines.next();
            } else {
                break;
            }
        }
        let script = lines.collect::<Vec<_>>().join("\n");
        if script.trim().is_empty() {
            Ok(None)
        } else {
            Ok(Some(script))
        }
    }
}

pub struct ScontrolJobMetadataCommand {
    pub job_id: String,
}

impl ShellCommand for ScontrolJobMetadataCommand {
    type Output = Vec<JobMetadata>;

    fn render(&self) -> String {
        format!("scontrol show -o job {} --json", shq(&self.job_id))
    }

    fn parse(
        &self,
        stdout: &str,
        stderr: &str,
        exit_status: u32,
    ) -> Result<Vec<JobMetadata>> {
        if exit_status != 0 {
            if stderr.contains("Invalid job id specified") {
                return Ok(Vec::new());
            }
            return Err(scheduler_exit_error("scontrol", stderr, exit_status));
        }

        let v = parse_json("scontrol", stdout)?;
        Ok(v.get("jobs")
            .and_then(Value::as_array)
            .map(|jobs| {
                jobs.iter()
                    .filter_map(|raw| {
                        let job_id = raw
                            .get("job_id")
                            .and_then(opt_u64)?
                            .to_string();
                        Some(JobMetadata {
                            job_id,
                            script: None,
                            standard_input: raw
                                .get("standard_input")
                                .and_then(opt_str),
                            standard_output: raw
                                .get("standard_output")
                                .and_then(opt_str),
                            standard_error: raw
                                .get("standard_error")
                                .and_then(opt_str),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default())
    }
}

pub struct ScancelCommand {
    pub job_id: String,
}

impl ShellCommand for ScancelCommand {
    type Output = ();

    fn render(&self) -> String {
        format!("scancel {}", shq(&self.job_id))
    }

    fn parse(
        &self,
        _stdout: &str,
        stderr: &str,
        exit_status: u32,
    ) -> Result<()> {
        if exit_status != 0 {
            if stderr.contains("Invalid job id") {
                return Err(Error::NotFound("job not found".into()));
            }
            return Err(scheduler_exit_error("scancel", stderr, exit_status));
        }
        Ok(())
    }
}

pub struct ScontrolPingCommand;

impl ShellCommand for ScontrolPingCommand {
    type Output = Vec<SchedPing>;

    fn render(&self) -> String {
        "scontrol ping --json".to_string()
    }

    fn parse(
        &self,
        stdout: &str,
        stderr: &str,
        exit_status: u32,
    ) -> Result<Vec<SchedPing>> {
        if exit_status != 0 {
            return Err(scheduler_exit_error("scontrol", stderr, exit_status));
        }

        let v = parse_json("scontrol", stdout)?;
        Ok(v.get("pings")
            .and_then(Value::as_array)
            .map(|ps| ps.iter().map(parse_slurm_ping).collect())
            .unwrap_or_default())
    }
}

pub struct ScontrolPartitionsCommand;

impl ShellCommand for ScontrolPartitionsCommand {
    type Output = Vec<Partition>;

    fn render(&self) -> String {
        "scontrol show partitions --json".to_string()
    }

    fn parse(
        &self,
        stdout: &str,
        stderr: &str,
        exit_status: u32,
    ) -> Result<Vec<Partition>> {
        if exit_status != 0 {
            return Err(scheduler_exit_error("scontrol", stderr, exit_status));
        }

        let v = parse_json("scontrol", stdout)?;
        v.get("partitions")
            .and_then(Value::as_array)
            .map(|ps| ps.iter().map(parse_slurm_partition).collect())
            .unwrap_or_else(|| Ok(Vec::new()))
    }
}

pub struct ScontrolReservationsCommand;

impl ShellCommand for ScontrolReservationsCommand {
    type Output = Vec<Reservation>;

    fn render(&self) -> String {
        "scontrol show reservations --json".to_string()
    }

    fn parse(
        &self,
        stdout: &str,
        stderr: &str,
        exit_status: u32,
    ) -> Result<Vec<Reservation>> {
        if exit_status != 0 {
            return Err(scheduler_exit_error("scontrol", stderr, exit_status));
        }

        let v = parse_json("scontrol", stdout)?;
        v.get("reservations")
            .and_then(Value::as_array)
            .map(|rs| rs.iter().map(parse_slurm_reservation).collect())
            .unwrap_or_else(|| Ok(Vec::new()))
    }
}

pub struct SinfoCommand;

impl ShellCommand for SinfoCommand {
    type Output = Vec<Node>;

    fn render(&self) -> String {
        "sinfo -a -N --noheader --json".to_string()
    }

    fn parse(
        &self,
        stdout: &str,
        stderr: &str,
        exit_status: u32,
    ) -> Result<Vec<Node>> {
        if exit_status != 0 {
            return Err(scheduler_exit_error("sinfo", stderr, exit_status));
        }

        let v = parse_json("sinfo", stdout)?;
        Ok(v.get("sinfo")
            .and_then(Value::as_array)
            .map(|nodes| nodes.iter().filter_map(parse_sinfo_node).collect())
            .unwrap_or_default())
    }
}

fn parse_sinfo_node(raw: &Value) -> Option<Node> {
    let nodes = raw.get("nodes")?;
    let name = nodes
        .get("nodes")
        .and_then(Value::as_array)
        .and_then(|a| a.first())
        .and_then(Value::as_str)?
        .to_string();

    let cpus = raw.get("cpus");
    let memory = raw.get("memory");

    Some(Node {
        name,
        sockets: raw
            .get("sockets")
            .and_then(|v| v.get("minimum"))
            .and_then(opt_u64),
        cores: raw
            .get("cores")
            .and_then(|v| v.get("minimum"))
            .and_then(opt_u64),
        threads: raw
            .get("threads")
            .and_then(|v| v.get("minimum"))
            .and_then(opt_u64),
        cpus: cpus.and_then(|v| v.get("total")).and_then(opt_u64),
        cpu_load: cpus
            .and_then(|v| v.get("load"))
            .and_then(|v| v.get("minimum"))
            .and_then(opt_i64)
            .map(|n| n as f64 / 100.0),
        free_memory: memory
            .and_then(|v| v.get("free"))
            .and_then(|v| v.get("minimum"))
            .and_then(opt_u64),
        features: raw
            .get("features")
            .and_then(|v| v.get("active"))
            .and_then(Value::as_str)
            .map(|s| {
                s.split(',')
                    .filter(|f| !f.is_empty())
                    .map(str::to_string)
                    .collect()
            }),
        address: nodes
            .get("addresses")
            .and_then(Value::as_array)
            .and_then(|a| a.first())
            .and_then(Value::as_str)
            .map(str::to_string),
        hostname: nodes
            .get("hostnames")
            .and_then(Value::as_array)
            .and_then(|a| a.first())
            .and_then(Value::as_str)
            .map(str::to_string),
        state: raw
            .get("node")
            .and_then(|v| v.get("state"))
            .and_then(first_state)
            .map(|s| vec![s])
            .unwrap_or_default(),
        partitions: raw
            .get("partition")
            .and_then(|v| v.get("name"))
            .and_then(Value::as_str)
            .map(|s| s.split(',').map(str::to_string).collect()),
        weight: raw
            .get("weight")
            .and_then(|v| v.get("minimum"))
            .and_then(opt_u64),
        alloc_memory: memory.and_then(|v| v.get("allocated")).and_then(opt_u64),
        alloc_cpus: cpus.and_then(|v| v.get("allocated")).and_then(opt_u64),
        idle_cpus: cpus.and_then(|v| v.get("idle")).and_then(opt_u64),
    })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn sbatch_render() {
        let job: JobDescription = serde_json::from_value(serde_json::json!({
            "name": "X",
            "workingDirectory": "/u/a",
            "standardOutput": "/u/a/o.log",
            "env": { "PATH": "/bin" },
            "script": "#!/bin/bash\necho hi",
        }))
        .unwrap();
        let sbatch = SbatchCommand::from_description(&job);
        assert_eq!(
            sbatch.render(),
            "sbatch --parsable --chdir='/u/a' --job-name='X' \
            --output='/u/a/o.log' --export='PATH=/bin'",
        );
    }

    #[test]
    fn sbatch_parse_forms() {
        let job: JobDescription = serde_json::from_value(serde_json::json!({
            "workingDirectory": "/u/a",
            "script": "#!/bin/bash",
        }))
        .unwrap();
        let sbatch = SbatchCommand::from_description(&job);

        assert_eq!(sbatch.parse("12345\n", "", 0).unwrap(), 12345);
        assert_eq!(sbatch.parse("12345;cluster\n", "", 0).unwrap(), 12345);
        assert_eq!(
            sbatch.parse("Submitted batch job 12345\n", "", 0).unwrap(),
            12345,
        );
        assert!(sbatch.parse("nothing here\n", "", 0).is_err());
        assert!(sbatch.parse("", "sbatch: error", 1).is_err());
    }

    #[test]
    fn squeue_invalid_job_is_empty() {
        let squeue = SqueueCommand { job_id: Some("99".into()) };
        let out = squeue
            .parse("", "slurm_load_jobs error: Invalid job id specified", 1)
            .unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn sacct_script_banner_stripped() {
        let cmd = SacctScriptCommand { job_id: "7".into() };
        let stdout = "Batch Script for 7\n\
            --------------------------------------------------------------\n\
            #!/bin/bash\necho hi\n";
        assert_eq!(
            cmd.parse(stdout, "", 0).unwrap().as_deref(),
            Some("#!/bin/bash\necho hi"),
        );
        assert_eq!(cmd.parse("", "", 0).unwrap(), None);
    }

    #[test]
    fn scancel_missing_job() {
        let cmd = ScancelCommand { job_id: "99".into() };
        let err = cmd
            .parse("", "scancel: error: Invalid job id 99", 1)
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn sinfo_node_parse() {
        let cmd = SinfoCommand;
        let stdout = serde_json::json!({
            "sinfo": [{
                "sockets": {"minimum": 2},
                "cores": {"minimum": 16},
                "threads": {"minimum": 2},
                "cpus": {
                    "total": 64,
                    "load": {"minimum": 250},
                    "allocated": 32,
                    "idle": 32,
                },
                "memory": {
                    "free": {"minimum": {"set": true, "number": 120000}},
                    "allocated": 8000,
                },
                "features": {"active": "gpu,nvme"},
                "nodes": {
                    "nodes": ["nid001"],
                    "addresses": ["10.0.0.1"],
                    "hostnames": ["nid001"],
                },
                "node": {"state": ["MIXED"]},
                "partition": {"name": "normal"},
                "weight": {"minimum": 1},
            }],
        })
        .to_string();

        let nodes = cmd.parse(&stdout, "", 0).unwrap();
        assert_eq!(nodes.len(), 1);
        let n = &nodes[0];
        assert_eq!(n.name, "nid001");
        assert_eq!(n.cpus, Some(64));
        assert_eq!(n.cpu_load, Some(2.5));
        assert_eq!(n.free_memory, Some(120000));
        assert_eq!(
            n.features.as_ref().unwrap(),
            &vec!["gpu".to_string(), "nvme".to_string()],
        );
        assert_eq!(n.state, vec!["MIXED".to_string()]);
    }
}
