/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0.  If a copy of the MPL was not distributed with this
 * file, you can obtain one at https://mozilla.org/MPL/2.0/.
 */

use std::time::Duration;

use serde_json::{json, Value};

use clusteromat_types::sched::{
    Job, JobDescription, JobMetadata, Node, Partition, Reservation, SchedPing,
};

use super::{
    opt_i64, opt_str, opt_u64, parse_slurm_partition, parse_slurm_ping,
    parse_slurm_reservation, parse_slurmdb_job, version_at_least,
};
use crate::error::{Error, Result};

/**
 * SLURM REST backend.  All calls share one process-wide HTTP client with
 * a bounded per-host connection pool; the authenticated user's name and
 * raw token ride along as the X-SLURM-USER headers on every request.
 */
pub struct SlurmRestClient {
    client: reqwest::Client,
    api_url: String,
    api_version: String,
    timeout: Duration,
}

impl SlurmRestClient {
    pub fn new(
        client: reqwest::Client,
        api_url: &str,
        api_version: &str,
        timeout: Duration,
    ) -> SlurmRestClient {
        SlurmRestClient {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            api_version: api_version.to_string(),
            timeout,
        }
    }

    fn url(&self, family: &str, tail: &str) -> String {
        format!(
            "{}/{}/v{}/{}",
            self.api_url, family, self.api_version, tail,
        )
    }

    async fn request(
        &self,
        method: reqwest::Method,
        url: String,
        username: &str,
        access_token: &str,
        body: Option<Value>,
    ) -> Result<Value> {
        let mut req = self
            .client
            .request(method, &url)
            .timeout(self.timeout)
            .header("Content-Type", "application/json")
            .header("X-SLURM-USER-NAME", username)
            .header("X-SLURM-USER-TOKEN", access_token);
        if let Some(body) = body {
            req = req.json(&body);
        }

        let res = req.send().await.map_err(|e| {
            if e.is_timeout() {
                Error::TimeoutLimitExceeded(format!(
                    "scheduler API timeout: {}",
                    url,
                ))
            } else {
                Error::Scheduler(format!("scheduler API request: {}", e))
            }
        })?;

        let status = res.status();
        if !status.is_success() {
            let message = res.text().await.unwrap_or_default();
            return Err(Error::Scheduler(format!(
                "unexpected scheduler API response; status:{} message:{}",
                status, message,
            )));
        }

        res.json::<Value>().await.map_err(|e| {
            Error::Scheduler(format!("scheduler API body: {}", e))
        })
    }

    pub async fn submit_job(
        &self,
        job: &JobDescription,
        username: &str,
        access_token: &str,
    ) -> Result<u64> {
        let body = submit_body(job, &self.api_version);
        let v = self
            .request(
                reqwest::Method::POST,
                self.url("slurm", "job/submit"),
                username,
                access_token,
                Some(body),
            )
            .await?;

        v.get("job_id").and_then(opt_u64).ok_or_else(|| {
            Error::Scheduler(format!(
                "job submission response without job_id: {}",
                v,
            ))
        })
    }

    async fn fetch_jobs(
        &self,
        tail: &str,
        username: &str,
        access_token: &str,
        allusers: bool,
    ) -> Result<Vec<Job>> {
        let v = self
            .request(
                reqwest::Method::GET,
                self.url("slurmdb", tail),
                username,
                access_token,
                None,
            )
            .await?;

        let raw_jobs = v
            .get("jobs")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        raw_jobs
            .iter()
            .filter(|raw| {
                /*
                 * Older API versions cannot filter by user server-side.
                 */
                allusers
                    || raw.get("user").and_then(Value::as_str)
                        == Some(username)
            })
            .map(parse_slurmdb_job)
            .collect()
    }

    pub async fn get_job(
        &self,
        job_id: &str,
        username: &str,
        access_token: &str,
    ) -> Result<Vec<Job>> {
        self.fetch_jobs(
            &format!("job/{}", job_id),
            username,
            access_token,
            true,
        )
        .await
    }

    pub async fn get_jobs(
        &self,
        username: &str,
        access_token: &str,
        allusers: bool,
    ) -> Result<Vec<Job>> {
        self.fetch_jobs("jobs", username, access_token, allusers).await
    }

    pub async fn get_job_metadata(
        &self,
        _job_id: &str,
        _username: &str,
        _access_token: &str,
    ) -> Result<Vec<JobMetadata>> {
        /*
         * The slurmdb job endpoint does not expose stdout/stderr paths.
         */
        Err(Error::NotImplemented(
            "job metadata is not available through the SLURM REST API".into(),
        ))
    }

    pub async fn cancel_job(
        &self,
        job_id: &str,
        username: &str,
        access_token: &str,
    ) -> Result<()> {
        self.request(
            reqwest::Method::DELETE,
            self.url("slurm", &format!("job/{}", job_id)),
            username,
            access_token,
            None,
        )
        .await?;
        Ok(())
    }

    pub async fn get_nodes(
        &self,
        username: &str,
        access_token: &str,
    ) -> Result<Vec<Node>> {
        let v = self
            .request(
                reqwest::Method::GET,
                self.url("slurm", "nodes"),
                username,
                access_token,
                None,
            )
            .await?;

        Ok(v.get("nodes")
            .and_then(Value::as_array)
            .map(|nodes| nodes.iter().map(parse_rest_node).collect())
            .unwrap_or_default())
    }

    pub async fn get_partitions(
        &self,
        username: &str,
        access_token: &str,
    ) -> Result<Vec<Partition>> {
        let v = self
            .request(
                reqwest::Method::GET,
                self.url("slurm", "partitions"),
                username,
                access_token,
                None,
            )
            .await?;

        v.get("partitions")
            .and_then(Value::as_array)
            .map(|ps| ps.iter().map(parse_slurm_partition).collect())
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    pub async fn get_reservations(
        &self,
        username: &str,
        access_token: &str,
    ) -> Result<Vec<Reservation>> {
        let v = self
            .request(
                reqwest::Method::GET,
                self.url("slurm", "reservations"),
                username,
                access_token,
                None,
            )
            .await?;

        v.get("reservations")
            .and_then(Value::as_array)
            .map(|rs| rs.iter().map(parse_slurm_reservation).collect())
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    pub async fn ping(
        &self,
        username: &str,
        access_token: &str,
    ) -> Result<Vec<SchedPing>> {
        let v = self
            .request(
                reqwest::Method::GET,
                self.url("slurm", "ping"),
                username,
                access_token,
                None,
            )
            .await?;

        Ok(v.get("pings")
            .and_then(Value::as_array)
            .map(|ps| ps.iter().map(parse_slurm_ping).collect())
            .unwrap_or_default())
    }
}

/**
 * Shape the submission body for the configured API version:
 *
 * - from 0.0.39 the environment field is a list of "K=V" strings rather
 *   than an object;
 * - before 0.0.41 the script is not part of the job object and travels
 *   as a top-level field instead.
 */
pub(crate) fn submit_body(job: &JobDescription, api_version: &str) -> Value {
    let mut j = serde_json::Map::new();
    if let Some(name) = &job.name {
        j.insert("name".into(), json!(name));
    }
    if let Some(account) = &job.account {
        j.insert("account".into(), json!(account));
    }
    j.insert(
        "current_working_directory".into(),
        json!(job.working_directory),
    );
    if let Some(v) = &job.standard_input {
        j.insert("standard_input".into(), json!(v));
    }
    if let Some(v) = &job.standard_output {
        j.insert("standard_output".into(), json!(v));
    }
    if let Some(v) = &job.standard_error {
        j.insert("standard_error".into(), json!(v));
    }
    if let Some(v) = &job.constraints {
        j.insert("constraints".into(), json!(v));
    }

    if let Some(env) = &job.environment {
        if version_at_least(api_version, (0, 0, 39)) {
            let env = env
                .iter()
                .map(|(k, v)| {
                    if v.is_empty() {
                        k.to_string()
                    } else {
                        format!("{}={}", k, v)
                    }
                })
                .collect::<Vec<_>>();
            j.insert("environment".into(), json!(env));
        } else {
            j.insert("environment".into(), json!(env));
        }
    }

    let script = job
        .script
        .clone()
        .or_else(|| job.script_path.clone())
        .unwrap_or_default();

    if version_at_least(api_version, (0, 0, 41)) {
        j.insert("script".into(), json!(script));
        json!({ "job": j })
    } else {
        json!({ "job": j, "script": script })
    }
}

fn parse_rest_node(raw: &Value) -> Node {
    Node {
        name: raw.get("name").and_then(opt_str).unwrap_or_default(),
        sockets: raw.get("sockets").and_then(opt_u64),
        cores: raw.get("cores").and_then(opt_u64),
        threads: raw.get("threads").and_then(opt_u64),
        cpus: raw.get("cpus").and_then(opt_u64),
        cpu_load: raw.get("cpu_load").and_then(|v| match v {
            Value::Number(n) => n.as_f64(),
            other => opt_i64(other).map(|n| n as f64),
        }),
        free_memory: raw.get("free_mem").and_then(opt_u64).or_else(|| {
            raw.get("free_memory").and_then(opt_u64)
        }),
        features: raw.get("features").and_then(|v| match v {
            Value::String(s) => Some(
                s.split(',')
                    .filter(|f| !f.is_empty())
                    .map(str::to_string)
                    .collect(),
            ),
            Value::Array(a) => Some(
                a.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect(),
            ),
            _ => None,
        }),
        address: raw.get("address").and_then(opt_str),
        hostname: raw.get("hostname").and_then(opt_str),
        state: raw
            .get("state")
            .map(|v| match v {
                Value::String(s) => vec![s.to_string()],
                Value::Array(a) => a
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect(),
                _ => Vec::new(),
            })
            .unwrap_or_default(),
        partitions: raw.get("partitions").and_then(Value::as_array).map(|a| {
            a.iter().filter_map(Value::as_str).map(str::to_string).collect()
        }),
        weight: raw.get("weight").and_then(opt_u64),
        alloc_memory: raw.get("alloc_memory").and_then(opt_u64),
        alloc_cpus: raw.get("alloc_cpus").and_then(opt_u64),
        idle_cpus: raw.get("alloc_idle_cpus").and_then(opt_u64).or_else(|| {
            raw.get("idle_cpus").and_then(opt_u64)
        }),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::BTreeMap;

    fn description() -> JobDescription {
        JobDescription {
            name: Some("X".into()),
            account: None,
            working_directory: "/u/a".into(),
            standard_input: None,
            standard_output: Some("/u/a/out.log".into()),
            standard_error: None,
            environment: Some(BTreeMap::from([
                ("PATH".to_string(), "/bin".to_string()),
                ("FLAG".to_string(), "".to_string()),
            ])),
            constraints: None,
            script: Some("#!/bin/bash\necho hi".into()),
            script_path: None,
        }
    }

    #[test]
    fn submit_body_v0_0_40_extracts_script_and_listifies_env() {
        let body = submit_body(&description(), "0.0.40");

        assert_eq!(body["script"], "#!/bin/bash\necho hi");
        let job = &body["job"];
        assert!(job.get("script").is_none());
        assert_eq!(job["name"], "X");
        assert_eq!(job["current_working_directory"], "/u/a");
        let env = job["environment"].as_array().unwrap();
        assert!(env.contains(&json!("PATH=/bin")));
        assert!(env.contains(&json!("FLAG")));
    }

    #[test]
    fn submit_body_v0_0_38_keeps_env_object() {
        let body = submit_body(&description(), "0.0.38");
        assert_eq!(body["script"], "#!/bin/bash\necho hi");
        assert_eq!(body["job"]["environment"]["PATH"], "/bin");
    }

    #[test]
    fn submit_body_v0_0_41_inlines_script() {
        let body = submit_body(&description(), "0.0.41");
        assert!(body.get("script").is_none());
        assert_eq!(body["job"]["script"], "#!/bin/bash\necho hi");
        assert!(body["job"]["environment"].is_array());
    }
}
