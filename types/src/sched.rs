/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0.  If a copy of the MPL was not distributed with this
 * file, you can obtain one at https://mozilla.org/MPL/2.0/.
 */

/*
 * The normalized scheduler model.  Every backend (SLURM REST, SLURM CLI,
 * PBS CLI) parses its own wire shapes into these records; nothing
 * backend-specific escapes the scheduler clients.
 */

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    pub state: String,
    #[serde(default)]
    pub state_reason: Option<String>,
    #[serde(default)]
    pub exit_code: Option<i64>,
    #[serde(default)]
    pub interrupt_signal: Option<i64>,
}

/**
 * Job times, all in whole seconds; instants are UNIX epoch seconds and
 * elapsed/limit/suspended are durations.
 */
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct JobTime {
    #[serde(default)]
    pub submission: Option<i64>,
    #[serde(default)]
    pub start: Option<i64>,
    #[serde(default)]
    pub end: Option<i64>,
    #[serde(default)]
    pub elapsed: Option<i64>,
    #[serde(default)]
    pub suspended: Option<i64>,
    #[serde(default)]
    pub limit: Option<i64>,
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct JobTask {
    pub id: String,
    pub name: String,
    pub status: JobStatus,
    pub time: JobTime,
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub job_id: u64,
    pub name: String,
    pub status: JobStatus,
    pub time: JobTime,
    #[serde(default)]
    pub tasks: Option<Vec<JobTask>>,
    #[serde(default)]
    pub account: Option<String>,
    pub allocation_nodes: Option<u64>,
    pub cluster: Option<String>,
    #[serde(default)]
    pub group: Option<String>,
    pub nodes: Option<String>,
    pub partition: Option<String>,
    #[serde(default)]
    pub kill_request_user: Option<String>,
    pub user: Option<String>,
    pub working_directory: Option<String>,
    #[serde(default)]
    pub priority: Option<i64>,
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct JobMetadata {
    pub job_id: String,
    #[serde(default)]
    pub script: Option<String>,
    #[serde(default)]
    pub standard_input: Option<String>,
    #[serde(default)]
    pub standard_output: Option<String>,
    #[serde(default)]
    pub standard_error: Option<String>,
}

/**
 * A job submission.  Exactly one of script and script_path must be given;
 * the working directory must be absolute.  Both constraints are enforced
 * by validate() before the description reaches a backend.
 */
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct JobDescription {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub account: Option<String>,
    pub working_directory: String,
    #[serde(default)]
    pub standard_input: Option<String>,
    #[serde(default)]
    pub standard_output: Option<String>,
    #[serde(default)]
    pub standard_error: Option<String>,
    #[serde(default, alias = "env")]
    pub environment: Option<std::collections::BTreeMap<String, String>>,
    #[serde(default)]
    pub constraints: Option<String>,
    #[serde(default)]
    pub script: Option<String>,
    #[serde(default)]
    pub script_path: Option<String>,
}

impl JobDescription {
    pub fn validate(&self) -> Result<(), String> {
        match (self.script.as_deref(), self.script_path.as_deref()) {
            (Some(_), Some(_)) => {
                return Err(
                    "only one of script and scriptPath may be given".into()
                );
            }
            (None, None) => {
                return Err("one of script and scriptPath is required".into());
            }
            _ => (),
        }
        if !self.working_directory.starts_with('/') {
            return Err("workingDirectory must be an absolute path".into());
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub name: String,
    #[serde(default)]
    pub sockets: Option<u64>,
    #[serde(default)]
    pub cores: Option<u64>,
    #[serde(default)]
    pub threads: Option<u64>,
    pub cpus: Option<u64>,
    #[serde(default)]
    pub cpu_load: Option<f64>,
    #[serde(default)]
    pub free_memory: Option<u64>,
    #[serde(default)]
    pub features: Option<Vec<String>>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub hostname: Option<String>,
    pub state: Vec<String>,
    #[serde(default)]
    pub partitions: Option<Vec<String>>,
    #[serde(default)]
    pub weight: Option<u64>,
    #[serde(default)]
    pub alloc_memory: Option<u64>,
    #[serde(default)]
    pub alloc_cpus: Option<u64>,
    #[serde(default)]
    pub idle_cpus: Option<u64>,
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Partition {
    pub name: String,
    #[serde(default)]
    pub cpus: Option<u64>,
    #[serde(default)]
    pub total_nodes: Option<u64>,
    pub partition: Vec<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Reservation {
    pub name: String,
    pub node_list: String,
    pub start_time: i64,
    pub end_time: i64,
    #[serde(default)]
    pub features: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SchedPing {
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub pinged: Option<String>,
    #[serde(default)]
    pub latency: Option<i64>,
    #[serde(default)]
    pub mode: Option<String>,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn job_description_validation() {
        let mut jd: JobDescription = serde_json::from_value(serde_json::json!({
            "name": "X",
            "workingDirectory": "/u/a",
            "script": "#!/bin/bash\necho hi",
        }))
        .unwrap();
        assert!(jd.validate().is_ok());

        jd.script_path = Some("/u/a/batch.sh".into());
        assert!(jd.validate().is_err());

        jd.script = None;
        assert!(jd.validate().is_ok());

        jd.script_path = None;
        assert!(jd.validate().is_err());

        jd.script = Some("#!/bin/bash".into());
        jd.working_directory = "relative/dir".into();
        assert!(jd.validate().is_err());
    }

    #[test]
    fn job_description_env_alias() {
        let jd: JobDescription = serde_json::from_value(serde_json::json!({
            "workingDirectory": "/u/a",
            "script": "#!/bin/bash",
            "env": { "PATH": "/bin" },
        }))
        .unwrap();
        assert_eq!(jd.environment.unwrap()["PATH"], "/bin");
    }
}
