/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0.  If a copy of the MPL was not distributed with this
 * file, you can obtain one at https://mozilla.org/MPL/2.0/.
 */

use std::path::Path;

use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::health::ServiceHealth;

/**
 * A string configuration value that may be provided inline or, with the
 * "secret_file:/path" form, loaded from a file at parse time.  The value
 * never serialises back out.
 */
#[derive(Clone, JsonSchema)]
pub struct Secret(#[schemars(with = "String")] String);

impl Secret {
    pub fn new(value: &str) -> Secret {
        Secret(value.to_string())
    }

    pub fn value(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str("Secret(**********)")
    }
}

impl Serialize for Secret {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str("**********")
    }
}

impl<'de> Deserialize<'de> for Secret {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Secret, D::Error> {
        let raw = String::deserialize(d)?;
        if let Some(path) = raw.strip_prefix("secret_file:") {
            let path = Path::new(path);
            let data = std::fs::read_to_string(path).map_err(|e| {
                serde::de::Error::custom(format!(
                    "secret file {:?}: {}",
                    path, e
                ))
            })?;
            Ok(Secret(data.trim().to_string()))
        } else {
            Ok(Secret(raw))
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerType {
    Slurm,
    Pbs,
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerConfig {
    #[serde(rename = "type")]
    pub scheduler_type: SchedulerType,
    pub version: String,
    #[serde(default)]
    pub api_url: Option<String>,
    #[serde(default)]
    pub api_version: Option<String>,
    /**
     * Timeout in seconds for talking to the scheduler API.
     */
    #[serde(default = "default_scheduler_timeout")]
    pub timeout: u64,
}

fn default_scheduler_timeout() -> u64 {
    10
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ServiceAccount {
    pub client_id: String,
    pub secret: Secret,
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Probing {
    /**
     * Seconds between probe cycles.
     */
    pub interval: u64,
    /**
     * Per-check deadline in seconds.
     */
    pub timeout: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum FileSystemDataType {
    Users,
    Store,
    Archive,
    Apps,
    Scratch,
    Project,
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FileSystem {
    pub path: String,
    pub data_type: FileSystemDataType,
    #[serde(default)]
    pub default_work_dir: bool,
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SshTimeouts {
    #[serde(default = "default_five")]
    pub connection: u64,
    #[serde(default = "default_five")]
    pub login: u64,
    #[serde(default = "default_five")]
    pub command_execution: u64,
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout: u64,
    #[serde(default = "default_five")]
    pub keep_alive: u64,
}

fn default_five() -> u64 {
    5
}

fn default_idle_timeout() -> u64 {
    60
}

impl Default for SshTimeouts {
    fn default() -> SshTimeouts {
        SshTimeouts {
            connection: 5,
            login: 5,
            command_execution: 5,
            idle_timeout: 60,
            keep_alive: 5,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SshConfig {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub proxy_host: Option<String>,
    #[serde(default)]
    pub proxy_port: Option<u16>,
    #[serde(default = "default_max_clients")]
    pub max_clients: usize,
    #[serde(default)]
    pub timeout: SshTimeouts,
}

fn default_max_clients() -> usize {
    100
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HpcCluster {
    pub name: String,
    pub ssh: SshConfig,
    pub scheduler: SchedulerConfig,
    #[serde(default, skip_serializing)]
    pub service_account: Option<ServiceAccount>,
    pub probing: Probing,
    #[serde(default)]
    pub file_systems: Vec<FileSystem>,
    /**
     * Scheduler directives prepended to every data transfer job script.
     * An "{account}" placeholder requires the caller to name an account.
     */
    #[serde(default)]
    pub datatransfer_jobs_directives: Vec<String>,
    #[serde(default, skip_deserializing)]
    pub services_health: Option<Vec<ServiceHealth>>,
}

impl HpcCluster {
    /**
     * The one filesystem flagged as the default work directory, where
     * per-user staging for gateway-submitted jobs happens.
     */
    pub fn default_work_dir(&self) -> Option<&str> {
        self.file_systems
            .iter()
            .find(|fs| fs.default_work_dir)
            .map(|fs| fs.path.as_str())
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MultipartConfig {
    #[serde(default)]
    pub use_split: bool,
    #[serde(default = "default_max_part_size")]
    pub max_part_size: u64,
    #[serde(default = "default_parallel_runs")]
    pub parallel_runs: u64,
    #[serde(default = "default_tmp_folder")]
    pub tmp_folder: String,
}

fn default_max_part_size() -> u64 {
    2 * 1024 * 1024 * 1024
}

fn default_parallel_runs() -> u64 {
    3
}

fn default_tmp_folder() -> String {
    "tmp".to_string()
}

impl Default for MultipartConfig {
    fn default() -> MultipartConfig {
        MultipartConfig {
            use_split: false,
            max_part_size: default_max_part_size(),
            parallel_runs: default_parallel_runs(),
            tmp_folder: default_tmp_folder(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BucketLifecycleConfig {
    /**
     * Days after which staged objects expire from the bucket.
     */
    #[serde(default = "default_lifecycle_days")]
    pub days: i32,
}

fn default_lifecycle_days() -> i32 {
    10
}

impl Default for BucketLifecycleConfig {
    fn default() -> BucketLifecycleConfig {
        BucketLifecycleConfig { days: default_lifecycle_days() }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StreamerTransferConfig {
    #[serde(default = "default_port_range")]
    pub port_range: (u16, u16),
    #[serde(default)]
    pub public_ips: Vec<String>,
    #[serde(default = "default_wait_timeout")]
    pub wait_timeout: u64,
    #[serde(default = "default_inbound_limit")]
    pub inbound_transfer_limit: u64,
}

fn default_port_range() -> (u16, u16) {
    (50000, 60000)
}

fn default_wait_timeout() -> u64 {
    60 * 60 * 24
}

fn default_inbound_limit() -> u64 {
    5 * 1024 * 1024 * 1024
}

impl Default for StreamerTransferConfig {
    fn default() -> StreamerTransferConfig {
        StreamerTransferConfig {
            port_range: default_port_range(),
            public_ips: Default::default(),
            wait_timeout: default_wait_timeout(),
            inbound_transfer_limit: default_inbound_limit(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StorageConfig {
    pub name: String,
    pub private_url: Secret,
    pub public_url: String,
    pub access_key_id: Secret,
    pub secret_access_key: Secret,
    pub region: String,
    /**
     * Lifetime of minted presigned URLs, in seconds.
     */
    pub ttl: u64,
    #[serde(default)]
    pub tenant: Option<String>,
    #[serde(default)]
    pub multipart: MultipartConfig,
    #[serde(default)]
    pub bucket_lifecycle_configuration: BucketLifecycleConfig,
    #[serde(default = "default_max_ops_file_size")]
    pub max_ops_file_size: u64,
    #[serde(default)]
    pub streamer: StreamerTransferConfig,
    #[serde(default)]
    pub probing: Option<Probing>,
    #[serde(default, skip_deserializing)]
    pub services_health: Option<Vec<ServiceHealth>>,
}

pub fn default_max_ops_file_size() -> u64 {
    5 * 1024 * 1024
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SshUserKeys {
    pub private_key: Secret,
    #[serde(default)]
    pub public_cert: Option<String>,
    #[serde(default)]
    pub passphrase: Option<Secret>,
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SshServiceConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

fn default_max_connections() -> usize {
    100
}

/**
 * The sshCredentials YAML key accepts either a remote signing service or a
 * static map of per-user keys; the two shapes are disambiguated here so the
 * rest of the system deals with one enum.
 */
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(untagged)]
pub enum SshCredentialsConfig {
    Service(SshServiceConfig),
    #[serde(rename_all = "camelCase")]
    Static {
        keys: std::collections::HashMap<String, SshUserKeys>,
    },
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OidcConfig {
    pub token_url: String,
    #[serde(default)]
    pub public_certs: Vec<String>,
    #[serde(default)]
    pub scopes: std::collections::HashMap<String, String>,
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationConfig {
    pub url: String,
    #[serde(default)]
    pub timeout: Option<u64>,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AuthConfig {
    pub authentication: OidcConfig,
    #[serde(default)]
    pub authorization: Option<AuthorizationConfig>,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn secret_inline_value() {
        let s: Secret = serde_json::from_str("\"hunter2\"").unwrap();
        assert_eq!(s.value(), "hunter2");
        assert_eq!(serde_json::to_string(&s).unwrap(), "\"**********\"");
    }

    #[test]
    fn ssh_credentials_shapes() {
        let svc: SshCredentialsConfig = serde_json::from_str(
            r#"{"url": "http://signer:8080", "maxConnections": 10}"#,
        )
        .unwrap();
        assert!(matches!(svc, SshCredentialsConfig::Service(_)));

        let stat: SshCredentialsConfig = serde_json::from_str(
            r#"{"keys": {"alice": {"privateKey": "KEYDATA"}}}"#,
        )
        .unwrap();
        match stat {
            SshCredentialsConfig::Static { keys } => {
                assert_eq!(keys["alice"].private_key.value(), "KEYDATA");
            }
            _ => panic!("expected static keys"),
        }
    }

    #[test]
    fn cluster_default_work_dir() {
        let c: HpcCluster = serde_json::from_value(serde_json::json!({
            "name": "cA",
            "ssh": { "host": "login.cA", "port": 22 },
            "scheduler": { "type": "slurm", "version": "24.05" },
            "probing": { "interval": 30, "timeout": 5 },
            "fileSystems": [
                { "path": "/home", "dataType": "users" },
                { "path": "/scratch", "dataType": "scratch",
                  "defaultWorkDir": true },
            ],
        }))
        .unwrap();
        assert_eq!(c.default_work_dir(), Some("/scratch"));
        assert_eq!(c.ssh.timeout.idle_timeout, 60);
        assert_eq!(c.ssh.max_clients, 100);
    }
}
