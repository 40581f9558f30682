/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0.  If a copy of the MPL was not distributed with this
 * file, you can obtain one at https://mozilla.org/MPL/2.0/.
 */

use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use clusteromat_types::config::{
    AuthConfig, HpcCluster, SshCredentialsConfig, StorageConfig,
};

/**
 * The clusters key is either an inline list of cluster definitions or a
 * "path:/dir" string naming a directory of per-cluster YAML files.
 */
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ClustersSource {
    Path(String),
    List(Vec<HpcCluster>),
}

impl Default for ClustersSource {
    fn default() -> ClustersSource {
        ClustersSource::List(Vec::new())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsFile {
    #[serde(default)]
    pub app_debug: bool,
    #[serde(default)]
    pub apis_root_path: String,
    #[serde(default)]
    pub doc_servers: Option<Vec<serde_json::Value>>,
    #[serde(default)]
    pub auth: Option<AuthConfig>,
    pub ssh_credentials: SshCredentialsConfig,
    #[serde(default)]
    clusters: ClustersSource,
    #[serde(default)]
    pub storage: Option<StorageConfig>,
}

#[derive(Debug)]
pub struct Settings {
    pub app_debug: bool,
    pub apis_root_path: String,
    pub doc_servers: Option<Vec<serde_json::Value>>,
    pub auth: Option<AuthConfig>,
    pub ssh_credentials: SshCredentialsConfig,
    pub clusters: Vec<HpcCluster>,
    pub storage: Option<StorageConfig>,
}

pub fn load_from_env() -> Result<Settings> {
    let path = std::env::var("YAML_CONFIG_FILE")
        .or_else(|_| std::env::var("INPUT_YAML_CONFIG_FILE"))
        .ok()
        .filter(|s| !s.is_empty());
    let Some(path) = path else {
        bail!("YAML_CONFIG_FILE environment variable is not set");
    };
    load(&path)
}

pub fn load(path: &str) -> Result<Settings> {
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("reading settings file {:?}", path))?;
    let sf: SettingsFile = serde_yaml::from_str(&data)
        .with_context(|| format!("parsing settings file {:?}", path))?;

    let clusters = match sf.clusters {
        ClustersSource::List(clusters) => clusters,
        ClustersSource::Path(p) => {
            let Some(dir) = p.strip_prefix("path:") else {
                bail!("clusters must be a list or a \"path:/dir\" string");
            };
            load_cluster_dir(Path::new(dir))?
        }
    };

    let settings = Settings {
        app_debug: sf.app_debug,
        apis_root_path: sf.apis_root_path,
        doc_servers: sf.doc_servers,
        auth: sf.auth,
        ssh_credentials: sf.ssh_credentials,
        clusters,
        storage: sf.storage,
    };
    validate(&settings)?;
    Ok(settings)
}

fn load_cluster_dir(dir: &Path) -> Result<Vec<HpcCluster>> {
    if !dir.is_dir() {
        bail!("clusters path {:?} is not a directory", dir);
    }

    let mut out = Vec::new();
    let mut names = std::fs::read_dir(dir)
        .with_context(|| format!("listing clusters path {:?}", dir))?
        .filter_map(|ent| ent.ok().map(|ent| ent.path()))
        .filter(|p| p.extension().and_then(|x| x.to_str()) == Some("yaml"))
        .collect::<Vec<_>>();
    names.sort();

    for p in names {
        let data = std::fs::read_to_string(&p)
            .with_context(|| format!("reading cluster file {:?}", p))?;
        let cluster: HpcCluster = serde_yaml::from_str(&data)
            .with_context(|| format!("parsing cluster file {:?}", p))?;
        out.push(cluster);
    }
    Ok(out)
}

fn validate(settings: &Settings) -> Result<()> {
    let mut seen = std::collections::HashSet::new();
    for c in settings.clusters.iter() {
        if !seen.insert(c.name.as_str()) {
            bail!("duplicate cluster name {:?}", c.name);
        }

        let ndefault =
            c.file_systems.iter().filter(|fs| fs.default_work_dir).count();
        if ndefault > 1 {
            bail!(
                "cluster {:?}: at most one filesystem may be the \
                default work directory",
                c.name,
            );
        }

        if c.probing.interval == 0 {
            bail!("cluster {:?}: probing interval must be positive", c.name);
        }

        let t = &c.ssh.timeout;
        if t.idle_timeout <= t.command_execution {
            bail!(
                "cluster {:?}: idle timeout ({}s) must exceed the command \
                execution timeout ({}s)",
                c.name,
                t.idle_timeout,
                t.command_execution,
            );
        }

        if c.scheduler.api_url.is_some() && c.scheduler.api_version.is_none() {
            bail!(
                "cluster {:?}: scheduler apiUrl requires apiVersion",
                c.name,
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use clusteromat_types::config::SchedulerType;

    const SETTINGS: &str = r##"
appDebug: false
apisRootPath: ""
sshCredentials:
  url: "http://signer.internal:8080"
  maxConnections: 16
clusters:
  - name: cA
    ssh:
      host: login.ca.example
      port: 22
      maxClients: 10
      timeout:
        connection: 5
        login: 5
        commandExecution: 5
        idleTimeout: 60
        keepAlive: 5
    scheduler:
      type: slurm
      version: "24.05"
      apiUrl: "http://slurmrestd.ca.example:6820"
      apiVersion: "0.0.40"
      timeout: 10
    probing:
      interval: 30
      timeout: 5
    fileSystems:
      - path: /home
        dataType: users
      - path: /scratch
        dataType: scratch
        defaultWorkDir: true
    datatransferJobsDirectives:
      - "#SBATCH --partition=xfer"
      - "#SBATCH --account={account}"
storage:
  name: staging
  privateUrl: "http://minio.internal:9000"
  publicUrl: "https://s3.example.com"
  accessKeyId: "storage-key"
  secretAccessKey: "storage-secret"
  region: us-east-1
  ttl: 604800
  maxOpsFileSize: 5242880
"##;

    fn write_temp(tag: &str, content: &str) -> std::path::PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!(
            "clusteromat-settings-{}-{}.yaml",
            std::process::id(),
            tag,
        ));
        std::fs::write(&p, content).unwrap();
        p
    }

    #[test]
    fn load_full_settings() {
        let p = write_temp("full", SETTINGS);
        let s = load(p.to_str().unwrap()).unwrap();
        std::fs::remove_file(&p).ok();

        assert_eq!(s.clusters.len(), 1);
        let c = &s.clusters[0];
        assert_eq!(c.name, "cA");
        assert_eq!(c.scheduler.scheduler_type, SchedulerType::Slurm);
        assert_eq!(c.scheduler.api_version.as_deref(), Some("0.0.40"));
        assert_eq!(c.default_work_dir(), Some("/scratch"));
        assert_eq!(c.datatransfer_jobs_directives.len(), 2);

        let st = s.storage.unwrap();
        assert_eq!(st.max_ops_file_size, 5242880);
        assert_eq!(st.multipart.max_part_size, 2 * 1024 * 1024 * 1024);
        assert_eq!(st.bucket_lifecycle_configuration.days, 10);
        assert!(matches!(
            s.ssh_credentials,
            SshCredentialsConfig::Service(_)
        ));
    }

    #[test]
    fn reject_idle_not_above_execute() {
        let bad = SETTINGS.replace("idleTimeout: 60", "idleTimeout: 5");
        let p = write_temp("idle", &bad);
        let res = load(p.to_str().unwrap());
        std::fs::remove_file(&p).ok();
        assert!(res.is_err());
    }
}
