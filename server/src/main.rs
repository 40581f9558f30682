/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0.  If a copy of the MPL was not distributed with this
 * file, you can obtain one at https://mozilla.org/MPL/2.0/.
 */

/*
 * The gateway server: a dropshot API in front of one or more HPC
 * clusters.  Every mediated request resolves a cluster, consults its
 * health snapshot, and acts as the authenticated caller over SSH, the
 * scheduler API, or the staging object store.
 */

use std::process::exit;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use aws_types::region::Region;
use dropshot::{
    ApiDescription, ConfigDropshot, HttpServerStarter, RequestInfo,
};
use getopts::Options;
#[allow(unused_imports)]
use slog::{debug, error, info, o, warn, Logger};

use clusteromat_common::make_log;
use clusteromat_types::config::{HpcCluster, SchedulerType, StorageConfig};
use clusteromat_types::health::{ServiceHealth, ServiceType};

mod api;
mod cmd;
mod config;
mod error;
mod health;
mod keys;
mod sched;
mod ssh;
mod transfer;

use error::{Error, OrHttpError};
use keys::CredentialsProvider;
use sched::{PbsCliClient, SchedulerClient, SlurmCliClient, SlurmRestClient};
use ssh::SshPool;
use transfer::TransferEnv;

pub(crate) trait ApiResultEx {
    fn api_check(&self) -> Result<()>;
}

impl ApiResultEx for std::result::Result<(), String> {
    fn api_check(&self) -> Result<()> {
        self.as_ref()
            .map_err(|e| anyhow!("API registration failure: {}", e))?;
        Ok(())
    }
}

/**
 * The authenticated caller: the verified username and the raw access
 * token, which rides along to backends that authenticate the user
 * themselves (scheduler REST headers, the key signing service).
 */
pub(crate) struct AuthUser {
    pub username: String,
    pub token: String,
}

/**
 * One configured cluster with its live per-user SSH pool, its scheduler
 * client, and the health snapshot maintained by the prober.
 */
pub(crate) struct ClusterHandle {
    pub config: HpcCluster,
    pub pool: Arc<SshPool>,
    pub scheduler: SchedulerClient,
    health: std::sync::Mutex<Option<Arc<Vec<ServiceHealth>>>>,
}

impl ClusterHandle {
    /**
     * The current health snapshot.  The prober replaces the whole vector
     * in one step, so a reader's view is always one consistent cycle.
     */
    pub fn snapshot(&self) -> Option<Arc<Vec<ServiceHealth>>> {
        self.health.lock().unwrap().clone()
    }

    pub fn set_health(&self, results: Vec<ServiceHealth>) {
        *self.health.lock().unwrap() = Some(Arc::new(results));
    }

    /**
     * The availability gate: deny the request when the last probe marked
     * the needed service unhealthy.  A cluster that has not been probed
     * yet is given the benefit of the doubt.
     */
    pub fn require_service(
        &self,
        service_type: ServiceType,
    ) -> error::Result<()> {
        let Some(snapshot) = self.snapshot() else {
            return Ok(());
        };
        for health in
            snapshot.iter().filter(|h| h.service_type == service_type)
        {
            if !health.healthy {
                return Err(Error::ServiceUnavailable(
                    health.message.clone().unwrap_or_else(|| {
                        format!(
                            "service {} on system {} is unavailable",
                            service_type, self.config.name,
                        )
                    }),
                ));
            }
        }
        Ok(())
    }

    /**
     * The cluster record as served by /status/systems: static
     * configuration plus the live health snapshot.
     */
    pub fn record(&self) -> HpcCluster {
        let mut record = self.config.clone();
        record.services_health =
            self.snapshot().map(|snapshot| snapshot.to_vec());
        record
    }
}

pub(crate) struct Central {
    pub config: config::Settings,
    pub clusters: Vec<Arc<ClusterHandle>>,
    pub s3_private: Option<aws_sdk_s3::Client>,
    pub s3_public: Option<aws_sdk_s3::Client>,
    storage_health: std::sync::Mutex<Option<Arc<Vec<ServiceHealth>>>>,
}

impl Central {
    pub fn cluster(&self, name: &str) -> error::Result<Arc<ClusterHandle>> {
        self.clusters
            .iter()
            .find(|cluster| cluster.config.name == name)
            .cloned()
            .ok_or_else(|| {
                Error::NotFound(format!("no such system {:?}", name))
            })
    }

    pub fn max_ops_file_size(&self) -> u64 {
        self.config
            .storage
            .as_ref()
            .map(|s| s.max_ops_file_size)
            .unwrap_or_else(
                clusteromat_types::config::default_max_ops_file_size,
            )
    }

    pub fn storage(&self) -> error::Result<&StorageConfig> {
        self.config.storage.as_ref().ok_or_else(|| {
            Error::NotImplemented("no storage backend is configured".into())
        })
    }

    pub fn set_storage_health(&self, results: Vec<ServiceHealth>) {
        *self.storage_health.lock().unwrap() = Some(Arc::new(results));
    }

    pub fn storage_snapshot(&self) -> Option<Arc<Vec<ServiceHealth>>> {
        self.storage_health.lock().unwrap().clone()
    }

    pub fn require_storage_healthy(&self) -> error::Result<()> {
        let Some(snapshot) = self.storage_snapshot() else {
            return Ok(());
        };
        for health in snapshot.iter() {
            if !health.healthy {
                return Err(Error::ServiceUnavailable(
                    health
                        .message
                        .clone()
                        .unwrap_or_else(|| "storage is unavailable".into()),
                ));
            }
        }
        Ok(())
    }

    /**
     * Pull the bearer token out of the Authorization header.  Token
     * verification happens upstream of this server; here the token is
     * already trusted and only its identity claim is read.
     */
    fn bearer_token(
        &self,
        log: &Logger,
        req: &RequestInfo,
    ) -> error::Result<String> {
        let header = req
            .headers()
            .get(hyper::header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok());

        if let Some(header) = header {
            let t = header.split_whitespace().collect::<Vec<_>>();
            if t.len() == 2 && t[0].eq_ignore_ascii_case("bearer") {
                return Ok(t[1].to_string());
            }
            warn!(log, "invalid authorisation header");
        } else {
            warn!(log, "no authorisation header");
        }
        Err(Error::AuthToken("not authorised".into()))
    }

    pub fn user_from_token(&self, token: &str) -> error::Result<AuthUser> {
        let claims = token
            .split('.')
            .nth(1)
            .and_then(|payload| {
                base64::decode_config(payload, base64::URL_SAFE_NO_PAD).ok()
            })
            .and_then(|data| {
                serde_json::from_slice::<serde_json::Value>(&data).ok()
            })
            .ok_or_else(|| {
                Error::AuthToken("access token is not a valid JWT".into())
            })?;

        let username = claims
            .get("preferred_username")
            .or_else(|| claims.get("username"))
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| {
                Error::AuthToken(
                    "username claim is missing from the access token".into(),
                )
            })?;

        Ok(AuthUser {
            username: username.to_string(),
            token: token.to_string(),
        })
    }

    pub fn require_user(
        &self,
        log: &Logger,
        req: &RequestInfo,
    ) -> error::DSResult<AuthUser> {
        let token = self.bearer_token(log, req).or_http()?;
        let user = self.user_from_token(&token).or_http()?;
        Ok(user)
    }

    /**
     * Assemble the dependency set a transfer operation needs, failing
     * when no storage backend is configured.
     */
    pub fn transfer_env<'a>(
        &'a self,
        log: &'a Logger,
        cluster: &'a ClusterHandle,
    ) -> error::Result<TransferEnv<'a>> {
        let storage = self.storage()?;
        let (Some(s3_private), Some(s3_public)) =
            (self.s3_private.as_ref(), self.s3_public.as_ref())
        else {
            return Err(Error::NotImplemented(
                "no storage backend is configured".into(),
            ));
        };
        Ok(TransferEnv {
            log,
            cluster: &cluster.config,
            scheduler: &cluster.scheduler,
            storage,
            s3_private,
            s3_public,
            pool: &cluster.pool,
        })
    }
}

async fn make_s3_client(
    storage: &StorageConfig,
    endpoint_url: &str,
) -> aws_sdk_s3::Client {
    let creds = aws_credential_types::Credentials::new(
        storage.access_key_id.value(),
        storage.secret_access_key.value(),
        None,
        None,
        "settings",
    );
    let awscfg = aws_config::ConfigLoader::default()
        .region(Region::new(storage.region.clone()))
        .credentials_provider(creds)
        .load()
        .await;
    let conf = aws_sdk_s3::config::Builder::from(&awscfg)
        .endpoint_url(endpoint_url)
        .force_path_style(true)
        .build();
    aws_sdk_s3::Client::from_conf(conf)
}

fn make_scheduler(
    log: &Logger,
    cluster: &HpcCluster,
    rest_client: &reqwest::Client,
    pool: &Arc<SshPool>,
) -> Result<SchedulerClient> {
    let sched = &cluster.scheduler;
    Ok(match (sched.scheduler_type, sched.api_url.as_deref()) {
        (SchedulerType::Slurm, Some(api_url)) => {
            let api_version = sched
                .api_version
                .as_deref()
                .ok_or_else(|| anyhow!("scheduler apiVersion is required"))?;
            SchedulerClient::SlurmRest(SlurmRestClient::new(
                rest_client.clone(),
                api_url,
                api_version,
                Duration::from_secs(sched.timeout),
            ))
        }
        (SchedulerType::Slurm, None) => {
            SchedulerClient::SlurmCli(SlurmCliClient::new(
                log.new(o!("component" => "slurm_cli",
                    "system" => cluster.name.clone())),
                Arc::clone(pool),
            ))
        }
        (SchedulerType::Pbs, _) => {
            SchedulerClient::PbsCli(PbsCliClient::new(
                log.new(o!("component" => "pbs_cli",
                    "system" => cluster.name.clone())),
                Arc::clone(pool),
            ))
        }
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let mut opts = Options::new();

    opts.optopt("b", "", "bind address:port", "BIND_ADDRESS");
    opts.optopt("f", "", "configuration file", "CONFIG");
    opts.optopt("S", "", "dump OpenAPI schema", "FILE");

    let p = match opts.parse(std::env::args().skip(1)) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("ERROR: usage: {}", e);
            eprintln!("       {}", opts.usage("usage"));
            exit(1);
        }
    };

    let mut ad = ApiDescription::new();
    ad.register(api::status::systems_get).api_check()?;
    ad.register(api::status::liveness_get).api_check()?;
    ad.register(api::status::userinfo_get).api_check()?;
    ad.register(api::status::nodes_get).api_check()?;
    ad.register(api::status::partitions_get).api_check()?;
    ad.register(api::status::reservations_get).api_check()?;
    ad.register(api::compute::job_submit).api_check()?;
    ad.register(api::compute::jobs_get).api_check()?;
    ad.register(api::compute::job_get).api_check()?;
    ad.register(api::compute::job_metadata_get).api_check()?;
    ad.register(api::compute::job_cancel).api_check()?;
    ad.register(api::compute::job_attach).api_check()?;
    ad.register(api::filesystem::ops_ls).api_check()?;
    ad.register(api::filesystem::ops_head).api_check()?;
    ad.register(api::filesystem::ops_tail).api_check()?;
    ad.register(api::filesystem::ops_view).api_check()?;
    ad.register(api::filesystem::ops_checksum).api_check()?;
    ad.register(api::filesystem::ops_file).api_check()?;
    ad.register(api::filesystem::ops_stat).api_check()?;
    ad.register(api::filesystem::ops_rm).api_check()?;
    ad.register(api::filesystem::ops_mkdir).api_check()?;
    ad.register(api::filesystem::ops_symlink).api_check()?;
    ad.register(api::filesystem::ops_chmod).api_check()?;
    ad.register(api::filesystem::ops_chown).api_check()?;
    ad.register(api::filesystem::ops_download).api_check()?;
    ad.register(api::filesystem::ops_upload).api_check()?;
    ad.register(api::filesystem::ops_compress).api_check()?;
    ad.register(api::filesystem::ops_extract).api_check()?;
    ad.register(api::transfer::transfer_upload).api_check()?;
    ad.register(api::transfer::transfer_download).api_check()?;
    ad.register(api::transfer::transfer_cp).api_check()?;
    ad.register(api::transfer::transfer_mv).api_check()?;
    ad.register(api::transfer::transfer_rm).api_check()?;
    ad.register(api::transfer::transfer_compress).api_check()?;
    ad.register(api::transfer::transfer_extract).api_check()?;

    if let Some(s) = p.opt_str("S") {
        let mut f = std::fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&s)?;
        ad.openapi("Clusteromat", "2.0").write(&mut f)?;
        return Ok(());
    }

    let bind_address =
        p.opt_str("b").as_deref().unwrap_or("127.0.0.1:8000").parse()?;

    let settings = if let Some(f) = p.opt_str("f").as_deref() {
        config::load(f)?
    } else {
        config::load_from_env()?
    };

    let log = make_log("clusteromat");

    let creds = Arc::new(
        CredentialsProvider::from_config(&settings.ssh_credentials)
            .map_err(|e| anyhow!("{}", e))
            .context("building the SSH credentials provider")?,
    );

    /*
     * One HTTP client serves every scheduler REST call in the process,
     * with a bounded per-host pool.
     */
    let rest_client = reqwest::Client::builder()
        .timeout(Duration::from_secs(60))
        .pool_max_idle_per_host(100)
        .build()
        .context("building the scheduler REST client")?;

    let max_ops_file_size = settings
        .storage
        .as_ref()
        .map(|s| s.max_ops_file_size)
        .unwrap_or_else(clusteromat_types::config::default_max_ops_file_size);

    let mut clusters = Vec::new();
    for cluster in settings.clusters.iter() {
        let pool = Arc::new(SshPool::new(
            log.new(o!("component" => "ssh_pool",
                "system" => cluster.name.clone())),
            cluster.ssh.clone(),
            max_ops_file_size as usize,
            Arc::clone(&creds),
        ));
        let scheduler = make_scheduler(&log, cluster, &rest_client, &pool)
            .with_context(|| {
                format!("configuring cluster {:?}", cluster.name)
            })?;
        clusters.push(Arc::new(ClusterHandle {
            config: cluster.clone(),
            pool,
            scheduler,
            health: Default::default(),
        }));
    }

    let (s3_private, s3_public) = match settings.storage.as_ref() {
        Some(storage) => (
            Some(make_s3_client(storage, storage.private_url.value()).await),
            Some(make_s3_client(storage, &storage.public_url).await),
        ),
        None => (None, None),
    };

    let c = Arc::new(Central {
        config: settings,
        clusters,
        s3_private,
        s3_public,
        storage_health: Default::default(),
    });

    let mut probers = Vec::new();
    for (index, cluster) in c.clusters.iter().enumerate() {
        let c0 = Arc::clone(&c);
        let log0 = log.new(o!("component" => "health",
            "system" => cluster.config.name.clone()));
        probers.push(tokio::task::spawn(async move {
            health::cluster_probe_task(log0, c0, index).await;
        }));
    }

    let c0 = Arc::clone(&c);
    let log0 = log.new(o!("component" => "health", "target" => "storage"));
    let t_storage = tokio::task::spawn(async move {
        health::storage_probe_task(log0, c0).await;
    });

    let c0 = Arc::clone(&c);
    let log0 = log.new(o!("component" => "pool_pruner"));
    let t_pruner = tokio::task::spawn(async move {
        health::pool_prune_task(log0, c0).await;
    });

    let server = HttpServerStarter::new(
        #[allow(clippy::needless_update)]
        &ConfigDropshot {
            request_body_max_bytes: max_ops_file_size as usize + 1024 * 1024,
            bind_address,
            ..Default::default()
        },
        ad,
        Arc::clone(&c),
        &log,
    )
    .map_err(|e| anyhow!("server startup failure: {:?}", e))?;

    info!(log, "listening"; "bind_address" => %bind_address);
    let server_task = server.start();

    /*
     * The prober set may be empty when no clusters are configured, which
     * must not read as an early exit.
     */
    let probers_done = async move {
        if probers.is_empty() {
            futures::future::pending::<()>().await;
        }
        futures::future::join_all(probers).await;
    };

    tokio::select! {
        _ = probers_done => {
            bail!("health prober task stopped early");
        }
        _ = t_storage => bail!("storage prober task stopped early"),
        _ = t_pruner => bail!("pool pruner task stopped early"),
        res = server_task => {
            for cluster in c.clusters.iter() {
                cluster.pool.shutdown().await;
            }
            res.map_err(|e| anyhow!("HTTP server failure: {}", e))
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use clusteromat_types::config::SshCredentialsConfig;

    fn test_cluster() -> ClusterHandle {
        let config: HpcCluster = serde_json::from_value(serde_json::json!({
            "name": "cA",
            "ssh": { "host": "login.ca.example", "port": 22 },
            "scheduler": { "type": "slurm", "version": "24.05",
                "apiUrl": "http://slurmrestd:6820", "apiVersion": "0.0.40" },
            "probing": { "interval": 30, "timeout": 5 },
            "fileSystems": [
                { "path": "/scratch", "dataType": "scratch",
                  "defaultWorkDir": true },
            ],
        }))
        .unwrap();

        let log = Logger::root(slog::Discard, o!());
        let creds = Arc::new(
            CredentialsProvider::from_config(&SshCredentialsConfig::Static {
                keys: Default::default(),
            })
            .unwrap(),
        );
        let pool = Arc::new(SshPool::new(
            log.clone(),
            config.ssh.clone(),
            5 * 1024 * 1024,
            creds,
        ));
        let scheduler = SchedulerClient::SlurmRest(SlurmRestClient::new(
            reqwest::Client::new(),
            "http://slurmrestd:6820",
            "0.0.40",
            Duration::from_secs(10),
        ));

        ClusterHandle { config, pool, scheduler, health: Default::default() }
    }

    #[test]
    fn availability_gate() {
        let cluster = test_cluster();

        /*
         * Unprobed clusters are not gated.
         */
        assert!(cluster.require_service(ServiceType::Filesystem).is_ok());

        cluster.set_health(vec![
            ServiceHealth::healthy(ServiceType::Scheduler, 0.01),
            ServiceHealth::unhealthy(
                ServiceType::Filesystem,
                "mount /scratch did not answer",
            )
            .with_path("/scratch"),
        ]);

        assert!(cluster.require_service(ServiceType::Scheduler).is_ok());
        let err = cluster
            .require_service(ServiceType::Filesystem)
            .unwrap_err();
        assert_eq!(err.status_code().as_u16(), 503);
        assert_eq!(err.to_string(), "mount /scratch did not answer");

        /*
         * A fresh healthy snapshot replaces the old verdict wholesale.
         */
        cluster.set_health(vec![ServiceHealth::healthy(
            ServiceType::Filesystem,
            0.02,
        )]);
        assert!(cluster.require_service(ServiceType::Filesystem).is_ok());

        let record = cluster.record();
        assert_eq!(record.services_health.unwrap().len(), 1);
    }

    #[test]
    fn token_identity_claims() {
        let c = Central {
            config: config::Settings {
                app_debug: false,
                apis_root_path: String::new(),
                doc_servers: None,
                auth: None,
                ssh_credentials: SshCredentialsConfig::Static {
                    keys: Default::default(),
                },
                clusters: Vec::new(),
                storage: None,
            },
            clusters: Vec::new(),
            s3_private: None,
            s3_public: None,
            storage_health: Default::default(),
        };

        fn jwt(claims: serde_json::Value) -> String {
            let header = base64::encode_config(
                br#"{"alg":"RS256","typ":"JWT"}"#,
                base64::URL_SAFE_NO_PAD,
            );
            let payload = base64::encode_config(
                claims.to_string(),
                base64::URL_SAFE_NO_PAD,
            );
            format!("{}.{}.sig", header, payload)
        }

        let user = c
            .user_from_token(&jwt(serde_json::json!({
                "preferred_username": "alice",
            })))
            .unwrap();
        assert_eq!(user.username, "alice");

        let user = c
            .user_from_token(&jwt(serde_json::json!({ "username": "bob" })))
            .unwrap();
        assert_eq!(user.username, "bob");

        assert!(c
            .user_from_token(&jwt(serde_json::json!({ "sub": "nobody" })))
            .is_err());
        assert!(c.user_from_token("not-a-jwt").is_err());
    }
}
