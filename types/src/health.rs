/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0.  If a copy of the MPL was not distributed with this
 * file, you can obtain one at https://mozilla.org/MPL/2.0/.
 */

use chrono::prelude::*;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize, JsonSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum ServiceType {
    Scheduler,
    Filesystem,
    Ssh,
    S3,
    Exception,
}

impl std::fmt::Display for ServiceType {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let s = match self {
            ServiceType::Scheduler => "scheduler",
            ServiceType::Filesystem => "filesystem",
            ServiceType::Ssh => "ssh",
            ServiceType::S3 => "s3",
            ServiceType::Exception => "exception",
        };
        f.write_str(s)
    }
}

/**
 * The outcome of one health probe.  A whole vector of these replaces the
 * cluster (or storage) snapshot on every prober cycle; request handlers
 * only ever read complete snapshots.
 */
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ServiceHealth {
    pub service_type: ServiceType,
    pub last_checked: Option<DateTime<Utc>>,
    /**
     * Probe round-trip time in seconds.
     */
    pub latency: Option<f64>,
    pub healthy: bool,
    pub message: Option<String>,
    /**
     * For filesystem checks, the mount that was probed.
     */
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl ServiceHealth {
    pub fn healthy(service_type: ServiceType, latency: f64) -> ServiceHealth {
        ServiceHealth {
            service_type,
            last_checked: Some(Utc::now()),
            latency: Some(latency),
            healthy: true,
            message: None,
            path: None,
        }
    }

    pub fn unhealthy(service_type: ServiceType, message: &str) -> ServiceHealth {
        ServiceHealth {
            service_type,
            last_checked: Some(Utc::now()),
            latency: None,
            healthy: false,
            message: Some(message.to_string()),
            path: None,
        }
    }

    pub fn with_path(mut self, path: &str) -> ServiceHealth {
        self.path = Some(path.to_string());
        self
    }
}
