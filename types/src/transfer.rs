/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0.  If a copy of the MPL was not distributed with this
 * file, you can obtain one at https://mozilla.org/MPL/2.0/.
 */

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TransferJobLogs {
    pub output_log: String,
    pub error_log: String,
}

/**
 * The scheduler job the gateway submitted on the user's behalf to move the
 * actual bytes.  Progress is tracked through the ordinary job endpoints.
 */
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TransferJob {
    pub job_id: u64,
    pub system: String,
    pub working_directory: String,
    pub logs: TransferJobLogs,
}

/**
 * Method-specific instructions the client must act on to complete a
 * transfer, discriminated by transferMethod.  The same shape is used in
 * requests (where only a subset of fields is meaningful) and responses.
 */
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(tag = "transferMethod", rename_all = "camelCase")]
pub enum TransferDirectives {
    #[serde(rename = "s3", rename_all = "camelCase")]
    S3 {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file_size: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        download_url: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parts_upload_urls: Option<Vec<String>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        complete_upload_url: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_part_size: Option<u64>,
    },
    #[serde(rename = "wormhole", rename_all = "camelCase")]
    Wormhole {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        wormhole_code: Option<String>,
    },
    #[serde(rename = "streamer", rename_all = "camelCase")]
    Streamer {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        coordinates: Option<String>,
    },
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TransferOperation {
    pub transfer_job: TransferJob,
    pub transfer_directives: TransferDirectives,
}

/**
 * Connection coordinates for the websocket streamer, handed to the client
 * base64url-encoded.  The job-side program listens on one port of the
 * range on one of the public addresses; the client scans the grid and
 * authenticates with the secret.
 */
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
pub struct StreamerCoordinates {
    pub ports: (u16, u16),
    pub ips: Vec<String>,
    pub secret: String,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn directives_discriminator_round_trip() {
        let d = TransferDirectives::S3 {
            file_size: None,
            download_url: None,
            parts_upload_urls: Some(vec!["u1".into(), "u2".into()]),
            complete_upload_url: Some("u3".into()),
            max_part_size: Some(2147483648),
        };
        let v = serde_json::to_value(&d).unwrap();
        assert_eq!(v["transferMethod"], "s3");
        assert_eq!(v["maxPartSize"], 2147483648u64);
        assert!(v.get("downloadUrl").is_none());

        let back: TransferDirectives = serde_json::from_value(v).unwrap();
        assert!(matches!(back, TransferDirectives::S3 { .. }));
    }

    #[test]
    fn directives_request_shape() {
        let d: TransferDirectives = serde_json::from_value(serde_json::json!({
            "transferMethod": "wormhole",
            "wormholeCode": "7-orbit-nebula-vega",
        }))
        .unwrap();
        match d {
            TransferDirectives::Wormhole { wormhole_code } => {
                assert_eq!(wormhole_code.as_deref(), Some("7-orbit-nebula-vega"));
            }
            _ => panic!("expected wormhole directives"),
        }
    }
}
