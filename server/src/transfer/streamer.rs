/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0.  If a copy of the MPL was not distributed with this
 * file, you can obtain one at https://mozilla.org/MPL/2.0/.
 */

/*
 * The direct websocket method: a job inside the allocation runs the
 * streamer program listening on one port of a configured range, and the
 * client scans the advertised address grid presenting a bearer secret.
 * Both sides get the same base64url coordinates token.
 */

use clusteromat_common::genkey;
use clusteromat_types::transfer::{
    StreamerCoordinates, TransferDirectives, TransferOperation,
};

use crate::error::Result;
use crate::transfer::{
    format_directives, render_template, JobScaffold, TransferEnv,
};

pub fn encode_coordinates(coordinates: &StreamerCoordinates) -> String {
    let json = serde_json::to_string(coordinates)
        .expect("coordinates always serialize");
    base64::encode_config(json, base64::URL_SAFE)
}

fn build_coordinates(env: &TransferEnv<'_>) -> StreamerCoordinates {
    let streamer = &env.storage.streamer;
    let ips = if streamer.public_ips.is_empty() {
        vec!["localhost".to_string()]
    } else {
        streamer.public_ips.clone()
    };
    StreamerCoordinates {
        ports: streamer.port_range,
        ips,
        secret: genkey(32),
    }
}

async fn launch(
    env: &TransferEnv<'_>,
    username: &str,
    access_token: &str,
    account: Option<&str>,
    operation: &str,
    job_name: &str,
    path: &str,
) -> Result<TransferOperation> {
    let coordinates = build_coordinates(env);
    let encoded = encode_coordinates(&coordinates);
    let streamer = &env.storage.streamer;

    let script = render_template(
        include_str!("scripts/job_streamer.sh"),
        &[
            ("sbatch_directives",
                format_directives(
                    &env.cluster.datatransfer_jobs_directives,
                    account,
                )?),
            ("coordinates", encoded.clone()),
            ("operation", operation.to_string()),
            ("target_path", path.to_string()),
            ("wait_timeout", streamer.wait_timeout.to_string()),
            ("inbound_transfer_limit",
                streamer.inbound_transfer_limit.to_string()),
        ],
    );

    let scaffold = JobScaffold::new(
        &env.user_work_dir(username)?,
        job_name,
        account,
        script,
    );
    let transfer_job = scaffold.submit(env, username, access_token).await?;

    Ok(TransferOperation {
        transfer_job,
        transfer_directives: TransferDirectives::Streamer {
            coordinates: Some(encoded),
        },
    })
}

/**
 * Inbound transfer: the job receives into the target path.
 */
pub async fn upload(
    env: &TransferEnv<'_>,
    username: &str,
    access_token: &str,
    account: Option<&str>,
    target_path: &str,
) -> Result<TransferOperation> {
    launch(
        env,
        username,
        access_token,
        account,
        "receive",
        "IngressFileTransfer",
        target_path,
    )
    .await
}

/**
 * Outbound transfer: the job serves the source file to the scanning
 * client.
 */
pub async fn download(
    env: &TransferEnv<'_>,
    username: &str,
    access_token: &str,
    account: Option<&str>,
    source_path: &str,
) -> Result<TransferOperation> {
    launch(
        env,
        username,
        access_token,
        account,
        "send",
        "OutgressFileTransfer",
        source_path,
    )
    .await
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn coordinates_round_trip() {
        let c = StreamerCoordinates {
            ports: (50000, 60000),
            ips: vec!["198.51.100.7".to_string()],
            secret: "sesame".to_string(),
        };
        let encoded = encode_coordinates(&c);

        let decoded = base64::decode_config(&encoded, base64::URL_SAFE)
            .unwrap();
        let back: StreamerCoordinates =
            serde_json::from_slice(&decoded).unwrap();
        assert_eq!(back.ports, (50000, 60000));
        assert_eq!(back.ips, c.ips);
        assert_eq!(back.secret, "sesame");
    }
}
