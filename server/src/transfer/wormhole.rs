/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0.  If a copy of the MPL was not distributed with this
 * file, you can obtain one at https://mozilla.org/MPL/2.0/.
 */

/*
 * The magic-wormhole method: no staging area at all, just a job running
 * the sender or receiver inside the cluster while the user runs the
 * opposite end, rendezvousing on a short human-readable code.
 */

use rand::seq::SliceRandom;
use rand::Rng;

use clusteromat_types::transfer::{TransferDirectives, TransferOperation};

use crate::error::{Error, Result};
use crate::transfer::{
    format_directives, render_template, JobScaffold, TransferEnv,
};

const CODE_WORDS: &[&str] = &[
    "orbit",
    "station",
    "colony",
    "outpost",
    "asteroid",
    "comet",
    "probe",
    "module",
    "observatory",
    "proxima",
    "sirius",
    "vega",
    "betelgeuse",
    "rigel",
    "polaris",
    "andromeda",
    "orion",
    "pegasus",
    "lyra",
    "nebula",
    "pulsar",
    "quasar",
    "singularity",
    "exoplanet",
    "galaxy",
    "cluster",
];

/**
 * A rendezvous code of the usual "NN-word-word-word" shape, drawn from
 * the OS entropy source.
 */
pub fn generate_code() -> String {
    let mut rng = rand::rngs::OsRng;
    let channel: u8 = rng.gen_range(1..100);
    let words = (0..3)
        .map(|_| *CODE_WORDS.choose(&mut rng).unwrap_or(&CODE_WORDS[0]))
        .collect::<Vec<_>>();
    format!("{}-{}", channel, words.join("-"))
}

/**
 * Inbound transfer: the user holds a sender and supplies its code; a
 * job runs the receiver into the target path.
 */
pub async fn upload(
    env: &TransferEnv<'_>,
    username: &str,
    access_token: &str,
    account: Option<&str>,
    target_path: &str,
    wormhole_code: Option<&str>,
) -> Result<TransferOperation> {
    let Some(code) = wormhole_code else {
        return Err(Error::BadRequest(
            "wormhole uploads require a wormholeCode in the transfer \
            directives"
                .into(),
        ));
    };

    let script = render_template(
        include_str!("scripts/job_wormhole_receive.sh"),
        &[
            ("sbatch_directives",
                format_directives(
                    &env.cluster.datatransfer_jobs_directives,
                    account,
                )?),
            ("target_path", target_path.to_string()),
            ("wormhole_code", code.to_string()),
        ],
    );

    let scaffold = JobScaffold::new(
        &env.user_work_dir(username)?,
        "IngressFileTransfer",
        account,
        script,
    );
    let transfer_job = scaffold.submit(env, username, access_token).await?;

    Ok(TransferOperation {
        transfer_job,
        transfer_directives: TransferDirectives::Wormhole {
            wormhole_code: None,
        },
    })
}

/**
 * Outbound transfer: the gateway picks the code, the job runs the
 * sender, and the code goes back to the user to receive with.
 */
pub async fn download(
    env: &TransferEnv<'_>,
    username: &str,
    access_token: &str,
    account: Option<&str>,
    source_path: &str,
) -> Result<TransferOperation> {
    let code = generate_code();

    let script = render_template(
        include_str!("scripts/job_wormhole_send.sh"),
        &[
            ("sbatch_directives",
                format_directives(
                    &env.cluster.datatransfer_jobs_directives,
                    account,
                )?),
            ("source_path", source_path.to_string()),
            ("wormhole_code", code.clone()),
        ],
    );

    let scaffold = JobScaffold::new(
        &env.user_work_dir(username)?,
        "OutgressFileTransfer",
        account,
        script,
    );
    let transfer_job = scaffold.submit(env, username, access_token).await?;

    Ok(TransferOperation {
        transfer_job,
        transfer_directives: TransferDirectives::Wormhole {
            wormhole_code: Some(code),
        },
    })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn code_shape() {
        for _ in 0..64 {
            let code = generate_code();
            let parts = code.split('-').collect::<Vec<_>>();
            assert_eq!(parts.len(), 4, "code {:?}", code);
            let channel = parts[0].parse::<u8>().unwrap();
            assert!((1..100).contains(&channel));
            for w in &parts[1..] {
                assert!(CODE_WORDS.contains(w), "word {:?}", w);
            }
        }
    }
}
