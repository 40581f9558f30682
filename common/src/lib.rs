/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0.  If a copy of the MPL was not distributed with this
 * file, you can obtain one at https://mozilla.org/MPL/2.0/.
 */

use std::io::IsTerminal;

use chrono::prelude::*;
use rand::distributions::Alphanumeric;
use rand::Rng;
use slog::{Drain, Logger};

/**
 * Construct the process-wide logger.  When stdout is a terminal we use the
 * human-readable terminal format; otherwise emit bunyan-format JSON records
 * so that log collection gets structured output.
 */
pub fn make_log(name: &'static str) -> Logger {
    if std::io::stdout().is_terminal() {
        let dec = slog_term::TermDecorator::new().stdout().build();
        let dr = slog_term::CompactFormat::new(dec)
            .build()
            .filter_level(slog::Level::Debug)
            .fuse();
        let dr = slog_async::Async::new(dr).build().fuse();
        Logger::root(dr, slog::o!())
    } else {
        let dr = slog_bunyan::with_name(name, std::io::stdout())
            .build()
            .filter_level(slog::Level::Debug)
            .fuse();
        let dr = slog_async::Async::new(dr).build().fuse();
        Logger::root(dr, slog::o!())
    }
}

/**
 * The current time as whole seconds since the UNIX epoch.
 */
pub fn unix_now() -> u64 {
    Utc::now().timestamp().try_into().unwrap_or(0)
}

pub fn genkey(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(Alphanumeric)
        .take(len)
        .map(char::from)
        .collect::<String>()
        .to_lowercase()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn genkey_length_and_charset() {
        let k = genkey(48);
        assert_eq!(k.len(), 48);
        assert!(k.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_eq!(k, k.to_lowercase());
    }

    #[test]
    fn unix_now_is_past_2024() {
        assert!(unix_now() > 1_700_000_000);
    }
}
