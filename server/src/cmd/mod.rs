/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0.  If a copy of the MPL was not distributed with this
 * file, you can obtain one at https://mozilla.org/MPL/2.0/.
 */

/*
 * Remote commands as value objects: each operation knows how to render
 * itself into a shell line and how to parse the captured output back into
 * a typed result.  Rendering wraps the underlying utility in timeout(1)
 * so a wedged tool cannot pin an SSH channel for longer than the command
 * execution ceiling.
 */

use crate::error::{Error, Result};

pub mod fs;

/**
 * Ceiling, in seconds, applied to each remote utility via timeout(1).
 */
pub const UTILITIES_TIMEOUT: u64 = 5;

/*
 * timeout(1) exits with 124 when the time limit is hit.
 */
const TIMEOUT_EXIT_STATUS: u32 = 124;

pub trait ShellCommand {
    type Output;

    fn render(&self) -> String;

    fn parse(
        &self,
        stdout: &str,
        stderr: &str,
        exit_status: u32,
    ) -> Result<Self::Output>;
}

pub fn timeout_prefix() -> String {
    format!("timeout {}", UTILITIES_TIMEOUT)
}

/**
 * Single-quote a string for the remote shell, closing and reopening the
 * quotes around any embedded single quote.
 */
pub fn shq(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        if c == '\'' {
            out.push_str("'\\''");
        } else {
            out.push(c);
        }
    }
    out.push('\'');
    out
}

/**
 * Map a nonzero exit status to the most specific error the stderr text
 * supports.  This is shared by every command; individual commands only
 * add parsing of their own success output.
 */
pub fn exit_error(stderr: &str, exit_status: u32) -> Error {
    if exit_status == TIMEOUT_EXIT_STATUS {
        return Error::TimeoutLimitExceeded(
            "command execution timeout limit exceeded".into(),
        );
    }

    let stderr = stderr.trim();
    if stderr.contains("No such file or directory") {
        Error::NotFound("path not found".into())
    } else if stderr.contains("Permission denied")
        || stderr.contains("Operation not permitted")
    {
        Error::Forbidden("permission denied".into())
    } else if stderr.contains("Not a directory") {
        Error::BadRequest("not a directory".into())
    } else if stderr.contains("Is a directory") {
        Error::BadRequest("is a directory".into())
    } else if stderr.contains("File exists") {
        Error::BadRequest("file exists".into())
    } else if stderr.contains("Directory not empty") {
        Error::BadRequest("directory not empty".into())
    } else if stderr.contains("invalid mode") {
        Error::BadRequest("invalid mode".into())
    } else if stderr.contains("invalid user")
        || stderr.contains("invalid group")
    {
        Error::BadRequest("invalid user or group".into())
    } else {
        Error::SshConnection(format!(
            "command failed with exit status {}: {}",
            exit_status, stderr,
        ))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn quoting() {
        assert_eq!(shq("/u/a/f"), "'/u/a/f'");
        assert_eq!(shq("it's"), "'it'\\''s'");
        assert_eq!(shq(""), "''");
    }

    #[test]
    fn exit_error_table() {
        let cases = vec![
            ("ls: cannot access '/nope': No such file or directory", 2, 404),
            ("cat: /root/x: Permission denied", 1, 403),
            ("chown: changing ownership: Operation not permitted", 1, 403),
            ("mkdir: cannot create directory: Not a directory", 1, 400),
            ("mkdir: cannot create directory '/u/d': File exists", 1, 400),
            ("rmdir: failed to remove: Directory not empty", 1, 400),
            ("chmod: invalid mode: 'z99'", 1, 400),
            ("chown: invalid user: 'nobody9:nogroup9'", 1, 400),
            ("something inscrutable", 3, 502),
            ("", TIMEOUT_EXIT_STATUS, 502),
        ];

        for (stderr, exit, want) in cases {
            let e = exit_error(stderr, exit);
            assert_eq!(e.status_code().as_u16(), want, "stderr {:?}", stderr);
        }

        assert!(matches!(
            exit_error("", TIMEOUT_EXIT_STATUS),
            Error::TimeoutLimitExceeded(_)
        ));
    }
}
