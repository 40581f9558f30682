/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0.  If a copy of the MPL was not distributed with this
 * file, you can obtain one at https://mozilla.org/MPL/2.0/.
 */

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{exit_error, shq, timeout_prefix, ShellCommand};
use crate::error::{Error, Result};

/**
 * One row of a directory listing.
 */
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub entry_type: String,
    pub link_target: Option<String>,
    pub user: String,
    pub group: String,
    pub permissions: String,
    pub last_modified: String,
    pub size: String,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FileStat {
    pub mode: u32,
    pub ino: u64,
    pub dev: u64,
    pub nlink: u64,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub atime: i64,
    pub ctime: i64,
    pub mtime: i64,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FileChecksum {
    pub algorithm: String,
    pub checksum: String,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PosixIdentity {
    pub id: String,
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    pub user: PosixIdentity,
    pub group: PosixIdentity,
    pub groups: Vec<PosixIdentity>,
}

fn basename(path: &str) -> &str {
    path.trim_end_matches('/').rsplit('/').next().unwrap_or(path)
}

/*
 * ls -l mode strings: a type character followed by nine permission bits,
 * optionally with an alternate-access marker appended.
 */
fn looks_like_mode(s: &str) -> bool {
    let b = s.as_bytes();
    if b.len() < 10 || b.len() > 11 {
        return false;
    }
    if !b"-dlbcps".contains(&b[0]) {
        return false;
    }
    b[1..10].iter().all(|c| b"rwxsStT-".contains(c))
}

fn parse_ls_lines(stdout: &str) -> Vec<FileEntry> {
    let mut out = Vec::new();
    let mut prefix = String::new();

    for line in stdout.lines() {
        let line = line.trim_end();
        if line.is_empty() || line.starts_with("total ") {
            continue;
        }

        /*
         * Recursive listings separate directories with "dir:" headers.
         */
        if line.ends_with(':') && !line.contains(' ') {
            let dir = line.trim_end_matches(':');
            prefix = format!("{}/", basename(dir));
            continue;
        }

        let parts = line.split_whitespace().collect::<Vec<_>>();
        if parts.len() < 7 || !looks_like_mode(parts[0]) {
            continue;
        }

        let mode = parts[0];
        let rest = parts[6..].join(" ");
        let (name, link_target) = match rest.split_once(" -> ") {
            Some((n, t)) => (n.to_string(), Some(t.to_string())),
            None => (rest, None),
        };

        out.push(FileEntry {
            name: format!("{}{}", prefix, name),
            entry_type: mode[0..1].to_string(),
            link_target,
            user: parts[2].to_string(),
            group: parts[3].to_string(),
            permissions: mode[1..10].to_string(),
            last_modified: parts[5].to_string(),
            size: parts[4].to_string(),
        });
    }
    out
}

pub struct LsCommand {
    pub path: String,
    pub show_hidden: bool,
    pub numeric_uid: bool,
    pub recursive: bool,
    pub dereference: bool,
}

impl LsCommand {
    pub fn new(path: &str) -> LsCommand {
        LsCommand {
            path: path.to_string(),
            show_hidden: false,
            numeric_uid: false,
            recursive: false,
            dereference: false,
        }
    }

    /**
     * The listing of exactly the named path itself, chained after
     * mutating commands so the response reflects the post-state.
     */
    fn render_single(path: &str) -> String {
        format!(
            "{} ls -l -d --quoting-style=literal \
            --time-style=+%Y-%m-%dT%H:%M:%S -- {}",
            timeout_prefix(),
            shq(path),
        )
    }

    fn parse_single(stdout: &str, stderr: &str, exit_status: u32) -> Result<FileEntry> {
        if exit_status != 0 {
            return Err(exit_error(stderr, exit_status));
        }
        let mut entries = parse_ls_lines(stdout);
        let Some(mut entry) = entries.pop() else {
            return Err(Error::Internal(
                "expected a listing of the target path".into(),
            ));
        };
        entry.name = basename(&entry.name).to_string();
        Ok(entry)
    }
}

impl ShellCommand for LsCommand {
    type Output = Vec<FileEntry>;

    fn render(&self) -> String {
        let mut options = String::new();
        if self.show_hidden {
            options.push_str("-A ");
        }
        if self.numeric_uid {
            options.push_str("-n ");
        }
        if self.recursive {
            options.push_str("-R ");
        }
        if self.dereference {
            options.push_str("-L ");
        }
        format!(
            "{} ls -l --quoting-style=literal \
            --time-style=+%Y-%m-%dT%H:%M:%S {}-- {}",
            timeout_prefix(),
            options,
            shq(&self.path),
        )
    }

    fn parse(
        &self,
        stdout: &str,
        stderr: &str,
        exit_status: u32,
    ) -> Result<Vec<FileEntry>> {
        if exit_status != 0 {
            return Err(exit_error(stderr, exit_status));
        }
        Ok(parse_ls_lines(stdout))
    }
}

pub struct ChmodCommand {
    pub path: String,
    pub mode: String,
}

impl ShellCommand for ChmodCommand {
    type Output = FileEntry;

    fn render(&self) -> String {
        format!(
            "{} chmod -v {} -- {} && {}",
            timeout_prefix(),
            shq(&self.mode),
            shq(&self.path),
            LsCommand::render_single(&self.path),
        )
    }

    fn parse(
        &self,
        stdout: &str,
        stderr: &str,
        exit_status: u32,
    ) -> Result<FileEntry> {
        LsCommand::parse_single(stdout, stderr, exit_status)
    }
}

pub struct ChownCommand {
    pub path: String,
    pub owner: String,
    pub group: String,
}

impl ShellCommand for ChownCommand {
    type Output = FileEntry;

    fn render(&self) -> String {
        format!(
            "{} chown -v {}:{} -- {} && {}",
            timeout_prefix(),
            shq(&self.owner),
            shq(&self.group),
            shq(&self.path),
            LsCommand::render_single(&self.path),
        )
    }

    fn parse(
        &self,
        stdout: &str,
        stderr: &str,
        exit_status: u32,
    ) -> Result<FileEntry> {
        LsCommand::parse_single(stdout, stderr, exit_status)
    }
}

pub struct MkdirCommand {
    pub path: String,
    pub parent: bool,
}

impl ShellCommand for MkdirCommand {
    type Output = FileEntry;

    fn render(&self) -> String {
        let options = if self.parent { "-p " } else { "" };
        format!(
            "{} mkdir {}-- {} && {}",
            timeout_prefix(),
            options,
            shq(&self.path),
            LsCommand::render_single(&self.path),
        )
    }

    fn parse(
        &self,
        stdout: &str,
        stderr: &str,
        exit_status: u32,
    ) -> Result<FileEntry> {
        LsCommand::parse_single(stdout, stderr, exit_status)
    }
}

pub struct SymlinkCommand {
    pub path: String,
    pub link_path: String,
}

impl ShellCommand for SymlinkCommand {
    type Output = FileEntry;

    fn render(&self) -> String {
        format!(
            "{} ln -s -- {} {} && {}",
            timeout_prefix(),
            shq(&self.path),
            shq(&self.link_path),
            LsCommand::render_single(&self.link_path),
        )
    }

    fn parse(
        &self,
        stdout: &str,
        stderr: &str,
        exit_status: u32,
    ) -> Result<FileEntry> {
        LsCommand::parse_single(stdout, stderr, exit_status)
    }
}

pub struct StatCommand {
    pub path: String,
    pub dereference: bool,
}

impl ShellCommand for StatCommand {
    type Output = FileStat;

    fn render(&self) -> String {
        let options = if self.dereference { "-L " } else { "" };
        format!(
            "{} stat {}--format='%f %i %d %h %u %g %s %X %Y %Z' -- {}",
            timeout_prefix(),
            options,
            shq(&self.path),
        )
    }

    fn parse(
        &self,
        stdout: &str,
        stderr: &str,
        exit_status: u32,
    ) -> Result<FileStat> {
        if exit_status != 0 {
            return Err(exit_error(stderr, exit_status));
        }

        let fields = stdout.split_whitespace().collect::<Vec<_>>();
        if fields.len() != 10 {
            return Err(Error::Internal(format!(
                "unexpected stat output: {:?}",
                stdout,
            )));
        }

        fn num<T: std::str::FromStr>(s: &str) -> Result<T> {
            s.parse::<T>().map_err(|_| {
                Error::Internal(format!("unexpected stat field: {:?}", s))
            })
        }

        Ok(FileStat {
            /*
             * %f is the raw mode in hex.
             */
            mode: u32::from_str_radix(fields[0], 16).map_err(|_| {
                Error::Internal(format!(
                    "unexpected stat mode: {:?}",
                    fields[0],
                ))
            })?,
            ino: num(fields[1])?,
            dev: num(fields[2])?,
            nlink: num(fields[3])?,
            uid: num(fields[4])?,
            gid: num(fields[5])?,
            size: num(fields[6])?,
            atime: num(fields[7])?,
            mtime: num(fields[8])?,
            ctime: num(fields[9])?,
        })
    }
}

pub struct HeadCommand {
    pub path: String,
    pub bytes: Option<u64>,
    pub lines: Option<u64>,
    pub skip_trailing: bool,
}

impl ShellCommand for HeadCommand {
    type Output = String;

    fn render(&self) -> String {
        let mut options = String::new();
        if let Some(n) = self.bytes {
            if self.skip_trailing {
                options.push_str(&format!("--bytes='-{}' ", n));
            } else {
                options.push_str(&format!("--bytes='{}' ", n));
            }
        }
        if let Some(n) = self.lines {
            if self.skip_trailing {
                options.push_str(&format!("--lines='-{}' ", n));
            } else {
                options.push_str(&format!("--lines='{}' ", n));
            }
        }
        format!(
            "{} head {}-- {}",
            timeout_prefix(),
            options,
            shq(&self.path),
        )
    }

    fn parse(
        &self,
        stdout: &str,
        stderr: &str,
        exit_status: u32,
    ) -> Result<String> {
        if exit_status != 0 {
            return Err(exit_error(stderr, exit_status));
        }
        Ok(stdout.to_string())
    }
}

pub struct TailCommand {
    pub path: String,
    pub bytes: Option<u64>,
    pub lines: Option<u64>,
    pub skip_heading: bool,
}

impl ShellCommand for TailCommand {
    type Output = String;

    fn render(&self) -> String {
        let mut options = String::new();
        if let Some(n) = self.bytes {
            if self.skip_heading {
                options.push_str(&format!("--bytes='+{}' ", n));
            } else {
                options.push_str(&format!("--bytes='{}' ", n));
            }
        }
        if let Some(n) = self.lines {
            if self.skip_heading {
                options.push_str(&format!("--lines='+{}' ", n));
            } else {
                options.push_str(&format!("--lines='{}' ", n));
            }
        }
        format!(
            "{} tail {}-- {}",
            timeout_prefix(),
            options,
            shq(&self.path),
        )
    }

    fn parse(
        &self,
        stdout: &str,
        stderr: &str,
        exit_status: u32,
    ) -> Result<String> {
        if exit_status != 0 {
            return Err(exit_error(stderr, exit_status));
        }
        Ok(stdout.to_string())
    }
}

/**
 * Windowed file reads for the view endpoint.  dd is asked for two blocks
 * of the requested size starting at the block containing the offset, so
 * an unaligned offset costs at most one extra block read; the slice below
 * trims the result to exactly [offset, offset + size).
 */
pub struct ViewCommand {
    pub path: String,
    pub size: u64,
    pub offset: u64,
}

impl ShellCommand for ViewCommand {
    type Output = String;

    fn render(&self) -> String {
        format!(
            "{} dd if={} bs={} skip={} count=2",
            timeout_prefix(),
            shq(&self.path),
            self.size,
            self.offset / self.size,
        )
    }

    fn parse(
        &self,
        stdout: &str,
        stderr: &str,
        exit_status: u32,
    ) -> Result<String> {
        if exit_status != 0 {
            return Err(exit_error(stderr, exit_status));
        }

        let bytes = stdout.as_bytes();
        let start = (self.offset % self.size) as usize;
        if start >= bytes.len() {
            return Ok(String::new());
        }
        let end = bytes.len().min(start + self.size as usize);
        Ok(String::from_utf8_lossy(&bytes[start..end]).into_owned())
    }
}

pub struct ChecksumCommand {
    pub path: String,
}

impl ShellCommand for ChecksumCommand {
    type Output = FileChecksum;

    fn render(&self) -> String {
        format!("{} sha256sum -- {}", timeout_prefix(), shq(&self.path))
    }

    fn parse(
        &self,
        stdout: &str,
        stderr: &str,
        exit_status: u32,
    ) -> Result<FileChecksum> {
        if exit_status != 0 {
            return Err(exit_error(stderr, exit_status));
        }
        let Some(checksum) = stdout.split_whitespace().next() else {
            return Err(Error::Internal(format!(
                "unexpected sha256sum output: {:?}",
                stdout,
            )));
        };
        Ok(FileChecksum {
            algorithm: "SHA-256".to_string(),
            checksum: checksum.to_string(),
        })
    }
}

pub struct FileTypeCommand {
    pub path: String,
}

impl ShellCommand for FileTypeCommand {
    type Output = String;

    fn render(&self) -> String {
        format!("{} file -b -- {}", timeout_prefix(), shq(&self.path))
    }

    fn parse(
        &self,
        stdout: &str,
        stderr: &str,
        exit_status: u32,
    ) -> Result<String> {
        if exit_status != 0 {
            return Err(exit_error(stderr, exit_status));
        }
        Ok(stdout.trim().to_string())
    }
}

pub struct RmCommand {
    pub path: String,
}

impl ShellCommand for RmCommand {
    type Output = ();

    fn render(&self) -> String {
        format!("{} rm -r -f -- {}", timeout_prefix(), shq(&self.path))
    }

    fn parse(
        &self,
        _stdout: &str,
        stderr: &str,
        exit_status: u32,
    ) -> Result<()> {
        if exit_status != 0 {
            return Err(exit_error(stderr, exit_status));
        }
        Ok(())
    }
}

/**
 * Small file download: the remote side base64-encodes the file so the
 * content travels as text on the channel.
 */
pub struct Base64EncodeCommand {
    pub path: String,
}

impl ShellCommand for Base64EncodeCommand {
    type Output = String;

    fn render(&self) -> String {
        format!("{} base64 --wrap=0 -- {}", timeout_prefix(), shq(&self.path))
    }

    fn parse(
        &self,
        stdout: &str,
        stderr: &str,
        exit_status: u32,
    ) -> Result<String> {
        if exit_status != 0 {
            return Err(exit_error(stderr, exit_status));
        }
        Ok(stdout.trim().to_string())
    }
}

/**
 * Small file upload: the base64 body arrives on stdin and is decoded into
 * the target path on the remote side.
 */
pub struct Base64DecodeCommand {
    pub path: String,
}

impl ShellCommand for Base64DecodeCommand {
    type Output = ();

    fn render(&self) -> String {
        let inner = format!("base64 --decode > {}", shq(&self.path));
        format!("{} sh -c {}", timeout_prefix(), shq(&inner))
    }

    fn parse(
        &self,
        _stdout: &str,
        stderr: &str,
        exit_status: u32,
    ) -> Result<()> {
        if exit_status != 0 {
            return Err(exit_error(stderr, exit_status));
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum TarCompression {
    None,
    Gzip,
    Bzip2,
    Xz,
}

impl TarCompression {
    fn flag(&self) -> &'static str {
        match self {
            TarCompression::None => "",
            TarCompression::Gzip => "z",
            TarCompression::Bzip2 => "j",
            TarCompression::Xz => "J",
        }
    }
}

pub enum TarOperation {
    Compress { match_pattern: Option<String>, dereference: bool },
    Extract,
}

pub struct TarCommand {
    pub source_path: String,
    pub target_path: String,
    pub compression: TarCompression,
    pub operation: TarOperation,
}

impl ShellCommand for TarCommand {
    type Output = String;

    fn render(&self) -> String {
        match &self.operation {
            TarOperation::Compress { match_pattern, dereference } => {
                let mut options = String::new();
                if *dereference {
                    options.push_str("--dereference ");
                }

                let (dir, file) = match self.source_path.rsplit_once('/') {
                    Some((d, f)) if !d.is_empty() => (d, f),
                    Some((_, f)) => ("/", f),
                    None => (".", self.source_path.as_str()),
                };

                if let Some(pattern) = match_pattern {
                    /*
                     * Pattern selection has to happen inside the source
                     * directory, so the find|tar pipeline runs under one
                     * remote shell.
                     */
                    let inner = format!(
                        "cd {}; {} find . -type f -regex {} -print0 | \
                        tar {}-c{}vf {} --null --files-from -",
                        shq(dir),
                        timeout_prefix(),
                        shq(pattern),
                        options,
                        self.compression.flag(),
                        shq(&self.target_path),
                    );
                    format!("{} bash -c {}", timeout_prefix(), shq(&inner))
                } else {
                    format!(
                        "{} tar {}-c{}vf {} -C {} {}",
                        timeout_prefix(),
                        options,
                        self.compression.flag(),
                        shq(&self.target_path),
                        shq(dir),
                        shq(file),
                    )
                }
            }
            TarOperation::Extract => {
                format!(
                    "{} tar -x{}f {} -C {}",
                    timeout_prefix(),
                    self.compression.flag(),
                    shq(&self.source_path),
                    shq(&self.target_path),
                )
            }
        }
    }

    fn parse(
        &self,
        stdout: &str,
        stderr: &str,
        exit_status: u32,
    ) -> Result<String> {
        if exit_status != 0 {
            return Err(exit_error(stderr, exit_status));
        }
        Ok(stdout.to_string())
    }
}

/**
 * Health probe: run the null utility, optionally from inside a directory
 * to confirm the mount answers.
 */
pub struct TrueCommand {
    pub directory: Option<String>,
}

impl ShellCommand for TrueCommand {
    type Output = ();

    fn render(&self) -> String {
        match &self.directory {
            Some(dir) => {
                let inner = format!("cd {} && true", shq(dir));
                format!("{} sh -c {}", timeout_prefix(), shq(&inner))
            }
            None => "true".to_string(),
        }
    }

    fn parse(
        &self,
        _stdout: &str,
        stderr: &str,
        exit_status: u32,
    ) -> Result<()> {
        if exit_status != 0 {
            return Err(exit_error(stderr, exit_status));
        }
        Ok(())
    }
}

pub struct IdCommand;

impl ShellCommand for IdCommand {
    type Output = UserInfo;

    fn render(&self) -> String {
        format!("{} id", timeout_prefix())
    }

    fn parse(
        &self,
        stdout: &str,
        stderr: &str,
        exit_status: u32,
    ) -> Result<UserInfo> {
        if exit_status != 0 {
            return Err(exit_error(stderr, exit_status));
        }

        fn ident(s: &str) -> Option<PosixIdentity> {
            /*
             * "1000(alice)" or a bare "1000" on systems that cannot map
             * the name.
             */
            let (id, name) = match s.split_once('(') {
                Some((id, rest)) => (id, rest.trim_end_matches(')')),
                None => (s, s),
            };
            if id.is_empty() {
                return None;
            }
            Some(PosixIdentity { id: id.to_string(), name: name.to_string() })
        }

        let mut user = None;
        let mut group = None;
        let mut groups = Vec::new();

        for field in stdout.split_whitespace() {
            if let Some(v) = field.strip_prefix("uid=") {
                user = ident(v);
            } else if let Some(v) = field.strip_prefix("gid=") {
                group = ident(v);
            } else if let Some(v) = field.strip_prefix("groups=") {
                groups = v.split(',').filter_map(ident).collect();
            }
        }

        match (user, group) {
            (Some(user), Some(group)) => Ok(UserInfo { user, group, groups }),
            _ => Err(Error::Internal(format!(
                "unexpected id output: {:?}",
                stdout,
            ))),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn ls_render() {
        let ls = LsCommand {
            path: "/u/a".into(),
            show_hidden: true,
            numeric_uid: true,
            recursive: false,
            dereference: false,
        };
        assert_eq!(
            ls.render(),
            "timeout 5 ls -l --quoting-style=literal \
            --time-style=+%Y-%m-%dT%H:%M:%S -A -n -- '/u/a'",
        );
    }

    #[test]
    fn ls_parse_listing() {
        let ls = LsCommand::new("/u/a");
        let stdout = "total 8\n\
            -rw-r----- 1 alice staff 1024 2025-05-01T10:00:00 notes.txt\n\
            drwxr-xr-x 2 alice staff 4096 2025-05-01T10:00:00 results\n\
            lrwxrwxrwx 1 alice staff 9 2025-05-01T10:00:00 latest -> results\n";
        let out = ls.parse(stdout, "", 0).unwrap();
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].name, "notes.txt");
        assert_eq!(out[0].entry_type, "-");
        assert_eq!(out[0].permissions, "rw-r-----");
        assert_eq!(out[0].size, "1024");
        assert_eq!(out[1].entry_type, "d");
        assert_eq!(out[2].entry_type, "l");
        assert_eq!(out[2].name, "latest");
        assert_eq!(out[2].link_target.as_deref(), Some("results"));
    }

    #[test]
    fn ls_parse_errors() {
        let ls = LsCommand::new("/nope");
        let err = ls
            .parse(
                "",
                "ls: cannot access '/nope': No such file or directory",
                2,
            )
            .unwrap_err();
        assert_eq!(err.status_code().as_u16(), 404);
    }

    #[test]
    fn chmod_render_and_parse() {
        let chmod = ChmodCommand { path: "/u/a/f".into(), mode: "640".into() };
        assert_eq!(
            chmod.render(),
            "timeout 5 chmod -v '640' -- '/u/a/f' && \
            timeout 5 ls -l -d --quoting-style=literal \
            --time-style=+%Y-%m-%dT%H:%M:%S -- '/u/a/f'",
        );

        let stdout = "mode of '/u/a/f' changed from 0644 (rw-r--r--) to \
            0640 (rw-r-----)\n\
            -rw-r----- 1 a users 10 2025-05-01T10:00:00 /u/a/f\n";
        let entry = chmod.parse(stdout, "", 0).unwrap();
        assert_eq!(entry.name, "f");
        assert_eq!(entry.permissions, "rw-r-----");
    }

    #[test]
    fn chown_render() {
        let chown = ChownCommand {
            path: "/u/a/f".into(),
            owner: "alice".into(),
            group: "staff".into(),
        };
        assert!(chown
            .render()
            .starts_with("timeout 5 chown -v 'alice':'staff' -- '/u/a/f' && "));
    }

    #[test]
    fn stat_parse() {
        let stat = StatCommand { path: "/u/a/f".into(), dereference: false };
        assert_eq!(
            stat.render(),
            "timeout 5 stat --format='%f %i %d %h %u %g %s %X %Y %Z' \
            -- '/u/a/f'",
        );

        let out = stat
            .parse(
                "81a0 5259 64770 1 1000 1000 10 1747223522 1747223523 \
                1747223524\n",
                "",
                0,
            )
            .unwrap();
        assert_eq!(out.mode, 0o100640);
        assert_eq!(out.ino, 5259);
        assert_eq!(out.uid, 1000);
        assert_eq!(out.size, 10);
        assert_eq!(out.atime, 1747223522);
        assert_eq!(out.mtime, 1747223523);
        assert_eq!(out.ctime, 1747223524);
    }

    #[test]
    fn view_unaligned_window() {
        /*
         * A 10 byte file "ABCDEFGHIJ": size=4 offset=6 reads blocks of 4
         * starting at block 1, i.e. "EFGHIJ", then slices [2, 6).
         */
        let view =
            ViewCommand { path: "/u/a/f".into(), size: 4, offset: 6 };
        assert_eq!(
            view.render(),
            "timeout 5 dd if='/u/a/f' bs=4 skip=1 count=2",
        );
        assert_eq!(view.parse("EFGHIJ", "", 0).unwrap(), "GHIJ");

        let aligned = ViewCommand { path: "/u/a/f".into(), size: 4, offset: 4 };
        assert_eq!(aligned.parse("EFGHIJ", "", 0).unwrap(), "EFGH");

        let past_end =
            ViewCommand { path: "/u/a/f".into(), size: 4, offset: 22 };
        assert_eq!(past_end.parse("", "", 0).unwrap(), "");
    }

    #[test]
    fn head_tail_render() {
        let head = HeadCommand {
            path: "/u/a/f".into(),
            bytes: Some(100),
            lines: None,
            skip_trailing: true,
        };
        assert_eq!(head.render(), "timeout 5 head --bytes='-100' -- '/u/a/f'");

        let tail = TailCommand {
            path: "/u/a/f".into(),
            bytes: None,
            lines: Some(7),
            skip_heading: true,
        };
        assert_eq!(tail.render(), "timeout 5 tail --lines='+7' -- '/u/a/f'");
    }

    #[test]
    fn checksum_parse() {
        let c = ChecksumCommand { path: "/u/a/f".into() };
        let out = c
            .parse(
                "b5bb9d8014a0f9b1d61e21e796d78dccdf1352f23cd32812f4850b87\
                8ae4944c  /u/a/f\n",
                "",
                0,
            )
            .unwrap();
        assert_eq!(out.algorithm, "SHA-256");
        assert!(out.checksum.starts_with("b5bb9d8014a0"));
    }

    #[test]
    fn tar_renders() {
        let plain = TarCommand {
            source_path: "/u/a/dir".into(),
            target_path: "/u/a/dir.tar.gz".into(),
            compression: TarCompression::Gzip,
            operation: TarOperation::Compress {
                match_pattern: None,
                dereference: false,
            },
        };
        assert_eq!(
            plain.render(),
            "timeout 5 tar -czvf '/u/a/dir.tar.gz' -C '/u/a' 'dir'",
        );

        let patterned = TarCommand {
            source_path: "/u/a/dir".into(),
            target_path: "/u/a/sel.tar".into(),
            compression: TarCompression::None,
            operation: TarOperation::Compress {
                match_pattern: Some(".*\\.txt".into()),
                dereference: false,
            },
        };
        let r = patterned.render();
        assert!(r.starts_with("timeout 5 bash -c '"));
        assert!(r.contains("find . -type f -regex '\\''.*\\.txt'\\''"));
        assert!(r.contains("--null --files-from -"));

        let extract = TarCommand {
            source_path: "/u/a/dir.tar.gz".into(),
            target_path: "/u/a/out".into(),
            compression: TarCompression::Gzip,
            operation: TarOperation::Extract,
        };
        assert_eq!(
            extract.render(),
            "timeout 5 tar -xzf '/u/a/dir.tar.gz' -C '/u/a/out'",
        );
    }

    #[test]
    fn id_parse() {
        let out = IdCommand
            .parse(
                "uid=1000(alice) gid=1000(staff) \
                groups=1000(staff),4(adm),27(sudo)\n",
                "",
                0,
            )
            .unwrap();
        assert_eq!(out.user.name, "alice");
        assert_eq!(out.group.id, "1000");
        assert_eq!(out.groups.len(), 3);
        assert_eq!(out.groups[1].name, "adm");
    }

    #[test]
    fn base64_upload_render() {
        let up = Base64DecodeCommand { path: "/u/a/f".into() };
        assert_eq!(
            up.render(),
            "timeout 5 sh -c 'base64 --decode > '\\''/u/a/f'\\'''",
        );
    }
}
