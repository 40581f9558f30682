/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0.  If a copy of the MPL was not distributed with this
 * file, you can obtain one at https://mozilla.org/MPL/2.0/.
 */

/*
 * Per-cluster SSH connection pooling.  Each pool maps a username to one
 * live authenticated session against the cluster's login node; sessions
 * are created lazily with the user's brokered credentials, reused across
 * requests, and reaped once idle.  Credentials for one user are never
 * offered on a connection authenticating as another: the username is the
 * pool key and part of the session itself.
 */

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use russh::client::{AuthResult, Handle};
use russh::keys::{decode_secret_key, Certificate, PrivateKeyWithHashAlg};
use russh::ChannelMsg;
#[allow(unused_imports)]
use slog::{debug, error, info, o, warn, Logger};

use clusteromat_common::unix_now;
use clusteromat_types::config::SshConfig;

use crate::cmd::ShellCommand;
use crate::error::{Error, Result};
use crate::keys::{CredentialsProvider, SshCredentials};

/**
 * The gateway connects only to hosts named in its own configuration, so
 * host keys are accepted without a known-hosts check.
 */
struct TrustingHandler;

impl russh::client::Handler for TrustingHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &russh::keys::PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        Ok(true)
    }
}

pub struct SshSession {
    username: String,
    handle: Handle<TrustingHandler>,
    /*
     * When a proxy jump is configured the tunnel session must outlive the
     * main one; it is held here solely for that purpose.
     */
    _proxy: Option<Handle<TrustingHandler>>,
    last_used: AtomicU64,
    execute_timeout: Duration,
    buffer_limit: usize,
}

impl SshSession {
    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn touch(&self) {
        let now = unix_now();
        /*
         * last_used only ever moves forward.
         */
        self.last_used.fetch_max(now, Ordering::SeqCst);
    }

    pub fn last_used(&self) -> u64 {
        self.last_used.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.handle.is_closed()
    }

    async fn close(&self) {
        let _ = self
            .handle
            .disconnect(russh::Disconnect::ByApplication, "", "")
            .await;
    }

    /**
     * Run one command object on the remote side: open a session channel,
     * execute the rendered line, optionally feed stdin, and drain stdout
     * and stderr up to the buffer limit.  The whole exchange is bounded
     * by the execute timeout; on expiry the remote process receives a
     * best-effort SIGINT before the channel is torn down.
     */
    pub async fn execute<C: ShellCommand>(
        &self,
        log: &Logger,
        command: &C,
        stdin: Option<&[u8]>,
    ) -> Result<C::Output> {
        let command_line = command.render();
        let deadline = tokio::time::Instant::now() + self.execute_timeout;

        let mut channel = tokio::time::timeout_at(
            deadline,
            self.handle.channel_open_session(),
        )
        .await
        .map_err(|_| {
            Error::TimeoutLimitExceeded(
                "command execution timeout limit exceeded".into(),
            )
        })?
        .map_err(|e| {
            Error::SshConnection(format!(
                "unable to open an SSH channel: {}",
                e,
            ))
        })?;

        let drain = drain_channel(
            &mut channel,
            &command_line,
            stdin,
            self.buffer_limit,
        );

        match tokio::time::timeout_at(deadline, drain).await {
            Ok(Ok((stdout, stderr, exit_status))) => {
                debug!(log, "remote command finished";
                    "command" => &command_line,
                    "exit_status" => exit_status);
                let stdout = String::from_utf8_lossy(&stdout);
                let stderr = String::from_utf8_lossy(&stderr);
                command.parse(&stdout, &stderr, exit_status)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => {
                /*
                 * Interrupt whatever is still running, then tear the
                 * channel down.
                 */
                let _ = channel.signal(russh::Sig::INT).await;
                let _ = channel.close().await;
                warn!(log, "remote command timed out";
                    "command" => &command_line);
                Err(Error::TimeoutLimitExceeded(
                    "command execution timeout limit exceeded".into(),
                ))
            }
        }
    }

    /**
     * Open a long-lived channel running the given entrypoint, for the
     * interactive job attach bridge.  The caller owns the channel and is
     * responsible for closing it; the execute timeout deliberately does
     * not apply.
     */
    pub async fn open_attached(
        &self,
        command: &str,
    ) -> Result<russh::Channel<russh::client::Msg>> {
        let channel =
            self.handle.channel_open_session().await.map_err(|e| {
                Error::SshConnection(format!(
                    "unable to open an SSH channel: {}",
                    e,
                ))
            })?;
        channel.exec(true, command).await.map_err(sshfail)?;
        Ok(channel)
    }
}

fn sshfail(e: russh::Error) -> Error {
    Error::SshConnection(format!("SSH channel failure: {}", e))
}

async fn drain_channel(
    channel: &mut russh::Channel<russh::client::Msg>,
    command_line: &str,
    stdin: Option<&[u8]>,
    buffer_limit: usize,
) -> Result<(Vec<u8>, Vec<u8>, u32)> {
    channel.exec(true, command_line).await.map_err(sshfail)?;

    if let Some(stdin) = stdin {
        channel.data(stdin).await.map_err(sshfail)?;
        channel.eof().await.map_err(sshfail)?;
    }

    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let mut exit_status = 0u32;

    loop {
        match channel.wait().await {
            Some(ChannelMsg::Data { data }) => {
                stdout.extend_from_slice(&data);
                if stdout.len() > buffer_limit {
                    return Err(Error::OutputLimitExceeded(
                        "command output exceeded the buffer limit".into(),
                    ));
                }
            }
            Some(ChannelMsg::ExtendedData { data, ext: 1 }) => {
                stderr.extend_from_slice(&data);
                if stderr.len() > buffer_limit {
                    return Err(Error::OutputLimitExceeded(
                        "command error output exceeded the buffer limit"
                            .into(),
                    ));
                }
            }
            Some(ChannelMsg::ExitStatus { exit_status: st }) => {
                exit_status = st;
            }
            Some(ChannelMsg::Close) | None => break,
            Some(_) => (),
        }
    }

    Ok((stdout, stderr, exit_status))
}

/**
 * Scoped acquisition of a pooled session.  Dropping the guard stamps the
 * session's last-used time, which is what keeps it alive through the
 * pruner; release happens on scope exit whether or not the request
 * succeeded.
 */
pub struct PooledSession {
    session: Arc<SshSession>,
}

impl std::ops::Deref for PooledSession {
    type Target = SshSession;

    fn deref(&self) -> &SshSession {
        &self.session
    }
}

impl Drop for PooledSession {
    fn drop(&mut self) {
        self.session.touch();
    }
}

pub struct SshPool {
    log: Logger,
    config: SshConfig,
    buffer_limit: usize,
    creds: Arc<CredentialsProvider>,
    sessions: tokio::sync::Mutex<HashMap<String, Arc<SshSession>>>,
}

impl SshPool {
    pub fn new(
        log: Logger,
        config: SshConfig,
        buffer_limit: usize,
        creds: Arc<CredentialsProvider>,
    ) -> SshPool {
        assert!(config.timeout.idle_timeout > config.timeout.command_execution);

        SshPool {
            log,
            config,
            buffer_limit,
            creds,
            sessions: Default::default(),
        }
    }

    /**
     * Acquire the caller's session, creating and authenticating one if the
     * pool has none.  Creation, reuse, and eviction of closed entries are
     * all serialised under the pool lock.
     */
    pub async fn acquire(
        &self,
        username: &str,
        access_token: &str,
    ) -> Result<PooledSession> {
        let mut sessions = self.sessions.lock().await;

        if let Some(session) = sessions.get(username) {
            if !session.is_closed() {
                session.touch();
                return Ok(PooledSession { session: Arc::clone(session) });
            }
            debug!(self.log, "evicting closed SSH session";
                "user" => username);
            sessions.remove(username);
        }

        if sessions.len() >= self.config.max_clients {
            return Err(Error::SshConnection(
                "SSH connection pool capacity exceeded".into(),
            ));
        }

        let creds = self.creds.obtain(username, access_token).await?;
        let session = Arc::new(self.connect(username, &creds).await?);
        session.touch();
        sessions.insert(username.to_string(), Arc::clone(&session));
        info!(self.log, "new SSH session"; "user" => username,
            "host" => &self.config.host, "pool_size" => sessions.len());

        Ok(PooledSession { session })
    }

    /**
     * Drop the cached session for a user, e.g. after an authentication
     * failure, so the next request re-provisions credentials.
     */
    pub async fn evict(&self, username: &str) {
        let mut sessions = self.sessions.lock().await;
        if let Some(session) = sessions.remove(username) {
            session.close().await;
        }
    }

    pub async fn touch(&self, username: &str) {
        let sessions = self.sessions.lock().await;
        if let Some(session) = sessions.get(username) {
            session.touch();
        }
    }

    /**
     * Close and remove sessions that have been idle longer than the idle
     * timeout, along with anything that has closed underneath us.
     */
    pub async fn prune(&self) {
        let idle_timeout = self.config.timeout.idle_timeout;
        let now = unix_now();

        let mut sessions = self.sessions.lock().await;
        let mut doomed = Vec::new();
        for (user, session) in sessions.iter() {
            let idle = now.saturating_sub(session.last_used());
            if session.is_closed() || idle > idle_timeout {
                doomed.push(user.to_string());
            }
        }
        for user in doomed {
            if let Some(session) = sessions.remove(&user) {
                debug!(self.log, "pruning idle SSH session"; "user" => &user);
                session.close().await;
            }
        }
    }

    pub async fn shutdown(&self) {
        let mut sessions = self.sessions.lock().await;
        for (_, session) in sessions.drain() {
            session.close().await;
        }
    }

    fn client_config(&self) -> Arc<russh::client::Config> {
        Arc::new(russh::client::Config {
            inactivity_timeout: None,
            keepalive_interval: Some(Duration::from_secs(
                self.config.timeout.keep_alive,
            )),
            keepalive_max: 3,
            ..Default::default()
        })
    }

    async fn connect(
        &self,
        username: &str,
        creds: &SshCredentials,
    ) -> Result<SshSession> {
        let connect_timeout =
            Duration::from_secs(self.config.timeout.connection);

        /*
         * When a proxy jump host is configured we authenticate against it
         * with the same credentials and carry the main connection over a
         * forwarded channel.
         */
        let proxy = if let Some(proxy_host) = self.config.proxy_host.as_deref()
        {
            let proxy_port = self.config.proxy_port.unwrap_or(22);
            let mut handle = tokio::time::timeout(
                connect_timeout,
                russh::client::connect(
                    self.client_config(),
                    (proxy_host, proxy_port),
                    TrustingHandler,
                ),
            )
            .await
            .map_err(|_| {
                Error::TimeoutLimitExceeded(
                    "SSH connection timeout limit exceeded".into(),
                )
            })?
            .map_err(|e| self.connect_error(creds, e))?;
            self.authenticate(&mut handle, username, creds).await?;
            Some(handle)
        } else {
            None
        };

        let mut handle = if let Some(proxy) = &proxy {
            let channel = proxy
                .channel_open_direct_tcpip(
                    self.config.host.as_str(),
                    self.config.port as u32,
                    "127.0.0.1",
                    0,
                )
                .await
                .map_err(|e| self.connect_error(creds, e))?;
            tokio::time::timeout(
                connect_timeout,
                russh::client::connect_stream(
                    self.client_config(),
                    channel.into_stream(),
                    TrustingHandler,
                ),
            )
            .await
            .map_err(|_| {
                Error::TimeoutLimitExceeded(
                    "SSH connection timeout limit exceeded".into(),
                )
            })?
            .map_err(|e| self.connect_error(creds, e))?
        } else {
            tokio::time::timeout(
                connect_timeout,
                russh::client::connect(
                    self.client_config(),
                    (self.config.host.as_str(), self.config.port),
                    TrustingHandler,
                ),
            )
            .await
            .map_err(|_| {
                Error::TimeoutLimitExceeded(
                    "SSH connection timeout limit exceeded".into(),
                )
            })?
            .map_err(|e| self.connect_error(creds, e))?
        };

        self.authenticate(&mut handle, username, creds).await?;

        Ok(SshSession {
            username: username.to_string(),
            handle,
            _proxy: proxy,
            last_used: AtomicU64::new(unix_now()),
            execute_timeout: Duration::from_secs(
                self.config.timeout.command_execution,
            ),
            buffer_limit: self.buffer_limit,
        })
    }

    async fn authenticate(
        &self,
        handle: &mut Handle<TrustingHandler>,
        username: &str,
        creds: &SshCredentials,
    ) -> Result<()> {
        let key = decode_secret_key(
            &creds.private_key,
            creds.passphrase.as_deref(),
        )
        .map_err(|e| {
            Error::SshConnection(format!("unusable private key: {}", e))
        })?;
        let key = Arc::new(key);

        let login_timeout = Duration::from_secs(self.config.timeout.login);
        let auth = async move {
            if let Some(cert) = creds.certificate.as_deref() {
                let cert = Certificate::from_openssh(cert).map_err(|e| {
                    Error::SshConnection(format!(
                        "unusable certificate: {}",
                        e,
                    ))
                })?;
                handle
                    .authenticate_openssh_cert(username, key, cert)
                    .await
                    .map_err(|e| self.connect_error(creds, e))
            } else {
                handle
                    .authenticate_publickey(
                        username,
                        PrivateKeyWithHashAlg::new(key, None),
                    )
                    .await
                    .map_err(|e| self.connect_error(creds, e))
            }
        };

        let result: AuthResult = tokio::time::timeout(login_timeout, auth)
            .await
            .map_err(|_| {
                Error::TimeoutLimitExceeded(
                    "SSH login timeout limit exceeded".into(),
                )
            })??;

        if !result.success() {
            self.log_certificate_diagnostics(creds);
            return Err(Error::SshConnection(
                "unable to establish an SSH connection".into(),
            ));
        }
        Ok(())
    }

    fn connect_error(&self, creds: &SshCredentials, e: russh::Error) -> Error {
        self.log_certificate_diagnostics(creds);
        error!(self.log, "SSH connection failure";
            "host" => &self.config.host, "error" => %e);
        Error::SshConnection("unable to establish an SSH connection".into())
    }

    /**
     * Structured certificate diagnostics for failed connection attempts;
     * certificate problems (expired, wrong principal) otherwise surface as
     * an opaque permission denial.
     */
    fn log_certificate_diagnostics(&self, creds: &SshCredentials) {
        let Some(cert) = creds.certificate.as_deref() else {
            return;
        };
        let Ok(cert) = Certificate::from_openssh(cert) else {
            error!(self.log, "client certificate did not parse");
            return;
        };
        error!(self.log, "client certificate diagnostics";
            "principals" => cert.valid_principals().join(","),
            "serial" => cert.serial(),
            "valid_after" => cert.valid_after(),
            "valid_before" => cert.valid_before());
    }
}
