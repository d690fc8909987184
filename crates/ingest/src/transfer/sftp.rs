// SFTP remote source (libssh2)
//
// connect (bounded) → handshake → host-key check → auth → SFTP channel.

use std::fs;
use std::io::{self, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Duration;

use ssh2::{CheckResult, HostKeyType, KnownHostFileKind, KnownHostKeyFormat, Session};

use crate::config::SftpConfig;
use crate::error::IngestError;

use super::{RemoteEntry, RemoteSource};

pub struct SftpSource {
    session: Session,
    sftp: Option<ssh2::Sftp>,
    host: String,
    port: u16,
    host_key_fingerprint: String,
}

#[derive(Debug)]
enum AuthMethod {
    PrivateKey {
        path: PathBuf,
        passphrase: Option<String>,
    },
    Password(String),
    Agent,
}

impl SftpSource {
    pub fn connect(config: &SftpConfig) -> Result<Self, IngestError> {
        if config.host.trim().is_empty() {
            return Err(IngestError::Config(
                "sftp.host is not set (config, SFTP_API_HOST or --host)".into(),
            ));
        }
        if config.username.trim().is_empty() {
            return Err(IngestError::Config(
                "sftp.username is not set (config, SFTP_API_USERNAME or --username)".into(),
            ));
        }

        let host = config.host.as_str();
        let port = config.port;
        log::info!("connecting to {host}:{port}");

        let tcp = connect_tcp(host, port, Duration::from_secs(config.connect_timeout_secs))?;

        let mut session = Session::new()
            .map_err(|e| IngestError::Transfer(format!("failed to create SSH session: {e}")))?;
        session.set_tcp_stream(tcp);
        session.set_timeout(timeout_millis(config.io_timeout_secs));
        session
            .handshake()
            .map_err(|e| IngestError::Transfer(format!("SSH handshake with {host}:{port} failed: {e}")))?;

        let known_hosts = expand_path(&config.known_hosts);
        let fingerprint =
            verify_host_key(&session, host, port, &known_hosts, config.trust_on_first_use)?;

        let auth = resolve_auth(config);
        authenticate(&session, &config.username, &auth).map_err(|e| {
            IngestError::Transfer(format!(
                "authentication failed for {}@{host}: {e}",
                config.username
            ))
        })?;
        log::info!("authenticated as {}", config.username);

        let sftp = session
            .sftp()
            .map_err(|e| IngestError::Transfer(format!("failed to open SFTP channel: {e}")))?;

        Ok(Self {
            session,
            sftp: Some(sftp),
            host: host.to_string(),
            port,
            host_key_fingerprint: fingerprint,
        })
    }

    pub fn host_key_fingerprint(&self) -> &str {
        &self.host_key_fingerprint
    }

    fn channel(&self) -> Result<&ssh2::Sftp, IngestError> {
        self.sftp
            .as_ref()
            .ok_or_else(|| IngestError::Transfer("SFTP session already closed".into()))
    }
}

impl RemoteSource for SftpSource {
    fn list(&mut self, dir: &str) -> Result<Vec<RemoteEntry>, IngestError> {
        let entries = self.channel()?.readdir(Path::new(dir)).map_err(|e| {
            let msg = e.to_string();
            let message = if msg.contains("No such file") {
                format!("remote directory not found: {dir}")
            } else if msg.to_lowercase().contains("permission denied") {
                format!("permission denied reading: {dir}")
            } else {
                format!("failed to list {dir}: {e}")
            };
            IngestError::Transfer(message)
        })?;

        let mut listed: Vec<RemoteEntry> = entries
            .into_iter()
            .filter_map(|(path, stat)| {
                let name = path.file_name()?.to_str()?.to_string();
                Some(RemoteEntry {
                    path: format!("{}/{name}", dir.trim_end_matches('/')),
                    name,
                    size: stat.size,
                    is_dir: stat.is_dir(),
                })
            })
            .collect();
        listed.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(listed)
    }

    fn fetch(&mut self, path: &str, out: &mut dyn Write) -> Result<u64, IngestError> {
        let mut remote = self
            .channel()?
            .open(Path::new(path))
            .map_err(|e| IngestError::Transfer(format!("cannot open {path}: {e}")))?;
        io::copy(&mut remote, out)
            .map_err(|e| IngestError::Transfer(format!("read of {path} failed: {e}")))
    }

    fn close(&mut self) {
        if self.sftp.take().is_some() {
            if let Err(e) = self.session.disconnect(None, "rawsync done", None) {
                log::debug!("disconnect from {}:{}: {e}", self.host, self.port);
            }
            log::debug!("closed SFTP session to {}:{}", self.host, self.port);
        }
    }
}

impl Drop for SftpSource {
    fn drop(&mut self) {
        self.close();
    }
}

// ── Connection ──────────────────────────────────────────────────────

fn connect_tcp(host: &str, port: u16, timeout: Duration) -> Result<TcpStream, IngestError> {
    let addrs = (host, port)
        .to_socket_addrs()
        .map_err(|e| IngestError::Transfer(format!("cannot resolve {host}:{port}: {e}")))?;

    let mut last_err = None;
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(e) => last_err = Some(e),
        }
    }
    Err(IngestError::Transfer(match last_err {
        Some(e) => format!("TCP connection to {host}:{port} failed: {e}"),
        None => format!("{host}:{port} resolved to no addresses"),
    }))
}

fn timeout_millis(secs: u64) -> u32 {
    u32::try_from(secs.saturating_mul(1000)).unwrap_or(u32::MAX)
}

// ── Auth resolution ─────────────────────────────────────────────────

fn resolve_auth(config: &SftpConfig) -> AuthMethod {
    if let Some(key_path) = &config.private_key {
        return AuthMethod::PrivateKey {
            path: PathBuf::from(expand_path(&key_path.to_string_lossy())),
            passphrase: config.passphrase.clone(),
        };
    }
    if let Some(pw) = &config.password {
        return AuthMethod::Password(pw.clone());
    }
    AuthMethod::Agent
}

fn authenticate(session: &Session, username: &str, auth: &AuthMethod) -> Result<(), String> {
    match auth {
        AuthMethod::PrivateKey { path, passphrase } => {
            session
                .userauth_pubkey_file(username, None, path, passphrase.as_deref())
                .map_err(|e| format!("public key auth failed: {e}"))?;
        }
        AuthMethod::Agent => {
            session
                .userauth_agent(username)
                .map_err(|e| format!("ssh-agent auth failed: {e}"))?;
        }
        AuthMethod::Password(pw) => {
            session
                .userauth_password(username, pw)
                .map_err(|e| format!("password auth failed: {e}"))?;
        }
    }

    if !session.authenticated() {
        return Err("session not authenticated after auth attempt".to_string());
    }
    Ok(())
}

// ── Host key verification ───────────────────────────────────────────

fn host_key_error(message: String) -> IngestError {
    IngestError::Transfer(message)
}

fn fingerprint(key: &[u8]) -> String {
    use sha2::Digest;
    let hash = sha2::Sha256::digest(key);
    format!(
        "SHA256:{}",
        base64::Engine::encode(&base64::engine::general_purpose::STANDARD, hash),
    )
}

fn verify_host_key(
    session: &Session,
    host: &str,
    port: u16,
    known_hosts_path: &str,
    trust_on_first_use: bool,
) -> Result<String, IngestError> {
    let (host_key, key_type) = session
        .host_key()
        .ok_or_else(|| host_key_error("server did not provide a host key".into()))?;
    let presented = fingerprint(host_key);
    log::debug!("host key ({key_type:?}): {presented}");

    let mut known_hosts = session
        .known_hosts()
        .map_err(|e| host_key_error(format!("failed to init known_hosts: {e}")))?;

    let kh_path = Path::new(known_hosts_path);
    if kh_path.exists() {
        known_hosts
            .read_file(kh_path, KnownHostFileKind::OpenSSH)
            .map_err(|e| host_key_error(format!("failed to read {known_hosts_path}: {e}")))?;
    }

    match known_hosts.check_port(host, port, host_key) {
        CheckResult::Match => Ok(presented),

        CheckResult::NotFound if trust_on_first_use => {
            let key_format = match key_type {
                HostKeyType::Rsa => KnownHostKeyFormat::SshRsa,
                HostKeyType::Dss => KnownHostKeyFormat::SshDss,
                HostKeyType::Ed25519 => KnownHostKeyFormat::Ed25519,
                HostKeyType::Ecdsa256 => KnownHostKeyFormat::Ecdsa256,
                HostKeyType::Ecdsa384 => KnownHostKeyFormat::Ecdsa384,
                HostKeyType::Ecdsa521 => KnownHostKeyFormat::Ecdsa521,
                other => {
                    return Err(host_key_error(format!(
                        "unsupported host key type: {other:?}"
                    )))
                }
            };
            let entry_host = if port == 22 {
                host.to_string()
            } else {
                format!("[{host}]:{port}")
            };
            known_hosts
                .add(&entry_host, host_key, "", key_format)
                .map_err(|e| host_key_error(format!("failed to add host key: {e}")))?;
            if let Some(parent) = kh_path.parent() {
                let _ = fs::create_dir_all(parent);
            }
            known_hosts
                .write_file(kh_path, KnownHostFileKind::OpenSSH)
                .map_err(|e| {
                    host_key_error(format!("failed to write known_hosts to {known_hosts_path}: {e}"))
                })?;
            log::warn!("host key for {host}:{port} accepted on first use ({presented})");
            Ok(presented)
        }

        CheckResult::NotFound => Err(host_key_error(format!(
            "host key for {host}:{port} not found in {known_hosts_path} (presented {presented}); \
             set sftp.trust_on_first_use to accept and save it"
        ))),

        CheckResult::Mismatch => Err(host_key_error(format!(
            "HOST KEY MISMATCH for {host}:{port}: presented {presented} does not match \
             {known_hosts_path}; if the server key was rotated, remove the old entry"
        ))),

        CheckResult::Failure => Err(host_key_error(format!(
            "host key check failed for {host}:{port}: internal error"
        ))),
    }
}

fn expand_path(path: &str) -> String {
    shellexpand::tilde(path).to_string()
}
