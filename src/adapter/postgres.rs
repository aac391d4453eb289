//! PostgreSQL implementation of [`DatabaseAdapter`].
//!
//! The local node is queried through a lazily connecting `sqlx::PgPool`.
//! Remote members get a dedicated `PgConnection` per probe that is closed
//! before the call returns, on success and on error alike. Control commands
//! shell out to `pg_ctl`, `pg_rewind` and `pg_controldata`, which must run
//! as the OS user owning the data directory.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgRow};
use sqlx::{Connection, FromRow, PgConnection, PgPool};
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::conninfo::ConnInfo;
use super::control_data::ControlData;
use super::pid_file::PidFile;
use super::{DatabaseAdapter, Node, UpstreamAction, host_matches};
use crate::config::PostgresConfig;
use crate::domain::lsn::{self, HistoryEntry, LocalPosition, Timeline, WalPosition};
use crate::domain::{Member, ReplicationMode, Role, WalKind};
use crate::error::HaError;

const STANDBY_SIGNAL: &str = "standby.signal";

/// [`DatabaseAdapter`] for a PostgreSQL 12+ node.
#[derive(Debug)]
pub struct PostgresAdapter {
    member_name: String,
    config: PostgresConfig,
    pool: PgPool,
    probe_timeout: Duration,
}

impl PostgresAdapter {
    /// Creates the adapter. No connection is opened until the first probe.
    ///
    /// # Errors
    ///
    /// Returns [`HaError::Config`] if the data directory is not absolute.
    pub fn new(
        member_name: String,
        config: PostgresConfig,
        probe_timeout: Duration,
    ) -> Result<Self, HaError> {
        if !config.data_dir.is_absolute() {
            return Err(HaError::Config(format!(
                "PGDATA must be absolute, got {}",
                config.data_dir.display()
            )));
        }
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.connect_timeout)
            .connect_lazy_with(local_options(&config));
        Ok(Self {
            member_name,
            config,
            pool,
            probe_timeout,
        })
    }

    fn remote_options(&self, member: &Member) -> PgConnectOptions {
        let options = PgConnectOptions::new()
            .host(&member.host)
            .port(member.port)
            .username(&self.config.user)
            .database(&self.config.database)
            .application_name("pg-ha-coordinator");
        match &self.config.password {
            Some(password) => options.password(password),
            None => options,
        }
    }

    fn timeout_error(&self, operation: String) -> HaError {
        HaError::Timeout {
            operation,
            timeout_ms: u64::try_from(self.probe_timeout.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Runs a single-column query and returns the first row, if any.
    async fn fetch_optional<T>(&self, node: Node<'_>, sql: &str) -> Result<Option<T>, HaError>
    where
        T: Send + Unpin,
        (T,): for<'r> FromRow<'r, PgRow>,
    {
        match node {
            Node::Local => {
                let query = sqlx::query_scalar::<_, T>(sql).fetch_optional(&self.pool);
                tokio::time::timeout(self.probe_timeout, query)
                    .await
                    .map_err(|_| self.timeout_error(format!("local query {sql:?}")))?
                    .map_err(HaError::from)
            }
            Node::Remote(member) => {
                let options = self.remote_options(member);
                let mut conn = tokio::time::timeout(self.probe_timeout, PgConnection::connect_with(&options))
                    .await
                    .map_err(|_| self.timeout_error(format!("connect to {}", member.name)))?
                    .map_err(|e| HaError::connection(&member.name, e))?;

                let result = tokio::time::timeout(
                    self.probe_timeout,
                    sqlx::query_scalar::<_, T>(sql).fetch_optional(&mut conn),
                )
                .await;

                if let Err(e) = conn.close().await {
                    debug!(member = %member.name, error = %e, "closing probe connection failed");
                }

                result
                    .map_err(|_| self.timeout_error(format!("query {sql:?} on {}", member.name)))?
                    .map_err(|e| HaError::connection(&member.name, e))
            }
        }
    }

    async fn fetch_one<T>(&self, node: Node<'_>, sql: &str) -> Result<T, HaError>
    where
        T: Send + Unpin,
        (T,): for<'r> FromRow<'r, PgRow>,
    {
        self.fetch_optional(node, sql)
            .await?
            .ok_or_else(|| HaError::Internal(format!("{sql:?} returned no rows on {node}")))
    }

    async fn fetch_lsn(&self, node: Node<'_>, sql: &str) -> Result<WalPosition, HaError> {
        match self.fetch_one::<Option<String>>(node, sql).await? {
            Some(text) => lsn::parse_lsn(&text),
            None => Ok(WalPosition::ZERO),
        }
    }

    fn binary(&self, name: &str) -> PathBuf {
        self.config
            .bin_dir
            .as_ref()
            .map_or_else(|| PathBuf::from(name), |dir| dir.join(name))
    }

    fn pg_ctl_log(&self) -> PathBuf {
        self.config
            .data_dir
            .parent()
            .unwrap_or_else(|| Path::new("/tmp"))
            .join("pg_ctl.log")
    }

    /// Runs an engine binary and returns its stdout.
    async fn run(&self, program: &str, args: &[String]) -> Result<String, HaError> {
        let command_line = format!("{program} {}", args.join(" "));
        debug!(command = %command_line, "running engine command");

        let mut command = Command::new(self.binary(program));
        command
            .args(args)
            .env("PGDATA", &self.config.data_dir)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        if let Some(password) = &self.config.password {
            command.env("PGPASSWORD", password);
        }

        let output = command.output().await.map_err(|e| HaError::CommandFailed {
            command: command_line.clone(),
            stderr: e.to_string(),
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(HaError::CommandFailed {
                command: command_line,
                stderr: if stderr.is_empty() {
                    output.status.to_string()
                } else {
                    stderr
                },
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn pg_ctl(&self, action: &str, extra: &[&str]) -> Result<(), HaError> {
        let mut args = vec![
            action.to_string(),
            "-D".to_string(),
            self.config.data_dir.display().to_string(),
        ];
        args.extend(extra.iter().map(|s| (*s).to_string()));
        self.run("pg_ctl", &args).await.map(|_| ())
    }

    fn start_args(&self) -> Vec<String> {
        let mut args = vec![
            "-w".to_string(),
            "-l".to_string(),
            self.pg_ctl_log().display().to_string(),
        ];
        if let Some(config_file) = &self.config.config_file {
            args.push("-o".to_string());
            args.push(format!("--config-file={}", config_file.display()));
        }
        args
    }

    async fn pg_ctl_start(&self, action: &str) -> Result<(), HaError> {
        let args = self.start_args();
        let refs: Vec<&str> = args.iter().map(String::as_str).collect();
        self.pg_ctl(action, &refs).await
    }

    fn upstream_conninfo(&self, leader: &Member) -> ConnInfo {
        let info = ConnInfo::new()
            .with("host", leader.host.clone())
            .with("port", leader.port.to_string())
            .with("user", self.config.user.clone())
            .with("application_name", self.member_name.clone());
        match &self.config.password {
            Some(password) => info.with("password", password.clone()),
            None => info,
        }
    }

    async fn standby_signal_present(&self) -> bool {
        tokio::fs::try_exists(self.config.data_dir.join(STANDBY_SIGNAL))
            .await
            .unwrap_or(false)
    }

    async fn control_data(&self) -> Result<ControlData, HaError> {
        let args = vec![self.config.data_dir.display().to_string()];
        let output = self.run("pg_controldata", &args).await?;
        Ok(ControlData::parse(&output))
    }
}

fn local_options(config: &PostgresConfig) -> PgConnectOptions {
    let options = PgConnectOptions::new()
        .host(&config.host)
        .port(config.port)
        .username(&config.user)
        .database(&config.database)
        .application_name("pg-ha-coordinator");
    match &config.password {
        Some(password) => options.password(password),
        None => options,
    }
}

/// Escapes a value for a single-quoted `postgresql.conf` string.
fn quote_setting(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

#[async_trait]
impl DatabaseAdapter for PostgresAdapter {
    fn engine(&self) -> &'static str {
        "postgres"
    }

    fn member_name(&self) -> &str {
        &self.member_name
    }

    async fn current_role(&self, node: Node<'_>) -> Result<Role, HaError> {
        let in_recovery = self.fetch_one::<bool>(node, "SELECT pg_is_in_recovery()").await?;
        Ok(Role::from_in_recovery(in_recovery))
    }

    async fn replication_mode(&self, node: Node<'_>) -> Result<ReplicationMode, HaError> {
        let setting = self
            .fetch_one::<String>(node, "SELECT current_setting('synchronous_commit')")
            .await?;
        Ok(ReplicationMode::from_synchronous_commit(&setting))
    }

    async fn sync_standby_names(&self, node: Node<'_>) -> Result<String, HaError> {
        self.fetch_one::<String>(node, "SELECT current_setting('synchronous_standby_names')")
            .await
    }

    async fn wal_position(&self, node: Node<'_>, kind: WalKind) -> Result<WalPosition, HaError> {
        let role = self.current_role(node).await?;
        if role != kind.required_role() {
            return Err(HaError::RoleMismatch {
                operation: format!("{kind} wal position on {node}"),
                expected: kind.required_role().to_string(),
                actual: role.to_string(),
            });
        }
        let sql = match kind {
            WalKind::Current => "SELECT pg_current_wal_lsn()::text",
            WalKind::Replayed => "SELECT pg_last_wal_replay_lsn()::text",
            WalKind::Received => "SELECT pg_last_wal_receive_lsn()::text",
        };
        self.fetch_lsn(node, sql).await
    }

    async fn timeline(&self, node: Node<'_>) -> Result<Timeline, HaError> {
        match self.current_role(node).await? {
            Role::Primary => {
                let walfile = self
                    .fetch_one::<String>(
                        node,
                        "SELECT substr(pg_walfile_name(pg_current_wal_lsn()), 1, 8)",
                    )
                    .await?;
                Timeline::from_str_radix(&walfile, 16)
                    .map_err(|e| HaError::Internal(format!("bad wal file timeline {walfile:?}: {e}")))
            }
            Role::Secondary => {
                let received = self
                    .fetch_optional::<i32>(
                        node,
                        "SELECT received_tli FROM pg_stat_get_wal_receiver() \
                         WHERE latest_end_lsn IS NOT NULL",
                    )
                    .await?;
                let tli = match received {
                    Some(tli) => tli,
                    None => {
                        self.fetch_one::<i32>(node, "SELECT timeline_id FROM pg_control_checkpoint()")
                            .await?
                    }
                };
                Timeline::try_from(tli)
                    .map_err(|e| HaError::Internal(format!("negative timeline {tli}: {e}")))
            }
        }
    }

    async fn timeline_history(
        &self,
        node: Node<'_>,
        timeline: Timeline,
    ) -> Result<Vec<HistoryEntry>, HaError> {
        if timeline <= 1 {
            return Ok(Vec::new());
        }
        let sql = format!("SELECT pg_read_file('pg_wal/{timeline:08X}.history')");
        let contents = self.fetch_one::<String>(node, &sql).await?;
        lsn::parse_history(&contents)
    }

    async fn local_timeline_and_position(&self) -> Result<LocalPosition, HaError> {
        if self.is_running().await {
            match self.current_role(Node::Local).await {
                Ok(role) => {
                    let position = self.node_position(Node::Local).await?;
                    return Ok(LocalPosition {
                        in_recovery: role == Role::Secondary,
                        timeline: position.timeline,
                        position: position.position,
                    });
                }
                Err(e) => warn!(error = %e, "local probe failed, reading control data"),
            }
        }
        self.control_data().await?.local_position()
    }

    async fn is_running(&self) -> bool {
        match PidFile::read(&self.config.data_dir).await {
            Ok(Some(pid_file)) => pid_file.is_alive().await,
            Ok(None) => false,
            Err(e) => {
                warn!(error = %e, "unreadable postmaster.pid");
                false
            }
        }
    }

    async fn upstream_action(&self, leader: &Member) -> Result<UpstreamAction, HaError> {
        if !self.standby_signal_present().await || !self.is_running().await {
            return Ok(UpstreamAction::Restart);
        }

        let raw = match self
            .fetch_one::<String>(Node::Local, "SELECT current_setting('primary_conninfo')")
            .await
        {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "cannot read primary_conninfo");
                return Ok(UpstreamAction::Restart);
            }
        };

        let conninfo = match ConnInfo::parse(&raw) {
            Ok(info) => info,
            Err(e) => {
                warn!(error = %e, "unparsable primary_conninfo");
                return Ok(UpstreamAction::Reload);
            }
        };

        match conninfo.get("host") {
            Some(host) if host_matches(host, leader) => Ok(UpstreamAction::NoChange),
            host => {
                info!(configured = ?host, leader = %leader.name, "upstream host differs from leader");
                Ok(UpstreamAction::Reload)
            }
        }
    }

    async fn promote(&self) -> Result<(), HaError> {
        if self.current_role(Node::Local).await? == Role::Primary {
            debug!("already primary, skipping promote");
            return Ok(());
        }
        self.pg_ctl("promote", &["-w"]).await?;
        info!(member = %self.member_name, "promoted");
        Ok(())
    }

    async fn demote(&self) -> Result<(), HaError> {
        if !self.is_running().await {
            debug!("engine already stopped");
            return Ok(());
        }
        self.pg_ctl("stop", &["-m", "fast", "-w"]).await?;
        info!(member = %self.member_name, "stopped for demotion");
        Ok(())
    }

    async fn reconfigure_upstream(&self, leader: &Member, restart: bool) -> Result<(), HaError> {
        let line = format!(
            "primary_conninfo = {}\n",
            quote_setting(&self.upstream_conninfo(leader).to_string())
        );
        let tmp = self.config.recovery_conf.with_extension("tmp");
        tokio::fs::write(&tmp, line).await?;
        tokio::fs::rename(&tmp, &self.config.recovery_conf).await?;

        if !restart {
            self.pg_ctl("reload", &[]).await?;
            info!(leader = %leader.name, "reloaded with new upstream");
            return Ok(());
        }

        tokio::fs::write(self.config.data_dir.join(STANDBY_SIGNAL), b"").await?;
        if self.is_running().await {
            let mut args = vec!["-m", "fast"];
            let start_args = self.start_args();
            args.extend(start_args.iter().map(String::as_str));
            self.pg_ctl("restart", &args).await?;
        } else {
            self.pg_ctl_start("start").await?;
        }
        info!(leader = %leader.name, "restarted as standby of new upstream");
        Ok(())
    }

    async fn rewind(&self, leader: &Member) -> Result<(), HaError> {
        if self.is_running().await {
            self.pg_ctl("stop", &["-m", "fast", "-w"])
                .await
                .map_err(|e| HaError::RewindFailed(format!("stopping before rewind: {e}")))?;
        }

        // The password travels via PGPASSWORD, never on the command line.
        let source = ConnInfo::new()
            .with("host", leader.host.clone())
            .with("port", leader.port.to_string())
            .with("user", self.config.user.clone())
            .with("dbname", self.config.database.clone());
        let args = vec![
            format!("--target-pgdata={}", self.config.data_dir.display()),
            format!("--source-server={source}"),
            "--progress".to_string(),
        ];
        self.run("pg_rewind", &args)
            .await
            .map_err(|e| HaError::RewindFailed(e.to_string()))?;
        info!(leader = %leader.name, "rewind complete");
        Ok(())
    }

    async fn start(&self) -> Result<(), HaError> {
        self.pg_ctl_start("start").await?;
        info!(member = %self.member_name, "engine started");
        Ok(())
    }
}
