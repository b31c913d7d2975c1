//! Per-client session engine. One session owns two checked-out backend
//! connections, a replica for reads and the primary for writes, and keeps
//! up the illusion of a single MySQL session across them: lazy `USE`
//! fan-out, one-way pinning to the primary, and a private prepared
//! statement handle space.

use crate::backend::pool::{ConnPool, PooledConn};
use crate::backend::{Backends, PoolKey};
use crate::error::{is_replica_lag, ProxyError};
use crate::protocol::mysql::binary;
use crate::protocol::mysql::constants::com_name;
use crate::protocol::mysql::packet::packet_writer::PacketWriter;
use crate::protocol::mysql::packet::writers::{self, OkPayload};
use crate::server::auth::identity::IdentityEntry;
use crate::server::SERVER_VERSION;
use crate::sql::{use_database, Classifier, ClassifiedStatement, SqlCommand};

use hashbrown::HashMap;
use mysql_async::prelude::Queryable;
use mysql_async::{Column, Conn, Params, Row, Statement};
use mysql_common::constants::{CapabilityFlags, ColumnType, StatusFlags};
use nanoid::nanoid;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncWrite;
use tracing::{debug, info, warn};

/// Replica-lag retry backoff, in milliseconds: 1 ms doubled per attempt,
/// clamped at 10 s, retried until a non-replication-class outcome.
const READ_RETRY_BASE_MS: u64 = 1;
const READ_RETRY_MAX_MS: u64 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Read,
    Write,
}

/// The routing state of one session. `apply` is the §routing transition
/// function: it mutates the state per command and names the connection the
/// command executes on.
#[derive(Debug, Clone)]
pub struct SessionState {
    pub current: Target,
    pub pinned: bool,
    pub in_transaction: bool,
    pub database_name: Option<String>,
    pub use_applied: bool,
}

impl SessionState {
    pub fn new(initial_db: Option<String>) -> Self {
        Self {
            current: Target::Read,
            pinned: false,
            in_transaction: false,
            database_name: initial_db,
            use_applied: false,
        }
    }

    /// Pinning is one-way: once a session-stateful command runs, the
    /// session sticks to the primary for the rest of its life.
    pub fn pin(&mut self) {
        self.pinned = true;
        self.current = Target::Write;
    }

    pub fn apply(&mut self, command: SqlCommand) -> Target {
        match command {
            SqlCommand::Select | SqlCommand::Show | SqlCommand::Desc | SqlCommand::Describe => {
                self.current
            }
            SqlCommand::Insert
            | SqlCommand::Update
            | SqlCommand::Delete
            | SqlCommand::Create
            | SqlCommand::Alter
            | SqlCommand::Drop => Target::Write,
            SqlCommand::Truncate
            | SqlCommand::Rename
            | SqlCommand::Grant
            | SqlCommand::Revoke
            | SqlCommand::Set => {
                self.pin();
                Target::Write
            }
            SqlCommand::Begin => {
                self.pin();
                self.in_transaction = true;
                Target::Write
            }
            SqlCommand::Commit | SqlCommand::Rollback => {
                self.in_transaction = false;
                Target::Write
            }
            // USE never reaches apply(): it fans out to both connections
            SqlCommand::Use => self.current,
        }
    }
}

pub enum PreparedKind {
    /// BEGIN/COMMIT/ROLLBACK: acknowledged without touching the backend,
    /// run as plain text on execute.
    Control(SqlCommand),
    Backend(Statement),
}

pub struct PreparedStatement {
    pub kind: PreparedKind,
    pub command: SqlCommand,
    pub target: Target,
    pub text: String,
    bound_types: Vec<(ColumnType, bool)>,
    long_data: HashMap<u16, Vec<u8>>,
}

impl PreparedStatement {
    pub fn control(command: SqlCommand, text: String) -> Self {
        Self {
            kind: PreparedKind::Control(command),
            command,
            target: Target::Write,
            text,
            bound_types: Vec::new(),
            long_data: HashMap::new(),
        }
    }

    pub fn backend(stmt: Statement, command: SqlCommand, target: Target, text: String) -> Self {
        Self {
            kind: PreparedKind::Backend(stmt),
            command,
            target,
            text,
            bound_types: Vec::new(),
            long_data: HashMap::new(),
        }
    }
}

/// Everything needed to run one `COM_STMT_EXECUTE`, extracted from the
/// registry under its lock.
pub enum Execution {
    Control(SqlCommand, String),
    Backend {
        stmt: Statement,
        command: SqlCommand,
        target: Target,
        params: Params,
    },
}

/// Per-session prepared statement registry. Handles are dense 32-bit
/// values minted from 1, monotonically; the space is private to the
/// session so there are no cross-session collisions. The mutex also guards
/// the counter because handle lifetimes cross command boundaries.
pub struct StmtRegistry {
    inner: Mutex<StmtStore>,
}

struct StmtStore {
    next_handle: u32,
    stmts: HashMap<u32, PreparedStatement>,
}

impl StmtRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(StmtStore {
                next_handle: 1,
                stmts: HashMap::new(),
            }),
        }
    }

    pub fn register(&self, prepared: PreparedStatement) -> u32 {
        let mut store = self.inner.lock().unwrap();
        let handle = store.next_handle;
        store.next_handle += 1;
        store.stmts.insert(handle, prepared);
        handle
    }

    /// Decodes the parameter block against the entry's cached bound types
    /// and hands back everything the execute path needs. Long data is
    /// consumed by the execute, as the protocol prescribes.
    pub fn prepare_execution(
        &self,
        handle: u32,
        params_payload: &[u8],
    ) -> Result<Execution, ProxyError> {
        let mut store = self.inner.lock().unwrap();
        let entry = store
            .stmts
            .get_mut(&handle)
            .ok_or(ProxyError::StmtNotFound(handle))?;
        let stmt = match &entry.kind {
            PreparedKind::Control(command) => {
                return Ok(Execution::Control(*command, entry.text.clone()))
            }
            PreparedKind::Backend(stmt) => stmt.clone(),
        };
        let values = binary::parse_stmt_execute_params(
            params_payload,
            usize::from(stmt.num_params()),
            &mut entry.bound_types,
            &entry.long_data,
        )?;
        entry.long_data.clear();
        let params = if values.is_empty() {
            Params::Empty
        } else {
            Params::Positional(values)
        };
        Ok(Execution::Backend {
            stmt,
            command: entry.command,
            target: entry.target,
            params,
        })
    }

    pub fn append_long_data(&self, handle: u32, param: u16, data: &[u8]) -> Result<(), ProxyError> {
        let mut store = self.inner.lock().unwrap();
        let entry = store
            .stmts
            .get_mut(&handle)
            .ok_or(ProxyError::StmtNotFound(handle))?;
        entry
            .long_data
            .entry(param)
            .or_default()
            .extend_from_slice(data);
        Ok(())
    }

    pub fn remove(&self, handle: u32) -> Result<PreparedStatement, ProxyError> {
        let mut store = self.inner.lock().unwrap();
        store
            .stmts
            .remove(&handle)
            .ok_or(ProxyError::StmtNotFound(handle))
    }

    pub fn drain(&self) -> Vec<PreparedStatement> {
        let mut store = self.inner.lock().unwrap();
        store.stmts.drain().map(|(_, prepared)| prepared).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().stmts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for StmtRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// The collected response of one backend statement. Result sets carry
/// their column metadata; OK-only results carry the affected-row counters.
struct QueryOutcome {
    columns: Option<Arc<[Column]>>,
    rows: Vec<Row>,
    affected_rows: u64,
    last_insert_id: Option<u64>,
}

impl QueryOutcome {
    fn has_rows_shape(&self) -> bool {
        self.columns.as_ref().is_some_and(|cols| !cols.is_empty())
    }
}

async fn query_once(conn: &mut Conn, text: &str) -> Result<QueryOutcome, mysql_async::Error> {
    let mut result = conn.query_iter(text).await?;
    let columns = result.columns();
    let rows: Vec<Row> = result.collect().await?;
    Ok(QueryOutcome {
        columns,
        rows,
        affected_rows: result.affected_rows(),
        last_insert_id: result.last_insert_id(),
    })
}

async fn exec_once(
    conn: &mut Conn,
    stmt: &Statement,
    params: Params,
) -> Result<QueryOutcome, mysql_async::Error> {
    let mut result = conn.exec_iter(stmt, params).await?;
    let columns = result.columns();
    let rows: Vec<Row> = result.collect().await?;
    Ok(QueryOutcome {
        columns,
        rows,
        affected_rows: result.affected_rows(),
        last_insert_id: result.last_insert_id(),
    })
}

pub struct Session {
    id: String,
    user: String,
    state: SessionState,
    classifier: Classifier,
    client_caps: CapabilityFlags,
    log_queries: bool,
    read_addr: String,
    write_addr: String,
    read_pool: Arc<ConnPool>,
    write_pool: Arc<ConnPool>,
    read_conn: PooledConn,
    write_conn: PooledConn,
    stmts: StmtRegistry,
}

impl Session {
    /// Fixes the two backend servers for the life of the session (replica
    /// via round-robin, primary via the writer handle) and checks out one
    /// connection from each under the session's backend identity.
    pub async fn startup(
        backends: &Backends,
        identity: &IdentityEntry,
        client_caps: CapabilityFlags,
        initial_db: Option<String>,
        log_queries: bool,
    ) -> Result<Self, ProxyError> {
        let read_server = backends.next_replica()?;
        let write_server = backends.writer()?;
        let key = PoolKey {
            user: identity.backend_user.clone(),
            password: identity.backend_password.clone(),
        };
        let read_pool = read_server.pool(&key)?;
        let write_pool = write_server.pool(&key)?;
        let read_conn = read_pool.checkout().await?;
        let write_conn = write_pool.checkout().await?;

        let id = nanoid!();
        info!(
            "session {id} user={} read={} write={}",
            identity.proxy_user,
            read_server.addr(),
            write_server.addr()
        );
        Ok(Self {
            id,
            user: identity.proxy_user.clone(),
            state: SessionState::new(initial_db),
            classifier: Classifier::new(SERVER_VERSION),
            client_caps,
            log_queries,
            read_addr: read_server.addr(),
            write_addr: write_server.addr(),
            read_pool,
            write_pool,
            read_conn,
            write_conn,
            stmts: StmtRegistry::new(),
        })
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    fn conn_for(&mut self, target: Target) -> &mut Conn {
        match target {
            Target::Read => &mut self.read_conn.conn,
            Target::Write => &mut self.write_conn.conn,
        }
    }

    fn addr_for(&self, target: Target) -> &str {
        match target {
            Target::Read => &self.read_addr,
            Target::Write => &self.write_addr,
        }
    }

    fn session_status(&self, more_results: bool) -> StatusFlags {
        let mut flags = StatusFlags::SERVER_STATUS_AUTOCOMMIT;
        if self.state.in_transaction {
            flags |= StatusFlags::SERVER_STATUS_IN_TRANS;
        }
        if more_results {
            flags |= StatusFlags::SERVER_MORE_RESULTS_EXISTS;
        }
        flags
    }

    async fn write_proxy_error<W>(
        &self,
        err: &ProxyError,
        w: &mut PacketWriter<W>,
    ) -> io::Result<()>
    where
        W: AsyncWrite + Send + Unpin,
    {
        let (code, state, msg) = err.wire_triple();
        warn!("session {} user={} error {code}: {msg}", self.id, self.user);
        writers::write_server_err_packet(code, &state, msg.as_bytes(), w).await?;
        w.flush_all().await
    }

    /// `COM_QUERY`: classify the batch, then run each statement in order on
    /// the connection the routing table names. Every result set but the
    /// last is flagged with SERVER_MORE_RESULTS_EXISTS.
    pub async fn on_query<W>(&mut self, sql: &[u8], w: &mut PacketWriter<W>) -> io::Result<()>
    where
        W: AsyncWrite + Send + Unpin,
    {
        let batch = String::from_utf8_lossy(sql).to_string();
        let statements = match self.classifier.classify(&batch) {
            Ok(statements) => statements,
            Err(e) => return self.write_proxy_error(&e, w).await,
        };
        let count = statements.len();
        for (idx, statement) in statements.iter().enumerate() {
            let more = idx + 1 < count;
            if let Err(e) = self.execute_statement(statement, more, w).await {
                // surfaced on the same session; the rest of the batch is
                // abandoned like a backend would
                return self.write_proxy_error(&e, w).await;
            }
        }
        w.flush_all().await
    }

    async fn execute_statement<W>(
        &mut self,
        statement: &ClassifiedStatement,
        more: bool,
        w: &mut PacketWriter<W>,
    ) -> Result<(), ProxyError>
    where
        W: AsyncWrite + Send + Unpin,
    {
        if statement.command == SqlCommand::Use {
            let db = use_database(&statement.text)?;
            self.state.database_name = Some(db);
            self.state.use_applied = false;
            self.fan_out_use().await?;
            // the client sees a plain OK, not an empty result set
            let ok = OkPayload::ok(0, 0, self.session_status(more));
            writers::write_ok_packet(w, self.client_caps, ok).await?;
            return Ok(());
        }

        self.ensure_use().await?;
        let target = self.state.apply(statement.command);
        if self.log_queries {
            info!(
                "session {} {:?} -> {:?} [{}] {}",
                self.id,
                statement.command,
                target,
                self.addr_for(target),
                statement.text
            );
        }
        let outcome = match target {
            Target::Read => self.run_read(&statement.text).await?,
            Target::Write => query_once(&mut self.write_conn.conn, &statement.text).await?,
        };
        self.write_outcome(&outcome, more, w).await?;
        Ok(())
    }

    /// Lazy `USE`: the first statement that needs a schema applies the
    /// recorded database to both backend connections before running.
    async fn ensure_use(&mut self) -> Result<(), ProxyError> {
        if self.state.use_applied || self.state.database_name.is_none() {
            return Ok(());
        }
        self.fan_out_use().await
    }

    /// Issues `USE` to both backend connections concurrently and joins
    /// both, keeping the two halves of the session on one logical schema.
    async fn fan_out_use(&mut self) -> Result<(), ProxyError> {
        let Some(db) = self.state.database_name.clone() else {
            return Ok(());
        };
        let use_stmt = format!("USE `{db}`");
        debug!("session {} fan-out {use_stmt}", self.id);
        let read_conn = &mut self.read_conn;
        let write_conn = &mut self.write_conn;
        let (read_rs, write_rs) = tokio::join!(
            read_conn.conn.query_drop(&use_stmt),
            write_conn.conn.query_drop(&use_stmt)
        );
        read_rs?;
        write_rs?;
        self.state.use_applied = true;
        Ok(())
    }

    /// Read with replica-lag masking: unknown-table/unknown-database errors
    /// retry with capped exponential backoff until the replica catches up;
    /// anything else surfaces immediately.
    async fn run_read(&mut self, text: &str) -> Result<QueryOutcome, ProxyError> {
        let mut delay_ms = READ_RETRY_BASE_MS;
        loop {
            match query_once(&mut self.read_conn.conn, text).await {
                Ok(outcome) => return Ok(outcome),
                Err(e) if is_replica_lag(&e) => {
                    debug!(
                        "session {} replica {} lagging ({e}), retrying in {delay_ms}ms",
                        self.id, self.read_addr
                    );
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    delay_ms = (delay_ms * 2).min(READ_RETRY_MAX_MS);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn run_read_exec(
        &mut self,
        stmt: &Statement,
        params: &Params,
    ) -> Result<QueryOutcome, ProxyError> {
        let mut delay_ms = READ_RETRY_BASE_MS;
        loop {
            match exec_once(&mut self.read_conn.conn, stmt, params.clone()).await {
                Ok(outcome) => return Ok(outcome),
                Err(e) if is_replica_lag(&e) => {
                    debug!(
                        "session {} replica {} lagging ({e}), retrying in {delay_ms}ms",
                        self.id, self.read_addr
                    );
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    delay_ms = (delay_ms * 2).min(READ_RETRY_MAX_MS);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn write_outcome<W>(
        &self,
        outcome: &QueryOutcome,
        more: bool,
        w: &mut PacketWriter<W>,
    ) -> Result<(), ProxyError>
    where
        W: AsyncWrite + Send + Unpin,
    {
        let status = self.session_status(more);
        if outcome.has_rows_shape() {
            let columns = outcome.columns.as_deref().unwrap_or(&[]);
            writers::write_text_resultset(w, self.client_caps, columns, &outcome.rows, status)
                .await?;
        } else {
            let ok = OkPayload::ok(
                outcome.affected_rows,
                outcome.last_insert_id.unwrap_or(0),
                status,
            );
            writers::write_ok_packet(w, self.client_caps, ok).await?;
        }
        Ok(())
    }

    /// `COM_STMT_PREPARE`. Transaction-control statements are acknowledged
    /// locally with zero parameters and columns; everything else is
    /// prepared on the current connection (after the pinning rule) and
    /// registered under a freshly minted handle.
    pub async fn on_prepare<W>(&mut self, sql: &[u8], w: &mut PacketWriter<W>) -> io::Result<()>
    where
        W: AsyncWrite + Send + Unpin,
    {
        let text = String::from_utf8_lossy(sql).to_string();
        let mut statements = match self.classifier.classify(&text) {
            Ok(statements) => statements,
            Err(e) => return self.write_proxy_error(&e, w).await,
        };
        if statements.len() != 1 {
            let err = ProxyError::UnsupportedStatement("multi-statement prepare".to_string());
            return self.write_proxy_error(&err, w).await;
        }
        let statement = statements.remove(0);

        match statement.command {
            SqlCommand::Begin | SqlCommand::Commit | SqlCommand::Rollback => {
                let handle = self
                    .stmts
                    .register(PreparedStatement::control(statement.command, statement.text));
                writers::write_prepare_ok(handle, &[], &[], w, self.client_caps).await?;
                w.flush_all().await
            }
            command => {
                if let Err(e) = self.ensure_use().await {
                    return self.write_proxy_error(&e, w).await;
                }
                if command.pins_session() {
                    self.state.pin();
                }
                let target = self.state.current;
                match self.conn_for(target).prep(statement.text.clone()).await {
                    Ok(stmt) => {
                        let params = stmt.params().to_vec();
                        let columns = stmt.columns().to_vec();
                        let handle = self.stmts.register(PreparedStatement::backend(
                            stmt,
                            command,
                            target,
                            statement.text,
                        ));
                        if self.log_queries {
                            info!(
                                "session {} prepared h={handle} on {:?} [{}]",
                                self.id,
                                target,
                                self.addr_for(target)
                            );
                        }
                        writers::write_prepare_ok(handle, &params, &columns, w, self.client_caps)
                            .await?;
                        w.flush_all().await
                    }
                    Err(e) => self.write_proxy_error(&e.into(), w).await,
                }
            }
        }
    }

    /// `COM_STMT_EXECUTE`. Missing handles fail without touching a backend;
    /// control statements run as plain queries on the current connection.
    pub async fn on_execute<W>(
        &mut self,
        handle: u32,
        params_payload: &[u8],
        w: &mut PacketWriter<W>,
    ) -> io::Result<()>
    where
        W: AsyncWrite + Send + Unpin,
    {
        let execution = match self.stmts.prepare_execution(handle, params_payload) {
            Ok(execution) => execution,
            Err(e) => return self.write_proxy_error(&e, w).await,
        };
        match execution {
            Execution::Control(command, text) => {
                self.state.apply(command);
                let target = self.state.current;
                if let Err(e) = self.conn_for(target).query_drop(text).await {
                    return self.write_proxy_error(&e.into(), w).await;
                }
                let ok = OkPayload::ok(0, 0, self.session_status(false));
                writers::write_ok_packet(w, self.client_caps, ok).await?;
                w.flush_all().await
            }
            Execution::Backend {
                stmt,
                command,
                target,
                params,
            } => {
                if self.log_queries {
                    info!(
                        "session {} execute h={handle} {:?} -> {:?} [{}]",
                        self.id,
                        command,
                        target,
                        self.addr_for(target)
                    );
                }
                let outcome = if target == Target::Read {
                    self.run_read_exec(&stmt, &params).await
                } else {
                    exec_once(&mut self.write_conn.conn, &stmt, params)
                        .await
                        .map_err(Into::into)
                };
                match outcome {
                    Ok(outcome) => {
                        let status = self.session_status(false);
                        if outcome.has_rows_shape() {
                            let columns = outcome.columns.as_deref().unwrap_or(&[]);
                            writers::write_binary_resultset(
                                w,
                                self.client_caps,
                                columns,
                                &outcome.rows,
                                status,
                            )
                            .await?;
                        } else {
                            let ok = OkPayload::ok(
                                outcome.affected_rows,
                                outcome.last_insert_id.unwrap_or(0),
                                status,
                            );
                            writers::write_ok_packet(w, self.client_caps, ok).await?;
                        }
                        w.flush_all().await
                    }
                    Err(e) => self.write_proxy_error(&e, w).await,
                }
            }
        }
    }

    /// `COM_STMT_SEND_LONG_DATA` carries no response, even on error.
    pub fn on_send_long_data(&mut self, handle: u32, param: u16, data: &[u8]) {
        if let Err(e) = self.stmts.append_long_data(handle, param, data) {
            warn!("session {} long data dropped: {e}", self.id);
        }
    }

    /// `COM_STMT_CLOSE` carries no response; an unknown handle is logged.
    pub async fn on_close(&mut self, handle: u32) {
        match self.stmts.remove(handle) {
            Ok(prepared) => {
                if let PreparedKind::Backend(stmt) = prepared.kind {
                    let session_id = self.id.clone();
                    let conn = self.conn_for(prepared.target);
                    if let Err(e) = conn.close(stmt).await {
                        debug!("session {session_id} backend stmt close failed: {e}");
                    }
                }
            }
            Err(e) => warn!("session {} stmt close: {e}", self.id),
        }
    }

    /// `COM_INIT_DB`: same semantics as a `USE` statement.
    pub async fn on_init<W>(&mut self, schema: &[u8], w: &mut PacketWriter<W>) -> io::Result<()>
    where
        W: AsyncWrite + Send + Unpin,
    {
        let db = String::from_utf8_lossy(schema)
            .trim()
            .trim_matches('`')
            .to_string();
        if db.is_empty() {
            return self
                .write_proxy_error(&ProxyError::InvalidUse(String::new()), w)
                .await;
        }
        self.state.database_name = Some(db);
        self.state.use_applied = false;
        if let Err(e) = self.fan_out_use().await {
            return self.write_proxy_error(&e, w).await;
        }
        let ok = OkPayload::ok(0, 0, self.session_status(false));
        writers::write_ok_packet(w, self.client_caps, ok).await?;
        w.flush_all().await
    }

    /// `COM_FIELD_LIST` is deprecated; answer an empty field list.
    pub async fn on_field_list<W>(&mut self, w: &mut PacketWriter<W>) -> io::Result<()>
    where
        W: AsyncWrite + Send + Unpin,
    {
        if self
            .client_caps
            .contains(CapabilityFlags::CLIENT_DEPRECATE_EOF)
        {
            let end = OkPayload::resultset_end(self.session_status(false));
            writers::write_ok_packet(w, self.client_caps, end).await?;
        } else {
            writers::write_eof_packet(w, self.session_status(false)).await?;
        }
        w.flush_all().await
    }

    /// Anything the session does not model is logged and acknowledged.
    pub async fn on_other<W>(&mut self, code: u8, w: &mut PacketWriter<W>) -> io::Result<()>
    where
        W: AsyncWrite + Send + Unpin,
    {
        debug!("session {} acknowledged {}", self.id, com_name(code));
        let ok = OkPayload::ok(0, 0, self.session_status(false));
        writers::write_ok_packet(w, self.client_caps, ok).await?;
        w.flush_all().await
    }

    /// Returns both connections to their pools (closes them when the
    /// front-end is draining) and discards any prepared statements the
    /// client left open. Errors are logged, never propagated.
    pub async fn teardown(mut self, drain: bool) {
        let leftovers = self.stmts.drain();
        if !drain && !leftovers.is_empty() {
            debug!(
                "session {} discarding {} prepared statements",
                self.id,
                leftovers.len()
            );
            for prepared in leftovers {
                if let PreparedKind::Backend(stmt) = prepared.kind {
                    let conn = self.conn_for(prepared.target);
                    if let Err(e) = conn.close(stmt).await {
                        debug!("stmt close during teardown failed: {e}");
                    }
                }
            }
        }
        self.read_pool.release(self.read_conn, drain).await;
        self.write_pool.release(self.write_conn, drain).await;
        debug!("session {} closed (drain={drain})", self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_start_on_the_replica() {
        let mut state = SessionState::new(None);
        assert_eq!(state.apply(SqlCommand::Select), Target::Read);
        assert_eq!(state.apply(SqlCommand::Show), Target::Read);
        assert!(!state.pinned);
    }

    #[test]
    fn writes_go_to_primary_without_pinning() {
        let mut state = SessionState::new(None);
        assert_eq!(state.apply(SqlCommand::Insert), Target::Write);
        assert!(!state.pinned);
        // the split survives: the next read still goes to the replica
        assert_eq!(state.apply(SqlCommand::Select), Target::Read);
    }

    #[test]
    fn stateful_commands_pin_for_good() {
        let mut state = SessionState::new(None);
        assert_eq!(state.apply(SqlCommand::Set), Target::Write);
        assert!(state.pinned);
        // a SELECT right after a SET runs on the primary
        assert_eq!(state.apply(SqlCommand::Select), Target::Write);
        assert_eq!(state.current, Target::Write);
    }

    #[test]
    fn begin_pins_and_opens_transaction() {
        let mut state = SessionState::new(None);
        assert_eq!(state.apply(SqlCommand::Begin), Target::Write);
        assert!(state.pinned);
        assert!(state.in_transaction);
        assert_eq!(state.apply(SqlCommand::Commit), Target::Write);
        assert!(!state.in_transaction);
        // pinning is one-way: commit does not release the session
        assert!(state.pinned);
        assert_eq!(state.current, Target::Write);
    }

    #[test]
    fn pinned_current_is_always_write() {
        let mut state = SessionState::new(None);
        for command in [
            SqlCommand::Select,
            SqlCommand::Insert,
            SqlCommand::Truncate,
            SqlCommand::Select,
            SqlCommand::Delete,
            SqlCommand::Commit,
        ] {
            state.apply(command);
            // invariant: pinned implies current = write
            assert!(!state.pinned || state.current == Target::Write);
            assert!(matches!(state.current, Target::Read | Target::Write));
        }
    }

    #[test]
    fn handles_are_minted_from_one() {
        let registry = StmtRegistry::new();
        let first = registry.register(PreparedStatement::control(
            SqlCommand::Begin,
            "BEGIN".to_string(),
        ));
        let second = registry.register(PreparedStatement::control(
            SqlCommand::Commit,
            "COMMIT".to_string(),
        ));
        assert_eq!(first, 1);
        assert_eq!(second, 2);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn close_removes_and_unknown_handle_fails() {
        let registry = StmtRegistry::new();
        let handle = registry.register(PreparedStatement::control(
            SqlCommand::Begin,
            "BEGIN".to_string(),
        ));
        assert!(registry.remove(handle).is_ok());
        assert!(matches!(
            registry.remove(handle),
            Err(ProxyError::StmtNotFound(h)) if h == handle
        ));
        assert!(matches!(
            registry.prepare_execution(99, &[]),
            Err(ProxyError::StmtNotFound(99))
        ));
    }

    #[test]
    fn control_statements_execute_as_plain_text() {
        let registry = StmtRegistry::new();
        let handle = registry.register(PreparedStatement::control(
            SqlCommand::Rollback,
            "ROLLBACK".to_string(),
        ));
        match registry.prepare_execution(handle, &[]).unwrap() {
            Execution::Control(command, text) => {
                assert_eq!(command, SqlCommand::Rollback);
                assert_eq!(text, "ROLLBACK");
            }
            Execution::Backend { .. } => panic!("control statement reached the backend"),
        }
    }

    #[test]
    fn registry_drains_at_teardown() {
        let registry = StmtRegistry::new();
        registry.register(PreparedStatement::control(
            SqlCommand::Begin,
            "BEGIN".to_string(),
        ));
        registry.register(PreparedStatement::control(
            SqlCommand::Commit,
            "COMMIT".to_string(),
        ));
        let drained = registry.drain();
        assert_eq!(drained.len(), 2);
        assert!(registry.is_empty());
    }

    #[test]
    fn initial_db_defers_use_fanout() {
        let state = SessionState::new(Some("app".to_string()));
        assert!(!state.use_applied);
        assert_eq!(state.database_name.as_deref(), Some("app"));
        assert_eq!(state.current, Target::Read);
    }
}
