//! Command dispatch for bound sessions.

use std::sync::Arc;

use futures::future::join_all;

use crate::error::{GatewayError, Result};
use crate::executor::ShardWorker;
use crate::protocol::mysql::{
    build_column_definition, build_eof_packet, build_err_packet, build_ok_packet,
    build_text_row, write_length_encoded_int, ColumnDefinition41, ErrPacket, OkPacket, Packet,
    COM_INIT_DB, COM_PING, COM_QUERY, COM_QUIT, ER_DBACCESS_DENIED_ERROR, ER_KILL_DENIED_ERROR,
    ER_NO_SUCH_THREAD, ER_UNKNOWN_COM_ERROR, ER_UNKNOWN_ERROR, SERVER_STATUS_AUTOCOMMIT,
};
use crate::routing::{ShardTarget, StatementKind};
use crate::session::Session;
use crate::value::Value;

use super::{GatewayContext, GatewayMetrics};

/// What the connection loop does after a command
#[derive(Debug)]
pub enum DispatchOutcome {
    /// Write these frames and keep reading
    Reply(Vec<Packet>),
    /// Close the connection without replying
    Close,
}

/// Output of one shard worker
#[derive(Debug)]
enum ShardOutput {
    Affected(u64),
    Rows {
        columns: Vec<String>,
        rows: Vec<Vec<Value>>,
    },
}

/// `KILL` statement target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KillScope {
    Query,
    Connection,
}

/// Assigns consecutive sequence ids to reply frames
struct Reply {
    next: u8,
    packets: Vec<Packet>,
}

impl Reply {
    fn after(request: &Packet) -> Self {
        Self {
            next: request.sequence_id.wrapping_add(1),
            packets: Vec::new(),
        }
    }

    fn push(&mut self, payload: Vec<u8>) {
        self.packets.push(Packet::new(self.next, payload));
        self.next = self.next.wrapping_add(1);
    }

    fn ok(mut self, ok: &OkPacket) -> DispatchOutcome {
        self.push(build_ok_packet(ok));
        DispatchOutcome::Reply(self.packets)
    }

    fn err(mut self, code: u16, message: impl Into<String>) -> DispatchOutcome {
        self.push(build_err_packet(&ErrPacket::new(code, message)));
        DispatchOutcome::Reply(self.packets)
    }

    fn error(self, err: &GatewayError) -> DispatchOutcome {
        self.err(err.mysql_error_code(), err.client_message())
    }
}

/// Handles command frames of bound sessions.
pub struct CommandDispatcher {
    ctx: Arc<GatewayContext>,
}

impl CommandDispatcher {
    /// Dispatcher over the shared context
    pub fn new(ctx: Arc<GatewayContext>) -> Self {
        Self { ctx }
    }

    /// Handle one command frame.
    pub async fn dispatch(&self, session: &Arc<Session>, packet: Packet) -> DispatchOutcome {
        let reply = Reply::after(&packet);
        let Some((&command, body)) = packet.payload.split_first() else {
            return reply.err(ER_UNKNOWN_COM_ERROR, "Unknown command");
        };

        match command {
            COM_QUIT => {
                debug!(connection_id = session.connection_id(), "Client quit");
                DispatchOutcome::Close
            }
            COM_PING => reply.ok(&OkPacket::default()),
            COM_INIT_DB => {
                let schema = String::from_utf8_lossy(body);
                self.init_db(session, schema.trim(), reply).await
            }
            COM_QUERY => {
                let sql = String::from_utf8_lossy(body);
                let sql = sql.trim().trim_end_matches(';').trim_end();
                match parse_kill(sql) {
                    Some((scope, target)) => self.kill(session, scope, target, reply).await,
                    None => self.query(session, sql, reply).await,
                }
            }
            other => {
                debug!(command = other, "Unsupported command");
                reply.err(ER_UNKNOWN_COM_ERROR, "Unknown command")
            }
        }
    }

    async fn init_db(&self, session: &Arc<Session>, schema: &str, reply: Reply) -> DispatchOutcome {
        let denied = || {
            let frame = ErrPacket::db_access_denied(session.user(), schema);
            (frame.error_code, frame.error_message)
        };
        match self.ctx.privilege.schema_exists(session.user(), schema).await {
            Ok(true) => {
                session.set_schema(schema);
                debug!(connection_id = session.connection_id(), schema = %schema, "Schema selected");
                reply.ok(&OkPacket::default())
            }
            Ok(false) => {
                let (code, message) = denied();
                reply.err(code, message)
            }
            Err(e) => {
                error!(
                    user = %session.user(),
                    schema = %schema,
                    error = %e,
                    "Privilege check failed"
                );
                reply.err(ER_DBACCESS_DENIED_ERROR, denied().1)
            }
        }
    }

    async fn kill(
        &self,
        session: &Arc<Session>,
        scope: KillScope,
        target_id: u32,
        reply: Reply,
    ) -> DispatchOutcome {
        let Some(target) = self.ctx.registry.get(target_id) else {
            return reply.err(ER_NO_SUCH_THREAD, format!("Unknown thread id: {}", target_id));
        };
        if target.user() != session.user() {
            return reply.err(
                ER_KILL_DENIED_ERROR,
                format!("You are not owner of thread {}", target_id),
            );
        }

        let cancelled = target.cancel().await;
        self.ctx.metrics.statements_cancelled(cancelled as u64);
        if scope == KillScope::Connection {
            target.request_termination();
        }
        info!(
            connection_id = session.connection_id(),
            target = target_id,
            ?scope,
            cancelled,
            "KILL executed"
        );
        reply.ok(&OkPacket::default())
    }

    async fn query(&self, session: &Arc<Session>, sql: &str, reply: Reply) -> DispatchOutcome {
        let plan = match self.ctx.router.route(session, sql) {
            Ok(plan) => plan,
            Err(e) => {
                debug!(error = %e, "Routing failed");
                return reply.err(ER_UNKNOWN_ERROR, e.to_string());
            }
        };

        let mut handles = Vec::with_capacity(plan.targets.len());
        for target in plan.targets {
            let task = run_target(
                Arc::clone(session),
                target,
                plan.kind,
                Arc::clone(&self.ctx.metrics),
            );
            match self.ctx.pool.submit(task) {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    self.ctx.metrics.pool_rejected();
                    warn!(connection_id = session.connection_id(), "Worker pool full, statement rejected");
                    // Workers release their connections when dropped
                    for handle in &handles {
                        handle.abort();
                    }
                    return reply.error(&e);
                }
            }
        }

        let mut outputs = Vec::with_capacity(handles.len());
        for joined in join_all(handles).await {
            match joined {
                Ok(Ok(output)) => outputs.push(output),
                Ok(Err(e)) => return reply.error(&e),
                Err(e) => {
                    error!(error = %e, "Shard worker task failed");
                    return reply.error(&GatewayError::Internal(e.to_string()));
                }
            }
        }

        match merge(plan.kind, outputs) {
            Ok(ShardOutput::Affected(rows)) => reply.ok(&OkPacket::with_affected_rows(rows)),
            Ok(ShardOutput::Rows { columns, rows }) => {
                result_set(reply, u16::from(session.charset()), &columns, &rows)
            }
            Err(e) => reply.error(&e),
        }
    }
}

/// Run one target to completion on its own worker.
async fn run_target(
    session: Arc<Session>,
    target: ShardTarget,
    kind: StatementKind,
    metrics: Arc<GatewayMetrics>,
) -> Result<ShardOutput> {
    let mut worker = ShardWorker::new(session, target.shard, target.sql, target.params);
    debug!("{}", worker.explain());

    let result = match kind {
        StatementKind::Update => worker.execute_update().await.map(ShardOutput::Affected),
        StatementKind::Query => fetch_all(&mut worker).await,
    };
    worker.close().await;

    metrics.teardown_failures(worker.teardown_failures().len() as u64);
    match &result {
        Ok(_) => metrics.statement_executed(),
        Err(e) => {
            metrics.statement_failed();
            debug!(shard = %worker.shard(), error = %e, "Shard statement failed");
        }
    }
    result
}

async fn fetch_all(worker: &mut ShardWorker) -> Result<ShardOutput> {
    worker.execute_query().await?;
    let columns = worker.columns().to_vec();
    let mut rows = Vec::new();
    while let Some(row) = worker.fetch_row().await? {
        rows.push(row);
    }
    Ok(ShardOutput::Rows { columns, rows })
}

/// Combine per-shard outputs in target order.
fn merge(kind: StatementKind, outputs: Vec<ShardOutput>) -> Result<ShardOutput> {
    match kind {
        StatementKind::Update => {
            let total = outputs
                .iter()
                .map(|o| match o {
                    ShardOutput::Affected(n) => *n,
                    ShardOutput::Rows { .. } => 0,
                })
                .sum();
            Ok(ShardOutput::Affected(total))
        }
        StatementKind::Query => {
            let mut merged_columns: Option<Vec<String>> = None;
            let mut merged_rows = Vec::new();
            for output in outputs {
                let ShardOutput::Rows { columns, rows } = output else {
                    continue;
                };
                match &merged_columns {
                    None => merged_columns = Some(columns),
                    Some(first) if first.len() != columns.len() => {
                        return Err(GatewayError::Internal(format!(
                            "shards returned {} and {} columns",
                            first.len(),
                            columns.len()
                        )));
                    }
                    Some(_) => {}
                }
                merged_rows.extend(rows);
            }
            Ok(ShardOutput::Rows {
                columns: merged_columns.unwrap_or_default(),
                rows: merged_rows,
            })
        }
    }
}

/// Text result set: column count, definitions, EOF, rows, EOF.
fn result_set(mut reply: Reply, charset: u16, columns: &[String], rows: &[Vec<Value>]) -> DispatchOutcome {
    let mut count = Vec::with_capacity(9);
    write_length_encoded_int(&mut count, columns.len() as u64);
    reply.push(count);
    for name in columns {
        reply.push(build_column_definition(&ColumnDefinition41::text(name.as_str(), charset)));
    }
    reply.push(build_eof_packet(SERVER_STATUS_AUTOCOMMIT));
    for row in rows {
        let cells: Vec<Option<Vec<u8>>> = row.iter().map(Value::to_text).collect();
        reply.push(build_text_row(&cells));
    }
    reply.push(build_eof_packet(SERVER_STATUS_AUTOCOMMIT));
    DispatchOutcome::Reply(reply.packets)
}

/// Recognize `KILL [QUERY | CONNECTION] <id>`.
fn parse_kill(sql: &str) -> Option<(KillScope, u32)> {
    let mut words = sql.split_whitespace();
    if !words.next()?.eq_ignore_ascii_case("KILL") {
        return None;
    }
    let mut next = words.next()?;
    let scope = if next.eq_ignore_ascii_case("QUERY") {
        next = words.next()?;
        KillScope::Query
    } else if next.eq_ignore_ascii_case("CONNECTION") {
        next = words.next()?;
        KillScope::Connection
    } else {
        KillScope::Connection
    };
    let id = next.parse().ok()?;
    if words.next().is_some() {
        return None;
    }
    Some((scope, id))
}
