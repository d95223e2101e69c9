use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::Sink;
use futures::stream;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo, QueryResponse,
    Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;
use tracing::debug;
use ulid::Ulid;

use crate::auth::SlotbookAuthSource;
use crate::engine::{Engine, EngineError};
use crate::model::*;
use crate::observability;
use crate::sql::{self, Command, SqlError};
use crate::store::ScheduleStore;
use crate::tenant::TenantManager;

pub struct SlotbookHandler {
    tenant_manager: Arc<TenantManager>,
    query_parser: Arc<SlotbookQueryParser>,
}

impl SlotbookHandler {
    pub fn new(tenant_manager: Arc<TenantManager>) -> Self {
        Self {
            tenant_manager,
            query_parser: Arc::new(SlotbookQueryParser),
        }
    }

    fn resolve_engine<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Engine>> {
        let db = client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        self.tenant_manager.get_or_create(&db).map_err(|e| {
            metrics::counter!(observability::AUTH_FAILURES_TOTAL).increment(1);
            user_error("08006", format!("tenant error: {e}"))
        })
    }

    /// Execute with RED metrics.
    async fn run(&self, engine: &Engine, cmd: Command) -> PgWireResult<Vec<Response>> {
        let label = observability::command_label(&cmd);
        let start = Instant::now();
        let result = self.execute_command(engine, cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(start.elapsed().as_secs_f64());
        result
    }

    async fn execute_command(&self, engine: &Engine, cmd: Command) -> PgWireResult<Vec<Response>> {
        debug!(?cmd, "executing");
        match cmd {
            Command::InsertBusiness { business } => {
                engine.create_business(business).await.map_err(engine_err)?;
                Ok(vec![tag("INSERT", 1)])
            }
            Command::UpdateBusiness { id, patch } => {
                let mut business = engine.business(id).await.map_err(engine_err)?;
                patch.apply(&mut business);
                engine.update_business(business).await.map_err(engine_err)?;
                Ok(vec![tag("UPDATE", 1)])
            }
            Command::DeleteBusiness { id } => {
                engine.delete_business(id).await.map_err(engine_err)?;
                Ok(vec![tag("DELETE", 1)])
            }
            Command::ReplaceWeeklyHours { business_id, hours } => {
                let count = hours.len();
                engine
                    .replace_weekly_hours(business_id, hours)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![tag("INSERT", count)])
            }
            Command::InsertBreak { window } => {
                engine.add_break(window).await.map_err(engine_err)?;
                Ok(vec![tag("INSERT", 1)])
            }
            Command::DeleteBreak { id } => {
                engine.remove_break(id).await.map_err(engine_err)?;
                Ok(vec![tag("DELETE", 1)])
            }
            Command::InsertHoliday { holiday } => {
                engine.add_holiday(holiday).await.map_err(engine_err)?;
                Ok(vec![tag("INSERT", 1)])
            }
            Command::DeleteHoliday { id } => {
                engine.remove_holiday(id).await.map_err(engine_err)?;
                Ok(vec![tag("DELETE", 1)])
            }
            Command::InsertBlockedSlot { blocked } => {
                engine.block_slot(blocked).await.map_err(engine_err)?;
                Ok(vec![tag("INSERT", 1)])
            }
            Command::DeleteBlockedSlot { id } => {
                engine.unblock_slot(id).await.map_err(engine_err)?;
                Ok(vec![tag("DELETE", 1)])
            }
            Command::InsertBooking { request } => {
                engine.submit_booking(request).await.map_err(engine_err)?;
                Ok(vec![tag("INSERT", 1)])
            }
            Command::UpdateBookingStatus { id, status } => {
                engine
                    .update_booking_status(id, status)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![tag("UPDATE", 1)])
            }
            Command::SelectBusinesses => {
                let businesses = engine.list_businesses().await;
                rows(businesses_schema(), businesses, |enc, b| {
                    enc.encode_field(&b.id.to_string())?;
                    enc.encode_field(&b.name)?;
                    enc.encode_field(&b.slot_duration.map(i32::from))?;
                    enc.encode_field(&text(b.open_time))?;
                    enc.encode_field(&text(b.close_time))
                })
            }
            Command::SelectWeeklyHours { business_id } => {
                let hours = engine.get_weekly_hours(business_id).await;
                rows(weekly_hours_schema(), hours, |enc, h| {
                    enc.encode_field(&business_id.to_string())?;
                    enc.encode_field(&i16::from(h.day_of_week))?;
                    enc.encode_field(&h.open_time.to_string())?;
                    enc.encode_field(&h.close_time.to_string())?;
                    enc.encode_field(&h.is_closed)
                })
            }
            Command::SelectBreaks { business_id } => {
                let breaks = engine.get_breaks(business_id).await;
                rows(breaks_schema(), breaks, |enc, b| {
                    enc.encode_field(&b.id.to_string())?;
                    enc.encode_field(&b.business_id.to_string())?;
                    enc.encode_field(&i16::from(b.day_of_week))?;
                    enc.encode_field(&b.start_time.to_string())?;
                    enc.encode_field(&b.end_time.to_string())?;
                    enc.encode_field(&b.label)
                })
            }
            Command::SelectHolidays { business_id } => {
                let holidays = engine.get_holidays(business_id).await;
                rows(holidays_schema(), holidays, |enc, h| {
                    enc.encode_field(&h.id.to_string())?;
                    enc.encode_field(&h.business_id.to_string())?;
                    enc.encode_field(&h.date.to_string())?;
                    enc.encode_field(&h.label)
                })
            }
            Command::SelectBlockedSlots { business_id, date } => {
                let date = date.as_deref().map(parse_date).transpose().map_err(date_err)?;
                let blocked = engine.get_blocked_slots(business_id, date).await;
                rows(blocked_slots_schema(), blocked, |enc, b| {
                    enc.encode_field(&b.id.to_string())?;
                    enc.encode_field(&b.business_id.to_string())?;
                    enc.encode_field(&b.date.to_string())?;
                    enc.encode_field(&b.start_time.to_string())?;
                    enc.encode_field(&b.end_time.to_string())?;
                    enc.encode_field(&b.reason)
                })
            }
            Command::SelectBookings { business_id, date } => {
                let date = date.as_deref().map(parse_date).transpose().map_err(date_err)?;
                let bookings = engine.get_bookings(business_id, date).await;
                rows(bookings_schema(), bookings, encode_booking)
            }
            Command::SelectBooking { id } => {
                let booking = engine.get_booking(id).await.map_err(engine_err)?;
                rows(bookings_schema(), [booking], encode_booking)
            }
            Command::SelectAvailability {
                business_id,
                date,
                employee_id,
            } => {
                let availability = engine
                    .available_slots(business_id, &date, employee_id)
                    .await
                    .map_err(engine_err)?;
                // A closed day is one row carrying the reason and no time.
                let lines: Vec<(Option<String>, Option<&'static str>)> = match availability.closed_reason {
                    Some(reason) => vec![(None, Some(reason.as_str()))],
                    None => availability
                        .slots
                        .iter()
                        .map(|t| (Some(t.to_string()), None))
                        .collect(),
                };
                rows(availability_schema(), lines, |enc, (time, reason)| {
                    enc.encode_field(&time)?;
                    enc.encode_field(&reason.map(str::to_string))
                })
            }
            Command::Listen { channel } => {
                let business_id = channel
                    .strip_prefix("business_")
                    .ok_or_else(|| user_error("42000", format!("invalid channel: {channel} (expected business_{{id}})")))?;
                Ulid::from_string(business_id)
                    .map_err(|e| user_error("42000", format!("bad ULID in channel: {e}")))?;
                Ok(vec![Response::Execution(Tag::new("LISTEN"))])
            }
        }
    }
}

fn tag(command: &str, rows: usize) -> Response {
    Response::Execution(Tag::new(command).with_rows(rows))
}

fn text<T: ToString>(value: Option<T>) -> Option<String> {
    value.map(|v| v.to_string())
}

/// Build a text-format result set, one row per item.
fn rows<T>(
    schema: Vec<FieldInfo>,
    items: impl IntoIterator<Item = T>,
    encode: impl Fn(&mut DataRowEncoder, T) -> PgWireResult<()>,
) -> PgWireResult<Vec<Response>> {
    let schema = Arc::new(schema);
    let rows: Vec<PgWireResult<_>> = items
        .into_iter()
        .map(|item| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encode(&mut encoder, item)?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
}

fn encode_booking(enc: &mut DataRowEncoder, b: Booking) -> PgWireResult<()> {
    enc.encode_field(&b.id.to_string())?;
    enc.encode_field(&b.user_id.to_string())?;
    enc.encode_field(&b.business_id.to_string())?;
    enc.encode_field(&text(b.employee_id))?;
    enc.encode_field(&text(b.service_id))?;
    enc.encode_field(&b.date.to_string())?;
    enc.encode_field(&b.time.to_string())?;
    enc.encode_field(&b.status.as_str())?;
    enc.encode_field(&b.created_at)
}

// ── Result schemas ───────────────────────────────────────────────

fn field(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

fn availability_schema() -> Vec<FieldInfo> {
    vec![field("time", Type::VARCHAR), field("closed_reason", Type::VARCHAR)]
}

fn businesses_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("name", Type::VARCHAR),
        field("slot_duration", Type::INT4),
        field("open_time", Type::VARCHAR),
        field("close_time", Type::VARCHAR),
    ]
}

fn weekly_hours_schema() -> Vec<FieldInfo> {
    vec![
        field("business_id", Type::VARCHAR),
        field("day_of_week", Type::INT2),
        field("open_time", Type::VARCHAR),
        field("close_time", Type::VARCHAR),
        field("is_closed", Type::BOOL),
    ]
}

fn breaks_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("business_id", Type::VARCHAR),
        field("day_of_week", Type::INT2),
        field("start_time", Type::VARCHAR),
        field("end_time", Type::VARCHAR),
        field("label", Type::VARCHAR),
    ]
}

fn holidays_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("business_id", Type::VARCHAR),
        field("date", Type::VARCHAR),
        field("label", Type::VARCHAR),
    ]
}

fn blocked_slots_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("business_id", Type::VARCHAR),
        field("date", Type::VARCHAR),
        field("start_time", Type::VARCHAR),
        field("end_time", Type::VARCHAR),
        field("reason", Type::VARCHAR),
    ]
}

fn bookings_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("user_id", Type::VARCHAR),
        field("business_id", Type::VARCHAR),
        field("employee_id", Type::VARCHAR),
        field("service_id", Type::VARCHAR),
        field("date", Type::VARCHAR),
        field("time", Type::VARCHAR),
        field("status", Type::VARCHAR),
        field("created_at", Type::INT8),
    ]
}

/// Result columns for a statement before it runs; empty for non-SELECTs.
fn result_schema(sql: &str) -> Vec<FieldInfo> {
    let lower = sql.trim_start().to_lowercase();
    if !lower.starts_with("select") {
        return vec![];
    }
    let Some(table) = lower
        .split_once(" from ")
        .and_then(|(_, rest)| rest.split_whitespace().next())
    else {
        return vec![];
    };
    match table.trim_end_matches(';') {
        "availability" => availability_schema(),
        "businesses" => businesses_schema(),
        "weekly_hours" => weekly_hours_schema(),
        "breaks" => breaks_schema(),
        "holidays" => holidays_schema(),
        "blocked_slots" => blocked_slots_schema(),
        "bookings" => bookings_schema(),
        _ => vec![],
    }
}

#[async_trait]
impl SimpleQueryHandler for SlotbookHandler {
    async fn do_query<C>(&self, client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        self.run(&engine, cmd).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct SlotbookQueryParser;

#[async_trait]
impl QueryParser for SlotbookQueryParser {
    type Statement = String;

    async fn parse_sql<C>(&self, _client: &C, sql: &str, _types: &[Option<Type>]) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(&self, stmt: &String, _column_format: Option<&Format>) -> PgWireResult<Vec<FieldInfo>> {
        Ok(result_schema(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for SlotbookHandler {
    type Statement = String;
    type QueryParser = SlotbookQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        let sql = substitute_params(portal);
        let cmd = sql::parse_sql(&sql).map_err(sql_err)?;
        let responses = self.run(&engine, cmd).await?;
        responses
            .into_iter()
            .next()
            .ok_or_else(|| user_error("XX000", "statement produced no response".to_string()))
    }

    async fn do_describe_statement<C>(
        &self,
        _client: &mut C,
        target: &StoredStatement<Self::Statement>,
    ) -> PgWireResult<DescribeStatementResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let param_types = vec![Type::VARCHAR; count_params(&target.statement)];
        Ok(DescribeStatementResponse::new(param_types, result_schema(&target.statement)))
    }

    async fn do_describe_portal<C>(
        &self,
        _client: &mut C,
        target: &Portal<Self::Statement>,
    ) -> PgWireResult<DescribePortalResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(DescribePortalResponse::new(result_schema(&target.statement.statement)))
    }
}

/// Highest `$N` placeholder in the statement.
fn count_params(sql: &str) -> usize {
    let bytes = sql.as_bytes();
    let mut max = 0usize;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'$' {
            i += 1;
            continue;
        }
        i += 1;
        let start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if let Ok(n) = sql[start..i].parse::<usize>() {
            max = max.max(n);
        }
    }
    max
}

/// Inline bound text parameters as quoted literals. Highest index first so
/// `$1` never clobbers the prefix of `$10`.
fn substitute_params(portal: &Portal<String>) -> String {
    let mut result = portal.statement.statement.to_string();
    for (i, param) in portal.parameters.iter().enumerate().rev() {
        let placeholder = format!("${}", i + 1);
        let value = match param {
            Some(bytes) => format!("'{}'", String::from_utf8_lossy(bytes).replace('\'', "''")),
            None => "NULL".to_string(),
        };
        result = result.replace(&placeholder, &value);
    }
    result
}

// ── Factory ──────────────────────────────────────────────────────

pub struct SlotbookFactory {
    handler: Arc<SlotbookHandler>,
    auth_handler: Arc<CleartextPasswordAuthStartupHandler<SlotbookAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl SlotbookFactory {
    pub fn new(tenant_manager: Arc<TenantManager>, password: String) -> Self {
        Self {
            handler: Arc::new(SlotbookHandler::new(tenant_manager)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                SlotbookAuthSource::new(password),
                DefaultServerParameterProvider::default(),
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for SlotbookFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.auth_handler.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

/// Serve one client connection until it closes.
pub async fn process_connection(
    socket: TcpStream,
    tenant_manager: Arc<TenantManager>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> std::io::Result<()> {
    let factory = Arc::new(SlotbookFactory::new(tenant_manager, password));
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Error mapping ────────────────────────────────────────────────

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new("ERROR".into(), code.into(), message)))
}

fn sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::SlotUnavailable { .. } => "23505",
        EngineError::BusinessClosed { .. } => "P0002",
        EngineError::Validation { .. } => "22023",
        EngineError::NotFound(_) => "02000",
        EngineError::Storage(_) => "58030",
        _ => "P0001",
    }
}

/// Client-facing message, led by the stable error code.
fn error_message(e: &EngineError) -> String {
    format!("{}: {e}", e.code())
}

fn engine_err(e: EngineError) -> PgWireError {
    user_error(sqlstate(&e), error_message(&e))
}

fn date_err(e: DateParseError) -> PgWireError {
    engine_err(EngineError::date(e))
}

fn sql_err(e: SqlError) -> PgWireError {
    let code = match e {
        SqlError::InvalidValue { .. } => "22023",
        SqlError::UnknownTable(_) => "42P01",
        _ => "42601",
    };
    user_error(code, e.to_string())
}
