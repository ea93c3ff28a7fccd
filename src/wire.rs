use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::stream;
use futures::Sink;
use pgwire::api::auth::StartupHandler;
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo,
    QueryResponse, Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::data::DataRow;
use pgwire::messages::PgWireBackendMessage;
use tokio::net::TcpStream;

use crate::engine::Engine;
use crate::model::*;
use crate::observability::{self, command_label};
use crate::sql::{self, Command};
use crate::tenant::TenantManager;
use crate::time::format_timestamp;

pub struct ParkingHandler {
    tenant_manager: Arc<TenantManager>,
    query_parser: Arc<ParkingQueryParser>,
}

impl ParkingHandler {
    pub fn new(tenant_manager: Arc<TenantManager>) -> Self {
        Self {
            tenant_manager,
            query_parser: Arc::new(ParkingQueryParser),
        }
    }

    async fn resolve_engine<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Engine>> {
        let db = client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        self.tenant_manager.get_or_create(&db).await.map_err(|e| {
            PgWireError::UserError(Box::new(ErrorInfo::new(
                "ERROR".into(),
                "08006".into(),
                format!("tenant error: {e}"),
            )))
        })
    }

    /// Run one command and record its count and latency.
    async fn run_command(&self, engine: &Engine, cmd: Command) -> PgWireResult<Vec<Response>> {
        let label = command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(engine, cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn execute_command(&self, engine: &Engine, cmd: Command) -> PgWireResult<Vec<Response>> {
        match cmd {
            Command::InsertLot { name, spots } => {
                engine.create_lot(&name, spots).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::InsertReservation {
                lot,
                spot,
                person,
                start,
                end,
            } => {
                engine
                    .book(&lot, spot, Interval::new(start, end), person)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::CheckIn { lot, spot, person } => {
                let parked = engine.check_in(&lot, spot, person).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(
                    Tag::new("INSERT").with_rows(usize::from(parked)),
                )])
            }
            Command::CheckOut { lot, spot, person } => {
                let left = engine.check_out(&lot, spot, person).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(
                    Tag::new("INSERT").with_rows(usize::from(left)),
                )])
            }
            Command::SelectLots => {
                let schema = Arc::new(lots_schema());
                let rows = engine
                    .list_lots()
                    .await
                    .into_iter()
                    .map(|lot| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&lot.name)?;
                        encoder.encode_field(&int8(lot.spots)?)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![query_response(schema, rows)])
            }
            Command::SelectAvailability { lot, start, end } => {
                let spots = engine
                    .find_available(&lot, &Interval::new(start, end))
                    .await
                    .map_err(engine_err)?;
                let schema = Arc::new(availability_schema());
                let rows = spots
                    .into_iter()
                    .map(|spot| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&lot)?;
                        encoder.encode_field(&int8(spot)?)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![query_response(schema, rows)])
            }
            Command::SelectSpots { lot } => {
                let statuses = engine.spot_statuses(&lot).await.map_err(engine_err)?;
                let schema = Arc::new(spots_schema());
                let rows = statuses
                    .into_iter()
                    .map(|info| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&int8(info.spot)?)?;
                        encoder.encode_field(&info.state.as_str())?;
                        encoder.encode_field(&info.occupant.map(int8).transpose()?)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![query_response(schema, rows)])
            }
            Command::SelectReservations { lot, spot } => {
                let queue = engine.reservations(&lot, spot).await.map_err(engine_err)?;
                let schema = Arc::new(reservations_schema());
                let rows = queue
                    .into_iter()
                    .map(|r| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&r.id.to_string())?;
                        encoder.encode_field(&int8(r.spot)?)?;
                        encoder.encode_field(&int8(r.person)?)?;
                        encoder.encode_field(&format_timestamp(&r.start))?;
                        encoder.encode_field(&format_timestamp(&r.end))?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![query_response(schema, rows)])
            }
            Command::SelectHistory { person } => {
                let history = engine
                    .ledger_entry(person)
                    .await
                    .map(|entry| entry.history)
                    .unwrap_or_default();
                let schema = Arc::new(history_schema());
                let rows = history
                    .into_iter()
                    .map(|record| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&int8(person)?)?;
                        encoder.encode_field(&record.lot)?;
                        encoder.encode_field(&int8(record.spot)?)?;
                        encoder.encode_field(&format_timestamp(&record.interval.start))?;
                        encoder.encode_field(&format_timestamp(&record.interval.end))?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![query_response(schema, rows)])
            }
            Command::SelectFines { person } => {
                let fines = engine
                    .ledger_entry(person)
                    .await
                    .map(|entry| entry.fines.as_slice().to_vec())
                    .unwrap_or_default();
                let schema = Arc::new(fines_schema());
                let rows = fines
                    .into_iter()
                    .map(|fine| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&int8(person)?)?;
                        encoder.encode_field(&fine.info.lot)?;
                        encoder.encode_field(&int8(fine.info.spot)?)?;
                        encoder.encode_field(&format_timestamp(&fine.info.interval.start))?;
                        encoder.encode_field(&format_timestamp(&fine.info.interval.end))?;
                        encoder.encode_field(&fine.notice)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![query_response(schema, rows)])
            }
        }
    }
}

fn query_response(schema: Arc<Vec<FieldInfo>>, rows: Vec<PgWireResult<DataRow>>) -> Response {
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

// ── Result schemas ───────────────────────────────────────────────

fn field(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

fn lots_schema() -> Vec<FieldInfo> {
    vec![field("name", Type::VARCHAR), field("spots", Type::INT8)]
}

fn availability_schema() -> Vec<FieldInfo> {
    vec![field("lot", Type::VARCHAR), field("spot", Type::INT8)]
}

fn spots_schema() -> Vec<FieldInfo> {
    vec![
        field("spot", Type::INT8),
        field("state", Type::VARCHAR),
        field("occupant", Type::INT8),
    ]
}

fn reservations_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("spot", Type::INT8),
        field("person", Type::INT8),
        field("start", Type::VARCHAR),
        field("end", Type::VARCHAR),
    ]
}

fn history_schema() -> Vec<FieldInfo> {
    vec![
        field("person", Type::INT8),
        field("lot", Type::VARCHAR),
        field("spot", Type::INT8),
        field("start", Type::VARCHAR),
        field("end", Type::VARCHAR),
    ]
}

fn fines_schema() -> Vec<FieldInfo> {
    let mut schema = history_schema();
    schema.push(field("notice", Type::VARCHAR));
    schema
}

/// Result columns for a statement, picked from the table after `FROM`.
/// Anything that is not a SELECT has no result columns.
fn result_schema(stmt: &str) -> Vec<FieldInfo> {
    let upper = stmt.to_uppercase();
    let mut tokens = upper.split_whitespace();
    if tokens.next() != Some("SELECT") {
        return vec![];
    }
    let table = tokens
        .skip_while(|t| *t != "FROM")
        .nth(1)
        .map(|t| t.trim_matches(|c| c == '"' || c == ';'));
    match table {
        Some("LOTS") => lots_schema(),
        Some("AVAILABILITY") => availability_schema(),
        Some("SPOTS") => spots_schema(),
        Some("RESERVATIONS") => reservations_schema(),
        Some("HISTORY") => history_schema(),
        Some("FINES") => fines_schema(),
        _ => vec![],
    }
}

#[async_trait]
impl SimpleQueryHandler for ParkingHandler {
    async fn do_query<C>(&self, client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client).await?;
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        self.run_command(&engine, cmd).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct ParkingQueryParser;

#[async_trait]
impl QueryParser for ParkingQueryParser {
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
impl ExtendedQueryHandler for ParkingHandler {
    type Statement = String;
    type QueryParser = ParkingQueryParser;

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
        let engine = self.resolve_engine(client).await?;
        let sql = substitute_params(portal);
        let cmd = sql::parse_sql(&sql).map_err(sql_err)?;
        let mut responses = self.run_command(&engine, cmd).await?;
        Ok(responses.remove(0))
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
        Ok(DescribeStatementResponse::new(
            param_types,
            result_schema(&target.statement),
        ))
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
        Ok(DescribePortalResponse::new(result_schema(
            &target.statement.statement,
        )))
    }
}

/// Count the highest $N parameter placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    let mut max = 0usize;
    let bytes = sql.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' {
            i += 1;
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            if i > start
                && let Ok(n) = sql[start..i].parse::<usize>()
            {
                max = max.max(n);
            }
        } else {
            i += 1;
        }
    }
    max
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
fn substitute_params(portal: &Portal<String>) -> String {
    let mut result = portal.statement.statement.to_string();

    // Highest index first so "$1" never clobbers the prefix of "$10".
    for (i, param) in portal.parameters.iter().enumerate().rev() {
        let placeholder = format!("${}", i + 1);
        let value = match param {
            Some(bytes) => {
                let text = String::from_utf8_lossy(bytes);
                format!("'{}'", text.replace('\'', "''"))
            }
            None => "NULL".to_string(),
        };
        result = result.replace(&placeholder, &value);
    }

    result
}

// ── Factory ──────────────────────────────────────────────────────

pub struct ParkingFactory {
    handler: Arc<ParkingHandler>,
    noop: Arc<NoopHandler>,
}

impl ParkingFactory {
    pub fn new(tenant_manager: Arc<TenantManager>) -> Self {
        Self {
            handler: Arc::new(ParkingHandler::new(tenant_manager)),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for ParkingFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.noop.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

/// Serve one client connection until it closes.
pub async fn process_connection(socket: TcpStream, tenant_manager: Arc<TenantManager>) -> std::io::Result<()> {
    let factory = Arc::new(ParkingFactory::new(tenant_manager));
    pgwire::tokio::process_socket(socket, None, factory).await
}

fn engine_err(e: crate::engine::EngineError) -> PgWireError {
    use crate::engine::EngineError::*;
    let code = match &e {
        LotNotFound(_) => "42P01",
        LotExists(_) => "23505",
        SpotOutOfRange { .. } | InvalidInterval(_) => "22023",
        Conflict { .. } => "23P01",
        LimitExceeded(_) => "54000",
        StoreError(_) => "58030",
    };
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
        e.to_string(),
    )))
}

/// Numbers go out as INT8; one that does not fit is an error, never a wrapped value.
fn int8<T>(v: T) -> PgWireResult<i64>
where
    T: TryInto<i64> + Copy + std::fmt::Display,
{
    v.try_into().map_err(|_| {
        PgWireError::UserError(Box::new(ErrorInfo::new(
            "ERROR".into(),
            "22003".into(),
            format!("{v} is out of range for INT8"),
        )))
    })
}

fn sql_err(e: crate::sql::SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}
