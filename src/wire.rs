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
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo,
    QueryResponse, Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use tokio::net::TcpStream;

use crate::auth::LodgeAuthSource;
use crate::engine::{Engine, EngineError};
use crate::model::*;
use crate::observability::{QUERIES_TOTAL, QUERY_DURATION_SECONDS, command_label};
use crate::sql::{self, Command, RowShape, SqlError};

pub struct LodgeHandler {
    engine: Arc<Engine>,
    query_parser: Arc<LodgeQueryParser>,
}

impl LodgeHandler {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            query_parser: Arc::new(LodgeQueryParser),
        }
    }

    /// Parse and run one statement, recording its metrics.
    async fn run(&self, sql: &str) -> PgWireResult<Response> {
        let cmd = sql::parse_sql(sql).map_err(sql_err)?;
        let label = command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        metrics::histogram!(QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn execute_command(&self, cmd: Command) -> PgWireResult<Response> {
        let engine = &self.engine;
        let shape = cmd.row_shape();
        match cmd {
            Command::InsertCabin { id, name, capacity } => {
                engine
                    .create_cabin(id, name, capacity)
                    .await
                    .map_err(engine_err)?;
                Ok(inserted(1))
            }
            Command::DeleteCabin { id } => {
                engine.delete_cabin(id).await.map_err(engine_err)?;
                Ok(deleted(1))
            }
            Command::InsertGuest {
                id,
                name,
                document,
                phone,
            } => {
                engine
                    .create_guest(id, name, document, phone)
                    .await
                    .map_err(engine_err)?;
                Ok(inserted(1))
            }
            Command::DeleteGuest { id } => {
                engine.delete_guest(id).await.map_err(engine_err)?;
                Ok(deleted(1))
            }
            Command::InsertReservation {
                id,
                guest_id,
                cabin_id,
                check_in,
                check_out,
                ..
            } => {
                let id = match id {
                    Some(id) => {
                        engine
                            .admit_reservation(id, guest_id, cabin_id, check_in, check_out)
                            .await
                            .map_err(engine_err)?;
                        id
                    }
                    None => engine
                        .try_reserve(guest_id, cabin_id, check_in, check_out)
                        .await
                        .map_err(engine_err)?,
                };
                // RETURNING id
                let Some(shape) = shape else {
                    return Ok(inserted(1));
                };
                rows(shape, vec![id], |enc, id| {
                    enc.encode_field(&id.to_string())
                })
            }
            Command::DeleteReservation { id } => {
                // Cascaded payments are not counted; one reservation row went.
                engine.delete_reservation(id).await.map_err(engine_err)?;
                Ok(deleted(1))
            }
            Command::InsertPayment {
                id,
                reservation_id,
                amount,
                method,
                recorded_on,
            } => {
                engine
                    .record_payment(id, reservation_id, amount, method, recorded_on)
                    .await
                    .map_err(engine_err)?;
                Ok(inserted(1))
            }
            Command::SelectCabins { id } => {
                let cabins = match id {
                    Some(id) => found(engine.cabin(id).await)?,
                    None => engine.list_cabins().await,
                };
                rows(RowShape::Cabins, cabins, encode_cabin)
            }
            Command::SelectGuests { id } => {
                let guests = match id {
                    Some(id) => found(engine.guest(id).await)?,
                    None => engine.list_guests().await,
                };
                rows(RowShape::Guests, guests, encode_guest)
            }
            Command::SelectReservations { id, cabin_id } => {
                let mut list = engine.list_reservations(cabin_id).await;
                if let Some(id) = id {
                    list.retain(|r| r.id == id);
                }
                rows(RowShape::Reservations, list, encode_reservation)
            }
            Command::SelectPayments { id, reservation_id } => {
                let payments = match id {
                    Some(id) => found(engine.payment(id))?
                        .into_iter()
                        .filter(|p| reservation_id.is_none_or(|r| r == p.reservation_id))
                        .collect(),
                    None => engine.list_payments(reservation_id),
                };
                rows(RowShape::Payments, payments, encode_payment)
            }
            Command::SelectAvailability {
                cabin_id,
                start,
                end,
            } => {
                let grids = match cabin_id {
                    Some(cabin_id) => {
                        let days = engine
                            .compute_availability(cabin_id, start, end)
                            .await
                            .map_err(engine_err)?;
                        let name = engine.cabin(cabin_id).await.map(|c| c.name).ok();
                        vec![(cabin_id, name, days)]
                    }
                    None => engine
                        .compute_availability_all(start, end)
                        .await
                        .map_err(engine_err)?
                        .into_iter()
                        .map(|a| (a.cabin.id, Some(a.cabin.name), a.days))
                        .collect(),
                };
                let cells: Vec<(String, Option<String>, DayStatus)> = grids
                    .into_iter()
                    .flat_map(|(id, name, days)| {
                        let id = id.to_string();
                        days.into_iter()
                            .map(move |day| (id.clone(), name.clone(), day))
                    })
                    .collect();
                rows(RowShape::Availability, cells, |enc, (id, name, day)| {
                    enc.encode_field(&id)?;
                    enc.encode_field(&name)?;
                    enc.encode_field(&day.date.to_string())?;
                    enc.encode_field(&day.occupancy.as_str().to_string())
                })
            }
            Command::SelectStayCheck {
                cabin_id,
                check_in,
                check_out,
            } => {
                let free = engine
                    .is_stay_free(cabin_id, check_in, check_out)
                    .await
                    .map_err(engine_err)?;
                let status = if free { Occupancy::Free } else { Occupancy::Occupied };
                let nights = (check_out - check_in).num_days();
                rows(RowShape::StayCheck, vec![status], |enc, status| {
                    enc.encode_field(&cabin_id.to_string())?;
                    enc.encode_field(&check_in.to_string())?;
                    enc.encode_field(&check_out.to_string())?;
                    enc.encode_field(&nights)?;
                    enc.encode_field(&status.as_str().to_string())
                })
            }
            Command::SelectRevenue { month, year } => {
                let report = engine.monthly_revenue(month, year).map_err(engine_err)?;
                rows(RowShape::Payments, report.payments, encode_payment)
            }
            Command::SelectRevenueTotal { month, year } => {
                let report = engine.monthly_revenue(month, year).map_err(engine_err)?;
                rows(RowShape::RevenueTotal, vec![report], |enc, r| {
                    enc.encode_field(&i64::from(r.month))?;
                    enc.encode_field(&i64::from(r.year))?;
                    enc.encode_field(&(r.payments.len() as i64))?;
                    enc.encode_field(&format_cents(r.total))
                })
            }
        }
    }
}

fn inserted(n: usize) -> Response {
    Response::Execution(Tag::new("INSERT").with_rows(n))
}

fn deleted(n: usize) -> Response {
    Response::Execution(Tag::new("DELETE").with_rows(n))
}

/// A point lookup as zero or one rows.
fn found<T>(result: Result<T, EngineError>) -> PgWireResult<Vec<T>> {
    match result {
        Ok(item) => Ok(vec![item]),
        Err(EngineError::NotFound(_)) => Ok(Vec::new()),
        Err(e) => Err(engine_err(e)),
    }
}

fn rows<T>(
    shape: RowShape,
    items: Vec<T>,
    encode: impl Fn(&mut DataRowEncoder, T) -> PgWireResult<()>,
) -> PgWireResult<Response> {
    let schema = Arc::new(schema(shape));
    let encoded: Vec<PgWireResult<_>> = items
        .into_iter()
        .map(|item| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encode(&mut encoder, item)?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(
        schema,
        stream::iter(encoded),
    )))
}

fn encode_cabin(enc: &mut DataRowEncoder, c: CabinInfo) -> PgWireResult<()> {
    enc.encode_field(&c.id.to_string())?;
    enc.encode_field(&c.name)?;
    enc.encode_field(&i64::from(c.capacity))
}

fn encode_guest(enc: &mut DataRowEncoder, g: GuestInfo) -> PgWireResult<()> {
    enc.encode_field(&g.id.to_string())?;
    enc.encode_field(&g.name)?;
    enc.encode_field(&g.document)?;
    enc.encode_field(&g.phone)
}

fn encode_reservation(enc: &mut DataRowEncoder, r: ReservationView) -> PgWireResult<()> {
    enc.encode_field(&r.id.to_string())?;
    enc.encode_field(&r.guest_id.to_string())?;
    enc.encode_field(&r.guest_name)?;
    enc.encode_field(&r.cabin_id.to_string())?;
    enc.encode_field(&r.cabin_name)?;
    enc.encode_field(&r.stay.check_in.to_string())?;
    enc.encode_field(&r.stay.check_out.to_string())?;
    enc.encode_field(&r.stay.nights())
}

fn encode_payment(enc: &mut DataRowEncoder, p: Payment) -> PgWireResult<()> {
    enc.encode_field(&p.id.to_string())?;
    enc.encode_field(&p.reservation_id.to_string())?;
    enc.encode_field(&format_cents(p.amount))?;
    enc.encode_field(&p.method.as_str().to_string())?;
    enc.encode_field(&p.recorded_on.to_string())
}

fn text(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text)
}

fn int8(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::INT8, FieldFormat::Text)
}

/// Result columns per row shape. Dates are ISO-8601 text and amounts are
/// decimal text such as `150.50`.
fn schema(shape: RowShape) -> Vec<FieldInfo> {
    match shape {
        RowShape::Cabins => vec![text("id"), text("name"), int8("capacity")],
        RowShape::Guests => vec![text("id"), text("name"), text("document"), text("phone")],
        RowShape::Reservations => vec![
            text("id"),
            text("guest_id"),
            text("guest_name"),
            text("cabin_id"),
            text("cabin_name"),
            text("check_in"),
            text("check_out"),
            int8("nights"),
        ],
        RowShape::Payments => vec![
            text("id"),
            text("reservation_id"),
            text("amount"),
            text("method"),
            text("recorded_on"),
        ],
        RowShape::Availability => vec![
            text("cabin_id"),
            text("cabin_name"),
            text("date"),
            text("status"),
        ],
        RowShape::StayCheck => vec![
            text("cabin_id"),
            text("check_in"),
            text("check_out"),
            int8("nights"),
            text("status"),
        ],
        RowShape::RevenueTotal => vec![int8("month"), int8("year"), int8("payments"), text("total")],
        RowShape::InsertedId => vec![text("id")],
    }
}

fn statement_schema(sql: &str) -> Vec<FieldInfo> {
    sql::row_shape(sql).map(schema).unwrap_or_default()
}

#[async_trait]
impl SimpleQueryHandler for LodgeHandler {
    async fn do_query<C>(&self, _client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(vec![self.run(query).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct LodgeQueryParser;

#[async_trait]
impl QueryParser for LodgeQueryParser {
    type Statement = String;

    async fn parse_sql<C>(
        &self,
        _client: &C,
        sql: &str,
        _types: &[Option<Type>],
    ) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(
        &self,
        stmt: &String,
        _column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(statement_schema(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for LodgeHandler {
    type Statement = String;
    type QueryParser = LodgeQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        _client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let sql = substitute_params(portal);
        self.run(&sql).await
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
            statement_schema(&target.statement),
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
        Ok(DescribePortalResponse::new(statement_schema(
            &target.statement.statement,
        )))
    }
}

/// Piece of a statement: literal SQL text or a `$N` placeholder.
#[derive(Debug, PartialEq)]
enum Piece<'a> {
    Text(&'a str),
    Param(usize),
}

/// Split a statement at its `$N` placeholders in one left-to-right pass.
/// Quoted strings and identifiers are copied through untouched.
fn split_params(sql: &str) -> Vec<Piece<'_>> {
    let bytes = sql.as_bytes();
    let mut pieces = Vec::new();
    let mut text_start = 0;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            quote @ (b'\'' | b'"') => {
                // A doubled quote closes and reopens, which is the same scan.
                i += 1;
                while i < bytes.len() && bytes[i] != quote {
                    i += 1;
                }
                i += 1;
            }
            b'$' => {
                let digits_start = i + 1;
                let mut j = digits_start;
                while j < bytes.len() && bytes[j].is_ascii_digit() {
                    j += 1;
                }
                if let Ok(n) = sql[digits_start..j].parse::<usize>()
                    && n > 0
                {
                    if text_start < i {
                        pieces.push(Piece::Text(&sql[text_start..i]));
                    }
                    pieces.push(Piece::Param(n));
                    text_start = j;
                }
                i = j.max(i + 1);
            }
            _ => i += 1,
        }
    }
    if text_start < bytes.len() {
        pieces.push(Piece::Text(&sql[text_start..]));
    }
    pieces
}

/// Highest `$N` placeholder number in the statement.
fn count_params(sql: &str) -> usize {
    split_params(sql)
        .into_iter()
        .filter_map(|p| match p {
            Piece::Param(n) => Some(n),
            Piece::Text(_) => None,
        })
        .max()
        .unwrap_or(0)
}

/// Rebuild the statement with each `$N` replaced by its bound value as a
/// quoted literal. Bound text is never rescanned, so a value containing
/// `$1` stays inside its own quotes.
fn bind_params<B: AsRef<[u8]>>(sql: &str, params: &[Option<B>]) -> String {
    let mut out = String::with_capacity(sql.len());
    for piece in split_params(sql) {
        match piece {
            Piece::Text(text) => out.push_str(text),
            Piece::Param(n) => match params.get(n - 1) {
                Some(Some(bytes)) => {
                    out.push('\'');
                    out.push_str(&String::from_utf8_lossy(bytes.as_ref()).replace('\'', "''"));
                    out.push('\'');
                }
                Some(None) => out.push_str("NULL"),
                // Unbound placeholder: leave it for the parser to reject.
                None => {
                    out.push('$');
                    out.push_str(&n.to_string());
                }
            },
        }
    }
    out
}

fn substitute_params(portal: &Portal<String>) -> String {
    bind_params(&portal.statement.statement, &portal.parameters)
}

// ── Factory ──────────────────────────────────────────────────────

pub struct LodgeFactory {
    handler: Arc<LodgeHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<LodgeAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl LodgeFactory {
    pub fn new(engine: Arc<Engine>, user: String, password: String) -> Self {
        Self {
            handler: Arc::new(LodgeHandler::new(engine)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                LodgeAuthSource::new(user, password),
                DefaultServerParameterProvider::default(),
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for LodgeFactory {
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
    engine: Arc<Engine>,
    user: String,
    password: String,
) -> std::io::Result<()> {
    let factory = Arc::new(LodgeFactory::new(engine, user, password));
    pgwire::tokio::process_socket(socket, None, factory).await
}

fn engine_err(e: EngineError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        e.sqlstate().into(),
        e.to_string(),
    )))
}

fn sql_err(e: SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        e.sqlstate().into(),
        e.to_string(),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    #[test]
    fn counts_highest_placeholder() {
        assert_eq!(count_params("SELECT * FROM cabins"), 0);
        assert_eq!(count_params("DELETE FROM cabins WHERE id = $1"), 1);
        assert_eq!(
            count_params("INSERT INTO payments VALUES ($2, $1, $10, $3)"),
            10
        );
        assert_eq!(count_params("SELECT '$' FROM cabins"), 0);
        assert_eq!(count_params("SELECT * FROM guests WHERE name = 'Room $7'"), 0);
        assert_eq!(count_params("SELECT * FROM \"$3\" WHERE id = $2"), 2);
    }

    #[test]
    fn bound_values_are_not_rescanned() {
        let sql = "INSERT INTO guests (id, name, document) VALUES ($1, $2, $3)";
        let bound = bind_params(
            sql,
            &[
                Some("01ARZ3NDEKTSV4RRFFQ69G5FAV".as_bytes()),
                Some("Suite $1 guest".as_bytes()),
                Some("D-$3".as_bytes()),
            ],
        );
        assert_eq!(
            bound,
            "INSERT INTO guests (id, name, document) VALUES \
             ('01ARZ3NDEKTSV4RRFFQ69G5FAV', 'Suite $1 guest', 'D-$3')"
        );
        match sql::parse_sql(&bound).unwrap() {
            Command::InsertGuest { name, document, .. } => {
                assert_eq!(name, "Suite $1 guest");
                assert_eq!(document, "D-$3");
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn binding_quotes_and_nulls() {
        let bound = bind_params(
            "SELECT * FROM guests WHERE name = $1 AND note = '$2' AND phone = $2",
            &[Some("O'Hara".as_bytes()), None],
        );
        assert_eq!(
            bound,
            "SELECT * FROM guests WHERE name = 'O''Hara' AND note = '$2' AND phone = NULL"
        );
        assert_eq!(
            bind_params::<&[u8]>("SELECT $10, $1", &[None]),
            "SELECT $10, NULL"
        );
    }

    #[test]
    fn schemas_follow_statement_shape() {
        assert_eq!(statement_schema("SELECT * FROM cabins").len(), 3);
        assert_eq!(
            statement_schema("SELECT * FROM availability WHERE start >= $1 AND \"end\" <= $2").len(),
            4
        );
        assert_eq!(statement_schema("SELECT * FROM revenue_total WHERE month = 1 AND year = 2024").len(), 4);
        assert!(statement_schema("DELETE FROM guests WHERE id = $1").is_empty());
    }

    #[test]
    fn not_found_lookup_is_empty() {
        let id = Ulid::new();
        assert!(found::<u8>(Err(EngineError::NotFound(id))).unwrap().is_empty());
        assert_eq!(found(Ok(3u8)).unwrap(), vec![3]);
        assert!(found::<u8>(Err(EngineError::Storage("disk".into()))).is_err());
    }
}
