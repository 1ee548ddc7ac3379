use chrono::NaiveDate;
use sqlparser::ast::{
    self, BinaryOperator, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor,
    TableObject, UnaryOperator, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use thiserror::Error;
use ulid::Ulid;

use crate::model::{Cents, PaymentMethod, parse_cents};

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertCabin {
        id: Ulid,
        name: String,
        capacity: u32,
    },
    DeleteCabin {
        id: Ulid,
    },
    InsertGuest {
        id: Ulid,
        name: String,
        document: String,
        phone: Option<String>,
    },
    DeleteGuest {
        id: Ulid,
    },
    /// `id: None` lets the engine pick one; `returning` sends it back.
    InsertReservation {
        id: Option<Ulid>,
        guest_id: Ulid,
        cabin_id: Ulid,
        check_in: NaiveDate,
        check_out: NaiveDate,
        returning: bool,
    },
    DeleteReservation {
        id: Ulid,
    },
    InsertPayment {
        id: Ulid,
        reservation_id: Ulid,
        amount: Cents,
        method: PaymentMethod,
        recorded_on: Option<NaiveDate>,
    },
    SelectCabins {
        id: Option<Ulid>,
    },
    SelectGuests {
        id: Option<Ulid>,
    },
    SelectReservations {
        id: Option<Ulid>,
        cabin_id: Option<Ulid>,
    },
    SelectPayments {
        id: Option<Ulid>,
        reservation_id: Option<Ulid>,
    },
    /// Inclusive window `[start, end]`; all cabins when `cabin_id` is `None`.
    SelectAvailability {
        cabin_id: Option<Ulid>,
        start: NaiveDate,
        end: NaiveDate,
    },
    /// Would the half-open stay `[check_in, check_out)` be admitted now?
    SelectStayCheck {
        cabin_id: Ulid,
        check_in: NaiveDate,
        check_out: NaiveDate,
    },
    SelectRevenue {
        month: u32,
        year: i32,
    },
    SelectRevenueTotal {
        month: u32,
        year: i32,
    },
}

#[derive(Debug, Error)]
pub enum SqlError {
    #[error("parse error: {0}")]
    Parse(String),
    #[error("empty query")]
    Empty,
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("unknown table: {0}")]
    UnknownTable(String),
    #[error("{0}: missing value for column {1}")]
    MissingColumn(&'static str, &'static str),
    #[error("missing filter: {0}")]
    MissingFilter(&'static str),
    #[error("bad value for {column}: {reason}")]
    BadValue { column: String, reason: String },
}

impl SqlError {
    pub fn sqlstate(&self) -> &'static str {
        match self {
            SqlError::UnknownTable(_) => "42P01",
            SqlError::BadValue { .. } => "22P02",
            SqlError::Unsupported(_) => "0A000",
            _ => "42601",
        }
    }
}

fn bad_value(column: &str, reason: impl Into<String>) -> SqlError {
    SqlError::BadValue {
        column: column.to_string(),
        reason: reason.into(),
    }
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let stmts = Parser::parse_sql(&PostgreSqlDialect {}, sql)
        .map_err(|e| SqlError::Parse(e.to_string()))?;
    let Some(stmt) = stmts.first() else {
        return Err(SqlError::Empty);
    };
    if stmts.len() > 1 {
        return Err(SqlError::Unsupported("multiple statements".into()));
    }

    match stmt {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

/// Columns a statement returns rows in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowShape {
    Cabins,
    Guests,
    Reservations,
    Payments,
    Availability,
    StayCheck,
    RevenueTotal,
    /// `INSERT ... RETURNING id`
    InsertedId,
}

impl Command {
    pub fn row_shape(&self) -> Option<RowShape> {
        match self {
            Command::SelectCabins { .. } => Some(RowShape::Cabins),
            Command::SelectGuests { .. } => Some(RowShape::Guests),
            Command::SelectReservations { .. } => Some(RowShape::Reservations),
            Command::SelectPayments { .. } | Command::SelectRevenue { .. } => {
                Some(RowShape::Payments)
            }
            Command::SelectAvailability { .. } => Some(RowShape::Availability),
            Command::SelectStayCheck { .. } => Some(RowShape::StayCheck),
            Command::SelectRevenueTotal { .. } => Some(RowShape::RevenueTotal),
            Command::InsertReservation { returning, .. } => {
                returning.then_some(RowShape::InsertedId)
            }
            _ => None,
        }
    }
}

/// Row shape of a statement that may still hold `$n` placeholders, for
/// describing results before parameters are bound.
pub fn row_shape(sql: &str) -> Option<RowShape> {
    let stmts = Parser::parse_sql(&PostgreSqlDialect {}, sql).ok()?;
    match stmts.first()? {
        Statement::Query(query) => {
            let SetExpr::Select(select) = query.body.as_ref() else {
                return None;
            };
            match table_factor_name(&select.from.first()?.relation).ok()?.as_str() {
                "cabins" => Some(RowShape::Cabins),
                "guests" => Some(RowShape::Guests),
                "reservations" => Some(RowShape::Reservations),
                "payments" | "revenue" => Some(RowShape::Payments),
                "availability" => Some(RowShape::Availability),
                "stay_check" => Some(RowShape::StayCheck),
                "revenue_total" => Some(RowShape::RevenueTotal),
                _ => None,
            }
        }
        Statement::Insert(insert) if insert.returning.is_some() => Some(RowShape::InsertedId),
        _ => None,
    }
}

// ── INSERT ────────────────────────────────────────────────────

const CABIN_COLUMNS: &[&str] = &["id", "name", "capacity"];
const GUEST_COLUMNS: &[&str] = &["id", "name", "document", "phone"];
const RESERVATION_COLUMNS: &[&str] = &["id", "guest_id", "cabin_id", "check_in", "check_out"];
const PAYMENT_COLUMNS: &[&str] = &["id", "reservation_id", "amount", "method", "recorded_on"];

/// One VALUES row keyed by column name. Without an explicit column list the
/// table's columns are taken in declaration order.
struct InsertRow<'a> {
    table: &'static str,
    cells: Vec<(String, &'a Expr)>,
}

impl<'a> InsertRow<'a> {
    fn new(
        table: &'static str,
        known: &[&str],
        columns: &[ast::Ident],
        values: &'a [Expr],
    ) -> Result<Self, SqlError> {
        let names: Vec<String> = if columns.is_empty() {
            known.iter().take(values.len()).map(|c| c.to_string()).collect()
        } else {
            columns.iter().map(|c| c.value.to_lowercase()).collect()
        };
        if names.len() != values.len() {
            return Err(SqlError::Parse(format!(
                "{table}: {} columns but {} values",
                names.len(),
                values.len()
            )));
        }
        if let Some(unknown) = names.iter().find(|n| !known.contains(&n.as_str())) {
            return Err(SqlError::Unsupported(format!("column {unknown} on {table}")));
        }
        Ok(Self {
            table,
            cells: names.into_iter().zip(values.iter()).collect(),
        })
    }

    fn get(&self, column: &str) -> Option<&'a Expr> {
        self.cells
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, expr)| *expr)
    }

    fn require(&self, column: &'static str) -> Result<&'a Expr, SqlError> {
        self.get(column)
            .ok_or(SqlError::MissingColumn(self.table, column))
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let values = single_values_row(insert)?;
    let returning = insert.returning.is_some();
    if returning && table != "reservations" {
        return Err(SqlError::Unsupported(format!("RETURNING on {table}")));
    }

    match table.as_str() {
        "cabins" => {
            let row = InsertRow::new("cabins", CABIN_COLUMNS, &insert.columns, values)?;
            Ok(Command::InsertCabin {
                id: parse_ulid("id", row.require("id")?)?,
                name: parse_text("name", row.require("name")?)?,
                capacity: parse_u32("capacity", row.require("capacity")?)?,
            })
        }
        "guests" => {
            let row = InsertRow::new("guests", GUEST_COLUMNS, &insert.columns, values)?;
            Ok(Command::InsertGuest {
                id: parse_ulid("id", row.require("id")?)?,
                name: parse_text("name", row.require("name")?)?,
                document: parse_text("document", row.require("document")?)?,
                phone: row
                    .get("phone")
                    .map(|e| parse_text_or_null("phone", e))
                    .transpose()?
                    .flatten(),
            })
        }
        "reservations" => {
            let row =
                InsertRow::new("reservations", RESERVATION_COLUMNS, &insert.columns, values)?;
            Ok(Command::InsertReservation {
                id: row
                    .get("id")
                    .map(|e| parse_ulid_or_null("id", e))
                    .transpose()?
                    .flatten(),
                guest_id: parse_ulid("guest_id", row.require("guest_id")?)?,
                cabin_id: parse_ulid("cabin_id", row.require("cabin_id")?)?,
                check_in: parse_date("check_in", row.require("check_in")?)?,
                check_out: parse_date("check_out", row.require("check_out")?)?,
                returning,
            })
        }
        "payments" => {
            let row = InsertRow::new("payments", PAYMENT_COLUMNS, &insert.columns, values)?;
            Ok(Command::InsertPayment {
                id: parse_ulid("id", row.require("id")?)?,
                reservation_id: parse_ulid("reservation_id", row.require("reservation_id")?)?,
                amount: parse_amount("amount", row.require("amount")?)?,
                method: parse_method("method", row.require("method")?)?,
                recorded_on: row
                    .get("recorded_on")
                    .map(|e| parse_date_or_null("recorded_on", e))
                    .transpose()?
                    .flatten(),
            })
        }
        "availability" | "stay_check" | "revenue" | "revenue_total" => {
            Err(SqlError::Unsupported(format!("{table} is read-only")))
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn single_values_row(insert: &ast::Insert) -> Result<&[Expr], SqlError> {
    let source = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    let SetExpr::Values(values) = source.body.as_ref() else {
        return Err(SqlError::Parse("expected VALUES".into()));
    };
    match values.rows.as_slice() {
        [] => Err(SqlError::Parse("empty VALUES".into())),
        [row] => Ok(row.as_slice()),
        _ => Err(SqlError::Unsupported("multi-row INSERT".into())),
    }
}

// ── DELETE ────────────────────────────────────────────────────

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let filters = Filters::collect(delete.selection.as_ref())?;
    filters.only(&["id"])?;
    let id = filters
        .ulid("id", FilterOp::Eq)?
        .ok_or(SqlError::MissingFilter("id"))?;

    match table.as_str() {
        "cabins" => Ok(Command::DeleteCabin { id }),
        "guests" => Ok(Command::DeleteGuest { id }),
        "reservations" => Ok(Command::DeleteReservation { id }),
        "payments" => Err(SqlError::Unsupported(
            "payments are removed with their reservation".into(),
        )),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── SELECT ────────────────────────────────────────────────────

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };
    let Some(from) = select.from.first() else {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    };
    let table = table_factor_name(&from.relation)?;
    let filters = Filters::collect(select.selection.as_ref())?;

    match table.as_str() {
        "cabins" => {
            filters.only(&["id"])?;
            Ok(Command::SelectCabins {
                id: filters.ulid("id", FilterOp::Eq)?,
            })
        }
        "guests" => {
            filters.only(&["id"])?;
            Ok(Command::SelectGuests {
                id: filters.ulid("id", FilterOp::Eq)?,
            })
        }
        "reservations" => {
            filters.only(&["id", "cabin_id"])?;
            Ok(Command::SelectReservations {
                id: filters.ulid("id", FilterOp::Eq)?,
                cabin_id: filters.ulid("cabin_id", FilterOp::Eq)?,
            })
        }
        "payments" => {
            filters.only(&["id", "reservation_id"])?;
            Ok(Command::SelectPayments {
                id: filters.ulid("id", FilterOp::Eq)?,
                reservation_id: filters.ulid("reservation_id", FilterOp::Eq)?,
            })
        }
        "availability" => {
            filters.only(&["cabin_id", "start", "end"])?;
            Ok(Command::SelectAvailability {
                cabin_id: filters.ulid("cabin_id", FilterOp::Eq)?,
                start: filters
                    .date("start", FilterOp::GtEq)?
                    .ok_or(SqlError::MissingFilter("start"))?,
                end: filters
                    .date("end", FilterOp::LtEq)?
                    .ok_or(SqlError::MissingFilter("end"))?,
            })
        }
        "stay_check" => {
            filters.only(&["cabin_id", "check_in", "check_out"])?;
            Ok(Command::SelectStayCheck {
                cabin_id: filters
                    .ulid("cabin_id", FilterOp::Eq)?
                    .ok_or(SqlError::MissingFilter("cabin_id"))?,
                check_in: filters
                    .date("check_in", FilterOp::Eq)?
                    .ok_or(SqlError::MissingFilter("check_in"))?,
                check_out: filters
                    .date("check_out", FilterOp::Eq)?
                    .ok_or(SqlError::MissingFilter("check_out"))?,
            })
        }
        "revenue" | "revenue_total" => {
            filters.only(&["month", "year"])?;
            let month = filters
                .u32_eq("month")?
                .ok_or(SqlError::MissingFilter("month"))?;
            let year = filters
                .i32_eq("year")?
                .ok_or(SqlError::MissingFilter("year"))?;
            if table == "revenue" {
                Ok(Command::SelectRevenue { month, year })
            } else {
                Ok(Command::SelectRevenueTotal { month, year })
            }
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FilterOp {
    Eq,
    GtEq,
    LtEq,
}

/// `column op value` terms of a WHERE clause joined by AND.
struct Filters<'a> {
    terms: Vec<(String, FilterOp, &'a Expr)>,
}

impl<'a> Filters<'a> {
    fn collect(selection: Option<&'a Expr>) -> Result<Self, SqlError> {
        let mut filters = Filters { terms: Vec::new() };
        if let Some(expr) = selection {
            filters.walk(expr)?;
        }
        Ok(filters)
    }

    fn walk(&mut self, expr: &'a Expr) -> Result<(), SqlError> {
        match expr {
            Expr::Nested(inner) => self.walk(inner),
            Expr::BinaryOp {
                left,
                op: BinaryOperator::And,
                right,
            } => {
                self.walk(left)?;
                self.walk(right)
            }
            Expr::BinaryOp { left, op, right } => {
                let op = match op {
                    BinaryOperator::Eq => FilterOp::Eq,
                    BinaryOperator::GtEq => FilterOp::GtEq,
                    BinaryOperator::LtEq => FilterOp::LtEq,
                    other => {
                        return Err(SqlError::Unsupported(format!("operator {other} in WHERE")));
                    }
                };
                let column = expr_column_name(left).ok_or_else(|| {
                    SqlError::Unsupported(format!("WHERE term {left} is not a column"))
                })?;
                self.terms.push((column, op, right));
                Ok(())
            }
            other => Err(SqlError::Unsupported(format!("WHERE clause {other}"))),
        }
    }

    /// Reject filters on any column outside `allowed`.
    fn only(&self, allowed: &[&str]) -> Result<(), SqlError> {
        match self.terms.iter().find(|(c, _, _)| !allowed.contains(&c.as_str())) {
            Some((column, _, _)) => Err(SqlError::Unsupported(format!("filter on {column}"))),
            None => Ok(()),
        }
    }

    fn find(&self, column: &str, op: FilterOp) -> Option<&'a Expr> {
        self.terms
            .iter()
            .find(|(c, o, _)| c == column && *o == op)
            .map(|(_, _, e)| *e)
    }

    fn ulid(&self, column: &str, op: FilterOp) -> Result<Option<Ulid>, SqlError> {
        self.find(column, op).map(|e| parse_ulid(column, e)).transpose()
    }

    fn date(&self, column: &str, op: FilterOp) -> Result<Option<NaiveDate>, SqlError> {
        self.find(column, op).map(|e| parse_date(column, e)).transpose()
    }

    fn u32_eq(&self, column: &str) -> Result<Option<u32>, SqlError> {
        self.find(column, FilterOp::Eq)
            .map(|e| parse_u32(column, e))
            .transpose()
    }

    fn i32_eq(&self, column: &str) -> Result<Option<i32>, SqlError> {
        self.find(column, FilterOp::Eq)
            .map(|e| {
                let text = literal(column, e)?;
                text.parse::<i32>()
                    .map_err(|e| bad_value(column, e.to_string()))
            })
            .transpose()
    }
}

// ── Helpers ───────────────────────────────────────────────────

fn object_name_last(name: &ast::ObjectName) -> Option<String> {
    name.0.last().and_then(|part| match part {
        ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
        _ => None,
    })
}

fn insert_table_name(insert: &ast::Insert) -> Result<String, SqlError> {
    match &insert.table {
        TableObject::TableName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("unsupported table object in INSERT".into())),
    }
}

fn delete_table_name(delete: &ast::Delete) -> Result<String, SqlError> {
    let tables = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    match tables.first() {
        Some(first) => table_factor_name(&first.relation),
        None => Err(SqlError::Parse("DELETE without table".into())),
    }
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

/// Text of a literal, `None` for NULL. Numbers and quoted strings are both
/// accepted so bound parameters (always quoted) parse like inline values.
fn literal_or_null(column: &str, expr: &Expr) -> Result<Option<String>, SqlError> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => match value {
            Value::Null => Ok(None),
            Value::SingleQuotedString(s) | Value::Number(s, _) => Ok(Some(s.clone())),
            other => Err(bad_value(column, format!("unexpected literal {other}"))),
        },
        Expr::UnaryOp {
            op: UnaryOperator::Minus,
            expr,
        } => match literal_or_null(column, expr)? {
            Some(s) => Ok(Some(format!("-{s}"))),
            None => Err(bad_value(column, "cannot negate NULL")),
        },
        Expr::Nested(inner) => literal_or_null(column, inner),
        other => Err(bad_value(column, format!("expected a literal, got {other}"))),
    }
}

fn literal(column: &str, expr: &Expr) -> Result<String, SqlError> {
    literal_or_null(column, expr)?.ok_or_else(|| bad_value(column, "must not be NULL"))
}

fn parse_text(column: &str, expr: &Expr) -> Result<String, SqlError> {
    literal(column, expr)
}

fn parse_text_or_null(column: &str, expr: &Expr) -> Result<Option<String>, SqlError> {
    literal_or_null(column, expr)
}

fn parse_ulid(column: &str, expr: &Expr) -> Result<Ulid, SqlError> {
    let text = literal(column, expr)?;
    Ulid::from_string(&text).map_err(|e| bad_value(column, format!("bad ULID: {e}")))
}

fn parse_ulid_or_null(column: &str, expr: &Expr) -> Result<Option<Ulid>, SqlError> {
    match literal_or_null(column, expr)? {
        None => Ok(None),
        Some(text) => Ulid::from_string(&text)
            .map(Some)
            .map_err(|e| bad_value(column, format!("bad ULID: {e}"))),
    }
}

fn parse_date(column: &str, expr: &Expr) -> Result<NaiveDate, SqlError> {
    let text = literal(column, expr)?;
    NaiveDate::parse_from_str(text.trim(), DATE_FORMAT)
        .map_err(|e| bad_value(column, format!("expected YYYY-MM-DD: {e}")))
}

fn parse_date_or_null(column: &str, expr: &Expr) -> Result<Option<NaiveDate>, SqlError> {
    match literal_or_null(column, expr)? {
        None => Ok(None),
        Some(_) => parse_date(column, expr).map(Some),
    }
}

fn parse_u32(column: &str, expr: &Expr) -> Result<u32, SqlError> {
    let text = literal(column, expr)?;
    text.trim()
        .parse::<u32>()
        .map_err(|e| bad_value(column, e.to_string()))
}

fn parse_amount(column: &str, expr: &Expr) -> Result<Cents, SqlError> {
    let text = literal(column, expr)?;
    parse_cents(&text).ok_or_else(|| bad_value(column, format!("bad amount {text:?}")))
}

fn parse_method(column: &str, expr: &Expr) -> Result<PaymentMethod, SqlError> {
    let text = literal(column, expr)?;
    PaymentMethod::parse(&text).ok_or_else(|| {
        bad_value(
            column,
            format!("unknown payment method {text:?} (cash, card, transfer, other)"),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: &str = "01ARZ3NDEKTSV4RRFFQ69G5FAV";
    const ID2: &str = "01BX5ZZKBKACTAV9WEVGEMMVRZ";

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn ulid(s: &str) -> Ulid {
        Ulid::from_string(s).unwrap()
    }

    #[test]
    fn parse_insert_cabin() {
        let sql = format!("INSERT INTO cabins (id, name, capacity) VALUES ('{ID}', 'Pine', 4)");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::InsertCabin {
                id: ulid(ID),
                name: "Pine".into(),
                capacity: 4,
            }
        );
    }

    #[test]
    fn parse_insert_cabin_without_column_list() {
        let sql = format!("INSERT INTO cabins VALUES ('{ID}', 'Pine', '4')");
        assert!(matches!(
            parse_sql(&sql).unwrap(),
            Command::InsertCabin { capacity: 4, .. }
        ));
    }

    #[test]
    fn parse_insert_cabin_reordered_columns() {
        let sql = format!("INSERT INTO cabins (capacity, id, name) VALUES (2, '{ID}', 'Oak')");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::InsertCabin {
                id: ulid(ID),
                name: "Oak".into(),
                capacity: 2,
            }
        );
    }

    #[test]
    fn parse_insert_cabin_missing_capacity() {
        let sql = format!("INSERT INTO cabins (id, name) VALUES ('{ID}', 'Pine')");
        assert!(matches!(
            parse_sql(&sql),
            Err(SqlError::MissingColumn("cabins", "capacity"))
        ));
    }

    #[test]
    fn parse_insert_guest_with_and_without_phone() {
        let sql = format!(
            "INSERT INTO guests (id, name, document, phone) VALUES ('{ID}', 'Ada', 'X-1', '555-0100')"
        );
        assert!(matches!(
            parse_sql(&sql).unwrap(),
            Command::InsertGuest { phone: Some(ref p), .. } if p == "555-0100"
        ));

        let sql = format!("INSERT INTO guests (id, name, document) VALUES ('{ID}', 'Ada', 'X-1')");
        assert!(matches!(
            parse_sql(&sql).unwrap(),
            Command::InsertGuest { phone: None, .. }
        ));

        let sql =
            format!("INSERT INTO guests (id, name, document, phone) VALUES ('{ID}', 'Ada', 'X-1', NULL)");
        assert!(matches!(
            parse_sql(&sql).unwrap(),
            Command::InsertGuest { phone: None, .. }
        ));
    }

    #[test]
    fn parse_insert_reservation() {
        let sql = format!(
            "INSERT INTO reservations (id, guest_id, cabin_id, check_in, check_out) \
             VALUES ('{ID}', '{ID2}', '{ID}', '2024-07-01', '2024-07-05')"
        );
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::InsertReservation {
                id: Some(ulid(ID)),
                guest_id: ulid(ID2),
                cabin_id: ulid(ID),
                check_in: d("2024-07-01"),
                check_out: d("2024-07-05"),
                returning: false,
            }
        );
    }

    #[test]
    fn parse_insert_reservation_returning() {
        let sql = format!(
            "INSERT INTO reservations (guest_id, cabin_id, check_in, check_out) \
             VALUES ('{ID2}', '{ID}', '2024-07-01', '2024-07-05') RETURNING id"
        );
        let cmd = parse_sql(&sql).unwrap();
        assert!(matches!(cmd, Command::InsertReservation { id: None, returning: true, .. }));
        assert_eq!(cmd.row_shape(), Some(RowShape::InsertedId));

        let sql = format!("INSERT INTO cabins (id, name, capacity) VALUES ('{ID}', 'A', 1) RETURNING id");
        assert!(matches!(parse_sql(&sql), Err(SqlError::Unsupported(_))));
    }

    #[test]
    fn parse_insert_reservation_null_or_missing_id() {
        let sql = format!(
            "INSERT INTO reservations (id, guest_id, cabin_id, check_in, check_out) \
             VALUES (NULL, '{ID2}', '{ID}', '2024-07-01', '2024-07-05')"
        );
        assert!(matches!(
            parse_sql(&sql).unwrap(),
            Command::InsertReservation { id: None, .. }
        ));

        let sql = format!(
            "INSERT INTO reservations (guest_id, cabin_id, check_in, check_out) \
             VALUES ('{ID2}', '{ID}', '2024-07-01', '2024-07-05')"
        );
        assert!(matches!(
            parse_sql(&sql).unwrap(),
            Command::InsertReservation { id: None, .. }
        ));
    }

    #[test]
    fn parse_insert_reservation_bad_date() {
        let sql = format!(
            "INSERT INTO reservations (id, guest_id, cabin_id, check_in, check_out) \
             VALUES ('{ID}', '{ID2}', '{ID}', '2024-02-30', '2024-03-02')"
        );
        assert!(matches!(
            parse_sql(&sql),
            Err(SqlError::BadValue { ref column, .. }) if column == "check_in"
        ));
    }

    #[test]
    fn parse_insert_payment() {
        let sql = format!(
            "INSERT INTO payments (id, reservation_id, amount, method, recorded_on) \
             VALUES ('{ID}', '{ID2}', 150.50, 'card', '2024-07-02')"
        );
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::InsertPayment {
                id: ulid(ID),
                reservation_id: ulid(ID2),
                amount: 15_050,
                method: PaymentMethod::Card,
                recorded_on: Some(d("2024-07-02")),
            }
        );
    }

    #[test]
    fn parse_insert_payment_defaults_date_and_keeps_sign() {
        let sql = format!(
            "INSERT INTO payments (id, reservation_id, amount, method) VALUES ('{ID}', '{ID2}', -5, 'cash')"
        );
        assert!(matches!(
            parse_sql(&sql).unwrap(),
            Command::InsertPayment {
                amount: -500,
                recorded_on: None,
                ..
            }
        ));
    }

    #[test]
    fn parse_insert_payment_unknown_method() {
        let sql = format!(
            "INSERT INTO payments (id, reservation_id, amount, method) VALUES ('{ID}', '{ID2}', 5, 'iou')"
        );
        assert!(matches!(parse_sql(&sql), Err(SqlError::BadValue { .. })));
    }

    #[test]
    fn parse_deletes() {
        for (table, expected) in [
            ("cabins", Command::DeleteCabin { id: ulid(ID) }),
            ("guests", Command::DeleteGuest { id: ulid(ID) }),
            ("reservations", Command::DeleteReservation { id: ulid(ID) }),
        ] {
            let sql = format!("DELETE FROM {table} WHERE id = '{ID}'");
            assert_eq!(parse_sql(&sql).unwrap(), expected);
        }
    }

    #[test]
    fn parse_delete_requires_id() {
        assert!(matches!(
            parse_sql("DELETE FROM cabins"),
            Err(SqlError::MissingFilter("id"))
        ));
        assert!(matches!(
            parse_sql("DELETE FROM cabins WHERE name = 'Pine'"),
            Err(SqlError::Unsupported(_))
        ));
    }

    #[test]
    fn parse_simple_selects() {
        assert_eq!(
            parse_sql("SELECT * FROM cabins").unwrap(),
            Command::SelectCabins { id: None }
        );
        assert_eq!(
            parse_sql("SELECT * FROM guests").unwrap(),
            Command::SelectGuests { id: None }
        );
        assert_eq!(
            parse_sql(&format!("SELECT * FROM guests WHERE id = '{ID}'")).unwrap(),
            Command::SelectGuests { id: Some(ulid(ID)) }
        );
    }

    #[test]
    fn parse_select_reservations_by_cabin() {
        let sql = format!("SELECT * FROM reservations WHERE cabin_id = '{ID}'");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SelectReservations {
                id: None,
                cabin_id: Some(ulid(ID)),
            }
        );
    }

    #[test]
    fn parse_select_payments_by_reservation() {
        let sql = format!("SELECT id, amount FROM payments WHERE reservation_id = '{ID}'");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SelectPayments {
                id: None,
                reservation_id: Some(ulid(ID)),
            }
        );
    }

    #[test]
    fn parse_select_availability() {
        let sql = format!(
            "SELECT * FROM availability WHERE cabin_id = '{ID}' AND start >= '2024-07-01' AND \"end\" <= '2024-07-08'"
        );
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SelectAvailability {
                cabin_id: Some(ulid(ID)),
                start: d("2024-07-01"),
                end: d("2024-07-08"),
            }
        );
    }

    #[test]
    fn parse_select_availability_all_cabins() {
        let sql = "SELECT * FROM availability WHERE start >= '2024-07-01' AND \"end\" <= '2024-07-08'";
        assert!(matches!(
            parse_sql(sql).unwrap(),
            Command::SelectAvailability { cabin_id: None, .. }
        ));
    }

    #[test]
    fn parse_select_availability_requires_window() {
        let sql = format!("SELECT * FROM availability WHERE cabin_id = '{ID}'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::MissingFilter("start"))));
    }

    #[test]
    fn parse_select_stay_check() {
        let sql = format!(
            "SELECT * FROM stay_check WHERE cabin_id = '{ID}' AND check_in = '2024-07-05' AND check_out = '2024-07-08'"
        );
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SelectStayCheck {
                cabin_id: ulid(ID),
                check_in: d("2024-07-05"),
                check_out: d("2024-07-08"),
            }
        );
        let sql = format!("SELECT * FROM stay_check WHERE cabin_id = '{ID}' AND check_in = '2024-07-05'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::MissingFilter("check_out"))));
        assert_eq!(
            row_shape("SELECT * FROM stay_check WHERE cabin_id = $1 AND check_in = $2 AND check_out = $3"),
            Some(RowShape::StayCheck)
        );
    }

    #[test]
    fn parse_select_revenue() {
        assert_eq!(
            parse_sql("SELECT * FROM revenue WHERE month = 7 AND year = 2024").unwrap(),
            Command::SelectRevenue {
                month: 7,
                year: 2024,
            }
        );
        assert_eq!(
            parse_sql("SELECT * FROM revenue_total WHERE (year = '2024') AND month = '7'").unwrap(),
            Command::SelectRevenueTotal {
                month: 7,
                year: 2024,
            }
        );
    }

    #[test]
    fn or_in_where_is_unsupported() {
        let sql = format!("SELECT * FROM reservations WHERE cabin_id = '{ID}' OR cabin_id = '{ID2}'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::Unsupported(_))));
    }

    #[test]
    fn parse_unknown_table_errors() {
        let sql = format!("INSERT INTO foobar (id) VALUES ('{ID}')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::UnknownTable(_))));
        assert!(matches!(
            parse_sql("SELECT * FROM foobar"),
            Err(SqlError::UnknownTable(_))
        ));
    }

    #[test]
    fn multi_row_insert_is_unsupported() {
        let sql = format!(
            "INSERT INTO cabins (id, name, capacity) VALUES ('{ID}', 'A', 1), ('{ID2}', 'B', 1)"
        );
        assert!(matches!(parse_sql(&sql), Err(SqlError::Unsupported(_))));
    }

    #[test]
    fn parse_empty_errors() {
        assert!(matches!(parse_sql(""), Err(SqlError::Empty)));
    }

    #[test]
    fn row_shape_with_placeholders() {
        assert_eq!(
            row_shape("SELECT * FROM availability WHERE start >= $1 AND \"end\" <= $2"),
            Some(RowShape::Availability)
        );
        assert_eq!(row_shape("SELECT * FROM Cabins"), Some(RowShape::Cabins));
        assert_eq!(
            row_shape("SELECT * FROM revenue WHERE month = $1 AND year = $2"),
            Some(RowShape::Payments)
        );
        assert_eq!(
            row_shape("INSERT INTO reservations (guest_id, cabin_id, check_in, check_out) VALUES ($1, $2, $3, $4) RETURNING id"),
            Some(RowShape::InsertedId)
        );
        assert_eq!(row_shape("DELETE FROM cabins WHERE id = $1"), None);
    }

    #[test]
    fn sqlstates() {
        assert_eq!(SqlError::UnknownTable("x".into()).sqlstate(), "42P01");
        assert_eq!(SqlError::Empty.sqlstate(), "42601");
    }
}
