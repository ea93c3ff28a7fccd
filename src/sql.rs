use sqlparser::ast::{self, Expr, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value, ValueWithSpan};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;

use crate::model::{PersonId, SpotId};
use crate::time::{parse_timestamp, Timestamp};

/// Parsed command from SQL input.
///
/// INSERT values follow the column list when one is given, otherwise the
/// table's column order.
#[derive(Debug, PartialEq)]
pub enum Command {
    /// `INSERT INTO lots (name, spots)`
    InsertLot {
        name: String,
        spots: usize,
    },
    /// `INSERT INTO reservations (lot, spot, person, start, "end")`
    InsertReservation {
        lot: String,
        spot: SpotId,
        person: PersonId,
        start: Timestamp,
        end: Timestamp,
    },
    /// `INSERT INTO checkins (lot, spot, person)`
    CheckIn {
        lot: String,
        spot: SpotId,
        person: PersonId,
    },
    /// `INSERT INTO checkouts (lot, spot, person)`
    CheckOut {
        lot: String,
        spot: SpotId,
        person: PersonId,
    },
    SelectLots,
    SelectAvailability {
        lot: String,
        start: Timestamp,
        end: Timestamp,
    },
    SelectSpots {
        lot: String,
    },
    SelectReservations {
        lot: String,
        spot: SpotId,
    },
    SelectHistory {
        person: PersonId,
    },
    SelectFines {
        person: PersonId,
    },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }

    match &stmts[0] {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

const LOT_COLUMNS: [&str; 2] = ["name", "spots"];
const RESERVATION_COLUMNS: [&str; 5] = ["lot", "spot", "person", "start", "end"];
const OCCUPANCY_COLUMNS: [&str; 3] = ["lot", "spot", "person"];

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;

    match table.as_str() {
        "lots" => {
            let values = ordered_values(insert, "lots", &LOT_COLUMNS)?;
            Ok(Command::InsertLot {
                name: parse_string(&values[0])?,
                spots: parse_usize(&values[1])?,
            })
        }
        "reservations" => {
            let values = ordered_values(insert, "reservations", &RESERVATION_COLUMNS)?;
            Ok(Command::InsertReservation {
                lot: parse_string(&values[0])?,
                spot: parse_usize(&values[1])?,
                person: parse_person(&values[2])?,
                start: parse_ts(&values[3])?,
                end: parse_ts(&values[4])?,
            })
        }
        "checkins" | "checkouts" => {
            let name = if table == "checkins" { "checkins" } else { "checkouts" };
            let values = ordered_values(insert, name, &OCCUPANCY_COLUMNS)?;
            let lot = parse_string(&values[0])?;
            let spot = parse_usize(&values[1])?;
            let person = parse_person(&values[2])?;
            if table == "checkins" {
                Ok(Command::CheckIn { lot, spot, person })
            } else {
                Ok(Command::CheckOut { lot, spot, person })
            }
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// The VALUES row rearranged into `expected` order. Without a column list
/// the row is taken positionally.
fn ordered_values(
    insert: &ast::Insert,
    table: &'static str,
    expected: &[&'static str],
) -> Result<Vec<Expr>, SqlError> {
    let values = extract_insert_values(insert)?;
    if values.len() != expected.len() {
        return Err(SqlError::WrongArity(table, expected.len(), values.len()));
    }
    if insert.columns.is_empty() {
        return Ok(values);
    }
    if insert.columns.len() != values.len() {
        return Err(SqlError::Parse(format!(
            "{} columns but {} values",
            insert.columns.len(),
            values.len()
        )));
    }

    let mut slots: Vec<Option<Expr>> = vec![None; expected.len()];
    for (column, value) in insert.columns.iter().zip(values) {
        let name = column.value.to_lowercase();
        let idx = expected
            .iter()
            .position(|c| *c == name)
            .ok_or_else(|| SqlError::UnknownColumn(table, name.clone()))?;
        if slots[idx].replace(value).is_some() {
            return Err(SqlError::Parse(format!("column {name} given twice")));
        }
    }
    // Equal lengths and no duplicates leave every slot filled.
    slots
        .into_iter()
        .zip(expected)
        .map(|(v, c)| v.ok_or(SqlError::MissingColumn(table, c)))
        .collect()
}

/// One `column <op> value` term of a WHERE clause joined with AND.
struct Filter {
    column: String,
    op: ast::BinaryOperator,
    value: Expr,
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;

    let mut filters = Vec::new();
    if let Some(selection) = &select.selection {
        collect_filters(selection, &mut filters);
    }
    let find = |column, op| find_filter(&filters, column, op);
    use ast::BinaryOperator::{Eq, GtEq, LtEq};

    match table.as_str() {
        "lots" => Ok(Command::SelectLots),
        "availability" => Ok(Command::SelectAvailability {
            lot: parse_string(find("lot", Eq)?)?,
            start: parse_ts(find("start", GtEq)?)?,
            end: parse_ts(find("end", LtEq)?)?,
        }),
        "spots" => Ok(Command::SelectSpots {
            lot: parse_string(find("lot", Eq)?)?,
        }),
        "reservations" => Ok(Command::SelectReservations {
            lot: parse_string(find("lot", Eq)?)?,
            spot: parse_usize(find("spot", Eq)?)?,
        }),
        "history" => Ok(Command::SelectHistory {
            person: parse_person(find("person", Eq)?)?,
        }),
        "fines" => Ok(Command::SelectFines {
            person: parse_person(find("person", Eq)?)?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn find_filter<'a>(
    filters: &'a [Filter],
    column: &'static str,
    op: ast::BinaryOperator,
) -> Result<&'a Expr, SqlError> {
    filters
        .iter()
        .find(|f| f.column == column && f.op == op)
        .map(|f| &f.value)
        .ok_or(SqlError::MissingFilter(column))
}

fn collect_filters(expr: &Expr, out: &mut Vec<Filter>) {
    match expr {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::And,
            right,
        } => {
            collect_filters(left, out);
            collect_filters(right, out);
        }
        Expr::BinaryOp { left, op, right } => {
            if let Some(column) = expr_column_name(left) {
                out.push(Filter {
                    column,
                    op: op.clone(),
                    value: (**right).clone(),
                });
            }
        }
        Expr::Nested(inner) => collect_filters(inner, out),
        _ => {}
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

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn extract_insert_values(insert: &ast::Insert) -> Result<Vec<Expr>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => {
            if values.rows.len() != 1 {
                return Err(SqlError::Parse("expected exactly one VALUES row".into()));
            }
            Ok(values.rows[0].clone())
        }
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        _ => None,
    }
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Ok(s.clone()),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

fn parse_u64(expr: &Expr) -> Result<u64, SqlError> {
    match extract_value(expr) {
        Some(Value::Number(s, _)) | Some(Value::SingleQuotedString(s)) => s
            .trim()
            .parse()
            .map_err(|e| SqlError::Parse(format!("bad number {s}: {e}"))),
        Some(value) => Err(SqlError::Parse(format!("expected number, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

/// Person ids travel as INT8, so anything above `i64::MAX` is refused.
fn parse_person(expr: &Expr) -> Result<PersonId, SqlError> {
    let v = parse_u64(expr)?;
    match i64::try_from(v) {
        Ok(_) => Ok(v),
        Err(_) => Err(SqlError::Parse(format!("person id {v} out of range"))),
    }
}

fn parse_usize(expr: &Expr) -> Result<usize, SqlError> {
    let v = parse_u64(expr)?;
    usize::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of range")))
}

fn parse_ts(expr: &Expr) -> Result<Timestamp, SqlError> {
    let s = parse_string(expr)?;
    parse_timestamp(&s).ok_or_else(|| SqlError::Parse(format!("bad timestamp: {s} (expected YYYY-MM-DD HH:MM)")))
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    WrongArity(&'static str, usize, usize),
    MissingFilter(&'static str),
    UnknownColumn(&'static str, String),
    MissingColumn(&'static str, &'static str),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
            SqlError::UnknownColumn(t, col) => write!(f, "{t}: unknown column {col}"),
            SqlError::MissingColumn(t, col) => write!(f, "{t}: missing column {col}"),
        }
    }
}

impl std::error::Error for SqlError {}
