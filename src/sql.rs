use chrono::NaiveDate;
use sqlparser::ast::{
    self, AssignmentTarget, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value,
    ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::limits::MAX_INSERT_ROWS;
use crate::model::*;

/// Column order assumed by INSERTs without an explicit column list.
const BUSINESS_COLUMNS: &[&str] = &["id", "name", "slot_duration", "open_time", "close_time"];
const WEEKLY_HOURS_COLUMNS: &[&str] = &["business_id", "day_of_week", "open_time", "close_time", "is_closed"];
const BREAK_COLUMNS: &[&str] = &["id", "business_id", "day_of_week", "start_time", "end_time", "label"];
const HOLIDAY_COLUMNS: &[&str] = &["id", "business_id", "date", "label"];
const BLOCKED_SLOT_COLUMNS: &[&str] = &["id", "business_id", "date", "start_time", "end_time", "reason"];
const BOOKING_COLUMNS: &[&str] = &["id", "user_id", "business_id", "date", "time", "employee_id", "service_id"];

/// Partial update for `UPDATE businesses`. `None` leaves a field unchanged;
/// `Some(None)` clears it.
#[derive(Debug, Default, PartialEq)]
pub struct BusinessPatch {
    pub name: Option<Option<String>>,
    pub slot_duration: Option<Option<u16>>,
    pub open_time: Option<Option<TimeOfDay>>,
    pub close_time: Option<Option<TimeOfDay>>,
}

impl BusinessPatch {
    pub fn apply(self, business: &mut Business) {
        if let Some(name) = self.name {
            business.name = name;
        }
        if let Some(slot_duration) = self.slot_duration {
            business.slot_duration = slot_duration;
        }
        if let Some(open_time) = self.open_time {
            business.open_time = open_time;
        }
        if let Some(close_time) = self.close_time {
            business.close_time = close_time;
        }
    }
}

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertBusiness {
        business: Business,
    },
    UpdateBusiness {
        id: Ulid,
        patch: BusinessPatch,
    },
    DeleteBusiness {
        id: Ulid,
    },
    ReplaceWeeklyHours {
        business_id: Ulid,
        hours: Vec<WeeklyHours>,
    },
    InsertBreak {
        window: BreakWindow,
    },
    DeleteBreak {
        id: Ulid,
    },
    InsertHoliday {
        holiday: Holiday,
    },
    DeleteHoliday {
        id: Ulid,
    },
    InsertBlockedSlot {
        blocked: BlockedSlot,
    },
    DeleteBlockedSlot {
        id: Ulid,
    },
    /// Date and time stay raw; the booking guard validates them.
    InsertBooking {
        request: BookingRequest,
    },
    UpdateBookingStatus {
        id: Ulid,
        status: BookingStatus,
    },
    SelectBusinesses,
    SelectWeeklyHours {
        business_id: Ulid,
    },
    SelectBreaks {
        business_id: Ulid,
    },
    SelectHolidays {
        business_id: Ulid,
    },
    SelectBlockedSlots {
        business_id: Ulid,
        date: Option<String>,
    },
    SelectBookings {
        business_id: Ulid,
        date: Option<String>,
    },
    SelectBooking {
        id: Ulid,
    },
    SelectAvailability {
        business_id: Ulid,
        date: String,
        employee_id: Option<Ulid>,
    },
    Listen {
        channel: String,
    },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let trimmed = sql.trim();
    if let Some(rest) = trimmed
        .get(..7)
        .filter(|prefix| prefix.eq_ignore_ascii_case("LISTEN "))
        .map(|_| &trimmed[7..])
    {
        let channel = rest.trim().trim_matches(';').trim().to_string();
        return Ok(Command::Listen { channel });
    }

    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }

    match &stmts[0] {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(&table.relation, assignments, selection),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

// ── INSERT ────────────────────────────────────────────────────

/// One VALUES row addressed by column name.
struct Row<'a> {
    table: &'static str,
    columns: &'a [String],
    values: &'a [Expr],
}

impl<'a> Row<'a> {
    /// `None` when the column is absent or NULL.
    fn get(&self, column: &str) -> Option<&'a Expr> {
        let i = self.columns.iter().position(|c| c == column)?;
        self.values.get(i).filter(|e| !is_null(e))
    }

    fn require(&self, column: &'static str) -> Result<&'a Expr, SqlError> {
        self.get(column).ok_or(SqlError::MissingColumn {
            table: self.table,
            column,
        })
    }

    fn id_or_new(&self) -> Result<Ulid, SqlError> {
        self.get("id").map_or_else(|| Ok(Ulid::new()), parse_ulid)
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let (table, defaults): (&'static str, &[&str]) = match table.as_str() {
        "businesses" => ("businesses", BUSINESS_COLUMNS),
        "weekly_hours" => ("weekly_hours", WEEKLY_HOURS_COLUMNS),
        "breaks" => ("breaks", BREAK_COLUMNS),
        "holidays" => ("holidays", HOLIDAY_COLUMNS),
        "blocked_slots" => ("blocked_slots", BLOCKED_SLOT_COLUMNS),
        "bookings" => ("bookings", BOOKING_COLUMNS),
        _ => return Err(SqlError::UnknownTable(table)),
    };

    let columns: Vec<String> = if insert.columns.is_empty() {
        defaults.iter().map(|c| c.to_string()).collect()
    } else {
        insert.columns.iter().map(|c| c.value.to_lowercase()).collect()
    };
    let rows = extract_all_insert_rows(insert)?;
    if rows.len() > MAX_INSERT_ROWS {
        return Err(SqlError::Unsupported(format!(
            "more than {MAX_INSERT_ROWS} rows in one INSERT"
        )));
    }
    for values in &rows {
        if values.len() != columns.len() {
            return Err(SqlError::WrongArity(table, columns.len(), values.len()));
        }
    }
    let row = |i: usize| Row {
        table,
        columns: &columns,
        values: &rows[i],
    };

    if table == "weekly_hours" {
        return parse_weekly_hours(&(0..rows.len()).map(row).collect::<Vec<_>>());
    }
    if rows.len() != 1 {
        return Err(SqlError::Unsupported(format!("multi-row INSERT into {table}")));
    }
    let row = row(0);

    match table {
        "businesses" => Ok(Command::InsertBusiness {
            business: Business {
                id: parse_ulid(row.require("id")?)?,
                name: row.get("name").map(|e| parse_string(e, "name")).transpose()?,
                slot_duration: row
                    .get("slot_duration")
                    .map(|e| parse_u16(e, "slot_duration"))
                    .transpose()?,
                open_time: row.get("open_time").map(|e| parse_time(e, "open_time")).transpose()?,
                close_time: row.get("close_time").map(|e| parse_time(e, "close_time")).transpose()?,
            },
        }),
        "breaks" => Ok(Command::InsertBreak {
            window: BreakWindow {
                id: row.id_or_new()?,
                business_id: parse_ulid(row.require("business_id")?)?,
                day_of_week: parse_u8(row.require("day_of_week")?, "day_of_week")?,
                start_time: parse_time(row.require("start_time")?, "start_time")?,
                end_time: parse_time(row.require("end_time")?, "end_time")?,
                label: row.get("label").map(|e| parse_string(e, "label")).transpose()?,
            },
        }),
        "holidays" => Ok(Command::InsertHoliday {
            holiday: Holiday {
                id: row.id_or_new()?,
                business_id: parse_ulid(row.require("business_id")?)?,
                date: parse_date_value(row.require("date")?, "date")?,
                label: row.get("label").map(|e| parse_string(e, "label")).transpose()?,
            },
        }),
        "blocked_slots" => Ok(Command::InsertBlockedSlot {
            blocked: BlockedSlot {
                id: row.id_or_new()?,
                business_id: parse_ulid(row.require("business_id")?)?,
                date: parse_date_value(row.require("date")?, "date")?,
                start_time: parse_time(row.require("start_time")?, "start_time")?,
                end_time: parse_time(row.require("end_time")?, "end_time")?,
                reason: row.get("reason").map(|e| parse_string(e, "reason")).transpose()?,
            },
        }),
        "bookings" => Ok(Command::InsertBooking {
            request: BookingRequest {
                id: row.id_or_new()?,
                user_id: parse_ulid(row.require("user_id")?)?,
                business_id: parse_ulid(row.require("business_id")?)?,
                date: parse_string(row.require("date")?, "date")?,
                time: parse_string(row.require("time")?, "time")?,
                employee_id: row.get("employee_id").map(parse_ulid).transpose()?,
                service_id: row.get("service_id").map(parse_ulid).transpose()?,
            },
        }),
        _ => Err(SqlError::UnknownTable(table.to_string())),
    }
}

/// Every row must name the same business; the set replaces all weekday rows.
fn parse_weekly_hours(rows: &[Row<'_>]) -> Result<Command, SqlError> {
    let mut business_id = None;
    let mut hours = Vec::with_capacity(rows.len());
    for row in rows {
        let bid = parse_ulid(row.require("business_id")?)?;
        if *business_id.get_or_insert(bid) != bid {
            return Err(SqlError::InvalidValue {
                column: "business_id",
                message: "all weekly_hours rows must belong to one business".into(),
            });
        }
        let is_closed = row.get("is_closed").map(parse_bool).transpose()?.unwrap_or(false);
        let time = |column: &'static str| -> Result<TimeOfDay, SqlError> {
            match row.get(column) {
                Some(e) => parse_time(e, column),
                None if is_closed => Ok(TimeOfDay::MIDNIGHT),
                None => Err(SqlError::MissingColumn {
                    table: "weekly_hours",
                    column,
                }),
            }
        };
        hours.push(WeeklyHours {
            day_of_week: parse_u8(row.require("day_of_week")?, "day_of_week")?,
            open_time: time("open_time")?,
            close_time: time("close_time")?,
            is_closed,
        });
    }
    let business_id = business_id.ok_or(SqlError::Parse("empty VALUES".into()))?;
    Ok(Command::ReplaceWeeklyHours { business_id, hours })
}

// ── UPDATE ────────────────────────────────────────────────────

fn parse_update(
    table: &TableFactor,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(table)?;
    let id = extract_where_id(selection)?;

    let mut sets = Vec::with_capacity(assignments.len());
    for assignment in assignments {
        let column = match &assignment.target {
            AssignmentTarget::ColumnName(name) => {
                object_name_last(name).ok_or_else(|| SqlError::Parse("empty column name".into()))?
            }
            AssignmentTarget::Tuple(_) => return Err(SqlError::Unsupported("tuple assignment".into())),
        };
        sets.push((column, &assignment.value));
    }

    match table.as_str() {
        "businesses" => {
            let mut patch = BusinessPatch::default();
            for (column, value) in sets {
                let value = (!is_null(value)).then_some(value);
                match column.as_str() {
                    "name" => patch.name = Some(value.map(|e| parse_string(e, "name")).transpose()?),
                    "slot_duration" => {
                        patch.slot_duration = Some(value.map(|e| parse_u16(e, "slot_duration")).transpose()?)
                    }
                    "open_time" => patch.open_time = Some(value.map(|e| parse_time(e, "open_time")).transpose()?),
                    "close_time" => {
                        patch.close_time = Some(value.map(|e| parse_time(e, "close_time")).transpose()?)
                    }
                    other => return Err(SqlError::Unsupported(format!("SET {other} on businesses"))),
                }
            }
            Ok(Command::UpdateBusiness { id, patch })
        }
        "bookings" => {
            let [(column, value)] = sets.as_slice() else {
                return Err(SqlError::Unsupported("bookings: only SET status is supported".into()));
            };
            if column != "status" {
                return Err(SqlError::Unsupported(format!("SET {column} on bookings")));
            }
            let status = parse_string(value, "status")?
                .parse::<BookingStatus>()
                .map_err(|message| SqlError::InvalidValue {
                    column: "status",
                    message,
                })?;
            Ok(Command::UpdateBookingStatus { id, status })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── DELETE ────────────────────────────────────────────────────

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let id = extract_where_id(&delete.selection)?;

    match table.as_str() {
        "businesses" => Ok(Command::DeleteBusiness { id }),
        "breaks" => Ok(Command::DeleteBreak { id }),
        "holidays" => Ok(Command::DeleteHoliday { id }),
        "blocked_slots" => Ok(Command::DeleteBlockedSlot { id }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── SELECT ────────────────────────────────────────────────────

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
        collect_eq_filters(selection, &mut filters)?;
    }
    let filter = |column: &str| filters.iter().find(|(c, _)| c == column).map(|(_, e)| *e);
    let business_id = || -> Result<Ulid, SqlError> {
        filter("business_id")
            .ok_or(SqlError::MissingFilter("business_id"))
            .and_then(parse_ulid)
    };
    let date = || filter("date").map(|e| parse_string(e, "date")).transpose();

    match table.as_str() {
        "businesses" => Ok(Command::SelectBusinesses),
        "weekly_hours" => Ok(Command::SelectWeeklyHours {
            business_id: business_id()?,
        }),
        "breaks" => Ok(Command::SelectBreaks {
            business_id: business_id()?,
        }),
        "holidays" => Ok(Command::SelectHolidays {
            business_id: business_id()?,
        }),
        "blocked_slots" => Ok(Command::SelectBlockedSlots {
            business_id: business_id()?,
            date: date()?,
        }),
        "bookings" => match filter("id") {
            Some(id) => Ok(Command::SelectBooking { id: parse_ulid(id)? }),
            None => Ok(Command::SelectBookings {
                business_id: business_id()?,
                date: date()?,
            }),
        },
        "availability" => Ok(Command::SelectAvailability {
            business_id: business_id()?,
            date: date()?.ok_or(SqlError::MissingFilter("date"))?,
            employee_id: filter("employee_id")
                .filter(|e| !is_null(e))
                .map(parse_ulid)
                .transpose()?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// Flatten `a = 1 AND b = 2` into `[(a, 1), (b, 2)]`.
fn collect_eq_filters<'a>(expr: &'a Expr, out: &mut Vec<(String, &'a Expr)>) -> Result<(), SqlError> {
    match expr {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::And,
            right,
        } => {
            collect_eq_filters(left, out)?;
            collect_eq_filters(right, out)
        }
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } => {
            let column = expr_column_name(left).ok_or_else(|| SqlError::Unsupported(format!("filter {expr}")))?;
            out.push((column, right.as_ref()));
            Ok(())
        }
        Expr::Nested(inner) => collect_eq_filters(inner, out),
        other => Err(SqlError::Unsupported(format!("filter {other}"))),
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
    let tables_with_joins = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    if let Some(first) = tables_with_joins.first() {
        table_factor_name(&first.relation)
    } else {
        Err(SqlError::Parse("DELETE without table".into()))
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

fn extract_all_insert_rows(insert: &ast::Insert) -> Result<Vec<Vec<Expr>>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => {
            if values.rows.is_empty() {
                return Err(SqlError::Parse("empty VALUES".into()));
            }
            Ok(values.rows.clone())
        }
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    let sel = selection.as_ref().ok_or(SqlError::MissingFilter("id"))?;
    match sel {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } => {
            if expr_column_name(left).as_deref() == Some("id") {
                parse_ulid(right)
            } else {
                Err(SqlError::MissingFilter("id"))
            }
        }
        _ => Err(SqlError::MissingFilter("id")),
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

fn is_null(expr: &Expr) -> bool {
    matches!(extract_value(expr), Some(Value::Null))
}

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::SingleQuotedString(s) | Value::Number(s, _) => {
                Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
            }
            _ => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_string(expr: &Expr, column: &'static str) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Ok(s.clone()),
        Some(value) => Err(SqlError::InvalidValue {
            column,
            message: format!("expected string, got {value}"),
        }),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

fn parse_time(expr: &Expr, column: &'static str) -> Result<TimeOfDay, SqlError> {
    parse_string(expr, column)?
        .parse::<TimeOfDay>()
        .map_err(|e| SqlError::InvalidValue {
            column,
            message: e.to_string(),
        })
}

fn parse_date_value(expr: &Expr, column: &'static str) -> Result<NaiveDate, SqlError> {
    parse_date(&parse_string(expr, column)?).map_err(|e| SqlError::InvalidValue {
        column,
        message: e.to_string(),
    })
}

fn parse_i64_expr(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad integer: {e}"))),
            Value::SingleQuotedString(s) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad integer: {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value:?}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_i64_expr(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_u8(expr: &Expr, column: &'static str) -> Result<u8, SqlError> {
    let v = parse_i64_expr(expr)?;
    u8::try_from(v).map_err(|_| SqlError::InvalidValue {
        column,
        message: format!("{v} out of range"),
    })
}

fn parse_u16(expr: &Expr, column: &'static str) -> Result<u16, SqlError> {
    let v = parse_i64_expr(expr)?;
    u16::try_from(v).map_err(|_| SqlError::InvalidValue {
        column,
        message: format!("{v} out of range"),
    })
}

fn parse_bool(expr: &Expr) -> Result<bool, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Boolean(b) => Ok(*b),
            Value::SingleQuotedString(s) => match s.to_lowercase().as_str() {
                "true" | "t" | "1" => Ok(true),
                "false" | "f" | "0" => Ok(false),
                _ => Err(SqlError::Parse(format!("bad bool: {s}"))),
            },
            Value::Number(n, _) => Ok(n != "0"),
            _ => Err(SqlError::Parse(format!("expected bool, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum SqlError {
    #[error("parse error: {0}")]
    Parse(String),
    #[error("empty query")]
    Empty,
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("unknown table: {0}")]
    UnknownTable(String),
    #[error("{0}: expected {1} values, got {2}")]
    WrongArity(&'static str, usize, usize),
    #[error("missing filter: {0}")]
    MissingFilter(&'static str),
    #[error("{table}: missing column {column}")]
    MissingColumn { table: &'static str, column: &'static str },
    #[error("invalid {column}: {message}")]
    InvalidValue { column: &'static str, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: &str = "01ARZ3NDEKTSV4RRFFQ69G5FAV";
    const OTHER: &str = "01BX5ZZKBKACTAV9WEVGEMMVRZ";

    fn ulid(s: &str) -> Ulid {
        Ulid::from_string(s).unwrap()
    }

    fn t(s: &str) -> TimeOfDay {
        s.parse().unwrap()
    }

    #[test]
    fn parse_insert_business_minimal() {
        let cmd = parse_sql(&format!("INSERT INTO businesses (id) VALUES ('{ID}')")).unwrap();
        assert_eq!(
            cmd,
            Command::InsertBusiness {
                business: Business::new(ulid(ID))
            }
        );
    }

    #[test]
    fn parse_insert_business_full_positional() {
        let sql = format!("INSERT INTO businesses VALUES ('{ID}', 'Salon', 45, '08:30', '17:00:00')");
        match parse_sql(&sql).unwrap() {
            Command::InsertBusiness { business } => {
                assert_eq!(business.name.as_deref(), Some("Salon"));
                assert_eq!(business.slot_duration, Some(45));
                assert_eq!(business.open_time, Some(t("08:30")));
                assert_eq!(business.close_time, Some(t("17:00")));
            }
            other => panic!("expected InsertBusiness, got {other:?}"),
        }
    }

    #[test]
    fn parse_insert_business_bad_time() {
        let sql = format!("INSERT INTO businesses (id, open_time) VALUES ('{ID}', '9am')");
        assert!(matches!(
            parse_sql(&sql),
            Err(SqlError::InvalidValue { column: "open_time", .. })
        ));
    }

    #[test]
    fn parse_update_business_patch() {
        let sql = format!("UPDATE businesses SET slot_duration = 15, name = NULL WHERE id = '{ID}'");
        match parse_sql(&sql).unwrap() {
            Command::UpdateBusiness { id, patch } => {
                assert_eq!(id, ulid(ID));
                assert_eq!(patch.slot_duration, Some(Some(15)));
                assert_eq!(patch.name, Some(None));
                assert_eq!(patch.open_time, None);

                let mut business = Business {
                    name: Some("Old".into()),
                    open_time: Some(t("10:00")),
                    ..Business::new(id)
                };
                patch.apply(&mut business);
                assert_eq!(business.name, None);
                assert_eq!(business.slot_duration, Some(15));
                assert_eq!(business.open_time, Some(t("10:00")));
            }
            other => panic!("expected UpdateBusiness, got {other:?}"),
        }
    }

    #[test]
    fn parse_delete_business() {
        let cmd = parse_sql(&format!("DELETE FROM businesses WHERE id = '{ID}'")).unwrap();
        assert_eq!(cmd, Command::DeleteBusiness { id: ulid(ID) });
    }

    #[test]
    fn parse_weekly_hours_multi_row() {
        let sql = format!(
            "INSERT INTO weekly_hours (business_id, day_of_week, open_time, close_time, is_closed) VALUES \
             ('{ID}', 1, '09:00', '17:00', false), ('{ID}', 0, NULL, NULL, true)"
        );
        match parse_sql(&sql).unwrap() {
            Command::ReplaceWeeklyHours { business_id, hours } => {
                assert_eq!(business_id, ulid(ID));
                assert_eq!(hours.len(), 2);
                assert_eq!(hours[0].open_time, t("09:00"));
                assert!(!hours[0].is_closed);
                assert!(hours[1].is_closed);
                assert_eq!(hours[1].day_of_week, 0);
            }
            other => panic!("expected ReplaceWeeklyHours, got {other:?}"),
        }
    }

    #[test]
    fn parse_weekly_hours_rejects_mixed_businesses() {
        let sql = format!(
            "INSERT INTO weekly_hours (business_id, day_of_week, open_time, close_time) VALUES \
             ('{ID}', 1, '09:00', '17:00'), ('{OTHER}', 2, '09:00', '17:00')"
        );
        assert!(matches!(
            parse_sql(&sql),
            Err(SqlError::InvalidValue { column: "business_id", .. })
        ));
    }

    #[test]
    fn parse_weekly_hours_open_row_needs_times() {
        let sql = format!("INSERT INTO weekly_hours (business_id, day_of_week) VALUES ('{ID}', 3)");
        assert!(matches!(
            parse_sql(&sql),
            Err(SqlError::MissingColumn { column: "open_time", .. })
        ));
    }

    #[test]
    fn parse_insert_break_generates_id() {
        let sql = format!(
            "INSERT INTO breaks (business_id, day_of_week, start_time, end_time, label) \
             VALUES ('{ID}', 2, '12:00', '13:00', 'Lunch')"
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertBreak { window } => {
                assert_eq!(window.business_id, ulid(ID));
                assert_eq!(window.day_of_week, 2);
                assert_eq!(window.window(), Some(Window::new(t("12:00"), t("13:00"))));
                assert_eq!(window.label.as_deref(), Some("Lunch"));
                assert_ne!(window.id, ulid(ID));
            }
            other => panic!("expected InsertBreak, got {other:?}"),
        }
    }

    #[test]
    fn parse_insert_holiday_and_blocked() {
        let sql = format!("INSERT INTO holidays (id, business_id, date) VALUES ('{OTHER}', '{ID}', '2024-12-25')");
        match parse_sql(&sql).unwrap() {
            Command::InsertHoliday { holiday } => {
                assert_eq!(holiday.id, ulid(OTHER));
                assert_eq!(holiday.date, parse_date("2024-12-25").unwrap());
                assert_eq!(holiday.label, None);
            }
            other => panic!("expected InsertHoliday, got {other:?}"),
        }

        let sql = format!(
            "INSERT INTO blocked_slots (business_id, date, start_time, end_time, reason) \
             VALUES ('{ID}', '2024-06-10', '14:00', '15:30', 'Maintenance')"
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertBlockedSlot { blocked } => {
                assert_eq!(blocked.start_time, t("14:00"));
                assert_eq!(blocked.end_time, t("15:30"));
                assert_eq!(blocked.reason.as_deref(), Some("Maintenance"));
            }
            other => panic!("expected InsertBlockedSlot, got {other:?}"),
        }

        let sql = format!("INSERT INTO holidays (business_id, date) VALUES ('{ID}', '2024-13-01')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::InvalidValue { column: "date", .. })));
    }

    #[test]
    fn parse_deletes() {
        for (table, expected) in [
            ("breaks", Command::DeleteBreak { id: ulid(ID) }),
            ("holidays", Command::DeleteHoliday { id: ulid(ID) }),
            ("blocked_slots", Command::DeleteBlockedSlot { id: ulid(ID) }),
        ] {
            let cmd = parse_sql(&format!("DELETE FROM {table} WHERE id = '{ID}'")).unwrap();
            assert_eq!(cmd, expected);
        }
        // Bookings are cancelled, not deleted.
        assert!(parse_sql(&format!("DELETE FROM bookings WHERE id = '{ID}'")).is_err());
    }

    #[test]
    fn parse_insert_booking_keeps_raw_date_and_time() {
        let sql = format!(
            "INSERT INTO bookings (id, user_id, business_id, date, time, employee_id) \
             VALUES ('{ID}', '{OTHER}', '{ID}', '2024-06-10', '25:00', NULL)"
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertBooking { request } => {
                assert_eq!(request.id, ulid(ID));
                assert_eq!(request.user_id, ulid(OTHER));
                assert_eq!(request.date, "2024-06-10");
                assert_eq!(request.time, "25:00");
                assert_eq!(request.employee_id, None);
                assert_eq!(request.service_id, None);
            }
            other => panic!("expected InsertBooking, got {other:?}"),
        }
    }

    #[test]
    fn parse_insert_booking_multi_row_rejected() {
        let sql = format!(
            "INSERT INTO bookings (user_id, business_id, date, time) VALUES \
             ('{ID}', '{ID}', '2024-06-10', '09:00'), ('{ID}', '{ID}', '2024-06-10', '09:30')"
        );
        assert!(matches!(parse_sql(&sql), Err(SqlError::Unsupported(_))));
    }

    #[test]
    fn parse_insert_wrong_arity() {
        let sql = format!("INSERT INTO bookings (user_id, business_id) VALUES ('{ID}')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::WrongArity("bookings", 2, 1))));
    }

    #[test]
    fn parse_update_booking_status() {
        let sql = format!("UPDATE bookings SET status = 'confirmed' WHERE id = '{ID}'");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::UpdateBookingStatus {
                id: ulid(ID),
                status: BookingStatus::Confirmed
            }
        );

        let sql = format!("UPDATE bookings SET status = 'lost' WHERE id = '{ID}'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::InvalidValue { column: "status", .. })));

        let sql = format!("UPDATE bookings SET time = '10:00' WHERE id = '{ID}'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::Unsupported(_))));
    }

    #[test]
    fn parse_select_availability() {
        let sql = format!("SELECT * FROM availability WHERE business_id = '{ID}' AND date = '2024-06-10'");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SelectAvailability {
                business_id: ulid(ID),
                date: "2024-06-10".into(),
                employee_id: None,
            }
        );

        let sql = format!(
            "SELECT time FROM availability WHERE (business_id = '{ID}' AND date = '2024-06-10') AND employee_id = '{OTHER}'"
        );
        match parse_sql(&sql).unwrap() {
            Command::SelectAvailability { employee_id, .. } => assert_eq!(employee_id, Some(ulid(OTHER))),
            other => panic!("expected SelectAvailability, got {other:?}"),
        }
    }

    #[test]
    fn parse_select_availability_requires_filters() {
        let sql = format!("SELECT * FROM availability WHERE business_id = '{ID}'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::MissingFilter("date"))));
        let sql = "SELECT * FROM availability WHERE date = '2024-06-10'";
        assert!(matches!(parse_sql(sql), Err(SqlError::MissingFilter("business_id"))));
        let sql = format!("SELECT * FROM availability WHERE business_id = '{ID}' OR date = '2024-06-10'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::Unsupported(_))));
    }

    #[test]
    fn parse_select_bookings() {
        let sql = format!("SELECT * FROM bookings WHERE business_id = '{ID}' AND date = '2024-06-10'");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SelectBookings {
                business_id: ulid(ID),
                date: Some("2024-06-10".into()),
            }
        );
        let sql = format!("SELECT * FROM bookings WHERE id = '{OTHER}'");
        assert_eq!(parse_sql(&sql).unwrap(), Command::SelectBooking { id: ulid(OTHER) });
    }

    #[test]
    fn parse_select_schedule_tables() {
        assert_eq!(parse_sql("SELECT * FROM businesses").unwrap(), Command::SelectBusinesses);
        let by_business = format!("WHERE business_id = '{ID}'");
        assert_eq!(
            parse_sql(&format!("SELECT * FROM weekly_hours {by_business}")).unwrap(),
            Command::SelectWeeklyHours { business_id: ulid(ID) }
        );
        assert_eq!(
            parse_sql(&format!("SELECT * FROM breaks {by_business}")).unwrap(),
            Command::SelectBreaks { business_id: ulid(ID) }
        );
        assert_eq!(
            parse_sql(&format!("SELECT * FROM holidays {by_business}")).unwrap(),
            Command::SelectHolidays { business_id: ulid(ID) }
        );
        assert_eq!(
            parse_sql(&format!("SELECT * FROM blocked_slots {by_business}")).unwrap(),
            Command::SelectBlockedSlots {
                business_id: ulid(ID),
                date: None
            }
        );
    }

    #[test]
    fn parse_listen() {
        let sql = format!("LISTEN business_{ID};");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::Listen {
                channel: format!("business_{ID}")
            }
        );
        assert!(matches!(parse_sql("listen x").unwrap(), Command::Listen { .. }));
    }

    #[test]
    fn non_ascii_statements_error_without_panicking() {
        // 'é' straddles the byte offset of the LISTEN prefix.
        assert!(parse_sql("SELECT\u{e9} * FROM businesses").is_err());
        assert!(parse_sql("LISTEN\u{e9}x").is_err());
        assert_eq!(
            parse_sql("LISTEN caf\u{e9}").unwrap(),
            Command::Listen {
                channel: "caf\u{e9}".into()
            }
        );
    }

    #[test]
    fn parse_unknown_table_errors() {
        let sql = format!("INSERT INTO foobar (id) VALUES ('{ID}')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::UnknownTable(_))));
        assert!(matches!(parse_sql("SELECT * FROM foobar"), Err(SqlError::UnknownTable(_))));
    }

    #[test]
    fn parse_empty_errors() {
        assert!(matches!(parse_sql(""), Err(SqlError::Empty)));
    }
}
