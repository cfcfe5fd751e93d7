use rusqlite::{types::Value as SqlValue, Connection, OptionalExtension};
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::db;
use crate::ipc::helpers::{
    db_conn, optional_date, optional_str, parse_amount, required_str, respond, HandlerErr,
};
use crate::ipc::types::{AppState, Request};

#[derive(Clone, Copy)]
enum Kind {
    Text,
    Date,
    Amount,
    Count,
    Choice(&'static [&'static str]),
    Ref(&'static str),
}

struct Field {
    key: &'static str,
    column: &'static str,
    kind: Kind,
    required: bool,
    default: Option<&'static str>,
}

const fn field(key: &'static str, column: &'static str, kind: Kind, required: bool) -> Field {
    Field {
        key,
        column,
        kind,
        required,
        default: None,
    }
}

const fn with_default(
    key: &'static str,
    column: &'static str,
    kind: Kind,
    default: &'static str,
) -> Field {
    Field {
        key,
        column,
        kind,
        required: false,
        default: Some(default),
    }
}

struct Entity {
    prefix: &'static str,
    table: &'static str,
    list_key: &'static str,
    id_param: &'static str,
    order_by: &'static str,
    /// Optional list filter: (param key, column).
    filter: Option<(&'static str, &'static str)>,
    fields: &'static [Field],
}

const ACTIVE_INACTIVE: &[&str] = &["Active", "Inactive"];
const HOSTEL_STATUS: &[&str] = &["Active", "Inactive", "Maintenance"];
const EXPENSE_STATUS: &[&str] = &["Pending", "Paid", "Cancelled"];
const MESS_CATEGORIES: &[&str] = &[
    "Food",
    "Kitchen Equipment",
    "Staff",
    "Utilities",
    "Supplies",
    "Maintenance",
    "General",
];
const MESS_PAYMENT_METHODS: &[&str] = &["Cash", "Bank Transfer", "Cheque", "Card"];
const EXPENSE_KINDS: &[&str] = &["office", "personal", "salary"];

const ENTITIES: &[Entity] = &[
    Entity {
        prefix: "agents",
        table: "agents",
        list_key: "agents",
        id_param: "agentId",
        order_by: "name",
        filter: Some(("status", "status")),
        fields: &[
            field("name", "name", Kind::Text, true),
            field("contactPerson", "contact_person", Kind::Text, true),
            field("email", "email", Kind::Text, true),
            field("phone", "phone", Kind::Text, false),
            field("location", "location", Kind::Text, false),
            with_default("commissionRate", "commission_rate", Kind::Amount, "0"),
            with_default("status", "status", Kind::Choice(ACTIVE_INACTIVE), "Active"),
        ],
    },
    Entity {
        prefix: "hostels",
        table: "hostels",
        list_key: "hostels",
        id_param: "hostelId",
        order_by: "name",
        filter: Some(("status", "status")),
        fields: &[
            field("name", "name", Kind::Text, true),
            field("location", "location", Kind::Text, true),
            with_default("capacity", "capacity", Kind::Count, "0"),
            with_default("currentOccupancy", "current_occupancy", Kind::Count, "0"),
            with_default("monthlyRent", "monthly_rent", Kind::Amount, "0"),
            field("contactPerson", "contact_person", Kind::Text, false),
            field("phone", "phone", Kind::Text, false),
            field("email", "email", Kind::Text, false),
            field("address", "address", Kind::Text, false),
            field("facilities", "facilities", Kind::Text, false),
            with_default("status", "status", Kind::Choice(HOSTEL_STATUS), "Active"),
        ],
    },
    Entity {
        prefix: "messExpenses",
        table: "mess_expenses",
        list_key: "messExpenses",
        id_param: "messExpenseId",
        order_by: "expense_date DESC, created_at DESC",
        filter: Some(("hostelId", "hostel_id")),
        fields: &[
            field("hostelId", "hostel_id", Kind::Ref("hostels"), false),
            field("expenseType", "expense_type", Kind::Text, true),
            field("description", "description", Kind::Text, false),
            field("amount", "amount", Kind::Amount, true),
            field("expenseDate", "expense_date", Kind::Date, true),
            with_default("category", "category", Kind::Choice(MESS_CATEGORIES), "General"),
            with_default(
                "paymentMethod",
                "payment_method",
                Kind::Choice(MESS_PAYMENT_METHODS),
                "Cash",
            ),
            field("receiptNumber", "receipt_number", Kind::Text, false),
            field("vendorName", "vendor_name", Kind::Text, false),
            field("notes", "notes", Kind::Text, false),
            with_default("status", "status", Kind::Choice(EXPENSE_STATUS), "Pending"),
        ],
    },
    Entity {
        prefix: "expenses",
        table: "expenses",
        list_key: "expenses",
        id_param: "expenseId",
        order_by: "expense_date DESC, created_at DESC",
        filter: Some(("kind", "kind")),
        fields: &[
            field("kind", "kind", Kind::Choice(EXPENSE_KINDS), true),
            field("title", "title", Kind::Text, true),
            field("amount", "amount", Kind::Amount, true),
            field("expenseDate", "expense_date", Kind::Date, true),
            field("payee", "payee", Kind::Text, false),
            field("notes", "notes", Kind::Text, false),
            with_default("status", "status", Kind::Choice(EXPENSE_STATUS), "Pending"),
        ],
    },
];

fn choice(options: &[&str], key: &str, raw: &str) -> Result<String, HandlerErr> {
    options
        .iter()
        .find(|o| o.eq_ignore_ascii_case(raw.trim()))
        .map(|o| o.to_string())
        .ok_or_else(|| {
            HandlerErr::bad_params(format!("{key} must be one of: {}", options.join(", ")))
        })
}

fn read_field(conn: &Connection, params: &Value, f: &Field) -> Result<Option<SqlValue>, HandlerErr> {
    let present = !matches!(params.get(f.key), None | Some(Value::Null));
    if !present {
        if f.required {
            return Err(HandlerErr::bad_params(format!("missing {}", f.key)));
        }
        return Ok(match (f.default, f.kind) {
            (Some(d), Kind::Amount) => Some(SqlValue::Real(d.parse().unwrap_or(0.0))),
            (Some(d), Kind::Count) => Some(SqlValue::Integer(d.parse().unwrap_or(0))),
            (Some(d), _) => Some(SqlValue::Text(d.to_string())),
            (None, _) => None,
        });
    }
    let v = match f.kind {
        Kind::Text => match optional_str(params, f.key)? {
            Some(s) => SqlValue::Text(s),
            None if f.required => {
                return Err(HandlerErr::bad_params(format!("{} must not be empty", f.key)))
            }
            None => SqlValue::Null,
        },
        Kind::Date => match optional_date(params, f.key)? {
            Some(d) => SqlValue::Text(d.format("%Y-%m-%d").to_string()),
            None => return Err(HandlerErr::bad_params(format!("{} must not be empty", f.key))),
        },
        Kind::Amount => SqlValue::Real(parse_amount(&params[f.key], f.key)?),
        Kind::Count => {
            let n = params[f.key]
                .as_i64()
                .filter(|n| *n >= 0)
                .ok_or_else(|| {
                    HandlerErr::bad_params(format!("{} must be a non-negative integer", f.key))
                })?;
            SqlValue::Integer(n)
        }
        Kind::Choice(options) => {
            SqlValue::Text(choice(options, f.key, &required_str(params, f.key)?)?)
        }
        Kind::Ref(table) => match optional_str(params, f.key)? {
            Some(id) => {
                let sql = format!("SELECT 1 FROM {table} WHERE id = ?");
                let found: Option<i64> = conn
                    .query_row(&sql, [&id], |r| r.get(0))
                    .optional()
                    .map_err(|e| HandlerErr::db("db_query_failed", table, e))?;
                if found.is_none() {
                    return Err(HandlerErr::new("not_found", format!("{} not found", f.key)));
                }
                SqlValue::Text(id)
            }
            None => SqlValue::Null,
        },
    };
    Ok(Some(v))
}

fn to_json(v: SqlValue) -> Value {
    match v {
        SqlValue::Null => Value::Null,
        SqlValue::Integer(i) => json!(i),
        SqlValue::Real(f) => json!(f),
        SqlValue::Text(s) => Value::String(s),
        SqlValue::Blob(_) => Value::Null,
    }
}

fn list(conn: &Connection, e: &Entity, params: &Value) -> Result<Value, HandlerErr> {
    let mut columns: Vec<&str> = vec!["id"];
    columns.extend(e.fields.iter().map(|f| f.column));
    columns.extend(["created_at", "updated_at"]);

    let mut sql = format!("SELECT {} FROM {}", columns.join(", "), e.table);
    let mut binds: Vec<String> = Vec::new();
    if let Some((key, column)) = e.filter {
        if let Some(v) = optional_str(params, key)? {
            sql.push_str(&format!(" WHERE {column} = ?"));
            binds.push(v);
        }
    }
    sql.push_str(&format!(" ORDER BY {}", e.order_by));

    let mut stmt = conn
        .prepare(&sql)
        .map_err(|err| HandlerErr::db("db_query_failed", e.table, err))?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(binds.iter()), |r| {
            let mut obj = Map::new();
            obj.insert("id".into(), Value::String(r.get(0)?));
            for (i, f) in e.fields.iter().enumerate() {
                obj.insert(f.key.into(), to_json(r.get(i + 1)?));
            }
            let n = e.fields.len();
            obj.insert("createdAt".into(), to_json(r.get(n + 1)?));
            obj.insert("updatedAt".into(), to_json(r.get(n + 2)?));
            Ok(Value::Object(obj))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|err| HandlerErr::db("db_query_failed", e.table, err))?;
    Ok(json!({ e.list_key: rows }))
}

fn create(conn: &Connection, e: &Entity, params: &Value) -> Result<Value, HandlerErr> {
    let id = Uuid::new_v4().to_string();
    let mut columns: Vec<&str> = vec!["id", "created_at"];
    let mut values: Vec<SqlValue> = vec![SqlValue::Text(id.clone()), SqlValue::Text(db::now_rfc3339())];
    for f in e.fields {
        if let Some(v) = read_field(conn, params, f)? {
            columns.push(f.column);
            values.push(v);
        }
    }
    let sql = format!(
        "INSERT INTO {}({}) VALUES({})",
        e.table,
        columns.join(", "),
        vec!["?"; columns.len()].join(", ")
    );
    conn.execute(&sql, rusqlite::params_from_iter(values))
        .map_err(|err| HandlerErr::db("db_insert_failed", e.table, err))?;
    Ok(json!({ "id": id }))
}

fn update(conn: &Connection, e: &Entity, params: &Value) -> Result<Value, HandlerErr> {
    let id = required_str(params, e.id_param)?;
    let patch = params
        .get("patch")
        .and_then(|v| v.as_object())
        .ok_or_else(|| HandlerErr::bad_params("patch must be an object"))?;
    let patch_value = Value::Object(patch.clone());

    let mut sets: Vec<String> = Vec::new();
    let mut values: Vec<SqlValue> = Vec::new();
    for key in patch.keys() {
        let f = e
            .fields
            .iter()
            .find(|f| f.key == key.as_str())
            .ok_or_else(|| HandlerErr::bad_params(format!("unknown {} field: {key}", e.prefix)))?;
        let v = read_field(conn, &patch_value, f)?.unwrap_or(SqlValue::Null);
        sets.push(format!("{} = ?", f.column));
        values.push(v);
    }
    if sets.is_empty() {
        return Err(HandlerErr::bad_params("patch must not be empty"));
    }
    sets.push("updated_at = ?".to_string());
    values.push(SqlValue::Text(db::now_rfc3339()));
    values.push(SqlValue::Text(id));
    let sql = format!("UPDATE {} SET {} WHERE id = ?", e.table, sets.join(", "));
    let changed = conn
        .execute(&sql, rusqlite::params_from_iter(values))
        .map_err(|err| HandlerErr::db("db_update_failed", e.table, err))?;
    if changed == 0 {
        return Err(HandlerErr::new("not_found", format!("{} row not found", e.table)));
    }
    Ok(json!({ "ok": true }))
}

fn delete(conn: &Connection, e: &Entity, params: &Value) -> Result<Value, HandlerErr> {
    let id = required_str(params, e.id_param)?;
    let sql = format!("DELETE FROM {} WHERE id = ?", e.table);
    let changed = conn
        .execute(&sql, [&id])
        .map_err(|err| HandlerErr::db("db_delete_failed", e.table, err))?;
    if changed == 0 {
        return Err(HandlerErr::new("not_found", format!("{} row not found", e.table)));
    }
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let (prefix, action) = req.method.split_once('.')?;
    let entity = ENTITIES.iter().find(|e| e.prefix == prefix)?;
    let op: fn(&Connection, &Entity, &Value) -> Result<Value, HandlerErr> = match action {
        "list" => list,
        "create" => create,
        "update" => update,
        "delete" => delete,
        _ => return None,
    };
    let result = db_conn(state).and_then(|conn| op(conn, entity, &req.params));
    Some(respond(req, result))
}
