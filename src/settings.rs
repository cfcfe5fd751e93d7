use rusqlite::Connection;
use serde_json::{json, Map, Value};

use crate::db;
use crate::fees::assign::AssignmentPolicy;
use crate::fees::collect::CollectOptions;
use crate::model::PaymentStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupSection {
    Fees,
    Reports,
}

impl SetupSection {
    pub const ALL: [SetupSection; 2] = [SetupSection::Fees, SetupSection::Reports];

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "fees" => Some(Self::Fees),
            "reports" => Some(Self::Reports),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Fees => "fees",
            Self::Reports => "reports",
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Fees => "setup.fees",
            Self::Reports => "setup.reports",
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Fees => json!({
            "includeInactiveStudents": true,
            "autoAssignOnStudentCreate": true,
            "allowOverpayment": false,
            "receiptPrefix": "REC",
            "currencySymbol": "₹"
        }),
        SetupSection::Reports => json!({
            "defaultStatusFilter": "all",
            "csvIncludeTotals": false
        }),
    }
}

fn parse_bool(v: &Value, key: &str) -> Result<bool, String> {
    v.as_bool().ok_or_else(|| format!("{} must be boolean", key))
}

fn parse_string_len(v: &Value, key: &str, min: usize, max: usize) -> Result<String, String> {
    let s = v.as_str().ok_or_else(|| format!("{} must be string", key))?;
    let s = s.trim();
    let n = s.chars().count();
    if n < min || n > max {
        return Err(format!("{} length must be in {}..={}", key, min, max));
    }
    Ok(s.to_string())
}

fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = current
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())?;
    for (k, v) in patch {
        match section {
            SetupSection::Fees => match k.as_str() {
                "includeInactiveStudents" | "autoAssignOnStudentCreate" | "allowOverpayment" => {
                    obj.insert(k.clone(), Value::Bool(parse_bool(v, k)?));
                }
                "receiptPrefix" => {
                    obj.insert(k.clone(), Value::String(parse_string_len(v, k, 1, 12)?));
                }
                "currencySymbol" => {
                    obj.insert(k.clone(), Value::String(parse_string_len(v, k, 1, 4)?));
                }
                _ => return Err(format!("unknown fees field: {}", k)),
            },
            SetupSection::Reports => match k.as_str() {
                "defaultStatusFilter" => {
                    let s = parse_string_len(v, k, 1, 16)?.to_ascii_lowercase();
                    if s != "all" && PaymentStatus::parse(&s).is_none() {
                        return Err(
                            "defaultStatusFilter must be one of: all, pending, partial, paid"
                                .into(),
                        );
                    }
                    obj.insert(k.clone(), Value::String(s));
                }
                "csvIncludeTotals" => {
                    obj.insert(k.clone(), Value::Bool(parse_bool(v, k)?));
                }
                _ => return Err(format!("unknown reports field: {}", k)),
            },
        }
    }
    Ok(())
}

pub fn load_section(conn: &Connection, section: SetupSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // Apply field by field so one bad stored value doesn't discard the rest.
            for (k, v) in saved_obj {
                let mut single = Map::new();
                single.insert(k.clone(), v.clone());
                let _ = merge_section_patch(section, &mut current, &single);
            }
        }
    }
    Ok(current)
}

#[derive(Debug, thiserror::Error)]
pub enum UpdateError {
    #[error("{0}")]
    Invalid(String),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

pub fn update_section(
    conn: &Connection,
    section: SetupSection,
    patch: &Map<String, Value>,
) -> Result<Value, UpdateError> {
    let mut current = load_section(conn, section)?;
    merge_section_patch(section, &mut current, patch).map_err(UpdateError::Invalid)?;
    db::settings_set_json(conn, section.key(), &current)?;
    Ok(current)
}

fn bool_field(v: &Value, key: &str, default: bool) -> bool {
    v.get(key).and_then(Value::as_bool).unwrap_or(default)
}

fn str_field(v: &Value, key: &str, default: &str) -> String {
    v.get(key)
        .and_then(Value::as_str)
        .unwrap_or(default)
        .to_string()
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeeSettings {
    pub include_inactive_students: bool,
    pub auto_assign_on_student_create: bool,
    pub allow_overpayment: bool,
    pub receipt_prefix: String,
    pub currency_symbol: String,
}

impl FeeSettings {
    pub fn load(conn: &Connection) -> anyhow::Result<Self> {
        let v = load_section(conn, SetupSection::Fees)?;
        Ok(Self {
            include_inactive_students: bool_field(&v, "includeInactiveStudents", true),
            auto_assign_on_student_create: bool_field(&v, "autoAssignOnStudentCreate", true),
            allow_overpayment: bool_field(&v, "allowOverpayment", false),
            receipt_prefix: str_field(&v, "receiptPrefix", "REC"),
            currency_symbol: str_field(&v, "currencySymbol", "₹"),
        })
    }

    pub fn policy(&self) -> AssignmentPolicy {
        AssignmentPolicy {
            include_inactive_students: self.include_inactive_students,
        }
    }

    pub fn collect_options(&self) -> CollectOptions {
        CollectOptions {
            allow_overpayment: self.allow_overpayment,
            receipt_prefix: self.receipt_prefix.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReportSettings {
    /// `None` means no status filter.
    pub default_status_filter: Option<PaymentStatus>,
    pub csv_include_totals: bool,
}

impl ReportSettings {
    pub fn load(conn: &Connection) -> anyhow::Result<Self> {
        let v = load_section(conn, SetupSection::Reports)?;
        Ok(Self {
            default_status_filter: PaymentStatus::parse(&str_field(
                &v,
                "defaultStatusFilter",
                "all",
            )),
            csv_include_totals: bool_field(&v, "csvIncludeTotals", false),
        })
    }
}
