use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde::Serialize;
use std::collections::HashSet;
use tracing::{info, warn};

use crate::model::{ObligationView, PaymentStatus, PaymentUpdate};
use crate::store::{FeeStore, StoreError};

const AMOUNT_EPSILON: f64 = 1e-6;

#[derive(Debug, Clone, PartialEq)]
pub struct PaymentItem {
    pub obligation_id: String,
    pub amount: f64,
    /// Version the caller last saw; when absent the freshly read version is used.
    pub expected_version: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectOptions {
    pub allow_overpayment: bool,
    pub receipt_prefix: String,
}

impl Default for CollectOptions {
    fn default() -> Self {
        Self {
            allow_overpayment: false,
            receipt_prefix: "REC".to_string(),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum CollectError {
    #[error("{0}")]
    BadParams(String),
    #[error("student not found: {0}")]
    StudentNotFound(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl CollectError {
    pub fn code(&self) -> &'static str {
        match self {
            CollectError::BadParams(_) => "bad_params",
            CollectError::StudentNotFound(_) => "not_found",
            CollectError::Store(e) => e.code(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub receipt_number: String,
    pub date: NaiveDate,
    pub student_name: String,
    pub admission_number: Option<String>,
    pub fee_type: Option<String>,
    pub fee_structure: Option<String>,
    pub amount: f64,
    pub balance: f64,
    pub payment_status: PaymentStatus,
}

impl Receipt {
    pub fn render_text(&self, currency: &str) -> String {
        let mut out = String::new();
        out.push_str(&format!("Receipt: {}\n", self.receipt_number));
        out.push_str(&format!("Date: {}\n", self.date.format("%Y-%m-%d")));
        out.push_str(&format!("Student: {}\n", self.student_name));
        if let Some(adm) = &self.admission_number {
            out.push_str(&format!("Admission No: {adm}\n"));
        }
        out.push_str(&format!(
            "Fee: {}\n",
            self.fee_type.as_deref().unwrap_or("Unknown")
        ));
        if let Some(fs) = &self.fee_structure {
            out.push_str(&format!("Structure: {fs}\n"));
        }
        out.push_str(&format!("Amount Paid: {currency}{:.2}\n", self.amount));
        out.push_str(&format!("Balance: {currency}{:.2}\n", self.balance));
        out.push_str(&format!("Status: {}\n", self.payment_status.as_str()));
        out
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(
    tag = "outcome",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum ItemOutcome {
    Applied {
        obligation_id: String,
        amount: f64,
        amount_paid: f64,
        balance: f64,
        payment_status: PaymentStatus,
        version: i64,
        receipt: Receipt,
    },
    Skipped {
        obligation_id: String,
    },
    Conflict {
        obligation_id: String,
        message: String,
    },
    Failed {
        obligation_id: String,
        code: String,
        message: String,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionResult {
    pub applied_count: usize,
    pub applied_total: f64,
    pub skipped_count: usize,
    pub conflict_count: usize,
    pub failed_count: usize,
    pub items: Vec<ItemOutcome>,
}

impl CollectionResult {
    fn push(&mut self, outcome: ItemOutcome) {
        match &outcome {
            ItemOutcome::Applied { amount, .. } => {
                self.applied_count += 1;
                self.applied_total += amount;
            }
            ItemOutcome::Skipped { .. } => self.skipped_count += 1,
            ItemOutcome::Conflict { .. } => self.conflict_count += 1,
            ItemOutcome::Failed { .. } => self.failed_count += 1,
        }
        self.items.push(outcome);
    }

    pub fn receipts(&self) -> impl Iterator<Item = &Receipt> {
        self.items.iter().filter_map(|o| match o {
            ItemOutcome::Applied { receipt, .. } => Some(receipt),
            _ => None,
        })
    }
}

fn validate(items: &[PaymentItem]) -> Result<(), CollectError> {
    if items.is_empty() {
        return Err(CollectError::BadParams("items must not be empty".into()));
    }
    let mut seen = HashSet::new();
    for item in items {
        if item.obligation_id.trim().is_empty() {
            return Err(CollectError::BadParams("obligationId must not be empty".into()));
        }
        if !item.amount.is_finite() || item.amount < 0.0 {
            return Err(CollectError::BadParams(format!(
                "amount for {} must be a non-negative number",
                item.obligation_id
            )));
        }
        if !seen.insert(item.obligation_id.as_str()) {
            return Err(CollectError::BadParams(format!(
                "obligation {} listed more than once",
                item.obligation_id
            )));
        }
    }
    Ok(())
}

pub fn collect_payments<S: FeeStore + ?Sized>(
    store: &S,
    student_id: &str,
    items: &[PaymentItem],
    opts: &CollectOptions,
    now: DateTime<Utc>,
) -> Result<CollectionResult, CollectError> {
    validate(items)?;
    if store.student(student_id)?.is_none() {
        return Err(CollectError::StudentNotFound(student_id.to_string()));
    }

    let mut result = CollectionResult::default();
    for (idx, item) in items.iter().enumerate() {
        let outcome = apply_item(store, student_id, item, opts, now, idx + 1);
        result.push(outcome);
    }
    info!(
        student_id,
        applied = result.applied_count,
        total = result.applied_total,
        conflicts = result.conflict_count,
        failed = result.failed_count,
        "fee collection finished"
    );
    Ok(result)
}

fn failed(item: &PaymentItem, code: &str, message: String) -> ItemOutcome {
    ItemOutcome::Failed {
        obligation_id: item.obligation_id.clone(),
        code: code.to_string(),
        message,
    }
}

fn apply_item<S: FeeStore + ?Sized>(
    store: &S,
    student_id: &str,
    item: &PaymentItem,
    opts: &CollectOptions,
    now: DateTime<Utc>,
    seq: usize,
) -> ItemOutcome {
    let view = match store.obligation(&item.obligation_id) {
        Ok(Some(v)) if v.obligation.student_id == student_id => v,
        Ok(_) => {
            return failed(
                item,
                "not_found",
                format!("obligation not found for student: {}", item.obligation_id),
            )
        }
        Err(e) => return failed(item, e.code(), e.to_string()),
    };

    if item.amount == 0.0 {
        return ItemOutcome::Skipped {
            obligation_id: item.obligation_id.clone(),
        };
    }

    let o = &view.obligation;
    if !opts.allow_overpayment && item.amount > o.balance() + AMOUNT_EPSILON {
        return failed(
            item,
            "overpayment",
            format!(
                "amount {:.2} exceeds remaining balance {:.2}",
                item.amount,
                o.balance()
            ),
        );
    }

    let expected = item.expected_version.unwrap_or(o.version);
    let amount_paid = o.amount_paid + item.amount;
    let status = PaymentStatus::derive(amount_paid, o.amount_due);
    let today = now.date_naive();
    let update = PaymentUpdate {
        amount_paid,
        payment_status: status,
        last_payment_date: if status == PaymentStatus::Pending {
            o.last_payment_date
        } else {
            Some(today)
        },
        updated_at: now.to_rfc3339_opts(SecondsFormat::Secs, true),
    };

    match store.record_payment(&o.id, &update, expected) {
        Ok(version) => {
            let balance = o.amount_due - amount_paid;
            ItemOutcome::Applied {
                obligation_id: o.id.clone(),
                amount: item.amount,
                amount_paid,
                balance,
                payment_status: status,
                version,
                receipt: receipt_for(&view, item.amount, balance, status, opts, now, seq),
            }
        }
        Err(StoreError::Conflict { id, expected }) => {
            warn!(obligation_id = %id, expected, "stale obligation version, payment rejected");
            ItemOutcome::Conflict {
                obligation_id: id,
                message: "obligation was modified by another session; reload and retry"
                    .to_string(),
            }
        }
        Err(e) => {
            warn!(obligation_id = %o.id, error = %e, "failed to record payment");
            failed(item, e.code(), e.to_string())
        }
    }
}

fn receipt_for(
    view: &ObligationView,
    amount: f64,
    balance: f64,
    status: PaymentStatus,
    opts: &CollectOptions,
    now: DateTime<Utc>,
    seq: usize,
) -> Receipt {
    Receipt {
        receipt_number: format!(
            "{}-{}-{}",
            opts.receipt_prefix,
            now.timestamp_millis(),
            seq
        ),
        date: now.date_naive(),
        student_name: view.student_name(),
        admission_number: view.admission_number.clone(),
        fee_type: view.fee_type_name.clone(),
        fee_structure: view.fee_structure_name.clone(),
        amount,
        balance,
        payment_status: status,
    }
}
