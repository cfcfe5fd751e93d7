use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::fees::csv::{self, CsvWriter};
use crate::model::{ObligationView, PaymentStatus, StudentStatus};
use crate::store::{FeeStore, ObligationQuery, StoreResult};

const FEE_REPORT_HEADER: [&str; 9] = [
    "Student Name",
    "Admission Number",
    "Fee Type",
    "Amount Due",
    "Amount Paid",
    "Balance",
    "Due Date",
    "Status",
    "Last Payment Date",
];

const PAYMENT_HISTORY_HEADER: [&str; 8] = [
    "Date",
    "Student Name",
    "Admission Number",
    "Fee Type",
    "Fee Structure",
    "Amount Paid",
    "Status",
    "Phone Number",
];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReportFilter {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub status: Option<PaymentStatus>,
    pub search: Option<String>,
}

impl ReportFilter {
    fn in_range(&self, date: Option<NaiveDate>) -> bool {
        if self.from.is_none() && self.to.is_none() {
            return true;
        }
        let Some(d) = date else {
            return false;
        };
        self.from.map_or(true, |f| d >= f) && self.to.map_or(true, |t| d <= t)
    }

    fn matches_text(&self, view: &ObligationView) -> bool {
        let Some(needle) = self
            .search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
        else {
            return true;
        };
        let needle = needle.to_lowercase();
        let hay = [
            Some(view.student_name()),
            view.admission_number.clone(),
            view.fee_type_name.clone(),
        ];
        hay.iter()
            .flatten()
            .any(|h| h.to_lowercase().contains(&needle))
    }
}

fn created_on(view: &ObligationView) -> Option<NaiveDate> {
    let created = &view.obligation.created_at;
    created
        .get(..10)
        .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
}

fn fmt_date(d: Option<NaiveDate>) -> String {
    d.map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_default()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportRow {
    pub obligation_id: String,
    pub student_id: String,
    pub student_name: String,
    pub admission_number: Option<String>,
    pub phone_number: Option<String>,
    pub fee_type: Option<String>,
    pub fee_structure: Option<String>,
    pub amount_due: f64,
    pub amount_paid: f64,
    pub balance: f64,
    pub payment_status: PaymentStatus,
    pub due_date: Option<NaiveDate>,
    pub last_payment_date: Option<NaiveDate>,
    pub created_at: String,
}

impl From<&ObligationView> for ReportRow {
    fn from(v: &ObligationView) -> Self {
        let o = &v.obligation;
        ReportRow {
            obligation_id: o.id.clone(),
            student_id: o.student_id.clone(),
            student_name: v.student_name(),
            admission_number: v.admission_number.clone(),
            phone_number: v.phone_number.clone(),
            fee_type: v.fee_type_name.clone(),
            fee_structure: v.fee_structure_name.clone(),
            amount_due: o.amount_due,
            amount_paid: o.amount_paid,
            balance: o.balance(),
            payment_status: o.payment_status,
            due_date: o.due_date,
            last_payment_date: o.last_payment_date,
            created_at: o.created_at.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeReport {
    pub rows: Vec<ReportRow>,
    pub total_due: f64,
    pub total_paid: f64,
    pub total_outstanding: f64,
}

impl FeeReport {
    pub fn to_csv(&self, include_totals: bool) -> String {
        let mut w = CsvWriter::with_header(&FEE_REPORT_HEADER);
        for r in &self.rows {
            let (due, paid, bal) = (
                csv::amount(r.amount_due),
                csv::amount(r.amount_paid),
                csv::amount(r.balance),
            );
            let (due_date, last) = (fmt_date(r.due_date), fmt_date(r.last_payment_date));
            w.row([
                r.student_name.as_str(),
                r.admission_number.as_deref().unwrap_or(""),
                r.fee_type.as_deref().unwrap_or(""),
                due.as_str(),
                paid.as_str(),
                bal.as_str(),
                due_date.as_str(),
                r.payment_status.as_str(),
                last.as_str(),
            ]);
        }
        if include_totals {
            let (due, paid, out) = (
                csv::amount(self.total_due),
                csv::amount(self.total_paid),
                csv::amount(self.total_outstanding),
            );
            w.row([
                "Total",
                "",
                "",
                due.as_str(),
                paid.as_str(),
                out.as_str(),
                "",
                "",
                "",
            ]);
        }
        w.finish()
    }
}

pub fn fee_report<S: FeeStore + ?Sized>(store: &S, filter: &ReportFilter) -> StoreResult<FeeReport> {
    let mut report = FeeReport::default();
    for view in store.obligations(&ObligationQuery::default())? {
        if !filter.in_range(created_on(&view))
            || filter
                .status
                .is_some_and(|s| s != view.obligation.payment_status)
            || !filter.matches_text(&view)
        {
            continue;
        }
        let row = ReportRow::from(&view);
        report.total_due += row.amount_due;
        report.total_paid += row.amount_paid;
        report.total_outstanding += row.balance;
        report.rows.push(row);
    }
    Ok(report)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentHistory {
    pub rows: Vec<ReportRow>,
    pub total_collected: f64,
}

impl PaymentHistory {
    pub fn to_csv(&self, include_totals: bool) -> String {
        let mut w = CsvWriter::with_header(&PAYMENT_HISTORY_HEADER);
        for r in &self.rows {
            let (date, paid) = (fmt_date(r.last_payment_date), csv::amount(r.amount_paid));
            w.row([
                date.as_str(),
                r.student_name.as_str(),
                r.admission_number.as_deref().unwrap_or(""),
                r.fee_type.as_deref().unwrap_or(""),
                r.fee_structure.as_deref().unwrap_or(""),
                paid.as_str(),
                r.payment_status.as_str(),
                r.phone_number.as_deref().unwrap_or(""),
            ]);
        }
        if include_totals {
            let total = csv::amount(self.total_collected);
            w.row(["Total", "", "", "", "", total.as_str(), "", ""]);
        }
        w.finish()
    }
}

/// Obligations with money against them, most recent payment first. The date
/// range applies to the last payment date.
pub fn payment_history<S: FeeStore + ?Sized>(
    store: &S,
    filter: &ReportFilter,
) -> StoreResult<PaymentHistory> {
    let query = ObligationQuery {
        student_id: None,
        paid_only: true,
    };
    let mut rows: Vec<ReportRow> = store
        .obligations(&query)?
        .iter()
        .filter(|v| filter.in_range(v.obligation.last_payment_date))
        .filter(|v| {
            filter
                .status
                .map_or(true, |s| s == v.obligation.payment_status)
        })
        .filter(|v| filter.matches_text(v))
        .map(ReportRow::from)
        .collect();
    // None sorts before Some, so reversing puts undated rows last.
    rows.sort_by(|a, b| b.last_payment_date.cmp(&a.last_payment_date));
    let total_collected = rows.iter().map(|r| r.amount_paid).sum();
    Ok(PaymentHistory {
        rows,
        total_collected,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentBalance {
    pub student_id: String,
    pub student_name: String,
    pub admission_number: Option<String>,
    pub phone_number: Option<String>,
    pub university_name: Option<String>,
    pub course_name: Option<String>,
    pub session_name: Option<String>,
    pub created_at: String,
    pub total_due: f64,
    pub total_paid: f64,
    pub balance: f64,
    pub obligations: Vec<ObligationView>,
}

pub fn student_balances<S: FeeStore + ?Sized>(
    store: &S,
    search: Option<&str>,
) -> StoreResult<Vec<StudentBalance>> {
    let needle = search
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty());
    let mut by_student: BTreeMap<String, StudentBalance> = BTreeMap::new();
    for view in store.obligations(&ObligationQuery::default())? {
        if view.student_status != StudentStatus::Active {
            continue;
        }
        if let Some(n) = &needle {
            let name_hit = view.student_name().to_lowercase().contains(n);
            let adm_hit = view
                .admission_number
                .as_deref()
                .is_some_and(|a| a.to_lowercase().contains(n));
            if !name_hit && !adm_hit {
                continue;
            }
        }
        let entry = by_student
            .entry(view.obligation.student_id.clone())
            .or_insert_with(|| StudentBalance {
                student_id: view.obligation.student_id.clone(),
                student_name: view.student_name(),
                admission_number: view.admission_number.clone(),
                phone_number: view.phone_number.clone(),
                university_name: view.university_name.clone(),
                course_name: view.course_name.clone(),
                session_name: view.session_name.clone(),
                created_at: view.student_created_at.clone(),
                total_due: 0.0,
                total_paid: 0.0,
                balance: 0.0,
                obligations: Vec::new(),
            });
        entry.total_due += view.obligation.amount_due;
        entry.total_paid += view.obligation.amount_paid;
        entry.balance += view.obligation.balance();
        entry.obligations.push(view);
    }
    let mut out: Vec<StudentBalance> = by_student.into_values().collect();
    out.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| a.student_name.cmp(&b.student_name))
    });
    Ok(out)
}
