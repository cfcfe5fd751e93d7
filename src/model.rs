use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Partial,
    Paid,
}

impl PaymentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Partial => "partial",
            PaymentStatus::Paid => "paid",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(PaymentStatus::Pending),
            "partial" => Some(PaymentStatus::Partial),
            "paid" => Some(PaymentStatus::Paid),
            _ => None,
        }
    }

    pub fn derive(amount_paid: f64, amount_due: f64) -> Self {
        if amount_paid >= amount_due {
            PaymentStatus::Paid
        } else if amount_paid > 0.0 {
            PaymentStatus::Partial
        } else {
            PaymentStatus::Pending
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StudentStatus {
    Active,
    Inactive,
    Completed,
}

impl StudentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            StudentStatus::Active => "active",
            StudentStatus::Inactive => "inactive",
            StudentStatus::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "active" => Some(StudentStatus::Active),
            "inactive" => Some(StudentStatus::Inactive),
            "completed" => Some(StudentStatus::Completed),
            _ => None,
        }
    }
}

/// How often a fee component falls due. Labels outside the known set are kept
/// verbatim so rows written by older clients still round-trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frequency {
    OneTime,
    Yearly,
    SemesterWise,
    Other(String),
}

impl Frequency {
    pub fn from_label(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "one-time" => Frequency::OneTime,
            "yearly" => Frequency::Yearly,
            "semester-wise" => Frequency::SemesterWise,
            _ => Frequency::Other(s.trim().to_string()),
        }
    }

    pub fn label(&self) -> &str {
        match self {
            Frequency::OneTime => "one-time",
            Frequency::Yearly => "yearly",
            Frequency::SemesterWise => "semester-wise",
            Frequency::Other(s) => s.as_str(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub father_name: String,
    pub mother_name: String,
    pub date_of_birth: Option<String>,
    pub phone_number: Option<String>,
    pub email: Option<String>,
    pub university_id: String,
    pub course_id: String,
    pub academic_session_id: Option<String>,
    pub status: StudentStatus,
    pub admission_number: Option<String>,
    pub city: Option<String>,
    pub country: Option<String>,
    pub address: Option<String>,
    pub aadhaar_number: Option<String>,
    pub passport_number: Option<String>,
    pub twelfth_marks: Option<f64>,
    pub seat_number: Option<String>,
    pub agent_id: Option<String>,
    pub created_at: String,
    pub updated_at: Option<String>,
}

impl Student {
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeStructure {
    pub id: String,
    pub name: String,
    pub university_id: String,
    pub course_id: String,
    pub is_active: bool,
    pub created_at: String,
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeComponent {
    pub id: String,
    pub fee_structure_id: String,
    pub fee_type_id: String,
    pub amount: f64,
    pub frequency: String,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Obligation {
    pub id: String,
    pub student_id: String,
    pub fee_structure_component_id: String,
    pub amount_due: f64,
    pub amount_paid: f64,
    pub payment_status: PaymentStatus,
    pub due_date: Option<NaiveDate>,
    pub last_payment_date: Option<NaiveDate>,
    pub version: i64,
    pub created_at: String,
}

impl Obligation {
    pub fn balance(&self) -> f64 {
        self.amount_due - self.amount_paid
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObligationView {
    #[serde(flatten)]
    pub obligation: Obligation,
    pub student_first_name: String,
    pub student_last_name: String,
    pub admission_number: Option<String>,
    pub phone_number: Option<String>,
    pub student_status: StudentStatus,
    pub student_created_at: String,
    pub university_name: Option<String>,
    pub course_name: Option<String>,
    pub session_name: Option<String>,
    pub fee_type_name: Option<String>,
    pub fee_structure_id: String,
    pub fee_structure_name: Option<String>,
    pub component_amount: f64,
    pub frequency: String,
}

impl ObligationView {
    pub fn student_name(&self) -> String {
        format!("{} {}", self.student_first_name, self.student_last_name)
            .trim()
            .to_string()
    }
}

#[derive(Debug, Clone)]
pub struct NewAssignment {
    pub student_id: String,
    pub fee_structure_id: String,
    pub assigned_at: String,
}

#[derive(Debug, Clone)]
pub struct NewObligation {
    pub student_id: String,
    pub fee_structure_component_id: String,
    pub amount_due: f64,
    pub due_date: NaiveDate,
}

#[derive(Debug, Clone)]
pub struct PaymentUpdate {
    pub amount_paid: f64,
    pub payment_status: PaymentStatus,
    pub last_payment_date: Option<NaiveDate>,
    pub updated_at: String,
}
