use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::fees::schedule;
use crate::model::{
    FeeComponent, FeeStructure, Frequency, NewAssignment, NewObligation, Student, StudentStatus,
};
use crate::store::{FeeStore, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssignmentPolicy {
    pub include_inactive_students: bool,
}

impl Default for AssignmentPolicy {
    fn default() -> Self {
        Self {
            include_inactive_students: true,
        }
    }
}

impl AssignmentPolicy {
    pub fn matches(&self, student: &Student, structure: &FeeStructure) -> bool {
        if student.university_id != structure.university_id
            || student.course_id != structure.course_id
        {
            return false;
        }
        self.include_inactive_students || student.status == StudentStatus::Active
    }
}

#[derive(thiserror::Error, Debug)]
pub enum AssignError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },
    #[error("fee structure {0} is not active")]
    StructureInactive(String),
    #[error("fee structure {0} has no components")]
    NoComponents(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl AssignError {
    pub fn code(&self) -> &'static str {
        match self {
            AssignError::NotFound { .. } => "not_found",
            AssignError::StructureInactive(_) => "structure_inactive",
            AssignError::NoComponents(_) => "no_components",
            AssignError::Store(e) => e.code(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(
    tag = "outcome",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum AssignmentOutcome {
    Assigned {
        student_id: String,
        fee_structure_id: String,
        assignment_id: String,
        obligation_count: usize,
    },
    AlreadyAssigned {
        student_id: String,
        fee_structure_id: String,
    },
    Failed {
        student_id: String,
        fee_structure_id: String,
        code: String,
        message: String,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentReport {
    pub assigned_count: usize,
    pub already_assigned_count: usize,
    pub failed_count: usize,
    pub obligations_created: usize,
    pub outcomes: Vec<AssignmentOutcome>,
}

impl AssignmentReport {
    fn push(&mut self, outcome: AssignmentOutcome) {
        match &outcome {
            AssignmentOutcome::Assigned {
                obligation_count, ..
            } => {
                self.assigned_count += 1;
                self.obligations_created += obligation_count;
            }
            AssignmentOutcome::AlreadyAssigned { .. } => self.already_assigned_count += 1,
            AssignmentOutcome::Failed { .. } => self.failed_count += 1,
        }
        self.outcomes.push(outcome);
    }
}

pub fn assign_structure<S: FeeStore + ?Sized>(
    store: &S,
    policy: &AssignmentPolicy,
    structure_id: &str,
    now: DateTime<Utc>,
) -> Result<AssignmentReport, AssignError> {
    let structure = store
        .fee_structure(structure_id)?
        .ok_or_else(|| AssignError::NotFound {
            entity: "fee_structure",
            id: structure_id.to_string(),
        })?;
    if !structure.is_active {
        return Err(AssignError::StructureInactive(structure.id));
    }
    let components = store.components(&structure.id)?;
    if components.is_empty() {
        return Err(AssignError::NoComponents(structure.id));
    }

    let mut report = AssignmentReport::default();
    for student in store.students_in_program(&structure.university_id, &structure.course_id)? {
        if !policy.matches(&student, &structure) {
            continue;
        }
        report.push(assign_pair(store, &student, &structure, &components, now));
    }
    info!(
        fee_structure_id = %structure.id,
        assigned = report.assigned_count,
        already_assigned = report.already_assigned_count,
        failed = report.failed_count,
        "fee structure assignment finished"
    );
    Ok(report)
}

pub fn assign_student<S: FeeStore + ?Sized>(
    store: &S,
    policy: &AssignmentPolicy,
    student_id: &str,
    now: DateTime<Utc>,
) -> Result<AssignmentReport, AssignError> {
    let student = store
        .student(student_id)?
        .ok_or_else(|| AssignError::NotFound {
            entity: "student",
            id: student_id.to_string(),
        })?;

    let mut report = AssignmentReport::default();
    for structure in
        store.active_structures_for_program(&student.university_id, &student.course_id)?
    {
        if !policy.matches(&student, &structure) {
            continue;
        }
        let components = match store.components(&structure.id) {
            Ok(c) if c.is_empty() => {
                debug!(student_id = %student.id, fee_structure_id = %structure.id,
                    "skipping fee structure without components");
                continue;
            }
            Ok(c) => c,
            Err(e) => {
                warn!(student_id = %student.id, fee_structure_id = %structure.id, error = %e,
                    "failed to load fee components");
                report.push(failed(&student, &structure, e.code(), &e.to_string()));
                continue;
            }
        };
        report.push(assign_pair(store, &student, &structure, &components, now));
    }
    Ok(report)
}

fn failed(
    student: &Student,
    structure: &FeeStructure,
    code: &str,
    message: &str,
) -> AssignmentOutcome {
    AssignmentOutcome::Failed {
        student_id: student.id.clone(),
        fee_structure_id: structure.id.clone(),
        code: code.to_string(),
        message: message.to_string(),
    }
}

fn assign_pair<S: FeeStore + ?Sized>(
    store: &S,
    student: &Student,
    structure: &FeeStructure,
    components: &[FeeComponent],
    now: DateTime<Utc>,
) -> AssignmentOutcome {
    match store.assignment_exists(&student.id, &structure.id) {
        Ok(true) => {
            return AssignmentOutcome::AlreadyAssigned {
                student_id: student.id.clone(),
                fee_structure_id: structure.id.clone(),
            }
        }
        Ok(false) => {}
        Err(e) => {
            warn!(student_id = %student.id, fee_structure_id = %structure.id, error = %e,
                "assignment lookup failed");
            return failed(student, structure, e.code(), &e.to_string());
        }
    }

    let today = now.date_naive();
    let obligations: Vec<NewObligation> = components
        .iter()
        .map(|c| NewObligation {
            student_id: student.id.clone(),
            fee_structure_component_id: c.id.clone(),
            amount_due: c.amount,
            due_date: schedule::due_date(&Frequency::from_label(&c.frequency), today),
        })
        .collect();
    let assignment = NewAssignment {
        student_id: student.id.clone(),
        fee_structure_id: structure.id.clone(),
        assigned_at: now.to_rfc3339_opts(SecondsFormat::Secs, true),
    };

    match store.assign_with_obligations(&assignment, &obligations) {
        Ok(assignment_id) => {
            info!(student_id = %student.id, student = %student.display_name(),
                fee_structure_id = %structure.id, obligations = obligations.len(),
                "assigned fee structure");
            AssignmentOutcome::Assigned {
                student_id: student.id.clone(),
                fee_structure_id: structure.id.clone(),
                assignment_id,
                obligation_count: obligations.len(),
            }
        }
        // Another trigger got there between the lookup and the insert.
        Err(StoreError::Duplicate { .. }) => AssignmentOutcome::AlreadyAssigned {
            student_id: student.id.clone(),
            fee_structure_id: structure.id.clone(),
        },
        Err(e) => {
            warn!(student_id = %student.id, fee_structure_id = %structure.id, error = %e,
                "failed to assign fee structure");
            failed(student, structure, e.code(), &e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PaymentStatus;
    use crate::store::memory::MemoryStore;
    use chrono::{NaiveDate, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 19, 9, 30, 0).single().expect("time")
    }

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).expect("date")
    }

    struct Fixture {
        store: MemoryStore,
        structure: String,
        tuition: String,
        library: String,
    }

    fn tuition_and_library() -> Fixture {
        let store = MemoryStore::new();
        let tuition_type = store.add_fee_type("Tuition");
        let library_type = store.add_fee_type("Library");
        let structure = store.add_structure("F", "U1", "C1", true);
        let tuition = store.add_component(&structure, &tuition_type, 1000.0, "yearly");
        let library = store.add_component(&structure, &library_type, 50.0, "one-time");
        Fixture {
            store,
            structure,
            tuition,
            library,
        }
    }

    #[test]
    fn matching_student_gets_one_obligation_per_component() {
        let f = tuition_and_library();
        let s = f.store.add_student("S", "U1", "C1", StudentStatus::Active);

        let report = assign_structure(&f.store, &AssignmentPolicy::default(), &f.structure, now())
            .expect("assign");
        assert_eq!(report.assigned_count, 1);
        assert_eq!(report.obligations_created, 2);

        let rows = f.store.obligation_rows();
        assert_eq!(rows.len(), 2);
        let tuition = rows
            .iter()
            .find(|o| o.fee_structure_component_id == f.tuition)
            .expect("tuition row");
        assert_eq!(tuition.student_id, s);
        assert_eq!(tuition.amount_due, 1000.0);
        assert_eq!(tuition.amount_paid, 0.0);
        assert_eq!(tuition.payment_status, PaymentStatus::Pending);
        assert_eq!(tuition.due_date, Some(d(2027, 10, 19)));

        let library = rows
            .iter()
            .find(|o| o.fee_structure_component_id == f.library)
            .expect("library row");
        assert_eq!(library.amount_due, 50.0);
        assert_eq!(library.due_date, Some(d(2026, 11, 19)));
    }

    #[test]
    fn other_programs_never_match() {
        let f = tuition_and_library();
        f.store.add_student("T", "U2", "C2", StudentStatus::Active);
        f.store.add_student("Same uni", "U1", "C2", StudentStatus::Active);

        let report = assign_structure(&f.store, &AssignmentPolicy::default(), &f.structure, now())
            .expect("assign");
        assert_eq!(report.assigned_count, 0);
        assert!(f.store.obligation_rows().is_empty());
    }

    #[test]
    fn rerunning_is_idempotent_across_both_triggers() {
        let f = tuition_and_library();
        let s = f.store.add_student("S", "U1", "C1", StudentStatus::Active);
        let policy = AssignmentPolicy::default();

        assign_structure(&f.store, &policy, &f.structure, now()).expect("first");
        let again = assign_structure(&f.store, &policy, &f.structure, now()).expect("second");
        assert_eq!(again.assigned_count, 0);
        assert_eq!(again.already_assigned_count, 1);

        let via_student = assign_student(&f.store, &policy, &s, now()).expect("student trigger");
        assert_eq!(via_student.assigned_count, 0);
        assert_eq!(via_student.already_assigned_count, 1);

        assert_eq!(f.store.assignment_count(), 1);
        assert_eq!(f.store.obligation_rows().len(), 2);
    }

    #[test]
    fn m_students_and_n_components_make_m_times_n_obligations() {
        let f = tuition_and_library();
        for name in ["A", "B", "C"] {
            f.store.add_student(name, "U1", "C1", StudentStatus::Active);
        }
        let report = assign_structure(&f.store, &AssignmentPolicy::default(), &f.structure, now())
            .expect("assign");
        assert_eq!(report.assigned_count, 3);
        assert_eq!(f.store.assignment_count(), 3);
        assert_eq!(f.store.obligation_rows().len(), 6);
    }

    #[test]
    fn inactive_students_follow_the_policy() {
        let f = tuition_and_library();
        f.store.add_student("Active", "U1", "C1", StudentStatus::Active);
        f.store.add_student("Gone", "U1", "C1", StudentStatus::Inactive);
        f.store.add_student("Done", "U1", "C1", StudentStatus::Completed);

        let strict = AssignmentPolicy {
            include_inactive_students: false,
        };
        let report = assign_structure(&f.store, &strict, &f.structure, now()).expect("strict");
        assert_eq!(report.assigned_count, 1);

        let report = assign_structure(&f.store, &AssignmentPolicy::default(), &f.structure, now())
            .expect("lenient");
        assert_eq!(report.assigned_count, 2);
        assert_eq!(report.already_assigned_count, 1);
    }

    #[test]
    fn one_failing_student_does_not_stop_the_rest() {
        let f = tuition_and_library();
        let a = f.store.add_student("A", "U1", "C1", StudentStatus::Active);
        let b = f.store.add_student("B", "U1", "C1", StudentStatus::Active);
        f.store.fail_assignments_for(&a);

        let report = assign_structure(&f.store, &AssignmentPolicy::default(), &f.structure, now())
            .expect("assign");
        assert_eq!(report.assigned_count, 1);
        assert_eq!(report.failed_count, 1);
        assert!(report.outcomes.iter().any(|o| matches!(
            o,
            AssignmentOutcome::Failed { student_id, .. } if *student_id == a
        )));
        assert!(f
            .store
            .obligation_rows()
            .iter()
            .all(|o| o.student_id == b));
    }

    #[test]
    fn inactive_or_empty_structures_are_rejected() {
        let store = MemoryStore::new();
        let off = store.add_structure("Off", "U1", "C1", false);
        let empty = store.add_structure("Empty", "U1", "C1", true);
        let policy = AssignmentPolicy::default();

        let err = assign_structure(&store, &policy, &off, now()).expect_err("inactive");
        assert_eq!(err.code(), "structure_inactive");
        let err = assign_structure(&store, &policy, &empty, now()).expect_err("empty");
        assert_eq!(err.code(), "no_components");
        let err = assign_structure(&store, &policy, "missing", now()).expect_err("missing");
        assert_eq!(err.code(), "not_found");
    }

    #[test]
    fn new_student_picks_up_existing_active_structures() {
        let f = tuition_and_library();
        let ft = f.store.add_fee_type("Hostel");
        let inactive = f.store.add_structure("Old", "U1", "C1", false);
        f.store.add_component(&inactive, &ft, 10.0, "yearly");
        let s = f.store.add_student("New", "U1", "C1", StudentStatus::Active);

        let report =
            assign_student(&f.store, &AssignmentPolicy::default(), &s, now()).expect("assign");
        assert_eq!(report.assigned_count, 1);
        assert_eq!(f.store.obligation_rows().len(), 2);
    }

    #[test]
    fn new_student_skips_structures_without_components() {
        let f = tuition_and_library();
        f.store.add_structure("Placeholder", "U1", "C1", true);
        let s = f.store.add_student("New", "U1", "C1", StudentStatus::Active);

        let report =
            assign_student(&f.store, &AssignmentPolicy::default(), &s, now()).expect("assign");
        assert_eq!(report.assigned_count, 1);
        assert_eq!(report.failed_count, 0);
        assert_eq!(report.outcomes.len(), 1);
        assert_eq!(f.store.assignment_count(), 1);
    }

    #[test]
    fn later_component_edits_do_not_touch_existing_obligations() {
        let f = tuition_and_library();
        f.store.add_student("S", "U1", "C1", StudentStatus::Active);
        assign_structure(&f.store, &AssignmentPolicy::default(), &f.structure, now())
            .expect("assign");

        f.store.set_component_amount(&f.tuition, 1500.0);
        let rows = f.store.obligation_rows();
        let tuition = rows
            .iter()
            .find(|o| o.fee_structure_component_id == f.tuition)
            .expect("tuition row");
        assert_eq!(tuition.amount_due, 1000.0);
    }
}
