use std::cell::RefCell;
use std::collections::HashSet;

use crate::model::{
    FeeComponent, FeeStructure, NewAssignment, NewObligation, Obligation, ObligationView,
    PaymentStatus, PaymentUpdate, Student, StudentStatus,
};
use crate::store::{FeeStore, ObligationQuery, StoreError, StoreResult};

#[derive(Default)]
struct State {
    students: Vec<Student>,
    structures: Vec<FeeStructure>,
    components: Vec<FeeComponent>,
    fee_types: Vec<(String, String)>,
    assignments: Vec<(String, String, String)>,
    obligations: Vec<Obligation>,
    next_id: u64,
}

impl State {
    fn id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{}", self.next_id)
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: RefCell<State>,
    fail_assign_for: RefCell<HashSet<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_student(
        &self,
        first_name: &str,
        university_id: &str,
        course_id: &str,
        status: StudentStatus,
    ) -> String {
        let mut st = self.state.borrow_mut();
        let id = st.id("stu");
        // Later additions sort as newer.
        let created_at = format!("2026-01-01T00:00:{:02}Z", st.next_id % 60);
        st.students.push(Student {
            id: id.clone(),
            first_name: first_name.to_string(),
            last_name: "Student".to_string(),
            father_name: String::new(),
            mother_name: String::new(),
            date_of_birth: None,
            phone_number: Some("555-0100".to_string()),
            email: None,
            university_id: university_id.to_string(),
            course_id: course_id.to_string(),
            academic_session_id: None,
            status,
            admission_number: Some(format!("ADM-{id}")),
            city: None,
            country: None,
            address: None,
            aadhaar_number: None,
            passport_number: None,
            twelfth_marks: None,
            seat_number: None,
            agent_id: None,
            created_at,
            updated_at: None,
        });
        id
    }

    pub fn add_fee_type(&self, name: &str) -> String {
        let mut st = self.state.borrow_mut();
        let id = st.id("ft");
        st.fee_types.push((id.clone(), name.to_string()));
        id
    }

    pub fn add_structure(
        &self,
        name: &str,
        university_id: &str,
        course_id: &str,
        is_active: bool,
    ) -> String {
        let mut st = self.state.borrow_mut();
        let id = st.id("fs");
        st.structures.push(FeeStructure {
            id: id.clone(),
            name: name.to_string(),
            university_id: university_id.to_string(),
            course_id: course_id.to_string(),
            is_active,
            created_at: "2026-01-01T00:00:00Z".to_string(),
            updated_at: None,
        });
        id
    }

    pub fn add_component(
        &self,
        structure_id: &str,
        fee_type_id: &str,
        amount: f64,
        frequency: &str,
    ) -> String {
        let mut st = self.state.borrow_mut();
        let id = st.id("fc");
        st.components.push(FeeComponent {
            id: id.clone(),
            fee_structure_id: structure_id.to_string(),
            fee_type_id: fee_type_id.to_string(),
            amount,
            frequency: frequency.to_string(),
            created_at: "2026-01-01T00:00:00Z".to_string(),
        });
        id
    }

    pub fn set_component_amount(&self, component_id: &str, amount: f64) {
        let mut st = self.state.borrow_mut();
        if let Some(c) = st.components.iter_mut().find(|c| c.id == component_id) {
            c.amount = amount;
        }
    }

    /// Makes `assign_with_obligations` fail for this student.
    pub fn fail_assignments_for(&self, student_id: &str) {
        self.fail_assign_for
            .borrow_mut()
            .insert(student_id.to_string());
    }

    /// Simulates another writer touching the row.
    pub fn bump_version(&self, obligation_id: &str) {
        let mut st = self.state.borrow_mut();
        if let Some(o) = st.obligations.iter_mut().find(|o| o.id == obligation_id) {
            o.version += 1;
        }
    }

    pub fn assignment_count(&self) -> usize {
        self.state.borrow().assignments.len()
    }

    pub fn obligation_rows(&self) -> Vec<Obligation> {
        self.state.borrow().obligations.clone()
    }

    fn view(st: &State, o: &Obligation) -> Option<ObligationView> {
        let student = st.students.iter().find(|s| s.id == o.student_id)?;
        let component = st
            .components
            .iter()
            .find(|c| c.id == o.fee_structure_component_id)?;
        let structure = st
            .structures
            .iter()
            .find(|s| s.id == component.fee_structure_id);
        let fee_type = st
            .fee_types
            .iter()
            .find(|(id, _)| *id == component.fee_type_id)
            .map(|(_, name)| name.clone());
        Some(ObligationView {
            obligation: o.clone(),
            student_first_name: student.first_name.clone(),
            student_last_name: student.last_name.clone(),
            admission_number: student.admission_number.clone(),
            phone_number: student.phone_number.clone(),
            student_status: student.status,
            student_created_at: student.created_at.clone(),
            university_name: None,
            course_name: None,
            session_name: None,
            fee_type_name: fee_type,
            fee_structure_id: component.fee_structure_id.clone(),
            fee_structure_name: structure.map(|s| s.name.clone()),
            component_amount: component.amount,
            frequency: component.frequency.clone(),
        })
    }
}

impl FeeStore for MemoryStore {
    fn student(&self, id: &str) -> StoreResult<Option<Student>> {
        Ok(self
            .state
            .borrow()
            .students
            .iter()
            .find(|s| s.id == id)
            .cloned())
    }

    fn students_in_program(
        &self,
        university_id: &str,
        course_id: &str,
    ) -> StoreResult<Vec<Student>> {
        Ok(self
            .state
            .borrow()
            .students
            .iter()
            .filter(|s| s.university_id == university_id && s.course_id == course_id)
            .cloned()
            .collect())
    }

    fn fee_structure(&self, id: &str) -> StoreResult<Option<FeeStructure>> {
        Ok(self
            .state
            .borrow()
            .structures
            .iter()
            .find(|s| s.id == id)
            .cloned())
    }

    fn active_structures_for_program(
        &self,
        university_id: &str,
        course_id: &str,
    ) -> StoreResult<Vec<FeeStructure>> {
        Ok(self
            .state
            .borrow()
            .structures
            .iter()
            .filter(|s| {
                s.is_active && s.university_id == university_id && s.course_id == course_id
            })
            .cloned()
            .collect())
    }

    fn components(&self, fee_structure_id: &str) -> StoreResult<Vec<FeeComponent>> {
        Ok(self
            .state
            .borrow()
            .components
            .iter()
            .filter(|c| c.fee_structure_id == fee_structure_id)
            .cloned()
            .collect())
    }

    fn assignment_exists(&self, student_id: &str, fee_structure_id: &str) -> StoreResult<bool> {
        Ok(self
            .state
            .borrow()
            .assignments
            .iter()
            .any(|(_, s, f)| s == student_id && f == fee_structure_id))
    }

    fn assign_with_obligations(
        &self,
        assignment: &NewAssignment,
        obligations: &[NewObligation],
    ) -> StoreResult<String> {
        if self
            .fail_assign_for
            .borrow()
            .contains(&assignment.student_id)
        {
            return Err(StoreError::Unavailable("injected failure".into()));
        }
        if self.assignment_exists(&assignment.student_id, &assignment.fee_structure_id)? {
            return Err(StoreError::Duplicate {
                entity: "student_fee_assignment",
            });
        }
        let mut st = self.state.borrow_mut();
        let id = st.id("asg");
        st.assignments.push((
            id.clone(),
            assignment.student_id.clone(),
            assignment.fee_structure_id.clone(),
        ));
        for o in obligations {
            let oid = st.id("fp");
            st.obligations.push(Obligation {
                id: oid,
                student_id: o.student_id.clone(),
                fee_structure_component_id: o.fee_structure_component_id.clone(),
                amount_due: o.amount_due,
                amount_paid: 0.0,
                payment_status: PaymentStatus::Pending,
                due_date: Some(o.due_date),
                last_payment_date: None,
                version: 0,
                created_at: assignment.assigned_at.clone(),
            });
        }
        Ok(id)
    }

    fn obligation(&self, id: &str) -> StoreResult<Option<ObligationView>> {
        let st = self.state.borrow();
        Ok(st
            .obligations
            .iter()
            .find(|o| o.id == id)
            .and_then(|o| Self::view(&st, o)))
    }

    fn record_payment(
        &self,
        id: &str,
        update: &PaymentUpdate,
        expected_version: i64,
    ) -> StoreResult<i64> {
        let mut st = self.state.borrow_mut();
        let Some(o) = st.obligations.iter_mut().find(|o| o.id == id) else {
            return Err(StoreError::NotFound {
                entity: "fee_payment",
                id: id.to_string(),
            });
        };
        if o.version != expected_version {
            return Err(StoreError::Conflict {
                id: id.to_string(),
                expected: expected_version,
            });
        }
        o.amount_paid = update.amount_paid;
        o.payment_status = update.payment_status;
        o.last_payment_date = update.last_payment_date;
        o.version += 1;
        Ok(o.version)
    }

    fn obligations(&self, query: &ObligationQuery) -> StoreResult<Vec<ObligationView>> {
        let st = self.state.borrow();
        let mut rows: Vec<ObligationView> = st
            .obligations
            .iter()
            .filter(|o| {
                query
                    .student_id
                    .as_deref()
                    .map_or(true, |sid| o.student_id == sid)
            })
            .filter(|o| !query.paid_only || o.amount_paid > 0.0)
            .filter_map(|o| Self::view(&st, o))
            .collect();
        rows.sort_by(|a, b| b.obligation.created_at.cmp(&a.obligation.created_at));
        Ok(rows)
    }
}
