mod common;

use common::{create_student, id_of, seed_catalog, Sidecar};
use serde_json::json;

#[test]
fn agents_and_hostels_crud() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut s = Sidecar::with_workspace(dir.path());

    let agent = id_of(&s.ok(
        "agents.create",
        json!({ "name": "North Star", "contactPerson": "R. Iyer", "email": "r@example.test" }),
    ));
    let agents = s.ok("agents.list", json!({}))["agents"].clone();
    assert_eq!(agents.as_array().expect("agents").len(), 1);
    assert_eq!(agents[0]["status"], "Active");
    assert_eq!(agents[0]["commissionRate"], 0.0);

    s.ok(
        "agents.update",
        json!({ "agentId": agent, "patch": { "status": "inactive", "commissionRate": 7.5 } }),
    );
    let inactive = s.ok("agents.list", json!({ "status": "Inactive" }))["agents"].clone();
    assert_eq!(inactive[0]["commissionRate"], 7.5);
    assert_eq!(
        s.err_code("agents.update", json!({ "agentId": agent, "patch": { "status": "Retired" } })),
        "bad_params"
    );
    assert_eq!(
        s.err_code("agents.create", json!({ "name": "Missing fields" })),
        "bad_params"
    );

    let hostel = id_of(&s.ok(
        "hostels.create",
        json!({ "name": "Block A", "location": "Campus", "capacity": 40, "monthlyRent": 3500 }),
    ));
    assert_eq!(
        s.err_code("hostels.create", json!({ "name": "Bad", "location": "X", "capacity": -1 })),
        "bad_params"
    );
    s.ok(
        "hostels.update",
        json!({ "hostelId": hostel, "patch": { "status": "Maintenance", "currentOccupancy": 12 } }),
    );
    let hostels = s.ok("hostels.list", json!({}))["hostels"].clone();
    assert_eq!(hostels[0]["status"], "Maintenance");
    assert_eq!(hostels[0]["currentOccupancy"], 12);

    s.ok("agents.delete", json!({ "agentId": agent }));
    assert_eq!(s.err_code("agents.delete", json!({ "agentId": agent })), "not_found");
}

#[test]
fn mess_and_office_expenses() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut s = Sidecar::with_workspace(dir.path());
    let hostel = id_of(&s.ok("hostels.create", json!({ "name": "Block B", "location": "Town" })));

    s.ok(
        "messExpenses.create",
        json!({
            "hostelId": hostel,
            "expenseType": "Vegetables",
            "amount": 1200.5,
            "expenseDate": "2026-10-01",
            "category": "food"
        }),
    );
    s.ok(
        "messExpenses.create",
        json!({ "expenseType": "Gas", "amount": 900, "expenseDate": "2026-10-03" }),
    );
    assert_eq!(
        s.err_code(
            "messExpenses.create",
            json!({ "hostelId": "nope", "expenseType": "Gas", "amount": 1, "expenseDate": "2026-10-03" })
        ),
        "not_found"
    );
    assert_eq!(
        s.err_code(
            "messExpenses.create",
            json!({ "expenseType": "Gas", "amount": 1, "expenseDate": "03/10/2026" })
        ),
        "bad_params"
    );

    let all = s.ok("messExpenses.list", json!({}))["messExpenses"].clone();
    assert_eq!(all.as_array().expect("rows").len(), 2);
    assert_eq!(all[0]["expenseDate"], "2026-10-03");
    assert_eq!(all[1]["category"], "Food");
    assert_eq!(all[0]["paymentMethod"], "Cash");
    let for_hostel = s.ok("messExpenses.list", json!({ "hostelId": hostel }))["messExpenses"].clone();
    assert_eq!(for_hostel.as_array().expect("rows").len(), 1);

    for (kind, title) in [("office", "Rent"), ("salary", "October payroll"), ("office", "Stationery")] {
        s.ok(
            "expenses.create",
            json!({ "kind": kind, "title": title, "amount": 100, "expenseDate": "2026-10-05" }),
        );
    }
    let office = s.ok("expenses.list", json!({ "kind": "office" }))["expenses"].clone();
    assert_eq!(office.as_array().expect("rows").len(), 2);
    assert_eq!(
        s.err_code(
            "expenses.create",
            json!({ "kind": "travel", "title": "Taxi", "amount": 10, "expenseDate": "2026-10-05" })
        ),
        "bad_params"
    );
    let id = office[0]["id"].as_str().expect("id").to_string();
    s.ok("expenses.update", json!({ "expenseId": id, "patch": { "status": "Paid" } }));
    assert_eq!(
        s.err_code("expenses.update", json!({ "expenseId": id, "patch": { "color": "red" } })),
        "bad_params"
    );
}

#[test]
fn standalone_collections_ledger() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut s = Sidecar::with_workspace(dir.path());
    let cat = seed_catalog(&mut s);
    let student = create_student(&mut s, "Asha", &cat.u1, &cat.c1);
    let sid = student["student"]["id"].as_str().expect("id").to_string();

    let first = s.ok(
        "collections.create",
        json!({
            "studentId": sid,
            "feeTypeId": cat.tuition,
            "amountPaid": 250,
            "paymentMethod": "Bank Transfer",
            "paymentDate": "2026-10-02"
        }),
    );
    let second = s.ok(
        "collections.create",
        json!({ "studentId": sid, "feeTypeId": cat.library, "amountPaid": 20, "paymentMethod": "cash" }),
    );
    let r1 = first["receiptNumber"].as_str().expect("receipt");
    let r2 = second["receiptNumber"].as_str().expect("receipt");
    assert!(r1.starts_with("RCPT-"));
    assert_ne!(r1, r2);

    let listed = s.ok("collections.list", json!({ "studentId": sid }));
    assert_eq!(listed["collections"].as_array().expect("rows").len(), 2);
    assert_eq!(listed["totalCollected"], 270.0);

    for bad in [
        json!({ "studentId": sid, "feeTypeId": cat.tuition, "amountPaid": 0, "paymentMethod": "cash" }),
        json!({ "studentId": sid, "feeTypeId": cat.tuition, "amountPaid": 5, "paymentMethod": "upi" }),
    ] {
        assert_eq!(s.err_code("collections.create", bad), "bad_params");
    }
    assert_eq!(
        s.err_code(
            "collections.create",
            json!({ "studentId": "ghost", "feeTypeId": cat.tuition, "amountPaid": 5, "paymentMethod": "cash" })
        ),
        "not_found"
    );

    let id = first["id"].as_str().expect("id").to_string();
    s.ok(
        "collections.update",
        json!({ "collectionId": id, "patch": { "amountPaid": 300, "notes": "corrected" } }),
    );
    let listed = s.ok("collections.list", json!({ "studentId": sid }));
    assert_eq!(listed["totalCollected"], 320.0);

    // The ledger is independent of obligations.
    let obligations = s.ok("fees.obligations", json!({ "studentId": sid }));
    assert!(obligations["obligations"].as_array().expect("rows").is_empty());

    s.ok("collections.delete", json!({ "collectionId": id }));
    let listed = s.ok("collections.list", json!({}));
    assert_eq!(listed["collections"].as_array().expect("rows").len(), 1);
}
