#![allow(dead_code)]

use serde_json::{json, Value};
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

pub struct Sidecar {
    child: Child,
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
    next_id: u64,
}

impl Sidecar {
    pub fn spawn() -> Self {
        let exe = env!("CARGO_BIN_EXE_feedeskd");
        let mut child = Command::new(exe)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .expect("spawn feedeskd");
        let stdin = child.stdin.take().expect("child stdin");
        let stdout = child.stdout.take().expect("child stdout");
        Sidecar {
            child,
            stdin,
            reader: BufReader::new(stdout),
            next_id: 0,
        }
    }

    /// Spawns the daemon and opens a fresh workspace in `dir`.
    pub fn with_workspace(dir: &std::path::Path) -> Self {
        let mut s = Self::spawn();
        s.ok("workspace.select", json!({ "path": dir.to_string_lossy() }));
        s
    }

    pub fn write_line(&mut self, line: &str) -> Value {
        writeln!(self.stdin, "{}", line).expect("write request");
        self.stdin.flush().expect("flush request");
        let mut out = String::new();
        self.reader.read_line(&mut out).expect("read response line");
        assert!(!out.trim().is_empty(), "empty response for {}", line);
        serde_json::from_str(out.trim()).expect("parse response json")
    }

    pub fn call(&mut self, method: &str, params: Value) -> Value {
        self.next_id += 1;
        let id = self.next_id.to_string();
        let payload = json!({ "id": id, "method": method, "params": params });
        let value = self.write_line(&payload.to_string());
        assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id.as_str()));
        value
    }

    pub fn ok(&mut self, method: &str, params: Value) -> Value {
        let resp = self.call(method, params);
        assert_eq!(
            resp.get("ok").and_then(|v| v.as_bool()),
            Some(true),
            "{} failed: {}",
            method,
            resp
        );
        resp["result"].clone()
    }

    /// Calls `method` expecting a failure and returns the error code.
    pub fn err_code(&mut self, method: &str, params: Value) -> String {
        let resp = self.call(method, params);
        assert_eq!(
            resp.get("ok").and_then(|v| v.as_bool()),
            Some(false),
            "{} unexpectedly succeeded: {}",
            method,
            resp
        );
        resp["error"]["code"].as_str().unwrap_or("").to_string()
    }
}

impl Drop for Sidecar {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

pub fn id_of(v: &Value) -> String {
    v["id"].as_str().expect("id").to_string()
}

/// Seeds a university, a course and the fee types used across tests.
pub struct Catalog {
    pub u1: String,
    pub u2: String,
    pub c1: String,
    pub c2: String,
    pub tuition: String,
    pub library: String,
}

pub fn seed_catalog(s: &mut Sidecar) -> Catalog {
    let u1 = id_of(&s.ok("universities.create", json!({ "name": "University One" })));
    let u2 = id_of(&s.ok("universities.create", json!({ "name": "University Two" })));
    let c1 = id_of(&s.ok("courses.create", json!({ "name": "MBBS" })));
    let c2 = id_of(&s.ok("courses.create", json!({ "name": "BDS" })));
    let tuition = id_of(&s.ok(
        "feeTypes.create",
        json!({ "name": "Tuition", "category": "Tuition", "frequency": "yearly" }),
    ));
    let library = id_of(&s.ok(
        "feeTypes.create",
        json!({ "name": "Library", "category": "Library" }),
    ));
    Catalog {
        u1,
        u2,
        c1,
        c2,
        tuition,
        library,
    }
}

pub fn create_student(s: &mut Sidecar, first: &str, university: &str, course: &str) -> Value {
    s.ok(
        "students.create",
        json!({
            "firstName": first,
            "lastName": "Student",
            "phoneNumber": "555-0100",
            "universityId": university,
            "courseId": course
        }),
    )
}
