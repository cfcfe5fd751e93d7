use anyhow::{anyhow, Context};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::fees::reports::{FeeReport, PaymentHistory};

const MANIFEST_ENTRY: &str = "manifest.json";
const OBLIGATIONS_ENTRY: &str = "ledgers/obligations.csv";
const PAYMENTS_ENTRY: &str = "ledgers/payments.csv";
pub const LEDGER_FORMAT_V1: &str = "feedesk-ledgers-v1";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    pub name: String,
    pub rows: usize,
    pub sha256: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Manifest {
    format: String,
    app_version: String,
    exported_at: String,
    total_due: f64,
    total_paid: f64,
    entries: Vec<LedgerEntry>,
}

#[derive(Debug, Clone)]
pub struct ArchiveSummary {
    pub entries: Vec<LedgerEntry>,
    pub total_due: f64,
    pub total_paid: f64,
}

#[derive(Debug, Clone)]
pub struct VerifySummary {
    pub exported_at: String,
    pub entries: Vec<LedgerEntry>,
    pub mismatched: Vec<String>,
}

fn sha256_hex(bytes: &[u8]) -> String {
    Sha256::digest(bytes)
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

fn is_zip_file(path: &Path) -> anyhow::Result<bool> {
    let mut f = File::open(path)
        .with_context(|| format!("failed to open input file {}", path.to_string_lossy()))?;
    let mut sig = [0u8; 4];
    let read = f.read(&mut sig).context("failed to read file signature")?;
    Ok(read == 4 && sig == [0x50, 0x4B, 0x03, 0x04])
}

pub fn write_ledger_archive(
    out_path: &Path,
    report: &FeeReport,
    history: &PaymentHistory,
    exported_at: DateTime<Utc>,
) -> anyhow::Result<ArchiveSummary> {
    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.to_string_lossy()))?;
    }
    let out_file = File::create(out_path).with_context(|| {
        format!(
            "failed to create output file {}",
            out_path.to_string_lossy()
        )
    })?;
    let mut zip = ZipWriter::new(out_file);
    let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);

    let ledgers = [
        (OBLIGATIONS_ENTRY, report.to_csv(true), report.rows.len()),
        (PAYMENTS_ENTRY, history.to_csv(true), history.rows.len()),
    ];
    let mut entries = Vec::with_capacity(ledgers.len());
    for (name, text, rows) in ledgers {
        zip.start_file(name, opts)
            .with_context(|| format!("failed to start {name}"))?;
        zip.write_all(text.as_bytes())
            .with_context(|| format!("failed to write {name}"))?;
        entries.push(LedgerEntry {
            name: name.to_string(),
            rows,
            sha256: sha256_hex(text.as_bytes()),
        });
    }

    let manifest = Manifest {
        format: LEDGER_FORMAT_V1.to_string(),
        app_version: env!("CARGO_PKG_VERSION").to_string(),
        exported_at: exported_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        total_due: report.total_due,
        total_paid: history.total_collected,
        entries: entries.clone(),
    };
    zip.start_file(MANIFEST_ENTRY, opts)
        .context("failed to start manifest entry")?;
    zip.write_all(
        serde_json::to_string_pretty(&manifest)
            .context("failed to serialize manifest")?
            .as_bytes(),
    )
    .context("failed to write manifest entry")?;
    zip.finish().context("failed to finalize ledger archive")?;

    Ok(ArchiveSummary {
        entries,
        total_due: manifest.total_due,
        total_paid: manifest.total_paid,
    })
}

/// Re-hashes every ledger named in the manifest. A missing entry is an error;
/// altered content is reported in `mismatched`.
pub fn verify_ledger_archive(in_path: &Path) -> anyhow::Result<VerifySummary> {
    if !is_zip_file(in_path)? {
        return Err(anyhow!(
            "not a ledger archive: {}",
            in_path.to_string_lossy()
        ));
    }
    let in_file = File::open(in_path)
        .with_context(|| format!("failed to open archive {}", in_path.to_string_lossy()))?;
    let mut archive = ZipArchive::new(in_file).context("invalid zip archive")?;

    let mut manifest_text = String::new();
    archive
        .by_name(MANIFEST_ENTRY)
        .context("archive missing manifest.json")?
        .read_to_string(&mut manifest_text)
        .context("failed to read manifest.json")?;
    let manifest: Manifest =
        serde_json::from_str(&manifest_text).context("manifest.json is invalid")?;
    if manifest.format != LEDGER_FORMAT_V1 {
        return Err(anyhow!("unsupported archive format: {}", manifest.format));
    }

    let mut mismatched = Vec::new();
    for entry in &manifest.entries {
        let mut bytes = Vec::new();
        archive
            .by_name(&entry.name)
            .with_context(|| format!("archive missing {}", entry.name))?
            .read_to_end(&mut bytes)
            .with_context(|| format!("failed to read {}", entry.name))?;
        if !entry.sha256.eq_ignore_ascii_case(&sha256_hex(&bytes)) {
            mismatched.push(entry.name.clone());
        }
    }

    Ok(VerifySummary {
        exported_at: manifest.exported_at,
        entries: manifest.entries,
        mismatched,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fees::assign::{assign_structure, AssignmentPolicy};
    use crate::fees::collect::{collect_payments, CollectOptions, PaymentItem};
    use crate::fees::reports::{fee_report, payment_history, ReportFilter};
    use crate::model::StudentStatus;
    use crate::store::memory::MemoryStore;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 19, 9, 30, 0)
            .single()
            .expect("time")
    }

    fn ledgers() -> (FeeReport, PaymentHistory) {
        let store = MemoryStore::new();
        let tuition = store.add_fee_type("Tuition");
        let fs = store.add_structure("MBBS 2026", "U1", "C1", true);
        store.add_component(&fs, &tuition, 1000.0, "yearly");
        let asha = store.add_student("Asha", "U1", "C1", StudentStatus::Active);
        store.add_student("Ravi", "U1", "C1", StudentStatus::Active);
        assign_structure(&store, &AssignmentPolicy::default(), &fs, now()).expect("assign");
        let obligation = store
            .obligation_rows()
            .into_iter()
            .find(|o| o.student_id == asha)
            .expect("obligation");
        collect_payments(
            &store,
            &asha,
            &[PaymentItem {
                obligation_id: obligation.id,
                amount: 250.0,
                expected_version: None,
            }],
            &CollectOptions::default(),
            now(),
        )
        .expect("collect");
        let filter = ReportFilter::default();
        (
            fee_report(&store, &filter).expect("report"),
            payment_history(&store, &filter).expect("history"),
        )
    }

    fn entry_text(path: &Path, name: &str) -> String {
        let mut archive = ZipArchive::new(File::open(path).expect("open")).expect("zip");
        let mut text = String::new();
        archive
            .by_name(name)
            .expect("entry")
            .read_to_string(&mut text)
            .expect("read");
        text
    }

    #[test]
    fn archive_holds_both_ledgers_and_verifies() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("ledgers.zip");
        let (report, history) = ledgers();

        let summary = write_ledger_archive(&path, &report, &history, now()).expect("write");
        assert_eq!(summary.total_due, 2000.0);
        assert_eq!(summary.total_paid, 250.0);
        assert_eq!(summary.entries[0].name, OBLIGATIONS_ENTRY);
        assert_eq!(summary.entries[0].rows, 2);
        assert_eq!(summary.entries[1].rows, 1);

        let payments = entry_text(&path, PAYMENTS_ENTRY);
        assert!(payments.lines().nth(1).is_some_and(|l| l.contains("250.00")));
        let manifest: serde_json::Value =
            serde_json::from_str(&entry_text(&path, MANIFEST_ENTRY)).expect("manifest json");
        assert_eq!(manifest["format"], LEDGER_FORMAT_V1);
        assert_eq!(manifest["exportedAt"], "2026-10-19T09:30:00Z");

        let verified = verify_ledger_archive(&path).expect("verify");
        assert!(verified.mismatched.is_empty());
        assert_eq!(verified.entries, summary.entries);
    }

    #[test]
    fn edited_ledger_is_reported() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("edited.zip");
        let (report, history) = ledgers();
        let summary = write_ledger_archive(&path, &report, &history, now()).expect("write");

        // Same manifest, payments ledger altered after the fact.
        let edited = dir.path().join("edited-again.zip");
        {
            let mut zip = ZipWriter::new(File::create(&edited).expect("create"));
            let opts = FileOptions::default();
            for name in [OBLIGATIONS_ENTRY, MANIFEST_ENTRY] {
                zip.start_file(name, opts).expect("start");
                zip.write_all(entry_text(&path, name).as_bytes()).expect("write");
            }
            zip.start_file(PAYMENTS_ENTRY, opts).expect("start");
            zip.write_all(b"Date\n").expect("write");
            zip.finish().expect("finish");
        }

        let verified = verify_ledger_archive(&edited).expect("verify");
        assert_eq!(verified.mismatched, vec![PAYMENTS_ENTRY.to_string()]);
        assert_eq!(verified.entries.len(), summary.entries.len());
    }

    #[test]
    fn foreign_files_are_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let plain = dir.path().join("report.csv");
        std::fs::write(&plain, "Student Name\n").expect("write");
        let err = verify_ledger_archive(&plain).expect_err("not a zip");
        assert!(err.to_string().contains("not a ledger archive"));

        let other = dir.path().join("other.zip");
        {
            let mut zip = ZipWriter::new(File::create(&other).expect("create"));
            zip.start_file(MANIFEST_ENTRY, FileOptions::default())
                .expect("start");
            zip.write_all(
                br#"{"format":"something-else","appVersion":"0","exportedAt":"","totalDue":0,"totalPaid":0,"entries":[]}"#,
            )
            .expect("write");
            zip.finish().expect("finish");
        }
        let err = verify_ledger_archive(&other).expect_err("other format");
        assert!(err.to_string().contains("unsupported archive format"));
    }
}
