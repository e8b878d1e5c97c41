use std::collections::HashMap;
use std::sync::Mutex;

use once_cell::sync::OnceCell;

use crate::database::constants::DEFAULT_DB_PATH;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum CastOutcome {
    Confirmed,
    Rejected,
    AlreadyVoted,
    Invalid,
    Conflict,
}

pub struct Metrics {
    cast_total: HashMap<CastOutcome, u64>,
    integrity_conflicts_total: u64,
    ledger_failures_total: HashMap<&'static str, u64>,
}

static METRICS: OnceCell<Mutex<Metrics>> = OnceCell::new();

fn get() -> &'static Mutex<Metrics> {
    METRICS.get_or_init(|| {
        Mutex::new(Metrics {
            cast_total: HashMap::new(),
            integrity_conflicts_total: 0,
            ledger_failures_total: HashMap::new(),
        })
    })
}

pub fn record_cast_outcome(outcome: CastOutcome) {
    let mut m = get().lock().expect("metrics mutex poisoned");
    *m.cast_total.entry(outcome).or_insert(0) += 1;
}

pub fn record_integrity_conflict() {
    let mut m = get().lock().expect("metrics mutex poisoned");
    m.integrity_conflicts_total += 1;
}

pub fn record_ledger_failure(call: &'static str) {
    let mut m = get().lock().expect("metrics mutex poisoned");
    *m.ledger_failures_total.entry(call).or_insert(0) += 1;
}

pub fn snapshot_as_json() -> serde_json::Value {
    use serde_json::json;
    let m = get().lock().expect("metrics mutex poisoned");

    let casts: Vec<serde_json::Value> = m
        .cast_total
        .iter()
        .map(|(outcome, count)| {
            json!({
                "outcome": match outcome {
                    CastOutcome::Confirmed => "confirmed",
                    CastOutcome::Rejected => "rejected",
                    CastOutcome::AlreadyVoted => "already_voted",
                    CastOutcome::Invalid => "invalid",
                    CastOutcome::Conflict => "conflict",
                },
                "count": count
            })
        })
        .collect();

    let ledger_failures: Vec<serde_json::Value> = m
        .ledger_failures_total
        .iter()
        .map(|(call, count)| json!({"call": call, "count": count}))
        .collect();

    let (db_path, db_bytes) = storage_db_info();

    json!({
        "cast_total": casts,
        "integrity_conflicts_total": m.integrity_conflicts_total,
        "ledger_failures_total": ledger_failures,
        "storage": {
            "db_path": db_path,
            "db_size_bytes": db_bytes,
        }
    })
}

fn storage_db_info() -> (String, Option<u64>) {
    let db_path = std::env::var("DB_PATH").unwrap_or_else(|_| DEFAULT_DB_PATH.to_string());
    let db_bytes = std::fs::metadata(&db_path)
        .ok()
        .and_then(|m| if m.is_file() { Some(m.len()) } else { None });

    (db_path, db_bytes)
}
