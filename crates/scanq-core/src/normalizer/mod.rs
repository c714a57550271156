pub mod crawl;

use std::time::Duration;

use serde_json::{Map, Value, json};

use crate::models::{
    CrawlRecord, DerivedRecord, ScanRecord, TaskId, TaskRequest, TaskStatus, WhoisRecord,
};
use crate::sandbox::AdapterOutcome;

/// What the executor writes back for one finished tool run.
#[derive(Clone, Debug, PartialEq)]
pub struct NormalizedOutcome {
    pub status: TaskStatus,
    pub result: Value,
    pub derived: Vec<DerivedRecord>,
}

/// Maps a tool outcome onto the uniform result envelope.
///
/// Only a clean exit is SUCCESS. The envelope always carries `status` and the
/// task's subject under its type-specific key (`command`, `url`, `target`,
/// `ip_address_or_domain`).
pub fn normalize(
    task_id: &TaskId,
    request: &TaskRequest,
    outcome: &AdapterOutcome,
) -> NormalizedOutcome {
    match outcome {
        AdapterOutcome::Ok { stdout, stderr } => normalize_ok(task_id, request, stdout, stderr),
        AdapterOutcome::NonZeroExit {
            stdout,
            stderr,
            exit_code,
        } => normalize_nonzero_exit(request, stdout, stderr, *exit_code),
        AdapterOutcome::Timeout { stdout, after, .. } => {
            normalize_timeout(task_id, request, stdout, *after)
        }
        AdapterOutcome::LaunchError { message } => failure(envelope(
            "error",
            request,
            [("error", Value::String(message.clone()))],
        )),
    }
}

fn normalize_ok(
    task_id: &TaskId,
    request: &TaskRequest,
    stdout: &str,
    stderr: &str,
) -> NormalizedOutcome {
    match request {
        TaskRequest::Command { .. } => success(
            envelope(
                "success",
                request,
                [
                    ("stdout", json!(stdout)),
                    ("stderr", json!(stderr)),
                    ("return_code", json!(0)),
                ],
            ),
            Vec::new(),
        ),
        TaskRequest::Crawl { .. } => {
            let entries = crawl::parse_crawl_output(stdout);
            let mut found_url = Vec::new();
            let mut derived = Vec::new();
            for entry in &entries {
                if let Some(url) = crawl::entry_url(entry) {
                    found_url.push(Value::String(url.to_string()));
                    derived.push(DerivedRecord::Crawl(CrawlRecord {
                        task_id: task_id.clone(),
                        url: url.to_string(),
                        content_length: crawl::entry_content_length(entry),
                    }));
                }
            }
            let total_found = entries.len();

            success(
                envelope(
                    "success",
                    request,
                    [
                        ("crawl_results", Value::Array(entries)),
                        ("total_found", json!(total_found)),
                        ("raw_output", json!(stdout)),
                        ("found_url", Value::Array(found_url)),
                    ],
                ),
                derived,
            )
        }
        TaskRequest::Scan { target } => success(
            envelope("success", request, [("scan_result", json!(stdout))]),
            vec![DerivedRecord::Scan(ScanRecord {
                task_id: task_id.clone(),
                target: target.clone(),
                scan_result: stdout.to_string(),
            })],
        ),
        TaskRequest::WhoisLookup {
            ip_address_or_domain,
        } => success(
            envelope("success", request, [("whois_result", json!(stdout))]),
            vec![DerivedRecord::Whois(WhoisRecord {
                task_id: task_id.clone(),
                subject: ip_address_or_domain.clone(),
                whois_result: stdout.to_string(),
                partial: false,
            })],
        ),
    }
}

fn normalize_nonzero_exit(
    request: &TaskRequest,
    stdout: &str,
    stderr: &str,
    exit_code: Option<i32>,
) -> NormalizedOutcome {
    let tool = request.task_type().tool_name();
    let error = match exit_code {
        Some(code) => format!("{tool} exited with code {code}"),
        None => format!("{tool} was terminated by a signal"),
    };
    let output_key = match request {
        TaskRequest::Command { .. } => "stdout",
        TaskRequest::Crawl { .. } => "raw_output",
        TaskRequest::Scan { .. } => "scan_result",
        TaskRequest::WhoisLookup { .. } => "whois_result",
    };

    failure(envelope(
        "error",
        request,
        [
            (output_key, json!(stdout)),
            ("stderr", json!(stderr)),
            ("return_code", json!(exit_code)),
            ("error", Value::String(error)),
        ],
    ))
}

fn normalize_timeout(
    task_id: &TaskId,
    request: &TaskRequest,
    stdout: &str,
    after: Duration,
) -> NormalizedOutcome {
    let error = timeout_message(request.task_type().tool_name(), after);
    let mut result = envelope("timeout", request, [("error", Value::String(error))]);
    let mut derived = Vec::new();

    if let TaskRequest::WhoisLookup {
        ip_address_or_domain,
    } = request
        && !stdout.trim().is_empty()
    {
        if let Value::Object(map) = &mut result {
            map.insert("whois_result".to_string(), json!(stdout));
        }
        derived.push(DerivedRecord::Whois(WhoisRecord {
            task_id: task_id.clone(),
            subject: ip_address_or_domain.clone(),
            whois_result: stdout.to_string(),
            partial: true,
        }));
    }

    NormalizedOutcome {
        status: TaskStatus::Failure,
        result,
        derived,
    }
}

/// `"nmap timeout (5 minutes)"`; budgets that are not whole minutes are given in seconds.
pub fn timeout_message(tool: &str, after: Duration) -> String {
    let secs = after.as_secs();
    let rendered = match secs {
        60 => "1 minute".to_string(),
        secs if secs >= 60 && secs % 60 == 0 => format!("{} minutes", secs / 60),
        1 => "1 second".to_string(),
        secs => format!("{secs} seconds"),
    };
    format!("{tool} timeout ({rendered})")
}

fn envelope<const N: usize>(
    status: &str,
    request: &TaskRequest,
    fields: [(&str, Value); N],
) -> Value {
    let mut map = Map::new();
    map.insert("status".to_string(), Value::String(status.to_string()));
    map.insert(
        request.task_type().subject_key().to_string(),
        Value::String(request.input().to_string()),
    );
    for (key, value) in fields {
        map.insert(key.to_string(), value);
    }
    Value::Object(map)
}

fn success(result: Value, derived: Vec<DerivedRecord>) -> NormalizedOutcome {
    NormalizedOutcome {
        status: TaskStatus::Success,
        result,
        derived,
    }
}

fn failure(result: Value) -> NormalizedOutcome {
    NormalizedOutcome {
        status: TaskStatus::Failure,
        result,
        derived: Vec::new(),
    }
}
