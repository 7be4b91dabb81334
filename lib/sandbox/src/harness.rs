//! Out-of-process script evaluation (§4.4).
//!
//! The body is written to a private temporary directory alongside a small
//! runner harness script for the target language; the child process has its
//! rlimits set before it evaluates the body, and the harness writes a
//! structured result envelope to stdout. This mode is the one that can
//! actually enforce `max_cpu_time`/`max_memory_bytes`/`max_open_files`/
//! `max_processes`, which the in-process evaluator has no OS-level way to
//! bound.

use crate::caps::SandboxCaps;
use crate::error::SandboxError;
use forgeline_workflow::ScriptLanguage;
use nix::sys::resource::{setrlimit, Resource};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::io::Write;
use std::process::Stdio;
use tempfile::TempDir;
use tokio::process::Command;

/// The structured envelope the runner harness writes to stdout.
#[derive(Debug, Deserialize)]
struct ResultEnvelope {
    ok: bool,
    value: Option<JsonValue>,
    error: Option<String>,
}

fn interpreter_for(language: ScriptLanguage) -> &'static str {
    match language {
        ScriptLanguage::JavaScript => "node",
        ScriptLanguage::Python => "python3",
    }
}

fn harness_source(language: ScriptLanguage, body: &str) -> String {
    match language {
        ScriptLanguage::JavaScript => format!(
            "const input = JSON.parse(process.argv[2]);\n\
             let result;\n\
             try {{\n  result = (function(input) {{ {body} }})(input);\n  \
             process.stdout.write(JSON.stringify({{ok: true, value: result}}));\n\
             }} catch (err) {{\n  \
             process.stdout.write(JSON.stringify({{ok: false, error: String(err)}}));\n}}\n"
        ),
        ScriptLanguage::Python => format!(
            "import json, sys\n\
             input = json.loads(sys.argv[1])\n\
             try:\n    def __node_body(input):\n        {indented}\n    result = __node_body(input)\n    \
             print(json.dumps({{'ok': True, 'value': result}}))\n\
             except Exception as err:\n    print(json.dumps({{'ok': False, 'error': str(err)}}))\n",
            indented = body.replace('\n', "\n        "),
        ),
    }
}

/// Sets the caps-derived rlimits on the current process.
///
/// Must be called from the child side of a fork, before exec — this is
/// invoked via [`std::os::unix::process::CommandExt::pre_exec`].
///
/// # Safety
///
/// Called between `fork` and `exec`; only async-signal-safe operations are
/// permitted, which `setrlimit` is.
unsafe fn apply_rlimits(caps: &SandboxCaps) -> std::io::Result<()> {
    let as_limit = caps.max_memory_bytes;
    setrlimit(Resource::RLIMIT_AS, as_limit, as_limit)
        .map_err(|e| std::io::Error::other(format!("setrlimit(RLIMIT_AS): {e}")))?;
    setrlimit(Resource::RLIMIT_CPU, caps.max_cpu_time.as_secs(), caps.max_cpu_time.as_secs())
        .map_err(|e| std::io::Error::other(format!("setrlimit(RLIMIT_CPU): {e}")))?;
    setrlimit(Resource::RLIMIT_NOFILE, caps.max_open_files, caps.max_open_files)
        .map_err(|e| std::io::Error::other(format!("setrlimit(RLIMIT_NOFILE): {e}")))?;
    setrlimit(Resource::RLIMIT_NPROC, caps.max_processes, caps.max_processes)
        .map_err(|e| std::io::Error::other(format!("setrlimit(RLIMIT_NPROC): {e}")))?;
    Ok(())
}

/// Runs `body` out-of-process under `caps`, returning the harness's result
/// value.
///
/// # Errors
///
/// Returns [`SandboxError::HarnessFailure`] if the child fails to start or
/// its envelope doesn't parse, [`SandboxError::CapExceeded`] if it exceeds
/// `max_wall_clock`, or a wrapped harness-reported error.
pub async fn run(
    language: ScriptLanguage,
    body: &str,
    input: &JsonValue,
    caps: &SandboxCaps,
) -> Result<JsonValue, SandboxError> {
    let workdir = TempDir::new()
        .map_err(|e| SandboxError::HarnessFailure { detail: format!("tempdir: {e}") })?;

    let script_path = workdir.path().join(match language {
        ScriptLanguage::JavaScript => "runner.js",
        ScriptLanguage::Python => "runner.py",
    });
    let source = harness_source(language, body);
    std::fs::File::create(&script_path)
        .and_then(|mut f| f.write_all(source.as_bytes()))
        .map_err(|e| SandboxError::HarnessFailure { detail: format!("write harness: {e}") })?;

    let input_arg = serde_json::to_string(input).unwrap_or_else(|_| "null".to_string());
    let caps_for_child = caps.clone();

    let mut command = Command::new(interpreter_for(language));
    command
        .arg(&script_path)
        .arg(&input_arg)
        .current_dir(workdir.path())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    // SAFETY: apply_rlimits only calls setrlimit, which is async-signal-safe.
    unsafe {
        command.pre_exec(move || apply_rlimits(&caps_for_child));
    }

    let child = command
        .spawn()
        .map_err(|e| SandboxError::HarnessFailure { detail: format!("spawn: {e}") })?;

    let output = tokio::time::timeout(caps.max_wall_clock, child.wait_with_output())
        .await
        .map_err(|_| SandboxError::CapExceeded {
            cap: "max_wall_clock".to_string(),
            detail: format!("harness did not finish within {:?}", caps.max_wall_clock),
        })?
        .map_err(|e| SandboxError::HarnessFailure { detail: format!("wait: {e}") })?;

    if output.stdout.len() as u64 > caps.max_output_bytes {
        return Err(SandboxError::CapExceeded {
            cap: "max_output_bytes".to_string(),
            detail: format!("harness produced {} bytes", output.stdout.len()),
        });
    }

    let envelope: ResultEnvelope = serde_json::from_slice(&output.stdout).map_err(|e| {
        SandboxError::HarnessFailure {
            detail: format!("malformed result envelope: {e} (stderr: {})", String::from_utf8_lossy(&output.stderr)),
        }
    })?;

    if envelope.ok {
        Ok(envelope.value.unwrap_or(JsonValue::Null))
    } else {
        Err(SandboxError::HarnessFailure { detail: envelope.error.unwrap_or_default() })
    }
}
