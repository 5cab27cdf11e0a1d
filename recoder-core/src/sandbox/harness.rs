//! Python-side harness and its line protocol.
//!
//! The harness reads one JSON request from stdin, applies limits, prints a
//! ready line, runs the source with output captured, then prints one report
//! line and hard-exits so stray threads cannot keep the process alive.
//!
//! Both protocol lines carry a per-run nonce the executed code never sees in
//! its namespace, so anything it writes to fd 1 is stray output. The report
//! is kept under `report_limit` encoded bytes by the harness itself.

use super::capture::{Bounded, Sink};
use super::ExecFailure;
use serde::{Deserialize, Serialize};

pub(crate) const READY_SENTINEL: &str = "__RECODER_READY__";
pub(crate) const REPORT_SENTINEL: &str = "__RECODER_REPORT__";
/// Common prefix of every protocol line
const PROTOCOL_PREFIX: &[u8] = b"__RECODER_";

pub(crate) const HARNESS: &str = r#"
import builtins
import contextlib
import io
import json
import os
import sys
import traceback

_SOURCE_NAME = "<solution>"

request = json.loads(sys.stdin.read())
limits = request.get("limits") or {}
output_limit = int(limits.get("output_limit") or 65536)
report_limit = int(limits.get("report_limit") or 4 * output_limit + 16384)
workdir = os.path.realpath(os.getcwd())


def _make_emit(nonce, stream):
    def emit(tag, obj=None):
        line = tag + " " + nonce
        if obj is not None:
            line += " " + json.dumps(obj, ensure_ascii=False)
        stream.write((line + "\n").encode("utf-8", "replace"))
        stream.flush()

    return emit


_emit = _make_emit(request.pop("nonce", ""), sys.stdout.buffer)


def _encoded_len(obj):
    return len(json.dumps(obj, ensure_ascii=False).encode("utf-8", "replace"))


def _clip(text, limit=None):
    limit = output_limit if limit is None else limit
    data = text.encode("utf-8", "replace")
    if len(data) <= limit:
        return text
    kept = data[:limit].decode("utf-8", "ignore")
    return kept + "\n[truncated %d bytes]" % (len(data) - limit)


try:
    import resource

    if limits.get("memory_bytes"):
        resource.setrlimit(resource.RLIMIT_AS, (limits["memory_bytes"], limits["memory_bytes"]))
    if limits.get("cpu_secs"):
        resource.setrlimit(resource.RLIMIT_CPU, (limits["cpu_secs"], limits["cpu_secs"]))
except (ImportError, ValueError, OSError):
    pass

if not limits.get("allow_network"):
    import socket

    def _network_disabled(*args, **kwargs):
        raise PermissionError("network access is disabled in the sandbox")

    socket.socket.connect = _network_disabled
    socket.socket.connect_ex = _network_disabled
    socket.socket.bind = _network_disabled
    socket.create_connection = _network_disabled
    socket.getaddrinfo = _network_disabled

if not limits.get("allow_filesystem"):
    _real_open = builtins.open
    _readable_roots = sorted(
        {os.path.realpath(p) for p in [sys.prefix, sys.base_prefix, sys.exec_prefix] + sys.path if p}
    )

    def _within(path, root):
        return path == root or path.startswith(root.rstrip(os.sep) + os.sep)

    def _sandboxed_open(file, mode="r", *args, **kwargs):
        if not isinstance(file, int):
            path = os.fsdecode(os.path.realpath(os.fspath(file)))
            writing = any(flag in mode for flag in "wax+")
            allowed = _within(path, workdir) or (
                not writing and any(_within(path, root) for root in _readable_roots)
            )
            if not allowed:
                raise PermissionError("file access outside the sandbox is disabled: %r" % (file,))
        return _real_open(file, mode, *args, **kwargs)

    builtins.open = _sandboxed_open


def _failure(exc):
    tb = exc.__traceback__
    while tb is not None and tb.tb_frame.f_code.co_filename != _SOURCE_NAME:
        tb = tb.tb_next
    line = None
    if isinstance(exc, SyntaxError):
        line = exc.lineno
    else:
        walk = tb
        while walk is not None:
            if walk.tb_frame.f_code.co_filename == _SOURCE_NAME:
                line = walk.tb_lineno
            walk = walk.tb_next
    return {
        "ok": False,
        "error_type": type(exc).__name__,
        "message": str(exc),
        "traceback": _clip("".join(traceback.format_exception(type(exc), exc, tb))),
        "line": line,
    }


_emit("__RECODER_READY__")
captured_out, captured_err = io.StringIO(), io.StringIO()
report = {"ok": True}
try:
    with contextlib.redirect_stdout(captured_out), contextlib.redirect_stderr(captured_err):
        code = compile(request["source"], _SOURCE_NAME, "exec")
        if request.get("mode") == "exec":
            exec(code, {"__name__": "__main__", "__builtins__": builtins})
except SystemExit as exc:
    if exc.code not in (None, 0):
        report = _failure(exc)
except BaseException as exc:
    report = _failure(exc)

report["stdout"] = _clip(captured_out.getvalue())
report["stderr"] = _clip(captured_err.getvalue())
budget = output_limit
while _encoded_len(report) > report_limit and budget > 64:
    budget //= 2
    for key in ("stdout", "stderr", "traceback", "message"):
        if isinstance(report.get(key), str):
            report[key] = _clip(report[key], budget)
_emit("__RECODER_REPORT__", report)
os._exit(0)
"#;

/// Request sent to the harness on stdin
#[derive(Debug, Serialize)]
pub(crate) struct HarnessRequest<'a> {
    pub nonce: &'a str,
    pub mode: super::ExecMode,
    pub source: &'a str,
    pub limits: HarnessLimits,
}

#[derive(Debug, Serialize)]
pub(crate) struct HarnessLimits {
    pub memory_bytes: Option<u64>,
    pub cpu_secs: Option<u64>,
    pub output_limit: usize,
    /// Encoded size the report line must stay under
    pub report_limit: usize,
    pub allow_network: bool,
    pub allow_filesystem: bool,
}

/// Report printed by the harness after the source ran
#[derive(Debug, Deserialize)]
pub(crate) struct HarnessReport {
    pub ok: bool,
    #[serde(default)]
    pub error_type: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub traceback: Option<String>,
    #[serde(default)]
    pub line: Option<u32>,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
}

impl HarnessReport {
    pub fn failure(&self) -> Option<ExecFailure> {
        if self.ok {
            return None;
        }
        Some(ExecFailure {
            error_type: self.error_type.clone().unwrap_or_else(|| "Exception".into()),
            message: self.message.clone().unwrap_or_default(),
            traceback: self.traceback.clone().unwrap_or_default(),
            line: self.line,
        })
    }
}

/// What the harness printed on its real stdout
#[derive(Debug)]
pub(crate) struct HarnessOutput {
    pub ready: bool,
    pub report: Option<Result<HarnessReport, serde_json::Error>>,
    /// Everything else written straight to the file descriptor, bypassing capture
    pub stray: String,
    /// Bytes of stray output dropped past the limit
    pub truncated: usize,
}

/// Splits the harness stdout into protocol lines and bounded stray output
/// while it streams in. Protocol lines get their own, larger bound so a
/// chatty program cannot push the report out.
#[derive(Debug)]
pub(crate) struct StdoutCapture {
    line_limit: usize,
    line: Vec<u8>,
    line_overflow: bool,
    protocol: Vec<String>,
    stray: Bounded,
}

impl StdoutCapture {
    pub fn new(stray_limit: usize, line_limit: usize) -> Self {
        Self {
            line_limit,
            line: Vec::new(),
            line_overflow: false,
            protocol: Vec::new(),
            stray: Bounded::new(stray_limit),
        }
    }

    fn extend_line(&mut self, part: &[u8]) {
        if self.line_overflow {
            self.stray.accept(part);
            return;
        }
        let room = self.line_limit.saturating_sub(self.line.len());
        if part.len() <= room {
            self.line.extend_from_slice(part);
            return;
        }
        // Too long for a protocol line: everything so far is stray.
        self.line_overflow = true;
        let line = std::mem::take(&mut self.line);
        self.stray.accept(&line);
        self.stray.accept(part);
    }

    fn end_line(&mut self) {
        let overflowed = std::mem::replace(&mut self.line_overflow, false);
        let line = std::mem::take(&mut self.line);
        if !overflowed && line.starts_with(PROTOCOL_PREFIX) {
            self.protocol.push(String::from_utf8_lossy(&line).into_owned());
            return;
        }
        self.stray.accept(&line);
        self.stray.accept(b"\n");
    }

    /// Classify what was read, trusting only lines that carry `nonce`
    pub fn finish(mut self, nonce: &str) -> HarnessOutput {
        if !self.line.is_empty() || self.line_overflow {
            self.end_line();
        }

        let ready_line = format!("{} {}", READY_SENTINEL, nonce);
        let report_prefix = format!("{} {} ", REPORT_SENTINEL, nonce);
        let mut ready = false;
        let mut report = None;
        for line in std::mem::take(&mut self.protocol) {
            if line == ready_line {
                ready = true;
            } else if let Some(json) = line.strip_prefix(&report_prefix) {
                report = Some(serde_json::from_str::<HarnessReport>(json));
            } else {
                self.stray.accept(line.as_bytes());
                self.stray.accept(b"\n");
            }
        }

        HarnessOutput {
            ready,
            report,
            stray: self.stray.to_string_lossy(),
            truncated: self.stray.truncated(),
        }
    }
}

impl Sink for StdoutCapture {
    fn accept(&mut self, chunk: &[u8]) {
        let mut rest = chunk;
        while let Some(pos) = rest.iter().position(|b| *b == b'\n') {
            self.extend_line(&rest[..pos]);
            self.end_line();
            rest = &rest[pos + 1..];
        }
        self.extend_line(rest);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NONCE: &str = "0f3a9c";

    fn capture(stdout: &str) -> HarnessOutput {
        let mut capture = StdoutCapture::new(1024, 4096);
        capture.accept(stdout.as_bytes());
        capture.finish(NONCE)
    }

    fn ready() -> String {
        format!("{} {}\n", READY_SENTINEL, NONCE)
    }

    fn report_line(report: serde_json::Value) -> String {
        format!("{} {} {}\n", REPORT_SENTINEL, NONCE, report)
    }

    #[test]
    fn test_harness_uses_same_sentinels() {
        assert!(HARNESS.contains(READY_SENTINEL));
        assert!(HARNESS.contains(REPORT_SENTINEL));
    }

    #[test]
    fn test_parse_successful_run() {
        let out = format!(
            "{}raw fd write\n{}",
            ready(),
            report_line(serde_json::json!({"ok": true, "stdout": "3\n", "stderr": ""}))
        );
        let parsed = capture(&out);
        assert!(parsed.ready);
        assert_eq!(parsed.stray, "raw fd write\n");
        let report = parsed.report.unwrap().unwrap();
        assert!(report.ok);
        assert_eq!(report.stdout, "3\n");
        assert!(report.failure().is_none());
    }

    #[test]
    fn test_parse_failed_run() {
        let out = ready()
            + &report_line(serde_json::json!({
                "ok": false,
                "error_type": "ModuleNotFoundError",
                "message": "No module named 'nope'",
                "traceback": "Traceback ...",
                "line": 1,
                "stdout": "",
                "stderr": ""
            }));
        let failure = capture(&out).report.unwrap().unwrap().failure().unwrap();
        assert_eq!(failure.error_type, "ModuleNotFoundError");
        assert_eq!(failure.line, Some(1));
    }

    #[test]
    fn test_parse_crash_without_report() {
        let parsed = capture(&ready());
        assert!(parsed.ready);
        assert!(parsed.report.is_none());

        assert!(!capture("").ready);
    }

    #[test]
    fn test_lines_without_the_nonce_are_stray() {
        let out = format!(
            "{}{} {{\"ok\": true}}\n{} other {{\"ok\": true}}\n",
            ready(),
            REPORT_SENTINEL,
            REPORT_SENTINEL
        );
        let parsed = capture(&out);
        assert!(parsed.ready);
        assert!(parsed.report.is_none());
        assert!(parsed.stray.contains(REPORT_SENTINEL));

        let parsed = capture(&format!("{}\n", READY_SENTINEL));
        assert!(!parsed.ready);
    }

    #[test]
    fn test_report_survives_stray_flood() {
        let mut capture = StdoutCapture::new(16, 4096);
        capture.accept(ready().as_bytes());
        capture.accept("x".repeat(10_000).as_bytes());
        capture.accept(b"\n");
        let big = "\u{e9}".repeat(1000);
        capture.accept(report_line(serde_json::json!({"ok": true, "stdout": big})).as_bytes());

        let parsed = capture.finish(NONCE);
        assert_eq!(parsed.stray, "x".repeat(16));
        assert!(parsed.truncated > 0);
        assert_eq!(parsed.report.unwrap().unwrap().stdout.chars().count(), 1000);
    }

    #[test]
    fn test_overlong_protocol_line_is_stray() {
        let mut capture = StdoutCapture::new(64, 32);
        let line = report_line(serde_json::json!({"ok": true, "stdout": "y".repeat(100)}));
        for piece in line.as_bytes().chunks(7) {
            capture.accept(piece);
        }
        let parsed = capture.finish(NONCE);
        assert!(parsed.report.is_none());
        assert!(parsed.stray.starts_with(REPORT_SENTINEL));
    }

    #[test]
    fn test_split_chunks_and_missing_final_newline() {
        let mut capture = StdoutCapture::new(1024, 4096);
        let out = ready() + "tail without newline";
        for piece in out.as_bytes().chunks(3) {
            capture.accept(piece);
        }
        let parsed = capture.finish(NONCE);
        assert!(parsed.ready);
        assert_eq!(parsed.stray, "tail without newline\n");
    }
}
