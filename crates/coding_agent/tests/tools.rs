use std::fs;
use std::path::Path;
use std::time::{Duration, Instant};

use agent_provider::{new_cancel_signal, ToolCall, ToolResult, ToolStatus};
use coding_agent::tools::{BuiltinToolExecutor, ToolExecutor};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tempfile::tempdir;

fn new_executor(workspace_root: &Path) -> BuiltinToolExecutor {
    BuiltinToolExecutor::new(workspace_root).expect("workspace root should be valid")
}

fn run(executor: &mut BuiltinToolExecutor, name: &str, arguments: Value) -> ToolResult {
    let arguments = arguments.as_object().cloned().expect("arguments object");
    executor.execute(&ToolCall::new("call-1", name, arguments), &new_cancel_signal())
}

#[test]
fn every_tool_has_a_success_path() {
    let workspace = tempdir().expect("temp workspace");
    let mut executor = new_executor(workspace.path());

    let write = run(
        &mut executor,
        "write_file",
        json!({"path": "notes/hello.txt", "content": "hello"}),
    );
    assert_eq!(write.status, ToolStatus::Ok, "{}", write.output);
    assert_eq!(write.output, "Wrote 5 bytes to notes/hello.txt");

    let read = run(&mut executor, "read_file", json!({"path": "notes/hello.txt"}));
    assert_eq!(read.output, "hello");

    let edit = run(
        &mut executor,
        "edit_file",
        json!({"path": "notes/hello.txt", "old_text": "hello", "new_text": "hello world"}),
    );
    assert_eq!(edit.output, "Updated notes/hello.txt");
    assert_eq!(
        fs::read_to_string(workspace.path().join("notes/hello.txt")).expect("edited file"),
        "hello world"
    );

    let list = run(&mut executor, "list_dir", json!({"path": "."}));
    assert_eq!(list.output, "notes/");

    let search = run(&mut executor, "search", json!({"pattern": "wor.d"}));
    assert_eq!(search.output, "notes/hello.txt:1: hello world");

    let command = run(
        &mut executor,
        "run_command",
        json!({"command": "cat", "args": ["notes/hello.txt"]}),
    );
    assert_eq!(command.status, ToolStatus::Ok, "{}", command.output);
    assert!(command.output.contains("stdout:\nhello world"));
}

#[test]
fn nonzero_exit_is_an_error_result_with_output() {
    let workspace = tempdir().expect("temp workspace");
    let mut executor = new_executor(workspace.path());

    let result = run(
        &mut executor,
        "run_command",
        json!({"command": "echo broken >&2; exit 7"}),
    );
    assert_eq!(result.status, ToolStatus::Error);
    assert!(result.output.starts_with("command failed (exit_code=7)"));
    assert!(result.output.contains("broken"));
}

#[test]
fn path_escapes_never_touch_the_outside() {
    let outer = tempdir().expect("outer dir");
    let root = outer.path().join("workspace");
    fs::create_dir(&root).expect("workspace dir");
    fs::write(outer.path().join("secret.txt"), "secret").expect("outside file");
    let mut executor = new_executor(&root);

    let read = run(&mut executor, "read_file", json!({"path": "../secret.txt"}));
    assert!(read.is_error());
    assert!(!read.output.contains("secret\n"));

    let absolute = outer.path().join("secret.txt").display().to_string();
    let read_absolute = run(&mut executor, "read_file", json!({"path": absolute}));
    assert!(read_absolute.is_error());

    let write = run(
        &mut executor,
        "write_file",
        json!({"path": "nested/../../escape.txt", "content": "x"}),
    );
    assert!(write.is_error());
    assert!(!outer.path().join("escape.txt").exists());

    let list = run(&mut executor, "list_dir", json!({"path": ".."}));
    assert!(list.is_error());

    let search = run(&mut executor, "search", json!({"pattern": "secret", "path": ".."}));
    assert!(search.is_error());
}

#[cfg(unix)]
#[test]
fn symlinked_directories_cannot_escape_the_root() {
    let outer = tempdir().expect("outer dir");
    let root = outer.path().join("workspace");
    let elsewhere = outer.path().join("elsewhere");
    fs::create_dir(&root).expect("workspace dir");
    fs::create_dir(&elsewhere).expect("elsewhere dir");
    std::os::unix::fs::symlink(&elsewhere, root.join("link")).expect("symlink");
    let mut executor = new_executor(&root);

    let write = run(
        &mut executor,
        "write_file",
        json!({"path": "link/planted.txt", "content": "x"}),
    );
    assert!(write.is_error());
    assert!(write.output.starts_with("path escapes working root"));
    assert!(!elsewhere.join("planted.txt").exists());
}

#[test]
fn overwrite_replaces_content_without_leaving_temp_files() {
    let workspace = tempdir().expect("temp workspace");
    fs::write(workspace.path().join("config.toml"), "old = true\n").expect("seed");
    let mut executor = new_executor(workspace.path());

    let result = run(
        &mut executor,
        "write_file",
        json!({"path": "config.toml", "content": "new = true\n"}),
    );
    assert_eq!(result.status, ToolStatus::Ok, "{}", result.output);
    assert_eq!(
        fs::read_to_string(workspace.path().join("config.toml")).expect("config"),
        "new = true\n"
    );

    let entries: Vec<String> = fs::read_dir(workspace.path())
        .expect("read workspace")
        .map(|entry| entry.expect("entry").file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(entries, vec!["config.toml".to_string()]);
}

#[test]
fn edit_file_needs_exactly_one_match() {
    let workspace = tempdir().expect("temp workspace");
    fs::write(workspace.path().join("lib.rs"), "let a = 1;\nlet a = 1;\n").expect("seed");
    let mut executor = new_executor(workspace.path());

    let twice = run(
        &mut executor,
        "edit_file",
        json!({"path": "lib.rs", "old_text": "let a = 1;", "new_text": "let a = 2;"}),
    );
    assert!(twice.is_error());
    assert!(twice.output.contains("found 2"));

    let none = run(
        &mut executor,
        "edit_file",
        json!({"path": "lib.rs", "old_text": "let b", "new_text": "let c"}),
    );
    assert!(none.is_error());
    assert!(none.output.contains("found 0"));

    assert_eq!(
        fs::read_to_string(workspace.path().join("lib.rs")).expect("unchanged"),
        "let a = 1;\nlet a = 1;\n"
    );
}

#[test]
fn schema_violations_are_reported_before_side_effects() {
    let workspace = tempdir().expect("temp workspace");
    let mut executor = new_executor(workspace.path());

    let missing = run(&mut executor, "write_file", json!({"path": "a.txt"}));
    assert_eq!(
        missing.output,
        "invalid arguments: write_file requires parameter 'content'"
    );

    let wrong_type = run(
        &mut executor,
        "write_file",
        json!({"path": "a.txt", "content": 42}),
    );
    assert!(wrong_type.is_error());
    assert!(wrong_type.output.contains("parameter 'content' must be"));

    let extra = run(
        &mut executor,
        "write_file",
        json!({"path": "a.txt", "content": "x", "mode": "0777"}),
    );
    assert_eq!(
        extra.output,
        "invalid arguments: write_file does not accept parameter 'mode'"
    );

    assert!(!workspace.path().join("a.txt").exists());
}

#[cfg(target_os = "linux")]
fn process_alive(pid: i32) -> bool {
    let Ok(stat) = fs::read_to_string(format!("/proc/{pid}/stat")) else {
        return false;
    };
    let state = stat
        .rsplit_once(')')
        .and_then(|(_, rest)| rest.trim_start().chars().next());
    !matches!(state, Some('Z') | Some('X') | None)
}

#[cfg(target_os = "linux")]
#[test]
fn timed_out_commands_leave_no_orphans() {
    let workspace = tempdir().expect("temp workspace");
    let mut executor = new_executor(workspace.path());

    let started = Instant::now();
    let result = run(
        &mut executor,
        "run_command",
        json!({"command": "sleep 10 & echo $! > child.pid; wait", "timeout": 1}),
    );
    let elapsed = started.elapsed();

    assert!(result.is_error());
    assert!(
        result.output.starts_with("command timed out after 1s"),
        "{}",
        result.output
    );
    assert!(elapsed < Duration::from_secs(5), "took {elapsed:?}");

    let pid: i32 = fs::read_to_string(workspace.path().join("child.pid"))
        .expect("child pid file")
        .trim()
        .parse()
        .expect("numeric pid");
    let deadline = Instant::now() + Duration::from_secs(2);
    while process_alive(pid) && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(20));
    }
    assert!(!process_alive(pid), "background child {pid} survived");
}

#[cfg(target_os = "linux")]
#[test]
fn background_jobs_end_with_their_command() {
    let workspace = tempdir().expect("temp workspace");
    let mut executor = new_executor(workspace.path());

    let started = Instant::now();
    let result = run(
        &mut executor,
        "run_command",
        json!({"command": "sleep 8 & echo $! > child.pid; echo hi", "timeout": 1}),
    );
    let elapsed = started.elapsed();

    assert_eq!(result.status, ToolStatus::Ok, "{}", result.output);
    assert!(result.output.contains("hi"), "{}", result.output);
    assert!(elapsed < Duration::from_secs(3), "took {elapsed:?}");

    let pid: i32 = fs::read_to_string(workspace.path().join("child.pid"))
        .expect("child pid file")
        .trim()
        .parse()
        .expect("numeric pid");
    let deadline = Instant::now() + Duration::from_secs(2);
    while process_alive(pid) && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(20));
    }
    assert!(!process_alive(pid), "background child {pid} survived");
}

#[test]
fn large_command_output_is_truncated() {
    let workspace = tempdir().expect("temp workspace");
    let mut executor = new_executor(workspace.path());

    let result = run(
        &mut executor,
        "run_command",
        json!({"command": "head -c 100000 /dev/zero | tr '\\0' 'x'"}),
    );
    assert_eq!(result.status, ToolStatus::Ok);
    assert!(result.truncated);
    assert!(result.output.contains("[truncated: "));
}
