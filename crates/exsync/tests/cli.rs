use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

fn python_available() -> bool {
    let exe = if cfg!(windows) { "python" } else { "python3" };
    let ok = Command::new(exe)
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .is_ok_and(|s| s.success());
    if !ok {
        eprintln!("skipping: {exe} not available");
    }
    ok
}

fn exsync(cwd: &Path, args: &[&str]) -> Output {
    let exe = env!("CARGO_BIN_EXE_exsync");
    Command::new(exe)
        .current_dir(cwd)
        .env_remove("EXSYNC_PYTHON")
        .env_remove("EXSYNC_LOG")
        .args(args)
        .output()
        .expect("run exsync")
}

fn assert_exit(out: &Output, code: i32) {
    assert_eq!(
        out.status.code(),
        Some(code),
        "stdout:\n{}\nstderr:\n{}",
        String::from_utf8_lossy(&out.stdout),
        String::from_utf8_lossy(&out.stderr)
    );
}

fn write_script(dir: &Path, name: &str, src: &str) -> PathBuf {
    let p = dir.join(name);
    if let Some(parent) = p.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&p, src).unwrap();
    p
}

fn read(p: &Path) -> String {
    std::fs::read_to_string(p).unwrap()
}

#[test]
fn single_print_gets_one_block_beneath() {
    if !python_available() {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let p = write_script(dir.path(), "a.py", "print(\"foo\")\n");

    let out = exsync(dir.path(), &["update", "a.py"]);
    assert_exit(&out, 0);
    assert_eq!(read(&p), "print(\"foo\")\n#| foo\n");
    assert!(!dir.path().join(".exsync-a").exists(), "scratch removed");
}

#[test]
fn loop_output_lands_after_the_loop() {
    if !python_available() {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let one = write_script(dir.path(), "one.py", "for i in range(3): print(i)\n");
    let multi = write_script(
        dir.path(),
        "multi.py",
        "for i in range(3):\n    print(i)\n\nprint('done')\n",
    );

    let out = exsync(dir.path(), &["update", "one.py", "multi.py"]);
    assert_exit(&out, 0);
    assert_eq!(read(&one), "for i in range(3): print(i)\n#| 0\n#| 1\n#| 2\n");
    assert_eq!(
        read(&multi),
        "for i in range(3):\n    print(i)\n#| 0\n#| 1\n#| 2\n\nprint('done')\n#| done\n"
    );
}

#[test]
fn empty_print_gets_no_block() {
    if !python_available() {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let src = "print(\"\")\n";
    let p = write_script(dir.path(), "c.py", src);

    let out = exsync(dir.path(), &["update", "c.py"]);
    assert_exit(&out, 0);
    assert_eq!(read(&p), src);
}

#[test]
fn raising_script_is_untouched_and_logged_once() {
    if !python_available() {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let src = "print('before')\n#| stale\nx = 1 / 0\nprint('after')\n";
    let p = write_script(dir.path(), "d.py", src);

    let out = exsync(dir.path(), &["update", "d.py"]);
    assert_exit(&out, 1);
    assert_eq!(read(&p), src);

    let log = read(&dir.path().join("exsync-issues.log"));
    assert_eq!(log.matches("=== ").count(), 1, "{log}");
    assert!(log.contains("d.py"), "{log}");
    assert!(log.contains("ZeroDivisionError"), "{log}");
    assert!(log.contains(">> 2 | x = 1 / 0"), "{log}");
    assert!(dir.path().join(".exsync-d/stderr.txt").is_file(), "scratch kept on failure");
}

#[test]
fn second_run_is_a_no_op_and_stale_blocks_are_fixed() {
    if !python_available() {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let p = write_script(
        dir.path(),
        "ch1/demo.py",
        "# demo.py\nimport helper\n\nprint(helper.greet('x'))\n#| wrong\n#| lines\n\ndef f():\n    return [n * n for n in range(40)]\n\nprint(f())\n",
    );
    write_script(dir.path(), "ch1/helper.py", "def greet(n):\n    return 'hi ' + n\n");

    let out = exsync(dir.path(), &["update", "--profile", "slides", "ch1"]);
    assert_exit(&out, 0);
    let first = read(&p);
    assert!(first.contains("print(helper.greet('x'))\n#| hi x\n\n"), "{first}");
    assert!(!first.contains("#| wrong"));
    for line in first.lines().filter(|l| l.starts_with("#|")) {
        assert!(line.chars().count() <= 47 + 3, "{line:?}");
    }

    let out = exsync(dir.path(), &["update", "--profile", "slides", "ch1"]);
    assert_exit(&out, 0);
    assert_eq!(read(&p), first);

    let out = exsync(dir.path(), &["check", "--profile", "slides", "ch1/demo.py"]);
    assert_exit(&out, 0);
}

#[test]
fn scripts_that_shadow_print_are_still_annotated() {
    if !python_available() {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let p = write_script(
        dir.path(),
        "shadow.py",
        "def print(*a, **k):\n    pass\n\nimport builtins\nbuiltins.print('real')\n",
    );

    let out = exsync(dir.path(), &["update", "shadow.py"]);
    assert_exit(&out, 0);
    assert_eq!(
        read(&p),
        "def print(*a, **k):\n    pass\n\nimport builtins\nbuiltins.print('real')\n#| real\n"
    );
}

#[test]
fn check_reports_stale_without_writing() {
    if !python_available() {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let src = "print(1)\n#| 2\n";
    let p = write_script(dir.path(), "s.py", src);

    let out = exsync(dir.path(), &["check", "--json", "s.py"]);
    assert_exit(&out, 1);
    assert_eq!(read(&p), src);
    let v: serde_json::Value = serde_json::from_slice(&out.stdout).expect("json report");
    assert_eq!(v["schema_version"], "exsync.update.report@0.1.0");
    assert_eq!(v["files"][0]["status"], "stale");
    assert_eq!(v["summary"]["stale"], 1);
}

#[test]
fn strip_then_update_round_trips() {
    if !python_available() {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let p = write_script(dir.path(), "r.py", "x = 3\nprint(x * 2)\nprint('a\\n\\nb')\n");

    assert_exit(&exsync(dir.path(), &["update", "r.py"]), 0);
    let annotated = read(&p);
    assert_eq!(annotated, "x = 3\nprint(x * 2)\n#| 6\nprint('a\\n\\nb')\n#| a\n#|\n#| b\n");

    assert_exit(&exsync(dir.path(), &["strip", "r.py"]), 0);
    assert_eq!(read(&p), "x = 3\nprint(x * 2)\nprint('a\\n\\nb')\n");

    assert_exit(&exsync(dir.path(), &["update", "r.py"]), 0);
    assert_eq!(read(&p), annotated);
}

#[test]
fn verbose_keeps_scratch_and_original() {
    if !python_available() {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let src = "print('v')\n";
    let p = write_script(dir.path(), "v.py", src);

    let out = exsync(dir.path(), &["update", "--verbose", "v.py"]);
    assert_exit(&out, 0);
    assert_eq!(read(&p), src);
    let scratch = dir.path().join(".exsync-v");
    for name in ["cleaned.py", "instrumented.py", "output.txt", "stderr.txt", "segments.json", "rewritten.py"] {
        assert!(scratch.join(name).is_file(), "missing {name}");
    }
    assert_eq!(read(&scratch.join("rewritten.py")), "print('v')\n#| v\n");
    let seg: serde_json::Value =
        serde_json::from_str(&read(&scratch.join("segments.json"))).unwrap();
    assert_eq!(seg["schema_version"], "exsync.segments@0.1.0");
    assert_eq!(seg["segments"][0]["raw_text"], "v\n");
}

#[test]
fn parallel_batch_with_fail_fast_reports_every_file() {
    if !python_available() {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    for i in 0..4 {
        write_script(dir.path(), &format!("ok{i}.py"), &format!("print({i})\n"));
    }
    write_script(dir.path(), "bad.py", "raise SystemExit(3)\n");

    let out = exsync(dir.path(), &["update", "--json", "-j", "3", "--fail-fast", "."]);
    assert_exit(&out, 1);
    let v: serde_json::Value = serde_json::from_slice(&out.stdout).expect("json report");
    assert_eq!(v["summary"]["total"], 5);
    assert_eq!(v["summary"]["failed"], 1);
    let bad = v["files"]
        .as_array()
        .unwrap()
        .iter()
        .find(|f| f["path"].as_str().is_some_and(|p| p.ends_with("bad.py")))
        .unwrap();
    assert_eq!(bad["exit_code"], 3);
}

#[test]
fn verbose_strip_does_not_overwrite() {
    let dir = tempfile::tempdir().unwrap();
    let src = "print(1)\n#| 1\n";
    let p = write_script(dir.path(), "v.py", src);

    let out = exsync(dir.path(), &["strip", "--verbose", "v.py"]);
    assert_exit(&out, 0);
    assert_eq!(read(&p), src);
    assert_eq!(read(&dir.path().join(".exsync-v/rewritten.py")), "print(1)\n");
}

#[test]
fn strip_needs_no_interpreter() {
    let dir = tempfile::tempdir().unwrap();
    let p = write_script(dir.path(), "a.py", "print(1)\n#| 1\n");
    let out = exsync(dir.path(), &["strip", "--python", "exsync-no-such-interpreter", "a.py"]);
    assert_exit(&out, 0);
    assert_eq!(read(&p), "print(1)\n");
}

#[test]
fn missing_interpreter_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    write_script(dir.path(), "a.py", "print(1)\n");
    let out = exsync(dir.path(), &["update", "--python", "exsync-no-such-interpreter", "a.py"]);
    assert_exit(&out, 2);
    assert!(String::from_utf8_lossy(&out.stderr).contains("spawn interpreter"));
}

#[test]
fn skipped_files_are_not_failures() {
    let dir = tempfile::tempdir().unwrap();
    write_script(dir.path(), "opt.py", "# exsync: skip\nprint(1)\n");
    let out = exsync(dir.path(), &["update", "--json", "opt.py", "missing.py"]);
    assert_exit(&out, 0);
    let v: serde_json::Value = serde_json::from_slice(&out.stdout).expect("json report");
    assert_eq!(v["summary"]["skipped"], 2);
}

#[test]
fn bad_config_is_a_usage_error() {
    let dir = tempfile::tempdir().unwrap();
    write_script(dir.path(), "exsync.json", "{\"column_width\": 2}");
    write_script(dir.path(), "a.py", "print(1)\n");
    let out = exsync(dir.path(), &["strip", "a.py"]);
    assert_exit(&out, 2);
    assert!(String::from_utf8_lossy(&out.stderr).contains("column_width"));
}
