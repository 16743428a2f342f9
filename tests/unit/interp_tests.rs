use replhost::interp::value::Value;
use replhost::interp::Interpreter;

fn run(interp: &mut Interpreter, code: &str) -> (bool, String, String) {
    let outcome = interp.execute(code);
    (outcome.ok, outcome.stdout, outcome.stderr)
}

#[test]
fn assignment_and_print() {
    let mut interp = Interpreter::new();
    let (ok, stdout, _) = run(&mut interp, "x = 1\nprint(x + 1)");
    assert!(ok);
    assert_eq!(stdout, "2\n");
    assert_eq!(interp.get("x"), Some(&Value::Int(1)));
}

#[test]
fn globals_persist_across_payloads() {
    let mut interp = Interpreter::new();
    run(&mut interp, "greeting = 'hi'");
    let (ok, stdout, _) = run(&mut interp, "print(greeting, len(greeting)); greeting * 2");
    assert!(ok);
    assert_eq!(stdout, "hi 2\n'hihi'\n");
}

#[test]
fn arithmetic_follows_python_rules() {
    let mut interp = Interpreter::new();
    let (_, stdout, _) = run(&mut interp, "7 % 3\n-7 % 3\n7 / 2\n2 * 3.0\n1 == 1.0\nnot 0");
    assert_eq!(stdout, "1\n2\n3.5\n6.0\ntrue\ntrue\n");
}

#[test]
fn errors_stop_the_payload_and_keep_earlier_effects() {
    let mut interp = Interpreter::new();
    let (ok, stdout, stderr) = run(&mut interp, "a = 1\nprint('before')\nb = missing\nc = 3");
    assert!(!ok);
    assert_eq!(stdout, "before\n");
    assert!(stderr.starts_with("NameError"));
    assert_eq!(interp.get("a"), Some(&Value::Int(1)));
    assert!(interp.get("c").is_none());
}

#[test]
fn division_by_zero_and_overflow_are_errors() {
    let mut interp = Interpreter::new();
    let (ok, _, stderr) = run(&mut interp, "1 / 0");
    assert!(!ok);
    assert!(stderr.contains("ZeroDivisionError"));

    let (ok, _, stderr) = run(&mut interp, "9223372036854775807 + 1");
    assert!(!ok);
    assert!(stderr.contains("OverflowError"));
}

#[test]
fn type_errors_are_reported() {
    let mut interp = Interpreter::new();
    let (ok, _, stderr) = run(&mut interp, "'a' - 1");
    assert!(!ok);
    assert!(stderr.contains("TypeError"));

    let (ok, _, stderr) = run(&mut interp, "'a' < 1");
    assert!(!ok);
    assert!(stderr.contains("not supported"));
}

#[test]
fn syntax_errors_are_reported() {
    let mut interp = Interpreter::new();
    let (ok, stdout, stderr) = run(&mut interp, "x = = 1");
    assert!(!ok);
    assert!(stdout.is_empty());
    assert!(stderr.starts_with("SyntaxError"));
}

#[test]
fn delete_removes_binding() {
    let mut interp = Interpreter::new();
    run(&mut interp, "x = 1");
    let (ok, _, _) = run(&mut interp, "del x");
    assert!(ok);
    assert!(interp.get("x").is_none());
    let (ok, _, _) = run(&mut interp, "del x");
    assert!(!ok);
}

#[test]
fn exit_reports_code_and_prior_output() {
    let mut interp = Interpreter::new();
    let outcome = interp.execute("print('bye'); exit(3)");
    assert!(outcome.ok);
    assert_eq!(outcome.stdout, "bye\n");
    assert_eq!(outcome.exit, Some(3));
}

#[test]
fn snapshot_and_restore_round_trip() {
    let mut interp = Interpreter::new();
    run(&mut interp, "x = 1; name = 'a'; ratio = 0.5; flag = true");
    let snapshot = interp.snapshot().expect("snapshot");
    assert_eq!(snapshot["format"], "replhost-builtin");
    assert_eq!(snapshot["vars"]["x"], serde_json::json!({"type": "int", "value": 1}));

    run(&mut interp, "x = 2; extra = 5");
    interp.restore(&snapshot).expect("restore");

    assert_eq!(interp.get("x"), Some(&Value::Int(1)));
    assert!(interp.get("extra").is_none());
    assert_eq!(interp.get("flag"), Some(&Value::Bool(true)));
}

#[test]
fn restore_rejects_foreign_format_without_changes() {
    let mut interp = Interpreter::new();
    run(&mut interp, "x = 1");
    let err = interp
        .restore(&serde_json::json!({"format": "python-pickle", "vars": {}}))
        .expect_err("foreign format");
    assert!(err.contains("unsupported snapshot format"));
    assert_eq!(interp.get("x"), Some(&Value::Int(1)));
}

#[test]
fn non_finite_floats_survive_snapshot() {
    let mut interp = Interpreter::new();
    run(&mut interp, "big = float('inf'); small = -big; odd = big - big; y = 1");
    let snapshot = interp.snapshot().expect("snapshot");
    assert_eq!(snapshot["vars"]["big"]["value"], "inf");
    assert_eq!(snapshot["vars"]["small"]["value"], "-inf");
    assert_eq!(snapshot["vars"]["odd"]["value"], "nan");

    run(&mut interp, "big = 0; y = 2");
    interp.restore(&snapshot).expect("restore");
    assert_eq!(interp.get("big"), Some(&Value::Float(f64::INFINITY)));
    assert_eq!(interp.get("small"), Some(&Value::Float(f64::NEG_INFINITY)));
    assert!(matches!(interp.get("odd"), Some(Value::Float(x)) if x.is_nan()));
    assert_eq!(interp.get("y"), Some(&Value::Int(1)));

    let (_, stdout, _) = run(&mut interp, "print(big, small, odd)");
    assert_eq!(stdout, "inf -inf nan\n");
}

#[test]
fn restore_rejects_unknown_float_names() {
    let mut interp = Interpreter::new();
    let err = interp
        .restore(&serde_json::json!({
            "format": "replhost-builtin",
            "vars": {"x": {"type": "float", "value": "lots"}}
        }))
        .expect_err("bad float");
    assert!(err.contains("invalid snapshot"));
}

#[test]
fn deep_nesting_is_a_syntax_error() {
    let mut interp = Interpreter::new();
    let code = format!("{}1{}", "(".repeat(20_000), ")".repeat(20_000));
    let (ok, _, stderr) = run(&mut interp, &code);
    assert!(!ok);
    assert!(stderr.contains("nested too deeply"));

    let (ok, _, stderr) = run(&mut interp, &format!("{}1", "-".repeat(20_000)));
    assert!(!ok);
    assert!(stderr.contains("nested too deeply"));

    let (ok, stdout, _) = run(&mut interp, &format!("{}1{}", "(".repeat(50), ")".repeat(50)));
    assert!(ok);
    assert_eq!(stdout, "1\n");
}

#[test]
fn long_operator_chains_are_bounded() {
    let mut interp = Interpreter::new();
    let (ok, stdout, _) = run(&mut interp, &vec!["1"; 500].join(" + "));
    assert!(ok);
    assert_eq!(stdout, "500\n");

    let (ok, _, stderr) = run(&mut interp, &vec!["1"; 5000].join(" + "));
    assert!(!ok);
    assert!(stderr.contains("nested too deeply"));
}

#[test]
fn huge_strings_are_refused() {
    let mut interp = Interpreter::new();
    let (ok, _, stderr) = run(&mut interp, "'ab' * 9223372036854775807");
    assert!(!ok);
    assert!(stderr.starts_with("OverflowError") || stderr.starts_with("MemoryError"));

    let (ok, _, stderr) = run(&mut interp, "s = 'x' * 40000000; s = s + s");
    assert!(!ok);
    assert!(stderr.starts_with("MemoryError"));
    assert_eq!(interp.get("s").map(Value::type_name), Some("str"));

    // The interpreter is still usable afterwards.
    let (ok, stdout, _) = run(&mut interp, "print(len('ab' * 3))");
    assert!(ok);
    assert_eq!(stdout, "6\n");
}
