//! Python kernel bootstrap.
//!
//! Passed to the interpreter with `python3 -u -c`. The bootstrap keeps one
//! global namespace for the session, captures stdout/stderr per request,
//! echoes the repr of bare expressions like the interactive prompt does,
//! and snapshots every picklable user global (base64 pickles) plus the
//! aliases of imported modules, which are re-imported on restore.
//! Unpicklable values are listed under `skipped` and are absent after a
//! rollback. Every event line stays under `REPLHOST_MAX_MESSAGE_BYTES`:
//! result output is clipped and an oversized snapshot is answered with an
//! `error` event.

/// Source of the Python side of the kernel protocol.
pub const PYTHON_BOOTSTRAP: &str = r#"
import base64, contextlib, importlib, io, json, os, pickle, sys, traceback, types

_out = sys.stdout
_ns = {"__name__": "__main__", "__builtins__": __builtins__}
_limit = int(os.environ.get("REPLHOST_MAX_MESSAGE_BYTES") or 1048576)

def _write(line):
    _out.write(line + "\n")
    _out.flush()

def _emit(obj):
    _write(json.dumps(obj))

def _clip(text, budget):
    data = text.encode("utf-8", "replace")
    if len(data) <= budget:
        return text
    kept = data[:budget].decode("utf-8", "ignore")
    if kept and not kept.endswith("\n"):
        kept += "\n"
    return kept + "[... %d bytes of output truncated ...]\n" % (len(data) - budget)

def _emit_result(rid, ok, stdout, stderr):
    budget = _limit // 2
    while True:
        line = json.dumps({"event": "result", "id": rid, "ok": ok,
                           "stdout": _clip(stdout, budget), "stderr": _clip(stderr, budget)})
        if budget == 0 or len(line) < _limit:
            break
        budget //= 2
    _write(line)

def _emit_snapshot(rid):
    line = json.dumps({"event": "snapshot", "id": rid, "state": _snapshot()})
    if len(line) < _limit:
        _write(line)
    else:
        _emit({"event": "error", "id": rid,
               "message": "snapshot is %d bytes, over the %d byte message limit" % (len(line), _limit)})

def _exec(code):
    buf_out, buf_err, ok = io.StringIO(), io.StringIO(), True
    with contextlib.redirect_stdout(buf_out), contextlib.redirect_stderr(buf_err):
        try:
            try:
                compiled = compile(code, "<session>", "eval")
            except SyntaxError:
                exec(compile(code, "<session>", "exec"), _ns)
            else:
                value = eval(compiled, _ns)
                if value is not None:
                    print(repr(value))
        except SystemExit:
            raise
        except BaseException:
            ok = False
            traceback.print_exc()
    return ok, buf_out.getvalue(), buf_err.getvalue()

def _snapshot():
    values, modules, skipped = {}, {}, []
    for key, value in _ns.items():
        if key.startswith("__"):
            continue
        if isinstance(value, types.ModuleType):
            modules[key] = value.__name__
            continue
        try:
            values[key] = base64.b64encode(pickle.dumps(value)).decode("ascii")
        except Exception:
            skipped.append(key)
    return {"format": "python-pickle", "values": values, "modules": modules, "skipped": skipped}

def _restore(state):
    fresh = {"__name__": "__main__", "__builtins__": __builtins__}
    for key, name in state.get("modules", {}).items():
        fresh[key] = importlib.import_module(name)
    for key, blob in state.get("values", {}).items():
        fresh[key] = pickle.loads(base64.b64decode(blob))
    _ns.clear()
    _ns.update(fresh)

_emit({"event": "ready", "kernel": "python", "version": sys.version.split()[0]})

for _line in sys.stdin:
    if not _line.strip():
        continue
    try:
        _req = json.loads(_line)
    except ValueError as exc:
        _emit({"event": "error", "id": None, "message": "malformed request: %s" % exc})
        continue
    _op, _id = _req.get("op"), _req.get("id")
    try:
        if _op == "exec":
            _ok, _stdout, _stderr = _exec(_req.get("code", ""))
            _emit_result(_id, _ok, _stdout, _stderr)
        elif _op == "snapshot":
            _emit_snapshot(_id)
        elif _op == "restore":
            _restore(_req.get("state") or {})
            _emit({"event": "restored", "id": _id})
        else:
            _emit({"event": "error", "id": _id, "message": "unknown op: %s" % _op})
    except SystemExit:
        raise
    except BaseException as exc:
        _emit({"event": "error", "id": _id, "message": "%s: %s" % (type(exc).__name__, exc)})
"#;
