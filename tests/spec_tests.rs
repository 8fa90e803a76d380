use std::{collections::HashMap, env, fs, path::Path, process::Command, rc::Rc};
use serde::Deserialize;
use wagmi_vm::{
    Configure, Error, ExternRef, GlobalType, HostFunction, ImportObject, Interpreter, Limits, MemoryType, Module,
    ModuleInstance, Proposal, RefType, Statistics, Store, TableType, ValType, Validator, Value,
};

#[derive(Deserialize, Clone)]
struct ValueJSON {
    r#type: String,
    value: Option<String>,
}

#[derive(Deserialize, Clone)]
#[serde(tag = "type")]
enum Act {
    #[serde(rename = "get")]
    Get { module: Option<String>, field: String },
    #[serde(rename = "invoke")]
    Invoke { module: Option<String>, field: String, args: Vec<ValueJSON> },
}

#[allow(dead_code)]
#[derive(Deserialize, Clone)]
#[serde(tag = "type")]
enum TestCmd {
    #[serde(rename = "module")]
    Module { line: i32, name: Option<String>, filename: String },
    #[serde(rename = "register")]
    Register { line: i32, name: Option<String>, r#as: String },
    #[serde(rename = "action")]
    Action { line: i32, action: Act },
    #[serde(rename = "assert_return")]
    AssertReturn { line: i32, action: Act, expected: Vec<ValueJSON> },
    #[serde(rename = "assert_trap")]
    AssertTrap { line: i32, action: Act, text: String },
    #[serde(rename = "assert_exhaustion")]
    AssertExhaustion { line: i32, action: Act, text: String },
    #[serde(rename = "assert_malformed")]
    AssertMalformed { line: i32, filename: String, text: String, module_type: String },
    #[serde(rename = "assert_invalid")]
    AssertInvalid { line: i32, filename: String, text: String, module_type: String },
    #[serde(rename = "assert_unlinkable")]
    AssertUnlinkable { line: i32, filename: String, text: String, module_type: String },
    #[serde(rename = "assert_uninstantiable")]
    AssertUninstantiable { line: i32, filename: String, text: String, module_type: String },
}

impl TestCmd {
    fn line(&self) -> i32 {
        match self {
            TestCmd::Module { line, .. }
            | TestCmd::Register { line, .. }
            | TestCmd::Action { line, .. }
            | TestCmd::AssertReturn { line, .. }
            | TestCmd::AssertTrap { line, .. }
            | TestCmd::AssertExhaustion { line, .. }
            | TestCmd::AssertMalformed { line, .. }
            | TestCmd::AssertInvalid { line, .. }
            | TestCmd::AssertUnlinkable { line, .. }
            | TestCmd::AssertUninstantiable { line, .. } => *line,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            TestCmd::Module { .. } => "module",
            TestCmd::Register { .. } => "register",
            TestCmd::Action { .. } => "action",
            TestCmd::AssertReturn { .. } => "assert_return",
            TestCmd::AssertTrap { .. } => "assert_trap",
            TestCmd::AssertExhaustion { .. } => "assert_exhaustion",
            TestCmd::AssertMalformed { .. } => "assert_malformed",
            TestCmd::AssertInvalid { .. } => "assert_invalid",
            TestCmd::AssertUnlinkable { .. } => "assert_unlinkable",
            TestCmd::AssertUninstantiable { .. } => "assert_uninstantiable",
        }
    }
}

#[allow(dead_code)]
#[derive(Deserialize)]
struct WastJSON {
    source_filename: String,
    commands: Vec<TestCmd>,
}

fn to_value(v: &ValueJSON) -> Value {
    let text = v.value.as_deref().unwrap_or("null");
    match v.r#type.as_str() {
        "i32" => Value::I32(text.parse::<u32>().unwrap() as i32),
        "i64" => Value::I64(text.parse::<u64>().unwrap() as i64),
        "f32" => {
            let bits = if text.starts_with("nan:") { 0x7fc0_0000u32 } else { text.parse().unwrap() };
            Value::F32(f32::from_bits(bits))
        }
        "f64" => {
            let bits = if text.starts_with("nan:") { 0x7ff8_0000_0000_0000u64 } else { text.parse().unwrap() };
            Value::F64(f64::from_bits(bits))
        }
        "funcref" if text == "null" => Value::NullRef(RefType::FuncRef),
        "funcref" => Value::FuncRef(text.parse().unwrap()),
        "externref" if text == "null" => Value::NullRef(RefType::ExternRef),
        "externref" => Value::ExternRef(ExternRef::from_id(text.parse().unwrap())),
        _ => panic!("unknown value type: {}", v.r#type),
    }
}

fn spectest() -> ImportObject {
    let mut obj = ImportObject::new("spectest");
    let imm = |ty| GlobalType { ty, mutable: false };
    obj.add_global("global_i32", imm(ValType::I32), Value::I32(666))
        .add_global("global_i64", imm(ValType::I64), Value::I64(666))
        .add_global("global_f32", imm(ValType::F32), Value::F32(666.6))
        .add_global("global_f64", imm(ValType::F64), Value::F64(666.6))
        .add_table("table", TableType { elem: RefType::FuncRef, limits: Limits { min: 10, max: Some(20) } })
        .add_memory("memory", MemoryType { limits: Limits { min: 1, max: Some(2) } });

    // Print functions (no-ops for testing)
    let print = |params: &[ValType]| HostFunction::new(params.to_vec(), [], |_frame, _args| Ok(vec![]));
    obj.add_function("print", print(&[]))
        .add_function("print_i32", print(&[ValType::I32]))
        .add_function("print_i64", print(&[ValType::I64]))
        .add_function("print_f32", print(&[ValType::F32]))
        .add_function("print_f64", print(&[ValType::F64]))
        .add_function("print_i32_f32", print(&[ValType::I32, ValType::F32]))
        .add_function("print_f64_f64", print(&[ValType::F64, ValType::F64]));
    obj
}

struct Runner {
    conf: Configure,
    store: Store,
    interp: Interpreter,
    stat: Statistics,
    instances: HashMap<String, Rc<ModuleInstance>>,
}

impl Runner {
    fn new() -> Self {
        let mut conf = Configure::new();
        conf.add_proposal(Proposal::BulkMemoryOperations);
        conf.add_proposal(Proposal::ReferenceTypes);
        let store = Store::new();
        Interpreter::instantiate_import_object(&store, &spectest()).expect("spectest registers");
        Self { conf, store, interp: Interpreter::new(), stat: Statistics::new(), instances: HashMap::new() }
    }

    fn compile(&self, path: &Path) -> Result<Module, Error> {
        let bytes = fs::read(path).map_err(|e| Error::Io(e.to_string()))?;
        let mut module = Module::compile(bytes)?;
        Validator::new(&self.conf).validate(&mut module)?;
        Ok(module)
    }

    fn instantiate(&mut self, path: &Path) -> Result<Rc<ModuleInstance>, Error> {
        let module = self.compile(path)?;
        self.interp.instantiate(&self.store, Rc::new(module), None, &self.conf, &mut self.stat)
    }

    fn exec(&mut self, action: &Act) -> Result<Vec<Value>, Error> {
        let (module, field) = match action {
            Act::Get { module, field } | Act::Invoke { module, field, .. } => (module.as_deref().unwrap_or("default"), field),
        };
        let inst = self.instances.get(module).cloned().ok_or_else(|| Error::FuncNotFound(module.to_string()))?;
        match action {
            Act::Get { .. } => inst.global(field).map(|g| vec![g.get()]).ok_or_else(|| Error::FuncNotFound(field.clone())),
            Act::Invoke { args, .. } => {
                let f = inst.func(field).cloned().ok_or_else(|| Error::FuncNotFound(field.clone()))?;
                let args: Vec<Value> = args.iter().map(to_value).collect();
                self.interp.invoke(&self.store, &f, &args, &mut self.stat)
            }
        }
    }
}

fn check_results(results: &[Value], expected: &[ValueJSON]) -> Result<(), String> {
    if results.len() != expected.len() {
        return Err(format!("result count mismatch: expected {}, got {}", expected.len(), results.len()));
    }
    for (i, (result, exp)) in results.iter().zip(expected).enumerate() {
        let want = to_value(exp);
        if result.to_raw() == want.to_raw() {
            continue;
        }
        let both_nan = match (result, want) {
            (Value::F32(r), Value::F32(e)) => r.is_nan() && e.is_nan(),
            (Value::F64(r), Value::F64(e)) => r.is_nan() && e.is_nan(),
            _ => false,
        };
        if !both_nan {
            return Err(format!("result[{}] mismatch", i));
        }
    }
    Ok(())
}

fn expect_message(msg: &str, text: &str) -> Result<(), String> {
    if msg == text || msg.starts_with(text) {
        Ok(())
    } else {
        Err(format!("message mismatch: expected '{}', got '{}'", text, msg))
    }
}

fn run_test_file(json_path: &Path, wast_name: &str) -> Result<(u32, u32, u32), String> {
    let json_text = fs::read_to_string(json_path).map_err(|e| format!("failed to read json: {}", e))?;
    let wast: WastJSON = serde_json::from_str(&json_text).map_err(|e| format!("failed to parse json: {}", e))?;

    let mut runner = Runner::new();
    let base_dir = json_path.parent().ok_or("json path has no parent")?;
    let mut passes = 0u32;
    let mut message_mismatches = 0u32;
    let mut failures = 0u32;

    for cmd in &wast.commands {
        let result = match cmd {
            TestCmd::Module { name, filename, .. } => match runner.instantiate(&base_dir.join(filename)) {
                Ok(inst) => {
                    if let Some(n) = name {
                        runner.instances.insert(n.clone(), inst.clone());
                    }
                    runner.instances.insert("default".to_string(), inst);
                    Ok(())
                }
                Err(e) => Err(format!("instantiate failed: {}", e)),
            },

            TestCmd::Register { name, r#as, .. } => {
                let key = name.as_deref().unwrap_or("default");
                match runner.instances.get(key) {
                    Some(inst) => runner.store.register_named(r#as, inst.clone()).map_err(|e| e.to_string()),
                    None => Err(format!("module '{}' not found", key)),
                }
            }

            TestCmd::Action { action, .. } => runner.exec(action).map(|_| ()).map_err(|e| e.to_string()),

            TestCmd::AssertReturn { action, expected, .. } => {
                runner.exec(action).map_err(|e| e.to_string()).and_then(|results| check_results(&results, expected))
            }

            TestCmd::AssertTrap { action, text, .. } => match runner.exec(action) {
                Err(Error::Trap(msg)) => expect_message(msg, text),
                Err(_) => Err(format!("wrong error type, expected trap: '{}'", text)),
                Ok(_) => Err(format!("expected trap: '{}'", text)),
            },

            TestCmd::AssertExhaustion { action, text, .. } => match runner.exec(action) {
                Err(Error::Trap(msg)) => expect_message(msg, text),
                _ => Err("expected exhaustion".into()),
            },

            TestCmd::AssertMalformed { filename, text, module_type, .. } => {
                if module_type != "binary" {
                    Ok(()) // Skip non-binary tests
                } else {
                    match fs::read(base_dir.join(filename)).ok().and_then(|b| Module::compile(b).err()) {
                        Some(Error::Malformed(msg)) => expect_message(msg, text),
                        _ => Err(format!("expected malformed: '{}'", text)),
                    }
                }
            }

            TestCmd::AssertInvalid { filename, text, .. } => match runner.compile(&base_dir.join(filename)) {
                Err(Error::Validation(msg)) => expect_message(msg, text),
                _ => Err(format!("expected validation error: '{}'", text)),
            },

            TestCmd::AssertUnlinkable { filename, text, .. } => match runner.instantiate(&base_dir.join(filename)) {
                Err(Error::Link(msg)) => expect_message(msg, text),
                Err(Error::UnknownImport { .. }) => expect_message("unknown import", text),
                _ => Err(format!("expected unlinkable: '{}'", text)),
            },

            TestCmd::AssertUninstantiable { filename, text, .. } => match runner.instantiate(&base_dir.join(filename)) {
                Err(Error::Uninstantiable(msg)) => expect_message(msg, text),
                _ => Err(format!("expected uninstantiable: '{}'", text)),
            },
        };

        match result {
            Ok(()) => passes += 1,
            Err(e) if e.starts_with("message mismatch") => {
                message_mismatches += 1;
                eprintln!("[{}:{}] {}", wast_name, cmd.line(), e);
            }
            Err(e) => {
                eprintln!("[{}:{}] {}: {}", wast_name, cmd.line(), cmd.kind(), e);
                failures += 1;
            }
        }
    }

    Ok((passes, message_mismatches, failures))
}

#[test]
fn run_spec_tests() {
    let filter = env::var("SPEC_FILTER").ok();
    let test_dir = Path::new("tests/core");
    let wast2json = if cfg!(target_os = "macos") {
        Path::new("tools/osx/wast2json")
    } else {
        Path::new("tools/linux/wast2json")
    };
    if !test_dir.is_dir() || !wast2json.is_file() {
        eprintln!("skipping conformance suite: {} or {} not present", test_dir.display(), wast2json.display());
        return;
    }
    let tmp_dir = Path::new("tmp/spec-json");
    fs::create_dir_all(tmp_dir).expect("failed to create tmp directory");

    let mut total_passes = 0u32;
    let mut total_mismatches = 0u32;
    let mut total_failures = 0u32;

    for entry in fs::read_dir(test_dir).expect("failed to read test directory") {
        let path = entry.expect("failed to read entry").path();
        if path.extension().and_then(|s| s.to_str()) != Some("wast") {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else { continue };
        // SIMD execution is not supported.
        if stem.starts_with("simd") {
            continue;
        }
        if let Some(ref f) = filter {
            if !stem.contains(f) {
                continue;
            }
        }

        let test_out_dir = tmp_dir.join(stem);
        fs::create_dir_all(&test_out_dir).expect("failed to create test output directory");

        let json_path = test_out_dir.join(format!("{}.json", stem));
        let output = Command::new(wast2json)
            .arg(&path)
            .arg("-o")
            .arg(&json_path)
            .output()
            .expect("failed to run wast2json");
        if !output.status.success() {
            eprintln!("wast2json failed for {}: {}", stem, String::from_utf8_lossy(&output.stderr));
            continue;
        }

        println!("Running {}", stem);
        match run_test_file(&json_path, stem) {
            Ok((passes, message_mismatches, failures)) => {
                total_passes += passes;
                total_mismatches += message_mismatches;
                total_failures += failures;
                println!("  {} passed, {} had error message mismatch, {} failed", passes, message_mismatches, failures);
            }
            Err(e) => {
                eprintln!("  Error: {}", e);
                total_failures += 1;
            }
        }
    }

    println!("\nTotal: {} passed, {} had error message mismatch, {} failed", total_passes, total_mismatches, total_failures);

    if total_failures > 0 || total_mismatches > 0 {
        panic!("{} tests failed and {} tests had error message mismatch", total_failures, total_mismatches);
    }
}
