use clap::Parser;
use std::fs;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use wagmi_vm::{Configure, Error, HostRegistration, Proposal, Value, Vm};

#[derive(Parser, Debug)]
#[command(name = "wagmi-vm-run")]
#[command(about = "Load, validate, instantiate and run WebAssembly modules on the wagmi VM")]
#[command(long_about = "
wagmi-vm-run - staged WebAssembly VM runner

Drives a module through load, validate and instantiate, then invokes one of
its exported functions and prints the results.

Examples:
  # Run the default _start function (if exists)
  wagmi-vm-run module.wasm

  # Invoke a function with arguments (i32, i64, f32, f64 supported)
  wagmi-vm-run module.wasm --invoke add --args 10:i32 20:i32

  # Run a WASI command with an environment variable and guest arguments
  wagmi-vm-run app.wasm --wasi --env HOME=/tmp -- first second

  # Enable optional proposals and cap linear memory at 16 pages
  wagmi-vm-run module.wasm --enable bulk_memory_operations --max-memory-page 16

  # List exported functions with their signatures as JSON
  wagmi-vm-run module.wasm --list --json

  # Print execution statistics as JSON
  wagmi-vm-run module.wasm --invoke fib --args 25:i32 --stats
")]
struct Args {
    /// Path to the WebAssembly module file
    wasm_file: PathBuf,

    /// Function to invoke (defaults to _start)
    #[arg(short, long)]
    invoke: Option<String>,

    /// Arguments to pass to the function (format: value:type, e.g., 42:i32, 3.14:f32)
    #[arg(short, long, value_delimiter = ' ', num_args = 0..)]
    args: Vec<String>,

    /// Register the wasi_snapshot_preview1 host module
    #[arg(long)]
    wasi: bool,

    /// Environment entry visible to a WASI guest
    #[arg(long = "env", value_name = "KEY=VALUE")]
    envs: Vec<String>,

    /// Enable an optional proposal (e.g. bulk_memory_operations, reference_types, simd)
    #[arg(long = "enable", value_parser = parse_proposal)]
    enable: Vec<Proposal>,

    /// Upper bound on linear memory pages
    #[arg(long)]
    max_memory_page: Option<u32>,

    /// JSON configuration file applied before the other flags
    #[arg(long)]
    config: Option<PathBuf>,

    /// List exported functions instead of running
    #[arg(short, long)]
    list: bool,

    /// Print the --list output as JSON
    #[arg(long, requires = "list")]
    json: bool,

    /// Print execution statistics as JSON after the run
    #[arg(long)]
    stats: bool,

    /// Enable debug output
    #[arg(short, long)]
    debug: bool,

    /// Arguments handed to a WASI guest
    #[arg(last = true)]
    guest_args: Vec<String>,
}

fn parse_proposal(name: &str) -> Result<Proposal, String> {
    serde_json::from_value(serde_json::Value::String(name.to_string()))
        .map_err(|_| format!("Unknown proposal '{}'", name))
}

fn parse_value(arg: &str) -> Result<Value, String> {
    let parts: Vec<&str> = arg.split(':').collect();
    if parts.len() != 2 {
        return Err(format!("Invalid argument format '{}'. Expected format: value:type (e.g., 42:i32)", arg));
    }

    let value_str = parts[0];
    let type_str = parts[1];

    match type_str {
        "i32" => value_str.parse::<i32>().map(Value::I32).map_err(|_| format!("Failed to parse '{}' as i32", value_str)),
        "i64" => value_str.parse::<i64>().map(Value::I64).map_err(|_| format!("Failed to parse '{}' as i64", value_str)),
        "f32" => value_str.parse::<f32>().map(Value::F32).map_err(|_| format!("Failed to parse '{}' as f32", value_str)),
        "f64" => value_str.parse::<f64>().map(Value::F64).map_err(|_| format!("Failed to parse '{}' as f64", value_str)),
        _ => Err(format!("Unknown type '{}'. Supported types: i32, i64, f32, f64", type_str)),
    }
}

fn format_value(val: &Value) -> String {
    match val {
        Value::I32(v) => format!("{} (i32)", v),
        Value::I64(v) => format!("{} (i64)", v),
        Value::F32(v) => format!("{} (f32)", v),
        Value::F64(v) => format!("{} (f64)", v),
        Value::V128(v) => format!("0x{:032x} (v128)", v),
        Value::FuncRef(addr) => format!("func@{} (funcref)", addr),
        Value::ExternRef(r) => format!("0x{:x} (externref)", r.id()),
        Value::NullRef(_) => "null".to_string(),
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if args.debug { "debug" } else { "warn" }));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    let mut conf = match &args.config {
        Some(path) => serde_json::from_str(&fs::read_to_string(path)?)?,
        None => Configure::new(),
    };
    for p in &args.enable {
        conf.add_proposal(*p);
    }
    if let Some(pages) = args.max_memory_page {
        conf.set_max_memory_page(pages);
    }
    if args.wasi {
        conf.add_host_registration(HostRegistration::Wasi);
    }

    let mut vm = Vm::new(&conf);
    let wasi_env = vm.import_module(HostRegistration::Wasi).and_then(|obj| obj.wasi_env()).cloned();
    if let Some(env) = &wasi_env {
        let mut guest_args = vec![args.wasm_file.display().to_string()];
        guest_args.extend(args.guest_args.iter().cloned());
        env.borrow_mut().init(guest_args, args.envs.iter().cloned());
    }

    vm.load_wasm_file(&args.wasm_file).map_err(|e| format!("Failed to load module: {}", e))?;
    vm.validate().map_err(|e| format!("Failed to validate module: {}", e))?;
    vm.instantiate().map_err(|e| format!("Failed to instantiate module: {}", e))?;

    if args.list && args.json {
        let exports: Vec<_> = vm
            .function_list()
            .into_iter()
            .map(|(name, ty)| serde_json::json!({ "name": name, "params": ty.params, "results": ty.results }))
            .collect();
        println!("{}", serde_json::to_string_pretty(&exports)?);
        return Ok(());
    }
    if args.list {
        println!("Exported functions:");
        for (name, ty) in vm.function_list() {
            println!("  {} {}", name, ty);
        }
        return Ok(());
    }

    let func_name = args.invoke.as_deref().unwrap_or("_start");
    let wasm_args = args.args.iter().map(|a| parse_value(a)).collect::<Result<Vec<_>, _>>()?;

    let mut exit_code = 0;
    match vm.execute(func_name, &wasm_args) {
        Ok(results) => {
            if !results.is_empty() {
                println!("Result:");
                for (i, result) in results.iter().enumerate() {
                    println!("  [{}] {}", i, format_value(result));
                }
            }
        }
        Err(Error::Terminated) => {
            exit_code = wasi_env.as_ref().map(|env| env.borrow().exit_code() as i32).unwrap_or(0);
            tracing::debug!(exit_code, "guest terminated");
        }
        Err(e) => return Err(format!("Execution failed: {}", e).into()),
    }

    if args.stats {
        println!("{}", serde_json::to_string_pretty(vm.statistics())?);
    }
    if exit_code != 0 {
        std::process::exit(exit_code);
    }
    Ok(())
}
