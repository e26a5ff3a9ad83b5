//! Out-of-process interpreter host.
//!
//! Runs one Lua and one JavaScript worker pool under an OS memory cap.
//! Positional arguments (all required):
//!
//! ```text
//! vmhost <logFile> <logLevel> <maxMem> <callStackSize> <registrySize>
//!        <maxRunTimeMs> <maxOpcodeCount> <stackDepth> <maxScriptSize>
//! ```
//!
//! Exits 0 on clean shutdown and non-zero when the memory cap cannot be
//! applied.

use lattice_vm::js::JsRuntime;
use lattice_vm::lua::LuaRuntime;
use lattice_vm::{VmConfig, WorkerPool};
use std::process::ExitCode;
use tracing::{error, info};

fn parse_args() -> Result<(String, String, VmConfig), String> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.len() != 9 {
        return Err(format!("expected 9 positional arguments, got {}", args.len()));
    }

    let parse = |index: usize, name: &str| -> Result<u64, String> {
        args[index]
            .parse::<u64>()
            .map_err(|_| format!("invalid {name}: {}", args[index]))
    };

    let mut config = VmConfig::default();
    config.max_mem = parse(2, "maxMem")? as usize;
    config.call_stack_size = parse(3, "callStackSize")? as usize;
    config.registry_size = parse(4, "registrySize")? as usize;
    config.exec_limit_max_run_time = parse(5, "maxRunTimeMs")?;
    config.exec_limit_max_opcode_count = parse(6, "maxOpcodeCount")?;
    config.exec_limit_stack_depth = parse(7, "stackDepth")? as usize;
    config.exec_limit_max_script_size = parse(8, "maxScriptSize")? as usize;

    Ok((args[0].clone(), args[1].clone(), config))
}

fn apply_memory_cap(max_mem_mb: usize) -> Result<(), String> {
    let max_bytes = (max_mem_mb as u64) * 1024 * 1024;
    let limit = libc::rlimit {
        rlim_cur: max_bytes / 5 * 4,
        rlim_max: max_bytes,
    };
    // SAFETY: plain syscall with a stack-local struct.
    let rc = unsafe { libc::setrlimit(libc::RLIMIT_AS, &limit) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error().to_string());
    }
    Ok(())
}

fn main() -> ExitCode {
    let (log_file, log_level, config) = match parse_args() {
        Ok(parsed) => parsed,
        Err(message) => {
            eprintln!("vmhost: {message}");
            return ExitCode::from(2);
        }
    };

    let file = match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_file)
    {
        Ok(file) => file,
        Err(e) => {
            eprintln!("vmhost: cannot open log file {log_file}: {e}");
            return ExitCode::from(2);
        }
    };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(&log_level))
        .with_writer(std::sync::Mutex::new(file))
        .with_ansi(false)
        .init();

    if let Err(message) = apply_memory_cap(config.max_mem) {
        error!(error = %message, "setrlimit failed");
        return ExitCode::from(1);
    }

    let _lua_pool = WorkerPool::new("luavm", config.clone(), |config| {
        Box::new(LuaRuntime::new(config))
    });
    let _js_pool = WorkerPool::new("jsvm", config, |config| Box::new(JsRuntime::new(config)));
    info!("vmhost started");

    loop {
        std::thread::park();
    }
}
