//! dlbridge - call C libraries without a C toolchain
//!
//! Main CLI entry point for inspecting call plans and invoking library
//! functions from the command line.

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use dlbridge::arch::{detect_arch, Abi};
use dlbridge::config::BridgeConfig;
use dlbridge::ffi::{self, Declaration, Value};
use dlbridge::logging;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "dlb")]
#[command(version)]
#[command(about = "Call C libraries without a C toolchain", long_about = None)]
struct Cli {
    /// Configuration file (default: dlbridge.toml in this or a parent directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log filter, e.g. "debug" (DLBRIDGE_LOG takes precedence)
    #[arg(long, global = true)]
    log: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the native ABI and its argument registers
    Abi,

    /// Show the platform's default system library
    Syslib,

    /// Show how a declaration is laid out in registers and on the stack
    Plan {
        /// C-style declaration, e.g. "double strtod(cstr, ptr)"
        declaration: String,

        /// Target ABI (default: native)
        #[arg(long)]
        abi: Option<String>,

        /// Plan as a variadic call site
        #[arg(long)]
        variadic: bool,

        /// Output JSON
        #[arg(long)]
        json: bool,
    },

    /// Call a library function with literal arguments
    Call {
        /// Library name or path
        library: String,

        /// C-style declaration, e.g. "i32 abs(i32)"
        declaration: String,

        /// Arguments, parsed according to the declaration
        #[arg(allow_hyphen_values = true)]
        args: Vec<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => BridgeConfig::load(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => BridgeConfig::load_from_cwd().context("Failed to load dlbridge.toml")?,
    };
    let filter = cli.log.as_deref().unwrap_or(&config.logging.filter);
    logging::init(filter);

    match cli.command {
        Commands::Abi => cmd_abi(),
        Commands::Syslib => cmd_syslib(),
        Commands::Plan {
            declaration,
            abi,
            variadic,
            json,
        } => cmd_plan(&declaration, abi.as_deref(), variadic, json),
        Commands::Call {
            library,
            declaration,
            args,
        } => cmd_call(&config, &library, &declaration, &args),
    }
}

fn cmd_abi() -> Result<()> {
    println!("Architecture: {}", detect_arch());
    let Some(abi) = Abi::native() else {
        println!("Native ABI:   none (planning only)");
        return Ok(());
    };
    let cc = abi.convention();
    let (int_ret, float_ret) = cc.return_registers();
    println!("Native ABI:   {}", abi);
    println!("Int args:     {}", cc.int_arg_registers().join(", "));
    println!("Float args:   {}", cc.float_arg_registers().join(", "));
    println!("Returns:      {}, {}", int_ret, float_ret);
    if cc.shadow_bytes() > 0 {
        println!("Shadow space: {} bytes", cc.shadow_bytes());
    }
    Ok(())
}

fn cmd_syslib() -> Result<()> {
    let name = ffi::system_library_name()?;
    println!("{}", name);
    Ok(())
}

fn cmd_plan(declaration: &str, abi: Option<&str>, variadic: bool, json: bool) -> Result<()> {
    let decl = Declaration::parse(declaration).map_err(|e| anyhow!(e))?;
    let abi = match abi {
        Some(name) => name.parse::<Abi>().map_err(|e| anyhow!(e))?,
        None => Abi::require_native()?,
    };

    let sig = &decl.signature;
    let plan = abi
        .convention()
        .plan(&sig.params, sig.ret, variadic)
        .with_context(|| format!("Cannot plan '{}' for {}", decl, abi))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
    } else {
        println!("{}  [{}]", decl, abi);
        print!("{}", plan.describe());
    }
    Ok(())
}

fn cmd_call(config: &BridgeConfig, library: &str, declaration: &str, args: &[String]) -> Result<()> {
    let decl = Declaration::parse(declaration).map_err(|e| anyhow!(e))?;
    let params = &decl.signature.params;
    if args.len() != params.len() {
        bail!(
            "'{}' takes {} argument(s), got {}",
            decl.name,
            params.len(),
            args.len()
        );
    }
    let values = params
        .iter()
        .zip(args)
        .map(|(&class, text)| Value::parse_literal(class, text))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| anyhow!(e))?;

    let mut loader = config.apply();
    let lib = loader
        .load(library)
        .with_context(|| format!("Failed to open {}", library))?;

    // Safety: the user asserts the declaration matches the function.
    let function = unsafe { lib.function(&decl.name, &decl.signature) }
        .with_context(|| format!("Failed to bind {}", decl))?;
    let result = unsafe { function.call(&values) }
        .with_context(|| format!("Call to {} failed", decl.name))?;

    if !result.is_void() {
        println!("{}", result);
    }
    Ok(())
}
