//! Morgue command-line front-end.
//!
//! Opens a Mach-O core file through the process plugin registry and answers
//! the questions a debugger would: what architecture, which loader image,
//! what threads, what memory.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use morgue_core::prelude::*;
use morgue_core::plugin;
use morgue_utils::init_logging;

#[derive(Parser)]
#[command(name = "morgue", version, about = "Inspect Mach-O core files as stopped processes")]
struct Cli
{
    /// Path to the core file
    core: PathBuf,

    /// Prefer the kernel image when the core contains both dyld and a kernel
    #[arg(long)]
    prefer_kernel: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command
{
    /// Summarize the core: architecture, loader plugin, image-info address
    Info,

    /// List the threads recovered from the core's register contexts
    Threads,

    /// Walk memory regions, including the unmapped gaps between them
    Regions
    {
        /// Address to start walking from
        #[arg(long, default_value = "0x0", value_parser = parse_address)]
        start: u64,
    },

    /// Hex-dump core memory
    Read
    {
        /// Address to read from (hex with 0x prefix, or decimal)
        #[arg(value_parser = parse_address)]
        address: u64,

        /// Number of bytes to read
        #[arg(default_value_t = 64)]
        length: usize,
    },
}

fn parse_address(s: &str) -> Result<u64, String>
{
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse::<u64>(),
    };
    parsed.map_err(|_| format!("invalid address: {s}"))
}

fn main() -> ExitCode
{
    if let Err(e) = init_logging() {
        eprintln!("Failed to initialize logging: {e}");
        return ExitCode::FAILURE;
    }

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> CoreResult<()>
{
    plugin::initialize();

    let settings = CoreSettings {
        prefer_kernel_corefile: cli.prefer_kernel,
    };

    let Some(mut process) = plugin::create_process_for(&cli.core, settings)? else {
        return Err(CoreError::NotACore(cli.core));
    };
    process.load(None)?;

    match cli.command {
        Command::Info => print_info(&process),
        Command::Threads => print_threads(&process),
        Command::Regions { start } => print_regions(&process, start),
        Command::Read { address, length } => print_memory(&process, address, length)?,
    }

    Ok(())
}

fn print_info(process: &CoreProcess)
{
    println!("core file:      {}", process.core_path().display());
    match process.architecture() {
        Some(arch) => println!("architecture:   {arch}"),
        None => println!("architecture:   unknown"),
    }

    let images = process.discovered_images();
    if images.has_dyld() {
        println!("dyld image:     {:#x}", images.dyld_addr);
    }
    if images.has_kernel() {
        println!("kernel image:   {:#x}", images.kernel_addr);
    }

    let plugin_name = process.dynamic_loader_plugin_name();
    if plugin_name.is_empty() {
        println!("loader plugin:  (none found)");
    } else {
        println!("loader plugin:  {plugin_name}");
        println!("image info:     {:#x}", process.image_info_address());
    }

    println!("threads:        {}", process.threads().len());
    println!("memory ranges:  {}", process.segment_ranges().len());
}

fn print_threads(process: &CoreProcess)
{
    for thread in process.threads().iter() {
        println!("thread #{} (context {})", thread.tid(), thread.context_index());
    }
}

fn print_regions(process: &CoreProcess, start: u64)
{
    let mut addr = start;
    while let Ok(region) = process.memory_region_info(addr) {
        let perms = format!(
            "{}{}{}",
            if region.readable { 'r' } else { '-' },
            if region.writable { 'w' } else { '-' },
            if region.executable { 'x' } else { '-' },
        );
        let note = if region.is_mapped() { "" } else { "  (unmapped)" };
        println!("[{:#018x}-{:#018x}) {perms}{note}", region.start, region.end);

        if region.end <= addr {
            break;
        }
        addr = region.end;
    }
}

fn print_memory(process: &CoreProcess, address: u64, length: usize) -> CoreResult<()>
{
    let mut buf = vec![0u8; length];
    let bytes_read = process.read_memory(address, &mut buf)?;
    if bytes_read < length {
        tracing::warn!("short read: {bytes_read} of {length} bytes available at {address:#x}");
    }

    for (row, chunk) in buf[..bytes_read].chunks(16).enumerate() {
        let hex: Vec<String> = chunk.iter().map(|byte| format!("{byte:02x}")).collect();
        let ascii: String = chunk
            .iter()
            .map(|&byte| if byte.is_ascii_graphic() || byte == b' ' { byte as char } else { '.' })
            .collect();
        println!("{:#018x}  {:<47}  {ascii}", address + (row * 16) as u64, hex.join(" "));
    }

    Ok(())
}
