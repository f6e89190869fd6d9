//! xml2xlsx-server - XML to spreadsheet upload-and-convert server
//!
//! CLI entry point

use anyhow::Context;
use clap::Parser;
use std::path::Path;
use xml2xlsx_server::{
    exit_codes, logging, CliOverrides, Cli, Commands, Config, ConfigError, Converter, ServeArgs,
    WebServer,
};

fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let result = match &cli.command {
        Commands::Serve(args) => run_serve(cli.config.as_deref(), args),
        Commands::Info => run_info(cli.config.as_deref()),
    };

    std::process::exit(match result {
        Ok(()) => exit_codes::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            if e.downcast_ref::<ConfigError>().is_some() {
                exit_codes::CONFIG_ERROR
            } else {
                exit_codes::GENERAL_ERROR
            }
        }
    });
}

// ============ Serve Command ============

fn run_serve(config_path: Option<&Path>, args: &ServeArgs) -> anyhow::Result<()> {
    let config = Config::resolve(config_path)?;
    let server_config = config.merge_with_cli(&CliOverrides::from(args))?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(server_config.workers)
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    runtime.block_on(async {
        let server = WebServer::with_config(server_config)?;
        server.run().await?;
        anyhow::Ok(())
    })
}

// ============ Info Command ============

fn run_info(config_path: Option<&Path>) -> anyhow::Result<()> {
    let config = Config::resolve(config_path)?;
    let effective = config.merge_with_cli(&CliOverrides::new())?;

    println!("xml2xlsx-server v{}", env!("CARGO_PKG_VERSION"));
    println!();

    println!("System Information:");
    println!("  Platform: {}", std::env::consts::OS);
    println!("  Arch: {}", std::env::consts::ARCH);
    println!("  CPUs: {}", num_cpus::get());

    println!();
    println!("Converter:");
    let converter = Converter::new(effective.converter.clone());
    match which::which(&effective.converter.program) {
        Ok(path) => println!("  Program: {} (found at {})", effective.converter.program, path.display()),
        Err(_) => println!("  Program: {} (not found)", effective.converter.program),
    }
    println!("  Args: {}", effective.converter.args.join(" "));
    if !converter.uses_placeholders() {
        println!("  Note: no placeholders; converter must locate files by convention");
    }
    println!("  Timeout: {}s", effective.converter.timeout.as_secs());
    println!("  Verify output: {}", effective.converter.verify_output);

    println!();
    println!("Storage:");
    println!("  Work dir: {}", effective.work_dir.display());
    println!("  Layout: {}", effective.layout);

    println!();
    println!("Server:");
    println!("  Listen: {}:{}", effective.bind, effective.port);
    println!("  Upload limit: {} MB", effective.upload_limit / (1024 * 1024));
    println!("  Workers: {}", effective.workers);

    println!();
    println!("Config File Locations:");
    match config_path {
        Some(path) => println!("  Explicit: {}", path.display()),
        None => {
            for path in Config::search_paths() {
                let marker = if path.is_file() { "found" } else { "absent" };
                println!("  {} ({})", path.display(), marker);
            }
        }
    }

    Ok(())
}
