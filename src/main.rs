//! Demand Pager - Demo Scenario
//!
//! Usage: demand-pager [OPTIONS]
//!
//! Builds a small simulated machine, runs a paging-heavy workload against
//! it (more virtual pages than physical frames, so the clock policy and the
//! swap file get real work), verifies every byte that went in comes back
//! out, and prints the paging counters.
//!
//! Options:
//!   -f, --frames N  Number of physical frames (default 16)
//!   -p, --pages N   Virtual pages per process (default 24)
//!   -v, --verbose   Log the fault/eviction traffic as it happens
//!   -h, --help      Print help information

use std::env;
use std::process;
use std::sync::Arc;

use log::info;

use demand_pager::constants::{DEFAULT_NUM_FRAMES, PAGE_SIZE, make_address};
use demand_pager::{
    DirectMapped, PagedSpace, ProgramImage, TranslationStrategy, VmError, VmManager,
};

struct Config {
    frames: usize,
    pages: usize,
    verbose: bool,
}

fn main() {
    let config = match parse_args() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            process::exit(1);
        }
    };

    env_logger::Builder::new()
        .filter_level(if config.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .parse_default_env()
        .init();

    if let Err(e) = run(&config) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn print_help(program: &str) {
    eprintln!("Demand Pager - demand-paged virtual memory demo");
    eprintln!();
    eprintln!("Usage: {} [OPTIONS]", program);
    eprintln!();
    eprintln!("Options:");
    eprintln!("  -f, --frames N  Number of physical frames (default 16)");
    eprintln!("  -p, --pages N   Virtual pages per paged process (default 24)");
    eprintln!("  -v, --verbose   Log fault/eviction traffic");
    eprintln!("  -h, --help      Print this help message");
}

fn parse_args() -> Result<Config, String> {
    let args: Vec<String> = env::args().collect();
    let program = &args[0];

    let mut config = Config {
        frames: DEFAULT_NUM_FRAMES,
        pages: 24,
        verbose: false,
    };

    let mut iter = args[1..].iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-h" | "--help" => {
                print_help(program);
                process::exit(0);
            }
            "-v" | "--verbose" => {
                config.verbose = true;
            }
            "-f" | "--frames" => {
                let value = iter.next().ok_or("--frames requires a value")?;
                config.frames = value
                    .parse()
                    .map_err(|_| format!("Invalid frame count: {}", value))?;
            }
            "-p" | "--pages" => {
                let value = iter.next().ok_or("--pages requires a value")?;
                config.pages = value
                    .parse()
                    .map_err(|_| format!("Invalid page count: {}", value))?;
            }
            _ => {
                return Err(format!(
                    "Unknown option: {}\nUse --help for usage information.",
                    arg
                ));
            }
        }
    }

    if config.frames < 2 {
        return Err("Need at least 2 physical frames".to_string());
    }
    Ok(config)
}

/// A recognizable pseudo-random page body.
fn page_pattern(seed: usize) -> Vec<u8> {
    (0..PAGE_SIZE).map(|i| (seed.wrapping_mul(37) + i) as u8).collect()
}

fn run(config: &Config) -> Result<(), VmError> {
    let swap_path = env::temp_dir().join(format!("demand-pager-{}.swap", process::id()));
    let manager = Arc::new(VmManager::new(config.frames, &swap_path)?);

    // One read-only "code" segment shared by both process images.
    let code = page_pattern(0xc0de);
    let mut image = ProgramImage::new();
    image.push_segment(&code, true);

    // A paged process with far more pages than the machine has frames, and
    // a small direct-mapped one beside it, the two strategies coexisting.
    let paged = PagedSpace::new(Arc::clone(&manager), Box::new(image), config.pages);

    let mut direct_image = ProgramImage::new();
    direct_image.push_segment(&code, true);
    let direct = DirectMapped::new(Arc::clone(&manager), &direct_image, 2)?;

    info!(
        "workload: {} paged pages + {} direct pages over {} frames",
        paged.num_pages(),
        direct.num_pages(),
        config.frames
    );

    // Fill every writable paged page, then read everything back twice so a
    // good share of pages has to take the swap round trip.
    let first_data_page = 1; // page 0 is the read-only code page
    for vpn in first_data_page..paged.num_pages() {
        let written = paged.write_virtual_memory(make_address(vpn, 0), &page_pattern(vpn));
        assert_eq!(written, PAGE_SIZE, "write to page {vpn} was truncated");
    }

    let mut mismatches = 0usize;
    for pass in 1..=2 {
        for vpn in first_data_page..paged.num_pages() {
            let mut buf = vec![0u8; PAGE_SIZE];
            let read = paged.read_virtual_memory(make_address(vpn, 0), &mut buf);
            if read != PAGE_SIZE || buf != page_pattern(vpn) {
                mismatches += 1;
            }
        }
        info!("verify pass {pass} complete");
    }

    // The code page is loadable from its segment in both spaces and
    // rejects writes through either strategy.
    let mut code_buf = vec![0u8; PAGE_SIZE];
    paged.read_virtual_memory(0, &mut code_buf);
    if code_buf != code {
        mismatches += 1;
    }
    direct.read_virtual_memory(0, &mut code_buf);
    if code_buf != code {
        mismatches += 1;
    }
    if paged.write_virtual_memory(0, &[0u8; 16]) != 0 || direct.write_virtual_memory(0, &[0u8; 16]) != 0 {
        mismatches += 1;
    }

    let stats = manager.stats();
    info!("=== paging summary ===");
    info!("page faults:   {}", stats.page_faults());
    info!("evictions:     {}", stats.evictions());
    info!("swap-outs:     {}", stats.swap_outs());
    info!("swap-ins:      {}", stats.swap_ins());
    info!("segment loads: {}", stats.segment_loads());
    info!("zero fills:    {}", stats.zero_fills());
    info!(
        "swap file:     {} slots, {} free, {} bytes",
        manager.swap().slot_count(),
        manager.swap().free_slot_count(),
        manager.swap().file_len()
    );

    drop(paged);
    drop(direct);

    if mismatches > 0 {
        eprintln!("FAILED: {mismatches} verification mismatches");
        process::exit(1);
    }
    info!("all verifications passed");
    Ok(())
}
