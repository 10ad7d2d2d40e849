use std::sync::Arc;

use pacer::{
    util::{formatted_size, MB},
    AccountingHeap, DynamicConfig, HeapOptions, Installer, PacerOptions, Policy,
};

static PACER: Installer = Installer::new();

/// Each round builds this much, keeps a growing share of it and "collects".
const ROUND: u64 = 64 * MB;

fn main() {
    tracing_subscriber::fmt().with_target(false).init();

    let percent = std::env::args()
        .nth(1)
        .and_then(|arg| arg.parse::<f64>().ok())
        .unwrap_or(50.0);

    let heap = Arc::new(AccountingHeap::new(HeapOptions {
        capacity: Some(1024 * MB),
        verbose: true,
        ..HeapOptions::default()
    }));
    let config = match DynamicConfig::new(Policy::budget(percent)) {
        Ok(config) => Arc::new(config),
        Err(err) => {
            eprintln!("{}", err);
            std::process::exit(1);
        }
    };
    let controller = match PACER.install(
        PacerOptions::new()
            .with_config_source(config.clone())
            .with_collector(heap.clone()),
    ) {
        Ok(controller) => controller,
        Err(err) => {
            eprintln!("{}", err);
            std::process::exit(1);
        }
    };

    let mut live = 0;
    for round in 0..12u64 {
        live += ROUND / 4;
        let mut allocated = 0;
        while allocated < ROUND {
            allocated += MB;
            if heap.record_allocation(MB) {
                heap.finish_cycle(live);
            }
        }
        if round == 6 {
            // Switch to a fixed ratio half way through.
            if let Err(err) = config.set(Policy::ratio(300)) {
                eprintln!("{}", err);
            }
        }
        std::thread::sleep(std::time::Duration::from_millis(10));
    }

    println!(
        "{} cycles, live {}, next collection at {}",
        heap.cycles(),
        formatted_size(heap.live()),
        formatted_size(heap.next_collection_threshold())
    );
    println!("{}", controller.statistics());
    controller.shutdown();
}
