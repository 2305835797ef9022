use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use std::thread;

pub mod bridge;
pub mod config;
pub mod error;
pub mod metrics;
pub mod native;
pub mod types;
pub mod value;

use bridge::Bridge;
use config::BridgeConfig;
use native::{HostObjects, ObjectSystem};
use types::{NativeHandle, TypeDescriptor};
use value::Value;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Exercises the proxy bridge against the in-process object host"
)]
pub struct Args {
    /// Objects wrapped per round
    #[arg(short, long, default_value_t = 1000)]
    pub objects: usize,
    /// Threads acting as external holders
    #[arg(short, long, default_value_t = 4)]
    pub workers: usize,
    #[arg(short, long, default_value_t = 3)]
    pub rounds: usize,
    /// Overrides PROXY_BRIDGE_COLLECT_THRESHOLD; 0 disables automatic collection
    #[arg(long, value_name = "PROXIES")]
    pub collect_threshold: Option<usize>,
    /// Log bridge activity to stderr
    #[arg(long)]
    pub trace: bool,
}

fn init_tracing(enabled: bool) {
    if !enabled {
        return;
    }
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(tracing::Level::DEBUG)
        .with_ansi(false)
        .try_init();
}

/// Has every worker take (or drop) one external reference on its share of `objects`.
fn hold_externally(host: &Arc<HostObjects>, objects: &[NativeHandle], workers: usize, take: bool) {
    let chunk = objects.len().div_ceil(workers.max(1)).max(1);
    thread::scope(|s| {
        for share in objects.chunks(chunk) {
            let host = host.clone();
            s.spawn(move || {
                for &object in share {
                    if take {
                        host.ref_object(object);
                    } else {
                        host.unref_object(object);
                    }
                }
            });
        }
    });
}

pub fn run_cli() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.trace);

    let mut config = BridgeConfig::from_env();
    if let Some(threshold) = args.collect_threshold {
        config.collect_threshold = (threshold > 0).then_some(threshold);
    }

    let host = Arc::new(HostObjects::new());
    let widget = host.define_type("DemoWidget", host.object_type());
    let mut bridge = Bridge::new(host.clone(), config);
    bridge
        .types_mut()
        .register(TypeDescriptor::new("Demo.Widget", widget).with_class_record("Demo.WidgetClass"));

    for round in 0..args.rounds {
        let objects: Vec<_> = (0..args.objects)
            .map(|_| host.new_instance(widget, true))
            .collect();

        // external holders first, so automatic collections cannot reclaim anything yet
        hold_externally(&host, &objects, args.workers, true);
        let mut failed = bridge.enter(|ctx| {
            objects.iter().enumerate().any(|(i, &object)| {
                let proxy = ctx.native_to_handle(Some(object), false);
                ctx.access(proxy, "index", Some(Value::Integer(i as i64)))
                    .is_err()
            })
        });

        bridge.collect();
        let retained = bridge.enter(|ctx| {
            objects
                .iter()
                .enumerate()
                .filter(|&(i, &object)| {
                    let Some(proxy) = ctx.lookup(object) else {
                        return false;
                    };
                    let index = ctx.access(proxy.into(), "index", None);
                    ctx.is_strongly_cached(object)
                        && matches!(index, Ok(Value::Integer(n)) if n == i as i64)
                })
                .count()
        });

        hold_externally(&host, &objects, args.workers, false);
        bridge.collect();
        let survivors = objects.iter().filter(|&&o| host.is_alive(o)).count();

        failed |= retained != objects.len() || survivors != 0;
        println!(
            "round {round}: wrapped {}, retained {retained} while held, {survivors} survived release",
            objects.len()
        );
        if failed {
            eprintln!("round {round} left the cache inconsistent");
            return ExitCode::FAILURE;
        }
    }

    let metrics = bridge.metrics();
    bridge.close();
    println!("{metrics:#?}");
    println!("live native objects: {}", host.live_count());

    if host.live_count() == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
