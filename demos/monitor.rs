use std::env;

use gree_hp::{DeviceConfig, DeviceHandle, GreeClientBuilder};

#[tokio::main]
async fn main() -> gree_hp::Result<()> {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = env::args().collect();
    let Some(path) = args.get(1) else {
        eprintln!("usage: monitor <device-config.json>");
        std::process::exit(2);
    };
    let config = DeviceConfig::from_json(&std::fs::read_to_string(path)?)?;

    let client = GreeClientBuilder::from_config(&config)?
        .on_event(|event| {
            println!("{event:?}");
        })
        .on_snapshot(|state| {
            let unit = state.unit.symbol();
            let mut line = format!(
                "power: {} | mode: {}",
                state.power.map_or("?", |on| if on { "on" } else { "off" }),
                state.mode.as_deref().unwrap_or("?"),
            );
            for (name, value) in &state.targets {
                line.push_str(&format!(" | {name} set {value:.1}{unit}"));
            }
            for (name, value) in &state.sensors {
                line.push_str(&format!(" | {name} {value:.1}{unit}"));
            }
            println!("{line}");
        })
        .build()?;

    println!("Polling {} every {:?}...", config.host, config.scan_interval());
    let handle = DeviceHandle::new(client);
    let poller = handle.spawn_poller(config.scan_interval());

    tokio::signal::ctrl_c().await?;
    poller.shutdown();
    Ok(())
}
