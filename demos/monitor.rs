// SPDX-License-Identifier: MPL-2.0

//! Monitor program: log in, list devices and print every switch change.
//!
//! The app id and secret are read from `COOLKIT_APP_ID` and
//! `COOLKIT_APP_SECRET`. Set `RUST_LOG=coolkit_client=debug` to see wire
//! traffic.
//!
//! # Usage
//!
//! ```bash
//! cargo run --example monitor -- <username> <password> <region> [<device-id> <on|off>]
//! ```
//!
//! # Example
//!
//! ```bash
//! COOLKIT_APP_ID=... COOLKIT_APP_SECRET=... \
//!     cargo run --example monitor -- user@example.com secret eu 1000a1b2c3 on
//! ```

use std::env;

use coolkit_client::{AppCredentials, ClientConfig, ClientEvent, CoolkitClient};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("coolkit_client=info")),
        )
        .init();

    let args: Vec<String> = env::args().collect();
    if args.len() != 4 && args.len() != 6 {
        eprintln!("Usage: {} <username> <password> <region> [<device-id> <on|off>]", args[0]);
        std::process::exit(1);
    }

    let app_id = env::var("COOLKIT_APP_ID")?;
    let app_secret = env::var("COOLKIT_APP_SECRET")?;
    let client = CoolkitClient::new(ClientConfig::new(AppCredentials::new(app_id, app_secret)))?;

    let mut events = client.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                ClientEvent::SwitchChanged {
                    device_id,
                    index,
                    state,
                } => println!("{device_id} outlet {index}: {}", if state { "on" } else { "off" }),
                other => println!("event: {other:?}"),
            }
        }
    });

    let tasks = client.start(&args[1], &args[2], &args[3]).await?;

    println!("Devices:");
    for device in client.devices() {
        println!(
            "  {device} name={:?} online={} switches={}",
            device.name(),
            device.is_online(),
            device.switches().len()
        );
    }

    if let [_, _, _, _, device_id, state] = args.as_slice() {
        let outcome = client.set_switch(device_id, 0, state == "on").await?;
        println!("Command for {device_id}: {outcome:?}");
    }

    println!("Listening for updates (Ctrl+C to quit)...");
    tokio::select! {
        result = tasks.listener => println!("Relay closed: {result:?}"),
        _ = tokio::signal::ctrl_c() => println!("Interrupted"),
    }

    tasks.poller.abort();
    client.disconnect().await?;
    Ok(())
}
