//! Example: Watching a Ranger Sensor
//!
//! This example connects to the first Ranger peripheral in radio range and
//! prints every state transition and measurement update until interrupted
//! with Ctrl-C.
//!
//! Run with: `cargo run --example watch_ranger`

use ranger_core::{BtleCentral, Ranger, RangerEvent};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let ranger = Ranger::new(BtleCentral::new())?;
    let mut events = ranger.subscribe();

    println!("Searching for a Ranger sensor... (Ctrl-C to quit)");
    ranger.start();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(RangerEvent::StateChanged(state)) => println!("state:   {state}"),
                Ok(RangerEvent::RangeChanged(Some(mm))) => println!("range:   {mm} mm"),
                Ok(RangerEvent::BatteryChanged(Some(pct))) => println!("battery: {pct}%"),
                Ok(_) => {}
                Err(err) => {
                    eprintln!("event stream closed: {err}");
                    break;
                }
            },
        }
    }

    println!("Stopping...");
    ranger.stop();
    Ok(())
}
