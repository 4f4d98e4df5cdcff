//! Routing example.
//!
//! Routes the first output device's audio to every other output for a few
//! seconds, then plays a test tone on all of them.
//!
//! Run with: cargo run --example route
//!
//! Set `RUST_LOG=multi_output=debug` to see per-device activity.
//!
//! Note: This example requires at least two output devices and a host with
//! loopback capture support (WASAPI).

use std::sync::Arc;
use std::time::Duration;

use multi_output::backend::CpalBackend;
use multi_output::{
    event_callback, list_output_devices, ChannelMixMode, DeviceId, RoutingConfig, RoutingEvent,
    SessionController, SinkConfiguration, ToneConfig, ToneTester,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("multi_output=info".parse()?))
        .init();

    let backend = Arc::new(CpalBackend::new());
    let devices = list_output_devices(backend.as_ref())?;

    println!("=== Multi-Output Routing ===\n");
    println!("Available output devices:");
    for device in &devices {
        println!("  - {}", device.display_name);
    }

    let Some((source, sinks)) = devices.split_first() else {
        println!("\nNo output devices found.");
        return Ok(());
    };
    if sinks.is_empty() {
        println!("\nNeed at least two output devices.");
        return Ok(());
    }

    // Alternate modes so each output is distinguishable
    let configs: Vec<SinkConfiguration> = sinks
        .iter()
        .enumerate()
        .map(|(i, device)| {
            let mode = if i % 2 == 0 {
                ChannelMixMode::Stereo
            } else {
                ChannelMixMode::Center
            };
            SinkConfiguration::new(device.id.clone(), mode)
        })
        .collect();

    let on_event = event_callback(|event| match event {
        RoutingEvent::SinkSkipped { device_id, reason } => {
            eprintln!("  Skipped {device_id}: {reason}");
        }
        RoutingEvent::BufferOverflow {
            device_id,
            dropped_bytes,
        } => {
            eprintln!("  {device_id} fell behind, dropped {dropped_bytes} bytes");
        }
        other => eprintln!("  Event: {other:?}"),
    });

    let controller =
        SessionController::spawn(backend.clone(), RoutingConfig::default(), Some(on_event))?;

    println!("\nRouting {} to {} device(s) for 5s...", source.display_name, configs.len());
    controller.start(Some(source.id.clone()), configs).await?;

    let mut interval = tokio::time::interval(Duration::from_secs(1));
    for _ in 0..5 {
        interval.tick().await;
        controller.check_health().await?;
        let stats = controller.stats().await?;
        println!(
            "  captured {} bytes, dropped {}, underruns {}",
            stats.captured_bytes, stats.dropped_bytes, stats.underruns
        );
    }

    controller.stop().await?;
    controller.shutdown();

    println!("\nPlaying test tone...");
    let tester = ToneTester::new(backend, ToneConfig::default());
    let ids: Vec<DeviceId> = devices.iter().map(|d| d.id.clone()).collect();
    let report = tester.play_async(ids).await?;
    println!(
        "  Played on {}/{} device(s)",
        report.played.len(),
        report.requested
    );
    for (id, cause) in &report.failed {
        println!("  {id} failed: {cause}");
    }

    println!("\nDone!");
    Ok(())
}
