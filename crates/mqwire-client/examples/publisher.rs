//! Cross-thread publishing with a Publisher handle.
//!
//! Run with: cargo run -p mqwire-client --example publisher
//!
//! One thread drives the client's poll loop; the main thread hands
//! messages over through the cloneable Publisher and blocks on each
//! QoS 1 acknowledgment.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use mqwire_client::{Client, ClientConfig, ClientEvent, QoS, SubscriptionRegistry, TcpTransport};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let transport = TcpTransport::connect("localhost:1883", Duration::from_secs(10))?;
    let config = ClientConfig::new("publisher-example").keep_alive(30);
    let mut client = Client::new(config, transport, SubscriptionRegistry::new());
    client.connect()?;

    let publisher = client.publisher();
    let done = Arc::new(AtomicBool::new(false));
    let stop = done.clone();

    // The poll loop owns the client from here on.
    let poller = thread::spawn(move || -> mqwire_client::Result<()> {
        loop {
            client.poll(Some(Duration::from_millis(100)))?;
            while let Some(event) = client.next_event() {
                match event {
                    ClientEvent::Connected { session_present } => {
                        println!("Connected (session_present: {})", session_present);
                    }
                    ClientEvent::Disconnected { reason } => {
                        println!("Disconnected: {:?}", reason);
                        return Ok(());
                    }
                    other => println!("Event: {:?}", other),
                }
            }
            if stop.load(Ordering::Relaxed) && client.is_connected() {
                client.disconnect()?;
            }
        }
    });

    // Each call blocks until the broker acknowledges the message.
    for i in 0..5 {
        let payload = format!("reading {}", i);
        let packet_id =
            publisher.publish_acked("telemetry/readings", payload, QoS::AtLeastOnce, false)?;
        println!("Delivered reading {} as packet {:?}", i, packet_id);
        thread::sleep(Duration::from_millis(500));
    }

    done.store(true, Ordering::Relaxed);
    poller.join().expect("poll thread panicked")?;
    Ok(())
}
