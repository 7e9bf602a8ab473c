//! Polling API example - direct control over the event loop.
//!
//! Run with: cargo run -p mqwire-client --example polling
//!
//! This style is ideal for:
//! - Custom event loops
//! - Embedding in game loops or other polling systems

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mqwire_client::{
    handler_fn, Client, ClientConfig, ClientEvent, Message, QoS, SubscriptionRegistry,
    TcpTransport,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // Configure the client; the transport carries the address.
    let transport = TcpTransport::connect("localhost:1883", Duration::from_secs(10))?;
    let config = ClientConfig::new("polling-example")
        .clean_session(true)
        .keep_alive(30);
    let mut client = Client::new(config, transport, SubscriptionRegistry::new());

    println!("Connecting to broker...");
    client.connect()?;

    let received = Arc::new(AtomicU32::new(0));

    // Main event loop
    loop {
        // Poll with 100ms timeout
        client.poll(Some(Duration::from_millis(100)))?;

        // Process all pending events
        while let Some(event) = client.next_event() {
            match event {
                ClientEvent::Connected { session_present } => {
                    println!("Connected! Session present: {}", session_present);

                    // Matching messages go to the handler, not the event queue.
                    let counter = received.clone();
                    client.subscribe(
                        "example/polling/#",
                        QoS::AtLeastOnce,
                        handler_fn(move |message: &Message| {
                            println!(
                                "Message: {} -> {} (QoS={:?}, retain={})",
                                message.topic,
                                String::from_utf8_lossy(&message.payload),
                                message.qos,
                                message.retain
                            );
                            counter.fetch_add(1, Ordering::Relaxed);
                        }),
                    )?;

                    // Publish a test message
                    client.publish(
                        "example/polling/hello",
                        &b"Hello from polling client!"[..],
                        QoS::AtLeastOnce,
                        false,
                    )?;
                }

                ClientEvent::SubAck {
                    packet_id,
                    return_codes,
                } => {
                    println!("Subscribed (packet_id={}): {:?}", packet_id, return_codes);
                }

                ClientEvent::Published { packet_id } => {
                    println!("Publish acknowledged (packet_id={})", packet_id);
                }

                ClientEvent::Message(message) => {
                    // Only messages no handler matched end up here.
                    println!("Unhandled message on {}", message.topic);
                }

                ClientEvent::Disconnected { reason } => {
                    println!("Disconnected: {:?}", reason);
                    return Ok(());
                }

                _ => {}
            }
        }

        // Exit after receiving our own message back.
        if received.load(Ordering::Relaxed) >= 1 {
            println!("Done, disconnecting...");
            client.disconnect()?;
        }
    }
}
