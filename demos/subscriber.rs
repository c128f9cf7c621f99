use ringcast::{BrokerConfig, Subscriber};
use std::env;

#[tokio::main]
async fn main() {
    let prefix = env::args().nth(1).unwrap_or_else(|| "demo".to_string());
    let config = BrokerConfig::default();

    let mut subscriber = match Subscriber::connect(config.publish_addr(), config.connect_timeout()).await {
        Ok(s) => s,
        Err(e) => {
            println!("Failed to connect to broker at {}: {}", config.publish_addr(), e);
            return;
        }
    };
    if let Err(e) = subscriber.subscribe(&prefix).await {
        println!("Failed to subscribe: {}", e);
        return;
    }

    println!("Waiting for publications on '{}' @ {}", prefix, config.publish_addr());
    let mut count = 0u64;
    loop {
        match subscriber.recv().await {
            Ok(frame) => {
                count += 1;
                if frame.ends_with(" stop") {
                    println!("Received {} publications", count);
                }
                println!("{}", frame);
            }
            Err(e) => {
                println!("Error receiving publication: {}", e);
                return;
            }
        }
    }
}
