use ringcast::{BrokerConfig, Publisher};
use std::env;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};

const TOPIC: &str = "demo";
const STRESS_COUNT: usize = 5000;

#[tokio::main]
async fn main() {
    let args: Vec<String> = env::args().collect();
    let config = BrokerConfig::default();

    let mut publisher = match Publisher::connect(config.ingest_addr(), config.connect_timeout()).await {
        Ok(p) => p,
        Err(e) => {
            println!("Failed to connect to broker at {}: {}", config.ingest_addr(), e);
            return;
        }
    };

    if args.get(1).map(String::as_str) == Some("stress") {
        run_stress(&mut publisher).await;
    } else {
        run_interactive(&mut publisher).await;
    }
}

async fn run_stress(publisher: &mut Publisher) {
    let start = Instant::now();
    for i in 0..STRESS_COUNT {
        if let Err(e) = publisher.publish(TOPIC, &format!("spam {}", i)).await {
            println!("Failed to publish: {}", e);
            return;
        }
    }
    if let Err(e) = publisher.publish(TOPIC, "stop").await {
        println!("Failed to publish: {}", e);
        return;
    }

    let elapsed = start.elapsed();
    println!(
        "Published {} messages in {:?} ({:.0} msg/s)",
        STRESS_COUNT + 1,
        elapsed,
        (STRESS_COUNT + 1) as f64 / elapsed.max(Duration::from_millis(1)).as_secs_f64()
    );
}

async fn run_interactive(publisher: &mut Publisher) {
    println!("Type a payload and press enter to publish it on '{}'", TOPIC);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        match publisher.publish(TOPIC, &line).await {
            Ok(ack) => println!("{} {} -> {}", TOPIC, line, ack),
            Err(e) => {
                println!("Failed to publish: {}", e);
                return;
            }
        }
    }
}
