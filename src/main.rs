//! CLI for ackline
//!
//! Subcommands:
//! - `demo`: run the messaging scenario tour against the configured broker
//! - `receive`: take one message off a destination and print it

use std::time::Duration;

use ackline::Messaging;
use ackline::config::load_config;
use ackline::consumer::{AckMode, Delivery};
use ackline::message::{ConverterRegistry, DeliveryMode, Order, Payload, Priority};
use ackline::utils::error::ProcessingError;
use ackline::utils::logging;
use clap::Parser;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "ackline")]
enum Command {
    /// Run the send/receive scenarios with listeners attached
    Demo,
    /// Receive a single message from a destination
    Receive {
        /// Logical destination name
        destination: String,
        /// How long to wait for a message
        #[arg(long, default_value_t = 5000)]
        timeout_ms: u64,
    },
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let cmd = Command::parse();

    let settings = match load_config() {
        Ok(settings) => settings,
        Err(e) => {
            logging::init("info");
            error!("Failed to load configuration: {e}");
            return;
        }
    };
    logging::init(&settings.logging.level);

    let mut converters = ConverterRegistry::new();
    converters.register::<Order>(Order::TYPE_TAG);

    let messaging = match Messaging::open(settings, converters) {
        Ok(messaging) => messaging,
        Err(e) => {
            error!("Failed to open messaging: {e}");
            return;
        }
    };

    let outcome = match cmd {
        Command::Demo => run_demo(&messaging).await,
        Command::Receive {
            destination,
            timeout_ms,
        } => run_receive(&messaging, &destination, timeout_ms).await,
    };
    if let Err(e) = outcome {
        error!("Command failed: {e}");
    }

    messaging.close();
}

async fn run_receive(
    messaging: &Messaging,
    destination: &str,
    timeout_ms: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    let received = messaging
        .receiver()
        .receive_from(destination, Duration::from_millis(timeout_ms))
        .await?;
    match received {
        Some(envelope) => info!("Received {} from {destination}: {}", envelope.id, envelope.payload),
        None => info!("No message on {destination} within {timeout_ms}ms"),
    }
    Ok(())
}

async fn run_demo(messaging: &Messaging) -> Result<(), Box<dyn std::error::Error>> {
    let mut dispatcher = messaging.dispatcher();
    let registry = messaging.registry();

    dispatcher.register_configured("myQueue", |delivery: Delivery| async move {
        info!("myQueue received: {}", delivery.envelope.payload);
        Ok::<(), ProcessingError>(())
    })?;
    dispatcher.register_configured("orderQueue", |delivery: Delivery| async move {
        let order: Order = delivery.decode()?;
        info!("orderQueue received order: {order}");
        Ok::<(), ProcessingError>(())
    })?;
    dispatcher.register_listener(
        registry.resolve("clientAckQueue"),
        AckMode::Client,
        1,
        |delivery: Delivery| async move {
            info!("clientAckQueue received: {}", delivery.envelope.payload);
            delivery
                .acknowledge()
                .map_err(|e| ProcessingError::new(e.to_string()))?;
            info!("clientAckQueue acknowledged {}", delivery.envelope.id);
            Ok::<(), ProcessingError>(())
        },
    )?;
    dispatcher.register_listener(
        registry.resolve("transactionalQueue"),
        AckMode::Transacted,
        1,
        |delivery: Delivery| async move {
            info!("transactionalQueue received: {}", delivery.envelope.payload);
            Ok::<(), ProcessingError>(())
        },
    )?;
    dispatcher.start()?;

    let producer = messaging.producer();

    info!("Scenario 1: plain text with deployment defaults");
    producer.send_text("myQueue", "Hello from the ackline producer (plain text)!")?;

    info!("Scenario 2: structured order");
    let order = Order::new("ORDER-1001", "Gaming PC", 1, 1500.00);
    producer.send_object(&registry.resolve("orderQueue"), &order)?;

    info!("Scenario 3: message for the CLIENT acknowledge listener");
    producer.send_text("clientAckQueue", "Message for client acknowledgment!")?;

    info!("Scenario 4: durable, priority 9, 60s ttl");
    producer.send_with_qos(
        &registry.resolve("myQueue"),
        "This message is DURABLE!",
        DeliveryMode::Durable,
        Priority::HIGHEST,
        Duration::from_millis(60_000),
    )?;

    info!("Scenario 5: transient, priority 0, 5s ttl");
    producer.send_with_qos(
        &registry.resolve("myQueue"),
        "This message is TRANSIENT with a short ttl!",
        DeliveryMode::Transient,
        Priority::LOWEST,
        Duration::from_millis(5_000),
    )?;

    info!("Scenario 6: transactional send (commit)");
    let transactional = registry.resolve("transactionalQueue");
    producer.send_transactional(&transactional, vec![Payload::from("Transaction will commit.")])?;

    info!("Scenario 7: transactional send (rollback)");
    let mut tx = producer.begin()?;
    producer.send_with_default_qos(&transactional, "Transaction will rollback!")?;
    warn!("Simulated failure inside transaction {}; rolling back", tx.id());
    tx.rollback();

    info!("Scenario 8: synchronous receive");
    let receiver = messaging.receiver();
    producer.send_text("syncRequestQueue", "Request for synchronous reply!")?;
    match receiver
        .receive_from("syncRequestQueue", Duration::from_millis(5_000))
        .await?
    {
        Some(envelope) => info!("Synchronously received: '{}'", envelope.payload),
        None => warn!("Nothing received from syncRequestQueue"),
    }

    let empty = receiver
        .receive_from("emptyQueue", Duration::from_millis(2_000))
        .await?;
    info!("Received from emptyQueue (expected none): {empty:?}");

    // give the listeners a moment to drain before stopping
    tokio::time::sleep(Duration::from_millis(500)).await;
    dispatcher.shutdown().await;

    for name in ["myQueue", "orderQueue", "clientAckQueue", "transactionalQueue"] {
        let stats = messaging.stats(name);
        info!(
            "{name}: enqueued {} acknowledged {} redelivered {} expired {} dead-lettered {}",
            stats.enqueued, stats.acknowledged, stats.redelivered, stats.expired, stats.dead_lettered
        );
    }
    Ok(())
}
