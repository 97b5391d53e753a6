//! CLI for popmq
//!
//! Subcommands:
//! - `demo`: push messages through an in-process broker and print them
//! - `check`: parse a message selector and report whether it is valid
//! - `config`: print the effective configuration

use std::time::Duration;

use clap::Parser;
use popmq::config::{Settings, load_config};
use popmq::selector::Selector;
use popmq::{AcknowledgeMode, Broker, ConnectionFactory, Message};
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "popmq")]
enum Command {
    /// Send messages to a queue and a topic, then consume them
    Demo {
        /// Number of messages to send
        #[arg(long, default_value_t = 5)]
        count: u32,
        /// Only consume queue messages matching this selector
        #[arg(long)]
        selector: Option<String>,
    },
    /// Validate a message selector
    Check {
        /// Selector expression, e.g. "color = 'red' AND weight > 2"
        selector: String,
    },
    /// Print the configuration after defaults, files and environment are merged
    Config,
}

#[tokio::main]
async fn main() {
    let cmd = Command::parse();

    let settings = match load_config() {
        Ok(settings) => settings,
        Err(e) => {
            popmq::utils::logging::init("info");
            error!("Invalid configuration: {}", e);
            std::process::exit(2);
        }
    };
    popmq::utils::logging::init(&settings.logging.level);

    match cmd {
        Command::Demo { count, selector } => {
            if let Err(e) = run_demo(settings, count, selector.as_deref()).await {
                error!("Demo failed: {}", e);
                std::process::exit(1);
            }
        }
        Command::Check { selector } => match Selector::parse(&selector) {
            Ok(parsed) => println!("ok: {parsed}"),
            Err(e) => {
                println!("{e}");
                std::process::exit(1);
            }
        },
        Command::Config => match serde_json::to_string_pretty(&settings) {
            Ok(json) => println!("{json}"),
            Err(e) => error!("Could not render configuration: {}", e),
        },
    }
}

async fn run_demo(
    settings: Settings,
    count: u32,
    selector: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    let broker = Broker::new(settings);
    let connection = ConnectionFactory::new(broker.clone())
        .with_client_id("popmq-demo")
        .create_connection()?;
    let session = connection.create_session(AcknowledgeMode::Auto)?;

    let queue = session.create_queue("demo.orders")?;
    let topic = session.create_topic("demo.prices")?;
    let queue_consumer = session.create_consumer_with(&queue, selector, false)?;
    let durable = session.create_durable_consumer(&topic, "demo-prices", None, false)?;

    let producer = session.create_producer(None)?;
    for i in 0..count {
        let mut order = Message::text(format!("order #{i}"));
        order.set_property("index", i as i32)?;
        order.set_property("even", i % 2 == 0)?;
        producer.send_to(&queue, &mut order)?;

        let mut price = Message::map();
        price.as_map_mut()?.set("price", 100.0 + f64::from(i))?;
        producer.send_to(&topic, &mut price)?;
    }
    info!("Sent {} message(s) to {} and {}", count, queue, topic);

    connection.start()?;
    while let Some(msg) = queue_consumer
        .receive_timeout(Duration::from_millis(100))
        .await?
    {
        println!(
            "{} {} [{}]",
            queue,
            msg.get_text()?.unwrap_or_default(),
            msg.message_id().unwrap_or("-")
        );
    }
    while let Some(msg) = durable.receive_timeout(Duration::from_millis(100)).await? {
        let price = msg.as_map()?.get_double("price")?.unwrap_or_default();
        println!("{topic} price={price}");
    }
    info!(
        "{} message(s) left on {}",
        broker.queue_depth(queue.name()).unwrap_or(0),
        queue
    );

    durable.close().await?;
    session.unsubscribe("demo-prices")?;
    connection.close().await?;
    broker.shutdown();
    Ok(())
}
