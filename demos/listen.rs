use std::error::Error;

use eventsub_client::eventsub::proto::{topics, SubscriptionRequest};
use eventsub_client::{Credentials, EventSub, EventSubEvent, EventSubOptions};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let credentials = Credentials::from_env()?;
    let broadcaster_id = std::env::var("TWITCH_BROADCASTER_ID")
        .unwrap_or_else(|_| "REPLACE_WITH_BROADCASTER_ID".to_string());

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let (client, mut events) = EventSub::new(credentials, EventSubOptions::default())?;
        client.connect().await?;

        for subscription_type in [topics::CHANNEL_CHEER, topics::CHANNEL_SUBSCRIBE] {
            let request = SubscriptionRequest::new(subscription_type, "1")
                .with_condition("broadcaster_user_id", broadcaster_id.as_str());
            let subscription = client.subscribe(request).await?;
            println!("subscribed id={} type={subscription_type}", subscription.id);
        }

        while let Some(event) = events.recv().await {
            match event {
                EventSubEvent::Topic {
                    subscription_type,
                    event,
                } => println!("{subscription_type}: {event}"),
                EventSubEvent::Error { message } => eprintln!("error: {message}"),
                EventSubEvent::MaxReconnectExceeded => {
                    eprintln!("giving up after repeated reconnect failures");
                    break;
                }
                other => println!("event={}", other.name()),
            }
        }

        client.disconnect().await;
        Ok::<(), Box<dyn Error>>(())
    })?;

    Ok(())
}
