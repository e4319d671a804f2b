//! CLI command implementations.

use anyhow::{bail, Context, Result};
use dumdum_core::protocol::{Channel, ClientEvent, Message};
use dumdum_core::AsyncClient;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;

/// Wait for the first event `pick` accepts, printing broadcasts seen on the way.
async fn wait_for<T, F>(client: &mut AsyncClient, wait: Duration, what: &str, mut pick: F) -> Result<T>
where
    F: FnMut(ClientEvent) -> Option<T>,
{
    let deadline = tokio::time::Instant::now() + wait;
    loop {
        let event = tokio::time::timeout_at(deadline, client.next_event())
            .await
            .with_context(|| format!("Timed out waiting for {}", what))??
            .with_context(|| format!("Server closed the connection before {}", what))?;
        match pick(event) {
            Some(value) => return Ok(value),
            None => debug!(what, "Skipping unrelated event"),
        }
    }
}

async fn fetch_channels(client: &mut AsyncClient, wait: Duration) -> Result<Vec<Channel>> {
    client.list_channels().await?;
    wait_for(client, wait, "the channel list", |event| match event {
        ClientEvent::ChannelsListed { channels } => Some(channels),
        _ => None,
    })
    .await
}

async fn fetch_history(
    client: &mut AsyncClient,
    wait: Duration,
    channel: &str,
    before: Option<u64>,
    after: Option<u64>,
) -> Result<Vec<Message>> {
    client.list_messages(channel, before, after).await?;
    wait_for(client, wait, "the message history", |event| match event {
        ClientEvent::MessagesListed { messages } => Some(messages),
        _ => None,
    })
    .await
}

fn format_message(message: &Message) -> String {
    let time = message
        .created_at()
        .map(|t| t.with_timezone(&chrono::Local).format("%H:%M:%S").to_string())
        .unwrap_or_else(|| "--:--:--".to_string());
    format!("[{}] <{}> {}", time, message.nick(), message.content())
}

/// List all channels.
pub async fn list_channels(mut client: AsyncClient, wait: Duration, json: bool) -> Result<()> {
    let channels = fetch_channels(&mut client, wait).await?;
    client.close().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&channels)?);
        return Ok(());
    }
    if channels.is_empty() {
        println!("No channels.");
    }
    for channel in &channels {
        println!("{}", channel);
    }
    Ok(())
}

/// Show channel history.
pub async fn show_history(
    mut client: AsyncClient,
    wait: Duration,
    channel: &str,
    before: Option<u64>,
    after: Option<u64>,
    json: bool,
) -> Result<()> {
    let messages = fetch_history(&mut client, wait, channel, before, after).await?;
    client.close().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&messages)?);
        return Ok(());
    }
    println!("#{} ({} messages)", channel, messages.len());
    for message in &messages {
        println!("{}", format_message(message));
    }
    Ok(())
}

/// Post one message and wait for the server to echo it back.
pub async fn send_message(
    mut client: AsyncClient,
    wait: Duration,
    nick: &str,
    channel: &str,
    text: &str,
) -> Result<()> {
    let channels = fetch_channels(&mut client, wait).await?;
    if !channels.iter().any(|c| c.name() == channel) {
        bail!("Channel #{} does not exist", channel);
    }

    client.send_message(channel, text).await?;
    let message = wait_for(&mut client, wait, "the message echo", |event| match event {
        ClientEvent::MessageReceived { message }
            if message.nick() == nick
                && message.channel_name() == channel
                && message.content() == text =>
        {
            Some(message)
        }
        _ => None,
    })
    .await?;
    client.close().await?;

    println!("Sent message {} to #{}", message.id(), channel);
    Ok(())
}

/// Interactive session: print the channel's traffic, post stdin lines.
///
/// `/quit` leaves, `/history` reprints recent messages.
pub async fn chat(mut client: AsyncClient, wait: Duration, channel: &str) -> Result<()> {
    let channels = fetch_channels(&mut client, wait).await?;
    if !channels.iter().any(|c| c.name() == channel) {
        bail!("Channel #{} does not exist", channel);
    }

    for message in fetch_history(&mut client, wait, channel, None, None).await? {
        println!("{}", format_message(&message));
    }
    println!("--- joined #{} (type /quit to leave) ---", channel);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let line = line.trim();
                match line {
                    "" => {}
                    "/quit" => break,
                    "/history" => client.list_messages(channel, None, None).await?,
                    _ => client.send_message(channel, line).await?,
                }
            }
            event = client.next_event() => {
                match event? {
                    Some(ClientEvent::MessageReceived { message }) if message.channel_name() == channel => {
                        println!("{}", format_message(&message));
                    }
                    Some(ClientEvent::MessagesListed { messages }) => {
                        for message in &messages {
                            println!("{}", format_message(message));
                        }
                    }
                    Some(other) => debug!(event = ?other, "Ignoring event"),
                    None => {
                        println!("--- server closed the connection ---");
                        return Ok(());
                    }
                }
            }
        }
    }

    client.close().await?;
    Ok(())
}
