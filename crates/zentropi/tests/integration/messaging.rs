//! Messages, replies and requests between two agents

use crate::{halt, pair, run_both};
use serde_json::{json, Map};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use zentropi::prelude::*;

#[tokio::test]
async fn test_ping_pong() -> anyhow::Result<()> {
    let runtime = Runtime::new();
    let heard = Arc::new(Mutex::new(Vec::<Frame>::new()));

    let host = Agent::builder("host")
        .runtime(runtime.clone())
        .handler(Handler::on_message("ping", |_, _| Ok("pong")))
        .build()?;

    let log = Arc::clone(&heard);
    let stopper = host.clone();
    let guest = Agent::builder("guest")
        .runtime(runtime.clone())
        .handler(Handler::on_event(STARTED, |agent, _| {
            agent.message("ping")?;
            Ok(())
        }))
        .handler(Handler::on_message("pong", move |agent, frame| {
            log.lock().unwrap().push(frame.clone());
            agent.stop()?;
            halt(&stopper);
            Ok(())
        }))
        .build()?;

    pair(&host, &guest, "inmemory://ping-pong", "lobby").await?;
    run_both(&host, &guest).await?;

    let heard = heard.lock().unwrap();
    assert_eq!(heard.len(), 1);
    assert_eq!(heard[0].source(), Some("host"));
    assert_eq!(heard[0].target(), Some("guest"));
    assert_eq!(heard[0].text(), Some("pong"));
    Ok(())
}

#[tokio::test]
async fn test_event_reaches_peer_once() -> anyhow::Result<()> {
    let runtime = Runtime::new();
    let sources = Arc::new(Mutex::new(Vec::<Option<String>>::new()));

    let log = Arc::clone(&sources);
    let a = Agent::builder("a")
        .runtime(runtime.clone())
        .handler(Handler::on_event("ping", move |agent, frame| {
            log.lock().unwrap().push(frame.source().map(str::to_string));
            agent.stop()?;
            Ok(())
        }))
        .build()?;

    let b = Agent::builder("b")
        .runtime(runtime.clone())
        .handler(Handler::on_event(STARTED, |agent, _| {
            agent.emit("ping", Map::new())?;
            agent.stop()?;
            Ok(())
        }))
        .build()?;

    pair(&a, &b, "inmemory://x", "room").await?;
    run_both(&a, &b).await?;

    assert_eq!(*sources.lock().unwrap(), vec![Some("b".to_string())]);
    Ok(())
}

#[tokio::test]
async fn test_parsed_reply_is_threaded() -> anyhow::Result<()> {
    let runtime = Runtime::new();
    let sent = Arc::new(Mutex::new(None::<String>));
    let replies = Arc::new(Mutex::new(Vec::<Frame>::new()));

    let host = Agent::builder("weather")
        .runtime(runtime.clone())
        .handler(
            Handler::on_message("what is the weather in {city}?", |_, frame| {
                Ok(format!("sunny in {}", frame.get_str("city").unwrap_or("nowhere")))
            })
            .parse(),
        )
        .build()?;

    let outgoing = Arc::clone(&sent);
    let log = Arc::clone(&replies);
    let stopper = host.clone();
    let guest = Agent::builder("traveller")
        .runtime(runtime.clone())
        .handler(Handler::on_event(STARTED, move |agent, _| {
            let frame = agent.send(
                Frame::message_text("What is the weather in Lisbon?").space("lobby"),
            )?;
            *outgoing.lock().unwrap() = Some(frame.id().to_string());
            Ok(())
        }))
        .handler(Handler::on_message(CATCH_ALL, move |agent, frame| {
            log.lock().unwrap().push(frame.clone());
            agent.stop()?;
            halt(&stopper);
            Ok(())
        }))
        .build()?;

    pair(&host, &guest, "inmemory://weather", "lobby").await?;
    run_both(&host, &guest).await?;

    let replies = replies.lock().unwrap();
    assert_eq!(replies.len(), 1);
    let reply = &replies[0];
    assert_eq!(reply.text(), Some("sunny in Lisbon"));
    assert_eq!(reply.reply_to(), sent.lock().unwrap().as_deref());
    assert_eq!(reply.space(), Some("lobby"));
    Ok(())
}

#[tokio::test]
async fn test_request_response_across_agents() -> anyhow::Result<()> {
    let runtime = Runtime::new();
    let answer = Arc::new(Mutex::new(None::<Frame>));

    let host = Agent::builder("calculator")
        .runtime(runtime.clone())
        .handler(Handler::sync(Kind::Request, "add", |_, frame| {
            let sum: i64 = ["a", "b"]
                .iter()
                .filter_map(|key| frame.get(key).and_then(|v| v.as_i64()))
                .sum();
            Ok(sum.to_string())
        }))
        .build()?;

    let result = Arc::clone(&answer);
    let stopper = host.clone();
    let guest = Agent::builder("student")
        .runtime(runtime.clone())
        .handler(Handler::asynchronous(Kind::Event, STARTED, move |agent, _| {
            let result = Arc::clone(&result);
            let stopper = stopper.clone();
            async move {
                let mut data = Map::new();
                data.insert("a".into(), json!(2));
                data.insert("b".into(), json!(40));
                let response = agent.request("add", data, Some(Duration::from_secs(2))).await?;
                *result.lock().unwrap() = Some(response);
                agent.stop()?;
                halt(&stopper);
                Ok::<_, anyhow::Error>(())
            }
        }))
        .build()?;

    pair(&host, &guest, "inmemory://calculator", "maths").await?;
    run_both(&host, &guest).await?;

    let response = answer.lock().unwrap().take().expect("no response");
    assert_eq!(response.kind(), Kind::Response);
    assert_eq!(response.text(), Some("42"));
    assert_eq!(response.source(), Some("calculator"));
    Ok(())
}

#[tokio::test]
async fn test_fuzzy_handler_across_agents() -> anyhow::Result<()> {
    let runtime = Runtime::new();
    let replies = Arc::new(Mutex::new(Vec::<String>::new()));

    let host = Agent::builder("oracle")
        .runtime(runtime.clone())
        .handler(Handler::on_message("will it rain today", |_, _| Ok("no")).fuzzy())
        .build()?;

    let log = Arc::clone(&replies);
    let stopper = host.clone();
    let guest = Agent::builder("farmer")
        .runtime(runtime.clone())
        .handler(Handler::on_event(STARTED, |agent, _| {
            agent.message("Will it rain today?")?;
            Ok(())
        }))
        .handler(Handler::on_message("no", move |agent, frame| {
            log.lock().unwrap().push(frame.text().unwrap_or_default().to_string());
            agent.stop()?;
            halt(&stopper);
            Ok(())
        }))
        .build()?;

    pair(&host, &guest, "inmemory://oracle", "field").await?;
    run_both(&host, &guest).await?;

    assert_eq!(*replies.lock().unwrap(), vec!["no".to_string()]);
    Ok(())
}
