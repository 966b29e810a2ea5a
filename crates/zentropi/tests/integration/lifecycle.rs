//! Start, stop, failure and duplicate handling across agents

use crate::{halt, pair, run_both, SCENARIO_LIMIT};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use zentropi::prelude::*;
use zentropi::AgentStatus;

#[tokio::test]
async fn test_stop_closes_connections() -> anyhow::Result<()> {
    let runtime = Runtime::new();
    let agent = Agent::builder("short-lived")
        .runtime(runtime.clone())
        .handler(Handler::on_event(STARTED, |agent, _| {
            agent.stop()?;
            Ok(())
        }))
        .build()?;
    agent.bind("inmemory://brief", None).await?;
    agent.join("lobby", None).await?;
    assert!(agent.is_connected().await);

    tokio::time::timeout(SCENARIO_LIMIT, agent.run()).await??;

    assert_eq!(agent.status(), AgentStatus::Stopped);
    assert!(!agent.is_connected().await);
    assert!(runtime.broker("inmemory://brief")?.agents(None)?.is_empty());
    assert!(matches!(agent.stop(), Err(AgentError::AlreadyStopping)));
    assert!(matches!(agent.run().await, Err(AgentError::AlreadyRunning)));
    Ok(())
}

#[tokio::test]
async fn test_duplicate_frames_handled_once() -> anyhow::Result<()> {
    let runtime = Runtime::new();
    let hellos = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&hellos);
    let host = Agent::builder("host")
        .runtime(runtime.clone())
        .handler(Handler::on_message("hello", move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }))
        .handler(Handler::on_message("bye", |agent, _| {
            agent.stop()?;
            Ok(())
        }))
        .build()?;

    let guest = Agent::builder("guest")
        .runtime(runtime.clone())
        .handler(Handler::on_event(STARTED, |agent, _| {
            agent.send(Frame::message("hello").id("hello-once"))?;
            agent.send(Frame::message("hello").id("hello-once"))?;
            agent.message("bye")?;
            agent.stop()?;
            Ok(())
        }))
        .build()?;

    pair(&host, &guest, "inmemory://dedup", "lobby").await?;
    run_both(&host, &guest).await?;

    assert_eq!(hellos.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn test_handler_failure_stops_agent() -> anyhow::Result<()> {
    let agent = Agent::builder("fragile")
        .handler(Handler::on_event(STARTED, |agent, _| {
            agent.emit("break", Default::default())?;
            Ok(())
        }))
        .handler(Handler::on_event("break", |_, _| -> anyhow::Result<()> {
            anyhow::bail!("snapped")
        }))
        .build()?;

    tokio::time::timeout(SCENARIO_LIMIT, agent.run()).await??;
    assert!(agent.should_stop());
    assert_eq!(agent.status(), AgentStatus::Stopped);
    Ok(())
}

#[tokio::test]
async fn test_state_veto_keeps_agent_running() -> anyhow::Result<()> {
    let runtime = Runtime::new();
    let host = Agent::builder("thermostat")
        .runtime(runtime.clone())
        .handler(Handler::on_state("temperature", |_, frame| {
            let value = frame.get("value").and_then(|v| v.as_i64()).unwrap_or_default();
            Ok((10..=30).contains(&value))
        }))
        .handler(
            Handler::on_message("set {degrees:d}", |agent, frame| {
                let degrees = frame.get("degrees").cloned().unwrap_or_default();
                let accepted = agent.set_state("temperature", degrees)?;
                Ok(if accepted { "ok" } else { "refused" })
            })
            .parse(),
        )
        .build()?;
    host.set_state("temperature", 20)?;

    let replies = Arc::new(std::sync::Mutex::new(Vec::<String>::new()));
    let log = Arc::clone(&replies);
    let stopper = host.clone();
    let guest = Agent::builder("resident")
        .runtime(runtime.clone())
        .handler(Handler::on_event(STARTED, |agent, _| {
            agent.message("set 45")?;
            agent.message("set 22")?;
            Ok(())
        }))
        .handler(Handler::on_message(CATCH_ALL, move |agent, frame| {
            let mut log = log.lock().unwrap();
            log.push(frame.name().to_string());
            if log.len() == 2 {
                agent.stop()?;
                halt(&stopper);
            }
            Ok(())
        }))
        .build()?;

    pair(&host, &guest, "inmemory://thermostat", "home").await?;
    run_both(&host, &guest).await?;

    assert_eq!(*replies.lock().unwrap(), vec!["refused", "ok"]);
    assert_eq!(host.state("temperature")?, Some(serde_json::json!(22)));
    Ok(())
}
