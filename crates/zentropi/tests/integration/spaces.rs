//! Joining, leaving and space-scoped delivery

use crate::{halt, SCENARIO_LIMIT};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use zentropi::prelude::*;

#[tokio::test]
async fn test_second_join_reports_failure() -> anyhow::Result<()> {
    let joined = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(Mutex::new(None::<String>));

    let counter = Arc::clone(&joined);
    let conflict = Arc::clone(&failed);
    let agent = Agent::builder("joiner")
        .handler(Handler::sync(Kind::Command, "join", move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }))
        .handler(Handler::sync(Kind::Command, "join-failed", move |agent, frame| {
            *conflict.lock().unwrap() = frame.get_str("space").map(str::to_string);
            agent.stop()?;
            Ok(())
        }))
        .build()?;

    agent.bind("inmemory://joins", None).await?;
    agent.join("lobby", None).await?;
    agent.join("lobby", None).await?;
    tokio::time::timeout(SCENARIO_LIMIT, agent.run()).await??;

    assert_eq!(joined.load(Ordering::SeqCst), 1);
    assert_eq!(failed.lock().unwrap().as_deref(), Some("lobby"));
    Ok(())
}

#[tokio::test]
async fn test_delivery_is_scoped_to_space() -> anyhow::Result<()> {
    let runtime = Runtime::new();
    let endpoint = "inmemory://rooms";
    let kitchen_heard = Arc::new(AtomicUsize::new(0));
    let garden_heard = Arc::new(AtomicUsize::new(0));

    let listener = |count: &Arc<AtomicUsize>| {
        let count = Arc::clone(count);
        Handler::on_message("dinner is ready", move |_, _| {
            count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    };
    let cook = Agent::builder("cook").runtime(runtime.clone()).build()?;
    let eater = Agent::builder("eater")
        .runtime(runtime.clone())
        .handler(listener(&kitchen_heard))
        .build()?;
    let gardener = Agent::builder("gardener")
        .runtime(runtime.clone())
        .handler(listener(&garden_heard))
        .build()?;

    cook.bind(endpoint, None).await?;
    eater.connect(endpoint, None, None).await?;
    gardener.connect(endpoint, None, None).await?;
    cook.join("kitchen", None).await?;
    cook.join("garden", None).await?;
    eater.join("kitchen", None).await?;
    gardener.join("garden", None).await?;
    assert_eq!(cook.spaces().await, vec!["garden".to_string(), "kitchen".to_string()]);

    let everyone = [cook.clone(), eater.clone(), gardener.clone()];
    cook.add_handler(Handler::asynchronous(Kind::Event, STARTED, move |agent, _| {
        let everyone = everyone.clone();
        async move {
            agent.send(Frame::message_text("dinner is ready").space("kitchen"))?;
            tokio::time::sleep(Duration::from_millis(200)).await;
            everyone.iter().for_each(halt);
            Ok::<_, anyhow::Error>(())
        }
    }))?;

    let (a, b, c) = tokio::time::timeout(SCENARIO_LIMIT, async {
        tokio::join!(cook.run(), eater.run(), gardener.run())
    })
    .await?;
    a?;
    b?;
    c?;

    assert_eq!(kitchen_heard.load(Ordering::SeqCst), 1);
    assert_eq!(garden_heard.load(Ordering::SeqCst), 0);
    Ok(())
}

#[tokio::test]
async fn test_leave_stops_delivery() -> anyhow::Result<()> {
    let runtime = Runtime::new();
    let host = Agent::builder("host").runtime(runtime.clone()).build()?;
    let guest = Agent::builder("guest").runtime(runtime.clone()).build()?;
    crate::pair(&host, &guest, "inmemory://leaving", "lobby").await?;

    guest.leave("lobby", None).await?;
    assert!(guest.spaces().await.is_empty());
    let broker = runtime.broker("inmemory://leaving")?;
    assert_eq!(broker.agents(Some("lobby"))?, vec!["host".to_string()]);
    Ok(())
}
