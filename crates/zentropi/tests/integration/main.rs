//! End-to-end scenarios: agents sharing an in-memory runtime

mod lifecycle;
mod messaging;
mod spaces;

use std::time::Duration;
use zentropi::prelude::*;

/// Upper bound for any scenario
pub const SCENARIO_LIMIT: Duration = Duration::from_secs(5);

/// Bind `host` to `endpoint`, connect `guest` to it and join both to `space`
pub async fn pair(host: &Agent, guest: &Agent, endpoint: &str, space: &str) -> anyhow::Result<()> {
    host.bind(endpoint, None).await?;
    guest.connect(endpoint, None, None).await?;
    host.join(space, None).await?;
    guest.join(space, None).await?;
    Ok(())
}

/// Run both agents until they stop on their own
pub async fn run_both(first: &Agent, second: &Agent) -> anyhow::Result<()> {
    let (a, b) = tokio::time::timeout(SCENARIO_LIMIT, async {
        tokio::join!(first.run(), second.run())
    })
    .await?;
    a?;
    b?;
    Ok(())
}

/// Stop an agent, tolerating one that is already stopping
pub fn halt(agent: &Agent) {
    let _ = agent.stop();
}
