use anyhow::{Context, anyhow, bail};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, timeout};
use tracing::info;
use udp_sr_abstract::{
    LinkConfig, PayloadSpec, ScenarioAction, ScenarioAssertion, TransferConfig, TransferScenario,
};
use udp_sr_core::{ReceiverEngine, SenderEngine, TransferReport};
use udp_sr_simulator::{LinkSimulator, NodeId, SimulationReport};

/// Used when a scenario sets no `max_duration` assertion.
const DEFAULT_MAX_DURATION_MS: u64 = 60_000;

#[derive(Debug, Clone, Serialize)]
pub struct ScenarioOutcome {
    pub name: String,
    pub data_intact: bool,
    pub sender: TransferReport,
    pub receiver: TransferReport,
    pub link: SimulationReport,
}

pub fn load_scenario(path: &Path) -> anyhow::Result<TransferScenario> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read scenario file {}", path.display()))?;
    toml::from_str(&content).context("Failed to parse scenario")
}

/// Run a scenario file on a paused clock, so simulated time passes as fast
/// as the engines can process it.
pub fn run_scenario(path: &Path) -> anyhow::Result<ScenarioOutcome> {
    let scenario = load_scenario(path)?;
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .start_paused(true)
        .build()
        .context("Failed to start runtime")?;
    runtime.block_on(run(&scenario))
}

pub async fn run(scenario: &TransferScenario) -> anyhow::Result<ScenarioOutcome> {
    info!("Running Scenario: {}", scenario.name);
    if !scenario.description.is_empty() {
        info!("Description: {}", scenario.description);
    }

    let mut link_config = LinkConfig::default();
    scenario.link.apply_to(&mut link_config);
    let mut config = TransferConfig::default();
    scenario.transfer.apply_to(&mut config);

    let data = generate_payload(&scenario.payload);
    let (link, sender_end, receiver_end) = LinkSimulator::pair(link_config);

    for action in &scenario.actions {
        match action {
            ScenarioAction::DropNextData { seq } => link.add_drop_data_seq_once(*seq),
            ScenarioAction::DropNextAck { seq } => link.add_drop_ack_once(*seq),
        }
    }

    let max_duration = scenario
        .assertions
        .iter()
        .find_map(|a| {
            if let ScenarioAssertion::MaxDuration { ms } = a {
                Some(*ms)
            } else {
                None
            }
        })
        .unwrap_or(DEFAULT_MAX_DURATION_MS);

    let receiver = ReceiverEngine::new(Arc::new(receiver_end), config.clone())?;
    let sender = SenderEngine::new(Arc::new(sender_end), NodeId::Receiver.addr(), config.clone())?;

    let receiving = tokio::spawn(async move {
        let mut sink = Vec::new();
        receiver.run(&mut sink).await.map(|report| (sink, report))
    });

    let started = Instant::now();
    let sent = timeout(
        Duration::from_millis(max_duration),
        sender.run(&mut &data[..], data.len() as u64),
    )
    .await
    .map_err(|_| anyhow!("Test timed out after {} ms", max_duration))?
    .context("Sender failed")?;
    info!("Sender finished after {:?}", started.elapsed());

    // Once the sender is done the receiver has flushed everything and only lingers.
    let (sink, received) = timeout(config.linger() + config.idle_timeout(), receiving)
        .await
        .map_err(|_| anyhow!("Receiver did not finish"))?
        .context("Receiver task panicked")?
        .context("Receiver failed")?;

    let outcome = ScenarioOutcome {
        name: scenario.name.clone(),
        data_intact: sink == data,
        sender: sent,
        receiver: received,
        link: link.export_report(),
    };
    check_assertions(&scenario.assertions, &outcome)?;

    info!("Test Scenario Passed!");
    Ok(outcome)
}

fn check_assertions(assertions: &[ScenarioAssertion], outcome: &ScenarioOutcome) -> anyhow::Result<()> {
    for assertion in assertions {
        match assertion {
            ScenarioAssertion::DataIntact => {
                if !outcome.data_intact {
                    bail!(
                        "Assertion Failed: receiver wrote {} bytes that differ from the {} bytes sent",
                        outcome.receiver.bytes,
                        outcome.sender.bytes
                    );
                }
            }
            ScenarioAssertion::SenderPacketCount { min, max } => {
                let count = outcome.link.sender_packet_count;
                if count < *min {
                    bail!(
                        "Assertion Failed: Sender sent {} packets, expected min {}",
                        count,
                        min
                    );
                }
                if let Some(max) = max
                    && count > *max
                {
                    bail!(
                        "Assertion Failed: Sender sent {} packets, expected max {}",
                        count,
                        max
                    );
                }
            }
            ScenarioAssertion::MaxRetransmissions { max } => {
                if outcome.sender.retransmissions > *max {
                    bail!(
                        "Assertion Failed: Sender retransmitted {} packets, expected max {}",
                        outcome.sender.retransmissions,
                        max
                    );
                }
            }
            ScenarioAssertion::MaxDuration { .. } => {} // Already checked
        }
    }
    Ok(())
}

pub fn generate_payload(spec: &PayloadSpec) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(spec.seed);
    let mut data = vec![0u8; spec.size as usize];
    rng.fill(&mut data[..]);
    data
}
