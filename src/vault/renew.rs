use super::{Vault, check_response};
use anyhow::{Result, anyhow};
use rand::{Rng, SeedableRng, rngs::StdRng};
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::{
    sync::mpsc::UnboundedSender,
    time::{Duration, sleep},
};
use tracing::{debug, error, info, instrument, warn};

const MAX_ATTEMPTS: u32 = 3;

#[instrument(skip(vault))]
async fn renew_token(vault: &Vault, increment: Option<u64>) -> Result<u64> {
    let renew_url = vault.endpoint_url("/v1/auth/token/renew-self")?;

    let payload = json!({
        "increment": increment.unwrap_or(0)
    });

    let response = vault
        .client()
        .post(&renew_url)
        .json(&payload)
        .header("X-Vault-Token", vault.token())
        .send()
        .await?;
    let json_response: Value = check_response(&renew_url, response).await?.json().await?;

    json_response["auth"]["lease_duration"]
        .as_u64()
        .ok_or_else(|| anyhow!("Error parsing JSON response: no lease_duration found"))
}

/// Renew somewhere between 70% and 90% of the lease, never more often than every second.
fn jittered(lease_duration: u64, rng: &mut impl Rng) -> u64 {
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let seconds = (lease_duration as f64 * rng.gen_range(0.7..0.9)) as u64;
    seconds.max(1)
}

/// Keep the Vault token alive in the background.
///
/// After `MAX_ATTEMPTS` consecutive failures the loop stops and signals `tx`
/// so the server can shut down gracefully.
pub fn try_renew(vault: Arc<Vault>, lease_duration: u64, tx: UnboundedSender<()>) {
    let mut rng = StdRng::from_entropy();
    let mut next_renewal = jittered(lease_duration, &mut rng);

    tokio::spawn(async move {
        loop {
            info!("Will renew token in {} seconds", next_renewal);
            sleep(Duration::from_secs(next_renewal)).await;

            let mut renewed = false;
            for attempt in 1..=MAX_ATTEMPTS {
                if attempt > 1 {
                    let backoff_time = 2u64.pow(attempt - 1);
                    warn!("Backing off for {} seconds", backoff_time);
                    sleep(Duration::from_secs(backoff_time)).await;
                }

                match renew_token(&vault, None).await {
                    Ok(lease_duration) => {
                        debug!("token lease duration {} seconds", lease_duration);
                        next_renewal = jittered(lease_duration, &mut rng);
                        renewed = true;
                        break;
                    }
                    Err(e) => error!("Error renewing token: {}", e),
                }
            }

            if !renewed {
                error!("Failed to renew token after {} attempts", MAX_ATTEMPTS);
                let _ = tx.send(());
                return;
            }
        }
    });
}
