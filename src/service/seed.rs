use backon::{ExponentialBuilder, Retryable};
use std::future::Future;
use std::time::Duration;
use tracing::{info, warn};

use crate::db::{BeverageCreate, Repositories, SETTINGS_ID, SettingsCreate};
use crate::error::TapError;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SeedOutcome {
    pub beverages_created: usize,
    pub settings_created: bool,
}

pub fn sample_beverages() -> Vec<BeverageCreate> {
    vec![
        BeverageCreate::new(1, "Pale Ale").style("APA").abv(5.2).ibu(35).ebc(12),
        BeverageCreate::new(2, "Stout").style("Dry Stout").abv(4.5).ibu(40).ebc(80),
        BeverageCreate::new(3, "IPA").style("West Coast IPA").abv(6.5).ibu(60).ebc(18),
    ]
}

/// Retry only on lock contention; every other error is returned as is.
async fn with_retry<T, F, Fut>(step: &str, op: F) -> Result<T, TapError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, TapError>>,
{
    let policy = ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(100))
        .with_max_delay(Duration::from_secs(2))
        .with_max_times(5)
        .with_jitter();

    op.retry(policy)
        .when(|e: &TapError| e.is_retryable())
        .notify(|err: &TapError, dur: Duration| {
            warn!(step, error = %err, retry_in_ms = dur.as_millis() as u64, "store busy while seeding");
        })
        .await
}

/// Insert the sample taps when the beverage list is empty and create the
/// settings row when it is missing. Safe to call on a populated store.
pub async fn seed_if_empty(repos: &Repositories) -> Result<SeedOutcome, TapError> {
    let mut outcome = SeedOutcome::default();

    let beverages = repos.beverages.clone();
    let existing = with_retry("list beverages", || {
        let beverages = beverages.clone();
        async move { beverages.list().await }
    })
    .await?;

    if existing.is_empty() {
        for sample in sample_beverages() {
            let beverages = beverages.clone();
            with_retry("create beverage", || {
                let beverages = beverages.clone();
                let sample = sample.clone();
                async move { beverages.create(sample).await }
            })
            .await?;
            outcome.beverages_created += 1;
        }
    }

    let settings = repos.settings.clone();
    let found = with_retry("get settings", || {
        let settings = settings.clone();
        async move {
            match settings.get(SETTINGS_ID).await {
                Ok(s) => Ok(Some(s)),
                Err(TapError::NotFound { .. }) => Ok(None),
                Err(e) => Err(e),
            }
        }
    })
    .await?;

    if found.is_none() {
        with_retry("create settings", || {
            let settings = settings.clone();
            async move { settings.create(SettingsCreate::default()).await }
        })
        .await?;
        outcome.settings_created = true;
    }

    info!(
        beverages_created = outcome.beverages_created,
        settings_created = outcome.settings_created,
        "seed finished"
    );
    Ok(outcome)
}
