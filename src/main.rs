use anyhow::{bail, Context};
use chrono::Utc;
use futures::StreamExt;
use log::{debug, info, warn};
use sparkalerts::auth::AuthGate;
use sparkalerts::builder::{Builder, Disposition};
use sparkalerts::bus::Bus;
use sparkalerts::geometry::CountyGeometry;
use sparkalerts::http::{self, AppState};
use sparkalerts::message::Stanza;
use sparkalerts::store::Store;
use sparkalerts::zones::ZoneResolver;
use sparkalerts::{Config, ConnectionState, IngestStream, StreamEvent};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

const SWEEP_PERIOD: Duration = Duration::from_secs(45);

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::builder()
        .filter(None, log::LevelFilter::Info)
        .parse_default_env()
        .init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{:#}", e);
            ExitCode::from(1)
        }
    }
}

async fn run() -> anyhow::Result<()> {
    let config = Config::load().context("loading configuration")?;

    let store = Arc::new(Store::open(&config.alerts_file, Bus::default()));
    store
        .apply_startup_filter()
        .await
        .context("applying startup filter")?;

    let county = Arc::new(CountyGeometry::load(&config.county_geometry_file));
    let resolver = Arc::new(ZoneResolver::new());

    // Expiry sweeper
    let sweeper_store = store.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SWEEP_PERIOD);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(e) = sweeper_store.sweep_expired(Utc::now()).await {
                warn!("expiry sweep failed: {}", e);
            }
        }
    });

    // HTTP API
    let state = Arc::new(AppState {
        store: store.clone(),
        gate: AuthGate::new(&config),
    });
    let port = config.express_port;
    let mut http_task = tokio::spawn(http::serve(state, port));

    // Ingest
    let builder = Builder::new(&config);
    let mut ingest = IngestStream::new(config);
    let mut last_ldm: Option<u32> = None;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                return Ok(());
            }
            result = &mut http_task => {
                match result {
                    Ok(Ok(())) => bail!("HTTP listener exited unexpectedly"),
                    Ok(Err(e)) => return Err(e).context("HTTP listener failed"),
                    Err(e) => return Err(e).context("HTTP task panicked"),
                }
            }
            event = ingest.next() => match event {
                None => bail!("ingest stream ended unexpectedly"),
                Some(StreamEvent::ConnectionState(state)) => {
                    debug!("ingest connection state: {:?}", state);
                    if state == ConnectionState::Fatal {
                        bail!("ingest connection failed permanently");
                    }
                }
                Some(StreamEvent::Error(e)) => warn!("ingest: {}", e),
                Some(StreamEvent::Stanza(stanza)) => {
                    if let (Some(previous), Some(sequence)) = (last_ldm, stanza.ldm_sequence_number) {
                        if sequence > previous + 1 {
                            debug!("LDM sequence gap: {} products lost", sequence - previous - 1);
                        }
                    }
                    last_ldm = stanza.ldm_sequence_number.or(last_ldm);
                    apply_stanza(&builder, &store, &county, &resolver, &stanza).await;
                }
            }
        }
    }
}

/// Feed one stanza through the builder and apply the outcome to the store.
async fn apply_stanza(
    builder: &Builder,
    store: &Store,
    county: &CountyGeometry,
    resolver: &ZoneResolver,
    stanza: &Stanza,
) {
    let disposition = builder
        .build(stanza, county, Some(resolver), Utc::now())
        .await;

    let outcome = match disposition {
        Disposition::Upsert { records, update } => {
            let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
            info!(
                "{} {} alert(s): {}",
                if update { "updating" } else { "storing" },
                ids.len(),
                ids.join(", ")
            );
            store.upsert(records, update).await
        }
        Disposition::Cancel { key } => match store.delete_by_vtec_key(&key).await {
            Ok(Some(id)) => {
                info!("cancelled {}", id);
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(e) => Err(e),
        },
        Disposition::Discard => Ok(()),
    };

    if let Err(e) = outcome {
        warn!("failed to apply stanza: {}", e);
    }
}
