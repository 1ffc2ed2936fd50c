use anyhow::{anyhow, Result};
use certcrab::acme::InstantAcmeBackend;
use certcrab::api::AppState;
use certcrab::issuance::{challenge_record_name, order_identifiers};
use certcrab::dns_provider::DnspodClient;
use certcrab::notify::BroadcastNotifier;
use certcrab::renewal::SystemClock;
use certcrab::shutdown::Shutdown;
use certcrab::{CertificateStore, Config, Issuer, RenewalScheduler, SharedConfig};
use is_terminal::IsTerminal;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How long in-flight work may take to wind down after a shutdown request.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_init();

    let mut first_args = std::env::args().take(2);
    let (program_name, config_file) = (
        first_args.next().unwrap_or("certcrab".to_string()),
        first_args.next(),
    );

    let config = config_init(&program_name, config_file)?;

    let store = CertificateStore::new(&config.store_path);
    store.init().await?;
    tracing::info!("certificate store at {}", store.root().display());

    let (api_id, api_token) = config.dnspod_credentials()?;
    let dns = DnspodClient::new(
        &config.dnspod.endpoint,
        &api_id,
        &api_token,
        config.dnspod.timeout,
    )?;
    dns_init(&dns, &config.domain).await;
    let acme = InstantAcmeBackend::new(&config.acme_directory_url, store.account_path());
    let issuer = Issuer::new(
        &config.domain,
        config.contact_email(),
        Arc::new(acme),
        Arc::new(dns),
        store.clone(),
        config.validation_policy(),
    );

    let (trigger, shutdown) = Shutdown::channel();
    let notifier = BroadcastNotifier::default();
    let clock = Arc::new(SystemClock);
    let scheduler = RenewalScheduler::new(
        config.renewal_policy(),
        Arc::new(issuer),
        store,
        Arc::new(notifier.clone()),
        clock.clone(),
        shutdown.clone(),
    );
    scheduler.start().await;
    let scheduler_handle = tokio::spawn(scheduler.clone().run());

    tracing::info!("API listening on {}", &config.api_bind_addr);
    let api_server = certcrab::api::new(
        AppState {
            config: config.clone(),
            scheduler,
            notifier,
            clock,
        },
        shutdown,
    );
    let mut api_handle = tokio::spawn(api_server);

    tokio::select! {
        _ = signal::ctrl_c() => {
            tracing::info!("quitting from signal");
        },
        api_res = &mut api_handle => {
            trigger.trigger();
            return match api_res {
                Ok(Err(err)) => Err(err.into()),
                Err(err) => Err(err.into()),
                Ok(Ok(())) => Ok(()),
            };
        }
    }

    trigger.trigger();
    let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
        let _ = scheduler_handle.await;
        let _ = api_handle.await;
    })
    .await;
    if drained.is_err() {
        tracing::warn!("shutdown grace period of {SHUTDOWN_GRACE:?} elapsed, exiting anyway");
    }
    tracing::info!("goodbye");
    Ok(())
}

fn tracing_init() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_ansi(std::io::stderr().is_terminal()))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "certcrab=info".into()),
        )
        .init();
}

/// Check the zone is hosted by the DNSPod account and sweep challenge records a previous run
/// left behind. Nothing here is fatal.
async fn dns_init(dns: &DnspodClient, domain: &str) {
    match dns.list_domains().await {
        Ok(domains) if !domains.iter().any(|d| d.eq_ignore_ascii_case(domain)) => {
            tracing::warn!(domain, hosted = ?domains, "zone not found in DNSPod account");
        }
        Ok(_) => {}
        Err(err) => tracing::warn!(error = %err, "failed to list DNSPod zones"),
    }

    let labels: BTreeSet<String> = order_identifiers(domain)
        .iter()
        .map(|identifier| challenge_record_name(domain, identifier))
        .collect();
    for label in labels {
        if let Err(err) = dns.delete_txt_records_by_name(domain, &label).await {
            tracing::warn!(%label, error = %err, "failed to sweep stale challenge records");
        }
    }
}

fn config_init(program_name: &str, config_file: Option<String>) -> Result<SharedConfig> {
    match config_file {
        None => Err(anyhow!("usage: {program_name} /path/to/config.json")),
        Some(config_file) => {
            tracing::debug!("loaded config from {config_file}");
            let config = Config::try_from_file(&config_file)?;
            Ok(Arc::new(config))
        }
    }
}
