#![deny(unsafe_code)]

use std::time::Duration;

use structopt::StructOpt;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use mqadmin::config::{AuthCredentials, BrokerConfig};
use mqadmin::engine::inproc::InprocEngineFactory;
use mqadmin::manager::BrokerManager;
use mqadmin_conf::{Options, Settings};
use mqadmin_http_api::{listen_and_serve, ApiOptions};

mod logger;

#[tokio::main]
async fn main() {
    //init config
    let settings = Settings::new(Options::from_args()).expect("settings init failed");

    //init log
    let _guard = logger::logger_init(&settings.log).expect("logger init failed");

    settings.logs();

    let manager = BrokerManager::new(
        settings.broker.host,
        initial_config(&settings),
        auth_credentials(&settings),
        Box::new(InprocEngineFactory::new()),
    );

    //auto-start supervisor
    if settings.broker.auto_start {
        let manager = manager.clone();
        tokio::spawn(async move {
            match manager.start(&CancellationToken::new()).await {
                Ok(()) => log::info!("broker auto-started successfully"),
                Err(e) => log::error!("broker auto-start failed, {e}"),
            }
        });
    }

    //HTTP control API
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let api = {
        let manager = manager.clone();
        let laddr = settings.http.laddr;
        let opts = ApiOptions { request_log: settings.http.request_log };
        tokio::spawn(async move {
            if let Err(e) = listen_and_serve(laddr, manager, opts, shutdown_rx).await {
                log::error!("{e:?}");
            }
        })
    };

    tokio::signal::ctrl_c().await.expect("signal ctrl c");
    log::info!("mqadmind shutting down...");

    if let Err(e) = manager.stop(&CancellationToken::new()).await {
        log::error!("broker stop failed on shutdown, {e}");
    }
    let _ = shutdown_tx.send(());
    let _ = api.await;
    tokio::time::sleep(Duration::from_secs(1)).await;
}

fn initial_config(settings: &Settings) -> BrokerConfig {
    BrokerConfig {
        port: settings.broker.port,
        max_pending_connections: settings.broker.max_pending_messages,
        enable_authentication: !settings.broker.allow_anonymous,
        ..Default::default()
    }
}

fn auth_credentials(settings: &Settings) -> Option<AuthCredentials> {
    match (&settings.broker.username, &settings.broker.password) {
        (Some(username), Some(password)) => {
            Some(AuthCredentials { username: username.clone(), password: password.clone() })
        }
        _ => None,
    }
}
