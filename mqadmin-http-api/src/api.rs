use std::net::SocketAddr;

use salvo::extra::affix;
use salvo::prelude::*;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use serde_json::json;

use mqadmin::config::BrokerConfig;
use mqadmin::error::AdminError;
use mqadmin::manager::BrokerManager;

/// Behaviour switches for the API server, derived from the `[http]`
/// settings section.
#[derive(Debug, Clone)]
pub struct ApiOptions {
    pub request_log: bool,
}

fn route(manager: BrokerManager, opts: ApiOptions) -> Router {
    Router::with_path("api/broker")
        .hoop(affix::inject(manager))
        .hoop(affix::inject(opts))
        .hoop(api_logger)
        .get(list_apis)
        .push(Router::with_path("status").get(get_status))
        .push(
            Router::with_path("clients")
                .get(get_clients)
                .push(Router::with_path("<clientid>/disconnect").post(kick_client)),
        )
        .push(Router::with_path("configuration").get(get_configuration).put(update_configuration))
        .push(Router::with_path("start").post(start_broker))
        .push(Router::with_path("stop").post(stop_broker))
}

pub async fn listen_and_serve(
    laddr: SocketAddr,
    manager: BrokerManager,
    opts: ApiOptions,
    rx: oneshot::Receiver<()>,
) -> anyhow::Result<()> {
    log::info!("HTTP API Listening on {laddr}");

    Server::new(TcpListener::bind(laddr))
        .try_serve_with_graceful_shutdown(route(manager, opts), async {
            rx.await.ok();
        })
        .await
        .map_err(anyhow::Error::new)?;
    Ok(())
}

#[handler]
async fn list_apis(res: &mut Response) {
    let data = json!([
        {
            "name": "get_status",
            "method": "GET",
            "path": "/api/broker/status",
            "descr": "Return the current status of the broker"
        },
        {
            "name": "get_clients",
            "method": "GET",
            "path": "/api/broker/clients",
            "descr": "Return the currently connected clients"
        },
        {
            "name": "kick_client",
            "method": "POST",
            "path": "/api/broker/clients/{clientid}/disconnect",
            "descr": "Disconnect the specified client"
        },
        {
            "name": "get_configuration",
            "method": "GET",
            "path": "/api/broker/configuration",
            "descr": "Return the held broker configuration"
        },
        {
            "name": "update_configuration",
            "method": "PUT",
            "path": "/api/broker/configuration",
            "descr": "Replace the held broker configuration; applied on the next start"
        },
        {
            "name": "start_broker",
            "method": "POST",
            "path": "/api/broker/start",
            "descr": "Start the broker with the held configuration"
        },
        {
            "name": "stop_broker",
            "method": "POST",
            "path": "/api/broker/stop",
            "descr": "Stop the broker"
        },
    ]);
    res.render(Json(data));
}

#[handler]
async fn api_logger(req: &mut Request, depot: &mut Depot) {
    if let Some(opts) = depot.obtain::<ApiOptions>() {
        if !opts.request_log {
            return;
        }
    }

    log::info!(
        "Request {}, {:?}, {}, {}",
        req.remote_addr().map(|addr| addr.to_string()).unwrap_or_else(|| "[Unknown]".into()),
        req.version(),
        req.method(),
        req.uri()
    );
}

#[handler]
async fn get_status(depot: &mut Depot, res: &mut Response) {
    let manager = depot.obtain::<BrokerManager>().cloned().unwrap();
    res.render(Json(manager.status().to_json()));
}

#[handler]
async fn get_clients(depot: &mut Depot, res: &mut Response) {
    let manager = depot.obtain::<BrokerManager>().cloned().unwrap();
    match manager.connected_clients().await {
        Ok(clients) => {
            let data = clients.iter().map(|c| c.to_json()).collect::<Vec<_>>();
            res.render(Json(data));
        }
        Err(e) => render_error(res, "Failed to list clients", e),
    }
}

#[handler]
async fn get_configuration(depot: &mut Depot, res: &mut Response) {
    let manager = depot.obtain::<BrokerManager>().cloned().unwrap();
    res.render(Json(manager.configuration().to_json()));
}

#[handler]
async fn update_configuration(req: &mut Request, depot: &mut Depot, res: &mut Response) {
    let manager = depot.obtain::<BrokerManager>().cloned().unwrap();
    let config = match req.extract_json::<BrokerConfig>().await {
        Ok(c) => c,
        Err(e) => return res.set_status_error(StatusError::bad_request().with_detail(e.to_string())),
    };
    match manager.update_configuration(config) {
        Ok(()) => res.render(Json(json!({"message": "Configuration updated successfully"}))),
        Err(e) => render_error(res, "Failed to update configuration", e),
    }
}

#[handler]
async fn start_broker(depot: &mut Depot, res: &mut Response) {
    let manager = depot.obtain::<BrokerManager>().cloned().unwrap();
    match manager.start(&CancellationToken::new()).await {
        Ok(()) => res.render(Json(json!({"message": "Broker started successfully"}))),
        Err(e) => render_error(res, "Failed to start broker", e),
    }
}

#[handler]
async fn stop_broker(depot: &mut Depot, res: &mut Response) {
    let manager = depot.obtain::<BrokerManager>().cloned().unwrap();
    match manager.stop(&CancellationToken::new()).await {
        Ok(()) => res.render(Json(json!({"message": "Broker stopped successfully"}))),
        Err(e) => render_error(res, "Failed to stop broker", e),
    }
}

#[handler]
async fn kick_client(req: &mut Request, depot: &mut Depot, res: &mut Response) {
    let manager = depot.obtain::<BrokerManager>().cloned().unwrap();
    let client_id = req.param::<String>("clientid").unwrap_or_default();
    match manager.disconnect_client(&client_id).await {
        Ok(()) => res.render(Json(json!({"message": format!("Client {client_id} disconnected successfully")}))),
        Err(e) => render_error(res, "Failed to disconnect client", e),
    }
}

fn render_error(res: &mut Response, error: &str, e: AdminError) {
    let code = if e.is_client_error() { StatusCode::BAD_REQUEST } else { StatusCode::INTERNAL_SERVER_ERROR };
    res.set_status_code(code);
    res.render(Json(json!({"error": error, "details": e.to_string()})));
}
