use crate::configuration::ApplicationSettings;
use crate::domain::provisioning::ports::ProvisioningService;
use crate::inbound::http::handlers::{
    create_alias, create_api_key, create_domain, create_mailbox, delete_alias, delete_api_key,
    delete_domain, delete_mailbox, dns_records, get_domain, get_mailbox, health_check,
    list_aliases, list_api_keys, list_domains, list_mailboxes, quota, rotate_dkim,
    update_password,
};
use crate::inbound::http::state::SharedProvisioningState;
use actix_web::dev::Server;
use actix_web::{web, App, HttpServer};
use std::net::TcpListener;
use tracing_actix_web::TracingLogger;

mod auth;
mod errors;
mod handlers;
pub mod state;

pub struct Application {
    port: u16,
    server: Server,
}

fn run<PS: ProvisioningService>(
    listener: TcpListener,
    state: SharedProvisioningState<PS>,
) -> Result<Server, std::io::Error> {
    let state = web::Data::new(state);

    let server = HttpServer::new(move || {
        App::new()
            .wrap(TracingLogger::default())
            .app_data(state.clone())
            .route("/health_check", web::get().to(health_check))
            .route("/domains", web::post().to(create_domain::<PS>))
            .route("/domains", web::get().to(list_domains::<PS>))
            .route("/domains/{name}", web::get().to(get_domain::<PS>))
            .route("/domains/{name}", web::delete().to(delete_domain::<PS>))
            .route(
                "/domains/{name}/dns_records",
                web::get().to(dns_records::<PS>),
            )
            .route(
                "/domains/{name}/rotate_dkim",
                web::post().to(rotate_dkim::<PS>),
            )
            .route("/mailboxes", web::post().to(create_mailbox::<PS>))
            .route("/mailboxes", web::get().to(list_mailboxes::<PS>))
            .route("/mailboxes/{email}", web::get().to(get_mailbox::<PS>))
            .route("/mailboxes/{email}", web::delete().to(delete_mailbox::<PS>))
            .route(
                "/mailboxes/{email}/password",
                web::put().to(update_password::<PS>),
            )
            .route("/mailboxes/{email}/quota", web::get().to(quota::<PS>))
            .route("/aliases", web::post().to(create_alias::<PS>))
            .route("/aliases", web::get().to(list_aliases::<PS>))
            .route("/aliases/{source}", web::delete().to(delete_alias::<PS>))
            .route("/api_keys", web::post().to(create_api_key::<PS>))
            .route("/api_keys", web::get().to(list_api_keys::<PS>))
            .route("/api_keys/{id}", web::delete().to(delete_api_key::<PS>))
    })
    .listen(listener)?
    .run();

    Ok(server)
}

impl Application {
    pub async fn build<PS: ProvisioningService>(
        state: SharedProvisioningState<PS>,
        configuration: ApplicationSettings,
    ) -> Result<Self, std::io::Error> {
        let address = format!("{}:{}", configuration.host, configuration.port);
        let listener = TcpListener::bind(address)?;
        let port = listener.local_addr()?.port();

        let server = run(listener, state)?;

        Ok(Self { port, server })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub async fn run_until_stopped(self) -> Result<(), std::io::Error> {
        self.server.await
    }
}
