use std::sync::Arc;

use mailforge::configuration::get_configuration;
use mailforge::domain::provisioning::service::Provisioner;
use mailforge::inbound::http::state::SharedProvisioningState;
use mailforge::inbound::http::Application;
use mailforge::outbound::cache::ReadCache;
use mailforge::outbound::db::postgres_db::PostgresDb;
use mailforge::outbound::ip_lookup::IpLookupClient;
use mailforge::outbound::system::commands::ShellCommands;
use mailforge::outbound::telemetry::init_logger;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    let configuration = get_configuration().expect("Failed to read configuration");
    init_logger("mailforge", &configuration.general.log_level, std::io::stdout);

    let repo = PostgresDb::new(&configuration.database);
    let commands = Arc::new(ShellCommands::new());
    let ip_lookup = IpLookupClient::new(configuration.ip_lookup.clone());
    let cache = ReadCache::new(&configuration.cache);

    let service = Provisioner::new(
        &configuration.provisioning,
        repo,
        commands,
        ip_lookup,
        cache.clone(),
    );
    let state =
        SharedProvisioningState::new(service, cache, configuration.application.api_key.clone());
    let application = Application::build(state, configuration.application).await?;

    application.run_until_stopped().await?;
    Ok(())
}
