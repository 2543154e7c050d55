use once_cell::sync::Lazy;
use secrecy::Secret;
use sqlx::{Connection, Executor, PgConnection, PgPool};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use mailforge::configuration::{get_configuration, DatabaseSettings};
use mailforge::domain::provisioning::service::Provisioner;
use mailforge::inbound::http::state::SharedProvisioningState;
use mailforge::inbound::http::Application;
use mailforge::outbound::cache::ReadCache;
use mailforge::outbound::db::postgres_db::PostgresDb;
use mailforge::outbound::ip_lookup::IpLookupClient;
use mailforge::outbound::system::mock::MockCommands;
use mailforge::outbound::telemetry::init_logger;

pub const TEST_SERVER_IP: &str = "203.0.113.77";

static TRACING: Lazy<()> = Lazy::new(|| {
    let c = get_configuration().expect("Failed to read configuration");
    let default_filter_level = c.general.log_level;
    let subscriber_name = "test".to_string();
    if std::env::var("TEST_LOG").is_ok() {
        init_logger(&subscriber_name, &default_filter_level, std::io::stdout);
    } else {
        init_logger(&subscriber_name, &default_filter_level, std::io::sink);
    }
});

pub struct TestApp {
    pub address: String,
    pub api_key: String,
    pub db_pool: PgPool,
    pub commands: Arc<MockCommands>,
    pub keys_dir: PathBuf,
    pub vmail_dir: PathBuf,
    pub key_table: PathBuf,
    pub signing_table: PathBuf,
    #[allow(dead_code)]
    pub ip_server: MockServer,
    // Removes every provisioned artifact when the test ends.
    _workspace: TempDir,
}

impl TestApp {
    fn client(&self) -> reqwest::Client {
        reqwest::Client::new()
    }

    pub async fn post_json(&self, route: &str, body: &serde_json::Value) -> reqwest::Response {
        self.client()
            .post(format!("{}{}", self.address, route))
            .header("X-Api-Key", &self.api_key)
            .json(body)
            .send()
            .await
            .expect("Failed to execute request.")
    }

    pub async fn put_json(&self, route: &str, body: &serde_json::Value) -> reqwest::Response {
        self.client()
            .put(format!("{}{}", self.address, route))
            .header("X-Api-Key", &self.api_key)
            .json(body)
            .send()
            .await
            .expect("Failed to execute request.")
    }

    pub async fn get(&self, route: &str) -> reqwest::Response {
        self.client()
            .get(format!("{}{}", self.address, route))
            .header("X-Api-Key", &self.api_key)
            .send()
            .await
            .expect("Failed to execute request.")
    }

    pub async fn delete(&self, route: &str) -> reqwest::Response {
        self.client()
            .delete(format!("{}{}", self.address, route))
            .header("X-Api-Key", &self.api_key)
            .send()
            .await
            .expect("Failed to execute request.")
    }

    pub async fn create_domain(&self, name: &str, selector: &str) -> reqwest::Response {
        self.post_json(
            "/domains",
            &serde_json::json!({ "name": name, "dkim_selector": selector }),
        )
        .await
    }

    pub async fn create_mailbox(&self, email: &str) -> reqwest::Response {
        self.post_json(
            "/mailboxes",
            &serde_json::json!({ "email": email, "password": "Str0ng-Passw0rd!" }),
        )
        .await
    }

    pub fn key_table_lines(&self) -> Vec<String> {
        read_lines(&self.key_table)
    }

    pub fn signing_table_lines(&self) -> Vec<String> {
        read_lines(&self.signing_table)
    }
}

fn read_lines(path: &std::path::Path) -> Vec<String> {
    match std::fs::read_to_string(path) {
        Ok(content) => content.lines().map(String::from).collect(),
        Err(_) => Vec::new(),
    }
}

pub async fn spawn_app() -> TestApp {
    Lazy::force(&TRACING);

    let ip_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(TEST_SERVER_IP))
        .mount(&ip_server)
        .await;

    let workspace = TempDir::new().expect("Failed to create test workspace");
    let keys_dir = workspace.path().join("keys");
    let vmail_dir = workspace.path().join("vmail");
    let key_table = workspace.path().join("KeyTable");
    let signing_table = workspace.path().join("SigningTable");
    std::fs::create_dir_all(&keys_dir).expect("Failed to create keys dir");
    std::fs::create_dir_all(&vmail_dir).expect("Failed to create vmail dir");

    let api_key = Uuid::new_v4().to_string();
    let configuration = {
        let mut c = get_configuration().expect("Failed to read configuration");
        c.database.database_name = Uuid::new_v4().to_string();
        c.application.port = 0;
        c.application.api_key = Secret::new(api_key.clone());
        c.ip_lookup.base_url = ip_server.uri();
        c.provisioning.dkim_keys_dir = keys_dir.clone();
        c.provisioning.vmail_dir = vmail_dir.clone();
        c.provisioning.key_table_path = key_table.clone();
        c.provisioning.signing_table_path = signing_table.clone();
        c
    };

    let db_pool = configure_database(&configuration.database).await;

    let commands = Arc::new(MockCommands::default());
    let cache = ReadCache::new(&configuration.cache);
    let repo = PostgresDb::new(&configuration.database);
    let ip_lookup = IpLookupClient::new(configuration.ip_lookup.clone());
    let service = Provisioner::new(
        &configuration.provisioning,
        repo,
        commands.clone(),
        ip_lookup,
        cache.clone(),
    );
    let state = SharedProvisioningState::new(
        service,
        cache,
        configuration.application.api_key.clone(),
    );

    let application = Application::build(state, configuration.application.clone())
        .await
        .expect("Failed to build application");
    let application_port = application.port();
    let _ = tokio::spawn(application.run_until_stopped());

    TestApp {
        address: format!("http://localhost:{}", application_port),
        api_key,
        db_pool,
        commands,
        keys_dir,
        vmail_dir,
        key_table,
        signing_table,
        ip_server,
        _workspace: workspace,
    }
}

pub async fn configure_database(config: &DatabaseSettings) -> PgPool {
    let mut connection = PgConnection::connect_with(&config.without_db())
        .await
        .expect("Failed to connect to Postgres");
    connection
        .execute(format!(r#"CREATE DATABASE "{}";"#, config.database_name).as_str())
        .await
        .expect("Failed to create database");

    let connection_pool = PgPool::connect_with(config.with_db())
        .await
        .expect("Failed to connect to Postgres");
    sqlx::migrate!("./migrations")
        .run(&connection_pool)
        .await
        .expect("Failed to migrate database");

    connection_pool
}
