use uploadkit_server::auth::{create_token, Role};
use uploadkit_server::config::AppConfig;
use uploadkit_server::{build_state, routes};
use uuid::Uuid;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "uploadkit_server=debug,tower_http=debug".into()),
        )
        .init();

    let config = AppConfig::load().expect("Failed to load configuration");

    // `uploadkit-server issue-token <email> [user|admin]` prints a bearer token
    // for local testing; login itself lives outside this service.
    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.first().map(String::as_str) == Some("issue-token") {
        let email = args.get(1).map(String::as_str).unwrap_or("dev@example.com");
        let role = match args.get(2).map(String::as_str) {
            Some("admin") => Role::Admin,
            _ => Role::User,
        };
        let token = create_token(
            Uuid::new_v4(),
            email,
            role,
            &config.jwt.secret,
            config.jwt.expiration_hours,
        )
        .expect("Failed to issue token");
        println!("{token}");
        return;
    }

    tokio::fs::create_dir_all(&config.upload.temp_dir)
        .await
        .expect("Failed to create upload temp directory");

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let state = build_state(config)
        .await
        .expect("Failed to initialize storage backend");

    tracing::info!(
        storage = ?state.config.storage.backend,
        max_file_size = state.config.upload.max_file_size,
        max_files = state.config.upload.max_files,
        image_processing = state.config.image.processing_enabled,
        "Upload server started: http://{addr}/api"
    );

    let app = routes::router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind");

    axum::serve(listener, app).await.expect("Server error");
}
