use clap::Parser;
use rbac_admin::cli::{
    Args, build_config, handle_create_admin, init_logging, load_admin_password, load_jwt_secret,
    open_database,
};
use rbac_admin::{App, run_server};
use tracing::{error, info};

fn main() {
    let args = Args::parse();

    init_logging(&args.log_format);

    // Secrets are read and scrubbed from the environment while this is the only thread
    let Some(jwt_secret) = load_jwt_secret(args.jwt_secret_file.as_deref()) else {
        std::process::exit(1);
    };
    let admin_password = if args.create_admin.is_some() {
        let Some(password) = load_admin_password() else {
            std::process::exit(1);
        };
        Some(password)
    } else {
        None
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap_or_else(|e| {
            error!(error = %e, "Failed to start async runtime");
            std::process::exit(1);
        });

    runtime.block_on(serve(args, jwt_secret, admin_password));
}

async fn serve(args: Args, jwt_secret: String, admin_password: Option<String>) {
    let Some(db) = open_database(&args.database).await else {
        std::process::exit(1);
    };

    if let (Some(username), Some(password)) = (args.create_admin.as_deref(), &admin_password) {
        handle_create_admin(&db, username, password).await;
    }

    let config = build_config(&args, db, jwt_secret);
    let app = App::new(&config).unwrap_or_else(|e| {
        error!(error = %e, "Invalid token configuration");
        std::process::exit(1);
    });

    let addr = format!("0.0.0.0:{}", args.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| {
            error!(address = %addr, error = %e, "Failed to bind");
            std::process::exit(1);
        });

    if let Ok(local_addr) = listener.local_addr() {
        info!(address = %local_addr, "Listening");
    }

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
        info!("Shutting down");
    };

    if let Err(e) = run_server(app, listener, shutdown).await {
        error!(error = %e, "Server error");
        std::process::exit(1);
    }
}
