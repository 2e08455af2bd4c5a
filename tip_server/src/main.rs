use dotenvy::dotenv;
use log::{error, info};
use tip_server::{cli::handle_command_line_args, config::ServerConfig, server::run_server};

#[tokio::main]
async fn main() {
    dotenv().ok();
    env_logger::init();
    if handle_command_line_args() {
        return;
    }
    let config = ServerConfig::from_env_or_default();

    info!("🚀️ Starting tip server against {}. Invoices expire after {}s", config.lnd.rest_host, config.tip_expiry);
    match run_server(config).await {
        Ok(_) => println!("Bye!"),
        Err(e) => {
            error!("🚀️ {e}");
            eprintln!("{e}");
            std::process::exit(1);
        },
    }
}
