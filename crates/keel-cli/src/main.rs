use colored::Colorize;
use log::error;

#[tokio::main]
async fn main() {
    let matches = keel_cli::cli().get_matches();

    let log_level = matches
        .get_one::<String>("log_level")
        .map(String::as_str)
        .unwrap_or("info");
    keel_cli::init_logging(log_level);

    if let Err(e) = keel_cli::run(&matches).await {
        error!("{:#}", e);
        eprintln!("{} {:#}", "error:".red().bold(), e);
        std::process::exit(1);
    }
}
