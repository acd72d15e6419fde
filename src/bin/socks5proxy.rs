use std::env;
use std::process;

use log::error;
use socks5proxy::config::Config;
use socks5proxy::proxy::run_socks5_proxy;
use tokio::runtime::Runtime;

fn main() {
    let mut args = env::args();
    if args.len() != 2 {
        let program = args.next().unwrap_or_else(|| "socks5proxy".to_string());
        println!("Usage: {} config.toml", program);
        return;
    }

    env_logger::builder()
        .format_timestamp(None)
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let path = args.nth(1).unwrap_or_default();
    let config = match Config::load(&path) {
        Ok(config) => config,
        Err(e) => {
            error!("load {} failed: {}", path, e);
            process::exit(1);
        }
    };

    let rt = match Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!("start runtime failed: {}", e);
            process::exit(1);
        }
    };
    if let Err(e) = rt.block_on(run_socks5_proxy(&config)) {
        error!("{}", e);
        process::exit(1);
    }
}
