use clap::Parser;

use stt_gateway::cli::{Cli, Command};
use stt_gateway::{Gateway, GatewayConfig, GatewayRequest, GwResult};

fn main() {
    stt_gateway::logging::init();

    if let Err(error) = run() {
        eprintln!("error: {error}");
        std::process::exit(1);
    }
}

fn run() -> GwResult<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Transcribe(args) => {
            let audio = std::fs::read(&args.input)?;
            let filename = args
                .input
                .file_name()
                .map(|name| name.to_string_lossy().into_owned());
            let gateway = Gateway::new(GatewayConfig::from_env());
            let response = gateway.handle(&GatewayRequest {
                audio,
                mime_type: args.mime_type,
                filename,
                backend: args.backend,
                client_id: args.client_id,
            })?;

            if args.json {
                println!("{}", serde_json::to_string_pretty(&response)?);
            } else {
                println!("{}", response.text);
            }
            Ok(())
        }
        Command::Validate(args) => {
            let audio = std::fs::read(&args.input)?;
            let gateway = Gateway::new(GatewayConfig::from_env());
            let verdict = gateway.validate_only(&audio);
            println!("{}", serde_json::to_string_pretty(&verdict)?);
            if !verdict.valid {
                std::process::exit(1);
            }
            Ok(())
        }
        Command::Backends => {
            let gateway = Gateway::new(GatewayConfig::from_env());
            let payload = serde_json::json!({
                "known": gateway.known_backends(),
                "available": gateway.available_backends(),
            });
            println!("{}", serde_json::to_string_pretty(&payload)?);
            Ok(())
        }
    }
}
