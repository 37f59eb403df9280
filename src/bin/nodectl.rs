use battnode::control::{ChargerState, ControlCommand, ControlReply};
use battnode::{NodeConfig, StatusRecord};
use clap::{App, Arg, ArgMatches, SubCommand};
use colored::*;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: &str = "2323";
const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let matches = App::new("nodectl")
        .version("0.1.0")
        .about("Monitor and steer a running telemetry node")
        .arg(
            Arg::with_name("host")
                .short("h")
                .long("host")
                .value_name("HOST")
                .help("Telemetry node host address")
                .takes_value(true)
                .default_value(DEFAULT_HOST)
                .global(true),
        )
        .arg(
            Arg::with_name("port")
                .short("p")
                .long("port")
                .value_name("PORT")
                .help("Telemetry node port")
                .takes_value(true)
                .default_value(DEFAULT_PORT)
                .global(true),
        )
        .arg(
            Arg::with_name("format")
                .short("f")
                .long("format")
                .value_name("FORMAT")
                .help("Output format")
                .takes_value(true)
                .possible_values(&["json", "table", "compact"])
                .default_value("table")
                .global(true),
        )
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .long("verbose")
                .help("Enable verbose output")
                .global(true),
        )
        .subcommand(
            SubCommand::with_name("monitor")
                .about("Follow the live status stream")
                .arg(
                    Arg::with_name("count")
                        .short("n")
                        .long("count")
                        .value_name("RECORDS")
                        .help("Stop after this many records (default: until the node disconnects)")
                        .takes_value(true)
                        .validator(|v| match v.parse::<u64>() {
                            Ok(_) => Ok(()),
                            Err(_) => Err("Record count must be a number".into()),
                        }),
                ),
        )
        .subcommand(SubCommand::with_name("scan").about("List devices found on the node's bus at startup"))
        .subcommand(
            SubCommand::with_name("charger")
                .about("Set the simulated charger status pins")
                .arg(
                    Arg::with_name("state")
                        .help("Charger state")
                        .required(true)
                        .possible_values(&["unplugged", "plugged", "charging"]),
                ),
        )
        .subcommand(
            SubCommand::with_name("load")
                .about("Set the simulated load-current ADC code")
                .arg(
                    Arg::with_name("code")
                        .help("Raw ADC code")
                        .required(true)
                        .validator(|v| match v.parse::<u16>() {
                            Ok(_) => Ok(()),
                            Err(_) => Err("ADC code must be a number between 0 and 65535".into()),
                        }),
                ),
        )
        .subcommand(
            SubCommand::with_name("adc-fault")
                .about("Inject or clear a simulated ADC fault")
                .arg(
                    Arg::with_name("state")
                        .help("Fault state")
                        .required(true)
                        .possible_values(&["on", "off"]),
                ),
        )
        .subcommand(
            SubCommand::with_name("config")
                .about("Validate a configuration file, or print the defaults")
                .arg(Arg::with_name("file").help("Configuration file to validate").required(false)),
        )
        .get_matches();

    let host = matches.value_of("host").unwrap_or(DEFAULT_HOST);
    let port = matches.value_of("port").unwrap_or(DEFAULT_PORT).parse::<u16>()?;
    let format = matches.value_of("format").unwrap_or("table");
    let verbose = matches.is_present("verbose");

    if verbose {
        println!("{}", "nodectl - battery telemetry node".bright_blue().bold());
        println!("{} {}:{}", "Connecting to".dimmed(), host, port);
    }

    match matches.subcommand() {
        ("monitor", Some(sub_matches)) => {
            handle_monitor(sub_matches, host, port, format).await?;
        }
        ("scan", _) => {
            let reply = send_command(host, port, &ControlCommand::Scan).await?;
            print_scan(&reply, format);
        }
        ("charger", Some(sub_matches)) => {
            let state = match sub_matches.value_of("state") {
                Some("charging") => ChargerState::Charging,
                Some("plugged") => ChargerState::Plugged,
                _ => ChargerState::Unplugged,
            };
            let reply = send_command(host, port, &ControlCommand::Charger { state }).await?;
            print_reply(&reply, format);
        }
        ("load", Some(sub_matches)) => {
            let code = sub_matches.value_of("code").unwrap_or("0").parse::<u16>()?;
            let reply = send_command(host, port, &ControlCommand::LoadCode { code }).await?;
            print_reply(&reply, format);
        }
        ("adc-fault", Some(sub_matches)) => {
            let fault = sub_matches.value_of("state") == Some("on");
            let reply = send_command(host, port, &ControlCommand::AdcFault { fault }).await?;
            print_reply(&reply, format);
        }
        ("config", Some(sub_matches)) => {
            handle_config(sub_matches.value_of("file"), format)?;
        }
        _ => {
            println!("{}", "No command specified. Use --help for usage information.".yellow());
            println!("{}", "Quick start:".bright_green());
            println!("  {} Start a node", "telemetry-node".bright_cyan());
            println!("  {} Follow its status", "nodectl monitor".bright_cyan());
            println!("  {} Plug in the charger", "nodectl charger charging".bright_cyan());
        }
    }

    Ok(())
}

async fn handle_monitor(
    matches: &ArgMatches<'_>,
    host: &str,
    port: u16,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let limit = match matches.value_of("count") {
        Some(count) => Some(count.parse::<u64>()?),
        None => None,
    };

    println!("{}", "Monitoring node status (Press Ctrl+C to stop)...".bright_blue().bold());

    let stream = connect(host, port).await?;
    let mut lines = BufReader::new(stream).lines();
    let mut seen = 0u64;

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match serde_json::from_str::<StatusRecord>(line) {
            Ok(record) => print_record(&record, format),
            // Text-format nodes stream the human-readable line.
            Err(_) => println!("{}", line),
        }

        seen += 1;
        if limit.is_some_and(|limit| seen >= limit) {
            break;
        }
    }

    Ok(())
}

fn handle_config(file: Option<&str>, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let Some(path) = file else {
        println!("{}", NodeConfig::default().to_json_pretty()?);
        return Ok(());
    };

    match NodeConfig::from_file(path) {
        Ok(config) => {
            if format == "json" {
                println!("{}", config.to_json_pretty()?);
            } else {
                println!("{} {}", "✅".green(), format!("{} is valid", path).bright_green());
                println!("  {} {} ms", "Cycle interval:".bright_white(), config.cycle_interval_ms);
                println!("  {} {}", "Sensors:".bright_white(), config.sensors.len());
                for sensor in &config.sensors {
                    println!("    {} at {}", sensor.kind().to_string().bright_cyan(), sensor.address());
                }
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("{} {}", "❌".red(), e.to_string().bright_red());
            Err(e.into())
        }
    }
}

async fn connect(host: &str, port: u16) -> Result<TcpStream, Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", host, port);
    match TcpStream::connect(&addr).await {
        Ok(stream) => Ok(stream),
        Err(e) => {
            eprintln!("{} Failed to connect to telemetry node at {}", "❌".red(), addr.bright_white());
            if e.kind() == std::io::ErrorKind::ConnectionRefused {
                eprintln!("{} Node is not running. Start it with:", "💡".yellow());
                eprintln!("   {}", "cargo run --bin telemetry-node".bright_cyan());
            } else {
                eprintln!("{} Network error: {}", "🔌".yellow(), e.to_string().bright_red());
            }
            Err(e.into())
        }
    }
}

/// Sends one command and waits for its reply, skipping status records
/// streamed on the same connection in the meantime.
async fn send_command(host: &str, port: u16, command: &ControlCommand) -> Result<ControlReply, Box<dyn std::error::Error>> {
    let stream = connect(host, port).await?;
    let (reader, mut writer) = stream.into_split();

    let mut request = serde_json::to_string(command)?;
    request.push('\n');
    writer.write_all(request.as_bytes()).await?;

    let mut lines = BufReader::new(reader).lines();
    let reply = tokio::time::timeout(REPLY_TIMEOUT, async {
        while let Some(line) = lines.next_line().await? {
            if let Ok(reply) = serde_json::from_str::<ControlReply>(line.trim()) {
                return Ok(reply);
            }
        }
        Err(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "node closed the connection",
        ))
    })
    .await;

    match reply {
        Ok(result) => Ok(result?),
        Err(_) => {
            eprintln!("{} No reply after {} seconds", "⏰".yellow(), REPLY_TIMEOUT.as_secs());
            Err("reply timeout".into())
        }
    }
}

fn print_record(record: &StatusRecord, format: &str) {
    match format {
        "json" => println!("{}", serde_json::to_string(record).unwrap_or_else(|_| record.to_string())),
        "compact" => println!("{}", record),
        _ => {
            println!("{} {}", "Cycle".bright_blue().bold(), record.cycle.to_string().bright_white());
            println!("  {} {:.3} A", "Load current:".bright_white(), record.load_current_a);
            println!("  {} {}", "Charger:".bright_white(), record.power.power_text());
            println!("  {} {}", "Battery:".bright_white(), record.power.charge_text());

            let life = format!("{:.2}%", record.battery_life_percent);
            let life = if record.battery_life_percent < 20.0 {
                life.bright_red()
            } else {
                life.bright_green()
            };
            println!("  {} {} ({:.1} As)", "Battery life:".bright_white(), life, record.battery_charge);

            if let Some(t) = record.temperature_c {
                println!("  {} {:.2} °C", "Temperature:".bright_white(), t);
            }
            if let Some(h) = record.humidity_percent {
                println!("  {} {:.2} %RH", "Humidity:".bright_white(), h);
            }
            if let Some(soc) = record.state_of_charge_percent {
                println!("  {} {}%", "Gauge SoC:".bright_white(), soc);
            }
            if let Some(v) = record.cell_voltage_v {
                println!("  {} {:.3} V", "Cell voltage:".bright_white(), v);
            }
            if let Some(c) = record.gas_concentration {
                println!("  {} {}", "TVOC:".bright_white(), c);
            }
            if !record.stale_sensors.is_empty() {
                let stale: Vec<String> = record.stale_sensors.iter().map(ToString::to_string).collect();
                println!("  {} {}", "Stale:".bright_yellow(), stale.join(", ").yellow());
            }
        }
    }
}

fn print_reply(reply: &ControlReply, format: &str) {
    match format {
        "json" => println!("{}", serde_json::to_string(reply).unwrap_or_else(|_| reply.message.clone())),
        "compact" => println!("{}", reply.message),
        _ => {
            if reply.ok {
                println!("{} {}", "✅".green(), reply.message.bright_green());
            } else {
                println!("{} {}", "❌".red(), reply.message.bright_red());
            }
        }
    }
}

fn print_scan(reply: &ControlReply, format: &str) {
    if format != "table" || !reply.ok {
        print_reply(reply, format);
        return;
    }

    println!("{} {}", "Bus scan:".bright_blue().bold(), reply.message);
    for address in &reply.devices {
        println!("  {}", address.to_string().bright_cyan());
    }
}
