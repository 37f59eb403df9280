use battnode::control::SimulatedControls;
use battnode::node::ShutdownSignal;
use battnode::simulation::{standard_bus, SimulatedAdc, SimulatedInputs};
use battnode::status::{LogSink, UdpSink, WatchSink};
use battnode::{NodeConfig, StatusFormat, StatusRecord, StdDelay, TelemetryNode};
use clap::{App, Arg};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Mutex};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_PORT: &str = "2323";
const DEFAULT_LOAD_CODE: u16 = 1200;
const SIMULATION_SEED: u64 = 0x1234_5678_9ABC_DEF0;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let matches = App::new("telemetry-node")
        .version("0.1.0")
        .about("Battery telemetry node running on a simulated board")
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("FILE")
                .help("JSON configuration file")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("interval")
                .short("i")
                .long("interval")
                .value_name("MS")
                .help("Cycle interval in milliseconds (overrides the configuration)")
                .takes_value(true)
                .validator(|v| match v.parse::<u32>() {
                    Ok(ms) if ms > 0 => Ok(()),
                    _ => Err("Interval must be a positive number of milliseconds".into()),
                }),
        )
        .arg(
            Arg::with_name("cycles")
                .short("n")
                .long("cycles")
                .value_name("COUNT")
                .help("Stop after this many cycles")
                .takes_value(true)
                .validator(|v| match v.parse::<u64>() {
                    Ok(_) => Ok(()),
                    Err(_) => Err("Cycle count must be a number".into()),
                }),
        )
        .arg(
            Arg::with_name("port")
                .short("p")
                .long("port")
                .value_name("PORT")
                .help("TCP port for the status stream")
                .takes_value(true)
                .default_value(DEFAULT_PORT),
        )
        .arg(
            Arg::with_name("udp")
                .long("udp")
                .value_name("HOST:PORT")
                .help("Also send each status record as a UDP datagram")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("format")
                .short("f")
                .long("format")
                .value_name("FORMAT")
                .help("Status record format (overrides the configuration)")
                .takes_value(true)
                .possible_values(&["text", "json"]),
        )
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .long("verbose")
                .help("Enable debug logging"),
        )
        .get_matches();

    let default_level = if matches.is_present("verbose") { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = match matches.value_of("config") {
        Some(path) => NodeConfig::from_file(path)?,
        None => NodeConfig::default(),
    };
    if let Some(interval) = matches.value_of("interval") {
        config.cycle_interval_ms = interval.parse()?;
    }
    if let Some(cycles) = matches.value_of("cycles") {
        config.max_cycles = Some(cycles.parse()?);
    }
    match matches.value_of("format") {
        Some("json") => config.status_format = StatusFormat::Json,
        Some("text") => config.status_format = StatusFormat::Text,
        _ => {}
    }
    let port = matches.value_of("port").unwrap_or(DEFAULT_PORT).parse::<u16>()?;

    println!("Battery Telemetry Node");
    println!("======================");

    let adc = SimulatedAdc::new(DEFAULT_LOAD_CODE).with_noise(SIMULATION_SEED, 8);
    let inputs = SimulatedInputs::new();

    let mut node = TelemetryNode::from_config(
        &config,
        standard_bus(SIMULATION_SEED),
        adc.clone(),
        inputs.clone(),
        StdDelay,
    )?;

    let devices: Vec<_> = node.scan_bus().into_iter().collect();
    for address in &devices {
        info!("bus device at {}", address);
    }
    let controls = Arc::new(SimulatedControls::new(inputs, adc, devices));

    let (watch_sink, status_rx) = WatchSink::new();
    node.add_sink(Box::new(LogSink {
        format: config.status_format,
    }));
    node.add_sink(Box::new(watch_sink));

    if let Some(target) = matches.value_of("udp") {
        let target: SocketAddr = target.parse()?;
        let local: SocketAddr = if target.is_ipv4() {
            "0.0.0.0:0".parse()?
        } else {
            "[::]:0".parse()?
        };
        node.add_sink(Box::new(UdpSink::bind(local, target, config.status_format)?));
        info!("sending status datagrams to {}", target);
    }

    let shutdown = ShutdownSignal::new();

    let ctrl_c_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl+C received, stopping after the current cycle");
            ctrl_c_shutdown.trigger();
        }
    });

    let listener = TcpListener::bind(("127.0.0.1", port)).await?;
    info!("status stream listening on port {}", port);
    let stream_format = config.status_format;
    let tcp_server = tokio::spawn(async move {
        if let Err(e) = serve_status(listener, status_rx, controls, stream_format).await {
            error!("TCP server error: {}", e);
        }
    });

    let loop_shutdown = shutdown.clone();
    let cycles = tokio::task::spawn_blocking(move || {
        let cycles = node.run(&loop_shutdown);
        (cycles, node.stats())
    })
    .await;

    tcp_server.abort();

    match cycles {
        Ok((cycles, stats)) => {
            println!(
                "Telemetry node stopped after {} cycles ({} sensor failures, {} analog failures)",
                cycles, stats.sensor_failures, stats.analog_failures
            );
        }
        Err(e) => error!("acquisition loop panicked: {}", e),
    }

    Ok(())
}

async fn serve_status(
    listener: TcpListener,
    status_rx: watch::Receiver<Option<StatusRecord>>,
    controls: Arc<SimulatedControls>,
    format: StatusFormat,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                info!("client connected: {}", addr);
                let client_rx = status_rx.clone();
                let client_controls = Arc::clone(&controls);

                tokio::spawn(async move {
                    if let Err(e) = handle_client(stream, client_rx, client_controls, format).await {
                        warn!("client {} error: {}", addr, e);
                    }
                    info!("client {} disconnected", addr);
                });
            }
            Err(e) => {
                error!("failed to accept connection: {}", e);
            }
        }
    }
}

async fn handle_client(
    stream: TcpStream,
    mut status_rx: watch::Receiver<Option<StatusRecord>>,
    controls: Arc<SimulatedControls>,
    format: StatusFormat,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let (reader, writer) = stream.into_split();
    let mut buf_reader = BufReader::new(reader);
    let writer = Arc::new(Mutex::new(writer));

    // Streams each new record; a slow client skips intermediate ones.
    let status_writer = Arc::clone(&writer);
    let status_task = tokio::spawn(async move {
        while status_rx.changed().await.is_ok() {
            let line = match status_rx.borrow_and_update().as_ref() {
                Some(record) => format!("{}\r\n", record.render(format)),
                None => continue,
            };
            let mut writer_guard = status_writer.lock().await;
            if let Err(e) = writer_guard.write_all(line.as_bytes()).await {
                warn!("failed to send status: {}", e);
                break;
            }
        }
    });

    let mut line = String::new();
    loop {
        line.clear();
        match buf_reader.read_line(&mut line).await {
            Ok(0) => break,
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }

                let reply = controls.handle_line(trimmed);
                let reply_json = serde_json::to_string(&reply)?;
                let mut writer_guard = writer.lock().await;
                writer_guard.write_all(reply_json.as_bytes()).await?;
                writer_guard.write_all(b"\r\n").await?;
            }
            Err(e) => {
                error!("error reading from client: {}", e);
                break;
            }
        }
    }

    status_task.abort();
    Ok(())
}
